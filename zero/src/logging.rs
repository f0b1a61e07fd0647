//! Log subscriber setup

use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter; `RUST_LOG` is the fallback
pub const LOG_ENV: &str = "ZERO_LOG";

/// Install a formatting subscriber, filtered by `ZERO_LOG` or `RUST_LOG`
/// (default `info`). Does nothing if a subscriber is already installed.
pub fn init() {
    let filter = std::env::var(LOG_ENV)
        .ok()
        .and_then(|spec| EnvFilter::try_new(spec).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .try_init();

    tracing::debug!(pid = std::process::id(), "logging initialized");
}
