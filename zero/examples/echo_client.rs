//! Calls the `echo_server` example
//!
//! `cargo run --example echo_client -- [port]`

use std::time::Duration;
use zero::{Error, Result, Value, ZeroClient};

fn main() -> Result<()> {
    zero::logging::init();

    let port = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(5559);
    let client = ZeroClient::new("localhost", port);

    let reply: String = client.call("echo", "hello")?;
    tracing::info!("echo -> {}", reply);

    let greeting: String = client.call("hello", ())?;
    tracing::info!("hello -> {}", greeting);

    let root: f64 = client.call("square_root", 2.0)?;
    tracing::info!("square_root(2) -> {}", root);

    match client.call::<_, Value>("necho", "hello") {
        Err(Error::MethodNotFound { detail }) => tracing::info!("necho -> {}", detail),
        other => tracing::warn!("necho -> unexpected {:?}", other),
    }

    match client.call_with_timeout::<_, String>("sleep", 500u64, Duration::from_millis(100)) {
        Err(e @ Error::Timeout { .. }) => tracing::info!("sleep(500) -> {}", e),
        other => tracing::warn!("sleep(500) -> unexpected {:?}", other),
    }

    let source: String = client.call("get_rpc_contract", ("localhost", port))?;
    println!("{source}");

    client.close();
    Ok(())
}
