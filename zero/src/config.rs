//! Configuration and protocol constants

use crate::{Error, Result};
use std::time::Duration;

/// Width of the request id at the head of every frame
pub const REQUEST_ID_LEN: usize = 32;
/// Width of the space-padded function name that follows the request id
pub const FUNCTION_NAME_LEN: usize = 80;
/// Fixed header length of a request frame
pub const REQUEST_HEADER_LEN: usize = REQUEST_ID_LEN + FUNCTION_NAME_LEN;

/// Reserved method: handshake, answered with [`CONNECTED`]
pub const CONNECT: &str = "connect";
/// Reserved method: client stub generation
pub const GET_RPC_CONTRACT: &str = "get_rpc_contract";
/// Method names that cannot be registered
pub const RESERVED_FUNCTIONS: [&str; 2] = [GET_RPC_CONTRACT, CONNECT];
/// Handshake reply
pub const CONNECTED: &str = "connected";

pub const FUNCTION_NOT_FOUND: &str = "__zerror__function_not_found";
pub const SERVER_EXCEPTION: &str = "__zerror__server_exception";
pub const VALIDATION_ERROR: &str = "__zerror__validation_error";
pub const FAILED_TO_GENERATE_CLIENT_CODE: &str = "__zerror__failed_to_generate_client_code";

/// First port tried for the TCP worker channel when IPC is unavailable
pub const DEFAULT_WORKER_PORT: u16 = 6666;

/// Set on re-executed worker processes: the channel to connect to
pub const WORKER_CHANNEL_ENV: &str = "ZERO_WORKER_CHANNEL";
/// Set on re-executed worker processes: the worker index
pub const WORKER_ID_ENV: &str = "ZERO_WORKER_ID";

/// How workers are hosted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerMode {
    /// Each worker is a child process running the current executable
    #[default]
    Process,
    /// Each worker is an OS thread of the server process
    Thread,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Worker count; `None` means one per available core
    pub workers: Option<usize>,
    pub worker_mode: WorkerMode,
    /// Frames the broker holds while no worker is connected
    pub high_water_mark: usize,
    /// How long a worker keeps retrying to reach the broker
    pub worker_connect_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5559,
            workers: None,
            worker_mode: WorkerMode::default(),
            high_water_mark: 1000,
            worker_connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn with_worker_mode(mut self, mode: WorkerMode) -> Self {
        self.worker_mode = mode;
        self
    }

    pub fn with_high_water_mark(mut self, hwm: usize) -> Self {
        self.high_water_mark = hwm;
        self
    }

    /// The public endpoint clients connect to
    pub fn address(&self) -> String {
        format!("tcp://{}:{}", self.host, self.port)
    }

    /// Resolve the worker count
    pub fn worker_count(&self) -> Result<usize> {
        match self.workers {
            Some(0) => Err(Error::configuration(
                "worker count must be positive",
                Some("workers".to_string()),
            )),
            Some(n) => Ok(n),
            None => Ok(std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::configuration(
                "host must not be empty",
                Some("host".to_string()),
            ));
        }
        if self.high_water_mark == 0 {
            return Err(Error::configuration(
                "high water mark must be positive",
                Some("high_water_mark".to_string()),
            ));
        }
        self.worker_count().map(|_| ())
    }
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Deadline for calls that do not pass one
    pub default_timeout: Duration,
    /// Deadline for establishing a connection and its handshake
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5559,
            default_timeout: Duration::from_millis(2000),
            connect_timeout: Duration::from_millis(2000),
        }
    }
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn address(&self) -> String {
        format!("tcp://{}:{}", self.host, self.port)
    }
}
