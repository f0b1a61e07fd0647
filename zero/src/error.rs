//! Error types for the zero library

use thiserror::Error;

/// Main error type for zero operations
#[derive(Error, Debug)]
pub enum Error {
    /// Transport layer errors
    #[error("Transport layer error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Could not reach the server, or the connection died mid-call
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// No response within the call deadline
    #[error("Operation timed out after {duration_ms}ms: {operation}")]
    Timeout { operation: String, duration_ms: u64 },

    /// The server has no handler for the requested method
    #[error("Method not found: {detail}")]
    MethodNotFound { detail: String },

    /// The handler failed on the server
    #[error("Remote exception: {detail}")]
    RemoteException { detail: String },

    /// A payload did not match the declared type
    #[error("Validation error: {detail}")]
    Validation { detail: String },

    /// Serialization and deserialization errors
    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Handler registration rejected
    #[error("Cannot register '{name}': {reason}")]
    Registration { name: String, reason: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// IO errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// Wire protocol errors
    #[error("Protocol error: {message}")]
    Protocol {
        message: String,
        expected: Option<String>,
        received: Option<String>,
    },

    /// Runtime errors
    #[error("Runtime error: {message}")]
    Runtime {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Create a transport error with source
    pub fn transport<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a transport error without source
    pub fn transport_msg(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a connection error without source
    pub fn connection_msg(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, duration_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_ms,
        }
    }

    pub fn method_not_found(detail: impl Into<String>) -> Self {
        Self::MethodNotFound {
            detail: detail.into(),
        }
    }

    pub fn remote_exception(detail: impl Into<String>) -> Self {
        Self::RemoteException {
            detail: detail.into(),
        }
    }

    pub fn validation(detail: impl Into<String>) -> Self {
        Self::Validation {
            detail: detail.into(),
        }
    }

    /// Create a serialization error with source
    pub fn serialization<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Serialization {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a serialization error without source
    pub fn serialization_msg(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
            source: None,
        }
    }

    /// Create a registration error
    pub fn registration(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Registration {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>, field: Option<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            field,
        }
    }

    /// Create a protocol error
    pub fn protocol(
        message: impl Into<String>,
        expected: Option<String>,
        received: Option<String>,
    ) -> Self {
        Self::Protocol {
            message: message.into(),
            expected,
            received,
        }
    }

    /// Create a runtime error with source
    pub fn runtime<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Runtime {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a runtime error without source
    pub fn runtime_msg(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
            source: None,
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport { .. } => true,
            Error::Connection { .. } => true,
            Error::Timeout { .. } => true,
            Error::Io { .. } => true,
            Error::Runtime { .. } => true,
            Error::MethodNotFound { .. } => false,
            Error::RemoteException { .. } => false,
            Error::Validation { .. } => false,
            Error::Serialization { .. } => false,
            Error::Registration { .. } => false,
            Error::Configuration { .. } => false,
            Error::Protocol { .. } => false,
        }
    }

    /// Get error category for debugging
    pub fn category(&self) -> &'static str {
        match self {
            Error::Transport { .. } => "transport",
            Error::Connection { .. } => "connection",
            Error::Timeout { .. } => "timeout",
            Error::MethodNotFound { .. } => "method_resolution",
            Error::RemoteException { .. } => "remote",
            Error::Validation { .. } => "validation",
            Error::Serialization { .. } => "serialization",
            Error::Registration { .. } => "registration",
            Error::Configuration { .. } => "configuration",
            Error::Io { .. } => "io",
            Error::Protocol { .. } => "protocol",
            Error::Runtime { .. } => "runtime",
        }
    }
}

// Implement From traits for common error types
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Error::serialization("MessagePack encoding failed", err)
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Error::serialization("MessagePack decoding failed", err)
    }
}

impl From<zeromq::ZmqError> for Error {
    fn from(err: zeromq::ZmqError) -> Self {
        Error::transport("ZeroMQ socket operation failed", err)
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::runtime("Task join failed", err)
    }
}

/// Result type for zero operations
pub type Result<T> = std::result::Result<T, Error>;
