use thiserror::Error;

use crate::router::RoutingError;

#[derive(Error, Debug)]
pub enum OpusError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration parsing failed: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid capabilities: {0}")]
    InvalidCapabilities(String),

    #[error("Not connected to the switch")]
    NotConnected,

    #[error("Timed out waiting for a response")]
    Timeout,

    #[error("{what} {value} is out of range ({min}..={max})")]
    OutOfRange {
        what: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("{what} {port} is not supported by this model")]
    UnsupportedPort { what: &'static str, port: i64 },

    #[error("Routing failed: {0}")]
    Routing(#[from] RoutingError),
}

impl OpusError {
    /// True for failures that should take the connection offline and
    /// schedule a reconnect.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            OpusError::Io(_) | OpusError::NotConnected | OpusError::Timeout
        )
    }
}
