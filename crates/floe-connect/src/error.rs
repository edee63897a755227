//! Error types for floe-connect
//!
//! Two levels, mirroring the split between the coordination runtime and the
//! data plane: [`ConnectError`] for everything the channel, coordinator, and
//! catalog surface; [`DataError`] for record conversion and writer failures.

use thiserror::Error;

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, ConnectError>;

/// Result type alias for data-plane operations
pub type DataResult<T> = std::result::Result<T, DataError>;

/// Main error type for the connector runtime
#[derive(Error, Debug)]
pub enum ConnectError {
    /// Configuration error (fatal at startup)
    #[error("configuration error: {0}")]
    Config(String),

    /// Control-channel transport error (produce/consume/admin)
    #[error("transport error: {0}")]
    Transport(String),

    /// Catalog operation failed
    #[error("catalog error: {0}")]
    Catalog(String),

    /// Wire codec error
    #[error("serialization error: {0}")]
    Serialization(#[from] floe_events::WireError),

    /// Timeout waiting for an operation
    #[error("timeout: {0}")]
    Timeout(String),

    /// Data-plane failure (conversion, writer)
    #[error(transparent)]
    Data(#[from] DataError),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Shutdown requested
    #[error("shutdown requested")]
    Shutdown,

    /// Generic error
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Errors raised while converting records or staging files
#[derive(Error, Debug)]
pub enum DataError {
    /// Record value could not be converted to the table schema
    #[error("conversion error: {0}")]
    Conversion(String),

    /// Table schema is unusable for the incoming records
    #[error("schema error: {0}")]
    Schema(String),

    /// Underlying file-format writer failed
    #[error("writer error: {0}")]
    Writer(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConnectError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn catalog(msg: impl Into<String>) -> Self {
        Self::Catalog(msg.into())
    }

    /// Transient errors are retried on the task's next poll cycle; anything
    /// else is surfaced to the sink framework.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }

    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown)
    }
}

impl DataError {
    pub fn conversion(msg: impl Into<String>) -> Self {
        Self::Conversion(msg.into())
    }

    pub fn writer(msg: impl Into<String>) -> Self {
        Self::Writer(msg.into())
    }
}
