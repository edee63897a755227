//! Wire codec errors

use thiserror::Error;

/// Errors produced while encoding or decoding control events
#[derive(Debug, Error)]
pub enum WireError {
    /// Record ended before a complete field was read
    #[error("truncated event while reading {0}")]
    Truncated(&'static str),

    /// Version byte is newer than this reader understands
    #[error("unsupported wire version {0}")]
    UnsupportedVersion(u8),

    /// Event type discriminant is unknown to this reader
    #[error("unknown event type {0}")]
    UnknownEventType(u8),

    /// A required field was absent
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// A field was present but malformed
    #[error("invalid field {field}: {message}")]
    InvalidField {
        field: &'static str,
        message: String,
    },

    /// Encoded event exceeds [`crate::MAX_EVENT_SIZE`]
    #[error("event exceeds maximum size: {0} bytes")]
    TooLarge(usize),
}

impl WireError {
    pub(crate) fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            message: message.into(),
        }
    }
}
