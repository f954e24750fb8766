//! Storage-specific error types.

use thiserror::Error;
use time::OffsetDateTime;

/// Errors that can occur in the storage layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Query range with `start` after `end`.
    #[error("invalid range: start {start} is after end {end}")]
    InvalidRange {
        start: OffsetDateTime,
        end: OffsetDateTime,
    },

    /// File system operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A record line could not be decoded.
    #[error("malformed record {line:?}: {reason}")]
    Format { line: String, reason: String },

    /// The operation observed a cancellation request.
    #[error("operation cancelled")]
    Cancelled,

    /// A background write task failed to complete.
    #[error("background task failed: {0}")]
    Background(String),
}

impl StoreError {
    pub(crate) fn format(line: &str, reason: impl Into<String>) -> Self {
        Self::Format {
            line: line.to_string(),
            reason: reason.into(),
        }
    }
}
