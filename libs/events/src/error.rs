//! Error types for event handling.

use thiserror::Error;

/// Errors that can occur when encoding or decoding events.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventError {
    /// The aggregate type is unknown.
    #[error("unknown aggregate type: {0}")]
    UnknownAggregateType(String),

    /// The encoded payload exceeds the outbox payload budget.
    #[error("event payload is {size} bytes, limit is {limit}")]
    PayloadTooLarge { size: usize, limit: usize },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for EventError {
    fn from(err: serde_json::Error) -> Self {
        EventError::Serialization(err.to_string())
    }
}
