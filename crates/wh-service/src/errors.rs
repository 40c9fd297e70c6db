//! Webhooks service error types.
//!
//! Most failures here are absorbed close to where they happen (a bad raw
//! message is dropped, a failed delivery is retried, a bad storage row is
//! skipped during resync). `WhError` is the carrier between those layers;
//! the administration API translates failures into its own XML envelope
//! rather than exposing these messages.

use thiserror::Error;

/// Webhooks service error type.
#[derive(Debug, Error)]
pub enum WhError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Delivery error: {0}")]
    Delivery(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using `WhError`
pub type Result<T> = std::result::Result<T, WhError>;
