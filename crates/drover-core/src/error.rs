//! Error types for the drover core library.

use thiserror::Error;

/// Result type alias using the drover core `Error`.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for drover operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A protocol line could not be decoded into an event.
    #[error("Failed to parse event: {0}")]
    EventParse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
