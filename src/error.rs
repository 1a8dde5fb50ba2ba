//! Error types for Clipper.

use thiserror::Error;

/// Common error type for Clipper.
#[derive(Error, Debug)]
pub enum ClipperError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The presented credential does not resolve to a user.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Missing or malformed request input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for Clipper operations.
pub type Result<T> = std::result::Result<T, ClipperError>;
