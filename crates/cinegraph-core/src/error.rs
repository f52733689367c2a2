//! Error types for CineGraph.

use thiserror::Error;

/// Main error type for engine operations that touch the outside world.
///
/// Graph queries never produce this; they log and return a neutral value.
#[derive(Error, Debug)]
pub enum CineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Decoder error: {0}")]
    Decoder(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Color error: {0}")]
    Color(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for CineError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, CineError>;
