//! Error types for mbus core

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Protocol-level error types
#[derive(Error, Debug)]
pub enum Error {
    /// Frame body exceeds the configured limit
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    /// Envelope could not be serialized
    #[error("encode error: {0}")]
    EncodeError(String),

    /// Frame body is not a valid envelope (bad JSON or unknown `type` tag)
    #[error("decode error: {0}")]
    DecodeError(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::DecodeError(e.to_string())
    }
}
