//! Error types for directory sources

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DirectoryError>;

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("Directory request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Directory returned HTTP {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Directory authentication failed: {0}")]
    Authentication(String),

    #[error("Invalid directory response: {0}")]
    InvalidResponse(String),

    #[error("Directory unavailable: {0}")]
    Unavailable(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
