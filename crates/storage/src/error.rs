//! Storage error types.

use cadence_core::ErrorKind;
use thiserror::Error;

/// Storage operation errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("S3 error: {0}")]
    S3(#[from] Box<dyn std::error::Error + Send + Sync>),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl StorageError {
    /// Classify this error for callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidKey(_) | Self::InvalidRange(_) => ErrorKind::InvalidInput,
            Self::Io(_) | Self::S3(_) | Self::Config(_) => ErrorKind::StorageFailure,
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
