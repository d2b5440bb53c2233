//! Metadata store error types.

use cadence_core::ErrorKind;
use thiserror::Error;

/// Metadata store operation errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl MetadataError {
    /// Classify this error for callers that only care about the broad kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MetadataError::NotFound(_) => ErrorKind::NotFound,
            MetadataError::AlreadyExists(_) | MetadataError::Constraint(_) => {
                ErrorKind::InvalidInput
            }
            MetadataError::Database(_) | MetadataError::Config(_) | MetadataError::Internal(_) => {
                ErrorKind::StorageFailure
            }
        }
    }
}

impl From<std::io::Error> for MetadataError {
    fn from(e: std::io::Error) -> Self {
        MetadataError::Config(e.to_string())
    }
}

/// Result type for metadata operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;
