//! Library operation errors.

use cadence_core::ErrorKind;
use cadence_metadata::MetadataError;
use cadence_storage::StorageError;
use thiserror::Error;

/// Errors from ingestion, delivery, catalog and playlist operations.
#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("unsupported content type: {0}")]
    InvalidFormat(String),

    #[error("upload of {declared} bytes exceeds the {max} byte limit")]
    TooLarge { declared: u64, max: u64 },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("stream ended after {received} of {expected} bytes")]
    IncompleteStream { expected: u64, received: u64 },

    #[error("storage write failed: {0}")]
    StorageWriteFailed(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("range not satisfiable for {total} byte resource")]
    RangeNotSatisfiable { total: u64 },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("metadata error: {0}")]
    Metadata(MetadataError),
}

impl From<MetadataError> for LibraryError {
    fn from(e: MetadataError) -> Self {
        match e {
            MetadataError::NotFound(what) => LibraryError::NotFound(what),
            other => LibraryError::Metadata(other),
        }
    }
}

impl From<cadence_core::Error> for LibraryError {
    fn from(e: cadence_core::Error) -> Self {
        LibraryError::InvalidInput(e.to_string())
    }
}

impl LibraryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidFormat(_)
            | Self::TooLarge { .. }
            | Self::InvalidInput(_)
            | Self::IncompleteStream { .. }
            | Self::RangeNotSatisfiable { .. } => ErrorKind::InvalidInput,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::StorageWriteFailed(_) => ErrorKind::StorageFailure,
            Self::Storage(e) => e.kind(),
            Self::Metadata(e) => e.kind(),
        }
    }
}

/// Result type for library operations.
pub type LibraryResult<T> = std::result::Result<T, LibraryError>;
