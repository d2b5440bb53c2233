//! Error types for the core domain.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("invalid media type: {0}")]
    InvalidMediaType(String),

    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Every core error is a caller mistake.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidInput
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse failure classes reported to callers.
///
/// Every typed error in the workspace maps onto exactly one of these.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad content type, size, identifier or range. Never retried internally.
    InvalidInput,
    /// Missing song, playlist or blob.
    NotFound,
    /// Adapter-level I/O failure.
    StorageFailure,
    /// The offline cache could not free enough unpinned space.
    CacheFull,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::NotFound => "not_found",
            Self::StorageFailure => "storage_failure",
            Self::CacheFull => "cache_full",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
