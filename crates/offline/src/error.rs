//! Offline cache error types.

use crate::remote::RemoteError;
use cadence_core::{ErrorKind, SongId};
use thiserror::Error;

/// Offline cache operation errors.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache full: need {needed} bytes, capacity {capacity} bytes, everything else is pinned")]
    CacheFull { needed: u64, capacity: u64 },

    #[error("song {0} is not cached")]
    NotCached(SongId),

    #[error("song {0} is reserved by a reader")]
    Reserved(SongId),

    #[error("song {0} is not reserved")]
    NotReserved(SongId),

    #[error("song {0} is already being fetched")]
    Busy(SongId),

    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CacheError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CacheError::CacheFull { .. } => ErrorKind::CacheFull,
            CacheError::NotCached(_) => ErrorKind::NotFound,
            CacheError::Reserved(_) | CacheError::NotReserved(_) | CacheError::Busy(_) => {
                ErrorKind::InvalidInput
            }
            CacheError::Remote(RemoteError::NotFound(_)) => ErrorKind::NotFound,
            CacheError::Remote(_)
            | CacheError::Integrity(_)
            | CacheError::Io(_)
            | CacheError::Database(_)
            | CacheError::Serialization(_) => ErrorKind::StorageFailure,
        }
    }
}

/// Result type for offline cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            CacheError::CacheFull {
                needed: 10,
                capacity: 5
            }
            .kind(),
            ErrorKind::CacheFull
        );
        assert_eq!(
            CacheError::NotCached(SongId::new()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            CacheError::Remote(RemoteError::NotFound(SongId::new())).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            CacheError::Remote(RemoteError::Unavailable("timeout".into())).kind(),
            ErrorKind::StorageFailure
        );
    }
}
