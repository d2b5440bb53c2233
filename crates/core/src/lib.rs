//! Core domain types shared by every Cadence crate.
//!
//! This crate defines the canonical data model:
//! - Song and playlist identifiers
//! - Content hashing for uploaded audio
//! - Audio media types and the upload allow-list
//! - Byte ranges for partial delivery
//! - Blob key layout
//! - Configuration and the error taxonomy

pub mod config;
pub mod error;
pub mod hash;
pub mod layout;
pub mod media;
pub mod playlist;
pub mod range;
pub mod song;

pub use error::{Error, ErrorKind, Result};
pub use hash::{ContentHash, ContentHasher};
pub use media::MediaType;
pub use playlist::PlaylistId;
pub use range::{ByteRange, RangeSpec};
pub use song::SongId;

/// Default maximum accepted upload size: 512 MiB
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 512 * 1024 * 1024;

/// Default offline cache capacity: 1 GiB
pub const DEFAULT_OFFLINE_CAPACITY_BYTES: u64 = 1024 * 1024 * 1024;
