//! Offline mirror of a Cadence library.
//!
//! [`OfflineCache`] keeps songs playable without the server:
//! - payloads live under `<dir>/blobs/`, indexed by `<dir>/index.db`
//! - resident bytes stay within a configured capacity, evicting the least
//!   recently accessed unpinned entries first
//! - readers and explicit reservations pin entries against eviction
//! - a reconciliation pass marks entries stale when the server changed them
//!   and refreshes them
//!
//! The server side is abstracted behind [`RemoteLibrary`].

pub mod cache;
pub mod error;
mod index;
pub mod pins;
pub mod remote;
pub mod state;

pub use cache::{CacheLookup, CacheStatus, CachedSong, EntryStatus, OfflineCache, ReconcileReport};
pub use error::{CacheError, CacheResult};
pub use pins::CacheReadGuard;
pub use remote::{AudioStream, RemoteError, RemoteLibrary, SongSnapshot};
pub use state::EntryState;
