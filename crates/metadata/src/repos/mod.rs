//! Repository traits for metadata operations.

pub mod gc;
pub mod playlists;
pub mod songs;
pub mod tombstones;

pub use gc::{GcJobState, GcJobType, GcRepo, GcStats};
pub use playlists::PlaylistRepo;
pub use songs::SongRepo;
pub use tombstones::TombstoneRepo;
