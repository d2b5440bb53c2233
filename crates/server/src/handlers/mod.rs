//! HTTP request handlers.

pub mod admin;
pub mod common;
pub mod health;
pub mod playlists;
pub mod songs;

pub use admin::*;
pub use health::*;
pub use playlists::*;
pub use songs::*;
