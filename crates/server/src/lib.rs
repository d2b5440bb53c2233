//! HTTP API server for the Cadence audio library.
//!
//! This crate provides:
//! - The content lifecycle core (`library`): ingestion, delivery, catalog
//!   queries and playlists
//! - Background reconciliation between blob and metadata stores
//! - The HTTP API over both, plus health and metrics endpoints

pub mod error;
pub mod handlers;
pub mod library;
pub mod metrics;
pub mod reconcile;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use library::Library;
pub use routes::create_router;
pub use state::AppState;
