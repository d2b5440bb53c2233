//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::routing::{delete, get, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Health check (unauthenticated for load balancers and probes)
        .route("/v1/health", get(handlers::health_check))
        // Ingestion and catalog
        .route(
            "/v1/songs",
            post(handlers::upload_song).get(handlers::list_songs),
        )
        .route(
            "/v1/songs/{song_id}",
            get(handlers::get_song)
                .patch(handlers::update_song)
                .delete(handlers::delete_song),
        )
        // Delivery
        .route("/v1/songs/{song_id}/stream", get(handlers::stream_song))
        .route("/v1/songs/{song_id}/download", get(handlers::download_song))
        // Playlists
        .route(
            "/v1/playlists",
            post(handlers::create_playlist).get(handlers::list_playlists),
        )
        .route(
            "/v1/playlists/{playlist_id}",
            get(handlers::get_playlist)
                .patch(handlers::rename_playlist)
                .delete(handlers::delete_playlist),
        )
        .route(
            "/v1/playlists/{playlist_id}/entries",
            post(handlers::add_entry),
        )
        .route(
            "/v1/playlists/{playlist_id}/entries/{position}",
            delete(handlers::remove_entry),
        )
        .route(
            "/v1/playlists/{playlist_id}/prune",
            post(handlers::prune_playlist),
        )
        // Reconciliation
        .route(
            "/v1/admin/gc",
            get(handlers::list_gc_jobs).post(handlers::trigger_gc),
        )
        .route("/v1/admin/gc/{job_id}", get(handlers::get_gc_job));

    let mut router = Router::new().merge(api_routes);

    // When enabled, this endpoint must be network-restricted to the
    // Prometheus scraper. See crate::metrics.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
