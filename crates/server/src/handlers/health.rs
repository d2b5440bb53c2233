//! Health endpoint.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use serde::Serialize;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// GET /v1/health - Probe both stores.
///
/// Unauthenticated so load balancers and orchestrators can call it. Returns
/// 503 when either store is unreachable.
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    if let Err(e) = state.metadata.health_check().await {
        tracing::warn!(error = %e, "Metadata health check failed");
        return Err(ApiError::Unavailable(format!("metadata store: {e}")));
    }
    if let Err(e) = state.storage.health_check().await {
        tracing::warn!(error = %e, "Storage health check failed");
        return Err(ApiError::Unavailable(format!("blob store: {e}")));
    }

    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    }))
}
