//! Reconciliation job endpoints.

use crate::error::{ApiError, ApiResult};
use crate::handlers::common::{format_timestamp, read_json};
use crate::reconcile::spawn_gc_job;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use cadence_metadata::MetadataError;
use cadence_metadata::models::GcJobRow;
use cadence_metadata::repos::gc::{GcJobType, GcStats};
use cadence_metadata::repos::GcRepo;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Trigger GC request.
#[derive(Debug, Deserialize)]
pub struct TriggerGcRequest {
    pub job_type: String,
}

/// Trigger GC response.
#[derive(Debug, Serialize)]
pub struct TriggerGcResponse {
    pub job_id: String,
}

/// POST /v1/admin/gc - Queue a reconciliation job.
pub async fn trigger_gc(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<(StatusCode, Json<TriggerGcResponse>)> {
    let body: TriggerGcRequest = read_json(req.into_body()).await?;
    let job_type = GcJobType::parse(&body.job_type)
        .ok_or_else(|| ApiError::BadRequest("invalid job_type".to_string()))?;

    // The unique index on active jobs is the only guard; there is no
    // check-then-insert here.
    let job_id = match spawn_gc_job(&state, job_type).await {
        Ok(job_id) => job_id,
        Err(MetadataError::Constraint(_)) => {
            return Err(ApiError::Conflict(format!(
                "another {} job is already active",
                body.job_type
            )));
        }
        Err(e) => return Err(e.into()),
    };

    Ok((
        StatusCode::ACCEPTED,
        Json(TriggerGcResponse {
            job_id: job_id.to_string(),
        }),
    ))
}

/// GC job status response.
#[derive(Debug, Serialize)]
pub struct GcJobResponse {
    pub job_id: String,
    pub job_type: String,
    pub state: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub stats: Option<GcStats>,
}

impl GcJobResponse {
    fn from_row(job: GcJobRow) -> ApiResult<Self> {
        let stats: Option<GcStats> = job
            .stats_json
            .as_ref()
            .and_then(|s| serde_json::from_str(s).ok());

        Ok(Self {
            job_id: job.gc_job_id.to_string(),
            job_type: job.job_type,
            state: job.state,
            started_at: job.started_at.map(format_timestamp).transpose()?,
            finished_at: job.finished_at.map(format_timestamp).transpose()?,
            stats,
        })
    }
}

/// Query parameters for listing GC jobs.
#[derive(Debug, Deserialize)]
pub struct ListGcJobsParams {
    /// Maximum number of jobs to return (default: 20, max: 100).
    pub limit: Option<u32>,
}

/// GET /v1/admin/gc - List recent GC jobs.
pub async fn list_gc_jobs(
    State(state): State<AppState>,
    Query(params): Query<ListGcJobsParams>,
) -> ApiResult<Json<Vec<GcJobResponse>>> {
    let limit = params.limit.unwrap_or(20).min(100);
    let jobs = state.metadata.get_recent_gc_jobs(limit).await?;
    let responses = jobs
        .into_iter()
        .map(GcJobResponse::from_row)
        .collect::<ApiResult<Vec<_>>>()?;
    Ok(Json(responses))
}

/// GET /v1/admin/gc/{job_id} - Get GC job status.
pub async fn get_gc_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<GcJobResponse>> {
    let job_id = Uuid::parse_str(&job_id)
        .map_err(|e| ApiError::BadRequest(format!("invalid job ID: {e}")))?;

    let job = state
        .metadata
        .get_gc_job(job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("GC job not found".to_string()))?;

    Ok(Json(GcJobResponse::from_row(job)?))
}
