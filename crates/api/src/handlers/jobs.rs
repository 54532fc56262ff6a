//! Handlers for job submission and progress queries.

use std::path::PathBuf;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use diffserver_core::region::CoordOrigin;
use diffserver_core::types::JobId;
use diffserver_pipeline::BatchRequest;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SubmitImageRequest {
    pub image_path: String,
}

#[derive(Debug, Deserialize)]
pub struct SubmitBatchRequest {
    pub image_path: String,
    pub config_path: String,
    /// `top-left` (default) or `bottom-left`.
    pub origin: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubmittedJob {
    pub job_id: JobId,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/image
///
/// Queue a whole-image job. Returns 202 with the job id.
pub async fn submit_image(
    State(state): State<AppState>,
    Json(input): Json<SubmitImageRequest>,
) -> AppResult<impl IntoResponse> {
    let job_id = state
        .orchestrator
        .submit_image(PathBuf::from(input.image_path.trim()))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: SubmittedJob { job_id },
        }),
    ))
}

/// POST /api/v1/jobs/batch
///
/// Queue a region batch job. Returns 202 with the job id.
pub async fn submit_batch(
    State(state): State<AppState>,
    Json(input): Json<SubmitBatchRequest>,
) -> AppResult<impl IntoResponse> {
    let origin = match input.origin.as_deref() {
        Some(raw) => raw.trim().parse::<CoordOrigin>()?,
        None => CoordOrigin::default(),
    };

    let job_id = state.orchestrator.submit_batch(BatchRequest {
        image: PathBuf::from(input.image_path.trim()),
        config: PathBuf::from(input.config_path.trim()),
        origin,
    })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: SubmittedJob { job_id },
        }),
    ))
}

/// GET /api/v1/jobs/{id}
///
/// Progress of a job that has not finished yet. Finished and unknown
/// jobs both return 404.
pub async fn get_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let job_id: JobId = id
        .parse()
        .map_err(|_| AppError::BadRequest(format!("Invalid job id: {id}")))?;

    let progress = state
        .orchestrator
        .job_progress(job_id)
        .ok_or_else(|| AppError::NotFound(format!("No active job {job_id}")))?;

    Ok(Json(DataResponse { data: progress }))
}
