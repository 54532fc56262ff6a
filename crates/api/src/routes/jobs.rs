//! Route definitions for job submission and progress.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Routes mounted at `/api/v1/jobs`.
///
/// ```text
/// POST /image   -> submit_image
/// POST /batch   -> submit_batch
/// GET  /{id}    -> get_progress
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/image", post(jobs::submit_image))
        .route("/batch", post(jobs::submit_batch))
        .route("/{id}", get(jobs::get_progress))
}
