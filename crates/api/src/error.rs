use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use diffserver_core::error::CoreError;
use diffserver_pipeline::PipelineError;
use serde_json::json;

/// Unified error type for HTTP handlers.
///
/// Maps pipeline errors and HTTP-level failures into the JSON shape
/// `{ "error": "...", "code": "..." }`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Pipeline(err) => classify_pipeline_error(err),
            AppError::Core(err) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", err.to_string()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, Json(body)).into_response()
    }
}

/// Map a [`PipelineError`] to an HTTP status, error code, and message.
fn classify_pipeline_error(err: &PipelineError) -> (StatusCode, &'static str, String) {
    match err {
        PipelineError::QueueFull(_) => {
            tracing::warn!(error = %err, "Submission rejected");
            (StatusCode::SERVICE_UNAVAILABLE, "QUEUE_FULL", err.to_string())
        }
        PipelineError::PoolClosed(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            "SHUTTING_DOWN",
            err.to_string(),
        ),
        PipelineError::DuplicateJob(_) => (StatusCode::CONFLICT, "CONFLICT", err.to_string()),
        PipelineError::Validation(msg) => {
            (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
        }
    }
}

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;
