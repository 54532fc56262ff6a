pub mod callback;
pub mod health;
pub mod jobs;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /jobs/image          submit a whole-image job (POST)
/// /jobs/batch          submit a region batch job (POST)
/// /jobs/{id}           job progress (GET)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/jobs", jobs::router())
}
