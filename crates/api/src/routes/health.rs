use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
struct AdmissionStatus {
    capacity: usize,
    available: usize,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    admission: AdmissionStatus,
    inflight_tasks: usize,
    active_jobs: usize,
}

/// GET/HEAD /health -- liveness plus pipeline counters.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.orchestrator.stats();
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        admission: AdmissionStatus {
            capacity: stats.capacity,
            available: stats.available,
        },
        inflight_tasks: stats.inflight_tasks,
        active_jobs: stats.active_jobs,
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
