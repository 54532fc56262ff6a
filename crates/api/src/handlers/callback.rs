//! RunningHub completion webhook.

use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use diffserver_pipeline::CallbackDisposition;
use diffserver_runninghub::parse_callback_str;

use crate::response::DataResponse;
use crate::state::AppState;

/// POST /rh_callback
///
/// Always answers 200 so RunningHub does not retry: malformed and
/// unknown callbacks are reported in the disposition instead. The
/// download and save happen after the response is sent.
pub async fn receive(
    State(state): State<AppState>,
    body: Bytes,
) -> Json<DataResponse<CallbackDisposition>> {
    let event = parse_callback_str(&String::from_utf8_lossy(&body));
    let disposition = state.orchestrator.handle_callback(event).await;
    Json(DataResponse { data: disposition })
}
