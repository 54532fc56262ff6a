use axum::routing::post;
use axum::Router;

use crate::handlers::callback;
use crate::state::AppState;

/// RunningHub webhook, mounted at root level.
///
/// ```text
/// POST /rh_callback   -> receive
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/rh_callback", post(callback::receive))
}
