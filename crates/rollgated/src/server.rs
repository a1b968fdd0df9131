//! Request-triggered mode: one rollout tick per incoming request.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::any;
use axum::Router;
use tracing::warn;

use crate::runner::{errs_to_string, run_rollouts};
use crate::AppState;

/// Build the trigger router.
pub fn build_router(state: AppState) -> Router {
    Router::new().route("/", any(trigger)).with_state(state)
}

/// Run one tick; 200 when every service succeeded, 500 with a summary of the
/// per-service errors otherwise.
async fn trigger(State(state): State<AppState>) -> impl IntoResponse {
    // TODO: handle all strategies, not only the first one.
    let strategy = state.config.strategies[0].clone();
    let errs = run_rollouts(&state, &strategy).await;

    if errs.is_empty() {
        return (StatusCode::OK, String::new());
    }

    let msg = format!(
        "there were {} errors: \n{}",
        errs.len(),
        errs_to_string(&errs)
    );
    warn!(errors = errs.len(), "rollout tick finished with errors");
    (StatusCode::INTERNAL_SERVER_ERROR, msg)
}
