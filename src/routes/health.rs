//! API health check endpoint.
//!
//! Used by container orchestrators and CI to verify the service responds.
//! Reports `degraded` while alert transitions are waiting for the store; it
//! never touches the database itself.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use super::AppState;

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    replay_pending: usize,
}

/// Handle `GET /health`.
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.engine.stats();
    let status = if stats.store_degraded { "degraded" } else { "ok" };
    Json(HealthResponse {
        status,
        replay_pending: stats.replay_pending,
    })
}

/// Create a subrouter containing the `/health` route.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
