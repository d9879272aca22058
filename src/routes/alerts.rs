use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tracing::{error, info};
use uuid::Uuid;

use super::{error_response, AppState};
use crate::error::EngineError;

// ---

const DEFAULT_LIMIT: u32 = 100;
const MAX_LIMIT: u32 = 1000;

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/alerts", get(list))
        .route("/alerts/{id}/acknowledge", post(acknowledge))
        .route("/alerts/{id}/resolve", post(resolve))
}

/// Query parameters for `GET /alerts`.
#[derive(Debug, Deserialize)]
struct AlertsQuery {
    sensor_id: Option<i64>,
    /// `open` (default) for unresolved alerts, `all` for recent history.
    status: Option<String>,
    limit: Option<u32>,
}

async fn list(State(state): State<AppState>, Query(params): Query<AlertsQuery>) -> Response {
    // ---
    let result = match params.status.as_deref() {
        None | Some("open") => state.store.list_open(params.sensor_id).await,
        Some("all") => {
            let limit = params.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
            state.store.recent_alerts(params.sensor_id, limit).await
        }
        Some(other) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("unknown status filter '{other}', expected 'open' or 'all'"),
                None,
            )
        }
    };

    match result {
        Ok(alerts) => (StatusCode::OK, Json(alerts)).into_response(),
        Err(e) => {
            error!("Failed to list alerts: {}", e);
            error_response(StatusCode::SERVICE_UNAVAILABLE, e, None)
        }
    }
}

async fn acknowledge(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    info!(alert_id = %id, "POST /alerts/{{id}}/acknowledge");
    operator_response(state.engine.acknowledge(id).await)
}

async fn resolve(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    info!(alert_id = %id, "POST /alerts/{{id}}/resolve");
    operator_response(state.engine.resolve(id).await)
}

fn operator_response(result: Result<crate::models::Alert, EngineError>) -> Response {
    // ---
    match result {
        Ok(alert) => (StatusCode::OK, Json(alert)).into_response(),
        Err(e) => {
            let status = match &e {
                EngineError::AlertNotFound(_) => StatusCode::NOT_FOUND,
                EngineError::AlreadyResolved(_) => StatusCode::CONFLICT,
                EngineError::Persistence { .. } => StatusCode::SERVICE_UNAVAILABLE,
                EngineError::Store(inner) if inner.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            if status.is_server_error() {
                error!("Operator action failed: {}", e);
            }
            error_response(status, e, None)
        }
    }
}
