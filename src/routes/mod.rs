//! HTTP gateway: merges the endpoint sub-routers and owns the shared state.

use std::sync::Arc;

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json, Router};
use serde::Serialize;

use crate::engine::AlertEngine;
use crate::ingress::MeasurementIngress;
use crate::pipeline::EvaluationPipeline;
use crate::store::AlertStore;

mod alerts;
mod health;
mod measurements;
mod stats;

// ---

/// Handles shared by every route.
#[derive(Clone)]
pub struct AppState {
    pub ingress: Arc<MeasurementIngress>,
    pub engine: Arc<AlertEngine>,
    pub pipeline: Arc<EvaluationPipeline>,
    pub store: Arc<dyn AlertStore>,
}

pub fn router(state: AppState) -> Router {
    // ---
    Router::new()
        .merge(measurements::router())
        .merge(alerts::router())
        .merge(stats::router())
        .merge(health::router())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
}

fn error_response(status: StatusCode, error: impl ToString, reason: Option<&'static str>) -> Response {
    let body = ErrorBody {
        error: error.to_string(),
        reason,
    };
    (status, Json(body)).into_response()
}
