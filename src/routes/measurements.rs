use axum::{
    extract::State, http::StatusCode, response::IntoResponse, response::Response, routing::post,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use super::{error_response, AppState};
use crate::error::ValidationError;
use crate::models::Measurement;

// ---

pub fn router() -> Router<AppState> {
    Router::new().route("/measurements", post(handler))
}

/// Request body for `POST /measurements`. A missing timestamp means now.
#[derive(Debug, Deserialize)]
struct MeasurementRequest {
    sensor_id: i64,
    value: f64,
    unit: String,
    quality_score: f64,
    timestamp: Option<DateTime<Utc>>,
}

impl From<MeasurementRequest> for Measurement {
    fn from(req: MeasurementRequest) -> Self {
        Measurement {
            sensor_id: req.sensor_id,
            value: req.value,
            unit: req.unit,
            quality_score: req.quality_score,
            timestamp: req.timestamp.unwrap_or_else(Utc::now),
        }
    }
}

/// Handle `POST /measurements`.
///
/// Returns `202 Accepted` once the reading is queued; evaluation happens
/// asynchronously on the sensor's worker.
async fn handler(State(state): State<AppState>, Json(req): Json<MeasurementRequest>) -> Response {
    // ---
    let sensor_id = req.sensor_id;
    debug!(sensor_id, "POST /measurements");

    match state.ingress.submit(req.into()).await {
        Ok(accepted) => (StatusCode::ACCEPTED, Json(accepted)).into_response(),
        Err(e) => {
            let status = match &e {
                ValidationError::UnknownSensor(_) => StatusCode::NOT_FOUND,
                ValidationError::OutOfOrder { .. } => StatusCode::CONFLICT,
                ValidationError::RegistryUnavailable(_) | ValidationError::ShuttingDown => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                _ => StatusCode::UNPROCESSABLE_ENTITY,
            };
            error_response(status, &e, Some(e.reason()))
        }
    }
}
