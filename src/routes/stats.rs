use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use super::AppState;
use crate::engine::EngineStats;
use crate::ingress::IngressStats;
use crate::pipeline::PipelineStats;

// ---

#[derive(Serialize)]
struct StatsResponse {
    ingress: IngressStats,
    pipeline: PipelineStats,
    engine: EngineStats,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/stats", get(handler))
}

/// Handle `GET /stats`: counter snapshots from every stage.
async fn handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        ingress: state.ingress.stats(),
        pipeline: state.pipeline.stats(),
        engine: state.engine.stats(),
    })
}
