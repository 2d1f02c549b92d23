//! Public health check, the one endpoint exempt from auth.

use crate::api::response::Envelope;
use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthBody {
    pub status: &'static str,
    pub strategy_worker_running: bool,
    pub snapshot_pipeline_running: bool,
}

pub async fn health(State(state): State<AppState>) -> Json<Envelope<HealthBody>> {
    Json(Envelope::ok(HealthBody {
        status: "ok",
        strategy_worker_running: state.strategy_worker.status().running,
        snapshot_pipeline_running: state.snapshot_pipeline.status().running,
    }))
}
