//! Job-control endpoints for the two background jobs: the Strategy
//! Worker and the Balance Snapshot Pipeline.

use crate::api::response::Envelope;
use crate::errors::AppError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct JobsStatusResponse {
    pub strategy_worker: crate::worker::strategy_worker::JobStatus,
    pub balance_snapshot: crate::worker::snapshot_pipeline::JobStatus,
}

pub async fn status(State(state): State<AppState>) -> Json<Envelope<JobsStatusResponse>> {
    Json(Envelope::ok(JobsStatusResponse {
        strategy_worker: state.strategy_worker.status(),
        balance_snapshot: state.snapshot_pipeline.status(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ControlRequest {
    pub job: String,
    pub action: String,
}

pub async fn control(State(state): State<AppState>, Json(payload): Json<ControlRequest>) -> Result<Json<Envelope<()>>, AppError> {
    match (payload.job.as_str(), payload.action.as_str()) {
        ("strategy_worker", "stop") => state.strategy_worker.stop(),
        ("strategy_worker", "start") | ("strategy_worker", "restart") => {
            if state.strategy_worker.status().running {
                state.strategy_worker.stop();
            }
            tokio::spawn({
                let worker = state.strategy_worker.clone();
                async move { worker.run().await }
            });
        }
        ("balance_snapshot", "stop") => state.snapshot_pipeline.stop(),
        ("balance_snapshot", "start") | ("balance_snapshot", "restart") => {
            if state.snapshot_pipeline.status().running {
                state.snapshot_pipeline.stop();
            }
            tokio::spawn({
                let pipeline = state.snapshot_pipeline.clone();
                async move { pipeline.run().await }
            });
        }
        (job, action) => {
            return Err(AppError::Validation {
                fields: vec!["job".into(), "action".into()],
                message: format!("unknown job '{job}' or action '{action}'"),
            });
        }
    }

    Ok(Json(Envelope::ok_with_message((), format!("{} {}", payload.job, payload.action))))
}

pub async fn trigger(State(state): State<AppState>, Path(job): Path<String>) -> Result<Json<Envelope<()>>, AppError> {
    match job.as_str() {
        "strategy_worker" => state.strategy_worker.trigger_now(),
        "balance_snapshot" => state.snapshot_pipeline.trigger_now(),
        other => return Err(AppError::Validation { fields: vec!["job".into()], message: format!("unknown job '{other}'") }),
    }
    Ok(Json(Envelope::ok_with_message((), format!("triggered {job}"))))
}
