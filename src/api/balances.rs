//! Read endpoints over the Balance Snapshot Pipeline's output.

use crate::api::response::Envelope;
use crate::auth::middleware::require_owner;
use crate::auth::models::Claims;
use crate::db::balances::{BalanceSnapshot, UserBalanceSnapshot};
use crate::errors::AppError;
use crate::state::AppState;
use axum::extract::{Extension, Query, State};
use axum::Json;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct LatestQuery {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub user_id: String,
    pub exchange_id: String,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

/// `total_usd`/`total_brl` plus a `{exchange_id, exchange_name, total_usd,
/// total_brl, success}` row per linked exchange, from the most recent
/// Balance Snapshot Pipeline run. `None` (an empty default) before the
/// pipeline has run for this user at all.
pub async fn latest(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<LatestQuery>,
) -> Result<Json<Envelope<UserBalanceSnapshot>>, AppError> {
    require_owner(&claims, &query.user_id).map_err(|_| AppError::Forbidden)?;
    let snapshot = state.db.latest_user_snapshot(&query.user_id).await?.unwrap_or_else(|| UserBalanceSnapshot {
        total_usd: 0.0,
        total_brl: 0.0,
        exchanges: Vec::new(),
        snapshot_at: chrono::Utc::now(),
    });
    Ok(Json(Envelope::ok(snapshot)))
}

pub async fn history(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Envelope<Vec<BalanceSnapshot>>>, AppError> {
    require_owner(&claims, &query.user_id).map_err(|_| AppError::Forbidden)?;
    Ok(Json(Envelope::ok(state.db.balance_history(&query.user_id, &query.exchange_id, query.limit.clamp(1, 1000)).await?)))
}
