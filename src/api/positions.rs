//! Position endpoints: read-only views over the Position Ledger plus a
//! manual sync against the exchange's reported balance.

use crate::api::response::Envelope;
use crate::auth::middleware::require_owner;
use crate::auth::models::Claims;
use crate::domain::position::Position;
use crate::errors::AppError;
use crate::state::AppState;
use axum::extract::{Extension, Query, State};
use axum::Json;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ListPositionsQuery {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct GetPositionQuery {
    pub user_id: String,
    pub exchange_id: String,
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct SyncPositionRequest {
    pub user_id: String,
    pub exchange_id: String,
    pub token: String,
    /// The `user_exchanges` row to trade through. Required for every
    /// exchange except `simulated`.
    #[serde(default)]
    pub link_id: Option<String>,
}

pub async fn list_positions(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<ListPositionsQuery>,
) -> Result<Json<Envelope<Vec<Position>>>, AppError> {
    require_owner(&claims, &query.user_id).map_err(|_| AppError::Forbidden)?;
    let positions = state.db.list_positions_for_user(&query.user_id).await?;
    Ok(Json(Envelope::ok(positions)))
}

pub async fn get_position(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<GetPositionQuery>,
) -> Result<Json<Envelope<Position>>, AppError> {
    require_owner(&claims, &query.user_id).map_err(|_| AppError::Forbidden)?;
    let position = state.db.get_position(&query.user_id, &query.exchange_id, &query.token).await?;
    Ok(Json(Envelope::ok(position)))
}

pub async fn sync_position(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<SyncPositionRequest>,
) -> Result<Json<Envelope<Position>>, AppError> {
    require_owner(&claims, &payload.user_id).map_err(|_| AppError::Forbidden)?;

    let gateway = state.gateways.get(&payload.exchange_id).ok_or_else(|| AppError::NotFound(format!("exchange {}", payload.exchange_id)))?;
    let credential = crate::gateway::resolve_credential(
        &state.db,
        &state.config.credential_encryption_key,
        &payload.user_id,
        &payload.exchange_id,
        payload.link_id.as_deref(),
    )
    .await?;
    let balances = gateway.fetch_balances(&credential).await?;
    let reported = balances.iter().find(|b| b.asset == payload.token).map(|b| b.free).unwrap_or(0.0);
    let price = gateway.fetch_ticker(&credential, &payload.token).await.map(|t| t.last).unwrap_or(0.0);

    let position = state.db.sync_from_exchange(&payload.user_id, &payload.exchange_id, &payload.token, reported, price).await?;
    Ok(Json(Envelope::ok(position)))
}
