//! Credential Vault endpoints: linking/unlinking exchange API keys and
//! reading back the catalog of supported exchanges.

use crate::api::response::Envelope;
use crate::auth::middleware::require_owner;
use crate::auth::models::Claims;
use crate::db::exchanges::{ExchangeInfo, LinkedExchange};
use crate::errors::AppError;
use crate::state::AppState;
use axum::extract::{Extension, Query, State};
use axum::Json;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct LinkExchangeRequest {
    pub user_id: String,
    pub exchange_id: String,
    pub label: Option<String>,
    pub api_key: String,
    pub api_secret: String,
}

#[derive(Debug, Deserialize)]
pub struct UnlinkExchangeRequest {
    pub user_id: String,
    pub link_id: String,
}

#[derive(Debug, Deserialize)]
pub struct DisconnectExchangeRequest {
    pub user_id: String,
    pub link_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ListLinkedQuery {
    pub user_id: String,
}

pub async fn catalog(State(state): State<AppState>) -> Result<Json<Envelope<Vec<ExchangeInfo>>>, AppError> {
    Ok(Json(Envelope::ok(state.db.list_exchange_catalog().await?)))
}

pub async fn list_linked(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<ListLinkedQuery>,
) -> Result<Json<Envelope<Vec<LinkedExchange>>>, AppError> {
    require_owner(&claims, &query.user_id).map_err(|_| AppError::Forbidden)?;
    Ok(Json(Envelope::ok(state.db.list_linked_exchanges(&query.user_id).await?)))
}

/// Backs both `/exchanges/link` and `/exchanges/connect`, which are the
/// same operation under two endpoint names.
pub async fn link(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<LinkExchangeRequest>,
) -> Result<Json<Envelope<LinkedExchange>>, AppError> {
    require_owner(&claims, &payload.user_id).map_err(|_| AppError::Forbidden)?;
    let linked = state
        .db
        .link_exchange(&payload.user_id, &payload.exchange_id, payload.label.as_deref(), &payload.api_key, &payload.api_secret, &state.config.credential_encryption_key)
        .await?;
    Ok(Json(Envelope::ok_with_message(linked, "exchange linked")))
}

/// Backs `/exchanges/unlink` and `/exchanges/delete`: a hard delete that
/// removes the credential handle entirely.
pub async fn unlink(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<UnlinkExchangeRequest>,
) -> Result<Json<Envelope<()>>, AppError> {
    require_owner(&claims, &payload.user_id).map_err(|_| AppError::Forbidden)?;
    let removed = state.db.unlink_exchange(&payload.link_id, &payload.user_id).await?;
    if !removed {
        return Err(AppError::NotFound(payload.link_id));
    }
    Ok(Json(Envelope::ok_with_message((), "exchange unlinked")))
}

/// Backs `/exchanges/disconnect`: clears the `is_active` flag but keeps the
/// credential handle, so the Balance Snapshot Pipeline and Strategy Worker
/// skip it without the user having to re-enter API keys to resume later.
pub async fn disconnect(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<DisconnectExchangeRequest>,
) -> Result<Json<Envelope<()>>, AppError> {
    require_owner(&claims, &payload.user_id).map_err(|_| AppError::Forbidden)?;
    let disconnected = state.db.disconnect_exchange(&payload.link_id, &payload.user_id).await?;
    if !disconnected {
        return Err(AppError::NotFound(payload.link_id));
    }
    Ok(Json(Envelope::ok_with_message((), "exchange disconnected")))
}
