//! Strategy endpoints: CRUD over the Strategy Store plus a dry-run
//! `/check` that runs the Trigger Evaluator without executing anything.

use crate::api::response::Envelope;
use crate::auth::middleware::require_owner;
use crate::auth::models::Claims;
use crate::domain::evaluator::{evaluate, MarketData};
use crate::domain::rules::{LegacyRules, Rules};
use crate::errors::AppError;
use crate::state::AppState;
use axum::extract::{Extension, Path, Query, State};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct CreateStrategyRequest {
    pub user_id: String,
    pub exchange_id: String,
    /// The `user_exchanges` row to trade through. Required for every
    /// exchange except `simulated`, which needs no credential.
    #[serde(default)]
    pub link_id: Option<String>,
    pub token: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub rules: Option<Rules>,
    #[serde(default)]
    pub take_profit_percent: Option<f64>,
    #[serde(default)]
    pub stop_loss_percent: Option<f64>,
    #[serde(default)]
    pub buy_dip_percent: Option<f64>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStrategyRequest {
    pub rules: Option<Rules>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ListStrategiesQuery {
    pub user_id: String,
    pub exchange_id: Option<String>,
    pub token: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub current_price: f64,
    pub entry_price: f64,
}

fn resolve_rules(req: &CreateStrategyRequest) -> Result<Rules, AppError> {
    let rules = match &req.rules {
        Some(rules) => rules.clone(),
        None => LegacyRules {
            take_profit_percent: req.take_profit_percent,
            stop_loss_percent: req.stop_loss_percent,
            buy_dip_percent: req.buy_dip_percent,
        }
        .into(),
    };

    if !rules.is_valid() {
        return Err(AppError::Validation { fields: rules.validation_errors(), message: "strategy rules failed validation".into() });
    }
    Ok(rules)
}

pub async fn create_strategy(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateStrategyRequest>,
) -> Result<Json<Envelope<crate::db::strategies::Strategy>>, AppError> {
    require_owner(&claims, &payload.user_id).map_err(|_| AppError::Forbidden)?;
    let rules = resolve_rules(&payload)?;
    let name = payload.name.clone().unwrap_or_else(|| format!("{} {}", payload.exchange_id, payload.token));

    if payload.exchange_id != "simulated" && payload.link_id.is_none() {
        return Err(AppError::Validation { fields: vec!["link_id".into()], message: "link_id is required for any exchange other than simulated".into() });
    }

    let strategy = state.db.create_strategy(&payload.user_id, &payload.exchange_id, payload.link_id.as_deref(), &payload.token, &name, rules).await?;
    if payload.is_active == Some(false) {
        state.db.set_enabled(&strategy.id, false).await?;
        return Ok(Json(Envelope::ok(state.db.get_strategy(&strategy.id).await?)));
    }
    Ok(Json(Envelope::ok(strategy)))
}

pub async fn list_strategies(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<ListStrategiesQuery>,
) -> Result<Json<Envelope<Vec<crate::db::strategies::Strategy>>>, AppError> {
    require_owner(&claims, &query.user_id).map_err(|_| AppError::Forbidden)?;

    let strategies = state
        .db
        .list_strategies_for_user(&query.user_id)
        .await?
        .into_iter()
        .filter(|s| query.exchange_id.as_deref().map_or(true, |e| e == s.exchange_id))
        .filter(|s| query.token.as_deref().map_or(true, |t| t == s.token))
        .filter(|s| query.is_active.map_or(true, |active| active == s.enabled))
        .collect();

    Ok(Json(Envelope::ok(strategies)))
}

pub async fn get_strategy(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<Json<Envelope<crate::db::strategies::Strategy>>, AppError> {
    let strategy = state.db.get_strategy(&id).await?;
    require_owner(&claims, &strategy.user_id).map_err(|_| AppError::Forbidden)?;
    Ok(Json(Envelope::ok(strategy)))
}

pub async fn update_strategy(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateStrategyRequest>,
) -> Result<Json<Envelope<crate::db::strategies::Strategy>>, AppError> {
    let strategy = state.db.get_strategy(&id).await?;
    require_owner(&claims, &strategy.user_id).map_err(|_| AppError::Forbidden)?;

    if let Some(rules) = payload.rules {
        if !rules.is_valid() {
            return Err(AppError::Validation { fields: rules.validation_errors(), message: "strategy rules failed validation".into() });
        }
        state.db.update_rules(&id, rules).await?;
    }
    if let Some(is_active) = payload.is_active {
        state.db.set_enabled(&id, is_active).await?;
    }

    Ok(Json(Envelope::ok(state.db.get_strategy(&id).await?)))
}

pub async fn delete_strategy(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<Json<Envelope<()>>, AppError> {
    let strategy = state.db.get_strategy(&id).await?;
    require_owner(&claims, &strategy.user_id).map_err(|_| AppError::Forbidden)?;
    state.db.delete_strategy(&id).await?;
    Ok(Json(Envelope::ok_with_message((), "strategy deleted")))
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub decision: crate::domain::decision::Decision,
}

pub async fn check_strategy(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    Json(payload): Json<CheckRequest>,
) -> Result<Json<Envelope<CheckResponse>>, AppError> {
    let strategy = state.db.get_strategy(&id).await?;
    require_owner(&claims, &strategy.user_id).map_err(|_| AppError::Forbidden)?;

    let position = state.db.get_position(&strategy.user_id, &strategy.exchange_id, &strategy.token).await?;
    let outcome = evaluate(&strategy.rules, &strategy.tracking, payload.entry_price, payload.current_price, position.amount, &MarketData::default(), Utc::now());

    Ok(Json(Envelope::ok(CheckResponse { decision: outcome.decision })))
}
