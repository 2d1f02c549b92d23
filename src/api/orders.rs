//! Manual order endpoints. These enter the Order Orchestrator at the
//! same sizing/submit/record step as evaluator-triggered orders, but
//! `quantity_percent` comes straight from the request body instead of
//! a `Decision`.

use crate::api::response::Envelope;
use crate::auth::middleware::require_owner;
use crate::auth::models::Claims;
use crate::domain::decision::{ActionType, Decision, DecisionReason};
use crate::errors::AppError;
use crate::state::AppState;
use axum::extract::{Extension, State};
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct ManualOrderRequest {
    pub user_id: String,
    pub exchange_id: String,
    pub token: String,
    pub strategy_id: String,
    /// Percentage of the position (for sells) or available balance (for
    /// buys) to act on, mirroring the evaluator's `Decision.quantity_percent`.
    pub quantity_percent: f64,
}

#[derive(Debug, Serialize)]
pub struct ManualOrderResponse {
    pub order_ref: String,
    pub filled_amount: f64,
    pub average_price: f64,
}

async fn place_manual_order(state: &AppState, claims: &Claims, payload: ManualOrderRequest, action: ActionType) -> Result<Json<Envelope<ManualOrderResponse>>, AppError> {
    require_owner(claims, &payload.user_id).map_err(|_| AppError::Forbidden)?;

    let strategy = state.db.get_strategy(&payload.strategy_id).await?;
    if strategy.user_id != payload.user_id || strategy.exchange_id != payload.exchange_id || strategy.token != payload.token {
        return Err(AppError::Validation { fields: vec!["strategy_id".into()], message: "strategy does not match the requested user/exchange/token".into() });
    }

    let gateway = state.gateways.get(&payload.exchange_id).ok_or_else(|| AppError::NotFound(format!("exchange {}", payload.exchange_id)))?;
    let credential = crate::gateway::resolve_credential(
        &state.db,
        &state.config.credential_encryption_key,
        &payload.user_id,
        &payload.exchange_id,
        strategy.link_id.as_deref(),
    )
    .await?;

    let position = state.db.get_position(&payload.user_id, &payload.exchange_id, &payload.token).await?;
    let ticker = gateway.fetch_ticker(&credential, &payload.token).await?;

    let available_usd = if action == ActionType::Buy {
        gateway.fetch_balances(&credential).await?.iter().find(|b| b.asset == "USDT" || b.asset == "USD").map(|b| b.free).unwrap_or(0.0)
    } else {
        0.0
    };

    let decision = Decision::triggered(action, DecisionReason::Manual, payload.quantity_percent);

    let orchestrator = crate::worker::OrderOrchestrator::new(state.db.clone());
    let outcome = orchestrator.execute(&strategy, gateway, &credential, &decision, ticker.last, position.amount, available_usd).await?;

    match outcome {
        crate::worker::OrchestratorOutcome::Filled { order_ref, filled_amount, average_price } => Ok(Json(Envelope::ok(ManualOrderResponse { order_ref, filled_amount, average_price }))),
        crate::worker::OrchestratorOutcome::AlreadyRecorded => Err(AppError::Conflict("an identical order was already recorded".into())),
        crate::worker::OrchestratorOutcome::Rejected(reason) => Err(AppError::Upstream(reason)),
    }
}

pub async fn buy(State(state): State<AppState>, Extension(claims): Extension<Claims>, Json(payload): Json<ManualOrderRequest>) -> Result<Json<Envelope<ManualOrderResponse>>, AppError> {
    place_manual_order(&state, &claims, payload, ActionType::Buy).await
}

pub async fn sell(State(state): State<AppState>, Extension(claims): Extension<Claims>, Json(payload): Json<ManualOrderRequest>) -> Result<Json<Envelope<ManualOrderResponse>>, AppError> {
    place_manual_order(&state, &claims, payload, ActionType::Sell).await
}
