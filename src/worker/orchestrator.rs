//! Order Orchestrator: turns a triggered `Decision` into a submitted
//! order, records the fill on the Position Ledger, and persists it on
//! the Strategy Store idempotently by `(strategy_id, order_ref)`.

use crate::db::strategies::Strategy;
use crate::db::Database;
use crate::domain::decision::{ActionType, Decision};
use crate::errors::GatewayError;
use crate::gateway::{Credential, ExchangeGateway, OrderRequest, OrderSide, OrderType};
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct OrderOrchestrator {
    db: Database,
}

#[derive(Debug)]
pub enum OrchestratorOutcome {
    Filled { order_ref: String, filled_amount: f64, average_price: f64 },
    /// The fill was recorded already by a previous attempt; nothing new
    /// to do. Distinguished from `Filled` so the caller doesn't double-notify.
    AlreadyRecorded,
    /// The gateway reported a disposition that should not be retried
    /// (bad order parameters, unknown symbol, insufficient funds).
    Rejected(String),
}

impl OrderOrchestrator {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Executes one triggered decision end to end. `holding_amount` is the
    /// ledger's current view, used to turn a BUY's quantity_percent into
    /// an actual order size against available USD balance; for SELL the
    /// evaluator already expressed quantity_percent against the position.
    pub async fn execute(
        &self,
        strategy: &Strategy,
        gateway: Arc<dyn ExchangeGateway>,
        credential: &Credential,
        decision: &Decision,
        current_price: f64,
        holding_amount: f64,
        available_balance_usd: f64,
    ) -> Result<OrchestratorOutcome, GatewayError> {
        let action = decision.action.expect("execute is only called on a triggered decision");
        let quantity_percent = decision.quantity_percent.unwrap_or(0.0);
        let reason = decision.reason.clone().unwrap_or_default();

        let amount = match action {
            ActionType::Sell => holding_amount * quantity_percent / 100.0,
            ActionType::Buy => {
                let budget_usd = available_balance_usd * quantity_percent / 100.0;
                if budget_usd < strategy.rules.execution.min_order_size_usd {
                    warn!(strategy_id = %strategy.id, budget_usd, "buy order below min_order_size_usd after budget sizing, skipping");
                    return Ok(OrchestratorOutcome::Rejected("below min_order_size_usd".to_string()));
                }
                budget_usd / current_price
            }
        };

        if amount <= 0.0 {
            return Ok(OrchestratorOutcome::Rejected("resolved order amount is zero".to_string()));
        }

        // Deterministic idempotency key: retried ticks that land on the
        // exact same decision produce the same order_ref, so a crash
        // between submit and persist can't double-execute on replay.
        let order_ref = decision_hash(&strategy.id, &reason, current_price, amount);

        let side = match action {
            ActionType::Buy => OrderSide::Buy,
            ActionType::Sell => OrderSide::Sell,
        };

        let request = OrderRequest {
            symbol: strategy.token.clone(),
            side,
            order_type: OrderType::Market,
            amount,
            price: None,
            client_order_id: order_ref.clone(),
        };

        let result = match gateway.create_order(credential, request).await {
            Ok(result) => result,
            Err(err @ (GatewayError::InsufficientFunds | GatewayError::InvalidOrder(_) | GatewayError::UnknownSymbol(_))) => {
                error!(strategy_id = %strategy.id, %err, "order rejected by gateway, not retryable");
                return Ok(OrchestratorOutcome::Rejected(err.to_string()));
            }
            Err(err) => return Err(err),
        };

        let pnl = match action {
            ActionType::Buy => {
                self.db
                    .record_buy(&strategy.user_id, &strategy.exchange_id, &strategy.token, result.filled, result.average_fill_price, &order_ref, Utc::now())
                    .await
                    .map_err(|e| GatewayError::Transient(e.to_string()))?;
                None
            }
            ActionType::Sell => {
                let position = self
                    .db
                    .record_sell(&strategy.user_id, &strategy.exchange_id, &strategy.token, result.filled, result.average_fill_price, &order_ref, Utc::now())
                    .await
                    .map_err(|e| GatewayError::Transient(e.to_string()))?;
                position.sales.last().map(|sale| sale.pnl)
            }
        };

        let inserted = self
            .db
            .persist_execution(&strategy.id, &order_ref, action, &reason, result.average_fill_price, result.filled, pnl)
            .await
            .map_err(|e| GatewayError::Transient(e.to_string()))?;

        if !inserted {
            return Ok(OrchestratorOutcome::AlreadyRecorded);
        }

        info!(
            strategy_id = %strategy.id,
            action = action.as_str(),
            reason = %reason,
            amount = result.filled,
            price = result.average_fill_price,
            "order filled and recorded"
        );

        Ok(OrchestratorOutcome::Filled { order_ref, filled_amount: result.filled, average_price: result.average_fill_price })
    }
}

fn decision_hash(strategy_id: &str, reason: &str, price: f64, amount: f64) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    strategy_id.hash(&mut hasher);
    reason.hash(&mut hasher);
    price.to_bits().hash(&mut hasher);
    amount.to_bits().hash(&mut hasher);
    format!("dec-{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_hash_is_stable_for_identical_inputs() {
        let a = decision_hash("s1", "TAKE_PROFIT_L1", 100.0, 1.5);
        let b = decision_hash("s1", "TAKE_PROFIT_L1", 100.0, 1.5);
        assert_eq!(a, b);
    }

    #[test]
    fn decision_hash_differs_when_price_differs() {
        let a = decision_hash("s1", "TAKE_PROFIT_L1", 100.0, 1.5);
        let b = decision_hash("s1", "TAKE_PROFIT_L1", 101.0, 1.5);
        assert_ne!(a, b);
    }
}
