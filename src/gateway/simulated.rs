//! A deterministic in-memory adapter. Useful standalone for tests and for
//! exercising the Orchestrator without any network access; distinct from
//! the dry-run decorator, which instead wraps a *real* adapter and
//! synthesizes fills locally at the real ticker price.

use super::{Balance, Credential, ExchangeGateway, GatewayResult, OrderRequest, OrderResult, OrderStatus, Ticker};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

pub struct SimulatedAdapter {
    tickers: Mutex<HashMap<String, Ticker>>,
    balances: Mutex<HashMap<String, Vec<Balance>>>,
}

impl SimulatedAdapter {
    pub fn new() -> Self {
        Self {
            tickers: Mutex::new(HashMap::new()),
            balances: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_ticker(&self, symbol: &str, ticker: Ticker) {
        self.tickers.lock().insert(symbol.to_string(), ticker);
    }

    pub fn set_balances(&self, user_id: &str, balances: Vec<Balance>) {
        self.balances.lock().insert(user_id.to_string(), balances);
    }
}

impl Default for SimulatedAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExchangeGateway for SimulatedAdapter {
    async fn fetch_balances(&self, cred: &Credential) -> GatewayResult<Vec<Balance>> {
        Ok(self.balances.lock().get(&cred.user_id).cloned().unwrap_or_default())
    }

    async fn fetch_ticker(&self, _cred: &Credential, symbol: &str) -> GatewayResult<Ticker> {
        self.tickers
            .lock()
            .get(symbol)
            .cloned()
            .ok_or_else(|| crate::errors::GatewayError::UnknownSymbol(symbol.to_string()))
    }

    async fn create_order(&self, cred: &Credential, req: OrderRequest) -> GatewayResult<OrderResult> {
        let ticker = self.fetch_ticker(cred, &req.symbol).await?;
        let fill_price = req.price.unwrap_or(ticker.last);
        Ok(OrderResult {
            exchange_order_id: format!("sim-{}", req.client_order_id),
            status: OrderStatus::Filled,
            filled: req.amount,
            remaining: 0.0,
            average_fill_price: fill_price,
            fee: 0.0,
        })
    }

    async fn cancel_order(&self, _cred: &Credential, _exchange_order_id: &str) -> GatewayResult<()> {
        Ok(())
    }

    async fn fetch_order(&self, _cred: &Credential, exchange_order_id: &str) -> GatewayResult<OrderResult> {
        Ok(OrderResult {
            exchange_order_id: exchange_order_id.to_string(),
            status: OrderStatus::Filled,
            filled: 0.0,
            remaining: 0.0,
            average_fill_price: 0.0,
            fee: 0.0,
        })
    }
}
