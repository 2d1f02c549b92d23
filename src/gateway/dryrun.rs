//! Decorator that wraps a real `ExchangeGateway` and intercepts
//! order-mutating calls, synthesizing a filled order at the real
//! ticker price instead of submitting it. Read-only calls (balances,
//! tickers, order lookups) pass straight through to the wrapped
//! adapter, so dry-run strategies still evaluate against live data.

use super::{Balance, Credential, ExchangeGateway, GatewayResult, OrderRequest, OrderResult, OrderStatus};
use async_trait::async_trait;
use std::sync::Arc;

pub struct DryRunGateway {
    inner: Arc<dyn ExchangeGateway>,
}

impl DryRunGateway {
    pub fn new(inner: Arc<dyn ExchangeGateway>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl ExchangeGateway for DryRunGateway {
    async fn fetch_balances(&self, cred: &Credential) -> GatewayResult<Vec<Balance>> {
        self.inner.fetch_balances(cred).await
    }

    async fn fetch_ticker(&self, cred: &Credential, symbol: &str) -> GatewayResult<super::Ticker> {
        self.inner.fetch_ticker(cred, symbol).await
    }

    async fn create_order(&self, cred: &Credential, req: OrderRequest) -> GatewayResult<OrderResult> {
        let ticker = self.inner.fetch_ticker(cred, &req.symbol).await?;
        let fill_price = req.price.unwrap_or(ticker.last);
        Ok(OrderResult {
            exchange_order_id: format!("dryrun-{}", req.client_order_id),
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

    async fn fetch_order(&self, cred: &Credential, exchange_order_id: &str) -> GatewayResult<OrderResult> {
        if let Some(id) = exchange_order_id.strip_prefix("dryrun-") {
            return Ok(OrderResult {
                exchange_order_id: format!("dryrun-{id}"),
                status: OrderStatus::Filled,
                filled: 0.0,
                remaining: 0.0,
                average_fill_price: 0.0,
                fee: 0.0,
            });
        }
        self.inner.fetch_order(cred, exchange_order_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{OrderSide, OrderType, SimulatedAdapter, Ticker};

    fn cred() -> Credential {
        Credential {
            user_id: "u1".to_string(),
            exchange_id: "sim".to_string(),
            api_key: "k".to_string(),
            api_secret: "s".to_string(),
        }
    }

    #[tokio::test]
    async fn create_order_does_not_touch_inner_and_fills_at_ticker_price() {
        let sim = Arc::new(SimulatedAdapter::new());
        sim.set_ticker(
            "BTCUSDT",
            Ticker { bid: 100.0, ask: 101.0, last: 100.5, volume_24h: None, change_24h: None },
        );
        let dryrun = DryRunGateway::new(sim.clone());

        let result = dryrun
            .create_order(
                &cred(),
                OrderRequest {
                    symbol: "BTCUSDT".to_string(),
                    side: OrderSide::Buy,
                    order_type: OrderType::Market,
                    amount: 1.0,
                    price: None,
                    client_order_id: "abc".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(result.status, OrderStatus::Filled);
        assert_eq!(result.average_fill_price, 100.5);
        assert!(result.exchange_order_id.starts_with("dryrun-"));
    }
}
