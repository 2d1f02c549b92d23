//! Exchange Gateway: a polymorphic adapter keyed by exchange identifier.
//! Realized as a trait plus per-exchange implementors registered by name,
//! rather than an inheritance hierarchy (see the polymorphism design note).

mod dryrun;
mod http_adapter;
mod rate_limiter;
mod registry;
mod simulated;
mod types;

pub use dryrun::DryRunGateway;
pub use http_adapter::{HttpExchangeAdapter, HttpExchangeConfig};
pub use rate_limiter::TokenBucket;
pub use registry::GatewayRegistry;
pub use simulated::SimulatedAdapter;
pub use types::{Balance, Credential, OrderRequest, OrderResult, OrderSide, OrderStatus, OrderType, Ticker};

use crate::errors::GatewayError;
use async_trait::async_trait;

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Resolves the opaque `Credential` handle a gateway call needs. The
/// `simulated` exchange takes no credential at all; every other exchange
/// must carry a `link_id` pointing at a live Credential Vault entry.
pub async fn resolve_credential(
    db: &crate::db::Database,
    encryption_key: &str,
    user_id: &str,
    exchange_id: &str,
    link_id: Option<&str>,
) -> anyhow::Result<Credential> {
    if exchange_id == "simulated" {
        return Ok(Credential { user_id: user_id.to_string(), exchange_id: exchange_id.to_string(), api_key: String::new(), api_secret: String::new() });
    }
    let link_id = link_id.ok_or_else(|| anyhow::anyhow!("exchange {exchange_id} requires a linked credential"))?;
    db.resolve_credential(user_id, link_id, encryption_key)
        .await?
        .ok_or_else(|| anyhow::anyhow!("credential link {link_id} not found or disconnected"))
}

/// The uniform capability set every exchange adapter exposes to the rest
/// of the core. Callers never switch on exchange identity.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    async fn fetch_balances(&self, cred: &Credential) -> GatewayResult<Vec<Balance>>;
    async fn fetch_ticker(&self, cred: &Credential, symbol: &str) -> GatewayResult<Ticker>;
    async fn create_order(&self, cred: &Credential, req: OrderRequest) -> GatewayResult<OrderResult>;
    async fn cancel_order(&self, cred: &Credential, exchange_order_id: &str) -> GatewayResult<()>;
    async fn fetch_order(&self, cred: &Credential, exchange_order_id: &str) -> GatewayResult<OrderResult>;
}
