//! Shared wire-level types for the Exchange Gateway contract.

use serde::{Deserialize, Serialize};

/// Opaque credential handle the Credential Vault hands to a Gateway
/// adapter constructor. The vault is the only thing that knows how to
/// turn a `(user_id, exchange_id)` pair into one of these.
#[derive(Debug, Clone)]
pub struct Credential {
    pub user_id: String,
    pub exchange_id: String,
    pub api_key: String,
    pub api_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub free: f64,
    pub locked: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub bid: f64,
    pub ask: f64,
    pub last: f64,
    pub volume_24h: Option<f64>,
    pub change_24h: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Open,
    Filled,
    PartiallyFilled,
    Canceled,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub amount: f64,
    pub price: Option<f64>,
    /// Client-supplied idempotency key; adapters that support it pass it
    /// through as the exchange's client-order-id.
    pub client_order_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    pub exchange_order_id: String,
    pub status: OrderStatus,
    pub filled: f64,
    pub remaining: f64,
    pub average_fill_price: f64,
    pub fee: f64,
}
