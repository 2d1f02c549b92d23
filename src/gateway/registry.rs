//! Builds and caches one `ExchangeGateway` per exchange identifier.
//! This is the polymorphism seam named in the design notes: callers ask
//! the registry for "binance" or "simulated" and get back a trait
//! object, never a concrete adapter type.

use super::{DryRunGateway, ExchangeGateway, HttpExchangeAdapter, HttpExchangeConfig, SimulatedAdapter};
use crate::config::Config;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Built-in catalog of supported exchanges and their REST base URLs.
/// An exchange outside this list simply has no adapter; the Credential
/// Vault rejects linking it at the API boundary.
fn known_exchanges() -> HashMap<&'static str, &'static str> {
    let mut m = HashMap::new();
    m.insert("binance", "https://api.binance.com/api/v3");
    m.insert("coinbase", "https://api.exchange.coinbase.com");
    m.insert("kraken", "https://api.kraken.com/0");
    m
}

pub struct GatewayRegistry {
    dry_run: bool,
    rate_limit_overrides: HashMap<String, u32>,
    adapters: RwLock<HashMap<String, Arc<dyn ExchangeGateway>>>,
}

impl GatewayRegistry {
    pub fn new(config: &Config) -> Self {
        Self {
            dry_run: config.strategy_dry_run,
            rate_limit_overrides: config.rate_limit_overrides.clone(),
            adapters: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the gateway for `exchange_id`, constructing and caching
    /// it on first use. "simulated" is always available, independent of
    /// the built-in catalog, for tests and for users exploring the
    /// product without a real exchange linked.
    pub fn get(&self, exchange_id: &str) -> Option<Arc<dyn ExchangeGateway>> {
        if let Some(existing) = self.adapters.read().get(exchange_id) {
            return Some(existing.clone());
        }

        let built = self.build(exchange_id)?;
        self.adapters.write().insert(exchange_id.to_string(), built.clone());
        Some(built)
    }

    fn build(&self, exchange_id: &str) -> Option<Arc<dyn ExchangeGateway>> {
        if exchange_id == "simulated" {
            return Some(Arc::new(SimulatedAdapter::new()));
        }

        let base_url = known_exchanges().get(exchange_id)?.to_string();
        let requests_per_sec = self.rate_limit_overrides.get(exchange_id).copied().unwrap_or(10);
        let adapter: Arc<dyn ExchangeGateway> =
            Arc::new(HttpExchangeAdapter::new(HttpExchangeConfig { base_url, requests_per_sec }));

        if self.dry_run {
            Some(Arc::new(DryRunGateway::new(adapter)))
        } else {
            Some(adapter)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dry_run: bool) -> Config {
        Config {
            port: 8080,
            database_uri: ":memory:".to_string(),
            jwt_secret: "t".to_string(),
            credential_encryption_key: "t".to_string(),
            cors_origins: vec!["*".to_string()],
            strategy_check_interval_minutes: 5,
            strategy_dry_run: dry_run,
            snapshot_interval_hours: 4,
            lease_ttl_seconds: 120,
            evaluation_deadline_ms: 10_000,
            rate_limit_overrides: HashMap::new(),
            usd_brl_rate: 5.0,
        }
    }

    #[test]
    fn unknown_exchange_returns_none() {
        let registry = GatewayRegistry::new(&test_config(true));
        assert!(registry.get("not-a-real-exchange").is_none());
    }

    #[test]
    fn simulated_is_always_available() {
        let registry = GatewayRegistry::new(&test_config(true));
        assert!(registry.get("simulated").is_some());
    }

    #[test]
    fn repeated_lookups_return_the_same_cached_instance() {
        let registry = GatewayRegistry::new(&test_config(true));
        let a = registry.get("binance").unwrap();
        let b = registry.get("binance").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
