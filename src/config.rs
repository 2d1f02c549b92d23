//! Application configuration
//!
//! Environment-variable driven, following the recognized options documented
//! for the service. Every option has a conservative default so the process
//! boots without a `.env` file in a fresh checkout.

use std::collections::HashMap;
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_uri: String,
    pub jwt_secret: String,
    pub credential_encryption_key: String,
    pub cors_origins: Vec<String>,

    pub strategy_check_interval_minutes: u32,
    pub strategy_dry_run: bool,
    pub snapshot_interval_hours: u32,

    pub lease_ttl_seconds: i64,
    pub evaluation_deadline_ms: u64,

    /// Per-exchange rate limit overrides (requests/sec), keyed by exchange id.
    pub rate_limit_overrides: HashMap<String, u32>,

    /// Static USD->BRL conversion rate used to report balance snapshots in
    /// both currencies. No exchange-rate feed is wired up; operators
    /// override this as the real rate moves.
    pub usd_brl_rate: f64,
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"),
        Err(_) => default,
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let port = env_parsed("PORT", 8080u16);
        let database_uri =
            env::var("DATABASE_URI").unwrap_or_else(|_| "./strategy_engine.db".to_string());
        let jwt_secret =
            env::var("JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".to_string());
        let credential_encryption_key = env::var("CREDENTIAL_ENCRYPTION_KEY")
            .unwrap_or_else(|_| "dev-credential-key-change-me-0000".to_string());
        let cors_origins = env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let strategy_check_interval_minutes =
            env_parsed("STRATEGY_CHECK_INTERVAL_MINUTES", 5u32).clamp(1, 60);
        let strategy_dry_run = env_bool("STRATEGY_DRY_RUN", true);
        let snapshot_interval_hours = env_parsed("SNAPSHOT_INTERVAL_HOURS", 4u32).clamp(1, 24);

        let lease_ttl_seconds = env_parsed("LEASE_TTL_SECONDS", 120i64);
        let evaluation_deadline_ms = env_parsed("EVALUATION_DEADLINE_MS", 10_000u64);
        let usd_brl_rate = env_parsed("USD_BRL_RATE", 5.0f64);

        let mut rate_limit_overrides = HashMap::new();
        for (key, value) in env::vars() {
            if let Some(exchange) = key
                .strip_prefix("RATE_LIMIT_")
                .and_then(|rest| rest.strip_suffix("_PER_SEC"))
            {
                if let Ok(limit) = value.parse::<u32>() {
                    rate_limit_overrides.insert(exchange.to_lowercase(), limit);
                }
            }
        }

        Ok(Self {
            port,
            database_uri,
            jwt_secret,
            credential_encryption_key,
            cors_origins,
            strategy_check_interval_minutes,
            strategy_dry_run,
            snapshot_interval_hours,
            lease_ttl_seconds,
            evaluation_deadline_ms,
            rate_limit_overrides,
            usd_brl_rate,
        })
    }
}
