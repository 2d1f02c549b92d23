//! Per-strategy tracking state: execution stats, trailing-stop state,
//! cooldown state. This is the mutable half of a strategy document; `Rules`
//! is the configuration half.

use super::decision::ActionType;
use super::rules::level_key;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExecutionStats {
    pub total_executions: u32,
    pub total_sells: u32,
    pub total_buys: u32,
    pub total_pnl_usd: f64,
    pub daily_pnl_usd: f64,
    pub weekly_pnl_usd: f64,
    pub monthly_pnl_usd: f64,
    #[serde(default)]
    pub executed_tp_levels: BTreeSet<i64>,
    #[serde(default)]
    pub executed_dca_levels: BTreeSet<i64>,
    pub last_at: Option<DateTime<Utc>>,
    pub last_type: Option<ActionType>,
    pub last_reason: Option<String>,
    pub last_price: Option<f64>,
    pub last_amount: Option<f64>,
}

impl ExecutionStats {
    pub fn has_executed_tp(&self, percent: f64) -> bool {
        self.executed_tp_levels.contains(&level_key(percent))
    }

    pub fn has_executed_dca(&self, percent: f64) -> bool {
        self.executed_dca_levels.contains(&level_key(percent))
    }

    pub fn mark_tp_executed(&mut self, percent: f64) {
        self.executed_tp_levels.insert(level_key(percent));
    }

    pub fn mark_dca_executed(&mut self, percent: f64) {
        self.executed_dca_levels.insert(level_key(percent));
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TrailingStopState {
    pub is_active: bool,
    pub highest_price_seen: f64,
    pub current_stop_price: f64,
    pub activated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CooldownState {
    pub cooldown_until: Option<DateTime<Utc>>,
    pub last_action: Option<ActionType>,
    pub last_action_at: Option<DateTime<Utc>>,
}

impl CooldownState {
    pub fn is_blocking(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.map(|until| now < until).unwrap_or(false)
    }
}

/// Not user-visible: the Strategy Worker's claim on this strategy document,
/// serializing overlapping ticks (see the lease/locking design).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Lease {
    pub lease_until: Option<DateTime<Utc>>,
    pub lease_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Tracking {
    pub execution_stats: ExecutionStats,
    pub trailing_stop_state: TrailingStopState,
    pub cooldown_state: CooldownState,
    #[serde(default)]
    pub needs_repair: bool,
    #[serde(default)]
    pub lease: Lease,
}
