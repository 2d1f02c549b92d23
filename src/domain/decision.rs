//! The Trigger Evaluator's output types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionType {
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "SELL")]
    Sell,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Buy => "BUY",
            ActionType::Sell => "SELL",
        }
    }
}

/// Why a decision fired, carrying the 1-based level index for leveled rules.
#[derive(Debug, Clone, PartialEq)]
pub enum DecisionReason {
    TakeProfit(usize),
    StopLoss,
    TrailingStop,
    BuyDip,
    Dca(usize),
    /// A user-initiated order placed through the manual order endpoints,
    /// bypassing the evaluator entirely.
    Manual,
}

impl DecisionReason {
    pub fn as_string(&self) -> String {
        match self {
            DecisionReason::TakeProfit(i) => format!("TAKE_PROFIT_L{i}"),
            DecisionReason::StopLoss => "STOP_LOSS".to_string(),
            DecisionReason::TrailingStop => "TRAILING_STOP".to_string(),
            DecisionReason::BuyDip => "BUY_DIP".to_string(),
            DecisionReason::Dca(i) => format!("DCA_L{i}"),
            DecisionReason::Manual => "MANUAL".to_string(),
        }
    }
}

/// The blocking reason recorded in `metadata` when `should_trigger=false`.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockReason {
    Cooldown,
    CircuitBreaker(&'static str),
    TradingHours,
    Blackout,
    Volume,
    BelowMinSize,
    NeedsRepair,
    None,
}

impl BlockReason {
    fn write_metadata(&self, map: &mut Map<String, Value>) {
        match self {
            BlockReason::Cooldown => {
                map.insert("cooldown".to_string(), Value::String("blocked".to_string()));
            }
            BlockReason::CircuitBreaker(window) => {
                map.insert(
                    "circuit_breaker".to_string(),
                    Value::String(window.to_string()),
                );
            }
            BlockReason::TradingHours => {
                map.insert(
                    "trading_hours".to_string(),
                    Value::String("blocked".to_string()),
                );
            }
            BlockReason::Blackout => {
                map.insert("blackout".to_string(), Value::String("blocked".to_string()));
            }
            BlockReason::Volume => {
                map.insert(
                    "volume_check".to_string(),
                    Value::String("blocked".to_string()),
                );
            }
            BlockReason::BelowMinSize => {
                map.insert(
                    "reason".to_string(),
                    Value::String("below_min_size".to_string()),
                );
            }
            BlockReason::NeedsRepair => {
                map.insert(
                    "reason".to_string(),
                    Value::String("needs_repair".to_string()),
                );
            }
            BlockReason::None => {}
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub should_trigger: bool,
    pub action: Option<ActionType>,
    pub reason: Option<String>,
    pub quantity_percent: Option<f64>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Decision {
    pub fn blocked(reason: BlockReason) -> Self {
        let mut metadata = Map::new();
        reason.write_metadata(&mut metadata);
        Self {
            should_trigger: false,
            action: None,
            reason: None,
            quantity_percent: None,
            metadata,
        }
    }

    pub fn triggered(action: ActionType, reason: DecisionReason, quantity_percent: f64) -> Self {
        Self {
            should_trigger: true,
            action: Some(action),
            reason: Some(reason.as_string()),
            quantity_percent: Some(quantity_percent),
            metadata: Map::new(),
        }
    }

    pub fn not_triggered() -> Self {
        Self {
            should_trigger: false,
            action: None,
            reason: None,
            quantity_percent: None,
            metadata: Map::new(),
        }
    }
}

/// A request to persist an updated trailing-stop state, emitted as a
/// side effect of evaluation. The worker is responsible for applying it
/// via `Strategy Store::update_trailing`.
#[derive(Debug, Clone, PartialEq)]
pub struct TrailingUpdateRequest {
    pub highest_price_seen: f64,
    pub current_stop_price: f64,
    pub is_active: bool,
    pub activated_at: Option<DateTime<Utc>>,
}

/// Full output of one evaluation: the decision plus any side-effect
/// requests the evaluator produced along the way.
#[derive(Debug, Clone)]
pub struct EvaluationOutcome {
    pub decision: Decision,
    pub trailing_update: Option<TrailingUpdateRequest>,
    /// Set when the circuit breaker tripped with `pause_on_limit=true`.
    pub pause_requested: bool,
}

impl EvaluationOutcome {
    pub fn simple(decision: Decision) -> Self {
        Self {
            decision,
            trailing_update: None,
            pause_requested: false,
        }
    }
}
