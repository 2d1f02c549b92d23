//! Strategy rules: the structured rule document plus the legacy flat form
//! and its normalization, per the dynamic/legacy rule shape design note.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TakeProfitLevel {
    pub percent: f64,
    pub quantity_percent: f64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StopLoss {
    pub percent: f64,
    pub enabled: bool,
    #[serde(default)]
    pub trailing_enabled: bool,
    #[serde(default)]
    pub trailing_percent: f64,
    #[serde(default)]
    pub trailing_activation_percent: f64,
}

impl Default for StopLoss {
    fn default() -> Self {
        Self {
            percent: 0.0,
            enabled: false,
            trailing_enabled: false,
            trailing_percent: 0.0,
            trailing_activation_percent: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DcaLevel {
    pub percent: f64,
    pub quantity_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct BuyDip {
    pub percent: f64,
    pub enabled: bool,
    #[serde(default)]
    pub dca_enabled: bool,
    #[serde(default)]
    pub dca_levels: Vec<DcaLevel>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Cooldown {
    pub enabled: bool,
    #[serde(default)]
    pub minutes_after_sell: i64,
    #[serde(default)]
    pub minutes_after_buy: i64,
}

impl Cooldown {
    /// Minutes to hold off re-triggering after `action`, or `None` if
    /// cooldown is disabled or the configured window for that action is zero.
    pub fn minutes_for(&self, action: super::decision::ActionType) -> Option<i64> {
        if !self.enabled {
            return None;
        }
        match action {
            super::decision::ActionType::Buy if self.minutes_after_buy > 0 => Some(self.minutes_after_buy),
            super::decision::ActionType::Sell if self.minutes_after_sell > 0 => Some(self.minutes_after_sell),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RiskManagement {
    pub enabled: bool,
    pub max_daily_loss_usd: Option<f64>,
    pub max_weekly_loss_usd: Option<f64>,
    pub max_monthly_loss_usd: Option<f64>,
    #[serde(default)]
    pub pause_on_limit: bool,
    #[serde(default = "default_reset_hour")]
    pub reset_hour_utc: u8,
}

fn default_reset_hour() -> u8 {
    0
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradingHours {
    pub enabled: bool,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "all_hours")]
    pub allowed_hours: BTreeSet<u8>,
    #[serde(default = "all_days")]
    pub allowed_days: BTreeSet<u8>,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn all_hours() -> BTreeSet<u8> {
    (0..24).collect()
}

fn all_days() -> BTreeSet<u8> {
    (0..7).collect()
}

impl Default for TradingHours {
    fn default() -> Self {
        Self {
            enabled: false,
            timezone: default_timezone(),
            allowed_hours: all_hours(),
            allowed_days: all_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlackoutPeriod {
    pub start: chrono::DateTime<chrono::Utc>,
    pub end: chrono::DateTime<chrono::Utc>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionRules {
    #[serde(default)]
    pub min_order_size_usd: f64,
    #[serde(default = "default_max_order_size_percent")]
    pub max_order_size_percent: f64,
    #[serde(default = "default_true")]
    pub allow_partial_fills: bool,
}

fn default_max_order_size_percent() -> f64 {
    100.0
}

impl Default for ExecutionRules {
    fn default() -> Self {
        Self {
            min_order_size_usd: 0.0,
            max_order_size_percent: default_max_order_size_percent(),
            allow_partial_fills: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct VolumeCheck {
    pub enabled: bool,
    #[serde(default)]
    pub min_24h_volume_usd: f64,
}

fn default_true() -> bool {
    true
}

/// The canonical structured rule document for a strategy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Rules {
    #[serde(default)]
    pub take_profit_levels: Vec<TakeProfitLevel>,
    #[serde(default)]
    pub stop_loss: StopLoss,
    #[serde(default)]
    pub buy_dip: BuyDip,
    #[serde(default)]
    pub cooldown: Cooldown,
    #[serde(default)]
    pub risk_management: RiskManagement,
    #[serde(default)]
    pub trading_hours: TradingHours,
    #[serde(default)]
    pub blackout_periods: Vec<BlackoutPeriod>,
    #[serde(default)]
    pub execution: ExecutionRules,
    #[serde(default)]
    pub volume_check: VolumeCheck,
}

/// The legacy flat rule shape accepted on strategy creation.
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyRules {
    pub take_profit_percent: Option<f64>,
    pub stop_loss_percent: Option<f64>,
    pub buy_dip_percent: Option<f64>,
}

impl From<LegacyRules> for Rules {
    /// Normalizes the legacy flat form: everything defaults to disabled
    /// except the explicitly-set legacy fields, which become a single
    /// full-size take-profit level / fixed stop-loss / single-shot buy-dip.
    fn from(legacy: LegacyRules) -> Self {
        let mut rules = Rules::default();

        if let Some(tp) = legacy.take_profit_percent {
            rules.take_profit_levels.push(TakeProfitLevel {
                percent: tp,
                quantity_percent: 100.0,
                enabled: true,
            });
        }

        if let Some(sl) = legacy.stop_loss_percent {
            rules.stop_loss = StopLoss {
                percent: sl,
                enabled: true,
                trailing_enabled: false,
                trailing_percent: 0.0,
                trailing_activation_percent: 0.0,
            };
        }

        if let Some(bd) = legacy.buy_dip_percent {
            rules.buy_dip = BuyDip {
                percent: bd,
                enabled: true,
                dca_enabled: false,
                dca_levels: Vec::new(),
            };
        }

        rules
    }
}

/// Rounds a percent to a stable integer key so it can live in a `BTreeSet`
/// (levels are compared by configured percent, not by floating point identity).
pub fn level_key(percent: f64) -> i64 {
    (percent * 1_000_000.0).round() as i64
}

impl Rules {
    /// True when the enabled take-profit levels' `quantity_percent` values
    /// sum to exactly 100 (within floating point tolerance), or there are
    /// no enabled levels at all.
    pub fn take_profit_sum_valid(&self) -> bool {
        let enabled: Vec<&TakeProfitLevel> =
            self.take_profit_levels.iter().filter(|l| l.enabled).collect();
        if enabled.is_empty() {
            return true;
        }
        let sum: f64 = enabled.iter().map(|l| l.quantity_percent).sum();
        (sum - 100.0).abs() < 1e-6
    }

    /// True when DCA levels (if DCA is enabled) sum to 100.
    pub fn dca_sum_valid(&self) -> bool {
        if !self.buy_dip.dca_enabled || self.buy_dip.dca_levels.is_empty() {
            return true;
        }
        let sum: f64 = self.buy_dip.dca_levels.iter().map(|l| l.quantity_percent).sum();
        (sum - 100.0).abs() < 1e-6
    }

    /// Whole-rules validity gate used at both API-create time and read-back
    /// time (a strategy loaded from storage that fails this is `needs_repair`).
    pub fn is_valid(&self) -> bool {
        self.take_profit_sum_valid() && self.dca_sum_valid()
    }

    pub fn validation_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if !self.take_profit_sum_valid() {
            errors.push(
                "take_profit_levels: enabled quantity_percent values must sum to 100".to_string(),
            );
        }
        if !self.dca_sum_valid() {
            errors.push("buy_dip.dca_levels: quantity_percent values must sum to 100".to_string());
        }
        errors
    }

    /// Take-profit levels sorted by ascending percent, as the evaluator
    /// requires.
    pub fn take_profit_levels_sorted(&self) -> Vec<&TakeProfitLevel> {
        let mut levels: Vec<&TakeProfitLevel> = self.take_profit_levels.iter().collect();
        levels.sort_by(|a, b| a.percent.partial_cmp(&b.percent).unwrap());
        levels
    }

    pub fn dca_levels_sorted(&self) -> Vec<&DcaLevel> {
        let mut levels: Vec<&DcaLevel> = self.buy_dip.dca_levels.iter().collect();
        levels.sort_by(|a, b| a.percent.partial_cmp(&b.percent).unwrap());
        levels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_normalizes_to_single_full_levels() {
        let legacy = LegacyRules {
            take_profit_percent: Some(10.0),
            stop_loss_percent: Some(5.0),
            buy_dip_percent: Some(8.0),
        };
        let rules: Rules = legacy.into();
        assert_eq!(rules.take_profit_levels.len(), 1);
        assert_eq!(rules.take_profit_levels[0].quantity_percent, 100.0);
        assert!(rules.stop_loss.enabled);
        assert!(rules.buy_dip.enabled);
        assert!(!rules.buy_dip.dca_enabled);
        assert!(rules.is_valid());
    }

    #[test]
    fn legacy_omitted_fields_stay_disabled() {
        let legacy = LegacyRules {
            take_profit_percent: None,
            stop_loss_percent: Some(5.0),
            buy_dip_percent: None,
        };
        let rules: Rules = legacy.into();
        assert!(rules.take_profit_levels.is_empty());
        assert!(!rules.buy_dip.enabled);
        assert!(rules.trading_hours.enabled == false);
    }

    #[test]
    fn tp_sum_must_equal_100_across_enabled_levels() {
        let mut rules = Rules::default();
        rules.take_profit_levels = vec![
            TakeProfitLevel { percent: 5.0, quantity_percent: 30.0, enabled: true },
            TakeProfitLevel { percent: 10.0, quantity_percent: 40.0, enabled: true },
            TakeProfitLevel { percent: 20.0, quantity_percent: 20.0, enabled: false },
        ];
        // 30 + 40 = 70, disabled level doesn't count -> invalid
        assert!(!rules.is_valid());

        rules.take_profit_levels[2].enabled = true;
        rules.take_profit_levels[2].quantity_percent = 30.0;
        assert!(rules.is_valid());
    }

    #[test]
    fn dca_sum_validated_only_when_enabled() {
        let mut rules = Rules::default();
        rules.buy_dip.enabled = true;
        rules.buy_dip.dca_enabled = true;
        rules.buy_dip.dca_levels = vec![
            DcaLevel { percent: 5.0, quantity_percent: 50.0 },
            DcaLevel { percent: 10.0, quantity_percent: 60.0 },
        ];
        assert!(!rules.is_valid());

        rules.buy_dip.dca_levels[1].quantity_percent = 50.0;
        assert!(rules.is_valid());
    }
}
