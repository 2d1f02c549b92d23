//! The Trigger Evaluator: a pure function from (rules, tracking, prices,
//! market data, wall clock) to a `Decision`. No I/O, no mutation of its
//! inputs — every side effect it wants is returned as part of
//! `EvaluationOutcome` for the caller (the Strategy Worker) to persist.

use super::decision::{ActionType, BlockReason, Decision, DecisionReason, EvaluationOutcome, TrailingUpdateRequest};
use super::rules::Rules;
use super::tracking::Tracking;
use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc};

/// Optional market-wide figures the volume gate consults. Missing fields
/// cause that validation to be skipped rather than treated as a failure.
#[derive(Debug, Clone, Default)]
pub struct MarketData {
    pub volume_24h: Option<f64>,
    pub change_24h: Option<f64>,
}

/// Parses a handful of timezone spellings this crate supports: `"UTC"`
/// and fixed offsets like `"+02:00"` / `"-0500"`. Named IANA zones (e.g.
/// `"America/Sao_Paulo"`) are not supported without a tz database crate;
/// unrecognized strings fall back to UTC (see DESIGN.md).
fn parse_timezone(tz: &str) -> FixedOffset {
    let trimmed = tz.trim();
    if trimmed.eq_ignore_ascii_case("UTC") || trimmed.is_empty() {
        return FixedOffset::east_opt(0).unwrap();
    }
    let cleaned: String = trimmed.chars().filter(|c| *c != ':').collect();
    if cleaned.len() >= 5 {
        let (sign, rest) = cleaned.split_at(1);
        if (sign == "+" || sign == "-") && rest.len() == 4 {
            if let (Ok(hours), Ok(minutes)) = (rest[0..2].parse::<i32>(), rest[2..4].parse::<i32>()) {
                let total_seconds = (hours * 3600 + minutes * 60) * if sign == "-" { -1 } else { 1 };
                if let Some(offset) = FixedOffset::east_opt(total_seconds) {
                    return offset;
                }
            }
        }
    }
    FixedOffset::east_opt(0).unwrap()
}

/// Day-of-week convention: 0 = Sunday .. 6 = Saturday, matching the JSON
/// API convention used across the strategy creation payloads.
fn within_trading_hours(rules: &super::rules::TradingHours, now: DateTime<Utc>) -> bool {
    let offset = parse_timezone(&rules.timezone);
    let local = now.with_timezone(&offset);
    let hour = local.hour() as u8;
    let weekday = local.weekday().num_days_from_sunday() as u8;
    rules.allowed_hours.contains(&hour) && rules.allowed_days.contains(&weekday)
}

fn breached_window(
    rm: &super::rules::RiskManagement,
    stats: &super::tracking::ExecutionStats,
) -> Option<&'static str> {
    if let Some(limit) = rm.max_daily_loss_usd {
        if stats.daily_pnl_usd <= -limit.abs() {
            return Some("daily");
        }
    }
    if let Some(limit) = rm.max_weekly_loss_usd {
        if stats.weekly_pnl_usd <= -limit.abs() {
            return Some("weekly");
        }
    }
    if let Some(limit) = rm.max_monthly_loss_usd {
        if stats.monthly_pnl_usd <= -limit.abs() {
            return Some("monthly");
        }
    }
    None
}

/// Caps a sell-side quantity percent by `max_order_size_percent` and
/// demotes below `min_order_size_usd` — the evaluator can compute the
/// resulting USD value exactly for sells because it knows `holding_amount`.
fn resolve_sell_quantity(
    rules: &Rules,
    raw_quantity_percent: f64,
    holding_amount: f64,
    current_price: f64,
) -> Option<f64> {
    let capped = raw_quantity_percent.min(rules.execution.max_order_size_percent);
    let order_value_usd = holding_amount * capped / 100.0 * current_price;
    if order_value_usd < rules.execution.min_order_size_usd {
        None
    } else {
        Some(capped)
    }
}

/// Buy-side sizing is against a budget the evaluator doesn't know (the
/// Order Orchestrator resolves that against available balance), so only
/// the percent cap applies here; the min-size floor is enforced again at
/// the Orchestrator once a concrete USD amount exists.
fn resolve_buy_quantity(rules: &Rules, raw_quantity_percent: f64) -> f64 {
    raw_quantity_percent.min(rules.execution.max_order_size_percent)
}

/// Evaluates one strategy against a fresh price. Reads `now` exactly once.
pub fn evaluate(
    rules: &Rules,
    tracking: &Tracking,
    entry_price: f64,
    current_price: f64,
    holding_amount: f64,
    market_data: &MarketData,
    now: DateTime<Utc>,
) -> EvaluationOutcome {
    if entry_price <= 0.0 || current_price <= 0.0 || !rules.is_valid() {
        return EvaluationOutcome::simple(Decision::blocked(BlockReason::NeedsRepair));
    }

    // 1. Cooldown gate.
    if rules.cooldown.enabled && tracking.cooldown_state.is_blocking(now) {
        return EvaluationOutcome::simple(Decision::blocked(BlockReason::Cooldown));
    }

    // 2. Circuit-breaker gate.
    if rules.risk_management.enabled {
        if let Some(window) = breached_window(&rules.risk_management, &tracking.execution_stats) {
            let mut outcome = EvaluationOutcome::simple(Decision::blocked(BlockReason::CircuitBreaker(window)));
            outcome.pause_requested = rules.risk_management.pause_on_limit;
            return outcome;
        }
    }

    // 3. Trading-hours gate.
    if rules.trading_hours.enabled && !within_trading_hours(&rules.trading_hours, now) {
        return EvaluationOutcome::simple(Decision::blocked(BlockReason::TradingHours));
    }

    // 4. Blackout gate.
    let in_blackout = rules
        .blackout_periods
        .iter()
        .any(|period| period.enabled && now >= period.start && now <= period.end);
    if in_blackout {
        return EvaluationOutcome::simple(Decision::blocked(BlockReason::Blackout));
    }

    // 5. Volume gate.
    if rules.volume_check.enabled {
        if let Some(volume) = market_data.volume_24h {
            if volume < rules.volume_check.min_24h_volume_usd {
                return EvaluationOutcome::simple(Decision::blocked(BlockReason::Volume));
            }
        }
    }

    // 6. Trailing-stop update.
    let mut trailing_update = None;
    if rules.stop_loss.trailing_enabled {
        let mut state = tracking.trailing_stop_state.clone();
        let gain = (current_price - entry_price) / entry_price;

        if !state.is_active && gain >= rules.stop_loss.trailing_activation_percent / 100.0 {
            state.is_active = true;
            state.activated_at = Some(now);
        }

        if state.is_active {
            state.highest_price_seen = state.highest_price_seen.max(current_price);
            state.current_stop_price =
                state.highest_price_seen * (1.0 - rules.stop_loss.trailing_percent / 100.0);
            trailing_update = Some(TrailingUpdateRequest {
                highest_price_seen: state.highest_price_seen,
                current_stop_price: state.current_stop_price,
                is_active: true,
                activated_at: state.activated_at,
            });

            if current_price <= state.current_stop_price {
                let decision = match resolve_sell_quantity(rules, 100.0, holding_amount, current_price) {
                    Some(qty) => Decision::triggered(ActionType::Sell, DecisionReason::TrailingStop, qty),
                    None => Decision::blocked(BlockReason::BelowMinSize),
                };
                return EvaluationOutcome { decision, trailing_update, pause_requested: false };
            }
        }
    }

    // 7. Take-profit levels, ascending percent, first unexecuted match wins.
    for (index, level) in rules.take_profit_levels_sorted().into_iter().enumerate() {
        if !level.enabled || tracking.execution_stats.has_executed_tp(level.percent) {
            continue;
        }
        if current_price >= entry_price * (1.0 + level.percent / 100.0) {
            let decision = match resolve_sell_quantity(rules, level.quantity_percent, holding_amount, current_price) {
                Some(qty) => Decision::triggered(ActionType::Sell, DecisionReason::TakeProfit(index + 1), qty),
                None => Decision::blocked(BlockReason::BelowMinSize),
            };
            return EvaluationOutcome { decision, trailing_update, pause_requested: false };
        }
    }

    // 8. Stop-loss (fixed).
    if rules.stop_loss.enabled && current_price <= entry_price * (1.0 - rules.stop_loss.percent / 100.0) {
        let decision = match resolve_sell_quantity(rules, 100.0, holding_amount, current_price) {
            Some(qty) => Decision::triggered(ActionType::Sell, DecisionReason::StopLoss, qty),
            None => Decision::blocked(BlockReason::BelowMinSize),
        };
        return EvaluationOutcome { decision, trailing_update, pause_requested: false };
    }

    // 9. Buy-dip / DCA.
    if rules.buy_dip.enabled {
        if rules.buy_dip.dca_enabled {
            for (index, level) in rules.dca_levels_sorted().into_iter().enumerate() {
                if tracking.execution_stats.has_executed_dca(level.percent) {
                    continue;
                }
                if current_price <= entry_price * (1.0 - level.percent / 100.0) {
                    let qty = resolve_buy_quantity(rules, level.quantity_percent);
                    let decision = Decision::triggered(ActionType::Buy, DecisionReason::Dca(index + 1), qty);
                    return EvaluationOutcome { decision, trailing_update, pause_requested: false };
                }
            }
        } else if current_price <= entry_price * (1.0 - rules.buy_dip.percent / 100.0) {
            let qty = resolve_buy_quantity(rules, 100.0);
            let decision = Decision::triggered(ActionType::Buy, DecisionReason::BuyDip, qty);
            return EvaluationOutcome { decision, trailing_update, pause_requested: false };
        }
    }

    // 10. Nothing fired.
    EvaluationOutcome { decision: Decision::not_triggered(), trailing_update, pause_requested: false }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rules::{DcaLevel, StopLoss, TakeProfitLevel};
    use chrono::Duration;

    fn base_rules() -> Rules {
        Rules::default()
    }

    #[test]
    fn scenario_take_profit_level_1() {
        let mut rules = base_rules();
        rules.take_profit_levels = vec![
            TakeProfitLevel { percent: 5.0, quantity_percent: 30.0, enabled: true },
            TakeProfitLevel { percent: 10.0, quantity_percent: 40.0, enabled: true },
            TakeProfitLevel { percent: 20.0, quantity_percent: 30.0, enabled: true },
        ];
        let tracking = Tracking::default();
        let outcome = evaluate(&rules, &tracking, 1.00, 1.051, 100.0, &MarketData::default(), Utc::now());

        assert!(outcome.decision.should_trigger);
        assert_eq!(outcome.decision.action, Some(ActionType::Sell));
        assert_eq!(outcome.decision.reason.as_deref(), Some("TAKE_PROFIT_L1"));
        assert_eq!(outcome.decision.quantity_percent, Some(30.0));
    }

    #[test]
    fn scenario_trailing_stop_wins_over_take_profit() {
        let mut rules = base_rules();
        rules.take_profit_levels = vec![
            TakeProfitLevel { percent: 5.0, quantity_percent: 30.0, enabled: true },
            TakeProfitLevel { percent: 10.0, quantity_percent: 40.0, enabled: true },
            TakeProfitLevel { percent: 20.0, quantity_percent: 30.0, enabled: true },
        ];
        rules.stop_loss = StopLoss {
            percent: 50.0,
            enabled: false,
            trailing_enabled: true,
            trailing_percent: 2.0,
            trailing_activation_percent: 5.0,
        };
        let mut tracking = Tracking::default();

        let step1 = evaluate(&rules, &tracking, 1.00, 1.25, 100.0, &MarketData::default(), Utc::now());
        // Trailing activates this same call (gain 25% >= 5%) but the stop (1.225)
        // hasn't been touched yet at 1.25, so rule 7 still gets to fire (lowest
        // unexecuted take-profit level, 5%).
        assert!(step1.decision.should_trigger);
        assert_eq!(step1.trailing_update.as_ref().unwrap().highest_price_seen, 1.25);
        tracking.trailing_stop_state.is_active = true;
        tracking.trailing_stop_state.highest_price_seen = 1.25;
        tracking.trailing_stop_state.current_stop_price = 1.225;
        tracking.execution_stats.mark_tp_executed(5.0);
        tracking.execution_stats.mark_tp_executed(10.0);
        tracking.execution_stats.mark_tp_executed(20.0);

        let step2 = evaluate(&rules, &tracking, 1.00, 1.22, 70.0, &MarketData::default(), Utc::now());
        assert!(step2.decision.should_trigger);
        assert_eq!(step2.decision.action, Some(ActionType::Sell));
        assert_eq!(step2.decision.reason.as_deref(), Some("TRAILING_STOP"));
        assert_eq!(step2.decision.quantity_percent, Some(100.0));
    }

    #[test]
    fn scenario_dca_ladder_skips_executed_level() {
        let mut rules = base_rules();
        rules.buy_dip.enabled = true;
        rules.buy_dip.dca_enabled = true;
        rules.buy_dip.dca_levels = vec![
            DcaLevel { percent: 5.0, quantity_percent: 50.0 },
            DcaLevel { percent: 10.0, quantity_percent: 50.0 },
        ];
        let mut tracking = Tracking::default();
        tracking.execution_stats.mark_dca_executed(5.0);

        let outcome = evaluate(&rules, &tracking, 1.00, 0.90, 0.0, &MarketData::default(), Utc::now());
        assert!(outcome.decision.should_trigger);
        assert_eq!(outcome.decision.action, Some(ActionType::Buy));
        assert_eq!(outcome.decision.reason.as_deref(), Some("DCA_L2"));
        assert_eq!(outcome.decision.quantity_percent, Some(50.0));
    }

    #[test]
    fn scenario_circuit_breaker_trip_requests_pause() {
        let mut rules = base_rules();
        rules.risk_management.enabled = true;
        rules.risk_management.max_daily_loss_usd = Some(1000.0);
        rules.risk_management.pause_on_limit = true;
        let mut tracking = Tracking::default();
        tracking.execution_stats.daily_pnl_usd = -1050.0;

        let outcome = evaluate(&rules, &tracking, 1.00, 999.0, 10.0, &MarketData::default(), Utc::now());
        assert!(!outcome.decision.should_trigger);
        assert_eq!(
            outcome.decision.metadata.get("circuit_breaker").and_then(|v| v.as_str()),
            Some("daily")
        );
        assert!(outcome.pause_requested);
    }

    #[test]
    fn scenario_cooldown_blocks_regardless_of_price() {
        let mut rules = base_rules();
        rules.cooldown.enabled = true;
        rules.take_profit_levels = vec![TakeProfitLevel { percent: 5.0, quantity_percent: 100.0, enabled: true }];
        let mut tracking = Tracking::default();
        tracking.cooldown_state.cooldown_until = Some(Utc::now() + Duration::minutes(10));

        let outcome = evaluate(&rules, &tracking, 1.00, 1.20, 10.0, &MarketData::default(), Utc::now());
        assert!(!outcome.decision.should_trigger);
        assert_eq!(
            outcome.decision.metadata.get("cooldown").and_then(|v| v.as_str()),
            Some("blocked")
        );
    }

    #[test]
    fn precondition_failure_is_needs_repair() {
        let rules = base_rules();
        let tracking = Tracking::default();
        let outcome = evaluate(&rules, &tracking, 0.0, 1.0, 0.0, &MarketData::default(), Utc::now());
        assert!(!outcome.decision.should_trigger);
        assert_eq!(
            outcome.decision.metadata.get("reason").and_then(|v| v.as_str()),
            Some("needs_repair")
        );
    }

    #[test]
    fn invalid_tp_sum_is_needs_repair() {
        let mut rules = base_rules();
        rules.take_profit_levels = vec![TakeProfitLevel { percent: 5.0, quantity_percent: 40.0, enabled: true }];
        let tracking = Tracking::default();
        let outcome = evaluate(&rules, &tracking, 1.0, 1.10, 10.0, &MarketData::default(), Utc::now());
        assert!(!outcome.decision.should_trigger);
        assert_eq!(
            outcome.decision.metadata.get("reason").and_then(|v| v.as_str()),
            Some("needs_repair")
        );
    }

    #[test]
    fn below_min_order_size_demotes_sell_decision() {
        let mut rules = base_rules();
        rules.stop_loss = StopLoss { percent: 5.0, enabled: true, ..StopLoss::default() };
        rules.execution.min_order_size_usd = 1000.0;
        let tracking = Tracking::default();

        // holding_amount * 100% * price = 1 * 94 = 94, well below 1000.
        let outcome = evaluate(&rules, &tracking, 100.0, 94.0, 1.0, &MarketData::default(), Utc::now());
        assert!(!outcome.decision.should_trigger);
        assert_eq!(
            outcome.decision.metadata.get("reason").and_then(|v| v.as_str()),
            Some("below_min_size")
        );
    }

    #[test]
    fn max_order_size_percent_caps_quantity() {
        let mut rules = base_rules();
        rules.take_profit_levels = vec![TakeProfitLevel { percent: 5.0, quantity_percent: 100.0, enabled: true }];
        rules.execution.max_order_size_percent = 25.0;
        let tracking = Tracking::default();

        let outcome = evaluate(&rules, &tracking, 1.0, 1.10, 100.0, &MarketData::default(), Utc::now());
        assert!(outcome.decision.should_trigger);
        assert_eq!(outcome.decision.quantity_percent, Some(25.0));
    }

    #[test]
    fn trailing_highest_price_is_monotonic_across_calls() {
        let mut rules = base_rules();
        rules.stop_loss = StopLoss {
            percent: 50.0,
            enabled: false,
            trailing_enabled: true,
            trailing_percent: 2.0,
            trailing_activation_percent: 1.0,
        };
        let mut tracking = Tracking::default();

        let prices = [1.05, 1.10, 1.08, 1.20, 1.15];
        let mut last_high = 0.0f64;
        for price in prices {
            let outcome = evaluate(&rules, &tracking, 1.0, price, 10.0, &MarketData::default(), Utc::now());
            if let Some(update) = &outcome.trailing_update {
                assert!(update.highest_price_seen >= last_high);
                last_high = update.highest_price_seen;
                tracking.trailing_stop_state.is_active = update.is_active;
                tracking.trailing_stop_state.highest_price_seen = update.highest_price_seen;
                tracking.trailing_stop_state.current_stop_price = update.current_stop_price;
            }
            if outcome.decision.should_trigger {
                break;
            }
        }
    }
}
