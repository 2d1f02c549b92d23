//! Strategy Store: CRUD over strategy documents, plus the operations
//! the Strategy Worker needs mid-tick — idempotent execution recording,
//! monotonic trailing-stop updates, and the per-document lease that
//! serializes overlapping ticks.

use super::Database;
use crate::domain::decision::{ActionType, TrailingUpdateRequest};
use crate::domain::{Rules, Tracking};
use crate::errors::StoreError;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub id: String,
    pub user_id: String,
    pub exchange_id: String,
    /// The linked exchange credential this strategy trades against.
    /// `None` only for the built-in `simulated` exchange, which needs no
    /// credential.
    pub link_id: Option<String>,
    pub token: String,
    pub name: String,
    pub enabled: bool,
    pub rules: Rules,
    pub tracking: Tracking,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn row_to_strategy(row: &rusqlite::Row) -> rusqlite::Result<Strategy> {
    let rules_json: String = row.get("rules_json")?;
    let tracking_json: String = row.get("tracking_json")?;
    let rules: Rules = serde_json::from_str(&rules_json).unwrap_or_default();
    let mut tracking: Tracking = serde_json::from_str(&tracking_json).unwrap_or_default();
    if !rules.is_valid() {
        tracking.needs_repair = true;
    }

    Ok(Strategy {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        exchange_id: row.get("exchange_id")?,
        link_id: row.get("link_id")?,
        token: row.get("token")?,
        name: row.get("name")?,
        enabled: row.get::<_, i64>("enabled")? == 1,
        rules,
        tracking,
        created_at: parse_rfc3339(row.get::<_, String>("created_at")?),
        updated_at: parse_rfc3339(row.get::<_, String>("updated_at")?),
    })
}

fn parse_rfc3339(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s).map(|dt| dt.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now())
}

impl Database {
    pub async fn create_strategy(
        &self,
        user_id: &str,
        exchange_id: &str,
        link_id: Option<&str>,
        token: &str,
        name: &str,
        rules: Rules,
    ) -> Result<Strategy, StoreError> {
        let conn = self.conn.lock().await;
        let now = Utc::now();
        let id = uuid::Uuid::new_v4().to_string();
        let mut tracking = Tracking::default();
        tracking.needs_repair = !rules.is_valid();

        conn.execute(
            "INSERT INTO strategies (id, user_id, exchange_id, link_id, token, name, enabled, rules_json, tracking_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?8, ?9, ?9)",
            params![
                id,
                user_id,
                exchange_id,
                link_id,
                token,
                name,
                serde_json::to_string(&rules).unwrap(),
                serde_json::to_string(&tracking).unwrap(),
                now.to_rfc3339(),
            ],
        )?;

        Ok(Strategy {
            id,
            user_id: user_id.to_string(),
            exchange_id: exchange_id.to_string(),
            link_id: link_id.map(str::to_string),
            token: token.to_string(),
            name: name.to_string(),
            enabled: true,
            rules,
            tracking,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn get_strategy(&self, id: &str) -> Result<Strategy, StoreError> {
        let conn = self.conn.lock().await;
        conn.query_row("SELECT * FROM strategies WHERE id = ?1", params![id], row_to_strategy)
            .optional()?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    pub async fn list_strategies_for_user(&self, user_id: &str) -> Result<Vec<Strategy>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT * FROM strategies WHERE user_id = ?1 ORDER BY created_at DESC")?;
        let rows = stmt.query_map(params![user_id], row_to_strategy)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// All enabled strategies, for the Strategy Worker's tick. Strategies
    /// flagged `needs_repair` are still returned; the worker is
    /// responsible for skipping evaluation and surfacing the flag.
    ///
    /// A strategy whose linked exchange was disconnected (`is_active = 0`)
    /// is excluded: there's no credential to trade with. The `simulated`
    /// exchange needs no link at all and is never filtered out.
    pub async fn list_active_strategies(&self) -> Result<Vec<Strategy>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT s.* FROM strategies s WHERE s.enabled = 1 AND (
                s.exchange_id = 'simulated'
                OR s.link_id IS NULL
                OR EXISTS (SELECT 1 FROM user_exchanges ue WHERE ue.id = s.link_id AND ue.is_active = 1)
             )",
        )?;
        let rows = stmt.query_map([], row_to_strategy)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub async fn update_rules(&self, id: &str, rules: Rules) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let strategy = self.get_strategy_locked(&conn, id)?;
        let mut tracking = strategy.tracking;
        tracking.needs_repair = !rules.is_valid();

        conn.execute(
            "UPDATE strategies SET rules_json = ?1, tracking_json = ?2, updated_at = ?3 WHERE id = ?4",
            params![
                serde_json::to_string(&rules).unwrap(),
                serde_json::to_string(&tracking).unwrap(),
                Utc::now().to_rfc3339(),
                id,
            ],
        )?;
        Ok(())
    }

    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE strategies SET enabled = ?1, updated_at = ?2 WHERE id = ?3",
            params![enabled, Utc::now().to_rfc3339(), id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    pub async fn delete_strategy(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let changed = conn.execute("DELETE FROM strategies WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Idempotent by `(strategy_id, order_ref)`: a retried worker tick
    /// that already recorded this fill is a silent no-op rather than a
    /// duplicated execution and a doubled P&L delta.
    ///
    /// Folds the cooldown and trailing-stop-reset side effects of a fill
    /// into the same `tracking_json` write as the execution stats, so a
    /// crash between the two can never leave one committed without the
    /// other: a recorded fill whose cooldown never took would let the
    /// next tick re-trigger immediately.
    pub async fn persist_execution(
        &self,
        strategy_id: &str,
        order_ref: &str,
        action: ActionType,
        reason: &str,
        price: f64,
        amount: f64,
        pnl_usd: Option<f64>,
    ) -> Result<bool, StoreError> {
        let conn = self.conn.lock().await;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO executions (id, strategy_id, order_ref, action, reason, price, amount, pnl_usd, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                uuid::Uuid::new_v4().to_string(),
                strategy_id,
                order_ref,
                action.as_str(),
                reason,
                price,
                amount,
                pnl_usd,
                Utc::now().to_rfc3339(),
            ],
        )?;

        if inserted == 0 {
            return Ok(false);
        }

        let strategy = self.get_strategy_locked(&conn, strategy_id)?;
        let mut tracking = strategy.tracking;
        let now = Utc::now();
        tracking.execution_stats.total_executions += 1;
        match action {
            ActionType::Buy => tracking.execution_stats.total_buys += 1,
            ActionType::Sell => tracking.execution_stats.total_sells += 1,
        }
        if let Some(pnl) = pnl_usd {
            tracking.execution_stats.total_pnl_usd += pnl;
            tracking.execution_stats.daily_pnl_usd += pnl;
            tracking.execution_stats.weekly_pnl_usd += pnl;
            tracking.execution_stats.monthly_pnl_usd += pnl;
        }
        tracking.execution_stats.last_at = Some(now);
        tracking.execution_stats.last_type = Some(action);
        tracking.execution_stats.last_reason = Some(reason.to_string());
        tracking.execution_stats.last_price = Some(price);
        tracking.execution_stats.last_amount = Some(amount);

        let tp_percents: Vec<f64> = strategy.rules.take_profit_levels_sorted().iter().map(|l| l.percent).collect();
        if let Some(level) = reason.strip_prefix("TAKE_PROFIT_L").and_then(level_index_to_percent(&tp_percents)) {
            tracking.execution_stats.mark_tp_executed(level);
        }
        let dca_percents: Vec<f64> = strategy.rules.dca_levels_sorted().iter().map(|l| l.percent).collect();
        if let Some(level) = reason.strip_prefix("DCA_L").and_then(level_index_to_percent(&dca_percents)) {
            tracking.execution_stats.mark_dca_executed(level);
        }

        if let Some(minutes) = strategy.rules.cooldown.minutes_for(action) {
            tracking.cooldown_state.cooldown_until = Some(now + chrono::Duration::minutes(minutes));
            tracking.cooldown_state.last_action = Some(action);
            tracking.cooldown_state.last_action_at = Some(now);
        }

        if reason == "TRAILING_STOP" {
            tracking.trailing_stop_state.is_active = false;
            tracking.trailing_stop_state.highest_price_seen = 0.0;
            tracking.trailing_stop_state.current_stop_price = 0.0;
            tracking.trailing_stop_state.activated_at = None;
        }

        conn.execute(
            "UPDATE strategies SET tracking_json = ?1, updated_at = ?2 WHERE id = ?3",
            params![serde_json::to_string(&tracking).unwrap(), now.to_rfc3339(), strategy_id],
        )?;

        Ok(true)
    }

    /// Monotonic: rejects an update that would lower the stop from where
    /// it already sits, matching the evaluator's own guarantee, so a
    /// racing stale write from an earlier tick can never regress it.
    pub async fn update_trailing(&self, strategy_id: &str, update: TrailingUpdateRequest) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let strategy = self.get_strategy_locked(&conn, strategy_id)?;
        let mut tracking = strategy.tracking;

        if update.current_stop_price < tracking.trailing_stop_state.current_stop_price {
            return Ok(());
        }

        tracking.trailing_stop_state.highest_price_seen =
            tracking.trailing_stop_state.highest_price_seen.max(update.highest_price_seen);
        tracking.trailing_stop_state.current_stop_price = update.current_stop_price;
        tracking.trailing_stop_state.is_active = update.is_active;
        if tracking.trailing_stop_state.activated_at.is_none() {
            tracking.trailing_stop_state.activated_at = update.activated_at;
        }

        conn.execute(
            "UPDATE strategies SET tracking_json = ?1, updated_at = ?2 WHERE id = ?3",
            params![serde_json::to_string(&tracking).unwrap(), Utc::now().to_rfc3339(), strategy_id],
        )?;
        Ok(())
    }

    pub async fn set_paused(&self, strategy_id: &str) -> Result<(), StoreError> {
        self.set_enabled(strategy_id, false).await
    }

    /// Compare-and-swap lease acquisition: succeeds only if the lease is
    /// free or expired. Returns the token to present to `renew_lease`/
    /// `release_lease` so a worker can't touch a lease it doesn't hold.
    pub async fn acquire_lease(&self, strategy_id: &str, ttl_seconds: i64) -> Result<String, StoreError> {
        let conn = self.conn.lock().await;
        let strategy = self.get_strategy_locked(&conn, strategy_id)?;
        let mut tracking = strategy.tracking;

        let now = Utc::now();
        let held = tracking.lease.lease_until.map(|until| until > now).unwrap_or(false);
        if held {
            return Err(StoreError::LeaseConflict);
        }

        let token = uuid::Uuid::new_v4().to_string();
        tracking.lease.lease_token = Some(token.clone());
        tracking.lease.lease_until = Some(now + chrono::Duration::seconds(ttl_seconds));

        conn.execute(
            "UPDATE strategies SET tracking_json = ?1, updated_at = ?2 WHERE id = ?3",
            params![serde_json::to_string(&tracking).unwrap(), now.to_rfc3339(), strategy_id],
        )?;
        Ok(token)
    }

    pub async fn renew_lease(&self, strategy_id: &str, token: &str, ttl_seconds: i64) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let strategy = self.get_strategy_locked(&conn, strategy_id)?;
        let mut tracking = strategy.tracking;

        if tracking.lease.lease_token.as_deref() != Some(token) {
            return Err(StoreError::LeaseConflict);
        }
        tracking.lease.lease_until = Some(Utc::now() + chrono::Duration::seconds(ttl_seconds));

        conn.execute(
            "UPDATE strategies SET tracking_json = ?1, updated_at = ?2 WHERE id = ?3",
            params![serde_json::to_string(&tracking).unwrap(), Utc::now().to_rfc3339(), strategy_id],
        )?;
        Ok(())
    }

    pub async fn release_lease(&self, strategy_id: &str, token: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let strategy = self.get_strategy_locked(&conn, strategy_id)?;
        let mut tracking = strategy.tracking;

        if tracking.lease.lease_token.as_deref() != Some(token) {
            return Err(StoreError::LeaseConflict);
        }
        tracking.lease.lease_token = None;
        tracking.lease.lease_until = None;

        conn.execute(
            "UPDATE strategies SET tracking_json = ?1, updated_at = ?2 WHERE id = ?3",
            params![serde_json::to_string(&tracking).unwrap(), Utc::now().to_rfc3339(), strategy_id],
        )?;
        Ok(())
    }

    /// Resets the daily/weekly/monthly P&L counters the circuit breaker
    /// reads against. Runs from the Strategy Worker's own schedule
    /// rather than as a separate job.
    pub async fn reset_pnl_windows(&self, reset_daily: bool, reset_weekly: bool, reset_monthly: bool) -> Result<(), StoreError> {
        if !(reset_daily || reset_weekly || reset_monthly) {
            return Ok(());
        }
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT id, tracking_json FROM strategies")?;
        let rows: Vec<(String, String)> = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<Result<_, _>>()?;
        drop(stmt);

        for (id, tracking_json) in rows {
            let mut tracking: Tracking = serde_json::from_str(&tracking_json).unwrap_or_default();
            if reset_daily {
                tracking.execution_stats.daily_pnl_usd = 0.0;
            }
            if reset_weekly {
                tracking.execution_stats.weekly_pnl_usd = 0.0;
            }
            if reset_monthly {
                tracking.execution_stats.monthly_pnl_usd = 0.0;
            }
            conn.execute(
                "UPDATE strategies SET tracking_json = ?1 WHERE id = ?2",
                params![serde_json::to_string(&tracking).unwrap(), id],
            )?;
        }
        Ok(())
    }

    fn get_strategy_locked(&self, conn: &rusqlite::Connection, id: &str) -> Result<Strategy, StoreError> {
        conn.query_row("SELECT * FROM strategies WHERE id = ?1", params![id], row_to_strategy)
            .optional()?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}

/// `"TAKE_PROFIT_L2"` records a 1-based sorted-level index, not the
/// configured percent; this recovers the percent so it can be marked
/// executed in the level-keyed `BTreeSet`.
fn level_index_to_percent(levels: &[f64]) -> impl Fn(&str) -> Option<f64> + '_ {
    move |idx_str: &str| {
        let idx: usize = idx_str.parse().ok()?;
        levels.get(idx.checked_sub(1)?).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rules::TakeProfitLevel;

    async fn test_db() -> Database {
        let db = Database::open(":memory:").unwrap();
        db.migrate().await.unwrap();
        db
    }

    #[tokio::test]
    async fn create_and_get_round_trips() {
        let db = test_db().await;
        let strategy = db.create_strategy("u1", "simulated", None, "BTC", "my strategy", Rules::default()).await.unwrap();
        let fetched = db.get_strategy(&strategy.id).await.unwrap();
        assert_eq!(fetched.name, "my strategy");
        assert!(!fetched.tracking.needs_repair);
    }

    #[tokio::test]
    async fn invalid_rules_are_flagged_needs_repair_on_create() {
        let db = test_db().await;
        let mut rules = Rules::default();
        rules.take_profit_levels.push(TakeProfitLevel { percent: 10.0, quantity_percent: 40.0, enabled: true });
        let strategy = db.create_strategy("u1", "simulated", None, "BTC", "bad", rules).await.unwrap();
        assert!(strategy.tracking.needs_repair);
    }

    #[tokio::test]
    async fn persist_execution_is_idempotent_by_order_ref() {
        let db = test_db().await;
        let strategy = db.create_strategy("u1", "simulated", None, "BTC", "s", Rules::default()).await.unwrap();

        let first = db.persist_execution(&strategy.id, "order-1", ActionType::Buy, "BUY_DIP", 100.0, 1.0, None).await.unwrap();
        let second = db.persist_execution(&strategy.id, "order-1", ActionType::Buy, "BUY_DIP", 100.0, 1.0, None).await.unwrap();

        assert!(first);
        assert!(!second);
        let fetched = db.get_strategy(&strategy.id).await.unwrap();
        assert_eq!(fetched.tracking.execution_stats.total_executions, 1);
    }

    #[tokio::test]
    async fn persist_execution_applies_cooldown_atomically() {
        let db = test_db().await;
        let mut rules = Rules::default();
        rules.cooldown.enabled = true;
        rules.cooldown.minutes_after_buy = 30;
        let strategy = db.create_strategy("u1", "simulated", None, "BTC", "s", rules).await.unwrap();

        db.persist_execution(&strategy.id, "order-1", ActionType::Buy, "BUY_DIP", 100.0, 1.0, None).await.unwrap();

        let fetched = db.get_strategy(&strategy.id).await.unwrap();
        assert!(fetched.tracking.cooldown_state.cooldown_until.is_some());
        assert_eq!(fetched.tracking.cooldown_state.last_action, Some(ActionType::Buy));
    }

    #[tokio::test]
    async fn persist_execution_resets_trailing_stop_on_trailing_exit() {
        let db = test_db().await;
        let strategy = db.create_strategy("u1", "simulated", None, "BTC", "s", Rules::default()).await.unwrap();

        db.update_trailing(&strategy.id, TrailingUpdateRequest { highest_price_seen: 110.0, current_stop_price: 100.0, is_active: true, activated_at: Some(Utc::now()) }).await.unwrap();
        db.persist_execution(&strategy.id, "order-1", ActionType::Sell, "TRAILING_STOP", 100.0, 1.0, Some(5.0)).await.unwrap();

        let fetched = db.get_strategy(&strategy.id).await.unwrap();
        assert!(!fetched.tracking.trailing_stop_state.is_active);
        assert_eq!(fetched.tracking.trailing_stop_state.current_stop_price, 0.0);
        assert_eq!(fetched.tracking.trailing_stop_state.highest_price_seen, 0.0);
        assert!(fetched.tracking.trailing_stop_state.activated_at.is_none());

        // A fresh trailing activation after liquidation must not be blocked
        // by the monotonic guard against the now-reset stale stop.
        db.update_trailing(&strategy.id, TrailingUpdateRequest { highest_price_seen: 50.0, current_stop_price: 45.0, is_active: true, activated_at: Some(Utc::now()) }).await.unwrap();
        let reactivated = db.get_strategy(&strategy.id).await.unwrap();
        assert_eq!(reactivated.tracking.trailing_stop_state.current_stop_price, 45.0);
    }

    #[tokio::test]
    async fn update_trailing_never_regresses_the_stop() {
        let db = test_db().await;
        let strategy = db.create_strategy("u1", "simulated", None, "BTC", "s", Rules::default()).await.unwrap();

        db.update_trailing(&strategy.id, TrailingUpdateRequest { highest_price_seen: 110.0, current_stop_price: 100.0, is_active: true, activated_at: Some(Utc::now()) }).await.unwrap();
        db.update_trailing(&strategy.id, TrailingUpdateRequest { highest_price_seen: 105.0, current_stop_price: 95.0, is_active: true, activated_at: Some(Utc::now()) }).await.unwrap();

        let fetched = db.get_strategy(&strategy.id).await.unwrap();
        assert_eq!(fetched.tracking.trailing_stop_state.current_stop_price, 100.0);
    }

    #[tokio::test]
    async fn lease_acquire_blocks_until_released() {
        let db = test_db().await;
        let strategy = db.create_strategy("u1", "simulated", None, "BTC", "s", Rules::default()).await.unwrap();

        let token = db.acquire_lease(&strategy.id, 60).await.unwrap();
        assert!(db.acquire_lease(&strategy.id, 60).await.is_err());

        db.release_lease(&strategy.id, &token).await.unwrap();
        assert!(db.acquire_lease(&strategy.id, 60).await.is_ok());
    }
}
