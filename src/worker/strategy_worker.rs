//! Strategy Worker: the recurring tick that drives the Trigger
//! Evaluator over every active strategy and dispatches triggered
//! decisions to the Order Orchestrator. Controllable at runtime
//! (start/stop/trigger) via the job-control API.

use crate::config::Config;
use crate::db::notifications::NotificationKind;
use crate::db::strategies::Strategy;
use crate::db::Database;
use crate::domain::decision::BlockReason;
use crate::domain::evaluator::{evaluate, MarketData};
use crate::errors::GatewayError;
use crate::gateway::GatewayRegistry;
use crate::worker::lease::LeaseGuard;
use crate::worker::orchestrator::{OrchestratorOutcome, OrderOrchestrator};
use chrono::{Datelike, Timelike, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Default, Serialize)]
pub struct JobStatus {
    pub running: bool,
    pub last_tick_at: Option<chrono::DateTime<Utc>>,
    pub last_tick_strategies_evaluated: u32,
    pub last_error: Option<String>,
}

pub struct StrategyWorker {
    db: Database,
    gateways: Arc<GatewayRegistry>,
    orchestrator: OrderOrchestrator,
    config: Arc<Config>,
    running: AtomicBool,
    status: RwLock<JobStatus>,
    trigger_now: Notify,
}

impl StrategyWorker {
    pub fn new(db: Database, gateways: Arc<GatewayRegistry>, config: Arc<Config>) -> Self {
        Self {
            orchestrator: OrderOrchestrator::new(db.clone()),
            db,
            gateways,
            config,
            running: AtomicBool::new(false),
            status: RwLock::new(JobStatus::default()),
            trigger_now: Notify::new(),
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status.read().clone()
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn trigger_now(&self) {
        self.trigger_now.notify_one();
    }

    /// Runs forever until `stop()` is called. Intended to be spawned as
    /// one long-lived tokio task from `main`.
    pub async fn run(self: Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        let mut ticker = interval(Duration::from_secs(self.config.strategy_check_interval_minutes as u64 * 60));

        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.trigger_now.notified() => {}
            }
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            self.tick().await;
        }
    }

    async fn tick(&self) {
        let now = Utc::now();
        self.maybe_reset_pnl_windows(now).await;

        let strategies = match self.db.list_active_strategies().await {
            Ok(list) => list,
            Err(e) => {
                error!(%e, "failed to list active strategies");
                self.status.write().last_error = Some(e.to_string());
                return;
            }
        };

        let mut evaluated = 0u32;
        for strategy in strategies {
            // Isolate failures per strategy: one bad document or one
            // flaky exchange call must not stop the rest of the tick.
            if let Err(e) = self.tick_one(&strategy, now).await {
                warn!(strategy_id = %strategy.id, %e, "strategy tick failed");
                continue;
            }
            evaluated += 1;
        }

        let mut status = self.status.write();
        status.running = self.running.load(Ordering::SeqCst);
        status.last_tick_at = Some(now);
        status.last_tick_strategies_evaluated = evaluated;
        status.last_error = None;
    }

    async fn tick_one(&self, strategy: &Strategy, now: chrono::DateTime<Utc>) -> anyhow::Result<()> {
        if strategy.tracking.needs_repair {
            debug!(strategy_id = %strategy.id, "skipping strategy flagged needs_repair");
            return Ok(());
        }

        let guard = match LeaseGuard::acquire(&self.db, &strategy.id, self.config.lease_ttl_seconds).await {
            Ok(guard) => guard,
            Err(_) => return Ok(()), // another worker tick already holds this lease
        };

        let outcome = tokio::time::timeout(Duration::from_millis(self.config.evaluation_deadline_ms), self.evaluate_and_execute(strategy, now)).await;

        guard.release().await.ok();

        match outcome {
            Ok(result) => result,
            Err(_) => anyhow::bail!("evaluation exceeded the {}ms deadline", self.config.evaluation_deadline_ms),
        }
    }

    async fn evaluate_and_execute(&self, strategy: &Strategy, now: chrono::DateTime<Utc>) -> anyhow::Result<()> {
        let gateway = self
            .gateways
            .get(&strategy.exchange_id)
            .ok_or_else(|| anyhow::anyhow!("no gateway registered for exchange {}", strategy.exchange_id))?;

        // Credential resolution is the Credential Vault's job; the
        // worker only needs a `Credential` handle to call the gateway.
        let credential = crate::gateway::resolve_credential(
            &self.db,
            &self.config.credential_encryption_key,
            &strategy.user_id,
            &strategy.exchange_id,
            strategy.link_id.as_deref(),
        )
        .await?;

        let ticker = gateway.fetch_ticker(&credential, &strategy.token).await?;
        let position = self.db.get_position(&strategy.user_id, &strategy.exchange_id, &strategy.token).await?;

        let market_data = MarketData { volume_24h: ticker.volume_24h, change_24h: ticker.change_24h };
        let outcome = evaluate(&strategy.rules, &strategy.tracking, position.entry_price, ticker.last, position.amount, &market_data, now);

        if let Some(update) = outcome.trailing_update {
            self.db.update_trailing(&strategy.id, update).await?;
        }

        if outcome.pause_requested {
            self.db.set_paused(&strategy.id).await?;
            self.db.notify(&strategy.user_id, NotificationKind::StrategyPaused, &format!("strategy {} paused: circuit breaker tripped", strategy.name)).await.ok();
            return Ok(());
        }

        if !outcome.decision.should_trigger {
            return Ok(());
        }

        let balances = gateway.fetch_balances(&credential).await.unwrap_or_default();
        let available_usd = balances.iter().find(|b| b.asset == "USDT" || b.asset == "USD").map(|b| b.free).unwrap_or(0.0);

        match self
            .orchestrator
            .execute(strategy, gateway, &credential, &outcome.decision, ticker.last, position.amount, available_usd)
            .await
        {
            Ok(OrchestratorOutcome::Filled { order_ref, filled_amount, average_price }) => {
                // Cooldown (and trailing-stop reset on a TRAILING_STOP fill)
                // are applied atomically inside `persist_execution` itself.
                self.db
                    .notify(
                        &strategy.user_id,
                        NotificationKind::OrderFilled,
                        &format!("{} filled {} {} @ {} ({})", strategy.name, filled_amount, strategy.token, average_price, order_ref),
                    )
                    .await
                    .ok();
            }
            Ok(OrchestratorOutcome::AlreadyRecorded) => {}
            Ok(OrchestratorOutcome::Rejected(reason)) => {
                warn!(strategy_id = %strategy.id, %reason, "order rejected");
            }
            Err(GatewayError::Auth) => {
                self.db.set_paused(&strategy.id).await?;
                self.db
                    .notify(&strategy.user_id, NotificationKind::StrategyPaused, &format!("strategy {} paused: exchange credentials rejected", strategy.name))
                    .await
                    .ok();
            }
            Err(e) if e.is_retryable() => {
                debug!(strategy_id = %strategy.id, %e, "transient gateway error, will retry next tick");
            }
            Err(e) => return Err(e.into()),
        }

        let _ = BlockReason::None;
        Ok(())
    }

    /// Resets daily/weekly/monthly P&L counters on their own boundary,
    /// checked every tick rather than run as a separate scheduled job.
    async fn maybe_reset_pnl_windows(&self, now: chrono::DateTime<Utc>) {
        let reset_daily = now.hour() == 0 && now.minute() < self.config.strategy_check_interval_minutes;
        let reset_weekly = reset_daily && now.weekday().num_days_from_monday() == 0;
        let reset_monthly = reset_daily && now.day() == 1;
        if reset_daily || reset_weekly || reset_monthly {
            if let Err(e) = self.db.reset_pnl_windows(reset_daily, reset_weekly, reset_monthly).await {
                error!(%e, "failed to reset P&L windows");
            } else {
                info!(reset_daily, reset_weekly, reset_monthly, "reset P&L windows");
            }
        }
    }
}
