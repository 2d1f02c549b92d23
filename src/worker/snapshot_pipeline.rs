//! Balance Snapshot Pipeline: periodically pulls balances for every
//! linked exchange across every user and records them to history, so
//! the balances API can serve a time series without hitting exchanges
//! on every read.

use crate::config::Config;
use crate::db::Database;
use crate::gateway::GatewayRegistry;
use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::{interval, Duration};
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Default, Serialize)]
pub struct JobStatus {
    pub running: bool,
    pub last_tick_at: Option<chrono::DateTime<Utc>>,
    pub last_tick_exchanges_synced: u32,
    pub last_error: Option<String>,
}

pub struct SnapshotPipeline {
    db: Database,
    gateways: Arc<GatewayRegistry>,
    config: Arc<Config>,
    running: AtomicBool,
    status: RwLock<JobStatus>,
    trigger_now: Notify,
}

impl SnapshotPipeline {
    pub fn new(db: Database, gateways: Arc<GatewayRegistry>, config: Arc<Config>) -> Self {
        Self { db, gateways, config, running: AtomicBool::new(false), status: RwLock::new(JobStatus::default()), trigger_now: Notify::new() }
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

    pub async fn run(self: Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        let mut ticker = interval(Duration::from_secs(self.config.snapshot_interval_hours as u64 * 3600));

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
        let links = match self.db.list_all_linked_exchanges().await {
            Ok(links) => links,
            Err(e) => {
                error!(%e, "failed to list linked exchanges");
                self.status.write().last_error = Some(e.to_string());
                return;
            }
        };

        let catalog: std::collections::HashMap<String, String> = match self.db.list_exchange_catalog().await {
            Ok(catalog) => catalog.into_iter().map(|e| (e.id, e.display_name)).collect(),
            Err(e) => {
                error!(%e, "failed to load exchange catalog");
                std::collections::HashMap::new()
            }
        };

        let mut synced = 0u32;
        for link in links {
            let exchange_name = catalog.get(&link.exchange_id).cloned().unwrap_or_else(|| link.exchange_id.clone());
            // Isolate failures per exchange link: a revoked key on one
            // exchange must not block snapshots for everything else.
            match self.sync_one(&link, &exchange_name, now).await {
                Ok(()) => synced += 1,
                Err(e) => warn!(user_id = %link.user_id, exchange_id = %link.exchange_id, %e, "balance sync failed"),
            }
        }

        let mut status = self.status.write();
        status.running = self.running.load(Ordering::SeqCst);
        status.last_tick_at = Some(now);
        status.last_tick_exchanges_synced = synced;
        status.last_error = None;
    }

    /// Pulls balances, aggregates them to a USD/BRL total, and records
    /// both the per-asset detail and the per-exchange aggregate. A
    /// failure anywhere in the pull still leaves a `success = false`
    /// aggregate row behind, so the balances API can tell "this exchange
    /// is at zero" from "we couldn't reach this exchange" apart.
    async fn sync_one(&self, link: &crate::db::exchanges::LinkedExchange, exchange_name: &str, now: chrono::DateTime<Utc>) -> anyhow::Result<()> {
        let result = self.sync_one_inner(link).await;

        let (total_usd, success) = match &result {
            Ok(total_usd) => (*total_usd, true),
            Err(_) => (0.0, false),
        };
        let total_brl = total_usd * self.config.usd_brl_rate;
        self.db.record_exchange_snapshot(&link.user_id, &link.exchange_id, exchange_name, total_usd, total_brl, success, now).await?;

        result.map(|_| ())
    }

    async fn sync_one_inner(&self, link: &crate::db::exchanges::LinkedExchange) -> anyhow::Result<f64> {
        let gateway = self
            .gateways
            .get(&link.exchange_id)
            .ok_or_else(|| anyhow::anyhow!("no gateway registered for exchange {}", link.exchange_id))?;

        let credential = crate::gateway::resolve_credential(&self.db, &self.config.credential_encryption_key, &link.user_id, &link.exchange_id, Some(&link.id)).await?;

        let balances = gateway.fetch_balances(&credential).await?;
        self.db.record_balance_snapshot(&link.user_id, &link.exchange_id, &balances).await?;
        debug!(user_id = %link.user_id, exchange_id = %link.exchange_id, assets = balances.len(), "balance snapshot recorded");

        // Only reconcile tokens the ledger already tracks (i.e. ones a
        // strategy has traded); a raw wallet balance like USDT is not a
        // position and shouldn't become one just by being held.
        let tracked: std::collections::HashSet<String> = self
            .db
            .list_positions_for_user(&link.user_id)
            .await?
            .into_iter()
            .filter(|p| p.exchange_id == link.exchange_id)
            .map(|p| p.token)
            .collect();

        let mut total_usd = 0.0;
        for balance in &balances {
            let held = balance.free + balance.locked;

            let price = if is_stablecoin(&balance.asset) {
                Some(1.0)
            } else if held > 0.0 || tracked.contains(&balance.asset) {
                match gateway.fetch_ticker(&credential, &balance.asset).await {
                    Ok(ticker) => Some(ticker.last),
                    Err(e) => {
                        warn!(user_id = %link.user_id, exchange_id = %link.exchange_id, asset = %balance.asset, %e, "failed to price held asset, excluding from total");
                        None
                    }
                }
            } else {
                None
            };

            if let Some(price) = price {
                total_usd += held * price;
            }

            if tracked.contains(&balance.asset) {
                self.db.sync_from_exchange(&link.user_id, &link.exchange_id, &balance.asset, balance.free, price.unwrap_or(0.0)).await.ok();
            }
        }

        Ok(total_usd)
    }
}

fn is_stablecoin(asset: &str) -> bool {
    matches!(asset, "USDT" | "USD" | "USDC" | "BUSD")
}
