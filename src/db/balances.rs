//! Balance snapshot history, written by the Balance Snapshot Pipeline
//! and read back by the balances API.

use super::Database;
use crate::gateway::Balance;
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub exchange_id: String,
    pub asset: String,
    pub free: f64,
    pub locked: f64,
    pub snapshot_at: DateTime<Utc>,
}

/// One exchange's contribution to a user's total balance, aggregated to
/// USD/BRL by the Balance Snapshot Pipeline. `success = false` means the
/// pipeline couldn't reach this exchange on the latest tick; `total_usd`/
/// `total_brl` are carried over as zero rather than omitted, so a client
/// iterating the list doesn't need a special case for a missing entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeBalanceSnapshot {
    pub exchange_id: String,
    pub exchange_name: String,
    pub total_usd: f64,
    pub total_brl: f64,
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserBalanceSnapshot {
    pub total_usd: f64,
    pub total_brl: f64,
    pub exchanges: Vec<ExchangeBalanceSnapshot>,
    pub snapshot_at: DateTime<Utc>,
}

impl Database {
    /// Records one exchange's aggregated totals for a snapshot run. Every
    /// linked exchange gets exactly one row per tick, whether or not the
    /// pull succeeded, so `latest_user_snapshot` always has something to
    /// report for every link.
    pub async fn record_exchange_snapshot(
        &self,
        user_id: &str,
        exchange_id: &str,
        exchange_name: &str,
        total_usd: f64,
        total_brl: f64,
        success: bool,
        at: DateTime<Utc>,
    ) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO balance_snapshots (user_id, exchange_id, exchange_name, total_usd, total_brl, success, snapshot_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![user_id, exchange_id, exchange_name, total_usd, total_brl, success, at.to_rfc3339()],
        )?;
        Ok(())
    }

    /// The most recent snapshot run across every exchange linked to
    /// `user_id`, aggregated into a single USD/BRL total plus the
    /// per-exchange breakdown. `None` if the pipeline hasn't run yet for
    /// this user.
    pub async fn latest_user_snapshot(&self, user_id: &str) -> Result<Option<UserBalanceSnapshot>, rusqlite::Error> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT exchange_id, exchange_name, total_usd, total_brl, success, snapshot_at FROM balance_snapshots b
             WHERE user_id = ?1 AND snapshot_at = (SELECT MAX(snapshot_at) FROM balance_snapshots WHERE user_id = ?1)
             ORDER BY exchange_id",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            let snapshot_at: String = row.get(5)?;
            Ok((
                ExchangeBalanceSnapshot {
                    exchange_id: row.get(0)?,
                    exchange_name: row.get(1)?,
                    total_usd: row.get(2)?,
                    total_brl: row.get(3)?,
                    success: row.get::<_, i64>(4)? == 1,
                },
                snapshot_at,
            ))
        })?;

        let mut exchanges = Vec::new();
        let mut snapshot_at = None;
        for row in rows {
            let (exchange, at) = row?;
            snapshot_at = Some(at);
            exchanges.push(exchange);
        }

        let Some(snapshot_at) = snapshot_at else {
            return Ok(None);
        };

        let total_usd = exchanges.iter().map(|e| e.total_usd).sum();
        let total_brl = exchanges.iter().map(|e| e.total_brl).sum();
        Ok(Some(UserBalanceSnapshot {
            total_usd,
            total_brl,
            exchanges,
            snapshot_at: DateTime::parse_from_rfc3339(&snapshot_at).map(|dt| dt.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now()),
        }))
    }
}

impl Database {
    pub async fn record_balance_snapshot(&self, user_id: &str, exchange_id: &str, balances: &[Balance]) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().await;
        let now = Utc::now().to_rfc3339();
        for balance in balances {
            conn.execute(
                "INSERT INTO balance_history (user_id, exchange_id, asset, free, locked, snapshot_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![user_id, exchange_id, balance.asset, balance.free, balance.locked, now],
            )?;
        }
        Ok(())
    }

    pub async fn latest_balances(&self, user_id: &str) -> Result<Vec<BalanceSnapshot>, rusqlite::Error> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT exchange_id, asset, free, locked, snapshot_at FROM balance_history b
             WHERE user_id = ?1 AND snapshot_at = (
                SELECT MAX(snapshot_at) FROM balance_history WHERE user_id = ?1 AND exchange_id = b.exchange_id
             )
             ORDER BY exchange_id, asset",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok(BalanceSnapshot {
                exchange_id: row.get(0)?,
                asset: row.get(1)?,
                free: row.get(2)?,
                locked: row.get(3)?,
                snapshot_at: DateTime::parse_from_rfc3339(&row.get::<_, String>(4)?)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub async fn balance_history(&self, user_id: &str, exchange_id: &str, limit: i64) -> Result<Vec<BalanceSnapshot>, rusqlite::Error> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT exchange_id, asset, free, locked, snapshot_at FROM balance_history
             WHERE user_id = ?1 AND exchange_id = ?2 ORDER BY snapshot_at DESC LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![user_id, exchange_id, limit], |row| {
            Ok(BalanceSnapshot {
                exchange_id: row.get(0)?,
                asset: row.get(1)?,
                free: row.get(2)?,
                locked: row.get(3)?,
                snapshot_at: DateTime::parse_from_rfc3339(&row.get::<_, String>(4)?)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_and_reads_back_latest() {
        let db = Database::open(":memory:").unwrap();
        db.migrate().await.unwrap();
        db.record_balance_snapshot("u1", "binance", &[Balance { asset: "USDT".to_string(), free: 100.0, locked: 0.0 }]).await.unwrap();

        let latest = db.latest_balances("u1").await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].asset, "USDT");
    }

    #[tokio::test]
    async fn latest_user_snapshot_aggregates_across_exchanges() {
        let db = Database::open(":memory:").unwrap();
        db.migrate().await.unwrap();
        let now = Utc::now();
        db.record_exchange_snapshot("u1", "binance", "Binance", 1000.0, 5000.0, true, now).await.unwrap();
        db.record_exchange_snapshot("u1", "kraken", "Kraken", 250.0, 1250.0, false, now).await.unwrap();

        let snapshot = db.latest_user_snapshot("u1").await.unwrap().unwrap();
        assert_eq!(snapshot.exchanges.len(), 2);
        assert!((snapshot.total_usd - 1250.0).abs() < 1e-9);
        assert!((snapshot.total_brl - 6250.0).abs() < 1e-9);
        assert!(!snapshot.exchanges.iter().find(|e| e.exchange_id == "kraken").unwrap().success);
    }

    #[tokio::test]
    async fn latest_user_snapshot_only_considers_the_most_recent_run() {
        let db = Database::open(":memory:").unwrap();
        db.migrate().await.unwrap();
        let earlier = Utc::now() - chrono::Duration::hours(4);
        let now = Utc::now();
        db.record_exchange_snapshot("u1", "binance", "Binance", 100.0, 500.0, true, earlier).await.unwrap();
        db.record_exchange_snapshot("u1", "binance", "Binance", 200.0, 1000.0, true, now).await.unwrap();

        let snapshot = db.latest_user_snapshot("u1").await.unwrap().unwrap();
        assert_eq!(snapshot.exchanges.len(), 1);
        assert!((snapshot.total_usd - 200.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn latest_user_snapshot_is_none_before_the_pipeline_has_run() {
        let db = Database::open(":memory:").unwrap();
        db.migrate().await.unwrap();
        assert!(db.latest_user_snapshot("u1").await.unwrap().is_none());
    }
}
