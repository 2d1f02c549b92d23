//! Persistence layer: a single embedded SQLite database shared behind
//! one connection, following the Credential Vault's connection pattern.
//! Documents with nested structure (a strategy's rules and tracking
//! state) live in JSON columns rather than being normalized out, since
//! they are always read and written as a whole by the Strategy Worker.

pub mod balances;
pub mod crypto;
pub mod exchanges;
pub mod notifications;
pub mod positions;
pub mod strategies;
pub mod users;

use rusqlite::Connection;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct Database {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let db = Self { conn: Arc::new(Mutex::new(conn)) };
        Ok(db)
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().await;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'user',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS exchanges (
                id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS user_exchanges (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id),
                exchange_id TEXT NOT NULL REFERENCES exchanges(id),
                label TEXT,
                api_key_encrypted TEXT NOT NULL,
                api_secret_encrypted TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                UNIQUE(user_id, exchange_id, label)
            );

            CREATE TABLE IF NOT EXISTS strategies (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id),
                exchange_id TEXT NOT NULL,
                link_id TEXT REFERENCES user_exchanges(id),
                token TEXT NOT NULL,
                name TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                rules_json TEXT NOT NULL,
                tracking_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_strategies_user ON strategies(user_id);
            CREATE INDEX IF NOT EXISTS idx_strategies_enabled ON strategies(enabled);

            CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                strategy_id TEXT NOT NULL REFERENCES strategies(id),
                order_ref TEXT NOT NULL,
                action TEXT NOT NULL,
                reason TEXT NOT NULL,
                price REAL NOT NULL,
                amount REAL NOT NULL,
                pnl_usd REAL,
                created_at TEXT NOT NULL,
                UNIQUE(strategy_id, order_ref)
            );

            CREATE TABLE IF NOT EXISTS positions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                exchange_id TEXT NOT NULL,
                token TEXT NOT NULL,
                amount REAL NOT NULL DEFAULT 0,
                entry_price REAL NOT NULL DEFAULT 0,
                total_invested REAL NOT NULL DEFAULT 0,
                purchases_json TEXT NOT NULL DEFAULT '[]',
                sales_json TEXT NOT NULL DEFAULT '[]',
                is_active INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL,
                UNIQUE(user_id, exchange_id, token)
            );

            CREATE TABLE IF NOT EXISTS balance_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                exchange_id TEXT NOT NULL,
                asset TEXT NOT NULL,
                free REAL NOT NULL,
                locked REAL NOT NULL,
                snapshot_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_balance_history_user ON balance_history(user_id, exchange_id, snapshot_at);

            CREATE TABLE IF NOT EXISTS balance_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                exchange_id TEXT NOT NULL,
                exchange_name TEXT NOT NULL,
                total_usd REAL NOT NULL DEFAULT 0,
                total_brl REAL NOT NULL DEFAULT 0,
                success INTEGER NOT NULL DEFAULT 1,
                snapshot_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_balance_snapshots_user ON balance_snapshots(user_id, snapshot_at);

            CREATE TABLE IF NOT EXISTS notifications (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id),
                kind TEXT NOT NULL,
                message TEXT NOT NULL,
                is_read INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id, is_read);",
        )?;

        for (id, name) in [("binance", "Binance"), ("coinbase", "Coinbase"), ("kraken", "Kraken"), ("simulated", "Simulated")] {
            conn.execute(
                "INSERT OR IGNORE INTO exchanges (id, display_name, enabled) VALUES (?1, ?2, 1)",
                rusqlite::params![id, name],
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let db = Database::open(":memory:").unwrap();
        db.migrate().await.unwrap();
        db.migrate().await.unwrap();
    }

    #[tokio::test]
    async fn seeds_the_exchange_catalog() {
        let db = Database::open(":memory:").unwrap();
        db.migrate().await.unwrap();
        let conn = db.conn.lock().await;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM exchanges", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 4);
    }
}
