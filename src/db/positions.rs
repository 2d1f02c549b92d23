//! Position Ledger: the exchange-synced view of what a user actually
//! holds, recomputed through the weighted-entry math in `domain::position`
//! rather than trusted verbatim from the exchange.

use super::Database;
use crate::domain::position::Position;
use crate::errors::LedgerError;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

fn row_to_position(row: &rusqlite::Row) -> rusqlite::Result<Position> {
    let purchases_json: String = row.get("purchases_json")?;
    let sales_json: String = row.get("sales_json")?;
    Ok(Position {
        user_id: row.get("user_id")?,
        exchange_id: row.get("exchange_id")?,
        token: row.get("token")?,
        amount: row.get("amount")?,
        entry_price: row.get("entry_price")?,
        total_invested: row.get("total_invested")?,
        purchases: serde_json::from_str(&purchases_json).unwrap_or_default(),
        sales: serde_json::from_str(&sales_json).unwrap_or_default(),
        is_active: row.get::<_, i64>("is_active")? == 1,
    })
}

impl Database {
    pub async fn get_position(&self, user_id: &str, exchange_id: &str, token: &str) -> Result<Position, LedgerError> {
        let conn = self.conn.lock().await;
        let existing = conn
            .query_row(
                "SELECT * FROM positions WHERE user_id = ?1 AND exchange_id = ?2 AND token = ?3",
                params![user_id, exchange_id, token],
                row_to_position,
            )
            .optional()?;
        Ok(existing.unwrap_or_else(|| Position::empty(user_id, exchange_id, token)))
    }

    fn save_position(&self, conn: &rusqlite::Connection, position: &Position) -> Result<(), LedgerError> {
        conn.execute(
            "INSERT INTO positions (id, user_id, exchange_id, token, amount, entry_price, total_invested, purchases_json, sales_json, is_active, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(user_id, exchange_id, token) DO UPDATE SET
                amount = excluded.amount,
                entry_price = excluded.entry_price,
                total_invested = excluded.total_invested,
                purchases_json = excluded.purchases_json,
                sales_json = excluded.sales_json,
                is_active = excluded.is_active,
                updated_at = excluded.updated_at",
            params![
                uuid::Uuid::new_v4().to_string(),
                position.user_id,
                position.exchange_id,
                position.token,
                position.amount,
                position.entry_price,
                position.total_invested,
                serde_json::to_string(&position.purchases).unwrap(),
                serde_json::to_string(&position.sales).unwrap(),
                position.is_active,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub async fn record_buy(
        &self,
        user_id: &str,
        exchange_id: &str,
        token: &str,
        amount: f64,
        price: f64,
        order_ref: &str,
        at: DateTime<Utc>,
    ) -> Result<Position, LedgerError> {
        let conn = self.conn.lock().await;
        let mut position = conn
            .query_row(
                "SELECT * FROM positions WHERE user_id = ?1 AND exchange_id = ?2 AND token = ?3",
                params![user_id, exchange_id, token],
                row_to_position,
            )
            .optional()?
            .unwrap_or_else(|| Position::empty(user_id, exchange_id, token));

        position.apply_buy(amount, price, order_ref, at);
        self.save_position(&conn, &position)?;
        Ok(position)
    }

    pub async fn record_sell(
        &self,
        user_id: &str,
        exchange_id: &str,
        token: &str,
        amount: f64,
        price: f64,
        order_ref: &str,
        at: DateTime<Utc>,
    ) -> Result<Position, LedgerError> {
        let conn = self.conn.lock().await;
        let mut position = conn
            .query_row(
                "SELECT * FROM positions WHERE user_id = ?1 AND exchange_id = ?2 AND token = ?3",
                params![user_id, exchange_id, token],
                row_to_position,
            )
            .optional()?
            .ok_or(LedgerError::InsufficientPosition { available: 0.0, requested: amount })?;

        position.apply_sell(amount, price, order_ref, at)?;
        self.save_position(&conn, &position)?;
        Ok(position)
    }

    /// Reconciles the ledger's view with a fresh exchange balance read.
    /// The exchange is authoritative on *amount held*; cost-basis history
    /// (entry price, purchases/sales) is ours alone and is left
    /// untouched unless the exchange reports zero, which closes the
    /// position — or the position was previously empty, in which case
    /// `current_price` seeds a starting cost basis so P&L on a later sale
    /// isn't computed against an entry price of zero.
    pub async fn sync_from_exchange(&self, user_id: &str, exchange_id: &str, token: &str, exchange_amount: f64, current_price: f64) -> Result<Position, LedgerError> {
        let conn = self.conn.lock().await;
        let mut position = conn
            .query_row(
                "SELECT * FROM positions WHERE user_id = ?1 AND exchange_id = ?2 AND token = ?3",
                params![user_id, exchange_id, token],
                row_to_position,
            )
            .optional()?
            .unwrap_or_else(|| Position::empty(user_id, exchange_id, token));

        let was_empty = position.amount <= 0.0;
        position.amount = exchange_amount;
        position.is_active = exchange_amount > 0.0;
        if exchange_amount <= 0.0 {
            position.entry_price = 0.0;
            position.total_invested = 0.0;
        } else if was_empty && current_price > 0.0 {
            position.entry_price = current_price;
            position.total_invested = exchange_amount * current_price;
        }

        self.save_position(&conn, &position)?;
        Ok(position)
    }

    pub async fn list_positions_for_user(&self, user_id: &str) -> Result<Vec<Position>, LedgerError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT * FROM positions WHERE user_id = ?1 AND is_active = 1")?;
        let rows = stmt.query_map(params![user_id], row_to_position)?;
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

    async fn test_db() -> Database {
        let db = Database::open(":memory:").unwrap();
        db.migrate().await.unwrap();
        db
    }

    #[tokio::test]
    async fn record_buy_creates_and_persists_a_position() {
        let db = test_db().await;
        let now = Utc::now();
        db.record_buy("u1", "simulated", "BTC", 0.3, 44000.0, "o1", now).await.unwrap();
        let position = db.record_buy("u1", "simulated", "BTC", 0.2, 47500.0, "o2", now).await.unwrap();

        assert!((position.amount - 0.5).abs() < 1e-9);
        assert!((position.entry_price - 45400.0).abs() < 1e-6);
        assert!((position.total_invested - 22700.0).abs() < 1e-6);

        let fetched = db.get_position("u1", "simulated", "BTC").await.unwrap();
        assert!((fetched.amount - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn record_sell_without_a_position_is_an_error() {
        let db = test_db().await;
        let result = db.record_sell("u1", "simulated", "BTC", 1.0, 100.0, "o1", Utc::now()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn sync_from_exchange_closes_a_position_reported_as_zero() {
        let db = test_db().await;
        db.record_buy("u1", "simulated", "BTC", 1.0, 100.0, "o1", Utc::now()).await.unwrap();
        let position = db.sync_from_exchange("u1", "simulated", "BTC", 0.0, 0.0).await.unwrap();
        assert!(!position.is_active);
        assert_eq!(position.total_invested, 0.0);
    }

    #[tokio::test]
    async fn sync_from_exchange_seeds_entry_price_for_a_newly_discovered_position() {
        let db = test_db().await;
        let position = db.sync_from_exchange("u1", "simulated", "ETH", 2.0, 3000.0).await.unwrap();
        assert!((position.entry_price - 3000.0).abs() < 1e-9);
        assert!((position.total_invested - 6000.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn sync_from_exchange_does_not_overwrite_an_existing_cost_basis() {
        let db = test_db().await;
        db.record_buy("u1", "simulated", "BTC", 1.0, 100.0, "o1", Utc::now()).await.unwrap();
        let position = db.sync_from_exchange("u1", "simulated", "BTC", 1.0, 500.0).await.unwrap();
        assert!((position.entry_price - 100.0).abs() < 1e-9);
    }
}
