//! Notifications: short-lived user-facing messages raised by the
//! Strategy Worker (fills, repairs, pauses) and the Snapshot Pipeline
//! (per-exchange sync failures).

use super::Database;
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    OrderFilled,
    StrategyPaused,
    StrategyNeedsRepair,
    BalanceSyncFailed,
}

impl NotificationKind {
    fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::OrderFilled => "order_filled",
            NotificationKind::StrategyPaused => "strategy_paused",
            NotificationKind::StrategyNeedsRepair => "strategy_needs_repair",
            NotificationKind::BalanceSyncFailed => "balance_sync_failed",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "strategy_paused" => NotificationKind::StrategyPaused,
            "strategy_needs_repair" => NotificationKind::StrategyNeedsRepair,
            "balance_sync_failed" => NotificationKind::BalanceSyncFailed,
            _ => NotificationKind::OrderFilled,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub kind: NotificationKind,
    pub message: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

fn row_to_notification(row: &rusqlite::Row) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        kind: NotificationKind::from_str(&row.get::<_, String>("kind")?),
        message: row.get("message")?,
        is_read: row.get::<_, i64>("is_read")? == 1,
        created_at: DateTime::parse_from_rfc3339(&row.get::<_, String>("created_at")?)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

impl Database {
    pub async fn notify(&self, user_id: &str, kind: NotificationKind, message: &str) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO notifications (id, user_id, kind, message, is_read, created_at) VALUES (?1, ?2, ?3, ?4, 0, ?5)",
            params![uuid::Uuid::new_v4().to_string(), user_id, kind.as_str(), message, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub async fn list_notifications(&self, user_id: &str, unread_only: bool) -> Result<Vec<Notification>, rusqlite::Error> {
        let conn = self.conn.lock().await;
        let sql = if unread_only {
            "SELECT * FROM notifications WHERE user_id = ?1 AND is_read = 0 ORDER BY created_at DESC"
        } else {
            "SELECT * FROM notifications WHERE user_id = ?1 ORDER BY created_at DESC"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![user_id], row_to_notification)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub async fn mark_notification_read(&self, id: &str, user_id: &str) -> Result<bool, rusqlite::Error> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE notifications SET is_read = 1 WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn notify_then_list_unread() {
        let db = Database::open(":memory:").unwrap();
        db.migrate().await.unwrap();
        db.create_user("a@example.com", "h").await.unwrap();
        let user = db.get_user_by_email("a@example.com").await.unwrap().unwrap();

        db.notify(&user.id, NotificationKind::OrderFilled, "bought 0.1 BTC").await.unwrap();
        let unread = db.list_notifications(&user.id, true).await.unwrap();
        assert_eq!(unread.len(), 1);

        db.mark_notification_read(&unread[0].id, &user.id).await.unwrap();
        let unread_after = db.list_notifications(&user.id, true).await.unwrap();
        assert!(unread_after.is_empty());
    }
}
