//! Credential Vault storage: the exchange catalog and each user's
//! linked exchange credentials, encrypted at rest via `db::crypto`.

use super::Database;
use crate::db::crypto;
use crate::gateway::Credential;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeInfo {
    pub id: String,
    pub display_name: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkedExchange {
    pub id: String,
    pub user_id: String,
    pub exchange_id: String,
    pub label: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Database {
    pub async fn list_exchange_catalog(&self) -> Result<Vec<ExchangeInfo>, rusqlite::Error> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT id, display_name, enabled FROM exchanges ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(ExchangeInfo {
                id: row.get(0)?,
                display_name: row.get(1)?,
                enabled: row.get::<_, i64>(2)? == 1,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Links an exchange for a user, encrypting the key pair with
    /// `encryption_key` (the configured `CREDENTIAL_ENCRYPTION_KEY`).
    pub async fn link_exchange(
        &self,
        user_id: &str,
        exchange_id: &str,
        label: Option<&str>,
        api_key: &str,
        api_secret: &str,
        encryption_key: &str,
    ) -> Result<LinkedExchange, rusqlite::Error> {
        let conn = self.conn.lock().await;
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO user_exchanges (id, user_id, exchange_id, label, api_key_encrypted, api_secret_encrypted, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                user_id,
                exchange_id,
                label,
                crypto::encrypt(encryption_key, api_key),
                crypto::encrypt(encryption_key, api_secret),
                now.to_rfc3339(),
            ],
        )?;

        Ok(LinkedExchange { id, user_id: user_id.to_string(), exchange_id: exchange_id.to_string(), label: label.map(str::to_string), is_active: true, created_at: now })
    }

    /// Hard delete: removes the credential handle entirely. Prefer
    /// `disconnect_exchange` unless the user is actually revoking the key.
    pub async fn unlink_exchange(&self, link_id: &str, user_id: &str) -> Result<bool, rusqlite::Error> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "DELETE FROM user_exchanges WHERE id = ?1 AND user_id = ?2",
            params![link_id, user_id],
        )?;
        Ok(changed > 0)
    }

    /// Soft delete: clears `is_active` so the Balance Snapshot Pipeline and
    /// Strategy Worker stop touching this link, without discarding the
    /// encrypted credential the way `unlink_exchange` does.
    pub async fn disconnect_exchange(&self, link_id: &str, user_id: &str) -> Result<bool, rusqlite::Error> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE user_exchanges SET is_active = 0 WHERE id = ?1 AND user_id = ?2",
            params![link_id, user_id],
        )?;
        Ok(changed > 0)
    }

    pub async fn list_linked_exchanges(&self, user_id: &str) -> Result<Vec<LinkedExchange>, rusqlite::Error> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, exchange_id, label, is_active, created_at FROM user_exchanges WHERE user_id = ?1",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok(LinkedExchange {
                id: row.get(0)?,
                user_id: row.get(1)?,
                exchange_id: row.get(2)?,
                label: row.get(3)?,
                is_active: row.get::<_, i64>(4)? == 1,
                created_at: DateTime::parse_from_rfc3339(&row.get::<_, String>(5)?)
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

    /// Every *active* linked exchange across every user, for jobs (the
    /// Balance Snapshot Pipeline) that sweep the whole system rather than
    /// one user's account. A disconnected link is skipped entirely.
    pub async fn list_all_linked_exchanges(&self) -> Result<Vec<LinkedExchange>, rusqlite::Error> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT id, user_id, exchange_id, label, is_active, created_at FROM user_exchanges WHERE is_active = 1")?;
        let rows = stmt.query_map([], |row| {
            Ok(LinkedExchange {
                id: row.get(0)?,
                user_id: row.get(1)?,
                exchange_id: row.get(2)?,
                label: row.get(3)?,
                is_active: row.get::<_, i64>(4)? == 1,
                created_at: DateTime::parse_from_rfc3339(&row.get::<_, String>(5)?)
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

    /// Decrypts a linked credential into the opaque `Credential` handle
    /// that `ExchangeGateway` implementors consume. Returns `None` if
    /// the link doesn't belong to `user_id`.
    pub async fn resolve_credential(&self, user_id: &str, link_id: &str, encryption_key: &str) -> Result<Option<Credential>, rusqlite::Error> {
        let conn = self.conn.lock().await;
        let row: Option<(String, String, String)> = conn
            .query_row(
                "SELECT exchange_id, api_key_encrypted, api_secret_encrypted FROM user_exchanges WHERE id = ?1 AND user_id = ?2",
                params![link_id, user_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((exchange_id, api_key_encrypted, api_secret_encrypted)) = row else {
            return Ok(None);
        };

        let api_key = crypto::decrypt(encryption_key, &api_key_encrypted).unwrap_or_default();
        let api_secret = crypto::decrypt(encryption_key, &api_secret_encrypted).unwrap_or_default();

        Ok(Some(Credential { user_id: user_id.to_string(), exchange_id, api_key, api_secret }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn catalog_is_seeded_on_migrate() {
        let db = Database::open(":memory:").unwrap();
        db.migrate().await.unwrap();
        let catalog = db.list_exchange_catalog().await.unwrap();
        assert!(catalog.iter().any(|e| e.id == "binance"));
    }

    #[tokio::test]
    async fn link_and_resolve_round_trips_the_credential() {
        let db = Database::open(":memory:").unwrap();
        db.migrate().await.unwrap();
        db.create_user("a@example.com", "h").await.unwrap();
        let user = db.get_user_by_email("a@example.com").await.unwrap().unwrap();

        let link = db.link_exchange(&user.id, "binance", Some("main"), "key123", "secret456", "enc-key").await.unwrap();
        let resolved = db.resolve_credential(&user.id, &link.id, "enc-key").await.unwrap().unwrap();

        assert_eq!(resolved.api_key, "key123");
        assert_eq!(resolved.api_secret, "secret456");
    }

    #[tokio::test]
    async fn disconnect_exchange_is_soft_and_excludes_from_the_sweep() {
        let db = Database::open(":memory:").unwrap();
        db.migrate().await.unwrap();
        db.create_user("a@example.com", "h").await.unwrap();
        let user = db.get_user_by_email("a@example.com").await.unwrap().unwrap();
        let link = db.link_exchange(&user.id, "binance", None, "key", "secret", "enc-key").await.unwrap();

        assert!(db.disconnect_exchange(&link.id, &user.id).await.unwrap());
        assert!(db.list_all_linked_exchanges().await.unwrap().is_empty());
        // The credential itself still resolves; disconnect is not a delete.
        assert!(db.resolve_credential(&user.id, &link.id, "enc-key").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn resolve_credential_rejects_a_mismatched_user() {
        let db = Database::open(":memory:").unwrap();
        db.migrate().await.unwrap();
        db.create_user("a@example.com", "h").await.unwrap();
        let user = db.get_user_by_email("a@example.com").await.unwrap().unwrap();
        let link = db.link_exchange(&user.id, "binance", None, "key", "secret", "enc-key").await.unwrap();

        let resolved = db.resolve_credential("someone-else", &link.id, "enc-key").await.unwrap();
        assert!(resolved.is_none());
    }
}
