//! User accounts table. Password hashing lives in the `auth` module;
//! this is pure storage.

use super::Database;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    User,
    Admin,
}

impl UserRole {
    fn as_str(&self) -> &'static str {
        match self {
            UserRole::User => "user",
            UserRole::Admin => "admin",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "admin" => UserRole::Admin,
            _ => UserRole::User,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
}

fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        id: row.get("id")?,
        email: row.get("email")?,
        password_hash: row.get("password_hash")?,
        role: UserRole::from_str(&row.get::<_, String>("role")?),
        created_at: DateTime::parse_from_rfc3339(&row.get::<_, String>("created_at")?)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

impl Database {
    pub async fn create_user(&self, email: &str, password_hash: &str) -> Result<UserRecord, rusqlite::Error> {
        let conn = self.conn.lock().await;
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        conn.execute(
            "INSERT INTO users (id, email, password_hash, role, created_at, updated_at) VALUES (?1, ?2, ?3, 'user', ?4, ?4)",
            params![id, email, password_hash, now.to_rfc3339()],
        )?;
        Ok(UserRecord { id, email: email.to_string(), password_hash: password_hash.to_string(), role: UserRole::User, created_at: now })
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, rusqlite::Error> {
        let conn = self.conn.lock().await;
        conn.query_row("SELECT * FROM users WHERE email = ?1", params![email], row_to_user).optional()
    }

    pub async fn get_user_by_id(&self, id: &str) -> Result<Option<UserRecord>, rusqlite::Error> {
        let conn = self.conn.lock().await;
        conn.query_row("SELECT * FROM users WHERE id = ?1", params![id], row_to_user).optional()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_lookup_by_email() {
        let db = Database::open(":memory:").unwrap();
        db.migrate().await.unwrap();
        db.create_user("a@example.com", "hashed").await.unwrap();
        let found = db.get_user_by_email("a@example.com").await.unwrap();
        assert!(found.is_some());
        assert_eq!(found.unwrap().role, UserRole::User);
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let db = Database::open(":memory:").unwrap();
        db.migrate().await.unwrap();
        db.create_user("a@example.com", "hashed").await.unwrap();
        assert!(db.create_user("a@example.com", "other").await.is_err());
    }
}
