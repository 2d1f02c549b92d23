//! Registration and login against the shared `Database`: bcrypt for
//! password hashing, everything else delegated to `db::users`.

use crate::db::users::UserRecord;
use crate::db::Database;
use anyhow::{anyhow, Result};
use bcrypt::{hash, verify, DEFAULT_COST};

pub struct UserStore {
    db: Database,
}

impl UserStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn register(&self, email: &str, password: &str) -> Result<UserRecord> {
        if password.len() < 8 {
            return Err(anyhow!("password must be at least 8 characters"));
        }
        let password_hash = hash(password, DEFAULT_COST)?;
        let user = self.db.create_user(email, &password_hash).await.map_err(|_| anyhow!("email already registered"))?;
        Ok(user)
    }

    pub async fn authenticate(&self, email: &str, password: &str) -> Result<UserRecord> {
        let user = self.db.get_user_by_email(email).await?.ok_or_else(|| anyhow!("invalid email or password"))?;
        if !verify(password, &user.password_hash)? {
            return Err(anyhow!("invalid email or password"));
        }
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> UserStore {
        let db = Database::open(":memory:").unwrap();
        db.migrate().await.unwrap();
        UserStore::new(db)
    }

    #[tokio::test]
    async fn register_then_authenticate() {
        let store = store().await;
        store.register("a@example.com", "correct-horse").await.unwrap();
        let user = store.authenticate("a@example.com", "correct-horse").await.unwrap();
        assert_eq!(user.email, "a@example.com");
    }

    #[tokio::test]
    async fn authenticate_rejects_wrong_password() {
        let store = store().await;
        store.register("a@example.com", "correct-horse").await.unwrap();
        assert!(store.authenticate("a@example.com", "wrong-password").await.is_err());
    }

    #[tokio::test]
    async fn register_rejects_short_passwords() {
        let store = store().await;
        assert!(store.register("a@example.com", "short").await.is_err());
    }

    #[tokio::test]
    async fn register_rejects_duplicate_email() {
        let store = store().await;
        store.register("a@example.com", "correct-horse").await.unwrap();
        assert!(store.register("a@example.com", "another-pass").await.is_err());
    }
}
