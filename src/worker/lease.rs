//! RAII wrapper around the Strategy Store's lease primitives, so a tick
//! can't forget to release what it acquired even if it returns early on
//! an error.

use crate::db::Database;
use crate::errors::StoreError;

pub struct LeaseGuard<'a> {
    db: &'a Database,
    strategy_id: String,
    token: String,
    released: bool,
}

impl<'a> LeaseGuard<'a> {
    pub async fn acquire(db: &'a Database, strategy_id: &str, ttl_seconds: i64) -> Result<Self, StoreError> {
        let token = db.acquire_lease(strategy_id, ttl_seconds).await?;
        Ok(Self { db, strategy_id: strategy_id.to_string(), token, released: false })
    }

    pub async fn renew(&self, ttl_seconds: i64) -> Result<(), StoreError> {
        self.db.renew_lease(&self.strategy_id, &self.token, ttl_seconds).await
    }

    /// Explicit release; `Drop` only logs a warning if this was skipped,
    /// since it can't run an async operation on drop.
    pub async fn release(mut self) -> Result<(), StoreError> {
        self.released = true;
        self.db.release_lease(&self.strategy_id, &self.token).await
    }
}

impl Drop for LeaseGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            tracing::warn!(
                strategy_id = %self.strategy_id,
                "lease guard dropped without an explicit release; it will expire on its own TTL"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Rules;

    #[tokio::test]
    async fn acquiring_twice_without_release_conflicts() {
        let db = Database::open(":memory:").unwrap();
        db.migrate().await.unwrap();
        let strategy = db.create_strategy("u1", "simulated", None, "BTC", "s", Rules::default()).await.unwrap();

        let guard = LeaseGuard::acquire(&db, &strategy.id, 60).await.unwrap();
        assert!(LeaseGuard::acquire(&db, &strategy.id, 60).await.is_err());
        guard.release().await.unwrap();

        assert!(LeaseGuard::acquire(&db, &strategy.id, 60).await.is_ok());
    }
}
