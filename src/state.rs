//! Shared application state threaded through every axum handler.

use crate::auth::{JwtHandler, UserStore};
use crate::config::Config;
use crate::db::Database;
use crate::gateway::GatewayRegistry;
use crate::worker::{SnapshotPipeline, StrategyWorker};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Arc<Config>,
    pub gateways: Arc<GatewayRegistry>,
    pub jwt_handler: Arc<JwtHandler>,
    pub user_store: Arc<UserStore>,
    pub strategy_worker: Arc<StrategyWorker>,
    pub snapshot_pipeline: Arc<SnapshotPipeline>,
}

impl AppState {
    pub fn new(
        db: Database,
        config: Arc<Config>,
        gateways: Arc<GatewayRegistry>,
        strategy_worker: Arc<StrategyWorker>,
        snapshot_pipeline: Arc<SnapshotPipeline>,
    ) -> Self {
        let jwt_handler = Arc::new(JwtHandler::new(config.jwt_secret.clone()));
        let user_store = Arc::new(UserStore::new(db.clone()));

        Self {
            db,
            config,
            gateways,
            jwt_handler,
            user_store,
            strategy_worker,
            snapshot_pipeline,
        }
    }

    pub fn auth_state(&self) -> crate::auth::api::AuthState {
        crate::auth::api::AuthState { user_store: self.user_store.clone(), jwt_handler: self.jwt_handler.clone() }
    }
}
