//! Strategy engine backend: a multi-tenant crypto-trading service that
//! evaluates per-strategy trigger rules on a periodic cadence and
//! executes orders through a polymorphic exchange gateway.

use anyhow::{Context, Result};
use std::sync::Arc;
use strategy_engine_backend::config::Config;
use strategy_engine_backend::db::Database;
use strategy_engine_backend::gateway::GatewayRegistry;
use strategy_engine_backend::state::AppState;
use strategy_engine_backend::worker::{SnapshotPipeline, StrategyWorker};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "strategy_engine_backend=info,tower_http=warn".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env().context("loading configuration")?);

    let db = Database::open(&config.database_uri).context("opening database")?;
    db.migrate().await.context("running migrations")?;
    info!(database_uri = %config.database_uri, "database ready");

    let gateways = Arc::new(GatewayRegistry::new(&config));

    let strategy_worker = Arc::new(StrategyWorker::new(db.clone(), gateways.clone(), config.clone()));
    let snapshot_pipeline = Arc::new(SnapshotPipeline::new(db.clone(), gateways.clone(), config.clone()));

    let state = AppState::new(db, config, gateways, strategy_worker, snapshot_pipeline);

    tokio::spawn({
        let worker = state.strategy_worker.clone();
        async move { worker.run().await }
    });
    tokio::spawn({
        let pipeline = state.snapshot_pipeline.clone();
        async move { pipeline.run().await }
    });

    let addr = format!("0.0.0.0:{}", state.config.port);
    let app = strategy_engine_backend::api::build_router(state.clone());

    let listener = TcpListener::bind(&addr).await.context("binding listener")?;
    info!(%addr, dry_run = state.config.strategy_dry_run, "strategy engine listening");

    axum::serve(listener, app).await.context("server error")
}
