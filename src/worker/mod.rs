//! Background jobs: the Strategy Worker (Trigger Evaluator tick loop)
//! and the Balance Snapshot Pipeline, plus the lease and order-execution
//! primitives they share.

pub mod lease;
pub mod orchestrator;
pub mod snapshot_pipeline;
pub mod strategy_worker;

pub use orchestrator::{OrchestratorOutcome, OrderOrchestrator};
pub use snapshot_pipeline::SnapshotPipeline;
pub use strategy_worker::StrategyWorker;
