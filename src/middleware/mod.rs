//! Middleware for observability.
//!
//! This module provides request logging with latency tracking. Per-exchange
//! rate limiting lives in the gateway layer (`gateway::http_adapter`), not
//! here.

pub mod logging;

pub use logging::{request_logging, request_logging_simple};
