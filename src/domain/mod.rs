//! The Strategy Engine core: rules, tracking state, the pure Trigger
//! Evaluator, and position accounting math. Nothing in this module touches
//! the database or the network — persistence and I/O live in `db` and
//! `gateway`, and are driven by the `worker` module.

pub mod decision;
pub mod evaluator;
pub mod position;
pub mod rules;
pub mod tracking;

pub use decision::{ActionType, BlockReason, Decision, DecisionReason, EvaluationOutcome};
pub use rules::Rules;
pub use tracking::Tracking;
