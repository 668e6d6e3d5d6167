//! Monitoring engine: run state, per-source workers and the orchestrator.

pub mod orchestrator;
pub mod state;
pub mod stats;
pub mod worker;

pub use orchestrator::Orchestrator;
