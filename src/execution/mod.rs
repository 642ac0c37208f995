//! Task Execution Module
//!
//! Provides the execution engine for running a task graph, including
//! parallel scheduling, incremental skipping and failure isolation.
//!
//! # Architecture
//!
//! - [`engine`]: Main execution engine orchestrating runs
//! - [`step`]: Individual task execution logic

pub mod engine;
pub mod step;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{Engine, RunSummary, TargetOutcome};
pub use step::execute_task;
