//! Task Graph Module
//!
//! Provides the data structures and utilities that turn one run
//! configuration into a validated, topologically ordered task graph.
//!
//! # Structure
//!
//! - [`model`]: Core data structures (Task, Action, TaskGraph)
//! - [`wildcards`]: Wildcard patterns and binding expansion
//! - [`layout`]: Every path the pipeline reads and writes
//! - [`builder`]: Rule expansion into concrete tasks
//! - [`dependencies`]: Link derivation from declared paths, YAML export
//! - [`validator`]: Validation rules and topological sorting
//! - [`planner`]: Execution planning and scheduling
//! - [`state`]: Fingerprints of completed tasks across runs

pub mod builder;
pub mod dependencies;
pub mod layout;
pub mod model;
pub mod planner;
pub mod state;
pub mod validator;
pub mod wildcards;

pub use builder::{build_task_graph, target_tasks, TARGETS};
pub use dependencies::save_graph;
pub use layout::{CleanScope, Layout};
pub use model::{Action, Task, TaskGraph, ToolBundle};
pub use planner::{ExecutionPlanner, TaskStatus};
pub use state::RunState;
pub use wildcards::{expand_bindings, Bindings};
