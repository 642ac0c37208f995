//! NeRunner - Demographic Inference Benchmark Runner
//!
//! Simulates genomes under a catalogued demographic model, runs three
//! effective population size estimators on every replicate and plots their
//! Ne(t) histories against each other. The pipeline is expressed as a task
//! graph and executed incrementally, in parallel, under a core budget.
//!
//! # Architecture
//!
//! - [`config`]: Run configuration, species catalog and seed derivation
//! - [`workflow`]: Task graph construction, validation and planning
//! - [`execution`]: Core execution engine with parallel scheduling
//! - [`environment`]: External programs and the download cache
//! - [`simulation`]: Chromosome simulation and VCF export
//! - [`formats`]: VCF reading and estimator input writers
//! - [`inference`]: Estimator invocation and result conversion
//! - [`plotting`]: Ne(t) plots per tool and combined
//! - [`monitoring`]: Resource usage tracking and execution timeline
//!
//! # Example
//!
//! ```rust,no_run
//! use nerunner::execution::Engine;
//! use nerunner::load_config;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = load_config("config.json")?;
//!
//!     let mut engine = Engine::new(config);
//!     engine.set_targets(vec!["smcpp".to_string()]);
//!
//!     let summary = engine.run()?;
//!     summary.print();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod environment;
pub mod error;
pub mod execution;
pub mod formats;
pub mod inference;
pub mod monitoring;
pub mod plotting;
pub mod simulation;
pub mod workflow;

// Re-export commonly used types
pub use config::{derive_seeds, load_config, RunConfig};
pub use error::{NeError, Result};
pub use execution::engine::{Engine, RunSummary};
pub use inference::Tool;
pub use workflow::{build_task_graph, TaskGraph};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "NeRunner";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_version() {
        assert!(!VERSION.is_empty());
        assert!(VERSION.contains('.'));
    }

    #[test]
    fn test_app_name() {
        assert_eq!(APP_NAME, "NeRunner");
    }

    #[test]
    fn test_module_exports_seeds() {
        assert_eq!(derive_seeds(4711, 3), derive_seeds(4711, 3));
        assert_eq!(derive_seeds(4711, 0).len(), 0);
    }

    #[test]
    fn test_version_format() {
        let parts: Vec<&str> = VERSION.split('.').collect();
        assert!(parts.len() >= 2, "Version should have at least major.minor");
        for part in parts {
            assert!(part.parse::<u32>().is_ok(), "Version components should be numeric");
        }
    }
}
