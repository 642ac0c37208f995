//! Environment Module
//!
//! Resolves the external programs the pipeline calls and manages the
//! shared download cache for genetic maps and tool code.

pub mod cache;
pub mod tools;

pub use cache::{fetch_genetic_map, fetch_msmc, fetch_stairway_plot, is_marker, DownloadCache};
pub use tools::{CommandRunner, ExternalTool, Invocation, ProcessOutput, SystemRunner, Toolchain};
