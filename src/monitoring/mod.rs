//! Resource Monitoring Module
//!
//! Tracks process resource usage and the task timeline during a run.
//!
//! # Components
//!
//! - [`ResourceMonitor`]: CPU and memory usage tracking
//! - [`ExecutionTimeline`]: Task start/end timing for Gantt charts

pub mod resource;
pub mod timeline;

pub use resource::{ResourceMonitor, ResourceSample};
pub use timeline::{EventType, ExecutionTimeline, TimelineEvent};
