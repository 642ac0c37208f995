//! Resource Usage Monitoring
//!
//! Samples CPU and memory of the nerunner process together with its direct
//! children. Estimators and the simulator run as child processes, so their
//! load shows up here while they are alive.

use std::time::{Duration, Instant};

use sysinfo::{get_current_pid, Pid, ProcessRefreshKind, System};

/// Memory and CPU of the process tree at one instant.
#[derive(Debug, Clone)]
pub struct ResourceSample {
    pub timestamp: Instant,
    /// Summed CPU usage in percent of one core (may exceed 100)
    pub cpu_usage: f32,
    pub memory_mb: u64,
    /// External tools alive when the sample was taken
    pub child_processes: usize,
}

/// Tracks the process tree rooted at the current process.
///
/// The engine samples from a background thread and logs
/// [`ResourceMonitor::get_summary`] when the run ends.
pub struct ResourceMonitor {
    system: System,
    /// None when the platform can't report our own PID
    root: Option<Pid>,
    samples: Vec<ResourceSample>,
    primed: bool,
    last_sample: Option<Instant>,
    min_interval: Duration,
}

impl ResourceMonitor {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            root: get_current_pid().ok(),
            samples: Vec::new(),
            primed: false,
            last_sample: None,
            min_interval: Duration::from_millis(250),
        }
    }

    /// Sets the minimum interval between recorded samples.
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Refreshes process data and records a sample.
    ///
    /// CPU usage is a delta between two refreshes, so the first call only
    /// primes the counters. Calls closer than `min_interval` are ignored.
    pub fn sample(&mut self) {
        let Some(root) = self.root else {
            return;
        };
        let now = Instant::now();

        if self.primed && self.last_sample.map_or(false, |last| now - last < self.min_interval) {
            return;
        }

        self.system
            .refresh_processes_specifics(ProcessRefreshKind::new().with_cpu().with_memory());
        self.last_sample = Some(now);

        if !self.primed {
            self.primed = true;
            return;
        }

        if let Some(sample) = self.measure(root, now) {
            self.samples.push(sample);
        }
    }

    fn measure(&self, root: Pid, timestamp: Instant) -> Option<ResourceSample> {
        let own = self.system.process(root)?;
        let children: Vec<_> = self
            .system
            .processes()
            .values()
            .filter(|p| p.parent() == Some(root))
            .collect();

        let bytes = own.memory() + children.iter().map(|p| p.memory()).sum::<u64>();
        let cpu = own.cpu_usage() + children.iter().map(|p| p.cpu_usage()).sum::<f32>();

        Some(ResourceSample {
            timestamp,
            cpu_usage: cpu,
            memory_mb: bytes / (1024 * 1024),
            child_processes: children.len(),
        })
    }

    /// One-line summary for the end-of-run log.
    pub fn get_summary(&self) -> String {
        if self.samples.is_empty() {
            return "No resource data collected".to_string();
        }

        format!(
            "Resource usage: average CPU {:.1}%, peak memory {} MB, \
             up to {} external tool(s) at once ({} samples)",
            self.average_cpu(),
            self.peak_memory_mb(),
            self.peak_children(),
            self.samples.len()
        )
    }

    pub fn get_samples(&self) -> &[ResourceSample] {
        &self.samples
    }

    pub fn peak_memory_mb(&self) -> u64 {
        self.samples.iter().map(|s| s.memory_mb).max().unwrap_or(0)
    }

    pub fn peak_children(&self) -> usize {
        self.samples.iter().map(|s| s.child_processes).max().unwrap_or(0)
    }

    pub fn average_cpu(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|s| s.cpu_usage).sum::<f32>() / self.samples.len() as f32
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}
