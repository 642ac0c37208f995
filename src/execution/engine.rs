//! Task Graph Execution Engine
//!
//! The core engine that orchestrates a run including:
//! - Parallel task scheduling under job and core budgets
//! - Incremental skipping of up-to-date tasks
//! - Failure isolation: a failed task blocks only its dependents
//! - Resource monitoring
//! - State persistence after every finished task

use std::collections::HashSet;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use colored::Colorize;
use log::{debug, error, info, warn};

use crate::config::RunConfig;
use crate::environment::Toolchain;
use crate::error::{NeError, Result};
use crate::monitoring::{EventType, ExecutionTimeline, ResourceMonitor};
use crate::workflow::{
    build_task_graph, target_tasks, ExecutionPlanner, Layout, RunState, Task, TaskStatus,
};

use super::step::execute_task;

/// Interval for resource monitoring samples.
const MONITOR_SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

const TIMELINE_FILE: &str = "timeline.txt";

/// Outcome of one requested target.
#[derive(Debug, Clone)]
pub struct TargetOutcome {
    pub target: String,
    /// Tasks producing the target
    pub tasks: Vec<String>,
    /// First unsuccessful status among `tasks`, else completed or up to date
    pub status: TaskStatus,
}

/// What a run did, per task class and per target.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub targets: Vec<TargetOutcome>,
    pub executed: usize,
    pub skipped: usize,
    /// `(task id, error)` of every failed task
    pub failed: Vec<(String, String)>,
    pub blocked: usize,
    pub elapsed: Duration,
}

impl RunSummary {
    /// True if every requested target was produced or already up to date.
    pub fn success(&self) -> bool {
        self.targets.iter().all(|t| t.status.is_success())
    }

    /// Prints the per-target report.
    pub fn print(&self) {
        println!();
        for outcome in &self.targets {
            let status = match &outcome.status {
                TaskStatus::Completed => "done".green().bold(),
                TaskStatus::Skipped => "up to date".green(),
                TaskStatus::Failed(_) => "FAILED".red().bold(),
                TaskStatus::Blocked(upstream) => format!("BLOCKED by {}", upstream).red(),
                other => other.label().yellow(),
            };
            println!("  {:10} {}", outcome.target.bold(), status);
        }

        println!();
        println!(
            "{} executed, {} up to date, {} failed, {} blocked in {:.2?}",
            self.executed,
            self.skipped,
            self.failed.len(),
            self.blocked,
            self.elapsed
        );
        for (task, error) in &self.failed {
            println!("  {} {}: {}", "failed".red(), task, error);
        }
    }
}

/// Run execution engine.
///
/// Manages the complete lifecycle of a run from graph construction to the
/// final summary, handling parallelization, resource budgets, and state
/// persistence.
///
/// # Example
///
/// ```rust,no_run
/// use nerunner::config::load_config;
/// use nerunner::execution::Engine;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = load_config("config.json")?;
///     let mut engine = Engine::new(config);
///     engine.set_max_parallel(4);
///     engine.set_targets(vec!["msmc".to_string()]);
///
///     let summary = engine.run()?;
///     summary.print();
///     Ok(())
/// }
/// ```
pub struct Engine {
    config: Arc<RunConfig>,
    toolchain: Toolchain,
    max_parallel: usize,
    cores: usize,
    dry_run: bool,
    force: bool,
    targets: Vec<String>,
}

impl Engine {
    /// Creates an engine that calls the real external tools.
    pub fn new(config: RunConfig) -> Self {
        let toolchain = Toolchain::from_config(&config);
        Self::with_toolchain(config, toolchain)
    }

    /// Creates an engine with a prepared toolchain.
    pub fn with_toolchain(config: RunConfig, toolchain: Toolchain) -> Self {
        Self {
            max_parallel: config.cores,
            cores: config.cores,
            config: Arc::new(config),
            toolchain,
            dry_run: false,
            force: false,
            targets: vec!["all".to_string()],
        }
    }

    /// Sets the maximum number of concurrently running tasks.
    pub fn set_max_parallel(&mut self, max: usize) {
        self.max_parallel = max.max(1);
    }

    /// Sets the core budget shared by running tasks.
    pub fn set_cores(&mut self, cores: usize) {
        self.cores = cores.max(1);
    }

    /// Enables or disables dry run mode.
    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.dry_run = dry_run;
    }

    /// Reruns every selected task regardless of its outputs.
    pub fn set_force(&mut self, force: bool) {
        self.force = force;
    }

    /// Sets the named targets to build; empty means `all`.
    pub fn set_targets(&mut self, targets: Vec<String>) {
        self.targets = if targets.is_empty() {
            vec!["all".to_string()]
        } else {
            targets
        };
    }

    /// Executes the run.
    ///
    /// This is the main entry point that:
    /// 1. Builds the task graph and restricts it to the requested targets
    /// 2. Loads the state of earlier runs
    /// 3. Skips up-to-date tasks and executes the rest in parallel
    /// 4. Saves state after each task
    /// 5. Reports results per target
    ///
    /// # Returns
    ///
    /// * `Ok(summary)` - The run finished; failed branches are in the summary
    /// * `Err` - Configuration, graph or state errors stopped the run
    pub fn run(&mut self) -> Result<RunSummary> {
        let start_time = Instant::now();

        let per_target = self
            .targets
            .iter()
            .map(|t| target_tasks(t))
            .collect::<Result<Vec<_>>>()?;
        let requested: Vec<String> = per_target.iter().flatten().cloned().collect();

        let graph = build_task_graph(&self.config)?
            .select(&requested)
            .map_err(NeError::graph)?;

        let layout = Layout::new(&self.config.output_root);
        let mut state = RunState::load_or_new(layout.root());
        if state.is_resume() {
            info!(
                "Resuming: {} task(s) recorded, {} failed last time",
                state.completed.len(),
                state.failed.len()
            );
        }

        let mut timeline = ExecutionTimeline::new();

        info!(
            "Starting execution of {} tasks (max parallel: {}, cores: {}, dry run: {}, force: {})",
            graph.len(),
            self.max_parallel,
            self.cores,
            self.dry_run,
            self.force
        );

        let mut planner = ExecutionPlanner::new(graph, self.max_parallel, self.cores);

        // Create channel for task completion
        let (tx, rx): (Sender<(String, Result<()>)>, Receiver<(String, Result<()>)>) = channel();

        // Start resource monitoring
        let monitor_running = Arc::new(AtomicBool::new(true));
        let monitor_flag = Arc::clone(&monitor_running);

        let monitor_handle = thread::spawn(move || {
            let mut monitor = ResourceMonitor::new();
            while monitor_flag.load(Ordering::Relaxed) {
                monitor.sample();
                thread::sleep(MONITOR_SAMPLE_INTERVAL);
            }
            monitor
        });

        // Tasks that ran (or would run) in this invocation
        let mut dirty: HashSet<String> = HashSet::new();
        let mut running_count = 0;
        let mut skipped = 0;
        let mut failed = Vec::new();
        let mut blocked = 0;

        // Main execution loop
        loop {
            // Schedule ready tasks
            loop {
                let ready_tasks = planner.get_ready_tasks();
                if ready_tasks.is_empty() {
                    break;
                }

                for task in ready_tasks {
                    if !self.needs_run(&task, &state, &dirty) {
                        debug!("Task '{}' is up to date", task.id);
                        planner.mark_task_skipped(&task.id);
                        skipped += 1;
                        continue;
                    }

                    info!("Starting task: {}", task.id);
                    timeline.add_event(task.id.clone(), EventType::Started);
                    planner.mark_task_running(&task.id);
                    dirty.insert(task.id.clone());

                    if self.dry_run {
                        print_dry_run(&task);
                        timeline.add_event(task.id.clone(), EventType::Completed);
                        planner.mark_task_completed(&task.id);
                        continue;
                    }

                    // Spawn worker thread
                    let tx = tx.clone();
                    let config = Arc::clone(&self.config);
                    let toolchain = self.toolchain.clone();

                    thread::spawn(move || {
                        let result = execute_task(&task, &config, &toolchain);

                        if let Err(e) = tx.send((task.id.clone(), result)) {
                            error!("Failed to send completion signal: {}", e);
                        }
                    });

                    running_count += 1;
                }
            }

            if running_count == 0 {
                if planner.has_work_remaining() {
                    warn!("No runnable tasks left; {:?} unfinished", planner.progress());
                }
                break;
            }

            // Wait for task completion
            let (task_id, result) = rx
                .recv()
                .map_err(|e| NeError::graph(format!("Failed to receive task completion: {}", e)))?;

            running_count -= 1;

            match result {
                Ok(()) => {
                    let fingerprint = planner
                        .graph()
                        .get_task(&task_id)
                        .map(|t| t.fingerprint.clone())
                        .unwrap_or_default();

                    planner.mark_task_completed(&task_id);
                    let (done, total) = planner.progress();
                    info!(
                        "Task '{}' completed in {:.1}s ({}/{})",
                        task_id,
                        planner.duration_ms(&task_id).unwrap_or(0) as f64 / 1000.0,
                        done,
                        total
                    );
                    timeline.add_event(task_id.clone(), EventType::Completed);
                    state.mark_completed(&task_id, &fingerprint);
                    state.save()?;
                }
                Err(e) => {
                    let bindings = planner
                        .graph()
                        .get_task(&task_id)
                        .map(|t| t.describe_bindings())
                        .unwrap_or_default();
                    error!(
                        "Task '{}' ({}) failed [{}]: {}",
                        task_id,
                        if bindings.is_empty() { "no wildcards" } else { bindings.as_str() },
                        e.category(),
                        e
                    );

                    let message = e.to_string();
                    blocked += planner.mark_task_failed(&task_id, message.clone()).len();
                    timeline.add_event(task_id.clone(), EventType::Failed);
                    state.mark_failed(&task_id, &message);
                    state.save()?;
                    failed.push((task_id, message));
                }
            }
        }

        // Stop monitoring
        monitor_running.store(false, Ordering::Relaxed);
        match monitor_handle.join() {
            Ok(monitor) => info!("{}", monitor.get_summary()),
            Err(_) => warn!("Monitor thread panicked"),
        }

        if !self.dry_run && !dirty.is_empty() {
            let path = layout.state_dir().join(TIMELINE_FILE);
            if let Err(e) = fs::write(&path, timeline.gantt_chart()) {
                warn!("Failed to write timeline {}: {}", path.display(), e);
            }
        }

        let targets = self
            .targets
            .iter()
            .zip(per_target)
            .map(|(target, tasks)| TargetOutcome {
                target: target.clone(),
                status: target_status(&planner, &tasks),
                tasks,
            })
            .collect();

        Ok(RunSummary {
            targets,
            executed: dirty.len() - failed.len(),
            skipped,
            failed,
            blocked,
            elapsed: start_time.elapsed(),
        })
    }

    /// A task runs when forced, when anything upstream ran in this
    /// invocation, or when its outputs are not up to date.
    fn needs_run(&self, task: &Task, state: &RunState, dirty: &HashSet<String>) -> bool {
        task.previous.iter().any(|dep| dirty.contains(dep))
            || task.should_run(self.force, state.fingerprint(&task.id))
    }
}

fn target_status(planner: &ExecutionPlanner, tasks: &[String]) -> TaskStatus {
    let statuses: Vec<TaskStatus> = tasks
        .iter()
        .map(|t| planner.status(t).cloned().unwrap_or(TaskStatus::Pending))
        .collect();

    if let Some(bad) = statuses.iter().find(|s| !s.is_success()) {
        return bad.clone();
    }
    if statuses.contains(&TaskStatus::Completed) {
        TaskStatus::Completed
    } else {
        TaskStatus::Skipped
    }
}

fn print_dry_run(task: &Task) {
    println!();
    println!("[DRY RUN] Task: {}", task.id);
    println!("  Rule: {}", task.rule);
    for input in &task.input {
        println!("  Input: {}", input.display());
    }
    for output in &task.output {
        println!("  Output: {}", output.display());
    }
    println!("  Threads: {}", task.threads);
}
