//! Execution Planner
//!
//! Manages task scheduling including:
//! - Dependency tracking
//! - Parallel job and core budgets
//! - Task status tracking, including blocking the dependents of failures

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use log::{debug, info, warn};

use super::model::{Task, TaskGraph};

/// Status of a task during execution.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskStatus {
    /// Task is waiting for dependencies
    Pending,
    /// Task is currently executing
    Running,
    /// Task completed successfully
    Completed,
    /// Task was not run because its outputs are up to date
    Skipped,
    /// Task failed with error message
    Failed(String),
    /// Task can never run because the named upstream task failed
    Blocked(String),
}

impl TaskStatus {
    /// Whether dependents may proceed.
    pub fn is_success(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Skipped)
    }

    pub fn label(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Skipped => "up to date",
            TaskStatus::Failed(_) => "failed",
            TaskStatus::Blocked(_) => "blocked",
        }
    }
}

/// Status and timing of a single task.
#[derive(Debug, Clone)]
struct TaskMetrics {
    start_time: Option<Instant>,
    duration_ms: Option<u128>,
    status: TaskStatus,
}

impl TaskMetrics {
    fn new() -> Self {
        Self {
            start_time: None,
            duration_ms: None,
            status: TaskStatus::Pending,
        }
    }

    fn finish(&mut self, status: TaskStatus) {
        if let Some(start) = self.start_time {
            self.duration_ms = Some(start.elapsed().as_millis());
        }
        self.status = status;
    }
}

/// Manages execution planning and task scheduling.
///
/// The planner tracks:
/// - Which tasks have succeeded, failed or been blocked
/// - Which tasks are currently running
/// - Resource allocation (jobs and cores)
/// - How long each finished task ran
pub struct ExecutionPlanner {
    graph: TaskGraph,
    /// Completed or skipped
    succeeded: HashSet<String>,
    /// Failed or blocked
    abandoned: HashSet<String>,
    running: HashSet<String>,
    max_parallel_jobs: usize,
    task_metrics: HashMap<String, TaskMetrics>,
    current_threads_used: usize,
    max_threads: usize,
}

impl ExecutionPlanner {
    /// Creates a new execution planner for a graph.
    ///
    /// Thread hints above `max_threads` are clamped so every task can run
    /// at least on its own.
    pub fn new(graph: TaskGraph, max_parallel_jobs: usize, max_threads: usize) -> Self {
        let max_parallel_jobs = max_parallel_jobs.max(1);
        let max_threads = max_threads.max(1);

        info!(
            "Creating planner: {} max jobs, {} cores",
            max_parallel_jobs, max_threads
        );

        let mut graph = graph;
        for task in &mut graph.tasks {
            if task.threads > max_threads {
                warn!(
                    "Task '{}' asks for {} threads; clamping to the core budget of {}",
                    task.id, task.threads, max_threads
                );
                task.threads = max_threads;
            }
        }

        let task_metrics = graph
            .tasks
            .iter()
            .map(|t| (t.id.clone(), TaskMetrics::new()))
            .collect();

        Self {
            graph,
            succeeded: HashSet::new(),
            abandoned: HashSet::new(),
            running: HashSet::new(),
            max_parallel_jobs,
            task_metrics,
            current_threads_used: 0,
            max_threads,
        }
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    /// Returns tasks that are ready to execute.
    ///
    /// A task is ready if:
    /// - It hasn't finished or started
    /// - All its dependencies succeeded
    /// - Adding it wouldn't exceed the job or core budget
    pub fn get_ready_tasks(&self) -> Vec<Task> {
        let mut ready_tasks = Vec::new();
        let mut threads_to_allocate = 0;

        for task in &self.graph.tasks {
            if self.is_finished(&task.id) || self.running.contains(&task.id) {
                continue;
            }

            if !task.previous.iter().all(|dep| self.succeeded.contains(dep)) {
                continue;
            }

            if self.running.len() + ready_tasks.len() >= self.max_parallel_jobs {
                break;
            }

            if self.current_threads_used + threads_to_allocate + task.threads > self.max_threads {
                debug!(
                    "Task '{}' needs {} threads but only {} available",
                    task.id,
                    task.threads,
                    self.max_threads - self.current_threads_used - threads_to_allocate
                );
                continue;
            }

            threads_to_allocate += task.threads;
            ready_tasks.push(task.clone());
        }

        ready_tasks
    }

    fn is_finished(&self, id: &str) -> bool {
        self.succeeded.contains(id) || self.abandoned.contains(id)
    }

    fn threads_of(&self, id: &str) -> usize {
        self.graph.get_task(id).map(|t| t.threads).unwrap_or(0)
    }

    fn release(&mut self, id: &str) {
        if self.running.remove(id) {
            let threads = self.threads_of(id);
            self.current_threads_used = self.current_threads_used.saturating_sub(threads);
            debug!(
                "Task '{}' released {} threads (total: {}/{})",
                id, threads, self.current_threads_used, self.max_threads
            );
        }
    }

    /// Marks a task as running.
    pub fn mark_task_running(&mut self, task_id: &str) {
        if self.running.insert(task_id.to_string()) {
            self.current_threads_used += self.threads_of(task_id);
        }

        if let Some(metrics) = self.task_metrics.get_mut(task_id) {
            metrics.start_time = Some(Instant::now());
            metrics.status = TaskStatus::Running;
        }
    }

    /// Marks a task as completed.
    pub fn mark_task_completed(&mut self, task_id: &str) {
        self.release(task_id);
        self.succeeded.insert(task_id.to_string());
        if let Some(metrics) = self.task_metrics.get_mut(task_id) {
            metrics.finish(TaskStatus::Completed);
        }
    }

    /// Marks a task as up to date without running it.
    pub fn mark_task_skipped(&mut self, task_id: &str) {
        self.release(task_id);
        self.succeeded.insert(task_id.to_string());
        if let Some(metrics) = self.task_metrics.get_mut(task_id) {
            metrics.finish(TaskStatus::Skipped);
        }
    }

    /// Marks a task as failed and blocks everything downstream of it.
    ///
    /// Returns the IDs of the newly blocked tasks.
    pub fn mark_task_failed(&mut self, task_id: &str, error: String) -> Vec<String> {
        self.release(task_id);
        self.abandoned.insert(task_id.to_string());
        if let Some(metrics) = self.task_metrics.get_mut(task_id) {
            metrics.finish(TaskStatus::Failed(error));
        }

        let mut blocked = Vec::new();
        for id in self.graph.downstream(task_id) {
            if self.is_finished(&id) {
                continue;
            }
            self.abandoned.insert(id.clone());
            if let Some(metrics) = self.task_metrics.get_mut(&id) {
                metrics.status = TaskStatus::Blocked(task_id.to_string());
            }
            blocked.push(id);
        }

        if !blocked.is_empty() {
            warn!("{} task(s) blocked by failure of '{}'", blocked.len(), task_id);
        }
        blocked
    }

    /// Returns true if there are more tasks to execute.
    pub fn has_work_remaining(&self) -> bool {
        self.succeeded.len() + self.abandoned.len() < self.graph.tasks.len()
    }

    /// Returns the current progress as (finished, total).
    pub fn progress(&self) -> (usize, usize) {
        (self.succeeded.len() + self.abandoned.len(), self.graph.tasks.len())
    }

    pub fn status(&self, task_id: &str) -> Option<&TaskStatus> {
        self.task_metrics.get(task_id).map(|m| &m.status)
    }

    /// Wall time of a finished task, from `mark_task_running` to its end.
    pub fn duration_ms(&self, task_id: &str) -> Option<u128> {
        self.task_metrics.get(task_id).and_then(|m| m.duration_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::model::Action;
    use crate::workflow::wildcards::Bindings;

    fn task(id: &str, threads: usize) -> Task {
        Task::new(id, Bindings::new(), Action::PlotAll).with_threads(threads)
    }

    fn link(graph: &mut TaskGraph, from: &str, to: &str) {
        graph.get_task_mut(from).unwrap().next.push(to.to_string());
        graph.get_task_mut(to).unwrap().previous.push(from.to_string());
    }

    /// a -> b -> c, plus an independent d
    fn create_test_graph() -> TaskGraph {
        let mut graph =
            TaskGraph::from_tasks(vec![task("a", 1), task("b", 1), task("c", 1), task("d", 1)]);
        link(&mut graph, "a", "b");
        link(&mut graph, "b", "c");
        graph
    }

    fn ids(tasks: &[Task]) -> Vec<&str> {
        tasks.iter().map(|t| t.id.as_str()).collect()
    }

    #[test]
    fn test_planner_creation() {
        let planner = ExecutionPlanner::new(create_test_graph(), 4, 4);
        assert_eq!(planner.progress(), (0, 4));
        assert_eq!(planner.status("a"), Some(&TaskStatus::Pending));
    }

    #[test]
    fn test_ready_tasks_follow_dependencies() {
        let mut planner = ExecutionPlanner::new(create_test_graph(), 4, 4);
        assert_eq!(ids(&planner.get_ready_tasks()), vec!["a", "d"]);

        planner.mark_task_running("a");
        assert_eq!(planner.status("a"), Some(&TaskStatus::Running));
        planner.mark_task_completed("a");

        assert_eq!(ids(&planner.get_ready_tasks()), vec!["b", "d"]);
        assert_eq!(planner.progress(), (1, 4));
    }

    #[test]
    fn test_skipped_counts_as_success() {
        let mut planner = ExecutionPlanner::new(create_test_graph(), 4, 4);
        planner.mark_task_skipped("a");
        assert_eq!(planner.status("a"), Some(&TaskStatus::Skipped));
        assert!(ids(&planner.get_ready_tasks()).contains(&"b"));
    }

    #[test]
    fn test_failure_blocks_downstream_only() {
        let mut planner = ExecutionPlanner::new(create_test_graph(), 4, 4);
        planner.mark_task_running("a");
        planner.mark_task_running("d");

        let blocked = planner.mark_task_failed("a", "Test error".to_string());
        assert_eq!(blocked, vec!["b", "c"]);
        assert_eq!(planner.status("a"), Some(&TaskStatus::Failed("Test error".to_string())));
        assert_eq!(planner.status("c"), Some(&TaskStatus::Blocked("a".to_string())));

        // d keeps running and nothing else becomes ready
        assert!(planner.get_ready_tasks().is_empty());
        assert!(planner.has_work_remaining());

        planner.mark_task_completed("d");
        assert!(!planner.has_work_remaining());
        assert_eq!(planner.status("b"), Some(&TaskStatus::Blocked("a".to_string())));
    }

    #[test]
    fn test_respects_max_parallel() {
        let graph = TaskGraph::from_tasks(vec![task("a", 1), task("b", 1), task("c", 1)]);
        let mut planner = ExecutionPlanner::new(graph, 2, 8);
        assert_eq!(planner.get_ready_tasks().len(), 2);

        planner.mark_task_running("a");
        assert_eq!(ids(&planner.get_ready_tasks()), vec!["b"]);
    }

    #[test]
    fn test_respects_core_budget() {
        let graph =
            TaskGraph::from_tasks(vec![task("big", 3), task("also_big", 3), task("small", 1)]);
        let mut planner = ExecutionPlanner::new(graph, 8, 4);
        assert_eq!(ids(&planner.get_ready_tasks()), vec!["big", "small"]);

        planner.mark_task_running("big");
        planner.mark_task_running("small");
        assert!(planner.get_ready_tasks().is_empty());

        planner.mark_task_completed("big");
        assert_eq!(ids(&planner.get_ready_tasks()), vec!["also_big"]);
    }

    #[test]
    fn test_oversized_hint_is_clamped() {
        let graph = TaskGraph::from_tasks(vec![task("huge", 64)]);
        let planner = ExecutionPlanner::new(graph, 1, 2);
        assert_eq!(planner.graph().get_task("huge").unwrap().threads, 2);
        assert_eq!(planner.get_ready_tasks().len(), 1);
    }

    #[test]
    fn test_metrics_duration() {
        let mut planner = ExecutionPlanner::new(create_test_graph(), 4, 4);

        planner.mark_task_running("a");
        std::thread::sleep(std::time::Duration::from_millis(10));
        planner.mark_task_completed("a");

        assert!(planner.duration_ms("a").unwrap() >= 10);
        // Skipped and never-started tasks have no duration
        planner.mark_task_skipped("d");
        assert_eq!(planner.duration_ms("d"), None);
        assert_eq!(planner.duration_ms("b"), None);
    }

    #[test]
    fn test_status_labels() {
        assert!(TaskStatus::Skipped.is_success());
        assert!(!TaskStatus::Blocked("x".to_string()).is_success());
        assert_eq!(TaskStatus::Skipped.label(), "up to date");
    }
}
