//! Task Graph Data Model
//!
//! Core data structures representing pipeline tasks and their relationships.
//!
//! Every task is one rule instantiated for one set of wildcard bindings:
//!
//! ```yaml
//! - id: msmc_run[n=4,seed=1842]
//!   rule: msmc_run
//!   bindings:
//!     n: '4'
//!     seed: '1842'
//!   input:
//!     - out/Intermediate/1842/chr1.4.multihetsep.txt
//!     - cache/tools/msmc/.complete
//!   output:
//!     - out/Intermediate/1842/msmc_4.final.txt
//!   previous:
//!     - fetch_msmc
//!     - msmc_format[chrom=chr1,n=4,seed=1842]
//!   threads: 4
//!   action:
//!     kind: estimate
//!     tool: msmc
//!     seed: 1842
//!     sample_size: 4
//! ```

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::inference::Tool;
use crate::workflow::wildcards::{format_bindings, Bindings};

/// Tool code fetched into the download cache.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolBundle {
    StairwayPlot,
    Msmc,
}

/// What a task does when dispatched.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    FetchGeneticMap,
    FetchTool {
        bundle: ToolBundle,
    },
    Simulate {
        seed: u64,
        chrom: String,
    },
    Format {
        tool: Tool,
        seed: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chrom: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sample_size: Option<usize>,
    },
    Estimate {
        tool: Tool,
        seed: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sample_size: Option<usize>,
    },
    Convert {
        tool: Tool,
        seed: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sample_size: Option<usize>,
    },
    PlotTool {
        tool: Tool,
    },
    PlotAll,
}

impl Action {
    /// True for the external estimator runs.
    pub fn is_estimation(&self) -> bool {
        matches!(self, Action::Estimate { .. })
    }

    pub fn tool(&self) -> Option<Tool> {
        match self {
            Action::Format { tool, .. }
            | Action::Estimate { tool, .. }
            | Action::Convert { tool, .. }
            | Action::PlotTool { tool } => Some(*tool),
            _ => None,
        }
    }

    pub fn seed(&self) -> Option<u64> {
        match self {
            Action::Simulate { seed, .. }
            | Action::Format { seed, .. }
            | Action::Estimate { seed, .. }
            | Action::Convert { seed, .. } => Some(*seed),
            _ => None,
        }
    }
}

/// Represents a single task in the graph.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Task {
    /// Stable identifier: `rule` or `rule[key=value,...]`
    pub id: String,

    pub rule: String,

    #[serde(default, skip_serializing_if = "Bindings::is_empty")]
    pub bindings: Bindings,

    /// Files this task reads
    #[serde(default)]
    pub input: Vec<PathBuf>,

    /// Files this task produces
    #[serde(default)]
    pub output: Vec<PathBuf>,

    /// IDs of tasks that must complete before this task can run
    #[serde(default)]
    pub previous: Vec<String>,

    /// IDs of tasks that depend on this task (derived)
    #[serde(default)]
    pub next: Vec<String>,

    /// Number of threads/cores this task requires
    #[serde(default = "default_threads")]
    pub threads: usize,

    pub action: Action,

    /// SHA-256 of the parameters and file sets that shape this task's outputs
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fingerprint: String,

    #[serde(skip)]
    parameters: Option<Value>,
}

fn default_threads() -> usize {
    1
}

impl Task {
    /// Creates a task for one rule and one set of bindings.
    ///
    /// # Example
    ///
    /// ```
    /// use nerunner::workflow::{Action, Task};
    ///
    /// let task = Task::new("fetch_genetic_map", Default::default(), Action::FetchGeneticMap)
    ///     .with_outputs(vec!["cache/genetic_maps/HomSap/HapMapII_GRCh37/.complete".into()]);
    /// assert_eq!(task.id, "fetch_genetic_map");
    /// ```
    pub fn new(rule: impl Into<String>, bindings: Bindings, action: Action) -> Self {
        let rule = rule.into();
        let id = if bindings.is_empty() {
            rule.clone()
        } else {
            format!("{}[{}]", rule, format_bindings(&bindings))
        };

        Self {
            id,
            rule,
            bindings,
            input: Vec::new(),
            output: Vec::new(),
            previous: Vec::new(),
            next: Vec::new(),
            threads: 1,
            action,
            fingerprint: String::new(),
            parameters: None,
        }
    }

    pub fn with_inputs(mut self, inputs: Vec<PathBuf>) -> Self {
        self.input = inputs;
        self.refresh_fingerprint();
        self
    }

    pub fn with_outputs(mut self, outputs: Vec<PathBuf>) -> Self {
        self.output = outputs;
        self.refresh_fingerprint();
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// Records the parameters this task's outputs depend on.
    ///
    /// The fingerprint also covers the declared input and output sets, so
    /// dropping a seed or chromosome from the run invalidates every task
    /// that read it.
    pub fn with_parameters(mut self, parameters: &Value) -> Self {
        self.parameters = Some(parameters.clone());
        self.refresh_fingerprint();
        self
    }

    fn refresh_fingerprint(&mut self) {
        if let Some(parameters) = &self.parameters {
            self.fingerprint = fingerprint(&self.action, parameters, &self.input, &self.output);
        }
    }

    /// Adds a dependency on another task.
    pub fn depends_on(mut self, task_id: impl Into<String>) -> Self {
        self.previous.push(task_id.into());
        self
    }

    /// Checks if all output files exist.
    pub fn outputs_exist(&self) -> bool {
        !self.output.is_empty() && self.output.iter().all(|f| f.exists())
    }

    /// Checks if outputs are outdated compared to inputs.
    ///
    /// Returns true if outputs are missing or any input is newer than the
    /// oldest output. A task without inputs is outdated only when its
    /// outputs are missing.
    pub fn outputs_outdated(&self) -> bool {
        if !self.outputs_exist() {
            return true;
        }

        let oldest_output = self.output.iter().filter_map(|f| modified(f)).min();
        let newest_input = self.input.iter().filter_map(|f| modified(f)).max();

        match (newest_input, oldest_output) {
            (Some(input_time), Some(output_time)) => input_time > output_time,
            (None, Some(_)) => false,
            _ => true,
        }
    }

    /// Whether the outputs on disk are current for this task.
    ///
    /// `recorded` is the fingerprint stored by the last successful run; a
    /// task without a record is judged on timestamps alone.
    pub fn is_up_to_date(&self, recorded: Option<&str>) -> bool {
        if self.outputs_outdated() {
            return false;
        }
        match recorded {
            Some(previous) => previous == self.fingerprint,
            None => true,
        }
    }

    /// Determines if this task should run.
    pub fn should_run(&self, force: bool, recorded: Option<&str>) -> bool {
        force || !self.is_up_to_date(recorded)
    }

    /// Human readable bindings, empty for unexpanded rules.
    pub fn describe_bindings(&self) -> String {
        format_bindings(&self.bindings)
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).ok().and_then(|m| m.modified().ok())
}

/// Hex SHA-256 over an action, its parameters and its sorted file sets.
pub fn fingerprint(
    action: &Action,
    parameters: &Value,
    inputs: &[PathBuf],
    outputs: &[PathBuf],
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(action).unwrap_or_default());
    hasher.update(b"\n");
    hasher.update(serde_json::to_vec(parameters).unwrap_or_default());

    for (tag, paths) in [(b"<", inputs), (b">", outputs)] {
        let mut sorted: Vec<&PathBuf> = paths.iter().collect();
        sorted.sort();
        for path in sorted {
            hasher.update(b"\n");
            hasher.update(tag);
            hasher.update(path.to_string_lossy().as_bytes());
        }
    }
    format!("{:x}", hasher.finalize())
}

/// The materialised pipeline: every task with its derived links.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct TaskGraph {
    /// Tasks, in topological order once validated
    pub tasks: Vec<Task>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    pub fn from_tasks(tasks: Vec<Task>) -> Self {
        Self { tasks }
    }

    /// Adds a task to the graph.
    pub fn add_task(&mut self, task: Task) -> Result<(), String> {
        if self.tasks.iter().any(|t| t.id == task.id) {
            return Err(format!("Task '{}' already exists", task.id));
        }
        self.tasks.push(task);
        Ok(())
    }

    pub fn get_task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn get_task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// Returns tasks with no dependencies (entry points).
    pub fn root_tasks(&self) -> Vec<&Task> {
        self.tasks.iter().filter(|t| t.previous.is_empty()).collect()
    }

    /// Returns tasks with no dependents (exit points).
    pub fn leaf_tasks(&self) -> Vec<&Task> {
        self.tasks.iter().filter(|t| t.next.is_empty()).collect()
    }

    pub fn tasks_of_rule<'a>(&'a self, rule: &'a str) -> impl Iterator<Item = &'a Task> + 'a {
        self.tasks.iter().filter(move |t| t.rule == rule)
    }

    /// Every task reachable through `next` links from `id`, excluding `id`.
    pub fn downstream(&self, id: &str) -> BTreeSet<String> {
        self.closure(id, |t| &t.next)
    }

    /// Every task reachable through `previous` links from `id`, excluding `id`.
    pub fn upstream(&self, id: &str) -> BTreeSet<String> {
        self.closure(id, |t| &t.previous)
    }

    fn closure<F>(&self, id: &str, links: F) -> BTreeSet<String>
    where
        F: Fn(&Task) -> &Vec<String>,
    {
        let index: HashMap<&str, &Task> = self.tasks.iter().map(|t| (t.id.as_str(), t)).collect();
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([id]);

        while let Some(current) = queue.pop_front() {
            if let Some(task) = index.get(current) {
                for linked in links(task) {
                    if seen.insert(linked.clone()) {
                        queue.push_back(linked.as_str());
                    }
                }
            }
        }
        seen
    }

    /// Restricts the graph to the given tasks and everything upstream of them.
    ///
    /// Links to removed tasks are dropped; order is preserved.
    pub fn select(&self, ids: &[String]) -> Result<TaskGraph, String> {
        let mut keep: HashSet<String> = HashSet::new();
        for id in ids {
            if self.get_task(id).is_none() {
                return Err(format!("Unknown task '{}'", id));
            }
            keep.insert(id.clone());
            keep.extend(self.upstream(id));
        }

        let tasks = self
            .tasks
            .iter()
            .filter(|t| keep.contains(&t.id))
            .cloned()
            .map(|mut t| {
                t.next.retain(|n| keep.contains(n));
                t
            })
            .collect();

        Ok(TaskGraph { tasks })
    }

    /// Number of external estimator runs in the graph.
    pub fn estimation_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.action.is_estimation()).count()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
