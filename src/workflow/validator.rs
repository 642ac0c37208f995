//! Task Graph Validation
//!
//! Provides validation for materialised task graphs:
//! - Task field validation
//! - Reference integrity checking
//! - Cycle detection and topological sorting

use std::collections::{HashMap, HashSet, VecDeque};

use log::{debug, info};

use super::model::{Task, TaskGraph};

/// Validation error types for user-friendly error messages.
#[derive(Debug, Clone)]
pub enum ValidationError {
    EmptyGraph,
    DuplicateTaskId(String),
    EmptyTaskId,
    NoOutputs(String),
    InvalidReference { task: String, reference: String },
    CyclicDependency(Vec<String>),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyGraph => write!(f, "Task graph has no tasks"),
            Self::DuplicateTaskId(id) => write!(f, "Duplicate task ID: '{}'", id),
            Self::EmptyTaskId => write!(f, "Task has empty or whitespace-only ID"),
            Self::NoOutputs(task) => write!(f, "Task '{}' declares no outputs", task),
            Self::InvalidReference { task, reference } => {
                write!(f, "Task '{}' references unknown task '{}'", task, reference)
            }
            Self::CyclicDependency(stuck) => write!(
                f,
                "Task graph contains cyclic dependencies involving: {}",
                stuck.join(", ")
            ),
        }
    }
}

/// Validates a single task's fields.
fn validate_task(task: &Task) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if task.id.trim().is_empty() {
        errors.push(ValidationError::EmptyTaskId);
        return errors;
    }

    // Without outputs a task could never be judged up to date
    if task.output.is_empty() {
        errors.push(ValidationError::NoOutputs(task.id.clone()));
    }

    errors
}

/// Validates the entire graph structure.
///
/// Checks that the graph is non-empty, IDs are unique, every task declares
/// outputs, every link points at an existing task, and there are no cycles.
///
/// On success, the tasks are reordered in topological order.
pub fn validate_graph(graph: &mut TaskGraph) -> Result<(), String> {
    info!("Validating task graph with {} tasks", graph.tasks.len());

    if graph.tasks.is_empty() {
        return Err(ValidationError::EmptyGraph.to_string());
    }

    let mut seen_ids: HashSet<String> = HashSet::new();
    for task in &graph.tasks {
        if !seen_ids.insert(task.id.clone()) {
            return Err(ValidationError::DuplicateTaskId(task.id.clone()).to_string());
        }
    }

    let mut all_errors = Vec::new();
    for task in &graph.tasks {
        all_errors.extend(validate_task(task));

        for linked in task.previous.iter().chain(task.next.iter()) {
            if !seen_ids.contains(linked) {
                all_errors.push(ValidationError::InvalidReference {
                    task: task.id.clone(),
                    reference: linked.clone(),
                });
            }
        }
    }

    if !all_errors.is_empty() {
        let error_messages: Vec<String> = all_errors.iter().map(|e| e.to_string()).collect();
        return Err(error_messages.join("\n"));
    }

    topological_sort(graph)?;

    info!(
        "Task graph validated: {} tasks, {} roots, {} leaves",
        graph.tasks.len(),
        graph.root_tasks().len(),
        graph.leaf_tasks().len()
    );
    Ok(())
}

/// Performs topological sort on the tasks using Kahn's algorithm.
///
/// Ties keep their original relative order, so the builder's rule order
/// survives sorting.
fn topological_sort(graph: &mut TaskGraph) -> Result<(), String> {
    let mut in_degree: HashMap<String, usize> = HashMap::new();
    for task in &graph.tasks {
        in_degree.insert(task.id.clone(), task.previous.len());
    }

    let mut queue: VecDeque<String> = graph
        .tasks
        .iter()
        .filter(|t| t.previous.is_empty())
        .map(|t| t.id.clone())
        .collect();

    let successors: HashMap<String, Vec<String>> = graph
        .tasks
        .iter()
        .map(|t| (t.id.clone(), t.next.clone()))
        .collect();

    let mut sorted_order: Vec<String> = Vec::new();

    while let Some(current_id) = queue.pop_front() {
        if let Some(nexts) = successors.get(&current_id) {
            for successor_id in nexts {
                if let Some(degree) = in_degree.get_mut(successor_id) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        queue.push_back(successor_id.clone());
                    }
                }
            }
        }
        sorted_order.push(current_id);
    }

    if sorted_order.len() != graph.tasks.len() {
        let placed: HashSet<&String> = sorted_order.iter().collect();
        let mut stuck: Vec<String> = graph
            .tasks
            .iter()
            .filter(|t| !placed.contains(&t.id))
            .map(|t| t.id.clone())
            .collect();
        stuck.sort();
        return Err(ValidationError::CyclicDependency(stuck).to_string());
    }

    let mut task_map: HashMap<String, Task> = graph
        .tasks
        .drain(..)
        .map(|t| (t.id.clone(), t))
        .collect();

    graph.tasks = sorted_order
        .into_iter()
        .filter_map(|id| task_map.remove(&id))
        .collect();

    debug!(
        "Topological order: {:?}",
        graph.tasks.iter().map(|t| &t.id).collect::<Vec<_>>()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::model::Action;
    use crate::workflow::wildcards::Bindings;
    use std::path::PathBuf;

    fn task(id: &str) -> Task {
        Task::new(id, Bindings::new(), Action::PlotAll)
            .with_outputs(vec![PathBuf::from(format!("{}.out", id))])
    }

    fn link(graph: &mut TaskGraph, from: &str, to: &str) {
        graph.get_task_mut(from).unwrap().next.push(to.to_string());
        graph.get_task_mut(to).unwrap().previous.push(from.to_string());
    }

    #[test]
    fn test_valid_graph() {
        let mut graph = TaskGraph::from_tasks(vec![task("step1"), task("step2")]);
        link(&mut graph, "step1", "step2");
        assert!(validate_graph(&mut graph).is_ok());
    }

    #[test]
    fn test_empty_graph() {
        let mut graph = TaskGraph::new();
        assert!(validate_graph(&mut graph).is_err());
    }

    #[test]
    fn test_duplicate_ids() {
        let mut graph = TaskGraph::from_tasks(vec![task("same_id"), task("same_id")]);
        assert!(validate_graph(&mut graph).unwrap_err().contains("Duplicate"));
    }

    #[test]
    fn test_missing_outputs() {
        let bare = Task::new("bare", Bindings::new(), Action::PlotAll);
        let mut graph = TaskGraph::from_tasks(vec![bare]);
        assert!(validate_graph(&mut graph).unwrap_err().contains("declares no outputs"));
    }

    #[test]
    fn test_cyclic_dependency() {
        let mut graph = TaskGraph::from_tasks(vec![task("a"), task("b"), task("c")]);
        link(&mut graph, "a", "b");
        link(&mut graph, "b", "a");

        let err = validate_graph(&mut graph).unwrap_err();
        assert!(err.contains("cyclic"));
        assert!(err.ends_with("involving: a, b"));
    }

    #[test]
    fn test_invalid_reference() {
        let mut graph = TaskGraph::from_tasks(vec![task("step1").depends_on("ghost")]);
        assert!(validate_graph(&mut graph).unwrap_err().contains("unknown task"));
    }

    #[test]
    fn test_topological_sort_linear() {
        let mut graph = TaskGraph::from_tasks(vec![task("step3"), task("step1"), task("step2")]);
        link(&mut graph, "step1", "step2");
        link(&mut graph, "step2", "step3");

        topological_sort(&mut graph).unwrap();
        let order: Vec<_> = graph.tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(order, vec!["step1", "step2", "step3"]);
    }

    #[test]
    fn test_topological_sort_keeps_root_order() {
        let mut graph = TaskGraph::from_tasks(vec![task("z"), task("y"), task("x")]);
        topological_sort(&mut graph).unwrap();
        let order: Vec<_> = graph.tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(order, vec!["z", "y", "x"]);
    }

    #[test]
    fn test_validation_error_display() {
        assert_eq!(ValidationError::EmptyGraph.to_string(), "Task graph has no tasks");
        assert!(ValidationError::DuplicateTaskId("t".to_string()).to_string().contains("t"));
        assert!(ValidationError::CyclicDependency(vec!["a".to_string()])
            .to_string()
            .contains("cyclic"));
    }
}
