//! Dependency Derivation
//!
//! Links tasks by matching declared file paths: if task A produces file X
//! and task B reads file X, then B depends on A. Also handles writing the
//! materialised graph out as YAML.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};

use super::model::TaskGraph;
use crate::error::Result;

/// Populates `previous`/`next` of every task from its inputs and outputs.
///
/// Existing links are discarded. A path produced by two tasks is an error;
/// inputs nobody produces are left as external files.
pub fn derive_dependencies(graph: &mut TaskGraph) -> std::result::Result<(), String> {
    for task in &mut graph.tasks {
        task.previous.clear();
        task.next.clear();
    }

    // Build output -> task mapping
    let mut output_to_task: HashMap<&PathBuf, &str> = HashMap::new();
    for task in &graph.tasks {
        for output in &task.output {
            if let Some(existing) = output_to_task.insert(output, &task.id) {
                return Err(format!(
                    "Multiple tasks produce '{}': '{}' and '{}'",
                    output.display(),
                    existing,
                    task.id
                ));
            }
        }
    }

    let mut dependencies: HashMap<String, Vec<String>> = HashMap::new();
    let mut dependents: HashMap<String, Vec<String>> = HashMap::new();

    for task in &graph.tasks {
        for input in &task.input {
            if let Some(producer_id) = output_to_task.get(input) {
                dependencies
                    .entry(task.id.clone())
                    .or_default()
                    .push(producer_id.to_string());
                dependents
                    .entry(producer_id.to_string())
                    .or_default()
                    .push(task.id.clone());
            }
        }
    }

    let mut links = 0;
    for task in &mut graph.tasks {
        if let Some(deps) = dependencies.remove(&task.id) {
            task.previous = deps;
            task.previous.sort();
            task.previous.dedup();
            links += task.previous.len();
            debug!("Task '{}' depends on: {:?}", task.id, task.previous);
        }

        if let Some(nexts) = dependents.remove(&task.id) {
            task.next = nexts;
            task.next.sort();
            task.next.dedup();
        }
    }

    info!("Derived {} dependency links between {} tasks", links, graph.len());
    Ok(())
}

/// Saves a task graph to a YAML file.
pub fn save_graph(graph: &TaskGraph, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let yaml_content = serde_yaml::to_string(graph)?;
    fs::write(path, yaml_content)?;
    info!("Task graph saved to: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::model::{Action, Task};
    use crate::workflow::wildcards::Bindings;

    fn task(id: &str, inputs: &[&str], outputs: &[&str]) -> Task {
        Task::new(id, Bindings::new(), Action::PlotAll)
            .with_inputs(inputs.iter().map(PathBuf::from).collect())
            .with_outputs(outputs.iter().map(PathBuf::from).collect())
    }

    #[test]
    fn test_derive_dependencies_chain() {
        let mut graph = TaskGraph::from_tasks(vec![
            task("step1", &[], &["a.txt"]),
            task("step2", &["a.txt"], &["b.txt"]),
            task("step3", &["b.txt", "a.txt"], &["c.txt"]),
        ]);

        derive_dependencies(&mut graph).unwrap();

        assert!(graph.tasks[0].previous.is_empty());
        assert_eq!(graph.tasks[0].next, vec!["step2", "step3"]);
        assert_eq!(graph.tasks[1].previous, vec!["step1"]);
        assert_eq!(graph.tasks[2].previous, vec!["step1", "step2"]);
    }

    #[test]
    fn test_fan_in_deduplicates() {
        let mut graph = TaskGraph::from_tasks(vec![
            task("producer", &[], &["x.vcf", "y.vcf"]),
            task("consumer", &["x.vcf", "y.vcf"], &["out"]),
        ]);

        derive_dependencies(&mut graph).unwrap();
        assert_eq!(graph.tasks[1].previous, vec!["producer"]);
        assert_eq!(graph.tasks[0].next, vec!["consumer"]);
    }

    #[test]
    fn test_external_inputs_are_ignored() {
        let mut graph = TaskGraph::from_tasks(vec![
            task("step1", &[], &["file1.txt"]),
            task("step2", &["file2.txt"], &["file3.txt"]),
        ]);

        derive_dependencies(&mut graph).unwrap();
        assert!(graph.tasks[1].previous.is_empty());
        assert!(graph.tasks[0].next.is_empty());
    }

    #[test]
    fn test_duplicate_producer_is_error() {
        let mut graph = TaskGraph::from_tasks(vec![
            task("one", &[], &["same.txt"]),
            task("two", &[], &["same.txt"]),
        ]);

        let err = derive_dependencies(&mut graph).unwrap_err();
        assert!(err.contains("same.txt"));
    }

    #[test]
    fn test_save_graph() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph").join("tasks.yaml");

        let mut graph = TaskGraph::from_tasks(vec![
            task("step1", &[], &["a.txt"]),
            task("step2", &["a.txt"], &["b.txt"]),
        ]);
        derive_dependencies(&mut graph).unwrap();

        save_graph(&graph, &path).unwrap();

        let loaded: TaskGraph = serde_yaml::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.tasks[1].previous, vec!["step1"]);
    }
}
