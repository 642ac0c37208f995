//! Individual Task Execution
//!
//! Handles the execution of a single task including:
//! - Output directory creation
//! - Dispatch on the task's action (fetch, simulate, format, estimate,
//!   convert, plot)
//! - Removal of partial outputs when the action fails

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::config::RunConfig;
use crate::environment::{
    fetch_genetic_map, fetch_msmc, fetch_stairway_plot, is_marker, Toolchain,
};
use crate::error::{NeError, Result};
use crate::inference::{FormatRequest, Rates, RunRequest};
use crate::plotting::{plot_all, plot_tool};
use crate::simulation::{simulate, SimulationRequest};
use crate::workflow::{Action, Task, ToolBundle};

/// Executes a single task.
///
/// Outputs left behind by a failed action are deleted, so a later run can
/// never mistake them for up-to-date results.
///
/// # Returns
///
/// * `Ok(())` - Task completed and produced its outputs
/// * `Err` - Task failed; the error names the failure class
pub fn execute_task(task: &Task, config: &RunConfig, toolchain: &Toolchain) -> Result<()> {
    ensure_output_directories(&task.output)?;

    let result = dispatch(task, config, toolchain);
    if result.is_err() {
        remove_outputs(&task.output);
    } else {
        debug!("Task '{}' completed successfully", task.id);
    }
    result
}

fn dispatch(task: &Task, config: &RunConfig, toolchain: &Toolchain) -> Result<()> {
    match &task.action {
        Action::FetchGeneticMap => {
            fetch_genetic_map(toolchain, &config.species, &config.genetic_map)?;
        }
        Action::FetchTool { bundle } => match bundle {
            ToolBundle::StairwayPlot => {
                fetch_stairway_plot(toolchain)?;
            }
            ToolBundle::Msmc => {
                fetch_msmc(toolchain)?;
            }
        },
        Action::Simulate { seed, chrom } => {
            let request = SimulationRequest {
                config,
                seed: *seed,
                chrom,
                trees: output(task, 0)?,
                vcf: output(task, 1)?,
            };
            simulate(&request, toolchain)?;
        }
        Action::Format { tool, seed, sample_size, .. } => {
            let vcfs: Vec<PathBuf> = task
                .input
                .iter()
                .filter(|p| p.extension().map_or(false, |ext| ext == "vcf"))
                .cloned()
                .collect();

            let request = FormatRequest {
                seed: *seed,
                vcfs: &vcfs,
                output: output(task, 0)?,
                sample_size: *sample_size,
                population: &config.population,
            };
            tool.estimator().format(&request)?;
        }
        Action::Estimate { tool, seed, sample_size } => {
            let inputs: Vec<PathBuf> =
                task.input.iter().filter(|p| !is_marker(p)).cloned().collect();

            let request = RunRequest {
                config,
                seed: *seed,
                sample_size: *sample_size,
                inputs: &inputs,
                output: output(task, 0)?,
                threads: task.threads,
            };
            tool.estimator().run(&request, toolchain)?;
        }
        Action::Convert { tool, .. } => {
            let raw = task.input.first().ok_or_else(|| {
                NeError::graph(format!("task '{}' has no raw estimate input", task.id))
            })?;

            let table = tool.estimator().convert(raw, &Rates::from_config(config))?;
            if table.is_empty() {
                return Err(NeError::format(raw, "estimate has no rows"));
            }
            table.write(output(task, 0)?)?;
        }
        Action::PlotTool { tool } => plot_tool(config, *tool, output(task, 0)?)?,
        Action::PlotAll => plot_all(config, output(task, 0)?)?,
    }
    Ok(())
}

/// The task's `index`-th declared output.
fn output(task: &Task, index: usize) -> Result<&Path> {
    task.output
        .get(index)
        .map(|p| p.as_path())
        .ok_or_else(|| NeError::graph(format!("task '{}' declares no output #{}", task.id, index)))
}

/// Creates parent directories for output files.
fn ensure_output_directories(output_files: &[PathBuf]) -> Result<()> {
    for output_path in output_files {
        if let Some(parent) = output_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
                debug!("Created directory: {}", parent.display());
            }
        }
    }
    Ok(())
}

fn remove_outputs(output_files: &[PathBuf]) {
    for path in output_files.iter().filter(|p| p.is_file()) {
        match fs::remove_file(path) {
            Ok(()) => debug!("Removed partial output {}", path.display()),
            Err(e) => warn!("Failed to remove partial output {}: {}", path.display(), e),
        }
    }
}
