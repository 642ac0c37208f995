//! Task Graph Builder
//!
//! Materialises every task of a run from the resolved configuration. Each
//! rule declares the wildcard dimensions it is expanded over:
//!
//! | Rule | Dimensions |
//! |---|---|
//! | `fetch_genetic_map`, `fetch_stairway_plot`, `fetch_msmc` | none |
//! | `simulation` | seed × chrom |
//! | `stairway_format`, `stairway_run`, `stairway_convert` | seed |
//! | `smcpp_format` | seed × chrom |
//! | `smcpp_run`, `smcpp_convert` | seed |
//! | `msmc_format` | seed × chrom × n |
//! | `msmc_run`, `msmc_convert` | seed × n |
//! | `stairway_plot`, `smcpp_plot`, `msmc_plot`, `final_plot` | none (fan-in) |
//!
//! Only inputs and outputs are declared here; links between tasks are
//! derived afterwards by matching paths.

use std::path::PathBuf;
use std::str::FromStr;

use log::info;
use serde_json::json;

use super::dependencies::derive_dependencies;
use super::layout::Layout;
use super::model::{Action, Task, TaskGraph, ToolBundle};
use super::validator::validate_graph;
use super::wildcards::{expand_bindings, Bindings};
use crate::config::RunConfig;
use crate::environment::cache::{MSMC_URL, STAIRWAY_PLOT_URL};
use crate::environment::DownloadCache;
use crate::error::{NeError, Result};
use crate::inference::Tool;

pub const FETCH_GENETIC_MAP: &str = "fetch_genetic_map";
pub const FETCH_STAIRWAY_PLOT: &str = "fetch_stairway_plot";
pub const FETCH_MSMC: &str = "fetch_msmc";
pub const SIMULATION: &str = "simulation";
pub const FINAL_PLOT: &str = "final_plot";

/// Named targets accepted on the command line.
pub const TARGETS: [&str; 4] = ["all", "stairway", "smcpp", "msmc"];

/// Rule name of one tool stage, e.g. `msmc_run`.
pub fn rule_name(tool: Tool, stage: &str) -> String {
    format!("{}_{}", tool.name(), stage)
}

/// Maps a target name to the tasks that produce it.
///
/// `all` is every per-tool plot plus the combined plot.
pub fn target_tasks(target: &str) -> Result<Vec<String>> {
    if target == "all" {
        let mut tasks: Vec<String> = Tool::ALL.iter().map(|&t| rule_name(t, "plot")).collect();
        tasks.push(FINAL_PLOT.to_string());
        return Ok(tasks);
    }
    let tool = Tool::from_str(target).map_err(|_| {
        NeError::config(format!(
            "Unknown target '{}'; expected one of {}",
            target,
            TARGETS.join(", ")
        ))
    })?;
    Ok(vec![rule_name(tool, "plot")])
}

/// Builds, links and validates the complete task graph of a run.
///
/// Nothing is executed; the returned graph is in topological order.
pub fn build_task_graph(config: &RunConfig) -> Result<TaskGraph> {
    let mut builder = GraphBuilder::new(config);
    builder.fetch_rules()?;
    builder.simulation_rule()?;
    builder.stairway_rules()?;
    builder.smcpp_rules()?;
    builder.msmc_rules()?;
    builder.plot_rules()?;

    let mut graph = builder.graph;
    derive_dependencies(&mut graph)?;
    validate_graph(&mut graph)?;

    info!(
        "Built task graph: {} tasks ({} estimator runs)",
        graph.len(),
        graph.estimation_count()
    );
    Ok(graph)
}

struct GraphBuilder<'a> {
    config: &'a RunConfig,
    layout: Layout,
    cache: DownloadCache,
    seeds: Vec<String>,
    chroms: Vec<String>,
    sizes: Vec<String>,
    graph: TaskGraph,
}

impl<'a> GraphBuilder<'a> {
    fn new(config: &'a RunConfig) -> Self {
        Self {
            config,
            layout: Layout::new(&config.output_root),
            cache: DownloadCache::new(&config.cache_dir),
            seeds: config.seeds.iter().map(|s| s.to_string()).collect(),
            chroms: config.chromosomes.clone(),
            sizes: config.msmc_sample_sizes.iter().map(|n| n.to_string()).collect(),
            graph: TaskGraph::new(),
        }
    }

    fn add(&mut self, task: Task) -> Result<()> {
        self.graph.add_task(task)?;
        Ok(())
    }

    /// Whether MSMC comes from the download cache rather than a configured path.
    fn fetches_msmc(&self) -> bool {
        !self.config.tool_paths.contains_key("msmc")
    }

    fn fetch_rules(&mut self) -> Result<()> {
        let config = self.config;
        let map = &config.genetic_map;

        self.add(
            Task::new(FETCH_GENETIC_MAP, Bindings::new(), Action::FetchGeneticMap)
                .with_outputs(vec![self.cache.genetic_map_marker(&config.species, &map.id)])
                .with_parameters(&json!({
                    "species": config.species,
                    "map": map.id,
                    "url": map.url,
                })),
        )?;

        self.add(
            Task::new(
                FETCH_STAIRWAY_PLOT,
                Bindings::new(),
                Action::FetchTool { bundle: ToolBundle::StairwayPlot },
            )
            .with_outputs(vec![self.cache.stairway_marker()])
            .with_parameters(&json!({ "url": STAIRWAY_PLOT_URL })),
        )?;

        if self.fetches_msmc() {
            self.add(
                Task::new(
                    FETCH_MSMC,
                    Bindings::new(),
                    Action::FetchTool { bundle: ToolBundle::Msmc },
                )
                .with_outputs(vec![self.cache.msmc_marker()])
                .with_parameters(&json!({ "url": MSMC_URL })),
            )?;
        }
        Ok(())
    }

    fn simulation_rule(&mut self) -> Result<()> {
        let config = self.config;
        let map_marker = self.cache.genetic_map_marker(&config.species, &config.genetic_map.id);

        for bindings in expand_bindings(&[("seed", &self.seeds[..]), ("chrom", &self.chroms[..])]) {
            let seed: u64 = value(&bindings, "seed")?;
            let chrom: String = value(&bindings, "chrom")?;

            let action = Action::Simulate { seed, chrom: chrom.clone() };
            let task = Task::new(SIMULATION, bindings.clone(), action)
                .with_inputs(vec![map_marker.clone()])
                .with_outputs(vec![self.layout.trees(seed, &chrom), self.layout.vcf(seed, &chrom)])
                .with_threads(self.config.task_threads())
                .with_parameters(&json!({
                    "species": config.species,
                    "model": config.model,
                    "genetic_map": config.genetic_map.id,
                    "population": config.population,
                    "sample_size": config.sample_size,
                }));
            self.add(task)?;
        }
        Ok(())
    }

    fn vcfs(&self, seed: u64) -> Vec<PathBuf> {
        self.chroms.iter().map(|c| self.layout.vcf(seed, c)).collect()
    }

    /// Parameters that shape one tool's raw estimate.
    fn run_parameters(&self, tool: Tool) -> serde_json::Value {
        let config = self.config;
        match tool {
            Tool::Stairway => json!({
                "mutation_rate": config.mutation_rate,
                "generation_time": config.generation_time,
                "bootstraps": config.stairway_bootstraps,
            }),
            Tool::Smcpp => json!({ "mutation_rate": config.mutation_rate }),
            Tool::Msmc => json!({ "iterations": config.msmc_iterations }),
        }
    }

    fn convert_parameters(&self) -> serde_json::Value {
        json!({
            "mutation_rate": self.config.mutation_rate,
            "generation_time": self.config.generation_time,
        })
    }

    fn stairway_rules(&mut self) -> Result<()> {
        let tool = Tool::Stairway;

        for bindings in expand_bindings(&[("seed", &self.seeds[..])]) {
            let seed: u64 = value(&bindings, "seed")?;
            let sfs = self.layout.sfs(seed);
            let raw = self.layout.raw_estimate(tool, seed, None);

            self.add(
                Task::new(
                    rule_name(tool, "format"),
                    bindings.clone(),
                    Action::Format { tool, seed, chrom: None, sample_size: None },
                )
                .with_inputs(self.vcfs(seed))
                .with_outputs(vec![sfs.clone()])
                .with_parameters(&json!({})),
            )?;

            self.add(
                Task::new(
                    rule_name(tool, "run"),
                    bindings.clone(),
                    Action::Estimate { tool, seed, sample_size: None },
                )
                .with_inputs(vec![sfs, self.cache.stairway_marker()])
                .with_outputs(vec![raw.clone()])
                .with_threads(self.config.task_threads())
                .with_parameters(&self.run_parameters(tool)),
            )?;

            self.add(
                Task::new(
                    rule_name(tool, "convert"),
                    bindings,
                    Action::Convert { tool, seed, sample_size: None },
                )
                .with_inputs(vec![raw])
                .with_outputs(vec![self.layout.table(tool, seed, None)])
                .with_parameters(&self.convert_parameters()),
            )?;
        }
        Ok(())
    }

    fn smcpp_rules(&mut self) -> Result<()> {
        let tool = Tool::Smcpp;
        let population = self.config.population.clone();

        for bindings in expand_bindings(&[("seed", &self.seeds[..]), ("chrom", &self.chroms[..])]) {
            let seed: u64 = value(&bindings, "seed")?;
            let chrom: String = value(&bindings, "chrom")?;

            self.add(
                Task::new(
                    rule_name(tool, "format"),
                    bindings.clone(),
                    Action::Format { tool, seed, chrom: Some(chrom.clone()), sample_size: None },
                )
                .with_inputs(vec![self.layout.vcf(seed, &chrom)])
                .with_outputs(vec![self.layout.smc(seed, &chrom)])
                .with_parameters(&json!({ "population": population })),
            )?;
        }

        for bindings in expand_bindings(&[("seed", &self.seeds[..])]) {
            let seed: u64 = value(&bindings, "seed")?;
            let inputs: Vec<PathBuf> =
                self.chroms.iter().map(|c| self.layout.smc(seed, c)).collect();
            let raw = self.layout.raw_estimate(tool, seed, None);

            self.add(
                Task::new(
                    rule_name(tool, "run"),
                    bindings.clone(),
                    Action::Estimate { tool, seed, sample_size: None },
                )
                .with_inputs(inputs)
                .with_outputs(vec![raw.clone()])
                .with_threads(self.config.task_threads())
                .with_parameters(&self.run_parameters(tool)),
            )?;

            self.add(
                Task::new(
                    rule_name(tool, "convert"),
                    bindings,
                    Action::Convert { tool, seed, sample_size: None },
                )
                .with_inputs(vec![raw])
                .with_outputs(vec![self.layout.table(tool, seed, None)])
                .with_parameters(&self.convert_parameters()),
            )?;
        }
        Ok(())
    }

    fn msmc_rules(&mut self) -> Result<()> {
        let tool = Tool::Msmc;

        let dimensions = [
            ("seed", &self.seeds[..]),
            ("chrom", &self.chroms[..]),
            ("n", &self.sizes[..]),
        ];
        for bindings in expand_bindings(&dimensions) {
            let seed: u64 = value(&bindings, "seed")?;
            let n: usize = value(&bindings, "n")?;
            let chrom: String = value(&bindings, "chrom")?;

            self.add(
                Task::new(
                    rule_name(tool, "format"),
                    bindings.clone(),
                    Action::Format { tool, seed, chrom: Some(chrom.clone()), sample_size: Some(n) },
                )
                .with_inputs(vec![self.layout.vcf(seed, &chrom)])
                .with_outputs(vec![self.layout.multihetsep(seed, &chrom, n)])
                .with_parameters(&json!({})),
            )?;
        }

        for bindings in expand_bindings(&[("seed", &self.seeds[..]), ("n", &self.sizes[..])]) {
            let seed: u64 = value(&bindings, "seed")?;
            let n: usize = value(&bindings, "n")?;
            let raw = self.layout.raw_estimate(tool, seed, Some(n));

            let mut inputs: Vec<PathBuf> = self
                .chroms
                .iter()
                .map(|c| self.layout.multihetsep(seed, c, n))
                .collect();
            if self.fetches_msmc() {
                inputs.push(self.cache.msmc_marker());
            }

            self.add(
                Task::new(
                    rule_name(tool, "run"),
                    bindings.clone(),
                    Action::Estimate { tool, seed, sample_size: Some(n) },
                )
                .with_inputs(inputs)
                .with_outputs(vec![raw.clone()])
                .with_threads(self.config.task_threads())
                .with_parameters(&self.run_parameters(tool)),
            )?;

            self.add(
                Task::new(
                    rule_name(tool, "convert"),
                    bindings,
                    Action::Convert { tool, seed, sample_size: Some(n) },
                )
                .with_inputs(vec![raw])
                .with_outputs(vec![self.layout.table(tool, seed, Some(n))])
                .with_parameters(&self.convert_parameters()),
            )?;
        }
        Ok(())
    }

    /// Every table one tool produces, in seed order (then sample size).
    fn tables(&self, tool: Tool) -> Vec<PathBuf> {
        let mut tables = Vec::new();
        for &seed in &self.config.seeds {
            match tool {
                Tool::Msmc => {
                    for &n in &self.config.msmc_sample_sizes {
                        tables.push(self.layout.table(tool, seed, Some(n)));
                    }
                }
                _ => tables.push(self.layout.table(tool, seed, None)),
            }
        }
        tables
    }

    fn plot_rules(&mut self) -> Result<()> {
        let parameters = json!({
            "model": self.config.model,
            "population": self.config.population,
            "generation_time": self.config.generation_time,
        });

        let mut all_tables = Vec::new();
        for tool in Tool::ALL {
            let tables = self.tables(tool);
            all_tables.extend(tables.iter().cloned());

            self.add(
                Task::new(rule_name(tool, "plot"), Bindings::new(), Action::PlotTool { tool })
                    .with_inputs(tables)
                    .with_outputs(vec![self.layout.tool_plot(tool)])
                    .with_parameters(&parameters),
            )?;
        }

        self.add(
            Task::new(FINAL_PLOT, Bindings::new(), Action::PlotAll)
                .with_inputs(all_tables)
                .with_outputs(vec![self.layout.final_plot()])
                .with_parameters(&parameters),
        )?;
        Ok(())
    }
}

/// Reads a typed wildcard value back out of its bindings.
fn value<T: FromStr>(bindings: &Bindings, key: &str) -> Result<T> {
    bindings
        .get(key)
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| {
            NeError::graph(format!("wildcard '{}' missing or malformed in {:?}", key, bindings))
        })
}
