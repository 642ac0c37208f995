//! NeRunner CLI Entry Point
//!
//! Provides command-line interface for pipeline execution.
//!
//! # Usage
//!
//! ```bash
//! # Build every plot
//! nerunner run
//!
//! # Only the SMC++ branch, at most 2 concurrent tasks
//! nerunner --config runs/yri.json run --target smcpp --jobs 2
//!
//! # Preview which tasks would run
//! nerunner run --dry-run
//!
//! # Remove generated outputs but keep downloads
//! nerunner clean --outputs-only
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::{error, info};

use nerunner::execution::Engine;
use nerunner::workflow::{build_task_graph, save_graph, CleanScope, Layout};
use nerunner::{load_config, RunConfig, APP_NAME, VERSION};

/// Default configuration file used when none is specified.
const DEFAULT_CONFIG: &str = "config.json";

/// NeRunner - compares demographic inference tools on simulated genomes
#[derive(Parser, Debug)]
#[command(name = "nerunner")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Run configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build the requested targets
    Run {
        /// Target to build: all, stairway, smcpp or msmc (repeatable)
        #[arg(short, long = "target")]
        targets: Vec<String>,

        /// Maximum concurrent tasks (defaults to the core budget)
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Core budget (overrides the configuration)
        #[arg(long)]
        cores: Option<usize>,

        /// List the tasks that would run without executing them
        #[arg(long)]
        dry_run: bool,

        /// Rerun every selected task regardless of its outputs
        #[arg(long)]
        force: bool,
    },

    /// Delete generated outputs and/or the download cache
    Clean {
        /// Keep the download cache
        #[arg(long, conflicts_with = "cache_only")]
        outputs_only: bool,

        /// Keep generated outputs
        #[arg(long)]
        cache_only: bool,
    },

    /// Export the task graph as YAML
    Graph {
        /// Output file (prints to stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the replicate seeds derived from the master seed
    Seeds,
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME, VERSION);
    println!("Demographic Inference Benchmark Runner");
    println!();
}

fn run_pipeline(
    config: RunConfig,
    targets: Vec<String>,
    jobs: Option<usize>,
    cores: Option<usize>,
    dry_run: bool,
    force: bool,
) -> Result<bool, Box<dyn std::error::Error>> {
    if dry_run {
        info!("Mode: DRY RUN (tasks will not execute)");
        println!();
    }

    let mut engine = Engine::new(config);
    engine.set_targets(targets);
    engine.set_dry_run(dry_run);
    engine.set_force(force);
    if let Some(cores) = cores {
        engine.set_cores(cores);
        engine.set_max_parallel(cores);
    }
    if let Some(jobs) = jobs {
        engine.set_max_parallel(jobs);
    }

    let summary = engine.run()?;
    summary.print();
    Ok(summary.success())
}

/// Main application entry point.
fn run(cli: Cli) -> Result<bool, Box<dyn std::error::Error>> {
    info!("Loading configuration: {}", cli.config.display());
    let config = load_config(&cli.config).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    match cli.command {
        Commands::Run {
            targets,
            jobs,
            cores,
            dry_run,
            force,
        } => {
            config.log_summary();
            run_pipeline(config, targets, jobs, cores, dry_run, force)
        }
        Commands::Clean {
            outputs_only,
            cache_only,
        } => {
            let scope = if outputs_only {
                CleanScope::OutputsOnly
            } else if cache_only {
                CleanScope::CacheOnly
            } else {
                CleanScope::Everything
            };
            let removed = Layout::new(&config.output_root).clean(&config.cache_dir, scope)?;
            let noun = if removed.len() == 1 { "directory" } else { "directories" };
            info!("Removed {} {}", removed.len(), noun);
            Ok(true)
        }
        Commands::Graph { output } => {
            let graph = build_task_graph(&config)?;
            match output {
                Some(path) => save_graph(&graph, &path)?,
                None => print!("{}", serde_yaml::to_string(&graph)?),
            }
            Ok(true)
        }
        Commands::Seeds => {
            for seed in &config.seeds {
                println!("{}", seed);
            }
            Ok(true)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    if matches!(cli.command, Commands::Run { .. }) {
        print_banner();
    }

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
