//! Demographic Inference Tools
//!
//! Each estimator is a three stage pipeline behind the [`Estimator`] trait:
//!
//! 1. `format`: simulated genotypes to the tool's input format
//! 2. `run`: the external estimator, blocking until it exits
//! 3. `convert`: the tool's raw output to the common [`NeTable`]
//!
//! [`Tool::estimator`] selects the implementation for a tool.

pub mod msmc;
pub mod smcpp;
pub mod stairway;
pub mod table;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::RunConfig;
use crate::environment::Toolchain;
use crate::error::Result;
pub use msmc::Msmc;
pub use smcpp::SmcPlusPlus;
pub use stairway::StairwayPlot;
pub use table::{NeRow, NeTable};

/// The three compared inference tools.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    Stairway,
    Smcpp,
    Msmc,
}

impl Tool {
    pub const ALL: [Tool; 3] = [Tool::Stairway, Tool::Smcpp, Tool::Msmc];

    /// Short name used in paths, rule names and targets.
    pub fn name(&self) -> &'static str {
        match self {
            Tool::Stairway => "stairway",
            Tool::Smcpp => "smcpp",
            Tool::Msmc => "msmc",
        }
    }

    /// Name used in plots and reports.
    pub fn display_name(&self) -> &'static str {
        match self {
            Tool::Stairway => "stairway plot",
            Tool::Smcpp => "SMC++",
            Tool::Msmc => "MSMC",
        }
    }

    pub fn estimator(&self) -> &'static dyn Estimator {
        match self {
            Tool::Stairway => &StairwayPlot,
            Tool::Smcpp => &SmcPlusPlus,
            Tool::Msmc => &Msmc,
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Tool {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Tool::ALL
            .iter()
            .copied()
            .find(|t| t.name() == s)
            .ok_or_else(|| format!("Unknown tool '{}'", s))
    }
}

/// Rescaling constants for the converters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rates {
    pub mutation_rate: f64,
    pub generation_time: f64,
}

impl Rates {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            mutation_rate: config.mutation_rate,
            generation_time: config.generation_time,
        }
    }
}

/// Inputs of one adapter call.
#[derive(Debug, Clone)]
pub struct FormatRequest<'a> {
    pub seed: u64,

    /// Simulated genotypes; one per chromosome
    pub vcfs: &'a [PathBuf],

    pub output: &'a Path,

    /// Haplotypes to keep (MSMC sub-sampling)
    pub sample_size: Option<usize>,

    pub population: &'a str,
}

/// Inputs of one estimator run.
#[derive(Debug, Clone)]
pub struct RunRequest<'a> {
    pub config: &'a RunConfig,
    pub seed: u64,
    pub sample_size: Option<usize>,

    /// Formatted inputs sharing this seed (and sample size)
    pub inputs: &'a [PathBuf],

    /// Raw estimate the run must produce
    pub output: &'a Path,

    pub threads: usize,
}

pub trait Estimator: Send + Sync {
    fn tool(&self) -> Tool;

    /// Converts simulated genotypes into the tool's input format.
    fn format(&self, request: &FormatRequest<'_>) -> Result<()>;

    /// Runs the external estimator and leaves the raw estimate at `request.output`.
    fn run(&self, request: &RunRequest<'_>, toolchain: &Toolchain) -> Result<()>;

    /// Rescales a raw estimate into generations, years and individuals.
    fn convert(&self, raw: &Path, rates: &Rates) -> Result<NeTable>;
}

/// Fails with an estimation error unless the run left a non-empty output.
pub(crate) fn require_output(tool: Tool, path: &Path) -> Result<()> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.len() > 0 => Ok(()),
        Ok(_) => Err(crate::error::NeError::estimation(
            tool.display_name(),
            format!("{} is empty", path.display()),
        )),
        Err(_) => Err(crate::error::NeError::estimation(
            tool.display_name(),
            format!("no output at {}", path.display()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_names() {
        assert_eq!(Tool::Smcpp.name(), "smcpp");
        assert_eq!(Tool::Smcpp.display_name(), "SMC++");
        assert_eq!("msmc".parse::<Tool>().unwrap(), Tool::Msmc);
        assert!("beast".parse::<Tool>().is_err());
    }

    #[test]
    fn test_estimator_dispatch() {
        for tool in Tool::ALL {
            assert_eq!(tool.estimator().tool(), tool);
        }
    }

    #[test]
    fn test_require_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.txt");

        assert!(require_output(Tool::Msmc, &path).is_err());
        std::fs::write(&path, "").unwrap();
        assert_eq!(require_output(Tool::Msmc, &path).unwrap_err().category(), "EstimationError");
        std::fs::write(&path, "x").unwrap();
        assert!(require_output(Tool::Msmc, &path).is_ok());
    }
}
