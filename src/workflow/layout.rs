//! Output Layout
//!
//! Every path the pipeline produces, relative to the output root:
//!
//! | Artifact | Pattern |
//! |---|---|
//! | genealogy | `Intermediate/{seed}/{chrom}.trees` |
//! | genotypes | `Intermediate/{seed}/{chrom}.vcf` |
//! | stairway input | `Intermediate/{seed}/sfs_{seed}.txt` |
//! | SMC++ input | `Intermediate/{seed}/{chrom}.smc.gz` |
//! | MSMC input | `Intermediate/{seed}/{chrom}.{n}.multihetsep.txt` |
//! | Stairway raw estimate | `Intermediate/{seed}/sfs_{seed}.final.summary` |
//! | SMC++ raw estimate | `Intermediate/{seed}/smcpp/model.final.json` |
//! | MSMC raw estimate | `Intermediate/{seed}/msmc_{n}.final.txt` |
//! | Ne(t) tables | `Results/{seed}/{tool}_estimated_Ne.csv` (`msmc_{n}_...` for MSMC) |
//! | plots | `Results/{tool}_estimated_Ne.svg`, `Results/all_estimated_Ne.svg` |

use std::fs;
use std::path::{Path, PathBuf};

use log::info;

use crate::error::Result;
use crate::inference::Tool;
use crate::workflow::wildcards::{substitute, Bindings};

pub const INTERMEDIATE_DIR: &str = "Intermediate";
pub const RESULTS_DIR: &str = "Results";
pub const STATE_DIR: &str = ".nerunner";

pub const TREES: &str = "Intermediate/{seed}/{chrom}.trees";
pub const VCF: &str = "Intermediate/{seed}/{chrom}.vcf";
pub const SFS: &str = "Intermediate/{seed}/sfs_{seed}.txt";
pub const SMC: &str = "Intermediate/{seed}/{chrom}.smc.gz";
pub const MULTIHETSEP: &str = "Intermediate/{seed}/{chrom}.{n}.multihetsep.txt";
pub const STAIRWAY_SUMMARY: &str = "Intermediate/{seed}/sfs_{seed}.final.summary";
pub const SMCPP_MODEL: &str = "Intermediate/{seed}/smcpp/model.final.json";
pub const MSMC_FINAL: &str = "Intermediate/{seed}/msmc_{n}.final.txt";
pub const TABLE: &str = "Results/{seed}/{tool}_estimated_Ne.csv";
pub const MSMC_TABLE: &str = "Results/{seed}/msmc_{n}_estimated_Ne.csv";
pub const TOOL_PLOT: &str = "Results/{tool}_estimated_Ne.svg";
pub const FINAL_PLOT: &str = "Results/all_estimated_Ne.svg";

/// What `clean` removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanScope {
    Everything,
    OutputsOnly,
    CacheOnly,
}

/// Paths under one output root.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Fills a pattern and places it under the root.
    fn fill(&self, pattern: &str, values: &[(&str, &str)]) -> PathBuf {
        let bindings: Bindings = values
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let relative = substitute(pattern, &bindings).unwrap_or_else(|_| pattern.to_string());
        self.root.join(relative)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    pub fn trees(&self, seed: u64, chrom: &str) -> PathBuf {
        self.fill(TREES, &[("seed", seed.to_string().as_str()), ("chrom", chrom)])
    }

    pub fn vcf(&self, seed: u64, chrom: &str) -> PathBuf {
        self.fill(VCF, &[("seed", seed.to_string().as_str()), ("chrom", chrom)])
    }

    pub fn sfs(&self, seed: u64) -> PathBuf {
        self.fill(SFS, &[("seed", seed.to_string().as_str())])
    }

    pub fn smc(&self, seed: u64, chrom: &str) -> PathBuf {
        self.fill(SMC, &[("seed", seed.to_string().as_str()), ("chrom", chrom)])
    }

    pub fn multihetsep(&self, seed: u64, chrom: &str, n: usize) -> PathBuf {
        self.fill(
            MULTIHETSEP,
            &[
                ("seed", seed.to_string().as_str()),
                ("chrom", chrom),
                ("n", n.to_string().as_str()),
            ],
        )
    }

    /// Raw estimate of one tool run.
    pub fn raw_estimate(&self, tool: Tool, seed: u64, n: Option<usize>) -> PathBuf {
        let seed = seed.to_string();
        match tool {
            Tool::Stairway => self.fill(STAIRWAY_SUMMARY, &[("seed", seed.as_str())]),
            Tool::Smcpp => self.fill(SMCPP_MODEL, &[("seed", seed.as_str())]),
            Tool::Msmc => self.fill(
                MSMC_FINAL,
                &[("seed", seed.as_str()), ("n", n.unwrap_or_default().to_string().as_str())],
            ),
        }
    }

    /// Converted Ne(t) table of one tool run.
    pub fn table(&self, tool: Tool, seed: u64, n: Option<usize>) -> PathBuf {
        let seed = seed.to_string();
        match tool {
            Tool::Msmc => self.fill(
                MSMC_TABLE,
                &[("seed", seed.as_str()), ("n", n.unwrap_or_default().to_string().as_str())],
            ),
            _ => self.fill(TABLE, &[("seed", seed.as_str()), ("tool", tool.name())]),
        }
    }

    pub fn tool_plot(&self, tool: Tool) -> PathBuf {
        self.fill(TOOL_PLOT, &[("tool", tool.name())])
    }

    pub fn final_plot(&self) -> PathBuf {
        self.root.join(FINAL_PLOT)
    }

    /// Deletes generated artifacts and/or the download cache.
    ///
    /// Returns the directories that were removed.
    pub fn clean(&self, cache_dir: &Path, scope: CleanScope) -> Result<Vec<PathBuf>> {
        let mut targets = Vec::new();

        if scope != CleanScope::CacheOnly {
            targets.push(self.root.join(INTERMEDIATE_DIR));
            targets.push(self.root.join(RESULTS_DIR));
            targets.push(self.state_dir());
        }
        if scope != CleanScope::OutputsOnly {
            targets.push(cache_dir.to_path_buf());
        }

        let mut removed = Vec::new();
        for dir in targets {
            if dir.exists() {
                fs::remove_dir_all(&dir)?;
                info!("Removed {}", dir.display());
                removed.push(dir);
            }
        }
        Ok(removed)
    }
}
