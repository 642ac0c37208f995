//! Run Configuration
//!
//! Loads the JSON run configuration, resolves its identifiers against the
//! species catalog and derives everything that depends on it (chromosome
//! list, mutation rate, replicate seeds) exactly once.
//!
//! # Example
//!
//! ```json
//! {
//!   "seed": 4711,
//!   "population_id": "YRI",
//!   "num_sampled_genomes_per_replicate": 20,
//!   "num_sampled_genomes_msmc": "4 8",
//!   "num_msmc_iterations": 20,
//!   "replicates": 2,
//!   "config": "out",
//!   "species": "HomSap",
//!   "model": "OutOfAfrica_3G09",
//!   "genetic_map": "HapMapII_GRCh37",
//!   "chrm_list": "all",
//!   "generation_time": 25
//! }
//! ```

pub mod catalog;
pub mod seeds;

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{NeError, Result};
pub use catalog::{Catalog, GeneticMap, Population};
pub use seeds::derive_seeds;

/// Which chromosomes of the species genome are simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChromosomeSelection {
    All,
    First(usize),
}

impl ChromosomeSelection {
    /// Applies the selection to the full chromosome list of a species.
    pub fn apply(&self, full: &[String]) -> Vec<String> {
        match *self {
            Self::All => full.to_vec(),
            Self::First(k) => full.iter().take(k).cloned().collect(),
        }
    }
}

impl fmt::Display for ChromosomeSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::First(k) => write!(f, "{}", k),
        }
    }
}

impl<'de> Deserialize<'de> for ChromosomeSelection {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::String(s) if s.trim().eq_ignore_ascii_case("all") => Ok(Self::All),
            Value::String(s) => s
                .trim()
                .parse::<usize>()
                .map(Self::First)
                .map_err(|_| {
                    de::Error::custom(format!(
                        "chrm_list must be \"all\" or an integer, got \"{}\"",
                        s
                    ))
                }),
            Value::Number(n) => n
                .as_u64()
                .map(|k| Self::First(k as usize))
                .ok_or_else(|| de::Error::custom("chrm_list must be a non-negative integer")),
            _ => Err(de::Error::custom("chrm_list must be \"all\" or an integer")),
        }
    }
}

/// The configuration file as written by the user.
#[derive(Deserialize, Debug, Clone)]
pub struct RawConfig {
    pub seed: u64,
    pub population_id: String,
    pub num_sampled_genomes_per_replicate: usize,

    /// MSMC sub-sample sizes: "4 8" or [4, 8]
    #[serde(deserialize_with = "sizes_list")]
    pub num_sampled_genomes_msmc: Vec<usize>,

    pub num_msmc_iterations: usize,
    pub replicates: usize,

    /// Output root
    pub config: PathBuf,

    pub species: String,
    pub model: String,
    pub genetic_map: String,
    pub chrm_list: ChromosomeSelection,
    pub generation_time: f64,

    #[serde(default)]
    pub mutation_rate: Option<f64>,

    #[serde(default = "default_bootstraps")]
    pub num_stairway_bootstraps: usize,

    #[serde(default = "default_threads_per_task")]
    pub threads_per_task: usize,

    #[serde(default)]
    pub cores: Option<usize>,

    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    #[serde(default)]
    pub catalog: Option<PathBuf>,

    /// Program name -> path overrides for external tools
    #[serde(default)]
    pub tools: BTreeMap<String, PathBuf>,
}

fn default_bootstraps() -> usize {
    200
}

fn default_threads_per_task() -> usize {
    4
}

/// Deserializes a space separated string, a single number, or an array
/// of numbers/strings into a list of sizes.
fn sizes_list<'de, D>(deserializer: D) -> std::result::Result<Vec<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    fn parse_token<E: de::Error>(token: &str) -> std::result::Result<usize, E> {
        token
            .parse::<usize>()
            .map_err(|_| E::custom(format!("invalid sample size '{}'", token)))
    }

    match Value::deserialize(deserializer)? {
        Value::String(s) => s.split_whitespace().map(parse_token).collect(),
        Value::Number(n) => n
            .as_u64()
            .map(|v| vec![v as usize])
            .ok_or_else(|| de::Error::custom("sample size must be a non-negative integer")),
        Value::Array(arr) => arr
            .into_iter()
            .map(|v| match v {
                Value::Number(n) => n
                    .as_u64()
                    .map(|v| v as usize)
                    .ok_or_else(|| de::Error::custom("sample size must be a non-negative integer")),
                Value::String(s) => parse_token(s.trim()),
                _ => Err(de::Error::custom("Expected number or string in array")),
            })
            .collect(),
        _ => Err(de::Error::custom("Expected string or array of sample sizes")),
    }
}

/// Fully resolved, immutable run configuration.
///
/// Built once by [`RunConfig::resolve`] and shared behind an `Arc`; every
/// derived value is computed here and nowhere else.
#[derive(Debug, Clone, Serialize)]
pub struct RunConfig {
    pub species: String,
    pub model: String,
    pub genetic_map: GeneticMap,
    pub population: String,

    /// Haploid genomes sampled per replicate
    pub sample_size: usize,

    pub msmc_sample_sizes: Vec<usize>,
    pub replicates: usize,
    pub msmc_iterations: usize,
    pub stairway_bootstraps: usize,

    pub output_root: PathBuf,
    pub cache_dir: PathBuf,

    pub master_seed: u64,
    pub seeds: Vec<u64>,

    pub chromosome_selection: ChromosomeSelection,
    pub chromosomes: Vec<String>,

    pub generation_time: f64,
    pub mutation_rate: f64,

    pub threads_per_task: usize,
    pub cores: usize,

    pub tool_paths: BTreeMap<String, PathBuf>,

    /// Ground truth size history of the sampled population, if known
    pub truth: Option<Population>,
}

impl RunConfig {
    /// Validates a raw configuration and resolves it against a catalog.
    pub fn resolve(raw: RawConfig, catalog: &Catalog) -> Result<Self> {
        let species = catalog.species(&raw.species)?;
        let model = species.model(&raw.model)?;
        let population = model.population(&raw.population_id)?;
        let genetic_map = species.genetic_map(&raw.genetic_map)?;

        if raw.replicates < 1 {
            return Err(NeError::config("replicates must be at least 1"));
        }

        let n = raw.num_sampled_genomes_per_replicate;
        if n < 4 || n % 2 != 0 {
            return Err(NeError::config(format!(
                "num_sampled_genomes_per_replicate must be an even number >= 4, got {}",
                n
            )));
        }

        if raw.num_sampled_genomes_msmc.is_empty() {
            return Err(NeError::config("num_sampled_genomes_msmc lists no sample sizes"));
        }

        let mut seen = HashSet::new();
        for &size in &raw.num_sampled_genomes_msmc {
            if size < 2 || size > n {
                return Err(NeError::config(format!(
                    "MSMC sample size {} is outside 2..={}",
                    size, n
                )));
            }
            if !seen.insert(size) {
                return Err(NeError::config(format!("MSMC sample size {} listed twice", size)));
            }
        }

        if raw.num_msmc_iterations < 1 {
            return Err(NeError::config("num_msmc_iterations must be at least 1"));
        }

        if raw.num_stairway_bootstraps < 1 {
            return Err(NeError::config("num_stairway_bootstraps must be at least 1"));
        }

        if !(raw.generation_time > 0.0 && raw.generation_time.is_finite()) {
            return Err(NeError::config(format!(
                "generation_time must be positive, got {}",
                raw.generation_time
            )));
        }

        let mutation_rate = raw.mutation_rate.unwrap_or(species.mutation_rate);
        if !(mutation_rate > 0.0 && mutation_rate.is_finite()) {
            return Err(NeError::config(format!(
                "mutation_rate must be positive, got {}",
                mutation_rate
            )));
        }

        if raw.chrm_list == ChromosomeSelection::First(0) {
            return Err(NeError::config("chrm_list must select at least one chromosome"));
        }

        let cores = raw.cores.unwrap_or_else(num_cpus::get);
        if cores < 1 || raw.threads_per_task < 1 {
            return Err(NeError::config("cores and threads_per_task must be at least 1"));
        }

        if raw.config.as_os_str().is_empty() {
            return Err(NeError::config("config (output root) must not be empty"));
        }

        let chromosomes = raw.chrm_list.apply(&species.chromosomes);
        let seeds = derive_seeds(raw.seed, raw.replicates);
        let cache_dir = raw.cache_dir.unwrap_or_else(|| raw.config.join("cache"));

        debug!("Derived seeds: {:?}", seeds);
        debug!("Chromosomes: {:?}", chromosomes);

        Ok(Self {
            species: species.id.clone(),
            model: model.id.clone(),
            genetic_map: genetic_map.clone(),
            population: population.id.clone(),
            sample_size: n,
            msmc_sample_sizes: raw.num_sampled_genomes_msmc,
            replicates: raw.replicates,
            msmc_iterations: raw.num_msmc_iterations,
            stairway_bootstraps: raw.num_stairway_bootstraps,
            output_root: raw.config,
            cache_dir,
            master_seed: raw.seed,
            seeds,
            chromosome_selection: raw.chrm_list,
            chromosomes,
            generation_time: raw.generation_time,
            mutation_rate,
            threads_per_task: raw.threads_per_task,
            cores,
            tool_paths: raw.tools,
            truth: population.has_history().then(|| population.clone()),
        })
    }

    /// Parses and resolves a configuration from a JSON string.
    ///
    /// Relative paths are kept as written (relative to the working directory).
    pub fn from_json_str(json: &str) -> Result<Self> {
        let raw: RawConfig = serde_json::from_str(json)
            .map_err(|e| NeError::config(format!("Invalid configuration: {}", e)))?;
        let catalog = match &raw.catalog {
            Some(path) => Catalog::load(path)?,
            None => Catalog::builtin()?,
        };
        Self::resolve(raw, &catalog)
    }

    /// Number of diploid individuals simulated per replicate.
    pub fn individuals(&self) -> usize {
        self.sample_size / 2
    }

    /// Thread hint for one task, clamped to the core budget.
    pub fn task_threads(&self) -> usize {
        self.threads_per_task.min(self.cores).max(1)
    }

    /// Logs a summary of the resolved configuration.
    pub fn log_summary(&self) {
        info!(
            "Species {} / model {} / population {} / map {}",
            self.species, self.model, self.population, self.genetic_map.id
        );
        info!(
            "{} replicate(s), {} chromosome(s), {} genomes each, MSMC sizes {:?}",
            self.replicates,
            self.chromosomes.len(),
            self.sample_size,
            self.msmc_sample_sizes
        );
        info!(
            "mu = {:e}, generation time = {} years",
            self.mutation_rate, self.generation_time
        );
        info!("Output root: {}", self.output_root.display());
    }
}

/// Loads and resolves a configuration file.
///
/// Relative paths inside the file (`config`, `cache_dir`, `catalog`) are
/// interpreted relative to the file's directory.
pub fn load_config(path: impl AsRef<Path>) -> Result<RunConfig> {
    let path = path.as_ref();

    let content = fs::read_to_string(path).map_err(|e| {
        NeError::config(format!("Failed to read config '{}': {}", path.display(), e))
    })?;

    let mut raw: RawConfig = serde_json::from_str(&content).map_err(|e| {
        NeError::config(format!("Failed to parse config '{}': {}", path.display(), e))
    })?;

    let base = path.parent().unwrap_or_else(|| Path::new(""));
    raw.config = rebase(base, &raw.config);
    raw.cache_dir = raw.cache_dir.map(|p| rebase(base, &p));
    raw.catalog = raw.catalog.map(|p| rebase(base, &p));

    let catalog = match &raw.catalog {
        Some(catalog_path) => Catalog::load(catalog_path)?,
        None => Catalog::builtin()?,
    };

    info!("Loaded configuration {}", path.display());
    RunConfig::resolve(raw, &catalog)
}

fn rebase(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base_config() -> Value {
        json!({
            "seed": 4711,
            "population_id": "YRI",
            "num_sampled_genomes_per_replicate": 10,
            "num_sampled_genomes_msmc": "4 8",
            "num_msmc_iterations": 5,
            "replicates": 2,
            "config": "out",
            "species": "HomSap",
            "model": "OutOfAfrica_3G09",
            "genetic_map": "HapMapII_GRCh37",
            "chrm_list": "all",
            "generation_time": 25
        })
    }

    fn resolve(value: Value) -> Result<RunConfig> {
        RunConfig::from_json_str(&value.to_string())
    }

    #[test]
    fn test_resolve_defaults() {
        let config = resolve(base_config()).unwrap();

        assert_eq!(config.species, "HomSap");
        assert_eq!(config.msmc_sample_sizes, vec![4, 8]);
        assert_eq!(config.seeds.len(), 2);
        assert_eq!(config.chromosomes.len(), 24);
        assert_eq!(config.stairway_bootstraps, 200);
        assert_eq!(config.threads_per_task, 4);
        assert_eq!(config.cache_dir, PathBuf::from("out").join("cache"));
        assert!((config.mutation_rate - 1.29e-8).abs() < 1e-20);
        assert!(config.truth.is_some());
        assert_eq!(config.individuals(), 5);
    }

    #[test]
    fn test_msmc_sizes_accept_array() {
        let mut value = base_config();
        value["num_sampled_genomes_msmc"] = json!([2, "6"]);
        let config = resolve(value).unwrap();
        assert_eq!(config.msmc_sample_sizes, vec![2, 6]);
    }

    #[test]
    fn test_chromosome_truncation() {
        for (k, expected) in [(1usize, 1usize), (3, 3), (24, 24), (100, 24)] {
            let mut value = base_config();
            value["chrm_list"] = json!(k);
            let config = resolve(value).unwrap();
            assert_eq!(config.chromosomes.len(), expected);

            let full = Catalog::builtin().unwrap().species("HomSap").unwrap().chromosomes.clone();
            assert_eq!(&full[..expected], &config.chromosomes[..]);
        }
    }

    #[test]
    fn test_chromosome_truncation_as_string() {
        let mut value = base_config();
        value["chrm_list"] = json!("2");
        let config = resolve(value).unwrap();
        assert_eq!(config.chromosomes, vec!["chr1", "chr2"]);
    }

    #[test]
    fn test_missing_key_names_the_key() {
        let mut value = base_config();
        value.as_object_mut().unwrap().remove("population_id");
        let err = resolve(value).unwrap_err();
        assert_eq!(err.category(), "ConfigError");
        assert!(err.to_string().contains("population_id"));
    }

    #[test]
    fn test_unknown_identifiers_fail_fast() {
        for (key, bad) in [
            ("species", "Martian"),
            ("model", "NoSuchModel"),
            ("genetic_map", "NoSuchMap"),
            ("population_id", "XYZ"),
        ] {
            let mut value = base_config();
            value[key] = json!(bad);
            let err = resolve(value).unwrap_err();
            assert_eq!(err.category(), "ConfigError");
            assert!(err.to_string().contains(bad), "{}", err);
        }
    }

    #[test]
    fn test_range_checks() {
        let cases = [
            ("replicates", json!(0)),
            ("num_sampled_genomes_per_replicate", json!(7)),
            ("num_sampled_genomes_msmc", json!("4 12")),
            ("num_sampled_genomes_msmc", json!("4 4")),
            ("num_sampled_genomes_msmc", json!("")),
            ("num_msmc_iterations", json!(0)),
            ("generation_time", json!(0)),
            ("mutation_rate", json!(-1.0)),
            ("chrm_list", json!(0)),
        ];

        for (key, bad) in cases {
            let mut value = base_config();
            value[key] = bad.clone();
            assert!(resolve(value).is_err(), "{} = {} should be rejected", key, bad);
        }
    }

    #[test]
    fn test_mutation_rate_override() {
        let mut value = base_config();
        value["mutation_rate"] = json!(2.5e-8);
        let config = resolve(value).unwrap();
        assert_eq!(config.mutation_rate, 2.5e-8);
    }

    #[test]
    fn test_task_threads_clamped_to_cores() {
        let mut value = base_config();
        value["cores"] = json!(2);
        value["threads_per_task"] = json!(8);
        let config = resolve(value).unwrap();
        assert_eq!(config.task_threads(), 2);
    }

    #[test]
    fn test_load_config_rebases_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, base_config().to_string()).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.output_root, dir.path().join("out"));
        assert_eq!(config.cache_dir, dir.path().join("out").join("cache"));
    }

    #[test]
    fn test_same_seed_same_config() {
        let a = resolve(base_config()).unwrap();
        let b = resolve(base_config()).unwrap();
        assert_eq!(a.seeds, b.seeds);
    }
}
