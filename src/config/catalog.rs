//! Species Catalog
//!
//! The fixed catalog that species, demographic model and genetic map
//! identifiers are resolved against. A copy is embedded in the binary;
//! an alternative catalog can be supplied as a YAML file with the same
//! layout.

use std::fs;
use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{NeError, Result};

/// Catalog shipped with the binary.
const BUILTIN_CATALOG: &str = include_str!("catalog.yaml");

/// A set of species known to the simulation engine.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Catalog {
    pub species: Vec<Species>,
}

/// One species: its genome, default rates, maps and models.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Species {
    pub id: String,

    #[serde(default)]
    pub name: String,

    /// Default generation time in years
    pub generation_time: f64,

    /// Default per-site per-generation mutation rate
    pub mutation_rate: f64,

    /// Chromosome identifiers in genome order
    pub chromosomes: Vec<String>,

    #[serde(default)]
    pub genetic_maps: Vec<GeneticMap>,

    #[serde(default)]
    pub models: Vec<DemographicModel>,
}

/// A recombination map archive that the simulation engine reads from its cache.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GeneticMap {
    pub id: String,
    pub url: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DemographicModel {
    pub id: String,

    #[serde(default)]
    pub description: String,

    pub populations: Vec<Population>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Population {
    pub id: String,

    /// Piecewise size history, most recent epoch first
    #[serde(default)]
    pub history: Vec<Epoch>,
}

/// One epoch of a population size history.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Epoch {
    /// Generations before present at which the epoch begins (recent edge)
    pub start: f64,

    /// Population size at `start`
    pub size: f64,

    /// Exponential growth rate towards the present, per generation
    #[serde(default)]
    pub growth_rate: f64,
}

impl Catalog {
    /// Parses the catalog embedded in the binary.
    pub fn builtin() -> Result<Self> {
        let catalog: Catalog = serde_yaml::from_str(BUILTIN_CATALOG)?;
        debug!("Built-in catalog: {} species", catalog.species.len());
        Ok(catalog)
    }

    /// Loads a catalog from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            NeError::config(format!("Failed to read catalog '{}': {}", path.display(), e))
        })?;

        let catalog: Catalog = serde_yaml::from_str(&content).map_err(|e| {
            NeError::config(format!("Failed to parse catalog '{}': {}", path.display(), e))
        })?;

        info!("Loaded catalog {} ({} species)", path.display(), catalog.species.len());
        Ok(catalog)
    }

    /// Looks up a species by identifier.
    pub fn species(&self, id: &str) -> Result<&Species> {
        self.species.iter().find(|s| s.id == id).ok_or_else(|| {
            NeError::config(format!(
                "Unknown species '{}' (known: {})",
                id,
                known_ids(self.species.iter().map(|s| s.id.as_str()))
            ))
        })
    }
}

impl Species {
    pub fn model(&self, id: &str) -> Result<&DemographicModel> {
        self.models.iter().find(|m| m.id == id).ok_or_else(|| {
            NeError::config(format!(
                "Unknown demographic model '{}' for species '{}' (known: {})",
                id,
                self.id,
                known_ids(self.models.iter().map(|m| m.id.as_str()))
            ))
        })
    }

    pub fn genetic_map(&self, id: &str) -> Result<&GeneticMap> {
        self.genetic_maps.iter().find(|m| m.id == id).ok_or_else(|| {
            NeError::config(format!(
                "Unknown genetic map '{}' for species '{}' (known: {})",
                id,
                self.id,
                known_ids(self.genetic_maps.iter().map(|m| m.id.as_str()))
            ))
        })
    }
}

impl DemographicModel {
    pub fn population(&self, id: &str) -> Result<&Population> {
        self.populations.iter().find(|p| p.id == id).ok_or_else(|| {
            NeError::config(format!(
                "Unknown population '{}' in model '{}' (known: {})",
                id,
                self.id,
                known_ids(self.populations.iter().map(|p| p.id.as_str()))
            ))
        })
    }
}

impl Population {
    /// Returns true if a ground truth history is known for this population.
    pub fn has_history(&self) -> bool {
        !self.history.is_empty()
    }

    /// Population size `generations` before present.
    pub fn size_at(&self, generations: f64) -> Option<f64> {
        let epoch = self
            .history
            .iter()
            .take_while(|e| e.start <= generations)
            .last()?;

        Some(epoch.size * (-epoch.growth_rate * (generations - epoch.start)).exp())
    }

    /// Samples the size history on a log-spaced grid between two times.
    pub fn truth_curve(&self, from: f64, to: f64, points: usize) -> Vec<(f64, f64)> {
        if !self.has_history() || from <= 0.0 || to <= from || points < 2 {
            return Vec::new();
        }

        let (log_from, log_to) = (from.ln(), to.ln());
        let step = (log_to - log_from) / (points - 1) as f64;

        (0..points)
            .map(|i| (log_from + step * i as f64).exp())
            .filter_map(|t| self.size_at(t).map(|ne| (t, ne)))
            .collect()
    }
}

fn known_ids<'a>(ids: impl Iterator<Item = &'a str>) -> String {
    ids.collect::<Vec<_>>().join(", ")
}
