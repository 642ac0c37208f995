//! Common Ne(t) table.
//!
//! Every converter writes the same CSV layout:
//!
//! ```text
//! generations,years,ne
//! 0,0,14312.5
//! 120.4,3010,12001.9
//! ```

use std::path::Path;

use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{NeError, Result};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct NeRow {
    pub generations: f64,
    pub years: f64,
    pub ne: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NeTable {
    pub rows: Vec<NeRow>,
}

impl NeTable {
    /// Builds a table from `(generations, ne)` points.
    pub fn from_generations<I>(points: I, generation_time: f64) -> Self
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        let rows = points
            .into_iter()
            .map(|(generations, ne)| NeRow {
                generations,
                years: generations * generation_time,
                ne,
            })
            .collect();
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Points usable on log–log axes: strictly positive time and size.
    pub fn log_points(&self) -> Vec<(f64, f64)> {
        self.rows
            .iter()
            .filter(|r| {
                r.generations > 0.0 && r.ne > 0.0 && r.generations.is_finite() && r.ne.is_finite()
            })
            .map(|r| (r.generations, r.ne))
            .collect()
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = WriterBuilder::new().has_headers(true).from_path(path.as_ref())?;
        for row in &self.rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)
            .map_err(|e| NeError::format(path, e.to_string()))?;

        let rows = reader
            .deserialize()
            .collect::<std::result::Result<Vec<NeRow>, _>>()
            .map_err(|e| NeError::format(path, e.to_string()))?;

        Ok(Self { rows })
    }
}
