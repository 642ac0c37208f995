//! SMC++.

use std::fs;
use std::path::Path;

use log::debug;
use serde::Deserialize;

use super::{require_output, Estimator, FormatRequest, NeTable, Rates, RunRequest, Tool};
use crate::environment::{ExternalTool, Toolchain};
use crate::error::{NeError, Result};
use crate::formats::write_smc;

#[derive(Debug, Clone, Copy, Default)]
pub struct SmcPlusPlus;

/// `model.final.json` as written by `smc++ estimate`.
#[derive(Deserialize, Debug, Clone)]
struct ModelFile {
    model: SmcModel,
}

/// Piecewise model in coalescent units: knot times scaled by 2·N0, log sizes
/// relative to N0.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct SmcModel {
    pub knots: Vec<f64>,
    pub y: Vec<f64>,

    #[serde(rename = "N0")]
    pub n0: f64,
}

impl SmcModel {
    pub fn read(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| NeError::format(path, e.to_string()))?;
        let file: ModelFile = serde_json::from_str(&content)
            .map_err(|e| NeError::format(path, format!("invalid SMC++ model: {}", e)))?;

        let model = file.model;
        if model.knots.is_empty() || model.knots.len() != model.y.len() {
            return Err(NeError::format(
                path,
                format!("{} knots but {} sizes", model.knots.len(), model.y.len()),
            ));
        }
        if !(model.n0 > 0.0) {
            return Err(NeError::format(path, format!("invalid N0 {}", model.n0)));
        }
        Ok(model)
    }
}

/// Rescales one knot: `(knot, y)` to `(generations, ne)`.
pub fn rescale(knot: f64, y: f64, n0: f64) -> (f64, f64) {
    (knot * 2.0 * n0, n0 * y.exp())
}

/// Inverse of [`rescale`].
pub fn unscale(generations: f64, ne: f64, n0: f64) -> (f64, f64) {
    (generations / (2.0 * n0), (ne / n0).ln())
}

impl Estimator for SmcPlusPlus {
    fn tool(&self) -> Tool {
        Tool::Smcpp
    }

    fn format(&self, request: &FormatRequest<'_>) -> Result<()> {
        let vcf = request
            .vcfs
            .first()
            .ok_or_else(|| NeError::format(request.output, "no VCF input"))?;
        write_smc(vcf, request.output, request.population)?;
        Ok(())
    }

    fn run(&self, request: &RunRequest<'_>, toolchain: &Toolchain) -> Result<()> {
        let tool = self.tool().display_name();
        let out_dir = request
            .output
            .parent()
            .ok_or_else(|| NeError::estimation(tool, "output has no parent directory"))?;
        fs::create_dir_all(out_dir)?;

        let estimate = toolchain
            .command(ExternalTool::Smcpp)
            .arg("estimate")
            .arg("--cores")
            .arg(request.threads.to_string())
            .arg("-o")
            .path_arg(out_dir)
            .arg(format!("{:e}", request.config.mutation_rate))
            .args(request.inputs.iter().map(|p| p.display().to_string()));

        let output = toolchain.run_checked(&estimate, |msg| NeError::estimation(tool, msg))?;
        debug!("smc++ stdout: {}", output.stdout.trim());

        require_output(self.tool(), request.output)
    }

    fn convert(&self, raw: &Path, rates: &Rates) -> Result<NeTable> {
        let model = SmcModel::read(raw)?;
        let points = model
            .knots
            .iter()
            .zip(&model.y)
            .map(|(&knot, &y)| rescale(knot, y, model.n0));
        Ok(NeTable::from_generations(points, rates.generation_time))
    }
}
