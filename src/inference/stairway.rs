//! Stairway plot.
//!
//! The estimator is driven by a blueprint file: `Stairbuilder` turns the
//! blueprint into a shell script, and the script runs the bootstrapped
//! estimation, leaving `<popid>.final.summary` in the project directory.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};

use super::{require_output, Estimator, FormatRequest, NeTable, Rates, RunRequest, Tool};
use crate::environment::{ExternalTool, Toolchain};
use crate::error::{NeError, Result};
use crate::formats::SiteFrequencySpectrum;

/// Java class generating the run script from a blueprint.
const STAIRBUILDER_CLASS: &str = "Stairbuilder";

#[derive(Debug, Clone, Copy, Default)]
pub struct StairwayPlot;

/// Settings written into one blueprint.
#[derive(Debug, Clone)]
pub struct Blueprint {
    pub popid: String,
    pub sfs: SiteFrequencySpectrum,
    pub project_dir: PathBuf,
    pub stairway_plot_dir: PathBuf,
    pub bootstraps: usize,
    pub random_seed: u64,
    pub mutation_rate: f64,
    pub generation_time: f64,
}

impl Blueprint {
    /// Random break points tried during training, as fractions of nseq - 2.
    fn nrand(&self) -> Vec<usize> {
        let k = self.sfs.haplotypes.saturating_sub(2);
        vec![(k / 4).max(1), (k / 2).max(1), (k * 3 / 4).max(1), k.max(1)]
    }

    pub fn render(&self) -> String {
        let join = |values: Vec<String>| values.join("\t");
        let sfs = join(self.sfs.counts.iter().map(|c| c.to_string()).collect());
        let nrand = join(self.nrand().iter().map(|n| n.to_string()).collect());

        let mut text = String::new();
        text.push_str(&format!("popid: {}\n", self.popid));
        text.push_str(&format!("nseq: {}\n", self.sfs.haplotypes));
        text.push_str(&format!("L: {}\n", self.sfs.sequence_length));
        text.push_str("whether_folded: false\n");
        text.push_str(&format!("SFS: {}\n", sfs));
        text.push_str("smallest_size_of_SFS_bin_used_for_estimation: 1\n");
        text.push_str(&format!(
            "largest_size_of_SFS_bin_used_for_estimation: {}\n",
            self.sfs.haplotypes.saturating_sub(1)
        ));
        text.push_str("pct_training: 0.67\n");
        text.push_str(&format!("nrand: {}\n", nrand));
        text.push_str(&format!("project_dir: {}\n", self.project_dir.display()));
        text.push_str(&format!("stairway_plot_dir: {}\n", self.stairway_plot_dir.display()));
        text.push_str(&format!("ninput: {}\n", self.bootstraps));
        text.push_str(&format!("random_seed: {}\n", self.random_seed));
        text.push_str(&format!("mu: {:e}\n", self.mutation_rate));
        text.push_str(&format!("year_per_generation: {}\n", self.generation_time));
        text.push_str(&format!("plot_title: {}\n", self.popid));
        text.push_str("xrange: 0.1,10000\n");
        text.push_str("yrange: 0,0\n");
        text.push_str("xspacing: 2\n");
        text.push_str("yspacing: 2\n");
        text.push_str("fontsize: 12\n");
        text
    }

    /// Where the estimation leaves its summary.
    pub fn summary_path(&self) -> PathBuf {
        self.project_dir.join(format!("{}.final.summary", self.popid))
    }
}

/// Rescales one summary row: `(mutation_per_site, theta_per_site_median)`
/// to `(generations, ne)`.
pub fn rescale(mutation_per_site: f64, theta_per_site: f64, mutation_rate: f64) -> (f64, f64) {
    (
        mutation_per_site / mutation_rate,
        theta_per_site / (4.0 * mutation_rate),
    )
}

/// Inverse of [`rescale`].
pub fn unscale(generations: f64, ne: f64, mutation_rate: f64) -> (f64, f64) {
    (generations * mutation_rate, ne * 4.0 * mutation_rate)
}

/// Reads `(mutation_per_site, theta_per_site_median)` from a summary file.
pub fn read_summary(path: &Path) -> Result<Vec<(f64, f64)>> {
    let content = fs::read_to_string(path).map_err(|e| NeError::format(path, e.to_string()))?;
    let mut lines = content.lines().filter(|l| !l.trim().is_empty());

    let header: Vec<&str> = lines
        .next()
        .ok_or_else(|| NeError::format(path, "summary is empty"))?
        .split('\t')
        .map(str::trim)
        .collect();

    let column = |name: &str| {
        header
            .iter()
            .position(|h| *h == name)
            .ok_or_else(|| NeError::format(path, format!("missing column '{}'", name)))
    };
    let time_col = column("mutation_per_site")?;
    let theta_col = column("theta_per_site_median")?;

    let mut rows = Vec::new();
    for line in lines {
        let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
        let value = |col: usize| -> Result<f64> {
            fields
                .get(col)
                .and_then(|v| v.parse::<f64>().ok())
                .ok_or_else(|| NeError::format(path, format!("bad row '{}'", line)))
        };
        rows.push((value(time_col)?, value(theta_col)?));
    }

    if rows.is_empty() {
        return Err(NeError::format(path, "summary has no rows"));
    }
    Ok(rows)
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

impl Estimator for StairwayPlot {
    fn tool(&self) -> Tool {
        Tool::Stairway
    }

    fn format(&self, request: &FormatRequest<'_>) -> Result<()> {
        let sfs = SiteFrequencySpectrum::from_vcfs(request.vcfs)?;
        if sfs.segregating_sites() == 0 {
            return Err(NeError::format(request.output, "no segregating sites across chromosomes"));
        }

        sfs.write(request.output)?;
        info!(
            "SFS for seed {}: {} haplotypes, L = {}, {} segregating sites",
            request.seed,
            sfs.haplotypes,
            sfs.sequence_length,
            sfs.segregating_sites()
        );
        Ok(())
    }

    fn run(&self, request: &RunRequest<'_>, toolchain: &Toolchain) -> Result<()> {
        let tool = self.tool().display_name();
        let sfs_path = request
            .inputs
            .first()
            .ok_or_else(|| NeError::estimation(tool, "no SFS input"))?;
        let sfs = SiteFrequencySpectrum::read(sfs_path)?;

        let output = absolute(request.output)?;
        let work_dir = output
            .parent()
            .map(|p| p.join("stairway"))
            .ok_or_else(|| NeError::estimation(tool, "output has no parent directory"))?;

        if work_dir.exists() {
            fs::remove_dir_all(&work_dir)?;
        }
        fs::create_dir_all(&work_dir)?;

        let popid = request.config.population.clone();
        let blueprint = Blueprint {
            popid: popid.clone(),
            sfs,
            project_dir: work_dir.join(&popid),
            stairway_plot_dir: absolute(&toolchain.cache().stairway_classpath())?,
            bootstraps: request.config.stairway_bootstraps,
            random_seed: request.seed,
            mutation_rate: request.config.mutation_rate,
            generation_time: request.config.generation_time,
        };

        let blueprint_name = format!("{}.blueprint", popid);
        let blueprint_path = work_dir.join(&blueprint_name);
        fs::write(&blueprint_path, blueprint.render())?;
        debug!("Wrote blueprint {}", blueprint_path.display());

        let build = toolchain
            .command(ExternalTool::Java)
            .arg("-cp")
            .path_arg(&blueprint.stairway_plot_dir)
            .arg(STAIRBUILDER_CLASS)
            .arg(&blueprint_name)
            .in_dir(&work_dir);
        toolchain.run_checked(&build, |msg| NeError::estimation(tool, msg))?;

        let script = toolchain
            .command(ExternalTool::Bash)
            .arg(format!("{}.sh", blueprint_name))
            .in_dir(&work_dir);
        toolchain.run_checked(&script, |msg| NeError::estimation(tool, msg))?;

        let summary = blueprint.summary_path();
        require_output(self.tool(), &summary)?;
        fs::copy(&summary, &output)?;
        Ok(())
    }

    fn convert(&self, raw: &Path, rates: &Rates) -> Result<NeTable> {
        let points = read_summary(raw)?
            .into_iter()
            .map(|(time, theta)| rescale(time, theta, rates.mutation_rate));
        Ok(NeTable::from_generations(points, rates.generation_time))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUMMARY: &str = "mutation_per_site\tn_estimation\ttheta_per_site_median\t\
        theta_per_site_2.5%\ttheta_per_site_97.5%\tyear\tNe_median\n\
        1.2e-6\t200\t4.0e-4\t3.0e-4\t5.0e-4\t2400\t7750\n\
        2.4e-5\t200\t2.0e-4\t1.0e-4\t3.0e-4\t48000\t3875\n";

    #[test]
    fn test_rescale_inverse_consistent() {
        let mu = 1.29e-8;
        for (m, theta) in [(1.0e-6, 4.0e-4), (3.3e-3, 1.7e-5), (0.0, 2.0e-4)] {
            let (g, ne) = rescale(m, theta, mu);
            let (m2, theta2) = unscale(g, ne, mu);
            assert!((m - m2).abs() <= 1e-12 * m.abs().max(1.0));
            assert!((theta - theta2).abs() <= 1e-12 * theta.abs().max(1.0));
        }
    }

    #[test]
    fn test_convert_summary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pop.final.summary");
        fs::write(&path, SUMMARY).unwrap();

        let rates = Rates { mutation_rate: 1.0e-8, generation_time: 20.0 };
        let table = StairwayPlot.convert(&path, &rates).unwrap();

        assert_eq!(table.len(), 2);
        assert!((table.rows[0].generations - 120.0).abs() < 1e-6);
        assert!((table.rows[0].years - 2400.0).abs() < 1e-4);
        assert!((table.rows[0].ne - 10_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_summary_missing_column_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.summary");
        fs::write(&path, "year\tNe_median\n1\t2\n").unwrap();

        let err = read_summary(&path).unwrap_err();
        assert!(err.to_string().contains("mutation_per_site"));
    }

    #[test]
    fn test_blueprint_render() {
        let mut sfs = SiteFrequencySpectrum::new(6, 1000);
        sfs.counts = vec![5, 4, 3, 2, 1];

        let blueprint = Blueprint {
            popid: "YRI".to_string(),
            sfs,
            project_dir: PathBuf::from("/w/YRI"),
            stairway_plot_dir: PathBuf::from("/c/stairway_plot_es"),
            bootstraps: 200,
            random_seed: 77,
            mutation_rate: 1.29e-8,
            generation_time: 25.0,
        };

        let text = blueprint.render();
        assert!(text.contains("nseq: 6\n"));
        assert!(text.contains("SFS: 5\t4\t3\t2\t1\n"));
        assert!(text.contains("largest_size_of_SFS_bin_used_for_estimation: 5\n"));
        assert!(text.contains("nrand: 1\t2\t3\t4\n"));
        assert!(text.contains("ninput: 200\n"));
        assert!(text.contains("random_seed: 77\n"));
        assert!(text.contains("project_dir: /w/YRI\n"));
        assert_eq!(blueprint.summary_path(), PathBuf::from("/w/YRI/YRI.final.summary"));
    }
}
