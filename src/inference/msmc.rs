//! MSMC.

use std::fs;
use std::path::{Path, PathBuf};

use super::{require_output, Estimator, FormatRequest, NeTable, Rates, RunRequest, Tool};
use crate::environment::{ExternalTool, Toolchain};
use crate::error::{NeError, Result};
use crate::formats::write_multihetsep;

const FINAL_SUFFIX: &str = ".final.txt";

#[derive(Debug, Clone, Copy, Default)]
pub struct Msmc;

/// One row of `<prefix>.final.txt`: scaled left time boundary and
/// coalescence rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MsmcRow {
    pub left_time_boundary: f64,
    pub lambda: f64,
}

/// Rescales one row to `(generations, ne)`.
pub fn rescale(left_time_boundary: f64, lambda: f64, mutation_rate: f64) -> (f64, f64) {
    (
        left_time_boundary / mutation_rate,
        (1.0 / lambda) / (2.0 * mutation_rate),
    )
}

/// Inverse of [`rescale`].
pub fn unscale(generations: f64, ne: f64, mutation_rate: f64) -> (f64, f64) {
    (generations * mutation_rate, 1.0 / (ne * 2.0 * mutation_rate))
}

/// Output prefix passed to `msmc -o` for a given `.final.txt` path.
pub fn output_prefix(final_path: &Path) -> Option<PathBuf> {
    let text = final_path.to_str()?;
    text.strip_suffix(FINAL_SUFFIX).map(PathBuf::from)
}

pub fn read_final(path: &Path) -> Result<Vec<MsmcRow>> {
    let content = fs::read_to_string(path).map_err(|e| NeError::format(path, e.to_string()))?;
    let mut lines = content.lines().filter(|l| !l.trim().is_empty());

    let header: Vec<&str> = lines
        .next()
        .ok_or_else(|| NeError::format(path, "file is empty"))?
        .split_whitespace()
        .collect();

    let time_col = header
        .iter()
        .position(|h| *h == "left_time_boundary")
        .ok_or_else(|| NeError::format(path, "missing column 'left_time_boundary'"))?;
    let lambda_col = header
        .iter()
        .position(|h| h.starts_with("lambda"))
        .ok_or_else(|| NeError::format(path, "missing lambda column"))?;

    let mut rows = Vec::new();
    for line in lines {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let value = |col: usize| -> Result<f64> {
            fields
                .get(col)
                .and_then(|v| v.parse::<f64>().ok())
                .ok_or_else(|| NeError::format(path, format!("bad row '{}'", line)))
        };

        let row = MsmcRow {
            left_time_boundary: value(time_col)?,
            lambda: value(lambda_col)?,
        };
        if !(row.lambda > 0.0) {
            return Err(NeError::format(path, format!("non-positive lambda in '{}'", line)));
        }
        rows.push(row);
    }

    if rows.is_empty() {
        return Err(NeError::format(path, "no rows"));
    }
    Ok(rows)
}

impl Estimator for Msmc {
    fn tool(&self) -> Tool {
        Tool::Msmc
    }

    fn format(&self, request: &FormatRequest<'_>) -> Result<()> {
        let vcf = request
            .vcfs
            .first()
            .ok_or_else(|| NeError::format(request.output, "no VCF input"))?;
        let haplotypes = request
            .sample_size
            .ok_or_else(|| NeError::format(request.output, "no MSMC sample size"))?;

        write_multihetsep(vcf, request.output, haplotypes)?;
        Ok(())
    }

    fn run(&self, request: &RunRequest<'_>, toolchain: &Toolchain) -> Result<()> {
        let tool = self.tool().display_name();
        let prefix = output_prefix(request.output).ok_or_else(|| {
            NeError::estimation(
                tool,
                format!("output {} does not end in {}", request.output.display(), FINAL_SUFFIX),
            )
        })?;

        let run = toolchain
            .command(ExternalTool::Msmc)
            .arg("-t")
            .arg(request.threads.to_string())
            .arg("-i")
            .arg(request.config.msmc_iterations.to_string())
            .arg("-o")
            .path_arg(&prefix)
            .args(request.inputs.iter().map(|p| p.display().to_string()));

        toolchain.run_checked(&run, |msg| NeError::estimation(tool, msg))?;
        require_output(self.tool(), request.output)
    }

    fn convert(&self, raw: &Path, rates: &Rates) -> Result<NeTable> {
        let points = read_final(raw)?
            .into_iter()
            .map(|row| rescale(row.left_time_boundary, row.lambda, rates.mutation_rate));
        Ok(NeTable::from_generations(points, rates.generation_time))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rescale_inverse_consistent() {
        let mu = 1.25e-8;
        for (t, lambda) in [(0.0, 2500.0), (1.3e-5, 812.4), (0.002, 35.0)] {
            let (g, ne) = rescale(t, lambda, mu);
            let (t2, lambda2) = unscale(g, ne, mu);
            assert!((t - t2).abs() <= 1e-12 * t.abs().max(1e-12));
            assert!((lambda - lambda2).abs() <= 1e-9 * lambda);
        }
    }

    #[test]
    fn test_output_prefix() {
        assert_eq!(
            output_prefix(Path::new("out/Intermediate/7/msmc_4.final.txt")),
            Some(PathBuf::from("out/Intermediate/7/msmc_4"))
        );
        assert_eq!(output_prefix(Path::new("out/msmc_4.txt")), None);
    }

    #[test]
    fn test_convert_final() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("msmc_4.final.txt");
        fs::write(
            &path,
            "time_index\tleft_time_boundary\tright_time_boundary\tlambda_00\n\
             0\t0\t1e-5\t2000\n\
             1\t1e-5\t2e-5\t1000\n",
        )
        .unwrap();

        let rates = Rates { mutation_rate: 1.0e-8, generation_time: 10.0 };
        let table = Msmc.convert(&path, &rates).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.rows[0].generations, 0.0);
        assert!((table.rows[0].ne - 25_000.0).abs() < 1e-6);
        assert!((table.rows[1].generations - 1000.0).abs() < 1e-6);
        assert!((table.rows[1].years - 10_000.0).abs() < 1e-4);
        assert!((table.rows[1].ne - 50_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_final_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("msmc_4.final.txt");
        fs::write(&path, "time_index\tleft_time_boundary\tright_time_boundary\tlambda\n").unwrap();

        let err = read_final(&path).unwrap_err();
        assert_eq!(err.category(), "FormatError");
    }
}
