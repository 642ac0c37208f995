//! SMC++ input files (`.smc.gz`).
//!
//! Gzip-compressed text. The first line is `# SMC++ {json}` naming the
//! distinguished and undistinguished haplotypes; every other line is a
//! run-length row `span a b n`:
//!
//! - `a`: derived alleles carried by the distinguished individual (0..=2)
//! - `b`: derived alleles among the undistinguished haplotypes
//! - `n`: undistinguished haplotypes typed at the site
//!
//! Stretches without variants become one `gap 0 0 n` row. The first
//! sample of the VCF is the distinguished individual.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use log::debug;
use serde_json::json;

use crate::error::{NeError, Result};
use crate::formats::vcf::VcfReader;

/// Format version written into the header.
pub const SMC_VERSION: &str = "1.15.4";

/// One `span a b n` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmcRow {
    pub span: u64,
    pub a: u8,
    pub b: usize,
    pub n: usize,
}

/// Counts reported after writing a file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SmcSummary {
    pub rows: usize,
    pub variants: usize,
}

/// Converts one chromosome's VCF into an `.smc.gz` file.
pub fn write_smc(vcf_path: &Path, output: &Path, population: &str) -> Result<SmcSummary> {
    let reader = VcfReader::open(vcf_path)?;
    let samples = reader.header().samples.clone();
    if samples.len() < 2 {
        return Err(NeError::format(
            vcf_path,
            "SMC++ needs at least two samples (one distinguished, one undistinguished)",
        ));
    }

    let chrom_length = reader.header().contigs.first().map(|(_, len)| *len);
    let undistinguished = 2 * (samples.len() - 1);

    let mut rows = Vec::new();
    let mut previous: Option<u64> = None;
    let mut variants = 0usize;
    let mut stacked = 0usize;

    for record in reader {
        let record = record?;

        // Rounded positions can collide; keep the first site at each position.
        let gap = match previous {
            Some(prev) if record.pos <= prev => {
                stacked += 1;
                continue;
            }
            Some(prev) => record.pos - prev - 1,
            None => record.pos.saturating_sub(1),
        };
        if gap > 0 {
            rows.push(SmcRow { span: gap, a: 0, b: 0, n: undistinguished });
        }

        let a = record.haplotypes[..2].iter().filter(|&&h| h == 1).count() as u8;
        let b = record.haplotypes[2..].iter().filter(|&&h| h == 1).count();
        rows.push(SmcRow { span: 1, a, b, n: undistinguished });

        previous = Some(record.pos);
        variants += 1;
    }

    let last = match previous {
        Some(pos) => pos,
        None => return Err(NeError::format(vcf_path, "no usable sites")),
    };

    if let Some(length) = chrom_length {
        if length > last {
            rows.push(SmcRow { span: length - last, a: 0, b: 0, n: undistinguished });
        }
    }

    if stacked > 0 {
        debug!("{}: dropped {} sites sharing a position", vcf_path.display(), stacked);
    }

    let header = smc_header(population, &samples);
    write_rows(output, &header, &rows)?;

    let summary = SmcSummary { rows: rows.len(), variants };
    debug!(
        "{} -> {}: {} rows, {} variants",
        vcf_path.display(),
        output.display(),
        summary.rows,
        summary.variants
    );
    Ok(summary)
}

/// Builds the JSON header naming distinguished and undistinguished haplotypes.
fn smc_header(population: &str, samples: &[String]) -> String {
    let dist: Vec<_> = (0..2).map(|h| json!([samples[0], h])).collect();
    let undist: Vec<_> = samples[1..]
        .iter()
        .flat_map(|s| (0..2).map(move |h| json!([s, h])))
        .collect();

    let meta = json!({
        "version": SMC_VERSION,
        "pids": [population],
        "dist": [dist],
        "undist": [undist],
    });

    format!("# SMC++ {}", meta)
}

fn write_rows(output: &Path, header: &str, rows: &[SmcRow]) -> Result<()> {
    let file = File::create(output)?;
    let mut writer = BufWriter::new(GzEncoder::new(file, Compression::default()));

    writeln!(writer, "{}", header)?;
    for row in rows {
        writeln!(writer, "{} {} {} {}", row.span, row.a, row.b, row.n)?;
    }

    let encoder = writer.into_inner().map_err(|e| e.into_error())?;
    encoder.finish()?;
    Ok(())
}
