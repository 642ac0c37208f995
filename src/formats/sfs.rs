//! Unfolded site frequency spectrum.
//!
//! One spectrum per replicate, accumulated over every chromosome of that
//! replicate. The on-disk form is a small key/value text file:
//!
//! ```text
//! nseq	20
//! L	248956422
//! SFS	512	230	141	...
//! ```
//!
//! `SFS` lists the counts of sites carrying 1..nseq-1 derived alleles.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{NeError, Result};
use crate::formats::vcf::VcfReader;

#[derive(Debug, Clone, PartialEq)]
pub struct SiteFrequencySpectrum {
    /// Number of haplotypes (nseq)
    pub haplotypes: usize,

    /// Total number of observed sites, monomorphic included
    pub sequence_length: u64,

    /// `counts[i]` = sites with `i + 1` derived alleles, for i in 0..nseq-1
    pub counts: Vec<u64>,
}

impl SiteFrequencySpectrum {
    pub fn new(haplotypes: usize, sequence_length: u64) -> Self {
        Self {
            haplotypes,
            sequence_length,
            counts: vec![0; haplotypes.saturating_sub(1)],
        }
    }

    /// Accumulates the spectrum over several VCF files.
    ///
    /// All files must carry the same samples. The sequence length is the sum
    /// of each file's contig length, or its last position if the header has
    /// no length.
    pub fn from_vcfs(paths: &[PathBuf]) -> Result<Self> {
        let mut sfs: Option<SiteFrequencySpectrum> = None;

        for path in paths {
            let mut reader = VcfReader::open(path)?;
            let n = reader.haplotype_count();
            let declared = reader.header().contigs.iter().map(|(_, len)| *len).sum::<u64>();

            let spectrum = sfs.get_or_insert_with(|| SiteFrequencySpectrum::new(n, 0));
            if spectrum.haplotypes != n {
                return Err(NeError::format(
                    path,
                    format!("{} haplotypes, expected {}", n, spectrum.haplotypes),
                ));
            }

            let mut last_pos = 0;
            let mut sites = 0usize;
            for record in reader.by_ref() {
                let record = record?;
                spectrum.add_site(record.derived_count(n));
                last_pos = last_pos.max(record.pos);
                sites += 1;
            }

            if sites == 0 {
                return Err(NeError::format(path, "no usable sites"));
            }

            spectrum.sequence_length += if declared > 0 { declared } else { last_pos };
            debug!(
                "{}: {} sites ({} skipped)",
                path.display(),
                sites,
                reader.skipped()
            );
        }

        sfs.ok_or_else(|| NeError::format("<none>", "no VCF inputs for SFS"))
    }

    /// Adds one site with `derived` derived alleles. Fixed and absent
    /// alleles are not segregating and leave the spectrum unchanged.
    pub fn add_site(&mut self, derived: usize) {
        if derived > 0 && derived < self.haplotypes {
            self.counts[derived - 1] += 1;
        }
    }

    pub fn segregating_sites(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let counts = self
            .counts
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join("\t");

        let text = format!(
            "nseq\t{}\nL\t{}\nSFS\t{}\n",
            self.haplotypes, self.sequence_length, counts
        );
        fs::write(path, text)?;
        Ok(())
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| NeError::format(path, e.to_string()))?;

        let mut haplotypes = None;
        let mut sequence_length = None;
        let mut counts = None;

        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            let mut fields = line.split_whitespace();
            let key = fields.next().unwrap_or_default();
            let values: Vec<&str> = fields.collect();

            let parse_err =
                |v: &str| NeError::format(path, format!("invalid {} value '{}'", key, v));
            match key {
                "nseq" => {
                    let v = values.first().copied().unwrap_or_default();
                    haplotypes = Some(v.parse::<usize>().map_err(|_| parse_err(v))?);
                }
                "L" => {
                    let v = values.first().copied().unwrap_or_default();
                    sequence_length = Some(v.parse::<u64>().map_err(|_| parse_err(v))?);
                }
                "SFS" => {
                    counts = Some(
                        values
                            .iter()
                            .map(|v| v.parse::<u64>().map_err(|_| parse_err(*v)))
                            .collect::<Result<Vec<_>>>()?,
                    );
                }
                other => {
                    return Err(NeError::format(path, format!("unknown key '{}'", other)));
                }
            }
        }

        let haplotypes = haplotypes.ok_or_else(|| NeError::format(path, "missing nseq"))?;
        let sequence_length = sequence_length.ok_or_else(|| NeError::format(path, "missing L"))?;
        let counts = counts.ok_or_else(|| NeError::format(path, "missing SFS"))?;

        if counts.len() + 1 != haplotypes {
            return Err(NeError::format(
                path,
                format!("SFS has {} bins, expected {}", counts.len(), haplotypes.saturating_sub(1)),
            ));
        }

        Ok(Self {
            haplotypes,
            sequence_length,
            counts,
        })
    }
}
