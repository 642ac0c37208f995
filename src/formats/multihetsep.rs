//! MSMC multihetsep files.
//!
//! One line per segregating site of the sub-sample:
//!
//! ```text
//! chr1	1045	1045	ACCA
//! chr1	2311	1266	AACA
//! ```
//!
//! Columns are chromosome, 1-based position, the number of called sites
//! since the previous line (the current site included), and one allele per
//! haplotype of the first `n` haplotypes.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::debug;

use crate::error::{NeError, Result};
use crate::formats::vcf::VcfReader;

/// Writes the multihetsep file for the first `haplotypes` haplotypes of a VCF.
///
/// Returns the number of sites written. Sites monomorphic within the
/// sub-sample are dropped; their span is folded into the next line's
/// called-site count. A site sharing its position with the previous
/// written site is dropped as well.
pub fn write_multihetsep(vcf_path: &Path, output: &Path, haplotypes: usize) -> Result<usize> {
    let reader = VcfReader::open(vcf_path)?;

    let available = reader.haplotype_count();
    if haplotypes < 2 || haplotypes > available {
        return Err(NeError::format(
            vcf_path,
            format!("cannot take {} haplotypes from {} available", haplotypes, available),
        ));
    }

    let mut writer = BufWriter::new(File::create(output)?);
    let mut previous: Option<u64> = None;
    let mut written = 0usize;

    for record in reader {
        let record = record?;

        let derived = record.derived_count(haplotypes);
        if derived == 0 || derived == haplotypes {
            continue;
        }

        if record.reference.chars().count() != 1 || record.alternate.chars().count() != 1 {
            continue;
        }

        let called = match previous {
            Some(prev) if record.pos <= prev => continue,
            Some(prev) => record.pos - prev,
            None => record.pos.max(1),
        };

        let alleles: String = record.haplotypes[..haplotypes]
            .iter()
            .map(|&h| if h == 0 { record.reference.as_str() } else { record.alternate.as_str() })
            .collect();

        writeln!(
            writer,
            "{}\t{}\t{}\t{}",
            record.chrom,
            record.pos,
            called,
            alleles
        )?;

        previous = Some(record.pos);
        written += 1;
    }

    writer.flush()?;

    if written == 0 {
        return Err(NeError::format(
            vcf_path,
            format!("no sites segregating among the first {} haplotypes", haplotypes),
        ));
    }

    debug!("{} -> {}: {} sites", vcf_path.display(), output.display(), written);
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::vcf::tests::vcf_text;
    use std::fs;

    #[test]
    fn test_subsample_drops_monomorphic_sites() {
        let dir = tempfile::tempdir().unwrap();
        let vcf = dir.path().join("chr1.vcf");
        fs::write(
            &vcf,
            vcf_text(
                "chr1",
                1000,
                3,
                &[
                    (100, vec!["0|1", "0|0", "0|0"]),
                    // only segregating in the third sample
                    (250, vec!["0|0", "0|0", "1|1"]),
                    (400, vec!["1|1", "0|1", "0|0"]),
                ],
            ),
        )
        .unwrap();

        let out = dir.path().join("chr1.4.multihetsep.txt");
        assert_eq!(write_multihetsep(&vcf, &out, 4).unwrap(), 2);

        let text = fs::read_to_string(&out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["chr1\t100\t100\tAGAA", "chr1\t400\t300\tGGAG"]);
    }

    #[test]
    fn test_full_sample_keeps_all_sites() {
        let dir = tempfile::tempdir().unwrap();
        let vcf = dir.path().join("chr1.vcf");
        fs::write(
            &vcf,
            vcf_text("chr1", 1000, 2, &[(5, vec!["0|1", "0|0"]), (9, vec!["0|0", "0|1"])]),
        )
        .unwrap();

        let out = dir.path().join("chr1.4.multihetsep.txt");
        assert_eq!(write_multihetsep(&vcf, &out, 4).unwrap(), 2);
    }

    #[test]
    fn test_too_many_haplotypes_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let vcf = dir.path().join("chr1.vcf");
        fs::write(&vcf, vcf_text("chr1", 10, 2, &[(5, vec!["0|1", "0|0"])])).unwrap();

        let err = write_multihetsep(&vcf, &dir.path().join("out.txt"), 8).unwrap_err();
        assert_eq!(err.category(), "FormatError");
    }

    #[test]
    fn test_no_segregating_sites_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let vcf = dir.path().join("chr1.vcf");
        fs::write(&vcf, vcf_text("chr1", 10, 2, &[(5, vec!["0|0", "0|1"])])).unwrap();

        assert!(write_multihetsep(&vcf, &dir.path().join("out.txt"), 2).is_err());
    }
}
