//! Streaming VCF reader for simulated genotypes.
//!
//! Reads the subset of VCF 4.x the simulation export produces: `##contig`
//! lengths, the sample header line, and phased or unphased diploid `GT`
//! calls. Multi-allelic sites and sites with a missing call are skipped.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{NeError, Result};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VcfHeader {
    /// Contig identifiers and lengths from `##contig` lines
    pub contigs: Vec<(String, u64)>,
    pub samples: Vec<String>,
}

/// One biallelic site with every haplotype called.
#[derive(Debug, Clone, PartialEq)]
pub struct VcfRecord {
    pub chrom: String,

    /// 1-based position
    pub pos: u64,

    pub reference: String,
    pub alternate: String,

    /// 0/1 allele per haplotype, two per sample in sample order
    pub haplotypes: Vec<u8>,
}

impl VcfRecord {
    /// Number of derived alleles among the first `n` haplotypes.
    pub fn derived_count(&self, n: usize) -> usize {
        self.haplotypes.iter().take(n).filter(|&&a| a == 1).count()
    }
}

pub struct VcfReader<R: BufRead> {
    path: PathBuf,
    header: VcfHeader,
    lines: Lines<R>,
    line_no: usize,
    skipped: usize,
}

impl VcfReader<BufReader<File>> {
    /// Opens a VCF file and parses its header.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| NeError::format(path, e.to_string()))?;
        Self::new(BufReader::new(file), path)
    }
}

impl<R: BufRead> VcfReader<R> {
    pub fn new(reader: R, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut lines = reader.lines();
        let mut header = VcfHeader::default();
        let mut line_no = 0;
        let mut found_columns = false;

        for line in lines.by_ref() {
            let line = line.map_err(|e| NeError::format(&path, e.to_string()))?;
            line_no += 1;

            if let Some(meta) = line.strip_prefix("##") {
                if let Some(contig) = parse_contig(meta) {
                    header.contigs.push(contig);
                }
                continue;
            }

            if line.starts_with("#CHROM") {
                header.samples = line.split('\t').skip(9).map(str::to_string).collect();
                found_columns = true;
                break;
            }

            if !line.trim().is_empty() {
                return Err(NeError::format(
                    &path,
                    format!("line {}: record before the #CHROM header", line_no),
                ));
            }
        }

        if line_no == 0 {
            return Err(NeError::format(&path, "file is empty"));
        }
        if !found_columns {
            return Err(NeError::format(&path, "missing #CHROM header line"));
        }
        if header.samples.is_empty() {
            return Err(NeError::format(&path, "no samples in VCF"));
        }

        debug!(
            "{}: {} samples, {} contig(s)",
            path.display(),
            header.samples.len(),
            header.contigs.len()
        );

        Ok(Self {
            path,
            header,
            lines,
            line_no,
            skipped: 0,
        })
    }

    pub fn header(&self) -> &VcfHeader {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of haplotypes per record.
    pub fn haplotype_count(&self) -> usize {
        self.header.samples.len() * 2
    }

    /// Sites skipped so far (multi-allelic or missing calls).
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn parse_record(&self, line: &str) -> Result<Option<VcfRecord>> {
        let fields: Vec<&str> = line.split('\t').collect();
        let expected = 9 + self.header.samples.len();
        if fields.len() != expected {
            return Err(
                self.error(format!("expected {} columns, found {}", expected, fields.len()))
            );
        }

        let pos = fields[1]
            .parse::<u64>()
            .map_err(|_| self.error(format!("invalid position '{}'", fields[1])))?;

        let alternate = fields[4];
        if alternate.contains(',') || alternate == "." {
            return Ok(None);
        }

        let gt_index = fields[8]
            .split(':')
            .position(|key| key == "GT")
            .ok_or_else(|| self.error("FORMAT has no GT field"))?;

        let mut haplotypes = Vec::with_capacity(self.header.samples.len() * 2);
        for sample in &fields[9..] {
            let gt = sample.split(':').nth(gt_index).unwrap_or(".");
            let mut alleles = gt.split(|c| c == '|' || c == '/');

            for _ in 0..2 {
                match alleles.next() {
                    Some("0") => haplotypes.push(0),
                    Some("1") => haplotypes.push(1),
                    Some(".") | None => return Ok(None),
                    Some(other) => {
                        return Err(self.error(format!(
                            "unsupported allele '{}' in GT '{}'",
                            other, gt
                        )))
                    }
                }
            }

            if alleles.next().is_some() {
                return Err(self.error(format!("GT '{}' is not diploid", gt)));
            }
        }

        Ok(Some(VcfRecord {
            chrom: fields[0].to_string(),
            pos,
            reference: fields[3].to_string(),
            alternate: alternate.to_string(),
            haplotypes,
        }))
    }

    fn error(&self, message: impl Into<String>) -> NeError {
        NeError::format(&self.path, format!("line {}: {}", self.line_no, message.into()))
    }
}

impl<R: BufRead> Iterator for VcfReader<R> {
    type Item = Result<VcfRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(NeError::format(&self.path, e.to_string()))),
            };
            self.line_no += 1;

            if line.trim().is_empty() {
                continue;
            }

            match self.parse_record(&line) {
                Ok(Some(record)) => return Some(Ok(record)),
                Ok(None) => self.skipped += 1,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Parses `contig=<ID=chr1,length=123>`.
fn parse_contig(meta: &str) -> Option<(String, u64)> {
    let body = meta.strip_prefix("contig=<")?.strip_suffix('>')?;
    let mut id = None;
    let mut length = None;

    for field in body.split(',') {
        match field.split_once('=') {
            Some(("ID", value)) => id = Some(value.to_string()),
            Some(("length", value)) => length = value.parse::<u64>().ok(),
            _ => {}
        }
    }

    Some((id?, length?))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Cursor;

    /// Builds a VCF text with the given contig and sites.
    /// Each site is `(pos, genotypes)` with one "a|b" string per sample.
    pub(crate) fn vcf_text(
        chrom: &str,
        length: u64,
        samples: usize,
        sites: &[(u64, Vec<&str>)],
    ) -> String {
        let mut text = String::from("##fileformat=VCFv4.2\n");
        text.push_str(&format!("##contig=<ID={},length={}>\n", chrom, length));
        text.push_str("##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">\n");
        text.push_str("#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT");
        for i in 0..samples {
            text.push_str(&format!("\ttsk_{}", i));
        }
        text.push('\n');

        for (pos, gts) in sites {
            text.push_str(&format!("{}\t{}\t.\tA\tG\t.\tPASS\t.\tGT", chrom, pos));
            for gt in gts {
                text.push('\t');
                text.push_str(gt);
            }
            text.push('\n');
        }
        text
    }

    fn reader(text: &str) -> Result<VcfReader<Cursor<Vec<u8>>>> {
        VcfReader::new(Cursor::new(text.as_bytes().to_vec()), "test.vcf")
    }

    #[test]
    fn test_header_and_records() {
        let text = vcf_text("chr1", 1000, 2, &[(10, vec!["0|1", "1|1"]), (20, vec!["0|0", "0/1"])]);
        let mut vcf = reader(&text).unwrap();

        assert_eq!(vcf.header().samples, vec!["tsk_0", "tsk_1"]);
        assert_eq!(vcf.header().contigs, vec![("chr1".to_string(), 1000)]);
        assert_eq!(vcf.haplotype_count(), 4);

        let first = vcf.next().unwrap().unwrap();
        assert_eq!(first.pos, 10);
        assert_eq!(first.haplotypes, vec![0, 1, 1, 1]);
        assert_eq!(first.derived_count(4), 3);
        assert_eq!(first.derived_count(2), 1);

        let second = vcf.next().unwrap().unwrap();
        assert_eq!(second.haplotypes, vec![0, 0, 0, 1]);
        assert!(vcf.next().is_none());
    }

    #[test]
    fn test_skips_missing_and_multiallelic() {
        let mut text = vcf_text("1", 100, 1, &[(5, vec![".|1"]), (7, vec!["0|1"])]);
        text.push_str("1\t9\t.\tA\tC,T\t.\tPASS\t.\tGT\t1|2\n");

        let mut vcf = reader(&text).unwrap();
        let records: Vec<_> = vcf.by_ref().collect::<Result<_>>().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].pos, 7);
        assert_eq!(vcf.skipped(), 2);
    }

    #[test]
    fn test_empty_file_is_format_error() {
        let err = reader("").err().unwrap();
        assert_eq!(err.category(), "FormatError");
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn test_missing_header_is_format_error() {
        let err = reader("##fileformat=VCFv4.2\n").err().unwrap();
        assert!(err.to_string().contains("#CHROM"));
    }

    #[test]
    fn test_no_samples_is_format_error() {
        let text = "##fileformat=VCFv4.2\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n";
        let err = reader(text).err().unwrap();
        assert!(err.to_string().contains("no samples"));
    }

    #[test]
    fn test_truncated_record_is_format_error() {
        let mut text = vcf_text("1", 100, 2, &[]);
        text.push_str("1\t5\t.\tA\tG\t.\tPASS\t.\tGT\t0|1\n");

        let mut vcf = reader(&text).unwrap();
        let err = vcf.next().unwrap().unwrap_err();
        assert!(err.to_string().contains("columns"));
    }

    #[test]
    fn test_parse_contig() {
        assert_eq!(
            parse_contig("contig=<ID=2L,length=23513712>"),
            Some(("2L".to_string(), 23513712))
        );
        assert_eq!(parse_contig("contig=<ID=2L>"), None);
        assert_eq!(parse_contig("source=tskit"), None);
    }
}
