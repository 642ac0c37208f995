//! Tool Input Formats
//!
//! Pure transforms from the simulated genotypes (VCF) to the input formats
//! of the three estimators. Each adapter fails with a format error when
//! its input is malformed or carries no usable sites.
//!
//! - [`vcf`]: streaming reader for the simulation export
//! - [`sfs`]: unfolded site frequency spectrum (stairway plot)
//! - [`smc`]: `.smc.gz` run-length files (SMC++)
//! - [`multihetsep`]: multihetsep files (MSMC)

pub mod multihetsep;
pub mod sfs;
pub mod smc;
pub mod vcf;

pub use multihetsep::write_multihetsep;
pub use sfs::SiteFrequencySpectrum;
pub use smc::write_smc;
pub use vcf::{VcfHeader, VcfReader, VcfRecord};
