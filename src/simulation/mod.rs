//! Simulation Stage
//!
//! Produces one genealogy (`.trees`) and its genotype export (`.vcf`) per
//! replicate seed and chromosome by calling the stdpopsim command line and
//! `tskit vcf`. The genetic map is read from the shared download cache, so
//! the simulator never downloads on its own.

use std::fs;
use std::path::Path;

use log::{debug, info};

use crate::config::RunConfig;
use crate::environment::{ExternalTool, Invocation, Toolchain};
use crate::error::{NeError, Result};

/// One (seed, chromosome) simulation.
#[derive(Debug, Clone)]
pub struct SimulationRequest<'a> {
    pub config: &'a RunConfig,
    pub seed: u64,
    pub chrom: &'a str,
    pub trees: &'a Path,
    pub vcf: &'a Path,
}

impl SimulationRequest<'_> {
    /// The stdpopsim call for this request.
    pub fn simulate_command(&self, toolchain: &Toolchain) -> Invocation {
        let config = self.config;
        toolchain
            .command(ExternalTool::Stdpopsim)
            .arg("--cache-dir")
            .path_arg(toolchain.cache().root())
            .arg(&config.species)
            .arg("-c")
            .arg(self.chrom)
            .arg("-o")
            .path_arg(self.trees)
            .arg("-s")
            .arg(self.seed.to_string())
            .arg("-d")
            .arg(&config.model)
            .arg("-g")
            .arg(&config.genetic_map.id)
            .arg(format!("{}:{}", config.population, config.individuals()))
    }

    /// The genotype export call; standard output becomes the VCF.
    pub fn export_command(&self, toolchain: &Toolchain) -> Invocation {
        toolchain
            .command(ExternalTool::Tskit)
            .arg("vcf")
            .args(["--ploidy", "2"])
            .path_arg(self.trees)
            .stdout_to(self.vcf)
    }
}

/// Simulates one chromosome of one replicate and exports its genotypes.
pub fn simulate(request: &SimulationRequest<'_>, toolchain: &Toolchain) -> Result<()> {
    info!(
        "Simulating {} {} (seed {}, {} genomes of {})",
        request.config.species,
        request.chrom,
        request.seed,
        request.config.sample_size,
        request.config.population
    );

    toolchain.run_checked(&request.simulate_command(toolchain), NeError::simulation)?;
    if !request.trees.exists() {
        return Err(NeError::simulation(format!(
            "simulator exited cleanly but wrote no {}",
            request.trees.display()
        )));
    }

    let export = request.export_command(toolchain);
    if let Err(e) = toolchain.run_checked(&export, NeError::simulation) {
        // Do not leave a truncated VCF that looks up to date.
        let _ = fs::remove_file(request.vcf);
        return Err(e);
    }

    let size = fs::metadata(request.vcf).map(|m| m.len()).unwrap_or(0);
    if size == 0 {
        return Err(NeError::format(request.vcf, "genotype export is empty"));
    }

    debug!("Wrote {} ({} bytes)", request.vcf.display(), size);
    Ok(())
}
