//! External aligner invocation.
//!
//! Runs BLAT on the exported contig FASTA as `blat <target> <query> <out.psl>`,
//! once per target the deduplication strategy needs.

use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::dedup::DedupStrategy;

/// Locates an executable, either as a given path or on `PATH`.
pub fn find_executable(name: &str) -> Result<PathBuf> {
    let path = Path::new(name);
    if path.components().count() > 1 && path.is_file() {
        return Ok(path.to_path_buf());
    }

    if let Ok(paths) = env::var("PATH") {
        for dir in env::split_paths(&paths) {
            let full_path = dir.join(name);
            if full_path.is_file() {
                return Ok(full_path);
            }
        }
    }

    anyhow::bail!("{} not found in PATH. Please install it or add it to your PATH.", name)
}

/// The `(target, output)` pairs a strategy requires, in concatenation order.
pub fn alignment_plan(
    contigs_fasta: &Path,
    genome: Option<&Path>,
    strategy: DedupStrategy,
    out_dir: &Path,
) -> Result<Vec<(PathBuf, PathBuf)>> {
    let mut plan = Vec::new();

    if strategy.aligns_to_self() {
        plan.push((contigs_fasta.to_path_buf(), out_dir.join("contigs_self.psl")));
    }
    if strategy.aligns_to_genome() {
        let genome = genome.with_context(|| format!("Strategy '{}' needs a genome FASTA", strategy))?;
        plan.push((genome.to_path_buf(), out_dir.join("contigs_genome.psl")));
    }

    Ok(plan)
}

/// Aligns the exported contigs and returns the PSL outputs.
///
/// # Arguments
/// * `blat` - Path to the BLAT executable
/// * `contigs_fasta` - Exported `UnmaskedContigs` FASTA, used as the query
/// * `genome` - Genome FASTA, required by strategies that align to the genome
/// * `strategy` - Which targets to align against
/// * `out_dir` - Directory for the PSL files
pub fn align_contigs(
    blat: &Path,
    contigs_fasta: &Path,
    genome: Option<&Path>,
    strategy: DedupStrategy,
    out_dir: &Path,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create output directory: {}", out_dir.display()))?;

    let mut outputs = Vec::new();
    for (target, psl) in alignment_plan(contigs_fasta, genome, strategy, out_dir)? {
        log::info!("Aligning {} against {}", contigs_fasta.display(), target.display());

        let output = Command::new(blat)
            .arg(&target)
            .arg(contigs_fasta)
            .arg(&psl)
            .output()
            .with_context(|| format!("Failed to run {}", blat.display()))?;

        if !output.status.success() {
            anyhow::bail!(
                "{} failed on {} ({}):\n{}",
                blat.display(),
                target.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        log::debug!("Wrote {}", psl.display());
        outputs.push(psl);
    }

    Ok(outputs)
}
