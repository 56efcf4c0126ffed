use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use uniqflank::aligner::{align_contigs, find_executable};
use uniqflank::annotation::load_annotations;
use uniqflank::config::SetupConfig;
use uniqflank::contigs::populate_unmasked_contigs;
use uniqflank::dedup::{reconcile, DedupConfig, DedupStrategy};
use uniqflank::flanking::{populate_flanking_regions, FlankingParams};
use uniqflank::psl;
use uniqflank::seqio::GenomeReader;
use uniqflank::store::{RegionStore, RegionTable};

fn parse_table(s: &str) -> Result<RegionTable, String> {
    s.parse()
}

/// Genome coordinates are stored as i64.
const MAX_COORDINATE: u64 = i64::MAX as u64;

fn parse_flanking_size(s: &str) -> Result<u64, String> {
    let val: u64 = s.parse().map_err(|_| format!("Invalid number: {}", s))?;
    if val == 0 || val > MAX_COORDINATE {
        Err(format!("Flanking size must be between 1 and {}, got {}", MAX_COORDINATE, val))
    } else {
        Ok(val)
    }
}

fn parse_flanking_offset(s: &str) -> Result<u64, String> {
    let val: u64 = s.parse().map_err(|_| format!("Invalid number: {}", s))?;
    if val > MAX_COORDINATE {
        Err(format!("Flanking offset must be at most {}, got {}", MAX_COORDINATE, val))
    } else {
        Ok(val)
    }
}

fn parse_min_contig_size(s: &str) -> Result<usize, String> {
    let val: usize = s.parse().map_err(|_| format!("Invalid number: {}", s))?;
    if val == 0 {
        Err("Minimum contig size must be at least 1".to_string())
    } else {
        Ok(val)
    }
}

#[derive(Parser)]
#[command(name = "uniqflank")]
#[command(version)]
#[command(about = "Build databases of unique sequence flanking annotated repeats")]
#[command(long_about = r#"
uniqflank - unique flanking region databases

WORKFLOW:
  1. create       Load annotations, extract flanking windows, split them into
                  unmasked contigs
  2. align        Export the unmasked contigs and align them with BLAT
     (or export + run BLAT yourself)
  3. deduplicate  Remove contigs found elsewhere, using the PSL output

TABLES:
  flanking              Raw softmasked windows next to each annotation
  UnmaskedContigs       Uppercase runs of the flanking windows
  DeduplicatedContigs   Unmasked contigs left after deduplication

EXAMPLES:
  uniqflank create -d L1.db -a L1HS.bed -g hg38.fa -s 5000 -m 20
  uniqflank align -d L1.db -g hg38.fa --strategy self-genome -o blat/
  uniqflank deduplicate -d L1.db --ignore-alt --strategy self-genome \
      blat/contigs_self.psl blat/contigs_genome.psl
  uniqflank export -d L1.db -T DeduplicatedContigs -o L1_unique.fa
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short = 'c', long, value_name = "FILE", global = true, help_heading = "Runtime")]
    config: Option<PathBuf>,

    #[arg(short = 't', long, value_name = "NUM", default_value = "0", global = true, help_heading = "Runtime")]
    threads: usize,

    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true, help_heading = "Runtime")]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a database and fill the flanking and UnmaskedContigs tables
    Create {
        #[arg(short = 'd', long, value_name = "FILE", help_heading = "Database")]
        database: Option<PathBuf>,

        #[arg(short = 'f', long, help_heading = "Database")]
        force: bool,

        #[arg(short = 'a', long, value_name = "FILE", help_heading = "Input")]
        annotations: PathBuf,

        #[arg(short = 'g', long, value_name = "FILE", help_heading = "Input")]
        genome: PathBuf,

        #[arg(short = 's', long = "flanking-size", value_name = "BP",
              value_parser = parse_flanking_size, help_heading = "Flanking Regions")]
        flanking_size: Option<u64>,

        #[arg(short = 'o', long = "flanking-offset", value_name = "BP",
              value_parser = parse_flanking_offset, help_heading = "Flanking Regions")]
        flanking_offset: Option<u64>,

        #[arg(short = 'm', long = "min-contig-size", value_name = "BP",
              value_parser = parse_min_contig_size, help_heading = "Flanking Regions")]
        min_contig_size: Option<usize>,
    },

    /// Write a sequence table as FASTA
    Export {
        #[arg(short = 'd', long, value_name = "FILE", help_heading = "Database")]
        database: Option<PathBuf>,

        #[arg(short = 'T', long, value_name = "TABLE", default_value = "UnmaskedContigs",
              value_parser = parse_table, help_heading = "Database")]
        table: RegionTable,

        /// Output file (stdout when omitted)
        #[arg(short = 'o', long, value_name = "FILE", help_heading = "Output")]
        output: Option<PathBuf>,
    },

    /// Export UnmaskedContigs and align them with BLAT
    Align {
        #[arg(short = 'd', long, value_name = "FILE", help_heading = "Database")]
        database: Option<PathBuf>,

        #[arg(short = 'g', long, value_name = "FILE", help_heading = "Input")]
        genome: Option<PathBuf>,

        #[arg(long, value_enum, help_heading = "Alignment")]
        strategy: Option<DedupStrategy>,

        #[arg(long, value_name = "PATH", default_value = "blat", help_heading = "Alignment")]
        blat: String,

        #[arg(short = 'o', long, value_name = "DIR", default_value = ".", help_heading = "Output")]
        outdir: PathBuf,
    },

    /// Fill DeduplicatedContigs from PSL alignments of the exported contigs
    Deduplicate {
        #[arg(short = 'd', long, value_name = "FILE", help_heading = "Database")]
        database: Option<PathBuf>,

        /// Empty DeduplicatedContigs before writing
        #[arg(short = 'r', long, help_heading = "Database")]
        replace: bool,

        /// PSL files, in the order the alignments were run
        #[arg(value_name = "PSL", required = true)]
        psl_files: Vec<PathBuf>,

        /// Defaults to the size the database was created with
        #[arg(short = 'm', long = "min-contig-size", value_name = "BP",
              value_parser = parse_min_contig_size, help_heading = "Deduplication")]
        min_contig_size: Option<usize>,

        #[arg(long, value_enum, help_heading = "Deduplication")]
        strategy: Option<DedupStrategy>,

        #[arg(short = 'e', long = "expected-duplicates", value_name = "NUM", help_heading = "Deduplication")]
        expected_duplicates: Option<u32>,

        /// Ignore matches to targets ending in the alt suffix
        #[arg(long = "ignore-alt", help_heading = "Deduplication")]
        ignore_alt: bool,

        #[arg(long = "alt-suffix", value_name = "SUFFIX", help_heading = "Deduplication")]
        alt_suffix: Option<String>,
    },

    /// Remove every row of a sequence table
    Delete {
        #[arg(short = 'd', long, value_name = "FILE", help_heading = "Database")]
        database: Option<PathBuf>,

        #[arg(short = 'T', long, value_name = "TABLE", value_parser = parse_table, help_heading = "Database")]
        table: RegionTable,
    },

    /// Show construction parameters and table sizes
    Info {
        #[arg(short = 'd', long, value_name = "FILE", help_heading = "Database")]
        database: Option<PathBuf>,
    },
}

fn setup_logging(verbose: u8) {
    if std::env::var_os("RUST_LOG").is_none() {
        let level = match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        std::env::set_var("RUST_LOG", level);
    }

    env_logger::Builder::from_default_env()
        .format_timestamp_secs()
        .init();
}

fn resolve_database(cli_value: Option<PathBuf>, config: &SetupConfig) -> Result<PathBuf> {
    cli_value
        .or_else(|| config.database.clone())
        .context("No database given. Use --database or set \"database\" in the config file")
}

// ============================================================================
// Commands
// ============================================================================

fn run_create(
    database: &Path,
    force: bool,
    annotations: &Path,
    genome: &Path,
    params: FlankingParams,
    min_contig_size: usize,
) -> Result<()> {
    eprintln!("Database: {}", database.display());
    eprintln!("Flanking size: {} bp (offset {} bp)", params.size, params.offset);
    eprintln!("Min contig size: {} bp", min_contig_size);
    eprintln!();

    let mut store = RegionStore::create(database, force)?;

    eprintln!("[1/4] Loading annotations...");
    let records = load_annotations(annotations)?;
    let loaded = store.insert_annotations(&records)?;
    eprintln!("      {} annotations", loaded);

    eprintln!("[2/4] Indexing genome...");
    let mut reader = GenomeReader::open(genome)?;
    eprintln!("      {} sequences", reader.index().len());

    eprintln!("[3/4] Extracting flanking regions...");
    let flanking = populate_flanking_regions(&mut store, &mut reader, params)?;
    eprintln!(
        "      {} regions ({} clipped, {} dropped at chromosome start)",
        flanking.regions, flanking.clipped, flanking.dropped
    );
    if flanking.skipped_chromosomes > 0 {
        eprintln!(
            "      Warning: {} chromosome(s) missing from the genome, {} annotation(s) skipped",
            flanking.skipped_chromosomes, flanking.skipped_annotations
        );
    }

    eprintln!("[4/4] Building unmasked contigs...");
    let contigs = populate_unmasked_contigs(&mut store, min_contig_size)?;
    eprintln!("      {} contigs ({} bp)", contigs.contigs, contigs.bases);

    Ok(())
}

fn export_table(store: &RegionStore, table: RegionTable, output: Option<&Path>) -> Result<usize> {
    match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output: {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            let written = store.export_fasta(table, &mut writer)?;
            writer.flush()?;
            Ok(written)
        }
        None => {
            let stdout = io::stdout();
            let mut writer = BufWriter::new(stdout.lock());
            let written = store.export_fasta(table, &mut writer)?;
            writer.flush()?;
            Ok(written)
        }
    }
}

fn run_align(
    database: &Path,
    genome: Option<&Path>,
    strategy: DedupStrategy,
    blat: &str,
    outdir: &Path,
) -> Result<()> {
    let blat = find_executable(blat)?;
    log::info!("Found blat: {}", blat.display());

    std::fs::create_dir_all(outdir)
        .with_context(|| format!("Failed to create output directory: {}", outdir.display()))?;

    let store = RegionStore::open(database)?;
    let contigs_fasta = outdir.join("UnmaskedContigs.fa");
    let exported = export_table(&store, RegionTable::UnmaskedContigs, Some(&contigs_fasta))?;
    eprintln!("Exported {} contigs to {}", exported, contigs_fasta.display());

    let outputs = align_contigs(&blat, &contigs_fasta, genome, strategy, outdir)?;
    for psl in &outputs {
        eprintln!("Alignments: {}", psl.display());
    }

    let psl_args: Vec<String> = outputs.iter().map(|p| p.display().to_string()).collect();
    eprintln!();
    eprintln!(
        "Next: uniqflank deduplicate -d {} --strategy {} {}",
        database.display(),
        strategy,
        psl_args.join(" ")
    );
    Ok(())
}

fn run_deduplicate(database: &Path, replace: bool, psl_paths: &[PathBuf], config: DedupConfig) -> Result<()> {
    let mut store = RegionStore::open(database)?;

    if replace {
        let removed = store.truncate(RegionTable::DeduplicatedContigs)?;
        log::info!("Removed {} existing rows from {}", removed, RegionTable::DeduplicatedContigs);
    } else if store.row_count(RegionTable::DeduplicatedContigs)? > 0 {
        anyhow::bail!(
            "{} already has rows. Use --replace or `uniqflank delete -T {}` first",
            RegionTable::DeduplicatedContigs,
            RegionTable::DeduplicatedContigs
        );
    }

    let matches = psl::read_all(psl_paths)?;
    let summary = reconcile(&mut store, matches, &config)?;

    eprintln!("Alignment records: {}", summary.records);
    eprintln!("  Unique:       {}", summary.unique);
    eprintln!("  Duplicated:   {}", summary.duplicated);
    eprintln!("  Resegmented:  {}", summary.resegmented);
    if config.ignore_alt {
        eprintln!("  Alt ignored:  {}", summary.ignored_alt);
    }
    if summary.lookup_misses > 0 {
        eprintln!("  Unmatched:    {}", summary.lookup_misses);
    }
    eprintln!("Wrote {} rows to {}", summary.rows, RegionTable::DeduplicatedContigs);
    Ok(())
}

fn print_info(store: &RegionStore) -> Result<()> {
    let info = store.info()?;
    println!("Schema version:   {}", info.schema_version);
    println!("Flanking size:    {}", info.flanking_size);
    println!("Flanking offset:  {}", info.flanking_offset);
    println!("Min contig size:  {}", info.min_contig_size);
    println!();
    println!("{:<22}{:>12}{:>16}", "Table", "Rows", "Bases");
    for stats in store.table_stats()? {
        println!("{:<22}{:>12}{:>16}", stats.table, stats.rows, stats.bases);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let start_time = Instant::now();

    setup_logging(cli.verbose);

    let config = SetupConfig::load_or_default(cli.config.as_deref())?;

    let threads = if cli.threads == 0 { num_cpus::get() } else { cli.threads };
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .context("Failed to set thread count")?;

    match cli.command {
        Commands::Create {
            database,
            force,
            annotations,
            genome,
            flanking_size,
            flanking_offset,
            min_contig_size,
        } => {
            let database = resolve_database(database, &config)?;
            let params = FlankingParams {
                size: flanking_size.unwrap_or(config.flanking_size),
                offset: flanking_offset.unwrap_or(config.flanking_offset),
            };
            let min_contig_size = min_contig_size.unwrap_or(config.min_contig_size);
            run_create(&database, force, &annotations, &genome, params, min_contig_size)?;
        }
        Commands::Export { database, table, output } => {
            let database = resolve_database(database, &config)?;
            let store = RegionStore::open(&database)?;
            let written = export_table(&store, table, output.as_deref())?;
            eprintln!("Exported {} sequences from {}", written, table);
        }
        Commands::Align { database, genome, strategy, blat, outdir } => {
            let database = resolve_database(database, &config)?;
            let strategy = strategy.unwrap_or(config.strategy);
            run_align(&database, genome.as_deref(), strategy, &blat, &outdir)?;
        }
        Commands::Deduplicate {
            database,
            replace,
            psl_files,
            min_contig_size,
            strategy,
            expected_duplicates,
            ignore_alt,
            alt_suffix,
        } => {
            let database = resolve_database(database, &config)?;
            let min_size = match min_contig_size {
                Some(size) => size,
                None => {
                    let stored = RegionStore::open(&database)?.info()?.min_contig_size;
                    if stored > 0 {
                        stored as usize
                    } else {
                        config.min_contig_size
                    }
                }
            };
            let dedup = DedupConfig {
                min_size,
                ignore_alt: ignore_alt || config.ignore_alt,
                alt_suffix: alt_suffix.unwrap_or_else(|| config.alt_suffix.clone()),
                strategy: strategy.unwrap_or(config.strategy),
                expected_duplicates: expected_duplicates.or(config.expected_duplicates),
            };
            run_deduplicate(&database, replace, &psl_files, dedup)?;
        }
        Commands::Delete { database, table } => {
            let database = resolve_database(database, &config)?;
            let mut store = RegionStore::open(&database)?;
            let removed = store.truncate(table)?;
            eprintln!("Removed {} rows from {}", removed, table);
        }
        Commands::Info { database } => {
            let database = resolve_database(database, &config)?;
            let store = RegionStore::open(&database)?;
            print_info(&store)?;
        }
    }

    log::info!("Finished in {:.1}s", start_time.elapsed().as_secs_f64());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flanking_parsers_bound_to_coordinate_range() {
        assert_eq!(parse_flanking_size("5000"), Ok(5000));
        assert!(parse_flanking_size("0").is_err());
        assert_eq!(parse_flanking_size(&MAX_COORDINATE.to_string()), Ok(MAX_COORDINATE));
        assert!(parse_flanking_size(&(MAX_COORDINATE + 1).to_string()).is_err());

        assert_eq!(parse_flanking_offset("0"), Ok(0));
        assert!(parse_flanking_offset(&u64::MAX.to_string()).is_err());
    }
}
