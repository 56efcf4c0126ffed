//! Deduplication Module
//!
//! Reconciles the alignments of exported unmasked contigs (PSL records from
//! BLAT) with the `UnmaskedContigs` table, writing the surviving sequence to
//! `DeduplicatedContigs`.
//!
//! Every alignment of a contig is classified:
//! - **large duplicate** - `matches + min_size > query_len`, i.e. fewer than
//!   `min_size` query bases are left unaligned
//! - **partial duplicate** - anything else; its query range is recorded
//!
//! Each contig then gets one verdict. A contig is always expected to align to
//! itself, so the number of large duplicates is compared with the count the
//! alignment strategy implies:
//!
//! ```text
//! large == expected, no partial ranges   -> Unique      (copied unchanged)
//! large >  expected                      -> Duplicated  (dropped)
//! otherwise                              -> Resegment   (partial ranges masked,
//!                                                        unmasked runs kept)
//! ```
//!
//! # Examples
//! ```no_run
//! use uniqflank::dedup::{reconcile, DedupConfig};
//! use uniqflank::psl::PslReader;
//! use uniqflank::store::RegionStore;
//!
//! let mut store = RegionStore::open("regions.db").unwrap();
//! let matches = PslReader::open("contigs_self.psl").unwrap();
//! let summary = reconcile(&mut store, matches, &DedupConfig::default()).unwrap();
//! println!("{} unique, {} duplicated", summary.unique, summary.duplicated);
//! ```

use anyhow::Result;
use clap::ValueEnum;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::contigs::{split_region, DEFAULT_MIN_CONTIG_SIZE};
use crate::psl::AlignmentMatch;
use crate::segment::mask_ranges;
use crate::store::{Region, RegionStore, RegionTable};

pub const DEFAULT_ALT_SUFFIX: &str = "_alt";

// ============================================================================
// Configuration
// ============================================================================

/// Which alignments were run, and therefore how many whole-contig hits a
/// unique contig produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
pub enum DedupStrategy {
    /// Contigs aligned against themselves.
    #[default]
    #[value(name = "self")]
    #[serde(rename = "self")]
    SelfAlignment,
    /// Contigs aligned against the genome.
    #[value(name = "genome")]
    #[serde(rename = "genome")]
    Genome,
    /// Both alignments, records concatenated.
    #[value(name = "self-genome")]
    #[serde(rename = "self-genome")]
    SelfAndGenome,
}

impl DedupStrategy {
    pub fn expected_duplicates(&self) -> u32 {
        match self {
            DedupStrategy::SelfAlignment | DedupStrategy::Genome => 1,
            DedupStrategy::SelfAndGenome => 2,
        }
    }

    pub fn aligns_to_self(&self) -> bool {
        matches!(self, DedupStrategy::SelfAlignment | DedupStrategy::SelfAndGenome)
    }

    pub fn aligns_to_genome(&self) -> bool {
        matches!(self, DedupStrategy::Genome | DedupStrategy::SelfAndGenome)
    }
}

impl fmt::Display for DedupStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DedupStrategy::SelfAlignment => "self",
            DedupStrategy::Genome => "genome",
            DedupStrategy::SelfAndGenome => "self-genome",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupConfig {
    pub min_size: usize,
    pub ignore_alt: bool,
    pub alt_suffix: String,
    pub strategy: DedupStrategy,
    /// Overrides the strategy's expected count when set.
    pub expected_duplicates: Option<u32>,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            min_size: DEFAULT_MIN_CONTIG_SIZE,
            ignore_alt: false,
            alt_suffix: DEFAULT_ALT_SUFFIX.to_string(),
            strategy: DedupStrategy::default(),
            expected_duplicates: None,
        }
    }
}

impl DedupConfig {
    pub fn expected_duplicates(&self) -> u32 {
        self.expected_duplicates
            .unwrap_or_else(|| self.strategy.expected_duplicates())
    }

    fn is_ignored_target(&self, target: &str) -> bool {
        self.ignore_alt && target.ends_with(&self.alt_suffix)
    }
}

// ============================================================================
// Accumulation
// ============================================================================

/// Alignment evidence gathered for one contig.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContigHits {
    pub large_duplicates: u32,
    pub partial_ranges: Vec<(usize, usize)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Unique,
    Duplicated,
    Resegment,
}

impl ContigHits {
    pub fn verdict(&self, expected: u32) -> Verdict {
        if self.large_duplicates > expected {
            Verdict::Duplicated
        } else if self.large_duplicates == expected && self.partial_ranges.is_empty() {
            Verdict::Unique
        } else {
            Verdict::Resegment
        }
    }
}

/// Whether a match covers the whole query up to `min_size` bases.
pub fn is_large_duplicate(record: &AlignmentMatch, min_size: usize) -> bool {
    record.matches + min_size > record.query_len
}

/// Counts from one reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupSummary {
    pub records: usize,
    pub ignored_alt: usize,
    pub lookup_misses: usize,
    pub unique: usize,
    pub duplicated: usize,
    pub resegmented: usize,
    pub rows: usize,
}

/// Groups alignment records by contig id, in order of first appearance.
///
/// Records whose query name is not a contig id are counted as lookup misses.
fn accumulate<I>(matches: I, config: &DedupConfig, summary: &mut DedupSummary) -> Result<Vec<(i64, ContigHits)>>
where
    I: IntoIterator<Item = Result<AlignmentMatch>>,
{
    let mut order: Vec<(i64, ContigHits)> = Vec::new();
    let mut slots: FxHashMap<i64, usize> = FxHashMap::default();

    for record in matches {
        let record = record?;
        summary.records += 1;

        if config.is_ignored_target(&record.target_name) {
            summary.ignored_alt += 1;
            continue;
        }

        let id: i64 = match record.query_name.parse() {
            Ok(id) => id,
            Err(_) => {
                log::warn!("Alignment query '{}' is not a contig id; skipping", record.query_name);
                summary.lookup_misses += 1;
                continue;
            }
        };

        let slot = *slots.entry(id).or_insert_with(|| {
            order.push((id, ContigHits::default()));
            order.len() - 1
        });
        let hits = &mut order[slot].1;

        if is_large_duplicate(&record, config.min_size) {
            hits.large_duplicates += 1;
        } else {
            hits.partial_ranges.push((record.query_start, record.query_end));
        }
    }

    Ok(order)
}

/// The rows a contig contributes to `DeduplicatedContigs`.
pub fn resolve_contig(contig: &Region, hits: &ContigHits, expected: u32, min_size: usize) -> (Verdict, Vec<Region>) {
    let verdict = hits.verdict(expected);
    let rows = match verdict {
        Verdict::Unique => vec![Region::new(contig.annotation, contig.sequence.clone(), contig.start)],
        Verdict::Duplicated => Vec::new(),
        Verdict::Resegment => {
            let masked = Region::new(
                contig.annotation,
                mask_ranges(&contig.sequence, &hits.partial_ranges),
                contig.start,
            );
            split_region(&masked, min_size)
        }
    };
    (verdict, rows)
}

// ============================================================================
// Reconciliation
// ============================================================================

/// Writes the deduplicated contigs implied by `matches` to
/// `DeduplicatedContigs`.
///
/// Contigs without any alignment record are left out. Output rows follow the
/// first appearance of each contig in the alignment stream and are written in
/// one transaction.
pub fn reconcile<I>(store: &mut RegionStore, matches: I, config: &DedupConfig) -> Result<DedupSummary>
where
    I: IntoIterator<Item = Result<AlignmentMatch>>,
{
    let expected = config.expected_duplicates();
    log::info!(
        "Deduplicating with strategy '{}' (expected whole-contig hits: {}, min size: {})",
        config.strategy,
        expected,
        config.min_size
    );

    let mut summary = DedupSummary::default();
    let grouped = accumulate(matches, config, &mut summary)?;

    let mut work = Vec::with_capacity(grouped.len());
    for (id, hits) in grouped {
        match store.region(RegionTable::UnmaskedContigs, id)? {
            Some(contig) => work.push((contig, hits)),
            None => {
                log::warn!("Contig {} not found in {}; skipping", id, RegionTable::UnmaskedContigs);
                summary.lookup_misses += 1;
            }
        }
    }

    let resolved: Vec<(Verdict, Vec<Region>)> = work
        .par_iter()
        .map(|(contig, hits)| resolve_contig(contig, hits, expected, config.min_size))
        .collect();

    let mut rows = Vec::new();
    for ((contig, _), (verdict, contig_rows)) in work.iter().zip(resolved) {
        log::debug!("Contig {}: {:?} -> {} row(s)", contig.id, verdict, contig_rows.len());
        match verdict {
            Verdict::Unique => summary.unique += 1,
            Verdict::Duplicated => summary.duplicated += 1,
            Verdict::Resegment => summary.resegmented += 1,
        }
        rows.extend(contig_rows);
    }

    summary.rows = store.insert_regions(RegionTable::DeduplicatedContigs, &rows)?;

    log::info!(
        "{} records: {} unique, {} duplicated, {} resegmented, {} rows written",
        summary.records,
        summary.unique,
        summary.duplicated,
        summary.resegmented,
        summary.rows
    );
    if summary.ignored_alt > 0 {
        log::info!("Ignored {} alignment(s) to '{}' targets", summary.ignored_alt, config.alt_suffix);
    }
    if summary.lookup_misses > 0 {
        log::warn!("{} alignment record(s) could not be matched to a contig", summary.lookup_misses);
    }

    Ok(summary)
}
