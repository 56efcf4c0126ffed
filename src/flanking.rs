//! Flanking Region Extraction Module
//!
//! Cuts fixed-size windows next to every annotated repeat and stores them in
//! the `flanking` table. For an annotation spanning `[align_start, align_end)`:
//!
//! ```text
//!            upstream                            downstream
//!   |<------- size ------->|<-off->|=====repeat=====|<-off->|<------- size ------->|
//!                          end                       start
//! ```
//!
//! Windows are genome-relative and do not depend on strand. A window running
//! past the chromosome end is cut short there; a window that would start
//! before the chromosome is dropped.
//!
//! # Examples
//! ```no_run
//! use uniqflank::flanking::{populate_flanking_regions, FlankingParams};
//! use uniqflank::seqio::GenomeReader;
//! use uniqflank::store::RegionStore;
//!
//! let mut store = RegionStore::open("regions.db").unwrap();
//! let mut genome = GenomeReader::open("hg38.fa").unwrap();
//! let summary = populate_flanking_regions(&mut store, &mut genome, FlankingParams::default()).unwrap();
//! println!("{} regions", summary.regions);
//! ```

use anyhow::{Context, Result};
use std::io::{BufRead, Seek};

use crate::seqio::GenomeReader;
use crate::store::{Region, RegionStore, RegionTable};

pub const DEFAULT_FLANKING_SIZE: u64 = 5000;
pub const DEFAULT_FLANKING_OFFSET: u64 = 0;

/// Window size and gap between the annotation and its windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlankingParams {
    pub size: u64,
    pub offset: u64,
}

impl Default for FlankingParams {
    fn default() -> Self {
        Self {
            size: DEFAULT_FLANKING_SIZE,
            offset: DEFAULT_FLANKING_OFFSET,
        }
    }
}

/// Counts from one extraction run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlankingSummary {
    pub chromosomes: usize,
    pub skipped_chromosomes: usize,
    pub skipped_annotations: usize,
    pub regions: usize,
    /// Rows shortened at the chromosome end.
    pub clipped: usize,
    /// Windows that produced no row.
    pub dropped: usize,
}

// ============================================================================
// Windows
// ============================================================================

/// Unclipped window right of the annotation.
pub fn downstream_window(align_end: i64, params: FlankingParams) -> (i64, i64) {
    let start = align_end.saturating_add(to_coordinate(params.offset));
    (start, start.saturating_add(to_coordinate(params.size)))
}

/// Unclipped window left of the annotation.
pub fn upstream_window(align_start: i64, params: FlankingParams) -> (i64, i64) {
    let end = align_start.saturating_sub(to_coordinate(params.offset));
    (end.saturating_sub(to_coordinate(params.size)), end)
}

/// Lengths beyond the coordinate range saturate instead of wrapping.
fn to_coordinate(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Clips `[start, end)` to a chromosome of length `len`.
///
/// Only the end is clipped. A window starting before the chromosome, or at
/// or past its end, yields `None`.
pub fn clip_window(start: i64, end: i64, len: usize) -> Option<(usize, usize)> {
    let len = len as i64;
    if start < 0 || start >= len {
        return None;
    }
    let end = end.min(len);
    if start >= end {
        return None;
    }
    Some((start as usize, end as usize))
}

/// Extracts one window as a flanking row of `annotation`.
///
/// The stored end is the clipped bound, so `end - start == sequence.len()`
/// always holds.
pub fn extract_window(chromosome: &str, annotation: i64, start: i64, end: i64) -> Option<Region> {
    let (s, e) = clip_window(start, end, chromosome.len())?;
    let sequence = chromosome.get(s..e)?.to_string();
    Some(Region::new(annotation, sequence, s as i64))
}

// ============================================================================
// Extraction
// ============================================================================

/// Fills the `flanking` table from every annotation in `store`.
///
/// Chromosomes are visited in order of first appearance and loaded once each.
/// Rows for one chromosome are written in a single transaction, downstream
/// before upstream for every annotation.
///
/// # Arguments
/// * `store` - Database holding the annotations
/// * `genome` - Indexed genome the annotations refer to
/// * `params` - Window size and offset, also recorded in `info`
pub fn populate_flanking_regions<R: BufRead + Seek>(
    store: &mut RegionStore,
    genome: &mut GenomeReader<R>,
    params: FlankingParams,
) -> Result<FlankingSummary> {
    store.set_flanking_params(params.size, params.offset)?;

    let mut summary = FlankingSummary::default();
    let chromosomes = store.chromosomes()?;
    log::info!(
        "Extracting {} bp flanking regions (offset {}) on {} chromosomes",
        params.size,
        params.offset,
        chromosomes.len()
    );

    for name in &chromosomes {
        let annotations = store.annotations_on(name)?;

        let sequence = genome
            .load_chromosome(name)
            .with_context(|| format!("Failed to load chromosome {}", name))?;
        if sequence.is_empty() {
            log::warn!(
                "Chromosome '{}' not found in genome; skipping {} annotation(s)",
                name,
                annotations.len()
            );
            summary.skipped_chromosomes += 1;
            summary.skipped_annotations += annotations.len();
            continue;
        }

        let mut regions = Vec::with_capacity(annotations.len() * 2);
        for annotation in &annotations {
            let windows = [
                downstream_window(annotation.align_end, params),
                upstream_window(annotation.align_start, params),
            ];
            for (start, end) in windows {
                match extract_window(&sequence, annotation.id, start, end) {
                    Some(region) => {
                        if region.end != end {
                            summary.clipped += 1;
                        }
                        regions.push(region);
                    }
                    None => summary.dropped += 1,
                }
            }
        }

        summary.regions += store.insert_regions(RegionTable::Flanking, &regions)?;
        summary.chromosomes += 1;
        log::debug!("{}: {} bp, {} flanking regions", name, sequence.len(), regions.len());
    }

    log::info!(
        "Wrote {} flanking regions ({} clipped, {} dropped) from {} chromosomes",
        summary.regions,
        summary.clipped,
        summary.dropped,
        summary.chromosomes
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::{Annotation, Strand};
    use std::io::Cursor;

    fn annotation(chromosome: &str, start: i64, end: i64) -> Annotation {
        Annotation {
            id: 0,
            name: "AluY".to_string(),
            chromosome: chromosome.to_string(),
            align_start: start,
            align_end: end,
            strand: Strand::Reverse,
            score: None,
            match_start: None,
            match_end: None,
        }
    }

    fn genome(text: &str) -> GenomeReader<Cursor<Vec<u8>>> {
        GenomeReader::new(Cursor::new(text.as_bytes().to_vec())).unwrap()
    }

    #[test]
    fn test_windows() {
        let params = FlankingParams { size: 100, offset: 10 };
        assert_eq!(downstream_window(500, params), (510, 610));
        assert_eq!(upstream_window(400, params), (290, 390));
    }

    #[test]
    fn test_interior_window_has_exact_size() {
        let chromosome = "ACGT".repeat(100);
        let region = extract_window(&chromosome, 1, 100, 150).unwrap();
        assert_eq!(region.len(), 50);
        assert_eq!((region.start, region.end), (100, 150));
        assert_eq!(region.sequence, &chromosome[100..150]);
    }

    #[test]
    fn test_huge_params_saturate() {
        let params = FlankingParams { size: u64::MAX, offset: 0 };
        assert_eq!(downstream_window(10, params), (10, i64::MAX));
        assert_eq!(upstream_window(10, params), (i64::MIN + 11, 10));

        let chromosome = "A".repeat(100);
        let (start, end) = downstream_window(10, params);
        let region = extract_window(&chromosome, 1, start, end).unwrap();
        assert_eq!((region.start, region.end), (10, 100));
    }

    #[test]
    fn test_window_clipped_at_chromosome_end() {
        let chromosome = "A".repeat(100);
        let right = extract_window(&chromosome, 1, 90, 130).unwrap();
        assert_eq!((right.start, right.end, right.len()), (90, 100, 10));
    }

    #[test]
    fn test_negative_start_is_dropped() {
        let chromosome = "A".repeat(100);
        assert!(extract_window(&chromosome, 1, -30, 20).is_none());
        assert!(extract_window(&chromosome, 1, -1, 99).is_none());
        assert!(extract_window(&chromosome, 1, 0, 20).is_some());
    }

    #[test]
    fn test_upstream_near_chromosome_start_writes_downstream_only() {
        let chromosome = "ACGT".repeat(25);
        let mut genome = genome(&format!(">chr1\n{}\n", chromosome));
        let mut store = RegionStore::open_in_memory().unwrap();
        store.insert_annotations(&[annotation("chr1", 20, 30)]).unwrap();

        let params = FlankingParams { size: 50, offset: 0 };
        let summary = populate_flanking_regions(&mut store, &mut genome, params).unwrap();
        assert_eq!((summary.regions, summary.dropped), (1, 1));

        let regions = store.regions(RegionTable::Flanking).unwrap();
        let coords: Vec<(i64, i64)> = regions.iter().map(|r| (r.start, r.end)).collect();
        assert_eq!(coords, [(30, 80)]);
    }

    #[test]
    fn test_window_outside_chromosome_is_dropped() {
        let chromosome = "A".repeat(100);
        assert!(extract_window(&chromosome, 1, -50, -10).is_none());
        assert!(extract_window(&chromosome, 1, 100, 200).is_none());
        assert!(extract_window(&chromosome, 1, 40, 40).is_none());
    }

    #[test]
    fn test_populate_flanking_regions() {
        let chr1 = format!("{}{}{}", "C".repeat(50), "t".repeat(20), "G".repeat(50));
        let text = format!(">chr1\n{}\n>chr2\nAAAA\n", chr1);
        let mut genome = genome(&text);

        let mut store = RegionStore::open_in_memory().unwrap();
        store
            .insert_annotations(&[
                annotation("chr1", 50, 70),
                annotation("chrUn", 0, 10),
                annotation("chr1", 0, 5),
            ])
            .unwrap();

        let params = FlankingParams { size: 30, offset: 5 };
        let summary = populate_flanking_regions(&mut store, &mut genome, params).unwrap();
        assert_eq!(summary.chromosomes, 1);
        assert_eq!(summary.skipped_chromosomes, 1);
        assert_eq!(summary.skipped_annotations, 1);
        assert_eq!(summary.regions, 3);
        assert_eq!((summary.clipped, summary.dropped), (0, 1));

        let regions = store.regions(RegionTable::Flanking).unwrap();
        // Annotation 1: downstream then upstream
        assert_eq!((regions[0].annotation, regions[0].start, regions[0].end), (1, 75, 105));
        assert_eq!((regions[1].annotation, regions[1].start, regions[1].end), (1, 15, 45));
        // Annotation 3: upstream would start before the chromosome
        assert_eq!((regions[2].annotation, regions[2].start, regions[2].end), (3, 10, 40));
        for region in &regions {
            assert_eq!(region.end - region.start, region.len() as i64);
            assert_eq!(region.sequence, &chr1[region.start as usize..region.end as usize]);
        }

        let info = store.info().unwrap();
        assert_eq!((info.flanking_size, info.flanking_offset), (30, 5));
    }
}
