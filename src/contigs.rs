//! Unmasked contig construction.
//!
//! Splits every flanking region into its unmasked (uppercase) runs and stores
//! those of at least the minimum size in `UnmaskedContigs`, with absolute
//! coordinates.

use anyhow::Result;
use rayon::prelude::*;

use crate::segment::find_unmasked_segments;
use crate::store::{Region, RegionStore, RegionTable};

pub const DEFAULT_MIN_CONTIG_SIZE: usize = 20;

/// Counts from one contig build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContigSummary {
    pub flanking_regions: usize,
    pub contigs: usize,
    pub bases: usize,
}

/// The unmasked runs of one region as new rows of the same annotation.
pub fn split_region(region: &Region, min_size: usize) -> Vec<Region> {
    find_unmasked_segments(&region.sequence, min_size)
        .into_iter()
        .map(|(s, e)| region.subregion(s, e))
        .collect()
}

/// Fills `UnmaskedContigs` from the `flanking` table.
///
/// Segments are found in parallel; rows are written in flanking-row order in
/// one transaction.
pub fn populate_unmasked_contigs(store: &mut RegionStore, min_size: usize) -> Result<ContigSummary> {
    store.set_min_contig_size(min_size)?;

    let flanking = store.regions(RegionTable::Flanking)?;
    log::info!(
        "Segmenting {} flanking regions (min contig size {})",
        flanking.len(),
        min_size
    );

    let contigs: Vec<Region> = flanking
        .par_iter()
        .filter(|region| !region.is_empty())
        .flat_map_iter(|region| split_region(region, min_size))
        .collect();

    let summary = ContigSummary {
        flanking_regions: flanking.len(),
        contigs: store.insert_regions(RegionTable::UnmaskedContigs, &contigs)?,
        bases: contigs.iter().map(Region::len).sum(),
    };

    log::info!("Wrote {} unmasked contigs ({} bp)", summary.contigs, summary.bases);
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::{Annotation, Strand};

    fn store_with_annotation() -> RegionStore {
        let mut store = RegionStore::open_in_memory().unwrap();
        store
            .insert_annotations(&[Annotation {
                id: 0,
                name: "L1".to_string(),
                chromosome: "chr1".to_string(),
                align_start: 0,
                align_end: 10,
                strand: Strand::Forward,
                score: None,
                match_start: None,
                match_end: None,
            }])
            .unwrap();
        store
    }

    #[test]
    fn test_split_region_absolute_coordinates() {
        let region = Region::new(7, "AAAAAttttAAAAA".to_string(), 1000);
        let parts = split_region(&region, 5);
        assert_eq!(parts.len(), 2);
        assert_eq!((parts[0].start, parts[0].end), (1000, 1005));
        assert_eq!((parts[1].start, parts[1].end), (1009, 1014));
        assert!(parts.iter().all(|p| p.annotation == 7 && p.sequence == "AAAAA"));
    }

    #[test]
    fn test_populate_unmasked_contigs_keeps_row_order() {
        let mut store = store_with_annotation();
        let flanking: Vec<Region> = (0..50)
            .map(|i| Region::new(1, format!("{}nn{}", "C".repeat(6), "G".repeat(i % 8)), i as i64 * 100))
            .chain(std::iter::once(Region::new(1, "acgt".to_string(), 9000)))
            .collect();
        store.insert_regions(RegionTable::Flanking, &flanking).unwrap();

        let summary = populate_unmasked_contigs(&mut store, 6).unwrap();
        assert_eq!(summary.flanking_regions, 51);

        let contigs = store.regions(RegionTable::UnmaskedContigs).unwrap();
        assert_eq!(contigs.len(), summary.contigs);
        assert!(contigs.windows(2).all(|w| w[0].start < w[1].start));
        for contig in &contigs {
            assert!(contig.len() >= 6);
            assert!(contig.sequence.bytes().all(|b| b.is_ascii_uppercase()));
            assert_eq!(contig.end - contig.start, contig.len() as i64);
        }
        assert_eq!(store.info().unwrap().min_contig_size, 6);
    }
}
