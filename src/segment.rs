//! Softmask segmentation.
//!
//! Softmasked sequence marks known repeats in lowercase and unique sequence
//! in uppercase. These helpers find the unmasked runs worth keeping and
//! re-mask sub-ranges that turned out to be duplicated elsewhere.

/// Finds maximal runs of uppercase bases at least `min_size` long.
///
/// Returns half-open `(start, end)` offsets in sequence order. Any byte that
/// is not an ASCII uppercase letter ends the current run. A run that reaches
/// the end of the sequence is reported like any other.
pub fn find_unmasked_segments(sequence: &str, min_size: usize) -> Vec<(usize, usize)> {
    let mut segments = Vec::new();
    let mut run_start: Option<usize> = None;

    for (i, b) in sequence.bytes().enumerate() {
        match (b.is_ascii_uppercase(), run_start) {
            (true, None) => run_start = Some(i),
            (false, Some(start)) => {
                if i - start >= min_size {
                    segments.push((start, i));
                }
                run_start = None;
            }
            _ => {}
        }
    }

    if let Some(start) = run_start {
        if sequence.len() - start >= min_size {
            segments.push((start, sequence.len()));
        }
    }

    segments
}

/// Lowercases every `[start, end)` range of `sequence`.
///
/// Ranges are clamped to the sequence length; empty or reversed ranges are
/// ignored. Overlapping ranges are fine, masking is idempotent.
pub fn mask_ranges(sequence: &str, ranges: &[(usize, usize)]) -> String {
    let mut bytes = sequence.as_bytes().to_vec();
    let len = bytes.len();

    for &(start, end) in ranges {
        let end = end.min(len);
        if start >= end {
            continue;
        }
        bytes[start..end].make_ascii_lowercase();
    }

    // Only ASCII bytes were changed
    String::from_utf8(bytes).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_softmasked_scenario() {
        assert_eq!(find_unmasked_segments("AAAAAttttAAAAA", 5), vec![(0, 5), (9, 14)]);
    }

    #[test]
    fn test_all_lowercase_has_no_segments() {
        assert!(find_unmasked_segments("acgtacgtacgtnnnn", 1).is_empty());
        assert!(find_unmasked_segments("", 0).is_empty());
    }

    #[test]
    fn test_all_uppercase_is_one_segment() {
        let seq = "ACGTACGTAC";
        assert_eq!(find_unmasked_segments(seq, 10), vec![(0, 10)]);
        assert_eq!(find_unmasked_segments(seq, 4), vec![(0, 10)]);
        assert!(find_unmasked_segments(seq, 11).is_empty());
    }

    #[test]
    fn test_short_runs_are_discarded() {
        assert_eq!(find_unmasked_segments("AAaAAAAAaaAA", 3), vec![(3, 8)]);
    }

    #[test]
    fn test_non_letters_end_runs() {
        assert_eq!(find_unmasked_segments("ACGT-ACGTA", 4), vec![(0, 4), (5, 10)]);
        assert!(find_unmasked_segments("ACGT\nACGT", 5).is_empty());
    }

    #[test]
    fn test_mask_ranges_lowercases() {
        let seq = "A".repeat(30);
        let masked = mask_ranges(&seq, &[(10, 20)]);
        assert_eq!(&masked[..10], "A".repeat(10));
        assert_eq!(&masked[10..20], "a".repeat(10));
        assert_eq!(&masked[20..], "A".repeat(10));
    }

    #[test]
    fn test_mask_ranges_overlapping_and_out_of_bounds() {
        let seq = "ACGTACGTAC";
        let a = mask_ranges(seq, &[(2, 6), (4, 8), (9, 50), (7, 3)]);
        let b = mask_ranges(seq, &[(9, 50), (4, 8), (2, 6)]);
        assert_eq!(a, "ACgtacgtAc");
        assert_eq!(a, b);
    }

    #[test]
    fn test_masked_range_never_in_segments() {
        let seq = "ACGT".repeat(50);
        let ranges = [(0, 7), (33, 60), (61, 62), (150, 200)];
        let masked = mask_ranges(&seq, &ranges);
        for (start, end) in find_unmasked_segments(&masked, 1) {
            for &(ms, me) in &ranges {
                assert!(end <= ms || start >= me, "segment {}..{} overlaps mask {}..{}", start, end, ms, me);
            }
        }
    }
}
