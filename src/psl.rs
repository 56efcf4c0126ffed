//! PSL (BLAT alignment format) Parser Module
//!
//! Provides parsing of the tab-separated PSL output written by BLAT when the
//! exported contigs are aligned against themselves or against the genome.
//!
//! # PSL Columns Used
//! ```text
//! Col  Type    Description
//! 0    int     Number of matching bases
//! 9    string  Query sequence name (contig id)
//! 10   int     Query sequence size
//! 11   int     Alignment start in query (0-based)
//! 12   int     Alignment end in query
//! 13   string  Target sequence name
//! ```
//!
//! Lines whose first column is not numeric (the `psLayout` header block,
//! separator lines, repeated headers of concatenated files) are skipped.
//!
//! # Example Usage
//! ```no_run
//! use uniqflank::psl::PslReader;
//!
//! let reader = PslReader::open("contigs_self.psl").unwrap();
//! for record in reader {
//!     let record = record.unwrap();
//!     println!("{} -> {} ({} bp matched)", record.query_name, record.target_name, record.matches);
//! }
//! ```

use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

/// Minimum number of columns a PSL data line must have.
const MIN_PSL_FIELDS: usize = 14;

// ============================================================================
// PSL Record
// ============================================================================

/// One alignment row from a PSL file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentMatch {
    /// Number of matching bases (column 0).
    pub matches: usize,
    /// Query sequence name (column 9).
    pub query_name: String,
    /// Query sequence size (column 10).
    pub query_len: usize,
    /// Alignment start in query, 0-based (column 11).
    pub query_start: usize,
    /// Alignment end in query (column 12).
    pub query_end: usize,
    /// Target sequence name (column 13).
    pub target_name: String,
}

impl AlignmentMatch {
    /// Parses a tab-separated PSL data line.
    ///
    /// # Returns
    /// - `Ok(None)` - header or comment line (first column not numeric)
    /// - `Ok(Some(record))` - data line
    /// - `Err(e)` - data line with missing or non-numeric fields
    pub fn parse_line(line: &str) -> Result<Option<Self>> {
        let fields: Vec<&str> = line.split('\t').collect();

        let first = fields[0].trim();
        if first.is_empty() || !first.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(None);
        }
        if fields.len() < MIN_PSL_FIELDS {
            anyhow::bail!("Invalid PSL line: fewer than {} fields", MIN_PSL_FIELDS);
        }

        Ok(Some(Self {
            matches: first.parse().context("Invalid match count")?,
            query_name: fields[9].trim().to_string(),
            query_len: fields[10].trim().parse().context("Invalid query size")?,
            query_start: fields[11].trim().parse().context("Invalid query start")?,
            query_end: fields[12].trim().parse().context("Invalid query end")?,
            target_name: fields[13].trim().to_string(),
        }))
    }
}

// ============================================================================
// PSL Reader
// ============================================================================

/// Sequential reader for PSL files, plain or gzip-compressed.
///
/// Implements Iterator, yielding only data records.
pub struct PslReader {
    reader: Box<dyn BufRead>,
    line_buf: String,
    line_no: usize,
}

impl PslReader {
    /// Opens a PSL file for reading.
    ///
    /// Files ending in `.gz` are decompressed on the fly.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open PSL: {}", path.display()))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if ext == "gz" {
            Ok(Self::from_reader(MultiGzDecoder::new(file)))
        } else {
            Ok(Self::from_reader(file))
        }
    }

    /// Wraps any byte source.
    pub fn from_reader<R: Read + 'static>(reader: R) -> Self {
        Self {
            reader: Box::new(BufReader::with_capacity(1024 * 1024, reader)),
            line_buf: String::with_capacity(512),
            line_no: 0,
        }
    }

    /// Reads the next alignment record, skipping header and blank lines.
    ///
    /// # Returns
    /// - `Ok(Some(record))` - Successfully read a record
    /// - `Ok(None)` - End of file reached
    /// - `Err(e)` - I/O or parsing error
    pub fn read_next(&mut self) -> Result<Option<AlignmentMatch>> {
        loop {
            self.line_buf.clear();
            if self.reader.read_line(&mut self.line_buf)? == 0 {
                return Ok(None);
            }
            self.line_no += 1;

            let line = self.line_buf.trim_end_matches(['\n', '\r']);
            if line.trim().is_empty() {
                continue;
            }

            let parsed = AlignmentMatch::parse_line(line)
                .with_context(|| format!("PSL line {}", self.line_no))?;
            if let Some(record) = parsed {
                return Ok(Some(record));
            }
        }
    }
}

impl Iterator for PslReader {
    type Item = Result<AlignmentMatch>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_next() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

/// Chains several PSL files into one record stream, in the given order.
///
/// Used when the contigs were aligned against more than one target and the
/// outputs must be reconciled together.
pub fn read_all<P: AsRef<Path>>(paths: &[P]) -> Result<impl Iterator<Item = Result<AlignmentMatch>>> {
    let readers = paths
        .iter()
        .map(PslReader::open)
        .collect::<Result<Vec<_>>>()?;
    Ok(readers.into_iter().flatten())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    const HEADER: &str = "psLayout version 3\n\
\n\
match\tmis- \trep. \tN's\tQ gap\tQ gap\tT gap\tT gap\tstrand\tQ        \tQ   \tQ    \tQ  \tT        \tT   \tT    \tT  \tblock\tblockSizes \tqStarts\t tStarts\n\
     \tmatch\tmatch\t   \tcount\tbases\tcount\tbases\t      \tname     \tsize\tstart\tend\tname     \tsize\tstart\tend\tcount\n\
---------------------------------------------------------------------------------------------------------------------------------------------------------------\n";

    fn psl_line(matches: usize, query: &str, qsize: usize, qstart: usize, qend: usize, target: &str) -> String {
        format!(
            "{}\t0\t0\t0\t0\t0\t0\t0\t+\t{}\t{}\t{}\t{}\t{}\t1000\t0\t{}\t1\t{},\t{},\t0,\n",
            matches, query, qsize, qstart, qend, target, matches, matches, qstart
        )
    }

    #[test]
    fn test_parse_psl_line() {
        let line = psl_line(98, "12", 100, 1, 99, "12");
        let record = AlignmentMatch::parse_line(line.trim_end()).unwrap().unwrap();
        assert_eq!(record.matches, 98);
        assert_eq!(record.query_name, "12");
        assert_eq!(record.query_len, 100);
        assert_eq!(record.query_start, 1);
        assert_eq!(record.query_end, 99);
        assert_eq!(record.target_name, "12");
    }

    #[test]
    fn test_header_lines_are_skipped() {
        assert!(AlignmentMatch::parse_line("psLayout version 3").unwrap().is_none());
        assert!(AlignmentMatch::parse_line("match\tmis- \trep.").unwrap().is_none());
        assert!(AlignmentMatch::parse_line("-----------").unwrap().is_none());
    }

    #[test]
    fn test_truncated_data_line() {
        assert!(AlignmentMatch::parse_line("98\t0\t0").is_err());
    }

    #[test]
    fn test_reader_skips_concatenated_headers() {
        let mut text = String::from(HEADER);
        text.push_str(&psl_line(98, "1", 100, 0, 100, "1"));
        text.push_str(HEADER);
        text.push_str(&psl_line(20, "1", 100, 10, 30, "chr2"));

        let records: Vec<AlignmentMatch> = PslReader::from_reader(Cursor::new(text.into_bytes()))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].target_name, "chr2");
        assert_eq!((records[1].query_start, records[1].query_end), (10, 30));
    }

    #[test]
    fn test_open_gzipped_psl() {
        use flate2::write::GzEncoder;
        use flate2::Compression;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hits.psl.gz");
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder.write_all(HEADER.as_bytes()).unwrap();
        encoder.write_all(psl_line(50, "3", 60, 0, 50, "3").as_bytes()).unwrap();
        encoder.finish().unwrap();

        let records: Vec<AlignmentMatch> = PslReader::open(&path).unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].query_name, "3");
    }

    #[test]
    fn test_read_all_preserves_file_order() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("self.psl");
        let second = dir.path().join("genome.psl");
        std::fs::write(&first, format!("{}{}", HEADER, psl_line(40, "1", 40, 0, 40, "1"))).unwrap();
        std::fs::write(&second, format!("{}{}", HEADER, psl_line(40, "1", 40, 0, 40, "chr1"))).unwrap();

        let targets: Vec<String> = read_all(&[&first, &second])
            .unwrap()
            .map(|r| r.unwrap().target_name)
            .collect();
        assert_eq!(targets, ["1", "chr1"]);
    }
}
