//! Genome Sequence I/O Module
//!
//! Provides indexed access to chromosomes stored in a single multi-record
//! FASTA file, and FASTA export for stored sequence tables.
//!
//! The genome is scanned once to record the byte offset of every header
//! line. Individual chromosomes are then loaded on demand by seeking to the
//! recorded offset, so a genome-scale file never has to be held in memory
//! as a whole.
//!
//! Sequence case is preserved exactly as read: uppercase marks unmasked
//! sequence and lowercase marks softmasked repeats.
//!
//! # Examples
//! ```no_run
//! use uniqflank::seqio::GenomeReader;
//!
//! let mut genome = GenomeReader::open("hg38.fa").unwrap();
//! let chr1 = genome.load_chromosome("chr1").unwrap();
//! println!("chr1: {} bp", chr1.len());
//! ```

use anyhow::{Context, Result};
use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::Path;

/// Line width used when writing FASTA sequence bodies.
pub const FASTA_LINE_WIDTH: usize = 80;

// ============================================================================
// Genome Index
// ============================================================================

/// Byte offsets of record headers in a FASTA file.
///
/// Keys are record identifiers: the first whitespace-delimited token after
/// the `>` marker. Values point at the `>` byte of the header line.
#[derive(Debug, Clone, Default)]
pub struct GenomeIndex {
    offsets: FxHashMap<String, u64>,
}

impl GenomeIndex {
    /// Builds the index with a single forward scan of `reader`.
    ///
    /// Offsets are counted from the reader's position when the call is made.
    /// An empty input yields an empty index. Sequence lines are not validated.
    pub fn build<R: BufRead>(mut reader: R) -> Result<Self> {
        let mut index = GenomeIndex::default();
        let mut line_buf = String::with_capacity(256);
        let mut position = 0u64;

        loop {
            line_buf.clear();
            let bytes = reader.read_line(&mut line_buf)?;
            if bytes == 0 {
                break;
            }

            if let Some(header) = line_buf.strip_prefix('>') {
                let name = record_name(header);
                if index.offsets.contains_key(&name) {
                    log::warn!("Duplicate FASTA record '{}' at byte {}; keeping the first", name, position);
                } else {
                    index.offsets.insert(name, position);
                }
            }

            position += bytes as u64;
        }

        Ok(index)
    }

    /// Returns the header offset of `name`, if indexed.
    pub fn offset(&self, name: &str) -> Option<u64> {
        self.offsets.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

/// Extracts the record identifier from a header line (without the `>`).
fn record_name(header: &str) -> String {
    header.split_whitespace().next().unwrap_or("").to_string()
}

// ============================================================================
// Genome Reader
// ============================================================================

/// Random-access reader over an indexed FASTA genome.
///
/// Owns both the file handle and its [`GenomeIndex`], so the read position
/// is never shared with callers. After each load the cursor rests on the
/// header of the following record (or at end of file).
pub struct GenomeReader<R> {
    reader: R,
    index: GenomeIndex,
    line_buf: String,
}

impl GenomeReader<BufReader<File>> {
    /// Opens and indexes a FASTA genome file.
    ///
    /// # Arguments
    /// * `path` - Path to the (uncompressed) FASTA file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())
            .with_context(|| format!("Failed to open genome: {}", path.as_ref().display()))?;
        Self::new(BufReader::with_capacity(1024 * 1024, file))
            .with_context(|| format!("Failed to index genome: {}", path.as_ref().display()))
    }
}

impl<R: BufRead + Seek> GenomeReader<R> {
    /// Indexes `reader` from its start and rewinds it.
    pub fn new(mut reader: R) -> Result<Self> {
        reader.seek(SeekFrom::Start(0))?;
        let index = GenomeIndex::build(&mut reader)?;
        reader.seek(SeekFrom::Start(0))?;

        Ok(Self {
            reader,
            index,
            line_buf: String::with_capacity(256),
        })
    }

    pub fn index(&self) -> &GenomeIndex {
        &self.index
    }

    /// Reads the record whose header starts at byte `offset`.
    ///
    /// Returns the concatenated sequence lines with line terminators removed.
    /// An offset that does not point at a header yields an empty sequence.
    pub fn read_record_at(&mut self, offset: u64) -> Result<String> {
        self.reader.seek(SeekFrom::Start(offset))?;

        self.line_buf.clear();
        if self.reader.read_line(&mut self.line_buf)? == 0 || !self.line_buf.starts_with('>') {
            return Ok(String::new());
        }

        self.read_sequence_body()
    }

    /// Loads the full sequence of chromosome `name`.
    ///
    /// Seeks directly to the indexed header. Names missing from the index are
    /// searched for by scanning forward from the current position. Returns an
    /// empty string if the chromosome is not found.
    pub fn load_chromosome(&mut self, name: &str) -> Result<String> {
        if let Some(offset) = self.index.offset(name) {
            return self.read_record_at(offset);
        }

        log::debug!("Chromosome '{}' not indexed; scanning from current position", name);
        loop {
            self.line_buf.clear();
            if self.reader.read_line(&mut self.line_buf)? == 0 {
                return Ok(String::new());
            }
            if let Some(header) = self.line_buf.strip_prefix('>') {
                if record_name(header) == name {
                    return self.read_sequence_body();
                }
            }
        }
    }

    /// Reads sequence lines up to (not including) the next header.
    fn read_sequence_body(&mut self) -> Result<String> {
        let mut seq = String::with_capacity(1 << 20);

        loop {
            // Stop before consuming the next header so the cursor rests on it
            let next = self.reader.fill_buf()?;
            if next.is_empty() || next[0] == b'>' {
                break;
            }

            self.line_buf.clear();
            self.reader.read_line(&mut self.line_buf)?;
            seq.push_str(self.line_buf.trim_end_matches(['\n', '\r']));
        }

        Ok(seq)
    }
}

// ============================================================================
// FASTA Export
// ============================================================================

/// Writes one FASTA record with the body wrapped at [`FASTA_LINE_WIDTH`].
///
/// An empty sequence produces a header line only.
pub fn write_fasta_record<W: Write>(writer: &mut W, name: &str, seq: &str) -> Result<()> {
    writeln!(writer, ">{}", name)?;
    for line in seq.as_bytes().chunks(FASTA_LINE_WIDTH) {
        writer.write_all(line)?;
        writer.write_all(b"\n")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const GENOME: &str = ">chr1 assembled\nAAAAAttttA\nAAAA\n>chr2\nGGGG\ncccc\n>chr3\nTT\n";

    fn reader(text: &str) -> GenomeReader<Cursor<Vec<u8>>> {
        GenomeReader::new(Cursor::new(text.as_bytes().to_vec())).unwrap()
    }

    #[test]
    fn test_index_offsets() {
        let index = GenomeIndex::build(Cursor::new(GENOME)).unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index.offset("chr1"), Some(0));
        assert_eq!(index.offset("chr2"), Some(GENOME.find(">chr2").unwrap() as u64));
        assert_eq!(index.offset("chr3"), Some(GENOME.find(">chr3").unwrap() as u64));
    }

    #[test]
    fn test_index_crlf_offsets() {
        let text = ">a\r\nACGT\r\n>b\r\nTTTT\r\n";
        let index = GenomeIndex::build(Cursor::new(text)).unwrap();
        assert_eq!(index.offset("b"), Some(text.find(">b").unwrap() as u64));

        let mut genome = reader(text);
        assert_eq!(genome.load_chromosome("b").unwrap(), "TTTT");
        assert_eq!(genome.load_chromosome("a").unwrap(), "ACGT");
    }

    #[test]
    fn test_index_empty_file() {
        let index = GenomeIndex::build(Cursor::new("")).unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn test_load_chromosome_preserves_case() {
        let mut genome = reader(GENOME);
        assert_eq!(genome.load_chromosome("chr1").unwrap(), "AAAAAttttAAAAA");
        assert_eq!(genome.load_chromosome("chr2").unwrap(), "GGGGcccc");
        assert_eq!(genome.load_chromosome("chr3").unwrap(), "TT");
    }

    #[test]
    fn test_load_missing_chromosome_is_empty() {
        let mut genome = reader(GENOME);
        assert_eq!(genome.load_chromosome("chrX").unwrap(), "");
    }

    #[test]
    fn test_cursor_rests_on_next_header() {
        let mut genome = reader(GENOME);
        genome.load_chromosome("chr1").unwrap();
        let next = genome.reader.fill_buf().unwrap();
        assert_eq!(next[0], b'>');
        assert_eq!(genome.reader.stream_position().unwrap(), genome.index().offset("chr2").unwrap());
    }

    #[test]
    fn test_unindexed_fallback_scan() {
        let mut genome = reader(GENOME);
        genome.index = GenomeIndex::default();
        assert_eq!(genome.load_chromosome("chr2").unwrap(), "GGGGcccc");
        // Scanning resumes from the cursor, which now sits on chr3
        assert_eq!(genome.load_chromosome("chr3").unwrap(), "TT");
        assert_eq!(genome.load_chromosome("chr1").unwrap(), "");
    }

    #[test]
    fn test_read_record_at_non_header_offset() {
        let mut genome = reader(GENOME);
        assert_eq!(genome.read_record_at(3).unwrap(), "");
    }

    #[test]
    fn test_open_genome_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(GENOME.as_bytes()).unwrap();
        let mut genome = GenomeReader::open(file.path()).unwrap();
        assert_eq!(genome.index().len(), 3);
        assert_eq!(genome.load_chromosome("chr2").unwrap(), "GGGGcccc");
    }

    #[test]
    fn test_write_fasta_record_wraps() {
        let seq = "A".repeat(170);
        let mut out = Vec::new();
        write_fasta_record(&mut out, "7", &seq).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], ">7");
        assert_eq!(lines[1].len(), 80);
        assert_eq!(lines[2].len(), 80);
        assert_eq!(lines[3].len(), 10);
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn test_write_fasta_record_empty_sequence() {
        let mut out = Vec::new();
        write_fasta_record(&mut out, "1", "").unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), ">1\n");
    }
}
