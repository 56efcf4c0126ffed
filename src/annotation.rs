//! Annotation Records Module
//!
//! Repeat annotations are the anchors of every flanking region. They arrive
//! already normalized by an upstream converter as tab-separated records:
//!
//! ```text
//! Col  Description
//! 1    Chromosome name
//! 2    Alignment start (0-based)
//! 3    Alignment end (exclusive)
//! 4    Repeat name
//! 5    Score ('.' when missing)
//! 6    Strand ('+', '-' or '.')
//! 7    Match start within the repeat consensus (optional)
//! 8    Match end within the repeat consensus (optional)
//! ```
//!
//! Columns 1-6 are BED6, so plain BED exports can be loaded directly.
//! Blank lines and `#`, `track` and `browser` lines are skipped.

use anyhow::{Context, Result};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

/// Strand of an annotated feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strand {
    Forward,
    Reverse,
    Unknown,
}

impl Strand {
    pub fn as_char(&self) -> char {
        match self {
            Strand::Forward => '+',
            Strand::Reverse => '-',
            Strand::Unknown => '.',
        }
    }
}

impl FromStr for Strand {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "+" => Strand::Forward,
            "-" => Strand::Reverse,
            _ => Strand::Unknown,
        })
    }
}

impl fmt::Display for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// One annotated repeat element.
///
/// `id` is assigned by the database; freshly parsed records carry 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    pub id: i64,
    pub name: String,
    pub chromosome: String,
    /// Genome-absolute start, 0-based.
    pub align_start: i64,
    /// Genome-absolute end, exclusive.
    pub align_end: i64,
    pub strand: Strand,
    pub score: Option<i64>,
    pub match_start: Option<i64>,
    pub match_end: Option<i64>,
}

impl Annotation {
    /// Parses one normalized annotation line.
    pub fn parse_line(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
        if fields.len() < 6 {
            anyhow::bail!("Invalid annotation line: expected at least 6 fields, found {}", fields.len());
        }

        let align_start: i64 = fields[1].parse().context("Invalid start")?;
        let align_end: i64 = fields[2].parse().context("Invalid end")?;
        if align_start < 0 || align_end < align_start {
            anyhow::bail!("Invalid interval {}-{}", align_start, align_end);
        }

        let score = match fields[4] {
            "." | "" => None,
            s => Some(parse_score(s)?),
        };

        let (match_start, match_end) = match (fields.get(6), fields.get(7)) {
            (Some(s), Some(e)) if !s.is_empty() && *s != "." && !e.is_empty() && *e != "." => (
                Some(s.parse().context("Invalid match start")?),
                Some(e.parse().context("Invalid match end")?),
            ),
            _ => (None, None),
        };

        Ok(Self {
            id: 0,
            name: fields[3].to_string(),
            chromosome: fields[0].to_string(),
            align_start,
            align_end,
            strand: fields[5].parse().unwrap_or(Strand::Unknown),
            score,
            match_start,
            match_end,
        })
    }
}

/// Scores are stored as integers; fractional scores are truncated.
fn parse_score(s: &str) -> Result<i64> {
    if let Ok(v) = s.parse::<i64>() {
        return Ok(v);
    }
    let v: f64 = s.parse().context("Invalid score")?;
    Ok(v as i64)
}

fn is_skippable(line: &str) -> bool {
    let line = line.trim();
    line.is_empty() || line.starts_with('#') || line.starts_with("track") || line.starts_with("browser")
}

/// Reads all annotation records from `reader`, in input order.
pub fn read_annotations<R: BufRead>(reader: R) -> Result<Vec<Annotation>> {
    let mut annotations = Vec::new();

    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if is_skippable(&line) {
            continue;
        }
        let record = Annotation::parse_line(&line)
            .with_context(|| format!("Annotation line {}", i + 1))?;
        annotations.push(record);
    }

    Ok(annotations)
}

/// Opens and reads an annotation file.
pub fn load_annotations<P: AsRef<Path>>(path: P) -> Result<Vec<Annotation>> {
    let file = File::open(path.as_ref())
        .with_context(|| format!("Failed to open annotations: {}", path.as_ref().display()))?;
    read_annotations(BufReader::new(file))
        .with_context(|| format!("Failed to read annotations: {}", path.as_ref().display()))
}
