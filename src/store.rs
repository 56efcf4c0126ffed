//! Region Database Module
//!
//! SQLite storage for annotations and the three sequence tables produced by
//! the pipeline. Every sequence table has the same layout:
//!
//! ```text
//! id          INTEGER PRIMARY KEY AUTOINCREMENT
//! annotation  INTEGER NOT NULL -> annotations(id)
//! sequence    TEXT    (case preserved)
//! start       INTEGER (genome-absolute, 0-based)
//! end         INTEGER (exclusive)
//! ```
//!
//! Table names come only from [`RegionTable`]; all values are bound as
//! statement parameters.

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, Row};
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use crate::annotation::{Annotation, Strand};
use crate::seqio::write_fasta_record;

/// Database layout version written to the `info` table.
pub const SCHEMA_VERSION: i64 = 1;

// ============================================================================
// Records
// ============================================================================

/// The sequence-bearing tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionTable {
    /// Raw windows next to each annotation.
    Flanking,
    /// Unmasked runs found inside the flanking windows.
    UnmaskedContigs,
    /// Unmasked runs left after duplicate removal.
    DeduplicatedContigs,
}

impl RegionTable {
    pub const ALL: [RegionTable; 3] = [
        RegionTable::Flanking,
        RegionTable::UnmaskedContigs,
        RegionTable::DeduplicatedContigs,
    ];

    pub fn table_name(&self) -> &'static str {
        match self {
            RegionTable::Flanking => "flanking",
            RegionTable::UnmaskedContigs => "UnmaskedContigs",
            RegionTable::DeduplicatedContigs => "DeduplicatedContigs",
        }
    }
}

impl fmt::Display for RegionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

impl FromStr for RegionTable {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "flanking" => Ok(RegionTable::Flanking),
            "unmaskedcontigs" | "unmasked" => Ok(RegionTable::UnmaskedContigs),
            "deduplicatedcontigs" | "deduplicated" => Ok(RegionTable::DeduplicatedContigs),
            _ => Err(format!(
                "Unknown table '{}'. Use flanking, UnmaskedContigs or DeduplicatedContigs",
                s
            )),
        }
    }
}

/// One row of a sequence table.
///
/// `id` is assigned on insert; rows built in memory carry 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub id: i64,
    pub annotation: i64,
    pub sequence: String,
    pub start: i64,
    pub end: i64,
}

impl Region {
    /// A new row whose end is derived from the sequence length.
    pub fn new(annotation: i64, sequence: String, start: i64) -> Self {
        let end = start + sequence.len() as i64;
        Self { id: 0, annotation, sequence, start, end }
    }

    /// The sub-row covering `[from, to)` of this row's sequence, with
    /// absolute coordinates.
    pub fn subregion(&self, from: usize, to: usize) -> Self {
        Self::new(self.annotation, self.sequence[from..to].to_string(), self.start + from as i64)
    }

    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            annotation: row.get(1)?,
            sequence: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            start: row.get(3)?,
            end: row.get(4)?,
        })
    }
}

/// Construction parameters recorded in the single `info` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Info {
    pub schema_version: i64,
    pub flanking_size: i64,
    pub flanking_offset: i64,
    pub min_contig_size: i64,
}

/// Row count and total sequence length of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableStats {
    pub table: &'static str,
    pub rows: u64,
    pub bases: u64,
}

// ============================================================================
// Store
// ============================================================================

/// A connection to a region database.
pub struct RegionStore {
    connection: Connection,
}

impl RegionStore {
    /// Creates a new database at `path` with empty tables.
    ///
    /// # Errors
    /// Fails if the file exists and `replace` is false.
    pub fn create<P: AsRef<Path>>(path: P, replace: bool) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            if !replace {
                anyhow::bail!("Database {} already exists", path.display());
            }
            std::fs::remove_file(path)
                .with_context(|| format!("Failed to remove existing database: {}", path.display()))?;
        }

        log::info!("Creating database {}", path.display());
        let connection = Connection::open(path)
            .with_context(|| format!("Failed to create database: {}", path.display()))?;
        let store = Self::configure(connection)?;
        store.create_schema()?;
        Ok(store)
    }

    /// Opens an existing database.
    ///
    /// A schema version other than [`SCHEMA_VERSION`] is reported as a
    /// warning only.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("Database {} not found", path.display());
        }

        let connection = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let store = Self::configure(connection)?;

        let info = store.info().context("Failed to read database info")?;
        if info.schema_version != SCHEMA_VERSION {
            log::warn!(
                "Unexpected database schema version {} (expected {})",
                info.schema_version,
                SCHEMA_VERSION
            );
        }
        Ok(store)
    }

    /// A fresh database held in memory.
    pub fn open_in_memory() -> Result<Self> {
        let store = Self::configure(Connection::open_in_memory()?)?;
        store.create_schema()?;
        Ok(store)
    }

    fn configure(connection: Connection) -> Result<Self> {
        connection.pragma_update(None, "foreign_keys", true)?;
        Ok(Self { connection })
    }

    fn create_schema(&self) -> Result<()> {
        self.connection.execute_batch(
            "CREATE TABLE info (
                id INTEGER PRIMARY KEY,
                schema_version INTEGER NOT NULL,
                flanking_size INTEGER NOT NULL,
                flanking_offset INTEGER NOT NULL,
                min_contig_size INTEGER NOT NULL
            );
            CREATE TABLE annotations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                chromosome TEXT NOT NULL,
                align_start INTEGER NOT NULL,
                align_end INTEGER NOT NULL,
                strand TEXT NOT NULL,
                score INTEGER,
                match_start INTEGER,
                match_end INTEGER
            );
            CREATE INDEX annotations_by_chromosome ON annotations(chromosome);",
        )?;

        for table in RegionTable::ALL {
            self.connection.execute_batch(&format!(
                "CREATE TABLE {} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    annotation INTEGER NOT NULL REFERENCES annotations(id),
                    sequence TEXT,
                    \"start\" INTEGER NOT NULL,
                    \"end\" INTEGER NOT NULL
                );",
                table
            ))?;
        }

        self.connection.execute(
            "INSERT INTO info (id, schema_version, flanking_size, flanking_offset, min_contig_size)
                VALUES (1, ?1, 0, 0, 0)",
            (SCHEMA_VERSION,),
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Info
    // ------------------------------------------------------------------------

    pub fn info(&self) -> Result<Info> {
        let info = self.connection.query_row(
            "SELECT schema_version, flanking_size, flanking_offset, min_contig_size FROM info WHERE id = 1",
            (),
            |row| {
                Ok(Info {
                    schema_version: row.get(0)?,
                    flanking_size: row.get(1)?,
                    flanking_offset: row.get(2)?,
                    min_contig_size: row.get(3)?,
                })
            },
        )?;
        Ok(info)
    }

    pub fn set_flanking_params(&self, size: u64, offset: u64) -> Result<()> {
        self.connection.execute(
            "UPDATE info SET flanking_size = ?1, flanking_offset = ?2 WHERE id = 1",
            (
                i64::try_from(size).unwrap_or(i64::MAX),
                i64::try_from(offset).unwrap_or(i64::MAX),
            ),
        )?;
        Ok(())
    }

    pub fn set_min_contig_size(&self, min_size: usize) -> Result<()> {
        self.connection.execute(
            "UPDATE info SET min_contig_size = ?1 WHERE id = 1",
            (min_size as i64,),
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Annotations
    // ------------------------------------------------------------------------

    /// Inserts annotations in order inside one transaction.
    pub fn insert_annotations(&mut self, annotations: &[Annotation]) -> Result<usize> {
        let transaction = self.connection.transaction()?;
        {
            let mut insert = transaction.prepare(
                "INSERT INTO annotations
                    (name, chromosome, align_start, align_end, strand, score, match_start, match_end)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for a in annotations {
                insert.execute((
                    &a.name,
                    &a.chromosome,
                    a.align_start,
                    a.align_end,
                    a.strand.to_string(),
                    a.score,
                    a.match_start,
                    a.match_end,
                ))?;
            }
        }
        transaction.commit()?;
        Ok(annotations.len())
    }

    /// Distinct chromosome names in order of first appearance.
    pub fn chromosomes(&self) -> Result<Vec<String>> {
        let mut statement = self.connection.prepare(
            "SELECT chromosome FROM annotations GROUP BY chromosome ORDER BY MIN(id)",
        )?;
        let names = statement
            .query_map((), |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    /// All annotations on `chromosome`, by id.
    pub fn annotations_on(&self, chromosome: &str) -> Result<Vec<Annotation>> {
        let mut statement = self.connection.prepare(
            "SELECT id, name, chromosome, align_start, align_end, strand, score, match_start, match_end
                FROM annotations WHERE chromosome = ?1 ORDER BY id",
        )?;
        let annotations = statement
            .query_map((chromosome,), |row| {
                let strand: String = row.get(5)?;
                Ok(Annotation {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    chromosome: row.get(2)?,
                    align_start: row.get(3)?,
                    align_end: row.get(4)?,
                    strand: strand.parse().unwrap_or(Strand::Unknown),
                    score: row.get(6)?,
                    match_start: row.get(7)?,
                    match_end: row.get(8)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(annotations)
    }

    pub fn annotation_count(&self) -> Result<u64> {
        let count: i64 = self.connection.query_row("SELECT COUNT(*) FROM annotations", (), |row| row.get(0))?;
        Ok(count as u64)
    }

    // ------------------------------------------------------------------------
    // Sequence tables
    // ------------------------------------------------------------------------

    /// Inserts rows in order inside one transaction. Row ids are ignored.
    pub fn insert_regions(&mut self, table: RegionTable, regions: &[Region]) -> Result<usize> {
        let transaction = self.connection.transaction()?;
        {
            let mut insert = transaction.prepare(&format!(
                "INSERT INTO {} (annotation, sequence, \"start\", \"end\") VALUES (?1, ?2, ?3, ?4)",
                table
            ))?;
            for region in regions {
                insert
                    .execute((region.annotation, &region.sequence, region.start, region.end))
                    .with_context(|| format!("Failed to insert into {} for annotation {}", table, region.annotation))?;
            }
        }
        transaction.commit()?;
        Ok(regions.len())
    }

    /// All rows of `table`, by id.
    pub fn regions(&self, table: RegionTable) -> Result<Vec<Region>> {
        let mut statement = self.connection.prepare(&format!(
            "SELECT id, annotation, sequence, \"start\", \"end\" FROM {} ORDER BY id",
            table
        ))?;
        let regions = statement
            .query_map((), Region::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(regions)
    }

    /// The row of `table` with the given id.
    pub fn region(&self, table: RegionTable, id: i64) -> Result<Option<Region>> {
        let mut statement = self.connection.prepare_cached(&format!(
            "SELECT id, annotation, sequence, \"start\", \"end\" FROM {} WHERE id = ?1",
            table
        ))?;
        let region = statement.query_row((id,), Region::from_row).optional()?;
        Ok(region)
    }

    /// Number of rows in `table`.
    pub fn row_count(&self, table: RegionTable) -> Result<u64> {
        let count: i64 = self
            .connection
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), (), |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Removes every row of `table` and restarts its id sequence.
    pub fn truncate(&mut self, table: RegionTable) -> Result<usize> {
        let transaction = self.connection.transaction()?;
        let removed = transaction.execute(&format!("DELETE FROM {}", table), ())?;
        transaction.execute("DELETE FROM sqlite_sequence WHERE name = ?1", (table.table_name(),))?;
        transaction.commit()?;
        Ok(removed)
    }

    /// Row counts and sequence totals for every table.
    pub fn table_stats(&self) -> Result<Vec<TableStats>> {
        let mut stats = vec![TableStats {
            table: "annotations",
            rows: self.annotation_count()?,
            bases: 0,
        }];

        for table in RegionTable::ALL {
            let (rows, bases): (i64, i64) = self.connection.query_row(
                &format!("SELECT COUNT(*), COALESCE(SUM(LENGTH(sequence)), 0) FROM {}", table),
                (),
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            stats.push(TableStats {
                table: table.table_name(),
                rows: rows as u64,
                bases: bases as u64,
            });
        }

        Ok(stats)
    }

    /// Writes every row of `table` as FASTA, named by row id.
    pub fn export_fasta<W: Write>(&self, table: RegionTable, writer: &mut W) -> Result<usize> {
        let mut statement = self
            .connection
            .prepare(&format!("SELECT id, sequence FROM {} ORDER BY id", table))?;
        let mut rows = statement.query(())?;

        let mut written = 0;
        while let Some(row) = rows.next()? {
            let id: i64 = row.get(0)?;
            let sequence: Option<String> = row.get(1)?;
            write_fasta_record(writer, &id.to_string(), sequence.as_deref().unwrap_or(""))?;
            written += 1;
        }
        Ok(written)
    }
}
