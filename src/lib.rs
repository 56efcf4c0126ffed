//! uniqflank - Unique Flanking Region Databases
//!
//! Builds databases of genomic sequence flanking annotated repeat elements,
//! keeps only the unmasked parts, and removes contigs that occur elsewhere in
//! the genome according to BLAT alignments.
//!
//! # Pipeline
//! ```text
//! annotations + genome FASTA
//!   -> flanking         (windows next to each annotation)
//!   -> UnmaskedContigs  (uppercase runs >= min contig size)
//!   -> export + BLAT    (PSL alignments)
//!   -> DeduplicatedContigs
//! ```
//!
//! # Modules
//! - `seqio`: indexed genome FASTA access and FASTA export
//! - `psl`: PSL alignment parsing
//! - `annotation`: repeat annotation records
//! - `segment`: softmask segmentation
//! - `store`: SQLite region database
//! - `flanking`: flanking window extraction
//! - `contigs`: unmasked contig construction
//! - `dedup`: alignment-driven deduplication
//! - `aligner`: BLAT invocation
//! - `config`: JSON configuration file

pub mod seqio;
pub mod psl;
pub mod annotation;
pub mod segment;
pub mod store;
pub mod flanking;
pub mod contigs;
pub mod dedup;
pub mod aligner;
pub mod config;
