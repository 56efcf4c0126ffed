//! JSON configuration file.
//!
//! Every key is optional; missing keys take the built-in defaults and
//! command-line options override whatever the file sets.
//!
//! ```json
//! {
//!   "database": "hg38_L1.db",
//!   "flanking_size": 5000,
//!   "flanking_offset": 0,
//!   "min_contig_size": 20,
//!   "ignore_alt": true,
//!   "alt_suffix": "_alt",
//!   "strategy": "self-genome",
//!   "expected_duplicates": null
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::contigs::DEFAULT_MIN_CONTIG_SIZE;
use crate::dedup::{DedupStrategy, DEFAULT_ALT_SUFFIX};
use crate::flanking::{DEFAULT_FLANKING_OFFSET, DEFAULT_FLANKING_SIZE};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SetupConfig {
    pub database: Option<PathBuf>,
    pub flanking_size: u64,
    pub flanking_offset: u64,
    pub min_contig_size: usize,
    pub ignore_alt: bool,
    pub alt_suffix: String,
    pub strategy: DedupStrategy,
    pub expected_duplicates: Option<u32>,
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            database: None,
            flanking_size: DEFAULT_FLANKING_SIZE,
            flanking_offset: DEFAULT_FLANKING_OFFSET,
            min_contig_size: DEFAULT_MIN_CONTIG_SIZE,
            ignore_alt: false,
            alt_suffix: DEFAULT_ALT_SUFFIX.to_string(),
            strategy: DedupStrategy::default(),
            expected_duplicates: None,
        }
    }
}

impl SetupConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open config: {}", path.display()))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    /// The file at `path`, or the defaults when no file is given.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: SetupConfig = serde_json::from_str(r#"{"flanking_size": 2000, "strategy": "genome"}"#).unwrap();
        assert_eq!(config.flanking_size, 2000);
        assert_eq!(config.strategy, DedupStrategy::Genome);
        assert_eq!(config.min_contig_size, DEFAULT_MIN_CONTIG_SIZE);
        assert_eq!(config.alt_suffix, "_alt");
        assert!(config.database.is_none());
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(serde_json::from_str::<SetupConfig>(r#"{"flank_size": 10}"#).is_err());
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("setup.json");
        std::fs::write(&path, r#"{"database": "x.db", "ignore_alt": true, "expected_duplicates": 3}"#).unwrap();

        let config = SetupConfig::load_or_default(Some(&path)).unwrap();
        assert_eq!(config.database.as_deref(), Some(Path::new("x.db")));
        assert!(config.ignore_alt);
        assert_eq!(config.expected_duplicates, Some(3));

        assert_eq!(SetupConfig::load_or_default(None).unwrap(), SetupConfig::default());
        assert!(SetupConfig::load(dir.path().join("missing.json")).is_err());
    }
}
