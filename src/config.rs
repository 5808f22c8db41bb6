// ==============================================================================
// config.rs - Engine Configuration
// ==============================================================================
// Description: TOML engine configuration: worker pool, result bounds,
//              reference inputs and the storages of a dataset
// Author: Matt Barham
// Created: 2025-11-22
// Modified: 2025-11-28
// Version: 1.0.0
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use validator::Validate;

use crate::partition::ChromosomePrefix;

pub const DEFAULT_MAX_VARIANTS_COUNT: usize = 10_000;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),

    #[error("Duplicate storage id: {0}")]
    DuplicateStorage(String),
}

/// One storage backend of the dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct StorageConfig {
    #[validate(length(min = 1))]
    pub id: String,

    /// `inmemory`, `parquet` or `sqlite`
    #[validate(length(min = 1))]
    pub storage_type: String,

    pub path: PathBuf,

    /// Real-valued attributes stored as columns
    #[serde(default)]
    pub score_columns: Vec<String>,

    /// Emit `BITAND(col, mask)` instead of `col & mask`
    #[serde(default)]
    pub legacy_sql: bool,

    #[serde(default = "default_pool_size")]
    #[validate(range(min = 1, max = 64))]
    pub pool_size: usize,

    #[serde(default = "default_acquire_timeout_ms")]
    #[validate(range(min = 1))]
    pub acquire_timeout_ms: u64,
}

impl StorageConfig {
    pub fn new(id: &str, storage_type: &str, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.to_string(),
            storage_type: storage_type.to_string(),
            path: path.into(),
            score_columns: Vec::new(),
            legacy_sql: false,
            pool_size: default_pool_size(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
        }
    }

    pub fn with_score_columns(mut self, columns: &[&str]) -> Self {
        self.score_columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_legacy_sql(mut self, legacy: bool) -> Self {
        self.legacy_sql = legacy;
        self
    }

    pub fn with_pool(mut self, size: usize, acquire_timeout_ms: u64) -> Self {
        self.pool_size = size;
        self.acquire_timeout_ms = acquire_timeout_ms;
        self
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

/// Engine configuration loaded from TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct EngineConfig {
    #[serde(default = "default_workers")]
    #[validate(range(min = 1, max = 512))]
    pub workers: usize,

    #[serde(default = "default_max_variants_count")]
    #[validate(range(min = 1))]
    pub max_variants_count: usize,

    /// TSV of `chrom<TAB>length`
    pub contigs: PathBuf,

    /// Pedigree TSV
    pub pedigree: PathBuf,

    #[serde(default)]
    pub chromosome_prefix: ChromosomePrefix,

    #[validate(nested)]
    pub storages: Vec<StorageConfig>,
}

impl EngineConfig {
    /// Parse and validate; relative paths resolve against the file's directory
    pub fn parse(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let mut config = Self::from_toml(&content)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;

        let mut ids = std::collections::HashSet::new();
        for storage in &config.storages {
            if !ids.insert(storage.id.as_str()) {
                return Err(ConfigError::DuplicateStorage(storage.id.clone()));
            }
        }
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        resolve(&mut self.contigs);
        resolve(&mut self.pedigree);
        for storage in &mut self.storages {
            resolve(&mut storage.path);
        }
    }
}

fn default_workers() -> usize {
    4
}

fn default_max_variants_count() -> usize {
    DEFAULT_MAX_VARIANTS_COUNT
}

fn default_pool_size() -> usize {
    4
}

fn default_acquire_timeout_ms() -> u64 {
    5_000
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
workers = 2
contigs = "contigs.tsv"
pedigree = "families.ped"
chromosome_prefix = { add = "chr" }

[[storages]]
id = "study_parquet"
storage_type = "parquet"
path = "/data/study"

[[storages]]
id = "study_sql"
storage_type = "sqlite"
path = "study.db"
score_columns = ["cadd_raw"]
legacy_sql = true
"#;

    #[test]
    fn test_parse_with_defaults() {
        let config = EngineConfig::from_toml(CONFIG).unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.max_variants_count, DEFAULT_MAX_VARIANTS_COUNT);
        assert_eq!(config.chromosome_prefix, ChromosomePrefix::Add("chr".to_string()));
        assert_eq!(config.storages.len(), 2);
        assert_eq!(config.storages[1].score_columns, vec!["cadd_raw"]);
        assert!(config.storages[1].legacy_sql);
        assert_eq!(config.storages[0].pool_size, 4);
        assert_eq!(config.storages[0].acquire_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_validation_rejects_zero_workers() {
        let content = CONFIG.replace("workers = 2", "workers = 0");
        assert!(matches!(EngineConfig::from_toml(&content), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_nested_storage_validation() {
        let content = CONFIG.replace("id = \"study_sql\"", "id = \"\"");
        assert!(matches!(EngineConfig::from_toml(&content), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_duplicate_storage_ids() {
        let content = CONFIG.replace("study_sql", "study_parquet");
        assert!(matches!(EngineConfig::from_toml(&content), Err(ConfigError::DuplicateStorage(_))));
    }

    #[test]
    fn test_relative_paths_resolved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        fs::write(&path, CONFIG).unwrap();
        let config = EngineConfig::parse(&path).unwrap();
        assert_eq!(config.contigs, dir.path().join("contigs.tsv"));
        assert_eq!(config.storages[0].path, PathBuf::from("/data/study"));
        assert_eq!(config.storages[1].path, dir.path().join("study.db"));
    }
}
