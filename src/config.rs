use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::ColumnKind;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub matcher: MatcherConfig,
    #[serde(default)]
    pub tables: Vec<TableConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoaderConfig {
    /// Directory holding the `.csv.gz` staging exports. Relative table
    /// file paths are resolved against it.
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Only the first N error messages are kept in a load summary.
    #[serde(default = "default_max_reported_errors")]
    pub max_reported_errors: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            staging_dir: default_staging_dir(),
            batch_size: default_batch_size(),
            max_reported_errors: default_max_reported_errors(),
        }
    }
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("./staging")
}
fn default_batch_size() -> usize {
    1000
}
fn default_max_reported_errors() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    #[serde(default = "default_ttl_ms")]
    pub default_ttl_ms: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            default_ttl_ms: default_ttl_ms(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn default_max_size() -> usize {
    100
}
fn default_ttl_ms() -> u64 {
    5 * 60 * 1000
}
fn default_sweep_interval_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct MatcherConfig {
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f64,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            min_similarity: default_min_similarity(),
            min_confidence: default_min_confidence(),
            limit: default_limit(),
        }
    }
}

fn default_min_similarity() -> f64 {
    0.7
}
fn default_min_confidence() -> f64 {
    75.0
}
fn default_limit() -> usize {
    100
}

/// One loadable staging table: `[[tables]]` in the config file.
#[derive(Debug, Deserialize, Clone)]
pub struct TableConfig {
    /// Name used on the command line (`cetl load <key>`).
    pub key: String,
    /// Staging file, absolute or relative to `loader.staging_dir`.
    pub file: PathBuf,
    /// Target table in the database.
    pub target: String,
    pub columns: Vec<ColumnConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ColumnConfig {
    pub name: String,
    /// CSV header to read from; defaults to `name`.
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub kind: ColumnKind,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl ColumnConfig {
    pub fn source_header(&self) -> &str {
        self.source.as_deref().unwrap_or(&self.name)
    }
}

impl Config {
    /// Config with no tables, used by tests and one-off tooling.
    pub fn minimal(db_path: PathBuf) -> Self {
        Self {
            db: DbConfig { path: db_path },
            loader: LoaderConfig::default(),
            cache: CacheConfig::default(),
            matcher: MatcherConfig::default(),
            tables: Vec::new(),
        }
    }

    pub fn table(&self, key: &str) -> Option<&TableConfig> {
        self.tables.iter().find(|t| t.key == key)
    }

    /// Resolve a table's staging file against `loader.staging_dir`.
    pub fn staging_path(&self, table: &TableConfig) -> PathBuf {
        if table.file.is_absolute() {
            table.file.clone()
        } else {
            self.loader.staging_dir.join(&table.file)
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.loader.batch_size == 0 {
        anyhow::bail!("loader.batch_size must be > 0");
    }

    if config.cache.max_size == 0 {
        anyhow::bail!("cache.max_size must be > 0");
    }

    if !(0.0..=1.0).contains(&config.matcher.min_similarity) {
        anyhow::bail!("matcher.min_similarity must be in [0.0, 1.0]");
    }
    if !(0.0..=100.0).contains(&config.matcher.min_confidence) {
        anyhow::bail!("matcher.min_confidence must be in [0, 100]");
    }

    let mut keys = HashSet::new();
    for table in &config.tables {
        if !keys.insert(table.key.as_str()) {
            anyhow::bail!("duplicate table key: '{}'", table.key);
        }
        if table.key == "all" {
            anyhow::bail!("'all' is reserved and cannot be used as a table key");
        }
        if table.columns.is_empty() {
            anyhow::bail!("table '{}' must declare at least one column", table.key);
        }
        if !is_identifier(&table.target) {
            anyhow::bail!("table '{}': invalid target name '{}'", table.key, table.target);
        }
        for col in &table.columns {
            if !is_identifier(&col.name) {
                anyhow::bail!("table '{}': invalid column name '{}'", table.key, col.name);
            }
        }
    }

    Ok(())
}

/// Table and column names are interpolated into SQL, so they are limited
/// to plain identifiers.
fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[db]
path = "./data/cetl.sqlite"

[loader]
batch_size = 500

[[tables]]
key = "awards"
file = "awards.csv.gz"
target = "awards"

[[tables.columns]]
name = "award_id"
kind = "text"
nullable = false

[[tables.columns]]
name = "amount"
source = "AWARD_AMOUNT"
kind = "decimal"
"#;

    #[test]
    fn parses_tables_and_defaults() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        validate(&config).unwrap();

        assert_eq!(config.loader.batch_size, 500);
        assert_eq!(config.loader.max_reported_errors, 20);
        assert_eq!(config.cache.max_size, 100);
        assert_eq!(config.matcher.min_confidence, 75.0);

        let awards = config.table("awards").unwrap();
        assert_eq!(awards.columns[0].kind, ColumnKind::Text);
        assert!(!awards.columns[0].nullable);
        assert_eq!(awards.columns[1].source_header(), "AWARD_AMOUNT");
        assert!(awards.columns[1].nullable);
        assert_eq!(
            config.staging_path(awards),
            PathBuf::from("./staging/awards.csv.gz")
        );
    }

    #[test]
    fn rejects_zero_batch_size() {
        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        config.loader.batch_size = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_unsafe_identifiers() {
        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        config.tables[0].target = "awards; DROP TABLE ueis".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_duplicate_keys() {
        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        let dup = config.tables[0].clone();
        config.tables.push(dup);
        assert!(validate(&config).is_err());
    }
}
