//! Configuration loader and validator for the product crawler.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub source: Source,
    #[serde(default)]
    pub crawl: Crawl,
    pub storage: Storage,
    pub input: Input,
}

/// Remote product API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Source {
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Crawl tuning knobs. Every field has a default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Crawl {
    pub batch_size: usize,
    pub concurrency: usize,
    pub retries: u32,
    pub request_timeout_secs: u64,
    pub backoff_unit_ms: u64,
}

impl Default for Crawl {
    fn default() -> Self {
        Self {
            batch_size: 5000,
            concurrency: 20,
            retries: 5,
            request_timeout_secs: 15,
            backoff_unit_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Storage {
    pub data_dir: String,
    /// Falls back to `sqlite://{data_dir}/crawler.db` when unset.
    #[serde(default)]
    pub database_url: Option<String>,
}

/// CSV file holding the identifiers to crawl.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Input {
    pub path: String,
    #[serde(default = "default_id_column")]
    pub id_column: String,
}

fn default_user_agent() -> String {
    "Mozilla/5.0".to_string()
}

fn default_id_column() -> String {
    "id".to_string()
}

/// Explicit settings handed to the crawler and the HTTP client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlSettings {
    pub batch_size: usize,
    pub concurrency: usize,
    pub retries: u32,
    pub request_timeout: Duration,
    /// Backoff before retry `n` is `backoff_unit * n`.
    pub backoff_unit: Duration,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Crawl::default().settings()
    }
}

impl Crawl {
    pub fn settings(&self) -> CrawlSettings {
        CrawlSettings {
            batch_size: self.batch_size,
            concurrency: self.concurrency,
            retries: self.retries,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            backoff_unit: Duration::from_millis(self.backoff_unit_ms),
        }
    }
}

impl Config {
    /// Ensure required directories exist (creates `storage.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.storage.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.storage.data_dir)
    }

    /// `DATABASE_URL` wins over the file, then `storage.database_url`, then a
    /// database inside `data_dir`.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL").ok().unwrap_or_else(|| {
            self.storage.database_url.clone().unwrap_or_else(|| {
                format!(
                    "sqlite://{}/crawler.db",
                    self.storage.data_dir.trim_end_matches('/')
                )
            })
        })
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    let base = cfg.source.base_url.trim();
    if base.is_empty() {
        return Err(ConfigError::Invalid("source.base_url must be non-empty"));
    }
    if !(base.starts_with("http://") || base.starts_with("https://")) {
        return Err(ConfigError::Invalid("source.base_url must be an http(s) URL"));
    }

    if cfg.crawl.batch_size == 0 {
        return Err(ConfigError::Invalid("crawl.batch_size must be > 0"));
    }
    if cfg.crawl.concurrency == 0 {
        return Err(ConfigError::Invalid("crawl.concurrency must be > 0"));
    }
    if cfg.crawl.retries == 0 {
        return Err(ConfigError::Invalid("crawl.retries must be > 0"));
    }
    if cfg.crawl.request_timeout_secs == 0 {
        return Err(ConfigError::Invalid("crawl.request_timeout_secs must be > 0"));
    }
    // backoff_unit_ms may be 0: retries then happen back to back

    if cfg.storage.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("storage.data_dir must be non-empty"));
    }
    if cfg.input.path.trim().is_empty() {
        return Err(ConfigError::Invalid("input.path must be non-empty"));
    }
    if cfg.input.id_column.trim().is_empty() {
        return Err(ConfigError::Invalid("input.id_column must be non-empty"));
    }

    Ok(())
}

/// Sample configuration, also used by the tests.
pub fn example() -> &'static str {
    r#"source:
  base_url: "https://api.tiki.vn/product-detail/api/v1/products"
  user_agent: "Mozilla/5.0"

crawl:
  batch_size: 5000
  concurrency: 20
  retries: 5
  request_timeout_secs: 15
  backoff_unit_ms: 2000

storage:
  data_dir: "./data"

input:
  path: "product_id.csv"
  id_column: "id"
"#
}
