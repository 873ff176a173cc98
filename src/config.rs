//! Configuration management
//!
//! TOML configuration with environment variable overrides and defaults for
//! every field.
//!
//! ```toml
//! [retrieval]
//! page_size = 128
//! fetch_timeout_ms = 5000
//!
//! [aggregation]
//! workers = 8
//! group_timeout_ms = 30000
//!
//! [schema]
//! timestamp_field = "start"
//! value_field = "value"
//! default_join_fields = ["metric"]
//! default_sort = "start asc"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{QueryError, Result};
use crate::types::SortSpec;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Paged retrieval
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Parallel analysis
    #[serde(default)]
    pub aggregation: AggregationSettings,

    /// Field names the core reads
    #[serde(default)]
    pub schema: SchemaConfig,

    /// Plain search
    #[serde(default)]
    pub search: SearchConfig,

    /// Logging
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Paged retrieval configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Documents per page fetched from the index
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Timeout for one page search or document fetch, in milliseconds
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
}

/// Upper bound on concurrently analyzed groups
pub const MAX_WORKERS: usize = 4_096;

/// Aggregation stage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AggregationSettings {
    /// Maximum groups analyzed concurrently
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Timeout for one group's analysis, in milliseconds
    #[serde(default = "default_group_timeout_ms")]
    pub group_timeout_ms: u64,
}

/// Document schema configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchemaConfig {
    /// Field holding the document timestamp (epoch millis)
    #[serde(default = "default_timestamp_field")]
    pub timestamp_field: String,

    /// Numeric field read by the built-in analyses
    #[serde(default = "default_value_field")]
    pub value_field: String,

    /// Join fields used when the request names none
    #[serde(default = "default_join_fields")]
    pub default_join_fields: Vec<String>,

    /// Sort criterion used when the request names none
    #[serde(default = "default_sort")]
    pub default_sort: String,
}

/// Plain search configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchConfig {
    /// Rows returned by plain search when the request names none
    #[serde(default = "default_rows")]
    pub default_rows: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace); `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

// Default value functions
fn default_page_size() -> usize {
    128
}
fn default_fetch_timeout_ms() -> u64 {
    5_000
}
fn default_workers() -> usize {
    num_cpus::get()
}
fn default_group_timeout_ms() -> u64 {
    30_000
}
fn default_timestamp_field() -> String {
    "start".to_string()
}
fn default_value_field() -> String {
    "value".to_string()
}
fn default_join_fields() -> Vec<String> {
    vec!["metric".to_string()]
}
fn default_sort() -> String {
    "start asc".to_string()
}
fn default_rows() -> usize {
    10
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
        }
    }
}

impl Default for AggregationSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            group_timeout_ms: default_group_timeout_ms(),
        }
    }
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            timestamp_field: default_timestamp_field(),
            value_field: default_value_field(),
            default_join_fields: default_join_fields(),
            default_sort: default_sort(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_rows: default_rows(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl RetrievalConfig {
    /// Fetch timeout as a duration
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

impl AggregationSettings {
    /// Group timeout as a duration
    pub fn group_timeout(&self) -> Duration {
        Duration::from_millis(self.group_timeout_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            QueryError::Configuration(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        toml::from_str(&contents).map_err(|e| {
            QueryError::Configuration(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(size) = std::env::var("CHRONIX_PAGE_SIZE") {
            if let Ok(v) = size.parse() {
                self.retrieval.page_size = v;
            }
        }
        if let Ok(ms) = std::env::var("CHRONIX_FETCH_TIMEOUT_MS") {
            if let Ok(v) = ms.parse() {
                self.retrieval.fetch_timeout_ms = v;
            }
        }
        if let Ok(workers) = std::env::var("CHRONIX_WORKERS") {
            if let Ok(v) = workers.parse() {
                self.aggregation.workers = v;
            }
        }
        if let Ok(ms) = std::env::var("CHRONIX_GROUP_TIMEOUT_MS") {
            if let Ok(v) = ms.parse() {
                self.aggregation.group_timeout_ms = v;
            }
        }
        if let Ok(level) = std::env::var("RUST_LOG") {
            self.logging.level = level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.retrieval.page_size == 0 {
            return Err(QueryError::Configuration(
                "Page size must be > 0".to_string(),
            ));
        }
        if self.retrieval.fetch_timeout_ms == 0 {
            return Err(QueryError::Configuration(
                "Fetch timeout must be > 0".to_string(),
            ));
        }
        if self.aggregation.workers == 0 {
            return Err(QueryError::Configuration(
                "Aggregation workers must be > 0".to_string(),
            ));
        }
        if self.aggregation.workers > MAX_WORKERS {
            return Err(QueryError::Configuration(format!(
                "Aggregation workers must be <= {}",
                MAX_WORKERS
            )));
        }
        if self.aggregation.group_timeout_ms == 0 {
            return Err(QueryError::Configuration(
                "Group timeout must be > 0".to_string(),
            ));
        }
        if self.schema.timestamp_field.is_empty() {
            return Err(QueryError::Configuration(
                "Timestamp field cannot be empty".to_string(),
            ));
        }
        if self.schema.default_join_fields.is_empty() {
            return Err(QueryError::Configuration(
                "At least one default join field is required".to_string(),
            ));
        }
        SortSpec::parse(&self.schema.default_sort)
            .map_err(|e| QueryError::Configuration(format!("Default sort: {}", e)))?;

        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self)
            .map_err(|e| QueryError::Configuration(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, contents).map_err(|e| {
            QueryError::Configuration(format!(
                "Failed to write config file {}: {}",
                path.display(),
                e
            ))
        })
    }
}

mod num_cpus {
    pub fn get() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }
}
