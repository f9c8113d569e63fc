//! Engine configuration
//!
//! Query limits and logging settings, read from a TOML file and then
//! overridden by `CHRONICLE_*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::query::context::QueryLimits;
use crate::query::duration::{parse_duration, DurationError};

/// Top-level engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub query: QueryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Query execution limits and tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Maximum series a statement may fan out to (0 = unlimited)
    #[serde(default)]
    pub max_select_series: usize,

    /// Maximum GROUP BY time buckets per statement (0 = unlimited)
    #[serde(default)]
    pub max_select_buckets: usize,

    /// Maximum raw points read per statement (0 = unlimited)
    #[serde(default)]
    pub max_select_point: usize,

    /// Leaf scans offloaded to blocking workers per statement
    #[serde(default = "default_max_concurrent_scans")]
    pub max_concurrent_scans: usize,

    /// Batches buffered between a scan worker and the merge stage
    #[serde(default = "default_scan_buffer")]
    pub scan_buffer: usize,

    /// Points per batch sent by a scan worker
    #[serde(default = "default_scan_batch_size")]
    pub scan_batch_size: usize,

    /// Statement deadline as a duration literal (`0s` = none)
    #[serde(default = "default_query_timeout")]
    pub query_timeout: String,

    /// Rows per emitted series chunk (0 = unchunked)
    #[serde(default)]
    pub chunk_size: usize,
}

fn default_max_concurrent_scans() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_scan_buffer() -> usize {
    4
}

fn default_scan_batch_size() -> usize {
    1024
}

fn default_query_timeout() -> String {
    "0s".to_string()
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_select_series: 0,
            max_select_buckets: 0,
            max_select_point: 0,
            max_concurrent_scans: default_max_concurrent_scans(),
            scan_buffer: default_scan_buffer(),
            scan_batch_size: default_scan_batch_size(),
            query_timeout: default_query_timeout(),
            chunk_size: 0,
        }
    }
}

impl QueryConfig {
    /// Admission limits handed to each execution
    pub fn limits(&self) -> QueryLimits {
        QueryLimits {
            max_select_series: self.max_select_series,
            max_select_buckets: self.max_select_buckets,
            max_select_point: self.max_select_point,
        }
    }

    /// Parsed statement deadline (zero when disabled)
    pub fn timeout(&self) -> Result<Duration, DurationError> {
        let ns = parse_duration(&self.query_timeout)?;
        Ok(Duration::from_nanos(ns.max(0) as u64))
    }
}

/// Log level and output format of the binary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Read and validate a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        config.validate().map_err(|error| ConfigError::Invalid {
            path: path.to_path_buf(),
            error,
        })?;
        Ok(config)
    }

    /// Defaults plus environment overrides, no file
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Read a file, then apply environment overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// First config found on the search path, else [`Config::from_env`]
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("chronicle").join("engine.toml")),
            Some(PathBuf::from("/etc/chronicle/engine.toml")),
            Some(PathBuf::from("./engine.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> Result<(), String> {
        self.query
            .timeout()
            .map_err(|e| format!("query_timeout: {}", e))?;
        match self.logging.format.as_str() {
            "pretty" | "json" => Ok(()),
            other => Err(format!("logging.format: unknown format {:?}", other)),
        }
    }

    /// Overwrite settings from `CHRONICLE_*` variables that parse
    fn apply_env_overrides(&mut self) {
        let limits = [
            ("CHRONICLE_MAX_SELECT_SERIES", &mut self.query.max_select_series),
            ("CHRONICLE_MAX_SELECT_BUCKETS", &mut self.query.max_select_buckets),
            ("CHRONICLE_MAX_SELECT_POINT", &mut self.query.max_select_point),
        ];
        for (var, slot) in limits {
            if let Ok(value) = std::env::var(var) {
                match value.parse() {
                    Ok(n) => *slot = n,
                    Err(_) => tracing::warn!("Ignoring {}={:?}: not a number", var, value),
                }
            }
        }

        if let Ok(timeout) = std::env::var("CHRONICLE_QUERY_TIMEOUT") {
            self.query.query_timeout = timeout;
        }

        // Logging overrides
        if let Ok(level) = std::env::var("CHRONICLE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("CHRONICLE_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Failure to read, parse or validate a config file
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid config file {path:?}: {error}")]
    Invalid { path: PathBuf, error: String },
}

/// Commented TOML template holding every default
pub fn generate_default_config() -> String {
    r#"# Chronicle Engine Configuration
#
# Settings below can be overridden with:
# - CHRONICLE_MAX_SELECT_SERIES
# - CHRONICLE_MAX_SELECT_BUCKETS
# - CHRONICLE_MAX_SELECT_POINT
# - CHRONICLE_QUERY_TIMEOUT
# - CHRONICLE_LOG_LEVEL
# - CHRONICLE_LOG_FORMAT

[query]
# Maximum number of series a statement may read (0 = unlimited)
max_select_series = 0

# Maximum number of GROUP BY time buckets per statement (0 = unlimited)
max_select_buckets = 0

# Maximum number of raw points a statement may read (0 = unlimited)
max_select_point = 0

# Shard scans run on blocking workers per statement
max_concurrent_scans = 4

# Point batches buffered per scan worker
scan_buffer = 4

# Points per batch
scan_batch_size = 1024

# Statement deadline, e.g. "30s" or "1m" ("0s" = none)
query_timeout = "0s"

# Split series into chunks of this many rows (0 = unchunked)
chunk_size = 0

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log output: pretty (human readable) or json (one object per line)
format = "pretty"
"#
    .to_string()
}
