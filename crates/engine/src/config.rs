//! Time-series configuration via TOML
//!
//! Every field has a default, so an empty document is a valid config.
//! Builder-style setters cover programmatic construction.

use std::path::Path;

use serde::{Deserialize, Serialize};
use ttseries_concurrency::RetryConfig;
use ttseries_core::limits::{
    DEFAULT_CHUNK_SIZE, DEFAULT_MAX_LENGTH, DEFAULT_REMOVE_CHUNK_SIZE, DEFAULT_SCAN_COUNT,
};
use ttseries_core::{Error, Result};

/// Configuration shared by every encoding variant
///
/// # Example
///
/// ```toml
/// max_length = 500
/// serializer = "json"
///
/// [retry]
/// max_retries = 16
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeSeriesConfig {
    /// Maximum retained entries per series; older entries are evicted
    pub max_length: usize,
    /// Wrap read-modify-write sequences in watched transactions
    pub transactional: bool,
    /// Serialize same-process writers per series before they reach the store
    pub local_lock: bool,
    /// Serializer name: `"msgpack"` or `"json"`
    pub serializer: String,
    /// Default batch size for `add_many`
    pub chunk_size: usize,
    /// Series names per round trip in `remove_many`
    pub remove_chunk_size: usize,
    /// Count hint for cursor scans
    pub scan_count: usize,
    /// Watch-conflict retry policy
    pub retry: RetryConfig,
}

impl Default for TimeSeriesConfig {
    fn default() -> Self {
        Self {
            max_length: DEFAULT_MAX_LENGTH,
            transactional: true,
            local_lock: true,
            serializer: "msgpack".to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            remove_chunk_size: DEFAULT_REMOVE_CHUNK_SIZE,
            scan_count: DEFAULT_SCAN_COUNT,
            retry: RetryConfig::default(),
        }
    }
}

impl TimeSeriesConfig {
    /// Default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TimeSeriesConfig = toml::from_str(content)
            .map_err(|e| Error::InvalidConfig(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::InvalidConfig(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Serialize this config to TOML and write it to `path`
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::InvalidConfig(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::InvalidConfig(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Reject settings no series could operate under
    pub fn validate(&self) -> Result<()> {
        if self.max_length == 0 {
            return Err(Error::InvalidConfig("max_length must be at least 1".into()));
        }
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk_size must be at least 1".into()));
        }
        if self.remove_chunk_size == 0 {
            return Err(Error::InvalidConfig(
                "remove_chunk_size must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Set the maximum retained length
    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    /// Enable or disable watched transactions
    pub fn with_transactional(mut self, transactional: bool) -> Self {
        self.transactional = transactional;
        self
    }

    /// Enable or disable the process-local series lock
    pub fn with_local_lock(mut self, local_lock: bool) -> Self {
        self.local_lock = local_lock;
        self
    }

    /// Select a serializer by name
    pub fn with_serializer(mut self, name: impl Into<String>) -> Self {
        self.serializer = name.into();
        self
    }

    /// Set the default `add_many` chunk size
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Set the retry policy
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}
