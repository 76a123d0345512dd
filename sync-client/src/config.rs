//! Configuration loading for tidesync engines.
//!
//! Configuration is loaded from a TOML file with two optional sections,
//! `[sync]` and `[cache]`. Missing sections and fields fall back to the
//! defaults exported by `sync-core`.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use sync_core::{
    CacheLimits, EvictionPolicy, COMPRESSION_THRESHOLD, DEFAULT_MAX_SIZE_MB, MAX_CACHE_ENTRIES,
    MAX_OFFLINE_CHANGES, MAX_OFFLINE_REQUESTS, MAX_REQUEST_RETRIES, OFFLINE_BATCH_SIZE,
};

/// Root configuration for both engines.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    /// Sync engine configuration.
    #[serde(default)]
    pub sync: SyncSettings,
    /// Cache engine configuration.
    #[serde(default)]
    pub cache: CacheSettings,
}

/// Sync engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncSettings {
    /// Maximum pending local changes (default: 1000).
    #[serde(default = "default_max_offline_changes")]
    pub max_offline_changes: usize,
    /// Changes per upload batch during an offline sync (default: 50).
    #[serde(default = "default_offline_batch_size")]
    pub offline_batch_size: usize,
    /// Serialized size above which a change is flagged compressed (default: 1024).
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold: usize,
}

/// Cache engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    /// Maximum number of cache entries (default: 1000).
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Byte budget in megabytes (default: 50).
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: usize,
    /// TTL used by prefetch and cached offline responses, in seconds (default: 3600).
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
    /// Compress entries larger than this many bytes (default: 1024).
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold: usize,
    /// Enable compression of large entries (default: true).
    #[serde(default = "default_compression_enabled")]
    pub compression_enabled: bool,
    /// Maximum queued offline requests (default: 100).
    #[serde(default = "default_max_offline_requests")]
    pub max_offline_requests: usize,
    /// Failed executions before a queued request is dropped (default: 3).
    #[serde(default = "default_max_request_retries")]
    pub max_request_retries: u32,
    /// Eviction ordering, `lru` or `priority_lru` (default: lru).
    #[serde(default)]
    pub eviction_policy: EvictionPolicy,
}

// Default value functions
fn default_max_offline_changes() -> usize {
    MAX_OFFLINE_CHANGES
}

fn default_offline_batch_size() -> usize {
    OFFLINE_BATCH_SIZE
}

fn default_compression_threshold() -> usize {
    COMPRESSION_THRESHOLD
}

fn default_max_entries() -> usize {
    MAX_CACHE_ENTRIES
}

fn default_max_size_mb() -> usize {
    DEFAULT_MAX_SIZE_MB
}

fn default_ttl_secs() -> u64 {
    3600 // 1 hour
}

fn default_compression_enabled() -> bool {
    true
}

fn default_max_offline_requests() -> usize {
    MAX_OFFLINE_REQUESTS
}

fn default_max_request_retries() -> u32 {
    MAX_REQUEST_RETRIES
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_offline_changes: default_max_offline_changes(),
            offline_batch_size: default_offline_batch_size(),
            compression_threshold: default_compression_threshold(),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            max_size_mb: default_max_size_mb(),
            default_ttl_secs: default_ttl_secs(),
            compression_threshold: default_compression_threshold(),
            compression_enabled: default_compression_enabled(),
            max_offline_requests: default_max_offline_requests(),
            max_request_retries: default_max_request_retries(),
            eviction_policy: EvictionPolicy::default(),
        }
    }
}

impl CacheSettings {
    /// Capacity limits for the cache store.
    pub fn limits(&self) -> CacheLimits {
        CacheLimits::new(self.max_entries, self.max_size_mb)
    }

    /// Default TTL as a duration.
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<inline>"),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject capacities that would make an engine unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("sync.max_offline_changes", self.sync.max_offline_changes),
            ("sync.offline_batch_size", self.sync.offline_batch_size),
            ("cache.max_entries", self.cache.max_entries),
            ("cache.max_size_mb", self.cache.max_size_mb),
            ("cache.max_offline_requests", self.cache.max_offline_requests),
        ];
        if let Some((field, _)) = checks.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid(format!("{field} must be greater than zero")));
        }
        if self.cache.max_request_retries == 0 {
            return Err(ConfigError::Invalid(
                "cache.max_request_retries must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// Configuration parsed but holds an unusable value.
    #[error("invalid config: {0}")]
    Invalid(String),
}
