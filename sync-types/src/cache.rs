//! Cache records and the versioned export blob.

use serde::{Deserialize, Serialize};

use crate::{Timestamp, TypesError};

/// Version written into every [`CacheExport`]. Imports reject any other value.
pub const CACHE_EXPORT_VERSION: u32 = 1;

/// Retention priority of a cache entry.
///
/// Ordered `Low < Normal < High` so priority-aware eviction can sort on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CachePriority {
    /// Speculative data (prefetch results).
    Low,
    /// Regular responses.
    #[default]
    Normal,
    /// Data that should survive eviction pressure longest.
    High,
}

/// A cached payload with its bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Cache key.
    pub key: String,
    /// Stored bytes (codec output when `compressed` is set).
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    /// When the entry was written.
    pub created_time: Timestamp,
    /// When the entry was last read.
    pub last_access_time: Timestamp,
    /// When the entry stops being served. Never earlier than `created_time`.
    pub expiry_time: Timestamp,
    /// Stored size in bytes (post-compression).
    pub size: usize,
    /// Retention priority.
    pub priority: CachePriority,
    /// Number of hits served.
    pub access_count: u64,
    /// Whether `data` is codec-encoded.
    pub compressed: bool,
}

impl CacheEntry {
    /// Create an entry written at `now` that expires `ttl_ms` later.
    pub fn new(
        key: impl Into<String>,
        data: Vec<u8>,
        now: Timestamp,
        ttl_ms: u64,
        priority: CachePriority,
        compressed: bool,
    ) -> Self {
        let size = data.len();
        Self {
            key: key.into(),
            data,
            created_time: now,
            last_access_time: now,
            expiry_time: now.saturating_add(ttl_ms),
            size,
            priority,
            access_count: 0,
            compressed,
        }
    }

    /// Whether the entry has expired at `now`.
    ///
    /// An entry written with a zero TTL is expired from the moment it is stored.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expiry_time
    }

    /// Record a hit at `now`.
    pub fn touch(&mut self, now: Timestamp) {
        self.last_access_time = self.last_access_time.max(now);
        self.access_count = self.access_count.saturating_add(1);
    }

    /// Restore the record invariants on an entry read from outside.
    ///
    /// `size` is recomputed from `data`, and an expiry earlier than the
    /// creation time is raised to it (so the entry counts as expired).
    pub fn normalize(&mut self) {
        self.size = self.data.len();
        self.expiry_time = self.expiry_time.max(self.created_time);
    }

    /// Replace the stored bytes, keeping `size` in step.
    pub fn replace_data(&mut self, data: Vec<u8>, compressed: bool) {
        self.size = data.len();
        self.data = data;
        self.compressed = compressed;
    }
}

/// Descriptive metadata exported alongside entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// Cache key.
    pub key: String,
    /// Size of the payload before compression.
    pub original_size: usize,
    /// URL the payload was fetched from, when it came from the offline queue.
    pub source_url: Option<String>,
}

/// Cumulative cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CacheCounters {
    /// Lookups served from the cache.
    pub hits: u64,
    /// Lookups that found nothing usable (includes expired lookups).
    pub misses: u64,
    /// Entries dropped because their TTL elapsed.
    pub expired: u64,
    /// Entries dropped by capacity eviction.
    pub evicted: u64,
}

/// The whole cache serialized as one versioned blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheExport {
    /// Format version, see [`CACHE_EXPORT_VERSION`].
    pub version: u32,
    /// When the export was taken.
    pub timestamp: Timestamp,
    /// Every entry present at export time.
    pub entries: Vec<CacheEntry>,
    /// Per-entry metadata.
    pub metadata: Vec<CacheMetadata>,
    /// Counters at export time.
    pub statistics: CacheCounters,
}

impl CacheExport {
    /// Build an export blob at the current format version.
    pub fn new(
        timestamp: Timestamp,
        entries: Vec<CacheEntry>,
        metadata: Vec<CacheMetadata>,
        statistics: CacheCounters,
    ) -> Self {
        Self {
            version: CACHE_EXPORT_VERSION,
            timestamp,
            entries,
            metadata,
            statistics,
        }
    }

    /// Encode as JSON bytes.
    pub fn to_json(&self) -> Result<Vec<u8>, TypesError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from JSON bytes, rejecting any version other than the current one.
    pub fn from_json(bytes: &[u8]) -> Result<Self, TypesError> {
        let export: Self = serde_json::from_slice(bytes)?;
        if export.version != CACHE_EXPORT_VERSION {
            return Err(TypesError::UnsupportedVersion {
                found: export.version,
                expected: CACHE_EXPORT_VERSION,
            });
        }
        Ok(export)
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
