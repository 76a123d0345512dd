//! Result and statistics types returned by the engines.
//!
//! Every public engine operation returns one of these values instead of a
//! `Result`, so callers always get a structured outcome. Partial failure is
//! explicit: a report carries the per-item errors it collected.

use serde::{Deserialize, Serialize};
use sync_types::{RequestId, Timestamp, UploadStats};

/// Outcome of one sync pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncResult {
    /// Pass finished with no errors.
    Success(SyncReport),
    /// Pass finished, but some items failed or the remote fetch failed.
    Partial(SyncReport),
    /// Incremental pass found nothing newer than the given time.
    UpToDate,
    /// Pass failed as a whole.
    Error(String),
}

impl SyncResult {
    /// Build `Success` or `Partial` depending on whether errors were recorded.
    pub fn from_report(report: SyncReport) -> Self {
        if report.errors.is_empty() {
            Self::Success(report)
        } else {
            Self::Partial(report)
        }
    }

    /// Whether the pass finished (fully, partially or as a no-op).
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Error(_))
    }

    /// The pass report, if the pass finished with work done.
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            Self::Success(report) | Self::Partial(report) => Some(report),
            Self::UpToDate | Self::Error(_) => None,
        }
    }

    /// Items synced by the pass, zero when nothing ran.
    pub fn items_synced(&self) -> usize {
        self.report().map_or(0, |report| report.items_synced)
    }

    /// The failure message, if the pass failed.
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Error(message) => Some(message),
            _ => None,
        }
    }
}

/// Counts and errors collected during a sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Items uploaded and accepted, or applied locally.
    pub items_synced: usize,
    /// Conflicts found between the ledger and the remote set.
    pub conflicts_detected: usize,
    /// Conflicts whose resolution was applied.
    pub conflicts_resolved: usize,
    /// Upload accept/reject counts.
    pub upload: UploadStats,
    /// Per-item and per-step failures.
    pub errors: Vec<String>,
    /// Wall time of the pass in milliseconds.
    pub duration_ms: u64,
}

/// Outcome of applying conflict resolutions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyChangesResult {
    /// Resolutions were applied; `errors` lists the ones that were not.
    Success {
        /// Resolutions applied.
        applied_count: usize,
        /// Resolutions that could not be applied.
        errors: Vec<String>,
    },
    /// Applying failed as a whole.
    Error(String),
}

/// Cumulative sync statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatistics {
    /// Passes started (excluding up-to-date short circuits).
    pub total_syncs: u64,
    /// Passes that completed, including partial ones.
    pub successful_syncs: u64,
    /// Passes that failed.
    pub failed_syncs: u64,
    /// Passes cancelled while running.
    pub cancelled_syncs: u64,
    /// Items synced across all passes.
    pub total_items_synced: u64,
    /// Conflicts detected across all passes.
    pub total_conflicts: u64,
    /// Conflicts resolved across all passes.
    pub conflicts_resolved: u64,
    /// Duration of the last completed pass.
    pub last_sync_duration_ms: u64,
}

/// Outcome of a cache read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// Live entry found; holds the decoded data.
    Hit(Vec<u8>),
    /// No entry for the key.
    Miss,
    /// Entry had expired and was removed.
    Expired,
    /// Entry was found but could not be read.
    Error(String),
}

impl CacheLookup {
    /// The data, if this was a hit.
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            Self::Hit(data) => Some(data),
            _ => None,
        }
    }

    /// Whether this was a hit.
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }
}

/// Outcome of a cache write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheWrite {
    /// Entry was stored.
    Stored {
        /// Stored size in bytes, after compression.
        size: usize,
        /// Whether the data was compressed.
        compressed: bool,
        /// Entries evicted to make room.
        evicted: usize,
    },
    /// Entry was rejected.
    Error(String),
}

impl CacheWrite {
    /// Whether the entry was stored.
    pub fn is_stored(&self) -> bool {
        matches!(self, Self::Stored { .. })
    }
}

/// Outcome of a prefetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrefetchReport {
    /// Keys loaded and cached.
    pub fetched: usize,
    /// Keys already cached.
    pub skipped: usize,
    /// Keys whose loader failed or whose data could not be stored.
    pub failed: usize,
}

/// Outcome of a maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptimizeReport {
    /// Expired entries purged.
    pub expired_removed: usize,
    /// Entries compressed after the fact.
    pub recompressed: usize,
    /// Entries evicted to get back under capacity.
    pub evicted: usize,
    /// Bytes released by all three steps.
    pub freed_bytes: usize,
}

/// Outcome of a cache import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportResult {
    /// Blob was accepted.
    Imported {
        /// Entries restored.
        imported: usize,
        /// Entries dropped because they had expired.
        skipped_expired: usize,
    },
    /// Blob was rejected.
    Error(String),
}

/// Outcome of queueing an offline request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueResult {
    /// Request was queued.
    Queued(RequestId),
    /// Request was rejected.
    Error(String),
}

/// Outcome of draining the offline queue.
///
/// `processed + failed + remaining` equals the queue length at the start of
/// the pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OfflineProcessReport {
    /// Requests executed successfully and removed.
    pub processed: usize,
    /// Requests dropped after exhausting their retries.
    pub failed: usize,
    /// Requests kept for a later pass.
    pub remaining: usize,
}

/// Observable cache health, published after every change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheState {
    /// Reads that found a live entry.
    pub hits: u64,
    /// Reads that found nothing usable.
    pub misses: u64,
    /// Entries removed because they expired.
    pub expired: u64,
    /// Entries removed by eviction.
    pub evicted: u64,
    /// Stored bytes across all entries.
    pub total_size: usize,
    /// Number of entries.
    pub entry_count: usize,
    /// Requests waiting in the offline queue.
    pub offline_queue_len: usize,
    /// When the state was last published.
    pub updated_at: Option<Timestamp>,
}

/// Aggregate cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStatistics {
    /// Reads that found a live entry.
    pub hits: u64,
    /// Reads that found nothing usable.
    pub misses: u64,
    /// `hits / (hits + misses)`, zero before any read.
    pub hit_rate: f64,
    /// Entries removed because they expired.
    pub expired: u64,
    /// Entries removed by eviction.
    pub evicted: u64,
    /// Number of entries.
    pub entry_count: usize,
    /// Entries stored compressed.
    pub compressed_entries: usize,
    /// Stored bytes across all entries.
    pub total_size: usize,
    /// Configured byte budget.
    pub max_bytes: usize,
    /// Configured entry limit.
    pub max_entries: usize,
    /// Requests waiting in the offline queue.
    pub offline_queue_len: usize,
}
