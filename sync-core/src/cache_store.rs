//! Bounded response cache store.
//!
//! A key → [`CacheEntry`] map with:
//! - Lazy TTL expiry (expired entries are dropped when read)
//! - Entry-count and byte-budget bounds
//! - Eviction of the least recently used 10% of entries (at least one) per round
//!
//! The store never compresses or decompresses anything itself; it only
//! tracks the stored size it is handed. Compression is the engine's job.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sync_types::{CacheCounters, CacheEntry, Timestamp};
use thiserror::Error;

/// Default maximum number of cache entries.
pub const MAX_CACHE_ENTRIES: usize = 1000;

/// Default byte budget, in megabytes.
pub const DEFAULT_MAX_SIZE_MB: usize = 50;

const BYTES_PER_MB: usize = 1024 * 1024;

/// One eviction round removes `len / EVICTION_DIVISOR` entries, at least one.
const EVICTION_DIVISOR: usize = 10;

/// Ordering used to pick eviction victims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Least recently accessed first. Priority is ignored.
    #[default]
    Lru,
    /// Lowest priority first, then least recently accessed.
    PriorityLru,
}

/// Capacity bounds of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLimits {
    /// Maximum number of entries.
    pub max_entries: usize,
    /// Maximum total stored bytes.
    pub max_bytes: usize,
}

impl CacheLimits {
    /// Limits from an entry count and a budget in megabytes.
    pub fn new(max_entries: usize, max_size_mb: usize) -> Self {
        Self {
            max_entries,
            max_bytes: max_size_mb.saturating_mul(BYTES_PER_MB),
        }
    }
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self::new(MAX_CACHE_ENTRIES, DEFAULT_MAX_SIZE_MB)
    }
}

/// Store errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A single entry is larger than the whole byte budget.
    #[error("entry {key} is {size} bytes, over the {budget} byte cache budget")]
    TooLarge {
        /// Rejected key.
        key: String,
        /// Stored size of the entry.
        size: usize,
        /// Configured byte budget.
        budget: usize,
    },
}

/// Result of a store lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLookup {
    /// Live entry, access bookkeeping already updated.
    Hit(CacheEntry),
    /// Nothing stored under the key.
    Miss,
    /// Entry had expired and has been removed.
    Expired(CacheEntry),
}

/// What an insertion displaced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    /// Previous entry under the same key.
    pub replaced: Option<CacheEntry>,
    /// Entries evicted to make room.
    pub evicted: Vec<CacheEntry>,
}

/// Bounded key → entry map.
#[derive(Debug)]
pub struct CacheStore {
    limits: CacheLimits,
    policy: EvictionPolicy,
    entries: HashMap<String, CacheEntry>,
    total_size: usize,
    counters: CacheCounters,
}

impl CacheStore {
    /// Create an empty store.
    pub fn new(limits: CacheLimits, policy: EvictionPolicy) -> Self {
        Self {
            limits,
            policy,
            entries: HashMap::new(),
            total_size: 0,
            counters: CacheCounters::default(),
        }
    }

    /// Look up a key at `now`.
    ///
    /// A hit updates `last_access_time` and `access_count`. An expired entry
    /// is removed and counted as both a miss and an expiry.
    pub fn get(&mut self, key: &str, now: Timestamp) -> StoreLookup {
        match self.entries.get_mut(key) {
            None => {
                self.counters.misses += 1;
                return StoreLookup::Miss;
            }
            Some(entry) if !entry.is_expired(now) => {
                entry.touch(now);
                self.counters.hits += 1;
                return StoreLookup::Hit(entry.clone());
            }
            Some(_) => {}
        }

        self.counters.misses += 1;
        self.counters.expired += 1;
        match self.remove(key) {
            Some(entry) => StoreLookup::Expired(entry),
            None => StoreLookup::Miss,
        }
    }

    /// Read an entry without touching bookkeeping or counters.
    pub fn peek(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Check for a live (unexpired) entry.
    pub fn contains_live(&self, key: &str, now: Timestamp) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Insert an entry, evicting first if it would not fit.
    ///
    /// Eviction rounds repeat until the new entry fits within both the entry
    /// count and the byte budget. The entry's declared size is not trusted;
    /// it is recomputed from its data.
    pub fn insert(&mut self, mut entry: CacheEntry) -> Result<InsertOutcome, StoreError> {
        entry.normalize();
        if entry.size > self.limits.max_bytes {
            return Err(StoreError::TooLarge {
                key: entry.key,
                size: entry.size,
                budget: self.limits.max_bytes,
            });
        }

        let replaced = self.remove(&entry.key);
        let mut evicted = Vec::new();
        while !self.entries.is_empty() && !self.fits(entry.size) {
            evicted.extend(self.evict_round());
        }

        self.total_size += entry.size;
        self.entries.insert(entry.key.clone(), entry);
        Ok(InsertOutcome { replaced, evicted })
    }

    fn fits(&self, incoming: usize) -> bool {
        self.entries.len() < self.limits.max_entries
            && self.total_size + incoming <= self.limits.max_bytes
    }

    /// Remove an entry.
    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.total_size -= entry.size;
        Some(entry)
    }

    /// Drop an entry whose data could not be read back.
    ///
    /// The hit just counted for it becomes a miss.
    pub fn discard_unreadable(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.remove(key)?;
        self.counters.hits = self.counters.hits.saturating_sub(1);
        self.counters.misses += 1;
        Some(entry)
    }

    /// Remove every entry expired at `now`.
    pub fn purge_expired(&mut self, now: Timestamp) -> Vec<CacheEntry> {
        let expired: Vec<String> = self
            .entries
            .values()
            .filter(|entry| entry.is_expired(now))
            .map(|entry| entry.key.clone())
            .collect();
        self.counters.expired += expired.len() as u64;
        expired.iter().filter_map(|key| self.remove(key)).collect()
    }

    /// Run one eviction round.
    ///
    /// Removes the first 10% of entries in eviction order, at least one.
    pub fn evict_round(&mut self) -> Vec<CacheEntry> {
        let count = (self.entries.len() / EVICTION_DIVISOR).max(1);
        let victims: Vec<String> = self
            .eviction_order()
            .into_iter()
            .take(count)
            .map(str::to_string)
            .collect();
        let evicted: Vec<CacheEntry> = victims.iter().filter_map(|key| self.remove(key)).collect();
        self.counters.evicted += evicted.len() as u64;
        evicted
    }

    /// Keys in the order they would be evicted.
    pub fn eviction_order(&self) -> Vec<&str> {
        let mut entries: Vec<&CacheEntry> = self.entries.values().collect();
        match self.policy {
            EvictionPolicy::Lru => {
                entries.sort_by(|a, b| {
                    (a.last_access_time, &a.key).cmp(&(b.last_access_time, &b.key))
                });
            }
            EvictionPolicy::PriorityLru => {
                entries.sort_by(|a, b| {
                    (a.priority, a.last_access_time, &a.key).cmp(&(
                        b.priority,
                        b.last_access_time,
                        &b.key,
                    ))
                });
            }
        }
        entries.into_iter().map(|entry| entry.key.as_str()).collect()
    }

    /// Check if the store holds more than its limits allow.
    pub fn is_over_capacity(&self) -> bool {
        self.entries.len() > self.limits.max_entries || self.total_size > self.limits.max_bytes
    }

    /// Swap an entry's stored bytes, keeping size accounting in step.
    ///
    /// Returns the previous stored size.
    pub fn replace_data(&mut self, key: &str, data: Vec<u8>, compressed: bool) -> Option<usize> {
        let entry = self.entries.get_mut(key)?;
        let previous = entry.size;
        entry.replace_data(data, compressed);
        self.total_size = self.total_size - previous + entry.size;
        Some(previous)
    }

    /// Iterate over all entries in arbitrary order.
    pub fn entries(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total stored bytes.
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// Configured limits.
    pub fn limits(&self) -> CacheLimits {
        self.limits
    }

    /// Configured eviction policy.
    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Cumulative counters.
    pub fn counters(&self) -> CacheCounters {
        self.counters
    }

    /// Overwrite the counters (used when importing an export blob).
    pub fn restore_counters(&mut self, counters: CacheCounters) {
        self.counters = counters;
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.total_size = 0;
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(CacheLimits::default(), EvictionPolicy::default())
    }
}
