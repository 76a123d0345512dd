//! Change ledger for tidesync.
//!
//! This module provides the bounded set of not-yet-synchronized local
//! mutations, keyed by identifier:
//! - Idempotent upsert (a key holds at most one pending change)
//! - Max size limits to prevent unbounded memory growth
//! - Oldest-timestamp eviction when the bound is exceeded
//!
//! The ledger is used by sync-client's `SyncEngine`. Changes stay here until
//! an upload confirms them or eviction drops them.

use std::collections::HashMap;
use sync_types::{LocalChange, Timestamp};

/// Default maximum number of pending local changes.
pub const MAX_OFFLINE_CHANGES: usize = 1000;

/// Number of changes per upload batch during an offline sync.
pub const OFFLINE_BATCH_SIZE: usize = 50;

#[derive(Debug, Clone)]
struct Slot {
    change: LocalChange,
    /// Insertion order, breaks timestamp ties during eviction.
    seq: u64,
}

/// Bounded map of pending local changes.
///
/// Changes flow through the ledger in this order:
/// 1. `upsert()` - record or replace the pending change for a key
/// 2. `snapshot()` / `changes_since()` - read what needs uploading
/// 3. `remove_synced()` - drop changes the remote confirmed
///
/// If an upsert pushes the ledger past its bound, the entry with the
/// smallest timestamp is evicted and returned to the caller.
#[derive(Debug, Clone)]
pub struct ChangeLedger {
    /// Maximum number of pending changes.
    max_size: usize,
    entries: HashMap<String, Slot>,
    next_seq: u64,
}

impl ChangeLedger {
    /// Create a new ledger with the given maximum size.
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            entries: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Record a pending change, replacing any earlier change for the same key.
    ///
    /// Returns the evicted change if the insertion overflowed the ledger.
    pub fn upsert(&mut self, change: LocalChange) -> Option<LocalChange> {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries
            .insert(change.key.clone(), Slot { change, seq });

        if self.entries.len() > self.max_size {
            self.evict_oldest()
        } else {
            None
        }
    }

    /// Remove and return the change with the smallest timestamp.
    fn evict_oldest(&mut self) -> Option<LocalChange> {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, slot)| (slot.change.timestamp, slot.seq))
            .map(|(key, _)| key.clone())?;
        self.entries.remove(&oldest).map(|slot| slot.change)
    }

    /// Get the pending change for a key.
    pub fn get(&self, key: &str) -> Option<&LocalChange> {
        self.entries.get(key).map(|slot| &slot.change)
    }

    /// Check if a key has a pending change.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Remove the pending change for a key.
    pub fn remove(&mut self, key: &str) -> Option<LocalChange> {
        self.entries.remove(key).map(|slot| slot.change)
    }

    /// Remove every listed key, returning how many were present.
    pub fn remove_synced<'a, I>(&mut self, keys: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        keys.into_iter()
            .filter(|key| self.entries.remove(*key).is_some())
            .count()
    }

    /// All pending changes, oldest first.
    pub fn snapshot(&self) -> Vec<LocalChange> {
        let mut slots: Vec<&Slot> = self.entries.values().collect();
        slots.sort_by_key(|slot| (slot.change.timestamp, slot.seq));
        slots.into_iter().map(|slot| slot.change.clone()).collect()
    }

    /// Pending changes recorded strictly after `since`, oldest first.
    pub fn changes_since(&self, since: Timestamp) -> Vec<LocalChange> {
        self.snapshot()
            .into_iter()
            .filter(|change| change.timestamp > since)
            .collect()
    }

    /// Number of pending changes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no changes are pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of pending changes.
    pub fn capacity(&self) -> usize {
        self.max_size
    }

    /// Drop every pending change.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for ChangeLedger {
    fn default() -> Self {
        Self::new(MAX_OFFLINE_CHANGES)
    }
}
