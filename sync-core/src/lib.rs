//! # sync-core
//!
//! Pure logic for tidesync (no I/O, instant tests).
//!
//! This crate implements the bounded state and decision procedures behind
//! the reconciliation and caching engines, without any network or disk I/O.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input (including the
//! current time) and produce output without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about capacity bounds and state transitions
//!
//! The actual I/O (transport, storage) is performed by `sync-client`, which
//! drives these structures from its engines.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache_store;
pub mod checksum;
pub mod clock;
pub mod codec;
pub mod ledger;
pub mod queue;
pub mod resolver;
pub mod state;

pub use cache_store::{
    CacheLimits, CacheStore, EvictionPolicy, InsertOutcome, StoreError, StoreLookup,
    DEFAULT_MAX_SIZE_MB, MAX_CACHE_ENTRIES,
};
pub use checksum::checksum;
pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{Codec, CodecError, IdentityCodec, Lz4Codec, COMPRESSION_THRESHOLD};
pub use ledger::{ChangeLedger, MAX_OFFLINE_CHANGES, OFFLINE_BATCH_SIZE};
pub use queue::{OfflineRequestQueue, QueueError, QueuedRequest, MAX_OFFLINE_REQUESTS, MAX_REQUEST_RETRIES};
pub use resolver::{
    detect_conflicts, ConflictPolicy, ConflictResolutionEntry, ConflictResolver, ConflictType,
    DataConflict, LongerValueMerge, MergeStrategy, Resolution, TimestampPolicy,
};
pub use state::{SyncState, SyncStatus, SyncTransition};
