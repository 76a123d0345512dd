//! # sync-client
//!
//! Client library for tidesync: offline-first reconciliation and a bounded
//! response cache.
//!
//! Applications use two engines:
//!
//! - [`SyncEngine`] - records local changes in a bounded ledger, reconciles
//!   them with the remote side (full, incremental, or batched offline
//!   passes), resolves conflicts, and publishes an observable [`SyncState`]
//! - [`CacheEngine`] - caches payloads with TTL expiry, compression and
//!   capacity eviction, exports/imports snapshots, and replays queued
//!   network requests
//!
//! Both talk to the outside world only through the [`Transport`] trait,
//! and the cache persists snapshots through [`CacheStorage`].
//!
//! ## Example
//!
//! ```ignore
//! use sync_client::{EngineConfig, MockTransport, SyncEngine};
//!
//! let config = EngineConfig::from_file("tidesync.toml".as_ref())?;
//! let engine = SyncEngine::new(MockTransport::new(), config.sync);
//!
//! engine.add_local_change("user.name", "sam", ChangeOperation::Update).await;
//! let result = engine.sync_data(&snapshot).await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod result;
pub mod storage;
pub mod transport;

pub use cache::CacheEngine;
pub use config::{CacheSettings, ConfigError, EngineConfig, SyncSettings};
pub use engine::{SyncEngine, CANCEL_MESSAGE};
pub use error::EngineError;
pub use result::{
    ApplyChangesResult, CacheLookup, CacheState, CacheStatistics, CacheWrite, ImportResult,
    OfflineProcessReport, OptimizeReport, PrefetchReport, QueueResult, SyncReport, SyncResult,
    SyncStatistics,
};
pub use storage::{CacheStorage, MemoryStorage, StorageError};
pub use transport::{MockTransport, Transport, TransportError};

pub use sync_core::{SyncState, SyncStatus};
