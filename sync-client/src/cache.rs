//! CacheEngine - bounded response cache with an offline request queue.
//!
//! This module provides [`CacheEngine`], which drives sync-core's
//! `CacheStore` and `OfflineRequestQueue`:
//! - TTL expiry on read, LRU (or priority-aware LRU) eviction on write
//! - Opportunistic compression through a pluggable [`Codec`]
//! - Versioned JSON export/import, optionally persisted via [`CacheStorage`]
//! - Replay of queued requests through the [`Transport`], caching each
//!   response under its URL
//!
//! Every operation returns a result value; nothing here returns `Err` to
//! the caller.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use sync_core::{
    CacheStore, Clock, Codec, CodecError, Lz4Codec, OfflineRequestQueue, StoreLookup, SystemClock,
};
use sync_types::{CacheEntry, CacheExport, CacheMetadata, CachePriority, NetworkRequest};
use tokio::sync::{watch, Mutex};

use crate::config::CacheSettings;
use crate::error::EngineError;
use crate::result::{
    CacheLookup, CacheState, CacheStatistics, CacheWrite, ImportResult, OfflineProcessReport,
    OptimizeReport, PrefetchReport, QueueResult,
};
use crate::storage::CacheStorage;
use crate::transport::Transport;

/// Store and per-key metadata, guarded together.
#[derive(Debug)]
struct CacheInner {
    store: CacheStore,
    metadata: HashMap<String, CacheMetadata>,
}

/// The response cache engine.
pub struct CacheEngine<T: Transport> {
    settings: CacheSettings,
    transport: T,
    codec: Box<dyn Codec>,
    clock: Arc<dyn Clock>,
    inner: Mutex<CacheInner>,
    queue: Mutex<OfflineRequestQueue>,
    state: watch::Sender<CacheState>,
}

impl<T: Transport> CacheEngine<T> {
    /// Create a new CacheEngine with LZ4 compression and the system clock.
    pub fn new(transport: T, settings: CacheSettings) -> Self {
        let (state, _) = watch::channel(CacheState::default());
        Self {
            inner: Mutex::new(CacheInner {
                store: CacheStore::new(settings.limits(), settings.eviction_policy),
                metadata: HashMap::new(),
            }),
            queue: Mutex::new(OfflineRequestQueue::new(settings.max_offline_requests)),
            settings,
            transport,
            codec: Box::new(Lz4Codec),
            clock: Arc::new(SystemClock),
            state,
        }
    }

    /// Use a different time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use a different compression codec.
    pub fn with_codec(mut self, codec: impl Codec + 'static) -> Self {
        self.codec = Box::new(codec);
        self
    }

    // ===========================================
    // Reads and writes
    // ===========================================

    /// Read a key.
    ///
    /// Expired entries are removed on access and reported as `Expired`.
    /// An entry that fails to decode is dropped and counted as a miss.
    pub async fn get(&self, key: &str) -> CacheLookup {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock().await;

        let lookup = match inner.store.get(key, now) {
            StoreLookup::Hit(entry) => match self.decode(&entry) {
                Ok(data) => CacheLookup::Hit(data),
                Err(e) => {
                    tracing::warn!(key = %key, "Dropping unreadable cache entry: {}", e);
                    inner.store.discard_unreadable(key);
                    inner.metadata.remove(key);
                    CacheLookup::Error(e.to_string())
                }
            },
            StoreLookup::Miss => CacheLookup::Miss,
            StoreLookup::Expired(_) => {
                inner.metadata.remove(key);
                tracing::debug!(key = %key, "Cache entry expired");
                CacheLookup::Expired
            }
        };

        self.publish_store(&inner);
        lookup
    }

    /// Store `data` under `key` for `ttl`.
    ///
    /// Data above the compression threshold is compressed when that shrinks
    /// it. Eviction runs first if the entry would not otherwise fit.
    pub async fn put(
        &self,
        key: &str,
        data: &[u8],
        ttl: Duration,
        priority: CachePriority,
    ) -> CacheWrite {
        self.store_entry(key, data, ttl, priority, None).await
    }

    /// Read several keys. No cross-key atomicity.
    pub async fn get_batch(&self, keys: &[&str]) -> Vec<(String, CacheLookup)> {
        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            results.push((key.to_string(), self.get(key).await));
        }
        results
    }

    /// Store several entries with the same TTL and priority. No cross-key
    /// atomicity.
    pub async fn put_batch(
        &self,
        items: &[(String, Vec<u8>)],
        ttl: Duration,
        priority: CachePriority,
    ) -> Vec<(String, CacheWrite)> {
        let mut results = Vec::with_capacity(items.len());
        for (key, data) in items {
            results.push((key.clone(), self.put(key, data, ttl, priority).await));
        }
        results
    }

    /// Load and cache every key that has no live entry, at low priority.
    pub async fn prefetch<F, Fut, E>(&self, keys: &[&str], loader: F) -> PrefetchReport
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<Vec<u8>, E>>,
        E: std::fmt::Display,
    {
        let mut report = PrefetchReport::default();
        for key in keys {
            if self.contains(key).await {
                report.skipped += 1;
                continue;
            }

            match loader(key.to_string()).await {
                Ok(data) => {
                    let write = self
                        .store_entry(
                            key,
                            &data,
                            self.settings.default_ttl(),
                            CachePriority::Low,
                            None,
                        )
                        .await;
                    if write.is_stored() {
                        report.fetched += 1;
                    } else {
                        report.failed += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!(key = %key, "Prefetch loader failed: {}", e);
                    report.failed += 1;
                }
            }
        }

        tracing::debug!(
            fetched = report.fetched,
            skipped = report.skipped,
            failed = report.failed,
            "Prefetch finished"
        );
        report
    }

    /// Remove a key. Returns `true` if it was present.
    pub async fn delete(&self, key: &str) -> bool {
        let mut inner = self.inner.lock().await;
        let removed = inner.store.remove(key).is_some();
        inner.metadata.remove(key);
        self.publish_store(&inner);
        removed
    }

    /// Check for a live entry without counting a hit or miss.
    pub async fn contains(&self, key: &str) -> bool {
        let now = self.clock.now_millis();
        self.inner.lock().await.store.contains_live(key, now)
    }

    /// Drop every entry. Counters are kept.
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.store.clear();
        inner.metadata.clear();
        self.publish_store(&inner);
        tracing::info!("Cache cleared");
    }

    async fn store_entry(
        &self,
        key: &str,
        data: &[u8],
        ttl: Duration,
        priority: CachePriority,
        source_url: Option<String>,
    ) -> CacheWrite {
        match self.try_store(key, data, ttl, priority, source_url).await {
            Ok(write) => write,
            Err(e) => {
                tracing::warn!(key = %key, "Cache write rejected: {}", e);
                CacheWrite::Error(e.to_string())
            }
        }
    }

    async fn try_store(
        &self,
        key: &str,
        data: &[u8],
        ttl: Duration,
        priority: CachePriority,
        source_url: Option<String>,
    ) -> Result<CacheWrite, EngineError> {
        let now = self.clock.now_millis();
        let (stored, compressed) = self.maybe_compress(data);
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        let entry = CacheEntry::new(key, stored, now, ttl_ms, priority, compressed);
        let size = entry.size;

        let mut inner = self.inner.lock().await;
        let outcome = inner.store.insert(entry)?;
        for evicted in &outcome.evicted {
            inner.metadata.remove(&evicted.key);
        }
        if !outcome.evicted.is_empty() {
            tracing::debug!(
                key = %key,
                "Evicted {} entries to make room",
                outcome.evicted.len()
            );
        }
        inner.metadata.insert(
            key.to_string(),
            CacheMetadata {
                key: key.to_string(),
                original_size: data.len(),
                source_url,
            },
        );
        self.publish_store(&inner);

        Ok(CacheWrite::Stored {
            size,
            compressed,
            evicted: outcome.evicted.len(),
        })
    }

    fn maybe_compress(&self, data: &[u8]) -> (Vec<u8>, bool) {
        if self.settings.compression_enabled && data.len() > self.settings.compression_threshold {
            let encoded = self.codec.encode(data);
            if encoded.len() < data.len() {
                return (encoded, true);
            }
        }
        (data.to_vec(), false)
    }

    fn decode(&self, entry: &CacheEntry) -> Result<Vec<u8>, CodecError> {
        if entry.compressed {
            self.codec.decode(&entry.data)
        } else {
            Ok(entry.data.clone())
        }
    }

    // ===========================================
    // Maintenance
    // ===========================================

    /// Purge expired entries, compress large raw entries, then evict if
    /// still over capacity.
    pub async fn optimize_cache(&self) -> OptimizeReport {
        let now = self.clock.now_millis();
        let mut report = OptimizeReport::default();
        let mut guard = self.inner.lock().await;
        let CacheInner { store, metadata } = &mut *guard;

        let expired = store.purge_expired(now);
        report.expired_removed = expired.len();
        for entry in &expired {
            report.freed_bytes += entry.size;
            metadata.remove(&entry.key);
        }

        if self.settings.compression_enabled {
            let shrinkable: Vec<(String, Vec<u8>)> = store
                .entries()
                .filter(|e| !e.compressed && e.size > self.settings.compression_threshold)
                .filter_map(|e| {
                    let encoded = self.codec.encode(&e.data);
                    (encoded.len() < e.size).then(|| (e.key.clone(), encoded))
                })
                .collect();
            for (key, encoded) in shrinkable {
                let new_size = encoded.len();
                if let Some(previous) = store.replace_data(&key, encoded, true) {
                    report.recompressed += 1;
                    report.freed_bytes += previous - new_size;
                }
            }
        }

        while store.is_over_capacity() && !store.is_empty() {
            for entry in store.evict_round() {
                report.evicted += 1;
                report.freed_bytes += entry.size;
                metadata.remove(&entry.key);
            }
        }

        self.publish_store(&guard);
        tracing::info!(
            expired = report.expired_removed,
            recompressed = report.recompressed,
            evicted = report.evicted,
            freed_bytes = report.freed_bytes,
            "Cache optimized"
        );
        report
    }

    // ===========================================
    // Export / import
    // ===========================================

    /// Serialize the whole cache as a versioned JSON blob.
    ///
    /// Returns `None` if encoding fails.
    pub async fn export_cache(&self) -> Option<Vec<u8>> {
        let now = self.clock.now_millis();
        let inner = self.inner.lock().await;

        let mut entries: Vec<CacheEntry> = inner.store.entries().cloned().collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        let mut metadata: Vec<CacheMetadata> = inner.metadata.values().cloned().collect();
        metadata.sort_by(|a, b| a.key.cmp(&b.key));

        let export = CacheExport::new(now, entries, metadata, inner.store.counters());
        match export.to_json() {
            Ok(blob) => {
                tracing::debug!(entries = export.entries.len(), bytes = blob.len(), "Cache exported");
                Some(blob)
            }
            Err(e) => {
                tracing::error!("Cache export failed: {}", e);
                None
            }
        }
    }

    /// Replace the cache contents with an exported blob.
    ///
    /// Rejects blobs of another format version and leaves the cache
    /// untouched in that case. Entries already expired are skipped.
    pub async fn import_cache(&self, blob: &[u8]) -> ImportResult {
        let export = match CacheExport::from_json(blob) {
            Ok(export) => export,
            Err(e) => {
                tracing::warn!("Cache import rejected: {}", e);
                return ImportResult::Error(e.to_string());
            }
        };

        let now = self.clock.now_millis();
        let mut incoming_meta: HashMap<String, CacheMetadata> = export
            .metadata
            .into_iter()
            .map(|meta| (meta.key.clone(), meta))
            .collect();

        let mut guard = self.inner.lock().await;
        let CacheInner { store, metadata } = &mut *guard;
        store.clear();
        metadata.clear();
        store.restore_counters(export.statistics);

        let mut imported = 0;
        let mut skipped_expired = 0;
        for mut entry in export.entries {
            entry.normalize();
            if entry.is_expired(now) {
                skipped_expired += 1;
                continue;
            }
            let key = entry.key.clone();
            match store.insert(entry) {
                Ok(outcome) => {
                    for evicted in &outcome.evicted {
                        metadata.remove(&evicted.key);
                    }
                    if let Some(meta) = incoming_meta.remove(&key) {
                        metadata.insert(key, meta);
                    }
                    imported += 1;
                }
                Err(e) => tracing::warn!("Skipping imported entry: {}", e),
            }
        }

        self.publish_store(&guard);
        tracing::info!(imported, skipped_expired, "Cache imported");
        ImportResult::Imported {
            imported,
            skipped_expired,
        }
    }

    /// Export the cache and save it under `key`.
    ///
    /// Returns `true` if the blob was saved.
    pub async fn save_to(&self, storage: &dyn CacheStorage, key: &str) -> bool {
        let Some(blob) = self.export_cache().await else {
            return false;
        };
        match storage.save(key, &blob).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(key = %key, "Failed to save cache snapshot: {}", e);
                false
            }
        }
    }

    /// Load the blob saved under `key` and import it.
    pub async fn load_from(&self, storage: &dyn CacheStorage, key: &str) -> ImportResult {
        match storage.load(key).await {
            Ok(Some(blob)) => self.import_cache(&blob).await,
            Ok(None) => ImportResult::Error(format!("no cache snapshot stored under {key}")),
            Err(e) => {
                tracing::error!(key = %key, "Failed to load cache snapshot: {}", e);
                ImportResult::Error(EngineError::from(e).to_string())
            }
        }
    }

    // ===========================================
    // Offline queue
    // ===========================================

    /// Queue a request for later execution.
    ///
    /// A full queue rejects the request.
    pub async fn queue_offline_request(&self, request: NetworkRequest) -> QueueResult {
        let now = self.clock.now_millis();
        let mut queue = self.queue.lock().await;
        match queue.enqueue(request, now) {
            Ok(id) => {
                tracing::debug!(id = %id, queued = queue.len(), "Request queued");
                self.publish_queue(queue.len());
                QueueResult::Queued(id)
            }
            Err(e) => {
                tracing::warn!("Offline request rejected: {}", e);
                QueueResult::Error(EngineError::from(e).to_string())
            }
        }
    }

    /// Execute every queued request once.
    ///
    /// Successful responses are cached under the request URL. Failed
    /// requests go back to the front of the queue until they reach the
    /// retry ceiling, then are dropped.
    pub async fn process_offline_requests(&self) -> OfflineProcessReport {
        let pending = self.queue.lock().await.drain();
        let mut report = OfflineProcessReport::default();
        if pending.is_empty() {
            return report;
        }
        tracing::info!("Processing {} offline requests", pending.len());

        let mut retry = Vec::new();
        for mut item in pending {
            match self.transport.execute(&item.request).await {
                Ok(body) => {
                    report.processed += 1;
                    let url = item.request.url.clone();
                    let write = self
                        .store_entry(
                            &url,
                            &body,
                            self.settings.default_ttl(),
                            CachePriority::Normal,
                            Some(url.clone()),
                        )
                        .await;
                    if let CacheWrite::Error(e) = write {
                        tracing::warn!("Response for {} not cached: {}", url, e);
                    }
                }
                Err(e) => {
                    if item.record_failure(self.settings.max_request_retries) {
                        tracing::warn!(
                            id = %item.id,
                            "Dropping {} {} after {} attempts: {}",
                            item.request.method,
                            item.request.url,
                            item.retry_count,
                            e
                        );
                        report.failed += 1;
                    } else {
                        tracing::debug!(id = %item.id, "Request failed, will retry: {}", e);
                        retry.push(item);
                    }
                }
            }
        }

        report.remaining = retry.len();
        let queued = {
            let mut queue = self.queue.lock().await;
            queue.restore_front(retry);
            queue.len()
        };
        self.publish_queue(queued);

        tracing::info!(
            processed = report.processed,
            failed = report.failed,
            remaining = report.remaining,
            "Offline requests processed"
        );
        report
    }

    /// Number of queued offline requests.
    pub async fn offline_queue_len(&self) -> usize {
        self.queue.lock().await.len()
    }

    // ===========================================
    // Observation
    // ===========================================

    /// Current state snapshot.
    pub fn state(&self) -> CacheState {
        self.state.borrow().clone()
    }

    /// Subscribe to state snapshots.
    pub fn subscribe(&self) -> watch::Receiver<CacheState> {
        self.state.subscribe()
    }

    /// Aggregate statistics.
    pub async fn statistics(&self) -> CacheStatistics {
        let offline_queue_len = self.offline_queue_len().await;
        let inner = self.inner.lock().await;
        let counters = inner.store.counters();
        let lookups = counters.hits + counters.misses;
        let limits = inner.store.limits();

        CacheStatistics {
            hits: counters.hits,
            misses: counters.misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                counters.hits as f64 / lookups as f64
            },
            expired: counters.expired,
            evicted: counters.evicted,
            entry_count: inner.store.len(),
            compressed_entries: inner.store.entries().filter(|e| e.compressed).count(),
            total_size: inner.store.total_size(),
            max_bytes: limits.max_bytes,
            max_entries: limits.max_entries,
            offline_queue_len,
        }
    }

    /// Get a reference to the underlying transport (for testing).
    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn publish_store(&self, inner: &CacheInner) {
        let counters = inner.store.counters();
        let now = self.clock.now_millis();
        self.state.send_modify(|state| {
            state.hits = counters.hits;
            state.misses = counters.misses;
            state.expired = counters.expired;
            state.evicted = counters.evicted;
            state.total_size = inner.store.total_size();
            state.entry_count = inner.store.len();
            state.updated_at = Some(now);
        });
    }

    fn publish_queue(&self, len: usize) {
        let now = self.clock.now_millis();
        self.state.send_modify(|state| {
            state.offline_queue_len = len;
            state.updated_at = Some(now);
        });
    }
}
