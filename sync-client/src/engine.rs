//! SyncEngine - reconciles the local change ledger with a remote source.
//!
//! # Architecture
//!
//! SyncEngine drives the pure pieces from sync-core (ledger, resolver,
//! status state machine) and performs the actual I/O via the Transport
//! trait.
//!
//! ```text
//! Application → SyncEngine → Transport → Remote
//!                   ↓
//!              sync-core (ledger, resolver, state machine)
//! ```
//!
//! # Cancellation
//!
//! Every pass takes a generation number. `cancel_sync()` bumps the
//! generation; a pass that finds its generation stale when it resumes from
//! a transport call discards its results instead of committing them.
//!
//! Only a full sync ends as `Cancelled`. A cancelled incremental or offline
//! pass ends as `Failed` with [`CANCEL_MESSAGE`] as its error.
//!
//! # Example
//!
//! ```ignore
//! let engine = SyncEngine::new(transport, SyncSettings::default());
//! engine.add_local_change("note:1", "hello", ChangeOperation::Create).await;
//!
//! match engine.sync_data(&snapshot).await {
//!     SyncResult::Success(report) => println!("synced {}", report.items_synced),
//!     SyncResult::Partial(report) => println!("partial: {:?}", report.errors),
//!     SyncResult::UpToDate => {}
//!     SyncResult::Error(e) => eprintln!("sync failed: {e}"),
//! }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use sync_core::{
    checksum, detect_conflicts, ChangeLedger, Clock, ConflictResolutionEntry, ConflictResolver,
    Resolution, SyncState, SyncTransition, SystemClock,
};
use sync_types::{
    ChangeOperation, LocalChange, RemoteChange, Timestamp, UploadItem, UploadPayload, UploadStats,
};
use tokio::sync::{watch, Mutex};

use crate::config::SyncSettings;
use crate::error::EngineError;
use crate::result::{ApplyChangesResult, SyncReport, SyncResult, SyncStatistics};
use crate::transport::Transport;

/// Message recorded in `SyncState::error` when a pass is cancelled.
pub const CANCEL_MESSAGE: &str = "Sync cancelled by user";

/// A running pass.
#[derive(Debug, Clone, Copy)]
struct Pass {
    generation: u64,
    started_at: Timestamp,
}

/// The reconciliation engine.
///
/// Owns the change ledger and the remote set from the last fetch. All
/// public operations are total: failures come back as result values.
pub struct SyncEngine<T: Transport> {
    settings: SyncSettings,
    transport: T,
    resolver: ConflictResolver,
    clock: Arc<dyn Clock>,
    ledger: Mutex<ChangeLedger>,
    remote: Mutex<HashMap<String, RemoteChange>>,
    stats: Mutex<SyncStatistics>,
    generation: AtomicU64,
    state: watch::Sender<SyncState>,
}

impl<T: Transport> SyncEngine<T> {
    /// Create a new SyncEngine with the system clock and default resolver.
    pub fn new(transport: T, settings: SyncSettings) -> Self {
        let (state, _) = watch::channel(SyncState::default());
        Self {
            ledger: Mutex::new(ChangeLedger::new(settings.max_offline_changes)),
            settings,
            transport,
            resolver: ConflictResolver::new(),
            clock: Arc::new(SystemClock),
            remote: Mutex::new(HashMap::new()),
            stats: Mutex::new(SyncStatistics::default()),
            generation: AtomicU64::new(0),
            state,
        }
    }

    /// Use a different time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use a different conflict resolver.
    pub fn with_resolver(mut self, resolver: ConflictResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Record a local mutation at the current time.
    pub async fn add_local_change(&self, key: &str, value: &str, operation: ChangeOperation) {
        let change = LocalChange::new(key, value, operation, self.clock.now_millis());
        self.record_change(change).await;
    }

    /// Record a local mutation with an upload priority (lower uploads first).
    pub async fn add_local_change_with_priority(
        &self,
        key: &str,
        value: &str,
        operation: ChangeOperation,
        priority: u8,
    ) {
        let change =
            LocalChange::new(key, value, operation, self.clock.now_millis()).with_priority(priority);
        self.record_change(change).await;
    }

    /// Upsert a prepared change into the ledger.
    ///
    /// If the ledger overflows, the change with the oldest timestamp is
    /// evicted.
    pub async fn record_change(&self, change: LocalChange) {
        let pending = {
            let mut ledger = self.ledger.lock().await;
            if let Some(evicted) = ledger.upsert(change) {
                tracing::warn!(
                    key = %evicted.key,
                    timestamp = evicted.timestamp,
                    "Ledger full, evicted oldest pending change"
                );
            }
            ledger.len()
        };
        self.state.send_modify(|state| state.pending_changes = pending);
    }

    /// Full bidirectional pass against `snapshot` (the caller's current data).
    pub async fn sync_data(&self, snapshot: &HashMap<String, String>) -> SyncResult {
        let pass = match self.begin(SyncTransition::StartFull).await {
            Ok(pass) => pass,
            Err(e) => return SyncResult::Error(e.to_string()),
        };
        tracing::info!(
            generation = pass.generation,
            items = snapshot.len(),
            "Full sync started"
        );

        match self.run_full_sync(&pass, snapshot).await {
            Ok(report) => self.complete(&pass, report).await,
            Err(e) => self.fail(&pass, e).await,
        }
    }

    async fn run_full_sync(
        &self,
        pass: &Pass,
        snapshot: &HashMap<String, String>,
    ) -> Result<SyncReport, EngineError> {
        let now = self.clock.now_millis();
        let mut entries: Vec<(&String, &String)> = snapshot.iter().collect();
        entries.sort();

        // Build the payload, then record snapshot keys the ledger lacks
        let payload = {
            let mut ledger = self.ledger.lock().await;
            let items = entries
                .iter()
                .map(|(key, value)| {
                    let (operation, timestamp) = ledger
                        .get(key)
                        .map_or((ChangeOperation::Update, now), |c| (c.operation, c.timestamp));
                    upload_item(key, value, operation, timestamp, false)
                })
                .collect();

            for (key, value) in &entries {
                if ledger.contains(key) {
                    continue;
                }
                let change = LocalChange::new(key.as_str(), value.as_str(), ChangeOperation::Update, now);
                if let Some(evicted) = ledger.upsert(change) {
                    tracing::warn!(key = %evicted.key, "Ledger full, evicted oldest pending change");
                }
            }
            UploadPayload::single(items, now)
        };

        let mut errors = Vec::new();
        let fetched = self.transport.fetch_remote_changes().await;
        self.ensure_current(pass)?;
        {
            let mut remote = self.remote.lock().await;
            match fetched {
                Ok(changes) => {
                    tracing::debug!("Fetched {} remote changes", changes.len());
                    *remote = changes;
                }
                Err(e) => {
                    tracing::warn!("Failed to fetch remote changes: {}", e);
                    errors.push(format!("Failed to fetch remote changes: {e}"));
                    remote.clear();
                }
            }
        }

        let conflicts = {
            let ledger = self.ledger.lock().await;
            let remote = self.remote.lock().await;
            detect_conflicts(&ledger, &remote)
        };
        let resolutions: Vec<ConflictResolutionEntry> = conflicts
            .into_iter()
            .map(|conflict| self.resolver.resolve(conflict))
            .collect();
        let conflicts_detected = resolutions.len();

        let applied = self.apply_resolutions(&resolutions).await;
        let uploaded = self.upload(&payload).await;
        self.ensure_current(pass)?;

        // Either half failing fails the pass
        let upload = uploaded?;
        let applied_count = match applied {
            ApplyChangesResult::Success {
                applied_count,
                errors: apply_errors,
            } => {
                errors.extend(apply_errors);
                applied_count
            }
            ApplyChangesResult::Error(message) => return Err(EngineError::Apply(message)),
        };

        if upload.rejected > 0 {
            errors.push(format!("Remote rejected {} items", upload.rejected));
        } else {
            self.remove_synced(std::slice::from_ref(&payload)).await;
        }

        Ok(SyncReport {
            items_synced: upload.accepted,
            conflicts_detected,
            conflicts_resolved: applied_count,
            upload,
            errors,
            duration_ms: 0,
        })
    }

    /// Apply resolved conflicts to the ledger.
    ///
    /// USE_LOCAL and USE_REMOTE only count: the winning value already lives
    /// on its side. MERGE writes the merged value back as a pending change.
    /// UNRESOLVED is reported, not applied.
    async fn apply_resolutions(&self, resolutions: &[ConflictResolutionEntry]) -> ApplyChangesResult {
        let mut ledger = self.ledger.lock().await;

        // Resolutions were computed outside the lock
        if let Some(stale) = resolutions.iter().find(|entry| {
            ledger.get(&entry.conflict.key).map(|c| c.timestamp)
                != Some(entry.conflict.local.timestamp)
        }) {
            return ApplyChangesResult::Error(format!(
                "pending change for {} changed during resolution",
                stale.conflict.key
            ));
        }

        let mut applied_count = 0;
        let mut errors = Vec::new();
        for entry in resolutions {
            let conflict = &entry.conflict;
            match (entry.resolution, &entry.resolved_value) {
                (Resolution::UseLocal | Resolution::UseRemote, Some(_)) => applied_count += 1,
                (Resolution::Merge, Some(value)) => {
                    let timestamp = conflict.local.timestamp.max(conflict.remote.timestamp);
                    let merged = LocalChange::new(
                        conflict.key.as_str(),
                        value.as_str(),
                        ChangeOperation::Update,
                        timestamp,
                    )
                    .with_priority(conflict.local.priority);
                    ledger.upsert(merged);
                    applied_count += 1;
                }
                (resolution, _) => {
                    tracing::warn!(key = %conflict.key, ?resolution, "Conflict left unresolved");
                    errors.push(format!("Unresolved conflict for key {}", conflict.key));
                }
            }
        }

        ApplyChangesResult::Success {
            applied_count,
            errors,
        }
    }

    /// Upload changes recorded strictly after `since`, without conflict checks.
    pub async fn incremental_sync(&self, since: Timestamp) -> SyncResult {
        let pass = match self.begin(SyncTransition::StartIncremental).await {
            Ok(pass) => pass,
            Err(e) => return SyncResult::Error(e.to_string()),
        };
        tracing::info!(generation = pass.generation, since, "Incremental sync started");

        match self.run_incremental(&pass, since).await {
            Ok(Some(report)) => self.complete(&pass, report).await,
            Ok(None) => self.up_to_date(&pass),
            Err(e) => self.fail(&pass, e).await,
        }
    }

    async fn run_incremental(
        &self,
        pass: &Pass,
        since: Timestamp,
    ) -> Result<Option<SyncReport>, EngineError> {
        let changes = self.ledger.lock().await.changes_since(since);
        if changes.is_empty() {
            return Ok(None);
        }

        let items = changes
            .iter()
            .map(|c| upload_item(&c.key, &c.value, c.operation, c.timestamp, false))
            .collect();
        let payload = UploadPayload::single(items, self.clock.now_millis());

        let uploaded = self.upload(&payload).await;
        self.ensure_current(pass)?;
        let upload = uploaded?;

        let mut report = SyncReport {
            items_synced: upload.accepted,
            upload,
            ..SyncReport::default()
        };
        if upload.rejected > 0 {
            report
                .errors
                .push(format!("Remote rejected {} items", upload.rejected));
        } else {
            self.remove_synced(std::slice::from_ref(&payload)).await;
        }
        Ok(Some(report))
    }

    /// Upload the whole ledger in priority order, in fixed-size batches.
    ///
    /// An empty ledger is a no-op that leaves the state untouched.
    pub async fn offline_sync(&self) -> SyncResult {
        if self.ledger.lock().await.is_empty() {
            tracing::debug!("Offline sync skipped: ledger empty");
            return SyncResult::Success(SyncReport::default());
        }

        let pass = match self.begin(SyncTransition::StartOffline).await {
            Ok(pass) => pass,
            Err(e) => return SyncResult::Error(e.to_string()),
        };
        tracing::info!(generation = pass.generation, "Offline sync started");

        match self.run_offline(&pass).await {
            Ok(report) => self.complete(&pass, report).await,
            Err(e) => self.fail(&pass, e).await,
        }
    }

    async fn run_offline(&self, pass: &Pass) -> Result<SyncReport, EngineError> {
        let mut changes = self.ledger.lock().await.snapshot();
        // Stable: oldest first within a priority
        changes.sort_by_key(|c| c.priority);

        let mut items = Vec::with_capacity(changes.len());
        for change in &changes {
            let compressed = change.serialized_size()? > self.settings.compression_threshold;
            items.push(upload_item(
                &change.key,
                &change.value,
                change.operation,
                change.timestamp,
                compressed,
            ));
        }

        let now = self.clock.now_millis();
        let batch_size = self.settings.offline_batch_size.max(1);
        let batch_count = u32::try_from(items.len().div_ceil(batch_size)).unwrap_or(u32::MAX);
        let mut upload = UploadStats::default();
        let mut delivered = Vec::new();

        for (index, chunk) in items.chunks(batch_size).enumerate() {
            let payload = UploadPayload {
                items: chunk.to_vec(),
                batch_index: u32::try_from(index).unwrap_or(u32::MAX),
                batch_count,
                created_at: now,
            };
            let uploaded = self.upload(&payload).await;
            self.ensure_current(pass)?;
            let stats = uploaded?;
            tracing::debug!(
                "Uploaded batch {}/{} ({} accepted)",
                index + 1,
                batch_count,
                stats.accepted
            );
            upload.absorb(stats);
            delivered.push(payload);
        }

        let mut report = SyncReport {
            items_synced: upload.accepted,
            upload,
            ..SyncReport::default()
        };
        if upload.rejected > 0 {
            report
                .errors
                .push(format!("Remote rejected {} items", upload.rejected));
        } else {
            self.remove_synced(&delivered).await;
        }
        Ok(report)
    }

    /// Forget all pending and remote state, then run a full sync.
    ///
    /// A pass still in flight is cancelled first.
    pub async fn force_sync(&self, snapshot: &HashMap<String, String>) -> SyncResult {
        self.cancel_sync().await;
        tracing::info!("Force sync: clearing ledgers");
        self.ledger.lock().await.clear();
        self.remote.lock().await.clear();

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.send_replace(SyncState {
            generation,
            ..SyncState::default()
        });

        self.sync_data(snapshot).await
    }

    /// Cancel the running pass.
    ///
    /// Returns `false` (and changes nothing) when no pass is running.
    /// In-flight transport calls are not interrupted; their results are
    /// discarded when they return.
    pub async fn cancel_sync(&self) -> bool {
        let cancelled = self.state.send_if_modified(|state| {
            let Some(event) = state.status.interrupt() else {
                return false;
            };
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let mut next = state.clone().transition(event);
            next.generation = generation;
            next.error = Some(CANCEL_MESSAGE.to_string());
            *state = next;
            true
        });

        if cancelled {
            let mut stats = self.stats.lock().await;
            stats.total_syncs += 1;
            stats.cancelled_syncs += 1;
            tracing::info!("Sync cancelled");
        } else {
            tracing::debug!("Cancel ignored: no sync running");
        }
        cancelled
    }

    /// Current state snapshot.
    pub fn state(&self) -> SyncState {
        self.state.borrow().clone()
    }

    /// Subscribe to state snapshots.
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    /// Cumulative statistics.
    pub async fn statistics(&self) -> SyncStatistics {
        self.stats.lock().await.clone()
    }

    /// Number of pending local changes.
    pub async fn pending_changes(&self) -> usize {
        self.ledger.lock().await.len()
    }

    /// Pending local changes, oldest first.
    pub async fn pending_snapshot(&self) -> Vec<LocalChange> {
        self.ledger.lock().await.snapshot()
    }

    /// When the last pass completed.
    pub fn last_sync_time(&self) -> Option<Timestamp> {
        self.state.borrow().last_sync_time
    }

    /// Get a reference to the underlying transport (for testing).
    pub fn transport(&self) -> &T {
        &self.transport
    }

    // ===========================================
    // Pass bookkeeping
    // ===========================================

    async fn begin(&self, start: SyncTransition) -> Result<Pass, EngineError> {
        let pending = self.ledger.lock().await.len();
        let now = self.clock.now_millis();
        let mut pass = None;

        self.state.send_if_modified(|state| {
            if !state.status.can_start() {
                return false;
            }
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let mut next = state.clone().transition(start);
            next.generation = generation;
            next.sync_start_time = Some(now);
            next.pending_changes = pending;
            *state = next;
            pass = Some(Pass {
                generation,
                started_at: now,
            });
            true
        });

        pass.ok_or(EngineError::AlreadyRunning)
    }

    fn is_current(&self, pass: &Pass) -> bool {
        self.generation.load(Ordering::SeqCst) == pass.generation
    }

    fn ensure_current(&self, pass: &Pass) -> Result<(), EngineError> {
        if self.is_current(pass) {
            Ok(())
        } else {
            Err(EngineError::Cancelled)
        }
    }

    async fn upload(&self, payload: &UploadPayload) -> Result<UploadStats, EngineError> {
        if payload.is_empty() {
            return Ok(UploadStats::default());
        }
        let wire_size = payload.to_bytes()?.len();
        tracing::debug!(
            items = payload.len(),
            bytes = wire_size,
            "Uploading batch {}/{}",
            payload.batch_index + 1,
            payload.batch_count
        );
        Ok(self.transport.upload_changes(payload).await?)
    }

    /// Drop ledger entries that still match what was uploaded.
    async fn remove_synced(&self, payloads: &[UploadPayload]) {
        let mut ledger = self.ledger.lock().await;
        let synced: Vec<&str> = payloads
            .iter()
            .flat_map(|payload| payload.items.iter())
            .filter(|item| {
                ledger.get(&item.key).is_some_and(|change| {
                    change.value == item.value && change.operation == item.operation
                })
            })
            .map(|item| item.key.as_str())
            .collect();
        let removed = ledger.remove_synced(synced);
        tracing::debug!("Removed {} synced changes from ledger", removed);
    }

    async fn complete(&self, pass: &Pass, mut report: SyncReport) -> SyncResult {
        let now = self.clock.now_millis();
        report.duration_ms = now.saturating_sub(pass.started_at);
        let pending = self.ledger.lock().await.len();

        let committed = self.state.send_if_modified(|state| {
            if !self.is_current(pass) {
                return false;
            }
            let mut next = state.clone().transition(SyncTransition::Complete);
            next.last_sync_time = Some(now);
            next.pending_changes = pending;
            next.items_synced += report.items_synced as u64;
            next.conflicts_detected += report.conflicts_detected as u64;
            next.conflicts_resolved += report.conflicts_resolved as u64;
            next.error = (!report.errors.is_empty()).then(|| report.errors.join("; "));
            *state = next;
            true
        });
        if !committed {
            return self.discard(pass);
        }

        {
            let mut stats = self.stats.lock().await;
            stats.total_syncs += 1;
            stats.successful_syncs += 1;
            stats.total_items_synced += report.items_synced as u64;
            stats.total_conflicts += report.conflicts_detected as u64;
            stats.conflicts_resolved += report.conflicts_resolved as u64;
            stats.last_sync_duration_ms = report.duration_ms;
        }

        tracing::info!(
            generation = pass.generation,
            items = report.items_synced,
            conflicts = report.conflicts_detected,
            errors = report.errors.len(),
            "Sync completed"
        );
        SyncResult::from_report(report)
    }

    fn up_to_date(&self, pass: &Pass) -> SyncResult {
        let committed = self.state.send_if_modified(|state| {
            if !self.is_current(pass) {
                return false;
            }
            *state = state.clone().transition(SyncTransition::NothingToDo);
            true
        });
        if !committed {
            return self.discard(pass);
        }
        tracing::debug!("Incremental sync: nothing newer, up to date");
        SyncResult::UpToDate
    }

    async fn fail(&self, pass: &Pass, error: EngineError) -> SyncResult {
        if matches!(error, EngineError::Cancelled) {
            return self.discard(pass);
        }

        let message = error.to_string();
        let committed = self.state.send_if_modified(|state| {
            if !self.is_current(pass) {
                return false;
            }
            let mut next = state.clone().transition(SyncTransition::Fail);
            next.error = Some(message.clone());
            *state = next;
            true
        });
        if !committed {
            return self.discard(pass);
        }

        {
            let mut stats = self.stats.lock().await;
            stats.total_syncs += 1;
            stats.failed_syncs += 1;
        }
        tracing::warn!(generation = pass.generation, "Sync failed: {}", message);
        SyncResult::Error(message)
    }

    fn discard(&self, pass: &Pass) -> SyncResult {
        tracing::info!(
            generation = pass.generation,
            "Discarding results of cancelled sync"
        );
        SyncResult::Error(EngineError::Cancelled.to_string())
    }
}

fn upload_item(
    key: &str,
    value: &str,
    operation: ChangeOperation,
    timestamp: Timestamp,
    compressed: bool,
) -> UploadItem {
    UploadItem {
        key: key.to_string(),
        value: value.to_string(),
        operation,
        timestamp,
        checksum: checksum(value.as_bytes()),
        compressed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use sync_core::{
        ConflictPolicy, DataConflict, ManualClock, SyncStatus, TimestampPolicy,
    };

    fn engine_with(
        settings: SyncSettings,
    ) -> (SyncEngine<MockTransport>, MockTransport, ManualClock) {
        let transport = MockTransport::new();
        let clock = ManualClock::new(1_000);
        let engine = SyncEngine::new(transport.clone(), settings)
            .with_clock(Arc::new(clock.clone()));
        (engine, transport, clock)
    }

    fn engine() -> (SyncEngine<MockTransport>, MockTransport, ManualClock) {
        engine_with(SyncSettings::default())
    }

    fn remote(key: &str, value: &str, ts: Timestamp) -> RemoteChange {
        RemoteChange {
            key: key.to_string(),
            value: value.to_string(),
            operation: ChangeOperation::Update,
            timestamp: ts,
            server_id: format!("srv-{key}"),
        }
    }

    fn snapshot(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[derive(Debug)]
    struct AlwaysMerge;

    impl ConflictPolicy for AlwaysMerge {
        fn decide(&self, _conflict: &DataConflict) -> Resolution {
            Resolution::Merge
        }
    }

    #[derive(Debug)]
    struct NeverDecide;

    impl ConflictPolicy for NeverDecide {
        fn decide(&self, _conflict: &DataConflict) -> Resolution {
            Resolution::Unresolved
        }
    }

    // ===========================================
    // Full Sync Tests
    // ===========================================

    #[tokio::test]
    async fn newer_remote_update_wins_and_counts_as_applied() {
        let (engine, transport, _clock) = engine();
        engine
            .record_change(LocalChange::new("a", "v1", ChangeOperation::Update, 100))
            .await;
        transport.set_remote_change(remote("a", "v2", 200));

        let result = engine.sync_data(&HashMap::new()).await;

        let report = match result {
            SyncResult::Success(report) => report,
            other => panic!("expected success, got {other:?}"),
        };
        assert_eq!(report.conflicts_detected, 1);
        assert_eq!(report.conflicts_resolved, 1);
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn apply_counts_use_remote_without_errors() {
        let (engine, _transport, _clock) = engine();
        let local = LocalChange::new("a", "v1", ChangeOperation::Update, 100);
        engine.record_change(local.clone()).await;
        let entry = ConflictResolver::new()
            .with_policy(TimestampPolicy)
            .resolve(DataConflict::new(local, remote("a", "v2", 200)));
        assert_eq!(entry.resolution, Resolution::UseRemote);

        let applied = engine.apply_resolutions(&[entry]).await;

        assert_eq!(
            applied,
            ApplyChangesResult::Success {
                applied_count: 1,
                errors: vec![]
            }
        );
    }

    #[tokio::test]
    async fn apply_rejects_stale_resolutions() {
        let (engine, _transport, _clock) = engine();
        let local = LocalChange::new("a", "v1", ChangeOperation::Update, 100);
        let entry = ConflictResolver::new().resolve(DataConflict::new(
            local,
            remote("a", "v2", 200),
        ));
        engine
            .record_change(LocalChange::new("a", "v3", ChangeOperation::Update, 300))
            .await;

        let applied = engine.apply_resolutions(&[entry]).await;

        assert!(matches!(applied, ApplyChangesResult::Error(_)));
    }

    #[tokio::test]
    async fn snapshot_is_uploaded_with_checksums_and_cleared() {
        let (engine, transport, _clock) = engine();

        let result = engine
            .sync_data(&snapshot(&[("a", "alpha"), ("b", "beta")]))
            .await;

        assert_eq!(result.items_synced(), 2);
        let uploads = transport.uploads();
        assert_eq!(uploads.len(), 1);
        let item = &uploads[0].items[0];
        assert_eq!(item.key, "a");
        assert_eq!(item.checksum, checksum(b"alpha"));
        assert_eq!(item.operation, ChangeOperation::Update);
        assert_eq!(engine.pending_changes().await, 0);
    }

    #[tokio::test]
    async fn payload_keeps_ledger_operation_for_known_keys() {
        let (engine, transport, _clock) = engine();
        engine
            .record_change(LocalChange::new("a", "alpha", ChangeOperation::Create, 500))
            .await;

        engine.sync_data(&snapshot(&[("a", "alpha")])).await;

        let item = &transport.uploads()[0].items[0];
        assert_eq!(item.operation, ChangeOperation::Create);
        assert_eq!(item.timestamp, 500);
    }

    #[tokio::test]
    async fn fetch_failure_is_partial() {
        let (engine, transport, _clock) = engine();
        transport.fail_next_fetch("network unreachable");

        let result = engine.sync_data(&snapshot(&[("a", "alpha")])).await;

        match &result {
            SyncResult::Partial(report) => {
                assert_eq!(report.errors.len(), 1);
                assert!(report.errors[0].contains("Failed to fetch remote changes"));
            }
            other => panic!("expected partial, got {other:?}"),
        }
        let state = engine.state();
        assert_eq!(state.status, SyncStatus::Completed);
        assert!(state.error.is_some());
        // Upload still went out
        assert_eq!(transport.uploads().len(), 1);
    }

    #[tokio::test]
    async fn upload_failure_fails_the_pass() {
        let (engine, transport, _clock) = engine();
        transport.fail_next_upload("overloaded");

        let result = engine.sync_data(&snapshot(&[("a", "alpha")])).await;

        assert!(result.error().unwrap().contains("overloaded"));
        let state = engine.state();
        assert_eq!(state.status, SyncStatus::Failed);
        assert!(!state.is_active);
        assert_eq!(engine.pending_changes().await, 1);
        assert_eq!(engine.statistics().await.failed_syncs, 1);
    }

    #[tokio::test]
    async fn rejected_items_stay_pending() {
        let (engine, transport, _clock) = engine();
        transport.reject_key("b");

        let result = engine
            .sync_data(&snapshot(&[("a", "alpha"), ("b", "beta")]))
            .await;

        assert!(matches!(result, SyncResult::Partial(_)));
        assert_eq!(engine.pending_changes().await, 2);
    }

    #[tokio::test]
    async fn merge_writes_merged_value_back_to_ledger() {
        let (engine, transport, _clock) = engine();
        let engine =
            engine.with_resolver(ConflictResolver::new().with_policy(AlwaysMerge));
        engine
            .record_change(LocalChange::new("a", "short", ChangeOperation::Update, 100))
            .await;
        transport.set_remote_change(remote("a", "much longer", 200));

        let result = engine.sync_data(&HashMap::new()).await;

        assert_eq!(result.report().unwrap().conflicts_resolved, 1);
        let pending = engine.pending_snapshot().await;
        assert_eq!(pending[0].value, "much longer");
        assert_eq!(pending[0].timestamp, 200);
    }

    #[tokio::test]
    async fn unresolved_conflicts_are_reported_not_applied() {
        let (engine, transport, _clock) = engine();
        let engine =
            engine.with_resolver(ConflictResolver::new().with_policy(NeverDecide));
        engine
            .record_change(LocalChange::new("a", "v1", ChangeOperation::Update, 100))
            .await;
        transport.set_remote_change(remote("a", "v2", 200));

        let result = engine.sync_data(&HashMap::new()).await;

        match result {
            SyncResult::Partial(report) => {
                assert_eq!(report.conflicts_detected, 1);
                assert_eq!(report.conflicts_resolved, 0);
                assert!(report.errors[0].contains("Unresolved conflict for key a"));
            }
            other => panic!("expected partial, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn completed_sync_updates_state_and_statistics() {
        let (engine, transport, clock) = engine();
        transport.set_remote_change(remote("a", "remote", 50));
        engine
            .record_change(LocalChange::new("a", "local", ChangeOperation::Update, 900))
            .await;
        clock.set(2_000);

        engine.sync_data(&snapshot(&[("a", "local")])).await;

        let state = engine.state();
        assert_eq!(state.status, SyncStatus::Completed);
        assert_eq!(state.last_sync_time, Some(2_000));
        assert_eq!(state.conflicts_detected, 1);
        assert_eq!(engine.last_sync_time(), Some(2_000));

        let stats = engine.statistics().await;
        assert_eq!(stats.total_syncs, 1);
        assert_eq!(stats.successful_syncs, 1);
        assert_eq!(stats.total_items_synced, 1);
        assert_eq!(stats.conflicts_resolved, 1);
    }

    // ===========================================
    // Incremental Sync Tests
    // ===========================================

    #[tokio::test]
    async fn incremental_with_nothing_newer_is_up_to_date() {
        let (engine, transport, _clock) = engine();
        engine
            .record_change(LocalChange::new("a", "v", ChangeOperation::Update, 100))
            .await;

        let result = engine.incremental_sync(100).await;

        assert_eq!(result, SyncResult::UpToDate);
        assert_eq!(result.items_synced(), 0);
        assert_eq!(engine.state().status, SyncStatus::UpToDate);
        assert!(transport.uploads().is_empty());
    }

    #[tokio::test]
    async fn incremental_uploads_only_newer_changes() {
        let (engine, transport, _clock) = engine();
        engine
            .record_change(LocalChange::new("old", "v", ChangeOperation::Update, 100))
            .await;
        engine
            .record_change(LocalChange::new("new", "v", ChangeOperation::Update, 300))
            .await;

        let result = engine.incremental_sync(200).await;

        assert_eq!(result.items_synced(), 1);
        let uploads = transport.uploads();
        assert_eq!(uploads[0].keys().collect::<Vec<_>>(), vec!["new"]);
        assert_eq!(transport.fetch_calls(), 0);
        let pending = engine.pending_snapshot().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].key, "old");
    }

    // ===========================================
    // Offline Sync Tests
    // ===========================================

    #[tokio::test]
    async fn offline_sync_on_empty_ledger_is_noop() {
        let (engine, transport, _clock) = engine();

        let result = engine.offline_sync().await;

        assert_eq!(result, SyncResult::Success(SyncReport::default()));
        assert_eq!(engine.state().status, SyncStatus::Idle);
        assert!(transport.uploads().is_empty());
    }

    #[tokio::test]
    async fn offline_sync_batches_by_priority() {
        let settings = SyncSettings {
            offline_batch_size: 2,
            ..SyncSettings::default()
        };
        let (engine, transport, clock) = engine_with(settings);
        for (key, priority) in [("p2", 2), ("p0-a", 0), ("p1", 1), ("p0-b", 0), ("p3", 3)] {
            clock.advance(1);
            engine
                .add_local_change_with_priority(key, "v", ChangeOperation::Update, priority)
                .await;
        }

        let result = engine.offline_sync().await;

        assert_eq!(result.items_synced(), 5);
        let uploads = transport.uploads();
        assert_eq!(uploads.len(), 3);
        assert!(uploads.iter().all(|p| p.batch_count == 3));
        assert_eq!(uploads[2].batch_index, 2);
        let order: Vec<&str> = uploads.iter().flat_map(|p| p.keys()).collect();
        assert_eq!(order, vec!["p0-a", "p0-b", "p1", "p2", "p3"]);
        assert_eq!(engine.pending_changes().await, 0);
        assert_eq!(engine.state().status, SyncStatus::Completed);
    }

    #[tokio::test]
    async fn offline_sync_flags_large_changes_compressed() {
        let (engine, transport, _clock) = engine();
        engine
            .add_local_change("small", "tiny", ChangeOperation::Update)
            .await;
        engine
            .add_local_change("large", &"x".repeat(4096), ChangeOperation::Update)
            .await;

        engine.offline_sync().await;

        let items = &transport.uploads()[0].items;
        let flag = |key: &str| items.iter().find(|i| i.key == key).unwrap().compressed;
        assert!(!flag("small"));
        assert!(flag("large"));
    }

    #[tokio::test]
    async fn failed_batch_keeps_ledger() {
        let settings = SyncSettings {
            offline_batch_size: 1,
            ..SyncSettings::default()
        };
        let (engine, transport, clock) = engine_with(settings);
        engine.add_local_change("a", "v", ChangeOperation::Update).await;
        clock.advance(1);
        engine.add_local_change("b", "v", ChangeOperation::Update).await;
        transport.fail_next_upload("503");

        let result = engine.offline_sync().await;

        assert!(!result.is_success());
        assert_eq!(engine.pending_changes().await, 2);
        assert_eq!(engine.state().status, SyncStatus::Failed);
    }

    // ===========================================
    // Ledger Bound Tests
    // ===========================================

    #[tokio::test]
    async fn ledger_evicts_oldest_when_full() {
        let settings = SyncSettings {
            max_offline_changes: 3,
            ..SyncSettings::default()
        };
        let (engine, _transport, clock) = engine_with(settings);
        for key in ["a", "b", "c", "d", "e"] {
            clock.advance(10);
            engine.add_local_change(key, "v", ChangeOperation::Update).await;
        }

        let keys: Vec<String> = engine
            .pending_snapshot()
            .await
            .into_iter()
            .map(|c| c.key)
            .collect();
        assert_eq!(keys, vec!["c", "d", "e"]);
        assert_eq!(engine.state().pending_changes, 3);
    }

    // ===========================================
    // Cancellation Tests
    // ===========================================

    #[tokio::test]
    async fn cancel_when_idle_is_noop() {
        let (engine, _transport, _clock) = engine();

        assert!(!engine.cancel_sync().await);

        let state = engine.state();
        assert_eq!(state.status, SyncStatus::Idle);
        assert!(state.error.is_none());
        assert_eq!(engine.statistics().await.cancelled_syncs, 0);
    }

    #[tokio::test]
    async fn cancelled_pass_discards_results() {
        let (engine, transport, _clock) = engine();
        let engine = Arc::new(engine);
        transport.set_remote_change(remote("a", "v2", 200));
        transport.hold_fetch();

        let running = Arc::clone(&engine);
        let handle = tokio::spawn(async move {
            running.sync_data(&snapshot(&[("a", "alpha")])).await
        });
        transport.fetch_started().await;

        assert!(engine.cancel_sync().await);
        let state = engine.state();
        assert_eq!(state.status, SyncStatus::Cancelled);
        assert_eq!(state.error.as_deref(), Some(CANCEL_MESSAGE));

        transport.release_fetch();
        let result = handle.await.unwrap();

        assert_eq!(result, SyncResult::Error("Sync cancelled".into()));
        assert!(transport.uploads().is_empty());
        assert_eq!(engine.state().status, SyncStatus::Cancelled);
        assert_eq!(engine.last_sync_time(), None);
        let stats = engine.statistics().await;
        assert_eq!(stats.cancelled_syncs, 1);
        assert_eq!(stats.successful_syncs, 0);
    }

    #[tokio::test]
    async fn cancelled_incremental_pass_ends_failed() {
        let (engine, transport, clock) = engine();
        let engine = Arc::new(engine);
        engine.add_local_change("a", "v", ChangeOperation::Update).await;
        clock.advance(10);
        transport.hold_upload();

        let running = Arc::clone(&engine);
        let handle = tokio::spawn(async move { running.incremental_sync(0).await });
        transport.upload_started().await;

        assert!(engine.cancel_sync().await);
        let state = engine.state();
        assert_eq!(state.status, SyncStatus::Failed);
        assert!(!state.is_active);
        assert_eq!(state.error.as_deref(), Some(CANCEL_MESSAGE));

        transport.release_upload();
        assert_eq!(
            handle.await.unwrap(),
            SyncResult::Error("Sync cancelled".into())
        );
        assert_eq!(engine.state().status, SyncStatus::Failed);
        assert_eq!(engine.pending_changes().await, 1);
        assert_eq!(engine.statistics().await.cancelled_syncs, 1);
    }

    #[tokio::test]
    async fn cancelled_offline_pass_ends_failed() {
        let (engine, transport, _clock) = engine();
        let engine = Arc::new(engine);
        engine.add_local_change("a", "v", ChangeOperation::Update).await;
        transport.hold_upload();

        let running = Arc::clone(&engine);
        let handle = tokio::spawn(async move { running.offline_sync().await });
        transport.upload_started().await;

        assert!(engine.cancel_sync().await);
        assert_eq!(engine.state().status, SyncStatus::Failed);

        transport.release_upload();
        assert_eq!(
            handle.await.unwrap(),
            SyncResult::Error("Sync cancelled".into())
        );
        assert_eq!(engine.pending_changes().await, 1);
    }

    #[tokio::test]
    async fn second_pass_rejected_while_running() {
        let (engine, transport, _clock) = engine();
        let engine = Arc::new(engine);
        transport.hold_fetch();

        let running = Arc::clone(&engine);
        let handle = tokio::spawn(async move { running.sync_data(&HashMap::new()).await });
        transport.fetch_started().await;

        let second = engine.incremental_sync(0).await;
        assert_eq!(second, SyncResult::Error("sync already in progress".into()));

        transport.release_fetch();
        assert!(handle.await.unwrap().is_success());
    }

    // ===========================================
    // Force Sync and Observation Tests
    // ===========================================

    #[tokio::test]
    async fn force_sync_resets_ledgers_and_state() {
        let (engine, transport, clock) = engine();
        engine.add_local_change("stale", "v", ChangeOperation::Update).await;
        engine.sync_data(&HashMap::new()).await;
        engine.add_local_change("stale-2", "v", ChangeOperation::Update).await;
        clock.advance(5);

        let result = engine.force_sync(&snapshot(&[("fresh", "v")])).await;

        assert!(result.is_success());
        let last = transport.uploads().pop().unwrap();
        assert_eq!(last.keys().collect::<Vec<_>>(), vec!["fresh"]);
        assert_eq!(engine.pending_changes().await, 0);
        let state = engine.state();
        assert_eq!(state.items_synced, 1);
        assert_eq!(state.last_sync_time, Some(1_005));
    }

    #[tokio::test]
    async fn force_sync_cancels_running_pass_first() {
        let (engine, transport, _clock) = engine();
        let engine = Arc::new(engine);
        transport.hold_fetch();

        let running = Arc::clone(&engine);
        let handle = tokio::spawn(async move { running.sync_data(&HashMap::new()).await });
        transport.fetch_started().await;

        let mut rx = engine.subscribe();
        let forcing = Arc::clone(&engine);
        let forced =
            tokio::spawn(async move { forcing.force_sync(&snapshot(&[("fresh", "v")])).await });

        rx.wait_for(|state| state.generation > 1).await.unwrap();
        transport.release_fetch();
        assert_eq!(
            handle.await.unwrap(),
            SyncResult::Error("Sync cancelled".into())
        );
        assert!(forced.await.unwrap().is_success());
        assert_eq!(engine.state().status, SyncStatus::Completed);
        assert_eq!(engine.statistics().await.cancelled_syncs, 1);
    }

    #[tokio::test]
    async fn subscribers_see_published_state() {
        let (engine, _transport, _clock) = engine();
        let mut rx = engine.subscribe();

        engine.sync_data(&snapshot(&[("a", "v")])).await;

        assert!(rx.has_changed().unwrap());
        let state = rx.borrow_and_update().clone();
        assert_eq!(state.status, SyncStatus::Completed);
        assert_eq!(state.generation, 1);
    }
}
