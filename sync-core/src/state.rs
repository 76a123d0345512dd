//! Sync status state machine for tidesync.
//!
//! This module provides a pure, side-effect-free state machine for the
//! lifecycle of a sync pass, plus the observable [`SyncState`] record the
//! engine publishes after every transition.
//!
//! ```text
//! IDLE ──StartFull────────▶ SYNCING ─────────▶ COMPLETED | FAILED | CANCELLED
//! IDLE ──StartIncremental─▶ INCREMENTAL_SYNC ▶ UP_TO_DATE | COMPLETED | FAILED
//! IDLE ──StartOffline─────▶ OFFLINE_SYNC ────▶ COMPLETED | FAILED
//! ```
//!
//! Every terminal state accepts the same start transitions as IDLE.

use serde::{Deserialize, Serialize};
use sync_types::Timestamp;

/// Sync lifecycle status - NO I/O, just state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    /// No sync has run yet.
    #[default]
    Idle,
    /// Full bidirectional sync in progress.
    Syncing,
    /// Incremental upload of recent changes in progress.
    IncrementalSync,
    /// Batched upload of the whole ledger in progress.
    OfflineSync,
    /// Last pass finished.
    Completed,
    /// Last pass failed.
    Failed,
    /// Last pass was cancelled.
    Cancelled,
    /// Incremental pass found nothing to do.
    UpToDate,
}

/// Inputs to the sync state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTransition {
    /// Start a full sync.
    StartFull,
    /// Start an incremental sync.
    StartIncremental,
    /// Start an offline (batched) sync.
    StartOffline,
    /// The running pass finished.
    Complete,
    /// The running incremental pass had nothing to upload.
    NothingToDo,
    /// The running pass failed.
    Fail,
    /// The running pass was cancelled.
    Cancel,
}

impl SyncStatus {
    /// Process a transition and return the new status.
    ///
    /// This is a pure function. Transitions not in the lifecycle diagram
    /// leave the status unchanged.
    pub fn on_event(self, event: SyncTransition) -> Self {
        use SyncTransition as T;
        match (self, event) {
            (s, T::StartFull) if s.can_start() => Self::Syncing,
            (s, T::StartIncremental) if s.can_start() => Self::IncrementalSync,
            (s, T::StartOffline) if s.can_start() => Self::OfflineSync,

            (Self::Syncing | Self::IncrementalSync | Self::OfflineSync, T::Complete) => {
                Self::Completed
            }
            (Self::Syncing | Self::IncrementalSync | Self::OfflineSync, T::Fail) => Self::Failed,
            (Self::IncrementalSync, T::NothingToDo) => Self::UpToDate,
            (Self::Syncing, T::Cancel) => Self::Cancelled,

            // Invalid transitions - stay in current state
            (state, _) => state,
        }
    }

    /// Check if a pass is running.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Syncing | Self::IncrementalSync | Self::OfflineSync
        )
    }

    /// The transition that stops this pass on a user cancel.
    ///
    /// Only a full sync has a cancelled outcome; incremental and offline
    /// passes end as failed. Returns `None` when no pass is running.
    pub fn interrupt(&self) -> Option<SyncTransition> {
        match self {
            Self::Syncing => Some(SyncTransition::Cancel),
            Self::IncrementalSync | Self::OfflineSync => Some(SyncTransition::Fail),
            _ => None,
        }
    }

    /// Check if a new pass may start from this status.
    pub fn can_start(&self) -> bool {
        !self.is_active()
    }
}

/// Observable sync state, published as a whole after every change.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncState {
    /// Whether a pass is running.
    pub is_active: bool,
    /// Current lifecycle status.
    pub status: SyncStatus,
    /// When the last pass finished successfully.
    pub last_sync_time: Option<Timestamp>,
    /// When the current (or last) pass started.
    pub sync_start_time: Option<Timestamp>,
    /// Pending local changes in the ledger.
    pub pending_changes: usize,
    /// Items uploaded or applied across all passes.
    pub items_synced: u64,
    /// Conflicts detected across all passes.
    pub conflicts_detected: u64,
    /// Conflicts resolved across all passes.
    pub conflicts_resolved: u64,
    /// Generation of the pass that last wrote this state.
    pub generation: u64,
    /// Error from the last pass, cleared when a new pass starts.
    pub error: Option<String>,
}

impl SyncState {
    /// Apply a transition, keeping `is_active` in step with `status`.
    ///
    /// Starting a pass clears the previous error.
    pub fn transition(mut self, event: SyncTransition) -> Self {
        let next = self.status.on_event(event);
        if next.is_active() && !self.status.is_active() {
            self.error = None;
        }
        self.status = next;
        self.is_active = next.is_active();
        self
    }
}
