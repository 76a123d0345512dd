//! Conflict detection and resolution.
//!
//! A conflict exists when a key has both a pending local change and a
//! remote change, and the two disagree on timestamp. Resolution is a pure
//! decision: [`ConflictResolver::resolve`] never touches the ledger.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sync_types::{ChangeOperation, LocalChange, RemoteChange};

use crate::ledger::ChangeLedger;

/// Shape of a conflict, derived from the two sides' operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictType {
    /// Both sides updated the key.
    UpdateUpdate,
    /// Local updated, remote deleted.
    UpdateDelete,
    /// Local deleted, remote updated.
    DeleteUpdate,
    /// Any other combination.
    Other,
}

impl ConflictType {
    /// Classify a (local, remote) operation pair.
    pub fn derive(local: ChangeOperation, remote: ChangeOperation) -> Self {
        use ChangeOperation::{Delete, Update};
        match (local, remote) {
            (Delete, Update) => Self::DeleteUpdate,
            (Update, Delete) => Self::UpdateDelete,
            (Update, Update) => Self::UpdateUpdate,
            _ => Self::Other,
        }
    }
}

/// A key whose local and remote versions disagree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataConflict {
    /// Conflicting key.
    pub key: String,
    /// Pending local change.
    pub local: LocalChange,
    /// Remote change.
    pub remote: RemoteChange,
    /// Derived conflict shape.
    pub conflict_type: ConflictType,
}

impl DataConflict {
    /// Build a conflict, deriving its type from the two operations.
    pub fn new(local: LocalChange, remote: RemoteChange) -> Self {
        Self {
            key: local.key.clone(),
            conflict_type: ConflictType::derive(local.operation, remote.operation),
            local,
            remote,
        }
    }
}

/// Outcome chosen for a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Resolution {
    /// Keep the local value.
    UseLocal,
    /// Keep the remote value.
    UseRemote,
    /// Combine both values with the merge strategy.
    Merge,
    /// No decision was made.
    Unresolved,
}

/// A conflict together with its resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictResolutionEntry {
    /// The conflict that was resolved.
    pub conflict: DataConflict,
    /// Chosen outcome.
    pub resolution: Resolution,
    /// Value of the winning side, `None` when unresolved.
    pub resolved_value: Option<String>,
}

/// Combines two conflicting values into one.
pub trait MergeStrategy: Send + Sync + fmt::Debug {
    /// Produce the merged value.
    fn merge(&self, local: &str, remote: &str) -> String;
}

/// Keeps whichever value is textually longer.
///
/// Length is counted in characters. Equal lengths return the remote value.
/// This is a tie-break heuristic, not semantic merging.
#[derive(Debug, Default, Clone, Copy)]
pub struct LongerValueMerge;

impl MergeStrategy for LongerValueMerge {
    fn merge(&self, local: &str, remote: &str) -> String {
        if local.chars().count() > remote.chars().count() {
            local.to_string()
        } else {
            remote.to_string()
        }
    }
}

/// Decides which side of a conflict wins.
pub trait ConflictPolicy: Send + Sync + fmt::Debug {
    /// Pick a resolution for the conflict.
    fn decide(&self, conflict: &DataConflict) -> Resolution;
}

/// Default policy: newest update wins, updates beat deletes.
///
/// | Conflict | Resolution |
/// |---|---|
/// | UPDATE_UPDATE | larger timestamp wins, ties go to remote |
/// | UPDATE_DELETE | local |
/// | DELETE_UPDATE | remote |
/// | OTHER | local |
#[derive(Debug, Default, Clone, Copy)]
pub struct TimestampPolicy;

impl ConflictPolicy for TimestampPolicy {
    fn decide(&self, conflict: &DataConflict) -> Resolution {
        match conflict.conflict_type {
            ConflictType::UpdateUpdate => {
                if conflict.local.timestamp > conflict.remote.timestamp {
                    Resolution::UseLocal
                } else {
                    Resolution::UseRemote
                }
            }
            ConflictType::UpdateDelete => Resolution::UseLocal,
            ConflictType::DeleteUpdate => Resolution::UseRemote,
            ConflictType::Other => Resolution::UseLocal,
        }
    }
}

/// Pure conflict resolver.
#[derive(Debug)]
pub struct ConflictResolver {
    policy: Box<dyn ConflictPolicy>,
    merge: Box<dyn MergeStrategy>,
}

impl ConflictResolver {
    /// Resolver with [`TimestampPolicy`] and [`LongerValueMerge`].
    pub fn new() -> Self {
        Self {
            policy: Box::new(TimestampPolicy),
            merge: Box::new(LongerValueMerge),
        }
    }

    /// Replace the decision policy.
    pub fn with_policy(mut self, policy: impl ConflictPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    /// Replace the merge strategy.
    pub fn with_merge_strategy(mut self, merge: impl MergeStrategy + 'static) -> Self {
        self.merge = Box::new(merge);
        self
    }

    /// Resolve a conflict with the configured policy.
    pub fn resolve(&self, conflict: DataConflict) -> ConflictResolutionEntry {
        let resolution = self.policy.decide(&conflict);
        self.resolve_as(conflict, resolution)
    }

    /// Build the resolution entry for an already chosen outcome.
    pub fn resolve_as(
        &self,
        conflict: DataConflict,
        resolution: Resolution,
    ) -> ConflictResolutionEntry {
        let resolved_value = match resolution {
            Resolution::UseLocal => Some(conflict.local.value.clone()),
            Resolution::UseRemote => Some(conflict.remote.value.clone()),
            Resolution::Merge => Some(self.merge_values(&conflict.local.value, &conflict.remote.value)),
            Resolution::Unresolved => None,
        };
        ConflictResolutionEntry {
            conflict,
            resolution,
            resolved_value,
        }
    }

    /// Merge two values with the configured strategy.
    pub fn merge_values(&self, local: &str, remote: &str) -> String {
        self.merge.merge(local, remote)
    }
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Every key present in both the ledger and the remote set whose timestamps
/// differ, ordered by key.
pub fn detect_conflicts(
    ledger: &ChangeLedger,
    remote: &HashMap<String, RemoteChange>,
) -> Vec<DataConflict> {
    let mut conflicts: Vec<DataConflict> = remote
        .iter()
        .filter_map(|(key, remote_change)| {
            let local = ledger.get(key)?;
            (local.timestamp != remote_change.timestamp)
                .then(|| DataConflict::new(local.clone(), remote_change.clone()))
        })
        .collect();
    conflicts.sort_by(|a, b| a.key.cmp(&b.key));
    conflicts
}
