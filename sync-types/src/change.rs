//! Ledger records and the upload wire format.
//!
//! Local mutations are recorded as [`LocalChange`]s until a sync pass
//! uploads them. The transport reports remote state as [`RemoteChange`]s.
//! Uploads are sent as an [`UploadPayload`] of checksummed [`UploadItem`]s.

use serde::{Deserialize, Serialize};

use crate::{Timestamp, TypesError};

/// Kind of mutation applied to a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeOperation {
    /// Key was created.
    Create,
    /// Existing key was updated.
    Update,
    /// Key was deleted.
    Delete,
}

/// A pending local mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalChange {
    /// Key the mutation applies to.
    pub key: String,
    /// New value (empty for deletes).
    pub value: String,
    /// Mutation kind.
    pub operation: ChangeOperation,
    /// When the mutation was recorded.
    pub timestamp: Timestamp,
    /// Upload ordering hint, lower values upload first.
    pub priority: u8,
    /// Failed upload attempts so far.
    pub retry_count: u32,
}

impl LocalChange {
    /// Create a new local change with default priority.
    pub fn new(
        key: impl Into<String>,
        value: impl Into<String>,
        operation: ChangeOperation,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            operation,
            timestamp,
            priority: 0,
            retry_count: 0,
        }
    }

    /// Set the upload priority.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Size in bytes of this change encoded as MessagePack.
    pub fn serialized_size(&self) -> Result<usize, TypesError> {
        rmp_serde::to_vec(self)
            .map(|bytes| bytes.len())
            .map_err(TypesError::Serialization)
    }
}

/// A change reported by the remote data source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteChange {
    /// Key the change applies to.
    pub key: String,
    /// Remote value (empty for deletes).
    pub value: String,
    /// Mutation kind.
    pub operation: ChangeOperation,
    /// Remote modification time.
    pub timestamp: Timestamp,
    /// Server-assigned identifier for this revision.
    pub server_id: String,
}

/// One record in an upload payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadItem {
    /// Key being uploaded.
    pub key: String,
    /// Value being uploaded.
    pub value: String,
    /// Mutation kind.
    pub operation: ChangeOperation,
    /// Local modification time.
    pub timestamp: Timestamp,
    /// Hex-encoded SHA-256 of `value`.
    pub checksum: String,
    /// Whether the item was flagged for compressed transfer.
    pub compressed: bool,
}

/// A batch of items sent to the remote in one upload call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadPayload {
    /// Items in this batch.
    pub items: Vec<UploadItem>,
    /// Zero-based batch index within the upload.
    pub batch_index: u32,
    /// Total number of batches in the upload.
    pub batch_count: u32,
    /// When the payload was built.
    pub created_at: Timestamp,
}

impl UploadPayload {
    /// Create a single-batch payload.
    pub fn single(items: Vec<UploadItem>, created_at: Timestamp) -> Self {
        Self {
            items,
            batch_index: 0,
            batch_count: 1,
            created_at,
        }
    }

    /// Number of items in the payload.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if the payload carries no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Keys carried by this payload.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|item| item.key.as_str())
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TypesError> {
        rmp_serde::to_vec(self).map_err(TypesError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TypesError> {
        rmp_serde::from_slice(bytes).map_err(TypesError::Deserialization)
    }
}

/// Outcome reported by the remote for an upload call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UploadStats {
    /// Items the remote accepted.
    pub accepted: usize,
    /// Items the remote rejected.
    pub rejected: usize,
}

impl UploadStats {
    /// Merge the counts from another batch.
    pub fn absorb(&mut self, other: UploadStats) {
        self.accepted += other.accepted;
        self.rejected += other.rejected;
    }
}
