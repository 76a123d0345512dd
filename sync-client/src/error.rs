//! Error types for sync-client.
//!
//! `EngineError` is what the engines' internal steps return. Public engine
//! operations never return it directly; they turn it into the matching
//! result enum (`SyncResult::Error`, `CacheLookup::Error`, ...).

use sync_core::{CodecError, QueueError, StoreError};
use sync_types::TypesError;
use thiserror::Error;

use crate::storage::StorageError;
use crate::transport::TransportError;

/// Errors that can occur inside an engine operation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Encoding or decoding of a data-model type failed.
    #[error("serialization error: {0}")]
    Types(#[from] TypesError),

    /// Compression codec error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Cache store rejected an entry.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Offline queue rejected a request.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Conflict resolutions could not be applied.
    #[error("failed to apply resolutions: {0}")]
    Apply(String),

    /// A sync pass is already running.
    #[error("sync already in progress")]
    AlreadyRunning,

    /// The pass was cancelled while it was suspended.
    #[error("Sync cancelled")]
    Cancelled,
}
