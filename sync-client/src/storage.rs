//! Durable key/value persistence for cache snapshots.
//!
//! The cache engine only needs to park an exported blob somewhere and get
//! it back later. Applications implement [`CacheStorage`] over whatever
//! backend they own; [`MemoryStorage`] is provided for testing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use thiserror::Error;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Backend rejected or failed the operation.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Backend I/O failure.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Trait for blob persistence keyed by name.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Store a blob under `key`, replacing any previous blob.
    async fn save(&self, key: &str, blob: &[u8]) -> Result<(), StorageError>;

    /// Load the blob stored under `key`.
    ///
    /// Returns `Ok(None)` if nothing is stored under the key.
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Remove the blob stored under `key`.
    ///
    /// Returns `Ok(true)` if removed, `Ok(false)` if not found.
    async fn remove(&self, key: &str) -> Result<bool, StorageError>;
}

/// In-memory storage for testing.
///
/// Stores blobs in a thread-safe HashMap. Not persistent - all data
/// is lost when the last clone is dropped.
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    blobs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    /// Create a new empty memory storage.
    pub fn new() -> Self {
        Self::default()
    }

    fn blobs(&self) -> MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.blobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the number of blobs currently stored.
    pub fn len(&self) -> usize {
        self.blobs().len()
    }

    /// Check if the storage is empty.
    pub fn is_empty(&self) -> bool {
        self.blobs().is_empty()
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn save(&self, key: &str, blob: &[u8]) -> Result<(), StorageError> {
        self.blobs().insert(key.to_string(), blob.to_vec());
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.blobs().get(key).cloned())
    }

    async fn remove(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.blobs().remove(key).is_some())
    }
}
