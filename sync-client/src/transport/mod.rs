//! Transport abstraction for tidesync.
//!
//! This module provides the remote-facing collaborator the engines drive.
//! The engines never talk to the network directly; an application plugs in
//! its own HTTP/RPC client behind [`Transport`].
//!
//! # Design
//!
//! The transport trait is async and request-oriented:
//! - `fetch_remote_changes()` returns the remote side of a sync pass
//! - `upload_changes()` sends a batch of checksummed local changes
//! - `execute()` performs a queued network request and returns its body
//!
//! Timeouts and per-call retry with backoff belong to the implementation.
//! The engines catch every error and turn it into a result value.
//!
//! # Example
//!
//! ```ignore
//! let transport = MockTransport::new();
//! transport.set_remote_change(remote_change);
//! let engine = SyncEngine::new(transport, SyncSettings::default());
//! let result = engine.sync_data(&snapshot).await;
//! ```

mod mock;

pub use mock::MockTransport;

use std::collections::HashMap;

use async_trait::async_trait;
use sync_types::{NetworkRequest, RemoteChange, UploadPayload, UploadStats};
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not reach the remote.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Remote answered with an error status.
    #[error("server error {status}: {message}")]
    Server {
        /// Status code reported by the remote.
        status: u16,
        /// Error body or reason phrase.
        message: String,
    },

    /// Response could not be decoded.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Request timed out.
    #[error("request timeout")]
    Timeout,
}

/// Remote collaborator for sync passes and queued requests.
///
/// Implementations handle the underlying mechanism (HTTP, RPC, mock, etc).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch every change the remote holds for this client, keyed by key.
    async fn fetch_remote_changes(&self) -> Result<HashMap<String, RemoteChange>, TransportError>;

    /// Upload one batch of local changes.
    async fn upload_changes(&self, payload: &UploadPayload) -> Result<UploadStats, TransportError>;

    /// Execute a network request and return the response body.
    async fn execute(&self, request: &NetworkRequest) -> Result<Vec<u8>, TransportError>;
}
