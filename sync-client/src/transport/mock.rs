//! Mock transport for testing.
//!
//! Serves canned remote changes and responses, and records uploads and
//! executed requests for verification.

use super::{Transport, TransportError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use sync_types::{NetworkRequest, RemoteChange, UploadPayload, UploadStats};
use tokio::sync::Notify;

/// Mock transport for testing.
///
/// Clones share state, so a test can keep a handle after moving the
/// transport into an engine.
#[derive(Debug, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    remote_changes: HashMap<String, RemoteChange>,
    responses: HashMap<String, Vec<u8>>,
    uploads: Vec<UploadPayload>,
    executed: Vec<NetworkRequest>,
    fetch_calls: usize,
    rejected_keys: HashSet<String>,
    failing_urls: HashSet<String>,
    fail_next_fetch: Option<String>,
    fail_next_upload: Option<String>,
    fail_next_execute: Option<String>,
    fetch_gate: Option<Arc<CallGate>>,
    upload_gate: Option<Arc<CallGate>>,
}

/// Holds a transport call open until the test releases it.
///
/// Once released the gate stays open, so every parked call continues.
#[derive(Debug, Default)]
struct CallGate {
    started: Notify,
    release: Notify,
    released: AtomicBool,
}

impl CallGate {
    async fn pass(&self) {
        self.started.notify_one();
        loop {
            let notified = self.release.notified();
            if self.released.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }

    fn open(&self) {
        self.released.store(true, Ordering::SeqCst);
        self.release.notify_waiters();
    }
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockTransportInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a change to the set returned by `fetch_remote_changes()`.
    pub fn set_remote_change(&self, change: RemoteChange) {
        let mut inner = self.lock();
        inner.remote_changes.insert(change.key.clone(), change);
    }

    /// Set the body returned when executing a request for `url`.
    pub fn set_response(&self, url: &str, body: Vec<u8>) {
        let mut inner = self.lock();
        inner.responses.insert(url.to_string(), body);
    }

    /// Make uploads report `key` as rejected.
    pub fn reject_key(&self, key: &str) {
        let mut inner = self.lock();
        inner.rejected_keys.insert(key.to_string());
    }

    /// Make every request for `url` fail until `reset()`.
    pub fn fail_url(&self, url: &str) {
        let mut inner = self.lock();
        inner.failing_urls.insert(url.to_string());
    }

    /// Cause the next fetch to fail with the given error.
    pub fn fail_next_fetch(&self, error: &str) {
        let mut inner = self.lock();
        inner.fail_next_fetch = Some(error.to_string());
    }

    /// Cause the next upload to fail with the given error.
    pub fn fail_next_upload(&self, error: &str) {
        let mut inner = self.lock();
        inner.fail_next_upload = Some(error.to_string());
    }

    /// Cause the next request execution to fail with the given error.
    pub fn fail_next_execute(&self, error: &str) {
        let mut inner = self.lock();
        inner.fail_next_execute = Some(error.to_string());
    }

    /// Park every following fetch until `release_fetch()` is called.
    pub fn hold_fetch(&self) {
        let mut inner = self.lock();
        inner.fetch_gate = Some(Arc::new(CallGate::default()));
    }

    /// Wait until a held fetch has started.
    pub async fn fetch_started(&self) {
        let gate = self.lock().fetch_gate.clone();
        if let Some(gate) = gate {
            gate.started.notified().await;
        }
    }

    /// Let the held fetch continue and stop holding later ones.
    pub fn release_fetch(&self) {
        let gate = self.lock().fetch_gate.take();
        if let Some(gate) = gate {
            gate.open();
        }
    }

    /// Park every following upload until `release_upload()` is called.
    pub fn hold_upload(&self) {
        let mut inner = self.lock();
        inner.upload_gate = Some(Arc::new(CallGate::default()));
    }

    /// Wait until a held upload has started.
    pub async fn upload_started(&self) {
        let gate = self.lock().upload_gate.clone();
        if let Some(gate) = gate {
            gate.started.notified().await;
        }
    }

    /// Let the held upload continue and stop holding later ones.
    pub fn release_upload(&self) {
        let gate = self.lock().upload_gate.take();
        if let Some(gate) = gate {
            gate.open();
        }
    }

    /// Every payload that was uploaded, in order.
    pub fn uploads(&self) -> Vec<UploadPayload> {
        self.lock().uploads.clone()
    }

    /// Every request that was executed, in order.
    pub fn executed_requests(&self) -> Vec<NetworkRequest> {
        self.lock().executed.clone()
    }

    /// Number of `fetch_remote_changes()` calls.
    pub fn fetch_calls(&self) -> usize {
        self.lock().fetch_calls
    }

    /// Clear all state (remote changes, responses, recordings, failures).
    pub fn reset(&self) {
        let mut inner = self.lock();
        *inner = MockTransportInner::default();
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn fetch_remote_changes(&self) -> Result<HashMap<String, RemoteChange>, TransportError> {
        let gate = {
            let mut inner = self.lock();
            inner.fetch_calls += 1;
            inner.fetch_gate.clone()
        };
        if let Some(gate) = gate {
            gate.pass().await;
        }

        let mut inner = self.lock();

        // Check for forced failure
        if let Some(error) = inner.fail_next_fetch.take() {
            return Err(TransportError::ConnectionFailed(error));
        }

        Ok(inner.remote_changes.clone())
    }

    async fn upload_changes(&self, payload: &UploadPayload) -> Result<UploadStats, TransportError> {
        let gate = self.lock().upload_gate.clone();
        if let Some(gate) = gate {
            gate.pass().await;
        }

        let mut inner = self.lock();

        // Check for forced failure
        if let Some(error) = inner.fail_next_upload.take() {
            return Err(TransportError::Server {
                status: 503,
                message: error,
            });
        }

        // Record what actually crossed the wire
        let received = payload
            .to_bytes()
            .and_then(|bytes| UploadPayload::from_bytes(&bytes))
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
        let rejected = received
            .keys()
            .filter(|key| inner.rejected_keys.contains(*key))
            .count();
        inner.uploads.push(received);
        Ok(UploadStats {
            accepted: payload.len() - rejected,
            rejected,
        })
    }

    async fn execute(&self, request: &NetworkRequest) -> Result<Vec<u8>, TransportError> {
        let mut inner = self.lock();
        inner.executed.push(request.clone());

        // Check for forced failure
        if let Some(error) = inner.fail_next_execute.take() {
            return Err(TransportError::ConnectionFailed(error));
        }
        if inner.failing_urls.contains(&request.url) {
            return Err(TransportError::Timeout);
        }

        inner
            .responses
            .get(&request.url)
            .cloned()
            .ok_or_else(|| TransportError::Server {
                status: 404,
                message: format!("no response for {}", request.url),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_types::{ChangeOperation, UploadItem};

    fn remote(key: &str, ts: u64) -> RemoteChange {
        RemoteChange {
            key: key.to_string(),
            value: format!("remote-{key}"),
            operation: ChangeOperation::Update,
            timestamp: ts,
            server_id: format!("srv-{key}"),
        }
    }

    fn payload(keys: &[&str]) -> UploadPayload {
        let items = keys
            .iter()
            .map(|key| UploadItem {
                key: key.to_string(),
                value: "v".into(),
                operation: ChangeOperation::Update,
                timestamp: 1,
                checksum: String::new(),
                compressed: false,
            })
            .collect();
        UploadPayload::single(items, 1)
    }

    // ===========================================
    // MockTransport Basic Tests
    // ===========================================

    #[tokio::test]
    async fn fetch_returns_remote_changes() {
        let transport = MockTransport::new();
        transport.set_remote_change(remote("a", 10));
        transport.set_remote_change(remote("b", 20));

        let changes = transport.fetch_remote_changes().await.unwrap();

        assert_eq!(changes.len(), 2);
        assert_eq!(changes["a"].timestamp, 10);
        assert_eq!(transport.fetch_calls(), 1);
    }

    #[tokio::test]
    async fn upload_records_payloads_and_accepts_all() {
        let transport = MockTransport::new();

        let stats = transport.upload_changes(&payload(&["a", "b"])).await.unwrap();

        assert_eq!(stats.accepted, 2);
        assert_eq!(stats.rejected, 0);
        assert_eq!(transport.uploads().len(), 1);
    }

    #[tokio::test]
    async fn upload_reports_rejected_keys() {
        let transport = MockTransport::new();
        transport.reject_key("b");

        let stats = transport.upload_changes(&payload(&["a", "b"])).await.unwrap();

        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.rejected, 1);
    }

    #[tokio::test]
    async fn execute_returns_configured_response() {
        let transport = MockTransport::new();
        transport.set_response("https://api.example.com/a", b"body".to_vec());

        let body = transport
            .execute(&NetworkRequest::get("https://api.example.com/a"))
            .await
            .unwrap();

        assert_eq!(body, b"body");
        assert_eq!(transport.executed_requests().len(), 1);
    }

    #[tokio::test]
    async fn execute_unknown_url_is_not_found() {
        let transport = MockTransport::new();

        let result = transport
            .execute(&NetworkRequest::get("https://api.example.com/nope"))
            .await;

        assert!(matches!(result, Err(TransportError::Server { status: 404, .. })));
    }

    // ===========================================
    // Error Condition Tests
    // ===========================================

    #[tokio::test]
    async fn forced_fetch_failure_is_one_shot() {
        let transport = MockTransport::new();
        transport.fail_next_fetch("network unreachable");

        let result = transport.fetch_remote_changes().await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));

        // Next fetch should work
        transport.fetch_remote_changes().await.unwrap();
    }

    #[tokio::test]
    async fn forced_upload_failure_records_nothing() {
        let transport = MockTransport::new();
        transport.fail_next_upload("overloaded");

        let result = transport.upload_changes(&payload(&["a"])).await;

        assert!(matches!(result, Err(TransportError::Server { status: 503, .. })));
        assert!(transport.uploads().is_empty());
    }

    #[tokio::test]
    async fn failing_url_keeps_failing() {
        let transport = MockTransport::new();
        let url = "https://api.example.com/down";
        transport.set_response(url, b"never".to_vec());
        transport.fail_url(url);

        for _ in 0..3 {
            let result = transport.execute(&NetworkRequest::get(url)).await;
            assert!(matches!(result, Err(TransportError::Timeout)));
        }
    }

    #[tokio::test]
    async fn held_fetch_waits_for_release() {
        let transport = MockTransport::new();
        transport.set_remote_change(remote("a", 1));
        transport.hold_fetch();

        let fetcher = transport.clone();
        let handle = tokio::spawn(async move { fetcher.fetch_remote_changes().await });

        transport.fetch_started().await;
        assert!(!handle.is_finished());

        transport.release_fetch();
        let changes = handle.await.unwrap().unwrap();
        assert_eq!(changes.len(), 1);
    }

    #[tokio::test]
    async fn held_upload_waits_for_release() {
        let transport = MockTransport::new();
        transport.hold_upload();

        let uploader = transport.clone();
        let handle =
            tokio::spawn(async move { uploader.upload_changes(&payload(&["a"])).await });

        transport.upload_started().await;
        assert!(transport.uploads().is_empty());

        transport.release_upload();
        assert_eq!(handle.await.unwrap().unwrap().accepted, 1);
        assert_eq!(transport.uploads().len(), 1);
    }

    // ===========================================
    // Clone and Shared State Tests
    // ===========================================

    #[tokio::test]
    async fn clone_shares_state() {
        let transport1 = MockTransport::new();
        let transport2 = transport1.clone();

        transport1.upload_changes(&payload(&["a"])).await.unwrap();

        assert_eq!(transport2.uploads().len(), 1);
    }

    #[tokio::test]
    async fn reset_clears_all() {
        let transport = MockTransport::new();
        transport.set_remote_change(remote("a", 1));
        transport.upload_changes(&payload(&["a"])).await.unwrap();
        transport.fail_next_execute("boom");

        transport.reset();

        assert!(transport.uploads().is_empty());
        assert!(transport.fetch_remote_changes().await.unwrap().is_empty());
        transport.set_response("u", vec![1]);
        assert!(transport.execute(&NetworkRequest::get("u")).await.is_ok());
    }
}
