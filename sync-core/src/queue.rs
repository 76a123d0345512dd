//! Offline request queue for tidesync.
//!
//! This module provides a queue for network requests that could not be
//! executed immediately, with:
//! - FIFO ordering for replay
//! - Per-item retry counters with a fixed ceiling
//! - Max size limits; a full queue rejects instead of dropping silently
//!
//! The queue is drained by sync-client's `CacheEngine`, which executes each
//! request and either removes it, retries it later, or drops it once the
//! retry ceiling is reached.

use std::collections::VecDeque;
use sync_types::{NetworkRequest, RequestId, Timestamp};
use thiserror::Error;

/// Default maximum number of queued requests.
pub const MAX_OFFLINE_REQUESTS: usize = 100;

/// Failed executions after which a request is dropped.
pub const MAX_REQUEST_RETRIES: u32 = 3;

/// Error type for queue operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// Queue is at capacity.
    #[error("offline queue full (capacity: {capacity})")]
    Full {
        /// Current queue capacity.
        capacity: usize,
    },
}

/// A request waiting to be executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedRequest {
    /// Unique identifier for this queue item.
    pub id: RequestId,
    /// The request to execute.
    pub request: NetworkRequest,
    /// When the request was queued.
    pub queue_time: Timestamp,
    /// Failed executions so far.
    pub retry_count: u32,
}

impl QueuedRequest {
    /// Create a new queued request.
    pub fn new(request: NetworkRequest, queue_time: Timestamp) -> Self {
        Self {
            id: RequestId::new(),
            request,
            queue_time,
            retry_count: 0,
        }
    }

    /// Count a failed execution.
    ///
    /// Returns `true` once the request has used up its retries and should be
    /// dropped.
    pub fn record_failure(&mut self, max_retries: u32) -> bool {
        self.retry_count = self.retry_count.saturating_add(1);
        self.retry_count >= max_retries
    }
}

/// Bounded FIFO of requests awaiting execution.
#[derive(Debug)]
pub struct OfflineRequestQueue {
    /// Maximum number of queued requests.
    max_size: usize,
    queue: VecDeque<QueuedRequest>,
}

impl OfflineRequestQueue {
    /// Create a new queue with the given maximum size.
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            queue: VecDeque::new(),
        }
    }

    /// Add a request to the back of the queue.
    ///
    /// Returns an error if the queue is full.
    pub fn enqueue(
        &mut self,
        request: NetworkRequest,
        now: Timestamp,
    ) -> Result<RequestId, QueueError> {
        if self.queue.len() >= self.max_size {
            return Err(QueueError::Full {
                capacity: self.max_size,
            });
        }
        let item = QueuedRequest::new(request, now);
        let id = item.id;
        self.queue.push_back(item);
        Ok(id)
    }

    /// Take every queued request, oldest first, leaving the queue empty.
    pub fn drain(&mut self) -> Vec<QueuedRequest> {
        self.queue.drain(..).collect()
    }

    /// Put requests back at the front of the queue, preserving their order.
    ///
    /// Requests queued since the matching `drain()` stay behind them.
    pub fn restore_front(&mut self, items: Vec<QueuedRequest>) {
        for item in items.into_iter().rev() {
            self.queue.push_front(item);
        }
    }

    /// Remove a specific request.
    pub fn remove(&mut self, id: &RequestId) -> Option<QueuedRequest> {
        let index = self.queue.iter().position(|item| item.id == *id)?;
        self.queue.remove(index)
    }

    /// Peek at the queued requests in order.
    pub fn iter(&self) -> impl Iterator<Item = &QueuedRequest> {
        self.queue.iter()
    }

    /// Number of queued requests.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Maximum number of queued requests.
    pub fn capacity(&self) -> usize {
        self.max_size
    }

    /// Drop every queued request.
    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

impl Default for OfflineRequestQueue {
    fn default() -> Self {
        Self::new(MAX_OFFLINE_REQUESTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(path: &str) -> NetworkRequest {
        NetworkRequest::get(format!("https://api.example.com/{path}"))
    }

    #[test]
    fn queue_accepts_requests() {
        let mut queue = OfflineRequestQueue::new(10);
        queue.enqueue(request("a"), 1).unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn queue_rejects_when_full() {
        let mut queue = OfflineRequestQueue::new(2);
        queue.enqueue(request("a"), 1).unwrap();
        queue.enqueue(request("b"), 2).unwrap();

        let overflow = queue.enqueue(request("c"), 3);

        assert_eq!(overflow, Err(QueueError::Full { capacity: 2 }));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn drain_is_fifo() {
        let mut queue = OfflineRequestQueue::new(10);
        queue.enqueue(request("first"), 1).unwrap();
        queue.enqueue(request("second"), 2).unwrap();

        let drained = queue.drain();

        assert!(queue.is_empty());
        assert!(drained[0].request.url.ends_with("first"));
        assert!(drained[1].request.url.ends_with("second"));
    }

    #[test]
    fn restore_front_keeps_retries_ahead_of_new_requests() {
        let mut queue = OfflineRequestQueue::new(10);
        queue.enqueue(request("old-1"), 1).unwrap();
        queue.enqueue(request("old-2"), 2).unwrap();

        let drained = queue.drain();
        queue.enqueue(request("new"), 3).unwrap();
        queue.restore_front(drained);

        let urls: Vec<&str> = queue.iter().map(|q| q.request.url.as_str()).collect();
        assert!(urls[0].ends_with("old-1"));
        assert!(urls[1].ends_with("old-2"));
        assert!(urls[2].ends_with("new"));
    }

    #[test]
    fn record_failure_reaches_ceiling() {
        let mut item = QueuedRequest::new(request("a"), 0);
        assert!(!item.record_failure(3));
        assert!(!item.record_failure(3));
        assert!(item.record_failure(3));
        assert_eq!(item.retry_count, 3);
    }

    #[test]
    fn remove_by_id() {
        let mut queue = OfflineRequestQueue::new(10);
        let id = queue.enqueue(request("a"), 1).unwrap();
        queue.enqueue(request("b"), 2).unwrap();

        let removed = queue.remove(&id).unwrap();

        assert!(removed.request.url.ends_with("a"));
        assert_eq!(queue.len(), 1);
        assert!(queue.remove(&id).is_none());
    }

    #[test]
    fn full_error_display() {
        let err = QueueError::Full { capacity: 100 };
        assert_eq!(err.to_string(), "offline queue full (capacity: 100)");
    }

    #[test]
    fn clear_removes_all() {
        let mut queue = OfflineRequestQueue::default();
        queue.enqueue(request("a"), 1).unwrap();
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.capacity(), MAX_OFFLINE_REQUESTS);
    }
}
