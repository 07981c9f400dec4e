//! Session lifecycle state shared between the controller and its read loop.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Notify;

/// Lifecycle phase of the controller's current (or most recent) session.
///
/// `Idle → Streaming → {Completed | Failed | Cancelled}`; the transition back
/// to `Streaming` happens implicitly when a new message begins and discards
/// prior session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// No session has run yet.
    #[default]
    Idle,
    /// A request/response exchange is in flight.
    Streaming,
    /// The session finished with a terminal event.
    Completed,
    /// The session ended on an error.
    Failed,
    /// The caller cancelled the session.
    Cancelled,
}

/// Cancellation handle raced against the body read.
///
/// The flag makes cancellation observable from any point; the notify unblocks
/// a read loop parked on the next chunk.
#[derive(Debug, Default)]
pub struct CancelHandle {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelHandle {
    /// Request cancellation and wake the read loop.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until cancellation is requested.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.notify.notified().await;
    }
}

/// State for one request/response exchange, shared by handle.
///
/// Owned by the controller; the read loop and any out-of-band `stop()` call
/// observe it through an `Arc`. Accumulated text and suggestion/metadata
/// stores live in the read loop itself — only state that must be visible
/// across tasks lives here.
#[derive(Debug)]
pub struct SessionShared {
    /// The query that started this session (used by retry).
    pub query: String,
    /// When the request was sent.
    pub started_at: Instant,
    completed: AtomicBool,
    cancel: CancelHandle,
}

impl SessionShared {
    /// Begin a new session for `query`.
    pub fn new(query: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            query: query.into(),
            started_at: Instant::now(),
            completed: AtomicBool::new(false),
            cancel: CancelHandle::default(),
        })
    }

    /// Claim completion for this session.
    ///
    /// Compare-and-set: returns `true` exactly once, no matter how many
    /// terminal events the server delivers or how they race.
    pub fn try_complete(&self) -> bool {
        self.completed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Whether completion has been claimed.
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    /// The session's cancellation handle.
    pub fn cancel_handle(&self) -> &CancelHandle {
        &self.cancel
    }
}

/// Latency and throughput metrics, computed once at session completion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamMetrics {
    /// Total session duration in milliseconds.
    pub duration_ms: u64,
    /// Time to first text token, when any text arrived.
    pub first_token_latency_ms: Option<u64>,
    /// Time to first audio chunk, when any audio arrived.
    pub first_audio_latency_ms: Option<u64>,
    /// Whitespace-split word count of the final answer.
    pub word_count: usize,
    /// Server-supplied metrics, passed through verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_complete_claims_exactly_once() {
        let session = SessionShared::new("hi");
        assert!(!session.is_completed());
        assert!(session.try_complete());
        assert!(!session.try_complete());
        assert!(session.is_completed());
    }

    #[test]
    fn test_try_complete_under_contention() {
        let session = SessionShared::new("hi");
        let wins: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| usize::from(session.try_complete())))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn test_cancel_unblocks_waiter() {
        let handle = Arc::new(CancelHandle::default());
        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.cancelled().await })
        };
        handle.cancel();
        waiter.await.unwrap();
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_before_wait_returns_immediately() {
        let handle = CancelHandle::default();
        handle.cancel();
        handle.cancelled().await;
    }
}
