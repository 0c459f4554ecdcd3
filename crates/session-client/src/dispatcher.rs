//! Queue of requests suspended on a pending refresh
//!
//! Requests are appended in the order their expiry was detected and never
//! reordered. When a refresh cycle settles, the coordinator seals the queue:
//! the whole queue moves into a `PendingBatch` owned by that cycle, leaving
//! the dispatcher empty for the next one. A batch is consumed by value, so
//! each request is replayed or rejected exactly once.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use tokio::sync::oneshot;
use tracing::debug;
use transport::Response;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::metrics;

/// Future produced by a replay closure.
pub type ReplayFuture = Pin<Box<dyn Future<Output = Result<Response>> + Send>>;

/// Re-issues the original request once, with whatever credential is current.
pub type Replay = Box<dyn FnOnce() -> ReplayFuture + Send>;

/// A caller waiting for a refresh to settle.
pub struct PendingRequest {
    id: Uuid,
    execute: Replay,
    responder: oneshot::Sender<Result<Response>>,
    enqueued_at: Instant,
}

impl PendingRequest {
    /// Create the entry and the receiver its caller awaits.
    pub fn new(execute: Replay) -> (Self, oneshot::Receiver<Result<Response>>) {
        let (responder, receiver) = oneshot::channel();
        let pending = Self {
            id: Uuid::new_v4(),
            execute,
            responder,
            enqueued_at: Instant::now(),
        };
        (pending, receiver)
    }
}

/// FIFO of requests for the refresh cycle in progress.
#[derive(Default)]
pub struct RetryDispatcher {
    queue: Mutex<VecDeque<PendingRequest>>,
}

impl RetryDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, pending: PendingRequest) {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        debug!(request_id = %pending.id, position = queue.len(), "request queued for refresh");
        queue.push_back(pending);
        metrics::set_pending(queue.len());
    }

    /// Move every queued request into a batch, leaving the queue empty.
    pub fn seal(&self) -> PendingBatch {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let requests = std::mem::take(&mut *queue);
        metrics::set_pending(0);
        PendingBatch { requests }
    }

    pub fn len(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Requests that joined one refresh cycle, in enqueue order.
pub struct PendingBatch {
    requests: VecDeque<PendingRequest>,
}

/// Counts from replaying a batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub succeeded: usize,
    pub failed: usize,
    /// Callers that stopped waiting before their result was ready
    pub abandoned: usize,
}

impl PendingBatch {
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Replay each request once, strictly one after another in enqueue
    /// order, and hand each caller the result of its single replay.
    pub async fn flush_with_success(mut self) -> FlushReport {
        let mut report = FlushReport::default();
        while let Some(pending) = self.requests.pop_front() {
            let PendingRequest {
                id,
                execute,
                responder,
                enqueued_at,
            } = pending;
            if responder.is_closed() {
                debug!(request_id = %id, "caller gone, skipping replay");
                metrics::record_replay("abandoned");
                report.abandoned += 1;
                continue;
            }

            let result = execute().await;
            let ok = result.is_ok();
            if ok {
                report.succeeded += 1;
            } else {
                report.failed += 1;
            }
            metrics::record_replay(if ok { "ok" } else { "error" });

            let waited_ms = enqueued_at.elapsed().as_millis() as u64;
            if responder.send(result).is_err() {
                debug!(request_id = %id, "caller dropped before replay result");
            } else {
                debug!(request_id = %id, ok, waited_ms, "replayed request");
            }
        }
        report
    }

    /// Reject every request, in enqueue order, with the error `make_error` builds.
    pub fn flush_with_failure(mut self, make_error: impl Fn() -> Error) -> usize {
        let mut rejected = 0;
        while let Some(pending) = self.requests.pop_front() {
            let id = pending.id;
            metrics::record_replay("rejected");
            if pending.responder.send(Err(make_error())).is_ok() {
                rejected += 1;
            } else {
                debug!(request_id = %id, "caller dropped before rejection");
            }
        }
        rejected
    }
}
