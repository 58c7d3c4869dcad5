//! Bounded-concurrency admission queue
//!
//! Items wait in a FIFO until fewer than `max_outstanding` items are in
//! flight. Admission is re-checked on every enqueue and every completion,
//! so freed capacity is used immediately rather than polled for.
//!
//! The pending queue and the in-flight count share one mutex, which is
//! never held across an await point.

use crate::telemetry::{RequestStatus, Telemetry, TelemetryEvent};
use crate::types::{Operation, QueueSnapshot};
use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

/// Outcome of a deferred action as seen by telemetry
pub type Outcome = std::result::Result<(), String>;

/// A pending operation: where it came from, what it is, and the work itself
pub struct QueueItem {
    pub request_id: u64,
    pub operation: Operation,
    pub params: serde_json::Value,
    action: BoxFuture<'static, Outcome>,
}

impl QueueItem {
    pub fn new<F>(request_id: u64, operation: Operation, params: serde_json::Value, action: F) -> Self
    where
        F: Future<Output = Outcome> + Send + 'static,
    {
        Self {
            request_id,
            operation,
            params,
            action: action.boxed(),
        }
    }
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<QueueItem>,
    in_flight: usize,
}

struct Inner {
    state: Mutex<QueueState>,
    max_outstanding: usize,
    telemetry: Telemetry,
}

/// FIFO mailbox with an admission cap. Cloning shares the same queue.
///
/// Must be used from within a Tokio runtime: admitted items are spawned.
#[derive(Clone)]
pub struct Mailbox {
    inner: Arc<Inner>,
}

impl Mailbox {
    /// `max_outstanding` of zero is treated as one
    pub fn new(max_outstanding: usize, telemetry: Telemetry) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState::default()),
                max_outstanding: max_outstanding.max(1),
                telemetry,
            }),
        }
    }

    pub fn max_outstanding(&self) -> usize {
        self.inner.max_outstanding
    }

    /// Append to the tail and admit whatever capacity allows
    pub fn enqueue(&self, item: QueueItem) {
        let mut state = self.lock();
        state.pending.push_back(item);
        self.admit(&mut state);
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.lock();
        QueueSnapshot {
            outstanding_requests: state.in_flight,
            mailbox_size: state.pending.len(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // The lock is never held while running user code, so a poisoned
        // state is still consistent.
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Admission check. Runs with the state locked so that start events are
    /// emitted in admission order.
    fn admit(&self, state: &mut QueueState) {
        while state.in_flight < self.inner.max_outstanding {
            let Some(item) = state.pending.pop_front() else {
                break;
            };
            state.in_flight += 1;
            self.start(item);
        }
    }

    fn start(&self, item: QueueItem) {
        let QueueItem {
            request_id,
            operation,
            params,
            action,
        } = item;

        self.inner.telemetry.emit(TelemetryEvent::RequestStarted {
            request_id,
            operation,
            params: params.clone(),
            at: Utc::now(),
        });

        let mailbox = self.clone();
        let started = Instant::now();
        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(action)
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err("handler panicked".to_string()));
            mailbox.complete(request_id, operation, params, started, outcome);
        });
    }

    fn complete(
        &self,
        request_id: u64,
        operation: Operation,
        params: serde_json::Value,
        started: Instant,
        outcome: Outcome,
    ) {
        let (status, error) = match outcome {
            Ok(()) => (RequestStatus::Success, None),
            Err(error) => (RequestStatus::Error, Some(error)),
        };

        let mut state = self.lock();
        state.in_flight -= 1;
        self.inner.telemetry.emit(TelemetryEvent::RequestFinished {
            request_id,
            operation,
            params,
            elapsed_ms: started.elapsed().as_millis() as u64,
            status,
            error,
            at: Utc::now(),
        });
        self.admit(&mut state);
    }
}
