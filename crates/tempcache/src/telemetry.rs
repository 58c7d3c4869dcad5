//! Telemetry events for queue depth and per-request timing
//!
//! Events are written to `tracing` and published on a broadcast channel.
//! Nothing depends on delivery: emitting with no subscribers is a no-op.

use crate::types::{Operation, QueueSnapshot};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, warn};

const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "name")]
pub enum TelemetryEvent {
    #[serde(rename = "tempcache.telemetry")]
    Snapshot(QueueSnapshot),
    #[serde(rename = "tempcache.request.start", rename_all = "camelCase")]
    RequestStarted {
        request_id: u64,
        operation: Operation,
        params: serde_json::Value,
        at: DateTime<Utc>,
    },
    #[serde(rename = "tempcache.request.time", rename_all = "camelCase")]
    RequestFinished {
        request_id: u64,
        operation: Operation,
        params: serde_json::Value,
        elapsed_ms: u64,
        status: RequestStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        at: DateTime<Utc>,
    },
}

/// Fan-out point for telemetry events
#[derive(Clone)]
pub struct Telemetry {
    tx: broadcast::Sender<TelemetryEvent>,
}

impl Telemetry {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUFFER);
        Self { tx }
    }

    /// Receive every event emitted from now on. Slow receivers lag and
    /// lose the oldest events.
    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: TelemetryEvent) {
        match &event {
            TelemetryEvent::Snapshot(snapshot) => {
                debug!(
                    outstanding_requests = snapshot.outstanding_requests,
                    mailbox_size = snapshot.mailbox_size,
                    "Queue snapshot"
                );
            }
            TelemetryEvent::RequestStarted {
                request_id,
                operation,
                params,
                ..
            } => {
                debug!(request_id, operation = %operation, params = %params, "Request started");
            }
            TelemetryEvent::RequestFinished {
                request_id,
                operation,
                elapsed_ms,
                error,
                ..
            } => match error {
                None => {
                    info!(request_id, operation = %operation, elapsed_ms, "Request finished");
                }
                Some(error) => {
                    warn!(request_id, operation = %operation, elapsed_ms, error = %error, "Request failed");
                }
            },
        }

        let _ = self.tx.send(event);
    }

    /// Emit a queue snapshot every `period` until the handle is aborted
    pub fn spawn_snapshots<F>(&self, period: Duration, snapshot: F) -> JoinHandle<()>
    where
        F: Fn() -> QueueSnapshot + Send + 'static,
    {
        let telemetry = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                telemetry.emit(TelemetryEvent::Snapshot(snapshot()));
            }
        })
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_emit_without_subscribers() {
        let telemetry = Telemetry::new();
        telemetry.emit(TelemetryEvent::Snapshot(QueueSnapshot::default()));
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let telemetry = Telemetry::new();
        let mut rx = telemetry.subscribe();

        telemetry.emit(TelemetryEvent::Snapshot(QueueSnapshot {
            outstanding_requests: 1,
            mailbox_size: 2,
        }));

        match rx.recv().await.unwrap() {
            TelemetryEvent::Snapshot(snapshot) => {
                assert_eq!(snapshot.outstanding_requests, 1);
                assert_eq!(snapshot.mailbox_size, 2);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_snapshot_serialization() {
        let event = TelemetryEvent::Snapshot(QueueSnapshot {
            outstanding_requests: 0,
            mailbox_size: 3,
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["name"], "tempcache.telemetry");
        assert_eq!(json["mailboxSize"], 3);
    }

    #[test]
    fn test_finished_serialization() {
        let event = TelemetryEvent::RequestFinished {
            request_id: 7,
            operation: Operation::GetFilePath,
            params: json!({ "key": "a" }),
            elapsed_ms: 12,
            status: RequestStatus::Error,
            error: Some("Key not found: a".to_string()),
            at: Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["name"], "tempcache.request.time");
        assert_eq!(json["requestId"], 7);
        assert_eq!(json["operation"], "getFilePath");
        assert_eq!(json["params"]["key"], "a");
        assert_eq!(json["elapsedMs"], 12);
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"], "Key not found: a");
    }

    #[test]
    fn test_success_omits_error() {
        let event = TelemetryEvent::RequestFinished {
            request_id: 1,
            operation: Operation::BumpObject,
            params: json!({ "key": "a" }),
            elapsed_ms: 0,
            status: RequestStatus::Success,
            error: None,
            at: Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["status"], "success");
        assert!(json.get("error").is_none());
    }

    #[tokio::test]
    async fn test_periodic_snapshots() {
        let telemetry = Telemetry::new();
        let mut rx = telemetry.subscribe();

        let handle = telemetry.spawn_snapshots(Duration::from_millis(10), || QueueSnapshot {
            outstanding_requests: 0,
            mailbox_size: 5,
        });

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        handle.abort();

        assert!(matches!(
            event,
            TelemetryEvent::Snapshot(QueueSnapshot { mailbox_size: 5, .. })
        ));
    }
}
