//! The tempcache service: requests in, exactly one response out

use crate::error::{Result, TempcacheError};
use crate::handlers::{handle, ByteStream, Request, Response};
use crate::mailbox::{Mailbox, QueueItem};
use crate::store::Store;
use crate::sweeper::Sweeper;
use crate::telemetry::{Telemetry, TelemetryEvent};
use crate::types::{QueueSnapshot, TempcacheConfig};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Return address for a single request
pub type Reply = oneshot::Sender<Result<Response>>;

pub struct TempcacheService {
    store: Arc<Store>,
    mailbox: Mailbox,
    telemetry: Telemetry,
    sweeper: Sweeper,
    config: TempcacheConfig,
    next_request_id: AtomicU64,
    /// Sweeper and telemetry timers, aborted on shutdown
    timers: Mutex<Vec<JoinHandle<()>>>,
}

impl TempcacheService {
    /// Initialize the store (wiping the root) and start the sweeper and
    /// telemetry timers
    pub async fn start(config: TempcacheConfig) -> Result<Self> {
        let service = Self::new(config).await?;
        service.spawn_timers();
        Ok(service)
    }

    /// Initialize the store without starting any timers. Sweeps then only
    /// happen through [`TempcacheService::sweep_now`].
    pub async fn new(config: TempcacheConfig) -> Result<Self> {
        if config.tick_interval.is_zero() {
            return Err(TempcacheError::InvalidConfig(
                "tick_interval must be non-zero".to_string(),
            ));
        }
        if config.telemetry_interval.is_zero() {
            return Err(TempcacheError::InvalidConfig(
                "telemetry_interval must be non-zero".to_string(),
            ));
        }

        let store = Arc::new(Store::new(config.root_dir.clone(), config.bump_strength));
        store.init().await?;

        let telemetry = Telemetry::new();
        let mailbox = Mailbox::new(config.max_outstanding, telemetry.clone());
        let sweeper = Sweeper::new(store.clone(), config.tick_interval);

        Ok(Self {
            store,
            mailbox,
            telemetry,
            sweeper,
            config,
            next_request_id: AtomicU64::new(0),
            timers: Mutex::new(Vec::new()),
        })
    }

    fn spawn_timers(&self) {
        let sweeper = self.sweeper.clone().spawn();

        let mailbox = self.mailbox.clone();
        let snapshots = self
            .telemetry
            .spawn_snapshots(self.config.telemetry_interval, move || mailbox.snapshot());

        self.lock_timers().extend([sweeper, snapshots]);
        info!(
            root = ?self.store.root(),
            tick_ms = self.config.tick_interval.as_millis() as u64,
            max_outstanding = self.mailbox.max_outstanding(),
            "Tempcache service started"
        );
    }

    fn lock_timers(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.timers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue `request`; its response (value or error) is sent to `reply`
    /// exactly once. Returns the request id used in telemetry.
    pub fn submit(&self, request: Request, reply: Reply) -> u64 {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let operation = request.operation();
        let params = request.params();

        let store = self.store.clone();
        let default_life = self.config.default_initial_life;
        let action = async move {
            let result = handle(&store, request, default_life).await;
            let outcome = result.as_ref().map(|_| ()).map_err(|e| e.to_string());
            if reply.send(result).is_err() {
                debug!(request_id, "Caller dropped before the response was sent");
            }
            outcome
        };

        self.mailbox
            .enqueue(QueueItem::new(request_id, operation, params, action));
        request_id
    }

    /// Submit `request` and wait for its response
    pub async fn call(&self, request: Request) -> Result<Response> {
        let (reply, response) = oneshot::channel();
        let request_id = self.submit(request, reply);
        // The reply is only dropped unsent if the handler panicked
        response.await.unwrap_or_else(|_| {
            Err(TempcacheError::Unexpected(format!(
                "request {} ended without a response",
                request_id
            )))
        })
    }

    pub async fn get_file(&self, key: &str) -> Result<Vec<u8>> {
        match self.call(Request::GetFile { key: key.to_string() }).await? {
            Response::Bytes(data) => Ok(data),
            other => Err(mismatched(other)),
        }
    }

    pub async fn get_file_path(&self, key: &str) -> Result<PathBuf> {
        match self
            .call(Request::GetFilePath { key: key.to_string() })
            .await?
        {
            Response::Path(path) => Ok(path),
            other => Err(mismatched(other)),
        }
    }

    pub async fn get_stream(&self, key: &str) -> Result<tokio::fs::File> {
        match self.call(Request::GetStream { key: key.to_string() }).await? {
            Response::Stream(file) => Ok(file),
            other => Err(mismatched(other)),
        }
    }

    pub async fn bump_object(&self, key: &str) -> Result<()> {
        self.call(Request::BumpObject { key: key.to_string() })
            .await
            .map(|_| ())
    }

    pub async fn put_object_by_file(
        &self,
        key: &str,
        src_path: impl Into<PathBuf>,
        initial_life: Option<Duration>,
    ) -> Result<()> {
        self.call(Request::PutObjectByFile {
            key: key.to_string(),
            src_path: src_path.into(),
            initial_life,
        })
        .await
        .map(|_| ())
    }

    pub async fn put_object_by_stream(
        &self,
        key: &str,
        source: ByteStream,
        initial_life: Option<Duration>,
    ) -> Result<()> {
        self.call(Request::PutObjectByStream {
            key: key.to_string(),
            source,
            initial_life,
        })
        .await
        .map(|_| ())
    }

    /// Run one decay pass now, independent of the timer
    pub async fn sweep_now(&self) -> Vec<String> {
        self.sweeper.sweep_once().await
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn config(&self) -> &TempcacheConfig {
        &self.config
    }

    pub fn queue_snapshot(&self) -> QueueSnapshot {
        self.mailbox.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.telemetry.subscribe()
    }

    /// Stop the sweeper and telemetry timers. In-flight and queued
    /// requests still run to completion. Safe to call more than once.
    pub fn shutdown(&self) {
        let timers: Vec<_> = self.lock_timers().drain(..).collect();
        if timers.is_empty() {
            return;
        }
        for timer in timers {
            timer.abort();
        }
        info!("Tempcache service shut down");
    }
}

impl Drop for TempcacheService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn mismatched(response: Response) -> TempcacheError {
    TempcacheError::Unexpected(format!("mismatched response: {:?}", response))
}
