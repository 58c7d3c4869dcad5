//! Periodic lifetime decay and eviction

use crate::store::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Decays every live entry by `tick` once per `tick`
#[derive(Clone)]
pub struct Sweeper {
    store: Arc<Store>,
    tick: Duration,
}

impl Sweeper {
    pub fn new(store: Arc<Store>, tick: Duration) -> Self {
        Self { store, tick }
    }

    pub fn tick(&self) -> Duration {
        self.tick
    }

    /// Run one sweep pass, returning the evicted keys
    pub async fn sweep_once(&self) -> Vec<String> {
        let evicted = self.store.decay(self.tick).await;
        if !evicted.is_empty() {
            info!(count = evicted.len(), "Swept expired entries");
        }
        evicted
    }

    /// Spawn the recurring sweep. The first pass runs one full tick after
    /// spawning; abort the handle to stop it.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.tick, self.tick);
            // Missed ticks are delayed, not replayed.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(tick_ms = self.tick.as_millis() as u64, "Sweeper started");
            loop {
                ticker.tick().await;
                self.sweep_once().await;
            }
        })
    }
}
