//! Disk-backed TTL cache for transient artifacts
//!
//! Artifacts are stored one file per key under a root directory, with an
//! in-memory remaining-lifetime counter per key. Reads extend the lifetime,
//! a periodic sweep decays it, and entries at or below zero are evicted.
//! All requests pass through a FIFO mailbox that admits at most
//! `max_outstanding` at a time and reports per-request telemetry.

mod error;
mod handlers;
mod mailbox;
mod service;
mod store;
mod sweeper;
mod telemetry;
mod types;

pub use error::{Result, TempcacheError};
pub use handlers::{handle, ByteStream, Request, Response};
pub use mailbox::{Mailbox, Outcome, QueueItem};
pub use service::{Reply, TempcacheService};
pub use store::Store;
pub use sweeper::Sweeper;
pub use telemetry::{RequestStatus, Telemetry, TelemetryEvent};
pub use types::{CacheEntry, CacheStats, Operation, QueueSnapshot, TempcacheConfig};
