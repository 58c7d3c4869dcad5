//! Cache types

use crate::error::TempcacheError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Construction-time configuration for the tempcache service
#[derive(Debug, Clone)]
pub struct TempcacheConfig {
    /// Directory holding one file per key; wiped on startup
    pub root_dir: PathBuf,
    /// Sweep period, also the amount subtracted from every entry per sweep
    pub tick_interval: Duration,
    /// Lifetime added to an entry on every read or explicit bump
    pub bump_strength: Duration,
    /// Maximum number of admitted (in-flight) requests
    pub max_outstanding: usize,
    /// Period of the queue depth snapshot
    pub telemetry_interval: Duration,
    /// Lifetime given to a put that does not specify one
    pub default_initial_life: Duration,
}

impl Default for TempcacheConfig {
    fn default() -> Self {
        Self {
            root_dir: std::env::temp_dir().join("tempcache"),
            tick_interval: Duration::from_millis(30_000),
            bump_strength: Duration::from_millis(120_000),
            max_outstanding: 1,
            telemetry_interval: Duration::from_millis(5_000),
            default_initial_life: Duration::from_millis(120_000),
        }
    }
}

/// Snapshot of a tracked key and its remaining lifetime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub remaining_life_ms: i64,
}

/// Statistics about the store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Queue depth at a point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub outstanding_requests: usize,
    pub mailbox_size: usize,
}

/// The named operations the service answers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    GetFile,
    GetFilePath,
    GetStream,
    BumpObject,
    PutObjectByFile,
    PutObjectByStream,
}

impl Operation {
    pub const ALL: [Operation; 6] = [
        Operation::GetFile,
        Operation::GetFilePath,
        Operation::GetStream,
        Operation::BumpObject,
        Operation::PutObjectByFile,
        Operation::PutObjectByStream,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::GetFile => "getFile",
            Operation::GetFilePath => "getFilePath",
            Operation::GetStream => "getStream",
            Operation::BumpObject => "bumpObject",
            Operation::PutObjectByFile => "putObjectByFile",
            Operation::PutObjectByStream => "putObjectByStream",
        }
    }
}

impl FromStr for Operation {
    type Err = TempcacheError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str() == name)
            .ok_or_else(|| TempcacheError::UnknownOperation(name.to_string()))
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifetimes are tracked as signed milliseconds so decay can go below zero.
pub(crate) fn as_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
