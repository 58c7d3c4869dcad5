//! Configuration and wire types for the tempcache server

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tempcache::{CacheStats, QueueSnapshot, TempcacheConfig};

/// Configuration for the server process
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Only files under this directory may be imported through
    /// `POST /objects/{key}/copy`. Unset disables the route.
    pub import_dir: Option<PathBuf>,
    pub tempcache: TempcacheConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3005,
            import_dir: None,
            tempcache: TempcacheConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Build a config from a variable lookup, keeping defaults for anything
    /// absent or unparsable
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let millis = |name: &str, default: Duration| {
            lookup(name)
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(default)
        };

        let port = lookup("PORT")
            .and_then(|s| s.parse::<u16>().ok())
            .unwrap_or(defaults.port);

        let root_dir = lookup("TEMPCACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.tempcache.root_dir);

        let import_dir = lookup("TEMPCACHE_IMPORT_DIR").map(PathBuf::from);

        let max_outstanding = lookup("TEMPCACHE_MAX_OUTSTANDING")
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.tempcache.max_outstanding);

        Self {
            port,
            import_dir,
            tempcache: TempcacheConfig {
                root_dir,
                tick_interval: millis(
                    "TEMPCACHE_TICK_INTERVAL_MS",
                    defaults.tempcache.tick_interval,
                ),
                bump_strength: millis(
                    "TEMPCACHE_BUMP_STRENGTH_MS",
                    defaults.tempcache.bump_strength,
                ),
                max_outstanding,
                telemetry_interval: millis(
                    "TEMPCACHE_TELEMETRY_INTERVAL_MS",
                    defaults.tempcache.telemetry_interval,
                ),
                default_initial_life: millis(
                    "TEMPCACHE_INITIAL_LIFE_MS",
                    defaults.tempcache.default_initial_life,
                ),
            },
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub cache: CacheStats,
    pub queue: QueueSnapshot,
}

/// Body of `POST /objects/{key}/copy`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyRequest {
    pub src_path: PathBuf,
    /// Milliseconds
    pub initial_life: Option<u64>,
}

/// Query of `PUT /objects/{key}`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutQuery {
    pub initial_life: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct PathResponse {
    pub path: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}
