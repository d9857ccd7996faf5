//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from the daemon's TOML file.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::reload::MIN_QUEUE_CAPACITY;

/// Root configuration for the daemon.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct WingConfig {
    /// Where records are persisted.
    pub store: StoreConfig,

    /// Reload queue settings.
    pub reload: ReloadConfig,

    /// Settings handed to the engine factory.
    pub engine: EngineConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,
}

/// Record persistence.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON file holding profiles, groups, subscriptions, nodes and the running state.
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("wing.json"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReloadConfig {
    /// Bounded queue capacity. Submitters wait when it is full.
    pub queue_capacity: usize,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            queue_capacity: MIN_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Extra directories searched for geo data files.
    pub external_data_dirs: Vec<PathBuf>,

    /// Acknowledge reloads without building an engine.
    pub api_only: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines.
    pub json: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9091".to_string(),
        }
    }
}
