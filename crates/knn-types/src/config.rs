//! Configuration loading for knn-cache.
//!
//! Layered config: defaults -> config file -> env vars; CLI flags are applied
//! by the daemon after loading. The default config file lives at
//! `~/.config/knn-cache/config.toml`.
//!
//! Dynamic behavior: [`SettingsManager`] holds the live settings and exposes a
//! `tokio::sync::watch` channel. The daemon subscribes and rebuilds the cache
//! when a cache- or engine-relevant value changes; breaker-only values take
//! effect on the next monitor tick without a rebuild.

use std::path::PathBuf;
use std::sync::RwLock;
use std::time::Duration;

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;

use crate::error::ConfigError;
use crate::limit::MemoryLimit;
use crate::space::SpaceType;

/// Native memory cache settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheSettings {
    /// Enable the weight bound (the memory circuit breaker).
    pub memory_circuit_breaker_enabled: bool,

    /// Weight bound: absolute size ("512mb") or percentage of physical
    /// memory ("50%").
    pub memory_limit: String,

    /// Enable idle-time expiry of cached entries.
    pub expiry_enabled: bool,

    /// Idle minutes after which an untouched entry is evicted.
    pub expiry_minutes: u64,

    /// Cadence of the maintenance pass (TTL sweep, watch-event drain).
    pub maintenance_interval_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            memory_circuit_breaker_enabled: true,
            memory_limit: "50%".to_string(),
            expiry_enabled: false,
            expiry_minutes: 180,
            maintenance_interval_secs: 60,
        }
    }
}

impl CacheSettings {
    /// Parse the configured weight bound.
    pub fn memory_limit(&self) -> Result<MemoryLimit, ConfigError> {
        self.memory_limit.parse()
    }

    /// The idle expiry duration, when enabled.
    pub fn expiry(&self) -> Option<Duration> {
        self.expiry_enabled
            .then(|| Duration::from_secs(self.expiry_minutes * 60))
    }
}

/// Circuit-breaker coordination settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BreakerSettings {
    /// The local capacity flag clears once footprint drops to or below this
    /// percentage of the weight bound.
    pub unset_percentage: f64,

    /// Coordinator tick interval in seconds.
    pub monitor_interval_secs: u64,

    /// Per-node bound on fleet stats polls, in seconds.
    pub poll_timeout_secs: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            unset_percentage: 75.0,
            monitor_interval_secs: 120,
            poll_timeout_secs: 10,
        }
    }
}

/// Engine parameters applied when an index is opened.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineSettings {
    /// Distance function indexes are opened with.
    pub space_type: SpaceType,

    /// HNSW search depth (ef). Higher is more accurate and slower.
    pub ef_search: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            space_type: SpaceType::Cosine,
            ef_search: 512,
        }
    }
}

/// Fleet topology. Single-node deployments keep the defaults: one node that
/// is its own coordinator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClusterSettings {
    /// This node's identifier.
    pub node_id: String,

    /// gRPC endpoints of every node in the fleet, including this one,
    /// as "node_id=host:port" pairs.
    pub nodes: Vec<String>,

    /// Node id of the elected coordinator (the only node that clears the
    /// cluster breaker flag).
    pub coordinator: String,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            node_id: "node-1".to_string(),
            nodes: Vec::new(),
            coordinator: "node-1".to_string(),
        }
    }
}

impl ClusterSettings {
    /// Whether this node runs the coordinator-only clear logic.
    pub fn is_coordinator(&self) -> bool {
        self.node_id == self.coordinator
    }

    /// Parse the `nodes` entries into (node_id, endpoint) pairs.
    pub fn endpoints(&self) -> Result<Vec<(String, String)>, ConfigError> {
        self.nodes
            .iter()
            .map(|entry| {
                entry
                    .split_once('=')
                    .map(|(id, addr)| (id.trim().to_string(), addr.trim().to_string()))
                    .ok_or_else(|| {
                        ConfigError::Invalid(format!(
                            "cluster.nodes entry '{entry}' is not 'node_id=host:port'"
                        ))
                    })
            })
            .collect()
    }
}

/// Main application settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Root directory holding one subdirectory of index files per group.
    pub data_root: String,

    /// gRPC server host.
    pub grpc_host: String,

    /// gRPC server port.
    pub grpc_port: u16,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub cache: CacheSettings,
    pub breaker: BreakerSettings,
    pub engine: EngineSettings,
    pub cluster: ClusterSettings,
}

fn default_data_root() -> String {
    ProjectDirs::from("", "", "knn-cache")
        .map(|p| p.data_local_dir().join("indices"))
        .unwrap_or_else(|| PathBuf::from("./indices"))
        .to_string_lossy()
        .to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            grpc_host: "0.0.0.0".to_string(),
            grpc_port: 50551,
            log_level: "info".to_string(),
            cache: CacheSettings::default(),
            breaker: BreakerSettings::default(),
            engine: EngineSettings::default(),
            cluster: ClusterSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/knn-cache/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (KNN_*)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, ConfigError> {
        let config_dir = ProjectDirs::from("", "", "knn-cache")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        builder = builder.add_source(Environment::with_prefix("KNN").separator("__"));

        // Every field carries a serde default, so sparse sources merge onto
        // the built-in defaults.
        let settings: Settings = builder
            .build()
            .map_err(|e| ConfigError::Load(e.to_string()))?
            .try_deserialize()
            .map_err(|e| ConfigError::Load(e.to_string()))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate settings values. Invalid values never reach the cache.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache.memory_limit()?;

        if !(0.0..=100.0).contains(&self.breaker.unset_percentage) {
            return Err(ConfigError::Invalid(format!(
                "breaker.unset_percentage must be 0-100, got {}",
                self.breaker.unset_percentage
            )));
        }
        if self.cache.expiry_enabled && self.cache.expiry_minutes == 0 {
            return Err(ConfigError::Invalid(
                "cache.expiry_minutes must be > 0 when expiry is enabled".to_string(),
            ));
        }
        if self.cache.maintenance_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "cache.maintenance_interval_secs must be > 0".to_string(),
            ));
        }
        if self.breaker.monitor_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "breaker.monitor_interval_secs must be > 0".to_string(),
            ));
        }
        if self.breaker.poll_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "breaker.poll_timeout_secs must be > 0".to_string(),
            ));
        }
        if self.engine.ef_search < 2 {
            return Err(ConfigError::Invalid(format!(
                "engine.ef_search must be >= 2, got {}",
                self.engine.ef_search
            )));
        }
        if self.cluster.node_id.is_empty() {
            return Err(ConfigError::Invalid("cluster.node_id must not be empty".to_string()));
        }
        self.cluster.endpoints()?;

        Ok(())
    }

    /// Whether a change between `self` and `next` requires a cache rebuild.
    ///
    /// Cache and engine values are baked into the live cache at build time;
    /// breaker values are read on every monitor tick.
    pub fn requires_rebuild(&self, next: &Settings) -> bool {
        self.cache != next.cache || self.engine != next.engine
    }
}

/// Holds the live settings and notifies subscribers on change.
pub struct SettingsManager {
    current: RwLock<Settings>,
    tx: watch::Sender<Settings>,
}

impl SettingsManager {
    pub fn new(settings: Settings) -> Self {
        let (tx, _rx) = watch::channel(settings.clone());
        Self {
            current: RwLock::new(settings),
            tx,
        }
    }

    /// A copy of the current settings.
    pub fn current(&self) -> Settings {
        self.current.read().unwrap().clone()
    }

    /// Subscribe to settings changes.
    pub fn subscribe(&self) -> watch::Receiver<Settings> {
        self.tx.subscribe()
    }

    /// Validate and apply new settings, notifying subscribers.
    pub fn update(&self, next: Settings) -> Result<(), ConfigError> {
        next.validate()?;
        {
            let mut guard = self.current.write().unwrap();
            *guard = next.clone();
        }
        info!("Settings updated");
        self.tx.send_replace(next);
        Ok(())
    }
}
