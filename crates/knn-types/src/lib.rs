//! # knn-types
//!
//! Shared types for the knn-cache system.
//!
//! This crate defines the pieces every other crate agrees on:
//! - Settings: layered configuration with validation and change notification
//! - MemoryLimit: the circuit-breaker capacity limit (absolute or percentage)
//! - SpaceType: the vector space an engine is opened with
//! - Stats snapshots exposed to the observability surface

pub mod config;
pub mod error;
pub mod limit;
pub mod space;
pub mod stats;

pub use config::{
    BreakerSettings, CacheSettings, ClusterSettings, EngineSettings, Settings, SettingsManager,
};
pub use error::ConfigError;
pub use limit::MemoryLimit;
pub use space::SpaceType;
pub use stats::{CacheStatsSnapshot, GroupStats, NodeStatsSnapshot};
