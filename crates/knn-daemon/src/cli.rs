//! CLI argument parsing for the knn cache daemon.

use clap::{Parser, Subcommand};

/// Default gRPC endpoint of a locally running daemon.
pub const DEFAULT_ENDPOINT: &str = "http://[::1]:50551";

/// KNN Cache Daemon
///
/// Serves native ANN index handles out of a bounded shared cache.
#[derive(Parser, Debug)]
#[command(name = "knn-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/knn-cache/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Daemon commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the cache daemon
    Start {
        /// Run in foreground (don't daemonize)
        #[arg(short, long)]
        foreground: bool,

        /// Override gRPC port
        #[arg(short, long)]
        port: Option<u16>,

        /// Override the index data root directory
        #[arg(long)]
        data_root: Option<String>,
    },

    /// Stop the running daemon
    Stop,

    /// Show daemon status
    Status,

    /// Print cache and breaker stats from a running daemon
    Stats {
        /// gRPC endpoint
        #[arg(short, long, default_value = DEFAULT_ENDPOINT)]
        endpoint: String,
    },

    /// Pre-load every index file of a group
    Warmup {
        /// gRPC endpoint
        #[arg(short, long, default_value = DEFAULT_ENDPOINT)]
        endpoint: String,

        /// Group (subdirectory of the data root) to warm
        group: String,
    },

    /// Drop cached entries
    Invalidate {
        /// gRPC endpoint
        #[arg(short, long, default_value = DEFAULT_ENDPOINT)]
        endpoint: String,

        #[command(subcommand)]
        command: InvalidateCommands,
    },
}

/// Invalidation targets
#[derive(Subcommand, Debug, Clone)]
pub enum InvalidateCommands {
    /// Invalidate one cache key (an index file path)
    Key { key: String },

    /// Invalidate every entry of a group
    Group { group: String },

    /// Invalidate the whole cache
    All,
}
