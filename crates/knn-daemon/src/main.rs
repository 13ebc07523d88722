//! KNN Cache Daemon
//!
//! A bounded shared cache of native ANN index handles, served over gRPC.
//!
//! # Usage
//!
//! ```bash
//! knn-daemon start [--foreground] [--port PORT] [--data-root PATH]
//! knn-daemon stop
//! knn-daemon status
//! knn-daemon stats
//! knn-daemon warmup <GROUP>
//! knn-daemon invalidate key|group|all ...
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/knn-cache/config.toml)
//! 3. Environment variables (KNN_*)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use knn_daemon::{
    handle_invalidate, handle_stats, handle_warmup, show_status, start_daemon, stop_daemon, Cli,
    Commands,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            foreground,
            port,
            data_root,
        } => {
            start_daemon(
                cli.config.as_deref(),
                foreground,
                port,
                data_root.as_deref(),
                cli.log_level.as_deref(),
            )
            .await?;
        }
        Commands::Stop => {
            stop_daemon()?;
        }
        Commands::Status => {
            show_status()?;
        }
        Commands::Stats { endpoint } => {
            handle_stats(&endpoint).await?;
        }
        Commands::Warmup { endpoint, group } => {
            handle_warmup(&endpoint, &group).await?;
        }
        Commands::Invalidate { endpoint, command } => {
            handle_invalidate(&endpoint, command).await?;
        }
    }

    Ok(())
}
