//! KNN cache daemon library exports.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (start, stop, status, client RPCs)

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands, InvalidateCommands, DEFAULT_ENDPOINT};
pub use commands::{
    handle_invalidate, handle_stats, handle_warmup, show_status, start_daemon, stop_daemon,
};
