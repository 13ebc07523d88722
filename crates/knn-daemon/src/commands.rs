//! Command implementations for the knn cache daemon.
//!
//! Handles:
//! - start: load config, wire the cache/breaker/service stack, serve gRPC
//! - stop: signal a running daemon via its PID file
//! - status: check whether a daemon is running
//! - stats/warmup/invalidate: client commands against a running daemon

use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use knn_breaker::{
    CapacityView, CircuitBreakerMonitor, CircuitBreakerState, ClusterFlagStore, FleetStats,
    InMemoryFlagStore, StaticClusterInfo,
};
use knn_cache::{
    spawn_teardown_executor, CacheConfig, NativeIndexCache, PathWatcher, SettingsEngineLoader,
};
use knn_engine::Catalog;
use knn_service::pb::invalidate_request::Target;
use knn_service::pb::knn_node_service_client::KnnNodeServiceClient;
use knn_service::pb::{GetStatsRequest, InvalidateRequest, WarmupRequest};
use knn_service::{run_server_with_shutdown, GrpcFleetStats, KnnNodeServiceImpl};
use knn_types::{Settings, SettingsManager};

use crate::cli::InvalidateCommands;

/// Get the PID file path
fn pid_file_path() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| {
            #[cfg(unix)]
            {
                dirs.runtime_dir()
                    .map(|p| p.to_path_buf())
                    .unwrap_or_else(|| dirs.cache_dir().to_path_buf())
            }
            #[cfg(not(unix))]
            {
                dirs.cache_dir().to_path_buf()
            }
        })
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("knn-cache")
        .join("daemon.pid")
}

fn write_pid_file() -> Result<()> {
    let pid_path = pid_file_path();
    if let Some(parent) = pid_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&pid_path, std::process::id().to_string())?;
    info!("Wrote PID file: {:?}", pid_path);
    Ok(())
}

fn remove_pid_file() {
    let pid_path = pid_file_path();
    if pid_path.exists() {
        if let Err(e) = fs::remove_file(&pid_path) {
            warn!("Failed to remove PID file: {}", e);
        } else {
            info!("Removed PID file");
        }
    }
}

fn read_pid_file() -> Option<u32> {
    fs::read_to_string(pid_file_path())
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

#[cfg(unix)]
fn is_process_running(pid: u32) -> bool {
    // Signal 0 checks for existence without delivering anything.
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn is_process_running(_pid: u32) -> bool {
    true
}

/// Start the cache daemon.
///
/// 1. Load configuration (defaults -> file -> env -> CLI)
/// 2. Wire the cache, breaker, and maintenance tasks
/// 3. Start the gRPC server
/// 4. Shut down gracefully on SIGINT/SIGTERM; reload config on SIGHUP
pub async fn start_daemon(
    config_path: Option<&str>,
    foreground: bool,
    port_override: Option<u16>,
    data_root_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<()> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;
    apply_overrides(
        &mut settings,
        port_override,
        data_root_override,
        log_level_override,
    );

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    info!("KNN cache daemon starting...");
    info!("Configuration:");
    info!("  Data root: {}", settings.data_root);
    info!("  gRPC address: {}:{}", settings.grpc_host, settings.grpc_port);
    info!("  Memory limit: {}", settings.cache.memory_limit);
    info!("  Node: {} (coordinator: {})", settings.cluster.node_id, settings.cluster.coordinator);

    if !foreground {
        warn!("Background mode not yet implemented, running in foreground");
        warn!("Use a process manager (systemd, launchd) for background operation");
    }

    fs::create_dir_all(&settings.data_root).context("Failed to create data root")?;

    let addr: SocketAddr = format!("{}:{}", settings.grpc_host, settings.grpc_port)
        .parse()
        .context("Invalid gRPC address")?;

    let settings_manager = Arc::new(SettingsManager::new(settings.clone()));
    let shutdown = CancellationToken::new();

    // Teardown executor: closes native handles off the query path.
    let (teardown_tx, teardown_rx) = mpsc::unbounded_channel();
    let teardown_task = spawn_teardown_executor(teardown_rx, shutdown.clone());

    // The cache and its maintenance loop.
    let (watcher, deletions) = PathWatcher::new().context("Failed to create file watcher")?;
    let (breaker, trip_rx) = CircuitBreakerState::new();
    let breaker = Arc::new(breaker);
    let cache_config =
        CacheConfig::from_settings(&settings.cache).context("Invalid cache settings")?;
    let cache = Arc::new(NativeIndexCache::new(
        cache_config,
        Catalog::new(&settings.data_root),
        Arc::new(SettingsEngineLoader::new(settings_manager.clone())),
        watcher,
        breaker.clone(),
        teardown_tx,
    ));
    let maintenance_task = cache.spawn_maintenance(deletions, shutdown.clone());

    // Breaker coordination. Single-node deployments poll themselves over
    // loopback, which exercises the same path as a real fleet.
    let flag_store: Arc<dyn ClusterFlagStore> = Arc::new(InMemoryFlagStore::new());
    let mut endpoints = settings.cluster.endpoints().context("Invalid cluster.nodes")?;
    if endpoints.is_empty() {
        endpoints.push((
            settings.cluster.node_id.clone(),
            format!("127.0.0.1:{}", settings.grpc_port),
        ));
    }
    let fleet: Arc<dyn FleetStats> = Arc::new(GrpcFleetStats::new(endpoints));
    let monitor = Arc::new(CircuitBreakerMonitor::new(
        breaker.clone(),
        cache.clone() as Arc<dyn CapacityView>,
        flag_store.clone(),
        Arc::new(StaticClusterInfo::new(
            &settings.cluster.node_id,
            &settings.cluster.coordinator,
        )),
        fleet,
        settings_manager.clone(),
    ));
    let monitor_task = tokio::spawn(monitor.run(trip_rx, shutdown.clone()));

    let rebuild_task = spawn_rebuild_on_change(cache.clone(), &settings_manager, shutdown.clone());

    #[cfg(unix)]
    let reload_task = spawn_sighup_reload(
        settings_manager.clone(),
        config_path.map(str::to_string),
        port_override,
        data_root_override.map(str::to_string),
        log_level_override.map(str::to_string),
        shutdown.clone(),
    );

    let service = KnnNodeServiceImpl::new(
        &settings.cluster.node_id,
        cache.clone(),
        breaker.clone(),
        flag_store.clone(),
    );

    write_pid_file()?;

    let shutdown_signal = {
        let shutdown = shutdown.clone();
        async move {
            let ctrl_c = async {
                signal::ctrl_c()
                    .await
                    .expect("Failed to install Ctrl+C handler");
            };

            #[cfg(unix)]
            let terminate = async {
                signal::unix::signal(signal::unix::SignalKind::terminate())
                    .expect("Failed to install SIGTERM handler")
                    .recv()
                    .await;
            };

            #[cfg(not(unix))]
            let terminate = std::future::pending::<()>();

            tokio::select! {
                _ = ctrl_c => {
                    info!("Received Ctrl+C, shutting down...");
                }
                _ = terminate => {
                    info!("Received SIGTERM, shutting down...");
                }
            }
            shutdown.cancel();
        }
    };

    let result = run_server_with_shutdown(addr, service, shutdown_signal).await;

    // Stop background tasks and drain the teardown queue.
    shutdown.cancel();
    let _ = maintenance_task.await;
    let _ = monitor_task.await;
    let _ = rebuild_task.await;
    #[cfg(unix)]
    let _ = reload_task.await;
    let _ = teardown_task.await;

    remove_pid_file();

    result.map_err(|e| anyhow::anyhow!("Server error: {}", e))
}

fn apply_overrides(
    settings: &mut Settings,
    port_override: Option<u16>,
    data_root_override: Option<&str>,
    log_level_override: Option<&str>,
) {
    if let Some(port) = port_override {
        settings.grpc_port = port;
    }
    if let Some(data_root) = data_root_override {
        settings.data_root = data_root.to_string();
    }
    if let Some(log_level) = log_level_override {
        settings.log_level = log_level.to_string();
    }
}

/// Rebuild the cache whenever a cache- or engine-relevant setting changes.
/// Breaker-only changes are picked up by the monitor without a rebuild.
fn spawn_rebuild_on_change(
    cache: Arc<NativeIndexCache>,
    settings_manager: &Arc<SettingsManager>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let mut rx = settings_manager.subscribe();
    tokio::spawn(async move {
        let mut current = rx.borrow().clone();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let next = rx.borrow().clone();
                    if current.requires_rebuild(&next) {
                        info!("Cache-relevant settings changed; rebuilding cache");
                        match CacheConfig::from_settings(&next.cache) {
                            Ok(config) => cache.rebuild(config),
                            Err(e) => error!(error = %e, "Settings change rejected: invalid cache config"),
                        }
                    }
                    current = next;
                }
            }
        }
    })
}

/// Reload configuration on SIGHUP, re-applying CLI overrides. The rebuild
/// watcher reacts if anything cache-relevant changed.
#[cfg(unix)]
fn spawn_sighup_reload(
    settings_manager: Arc<SettingsManager>,
    config_path: Option<String>,
    port_override: Option<u16>,
    data_root_override: Option<String>,
    log_level_override: Option<String>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut hangup = match signal::unix::signal(signal::unix::SignalKind::hangup()) {
            Ok(hangup) => hangup,
            Err(e) => {
                error!(error = %e, "Failed to install SIGHUP handler");
                return;
            }
        };
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = hangup.recv() => {
                    info!("Received SIGHUP, reloading configuration");
                    match Settings::load(config_path.as_deref()) {
                        Ok(mut next) => {
                            apply_overrides(
                                &mut next,
                                port_override,
                                data_root_override.as_deref(),
                                log_level_override.as_deref(),
                            );
                            if let Err(e) = settings_manager.update(next) {
                                error!(error = %e, "Reloaded settings rejected");
                            }
                        }
                        Err(e) => error!(error = %e, "Configuration reload failed"),
                    }
                }
            }
        }
    })
}

/// Stop the running daemon by sending SIGTERM.
pub fn stop_daemon() -> Result<()> {
    let pid = read_pid_file().context("No PID file found - daemon may not be running")?;

    if !is_process_running(pid) {
        remove_pid_file();
        anyhow::bail!("Daemon not running (stale PID file removed)");
    }

    info!("Stopping daemon (PID {})", pid);

    #[cfg(unix)]
    {
        unsafe {
            if libc::kill(pid as i32, libc::SIGTERM) != 0 {
                anyhow::bail!("Failed to send SIGTERM to daemon");
            }
        }
        println!("Sent SIGTERM to daemon (PID {})", pid);
    }

    #[cfg(not(unix))]
    {
        anyhow::bail!("Stop command not yet implemented on this platform");
    }

    Ok(())
}

/// Show daemon status.
pub fn show_status() -> Result<()> {
    let pid_path = pid_file_path();

    match read_pid_file() {
        Some(pid) if is_process_running(pid) => {
            println!("KNN cache daemon is running (PID {})", pid);
            println!("PID file: {:?}", pid_path);
            Ok(())
        }
        Some(pid) => {
            println!(
                "KNN cache daemon is NOT running (stale PID {} in {:?})",
                pid, pid_path
            );
            Ok(())
        }
        None => {
            println!("KNN cache daemon is NOT running (no PID file)");
            Ok(())
        }
    }
}

/// Print cache and breaker stats from a running daemon.
pub async fn handle_stats(endpoint: &str) -> Result<()> {
    let mut client = KnnNodeServiceClient::connect(endpoint.to_string())
        .await
        .context("Failed to connect to daemon")?;
    let stats = client.get_stats(GetStatsRequest {}).await?.into_inner();

    println!("Node: {}", stats.node_id);
    if stats.limit_enabled {
        println!(
            "Footprint: {} KiB / {} KiB ({:.1}%)",
            stats.total_footprint_kb, stats.limit_kb, stats.footprint_pct
        );
    } else {
        println!("Footprint: {} KiB (no limit)", stats.total_footprint_kb);
    }
    println!(
        "Hits: {}  Misses: {}  Evictions: {}  Load errors: {}",
        stats.hits, stats.misses, stats.evictions, stats.load_errors
    );
    println!(
        "Capacity reached: {}  Breaker triggered: {}",
        stats.cache_capacity_reached, stats.circuit_breaker_triggered
    );

    let mut groups: Vec<_> = stats.groups.into_iter().collect();
    groups.sort_by(|a, b| a.0.cmp(&b.0));
    for (name, group) in groups {
        println!("  {}: {} entries, {} KiB", name, group.entries, group.footprint_kb);
    }
    Ok(())
}

/// Ask a running daemon to warm a group.
pub async fn handle_warmup(endpoint: &str, group: &str) -> Result<()> {
    let mut client = KnnNodeServiceClient::connect(endpoint.to_string())
        .await
        .context("Failed to connect to daemon")?;
    let response = client
        .warmup(WarmupRequest {
            group: group.to_string(),
        })
        .await?
        .into_inner();
    println!(
        "Warmed group '{}': {} loaded, {} failed",
        group, response.loaded, response.failed
    );
    Ok(())
}

/// Ask a running daemon to invalidate cached entries.
pub async fn handle_invalidate(endpoint: &str, command: InvalidateCommands) -> Result<()> {
    let target = match command {
        InvalidateCommands::Key { key } => Target::Key(key),
        InvalidateCommands::Group { group } => Target::Group(group),
        InvalidateCommands::All => Target::All(true),
    };
    let mut client = KnnNodeServiceClient::connect(endpoint.to_string())
        .await
        .context("Failed to connect to daemon")?;
    client
        .invalidate(InvalidateRequest {
            target: Some(target),
        })
        .await?;
    println!("Invalidation applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pid_file_path() {
        let path = pid_file_path();
        assert!(path.ends_with("daemon.pid"));
        assert!(path
            .parent()
            .unwrap()
            .to_string_lossy()
            .contains("knn-cache"));
    }

    #[test]
    fn test_apply_overrides() {
        let mut settings = Settings::default();
        apply_overrides(&mut settings, Some(60001), Some("/srv/indices"), Some("debug"));
        assert_eq!(settings.grpc_port, 60001);
        assert_eq!(settings.data_root, "/srv/indices");
        assert_eq!(settings.log_level, "debug");

        apply_overrides(&mut settings, None, None, None);
        assert_eq!(settings.grpc_port, 60001);
    }
}
