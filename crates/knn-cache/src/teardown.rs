//! The index teardown executor.
//!
//! A single background task receives handles from dropped [`CacheEntry`]s
//! and closes them one at a time on the blocking pool. Query tasks never
//! pay for a native close, and each handle is closed exactly once.
//!
//! [`CacheEntry`]: crate::entry::CacheEntry

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::entry::Teardown;

/// Spawn the executor. On shutdown it drains whatever is already queued
/// before exiting, so no handle leaks past the cancellation.
pub fn spawn_teardown_executor(
    mut rx: mpsc::UnboundedReceiver<Teardown>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                message = rx.recv() => match message {
                    Some(teardown) => close_index(teardown).await,
                    None => break,
                },
            }
        }
        rx.close();
        while let Some(teardown) = rx.recv().await {
            close_index(teardown).await;
        }
        info!("Index teardown executor stopped");
    })
}

async fn close_index(teardown: Teardown) {
    let Teardown { key, index } = teardown;
    // Native close can touch the filesystem; keep it off the async workers.
    match tokio::task::spawn_blocking(move || drop(index)).await {
        Ok(()) => debug!(key, "Closed native index"),
        Err(e) => error!(key, error = %e, "Native index close panicked"),
    }
}
