//! Filesystem watch glue.
//!
//! One [`PathWatcher`] per process observes the backing file of every cache
//! entry. Deletions are forwarded, path-only, onto a tokio channel that the
//! cache's maintenance task maps back to keys and turns into invalidations —
//! the watcher knows nothing about cache internals.
//!
//! Watch registration fails if the path does not exist, so a not-yet-created
//! file can never be cached as valid.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use notify::event::{EventKind, ModifyKind};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::CacheError;

struct WatcherInner {
    watcher: Mutex<RecommendedWatcher>,
    deletions: mpsc::UnboundedSender<PathBuf>,
}

/// Owns the OS watcher and hands out per-path [`WatchHandle`]s.
pub struct PathWatcher {
    inner: Arc<WatcherInner>,
}

impl PathWatcher {
    /// Create the watcher. Returns the receiving end of the deletion stream;
    /// the cache's maintenance task drains it.
    pub fn new() -> Result<(Self, mpsc::UnboundedReceiver<PathBuf>), CacheError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let event_tx = tx.clone();

        let watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
            match result {
                Ok(event) => {
                    // A rename-away leaves nothing at the watched path, so it
                    // counts as a deletion for our purposes.
                    let gone = matches!(
                        event.kind,
                        EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_))
                    );
                    if gone {
                        for path in event.paths {
                            let _ = event_tx.send(path);
                        }
                    }
                }
                Err(e) => warn!(error = %e, "File watcher error"),
            }
        })?;

        Ok((
            Self {
                inner: Arc::new(WatcherInner {
                    watcher: Mutex::new(watcher),
                    deletions: tx,
                }),
            },
            rx,
        ))
    }

    /// Begin observing `path` for deletion.
    ///
    /// Errors if the path does not exist at registration time.
    pub fn watch(&self, path: &Path) -> Result<WatchHandle, CacheError> {
        if !path.exists() {
            return Err(CacheError::WatchPathMissing(path.to_path_buf()));
        }

        self.inner
            .watcher
            .lock()
            .unwrap()
            .watch(path, RecursiveMode::NonRecursive)?;
        debug!(path = %path.display(), "Watching index file");

        Ok(WatchHandle {
            inner: self.inner.clone(),
            path: path.to_path_buf(),
            stopped: AtomicBool::new(false),
        })
    }

    /// Push a synthetic deletion event onto the stream.
    ///
    /// Real OS watcher timing is too flaky to assert on in tests; this gives
    /// maintenance-path tests a deterministic trigger.
    pub fn inject_deletion_for_tests(&self, path: impl Into<PathBuf>) {
        let _ = self.inner.deletions.send(path.into());
    }
}

/// An active watch on one path. Stopping is idempotent; dropping stops.
pub struct WatchHandle {
    inner: Arc<WatcherInner>,
    path: PathBuf,
    stopped: AtomicBool,
}

impl WatchHandle {
    /// Stop observing the path. Safe to call more than once.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.inner.watcher.lock().unwrap().unwatch(&self.path) {
            // The OS may have dropped the watch with the file; nothing to do.
            debug!(path = %self.path.display(), error = %e, "Unwatch failed");
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
