//! Cache entries and their lifecycle.
//!
//! An entry owns three things: the native index handle, the filesystem watch
//! on its backing file, and the footprint it was charged at load time.
//! Callers hold entries through `Arc`, so an evicted entry stays usable until
//! the last in-flight query releases it; only then does `Drop` ship the
//! handle to the teardown executor. That makes the native close exactly-once
//! and keeps it off query threads, with no use-after-close window.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::Utc;
use knn_engine::NativeIndex;
use tokio::sync::mpsc;

use crate::watch::WatchHandle;

/// Why an entry left the cache. Recorded in eviction logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionCause {
    /// An explicit invalidation request.
    Explicit,
    /// Evicted to bring total weight back under the bound.
    Capacity,
    /// Idle longer than the configured expiry.
    Expired,
    /// The backing file disappeared.
    FileDeleted,
    /// The cache was rebuilt with new settings.
    Rebuilt,
}

impl EvictionCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionCause::Explicit => "explicit",
            EvictionCause::Capacity => "capacity",
            EvictionCause::Expired => "expired",
            EvictionCause::FileDeleted => "file_deleted",
            EvictionCause::Rebuilt => "rebuilt",
        }
    }
}

/// A handle handed to the teardown executor for closing.
pub struct Teardown {
    pub key: String,
    pub index: Box<dyn NativeIndex>,
}

/// One cached native index.
pub struct CacheEntry {
    key: String,
    group: String,
    footprint_kb: u64,
    /// Epoch millis of the last lookup that returned this entry.
    last_access: AtomicI64,
    watch: WatchHandle,
    /// `Some` from construction until `Drop` takes it for teardown.
    index: Option<Box<dyn NativeIndex>>,
    teardown: mpsc::UnboundedSender<Teardown>,
}

impl CacheEntry {
    pub(crate) fn new(
        key: impl Into<String>,
        group: impl Into<String>,
        index: Box<dyn NativeIndex>,
        watch: WatchHandle,
        teardown: mpsc::UnboundedSender<Teardown>,
    ) -> Self {
        let footprint_kb = index.footprint_kb();
        Self {
            key: key.into(),
            group: group.into(),
            footprint_kb,
            last_access: AtomicI64::new(Utc::now().timestamp_millis()),
            watch,
            index: Some(index),
            teardown,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// The weight this entry was charged at load time. Never re-measured.
    pub fn footprint_kb(&self) -> u64 {
        self.footprint_kb
    }

    /// The loaded index. Valid for the lifetime of the handle, even after
    /// the entry is evicted.
    pub fn index(&self) -> &dyn NativeIndex {
        match &self.index {
            Some(index) => index.as_ref(),
            None => unreachable!("index is taken only in Drop"),
        }
    }

    pub(crate) fn touch(&self) {
        self.last_access
            .store(Utc::now().timestamp_millis(), Ordering::SeqCst);
    }

    pub(crate) fn last_access_millis(&self) -> i64 {
        self.last_access.load(Ordering::SeqCst)
    }

    pub(crate) fn idle_exceeds(&self, expiry: Duration, now_millis: i64) -> bool {
        now_millis - self.last_access_millis() >= expiry.as_millis() as i64
    }

    /// Stop observing the backing file. Called at eviction time so deletion
    /// events for untracked entries stop flowing; idempotent with the stop
    /// in `Drop`.
    pub(crate) fn stop_watch(&self) {
        self.watch.stop();
    }
}

impl Drop for CacheEntry {
    fn drop(&mut self) {
        self.watch.stop();
        if let Some(index) = self.index.take() {
            let message = Teardown {
                key: self.key.clone(),
                index,
            };
            if let Err(unsent) = self.teardown.send(message) {
                // Executor already stopped (shutdown); close inline.
                drop(unsent.0);
            }
        }
    }
}
