//! The bounded native index cache.
//!
//! Lookup is single-flight: concurrent requests for an absent key run one
//! load; the rest wait on a watch channel and re-check. Weight accounting is
//! charged at publication time and released at eviction, so the accumulator
//! always equals the sum of live entry footprints.
//!
//! Rebuild swaps the whole shard behind an `RwLock<Arc<_>>`. Loads already
//! in flight against the retired shard complete and hand their caller a
//! valid handle, but never publish into it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use knn_breaker::{CapacityView, CircuitBreakerState};
use knn_engine::Catalog;
use knn_types::{CacheSettings, CacheStatsSnapshot, GroupStats};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::entry::{CacheEntry, EvictionCause, Teardown};
use crate::error::CacheError;
use crate::loader::IndexLoader;
use crate::watch::PathWatcher;

/// Resolved cache parameters. Fixed for the lifetime of one shard; a
/// settings change produces a new config and a rebuild.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Weight bound in KiB. `None` disables weight eviction and the breaker.
    pub weight_limit_kb: Option<u64>,
    /// Idle expiry. `None` disables the TTL sweep.
    pub expiry: Option<Duration>,
    /// Cadence of the maintenance pass.
    pub maintenance_interval: Duration,
}

impl CacheConfig {
    /// Resolve settings into concrete bounds, probing physical memory for
    /// percentage limits.
    pub fn from_settings(settings: &CacheSettings) -> Result<Self, CacheError> {
        let weight_limit_kb = if settings.memory_circuit_breaker_enabled {
            Some(settings.memory_limit()?.resolve_kb())
        } else {
            None
        };
        Ok(Self {
            weight_limit_kb,
            expiry: settings.expiry(),
            maintenance_interval: Duration::from_secs(settings.maintenance_interval_secs),
        })
    }
}

/// Counts from a warmup pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct WarmupSummary {
    pub loaded: usize,
    pub failed: usize,
}

struct LoadingSlot {
    /// Identifies the owning load; a runner only publishes or removes a
    /// slot that still carries its token.
    token: u64,
    rx: watch::Receiver<()>,
    /// Set by invalidation while the load is in flight. The slot stays (to
    /// preserve single-flight) but the result is never published.
    doomed: Arc<AtomicBool>,
}

enum Slot {
    Loading(LoadingSlot),
    Ready(Arc<CacheEntry>),
}

/// One generation of the cache. Replaced wholesale on rebuild.
struct CacheShard {
    config: CacheConfig,
    entries: DashMap<String, Slot>,
    /// Sum of Ready entry footprints, in KiB.
    total_kb: AtomicU64,
    /// Set when this shard has been replaced; publication checks it.
    retired: AtomicBool,
    next_token: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    load_errors: AtomicU64,
}

impl CacheShard {
    fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: DashMap::new(),
            total_kb: AtomicU64::new(0),
            retired: AtomicBool::new(false),
            next_token: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            load_errors: AtomicU64::new(0),
        }
    }
}

enum Action {
    Hit(Arc<CacheEntry>),
    Wait(watch::Receiver<()>),
    Load {
        token: u64,
        doomed: Arc<AtomicBool>,
        wake: watch::Sender<()>,
    },
}

/// The shared cache of loaded native indexes.
pub struct NativeIndexCache {
    shard: RwLock<Arc<CacheShard>>,
    catalog: Catalog,
    loader: Arc<dyn IndexLoader>,
    watcher: PathWatcher,
    breaker: Arc<CircuitBreakerState>,
    teardown_tx: mpsc::UnboundedSender<Teardown>,
}

impl NativeIndexCache {
    pub fn new(
        config: CacheConfig,
        catalog: Catalog,
        loader: Arc<dyn IndexLoader>,
        watcher: PathWatcher,
        breaker: Arc<CircuitBreakerState>,
        teardown_tx: mpsc::UnboundedSender<Teardown>,
    ) -> Self {
        Self {
            shard: RwLock::new(Arc::new(CacheShard::new(config))),
            catalog,
            loader,
            watcher,
            breaker,
            teardown_tx,
        }
    }

    fn current_shard(&self) -> Arc<CacheShard> {
        self.shard.read().unwrap().clone()
    }

    /// Look up `key`, loading it if absent. Concurrent callers for the same
    /// absent key share one load.
    pub async fn get(&self, key: &str) -> Result<Arc<CacheEntry>, CacheError> {
        loop {
            let shard = self.current_shard();
            let action = self.classify(&shard, key);
            match action {
                Action::Hit(entry) => {
                    shard.hits.fetch_add(1, Ordering::SeqCst);
                    return Ok(entry);
                }
                Action::Wait(mut rx) => {
                    // Wakes on publish or removal either way; re-check.
                    let _ = rx.changed().await;
                }
                Action::Load {
                    token,
                    doomed,
                    wake,
                } => return self.run_load(shard, key, token, doomed, wake).await,
            }
        }
    }

    /// Decide what `get` does with the current slot state.
    fn classify(&self, shard: &CacheShard, key: &str) -> Action {
        // An expired hit counts as a miss: evict it first so the lookup
        // falls through to a fresh load.
        if let Some(expiry) = shard.config.expiry {
            let now_millis = Utc::now().timestamp_millis();
            self.evict_ready_if(shard, key, EvictionCause::Expired, |entry| {
                entry.idle_exceeds(expiry, now_millis)
            });
        }

        match shard.entries.entry(key.to_string()) {
            Entry::Occupied(occupied) => match occupied.get() {
                Slot::Ready(entry) => {
                    entry.touch();
                    Action::Hit(entry.clone())
                }
                Slot::Loading(loading) => Action::Wait(loading.rx.clone()),
            },
            Entry::Vacant(vacant) => {
                let (wake, rx) = watch::channel(());
                let token = shard.next_token.fetch_add(1, Ordering::SeqCst);
                let doomed = Arc::new(AtomicBool::new(false));
                vacant.insert(Slot::Loading(LoadingSlot {
                    token,
                    rx,
                    doomed: doomed.clone(),
                }));
                Action::Load {
                    token,
                    doomed,
                    wake,
                }
            }
        }
    }

    async fn run_load(
        &self,
        shard: Arc<CacheShard>,
        key: &str,
        token: u64,
        doomed: Arc<AtomicBool>,
        wake: watch::Sender<()>,
    ) -> Result<Arc<CacheEntry>, CacheError> {
        shard.misses.fetch_add(1, Ordering::SeqCst);

        let loaded = self.load_entry(key).await;
        let result = match loaded {
            Ok(entry) => {
                let entry = Arc::new(entry);
                if self.try_publish(&shard, key, token, &doomed, &entry) {
                    info!(
                        key,
                        group = entry.group(),
                        footprint_kb = entry.footprint_kb(),
                        "Loaded native index"
                    );
                    // The deletion watch only covers the entry once it is
                    // published; re-check that the file survived the load.
                    if !Path::new(key).is_file() {
                        self.evict_ready_if(&shard, key, EvictionCause::FileDeleted, |_| true);
                        Err(CacheError::DeletedDuringLoad(PathBuf::from(key)))
                    } else {
                        self.enforce_weight(&shard);
                        Ok(entry)
                    }
                } else {
                    // Invalidated or rebuilt away mid-load. The caller still
                    // gets a working handle; it just is not tracked, and its
                    // drop ships the index to teardown as usual.
                    self.remove_loading_slot(&shard, key, token);
                    entry.stop_watch();
                    Ok(entry)
                }
            }
            Err(e) => {
                self.remove_loading_slot(&shard, key, token);
                shard.load_errors.fetch_add(1, Ordering::SeqCst);
                warn!(key, error = %e, "Native index load failed");
                Err(e)
            }
        };

        // Publish-or-remove happens before the wake so woken waiters never
        // re-observe this load's slot.
        let _ = wake.send(());
        result
    }

    async fn load_entry(&self, key: &str) -> Result<CacheEntry, CacheError> {
        let path = PathBuf::from(key);
        // Watch before load: a deletion racing the open is either seen by
        // the watch or fails the open, never silently missed.
        let watch = self.watcher.watch(&path)?;

        let loader = self.loader.clone();
        let load_path = path.clone();
        let index = tokio::task::spawn_blocking(move || loader.load(&load_path))
            .await
            .map_err(|e| CacheError::LoadTask(e.to_string()))??;

        let group = self.group_of(key);
        Ok(CacheEntry::new(
            key,
            group,
            index,
            watch,
            self.teardown_tx.clone(),
        ))
    }

    /// Swap the Loading slot to Ready and charge the footprint. Refuses if
    /// the load was doomed, the shard retired, or the slot re-owned.
    fn try_publish(
        &self,
        shard: &CacheShard,
        key: &str,
        token: u64,
        doomed: &AtomicBool,
        entry: &Arc<CacheEntry>,
    ) -> bool {
        let Some(mut slot) = shard.entries.get_mut(key) else {
            return false;
        };
        let Slot::Loading(loading) = slot.value() else {
            return false;
        };
        if loading.token != token
            || doomed.load(Ordering::SeqCst)
            || shard.retired.load(Ordering::SeqCst)
        {
            return false;
        }
        *slot.value_mut() = Slot::Ready(entry.clone());
        shard.total_kb.fetch_add(entry.footprint_kb(), Ordering::SeqCst);
        true
    }

    fn remove_loading_slot(&self, shard: &CacheShard, key: &str, token: u64) {
        shard.entries.remove_if(key, |_, slot| {
            matches!(slot, Slot::Loading(loading) if loading.token == token)
        });
    }

    /// Evict least-recently-used entries until total weight fits the bound.
    /// Every capacity eviction trips the breaker.
    fn enforce_weight(&self, shard: &CacheShard) {
        let Some(limit_kb) = shard.config.weight_limit_kb else {
            return;
        };
        while shard.total_kb.load(Ordering::SeqCst) > limit_kb {
            let victim = shard
                .entries
                .iter()
                .filter_map(|slot| match slot.value() {
                    Slot::Ready(entry) => Some((slot.key().clone(), entry.last_access_millis())),
                    Slot::Loading(_) => None,
                })
                .min_by_key(|(_, at)| *at)
                .map(|(key, _)| key);
            let Some(victim) = victim else {
                break;
            };
            if self.evict_ready_if(shard, &victim, EvictionCause::Capacity, |_| true) {
                self.breaker.trip();
            }
        }
    }

    /// Remove a Ready entry matching `predicate` and release its weight.
    fn evict_ready_if(
        &self,
        shard: &CacheShard,
        key: &str,
        cause: EvictionCause,
        predicate: impl Fn(&Arc<CacheEntry>) -> bool,
    ) -> bool {
        let removed = shard.entries.remove_if(key, |_, slot| match slot {
            Slot::Ready(entry) => predicate(entry),
            Slot::Loading(_) => false,
        });
        match removed {
            Some((_, Slot::Ready(entry))) => {
                self.account_eviction(shard, &entry, cause);
                true
            }
            _ => false,
        }
    }

    fn account_eviction(&self, shard: &CacheShard, entry: &Arc<CacheEntry>, cause: EvictionCause) {
        shard
            .total_kb
            .fetch_sub(entry.footprint_kb(), Ordering::SeqCst);
        shard.evictions.fetch_add(1, Ordering::SeqCst);
        entry.stop_watch();
        info!(
            key = entry.key(),
            cause = cause.as_str(),
            footprint_kb = entry.footprint_kb(),
            "Evicted native index"
        );
    }

    /// Invalidate one key. Ready entries are evicted; in-flight loads are
    /// doomed so their result is discarded instead of published.
    pub fn invalidate(&self, key: &str) {
        let shard = self.current_shard();
        self.invalidate_on(&shard, key, EvictionCause::Explicit);
    }

    fn invalidate_on(&self, shard: &CacheShard, key: &str, cause: EvictionCause) {
        if let Some(slot) = shard.entries.get(key) {
            if let Slot::Loading(loading) = slot.value() {
                loading.doomed.store(true, Ordering::SeqCst);
                return;
            }
        }
        self.evict_ready_if(shard, key, cause, |_| true);
    }

    /// Invalidate every key belonging to `group`.
    pub fn invalidate_group(&self, group: &str) {
        let shard = self.current_shard();
        let keys: Vec<String> = shard
            .entries
            .iter()
            .map(|slot| slot.key().clone())
            .filter(|key| self.group_of(key) == group)
            .collect();
        for key in keys {
            self.invalidate_on(&shard, &key, EvictionCause::Explicit);
        }
    }

    /// Invalidate everything in the current shard.
    pub fn invalidate_all(&self) {
        let shard = self.current_shard();
        let keys: Vec<String> = shard.entries.iter().map(|slot| slot.key().clone()).collect();
        for key in keys {
            self.invalidate_on(&shard, &key, EvictionCause::Explicit);
        }
    }

    /// Atomically replace the cache with an empty one under `config`.
    ///
    /// Readers never observe a partially rebuilt cache: they hold either the
    /// old shard or the new one. The old shard is retired first so loads
    /// racing the swap cannot publish into it.
    pub fn rebuild(&self, config: CacheConfig) {
        let old = {
            let mut guard = self.shard.write().unwrap();
            guard.retired.store(true, Ordering::SeqCst);
            std::mem::replace(&mut *guard, Arc::new(CacheShard::new(config)))
        };
        let keys: Vec<String> = old.entries.iter().map(|slot| slot.key().clone()).collect();
        for key in keys {
            self.invalidate_on(&old, &key, EvictionCause::Rebuilt);
        }
        info!("Native index cache rebuilt");
    }

    /// Pre-load every index file of `group` from the catalog.
    ///
    /// Failures are counted, not fatal: a warmup that loads most of a group
    /// is still useful.
    pub async fn warm(&self, group: &str) -> Result<WarmupSummary, CacheError> {
        let keys = self.catalog.keys_for_group(group)?;
        let mut summary = WarmupSummary::default();
        for (key, _) in keys {
            match self.get(&key).await {
                Ok(_) => summary.loaded += 1,
                Err(e) => {
                    warn!(key, error = %e, "Warmup load failed");
                    summary.failed += 1;
                }
            }
        }
        info!(group, loaded = summary.loaded, failed = summary.failed, "Warmup finished");
        Ok(summary)
    }

    /// Snapshot totals, per-group aggregates, and lifetime counters.
    pub fn stats(&self) -> CacheStatsSnapshot {
        let shard = self.current_shard();
        let mut groups: HashMap<String, GroupStats> = HashMap::new();
        for slot in shard.entries.iter() {
            if let Slot::Ready(entry) = slot.value() {
                let group = groups.entry(entry.group().to_string()).or_default();
                group.entries += 1;
                group.footprint_kb += entry.footprint_kb();
            }
        }
        let total_footprint_kb = shard.total_kb.load(Ordering::SeqCst);
        let limit_kb = shard.config.weight_limit_kb;
        CacheStatsSnapshot {
            total_footprint_kb,
            limit_kb,
            footprint_pct: CacheStatsSnapshot::percentage(total_footprint_kb, limit_kb),
            groups,
            hits: shard.hits.load(Ordering::SeqCst),
            misses: shard.misses.load(Ordering::SeqCst),
            evictions: shard.evictions.load(Ordering::SeqCst),
            load_errors: shard.load_errors.load(Ordering::SeqCst),
        }
    }

    /// Summed footprint of the loaded entries belonging to `group`.
    pub fn group_footprint_kb(&self, group: &str) -> u64 {
        self.current_shard()
            .entries
            .iter()
            .filter_map(|slot| match slot.value() {
                Slot::Ready(entry) if entry.group() == group => Some(entry.footprint_kb()),
                _ => None,
            })
            .sum()
    }

    /// Keys of the loaded entries belonging to `group`.
    pub fn group_keys(&self, group: &str) -> Vec<String> {
        self.current_shard()
            .entries
            .iter()
            .filter(|slot| match slot.value() {
                Slot::Ready(entry) => entry.group() == group,
                Slot::Loading { .. } => false,
            })
            .map(|slot| slot.key().clone())
            .collect()
    }

    /// Whether `key` is currently cached and loaded.
    pub fn contains(&self, key: &str) -> bool {
        self.current_shard()
            .entries
            .get(key)
            .is_some_and(|slot| matches!(slot.value(), Slot::Ready(_)))
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    fn group_of(&self, key: &str) -> String {
        Path::new(key)
            .strip_prefix(self.catalog.root())
            .ok()
            .and_then(|relative| relative.components().next())
            .map(|component| component.as_os_str().to_string_lossy().to_string())
            .unwrap_or_default()
    }

    fn handle_deletion(&self, path: &Path) {
        let key = path.to_string_lossy();
        info!(key = %key, "Backing file deleted; invalidating");
        let shard = self.current_shard();
        self.invalidate_on(&shard, &key, EvictionCause::FileDeleted);
    }

    fn sweep_expired(&self) {
        let shard = self.current_shard();
        let Some(expiry) = shard.config.expiry else {
            return;
        };
        let now_millis = Utc::now().timestamp_millis();
        let candidates: Vec<String> = shard
            .entries
            .iter()
            .filter_map(|slot| match slot.value() {
                Slot::Ready(entry) if entry.idle_exceeds(expiry, now_millis) => {
                    Some(slot.key().clone())
                }
                _ => None,
            })
            .collect();
        for key in candidates {
            // Re-checked under the removal so a fresh touch wins the race.
            self.evict_ready_if(&shard, &key, EvictionCause::Expired, |entry| {
                entry.idle_exceeds(expiry, now_millis)
            });
        }
    }

    /// Spawn the maintenance task: drains deletion events from the watcher
    /// and runs the TTL sweep on the configured cadence.
    pub fn spawn_maintenance(
        self: &Arc<Self>,
        mut deletions: mpsc::UnboundedReceiver<PathBuf>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut deletions_open = true;
            loop {
                let period = cache.current_shard().config.maintenance_interval;
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(period) => cache.sweep_expired(),
                    event = deletions.recv(), if deletions_open => match event {
                        Some(path) => cache.handle_deletion(&path),
                        None => deletions_open = false,
                    },
                }
            }
            info!("Cache maintenance task stopped");
        })
    }
}

impl CapacityView for NativeIndexCache {
    fn footprint_kb(&self) -> u64 {
        self.current_shard().total_kb.load(Ordering::SeqCst)
    }

    fn weight_limit_kb(&self) -> Option<u64> {
        self.current_shard().config.weight_limit_kb
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::fs;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    use knn_engine::{EngineError, Neighbor};
    use tempfile::TempDir;

    struct MockIndex {
        footprint_kb: u64,
        drops: Arc<AtomicUsize>,
    }

    impl Drop for MockIndex {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl knn_engine::NativeIndex for MockIndex {
        fn dimensions(&self) -> usize {
            3
        }
        fn len(&self) -> usize {
            1
        }
        fn search(&self, _query: &[f32], _k: usize) -> Result<Vec<Neighbor>, EngineError> {
            Ok(vec![Neighbor::new(0, 0.0)])
        }
        fn footprint_kb(&self) -> u64 {
            self.footprint_kb
        }
    }

    struct MockLoader {
        footprint_kb: u64,
        delay: Option<Duration>,
        fail_paths: Mutex<HashSet<PathBuf>>,
        loads: AtomicUsize,
        drops: Arc<AtomicUsize>,
    }

    impl MockLoader {
        fn new(footprint_kb: u64) -> Self {
            Self {
                footprint_kb,
                delay: None,
                fail_paths: Mutex::new(HashSet::new()),
                loads: AtomicUsize::new(0),
                drops: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn with_delay(footprint_kb: u64, delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::new(footprint_kb)
            }
        }

        fn fail_for(&self, path: impl Into<PathBuf>) {
            self.fail_paths.lock().unwrap().insert(path.into());
        }

        fn loads(&self) -> usize {
            self.loads.load(Ordering::SeqCst)
        }

        fn drops(&self) -> usize {
            self.drops.load(Ordering::SeqCst)
        }
    }

    impl IndexLoader for MockLoader {
        fn load(&self, path: &Path) -> Result<Box<dyn knn_engine::NativeIndex>, EngineError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            if self.fail_paths.lock().unwrap().contains(path) {
                return Err(EngineError::Index("injected load failure".to_string()));
            }
            Ok(Box::new(MockIndex {
                footprint_kb: self.footprint_kb,
                drops: self.drops.clone(),
            }))
        }
    }

    struct Fixture {
        cache: Arc<NativeIndexCache>,
        loader: Arc<MockLoader>,
        breaker: Arc<CircuitBreakerState>,
        trip_rx: mpsc::UnboundedReceiver<()>,
        teardown_rx: mpsc::UnboundedReceiver<Teardown>,
        deletions: Option<mpsc::UnboundedReceiver<PathBuf>>,
        temp: TempDir,
    }

    impl Fixture {
        fn new(loader: MockLoader, config: CacheConfig) -> Self {
            let temp = TempDir::new().unwrap();
            let loader = Arc::new(loader);
            let (watcher, deletions) = PathWatcher::new().unwrap();
            let (breaker, trip_rx) = CircuitBreakerState::new();
            let breaker = Arc::new(breaker);
            let (teardown_tx, teardown_rx) = mpsc::unbounded_channel();
            let cache = Arc::new(NativeIndexCache::new(
                config,
                Catalog::new(temp.path()),
                loader.clone(),
                watcher,
                breaker.clone(),
                teardown_tx,
            ));
            Self {
                cache,
                loader,
                breaker,
                trip_rx,
                teardown_rx,
                deletions: Some(deletions),
                temp,
            }
        }

        /// Create a real file under `<root>/<group>/<name>` to back a key.
        fn index_file(&self, group: &str, name: &str) -> String {
            let dir = self.temp.path().join(group);
            fs::create_dir_all(&dir).unwrap();
            let path = dir.join(name);
            fs::write(&path, b"x").unwrap();
            path.to_string_lossy().to_string()
        }

        /// How many teardown messages are queued; dropping them closes the
        /// mock indexes.
        fn drain_teardowns(&mut self) -> usize {
            let mut count = 0;
            while self.teardown_rx.try_recv().is_ok() {
                count += 1;
            }
            count
        }
    }

    fn unbounded() -> CacheConfig {
        CacheConfig {
            weight_limit_kb: None,
            expiry: None,
            maintenance_interval: Duration::from_secs(60),
        }
    }

    fn bounded(limit_kb: u64) -> CacheConfig {
        CacheConfig {
            weight_limit_kb: Some(limit_kb),
            ..unbounded()
        }
    }

    #[tokio::test]
    async fn test_load_then_hit() {
        let fixture = Fixture::new(MockLoader::new(40), unbounded());
        let key = fixture.index_file("products", "seg_0.usearch");

        let first = fixture.cache.get(&key).await.unwrap();
        assert_eq!(first.footprint_kb(), 40);
        assert_eq!(first.group(), "products");

        let second = fixture.cache.get(&key).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(fixture.loader.loads(), 1);

        let stats = fixture.cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.total_footprint_kb, 40);
    }

    #[tokio::test]
    async fn test_concurrent_gets_share_one_load() {
        let fixture = Fixture::new(
            MockLoader::with_delay(40, Duration::from_millis(100)),
            unbounded(),
        );
        let key = fixture.index_file("products", "seg_0.usearch");

        let (a, b, c) = tokio::join!(
            fixture.cache.get(&key),
            fixture.cache.get(&key),
            fixture.cache.get(&key),
        );
        let a = a.unwrap();
        assert!(Arc::ptr_eq(&a, &b.unwrap()));
        assert!(Arc::ptr_eq(&a, &c.unwrap()));
        assert_eq!(fixture.loader.loads(), 1);
        assert_eq!(fixture.cache.stats().total_footprint_kb, 40);
    }

    #[tokio::test]
    async fn test_capacity_eviction_keeps_newest_and_trips_breaker() {
        let mut fixture = Fixture::new(MockLoader::new(40), bounded(70));
        let a = fixture.index_file("products", "seg_a.usearch");
        let b = fixture.index_file("products", "seg_b.usearch");
        let c = fixture.index_file("products", "seg_c.usearch");

        fixture.cache.get(&a).await.unwrap();
        assert!(!fixture.breaker.is_capacity_reached());

        // Second load totals 80 KiB > 70: the older entry goes.
        fixture.cache.get(&b).await.unwrap();
        assert!(!fixture.cache.contains(&a));
        assert!(fixture.cache.contains(&b));
        assert!(fixture.breaker.is_capacity_reached());
        assert!(fixture.trip_rx.try_recv().is_ok());

        fixture.cache.get(&c).await.unwrap();
        assert!(!fixture.cache.contains(&b));
        assert!(fixture.cache.contains(&c));
        assert_eq!(fixture.cache.stats().total_footprint_kb, 40);
        assert_eq!(fixture.cache.stats().evictions, 2);

        // Evicted handles were only held by the cache; both reached the
        // teardown queue.
        assert_eq!(fixture.drain_teardowns(), 2);
    }

    #[tokio::test]
    async fn test_accounting_matches_live_entries() {
        let fixture = Fixture::new(MockLoader::new(10), bounded(100));
        for i in 0..5 {
            let key = fixture.index_file("products", &format!("seg_{i}.usearch"));
            fixture.cache.get(&key).await.unwrap();
        }
        let stats = fixture.cache.stats();
        let group_total: u64 = stats.groups.values().map(|g| g.footprint_kb).sum();
        assert_eq!(stats.total_footprint_kb, group_total);
        assert_eq!(stats.total_footprint_kb, 50);
        assert_eq!(stats.groups["products"].entries, 5);
        assert_eq!(stats.footprint_pct, 50.0);
    }

    #[tokio::test]
    async fn test_failed_load_is_not_cached() {
        let fixture = Fixture::new(MockLoader::new(40), unbounded());
        let key = fixture.index_file("products", "seg_0.usearch");
        fixture.loader.fail_for(&key);

        assert!(fixture.cache.get(&key).await.is_err());
        assert!(!fixture.cache.contains(&key));

        // Next lookup retries rather than serving a cached failure.
        assert!(fixture.cache.get(&key).await.is_err());
        assert_eq!(fixture.loader.loads(), 2);
        assert_eq!(fixture.cache.stats().load_errors, 2);
        assert_eq!(fixture.cache.stats().total_footprint_kb, 0);
    }

    #[tokio::test]
    async fn test_load_fails_for_missing_file() {
        let fixture = Fixture::new(MockLoader::new(40), unbounded());
        let missing = fixture.temp.path().join("products/none.usearch");
        let result = fixture.cache.get(&missing.to_string_lossy()).await;
        assert!(matches!(result, Err(CacheError::WatchPathMissing(_))));
        // The loader never ran; watch registration failed first.
        assert_eq!(fixture.loader.loads(), 0);
    }

    #[tokio::test]
    async fn test_explicit_invalidation() {
        let mut fixture = Fixture::new(MockLoader::new(40), unbounded());
        let key = fixture.index_file("products", "seg_0.usearch");

        fixture.cache.get(&key).await.unwrap();
        fixture.cache.invalidate(&key);
        assert!(!fixture.cache.contains(&key));
        assert_eq!(fixture.cache.stats().total_footprint_kb, 0);
        assert_eq!(fixture.drain_teardowns(), 1);

        fixture.cache.get(&key).await.unwrap();
        assert_eq!(fixture.loader.loads(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_during_load_discards_result() {
        let fixture = Fixture::new(
            MockLoader::with_delay(40, Duration::from_millis(200)),
            unbounded(),
        );
        let key = fixture.index_file("products", "seg_0.usearch");

        let cache = fixture.cache.clone();
        let load_key = key.clone();
        let load = tokio::spawn(async move { cache.get(&load_key).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        fixture.cache.invalidate(&key);

        // The loading caller still gets a working handle.
        let entry = load.await.unwrap().unwrap();
        assert_eq!(entry.footprint_kb(), 40);

        // But nothing was published or charged.
        assert!(!fixture.cache.contains(&key));
        assert_eq!(fixture.cache.stats().total_footprint_kb, 0);

        fixture.cache.get(&key).await.unwrap();
        assert_eq!(fixture.loader.loads(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_group_spares_other_groups() {
        let fixture = Fixture::new(MockLoader::new(10), unbounded());
        let p0 = fixture.index_file("products", "seg_0.usearch");
        let p1 = fixture.index_file("products", "seg_1.usearch");
        let r0 = fixture.index_file("reviews", "seg_0.usearch");

        fixture.cache.get(&p0).await.unwrap();
        fixture.cache.get(&p1).await.unwrap();
        fixture.cache.get(&r0).await.unwrap();

        fixture.cache.invalidate_group("products");
        assert!(!fixture.cache.contains(&p0));
        assert!(!fixture.cache.contains(&p1));
        assert!(fixture.cache.contains(&r0));
        assert_eq!(fixture.cache.stats().total_footprint_kb, 10);
    }

    #[tokio::test]
    async fn test_group_footprint_and_keys() {
        let fixture = Fixture::new(MockLoader::new(10), unbounded());
        let p0 = fixture.index_file("products", "seg_0.usearch");
        let p1 = fixture.index_file("products", "seg_1.usearch");
        let r0 = fixture.index_file("reviews", "seg_0.usearch");

        fixture.cache.get(&p0).await.unwrap();
        fixture.cache.get(&p1).await.unwrap();
        fixture.cache.get(&r0).await.unwrap();

        assert_eq!(fixture.cache.group_footprint_kb("products"), 20);
        assert_eq!(fixture.cache.group_footprint_kb("reviews"), 10);
        assert_eq!(fixture.cache.group_footprint_kb("missing"), 0);

        let mut products = fixture.cache.group_keys("products");
        products.sort();
        let mut expected = vec![p0, p1];
        expected.sort();
        assert_eq!(products, expected);
        assert!(fixture.cache.group_keys("missing").is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_all() {
        let fixture = Fixture::new(MockLoader::new(10), unbounded());
        let p0 = fixture.index_file("products", "seg_0.usearch");
        let r0 = fixture.index_file("reviews", "seg_0.usearch");
        fixture.cache.get(&p0).await.unwrap();
        fixture.cache.get(&r0).await.unwrap();

        fixture.cache.invalidate_all();
        assert_eq!(fixture.cache.stats().total_footprint_kb, 0);
        assert!(fixture.cache.stats().groups.is_empty());
    }

    #[tokio::test]
    async fn test_expired_entry_reloads_on_hit() {
        let config = CacheConfig {
            expiry: Some(Duration::from_millis(50)),
            ..unbounded()
        };
        let fixture = Fixture::new(MockLoader::new(40), config);
        let key = fixture.index_file("products", "seg_0.usearch");

        fixture.cache.get(&key).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;

        fixture.cache.get(&key).await.unwrap();
        assert_eq!(fixture.loader.loads(), 2);
        assert_eq!(fixture.cache.stats().evictions, 1);
        assert_eq!(fixture.cache.stats().total_footprint_kb, 40);
    }

    #[tokio::test]
    async fn test_sweep_evicts_only_idle_entries() {
        let config = CacheConfig {
            expiry: Some(Duration::from_millis(80)),
            ..unbounded()
        };
        let fixture = Fixture::new(MockLoader::new(40), config);
        let stale = fixture.index_file("products", "stale.usearch");
        let fresh = fixture.index_file("products", "fresh.usearch");

        fixture.cache.get(&stale).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        fixture.cache.get(&fresh).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        fixture.cache.sweep_expired();
        assert!(!fixture.cache.contains(&stale));
        assert!(fixture.cache.contains(&fresh));
    }

    #[tokio::test]
    async fn test_sweep_is_noop_when_expiry_disabled() {
        let fixture = Fixture::new(MockLoader::new(40), unbounded());
        let key = fixture.index_file("products", "seg_0.usearch");
        fixture.cache.get(&key).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        fixture.cache.sweep_expired();
        assert!(fixture.cache.contains(&key));
    }

    #[tokio::test]
    async fn test_deletion_event_invalidates() {
        let fixture = Fixture::new(MockLoader::new(40), unbounded());
        let key = fixture.index_file("products", "seg_0.usearch");
        fixture.cache.get(&key).await.unwrap();

        fixture.cache.handle_deletion(Path::new(&key));
        assert!(!fixture.cache.contains(&key));
        assert_eq!(fixture.cache.stats().total_footprint_kb, 0);
    }

    #[tokio::test]
    async fn test_maintenance_drains_injected_deletions() {
        let mut fixture = Fixture::new(MockLoader::new(40), unbounded());
        let key = fixture.index_file("products", "seg_0.usearch");
        fixture.cache.get(&key).await.unwrap();

        let deletions = fixture.deletions.take().unwrap();
        let shutdown = CancellationToken::new();
        let task = fixture.cache.spawn_maintenance(deletions, shutdown.clone());

        fixture.cache.watcher.inject_deletion_for_tests(key.clone());
        let gone = tokio::time::timeout(Duration::from_secs(5), async {
            while fixture.cache.contains(&key) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(gone.is_ok(), "deletion event was not applied");

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_rebuild_drops_everything_exactly_once() {
        let mut fixture = Fixture::new(MockLoader::new(40), bounded(200));
        let a = fixture.index_file("products", "seg_a.usearch");
        let b = fixture.index_file("products", "seg_b.usearch");
        fixture.cache.get(&a).await.unwrap();
        fixture.cache.get(&b).await.unwrap();

        fixture.cache.rebuild(bounded(50));
        assert_eq!(fixture.cache.stats().total_footprint_kb, 0);
        assert_eq!(fixture.cache.stats().hits, 0);
        assert_eq!(fixture.cache.weight_limit_kb(), Some(50));
        assert_eq!(fixture.drain_teardowns(), 2);
        assert_eq!(fixture.loader.drops(), 2);

        // The rebuilt cache loads under the new bound.
        fixture.cache.get(&a).await.unwrap();
        assert_eq!(fixture.cache.stats().total_footprint_kb, 40);
    }

    #[tokio::test]
    async fn test_load_in_flight_during_rebuild_is_not_tracked() {
        let fixture = Fixture::new(
            MockLoader::with_delay(40, Duration::from_millis(200)),
            unbounded(),
        );
        let key = fixture.index_file("products", "seg_0.usearch");

        let cache = fixture.cache.clone();
        let load_key = key.clone();
        let load = tokio::spawn(async move { cache.get(&load_key).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        fixture.cache.rebuild(unbounded());

        let entry = load.await.unwrap().unwrap();
        assert_eq!(entry.footprint_kb(), 40);
        assert!(!fixture.cache.contains(&key));
        assert_eq!(fixture.cache.stats().total_footprint_kb, 0);
    }

    #[tokio::test]
    async fn test_warm_loads_whole_group() {
        let fixture = Fixture::new(MockLoader::new(10), unbounded());
        let k0 = fixture.index_file("products", "seg_0.usearch");
        let k1 = fixture.index_file("products", "seg_1.flat");
        fixture.index_file("reviews", "seg_0.usearch");

        let summary = fixture.cache.warm("products").await.unwrap();
        assert_eq!(summary.loaded, 2);
        assert_eq!(summary.failed, 0);
        assert!(fixture.cache.contains(&k0));
        assert!(fixture.cache.contains(&k1));
        assert!(fixture.cache.stats().groups.get("reviews").is_none());
    }

    #[tokio::test]
    async fn test_warm_counts_failures() {
        let fixture = Fixture::new(MockLoader::new(10), unbounded());
        let good = fixture.index_file("products", "seg_0.usearch");
        let bad = fixture.index_file("products", "seg_1.usearch");
        fixture.loader.fail_for(&bad);

        let summary = fixture.cache.warm("products").await.unwrap();
        assert_eq!(summary.loaded, 1);
        assert_eq!(summary.failed, 1);
        assert!(fixture.cache.contains(&good));
    }

    #[tokio::test]
    async fn test_warm_missing_group_fails() {
        let fixture = Fixture::new(MockLoader::new(10), unbounded());
        assert!(matches!(
            fixture.cache.warm("absent").await,
            Err(CacheError::Engine(EngineError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_dropping_last_handle_sends_teardown() {
        let mut fixture = Fixture::new(MockLoader::new(40), unbounded());
        let key = fixture.index_file("products", "seg_0.usearch");

        let entry = fixture.cache.get(&key).await.unwrap();
        fixture.cache.invalidate(&key);
        // The caller's handle keeps the entry alive past eviction.
        assert_eq!(fixture.drain_teardowns(), 0);
        assert_eq!(fixture.loader.drops(), 0);
        assert!(entry.index().search(&[0.0; 3], 1).is_ok());

        drop(entry);
        assert_eq!(fixture.drain_teardowns(), 1);
        assert_eq!(fixture.loader.drops(), 1);
    }

    #[tokio::test]
    async fn test_capacity_view() {
        let fixture = Fixture::new(MockLoader::new(40), bounded(70));
        let key = fixture.index_file("products", "seg_0.usearch");
        fixture.cache.get(&key).await.unwrap();
        assert_eq!(fixture.cache.footprint_kb(), 40);
        assert_eq!(fixture.cache.weight_limit_kb(), Some(70));
    }

    #[test]
    fn test_config_from_settings() {
        let settings = CacheSettings {
            memory_circuit_breaker_enabled: true,
            memory_limit: "512kb".to_string(),
            expiry_enabled: true,
            expiry_minutes: 3,
            maintenance_interval_secs: 30,
        };
        let config = CacheConfig::from_settings(&settings).unwrap();
        assert_eq!(config.weight_limit_kb, Some(512));
        assert_eq!(config.expiry, Some(Duration::from_secs(180)));
        assert_eq!(config.maintenance_interval, Duration::from_secs(30));

        let disabled = CacheSettings {
            memory_circuit_breaker_enabled: false,
            ..settings
        };
        assert_eq!(
            CacheConfig::from_settings(&disabled).unwrap().weight_limit_kb,
            None
        );
    }
}
