//! # Write-back player cache
//!
//! [`PlayerCacheManager`] keeps deep copies of players' items after logout and
//! persists them from a dedicated background thread, so saving never blocks the
//! caller.
//!
//! ## Locking
//!
//! Two tiers of locks are used:
//!
//! 1. one coarse lock over the entry map and the pending-save queue, held only
//!    while membership changes and never across encoding or database calls;
//! 2. a lock per [`PlayerCacheEntry`] over its items, held while copying in,
//!    copying out and flushing.
//!
//! The only place both are held is eviction after a successful flush, which takes
//! the entry lock first. A writer that finds its entry evicted looks the id up again
//! and installs a fresh entry.
//!
//! ## Lifecycle
//!
//! ```rust,no_run
//! use playervault::cache::PlayerCacheManager;
//! use playervault::config::CacheConfig;
//! use playervault::records::ItemStorage;
//! use playervault::storage::Database;
//! # fn demo(db: &Database, player: &playervault::player::Player) -> Result<(), playervault::storage::StoreError> {
//! let cache = PlayerCacheManager::with_database(db, ItemStorage::Relational, CacheConfig::default());
//! cache.start()?;
//! cache.cache_player(player.guid(), player);
//! cache.add_to_save_list(player.guid());
//! cache.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod entry;

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Instant;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};

use crate::config::CacheConfig;
use crate::items::PlayerItems;
use crate::metrics::{CacheCounters, CacheSnapshot};
use crate::player::ItemOwner;
use crate::records::ItemStorage;
use crate::repository::save_player_items_as;
use crate::storage::{Database, StoreError};

pub use entry::PlayerCacheEntry;

/// Where flushed items go.
pub trait SaveBackend: Send + Sync + 'static {
    fn save_items(&self, guid: u32, items: &PlayerItems) -> Result<(), StoreError>;
}

impl<T: SaveBackend> SaveBackend for Arc<T> {
    fn save_items(&self, guid: u32, items: &PlayerItems) -> Result<(), StoreError> {
        (**self).save_items(guid, items)
    }
}

/// Saves through the repository with a database handle owned by the cache.
#[derive(Debug, Clone)]
pub struct RepositoryBackend {
    db: Database,
    mode: ItemStorage,
}

impl RepositoryBackend {
    pub fn new(db: Database, mode: ItemStorage) -> Self {
        Self { db, mode }
    }
}

impl SaveBackend for RepositoryBackend {
    fn save_items(&self, guid: u32, items: &PlayerItems) -> Result<(), StoreError> {
        save_player_items_as(&self.db, guid, items, self.mode)
    }
}

/// Result of flushing one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flushed {
    Saved,
    /// Evicted or cleared before this flush got the entry lock; nothing was written.
    AlreadyGone,
}

#[derive(Default)]
struct Registry {
    entries: HashMap<u32, Arc<PlayerCacheEntry>>,
    /// Pending saves with the time each id was last queued.
    to_save: HashMap<u32, DateTime<Utc>>,
    /// Ids taken off the queue and not yet settled.
    in_flight: usize,
    running: bool,
    flush_requested: bool,
}

impl Registry {
    fn is_idle(&self) -> bool {
        self.to_save.is_empty() && self.in_flight == 0
    }
}

struct Shared<B> {
    backend: B,
    config: CacheConfig,
    registry: Mutex<Registry>,
    wakeup: Condvar,
    idle: Condvar,
    counters: CacheCounters,
}

impl<B: SaveBackend> Shared<B> {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Persist one entry and evict it.
    fn flush_entry(&self, guid: u32, entry: &Arc<PlayerCacheEntry>) -> Result<Flushed, StoreError> {
        let mut data = entry.lock();
        if data.evicted {
            let mut registry = self.registry();
            if registry
                .entries
                .get(&guid)
                .map(|current| Arc::ptr_eq(current, entry))
                .unwrap_or(false)
            {
                registry.entries.remove(&guid);
            }
            return Ok(Flushed::AlreadyGone);
        }
        let started = Instant::now();
        if let Err(e) = self.backend.save_items(guid, &data.items) {
            self.counters.inc_flush_failure();
            return Err(e);
        }
        self.counters.observe_flush(started);
        data.evicted = true;

        let mut registry = self.registry();
        if registry
            .entries
            .get(&guid)
            .map(|current| Arc::ptr_eq(current, entry))
            .unwrap_or(false)
        {
            registry.entries.remove(&guid);
            self.counters.inc_eviction();
        }
        Ok(Flushed::Saved)
    }

    /// Take the whole queue off the coarse lock.
    fn take_batch(&self, registry: &mut Registry) -> Vec<(u32, DateTime<Utc>)> {
        let batch: Vec<(u32, DateTime<Utc>)> = registry.to_save.drain().collect();
        registry.in_flight += batch.len();
        batch
    }

    /// Flush every id in `batch`; failures are put back on the queue and the rest of
    /// the batch carries on.
    fn process_batch(&self, batch: Vec<(u32, DateTime<Utc>)>) {
        for (guid, queued_at) in batch {
            let entry = self.registry().entries.get(&guid).cloned();
            let result = match &entry {
                Some(entry) => self.flush_entry(guid, entry),
                None => Ok(Flushed::AlreadyGone),
            };
            if let Ok(Flushed::AlreadyGone) = result {
                debug!("player {} queued for save but not cached", guid);
            }

            let mut registry = self.registry();
            if let Err(e) = result {
                warn!("saving cached items of player {} failed, requeued: {}", guid, e);
                self.counters.inc_requeue();
                registry.to_save.entry(guid).or_insert(queued_at);
            }
            registry.in_flight -= 1;
            if registry.is_idle() {
                self.idle.notify_all();
            }
        }
    }

    /// One synchronous pass over the queue. Returns how many ids are still pending.
    fn drain_once(&self) -> usize {
        let batch = {
            let mut registry = self.registry();
            self.take_batch(&mut registry)
        };
        if !batch.is_empty() {
            self.process_batch(batch);
        }
        self.registry().to_save.len()
    }
}

fn thread_main<B: SaveBackend>(shared: Arc<Shared<B>>) {
    let interval = shared.config.flush_interval();
    debug!("player cache thread started, interval {:?}", interval);
    loop {
        let batch = {
            let mut registry = shared.registry();
            if registry.running && !registry.flush_requested {
                registry = shared
                    .wakeup
                    .wait_timeout(registry, interval)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
            if !registry.running {
                break;
            }
            registry.flush_requested = false;
            shared.take_batch(&mut registry)
        };
        if !batch.is_empty() {
            debug!("flushing {} cached players", batch.len());
            shared.process_batch(batch);
        }
    }
    debug!("player cache thread stopped");
}

/// Write-back cache of player items with one background flush thread.
pub struct PlayerCacheManager<B: SaveBackend = RepositoryBackend> {
    shared: Arc<Shared<B>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PlayerCacheManager<RepositoryBackend> {
    /// Cache that saves through its own handle onto `db`.
    pub fn with_database(db: &Database, mode: ItemStorage, config: CacheConfig) -> Self {
        Self::new(RepositoryBackend::new(db.handle(), mode), config)
    }
}

impl<B: SaveBackend> PlayerCacheManager<B> {
    /// Create a stopped cache. Call [`start`](Self::start) to run the flush thread.
    pub fn new(backend: B, config: CacheConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                backend,
                config,
                registry: Mutex::new(Registry::default()),
                wakeup: Condvar::new(),
                idle: Condvar::new(),
                counters: CacheCounters::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    fn worker(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the background thread. Does nothing if it is already running.
    pub fn start(&self) -> Result<(), StoreError> {
        let mut worker = self.worker();
        if worker.is_some() {
            return Ok(());
        }
        self.shared.registry().running = true;
        let shared = Arc::clone(&self.shared);
        let spawned = std::thread::Builder::new()
            .name("player-cache".to_string())
            .spawn(move || thread_main(shared));
        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                info!("player cache started");
                Ok(())
            }
            Err(e) => {
                self.shared.registry().running = false;
                Err(StoreError::Io(e))
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker().is_some()
    }

    /// Store a deep copy of `owner`'s items under `guid`, replacing any cached copy.
    /// Waits if the entry is being flushed.
    pub fn cache_player(&self, guid: u32, owner: &impl ItemOwner) {
        let mut snapshot = owner.items().clone();
        loop {
            let entry = {
                let mut registry = self.shared.registry();
                match registry.entries.get(&guid) {
                    Some(entry) => Arc::clone(entry),
                    None => {
                        registry
                            .entries
                            .insert(guid, Arc::new(PlayerCacheEntry::new(snapshot)));
                        self.shared.counters.inc_cached();
                        return;
                    }
                }
            };
            match entry.replace(snapshot) {
                Ok(()) => {
                    self.shared.counters.inc_cached();
                    return;
                }
                Err(returned) => {
                    snapshot = returned;
                    let mut registry = self.shared.registry();
                    if registry
                        .entries
                        .get(&guid)
                        .map(|current| Arc::ptr_eq(current, &entry))
                        .unwrap_or(false)
                    {
                        registry.entries.remove(&guid);
                    }
                }
            }
        }
    }

    /// Copy the cached items of `guid` into `dest`. Returns `false`, leaving `dest`
    /// untouched, if nothing is cached.
    pub fn load_cached_player(&self, guid: u32, dest: &mut impl ItemOwner) -> bool {
        let entry = self.shared.registry().entries.get(&guid).cloned();
        let found = entry
            .map(|entry| entry.copy_data_to_player(dest))
            .unwrap_or(false);
        self.shared.counters.record_lookup(found);
        found
    }

    /// Queue `guid` for the next background flush. Queueing an id again moves its
    /// timestamp forward.
    pub fn add_to_save_list(&self, guid: u32) {
        self.shared.registry().to_save.insert(guid, Utc::now());
    }

    /// When `guid` was last queued, if it is still pending.
    pub fn queued_at(&self, guid: u32) -> Option<DateTime<Utc>> {
        self.shared.registry().to_save.get(&guid).copied()
    }

    /// Flush `guid` right now on the calling thread, bypassing the queue. Returns
    /// `Ok(false)` if nothing is cached for it, including an entry that another
    /// flush or a clear removed first.
    pub fn save_cached_items(&self, guid: u32) -> Result<bool, StoreError> {
        let Some(entry) = self.shared.registry().entries.get(&guid).cloned() else {
            return Ok(false);
        };
        let flushed = self.shared.flush_entry(guid, &entry)?;
        if flushed == Flushed::Saved {
            let mut registry = self.shared.registry();
            registry.to_save.remove(&guid);
            if registry.is_idle() {
                self.shared.idle.notify_all();
            }
        }
        Ok(flushed == Flushed::Saved)
    }

    /// Block until the pending-save queue is empty. Without a running thread the
    /// queue is drained once on the calling thread instead.
    ///
    /// Ids whose saves keep failing stay queued, so this only returns once the
    /// backend accepts them or the cache is shut down.
    pub fn flush(&self) {
        if !self.is_running() {
            self.shared.drain_once();
            return;
        }
        let mut registry = self.shared.registry();
        registry.flush_requested = true;
        self.shared.wakeup.notify_all();
        while registry.running && !registry.is_idle() {
            registry = self
                .shared
                .idle
                .wait(registry)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Drop the cached copy of `guid` without saving it.
    pub fn clear(&self, guid: u32) {
        let removed = {
            let mut registry = self.shared.registry();
            registry.to_save.remove(&guid);
            registry.entries.remove(&guid)
        };
        if let Some(entry) = removed {
            entry.mark_evicted();
            self.shared.counters.add_cleared(1);
        }
    }

    /// Drop every cached copy without saving.
    pub fn clear_all(&self) {
        let removed: Vec<Arc<PlayerCacheEntry>> = {
            let mut registry = self.shared.registry();
            registry.to_save.clear();
            registry.entries.drain().map(|(_, entry)| entry).collect()
        };
        for entry in &removed {
            entry.mark_evicted();
        }
        self.shared.counters.add_cleared(removed.len() as u64);
    }

    /// Stop the background thread and persist everything still queued. Each
    /// remaining id gets up to `shutdown_attempts` synchronous tries; the number of
    /// ids that could not be saved is returned.
    pub fn shutdown(&self) -> usize {
        let handle = self.worker().take();
        {
            let mut registry = self.shared.registry();
            registry.running = false;
        }
        self.shared.wakeup.notify_all();
        self.shared.idle.notify_all();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("player cache thread panicked");
            }
        }

        let attempts = self.shared.config.shutdown_attempts.max(1);
        let mut remaining = self.shared.registry().to_save.len();
        for _ in 0..attempts {
            if remaining == 0 {
                break;
            }
            remaining = self.shared.drain_once();
        }

        if remaining > 0 {
            let mut lost: Vec<u32> = self.shared.registry().to_save.keys().copied().collect();
            lost.sort_unstable();
            error!(
                "player cache shut down with {} unsaved players: {:?}",
                remaining, lost
            );
        } else {
            info!("player cache stopped");
        }
        remaining
    }

    pub fn is_cached(&self, guid: u32) -> bool {
        self.shared.registry().entries.contains_key(&guid)
    }

    pub fn cached_count(&self) -> usize {
        self.shared.registry().entries.len()
    }

    pub fn pending_saves(&self) -> usize {
        self.shared.registry().to_save.len()
    }

    pub fn stats(&self) -> CacheSnapshot {
        self.shared.counters.snapshot()
    }

    pub fn backend(&self) -> &B {
        &self.shared.backend
    }
}

impl<B: SaveBackend> Drop for PlayerCacheManager<B> {
    fn drop(&mut self) {
        let pending = self.shared.registry().to_save.len();
        if self.is_running() || pending > 0 {
            self.shutdown();
        }
    }
}
