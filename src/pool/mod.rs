
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::collection::{CollectionManager, ManagerState};
use crate::database::{CollectionSchema, VectorStore};
use crate::{RagError, Result};

/// Bounds on the number of live collection managers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    pub max_clients: usize,
    /// Share of entries evicted when a miss hits the ceiling
    pub eviction_fraction: f64,
    pub max_idle_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for PoolConfig {
    #[inline]
    fn default() -> Self {
        Self {
            max_clients: 200,
            eviction_fraction: 0.1,
            max_idle_secs: 30 * 60,
            sweep_interval_secs: 10 * 60,
        }
    }
}

impl PoolConfig {
    #[inline]
    pub const fn max_idle(&self) -> Duration {
        Duration::from_secs(self.max_idle_secs)
    }

    #[inline]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// How many entries one capacity eviction removes, at least one
    #[inline]
    pub fn eviction_batch(&self) -> usize {
        let batch = (self.max_clients as f64 * self.eviction_fraction).ceil() as usize;
        batch.clamp(1, self.max_clients.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total_clients: usize,
    /// Handles currently checked out
    pub active_connections: usize,
    pub loaded_collections: usize,
    pub free_connections: usize,
}

type LifecycleLock = tokio::sync::Mutex<()>;

#[derive(Debug)]
struct PoolEntry {
    manager: Arc<CollectionManager>,
    last_access: Instant,
    handles: usize,
}

impl PoolEntry {
    fn in_use(&self) -> bool {
        self.handles > 0
    }
}

#[derive(Debug, Default)]
struct PoolTable {
    entries: HashMap<String, PoolEntry>,
    /// One lifecycle lock per name, alive as long as any manager for it is
    lifecycles: HashMap<String, Weak<LifecycleLock>>,
}

impl PoolTable {
    fn lifecycle_lock(&mut self, name: &str) -> Arc<LifecycleLock> {
        self.lifecycles.retain(|_, lock| lock.strong_count() > 0);
        if let Some(lock) = self.lifecycles.get(name).and_then(Weak::upgrade) {
            return lock;
        }
        let lock = Arc::new(LifecycleLock::new(()));
        self.lifecycles.insert(name.to_string(), Arc::downgrade(&lock));
        lock
    }
}

#[derive(Debug, Default)]
struct PoolShared {
    table: Mutex<PoolTable>,
    active: AtomicUsize,
    /// Signalled whenever a handle is returned
    returned: Notify,
}

/// A checked-out manager. Dropping it returns the connection to the pool.
#[derive(Debug)]
pub struct PooledManager {
    manager: Arc<CollectionManager>,
    shared: Arc<PoolShared>,
}

impl PooledManager {
    #[inline]
    pub const fn manager(&self) -> &Arc<CollectionManager> {
        &self.manager
    }
}

impl Deref for PooledManager {
    type Target = CollectionManager;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.manager
    }
}

impl Drop for PooledManager {
    fn drop(&mut self) {
        {
            let mut table = self.shared.table.lock();
            if let Some(entry) = table
                .entries
                .get_mut(self.manager.name())
                .filter(|entry| Arc::ptr_eq(&entry.manager, &self.manager))
            {
                entry.handles = entry.handles.saturating_sub(1);
            }
        }
        self.shared.active.fetch_sub(1, Ordering::SeqCst);
        self.shared.returned.notify_waiters();
    }
}

enum Checkout {
    Ready(PooledManager, Vec<Arc<CollectionManager>>),
    /// Every entry is in use and the pool is full
    Full,
}

/// Bounded table of per-collection managers.
///
/// The pool is the only place managers are created or evicted, and an entry
/// with a handle checked out is never evicted. The table lock is never held
/// across an await, so `stats` and `acquire` never wait on vector store I/O.
pub struct CollectionPool {
    store: Arc<dyn VectorStore>,
    schema: CollectionSchema,
    settle_delay: Duration,
    config: PoolConfig,
    shared: Arc<PoolShared>,
}

impl std::fmt::Debug for CollectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionPool")
            .field("schema", &self.schema)
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl CollectionPool {
    #[inline]
    pub fn new(
        store: Arc<dyn VectorStore>,
        schema: CollectionSchema,
        settle_delay: Duration,
        config: PoolConfig,
    ) -> Self {
        Self {
            store,
            schema,
            settle_delay,
            config,
            shared: Arc::new(PoolShared::default()),
        }
    }

    #[inline]
    pub const fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Handle to the manager for `name`, creating the entry on first use.
    ///
    /// A miss at capacity first evicts the least recently used entries that
    /// have no handle checked out. When every entry is in use the call waits
    /// until one is returned.
    #[inline]
    pub async fn acquire(&self, name: &str) -> PooledManager {
        loop {
            let returned = self.shared.returned.notified();
            tokio::pin!(returned);
            returned.as_mut().enable();

            match self.try_checkout(name) {
                Checkout::Ready(handle, victims) => {
                    if !victims.is_empty() {
                        info!(
                            "Pool at capacity ({}), evicting {} least recently used collections",
                            self.config.max_clients,
                            victims.len()
                        );
                        Self::teardown(victims).await;
                    }
                    return handle;
                }
                Checkout::Full => {
                    warn!(
                        "Every pooled collection is in use, {} waits for a free slot",
                        name
                    );
                    returned.await;
                }
            }
        }
    }

    /// Like `acquire`, but only for collections that already exist.
    ///
    /// Names the pool does not know are checked against the store first, so
    /// lookups of unknown collections never take a slot.
    #[inline]
    pub async fn acquire_existing(&self, name: &str) -> Result<Option<PooledManager>> {
        if !self.shared.table.lock().entries.contains_key(name) {
            let exists = self.store.has_collection(name).await.map_err(|e| {
                RagError::VectorStore(format!("existence check on '{}' failed: {}", name, e))
            })?;
            if !exists {
                debug!("Collection {} does not exist, not pooling it", name);
                return Ok(None);
            }
        }
        Ok(Some(self.acquire(name).await))
    }

    fn try_checkout(&self, name: &str) -> Checkout {
        let mut table = self.shared.table.lock();
        let now = Instant::now();

        let hit = match table.entries.get_mut(name) {
            Some(entry) if entry.manager.state() != ManagerState::Failed => {
                entry.last_access = now;
                entry.handles += 1;
                Some(Arc::clone(&entry.manager))
            }
            _ => None,
        };
        if let Some(manager) = hit {
            return Checkout::Ready(self.handle(manager), Vec::new());
        }

        let mut victims = Vec::new();
        if let Some(failed) = table.entries.remove(name) {
            debug!("Discarding failed manager for {}", name);
            victims.push(failed.manager);
        }

        if table.entries.len() >= self.config.max_clients {
            victims.extend(Self::take_lru(&mut table, self.config.eviction_batch()));
            if table.entries.len() >= self.config.max_clients {
                return Checkout::Full;
            }
        }

        let lock = table.lifecycle_lock(name);
        let manager = Arc::new(
            CollectionManager::new(
                name,
                Arc::clone(&self.store),
                self.schema,
                self.settle_delay,
            )
            .with_lifecycle_lock(lock),
        );
        table.entries.insert(
            name.to_string(),
            PoolEntry {
                manager: Arc::clone(&manager),
                last_access: now,
                handles: 1,
            },
        );
        drop(table);

        Checkout::Ready(self.handle(manager), victims)
    }

    fn handle(&self, manager: Arc<CollectionManager>) -> PooledManager {
        self.shared.active.fetch_add(1, Ordering::SeqCst);
        PooledManager {
            manager,
            shared: Arc::clone(&self.shared),
        }
    }

    fn take_lru(table: &mut PoolTable, count: usize) -> Vec<Arc<CollectionManager>> {
        let mut idle: Vec<(Instant, String)> = table
            .entries
            .iter()
            .filter(|(_, entry)| !entry.in_use())
            .map(|(name, entry)| (entry.last_access, name.clone()))
            .collect();
        idle.sort();

        idle.into_iter()
            .take(count)
            .filter_map(|(_, name)| table.entries.remove(&name))
            .map(|entry| {
                debug!("Evicting collection {}", entry.manager.name());
                entry.manager
            })
            .collect()
    }

    async fn teardown(victims: Vec<Arc<CollectionManager>>) {
        for manager in victims {
            manager.release().await;
        }
    }

    /// Unload the manager for `name` but keep its entry for reuse
    #[inline]
    pub async fn release(&self, name: &str) {
        let manager = self
            .shared
            .table
            .lock()
            .entries
            .get(name)
            .map(|entry| Arc::clone(&entry.manager));

        if let Some(manager) = manager {
            manager.release().await;
        }
    }

    /// Remove the entry for `name` without touching the store
    #[inline]
    pub fn forget(&self, name: &str) -> bool {
        let removed = self.shared.table.lock().entries.remove(name).is_some();
        if removed {
            debug!("Forgot collection {}", name);
            self.shared.returned.notify_waiters();
        }
        removed
    }

    /// Evict entries idle longer than `max_idle`; returns how many went
    #[inline]
    pub async fn sweep_idle(&self, max_idle: Duration) -> usize {
        let victims: Vec<Arc<CollectionManager>> = {
            let mut table = self.shared.table.lock();
            let stale: Vec<String> = table
                .entries
                .iter()
                .filter(|(_, entry)| !entry.in_use() && entry.last_access.elapsed() > max_idle)
                .map(|(name, _)| name.clone())
                .collect();

            stale
                .iter()
                .filter_map(|name| table.entries.remove(name))
                .map(|entry| entry.manager)
                .collect()
        };

        let evicted = victims.len();
        if evicted > 0 {
            info!("Idle sweep evicted {} collections", evicted);
            self.shared.returned.notify_waiters();
            Self::teardown(victims).await;
        }
        evicted
    }

    /// Names currently in the pool table, sorted
    #[inline]
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shared.table.lock().entries.keys().cloned().collect();
        names.sort();
        names
    }

    #[inline]
    pub fn stats(&self) -> PoolStats {
        let (total_clients, loaded_collections) = {
            let table = self.shared.table.lock();
            let loaded = table
                .entries
                .values()
                .filter(|entry| entry.manager.is_loaded())
                .count();
            (table.entries.len(), loaded)
        };

        PoolStats {
            total_clients,
            active_connections: self.shared.active.load(Ordering::SeqCst),
            loaded_collections,
            free_connections: self.config.max_clients.saturating_sub(total_clients),
        }
    }
}
