#[cfg(test)]
mod tests;

use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

#[derive(Debug)]
struct Tables<K, V> {
    live: HashMap<K, CacheEntry<V>>,
    /// Table being compacted; still readable until the result is swapped in
    retiring: Option<Arc<HashMap<K, CacheEntry<V>>>>,
    generation: u64,
}

impl<K, V> Tables<K, V> {
    fn len(&self) -> usize {
        self.live.len() + self.retiring.as_ref().map_or(0, |table| table.len())
    }
}

/// Bounded key/value cache with a fixed TTL per entry.
///
/// Above the soft ceiling a compaction pass keeps the entries with the most
/// remaining TTL. The pass runs against a detached table, so `get` and `set`
/// only ever wait for a table swap. At the hard maximum new keys are refused
/// until compaction makes room; keys already held can still be updated.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    name: &'static str,
    ttl: Duration,
    max_keys: usize,
    soft_ceiling: usize,
    tables: RwLock<Tables<K, V>>,
    compacting: AtomicBool,
    requests: AtomicU64,
    hits: AtomicU64,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    #[inline]
    pub fn new(name: &'static str, ttl: Duration, max_keys: usize, soft_ceiling_ratio: f64) -> Self {
        let soft_ceiling = ((max_keys as f64) * soft_ceiling_ratio).floor() as usize;

        Self {
            name,
            ttl,
            max_keys,
            soft_ceiling: soft_ceiling.clamp(1, max_keys.max(1)),
            tables: RwLock::new(Tables {
                live: HashMap::new(),
                retiring: None,
                generation: 0,
            }),
            compacting: AtomicBool::new(false),
            requests: AtomicU64::new(0),
            hits: AtomicU64::new(0),
        }
    }

    #[inline]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub const fn soft_ceiling(&self) -> usize {
        self.soft_ceiling
    }

    #[inline]
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();

        let value = {
            let tables = self.tables.read();
            tables
                .live
                .get(key)
                .or_else(|| tables.retiring.as_ref().and_then(|table| table.get(key)))
                .filter(|entry| entry.expires_at > now)
                .map(|entry| entry.value.clone())
        };

        if value.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        value
    }

    /// Store `value` under `key`; returns false when the cache is full
    #[inline]
    pub fn set(&self, key: K, value: V) -> bool {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + self.ttl,
        };

        let mut tables = self.tables.write();
        let known = tables.live.contains_key(&key)
            || tables
                .retiring
                .as_ref()
                .is_some_and(|table| table.contains_key(&key));
        if !known && tables.len() >= self.max_keys {
            drop(tables);
            debug!("{} cache full ({} keys), dropping new entry", self.name, self.max_keys);
            return false;
        }
        tables.live.insert(key, entry);
        true
    }

    #[inline]
    pub fn flush_all(&self) {
        let mut tables = self.tables.write();
        tables.live.clear();
        tables.retiring = None;
        tables.generation += 1;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tables.read().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn needs_compaction(&self) -> bool {
        self.len() > self.soft_ceiling
    }

    /// Drop expired entries and, above the soft ceiling, the entries closest
    /// to expiry. Returns how many entries were removed.
    #[inline]
    pub fn compact(&self) -> usize {
        if self.compacting.swap(true, Ordering::AcqRel) {
            return 0;
        }

        let (snapshot, generation) = {
            let mut tables = self.tables.write();
            let detached = Arc::new(mem::take(&mut tables.live));
            tables.retiring = Some(Arc::clone(&detached));
            (detached, tables.generation)
        };

        let now = Instant::now();
        let mut survivors: Vec<(&K, &CacheEntry<V>)> = snapshot
            .iter()
            .filter(|(_, entry)| entry.expires_at > now)
            .collect();
        if survivors.len() > self.soft_ceiling {
            survivors.sort_unstable_by(|a, b| b.1.expires_at.cmp(&a.1.expires_at));
            survivors.truncate(self.soft_ceiling);
        }

        let mut compacted: HashMap<K, CacheEntry<V>> = survivors
            .into_iter()
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect();
        let removed = snapshot.len() - compacted.len();

        {
            let mut tables = self.tables.write();
            if tables.generation == generation {
                // Writes made during the pass are newer than the snapshot
                compacted.extend(mem::take(&mut tables.live));
                tables.live = compacted;
            }
            tables.retiring = None;
        }

        self.compacting.store(false, Ordering::Release);
        if removed > 0 {
            debug!("Compacted {} cache, removed {} entries", self.name, removed);
        }
        removed
    }

    #[inline]
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// hits / requests, 0 before the first request
    #[inline]
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        let requests = self.requests();
        if requests == 0 {
            return 0.0;
        }
        let rate = hits as f64 / requests as f64;
        rate.min(1.0)
    }
}
