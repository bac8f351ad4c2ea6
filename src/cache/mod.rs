pub mod ttl;

#[cfg(test)]
mod tests;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub use ttl::TtlCache;

const DAY_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheNamespaceConfig {
    pub ttl_secs: u64,
    pub max_keys: usize,
    /// Fraction of `max_keys` above which compaction starts
    pub soft_ceiling_ratio: f64,
}

impl CacheNamespaceConfig {
    #[inline]
    pub const fn new(ttl_secs: u64, max_keys: usize) -> Self {
        Self {
            ttl_secs,
            max_keys,
            soft_ceiling_ratio: 0.8,
        }
    }

    #[inline]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    fn build<K, V>(&self, name: &'static str) -> Arc<TtlCache<K, V>>
    where
        K: Eq + std::hash::Hash + Clone,
        V: Clone,
    {
        Arc::new(TtlCache::new(
            name,
            self.ttl(),
            self.max_keys,
            self.soft_ceiling_ratio,
        ))
    }
}

impl Default for CacheNamespaceConfig {
    #[inline]
    fn default() -> Self {
        Self::new(DAY_SECS, 10_000)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub check_period_secs: u64,
    pub embeddings: CacheNamespaceConfig,
    pub query_results: CacheNamespaceConfig,
    pub agent_collections: CacheNamespaceConfig,
}

impl Default for CacheConfig {
    #[inline]
    fn default() -> Self {
        Self {
            enabled: true,
            check_period_secs: 600,
            embeddings: CacheNamespaceConfig::new(7 * DAY_SECS, 50_000),
            query_results: CacheNamespaceConfig::new(DAY_SECS, 100_000),
            agent_collections: CacheNamespaceConfig::new(DAY_SECS, 10_000),
        }
    }
}

impl CacheConfig {
    #[inline]
    pub const fn check_period(&self) -> Duration {
        Duration::from_secs(self.check_period_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NamespaceStats {
    pub keys: usize,
    pub requests: u64,
    pub hits: u64,
    pub hit_rate: f64,
}

impl<K, V> From<&TtlCache<K, V>> for NamespaceStats
where
    K: Eq + std::hash::Hash + Clone,
    V: Clone,
{
    #[inline]
    fn from(cache: &TtlCache<K, V>) -> Self {
        Self {
            keys: cache.len(),
            requests: cache.requests(),
            hits: cache.hits(),
            hit_rate: cache.hit_rate(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub embeddings: NamespaceStats,
    pub query_results: NamespaceStats,
    pub agent_collections: NamespaceStats,
}

/// Lowercase, trim and collapse internal whitespace
#[inline]
pub fn normalize_query(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Query-result epochs. Values come from one counter and are never reused,
/// so removing a collection's entry cannot revive results cached under an
/// older epoch.
#[derive(Debug, Default)]
struct Epochs {
    by_collection: HashMap<String, u64>,
    /// Epoch of every collection without an entry
    baseline: u64,
    counter: u64,
}

impl Epochs {
    fn current(&self, collection: &str) -> u64 {
        self.by_collection
            .get(collection)
            .copied()
            .unwrap_or(self.baseline)
    }

    fn next(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }
}

/// The three cache namespaces used by retrieval.
///
/// Every value held here can be recomputed from its source, so a disabled
/// layer simply misses on every lookup. Query results are keyed with a
/// per-collection epoch that writes to the collection bump, which retires
/// stale results without scanning the table.
#[derive(Debug)]
pub struct CacheLayer {
    enabled: bool,
    embeddings: Arc<TtlCache<String, Arc<Vec<f32>>>>,
    query_results: Arc<TtlCache<String, Arc<Vec<String>>>>,
    agent_collections: Arc<TtlCache<String, String>>,
    epochs: Mutex<Epochs>,
}

impl CacheLayer {
    #[inline]
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            enabled: config.enabled,
            embeddings: config.embeddings.build("embeddings"),
            query_results: config.query_results.build("query_results"),
            agent_collections: config.agent_collections.build("agent_collections"),
            epochs: Mutex::new(Epochs::default()),
        }
    }

    #[inline]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[inline]
    pub fn get_embedding(&self, normalized_query: &str) -> Option<Arc<Vec<f32>>> {
        if !self.enabled {
            return None;
        }
        self.embeddings.get(normalized_query)
    }

    #[inline]
    pub fn set_embedding(&self, normalized_query: String, vector: Arc<Vec<f32>>) {
        if self.enabled {
            self.embeddings.set(normalized_query, vector);
            Self::compact_in_background(&self.embeddings);
        }
    }

    /// Query-result key for the current state of `collection`
    #[inline]
    pub fn query_key(&self, collection: &str, top_k: usize, normalized_query: &str) -> String {
        let epoch = self.epochs.lock().current(collection);
        format!("{}#{}:{}:{}", collection, epoch, top_k, normalized_query)
    }

    #[inline]
    pub fn get_query_results(&self, key: &str) -> Option<Arc<Vec<String>>> {
        if !self.enabled {
            return None;
        }
        self.query_results.get(key)
    }

    #[inline]
    pub fn set_query_results(&self, key: String, results: Arc<Vec<String>>) {
        if self.enabled {
            self.query_results.set(key, results);
            Self::compact_in_background(&self.query_results);
        }
    }

    #[inline]
    pub fn get_agent_collection(&self, agent_id: &str) -> Option<String> {
        if !self.enabled {
            return None;
        }
        self.agent_collections.get(agent_id)
    }

    #[inline]
    pub fn set_agent_collection(&self, agent_id: String, collection: String) {
        if self.enabled {
            self.agent_collections.set(agent_id, collection);
            Self::compact_in_background(&self.agent_collections);
        }
    }

    /// Retire every cached query result for `collection`
    #[inline]
    pub fn invalidate_collection(&self, collection: &str) {
        let mut epochs = self.epochs.lock();
        let epoch = epochs.next();
        epochs.by_collection.insert(collection.to_string(), epoch);
        drop(epochs);
        debug!("Query cache epoch for {} is now {}", collection, epoch);
    }

    /// Retire cached results for a dropped collection and stop tracking it.
    ///
    /// Moving the baseline also retires results of collections never written
    /// through this layer.
    #[inline]
    pub fn forget_collection(&self, collection: &str) {
        let mut epochs = self.epochs.lock();
        epochs.by_collection.remove(collection);
        epochs.baseline = epochs.next();
        drop(epochs);
        debug!("Stopped tracking query cache epoch for {}", collection);
    }

    /// Number of collections with their own query-result epoch
    #[inline]
    pub fn tracked_collections(&self) -> usize {
        self.epochs.lock().by_collection.len()
    }

    #[inline]
    pub fn flush_all(&self) {
        self.embeddings.flush_all();
        self.query_results.flush_all();
        self.agent_collections.flush_all();
    }

    /// Run a compaction pass over every namespace; returns entries removed
    #[inline]
    pub fn compact_all(&self) -> usize {
        self.embeddings.compact() + self.query_results.compact() + self.agent_collections.compact()
    }

    fn compact_in_background<K, V>(cache: &Arc<TtlCache<K, V>>)
    where
        K: Eq + std::hash::Hash + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        if !cache.needs_compaction() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            cache.compact();
            return;
        };
        let cache = Arc::clone(cache);
        handle.spawn_blocking(move || cache.compact());
    }

    #[inline]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            enabled: self.enabled,
            embeddings: NamespaceStats::from(self.embeddings.as_ref()),
            query_results: NamespaceStats::from(self.query_results.as_ref()),
            agent_collections: NamespaceStats::from(self.agent_collections.as_ref()),
        }
    }
}
