// Collection manager
// Lifecycle of one named collection: create, index, load, insert, search, drop


use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::database::{CollectionSchema, LoadState, SearchHit, StoreError, StoredEntity, VectorStore};
use crate::{RagError, Result};

/// Where a manager is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Unloaded,
    Creating,
    Loaded,
    /// Creation could not be verified; the pool must discard this manager
    Failed,
}

/// Owns the lifecycle of one collection in the vector store.
///
/// `ensure_created`, `load_if_needed`, `drop_collection` and `release` are
/// serialized on a lifecycle lock. The pool hands every manager for one name
/// the same lock, so the drop/create sequence never interleaves even when an
/// evicted manager is still tearing down.
pub struct CollectionManager {
    name: String,
    store: Arc<dyn VectorStore>,
    schema: CollectionSchema,
    settle_delay: Duration,
    state: Mutex<ManagerState>,
    lifecycle: Arc<tokio::sync::Mutex<()>>,
}

impl std::fmt::Debug for CollectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionManager")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn store_error(operation: &str, collection: &str, error: &StoreError) -> RagError {
    RagError::VectorStore(format!("{} on '{}' failed: {}", operation, collection, error))
}

impl CollectionManager {
    #[inline]
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn VectorStore>,
        schema: CollectionSchema,
        settle_delay: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            store,
            schema,
            settle_delay,
            state: Mutex::new(ManagerState::Unloaded),
            lifecycle: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Serialize lifecycle operations on `lock` instead of a private one
    #[inline]
    pub(crate) fn with_lifecycle_lock(mut self, lock: Arc<tokio::sync::Mutex<()>>) -> Self {
        self.lifecycle = lock;
        self
    }

    #[cfg(test)]
    pub(crate) fn shares_lifecycle_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.lifecycle, &other.lifecycle)
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn state(&self) -> ManagerState {
        *self.state.lock()
    }

    #[inline]
    pub fn is_loaded(&self) -> bool {
        self.state() == ManagerState::Loaded
    }

    fn set_state(&self, state: ManagerState) {
        *self.state.lock() = state;
    }

    async fn settle(&self) {
        if !self.settle_delay.is_zero() {
            sleep(self.settle_delay).await;
        }
    }

    /// Make sure the collection exists, is indexed and is loaded.
    ///
    /// An existing collection is only loaded. A missing one has any stale
    /// remnant dropped (errors ignored), is created with the fixed schema,
    /// indexed, loaded and then verified.
    #[inline]
    pub async fn ensure_created(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;

        if self.state() == ManagerState::Failed {
            return Err(RagError::CollectionInit {
                collection: self.name.clone(),
                reason: "previous initialization failed".to_string(),
            });
        }

        let exists = self
            .store
            .has_collection(&self.name)
            .await
            .map_err(|e| store_error("existence check", &self.name, &e))?;

        if exists {
            if !self.is_loaded() {
                self.load_and_verify().await?;
            }
            return Ok(());
        }

        self.set_state(ManagerState::Creating);
        info!("Creating collection {}", self.name);

        if let Err(e) = self.store.drop_collection(&self.name).await {
            debug!("No stale remnant dropped for {}: {}", self.name, e);
        }

        match self.store.create_collection(&self.name, &self.schema).await {
            Ok(()) | Err(StoreError::CollectionExists(_)) => {}
            Err(e) => return Err(self.init_failed(format!("create failed: {}", e))),
        }
        self.settle().await;

        if let Err(e) = self.store.create_index(&self.name).await {
            return Err(self.init_failed(format!("index build failed: {}", e)));
        }

        self.load_and_verify().await.map_err(|e| {
            self.set_state(ManagerState::Failed);
            e
        })?;

        info!(
            "Collection {} ready ({} dimensions, {:?} index, {:?} metric)",
            self.name, self.schema.dimension, self.schema.index, self.schema.metric
        );
        Ok(())
    }

    fn init_failed(&self, reason: String) -> RagError {
        error!("Initialization of collection {} failed: {}", self.name, reason);
        self.set_state(ManagerState::Failed);
        RagError::CollectionInit {
            collection: self.name.clone(),
            reason,
        }
    }

    async fn load_and_verify(&self) -> Result<()> {
        self.store
            .load_collection(&self.name)
            .await
            .map_err(|e| RagError::CollectionInit {
                collection: self.name.clone(),
                reason: format!("load failed: {}", e),
            })?;

        match self.store.load_state(&self.name).await {
            Ok(LoadState::Loaded) => {
                self.set_state(ManagerState::Loaded);
                Ok(())
            }
            Ok(state) => Err(RagError::CollectionInit {
                collection: self.name.clone(),
                reason: format!("load state is {:?} after load", state),
            }),
            Err(e) => Err(RagError::CollectionInit {
                collection: self.name.clone(),
                reason: format!("load state check failed: {}", e),
            }),
        }
    }

    /// Load the collection if it exists and is not loaded yet.
    ///
    /// Returns whether the collection is loaded afterwards. Failures are
    /// logged, not raised, so a later call can retry.
    #[inline]
    pub async fn load_if_needed(&self) -> bool {
        match self.try_load().await {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!("Loading collection {} failed, will retry later: {}", self.name, e);
                false
            }
        }
    }

    /// Like `load_if_needed`, but a failed check or load is an error.
    /// `Ok(false)` means the collection does not exist.
    #[inline]
    pub async fn try_load(&self) -> Result<bool> {
        if self.is_loaded() {
            return Ok(true);
        }

        let _guard = self.lifecycle.lock().await;
        if self.is_loaded() {
            return Ok(true);
        }

        let exists = self
            .store
            .has_collection(&self.name)
            .await
            .map_err(|e| store_error("existence check", &self.name, &e))?;
        if !exists {
            debug!("Collection {} does not exist, nothing to load", self.name);
            return Ok(false);
        }

        self.load_and_verify().await?;
        debug!("Loaded collection {}", self.name);
        Ok(true)
    }

    /// Insert all entities in one call.
    ///
    /// If the store reports the collection missing, the collection is
    /// recreated once and the insert retried before giving up.
    #[inline]
    pub async fn insert(&self, entities: &[StoredEntity]) -> Result<usize> {
        if entities.is_empty() {
            return Ok(0);
        }

        if let Some(bad) = entities
            .iter()
            .find(|e| e.vector.len() != self.schema.dimension)
        {
            return Err(RagError::Insert {
                collection: self.name.clone(),
                reason: format!(
                    "entity {} has {} dimensions, collection expects {}",
                    bad.id,
                    bad.vector.len(),
                    self.schema.dimension
                ),
            });
        }

        match self.store.insert(&self.name, entities).await {
            Ok(written) => {
                debug!("Inserted {} entities into {}", written, self.name);
                Ok(written)
            }
            Err(StoreError::CollectionNotFound(_)) => {
                warn!(
                    "Collection {} vanished during insert, recreating and retrying once",
                    self.name
                );
                self.set_state(ManagerState::Unloaded);
                self.ensure_created().await?;

                self.store
                    .insert(&self.name, entities)
                    .await
                    .map_err(|e| self.insert_failed(&e))
            }
            Err(e) => Err(self.insert_failed(&e)),
        }
    }

    fn insert_failed(&self, error: &StoreError) -> RagError {
        error!("Insert into {} failed: {}", self.name, error);
        RagError::Insert {
            collection: self.name.clone(),
            reason: error.to_string(),
        }
    }

    /// Nearest neighbours for `vector`, best first.
    ///
    /// Never fails: a missing or empty collection, or a search error, yields
    /// an empty result.
    #[inline]
    pub async fn search(&self, vector: &[f32], top_k: usize) -> Vec<SearchHit> {
        self.try_search(vector, top_k).await.unwrap_or_else(|e| {
            warn!("Search in {} failed, returning no results: {}", self.name, e);
            Vec::new()
        })
    }

    /// Nearest neighbours for `vector`, separating "nothing there" from failure.
    ///
    /// A missing or empty collection is `Ok` with no hits. A failed load or
    /// search is an error. A collection unloaded underneath this manager is
    /// reloaded and searched once more.
    #[inline]
    pub async fn try_search(&self, vector: &[f32], top_k: usize) -> Result<Vec<SearchHit>> {
        if top_k == 0 || !self.try_load().await? {
            return Ok(Vec::new());
        }

        match self.store.search(&self.name, vector, top_k).await {
            Ok(hits) => Ok(self.best(hits, top_k)),
            Err(StoreError::NotLoaded(_)) => {
                debug!("Collection {} was unloaded underneath us, reloading", self.name);
                self.set_state(ManagerState::Unloaded);
                if !self.try_load().await? {
                    return Ok(Vec::new());
                }
                self.store
                    .search(&self.name, vector, top_k)
                    .await
                    .map(|hits| self.best(hits, top_k))
                    .map_err(|e| store_error("search", &self.name, &e))
            }
            Err(StoreError::CollectionNotFound(_)) => {
                self.set_state(ManagerState::Unloaded);
                Ok(Vec::new())
            }
            Err(e) => Err(store_error("search", &self.name, &e)),
        }
    }

    fn best(&self, mut hits: Vec<SearchHit>, top_k: usize) -> Vec<SearchHit> {
        hits.truncate(top_k);
        debug!("Search in {} returned {} hits", self.name, hits.len());
        hits
    }

    /// Delete every entity belonging to `document_id`; a missing collection is a no-op
    #[inline]
    pub async fn delete_by_document_id(&self, document_id: &str) -> Result<()> {
        match self.store.delete_by_document(&self.name, document_id).await {
            Ok(()) => {
                debug!("Deleted document {} from {}", document_id, self.name);
                Ok(())
            }
            Err(StoreError::CollectionNotFound(_)) => {
                debug!(
                    "Collection {} does not exist, nothing to delete for {}",
                    self.name, document_id
                );
                Ok(())
            }
            Err(e) => Err(store_error("delete", &self.name, &e)),
        }
    }

    /// Drop the whole collection; already absent is success
    #[inline]
    pub async fn drop_collection(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;

        match self.store.drop_collection(&self.name).await {
            Ok(()) => info!("Dropped collection {}", self.name),
            Err(StoreError::CollectionNotFound(_)) => {
                debug!("Collection {} already absent", self.name);
            }
            Err(e) => return Err(store_error("drop", &self.name, &e)),
        }

        self.set_state(ManagerState::Unloaded);
        self.settle().await;
        Ok(())
    }

    /// Release the in-memory load state
    #[inline]
    pub async fn release(&self) {
        let _guard = self.lifecycle.lock().await;
        if self.state() != ManagerState::Loaded {
            return;
        }

        if let Err(e) = self.store.release_collection(&self.name).await {
            warn!("Releasing collection {} failed: {}", self.name, e);
        }
        self.set_state(ManagerState::Unloaded);
        debug!("Released collection {}", self.name);
    }

    /// Number of stored entities; a missing collection counts as empty
    #[inline]
    pub async fn count(&self) -> Result<u64> {
        match self.store.count(&self.name).await {
            Ok(count) => Ok(count),
            Err(StoreError::CollectionNotFound(_)) => Ok(0),
            Err(e) => Err(store_error("count", &self.name, &e)),
        }
    }

    /// Whether the collection exists in the store
    #[inline]
    pub async fn exists(&self) -> Result<bool> {
        self.store
            .has_collection(&self.name)
            .await
            .map_err(|e| store_error("existence check", &self.name, &e))
    }
}
