
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

use super::{
    CollectionSchema, LoadState, SearchHit, StoreError, StoredEntity, VectorStore, similarity,
};

#[derive(Debug)]
struct MemoryCollection {
    schema: CollectionSchema,
    rows: Vec<StoredEntity>,
    indexed: bool,
    state: LoadState,
}

/// In-process vector store with exact search and explicit load state
#[derive(Debug, Default)]
pub struct MemoryVectorStore {
    collections: RwLock<HashMap<String, MemoryCollection>>,
}

impl MemoryVectorStore {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an index has been built for `name`
    #[inline]
    pub fn is_indexed(&self, name: &str) -> bool {
        self.collections
            .read()
            .get(name)
            .is_some_and(|collection| collection.indexed)
    }

    /// Names of every collection, sorted
    #[inline]
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }
}

fn not_found(name: &str) -> StoreError {
    StoreError::CollectionNotFound(name.to_string())
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn has_collection(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.collections.read().contains_key(name))
    }

    async fn create_collection(
        &self,
        name: &str,
        schema: &CollectionSchema,
    ) -> Result<(), StoreError> {
        let mut collections = self.collections.write();
        if collections.contains_key(name) {
            return Err(StoreError::CollectionExists(name.to_string()));
        }

        collections.insert(
            name.to_string(),
            MemoryCollection {
                schema: *schema,
                rows: Vec::new(),
                indexed: false,
                state: LoadState::NotLoaded,
            },
        );
        debug!("Created in-memory collection {}", name);
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> Result<(), StoreError> {
        self.collections
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| not_found(name))
    }

    async fn create_index(&self, name: &str) -> Result<(), StoreError> {
        let mut collections = self.collections.write();
        let collection = collections.get_mut(name).ok_or_else(|| not_found(name))?;
        collection.indexed = true;
        Ok(())
    }

    async fn load_collection(&self, name: &str) -> Result<(), StoreError> {
        let mut collections = self.collections.write();
        let collection = collections.get_mut(name).ok_or_else(|| not_found(name))?;
        collection.state = LoadState::Loaded;
        Ok(())
    }

    async fn release_collection(&self, name: &str) -> Result<(), StoreError> {
        let mut collections = self.collections.write();
        let collection = collections.get_mut(name).ok_or_else(|| not_found(name))?;
        collection.state = LoadState::NotLoaded;
        Ok(())
    }

    async fn load_state(&self, name: &str) -> Result<LoadState, StoreError> {
        self.collections
            .read()
            .get(name)
            .map(|collection| collection.state)
            .ok_or_else(|| not_found(name))
    }

    async fn insert(&self, name: &str, entities: &[StoredEntity]) -> Result<usize, StoreError> {
        let mut collections = self.collections.write();
        let collection = collections.get_mut(name).ok_or_else(|| not_found(name))?;

        let expected = collection.schema.dimension;
        if let Some(bad) = entities.iter().find(|e| e.vector.len() != expected) {
            return Err(StoreError::DimensionMismatch {
                expected,
                actual: bad.vector.len(),
            });
        }

        collection.rows.extend_from_slice(entities);
        Ok(entities.len())
    }

    async fn search(
        &self,
        name: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchHit>, StoreError> {
        let collections = self.collections.read();
        let collection = collections.get(name).ok_or_else(|| not_found(name))?;

        if collection.state != LoadState::Loaded {
            return Err(StoreError::NotLoaded(name.to_string()));
        }
        if vector.len() != collection.schema.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: collection.schema.dimension,
                actual: vector.len(),
            });
        }

        let metric = collection.schema.metric;
        let mut hits: Vec<SearchHit> = collection
            .rows
            .iter()
            .map(|row| SearchHit {
                id: row.id.clone(),
                text: row.text.clone(),
                document_id: row.document_id.clone(),
                timestamp: row.timestamp,
                score: similarity(metric, vector, &row.vector),
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete_by_document(&self, name: &str, document_id: &str) -> Result<(), StoreError> {
        let mut collections = self.collections.write();
        let collection = collections.get_mut(name).ok_or_else(|| not_found(name))?;
        collection.rows.retain(|row| row.document_id != document_id);
        Ok(())
    }

    async fn count(&self, name: &str) -> Result<u64, StoreError> {
        self.collections
            .read()
            .get(name)
            .map(|collection| collection.rows.len() as u64)
            .ok_or_else(|| not_found(name))
    }
}
