// Vector store capability
// Collection CRUD, index build, load/release and search, addressed by collection name

pub mod lance;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::config::{Config, StoreBackend};

pub use lance::{LanceVectorStore, MIN_ROWS_FOR_INDEX};
pub use memory::MemoryVectorStore;

/// One row in a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntity {
    pub id: String,
    pub vector: Vec<f32>,
    pub text: String,
    /// Groups every chunk of one ingested document
    pub document_id: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

/// A search result, without its vector
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub text: String,
    pub document_id: String,
    pub timestamp: i64,
    /// Higher is more similar
    pub score: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    Cosine,
    L2,
    Dot,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    /// Graph-based approximate index
    Hnsw,
    /// Inverted file with product quantization
    IvfPq,
    /// No index, exact scan
    Flat,
}

/// Fixed shape of a collection: `id`, `vector`, `text`, `document_id`, `timestamp`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionSchema {
    pub dimension: usize,
    pub index: IndexKind,
    pub metric: DistanceMetric,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    NotLoaded,
    Loading,
    Loaded,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("collection '{0}' does not exist")]
    CollectionNotFound(String),
    #[error("collection '{0}' already exists")]
    CollectionExists(String),
    #[error("collection '{0}' is not loaded")]
    NotLoaded(String),
    #[error("vector dimension mismatch: collection expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("{0}")]
    Backend(String),
}

/// An external vector store holding many independently indexed collections
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn has_collection(&self, name: &str) -> Result<bool, StoreError>;

    async fn create_collection(&self, name: &str, schema: &CollectionSchema)
    -> Result<(), StoreError>;

    /// Fails with [`StoreError::CollectionNotFound`] when absent
    async fn drop_collection(&self, name: &str) -> Result<(), StoreError>;

    async fn create_index(&self, name: &str) -> Result<(), StoreError>;

    async fn load_collection(&self, name: &str) -> Result<(), StoreError>;

    async fn release_collection(&self, name: &str) -> Result<(), StoreError>;

    async fn load_state(&self, name: &str) -> Result<LoadState, StoreError>;

    /// Insert all entities in one call, returning the number written
    async fn insert(&self, name: &str, entities: &[StoredEntity]) -> Result<usize, StoreError>;

    /// Nearest neighbours, best first; requires the collection to be loaded
    async fn search(
        &self,
        name: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchHit>, StoreError>;

    async fn delete_by_document(&self, name: &str, document_id: &str) -> Result<(), StoreError>;

    async fn count(&self, name: &str) -> Result<u64, StoreError>;
}

/// Open the backend selected in the configuration
#[inline]
pub async fn store_from_config(config: &Config) -> anyhow::Result<Arc<dyn VectorStore>> {
    let store: Arc<dyn VectorStore> = match config.store.backend {
        StoreBackend::LanceDb => Arc::new(LanceVectorStore::new(config).await?),
        StoreBackend::Memory => Arc::new(MemoryVectorStore::new()),
    };
    Ok(store)
}

/// Similarity score for two vectors under `metric`; higher is closer
#[inline]
pub fn similarity(metric: DistanceMetric, a: &[f32], b: &[f32]) -> f32 {
    match metric {
        DistanceMetric::Cosine => {
            let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
            let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
            let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm_a == 0.0 || norm_b == 0.0 {
                0.0
            } else {
                dot / (norm_a * norm_b)
            }
        }
        DistanceMetric::Dot => a.iter().zip(b).map(|(x, y)| x * y).sum(),
        DistanceMetric::L2 => {
            let distance = a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt();
            1.0 / (1.0 + distance)
        }
    }
}
