pub mod maintenance;


use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub use maintenance::{MaintenanceHandle, MaintenanceSchedule};

use crate::cache::{CacheConfig, CacheLayer, CacheStats, normalize_query};
use crate::config::Config;
use crate::database::{CollectionSchema, StoredEntity, VectorStore, store_from_config};
use crate::embeddings::{Chunk, Chunker, EmbeddingClient, EmbeddingProvider, provider_from_config};
use crate::pool::{CollectionPool, PoolStats};
use crate::{RagError, Result};

pub const DEFAULT_TOP_K: usize = 5;
pub const MAX_COLLECTION_NAME_LEN: usize = 255;

/// Looks up which collection belongs to an external identifier
#[async_trait]
pub trait CollectionResolver: Send + Sync {
    /// `Ok(None)` when the identifier has no collection
    async fn resolve(&self, agent_id: &str) -> anyhow::Result<Option<String>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub collection: String,
    pub document_id: String,
    pub chunk_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RetrieverStats {
    pub pool: PoolStats,
    pub cache: CacheStats,
}

/// Letters, digits and underscores, not starting with a digit
#[inline]
pub fn validate_collection_name(name: &str) -> Result<()> {
    let valid_start = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_chars = name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid_start && valid_chars && name.len() <= MAX_COLLECTION_NAME_LEN {
        Ok(())
    } else {
        Err(RagError::InvalidCollectionName(name.to_string()))
    }
}

#[inline]
pub fn generate_collection_name() -> String {
    format!("kb_{}", Uuid::new_v4().simple())
}

fn require_id(kind: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(RagError::InvalidInput(format!("{} must not be empty", kind)));
    }
    Ok(())
}

/// Public entry point for ingestion and retrieval.
///
/// Owns the chunker, the embedding client, the collection pool and the cache
/// layer. Write operations return typed errors; queries degrade to an empty
/// result once their input has been validated.
pub struct Retriever {
    chunker: Chunker,
    embedder: EmbeddingClient,
    pool: Arc<CollectionPool>,
    cache: Arc<CacheLayer>,
    resolver: Option<Arc<dyn CollectionResolver>>,
    compaction_interval: Duration,
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("chunker", &self.chunker)
            .field("embedder", &self.embedder)
            .field("pool", &self.pool)
            .field("has_resolver", &self.resolver.is_some())
            .finish_non_exhaustive()
    }
}

impl Retriever {
    #[inline]
    pub fn new(
        chunker: Chunker,
        embedder: EmbeddingClient,
        pool: CollectionPool,
        cache_config: &CacheConfig,
    ) -> Self {
        Self {
            chunker,
            embedder,
            pool: Arc::new(pool),
            cache: Arc::new(CacheLayer::new(cache_config)),
            resolver: None,
            compaction_interval: cache_config.check_period(),
        }
    }

    /// Wire everything from configuration, opening the configured backend
    #[inline]
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        config.validate()?;
        let provider = provider_from_config(config)?;
        let store = store_from_config(config).await?;
        Ok(Self::from_parts(config, provider, store)?)
    }

    /// Wire a retriever around an existing provider and store
    #[inline]
    pub fn from_parts(
        config: &Config,
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
    ) -> Result<Self> {
        let chunker = Chunker::new(&config.chunking)?;
        let embedder = EmbeddingClient::new(provider, &config.embedding);
        let schema = CollectionSchema {
            dimension: embedder.dimension(),
            index: config.store.index,
            metric: config.store.metric,
        };
        let pool = CollectionPool::new(
            store,
            schema,
            config.store.settle_delay(),
            config.pool.clone(),
        );

        Ok(Self::new(chunker, embedder, pool, &config.cache))
    }

    #[inline]
    pub fn with_resolver(mut self, resolver: Arc<dyn CollectionResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    #[inline]
    pub fn pool(&self) -> &CollectionPool {
        &self.pool
    }

    #[inline]
    pub fn cache(&self) -> &CacheLayer {
        &self.cache
    }

    /// Chunk, embed and store a document.
    ///
    /// Without a document id a UUID is assigned; without a collection name a
    /// fresh `kb_` collection is created. Nothing is inserted unless every
    /// chunk was embedded.
    #[inline]
    pub async fn ingest_document(
        &self,
        text: &str,
        document_id: Option<&str>,
        collection: Option<&str>,
    ) -> Result<IngestReport> {
        let collection = match collection {
            Some(name) => {
                validate_collection_name(name)?;
                name.to_string()
            }
            None => generate_collection_name(),
        };
        let document_id = match document_id {
            Some(id) => {
                require_id("document id", id)?;
                id.to_string()
            }
            None => Uuid::new_v4().to_string(),
        };

        let chunks = self.chunker.split(text, &document_id)?;
        self.store_chunks(&collection, &document_id, chunks).await
    }

    /// Replace a document's chunks: delete everything stored for it, then ingest
    #[inline]
    pub async fn update_document(
        &self,
        text: &str,
        document_id: &str,
        collection: &str,
    ) -> Result<IngestReport> {
        validate_collection_name(collection)?;
        require_id("document id", document_id)?;
        let chunks = self.chunker.split(text, document_id)?;

        if let Some(manager) = self.pool.acquire_existing(collection).await? {
            manager.delete_by_document_id(document_id).await?;
        }
        self.cache.invalidate_collection(collection);

        self.store_chunks(collection, document_id, chunks).await
    }

    async fn store_chunks(
        &self,
        collection: &str,
        document_id: &str,
        chunks: Vec<Chunk>,
    ) -> Result<IngestReport> {
        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await.inspect_err(|e| {
            error!(
                "Embedding document {} for {} failed: {}",
                document_id, collection, e
            );
        })?;

        let manager = self.pool.acquire(collection).await;
        manager.ensure_created().await?;

        let timestamp = chrono::Utc::now().timestamp_millis();
        let entities: Vec<StoredEntity> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| StoredEntity {
                id: Uuid::new_v4().to_string(),
                vector,
                text: chunk.text,
                document_id: chunk.document_id,
                timestamp,
            })
            .collect();

        let chunk_count = manager.insert(&entities).await?;
        self.cache.invalidate_collection(collection);

        info!(
            "Ingested document {} into {} ({} chunks)",
            document_id, collection, chunk_count
        );
        Ok(IngestReport {
            collection: collection.to_string(),
            document_id: document_id.to_string(),
            chunk_count,
        })
    }

    /// Remove every chunk of a document; idempotent
    #[inline]
    pub async fn delete_document(&self, document_id: &str, collection: &str) -> Result<()> {
        validate_collection_name(collection)?;
        require_id("document id", document_id)?;

        let Some(manager) = self.pool.acquire_existing(collection).await? else {
            debug!(
                "Collection {} does not exist, nothing to delete for {}",
                collection, document_id
            );
            return Ok(());
        };
        manager.delete_by_document_id(document_id).await?;
        drop(manager);
        self.cache.invalidate_collection(collection);

        info!("Deleted document {} from {}", document_id, collection);
        Ok(())
    }

    /// Drop a whole collection and forget its pool entry; idempotent
    #[inline]
    pub async fn drop_collection(&self, collection: &str) -> Result<()> {
        validate_collection_name(collection)?;

        if let Some(manager) = self.pool.acquire_existing(collection).await? {
            manager.drop_collection().await?;
            drop(manager);
            self.pool.forget(collection);
        }
        self.cache.forget_collection(collection);
        Ok(())
    }

    /// Texts of the chunks closest to `text`, best first.
    ///
    /// Empty text, a zero `top_k` or a bad collection name are errors. Once
    /// input is valid the query never fails: embedding or search problems
    /// are logged and yield an empty result.
    #[inline]
    pub async fn query(
        &self,
        collection: &str,
        text: &str,
        top_k: Option<usize>,
    ) -> Result<Vec<String>> {
        validate_collection_name(collection)?;
        let normalized = normalize_query(text);
        if normalized.is_empty() {
            return Err(RagError::InvalidInput("query text must not be empty".into()));
        }
        let top_k = top_k.unwrap_or(DEFAULT_TOP_K);
        if top_k == 0 {
            return Err(RagError::InvalidInput("top_k must be at least 1".into()));
        }

        let key = self.cache.query_key(collection, top_k, &normalized);
        if let Some(cached) = self.cache.get_query_results(&key) {
            debug!("Query cache hit for {}", collection);
            return Ok(cached.as_ref().clone());
        }

        let vector = if let Some(vector) = self.cache.get_embedding(&normalized) {
            vector
        } else {
            match self.embedder.embed_one(&normalized).await {
                Ok(vector) => {
                    let vector = Arc::new(vector);
                    self.cache
                        .set_embedding(normalized.clone(), Arc::clone(&vector));
                    vector
                }
                Err(e) => {
                    warn!("Query against {} returns no context: {}", collection, e);
                    return Ok(Vec::new());
                }
            }
        };

        let hits = match self.pool.acquire_existing(collection).await {
            Ok(Some(manager)) => manager.try_search(&vector, top_k).await,
            Ok(None) => Ok(Vec::new()),
            Err(e) => Err(e),
        };
        // Degraded results are not cached
        let hits = match hits {
            Ok(hits) => hits,
            Err(e) => {
                warn!("Search in {} failed, returning no context: {}", collection, e);
                return Ok(Vec::new());
            }
        };

        let results: Vec<String> = hits
            .into_iter()
            .map(|hit| hit.text)
            .filter(|text| !text.trim().is_empty())
            .collect();

        debug!("Query against {} returned {} results", collection, results.len());
        self.cache
            .set_query_results(key, Arc::new(results.clone()));
        Ok(results)
    }

    /// Collection for an external identifier, from cache or the resolver
    #[inline]
    pub async fn resolve_collection(&self, agent_id: &str) -> Result<Option<String>> {
        require_id("agent id", agent_id)?;

        if let Some(collection) = self.cache.get_agent_collection(agent_id) {
            return Ok(Some(collection));
        }
        let Some(resolver) = &self.resolver else {
            return Ok(None);
        };

        let resolved = resolver.resolve(agent_id).await?;
        if let Some(collection) = &resolved {
            validate_collection_name(collection)?;
            self.cache
                .set_agent_collection(agent_id.to_string(), collection.clone());
        }
        Ok(resolved)
    }

    /// Record a known identifier to collection mapping
    #[inline]
    pub fn remember_collection(&self, agent_id: &str, collection: &str) -> Result<()> {
        require_id("agent id", agent_id)?;
        validate_collection_name(collection)?;
        self.cache
            .set_agent_collection(agent_id.to_string(), collection.to_string());
        Ok(())
    }

    /// Resolve the identifier's collection and query it; unresolved means no results
    #[inline]
    pub async fn query_for_agent(
        &self,
        agent_id: &str,
        text: &str,
        top_k: Option<usize>,
    ) -> Result<Vec<String>> {
        require_id("agent id", agent_id)?;

        match self.resolve_collection(agent_id).await {
            Ok(Some(collection)) => self.query(&collection, text, top_k).await,
            Ok(None) => {
                debug!("No collection known for agent {}", agent_id);
                Ok(Vec::new())
            }
            Err(e) => {
                warn!("Resolving collection for agent {} failed: {}", agent_id, e);
                Ok(Vec::new())
            }
        }
    }

    #[inline]
    pub fn stats(&self) -> RetrieverStats {
        RetrieverStats {
            pool: self.pool.stats(),
            cache: self.cache.stats(),
        }
    }

    /// Start the idle sweep and cache compaction passes
    #[inline]
    pub fn start_maintenance(&self) -> MaintenanceHandle {
        let config = self.pool.config();
        MaintenanceHandle::spawn(
            Arc::clone(&self.pool),
            Arc::clone(&self.cache),
            MaintenanceSchedule {
                sweep_interval: config.sweep_interval(),
                max_idle: config.max_idle(),
                compaction_interval: self.compaction_interval,
            },
        )
    }
}
