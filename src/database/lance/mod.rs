// LanceDB vector store backend
// Each collection is a LanceDB table; a cached open table handle means "loaded"


use arrow::array::{
    Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatchIterator, StringArray,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::index::Index;
use lancedb::index::vector::{IvfHnswSqIndexBuilder, IvfPqIndexBuilder};
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType, Table};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{
    CollectionSchema, DistanceMetric, IndexKind, LoadState, SearchHit, StoreError, StoredEntity,
    VectorStore,
};
use crate::config::Config;

/// Vector indexes need enough rows to train partitions; below this an exact scan is used
pub const MIN_ROWS_FOR_INDEX: usize = 256;

/// Embedded LanceDB store
pub struct LanceVectorStore {
    connection: Connection,
    index: IndexKind,
    metric: DistanceMetric,
    loaded: Mutex<HashMap<String, Table>>,
}

fn backend(context: &str, error: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(format!("{}: {}", context, error))
}

fn map_lance_error(name: &str, context: &str, error: lancedb::Error) -> StoreError {
    match error {
        lancedb::Error::TableNotFound { .. } => StoreError::CollectionNotFound(name.to_string()),
        lancedb::Error::TableAlreadyExists { .. } => {
            StoreError::CollectionExists(name.to_string())
        }
        other => backend(context, other),
    }
}

fn distance_type(metric: DistanceMetric) -> DistanceType {
    match metric {
        DistanceMetric::Cosine => DistanceType::Cosine,
        DistanceMetric::L2 => DistanceType::L2,
        DistanceMetric::Dot => DistanceType::Dot,
    }
}

/// Single quotes are doubled inside SQL string literals
fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

impl LanceVectorStore {
    /// Open (or create) the LanceDB directory under the configured base dir
    #[inline]
    pub async fn new(config: &Config) -> Result<Self, StoreError> {
        Self::open(
            &config.vector_database_path(),
            config.store.index,
            config.store.metric,
        )
        .await
    }

    #[inline]
    pub async fn open(
        db_path: &Path,
        index: IndexKind,
        metric: DistanceMetric,
    ) -> Result<Self, StoreError> {
        debug!("Initializing LanceDB at path: {:?}", db_path);

        std::fs::create_dir_all(db_path)
            .map_err(|e| backend("Failed to create vector database directory", e))?;

        let uri = format!("file://{}", db_path.display());
        let connection = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| backend("Failed to connect to LanceDB", e))?;

        info!("Vector store initialized at {}", uri);
        Ok(Self {
            connection,
            index,
            metric,
            loaded: Mutex::new(HashMap::new()),
        })
    }

    /// Create schema with the specified vector dimension
    fn create_schema(vector_dim: usize) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, false)),
                    vector_dim as i32,
                ),
                false,
            ),
            Field::new("text", DataType::Utf8, false),
            Field::new("document_id", DataType::Utf8, false),
            Field::new("timestamp", DataType::Int64, false),
        ]))
    }

    fn cached(&self, name: &str) -> Option<Table> {
        self.loaded.lock().get(name).cloned()
    }

    /// Cached handle if loaded, otherwise a fresh one
    async fn table(&self, name: &str) -> Result<Table, StoreError> {
        if let Some(table) = self.cached(name) {
            return Ok(table);
        }
        self.connection
            .open_table(name)
            .execute()
            .await
            .map_err(|e| map_lance_error(name, "Failed to open table", e))
    }

    /// Detect vector dimension from the table schema
    async fn vector_dimension(table: &Table) -> Result<usize, StoreError> {
        let schema = table
            .schema()
            .await
            .map_err(|e| backend("Failed to get table schema", e))?;

        for field in schema.fields() {
            if field.name() == "vector" {
                if let DataType::FixedSizeList(_, size) = field.data_type() {
                    return Ok(*size as usize);
                }
            }
        }

        Err(StoreError::Backend(
            "Could not find vector column or determine dimension".to_string(),
        ))
    }

    fn create_record_batch(
        entities: &[StoredEntity],
        vector_dim: usize,
    ) -> Result<RecordBatch, StoreError> {
        let len = entities.len();
        let mut ids = Vec::with_capacity(len);
        let mut flat_values = Vec::with_capacity(len * vector_dim);
        let mut texts = Vec::with_capacity(len);
        let mut document_ids = Vec::with_capacity(len);
        let mut timestamps = Vec::with_capacity(len);

        for entity in entities {
            if entity.vector.len() != vector_dim {
                return Err(StoreError::DimensionMismatch {
                    expected: vector_dim,
                    actual: entity.vector.len(),
                });
            }
            ids.push(entity.id.as_str());
            flat_values.extend_from_slice(&entity.vector);
            texts.push(entity.text.as_str());
            document_ids.push(entity.document_id.as_str());
            timestamps.push(entity.timestamp);
        }

        let field = Arc::new(Field::new("item", DataType::Float32, false));
        let vector_array = FixedSizeListArray::try_new(
            field,
            vector_dim as i32,
            Arc::new(Float32Array::from(flat_values)),
            None,
        )
        .map_err(|e| backend("Failed to create vector array", e))?;

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(vector_array),
            Arc::new(StringArray::from(texts)),
            Arc::new(StringArray::from(document_ids)),
            Arc::new(Int64Array::from(timestamps)),
        ];

        RecordBatch::try_new(Self::create_schema(vector_dim), arrays)
            .map_err(|e| backend("Failed to create record batch", e))
    }

    fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray, StoreError> {
        batch
            .column_by_name(name)
            .ok_or_else(|| StoreError::Backend(format!("Missing {} column", name)))?
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| StoreError::Backend(format!("Invalid {} column type", name)))
    }

    /// Parse a single record batch from search results
    fn parse_search_batch(&self, batch: &RecordBatch) -> Result<Vec<SearchHit>, StoreError> {
        let ids = Self::string_column(batch, "id")?;
        let texts = Self::string_column(batch, "text")?;
        let document_ids = Self::string_column(batch, "document_id")?;
        let timestamps = batch
            .column_by_name("timestamp")
            .ok_or_else(|| StoreError::Backend("Missing timestamp column".to_string()))?
            .as_any()
            .downcast_ref::<Int64Array>()
            .ok_or_else(|| StoreError::Backend("Invalid timestamp column type".to_string()))?;

        let distances = batch
            .column_by_name("_distance")
            .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

        let hits = (0..batch.num_rows())
            .map(|row| {
                let distance =
                    distances.map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });
                SearchHit {
                    id: ids.value(row).to_string(),
                    text: texts.value(row).to_string(),
                    document_id: document_ids.value(row).to_string(),
                    timestamp: timestamps.value(row),
                    score: self.score(distance),
                }
            })
            .collect();

        Ok(hits)
    }

    /// Convert a LanceDB distance into a similarity score (higher is better)
    fn score(&self, distance: f32) -> f32 {
        match self.metric {
            DistanceMetric::Cosine => 1.0 - distance,
            DistanceMetric::L2 => 1.0 / (1.0 + distance.max(0.0).sqrt()),
            DistanceMetric::Dot => -distance,
        }
    }

    /// Build the configured vector index once the table is large enough
    async fn build_index(&self, name: &str, table: &Table) -> Result<(), StoreError> {
        let rows = table
            .count_rows(None)
            .await
            .map_err(|e| backend("Failed to count rows", e))?;

        if rows < MIN_ROWS_FOR_INDEX {
            debug!(
                "Collection {} has {} rows, deferring index build until {}",
                name, rows, MIN_ROWS_FOR_INDEX
            );
            return Ok(());
        }

        let distance = distance_type(self.metric);
        let index = match self.index {
            IndexKind::Hnsw => {
                Index::IvfHnswSq(IvfHnswSqIndexBuilder::default().distance_type(distance))
            }
            IndexKind::IvfPq => Index::IvfPq(IvfPqIndexBuilder::default().distance_type(distance)),
            IndexKind::Flat => return Ok(()),
        };

        table
            .create_index(&["vector"], index)
            .replace(true)
            .execute()
            .await
            .map_err(|e| backend("Failed to create vector index", e))?;

        info!("Vector index built for collection {} ({} rows)", name, rows);
        Ok(())
    }

    async fn has_vector_index(table: &Table) -> Result<bool, StoreError> {
        let indices = table
            .list_indices()
            .await
            .map_err(|e| backend("Failed to list indices", e))?;
        Ok(indices
            .iter()
            .any(|index| index.columns.iter().any(|c| c == "vector")))
    }
}

#[async_trait]
impl VectorStore for LanceVectorStore {
    async fn has_collection(&self, name: &str) -> Result<bool, StoreError> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| backend("Failed to list tables", e))?;
        Ok(table_names.iter().any(|t| t == name))
    }

    async fn create_collection(
        &self,
        name: &str,
        schema: &CollectionSchema,
    ) -> Result<(), StoreError> {
        self.connection
            .create_empty_table(name, Self::create_schema(schema.dimension))
            .execute()
            .await
            .map_err(|e| map_lance_error(name, "Failed to create table", e))?;

        info!(
            "Created table {} with {} dimensions",
            name, schema.dimension
        );
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> Result<(), StoreError> {
        self.loaded.lock().remove(name);

        if !self.has_collection(name).await? {
            return Err(StoreError::CollectionNotFound(name.to_string()));
        }

        self.connection
            .drop_table(name)
            .await
            .map_err(|e| map_lance_error(name, "Failed to drop table", e))?;

        info!("Dropped table {}", name);
        Ok(())
    }

    async fn create_index(&self, name: &str) -> Result<(), StoreError> {
        let table = self.table(name).await?;
        self.build_index(name, &table).await
    }

    async fn load_collection(&self, name: &str) -> Result<(), StoreError> {
        if self.cached(name).is_some() {
            return Ok(());
        }

        let table = self
            .connection
            .open_table(name)
            .execute()
            .await
            .map_err(|e| map_lance_error(name, "Failed to open table", e))?;

        self.loaded.lock().insert(name.to_string(), table);
        debug!("Loaded table {}", name);
        Ok(())
    }

    async fn release_collection(&self, name: &str) -> Result<(), StoreError> {
        self.loaded.lock().remove(name);
        Ok(())
    }

    async fn load_state(&self, name: &str) -> Result<LoadState, StoreError> {
        if self.cached(name).is_some() {
            return Ok(LoadState::Loaded);
        }
        if self.has_collection(name).await? {
            Ok(LoadState::NotLoaded)
        } else {
            Err(StoreError::CollectionNotFound(name.to_string()))
        }
    }

    async fn insert(&self, name: &str, entities: &[StoredEntity]) -> Result<usize, StoreError> {
        if entities.is_empty() {
            return Ok(0);
        }

        let table = self.table(name).await?;
        let vector_dim = Self::vector_dimension(&table).await?;
        let record_batch = Self::create_record_batch(entities, vector_dim)?;

        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);
        table
            .add(reader)
            .execute()
            .await
            .map_err(|e| map_lance_error(name, "Failed to insert entities", e))?;

        debug!("Stored {} entities in {}", entities.len(), name);

        if self.index != IndexKind::Flat && !Self::has_vector_index(&table).await? {
            if let Err(e) = self.build_index(name, &table).await {
                warn!("Deferred index build for {} failed: {}", name, e);
            }
        }

        Ok(entities.len())
    }

    async fn search(
        &self,
        name: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchHit>, StoreError> {
        let table = self
            .cached(name)
            .ok_or_else(|| StoreError::NotLoaded(name.to_string()))?;

        let mut results = table
            .vector_search(vector)
            .map_err(|e| backend("Failed to create vector search", e))?
            .column("vector")
            .distance_type(distance_type(self.metric))
            .limit(top_k)
            .execute()
            .await
            .map_err(|e| map_lance_error(name, "Failed to execute search", e))?;

        let mut hits = Vec::new();
        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| backend("Failed to read result stream", e))?
        {
            hits.extend(self.parse_search_batch(&batch)?);
        }

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(hits)
    }

    async fn delete_by_document(&self, name: &str, document_id: &str) -> Result<(), StoreError> {
        let table = self.table(name).await?;
        let predicate = format!("document_id = {}", quote_literal(document_id));
        table
            .delete(&predicate)
            .await
            .map_err(|e| map_lance_error(name, "Failed to delete document", e))?;

        debug!("Deleted document {} from {}", document_id, name);
        Ok(())
    }

    async fn count(&self, name: &str) -> Result<u64, StoreError> {
        let table = self.table(name).await?;
        let count = table
            .count_rows(None)
            .await
            .map_err(|e| backend("Failed to count rows", e))?;
        Ok(count as u64)
    }
}
