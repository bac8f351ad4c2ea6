use thiserror::Error;

pub type Result<T, E = RagError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Input produced no non-empty chunks")]
    EmptyInput,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid collection name: {0}")]
    InvalidCollectionName(String),

    #[error("Invalid embedding at index {index}: expected {expected} dimensions, got {actual}")]
    InvalidEmbedding {
        index: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Malformed embedding at index {0}: contains non-finite values")]
    MalformedEmbedding(usize),

    #[error("Embedding service error: {0}")]
    EmbeddingService(String),

    #[error("Failed to initialize collection '{collection}': {reason}")]
    CollectionInit { collection: String, reason: String },

    #[error("Failed to insert into collection '{collection}': {reason}")]
    Insert { collection: String, reason: String },

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod cache;
pub mod collection;
pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod pool;
pub mod retrieval;
