
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::cache::{CacheConfig, CacheNamespaceConfig};
use crate::database::{DistanceMetric, IndexKind};
use crate::embeddings::chunking::ChunkingConfig;
use crate::pool::PoolConfig;

pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 1536;
pub const MAX_EMBEDDING_BATCH_SIZE: u32 = 1000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Ollama,
}

/// Where embeddings come from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub model: String,
    /// Name of the environment variable holding the API key (OpenAI only)
    pub api_key_env: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::OpenAi,
            protocol: "https".to_string(),
            host: "api.openai.com".to_string(),
            port: 443,
            model: "text-embedding-3-small".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

/// Batching, timeout and retry policy for the embedding client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub dimension: u32,
    pub batch_size: u32,
    pub batch_pause_ms: u64,
    pub timeout_secs: u64,
    pub retry_attempts: u32,
    pub backoff_base_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_EMBEDDING_DIMENSION,
            batch_size: 20,
            batch_pause_ms: 100,
            timeout_secs: 30,
            retry_attempts: 3,
            backoff_base_ms: 1000,
        }
    }
}

impl EmbeddingConfig {
    #[inline]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    #[inline]
    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }

    #[inline]
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    LanceDb,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Pause after create/drop so the store can settle before the next call
    pub settle_delay_ms: u64,
    pub index: IndexKind,
    pub metric: DistanceMetric,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::LanceDb,
            settle_delay_ms: 500,
            index: IndexKind::Hnsw,
            metric: DistanceMetric::Cosine,
        }
    }
}

impl StoreConfig {
    #[inline]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid embedding dimension: {0} (must be between 1 and 8192)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid retry attempts: {0} (must be at least 1)")]
    InvalidRetryAttempts(u32),
    #[error("Invalid embedding timeout: {0}s (must be between 1 and 600 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid chunk size: {0} (must be greater than 0)")]
    InvalidChunkSize(usize),
    #[error("Chunk overlap ({0}) must be strictly less than chunk size ({1})")]
    OverlapTooLarge(usize, usize),
    #[error("Invalid pool size: {0} (must be greater than 0)")]
    InvalidPoolSize(usize),
    #[error("Invalid eviction fraction: {0} (must be in (0, 1])")]
    InvalidEvictionFraction(f64),
    #[error("Invalid cache settings for '{0}': {1}")]
    InvalidCache(&'static str, String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Default for Config {
    #[inline]
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            embedding: EmbeddingConfig::default(),
            chunking: ChunkingConfig::default(),
            store: StoreConfig::default(),
            pool: PoolConfig::default(),
            cache: CacheConfig::default(),
            base_dir: Self::default_dir().unwrap_or_else(|_| PathBuf::from(".ragpool")),
        }
    }
}

impl Config {
    /// Default configuration directory, `~/.ragpool`
    #[inline]
    pub fn default_dir() -> Result<PathBuf, ConfigError> {
        dirs::home_dir()
            .map(|home| home.join(".ragpool"))
            .or_else(|| dirs::data_dir().map(|data| data.join("ragpool")))
            .ok_or(ConfigError::DirectoryError)
    }

    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self {
                base_dir: config_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    /// Directory holding the LanceDB tables
    #[inline]
    pub fn vector_database_path(&self) -> PathBuf {
        self.get_base_dir().join("vectors")
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.provider.validate()?;
        self.embedding.validate()?;
        self.validate_chunking_config()?;
        self.validate_pool_config()?;
        self.validate_cache_config()?;
        Ok(())
    }

    fn validate_chunking_config(&self) -> Result<(), ConfigError> {
        let config = &self.chunking;

        if config.chunk_size == 0 {
            return Err(ConfigError::InvalidChunkSize(config.chunk_size));
        }

        if config.overlap >= config.chunk_size {
            return Err(ConfigError::OverlapTooLarge(
                config.overlap,
                config.chunk_size,
            ));
        }

        Ok(())
    }

    fn validate_pool_config(&self) -> Result<(), ConfigError> {
        let config = &self.pool;

        if config.max_clients == 0 {
            return Err(ConfigError::InvalidPoolSize(config.max_clients));
        }

        if !(config.eviction_fraction > 0.0 && config.eviction_fraction <= 1.0) {
            return Err(ConfigError::InvalidEvictionFraction(
                config.eviction_fraction,
            ));
        }

        Ok(())
    }

    fn validate_cache_config(&self) -> Result<(), ConfigError> {
        let namespaces: [(&'static str, &CacheNamespaceConfig); 3] = [
            ("embeddings", &self.cache.embeddings),
            ("query_results", &self.cache.query_results),
            ("agent_collections", &self.cache.agent_collections),
        ];

        for (name, namespace) in namespaces {
            if namespace.ttl_secs == 0 {
                return Err(ConfigError::InvalidCache(name, "ttl_secs must be > 0".into()));
            }
            if namespace.max_keys == 0 {
                return Err(ConfigError::InvalidCache(name, "max_keys must be > 0".into()));
            }
            if !(namespace.soft_ceiling_ratio > 0.0 && namespace.soft_ceiling_ratio <= 1.0) {
                return Err(ConfigError::InvalidCache(
                    name,
                    format!(
                        "soft_ceiling_ratio {} must be in (0, 1]",
                        namespace.soft_ceiling_ratio
                    ),
                ));
            }
        }

        Ok(())
    }
}

impl ProviderConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(ConfigError::InvalidProtocol(self.protocol.clone()));
        }

        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        self.base_url()?;

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        Ok(())
    }

    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }
}

impl EmbeddingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 || self.batch_size > MAX_EMBEDDING_BATCH_SIZE {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        if !(1..=8192).contains(&self.dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(self.dimension));
        }

        if self.retry_attempts == 0 {
            return Err(ConfigError::InvalidRetryAttempts(self.retry_attempts));
        }

        if !(1..=600).contains(&self.timeout_secs) {
            return Err(ConfigError::InvalidTimeout(self.timeout_secs));
        }

        Ok(())
    }
}
