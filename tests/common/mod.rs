#![allow(dead_code, reason = "each integration test uses a different subset")]

use async_trait::async_trait;
use ragpool::config::{Config, StoreBackend};
use ragpool::embeddings::{ChunkingConfig, EmbeddingProvider, ProviderError};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const DIMENSION: usize = 1536;
pub const FOX: &str = "The quick brown fox. The lazy dog sleeps.";

/// Deterministic bag-of-words embedder; texts sharing words land close together
#[derive(Default)]
pub struct LexicalProvider {
    pub calls: AtomicUsize,
}

pub fn lexical_vector(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0; DIMENSION];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
    {
        let mut hasher = DefaultHasher::new();
        word.to_lowercase().hash(&mut hasher);
        let bucket = usize::try_from(hasher.finish() % DIMENSION as u64).unwrap_or(0);
        vector[bucket] += 1.0;
    }
    vector
}

#[async_trait]
impl EmbeddingProvider for LexicalProvider {
    fn name(&self) -> &str {
        "lexical"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|text| lexical_vector(text)).collect())
    }
}

/// Never answers within any reasonable timeout
#[derive(Default)]
pub struct HangingProvider {
    pub calls: AtomicUsize,
}

#[async_trait]
impl EmbeddingProvider for HangingProvider {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(ProviderError::Transient("unreachable".into()))
    }
}

pub fn test_config(base_dir: &Path, backend: StoreBackend) -> Config {
    let mut config = Config::load(base_dir).expect("should load default config");
    config.embedding.batch_pause_ms = 0;
    config.embedding.backoff_base_ms = 1;
    config.chunking = ChunkingConfig {
        chunk_size: 20,
        overlap: 5,
    };
    config.store.backend = backend;
    config.store.settle_delay_ms = 0;
    config
}

pub fn init_test_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init()
        .ok();
}
