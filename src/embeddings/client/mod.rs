#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, warn};

use super::{EmbeddingProvider, ProviderError};
use crate::config::EmbeddingConfig;
use crate::{RagError, Result};

const EXPONENTIAL_BACKOFF_BASE: u32 = 2;

/// Batching, timeout and retry wrapper around an [`EmbeddingProvider`]
#[derive(Clone)]
pub struct EmbeddingClient {
    provider: Arc<dyn EmbeddingProvider>,
    dimension: usize,
    batch_size: usize,
    batch_pause: Duration,
    timeout: Duration,
    retry_attempts: u32,
    backoff_base: Duration,
}

impl std::fmt::Debug for EmbeddingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingClient")
            .field("provider", &self.provider.name())
            .field("dimension", &self.dimension)
            .field("batch_size", &self.batch_size)
            .field("timeout", &self.timeout)
            .field("retry_attempts", &self.retry_attempts)
            .finish_non_exhaustive()
    }
}

impl EmbeddingClient {
    #[inline]
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: &EmbeddingConfig) -> Self {
        Self {
            provider,
            dimension: config.dimension as usize,
            batch_size: (config.batch_size as usize).max(1),
            batch_pause: config.batch_pause(),
            timeout: config.timeout(),
            retry_attempts: config.retry_attempts.max(1),
            backoff_base: config.backoff_base(),
        }
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    #[inline]
    pub fn with_backoff_base(mut self, backoff_base: Duration) -> Self {
        self.backoff_base = backoff_base;
        self
    }

    #[inline]
    pub fn with_batch_pause(mut self, batch_pause: Duration) -> Self {
        self.batch_pause = batch_pause;
        self
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embed a single text
    #[inline]
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| RagError::EmbeddingService("Provider returned no embedding".into()))
    }

    /// Embed all texts, returning one vector per text in input order.
    ///
    /// Texts are sent in groups of the configured batch size with a short pause
    /// between groups. Any failure aborts the whole call; vectors from earlier
    /// groups are discarded.
    #[inline]
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            "Generating {} embeddings via {} in batches of {}",
            texts.len(),
            self.provider.name(),
            self.batch_size
        );

        let mut results = Vec::with_capacity(texts.len());

        for (batch_index, batch) in texts.chunks(self.batch_size).enumerate() {
            if batch_index > 0 && !self.batch_pause.is_zero() {
                sleep(self.batch_pause).await;
            }

            let offset = batch_index * self.batch_size;
            let vectors = self.embed_with_retry(batch).await?;
            self.validate(offset, batch.len(), &vectors)?;
            results.extend(vectors);
        }

        debug!("Generated {} embeddings total", results.len());
        Ok(results)
    }

    fn validate(&self, offset: usize, expected_len: usize, vectors: &[Vec<f32>]) -> Result<()> {
        if vectors.len() != expected_len {
            return Err(RagError::EmbeddingService(format!(
                "Mismatch between request and response counts: {} vs {}",
                expected_len,
                vectors.len()
            )));
        }

        for (i, vector) in vectors.iter().enumerate() {
            if vector.len() != self.dimension {
                error!(
                    "Embedding {} has {} dimensions, expected {}",
                    offset + i,
                    vector.len(),
                    self.dimension
                );
                return Err(RagError::InvalidEmbedding {
                    index: offset + i,
                    expected: self.dimension,
                    actual: vector.len(),
                });
            }
            if vector.iter().any(|v| !v.is_finite()) {
                return Err(RagError::MalformedEmbedding(offset + i));
            }
        }

        Ok(())
    }

    async fn embed_with_retry(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!(
                "Embedding request attempt {}/{} ({} texts)",
                attempt,
                self.retry_attempts,
                batch.len()
            );

            let outcome = match timeout(self.timeout, self.provider.embed(batch)).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Transient(format!(
                    "request timed out after {:?}",
                    self.timeout
                ))),
            };

            match outcome {
                Ok(vectors) => {
                    debug!("Embedding request succeeded on attempt {}", attempt);
                    return Ok(vectors);
                }
                Err(ProviderError::Fatal(reason)) => {
                    warn!("Non-retryable embedding failure: {}", reason);
                    return Err(RagError::EmbeddingService(reason));
                }
                Err(ProviderError::Transient(reason)) => {
                    warn!(
                        "Transient embedding failure: {}, attempt {}/{}",
                        reason, attempt, self.retry_attempts
                    );
                    last_error = Some(reason);

                    if attempt < self.retry_attempts {
                        let delay = self.backoff_base * EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1);
                        debug!("Waiting {:?} before retry", delay);
                        sleep(delay).await;
                    }
                }
            }
        }

        error!(
            "All {} embedding attempts failed via {}",
            self.retry_attempts,
            self.provider.name()
        );

        Err(RagError::EmbeddingService(format!(
            "Retries exhausted after {} attempts: {}",
            self.retry_attempts,
            last_error.unwrap_or_else(|| "unknown error".to_string())
        )))
    }
}
