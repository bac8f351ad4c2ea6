// Embeddings module
// Provider integrations, the batching/retrying client, and content chunking

pub mod chunking;
pub mod client;
pub mod ollama;
pub mod openai;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::config::{Config, ProviderKind};

pub use chunking::{Chunk, Chunker, ChunkingConfig, split_windows};
pub use client::EmbeddingClient;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

/// Failure reported by an embedding provider for a single call
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Worth retrying: timeouts, rate limits, 5xx, dropped connections
    #[error("transient provider failure: {0}")]
    Transient(String),
    /// Retrying will not help: bad request, auth failure, unparseable response
    #[error("provider failure: {0}")]
    Fatal(String),
}

impl ProviderError {
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// An external text-embedding service
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &str;

    /// Embed every text in one call, preserving input order
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;
}

/// Build the provider selected in the configuration
#[inline]
pub fn provider_from_config(config: &Config) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    let provider: Arc<dyn EmbeddingProvider> = match config.provider.kind {
        ProviderKind::Ollama => Arc::new(OllamaProvider::new(
            &config.provider,
            config.embedding.timeout(),
        )?),
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(
            &config.provider,
            config.embedding.timeout(),
        )?),
    };
    Ok(provider)
}

pub(crate) fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

/// Map a transport error onto the retry taxonomy
pub(crate) fn classify_error(error: &ureq::Error) -> ProviderError {
    match error {
        ureq::Error::StatusCode(status) if *status >= 500 || *status == 429 => {
            warn!("Embedding provider returned status {}", status);
            ProviderError::Transient(format!("HTTP {}", status))
        }
        ureq::Error::StatusCode(status) => {
            ProviderError::Fatal(format!("Client error: HTTP {}", status))
        }
        ureq::Error::ConnectionFailed
        | ureq::Error::HostNotFound
        | ureq::Error::Timeout(_)
        | ureq::Error::Io(_) => {
            ProviderError::Transient(format!("Transport error: {}", error))
        }
        _ => ProviderError::Fatal(format!("Non-retryable error: {}", error)),
    }
}

/// POST a JSON body on the blocking pool and return the response text
pub(crate) async fn post_json(
    agent: &ureq::Agent,
    url: url::Url,
    body: String,
    bearer: Option<String>,
) -> Result<String, ProviderError> {
    let agent = agent.clone();

    tokio::task::spawn_blocking(move || {
        let mut request = agent
            .post(url.as_str())
            .header("Content-Type", "application/json");
        if let Some(token) = bearer {
            request = request.header("Authorization", format!("Bearer {}", token));
        }
        request
            .send(&body)
            .and_then(|mut resp| resp.body_mut().read_to_string())
            .map_err(|e| classify_error(&e))
    })
    .await
    .map_err(|e| ProviderError::Fatal(format!("Embedding request task failed: {}", e)))?
}

/// GET on the blocking pool and return the response text
pub(crate) async fn get_text(agent: &ureq::Agent, url: url::Url) -> Result<String, ProviderError> {
    let agent = agent.clone();

    tokio::task::spawn_blocking(move || {
        agent
            .get(url.as_str())
            .call()
            .and_then(|mut resp| resp.body_mut().read_to_string())
            .map_err(|e| classify_error(&e))
    })
    .await
    .map_err(|e| ProviderError::Fatal(format!("Request task failed: {}", e)))?
}
