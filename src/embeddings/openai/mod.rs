
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::{EmbeddingProvider, ProviderError, build_agent, post_json};
use crate::config::ProviderConfig;

/// Embedding provider speaking the OpenAI `/v1/embeddings` protocol
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    base_url: Url,
    model: String,
    api_key: Option<String>,
    agent: ureq::Agent,
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiProvider {
    /// Build a provider; the API key is read from the configured environment variable
    #[inline]
    pub fn new(config: &ProviderConfig, timeout: Duration) -> Result<Self> {
        let base_url = config
            .base_url()
            .context("Failed to generate OpenAI URL from config")?;

        let api_key = std::env::var(&config.api_key_env).ok();
        if api_key.is_none() {
            warn!(
                "Environment variable {} is not set, requests will be unauthenticated",
                config.api_key_env
            );
        }

        Ok(Self {
            base_url,
            model: config.model.clone(),
            api_key,
            agent: build_agent(timeout),
        })
    }

    #[inline]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let url = self
            .base_url
            .join("/v1/embeddings")
            .map_err(|e| ProviderError::Fatal(format!("Failed to build embedding URL: {}", e)))?;

        let body = serde_json::to_string(&EmbeddingsRequest {
            model: &self.model,
            input: texts,
        })
        .map_err(|e| ProviderError::Fatal(format!("Failed to serialize request: {}", e)))?;

        let response_text = post_json(&self.agent, url, body, self.api_key.clone()).await?;

        let mut response: EmbeddingsResponse = serde_json::from_str(&response_text)
            .map_err(|e| ProviderError::Fatal(format!("Failed to parse embedding response: {}", e)))?;

        // The protocol does not promise response order
        response.data.sort_by_key(|d| d.index);
        debug!("Received {} embeddings from OpenAI", response.data.len());

        Ok(response.data.into_iter().map(|d| d.embedding).collect())
    }
}
