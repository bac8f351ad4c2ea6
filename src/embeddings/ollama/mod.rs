
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::{EmbeddingProvider, ProviderError, build_agent, get_text, post_json};
use crate::config::ProviderConfig;

/// Embedding provider backed by a local or remote Ollama server
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    base_url: Url,
    model: String,
    agent: ureq::Agent,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
    pub digest: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

impl OllamaProvider {
    #[inline]
    pub fn new(config: &ProviderConfig, timeout: Duration) -> Result<Self> {
        let base_url = config
            .base_url()
            .context("Failed to generate Ollama URL from config")?;

        Ok(Self {
            base_url,
            model: config.model.clone(),
            agent: build_agent(timeout),
        })
    }

    /// Test connection to the Ollama server and verify model availability
    #[inline]
    pub async fn health_check(&self) -> Result<()> {
        debug!("Performing health check for Ollama at {}", self.base_url);

        let models = self.list_models().await.context("Server ping failed")?;

        if !models.iter().any(|m| m.name == self.model) {
            let available_models: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
            warn!(
                "Model {} not found. Available models: {:?}",
                self.model, available_models
            );
            return Err(anyhow::anyhow!(
                "Model '{}' is not available. Available models: {:?}",
                self.model,
                available_models
            ));
        }

        info!(
            "Health check passed for Ollama server at {} with model {}",
            self.base_url, self.model
        );
        Ok(())
    }

    /// List all available models
    #[inline]
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = self
            .base_url
            .join("/api/tags")
            .context("Failed to build models URL")?;

        debug!("Fetching available models from {}", url);

        let response_text = get_text(&self.agent, url)
            .await
            .context("Failed to fetch models")?;

        let models_response: ModelsResponse =
            serde_json::from_str(&response_text).context("Failed to parse models response")?;

        debug!("Found {} models", models_response.models.len());
        Ok(models_response.models)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let url = self
            .base_url
            .join("/api/embed")
            .map_err(|e| ProviderError::Fatal(format!("Failed to build embedding URL: {}", e)))?;

        let body = serde_json::to_string(&EmbedRequest {
            model: &self.model,
            input: texts,
        })
        .map_err(|e| ProviderError::Fatal(format!("Failed to serialize request: {}", e)))?;

        let response_text = post_json(&self.agent, url, body, None).await?;

        let response: EmbedResponse = serde_json::from_str(&response_text)
            .map_err(|e| ProviderError::Fatal(format!("Failed to parse embedding response: {}", e)))?;

        Ok(response.embeddings)
    }
}
