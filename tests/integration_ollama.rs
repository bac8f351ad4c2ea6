#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

// Integration tests that require a local Ollama instance
// Run with: cargo test --test integration_ollama -- --ignored

use ragpool::config::{EmbeddingConfig, ProviderConfig, ProviderKind};
use ragpool::embeddings::{EmbeddingClient, EmbeddingProvider, OllamaProvider};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const TEST_MODEL: &str = "nomic-embed-text:latest";
const TEST_DIMENSION: u32 = 768;
const DEFAULT_OLLAMA_HOST: &str = "localhost";
const DEFAULT_OLLAMA_PORT: u16 = 11434;

fn provider_config(model: Option<&str>) -> ProviderConfig {
    let host = env::var("OLLAMA_HOST").unwrap_or_else(|_| DEFAULT_OLLAMA_HOST.to_string());
    let port = env::var("OLLAMA_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_OLLAMA_PORT);
    let model = model.map_or_else(
        || env::var("OLLAMA_MODEL").unwrap_or_else(|_| TEST_MODEL.to_string()),
        str::to_string,
    );

    ProviderConfig {
        kind: ProviderKind::Ollama,
        protocol: "http".to_string(),
        host,
        port,
        model,
        api_key_env: String::new(),
    }
}

fn create_integration_test_client(provider: Arc<OllamaProvider>) -> EmbeddingClient {
    let config = EmbeddingConfig {
        dimension: TEST_DIMENSION,
        batch_size: 5,
        ..EmbeddingConfig::default()
    };

    EmbeddingClient::new(provider, &config)
        .with_timeout(Duration::from_secs(60))
        .with_retry_attempts(3)
}

fn init_test_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init()
        .ok();
}

#[tokio::test]
#[ignore = "requires a running Ollama server"]
async fn real_ollama_health_check() {
    init_test_tracing();

    let provider = OllamaProvider::new(&provider_config(None), Duration::from_secs(10))
        .expect("should create provider");
    let result = provider.health_check().await;

    assert!(
        result.is_ok(),
        "Health check should succeed with local Ollama: {:?}",
        result
    );
}

#[tokio::test]
#[ignore = "requires a running Ollama server"]
async fn real_ollama_batch_embeddings() {
    init_test_tracing();

    let provider = Arc::new(
        OllamaProvider::new(&provider_config(None), Duration::from_secs(60))
            .expect("should create provider"),
    );
    let client = create_integration_test_client(provider);

    let texts: Vec<String> = (0..12)
        .map(|i| format!("Document {} talks about pooling and caching.", i))
        .collect();
    let vectors = client
        .embed_batch(&texts)
        .await
        .expect("batch embedding should succeed");

    assert_eq!(vectors.len(), texts.len());
    assert!(vectors.iter().all(|v| v.len() == client.dimension()));
    info!("Embedded {} texts across batches of 5", vectors.len());
}

#[tokio::test]
#[ignore = "requires a running Ollama server"]
async fn real_ollama_unknown_model() {
    init_test_tracing();

    let provider = OllamaProvider::new(
        &provider_config(Some("non-existent-model-12345")),
        Duration::from_secs(10),
    )
    .expect("should create provider");

    assert!(
        provider.health_check().await.is_err(),
        "Health check should fail with invalid model"
    );
    assert!(
        provider.embed(&["test text".to_string()]).await.is_err(),
        "Embedding should fail with invalid model"
    );
}
