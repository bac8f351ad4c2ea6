use super::*;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

const DIMENSION: usize = 4;

/// Provider that answers from a script, falling back to well-formed vectors
#[derive(Default)]
struct ScriptedProvider {
    script: Mutex<VecDeque<std::result::Result<(), ProviderError>>>,
    batch_sizes: Mutex<Vec<usize>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
    dimension_override: Option<(usize, usize)>,
}

impl ScriptedProvider {
    fn failing_with(errors: Vec<ProviderError>) -> Self {
        Self {
            script: Mutex::new(errors.into_iter().map(Err).collect()),
            ..Self::default()
        }
    }
}

#[async_trait]
impl EmbeddingProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn embed(
        &self,
        texts: &[String],
    ) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.batch_sizes.lock().push(texts.len());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.script.lock().pop_front();
        if let Some(Err(error)) = next {
            return Err(error);
        }

        Ok(texts
            .iter()
            .enumerate()
            .map(|(i, text)| {
                let dimension = match self.dimension_override {
                    Some((bad_call, bad_index)) if bad_call == call && bad_index == i => {
                        DIMENSION + 1
                    }
                    _ => DIMENSION,
                };
                vec![text.len() as f32; dimension]
            })
            .collect())
    }
}

fn test_config() -> EmbeddingConfig {
    EmbeddingConfig {
        dimension: DIMENSION as u32,
        batch_size: 2,
        batch_pause_ms: 0,
        timeout_secs: 5,
        retry_attempts: 3,
        backoff_base_ms: 1,
    }
}

fn texts(n: usize) -> Vec<String> {
    (0..n).map(|i| "x".repeat(i + 1)).collect()
}

#[tokio::test]
async fn splits_into_batches_and_preserves_order() {
    let provider = Arc::new(ScriptedProvider::default());
    let client = EmbeddingClient::new(provider.clone(), &test_config());

    let vectors = client.embed_batch(&texts(5)).await.expect("should embed");

    assert_eq!(vectors.len(), 5);
    for (i, vector) in vectors.iter().enumerate() {
        assert_eq!(vector, &vec![(i + 1) as f32; DIMENSION]);
    }
    assert_eq!(*provider.batch_sizes.lock(), vec![2, 2, 1]);
}

#[tokio::test]
async fn empty_input_makes_no_calls() {
    let provider = Arc::new(ScriptedProvider::default());
    let client = EmbeddingClient::new(provider.clone(), &test_config());

    let vectors = client.embed_batch(&[]).await.expect("should embed");

    assert!(vectors.is_empty());
    assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn retries_transient_failures() {
    let provider = Arc::new(ScriptedProvider::failing_with(vec![
        ProviderError::Transient("HTTP 503".into()),
        ProviderError::Transient("HTTP 429".into()),
    ]));
    let client = EmbeddingClient::new(provider.clone(), &test_config());

    let vector = client.embed_one("hello").await.expect("third attempt succeeds");

    assert_eq!(vector.len(), DIMENSION);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn exhausted_retries_raise_service_error() {
    let provider = Arc::new(ScriptedProvider::failing_with(vec![
        ProviderError::Transient("HTTP 503".into());
        5
    ]));
    let client = EmbeddingClient::new(provider.clone(), &test_config());

    let result = client.embed_batch(&texts(1)).await;

    assert!(matches!(result, Err(RagError::EmbeddingService(_))));
    assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn fatal_failures_are_not_retried() {
    let provider = Arc::new(ScriptedProvider::failing_with(vec![ProviderError::Fatal(
        "Client error: HTTP 401".into(),
    )]));
    let client = EmbeddingClient::new(provider.clone(), &test_config());

    let result = client.embed_batch(&texts(1)).await;

    assert!(matches!(result, Err(RagError::EmbeddingService(_))));
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn timeouts_count_as_transient() {
    let provider = Arc::new(ScriptedProvider {
        delay: Some(Duration::from_millis(200)),
        ..ScriptedProvider::default()
    });
    let client = EmbeddingClient::new(provider.clone(), &test_config())
        .with_timeout(Duration::from_millis(10))
        .with_retry_attempts(2);

    let result = client.embed_batch(&texts(1)).await;

    assert!(matches!(result, Err(RagError::EmbeddingService(_))));
    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn dimension_mismatch_names_global_index() {
    // Second call, first item: global index 2
    let provider = Arc::new(ScriptedProvider {
        dimension_override: Some((1, 0)),
        ..ScriptedProvider::default()
    });
    let client = EmbeddingClient::new(provider.clone(), &test_config());

    let result = client.embed_batch(&texts(5)).await;

    match result {
        Err(RagError::InvalidEmbedding {
            index,
            expected,
            actual,
        }) => {
            assert_eq!(index, 2);
            assert_eq!(expected, DIMENSION);
            assert_eq!(actual, DIMENSION + 1);
        }
        other => panic!("expected InvalidEmbedding, got {:?}", other),
    }
    // The failed batch is not retried and later batches are never sent
    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn builder_methods() {
    let client = EmbeddingClient::new(Arc::new(ScriptedProvider::default()), &test_config())
        .with_timeout(Duration::from_secs(60))
        .with_retry_attempts(0)
        .with_backoff_base(Duration::from_millis(5))
        .with_batch_pause(Duration::ZERO);

    assert_eq!(client.timeout, Duration::from_secs(60));
    assert_eq!(client.retry_attempts, 1);
    assert_eq!(client.backoff_base, Duration::from_millis(5));
    assert_eq!(client.dimension(), DIMENSION);
}
