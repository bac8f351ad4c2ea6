use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::{Config, ProviderKind, get_config_dir};
use crate::database::store_from_config;
use crate::embeddings::{EmbeddingClient, OllamaProvider, provider_from_config};
use crate::retrieval::Retriever;

/// Load the configuration from `config_dir`, or the default directory
#[inline]
pub fn load_config(config_dir: Option<&Path>) -> Result<Config> {
    let dir: PathBuf = match config_dir {
        Some(dir) => dir.to_path_buf(),
        None => get_config_dir().context("Failed to locate configuration directory")?,
    };
    Config::load(&dir).with_context(|| format!("Failed to load configuration from {}", dir.display()))
}

async fn read_document(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read document {}", path.display()))
}

async fn open_retriever(config: &Config) -> Result<Retriever> {
    Retriever::from_config(config)
        .await
        .context("Failed to initialize retriever")
}

/// Chunk, embed and store a document read from `path`
#[inline]
pub async fn ingest(
    config: &Config,
    path: &Path,
    document_id: Option<&str>,
    collection: Option<&str>,
) -> Result<()> {
    let text = read_document(path).await?;
    let retriever = open_retriever(config).await?;

    let report = retriever
        .ingest_document(&text, document_id, collection)
        .await
        .with_context(|| format!("Failed to ingest {}", path.display()))?;

    println!("Ingested {}", path.display());
    println!("  Collection: {}", report.collection);
    println!("  Document ID: {}", report.document_id);
    println!("  Chunks: {}", report.chunk_count);
    Ok(())
}

/// Replace a stored document with the contents of `path`
#[inline]
pub async fn update(config: &Config, path: &Path, document_id: &str, collection: &str) -> Result<()> {
    let text = read_document(path).await?;
    let retriever = open_retriever(config).await?;

    let report = retriever
        .update_document(&text, document_id, collection)
        .await
        .with_context(|| format!("Failed to update document {}", document_id))?;

    println!(
        "Updated document {} in {} ({} chunks)",
        report.document_id, report.collection, report.chunk_count
    );
    Ok(())
}

#[inline]
pub async fn delete(config: &Config, document_id: &str, collection: &str) -> Result<()> {
    let retriever = open_retriever(config).await?;
    retriever
        .delete_document(document_id, collection)
        .await
        .with_context(|| format!("Failed to delete document {}", document_id))?;

    println!("Deleted document {} from {}", document_id, collection);
    Ok(())
}

#[inline]
pub async fn drop_collection(config: &Config, collection: &str) -> Result<()> {
    let retriever = open_retriever(config).await?;
    retriever
        .drop_collection(collection)
        .await
        .with_context(|| format!("Failed to drop collection {}", collection))?;

    println!("Dropped collection {}", collection);
    Ok(())
}

#[inline]
pub async fn query(
    config: &Config,
    collection: &str,
    text: &str,
    top_k: Option<usize>,
) -> Result<()> {
    let retriever = open_retriever(config).await?;
    let results = retriever
        .query(collection, text, top_k)
        .await
        .context("Query rejected")?;

    if results.is_empty() {
        println!("No results in {} for \"{}\"", collection, text);
        return Ok(());
    }

    println!("{} results from {}:", results.len(), collection);
    for (rank, chunk) in results.iter().enumerate() {
        println!();
        println!("{}. {}", rank + 1, chunk.trim());
    }
    Ok(())
}

/// Print pool and cache statistics, plus stored entity counts for `collections`
#[inline]
pub async fn show_stats(config: &Config, collections: &[String]) -> Result<()> {
    let retriever = open_retriever(config).await?;

    for name in collections {
        let manager = retriever
            .pool()
            .acquire_existing(name)
            .await
            .with_context(|| format!("Failed to look up {}", name))?;
        let count = match manager {
            Some(manager) => manager
                .count()
                .await
                .with_context(|| format!("Failed to count entities in {}", name))?,
            None => 0,
        };
        println!("{}: {} entities", name, count);
    }

    let stats = retriever.stats();
    println!(
        "{}",
        serde_json::to_string_pretty(&stats).context("Failed to render statistics")?
    );
    Ok(())
}

/// Check that the embedding provider answers and the vector store opens
#[inline]
pub async fn health(config: &Config) -> Result<()> {
    let mut healthy = true;

    if config.provider.kind == ProviderKind::Ollama {
        let provider = OllamaProvider::new(&config.provider, config.embedding.timeout())?;
        if let Err(e) = provider.health_check().await {
            warn!("Ollama health check failed: {:#}", e);
            println!("Embedding provider: FAILED ({:#})", e);
            healthy = false;
        }
    }

    if healthy {
        let provider = provider_from_config(config)?;
        let client = EmbeddingClient::new(provider, &config.embedding).with_retry_attempts(1);
        match client.embed_one("health check").await {
            Ok(vector) => println!(
                "Embedding provider: OK ({} at {}, {} dimensions)",
                config.provider.model,
                config.provider.host,
                vector.len()
            ),
            Err(e) => {
                println!("Embedding provider: FAILED ({})", e);
                healthy = false;
            }
        }
    }

    match store_from_config(config).await {
        Ok(store) => match store.has_collection("health_probe").await {
            Ok(_) => println!("Vector store: OK ({:?})", config.store.backend),
            Err(e) => {
                println!("Vector store: FAILED ({})", e);
                healthy = false;
            }
        },
        Err(e) => {
            println!("Vector store: FAILED ({:#})", e);
            healthy = false;
        }
    }

    if !healthy {
        anyhow::bail!("Health check failed");
    }
    info!("Health check passed");
    Ok(())
}
