
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ConfigError;
use crate::{RagError, Result};

/// A contiguous slice of a source document, ready for embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// The chunk text, never whitespace-only
    pub text: String,
    /// The document this chunk was cut from
    pub document_id: String,
    /// Position of this chunk within the document
    pub position: usize,
}

/// Configuration for the sliding-window chunker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Window length in characters
    pub chunk_size: usize,
    /// Characters shared by neighbouring windows
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            overlap: 200,
        }
    }
}

/// Fixed-size sliding-window splitter
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

impl Chunker {
    /// Build a chunker, rejecting an overlap that would stall the window
    #[inline]
    pub fn new(config: &ChunkingConfig) -> std::result::Result<Self, ConfigError> {
        if config.chunk_size == 0 {
            return Err(ConfigError::InvalidChunkSize(config.chunk_size));
        }
        if config.overlap >= config.chunk_size {
            return Err(ConfigError::OverlapTooLarge(
                config.overlap,
                config.chunk_size,
            ));
        }

        Ok(Self {
            chunk_size: config.chunk_size,
            overlap: config.overlap,
        })
    }

    #[inline]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    #[inline]
    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Split `text` into chunks tagged with `document_id`
    #[inline]
    pub fn split(&self, text: &str, document_id: &str) -> Result<Vec<Chunk>> {
        let chunks: Vec<Chunk> = split_windows(text, self.chunk_size, self.overlap)
            .into_iter()
            .enumerate()
            .map(|(position, text)| Chunk {
                text,
                document_id: document_id.to_string(),
                position,
            })
            .collect();

        if chunks.is_empty() {
            return Err(RagError::EmptyInput);
        }

        debug!(
            "Split document {} into {} chunks (size {}, overlap {})",
            document_id,
            chunks.len(),
            self.chunk_size,
            self.overlap
        );

        Ok(chunks)
    }
}

/// Slide a `chunk_size` window over the characters of `text`, advancing by
/// `chunk_size - overlap`, and keep every window that is not whitespace-only.
///
/// Windows are measured in `char`s so a multi-byte character is never split.
/// The caller guarantees `overlap < chunk_size`.
#[inline]
pub fn split_windows(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    if text.is_empty() || chunk_size == 0 || overlap >= chunk_size {
        return Vec::new();
    }

    let mut boundaries: Vec<usize> = text.char_indices().map(|(offset, _)| offset).collect();
    let char_count = boundaries.len();
    boundaries.push(text.len());

    let step = chunk_size - overlap;
    let mut windows = Vec::with_capacity(char_count / step + 1);
    let mut start = 0;

    loop {
        let end = (start + chunk_size).min(char_count);
        let window = text.get(boundaries[start]..boundaries[end]).unwrap_or_default();

        if !window.trim().is_empty() {
            windows.push(window.to_string());
        }

        if end == char_count {
            break;
        }
        start += step;
    }

    windows
}
