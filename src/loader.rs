//! Document loading: source file in, text chunks out.
//!
//! The [`DocumentLoader`] trait is the seam between the synchronizer and
//! whatever turns a file into embeddable text. It is always asynchronous;
//! implementations that do blocking work move it onto the blocking pool
//! themselves.
//!
//! A loader reports the digest of the bytes it chunked. The synchronizer
//! records that digest, not the one from its earlier hashing scan, so a
//! file rewritten between the scan and the load is fingerprinted as the
//! content that was actually indexed.

use async_trait::async_trait;

use crate::chunk::chunk_text;
use crate::config::ChunkingConfig;
use crate::error::LoadError;
use crate::extract::extract_text;
use crate::fingerprint::hash_bytes;
use crate::models::{LoadedDocument, SourceFile};

#[async_trait]
pub trait DocumentLoader: Send + Sync {
    /// Loads one source file. Chunks are tagged with `file.name` as their
    /// source and `content_hash` is the SHA-256 of the bytes they came from.
    async fn load(&self, file: &SourceFile) -> Result<LoadedDocument, LoadError>;
}

/// Reads a file from disk, extracts its text by extension, and chunks it.
#[derive(Debug, Clone)]
pub struct FileLoader {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl FileLoader {
    pub fn new(chunking: &ChunkingConfig) -> Self {
        Self {
            chunk_size: chunking.chunk_size,
            chunk_overlap: chunking.chunk_overlap,
        }
    }
}

#[async_trait]
impl DocumentLoader for FileLoader {
    async fn load(&self, file: &SourceFile) -> Result<LoadedDocument, LoadError> {
        let file = file.clone();
        let (size, overlap) = (self.chunk_size, self.chunk_overlap);

        tokio::task::spawn_blocking(move || {
            let bytes = std::fs::read(&file.path).map_err(|source| LoadError::Read {
                path: file.path.clone(),
                source,
            })?;
            let extension = file
                .path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or_default();
            let text = extract_text(&bytes, extension)?;
            Ok(LoadedDocument {
                content_hash: hash_bytes(&bytes),
                chunks: chunk_text(&file.name, &text, size, overlap),
            })
        })
        .await?
    }
}
