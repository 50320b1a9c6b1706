//! Core data types that flow between the loader, the index, and the
//! generation service.

use serde::Serialize;
use std::path::PathBuf;

/// A document file found in the source directory during a reconciliation pass.
///
/// Never persisted; its bytes are read fresh from disk every pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// File name, unique within the source directory. This is the fingerprint key.
    pub name: String,
    pub path: PathBuf,
}

/// A unit of embeddable text cut from a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentChunk {
    /// Name of the source file this chunk came from.
    pub source: String,
    pub chunk_index: i64,
    pub text: String,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}

/// What a loader produced from one read of a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedDocument {
    /// SHA-256 of the exact bytes the chunks were cut from, hex encoded.
    pub content_hash: String,
    pub chunks: Vec<DocumentChunk>,
}

/// A chunk returned by nearest-neighbour retrieval.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub source: String,
    pub chunk_index: i64,
    pub text: String,
    /// Cosine similarity to the query, in `[-1.0, 1.0]`.
    pub score: f64,
}

/// One generated post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Post {
    pub content: String,
}
