//! Error taxonomy for the synchronization engine and the generation service.
//!
//! Each layer owns one enum. Lower layers are wrapped with `#[source]` so
//! the full chain survives into logs and HTTP error messages, while callers
//! can still match on the variant that tells them what went wrong.

use std::path::PathBuf;
use thiserror::Error;

use crate::extract::ExtractError;

/// Errors raised while loading or saving the fingerprint file.
#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("failed to read fingerprint store {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write fingerprint store {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by a [`DocumentLoader`](crate::loader::DocumentLoader).
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error("loader worker failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Errors raised by the vector index.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index storage error: {0}")]
    Storage(#[from] sqlx::Error),
    #[error("failed to prepare index directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("embedding failed: {0:#}")]
    Embedding(anyhow::Error),
    #[error("embedding provider returned {actual} vectors for {expected} texts")]
    VectorCountMismatch { expected: usize, actual: usize },
    #[error("embedding dimension mismatch: collection uses {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("index at this path belongs to collection '{existing}', not '{requested}'")]
    CollectionMismatch { existing: String, requested: String },
}

/// Errors that abort a reconciliation pass.
///
/// None of these leave a fingerprint recorded for work that did not land:
/// fingerprints are only saved after every update in the pass succeeded.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("source directory {path} is not readable: {source}")]
    SourceDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read source file {path}: {source}")]
    SourceRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to load {file_name}: {source}")]
    Load {
        file_name: String,
        #[source]
        source: LoadError,
    },
    #[error("failed to index {file_name}: {source}")]
    Embedding {
        file_name: String,
        #[source]
        source: IndexError,
    },
    #[error("failed to open vector index: {0}")]
    Index(#[source] IndexError),
    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),
    #[error("background worker failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("synchronizer worker pool is closed")]
    WorkersClosed,
}

/// Errors returned by [`PostGenerator::generate`](crate::generate::PostGenerator::generate).
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("num_posts must be between 1 and {max}, got {requested}")]
    InvalidCount { requested: usize, max: usize },
    #[error("index synchronization failed: {0}")]
    Sync(#[from] SyncError),
    #[error("retrieval failed for post {post}: {source}")]
    Retrieval {
        post: usize,
        #[source]
        source: IndexError,
    },
    #[error("language model failed for post {post}: {source:#}")]
    Model {
        post: usize,
        #[source]
        source: anyhow::Error,
    },
    #[error("generation worker failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
