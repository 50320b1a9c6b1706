//! Persistent vector index over document chunks.
//!
//! One SQLite database per deployment holds exactly one collection: chunk
//! text and metadata in `chunks`, embeddings as little-endian f32 BLOBs in
//! `chunk_vectors`, and a single `collection` row recording the name,
//! embedding model and dimensionality the vectors were produced with.
//!
//! Lifecycle: `Absent --get_or_create--> Empty --insert--> Populated`.
//! Attaching to an existing database never erases it.
//!
//! Writes embed first and touch the database second, inside one
//! transaction per call. A failed embedding therefore leaves the index
//! unchanged, and a reader never sees half of a file's chunks.
//!
//! Retrieval is brute-force cosine similarity in Rust, which is plenty for
//! a few thousand chunks of PDF text.

use chrono::Utc;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::Config;
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::error::IndexError;
use crate::migrate;
use crate::models::{DocumentChunk, RetrievedChunk};

/// Handle to the live collection. Cheap to share behind an `Arc`.
pub struct VectorIndex {
    pool: SqlitePool,
    embedder: Arc<dyn EmbeddingProvider>,
    collection: String,
    batch_size: usize,
}

/// Per-source chunk count, for status reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSummary {
    pub source: String,
    pub chunks: i64,
}

impl VectorIndex {
    /// Attach to the collection under `[index].path`, creating it if absent.
    ///
    /// Fails with [`IndexError::CollectionMismatch`] when the database was
    /// created for another collection name, and with
    /// [`IndexError::DimensionMismatch`] when the configured embedder
    /// produces vectors of a different size than the stored ones.
    pub async fn get_or_create(
        config: &Config,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self, IndexError> {
        let pool = db::connect(&config.index).await?;
        migrate::run_migrations(&pool).await?;

        let name = config.index.collection.clone();
        let existing = sqlx::query("SELECT name, model, dims FROM collection WHERE id = 1")
            .fetch_optional(&pool)
            .await?;

        match existing {
            None => {
                sqlx::query(
                    "INSERT INTO collection (id, name, model, dims, created_at) VALUES (1, ?, ?, ?, ?)",
                )
                .bind(&name)
                .bind(embedder.model_name())
                .bind(embedder.dims() as i64)
                .bind(Utc::now().timestamp())
                .execute(&pool)
                .await?;
                info!(collection = %name, path = %config.index.path.display(), "created vector index");
            }
            Some(row) => {
                let stored_name: String = row.get("name");
                if stored_name != name {
                    return Err(IndexError::CollectionMismatch {
                        existing: stored_name,
                        requested: name,
                    });
                }
                let stored_dims = row.get::<i64, _>("dims") as usize;
                let dims = embedder.dims();
                if dims > 0 && stored_dims > 0 && dims != stored_dims {
                    return Err(IndexError::DimensionMismatch {
                        expected: stored_dims,
                        actual: dims,
                    });
                }
                if stored_dims == 0 && dims > 0 {
                    // Created while embeddings were disabled; adopt the first real model.
                    sqlx::query("UPDATE collection SET model = ?, dims = ? WHERE id = 1")
                        .bind(embedder.model_name())
                        .bind(dims as i64)
                        .execute(&pool)
                        .await?;
                }
                debug!(collection = %name, "attached to existing vector index");
            }
        }

        Ok(Self {
            pool,
            embedder,
            collection: name,
            batch_size: config.embedding.batch_size.max(1),
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Append chunks. Never removes or replaces existing vectors.
    /// Returns the number of chunks inserted.
    pub async fn insert(&self, chunks: &[DocumentChunk]) -> Result<usize, IndexError> {
        if chunks.is_empty() {
            return Ok(0);
        }
        let vectors = self.embed_chunks(chunks).await?;

        let mut tx = self.pool.begin().await?;
        insert_rows(&mut tx, chunks, &vectors).await?;
        tx.commit().await?;
        Ok(chunks.len())
    }

    /// Swap every stored chunk of `source` for `chunks` in one transaction.
    /// Returns `(removed, inserted)`.
    pub async fn replace_source(
        &self,
        source: &str,
        chunks: &[DocumentChunk],
    ) -> Result<(u64, usize), IndexError> {
        let vectors = self.embed_chunks(chunks).await?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM chunk_vectors WHERE chunk_id IN (SELECT id FROM chunks WHERE source = ?)",
        )
        .bind(source)
        .execute(&mut *tx)
        .await?;
        let removed = sqlx::query("DELETE FROM chunks WHERE source = ?")
            .bind(source)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        insert_rows(&mut tx, chunks, &vectors).await?;
        tx.commit().await?;

        Ok((removed, chunks.len()))
    }

    /// The `k` chunks most similar to `query`, best first.
    ///
    /// Equal scores are ordered by source name, then chunk index, so results
    /// are stable across calls.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievedChunk>, IndexError> {
        if k == 0 || self.count().await? == 0 {
            return Ok(Vec::new());
        }

        let query_vec = embedding::embed_query(self.embedder.as_ref(), query)
            .await
            .map_err(IndexError::Embedding)?;

        let rows = sqlx::query(
            r#"
            SELECT c.id, c.source, c.chunk_index, c.text, cv.embedding
            FROM chunk_vectors cv
            JOIN chunks c ON c.id = cv.chunk_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut scored: Vec<RetrievedChunk> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vec = embedding::blob_to_vec(&blob);
                RetrievedChunk {
                    chunk_id: row.get("id"),
                    source: row.get("source"),
                    chunk_index: row.get("chunk_index"),
                    text: row.get("text"),
                    score: embedding::cosine_similarity(&query_vec, &vec) as f64,
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.source.cmp(&b.source))
                .then_with(|| a.chunk_index.cmp(&b.chunk_index))
        });
        scored.truncate(k);
        Ok(scored)
    }

    /// Total number of stored chunks.
    pub async fn count(&self) -> Result<i64, IndexError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    pub async fn sources(&self) -> Result<Vec<SourceSummary>, IndexError> {
        let rows = sqlx::query(
            "SELECT source, COUNT(*) AS chunks FROM chunks GROUP BY source ORDER BY source",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| SourceSummary {
                source: row.get("source"),
                chunks: row.get("chunks"),
            })
            .collect())
    }

    async fn embed_chunks(&self, chunks: &[DocumentChunk]) -> Result<Vec<Vec<f32>>, IndexError> {
        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embedded = self
                .embedder
                .embed(&texts)
                .await
                .map_err(IndexError::Embedding)?;
            if embedded.len() != texts.len() {
                return Err(IndexError::VectorCountMismatch {
                    expected: texts.len(),
                    actual: embedded.len(),
                });
            }
            vectors.extend(embedded);
        }

        let dims = self.embedder.dims();
        if dims > 0 {
            if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
                return Err(IndexError::DimensionMismatch {
                    expected: dims,
                    actual: bad.len(),
                });
            }
        }
        Ok(vectors)
    }
}

async fn insert_rows(
    tx: &mut Transaction<'_, Sqlite>,
    chunks: &[DocumentChunk],
    vectors: &[Vec<f32>],
) -> Result<(), IndexError> {
    let now = Utc::now().timestamp();
    for (chunk, vec) in chunks.iter().zip(vectors) {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO chunks (id, source, chunk_index, text, hash, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&chunk.source)
        .bind(chunk.chunk_index)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .bind(now)
        .execute(&mut **tx)
        .await?;

        sqlx::query("INSERT INTO chunk_vectors (chunk_id, embedding) VALUES (?, ?)")
            .bind(&id)
            .bind(embedding::vec_to_blob(vec))
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}
