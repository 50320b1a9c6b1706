//! Incremental synchronization of the source directory into the vector index.
//!
//! A reconciliation pass:
//!
//! 1. lists the source files with the configured extension,
//! 2. loads the stored fingerprints,
//! 3. hashes every file on the bounded worker pool,
//! 4. keeps the files whose name is new or whose hash changed,
//! 5. loads and indexes those files one at a time,
//! 6. merges their new hashes into the full stored mapping and saves it.
//!
//! The hash recorded for an updated file is the one the loader computed
//! over the bytes it chunked, so the store never claims content that the
//! index does not hold.
//!
//! Step 6 only runs when every update landed. If anything fails the pass
//! returns the error and `hash_store.txt` is left exactly as it was, so the
//! failed files (and any that did succeed in that pass) are picked up again
//! next time. Rows already written for them are either replaced on the next
//! pass or, with `replace_stale_chunks = false`, left as duplicates.
//!
//! Passes are serialized by a mutex and run on their own task, so a caller
//! that gives up waiting does not cancel a pass halfway.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, OnceCell, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::error::SyncError;
use crate::fingerprint::{hash_file, FingerprintStore, Fingerprints};
use crate::index::VectorIndex;
use crate::loader::DocumentLoader;
use crate::models::SourceFile;

/// What a pass did. `processed` lists file names in processing order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub scanned: usize,
    pub unchanged: usize,
    pub processed: Vec<String>,
    pub chunks_inserted: usize,
    pub chunks_removed: u64,
}

impl ReconcileReport {
    pub fn documents_processed(&self) -> usize {
        self.processed.len()
    }
}

/// Result of [`Synchronizer::reconcile`]: the up-to-date index and a report.
pub struct Reconciled {
    pub index: Arc<VectorIndex>,
    pub report: ReconcileReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub collection: String,
    pub total_chunks: i64,
    pub files_processed: Fingerprints,
}

/// A source file paired with the hash of its current bytes.
#[derive(Debug, Clone)]
pub struct HashedFile {
    pub file: SourceFile,
    pub hash: String,
}

/// Split of the scanned files into those to (re)index and those to skip.
#[derive(Debug)]
pub struct UpdatePlan<'a> {
    pub pending: Vec<&'a HashedFile>,
    pub unchanged: Vec<&'a HashedFile>,
}

/// A file is pending when its name is absent from `stored` or stored with a
/// different hash. Both lists keep input order.
pub fn plan_updates<'a>(hashed: &'a [HashedFile], stored: &Fingerprints) -> UpdatePlan<'a> {
    let (unchanged, pending): (Vec<_>, Vec<_>) = hashed
        .iter()
        .partition(|h| stored.get(&h.file.name) == Some(&h.hash));
    UpdatePlan { pending, unchanged }
}

pub struct Synchronizer {
    config: Config,
    fingerprints: FingerprintStore,
    loader: Arc<dyn DocumentLoader>,
    embedder: Arc<dyn EmbeddingProvider>,
    index: OnceCell<Arc<VectorIndex>>,
    workers: Arc<Semaphore>,
    write_lock: Mutex<()>,
}

impl Synchronizer {
    pub fn new(
        config: &Config,
        loader: Arc<dyn DocumentLoader>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            config: config.clone(),
            fingerprints: FingerprintStore::new(config.index.hash_store_path()),
            loader,
            embedder,
            index: OnceCell::new(),
            workers: Arc::new(Semaphore::new(config.sync.workers)),
            write_lock: Mutex::new(()),
        }
    }

    pub fn sources_dir(&self) -> &std::path::Path {
        &self.config.sources.dir
    }

    pub fn extension(&self) -> &str {
        &self.config.sources.extension
    }

    /// The shared index handle, attached on first use.
    pub async fn index(&self) -> Result<Arc<VectorIndex>, SyncError> {
        self.index
            .get_or_try_init(|| async {
                VectorIndex::get_or_create(&self.config, Arc::clone(&self.embedder))
                    .await
                    .map(Arc::new)
            })
            .await
            .cloned()
            .map_err(SyncError::Index)
    }

    /// Bring the index up to date with the source directory.
    ///
    /// Runs to completion even if the returned future is dropped.
    pub async fn reconcile(self: &Arc<Self>) -> Result<Reconciled, SyncError> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_pass().await }).await?
    }

    pub async fn status(&self) -> Result<IndexStatus, SyncError> {
        let index = self.index().await?;
        let total_chunks = index.count().await.map_err(SyncError::Index)?;
        let store = self.fingerprints.clone();
        let files_processed = tokio::task::spawn_blocking(move || store.load()).await??;
        Ok(IndexStatus {
            collection: index.collection().to_string(),
            total_chunks,
            files_processed,
        })
    }

    async fn run_pass(&self) -> Result<Reconciled, SyncError> {
        let _guard = self.write_lock.lock().await;
        let started = Instant::now();

        let dir = self.config.sources.dir.clone();
        let extension = self.config.sources.extension.clone();
        let store = self.fingerprints.clone();
        let (files, stored) = tokio::task::spawn_blocking(move || {
            let files = list_source_files(&dir, &extension)?;
            let stored = store.load()?;
            Ok::<_, SyncError>((files, stored))
        })
        .await??;

        let hashed = self.hash_files(files).await?;
        let plan = plan_updates(&hashed, &stored);
        for h in &plan.unchanged {
            debug!(file = %h.file.name, "unchanged");
        }

        let mut report = ReconcileReport {
            scanned: hashed.len(),
            unchanged: plan.unchanged.len(),
            ..ReconcileReport::default()
        };

        let index = self.index().await?;
        let mut updated = Fingerprints::new();

        for item in plan.pending {
            let name = item.file.name.clone();
            let loaded = {
                let _permit = Arc::clone(&self.workers)
                    .acquire_owned()
                    .await
                    .map_err(|_| SyncError::WorkersClosed)?;
                self.loader
                    .load(&item.file)
                    .await
                    .map_err(|source| SyncError::Load {
                        file_name: name.clone(),
                        source,
                    })?
            };

            if loaded.content_hash != item.hash {
                info!(
                    file = %name,
                    scanned = %item.hash,
                    loaded = %loaded.content_hash,
                    "file changed during the pass, recording the loaded content"
                );
            }

            let (removed, inserted) = if self.config.index.replace_stale_chunks {
                index.replace_source(&name, &loaded.chunks).await
            } else {
                index.insert(&loaded.chunks).await.map(|n| (0, n))
            }
            .map_err(|source| SyncError::Embedding {
                file_name: name.clone(),
                source,
            })?;

            info!(file = %name, chunks = inserted, replaced = removed, "indexed");
            report.chunks_inserted += inserted;
            report.chunks_removed += removed;
            report.processed.push(name.clone());
            // The digest of what was indexed, which may differ from the scan.
            updated.insert(name, loaded.content_hash);
        }

        // Merge into the full mapping so unchanged and deleted files keep their entries.
        let mut merged = stored;
        merged.extend(updated);
        let store = self.fingerprints.clone();
        tokio::task::spawn_blocking(move || store.save(&merged)).await??;

        info!(
            scanned = report.scanned,
            unchanged = report.unchanged,
            processed = report.documents_processed(),
            chunks_inserted = report.chunks_inserted,
            chunks_removed = report.chunks_removed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "reconciliation complete"
        );

        Ok(Reconciled { index, report })
    }

    /// Hash every file on the worker pool. Fails on the first unreadable file.
    async fn hash_files(&self, files: Vec<SourceFile>) -> Result<Vec<HashedFile>, SyncError> {
        let mut set = JoinSet::new();
        let total = files.len();

        for (i, file) in files.into_iter().enumerate() {
            let permit = Arc::clone(&self.workers)
                .acquire_owned()
                .await
                .map_err(|_| SyncError::WorkersClosed)?;
            set.spawn_blocking(move || {
                let _permit = permit;
                let result = hash_file(&file.path);
                (i, file, result)
            });
        }

        let mut slots: Vec<Option<HashedFile>> = vec![None; total];
        while let Some(joined) = set.join_next().await {
            let (i, file, result) = joined?;
            let hash = result.map_err(|source| SyncError::SourceRead {
                path: file.path.clone(),
                source,
            })?;
            slots[i] = Some(HashedFile { file, hash });
        }

        Ok(slots.into_iter().flatten().collect())
    }
}

/// Regular files directly inside `dir` whose extension matches, sorted by
/// name. Names that cannot be written to the fingerprint file are skipped.
fn list_source_files(dir: &std::path::Path, extension: &str) -> Result<Vec<SourceFile>, SyncError> {
    let dir_err = |source| SyncError::SourceDir {
        path: dir.to_path_buf(),
        source,
    };

    let meta = std::fs::metadata(dir).map_err(dir_err)?;
    if !meta.is_dir() {
        return Err(dir_err(std::io::Error::other("not a directory")));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| {
            let msg = e.to_string();
            dir_err(
                e.into_io_error()
                    .unwrap_or_else(|| std::io::Error::other(msg)),
            )
        })?;
        let path: PathBuf = entry.path().to_path_buf();
        if !path.is_file() {
            continue;
        }
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case(extension))
            .unwrap_or(false);
        if !matches {
            continue;
        }

        let Some(name) = entry.file_name().to_str() else {
            warn!(path = %path.display(), "skipping file with non UTF-8 name");
            continue;
        };
        if name.contains(['\n', '\r']) || name.trim() != name {
            warn!(file = %name.escape_debug(), "skipping file whose name cannot be fingerprinted");
            continue;
        }

        files.push(SourceFile {
            name: name.to_string(),
            path,
        });
    }

    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}
