//! Shared fixtures for the integration tests: a deterministic embedder,
//! a loader that records what it loaded, and a temp-dir environment.

#![allow(dead_code)]

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use post_harness::config::Config;
use post_harness::embedding::EmbeddingProvider;
use post_harness::error::LoadError;
use post_harness::fingerprint::{FingerprintStore, Fingerprints};
use post_harness::loader::{DocumentLoader, FileLoader};
use post_harness::models::{LoadedDocument, SourceFile};
use post_harness::sync::Synchronizer;

pub const DIMS: usize = 16;

/// Bag-of-words embedder: each word adds 1.0 to a bucket chosen by its bytes.
pub struct HashEmbedder {
    pub calls: AtomicUsize,
    pub texts: AtomicUsize,
    fail_on: Option<String>,
    delay: Option<Duration>,
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            texts: AtomicUsize::new(0),
            fail_on: None,
            delay: None,
        }
    }

    /// Fails any batch containing `marker`.
    pub fn failing_on(marker: &str) -> Self {
        Self {
            fail_on: Some(marker.to_string()),
            ..Self::new()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new()
        }
    }

    pub fn texts_embedded(&self) -> usize {
        self.texts.load(Ordering::SeqCst)
    }
}

pub fn bag_of_words(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let bucket = word
            .to_lowercase()
            .bytes()
            .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize))
            % DIMS;
        v[bucket] += 1.0;
    }
    v
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_name(&self) -> &str {
        "bag-of-words"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(marker) = &self.fail_on {
            if texts.iter().any(|t| t.contains(marker.as_str())) {
                anyhow::bail!("embedding backend rejected batch");
            }
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| bag_of_words(t)).collect())
    }
}

/// Wraps [`FileLoader`] and records every file name it loads.
pub struct RecordingLoader {
    inner: FileLoader,
    pub loaded: Mutex<Vec<String>>,
}

impl RecordingLoader {
    pub fn new(config: &Config) -> Self {
        Self {
            inner: FileLoader::new(&config.chunking),
            loaded: Mutex::new(Vec::new()),
        }
    }

    /// Drains and returns the names loaded so far.
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.loaded.lock().unwrap())
    }
}

#[async_trait]
impl DocumentLoader for RecordingLoader {
    async fn load(&self, file: &SourceFile) -> Result<LoadedDocument, LoadError> {
        self.loaded.lock().unwrap().push(file.name.clone());
        self.inner.load(file).await
    }
}

pub struct TestEnv {
    pub dir: TempDir,
    pub config: Config,
}

impl TestEnv {
    /// Plain-text sources, small chunks.
    pub fn new() -> Self {
        Self::with_settings("txt", "")
    }

    /// `extra` is appended to the generated TOML (whole sections only).
    pub fn with_settings(extension: &str, extra: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let text = format!(
            r#"
[sources]
dir = "{}"
extension = "{}"

[index]
path = "{}"

[chunking]
chunk_size = 120
chunk_overlap = 20

[sync]
workers = 2

{}
"#,
            dir.path().join("sources").display(),
            extension,
            dir.path().join("vector_db").display(),
            extra
        );
        let config: Config = toml::from_str(&text).unwrap();
        post_harness::config::validate(&config).unwrap();
        std::fs::create_dir_all(&config.sources.dir).unwrap();
        Self { dir, config }
    }

    pub fn source_path(&self, name: &str) -> PathBuf {
        self.config.sources.dir.join(name)
    }

    pub fn write(&self, name: &str, content: &str) {
        std::fs::write(self.source_path(name), content).unwrap();
    }

    pub fn write_bytes(&self, name: &str, bytes: &[u8]) {
        std::fs::write(self.source_path(name), bytes).unwrap();
    }

    pub fn stored(&self) -> Fingerprints {
        FingerprintStore::new(self.config.index.hash_store_path())
            .load()
            .unwrap()
    }

    pub fn hash_store_path(&self) -> PathBuf {
        self.config.index.hash_store_path()
    }

    pub fn synchronizer(
        &self,
        loader: Arc<RecordingLoader>,
        embedder: Arc<HashEmbedder>,
    ) -> Arc<Synchronizer> {
        Arc::new(Synchronizer::new(&self.config, loader, embedder))
    }
}

/// Minimal single-page PDF whose only text is `phrase`.
/// Object offsets in the xref table are computed so pdf-extract can parse it.
pub fn minimal_pdf_with_phrase(phrase: &str) -> Vec<u8> {
    let content = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", phrase);
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(
        format!(
            "4 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
            content.len(),
            content
        )
        .as_bytes(),
    );
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}
