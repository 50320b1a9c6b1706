//! Embedding providers and the vector helpers the index stores with.
//!
//! `[embedding].provider` picks the backend:
//!
//! | Value | Type | Endpoint |
//! |-------|------|----------|
//! | `"disabled"` | [`DisabledProvider`] | none, every call fails |
//! | `"openai"` | [`OpenAIProvider`] | `POST /v1/embeddings`, key from `OPENAI_API_KEY` |
//! | `"ollama"` | [`OllamaProvider`] | `POST /api/embed` |
//! | `"local"` | `LocalProvider` | fastembed in-process, `local-embeddings` feature |
//!
//! The HTTP backends (and the chat models in [`crate::llm`]) share
//! [`post_json_with_retry`]. Rate limits (429), server errors (5xx) and
//! connection failures are retried up to `max_retries` times, sleeping
//! 1s, 2s, 4s ... capped at 32s. Any other status fails on the spot.
//!
//! Vectors are stored as little-endian `f32` BLOBs ([`vec_to_blob`],
//! [`blob_to_vec`]) and ranked with [`cosine_similarity`].
//!
//! ```rust,no_run
//! # use post_harness::config::EmbeddingConfig;
//! # use post_harness::embedding::create_provider;
//! let provider = create_provider(&EmbeddingConfig::default()).unwrap();
//! assert_eq!(provider.dims(), 0);
//! ```

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::config::EmbeddingConfig;

const OPENAI_BASE_URL: &str = "https://api.openai.com";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// Turns text into vectors.
///
/// `embed` returns exactly one vector per input, in input order.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn model_name(&self) -> &str;
    /// Vector length this provider produces, `0` when unknown.
    fn dims(&self) -> usize;
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

pub async fn embed_query(provider: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>> {
    provider
        .embed(&[text.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("embedding provider returned no vector for the query"))
}

pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("Embedding provider is disabled; set [embedding].provider in the config")
    }
}

// ============ HTTP transport ============

pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(1 << (attempt - 1).min(5))
}

/// POST `body` as JSON and decode the JSON reply.
///
/// `headers` go on every attempt. `service` names the backend in log lines
/// and error messages.
pub(crate) async fn post_json_with_retry(
    client: &reqwest::Client,
    url: &str,
    headers: &[(&str, String)],
    body: &Value,
    max_retries: u32,
    service: &str,
) -> Result<Value> {
    let mut last_err = anyhow!("{} request to {} was never sent", service, url);

    for attempt in 0..=max_retries {
        if attempt > 0 {
            tokio::time::sleep(backoff(attempt)).await;
        }

        let request = headers
            .iter()
            .fold(client.post(url).json(body), |req, (name, value)| {
                req.header(*name, value.as_str())
            });

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(service, error = %e, attempt, "provider unreachable, retrying");
                last_err = anyhow!("{} connection error ({}): {}", service, url, e);
                continue;
            }
        };

        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let text = response.text().await.unwrap_or_default();
        let err = anyhow!("{} API error {}: {}", service, status, text);
        if status.as_u16() != 429 && !status.is_server_error() {
            return Err(err);
        }
        warn!(service, %status, attempt, "provider busy or failing, retrying");
        last_err = err;
    }

    Err(last_err)
}

/// Reads a JSON array of numbers as an `f32` vector.
fn float_vec(value: &Value, service: &str) -> Result<Vec<f32>> {
    value
        .as_array()
        .ok_or_else(|| anyhow!("Invalid {} response: embedding is not an array", service))?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| anyhow!("Invalid {} response: non-numeric embedding value", service))
        })
        .collect()
}

/// Settings shared by the HTTP embedding backends.
struct Remote {
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl Remote {
    fn from_config(config: &EmbeddingConfig, default_url: &str) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            anyhow!("embedding.model required for provider '{}'", config.provider)
        })?;
        let dims = config
            .dims
            .filter(|d| *d > 0)
            .ok_or_else(|| anyhow!("embedding.dims required for provider '{}'", config.provider))?;
        let url = config
            .url
            .as_deref()
            .unwrap_or(default_url)
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            model,
            dims,
            url,
            max_retries: config.max_retries,
            client: http_client(config.timeout_secs)?,
        })
    }
}

// ============ OpenAI ============

/// OpenAI embeddings, or any gateway speaking the same API via `url`.
pub struct OpenAIProvider {
    remote: Remote,
    api_key: String,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let remote = Remote::from_config(config, OPENAI_BASE_URL)?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self { remote, api_key })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.remote.model
    }
    fn dims(&self) -> usize {
        self.remote.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let r = &self.remote;
        let json = post_json_with_retry(
            &r.client,
            &format!("{}/v1/embeddings", r.url),
            &[("Authorization", format!("Bearer {}", self.api_key))],
            &serde_json::json!({ "model": r.model, "input": texts }),
            r.max_retries,
            "OpenAI",
        )
        .await?;
        parse_openai_response(&json)
    }
}

/// `data[].embedding`, put back in input order by each item's `index`.
fn parse_openai_response(json: &Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = data
        .iter()
        .enumerate()
        .map(|(position, item)| {
            let index = item
                .get("index")
                .and_then(Value::as_u64)
                .map_or(position, |i| i as usize);
            let vector = item
                .get("embedding")
                .ok_or_else(|| anyhow!("Invalid OpenAI response: missing embedding"))
                .and_then(|e| float_vec(e, "OpenAI"))?;
            Ok((index, vector))
        })
        .collect::<Result<Vec<_>>>()?;

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama ============

/// A local or remote Ollama server. The model must already be pulled.
pub struct OllamaProvider {
    remote: Remote,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            remote: Remote::from_config(config, OLLAMA_BASE_URL)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.remote.model
    }
    fn dims(&self) -> usize {
        self.remote.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let r = &self.remote;
        let json = post_json_with_retry(
            &r.client,
            &format!("{}/api/embed", r.url),
            &[],
            &serde_json::json!({ "model": r.model, "input": texts }),
            r.max_retries,
            "Ollama",
        )
        .await?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &Value) -> Result<Vec<Vec<f32>>> {
    json.get("embeddings")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing embeddings array"))?
        .iter()
        .map(|e| float_vec(e, "Ollama"))
        .collect()
}

// ============ Local (fastembed) ============

/// Maps a configured model name to the fastembed model and its vector size.
#[cfg(feature = "local-embeddings")]
fn local_model(name: &str) -> Result<(fastembed::EmbeddingModel, usize)> {
    use fastembed::EmbeddingModel as M;
    Ok(match name {
        "all-minilm-l6-v2" => (M::AllMiniLML6V2, 384),
        "bge-small-en-v1.5" => (M::BGESmallENV15, 384),
        "bge-base-en-v1.5" => (M::BGEBaseENV15, 768),
        "bge-large-en-v1.5" => (M::BGELargeENV15, 1024),
        "nomic-embed-text-v1.5" => (M::NomicEmbedTextV15, 768),
        other => bail!("unsupported local embedding model '{}'", other),
    })
}

/// In-process embeddings. Weights are fetched from Hugging Face on the
/// first `embed` call and kept loaded afterwards.
#[cfg(feature = "local-embeddings")]
pub struct LocalProvider {
    model_name: String,
    model: fastembed::EmbeddingModel,
    dims: usize,
    batch_size: usize,
    loaded: Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings")]
impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
        let (model, native_dims) = local_model(&model_name)?;
        Ok(Self {
            model_name,
            model,
            dims: config.dims.unwrap_or(native_dims),
            batch_size: config.batch_size,
            loaded: Arc::new(std::sync::Mutex::new(None)),
        })
    }
}

#[cfg(feature = "local-embeddings")]
#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = self.model.clone();
        let batch_size = self.batch_size;
        let texts = texts.to_vec();
        let loaded = Arc::clone(&self.loaded);

        tokio::task::spawn_blocking(move || {
            let mut slot = loaded
                .lock()
                .map_err(|_| anyhow!("local embedding model lock poisoned"))?;
            if slot.is_none() {
                let options = fastembed::InitOptions::new(model).with_show_download_progress(false);
                *slot = Some(
                    fastembed::TextEmbedding::try_new(options)
                        .map_err(|e| anyhow!("failed to load local embedding model: {}", e))?,
                );
            }
            match slot.as_mut() {
                Some(embedder) => embedder
                    .embed(texts, Some(batch_size))
                    .map_err(|e| anyhow!("local embedding failed: {}", e)),
                None => bail!("local embedding model not loaded"),
            }
        })
        .await?
    }
}

/// Builds the provider named by `[embedding].provider`.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let provider: Arc<dyn EmbeddingProvider> = match config.provider.as_str() {
        "disabled" => Arc::new(DisabledProvider),
        "openai" => Arc::new(OpenAIProvider::new(config)?),
        "ollama" => Arc::new(OllamaProvider::new(config)?),
        #[cfg(feature = "local-embeddings")]
        "local" => Arc::new(LocalProvider::new(config)?),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => bail!("provider 'local' needs a build with --features local-embeddings"),
        other => bail!("Unknown embedding provider: {}", other),
    };
    Ok(provider)
}

// ============ Vector helpers ============

/// ```rust
/// use post_harness::embedding::{blob_to_vec, vec_to_blob};
///
/// let v = vec![0.5f32, -1.0];
/// assert_eq!(vec_to_blob(&v).len(), 8);
/// assert_eq!(blob_to_vec(&vec_to_blob(&v)), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Trailing bytes that do not fill a whole `f32` are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Cosine of the angle between `a` and `b`.
///
/// `0.0` when the lengths differ, either side is empty, or either side is
/// the zero vector.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (dot, aa, bb) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, aa, bb), (x, y)| {
            (dot + x * y, aa + x * x, bb + y * y)
        });

    let norm = aa.sqrt() * bb.sqrt();
    if norm < f32::EPSILON {
        0.0
    } else {
        dot / norm
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ollama_config(url: &str) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: "ollama".into(),
            model: Some("nomic-embed-text".into()),
            dims: Some(3),
            max_retries: 0,
            url: Some(url.to_string()),
            ..EmbeddingConfig::default()
        }
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        assert_eq!(blob_to_vec(&blob), vec);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn openai_response_is_reordered_by_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        });
        let vecs = parse_openai_response(&json).unwrap();
        assert_eq!(vecs, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn ollama_response_without_embeddings_is_error() {
        let json = serde_json::json!({"model": "x"});
        assert!(parse_ollama_response(&json).is_err());
    }

    #[tokio::test]
    async fn disabled_provider_refuses_to_embed() {
        let provider = create_provider(&EmbeddingConfig::default()).unwrap();
        assert_eq!(provider.model_name(), "disabled");
        assert!(provider.embed(&["x".to_string()]).await.is_err());
    }

    #[tokio::test]
    async fn ollama_provider_posts_to_api_embed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .and(body_partial_json(serde_json::json!({"model": "nomic-embed-text"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embeddings": [[0.1, 0.2, 0.3], [0.4, 0.5, 0.6]]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = OllamaProvider::new(&ollama_config(&server.uri())).unwrap();
        let vecs = provider
            .embed(&["one".to_string(), "two".to_string()])
            .await
            .unwrap();
        assert_eq!(vecs.len(), 2);
        assert_eq!(vecs[1], vec![0.4f32, 0.5, 0.6]);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad model"))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = ollama_config(&server.uri());
        config.max_retries = 3;
        let provider = OllamaProvider::new(&config).unwrap();
        let err = provider.embed(&["x".to_string()]).await.unwrap_err();
        assert!(err.to_string().contains("400"));
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embeddings": [[1.0, 0.0, 0.0]]
            })))
            .mount(&server)
            .await;

        let mut config = ollama_config(&server.uri());
        config.max_retries = 1;
        let provider = OllamaProvider::new(&config).unwrap();
        let vecs = provider.embed(&["x".to_string()]).await.unwrap();
        assert_eq!(vecs, vec![vec![1.0f32, 0.0, 0.0]]);
    }
}
