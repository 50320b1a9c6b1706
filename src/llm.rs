//! Language model providers.
//!
//! The [`LanguageModel`] trait is the generation capability used by
//! [`PostGenerator`](crate::generate::PostGenerator): given retrieved
//! context and a query, return text. Implementations:
//!
//! | Config Value | Provider | Endpoint |
//! |-------------|----------|----------|
//! | `"disabled"` | [`DisabledModel`] | none, always errors |
//! | `"openai"` | [`OpenAIChatModel`] | `POST /v1/chat/completions` |
//! | `"ollama"` | [`OllamaModel`] | `POST /api/generate` |
//! | `"gemini"` | [`GeminiModel`] | `POST /v1beta/models/{model}:generateContent` |
//!
//! All of them build the same "stuff" prompt (every retrieved chunk pasted
//! into one prompt) and share the transport retry of
//! [`crate::embedding`].

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::LlmConfig;
use crate::embedding::{http_client, post_json_with_retry};

const OPENAI_BASE_URL: &str = "https://api.openai.com";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;
    /// Answers `query` using only `context`.
    async fn answer(&self, context: &str, query: &str) -> Result<String>;
}

/// Builds the single-shot prompt that stuffs all retrieved context in front
/// of the question.
pub fn stuff_prompt(context: &str, question: &str) -> String {
    format!(
        "Use the following pieces of context to answer the question at the end. \
         If you don't know the answer, just say that you don't know, \
         don't try to make up an answer.\n\n{}\n\nQuestion: {}\nHelpful Answer:",
        context, question
    )
}

pub struct DisabledModel;

#[async_trait]
impl LanguageModel for DisabledModel {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn answer(&self, _context: &str, _query: &str) -> Result<String> {
        bail!("Language model is disabled; set [llm].provider in the config")
    }
}

// ============ OpenAI ============

pub struct OpenAIChatModel {
    model: String,
    temperature: f32,
    url: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIChatModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self {
            model: required_model(config)?,
            temperature: config.temperature,
            url: base_url(config, OPENAI_BASE_URL),
            api_key,
            max_retries: config.max_retries,
            client: http_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAIChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn answer(&self, context: &str, query: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                {"role": "user", "content": stuff_prompt(context, query)}
            ],
        });
        let json = post_json_with_retry(
            &self.client,
            &format!("{}/v1/chat/completions", self.url),
            &[("Authorization", format!("Bearer {}", self.api_key))],
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await?;
        parse_openai_chat(&json)
    }
}

fn parse_openai_chat(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
}

// ============ Ollama ============

pub struct OllamaModel {
    model: String,
    temperature: f32,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            model: required_model(config)?,
            temperature: config.temperature,
            url: base_url(config, OLLAMA_BASE_URL),
            max_retries: config.max_retries,
            client: http_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl LanguageModel for OllamaModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn answer(&self, context: &str, query: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": stuff_prompt(context, query),
            "stream": false,
            "options": {"temperature": self.temperature},
        });
        let json = post_json_with_retry(
            &self.client,
            &format!("{}/api/generate", self.url),
            &[],
            &body,
            self.max_retries,
            "Ollama",
        )
        .await?;
        parse_ollama_generate(&json)
    }
}

fn parse_ollama_generate(json: &serde_json::Value) -> Result<String> {
    json.get("response")
        .and_then(|r| r.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing response field"))
}

// ============ Gemini ============

/// Google Gemini via the Generative Language API. Requires `GOOGLE_API_KEY`.
pub struct GeminiModel {
    model: String,
    temperature: f32,
    url: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl GeminiModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var("GOOGLE_API_KEY")
            .map_err(|_| anyhow!("GOOGLE_API_KEY environment variable not set"))?;
        Ok(Self {
            model: required_model(config)?,
            temperature: config.temperature,
            url: base_url(config, GEMINI_BASE_URL),
            api_key,
            max_retries: config.max_retries,
            client: http_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl LanguageModel for GeminiModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn answer(&self, context: &str, query: &str) -> Result<String> {
        let body = serde_json::json!({
            "contents": [
                {"role": "user", "parts": [{"text": stuff_prompt(context, query)}]}
            ],
            "generationConfig": {"temperature": self.temperature},
        });
        let json = post_json_with_retry(
            &self.client,
            &format!("{}/v1beta/models/{}:generateContent", self.url, self.model),
            &[("x-goog-api-key", self.api_key.clone())],
            &body,
            self.max_retries,
            "Gemini",
        )
        .await?;
        parse_gemini(&json)
    }
}

fn parse_gemini(json: &serde_json::Value) -> Result<String> {
    let parts = json
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
        .ok_or_else(|| {
            let reason = json
                .pointer("/promptFeedback/blockReason")
                .and_then(|r| r.as_str())
                .unwrap_or("no candidates returned");
            anyhow!("Invalid Gemini response: {}", reason)
        })?;

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();
    Ok(text.trim().to_string())
}

fn required_model(config: &LlmConfig) -> Result<String> {
    config.model.clone().ok_or_else(|| {
        anyhow!(
            "llm.model required for provider '{}'",
            config.provider
        )
    })
}

fn base_url(config: &LlmConfig, default: &str) -> String {
    config
        .url
        .as_deref()
        .unwrap_or(default)
        .trim_end_matches('/')
        .to_string()
}

/// Instantiate the [`LanguageModel`] named by `llm.provider`.
pub fn create_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledModel)),
        "openai" => Ok(Arc::new(OpenAIChatModel::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaModel::new(config)?)),
        "gemini" => Ok(Arc::new(GeminiModel::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}
