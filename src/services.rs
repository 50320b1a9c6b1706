//! Process-wide service wiring.
//!
//! Built once at startup and handed to the CLI commands and the HTTP
//! router. Every collaborator is passed in explicitly, so tests can swap
//! the loader, embedder or model without touching global state.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::config::Config;
use crate::embedding::{self, EmbeddingProvider};
use crate::generate::PostGenerator;
use crate::llm::{self, LanguageModel};
use crate::loader::{DocumentLoader, FileLoader};
use crate::sync::Synchronizer;

#[derive(Clone)]
pub struct Services {
    pub config: Arc<Config>,
    pub synchronizer: Arc<Synchronizer>,
    pub generator: Arc<PostGenerator>,
}

impl Services {
    /// Providers from `[embedding]` and `[llm]`, the file loader from `[chunking]`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let loader: Arc<dyn DocumentLoader> = Arc::new(FileLoader::new(&config.chunking));
        let embedder = embedding::create_provider(&config.embedding)
            .context("Failed to initialize embedding provider")?;
        let model = llm::create_model(&config.llm).context("Failed to initialize language model")?;
        Self::with_components(config, loader, embedder, model)
    }

    pub fn with_components(
        config: &Config,
        loader: Arc<dyn DocumentLoader>,
        embedder: Arc<dyn EmbeddingProvider>,
        model: Arc<dyn LanguageModel>,
    ) -> Result<Self> {
        std::fs::create_dir_all(&config.sources.dir).with_context(|| {
            format!(
                "Failed to create source directory: {}",
                config.sources.dir.display()
            )
        })?;

        let synchronizer = Arc::new(Synchronizer::new(config, loader, embedder));
        let generator = Arc::new(PostGenerator::new(
            config,
            Arc::clone(&synchronizer),
            model,
        ));

        Ok(Self {
            config: Arc::new(config.clone()),
            synchronizer,
            generator,
        })
    }
}
