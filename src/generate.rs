//! Post generation on top of the synchronized index.
//!
//! [`PostGenerator::generate`] reconciles once, then fans out one
//! retrieval + answer task per requested post. The reconcile call is the
//! barrier: no task starts before the index reflects every changed file,
//! and every task queries the same settled index.
//!
//! Tasks share nothing but the index handle and the model. Results are
//! returned in submission order. The first failure fails the request and
//! aborts the tasks still running.

use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::GenerationError;
use crate::index::VectorIndex;
use crate::llm::LanguageModel;
use crate::models::Post;
use crate::sync::Synchronizer;

pub const DEFAULT_PROMPT: &str = "Create a LinkedIn post summarizing insights from the context. \
Keep focus on create databricks tips of implementing and best practices. \
Keep it under 300 words. Keep it simple for people read and direct. \
Add emojis to make it engaging. Do not use ** . \
Do not mention any of the sources or books. \
Do not include any links or references. \
Do not include any information from the context that is not relevant to the post.";

pub struct PostGenerator {
    synchronizer: Arc<Synchronizer>,
    model: Arc<dyn LanguageModel>,
    k: usize,
    default_prompt: String,
    default_posts: usize,
    max_posts: usize,
}

impl PostGenerator {
    pub fn new(
        config: &Config,
        synchronizer: Arc<Synchronizer>,
        model: Arc<dyn LanguageModel>,
    ) -> Self {
        Self {
            synchronizer,
            model,
            k: config.retrieval.k,
            default_prompt: config
                .generation
                .default_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_PROMPT.to_string()),
            default_posts: config.generation.default_posts,
            max_posts: config.generation.max_posts,
        }
    }

    pub fn default_posts(&self) -> usize {
        self.default_posts
    }

    /// Generate `count` posts for `prompt` (the configured default prompt
    /// when `None` or blank).
    pub async fn generate(
        &self,
        count: usize,
        prompt: Option<&str>,
    ) -> Result<Vec<Post>, GenerationError> {
        if count == 0 || count > self.max_posts {
            return Err(GenerationError::InvalidCount {
                requested: count,
                max: self.max_posts,
            });
        }

        let prompt: Arc<str> = match prompt.map(str::trim) {
            Some(p) if !p.is_empty() => Arc::from(p),
            _ => Arc::from(self.default_prompt.as_str()),
        };

        let reconciled = self.synchronizer.reconcile().await?;
        debug!(
            processed = reconciled.report.documents_processed(),
            "index synchronized before generation"
        );

        let mut set = JoinSet::new();
        for post in 0..count {
            let index = Arc::clone(&reconciled.index);
            let model = Arc::clone(&self.model);
            let prompt = Arc::clone(&prompt);
            let k = self.k;
            set.spawn(async move {
                let result = generate_one(post, &index, model.as_ref(), &prompt, k).await;
                (post, result)
            });
        }

        let posts = join_in_order(set, count).await?;
        info!(posts = posts.len(), "generated posts");
        Ok(posts)
    }
}

/// Drain `set` into a vector indexed by each task's submission slot,
/// whatever order the tasks finish in.
async fn join_in_order<T: 'static>(
    mut set: JoinSet<(usize, Result<T, GenerationError>)>,
    count: usize,
) -> Result<Vec<T>, GenerationError> {
    let mut slots: Vec<Option<T>> = (0..count).map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        let (slot, result) = joined?;
        // Dropping the set on return aborts the remaining tasks.
        slots[slot] = Some(result?);
    }
    Ok(slots.into_iter().flatten().collect())
}

async fn generate_one(
    post: usize,
    index: &VectorIndex,
    model: &dyn LanguageModel,
    prompt: &str,
    k: usize,
) -> Result<Post, GenerationError> {
    let hits = index
        .retrieve(prompt, k)
        .await
        .map_err(|source| GenerationError::Retrieval { post, source })?;

    let context = hits
        .iter()
        .map(|h| h.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    let content = model
        .answer(&context, prompt)
        .await
        .map_err(|source| GenerationError::Model { post, source })?;

    Ok(Post { content })
}
