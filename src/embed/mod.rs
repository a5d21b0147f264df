//! Embedding generation
//!
//! This module provides an abstraction over embedding models with:
//! - A trait for different embedding backends
//! - An OpenAI-compatible HTTP backend
//! - Batch processing that degrades to per-chunk requests on failure

mod http_backend;

pub use http_backend::*;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Trait for embedding providers
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, returning one vector per text in order
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    /// Embedding dimension, once known
    fn dimension(&self) -> Option<usize> {
        None
    }

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Create an embedder from configuration.
///
/// Returns `None` when the API key environment variable is not set; the
/// caller decides how to report that.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Option<Arc<dyn Embedder>>> {
    let Some(api_key) = config.api_key() else {
        debug!(
            "No embedding API key in ${}, embeddings disabled",
            config.api_key_env
        );
        return Ok(None);
    };

    let embedder = HttpEmbedder::new(config, api_key)?;
    Ok(Some(Arc::new(embedder)))
}

/// Result of embedding a list of texts where individual texts may fail
#[derive(Debug, Default)]
pub struct EmbedOutcome {
    /// One slot per input text; `None` where embedding failed
    pub vectors: Vec<Option<Vec<f32>>>,

    /// Index of each failed text with the error message
    pub failures: Vec<(usize, String)>,
}

/// Embed texts in batches; a failed batch is retried one text at a time so
/// a single bad chunk only loses its own vector.
pub async fn embed_with_fallback(
    embedder: &dyn Embedder,
    texts: &[String],
    batch_size: usize,
) -> EmbedOutcome {
    let mut outcome = EmbedOutcome {
        vectors: Vec::with_capacity(texts.len()),
        failures: Vec::new(),
    };

    for (batch_index, batch) in texts.chunks(batch_size.max(1)).enumerate() {
        let offset = batch_index * batch_size.max(1);

        let result = embedder.embed(batch.to_vec()).await.and_then(|vectors| {
            if vectors.len() == batch.len() {
                Ok(vectors)
            } else {
                Err(Error::Embedding(format!(
                    "expected {} embeddings, got {}",
                    batch.len(),
                    vectors.len()
                )))
            }
        });

        match result {
            Ok(vectors) => outcome.vectors.extend(vectors.into_iter().map(Some)),
            Err(e) if batch.len() == 1 => {
                outcome.vectors.push(None);
                outcome.failures.push((offset, e.to_string()));
            }
            Err(e) => {
                warn!("Embedding batch of {} failed, retrying individually: {}", batch.len(), e);
                for (i, text) in batch.iter().enumerate() {
                    match embedder.embed(vec![text.clone()]).await {
                        Ok(mut vectors) if vectors.len() == 1 => outcome.vectors.push(vectors.pop()),
                        Ok(vectors) => {
                            outcome.vectors.push(None);
                            outcome.failures.push((
                                offset + i,
                                format!("expected 1 embedding, got {}", vectors.len()),
                            ));
                        }
                        Err(e) => {
                            outcome.vectors.push(None);
                            outcome.failures.push((offset + i, e.to_string()));
                        }
                    }
                }
            }
        }
    }

    outcome
}
