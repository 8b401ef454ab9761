//! Question to ranked chunks

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::providers::EmbeddingProvider;
use crate::types::{Query, RetrievalResult};

use super::index::VectorIndex;

/// Embeds the question and queries the index
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    min_similarity: Option<f32>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, index: Arc<dyn VectorIndex>) -> Self {
        Self {
            embedder,
            index,
            min_similarity: None,
        }
    }

    /// Drop chunks scoring below `threshold`
    pub fn with_min_similarity(mut self, threshold: Option<f32>) -> Self {
        self.min_similarity = threshold;
        self
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    /// Retrieve up to `query.top_k` chunks ranked by similarity.
    ///
    /// Fails with `EmptyIndex` before calling the embedder when nothing is indexed,
    /// and with `EmbeddingUnavailable` when the question cannot be embedded.
    pub async fn retrieve(&self, query: &Query) -> Result<RetrievalResult> {
        let stats = self.index.stats().await?;
        if stats.count == 0 {
            return Err(Error::EmptyIndex);
        }

        let vector = self
            .embedder
            .embed(&query.question)
            .await
            .map_err(|e| match e {
                Error::InvalidInput(_) => e,
                other => Error::EmbeddingUnavailable(other.to_string()),
            })?;

        let mut result = self
            .index
            .query(&vector, query.top_k, query.category_filter.as_deref())
            .await?;

        if let Some(threshold) = self.min_similarity {
            result.chunks.retain(|c| c.similarity >= threshold);
        }

        tracing::debug!(
            top_k = query.top_k,
            retrieved = result.len(),
            best = ?result.best_similarity(),
            "Retrieved chunks"
        );
        Ok(result)
    }
}
