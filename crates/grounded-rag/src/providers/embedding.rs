//! Embedding provider trait

use async_trait::async_trait;

use crate::error::Result;

/// Maps text to fixed-length vectors.
///
/// Implementations:
/// - `OllamaEmbedder`: local Ollama server (nomic-embed-text)
/// - `HashEmbedder`: deterministic bag-of-words vectors for tests and offline use
///
/// Failures are `Error::Provider` carrying a retriable flag.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts, preserving order.
    ///
    /// Default implementation calls `embed` sequentially.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }

    /// Length of every produced vector
    fn dimensions(&self) -> usize;

    /// Check if the provider is reachable
    async fn health_check(&self) -> Result<bool>;

    /// Provider name for logging
    fn name(&self) -> &str;

    /// Model identifier recorded with interactions
    fn model(&self) -> &str;
}
