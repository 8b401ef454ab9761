//! Deterministic providers for tests and offline runs

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Error, Result};

use super::embedding::EmbeddingProvider;
use super::llm::{GenerationConstraints, GenerationProvider};

/// Feature-hashed bag-of-words embeddings.
///
/// Texts sharing words get similar vectors, identical texts identical ones.
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for word in normalized_words(text) {
            let hash = fnv1a(word.as_bytes());
            let slot = (hash % self.dimensions as u64) as usize;
            let sign = if (hash >> 32) & 1 == 0 { 1.0 } else { -1.0 };
            vector[slot] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

fn normalized_words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325u64, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vector(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn name(&self) -> &str {
        "hash"
    }

    fn model(&self) -> &str {
        "hash-bow"
    }
}

type Script = Box<dyn Fn(&str) -> String + Send + Sync>;

/// Generator whose replies come from a closure; every prompt is recorded
pub struct ScriptedGenerator {
    script: Script,
    prompts: Mutex<Vec<String>>,
    constraints: Mutex<Vec<GenerationConstraints>>,
}

impl ScriptedGenerator {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            prompts: Mutex::new(Vec::new()),
            constraints: Mutex::new(Vec::new()),
        }
    }

    /// Always reply with `reply`
    pub fn fixed(reply: impl Into<String>) -> Self {
        let reply = reply.into();
        Self::new(move |_| reply.clone())
    }

    /// Prompts received so far
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    /// Constraints received so far
    pub fn constraints(&self) -> Vec<GenerationConstraints> {
        self.constraints.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().len()
    }
}

#[async_trait]
impl GenerationProvider for ScriptedGenerator {
    async fn complete(&self, prompt: &str, constraints: &GenerationConstraints) -> Result<String> {
        self.prompts.lock().push(prompt.to_string());
        self.constraints.lock().push(constraints.clone());
        Ok((self.script)(prompt))
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

/// A provider that is always down
pub struct UnavailableProvider {
    retriable: bool,
    dimensions: usize,
    calls: AtomicUsize,
}

impl UnavailableProvider {
    pub fn new(retriable: bool) -> Self {
        Self {
            retriable,
            dimensions: 8,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = dimensions;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fail<T>(&self) -> Result<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(Error::Provider {
            provider: "unavailable".to_string(),
            message: "connection refused".to_string(),
            retriable: self.retriable,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for UnavailableProvider {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        self.fail()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(false)
    }

    fn name(&self) -> &str {
        "unavailable"
    }

    fn model(&self) -> &str {
        "none"
    }
}

#[async_trait]
impl GenerationProvider for UnavailableProvider {
    async fn complete(&self, _prompt: &str, _constraints: &GenerationConstraints) -> Result<String> {
        self.fail()
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(false)
    }

    fn name(&self) -> &str {
        "unavailable"
    }

    fn model(&self) -> &str {
        "none"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::cosine_similarity;

    #[tokio::test]
    async fn test_hash_embedder_is_deterministic_and_normalized() {
        let embedder = HashEmbedder::new(64);
        let a = embedder.embed("Política de Crédito").await.unwrap();
        let b = embedder.embed("política de crédito").await.unwrap();
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_shared_words_are_closer() {
        let embedder = HashEmbedder::new(256);
        let q = embedder.embed("limite de crédito").await.unwrap();
        let near = embedder.embed("o limite de crédito é revisado").await.unwrap();
        let far = embedder.embed("horário de atendimento da agência").await.unwrap();
        assert!(cosine_similarity(&q, &near) > cosine_similarity(&q, &far));
    }

    #[tokio::test]
    async fn test_empty_text_is_zero_vector() {
        let embedder = HashEmbedder::new(16);
        let v = embedder.embed("  ").await.unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn test_scripted_records_prompts() {
        let generator = ScriptedGenerator::fixed("ok");
        let reply = generator
            .complete("prompt", &GenerationConstraints::new(0.0))
            .await
            .unwrap();
        assert_eq!(reply, "ok");
        assert_eq!(generator.prompts(), vec!["prompt".to_string()]);
        assert_eq!(generator.constraints()[0].temperature, 0.0);
    }

    #[tokio::test]
    async fn test_unavailable_counts_calls() {
        let provider = UnavailableProvider::new(true);
        let err = EmbeddingProvider::embed(&provider, "x").await.unwrap_err();
        assert!(err.is_retriable());
        assert_eq!(provider.calls(), 1);
    }
}
