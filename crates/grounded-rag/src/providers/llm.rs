//! Generation provider trait

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Sampling limits passed with every completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConstraints {
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stop: Vec<String>,
}

impl GenerationConstraints {
    pub fn new(temperature: f32) -> Self {
        Self {
            temperature,
            max_tokens: None,
            stop: Vec::new(),
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

impl Default for GenerationConstraints {
    fn default() -> Self {
        Self::new(0.3)
    }
}

/// Completes prompts with a language model.
///
/// Implementations:
/// - `OllamaGenerator`: local Ollama server
/// - `ScriptedGenerator`: canned replies for tests
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Complete `prompt` under `constraints`
    async fn complete(&self, prompt: &str, constraints: &GenerationConstraints) -> Result<String>;

    /// Check if the provider is reachable
    async fn health_check(&self) -> Result<bool>;

    /// Provider name for logging
    fn name(&self) -> &str;

    /// Model in use
    fn model(&self) -> &str;
}
