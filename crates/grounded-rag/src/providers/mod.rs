//! Provider abstractions for embeddings and generation
//!
//! The pipeline only sees the traits; Ollama backs them in production and the
//! mock module backs them in tests.

pub mod embedding;
pub mod llm;
pub mod mock;
pub mod ollama;
pub mod retry;

pub use embedding::EmbeddingProvider;
pub use llm::{GenerationConstraints, GenerationProvider};
pub use ollama::{OllamaClient, OllamaEmbedder, OllamaGenerator};
pub use retry::RetryPolicy;
