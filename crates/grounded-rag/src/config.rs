//! Configuration for the grounded RAG pipeline

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::providers::RetryPolicy;

/// Prefix for environment overrides
const ENV_PREFIX: &str = "GROUNDED_RAG_";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Chunking configuration
    pub chunking: ChunkingConfig,
    /// Retrieval configuration
    pub retrieval: RetrievalConfig,
    /// Generation (Ollama) configuration
    pub llm: LlmConfig,
    /// Embedding configuration
    pub embeddings: EmbeddingConfig,
    /// Vector index configuration
    pub vector_index: VectorIndexConfig,
    /// Evaluation configuration
    pub evaluation: EvaluationConfig,
    /// Interaction/evaluation store configuration
    pub storage: StorageConfig,
    /// Ingestion configuration
    pub ingestion: IngestionConfig,
}

impl RagConfig {
    /// Parse a TOML configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Load configuration from an optional file plus `GROUNDED_RAG_*` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(host) = get("HOST") {
            self.server.host = host;
        }
        if let Some(port) = get("PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| Error::Config(format!("Invalid port: {}", port)))?;
        }
        if let Some(url) = get("OLLAMA_URL") {
            self.llm.base_url = url;
        }
        if let Some(model) = get("GENERATE_MODEL") {
            self.llm.generate_model = model;
        }
        if let Some(model) = get("EMBED_MODEL") {
            self.embeddings.model = model;
        }
        if let Some(backend) = get("INDEX_BACKEND") {
            self.vector_index.backend = match backend.to_lowercase().as_str() {
                "memory" => IndexBackend::Memory,
                "chroma" => IndexBackend::Chroma,
                other => return Err(Error::Config(format!("Unknown index backend: {}", other))),
            };
        }
        if let Some(url) = get("CHROMA_URL") {
            self.vector_index.chroma_url = url;
        }
        if let Some(path) = get("DATABASE_PATH") {
            self.storage.database_path = PathBuf::from(path);
        }
        Ok(())
    }

    /// Reject configurations the pipeline cannot honor
    pub fn validate(&self) -> Result<()> {
        let chunking = &self.chunking;
        if chunking.max_tokens == 0 {
            return Err(Error::Config("chunking.max_tokens must be positive".into()));
        }
        if chunking.overlap_tokens * 2 >= chunking.max_tokens {
            return Err(Error::Config(format!(
                "chunking.overlap_tokens ({}) must be less than half of max_tokens ({})",
                chunking.overlap_tokens, chunking.max_tokens
            )));
        }
        if self.embeddings.dimensions == 0 {
            return Err(Error::Config("embeddings.dimensions must be positive".into()));
        }
        if self.embeddings.batch_size == 0 {
            return Err(Error::Config("embeddings.batch_size must be positive".into()));
        }
        let retrieval = &self.retrieval;
        if retrieval.default_top_k == 0 || retrieval.default_top_k > retrieval.max_top_k {
            return Err(Error::Config(format!(
                "retrieval.default_top_k must be in 1..={}",
                retrieval.max_top_k
            )));
        }
        if self.llm.timeout_secs == 0
            || self.embeddings.timeout_secs == 0
            || self.vector_index.timeout_secs == 0
            || self.evaluation.judge_timeout_secs == 0
        {
            return Err(Error::Config("timeouts must be positive".into()));
        }
        if self.evaluation.queue_capacity == 0 {
            return Err(Error::Config("evaluation.queue_capacity must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.evaluation.support_threshold) {
            return Err(Error::Config(
                "evaluation.support_threshold must be within [0, 1]".into(),
            ));
        }
        Ok(())
    }

    fn retry(&self, timeout_secs: u64) -> RetryPolicy {
        RetryPolicy::new(
            self.llm.max_retries,
            Duration::from_millis(self.llm.retry_base_delay_ms),
            Duration::from_millis(self.llm.retry_max_delay_ms),
            Duration::from_secs(timeout_secs),
        )
    }

    /// Retry policy for generation calls
    pub fn generation_retry(&self) -> RetryPolicy {
        self.retry(self.llm.timeout_secs)
    }

    /// Retry policy for embedding calls
    pub fn embedding_retry(&self) -> RetryPolicy {
        self.retry(self.embeddings.timeout_secs)
    }

    /// Retry policy for remote vector index calls
    pub fn index_retry(&self) -> RetryPolicy {
        self.retry(self.vector_index.timeout_secs)
    }

    /// Retry policy for judge calls
    pub fn judge_retry(&self) -> RetryPolicy {
        self.retry(self.evaluation.judge_timeout_secs)
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            enable_cors: true,
        }
    }
}

/// Text chunking configuration (whitespace-delimited tokens)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum tokens per chunk
    pub max_tokens: usize,
    /// Tokens repeated between adjacent chunks
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: 750,
            overlap_tokens: 50,
        }
    }
}

/// Retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Chunks retrieved when the caller does not say
    pub default_top_k: usize,
    /// Upper bound accepted from callers
    pub max_top_k: usize,
    /// Drop matches below this cosine similarity
    pub min_similarity: Option<f32>,
    /// Token budget for context placed in the prompt
    pub max_context_tokens: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_top_k: 5,
            max_top_k: 100,
            min_similarity: None,
            max_context_tokens: 3000,
        }
    }
}

/// Generation (Ollama) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Ollama base URL
    pub base_url: String,
    /// Generation model name
    pub generate_model: String,
    /// Temperature for generation
    pub temperature: f32,
    /// Maximum tokens the model may produce
    pub max_tokens: Option<u32>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Number of retries for transient failures
    pub max_retries: u32,
    /// First backoff delay in milliseconds
    pub retry_base_delay_ms: u64,
    /// Backoff ceiling in milliseconds
    pub retry_max_delay_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            generate_model: "llama3.2:3b".to_string(),
            temperature: 0.3,
            max_tokens: None,
            timeout_secs: 60,
            max_retries: 2,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 8_000,
        }
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Embedding model name
    pub model: String,
    /// Vector dimensions produced by the model
    pub dimensions: usize,
    /// Texts per embedding request
    pub batch_size: usize,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "nomic-embed-text".to_string(),
            dimensions: 768,
            batch_size: 32,
            timeout_secs: 60,
        }
    }
}

/// Vector index backend selection
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    /// In-process index with optional JSON snapshot
    #[default]
    Memory,
    /// Remote Chroma server
    Chroma,
}

/// Vector index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorIndexConfig {
    /// Backend to use
    pub backend: IndexBackend,
    /// Snapshot file for the in-memory backend
    pub snapshot_path: Option<PathBuf>,
    /// Chroma base URL
    pub chroma_url: String,
    /// Chroma collection name
    pub collection: String,
    /// Request timeout in seconds for the remote backend
    pub timeout_secs: u64,
}

impl Default for VectorIndexConfig {
    fn default() -> Self {
        Self {
            backend: IndexBackend::Memory,
            snapshot_path: None,
            chroma_url: "http://localhost:8000".to_string(),
            collection: "documents".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Judge used to decide whether a claim is supported by context
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JudgeKind {
    /// Deterministic content-word overlap
    #[default]
    Lexical,
    /// Generation model asked YES/NO at temperature 0
    Llm,
}

/// Evaluation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Judge implementation
    pub judge: JudgeKind,
    /// Model for the LLM judge (defaults to the generation model)
    pub judge_model: Option<String>,
    /// Judge temperature
    pub judge_temperature: f32,
    /// Judge timeout in seconds
    pub judge_timeout_secs: u64,
    /// Fraction of claim content words that must appear in context
    pub support_threshold: f32,
    /// Deferred evaluation queue capacity
    pub queue_capacity: usize,
    /// Enqueue every answered interaction for deferred evaluation
    pub auto_evaluate: bool,
    /// Trailing window for quality reports
    pub report_window_days: i64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            judge: JudgeKind::Lexical,
            judge_model: None,
            judge_temperature: 0.0,
            judge_timeout_secs: 120,
            support_threshold: 0.8,
            queue_capacity: 256,
            auto_evaluate: false,
            report_window_days: 30,
        }
    }
}

/// Interaction/evaluation store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database path
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let database_path = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("grounded-rag")
            .join("interactions.db");
        Self { database_path }
    }
}

/// Ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// Directory ingested by `POST /api/ingest/directory` when none is given
    pub documents_dir: Option<PathBuf>,
    /// File extensions picked up by the directory loader
    pub extensions: Vec<String>,
    /// Documents ingested concurrently (defaults to CPU count, max 8)
    pub parallel_documents: Option<usize>,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            documents_dir: None,
            extensions: vec!["txt".to_string()],
            parallel_documents: None,
        }
    }
}

impl IngestionConfig {
    /// Effective ingestion concurrency
    pub fn parallelism(&self) -> usize {
        self.parallel_documents
            .unwrap_or_else(|| num_cpus::get().min(8))
            .max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = RagConfig::default();
        config.validate().unwrap();
        assert_eq!(config.chunking.max_tokens, 750);
        assert_eq!(config.chunking.overlap_tokens, 50);
        assert_eq!(config.retrieval.default_top_k, 5);
        assert_eq!(config.embeddings.dimensions, 768);
        assert_eq!(config.evaluation.judge_temperature, 0.0);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: RagConfig = toml::from_str(
            r#"
            [chunking]
            max_tokens = 200

            [vector_index]
            backend = "chroma"
            collection = "credit"
            "#,
        )
        .unwrap();

        assert_eq!(config.chunking.max_tokens, 200);
        assert_eq!(config.chunking.overlap_tokens, 50);
        assert_eq!(config.vector_index.backend, IndexBackend::Chroma);
        assert_eq!(config.vector_index.collection, "credit");
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rag.toml");
        std::fs::write(&path, "[server]\nport = 9100\n").unwrap();

        let config = RagConfig::from_file(&path).unwrap();
        assert_eq!(config.server.port, 9100);
    }

    #[test]
    fn test_validate_rejects_wide_overlap() {
        let mut config = RagConfig::default();
        config.chunking.max_tokens = 100;
        config.chunking.overlap_tokens = 50;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_top_k_above_max() {
        let mut config = RagConfig::default();
        config.retrieval.default_top_k = 500;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("GROUNDED_RAG_PORT", "9000"),
            ("GROUNDED_RAG_INDEX_BACKEND", "chroma"),
            ("GROUNDED_RAG_CHROMA_URL", "http://chroma:8000"),
        ]
        .into_iter()
        .collect();

        let mut config = RagConfig::default();
        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.vector_index.backend, IndexBackend::Chroma);
        assert_eq!(config.vector_index.chroma_url, "http://chroma:8000");
    }

    #[test]
    fn test_bad_port_override() {
        let mut config = RagConfig::default();
        let result = config.apply_overrides(|key| {
            (key == "GROUNDED_RAG_PORT").then(|| "eighty".to_string())
        });
        assert!(result.is_err());
    }
}
