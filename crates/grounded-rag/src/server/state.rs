//! Application state for the RAG server

use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::config::{IndexBackend, JudgeKind, RagConfig};
use crate::error::Result;
use crate::evaluation::judge;
use crate::providers::{EmbeddingProvider, GenerationProvider, OllamaEmbedder, OllamaGenerator};
use crate::retrieval::{ChromaIndex, InMemoryVectorIndex, VectorIndex};
use crate::service::RagService;
use crate::storage::RagDatabase;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    service: RagService,
    /// In-memory index and where to persist it at shutdown
    snapshot: Option<(Arc<InMemoryVectorIndex>, PathBuf)>,
    /// Deferred evaluation worker
    worker: Mutex<Option<JoinHandle<()>>>,
    ready: RwLock<bool>,
}

impl AppState {
    /// Build providers, index and database from configuration and start the
    /// evaluation worker
    pub async fn new(config: RagConfig) -> Result<Self> {
        tracing::info!(
            "Initializing RAG application state (index backend: {:?}, judge: {:?})...",
            config.vector_index.backend,
            config.evaluation.judge
        );

        let database = Arc::new(RagDatabase::new(&config.storage.database_path)?);
        tracing::info!("Database opened at {}", config.storage.database_path.display());

        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(OllamaEmbedder::from_config(&config)?);
        let llm: Arc<dyn GenerationProvider> = Arc::new(OllamaGenerator::from_config(&config)?);
        tracing::info!(
            "Ollama providers initialized at {} (embedding: {}, generation: {})",
            config.llm.base_url,
            config.embeddings.model,
            config.llm.generate_model
        );

        let judge_provider: Option<Arc<dyn GenerationProvider>> = match config.evaluation.judge {
            JudgeKind::Llm => Some(Arc::new(OllamaGenerator::judge_from_config(&config)?)),
            JudgeKind::Lexical => None,
        };
        let judge = judge::from_config(&config.evaluation, judge_provider);

        let dimensions = config.embeddings.dimensions;
        let (index, snapshot): (Arc<dyn VectorIndex>, _) = match config.vector_index.backend {
            IndexBackend::Memory => match &config.vector_index.snapshot_path {
                Some(path) => {
                    let index = Arc::new(InMemoryVectorIndex::load_snapshot(path, dimensions)?);
                    tracing::info!(
                        "Loaded {} documents from snapshot {}",
                        index.document_count(),
                        path.display()
                    );
                    (index.clone() as Arc<dyn VectorIndex>, Some((index, path.clone())))
                }
                None => (Arc::new(InMemoryVectorIndex::new(dimensions)) as Arc<dyn VectorIndex>, None),
            },
            IndexBackend::Chroma => {
                tracing::info!(
                    "Using Chroma collection '{}' at {}",
                    config.vector_index.collection,
                    config.vector_index.chroma_url
                );
                (Arc::new(ChromaIndex::from_config(&config)?) as Arc<dyn VectorIndex>, None)
            }
        };

        let (service, worker) =
            RagService::new(config, embedder, llm, index, database, judge).with_evaluation_worker();

        Ok(Self {
            inner: Arc::new(AppStateInner {
                service,
                snapshot,
                worker: Mutex::new(Some(worker)),
                ready: RwLock::new(true),
            }),
        })
    }

    /// Wrap an already assembled service
    pub fn from_service(service: RagService) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                service,
                snapshot: None,
                worker: Mutex::new(None),
                ready: RwLock::new(true),
            }),
        }
    }

    pub fn service(&self) -> &RagService {
        &self.inner.service
    }

    pub fn config(&self) -> &RagConfig {
        self.inner.service.config()
    }

    /// Check if the server is ready
    pub fn is_ready(&self) -> bool {
        *self.inner.ready.read()
    }

    pub fn set_ready(&self, ready: bool) {
        *self.inner.ready.write() = ready;
    }

    /// Attach the task draining the service's evaluation queue
    pub fn with_worker(self, worker: JoinHandle<()>) -> Self {
        *self.inner.worker.lock() = Some(worker);
        self
    }

    /// Stop accepting work, let the evaluation worker drain for at most `drain_timeout`,
    /// then persist the index snapshot
    pub async fn shutdown(&self, drain_timeout: Duration) -> Result<()> {
        self.set_ready(false);

        let pending = self.inner.service.close_evaluation_queue();
        let worker = self.inner.worker.lock().take();
        if let Some(mut worker) = worker {
            tracing::info!("Draining evaluation queue ({} pending)", pending);
            match tokio::time::timeout(drain_timeout, &mut worker).await {
                Ok(Ok(())) => tracing::info!("Evaluation worker stopped"),
                Ok(Err(e)) => tracing::error!("Evaluation worker failed: {}", e),
                Err(_) => {
                    worker.abort();
                    tracing::warn!(
                        "Evaluation worker did not drain within {:?}, unfinished jobs dropped",
                        drain_timeout
                    );
                }
            }
        }

        if let Some((index, path)) = &self.inner.snapshot {
            index.save_snapshot(path)?;
            tracing::info!("Index snapshot written to {}", path.display());
        }
        Ok(())
    }
}
