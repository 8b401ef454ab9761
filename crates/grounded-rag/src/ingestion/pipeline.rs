//! Chunk, embed and upsert documents

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::providers::EmbeddingProvider;
use crate::retrieval::VectorIndex;
use crate::storage::RagDatabase;
use crate::types::Document;

use super::chunker::TextChunker;

/// What happened to one document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// Chunks were written; `replaced` chunks of the previous version were superseded
    Indexed { chunks: usize, replaced: usize },
    /// Same content already indexed
    Unchanged,
    /// Nothing to index
    Skipped { reason: String },
}

/// Per-document result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentIngest {
    pub document_id: Uuid,
    pub source_path: String,
    pub title: String,
    pub category: String,
    #[serde(flatten)]
    pub outcome: IngestOutcome,
}

/// A document that failed to ingest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestFailure {
    pub source_path: String,
    pub error: String,
}

/// Result of ingesting a batch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestReport {
    pub documents: Vec<DocumentIngest>,
    pub failures: Vec<IngestFailure>,
    pub chunks_indexed: usize,
    pub duration_ms: u64,
}

impl IngestReport {
    pub fn indexed(&self) -> usize {
        self.count(|o| matches!(o, IngestOutcome::Indexed { .. }))
    }

    pub fn unchanged(&self) -> usize {
        self.count(|o| matches!(o, IngestOutcome::Unchanged))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, IngestOutcome::Skipped { .. }))
    }

    fn count(&self, predicate: impl Fn(&IngestOutcome) -> bool) -> usize {
        self.documents.iter().filter(|d| predicate(&d.outcome)).count()
    }
}

/// Ingestion pipeline: chunker → embedder → index, with the document registry
/// deciding what is already up to date
pub struct IngestPipeline {
    chunker: TextChunker,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    database: Arc<RagDatabase>,
    parallelism: usize,
}

impl IngestPipeline {
    pub fn new(
        chunker: TextChunker,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        database: Arc<RagDatabase>,
        parallelism: usize,
    ) -> Self {
        Self {
            chunker,
            embedder,
            index,
            database,
            parallelism: parallelism.max(1),
        }
    }

    pub fn chunker(&self) -> &TextChunker {
        &self.chunker
    }

    /// Ingest one document
    pub async fn ingest_document(&self, document: &Document) -> Result<IngestOutcome> {
        if document.is_empty() {
            tracing::warn!("Skipping empty document {}", document.source_path);
            return Ok(IngestOutcome::Skipped {
                reason: "document has no content".to_string(),
            });
        }

        let previous = self.database.get_document(document.id)?;
        let registered = previous.as_ref().map(|record| record.content_hash.as_str());
        if registered == Some(document.content_hash.as_str())
            && self.index.contains_document(&document.id).await?
        {
            tracing::debug!("Unchanged: {}", document.source_path);
            return Ok(IngestOutcome::Unchanged);
        }

        let mut chunks = self.chunker.split(document);
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await.map_err(|e| match e {
            Error::InvalidInput(_) => e,
            other => Error::EmbeddingUnavailable(other.to_string()),
        })?;
        if embeddings.len() != chunks.len() {
            return Err(Error::EmbeddingUnavailable(format!(
                "expected {} embeddings, received {}",
                chunks.len(),
                embeddings.len()
            )));
        }
        for (chunk, embedding) in chunks.iter_mut().zip(embeddings) {
            chunk.embedding = Some(embedding);
        }

        // Chunk ids are stable per position: overwrite in place, then drop the tail
        // the new version no longer has. A failed upsert leaves the old version queryable.
        self.index.upsert_batch(&chunks).await?;
        let stale = self
            .index
            .delete_from_position(&document.id, chunks.len() as u32)
            .await?;
        self.database.upsert_document(document, chunks.len())?;
        let replaced = previous.map_or(stale, |record| record.chunk_count.max(stale));

        tracing::info!(
            "Indexed {} ({} chunks, {} replaced)",
            document.source_path,
            chunks.len(),
            replaced
        );
        Ok(IngestOutcome::Indexed {
            chunks: chunks.len(),
            replaced,
        })
    }

    /// Ingest documents concurrently. Failures are collected, never fatal.
    pub async fn ingest(&self, documents: Vec<Document>) -> IngestReport {
        let start = Instant::now();

        // Same source twice in one batch: the last copy wins
        let mut last_by_id: HashMap<Uuid, usize> = HashMap::new();
        for (i, document) in documents.iter().enumerate() {
            last_by_id.insert(document.id, i);
        }

        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let futures = documents.iter().enumerate().map(|(i, document)| {
            let semaphore = semaphore.clone();
            let superseded = last_by_id.get(&document.id) != Some(&i);
            async move {
                if superseded {
                    return (
                        document,
                        Ok(IngestOutcome::Skipped {
                            reason: "superseded by a later copy in the same batch".to_string(),
                        }),
                    );
                }
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(e) => return (document, Err(Error::internal(e.to_string()))),
                };
                (document, self.ingest_document(document).await)
            }
        });

        let mut report = IngestReport::default();
        for (document, result) in join_all(futures).await {
            match result {
                Ok(outcome) => {
                    if let IngestOutcome::Indexed { chunks, .. } = &outcome {
                        report.chunks_indexed += chunks;
                    }
                    report.documents.push(DocumentIngest {
                        document_id: document.id,
                        source_path: document.source_path.clone(),
                        title: document.title.clone(),
                        category: document.category.clone(),
                        outcome,
                    });
                }
                Err(e) => {
                    tracing::error!("Failed to ingest {}: {}", document.source_path, e);
                    report.failures.push(IngestFailure {
                        source_path: document.source_path.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            "Ingestion finished: {} indexed, {} unchanged, {} skipped, {} failed, {} chunks in {}ms",
            report.indexed(),
            report.unchanged(),
            report.skipped(),
            report.failures.len(),
            report.chunks_indexed,
            report.duration_ms
        );
        report
    }

    /// Delete a document and its chunks, returning the number of chunks removed
    pub async fn delete_document(&self, document_id: Uuid) -> Result<usize> {
        let removed = self.index.delete(&document_id).await?;
        let registered = self.database.delete_document(document_id)?;
        if removed == 0 && !registered {
            return Err(Error::not_found(format!("document {}", document_id)));
        }
        tracing::info!("Deleted document {} ({} chunks)", document_id, removed);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::{HashEmbedder, UnavailableProvider};
    use crate::retrieval::InMemoryVectorIndex;

    struct Fixture {
        index: Arc<InMemoryVectorIndex>,
        database: Arc<RagDatabase>,
        pipeline: IngestPipeline,
    }

    fn fixture(embedder: Arc<dyn EmbeddingProvider>) -> Fixture {
        let index = Arc::new(InMemoryVectorIndex::new(embedder.dimensions()));
        let database = Arc::new(RagDatabase::in_memory().unwrap());
        let pipeline = IngestPipeline::new(
            TextChunker::new(12, 2),
            embedder,
            index.clone(),
            database.clone(),
            4,
        );
        Fixture {
            index,
            database,
            pipeline,
        }
    }

    fn long_document(source: &str, words: usize) -> Document {
        let body = (0..words).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ");
        Document::new("t", "Política de Crédito", source, body)
    }

    #[tokio::test]
    async fn test_reingest_unchanged_and_changed() {
        let f = fixture(Arc::new(HashEmbedder::new(32)));
        let doc = long_document("credito.txt", 30);

        let first = f.pipeline.ingest_document(&doc).await.unwrap();
        let IngestOutcome::Indexed { chunks, replaced } = first else {
            panic!("expected indexed, got {:?}", first);
        };
        assert!(chunks > 1);
        assert_eq!(replaced, 0);
        assert_eq!(f.index.stats().await.unwrap().count, chunks);

        assert_eq!(
            f.pipeline.ingest_document(&doc).await.unwrap(),
            IngestOutcome::Unchanged
        );

        let shorter = long_document("credito.txt", 5);
        let outcome = f.pipeline.ingest_document(&shorter).await.unwrap();
        assert_eq!(
            outcome,
            IngestOutcome::Indexed {
                chunks: 1,
                replaced: chunks
            }
        );
        assert_eq!(f.index.stats().await.unwrap().count, 1);
        assert_eq!(f.database.get_document(doc.id).unwrap().unwrap().chunk_count, 1);
    }

    #[tokio::test]
    async fn test_failed_reindex_keeps_previous_version() {
        let f = fixture(Arc::new(HashEmbedder::new(32)));
        let doc = long_document("credito.txt", 30);
        let IngestOutcome::Indexed { chunks, .. } = f.pipeline.ingest_document(&doc).await.unwrap()
        else {
            panic!("expected indexed");
        };

        // Vectors of the wrong size make every upsert fail
        let mismatched = IngestPipeline::new(
            TextChunker::new(12, 2),
            Arc::new(HashEmbedder::new(16)),
            f.index.clone(),
            f.database.clone(),
            4,
        );
        let changed = long_document("credito.txt", 8);
        assert!(mismatched.ingest_document(&changed).await.is_err());

        assert_eq!(f.index.stats().await.unwrap().count, chunks);
        let record = f.database.get_document(doc.id).unwrap().unwrap();
        assert_eq!(record.content_hash, doc.content_hash);
        assert_eq!(record.chunk_count, chunks);
    }

    #[tokio::test]
    async fn test_empty_document_is_skipped() {
        let f = fixture(Arc::new(HashEmbedder::new(32)));
        let doc = Document::new("t", "c", "vazio.txt", "   ");
        let outcome = f.pipeline.ingest_document(&doc).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::Skipped { .. }));
        assert_eq!(f.index.stats().await.unwrap().count, 0);
    }

    #[tokio::test]
    async fn test_batch_collects_failures() {
        let f = fixture(Arc::new(UnavailableProvider::new(false).with_dimensions(32)));
        let report = f
            .pipeline
            .ingest(vec![long_document("a.txt", 5), Document::new("t", "c", "b.txt", "")])
            .await;
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].source_path, "a.txt");
        assert_eq!(report.skipped(), 1);
        assert!(report.failures[0].error.contains("Embedding provider unavailable"));
    }

    #[tokio::test]
    async fn test_batch_concurrent_documents() {
        let f = fixture(Arc::new(HashEmbedder::new(32)));
        let documents: Vec<Document> = (0..10)
            .map(|i| long_document(&format!("doc-{}.txt", i), 20))
            .collect();
        let report = f.pipeline.ingest(documents).await;
        assert_eq!(report.indexed(), 10);
        assert_eq!(report.chunks_indexed, f.index.stats().await.unwrap().count);
        assert_eq!(f.index.document_count(), 10);
    }

    #[tokio::test]
    async fn test_duplicate_source_in_batch() {
        let f = fixture(Arc::new(HashEmbedder::new(32)));
        let report = f
            .pipeline
            .ingest(vec![long_document("a.txt", 30), long_document("a.txt", 4)])
            .await;
        assert_eq!(report.indexed(), 1);
        assert_eq!(report.skipped(), 1);
        assert_eq!(f.index.stats().await.unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_delete_document() {
        let f = fixture(Arc::new(HashEmbedder::new(32)));
        let doc = long_document("a.txt", 30);
        f.pipeline.ingest_document(&doc).await.unwrap();

        let removed = f.pipeline.delete_document(doc.id).await.unwrap();
        assert!(removed > 1);
        assert_eq!(f.index.stats().await.unwrap().count, 0);
        assert!(matches!(
            f.pipeline.delete_document(doc.id).await,
            Err(Error::NotFound(_))
        ));
    }
}
