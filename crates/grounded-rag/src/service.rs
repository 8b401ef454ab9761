//! Orchestration of ingestion, question answering and evaluation
//!
//! `RagService` owns one instance of every pipeline stage and is shared by the HTTP
//! handlers behind an `Arc`. Every operation is an independent unit of work; the only
//! shared state is the index, the provider clients and the database.

use chrono::{Duration as ChronoDuration, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::RagConfig;
use crate::error::{Error, Result};
use crate::evaluation::{
    EvaluationEngine, EvaluationJob, EvaluationQueue, EvaluationWorker, Judge, QualityReport,
};
use crate::generation::Generator;
use crate::ingestion::{DocumentLoader, IngestFailure, IngestPipeline, IngestReport, TextChunker};
use crate::providers::{EmbeddingProvider, GenerationProvider};
use crate::retrieval::{IndexStats, Retriever, VectorIndex};
use crate::storage::{FeedbackStore, RagDatabase, StoreStats};
use crate::types::{
    Answer, AnswerOutcome, AskRequest, AskResponse, BatchEvaluationRequest,
    DatasetEvaluationRequest, Document, EvaluationFailure, EvaluationRecord, EvaluationStatus,
    FeedbackRequest, Interaction, Query, SearchHit, SearchRequest, SearchResponse,
    SourceDocument, UserFeedback,
};

/// Unevaluated interactions picked by a batch run without explicit ids
const DEFAULT_BATCH_LIMIT: usize = 50;

/// Index size plus store row counts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexOverview {
    pub backend: String,
    pub index: IndexStats,
    pub store: StoreStats,
}

/// Reachability of each dependency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub embedding: bool,
    pub generation: bool,
    pub vector_index: bool,
    pub database: bool,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.embedding && self.generation && self.vector_index && self.database
    }
}

/// Result of a batch or dataset evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEvaluationReport {
    pub records: Vec<EvaluationRecord>,
    pub failures: Vec<EvaluationFailure>,
    pub summary: QualityReport,
}

/// The grounded question-answering pipeline with its evaluation loop
pub struct RagService {
    config: RagConfig,
    retriever: Retriever,
    generator: Generator,
    pipeline: IngestPipeline,
    evaluator: Arc<EvaluationEngine>,
    database: Arc<RagDatabase>,
    queue: Option<EvaluationQueue>,
}

impl RagService {
    pub fn new(
        config: RagConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn GenerationProvider>,
        index: Arc<dyn VectorIndex>,
        database: Arc<RagDatabase>,
        judge: Arc<dyn Judge>,
    ) -> Self {
        let retriever = Retriever::new(embedder.clone(), index.clone())
            .with_min_similarity(config.retrieval.min_similarity);
        let generator = Generator::from_config(llm, &config);
        let pipeline = IngestPipeline::new(
            TextChunker::from_config(&config.chunking),
            embedder.clone(),
            index,
            database.clone(),
            config.ingestion.parallelism(),
        );
        let evaluator = Arc::new(EvaluationEngine::new(judge, embedder));

        Self {
            config,
            retriever,
            generator,
            pipeline,
            evaluator,
            database,
            queue: None,
        }
    }

    /// Attach a queue whose worker is run elsewhere
    pub fn with_evaluation_queue(mut self, queue: EvaluationQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Create the deferred evaluation queue and spawn its worker.
    ///
    /// The worker stops once the service (the last queue sender) is dropped.
    pub fn with_evaluation_worker(self) -> (Self, JoinHandle<()>) {
        let (queue, receiver) = EvaluationQueue::new(self.config.evaluation.queue_capacity);
        let worker = EvaluationWorker::new(
            self.evaluator.clone(),
            self.database.clone(),
            queue.statuses(),
            Duration::from_secs(self.config.evaluation.judge_timeout_secs),
        );
        let handle = tokio::spawn(worker.run(receiver));
        (self.with_evaluation_queue(queue), handle)
    }

    /// Close the deferred evaluation queue so its worker can drain and exit.
    ///
    /// Returns the number of jobs that were still waiting.
    pub fn close_evaluation_queue(&self) -> usize {
        self.queue.as_ref().map_or(0, EvaluationQueue::close)
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn database(&self) -> &Arc<RagDatabase> {
        &self.database
    }

    pub fn evaluator(&self) -> &Arc<EvaluationEngine> {
        &self.evaluator
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        self.retriever.index()
    }

    // ---- question answering ----

    /// Answer a question from the indexed documents and store the interaction.
    ///
    /// An empty retrieval is reported through `AnswerOutcome::InsufficientContext`,
    /// not as an error. `EmptyIndex` is still an error.
    pub async fn ask(&self, request: AskRequest) -> Result<AskResponse> {
        self.answer_question(request, self.config.evaluation.auto_evaluate)
            .await
            .map(|(response, _)| response)
    }

    async fn answer_question(
        &self,
        request: AskRequest,
        auto_evaluate: bool,
    ) -> Result<(AskResponse, Interaction)> {
        let start = Instant::now();
        let query = self.query(
            request.question,
            request.max_documents,
            request.category,
        )?;

        tracing::info!("Question: \"{}\" (top_k {})", query.question, query.top_k);

        let retrieval = self.retriever.retrieve(&query).await?;
        let answer = match self.generator.answer(&query.question, &retrieval).await {
            Ok(answer) => answer,
            Err(Error::InsufficientContext) => {
                tracing::info!("No context retrieved for \"{}\"", query.question);
                Answer::insufficient_context()
            }
            Err(e) => return Err(e),
        };

        let response_time_ms = start.elapsed().as_millis() as u64;
        let interaction = Interaction::from_answer(
            query.question,
            &answer,
            query.category_filter,
            self.retriever.embedder().model(),
            response_time_ms,
        );
        self.database.save_interaction(&interaction)?;

        if auto_evaluate && answer.outcome == AnswerOutcome::Answered {
            if let Some(queue) = &self.queue {
                // A full queue only costs the evaluation, never the answer
                let _ = queue.enqueue(EvaluationJob {
                    interaction_id: interaction.id,
                    ground_truth: None,
                });
            }
        }

        tracing::info!(
            "Answered in {}ms ({}, {} sources)",
            response_time_ms,
            answer.outcome.as_str(),
            answer.source_documents().len()
        );
        Ok((
            AskResponse::new(&answer, retrieval.len(), response_time_ms),
            interaction,
        ))
    }

    /// Rank chunks for a query without generating an answer
    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
        let start = Instant::now();
        let query = self.query(request.query, request.top_k, request.category)?;
        let retrieval = self.retriever.retrieve(&query).await?;

        let hits = retrieval
            .iter()
            .enumerate()
            .map(|(i, scored)| SearchHit {
                rank: i + 1,
                source: SourceDocument::from_scored(scored),
            })
            .collect();

        Ok(SearchResponse {
            query: query.question,
            hits,
            search_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn query(
        &self,
        question: String,
        top_k: Option<usize>,
        category: Option<String>,
    ) -> Result<Query> {
        let mut query = Query::new(question, top_k.unwrap_or(self.config.retrieval.default_top_k));
        if let Some(category) = category {
            query = query.with_category(category);
        }
        query.validate(self.config.retrieval.max_top_k)?;
        Ok(query)
    }

    // ---- ingestion and index administration ----

    pub async fn ingest_documents(&self, documents: Vec<Document>) -> IngestReport {
        self.pipeline.ingest(documents).await
    }

    /// Load and ingest every matching file under `dir`, or the configured documents directory
    pub async fn ingest_directory(&self, dir: Option<&Path>) -> Result<IngestReport> {
        let dir: PathBuf = match dir {
            Some(dir) => dir.to_path_buf(),
            None => self.config.ingestion.documents_dir.clone().ok_or_else(|| {
                Error::invalid_input("no directory given and ingestion.documents_dir is not set")
            })?,
        };

        let loader = DocumentLoader::from_config(&self.config.ingestion);
        let load = tokio::task::spawn_blocking(move || loader.load_dir(&dir))
            .await
            .map_err(|e| Error::internal(format!("document loading task failed: {}", e)))??;

        let mut report = self.pipeline.ingest(load.documents).await;
        report
            .failures
            .extend(load.failures.into_iter().map(|f| IngestFailure {
                source_path: f.source_path,
                error: f.error,
            }));
        Ok(report)
    }

    /// Remove a document and all of its chunks
    pub async fn delete_document(&self, document_id: Uuid) -> Result<usize> {
        self.pipeline.delete_document(document_id).await
    }

    pub async fn index_stats(&self) -> Result<IndexOverview> {
        Ok(IndexOverview {
            backend: self.index().name().to_string(),
            index: self.index().stats().await?,
            store: self.database.stats()?,
        })
    }

    pub async fn health(&self) -> HealthReport {
        let (embedding, generation, vector_index) = tokio::join!(
            self.retriever.embedder().health_check(),
            self.generator.provider().health_check(),
            self.index().health_check(),
        );
        let mut report = HealthReport {
            status: String::new(),
            embedding: embedding.unwrap_or(false),
            generation: generation.unwrap_or(false),
            vector_index: vector_index.unwrap_or(false),
            database: self.database.stats().is_ok(),
        };
        report.status = if report.is_healthy() { "healthy" } else { "degraded" }.to_string();
        report
    }

    // ---- interactions and feedback ----

    pub fn get_interaction(&self, interaction_id: Uuid) -> Result<Interaction> {
        self.database.get_interaction(interaction_id)
    }

    pub fn submit_feedback(
        &self,
        interaction_id: Uuid,
        request: FeedbackRequest,
    ) -> Result<UserFeedback> {
        let feedback =
            self.database
                .append_user_feedback(interaction_id, request.rating, request.comment)?;
        tracing::info!("Feedback {} for {}", feedback.rating, interaction_id);
        Ok(feedback)
    }

    // ---- evaluation ----

    /// Evaluate a stored interaction now. An already evaluated interaction returns its record.
    pub async fn evaluate_interaction(
        &self,
        interaction_id: Uuid,
        ground_truth: Option<&str>,
    ) -> Result<EvaluationRecord> {
        self.evaluator
            .evaluate_stored(&self.database, interaction_id, ground_truth)
            .await
    }

    /// Queue an interaction for background evaluation
    pub fn enqueue_evaluation(
        &self,
        interaction_id: Uuid,
        ground_truth: Option<String>,
    ) -> Result<EvaluationStatus> {
        self.database.get_interaction(interaction_id)?;
        if self.database.find_evaluation(interaction_id)?.is_some() {
            return Ok(EvaluationStatus::Completed);
        }
        let queue = self
            .queue
            .as_ref()
            .ok_or_else(|| Error::internal("deferred evaluation is not running"))?;
        queue.enqueue(EvaluationJob {
            interaction_id,
            ground_truth,
        })?;
        Ok(EvaluationStatus::Queued)
    }

    /// Stored records win over queue state
    pub fn evaluation_status(&self, interaction_id: Uuid) -> Result<EvaluationStatus> {
        if self.database.find_evaluation(interaction_id)?.is_some() {
            return Ok(EvaluationStatus::Completed);
        }
        self.queue
            .as_ref()
            .and_then(|q| q.status(interaction_id))
            .ok_or_else(|| Error::not_found(format!("no evaluation for interaction {}", interaction_id)))
    }

    pub fn get_evaluation(&self, interaction_id: Uuid) -> Result<EvaluationRecord> {
        self.database.get(interaction_id)
    }

    /// Evaluate explicit interactions, or the most recent unevaluated ones
    pub async fn evaluate_batch(
        &self,
        request: BatchEvaluationRequest,
    ) -> Result<BatchEvaluationReport> {
        let ids: Vec<Uuid> = match request.interaction_ids {
            Some(ids) => ids,
            None => self
                .database
                .unevaluated_interactions(request.limit.unwrap_or(DEFAULT_BATCH_LIMIT))?
                .into_iter()
                .map(|i| i.id)
                .collect(),
        };
        tracing::info!("Batch evaluation of {} interactions", ids.len());

        let semaphore = Arc::new(Semaphore::new(self.config.ingestion.parallelism()));
        let ground_truths = &request.ground_truths;
        let futures = ids.iter().map(|&id| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|e| Error::internal(e.to_string()))?;
                let ground_truth = ground_truths.get(&id).map(String::as_str);
                self.evaluate_interaction(id, ground_truth).await
            }
        });

        let mut records = Vec::new();
        let mut failures = Vec::new();
        for (id, result) in ids.iter().zip(join_all(futures).await) {
            match result {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!("Evaluation of {} failed: {}", id, e);
                    failures.push(EvaluationFailure {
                        interaction_id: Some(*id),
                        question: None,
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(self.batch_report(records, failures))
    }

    /// Answer each sample question, then evaluate the answer against its ground truth
    pub async fn evaluate_dataset(
        &self,
        request: DatasetEvaluationRequest,
    ) -> Result<BatchEvaluationReport> {
        if request.samples.is_empty() {
            return Err(Error::invalid_input("dataset has no samples"));
        }
        tracing::info!("Dataset evaluation of {} samples", request.samples.len());

        let mut records = Vec::new();
        let mut failures = Vec::new();
        for sample in request.samples {
            let ask = AskRequest {
                question: sample.question.clone(),
                max_documents: request.top_k,
                category: sample.category,
            };
            // Never auto-queue here: the queued run would store a record without the ground truth
            let result = match self.answer_question(ask, false).await {
                Ok((_, interaction)) => {
                    self.evaluate_interaction(interaction.id, sample.ground_truth.as_deref())
                        .await
                        .map_err(|e| (Some(interaction.id), e))
                }
                Err(e) => Err((None, e)),
            };
            match result {
                Ok(record) => records.push(record),
                Err((interaction_id, e)) => {
                    tracing::warn!("Dataset sample \"{}\" failed: {}", sample.question, e);
                    failures.push(EvaluationFailure {
                        interaction_id,
                        question: Some(sample.question),
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(self.batch_report(records, failures))
    }

    fn batch_report(
        &self,
        records: Vec<EvaluationRecord>,
        failures: Vec<EvaluationFailure>,
    ) -> BatchEvaluationReport {
        let summary = QualityReport::build(0, &records, &[], &[]);
        BatchEvaluationReport {
            records,
            failures,
            summary,
        }
    }

    /// Quality over the trailing `window_days` (configured default when `None`),
    /// with trends against the window before it
    pub fn quality_report(&self, window_days: Option<i64>) -> Result<QualityReport> {
        let days = window_days.unwrap_or(self.config.evaluation.report_window_days);
        if days <= 0 {
            return Err(Error::invalid_input("window must be at least one day"));
        }

        // Upper bound is exclusive; include records written this instant
        let until = Utc::now() + ChronoDuration::seconds(1);
        let out_of_range = || Error::invalid_input(format!("window of {} days is out of range", days));
        let window = ChronoDuration::try_days(days).ok_or_else(out_of_range)?;
        let since = until.checked_sub_signed(window).ok_or_else(out_of_range)?;
        let previous_since = since.checked_sub_signed(window).ok_or_else(out_of_range)?;

        let current = self.database.evaluations_between(since, until)?;
        let previous = self.database.evaluations_between(previous_since, since)?;
        let feedback = self.database.feedback_between(since, until)?;

        Ok(QualityReport::build(days, &current, &previous, &feedback))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::LexicalJudge;
    use crate::providers::mock::{HashEmbedder, ScriptedGenerator, UnavailableProvider};
    use crate::retrieval::InMemoryVectorIndex;

    const CREDIT: &str = "Título: Política de Crédito\nCategoria: Política de Crédito\n\n\
        O limite de crédito é revisado anualmente pelo comitê de risco.\n\n\
        Clientes com atraso superior a noventa dias têm o limite suspenso.";

    fn service(llm: Arc<dyn GenerationProvider>) -> RagService {
        let mut config = RagConfig::default();
        config.embeddings.dimensions = 64;
        let embedder = Arc::new(HashEmbedder::new(64));
        RagService::new(
            config,
            embedder,
            llm,
            Arc::new(InMemoryVectorIndex::new(64)),
            Arc::new(RagDatabase::in_memory().unwrap()),
            Arc::new(LexicalJudge::new(0.8)),
        )
    }

    async fn with_credit_policy(service: &RagService) {
        let doc = crate::ingestion::parse_document("credito.txt", CREDIT);
        let report = service.ingest_documents(vec![doc]).await;
        assert_eq!(report.indexed(), 1);
    }

    fn ask(question: &str) -> AskRequest {
        AskRequest {
            question: question.into(),
            max_documents: None,
            category: None,
        }
    }

    #[tokio::test]
    async fn test_ask_on_empty_index() {
        let service = service(Arc::new(ScriptedGenerator::fixed("nunca")));
        let err = service.ask(ask("limite de crédito?")).await.unwrap_err();
        assert!(matches!(err, Error::EmptyIndex));
    }

    #[tokio::test]
    async fn test_ask_stores_interaction() {
        let llm = Arc::new(ScriptedGenerator::fixed(
            "O limite de crédito é revisado anualmente pelo comitê de risco [1].",
        ));
        let service = service(llm.clone());
        with_credit_policy(&service).await;

        let response = service.ask(ask("Quando o limite de crédito é revisado?")).await.unwrap();
        assert_eq!(response.outcome, AnswerOutcome::Answered);
        assert!(response.grounded);
        assert_eq!(response.source_documents[0].title, "Política de Crédito");

        let stored = service.get_interaction(response.interaction_id).unwrap();
        assert_eq!(stored.contexts.len(), 1);
        assert_eq!(stored.generation_model.as_deref(), Some("scripted"));
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_category_without_matches_is_insufficient_context() {
        let llm = Arc::new(ScriptedGenerator::fixed("unused"));
        let service = service(llm.clone());
        with_credit_policy(&service).await;

        let mut request = ask("limite de crédito?");
        request.category = Some("Atendimento".into());
        let response = service.ask(request).await.unwrap();

        assert_eq!(response.outcome, AnswerOutcome::InsufficientContext);
        assert!(response.source_documents.is_empty());
        assert_eq!(llm.calls(), 0);
        let stored = service.get_interaction(response.interaction_id).unwrap();
        assert_eq!(stored.outcome, AnswerOutcome::InsufficientContext);
    }

    #[tokio::test]
    async fn test_generation_failure_surfaces() {
        let service = service(Arc::new(UnavailableProvider::new(false)));
        with_credit_policy(&service).await;
        let err = service.ask(ask("limite?")).await.unwrap_err();
        assert!(matches!(err, Error::GenerationUnavailable(_)));
        assert_eq!(service.database().stats().unwrap().interactions, 0);
    }

    #[tokio::test]
    async fn test_invalid_top_k() {
        let service = service(Arc::new(ScriptedGenerator::fixed("x")));
        let mut request = ask("limite?");
        request.max_documents = Some(0);
        assert!(matches!(service.ask(request).await, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_search_ranks_hits() {
        let service = service(Arc::new(ScriptedGenerator::fixed("x")));
        with_credit_policy(&service).await;
        let response = service
            .search(SearchRequest {
                query: "atraso noventa dias".into(),
                top_k: Some(3),
                category: None,
            })
            .await
            .unwrap();
        assert!(!response.hits.is_empty());
        assert_eq!(response.hits[0].rank, 1);
    }

    #[tokio::test]
    async fn test_deferred_evaluation_without_worker() {
        let service = service(Arc::new(ScriptedGenerator::fixed("O limite é revisado [1].")));
        with_credit_policy(&service).await;
        let response = service.ask(ask("limite?")).await.unwrap();

        assert!(service.enqueue_evaluation(response.interaction_id, None).is_err());
        assert!(matches!(
            service.evaluation_status(response.interaction_id),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            service.enqueue_evaluation(Uuid::new_v4(), None),
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_evaluate_and_report() {
        let service = service(Arc::new(ScriptedGenerator::fixed(
            "O limite de crédito é revisado anualmente pelo comitê de risco [1].",
        )));
        with_credit_policy(&service).await;
        let response = service.ask(ask("Quando o limite é revisado?")).await.unwrap();
        service
            .submit_feedback(
                response.interaction_id,
                FeedbackRequest {
                    rating: 4,
                    comment: None,
                },
            )
            .unwrap();

        let record = service
            .evaluate_interaction(response.interaction_id, None)
            .await
            .unwrap();
        assert_eq!(record.faithfulness.value(), Some(1.0));
        assert_eq!(
            service.evaluation_status(response.interaction_id).unwrap(),
            EvaluationStatus::Completed
        );

        let report = service.quality_report(None).unwrap();
        assert_eq!(report.evaluated_interactions, 1);
        assert_eq!(report.feedback.count, 1);
        assert!(service.quality_report(Some(0)).is_err());
    }

    #[test]
    fn test_report_window_out_of_range() {
        let service = service(Arc::new(ScriptedGenerator::fixed("unused")));
        for days in [i64::MAX, 1_000_000_000] {
            let err = service.quality_report(Some(days)).unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)), "{} days", days);
        }
        assert!(service.quality_report(Some(365)).is_ok());
    }

    #[tokio::test]
    async fn test_batch_picks_unevaluated() {
        let service = service(Arc::new(ScriptedGenerator::fixed(
            "O limite de crédito é revisado anualmente [1].",
        )));
        with_credit_policy(&service).await;
        for _ in 0..3 {
            service.ask(ask("limite de crédito?")).await.unwrap();
        }

        let report = service
            .evaluate_batch(BatchEvaluationRequest::default())
            .await
            .unwrap();
        assert_eq!(report.records.len(), 3);
        assert!(report.failures.is_empty());
        assert_eq!(report.summary.evaluated_interactions, 3);

        let again = service
            .evaluate_batch(BatchEvaluationRequest::default())
            .await
            .unwrap();
        assert!(again.records.is_empty());
    }
}
