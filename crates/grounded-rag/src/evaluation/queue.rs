//! Deferred evaluation of stored interactions
//!
//! The answer path only ever calls [`EvaluationQueue::enqueue`], which never waits.
//! An [`EvaluationWorker`] drains the channel in the background.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::storage::RagDatabase;
use crate::types::EvaluationStatus;

use super::engine::EvaluationEngine;

/// One interaction to evaluate
#[derive(Debug, Clone)]
pub struct EvaluationJob {
    pub interaction_id: Uuid,
    pub ground_truth: Option<String>,
}

/// Per-interaction evaluation status, shared by the queue and its worker
pub type StatusBoard = Arc<DashMap<Uuid, EvaluationStatus>>;

/// Sending half of the evaluation channel plus per-interaction status.
///
/// Clones share one sender, so [`EvaluationQueue::close`] closes the channel for all of them.
#[derive(Clone)]
pub struct EvaluationQueue {
    sender: Arc<RwLock<Option<mpsc::Sender<EvaluationJob>>>>,
    statuses: StatusBoard,
}

impl EvaluationQueue {
    /// Create a queue holding at most `capacity` pending jobs
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<EvaluationJob>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                sender: Arc::new(RwLock::new(Some(sender))),
                statuses: Arc::new(DashMap::new()),
            },
            receiver,
        )
    }

    /// Queue a job without waiting. A full or closed queue drops the job and returns an error.
    pub fn enqueue(&self, job: EvaluationJob) -> Result<()> {
        let interaction_id = job.interaction_id;
        let guard = self.sender.read();
        let Some(sender) = guard.as_ref() else {
            tracing::warn!("Evaluation queue closed, dropping {}", interaction_id);
            return Err(Error::internal("evaluation queue is closed"));
        };

        // Marked before sending so the worker's own updates are never overwritten
        let previous = self.statuses.insert(interaction_id, EvaluationStatus::Queued);
        match sender.try_send(job) {
            Ok(()) => {
                tracing::debug!("Queued evaluation for {}", interaction_id);
                Ok(())
            }
            Err(e) => {
                if let Some(status) = previous {
                    self.statuses.insert(interaction_id, status);
                } else {
                    self.statuses.remove(&interaction_id);
                }
                match e {
                    mpsc::error::TrySendError::Full(_) => {
                        tracing::warn!("Evaluation queue full, dropping {}", interaction_id);
                        Err(Error::internal("evaluation queue is full"))
                    }
                    mpsc::error::TrySendError::Closed(_) => {
                        tracing::warn!("Evaluation queue closed, dropping {}", interaction_id);
                        Err(Error::internal("evaluation queue is closed"))
                    }
                }
            }
        }
    }

    pub fn status(&self, interaction_id: Uuid) -> Option<EvaluationStatus> {
        self.statuses.get(&interaction_id).map(|s| s.value().clone())
    }

    /// Status board to hand to the worker. Holding it does not keep the channel open.
    pub fn statuses(&self) -> StatusBoard {
        self.statuses.clone()
    }

    /// Jobs waiting in the channel; zero once closed
    pub fn pending(&self) -> usize {
        self.sender
            .read()
            .as_ref()
            .map_or(0, |sender| sender.max_capacity() - sender.capacity())
    }

    /// Stop accepting jobs. The worker finishes what is already queued and exits.
    ///
    /// Returns the number of jobs still waiting at the time of closing.
    pub fn close(&self) -> usize {
        let pending = self.pending();
        self.sender.write().take();
        pending
    }
}

/// Background consumer of the evaluation queue
pub struct EvaluationWorker {
    engine: Arc<EvaluationEngine>,
    database: Arc<RagDatabase>,
    statuses: StatusBoard,
    job_timeout: Duration,
}

impl EvaluationWorker {
    pub fn new(
        engine: Arc<EvaluationEngine>,
        database: Arc<RagDatabase>,
        statuses: StatusBoard,
        job_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            database,
            statuses,
            job_timeout,
        }
    }

    /// Process jobs until every sender is dropped
    pub async fn run(self, mut receiver: mpsc::Receiver<EvaluationJob>) {
        tracing::info!(
            "Evaluation worker started ({}s per job, judge {})",
            self.job_timeout.as_secs(),
            self.engine.judge_name()
        );

        while let Some(job) = receiver.recv().await {
            self.process(job).await;
        }

        tracing::info!("Evaluation worker stopped");
    }

    async fn process(&self, job: EvaluationJob) {
        let interaction_id = job.interaction_id;
        self.statuses.insert(interaction_id, EvaluationStatus::Running);

        let evaluation = self.engine.evaluate_stored(
            &self.database,
            interaction_id,
            job.ground_truth.as_deref(),
        );
        let result = match timeout(self.job_timeout, evaluation).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout("evaluation", self.job_timeout)),
        };

        match result {
            Ok(record) => {
                tracing::info!(
                    "Evaluation of {} completed (overall {:.2})",
                    interaction_id,
                    record.overall_score()
                );
                self.statuses.insert(interaction_id, EvaluationStatus::Completed);
            }
            Err(e) => {
                tracing::error!("Evaluation of {} failed: {}", interaction_id, e);
                self.statuses.insert(
                    interaction_id,
                    EvaluationStatus::Failed {
                        error: e.to_string(),
                    },
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::judge::{Judge, LexicalJudge, Verdict};
    use crate::providers::mock::HashEmbedder;
    use crate::storage::FeedbackStore;
    use crate::types::{Answer, AnswerOutcome, Interaction};
    use async_trait::async_trait;

    /// Judge that never answers
    struct StalledJudge;

    #[async_trait]
    impl Judge for StalledJudge {
        async fn judge(&self, _metric: &str, _claim: &str, _context: &str) -> Result<Verdict> {
            std::future::pending().await
        }

        fn name(&self) -> String {
            "stalled".into()
        }
    }

    fn stored_interaction(database: &RagDatabase) -> Uuid {
        let mut interaction =
            Interaction::from_answer("limite?", &Answer::insufficient_context(), None, "m", 1);
        interaction.outcome = AnswerOutcome::Answered;
        interaction.answer = "O limite é revisado anualmente.".into();
        interaction.contexts = vec!["O limite é revisado anualmente pelo comitê.".into()];
        database.save_interaction(&interaction).unwrap();
        interaction.id
    }

    fn worker(
        judge: Arc<dyn Judge>,
        database: Arc<RagDatabase>,
        statuses: StatusBoard,
    ) -> EvaluationWorker {
        let engine = Arc::new(EvaluationEngine::new(judge, Arc::new(HashEmbedder::new(32))));
        EvaluationWorker::new(engine, database, statuses, Duration::from_secs(120))
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let (queue, _receiver) = EvaluationQueue::new(1);
        let job = |id| EvaluationJob {
            interaction_id: id,
            ground_truth: None,
        };
        let first = Uuid::new_v4();
        tokio_test::assert_ok!(queue.enqueue(job(first)));
        assert!(queue.enqueue(job(Uuid::new_v4())).is_err());
        assert_eq!(queue.status(first), Some(EvaluationStatus::Queued));
        assert_eq!(queue.pending(), 1);
    }

    #[tokio::test]
    async fn test_worker_completes_jobs() {
        let database = Arc::new(RagDatabase::in_memory().unwrap());
        let id = stored_interaction(&database);
        let (queue, receiver) = EvaluationQueue::new(8);
        queue
            .enqueue(EvaluationJob {
                interaction_id: id,
                ground_truth: Some("O limite é revisado anualmente.".into()),
            })
            .unwrap();
        queue
            .enqueue(EvaluationJob {
                interaction_id: Uuid::new_v4(),
                ground_truth: None,
            })
            .unwrap();

        let statuses = queue.statuses();
        let worker = worker(Arc::new(LexicalJudge::new(0.8)), database.clone(), statuses.clone());
        let handle = tokio::spawn(worker.run(receiver));
        // Worker exits once the last sender is gone
        drop(queue);
        handle.await.unwrap();

        assert_eq!(statuses.get(&id).map(|s| s.clone()), Some(EvaluationStatus::Completed));
        assert!(statuses
            .iter()
            .any(|entry| matches!(entry.value(), EvaluationStatus::Failed { .. })));
        let record = database.get(id).unwrap();
        assert_eq!(record.context_recall.value(), Some(1.0));
    }

    #[tokio::test]
    async fn test_close_drains_queued_jobs() {
        let database = Arc::new(RagDatabase::in_memory().unwrap());
        let id = stored_interaction(&database);
        let (queue, receiver) = EvaluationQueue::new(8);
        let sender_clone = queue.clone();
        queue
            .enqueue(EvaluationJob {
                interaction_id: id,
                ground_truth: None,
            })
            .unwrap();

        let statuses = queue.statuses();
        let handle = tokio::spawn(
            worker(Arc::new(LexicalJudge::new(0.8)), database.clone(), statuses.clone())
                .run(receiver),
        );

        assert_eq!(queue.close(), 1);
        assert_eq!(queue.pending(), 0);
        // Closing through one handle closes every clone
        assert!(sender_clone
            .enqueue(EvaluationJob {
                interaction_id: Uuid::new_v4(),
                ground_truth: None,
            })
            .is_err());

        tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(statuses.get(&id).map(|s| s.clone()), Some(EvaluationStatus::Completed));
        assert!(database.get(id).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_judge_times_out() {
        let database = Arc::new(RagDatabase::in_memory().unwrap());
        let id = stored_interaction(&database);
        let (queue, receiver) = EvaluationQueue::new(8);
        queue
            .enqueue(EvaluationJob {
                interaction_id: id,
                ground_truth: None,
            })
            .unwrap();

        let statuses = queue.statuses();
        let worker = worker(Arc::new(StalledJudge), database.clone(), statuses.clone());
        drop(queue);
        worker.run(receiver).await;

        let status = statuses.get(&id).map(|s| s.clone());
        assert!(matches!(status, Some(EvaluationStatus::Failed { error }) if error.contains("timed out")));
        assert!(database.find_evaluation(id).unwrap().is_none());
    }
}
