//! Faithfulness, answer relevancy, context recall and context precision

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::providers::EmbeddingProvider;
use crate::retrieval::cosine_similarity;
use crate::storage::{FeedbackStore, RagDatabase};
use crate::types::{EvaluationRecord, Interaction, JudgeCall, MetricScore};

use super::judge::Judge;
use super::metrics::{average_precision, extract_claims, fraction};

/// Inputs of one evaluation
#[derive(Debug, Clone, Copy)]
pub struct EvaluationInput<'a> {
    pub interaction_id: Uuid,
    pub question: &'a str,
    pub answer: &'a str,
    pub contexts: &'a [String],
    pub ground_truth: Option<&'a str>,
}

impl<'a> EvaluationInput<'a> {
    pub fn from_interaction(interaction: &'a Interaction, ground_truth: Option<&'a str>) -> Self {
        Self {
            interaction_id: interaction.id,
            question: &interaction.question,
            answer: &interaction.answer,
            contexts: &interaction.contexts,
            ground_truth,
        }
    }
}

/// Scores question/answer/context tuples.
///
/// Deterministic for a fixed judge and embedder.
pub struct EvaluationEngine {
    judge: Arc<dyn Judge>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl EvaluationEngine {
    pub fn new(judge: Arc<dyn Judge>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { judge, embedder }
    }

    pub fn judge_name(&self) -> String {
        self.judge.name()
    }

    /// Score one tuple. Recall and precision are `NotApplicable` without a ground truth.
    pub async fn evaluate(&self, input: EvaluationInput<'_>) -> Result<EvaluationRecord> {
        let ground_truth = input
            .ground_truth
            .map(str::trim)
            .filter(|gt| !gt.is_empty());
        let mut trace = Vec::new();
        let joined = input.contexts.join("\n\n");

        let faithfulness = self.faithfulness(input.answer, &joined, &mut trace).await?;
        let answer_relevancy = self.answer_relevancy(input.question, input.answer).await?;

        let (context_recall, context_precision) = match ground_truth {
            Some(gt) => {
                let claims = extract_claims(gt);
                let recall = self
                    .context_recall(&claims, &joined, &mut trace)
                    .await?;
                let precision = self
                    .context_precision(&claims, input.contexts, &mut trace)
                    .await?;
                (recall, precision)
            }
            None => (MetricScore::NotApplicable, MetricScore::NotApplicable),
        };

        let record = EvaluationRecord {
            interaction_id: input.interaction_id,
            question: input.question.to_string(),
            answer: input.answer.to_string(),
            retrieved_contexts: input.contexts.to_vec(),
            ground_truth: ground_truth.map(str::to_string),
            faithfulness,
            answer_relevancy,
            context_recall,
            context_precision,
            judge: self.judge.name(),
            judge_trace: trace,
            evaluated_at: Utc::now(),
        };

        tracing::info!(
            interaction_id = %record.interaction_id,
            overall = record.overall_score(),
            "Evaluated interaction"
        );
        Ok(record)
    }

    /// Evaluate a stored interaction and persist the record.
    ///
    /// Records are immutable: an interaction that already has one gets it back unchanged.
    pub async fn evaluate_stored(
        &self,
        database: &RagDatabase,
        interaction_id: Uuid,
        ground_truth: Option<&str>,
    ) -> Result<EvaluationRecord> {
        if let Some(existing) = database.find_evaluation(interaction_id)? {
            return Ok(existing);
        }

        let interaction = database.get_interaction(interaction_id)?;
        let record = self
            .evaluate(EvaluationInput::from_interaction(&interaction, ground_truth))
            .await?;

        match database.save(&record) {
            Ok(()) => Ok(record),
            Err(Error::AlreadyEvaluated(_)) => database.get(interaction_id),
            Err(e) => Err(e),
        }
    }

    async fn faithfulness(
        &self,
        answer: &str,
        context: &str,
        trace: &mut Vec<JudgeCall>,
    ) -> Result<MetricScore> {
        let claims = extract_claims(answer);
        if claims.is_empty() || context.trim().is_empty() {
            return Ok(MetricScore::score(0.0));
        }

        let mut supported = 0;
        for claim in &claims {
            if self.ask(trace, "faithfulness", claim, context).await? {
                supported += 1;
            }
        }
        Ok(MetricScore::score(fraction(supported, claims.len())))
    }

    async fn answer_relevancy(&self, question: &str, answer: &str) -> Result<MetricScore> {
        if answer.trim().is_empty() {
            return Ok(MetricScore::score(0.0));
        }
        let embed = |text: &str| {
            let text = text.to_string();
            async move {
                self.embedder
                    .embed(&text)
                    .await
                    .map_err(|e| Error::EmbeddingUnavailable(e.to_string()))
            }
        };
        let question_vector = embed(question).await?;
        let answer_vector = embed(answer).await?;
        Ok(MetricScore::score(cosine_similarity(
            &question_vector,
            &answer_vector,
        )))
    }

    async fn context_recall(
        &self,
        truth_claims: &[String],
        context: &str,
        trace: &mut Vec<JudgeCall>,
    ) -> Result<MetricScore> {
        if truth_claims.is_empty() || context.trim().is_empty() {
            return Ok(MetricScore::score(0.0));
        }

        let mut supported = 0;
        for claim in truth_claims {
            if self.ask(trace, "context_recall", claim, context).await? {
                supported += 1;
            }
        }
        Ok(MetricScore::score(fraction(supported, truth_claims.len())))
    }

    /// A context is relevant when it alone supports at least one ground-truth claim
    async fn context_precision(
        &self,
        truth_claims: &[String],
        contexts: &[String],
        trace: &mut Vec<JudgeCall>,
    ) -> Result<MetricScore> {
        let mut relevance = Vec::with_capacity(contexts.len());
        for context in contexts {
            let mut relevant = false;
            for claim in truth_claims {
                if self.ask(trace, "context_precision", claim, context).await? {
                    relevant = true;
                    break;
                }
            }
            relevance.push(relevant);
        }
        Ok(MetricScore::score(average_precision(&relevance)))
    }

    async fn ask(
        &self,
        trace: &mut Vec<JudgeCall>,
        metric: &str,
        claim: &str,
        context: &str,
    ) -> Result<bool> {
        let verdict = self.judge.judge(metric, claim, context).await?;
        if let Some(call) = verdict.call {
            trace.push(call);
        }
        Ok(verdict.supported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::judge::{LexicalJudge, LlmJudge};
    use crate::providers::mock::{HashEmbedder, ScriptedGenerator};
    use crate::types::{Answer, AnswerOutcome};
    use proptest::prelude::*;

    const CONTEXT: &str =
        "O limite de crédito é revisado anualmente. A revisão considera o histórico de pagamentos.";

    fn engine() -> EvaluationEngine {
        EvaluationEngine::new(
            Arc::new(LexicalJudge::new(0.8)),
            Arc::new(HashEmbedder::new(128)),
        )
    }

    fn input<'a>(
        answer: &'a str,
        contexts: &'a [String],
        ground_truth: Option<&'a str>,
    ) -> EvaluationInput<'a> {
        EvaluationInput {
            interaction_id: Uuid::new_v4(),
            question: "Como o limite de crédito é revisado?",
            answer,
            contexts,
            ground_truth,
        }
    }

    #[tokio::test]
    async fn test_faithful_answer_scores_one() {
        let contexts = vec![CONTEXT.to_string()];
        let record = engine()
            .evaluate(input(
                "O limite de crédito é revisado anualmente [1].",
                &contexts,
                Some("O limite é revisado anualmente."),
            ))
            .await
            .unwrap();
        assert_eq!(record.faithfulness, MetricScore::Score(1.0));
        assert_eq!(record.context_recall, MetricScore::Score(1.0));
        assert_eq!(record.context_precision, MetricScore::Score(1.0));
        assert!(record.answer_relevancy.value().unwrap() > 0.0);
        assert!(record.judge_trace.is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_claim_lowers_faithfulness() {
        let contexts = vec![CONTEXT.to_string()];
        let record = engine()
            .evaluate(input(
                "O limite de crédito é revisado anualmente. Clientes ganham cashback em dobro.",
                &contexts,
                None,
            ))
            .await
            .unwrap();
        assert_eq!(record.faithfulness, MetricScore::Score(0.5));
        assert_eq!(record.context_recall, MetricScore::NotApplicable);
        assert_eq!(record.context_precision, MetricScore::NotApplicable);
    }

    #[tokio::test]
    async fn test_precision_is_rank_weighted() {
        let contexts = vec![
            "A agência abre às dez horas.".to_string(),
            CONTEXT.to_string(),
        ];
        let record = engine()
            .evaluate(input(
                "Anualmente.",
                &contexts,
                Some("O limite de crédito é revisado anualmente."),
            ))
            .await
            .unwrap();
        assert_eq!(record.context_precision, MetricScore::Score(0.5));
        assert_eq!(record.context_recall, MetricScore::Score(1.0));
    }

    #[tokio::test]
    async fn test_no_claims_and_no_context() {
        let record = engine().evaluate(input("", &[], Some("   "))).await.unwrap();
        assert_eq!(record.faithfulness, MetricScore::Score(0.0));
        assert_eq!(record.answer_relevancy, MetricScore::Score(0.0));
        assert_eq!(record.context_recall, MetricScore::NotApplicable);
        assert_eq!(record.ground_truth, None);
    }

    #[tokio::test]
    async fn test_llm_judge_calls_are_traced() {
        let judge = LlmJudge::new(Arc::new(ScriptedGenerator::fixed("YES")), 0.0);
        let engine = EvaluationEngine::new(Arc::new(judge), Arc::new(HashEmbedder::new(64)));
        let contexts = vec![CONTEXT.to_string()];
        let record = engine
            .evaluate(input("O limite é anual.", &contexts, Some("Revisão anual do limite.")))
            .await
            .unwrap();

        let metrics: Vec<&str> = record.judge_trace.iter().map(|c| c.metric.as_str()).collect();
        assert_eq!(metrics, vec!["faithfulness", "context_recall", "context_precision"]);
        assert!(record.judge_trace[0].prompt.contains(CONTEXT));
        assert_eq!(record.judge, "llm(scripted)");
    }

    #[tokio::test]
    async fn test_evaluate_stored_is_write_once() {
        let database = RagDatabase::in_memory().unwrap();
        let answer = Answer::insufficient_context();
        let mut interaction = Interaction::from_answer("limite?", &answer, None, "hash-bow", 5);
        interaction.outcome = AnswerOutcome::Answered;
        interaction.answer = "O limite de crédito é revisado anualmente.".into();
        interaction.contexts = vec![CONTEXT.to_string()];
        database.save_interaction(&interaction).unwrap();

        let engine = engine();
        let first = engine
            .evaluate_stored(&database, interaction.id, None)
            .await
            .unwrap();
        let second = engine
            .evaluate_stored(&database, interaction.id, Some("outra verdade"))
            .await
            .unwrap();
        assert_eq!(second.ground_truth, None);
        assert_eq!(second.faithfulness, first.faithfulness);
        assert_eq!(database.stats().unwrap().evaluations, 1);

        assert!(matches!(
            engine.evaluate_stored(&database, Uuid::new_v4(), None).await,
            Err(Error::NotFound(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_scores_in_unit_interval(
            answer in "[a-z ]{0,60}(\\. [a-z ]{0,40})?",
            context in "[a-z ]{0,80}",
            truth in proptest::option::of("[a-z ]{1,40}"),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let contexts = vec![context];
            let record = runtime
                .block_on(engine().evaluate(input(&answer, &contexts, truth.as_deref())))
                .unwrap();
            for score in [
                record.faithfulness,
                record.answer_relevancy,
                record.context_recall,
                record.context_precision,
            ] {
                if let Some(v) = score.value() {
                    prop_assert!((0.0..=1.0).contains(&v));
                }
            }
            let has_truth = truth.as_deref().map_or(false, |t| !t.trim().is_empty());
            prop_assert_eq!(record.context_recall.is_applicable(), has_truth);
            prop_assert_eq!(record.context_precision.is_applicable(), has_truth);
        }
    }
}
