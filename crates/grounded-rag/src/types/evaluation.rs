//! Evaluation record and request types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A metric value, or the reason it could not be computed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum MetricScore {
    /// Score in [0.0, 1.0]
    Score(f32),
    /// The metric needs a ground truth that was not supplied
    NotApplicable,
}

impl MetricScore {
    /// Clamp into [0.0, 1.0]; NaN becomes 0.0
    pub fn score(value: f32) -> Self {
        if value.is_nan() {
            MetricScore::Score(0.0)
        } else {
            MetricScore::Score(value.clamp(0.0, 1.0))
        }
    }

    pub fn value(&self) -> Option<f32> {
        match self {
            MetricScore::Score(v) => Some(*v),
            MetricScore::NotApplicable => None,
        }
    }

    pub fn is_applicable(&self) -> bool {
        matches!(self, MetricScore::Score(_))
    }
}

/// One call made to the judge, kept so low scores can be reproduced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeCall {
    /// Metric the call contributed to
    pub metric: String,
    /// Claim under test
    pub claim: String,
    /// Exact prompt sent to the judge model
    pub prompt: String,
    /// Raw judge reply
    pub response: String,
    /// Parsed verdict
    pub supported: bool,
}

/// Scores for one interaction. Written once, never updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub interaction_id: Uuid,
    pub question: String,
    pub answer: String,
    pub retrieved_contexts: Vec<String>,
    pub ground_truth: Option<String>,
    pub faithfulness: MetricScore,
    pub answer_relevancy: MetricScore,
    pub context_recall: MetricScore,
    pub context_precision: MetricScore,
    /// Judge identifier, e.g. `lexical(0.80)` or `llm(llama3.2:3b)`
    pub judge: String,
    /// Inputs given to a generative judge, in call order
    #[serde(default)]
    pub judge_trace: Vec<JudgeCall>,
    pub evaluated_at: DateTime<Utc>,
}

impl EvaluationRecord {
    /// Applicable metrics as `(name, value)` pairs
    pub fn metrics(&self) -> Vec<(&'static str, f32)> {
        [
            ("faithfulness", self.faithfulness),
            ("answer_relevancy", self.answer_relevancy),
            ("context_recall", self.context_recall),
            ("context_precision", self.context_precision),
        ]
        .into_iter()
        .filter_map(|(name, score)| score.value().map(|v| (name, v)))
        .collect()
    }

    /// Mean of the applicable metrics
    pub fn overall_score(&self) -> f32 {
        let metrics = self.metrics();
        if metrics.is_empty() {
            return 0.0;
        }
        metrics.iter().map(|(_, v)| v).sum::<f32>() / metrics.len() as f32
    }

    pub fn grade(&self) -> QualityGrade {
        QualityGrade::from_score(self.overall_score())
    }
}

/// Coarse quality grade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityGrade {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl QualityGrade {
    pub fn from_score(score: f32) -> Self {
        if score >= 0.8 {
            QualityGrade::Excellent
        } else if score >= 0.7 {
            QualityGrade::Good
        } else if score >= 0.6 {
            QualityGrade::Fair
        } else {
            QualityGrade::Poor
        }
    }
}

/// Deferred evaluation state of an interaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EvaluationStatus {
    Queued,
    Running,
    Completed,
    Failed { error: String },
}

/// HTTP body for `POST /api/evaluations/:id`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvaluateRequest {
    #[serde(default)]
    pub ground_truth: Option<String>,
    /// Queue the evaluation instead of running it inline
    #[serde(default)]
    pub deferred: bool,
}

/// HTTP body for `POST /api/evaluations`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchEvaluationRequest {
    /// Interactions to evaluate; when absent the most recent unevaluated ones are used
    #[serde(default)]
    pub interaction_ids: Option<Vec<Uuid>>,
    /// Upper bound when selecting unevaluated interactions
    #[serde(default)]
    pub limit: Option<usize>,
    /// Ground truths keyed by interaction
    #[serde(default)]
    pub ground_truths: HashMap<Uuid, String>,
}

/// A question with its reference answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSample {
    pub question: String,
    #[serde(default)]
    pub ground_truth: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

/// HTTP body for `POST /api/evaluations/dataset`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetEvaluationRequest {
    pub samples: Vec<DatasetSample>,
    #[serde(default)]
    pub top_k: Option<usize>,
}

/// An interaction that could not be evaluated
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationFailure {
    pub interaction_id: Option<Uuid>,
    pub question: Option<String>,
    pub error: String,
}
