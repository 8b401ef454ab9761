//! Aggregate quality report over a window of evaluations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{EvaluationRecord, QualityGrade, UserFeedback};

/// Mean change that counts as a trend
const TREND_DELTA: f32 = 0.05;

const LOW_FAITHFULNESS: f32 = 0.7;
const LOW_RELEVANCY: f32 = 0.8;
const LOW_PRECISION: f32 = 0.6;
const MAX_POOR_SHARE: f32 = 0.3;

/// Statistics for one metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub mean: f32,
    pub min: f32,
    pub max: f32,
    pub count: usize,
}

impl MetricSummary {
    fn from_values(values: &[f32]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let min = values.iter().copied().fold(f32::INFINITY, f32::min);
        let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        Some(Self {
            mean: values.iter().sum::<f32>() / values.len() as f32,
            min,
            max,
            count: values.len(),
        })
    }
}

/// Interactions per grade
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradeDistribution {
    pub excellent: usize,
    pub good: usize,
    pub fair: usize,
    pub poor: usize,
}

impl GradeDistribution {
    fn add(&mut self, grade: QualityGrade) {
        match grade {
            QualityGrade::Excellent => self.excellent += 1,
            QualityGrade::Good => self.good += 1,
            QualityGrade::Fair => self.fair += 1,
            QualityGrade::Poor => self.poor += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.excellent + self.good + self.fair + self.poor
    }

    pub fn poor_share(&self) -> f32 {
        if self.total() == 0 {
            0.0
        } else {
            self.poor as f32 / self.total() as f32
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeedbackSummary {
    pub count: usize,
    pub mean_rating: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Improving,
    Declining,
    Stable,
}

/// Current mean against the preceding window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricTrend {
    pub current: f32,
    pub previous: f32,
    pub change: f32,
    pub trend: TrendDirection,
}

impl MetricTrend {
    fn new(current: f32, previous: f32) -> Self {
        let change = current - previous;
        let trend = if change > TREND_DELTA {
            TrendDirection::Improving
        } else if change < -TREND_DELTA {
            TrendDirection::Declining
        } else {
            TrendDirection::Stable
        };
        Self {
            current,
            previous,
            change,
            trend,
        }
    }
}

/// Quality report for `GET /api/quality`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    pub window_days: i64,
    pub generated_at: DateTime<Utc>,
    pub evaluated_interactions: usize,
    /// Keyed by metric name; metrics with no applicable score are absent
    pub metrics: BTreeMap<String, MetricSummary>,
    pub overall_score: Option<f32>,
    pub grade: Option<QualityGrade>,
    pub distribution: GradeDistribution,
    pub feedback: FeedbackSummary,
    /// Only metrics present in both windows
    pub trends: BTreeMap<String, MetricTrend>,
    pub recommendations: Vec<String>,
}

impl QualityReport {
    /// Build a report from the current window's records, the previous window's
    /// records (for trends) and the feedback given during the current window
    pub fn build(
        window_days: i64,
        current: &[EvaluationRecord],
        previous: &[EvaluationRecord],
        feedback: &[UserFeedback],
    ) -> Self {
        let metrics = summarize(current);
        let previous_metrics = summarize(previous);

        let mut distribution = GradeDistribution::default();
        for record in current {
            distribution.add(record.grade());
        }

        let overall_score = if current.is_empty() {
            None
        } else {
            Some(current.iter().map(|r| r.overall_score()).sum::<f32>() / current.len() as f32)
        };

        let trends: BTreeMap<String, MetricTrend> = metrics
            .iter()
            .filter_map(|(name, summary)| {
                previous_metrics
                    .get(name)
                    .map(|prev| (name.clone(), MetricTrend::new(summary.mean, prev.mean)))
            })
            .collect();

        let feedback = FeedbackSummary {
            count: feedback.len(),
            mean_rating: if feedback.is_empty() {
                None
            } else {
                Some(feedback.iter().map(|f| f.rating as f32).sum::<f32>() / feedback.len() as f32)
            },
        };

        let recommendations = recommendations(&metrics, &distribution, &trends);

        Self {
            window_days,
            generated_at: Utc::now(),
            evaluated_interactions: current.len(),
            metrics,
            overall_score,
            grade: overall_score.map(QualityGrade::from_score),
            distribution,
            feedback,
            trends,
            recommendations,
        }
    }
}

fn summarize(records: &[EvaluationRecord]) -> BTreeMap<String, MetricSummary> {
    let mut values: BTreeMap<&'static str, Vec<f32>> = BTreeMap::new();
    for record in records {
        for (name, value) in record.metrics() {
            values.entry(name).or_default().push(value);
        }
    }
    values
        .into_iter()
        .filter_map(|(name, v)| MetricSummary::from_values(&v).map(|s| (name.to_string(), s)))
        .collect()
}

fn recommendations(
    metrics: &BTreeMap<String, MetricSummary>,
    distribution: &GradeDistribution,
    trends: &BTreeMap<String, MetricTrend>,
) -> Vec<String> {
    let mean = |name: &str| metrics.get(name).map(|s| s.mean);
    let mut out = Vec::new();

    if mean("faithfulness").is_some_and(|m| m < LOW_FAITHFULNESS) {
        out.push(
            "Low faithfulness: review the source documents and chunking so answers stay within the retrieved context."
                .to_string(),
        );
    }
    if mean("answer_relevancy").is_some_and(|m| m < LOW_RELEVANCY) {
        out.push(
            "Low answer relevancy: tighten the generation prompt or try a different model."
                .to_string(),
        );
    }
    if mean("context_precision").is_some_and(|m| m < LOW_PRECISION) {
        out.push(
            "Low context precision: tune top_k or the similarity threshold, or re-embed the corpus."
                .to_string(),
        );
    }
    if distribution.poor_share() > MAX_POOR_SHARE {
        out.push(format!(
            "{:.0}% of evaluated interactions are poor: a general review of the pipeline is needed.",
            distribution.poor_share() * 100.0
        ));
    }

    let declining: Vec<&str> = trends
        .iter()
        .filter(|(_, t)| t.trend == TrendDirection::Declining)
        .map(|(name, _)| name.as_str())
        .collect();
    if !declining.is_empty() {
        out.push(format!(
            "Declining metrics: {}. Check recent changes to documents, prompts or models.",
            declining.join(", ")
        ));
    }

    out
}
