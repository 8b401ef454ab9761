//! Answer quality evaluation
//!
//! Scores stored interactions on faithfulness, answer relevancy, context recall and
//! context precision, either inline or through the deferred [`EvaluationQueue`].

pub mod engine;
pub mod judge;
pub mod metrics;
pub mod queue;
pub mod report;

pub use engine::{EvaluationEngine, EvaluationInput};
pub use judge::{Judge, LexicalJudge, LlmJudge, Verdict};
pub use queue::{EvaluationJob, EvaluationQueue, EvaluationWorker, StatusBoard};
pub use report::{MetricSummary, MetricTrend, QualityReport, TrendDirection};
