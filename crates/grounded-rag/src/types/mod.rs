//! Core types for the pipeline

pub mod document;
pub mod evaluation;
pub mod interaction;
pub mod query;
pub mod response;

pub use document::{Chunk, ChunkMetadata, Document, DEFAULT_CATEGORY};
pub use evaluation::{
    BatchEvaluationRequest, DatasetEvaluationRequest, DatasetSample, EvaluateRequest,
    EvaluationFailure, EvaluationRecord, EvaluationStatus, JudgeCall, MetricScore, QualityGrade,
};
pub use interaction::{FeedbackRequest, Interaction, UserFeedback};
pub use query::{AskRequest, Query, RetrievalResult, ScoredChunk, SearchRequest};
pub use response::{Answer, AnswerOutcome, AskResponse, SearchHit, SearchResponse, SourceDocument};
