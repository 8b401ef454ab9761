//! grounded-rag: question answering over a document collection with cited sources
//!
//! Documents are chunked, embedded and indexed; questions are answered by a generation
//! model restricted to the retrieved chunks, and every interaction can be scored for
//! faithfulness, answer relevancy, context recall and context precision.

pub mod config;
pub mod error;
pub mod evaluation;
pub mod generation;
pub mod ingestion;
pub mod providers;
pub mod retrieval;
pub mod server;
pub mod service;
pub mod storage;
pub mod types;

pub use config::RagConfig;
pub use error::{Error, Result};
pub use evaluation::{EvaluationEngine, QualityReport};
pub use service::RagService;
pub use types::{
    Answer, AnswerOutcome, Chunk, Document, EvaluationRecord, MetricScore, Query,
    RetrievalResult,
};
