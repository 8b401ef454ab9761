//! Stored question/answer interactions and user feedback

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::response::{Answer, AnswerOutcome, SourceDocument};
use crate::error::{Error, Result};

/// A persisted question and the answer it received
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub id: Uuid,
    pub question: String,
    pub answer: String,
    /// Texts placed in the prompt
    pub contexts: Vec<String>,
    /// Cited chunks
    pub sources: Vec<SourceDocument>,
    pub outcome: AnswerOutcome,
    pub category_filter: Option<String>,
    pub generation_model: Option<String>,
    pub embedding_model: String,
    pub response_time_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl Interaction {
    /// Record an answer
    pub fn from_answer(
        question: impl Into<String>,
        answer: &Answer,
        category_filter: Option<String>,
        embedding_model: impl Into<String>,
        response_time_ms: u64,
    ) -> Self {
        Self {
            id: answer.interaction_id,
            question: question.into(),
            answer: answer.answer_text.clone(),
            contexts: answer.contexts().to_vec(),
            sources: answer.source_documents().to_vec(),
            outcome: answer.outcome,
            category_filter,
            generation_model: answer.model.clone(),
            embedding_model: embedding_model.into(),
            response_time_ms,
            created_at: Utc::now(),
        }
    }
}

/// A user rating attached to an interaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserFeedback {
    pub interaction_id: Uuid,
    /// 1 (poor) to 5 (excellent)
    pub rating: u8,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl UserFeedback {
    /// Create feedback, rejecting ratings outside 1..=5
    pub fn new(interaction_id: Uuid, rating: u8, comment: Option<String>) -> Result<Self> {
        if !(1..=5).contains(&rating) {
            return Err(Error::invalid_input(format!(
                "rating must be between 1 and 5, got {}",
                rating
            )));
        }
        Ok(Self {
            interaction_id,
            rating,
            comment: comment.filter(|c| !c.trim().is_empty()),
            created_at: Utc::now(),
        })
    }
}

/// HTTP body for `POST /api/interactions/:id/feedback`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRequest {
    pub rating: u8,
    #[serde(default)]
    pub comment: Option<String>,
}
