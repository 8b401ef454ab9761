//! Answer and citation types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::query::ScoredChunk;
use crate::generation::citation::truncate_snippet;
use crate::generation::prompt::{PromptContext, REFUSAL_SENTENCE};

/// Length of snippets carried by source references
const SNIPPET_CHARS: usize = 300;

/// Reference to a chunk that was placed in the prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    /// Chunk ID
    pub chunk_id: Uuid,
    /// Document ID
    pub document_id: Uuid,
    /// Document title
    pub title: String,
    /// Document category
    pub category: String,
    /// Source file name
    pub source: String,
    /// Position of the chunk in its document
    pub position_index: u32,
    /// Similarity score (cosine)
    pub similarity_score: f32,
    /// Leading text of the chunk
    pub snippet: String,
}

impl SourceDocument {
    /// Build a reference from a retrieved chunk
    pub fn from_scored(scored: &ScoredChunk) -> Self {
        let chunk = &scored.chunk;
        Self {
            chunk_id: chunk.id,
            document_id: chunk.document_id,
            title: chunk.metadata.title.clone(),
            category: chunk.metadata.category.clone(),
            source: chunk.metadata.source.clone(),
            position_index: chunk.position_index,
            similarity_score: scored.similarity,
            snippet: truncate_snippet(&chunk.text, SNIPPET_CHARS),
        }
    }

    /// Format for display in text
    pub fn format_inline(&self) -> String {
        format!(
            "[Source: {}, {}, part {}]",
            self.source,
            self.category,
            self.position_index + 1
        )
    }
}

/// How a question was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerOutcome {
    /// Answer grounded in the retrieved context
    Answered,
    /// The model declined because the context did not support an answer
    Refused,
    /// Retrieval produced nothing to answer from
    InsufficientContext,
}

impl AnswerOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerOutcome::Answered => "answered",
            AnswerOutcome::Refused => "refused",
            AnswerOutcome::InsufficientContext => "insufficient_context",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "answered" => Some(AnswerOutcome::Answered),
            "refused" => Some(AnswerOutcome::Refused),
            "insufficient_context" => Some(AnswerOutcome::InsufficientContext),
            _ => None,
        }
    }
}

/// Generated answer.
///
/// Sources and contexts are private and only settable from a [`PromptContext`], so
/// citations can never name a chunk the model did not see.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    /// Interaction this answer belongs to
    pub interaction_id: Uuid,
    /// Answer text
    pub answer_text: String,
    /// Resolution
    pub outcome: AnswerOutcome,
    /// Generation model, when one was called
    pub model: Option<String>,
    source_documents: Vec<SourceDocument>,
    contexts: Vec<String>,
}

impl Answer {
    /// Answer grounded in `context`, citing the 1-based `cited` markers.
    ///
    /// Markers outside the prompt are ignored; when none remain every prompt chunk is cited.
    pub fn grounded(
        answer_text: impl Into<String>,
        context: &PromptContext,
        cited: &[usize],
        model: Option<String>,
    ) -> Self {
        let mut source_documents: Vec<SourceDocument> = context
            .entries()
            .iter()
            .filter(|entry| cited.contains(&entry.marker))
            .map(|entry| SourceDocument::from_scored(&entry.scored))
            .collect();

        if source_documents.is_empty() {
            source_documents = context
                .entries()
                .iter()
                .map(|entry| SourceDocument::from_scored(&entry.scored))
                .collect();
        }

        Self {
            interaction_id: Uuid::new_v4(),
            answer_text: answer_text.into(),
            outcome: AnswerOutcome::Answered,
            model,
            source_documents,
            contexts: context.texts(),
        }
    }

    /// The model refused; nothing is cited but the contexts it saw are kept
    pub fn refused(answer_text: impl Into<String>, context: &PromptContext, model: Option<String>) -> Self {
        Self {
            interaction_id: Uuid::new_v4(),
            answer_text: answer_text.into(),
            outcome: AnswerOutcome::Refused,
            model,
            source_documents: Vec::new(),
            contexts: context.texts(),
        }
    }

    /// Retrieval produced no context
    pub fn insufficient_context() -> Self {
        Self {
            interaction_id: Uuid::new_v4(),
            answer_text: REFUSAL_SENTENCE.to_string(),
            outcome: AnswerOutcome::InsufficientContext,
            model: None,
            source_documents: Vec::new(),
            contexts: Vec::new(),
        }
    }

    /// Chunks cited by the answer, in prompt order
    pub fn source_documents(&self) -> &[SourceDocument] {
        &self.source_documents
    }

    /// Texts of every chunk placed in the prompt, in prompt order
    pub fn contexts(&self) -> &[String] {
        &self.contexts
    }

    /// Whether the answer is backed by cited context
    pub fn is_grounded(&self) -> bool {
        self.outcome == AnswerOutcome::Answered && !self.source_documents.is_empty()
    }
}

/// Response for `POST /api/ask`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskResponse {
    /// Interaction ID (for feedback and evaluation)
    pub interaction_id: Uuid,
    /// Answer text
    pub answer: String,
    /// Cited chunks
    pub source_documents: Vec<SourceDocument>,
    /// Resolution
    pub outcome: AnswerOutcome,
    /// Whether the answer is grounded in cited context
    pub grounded: bool,
    /// Chunks retrieved before prompt assembly
    pub chunks_retrieved: usize,
    /// Wall time in milliseconds
    pub response_time_ms: u64,
}

impl AskResponse {
    pub fn new(answer: &Answer, chunks_retrieved: usize, response_time_ms: u64) -> Self {
        Self {
            interaction_id: answer.interaction_id,
            answer: answer.answer_text.clone(),
            source_documents: answer.source_documents().to_vec(),
            outcome: answer.outcome,
            grounded: answer.is_grounded(),
            chunks_retrieved,
            response_time_ms,
        }
    }
}

/// Search hit without generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    /// Rank, starting at 1
    pub rank: usize,
    /// The matched chunk
    pub source: SourceDocument,
}

/// Response for `POST /api/search`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub hits: Vec<SearchHit>,
    pub search_time_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Chunk, Document};

    fn context() -> PromptContext {
        let doc = Document::new("Crédito", "Política de Crédito", "credito.txt", "a b c");
        let scored = |pos: u32, sim: f32| ScoredChunk {
            chunk: Chunk::new(&doc, format!("texto {}", pos), pos, 2),
            similarity: sim,
        };
        PromptContext::from_ranked(vec![scored(0, 0.9), scored(1, 0.7)])
    }

    #[test]
    fn test_grounded_cites_only_markers() {
        let ctx = context();
        let answer = Answer::grounded("Limite [2].", &ctx, &[2, 7], None);
        assert_eq!(answer.source_documents().len(), 1);
        assert_eq!(answer.source_documents()[0].position_index, 1);
        assert_eq!(answer.contexts().len(), 2);
        assert!(answer.is_grounded());
    }

    #[test]
    fn test_grounded_without_markers_cites_prompt() {
        let ctx = context();
        let answer = Answer::grounded("Limite de crédito.", &ctx, &[], None);
        assert_eq!(answer.source_documents().len(), 2);
    }

    #[test]
    fn test_refused_has_no_sources() {
        let ctx = context();
        let answer = Answer::refused(REFUSAL_SENTENCE, &ctx, None);
        assert!(answer.source_documents().is_empty());
        assert_eq!(answer.contexts().len(), 2);
        assert!(!answer.is_grounded());
    }

    #[test]
    fn test_outcome_round_trips_through_str() {
        for outcome in [
            AnswerOutcome::Answered,
            AnswerOutcome::Refused,
            AnswerOutcome::InsufficientContext,
        ] {
            assert_eq!(AnswerOutcome::parse(outcome.as_str()), Some(outcome));
        }
    }
}
