//! Query and retrieval types

use serde::{Deserialize, Serialize};

use super::document::Chunk;
use crate::error::{Error, Result};

/// A question to retrieve context for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// The question text
    pub question: String,
    /// Number of chunks to retrieve
    pub top_k: usize,
    /// Restrict candidates to one category
    #[serde(default)]
    pub category_filter: Option<String>,
}

impl Query {
    /// Create a query without a category filter
    pub fn new(question: impl Into<String>, top_k: usize) -> Self {
        Self {
            question: question.into(),
            top_k,
            category_filter: None,
        }
    }

    /// Restrict the query to a category
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category_filter = Some(category.into());
        self
    }

    /// Reject empty questions and out-of-range `top_k`
    pub fn validate(&self, max_top_k: usize) -> Result<()> {
        if self.question.trim().is_empty() {
            return Err(Error::invalid_input("question must not be empty"));
        }
        if self.top_k == 0 || self.top_k > max_top_k {
            return Err(Error::invalid_input(format!(
                "top_k must be between 1 and {}, got {}",
                max_top_k, self.top_k
            )));
        }
        if matches!(&self.category_filter, Some(c) if c.trim().is_empty()) {
            return Err(Error::invalid_input("category filter must not be blank"));
        }
        Ok(())
    }
}

/// A retrieved chunk with its cosine similarity to the query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub similarity: f32,
}

/// Chunks ranked by descending similarity, at most `top_k` long
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub chunks: Vec<ScoredChunk>,
}

impl RetrievalResult {
    pub fn new(chunks: Vec<ScoredChunk>) -> Self {
        Self { chunks }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScoredChunk> {
        self.chunks.iter()
    }

    /// Highest similarity, if any chunk was retrieved
    pub fn best_similarity(&self) -> Option<f32> {
        self.chunks.first().map(|c| c.similarity)
    }
}

/// HTTP body for `POST /api/ask`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskRequest {
    /// The question to answer
    pub question: String,
    /// Number of chunks to retrieve
    #[serde(default)]
    pub max_documents: Option<usize>,
    /// Restrict retrieval to one category
    #[serde(default)]
    pub category: Option<String>,
}

/// HTTP body for `POST /api/search`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Text to search for
    pub query: String,
    /// Number of chunks to return
    #[serde(default)]
    pub top_k: Option<usize>,
    /// Restrict results to one category
    #[serde(default)]
    pub category: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        assert!(Query::new("política de crédito", 5).validate(100).is_ok());
        assert!(Query::new("   ", 5).validate(100).is_err());
        assert!(Query::new("q", 0).validate(100).is_err());
        assert!(Query::new("q", 101).validate(100).is_err());
        assert!(Query::new("q", 5).with_category(" ").validate(100).is_err());
    }

    #[test]
    fn test_ask_request_defaults() {
        let request: AskRequest = serde_json::from_str(r#"{"question": "limite?"}"#).unwrap();
        assert_eq!(request.max_documents, None);
        assert_eq!(request.category, None);
    }
}
