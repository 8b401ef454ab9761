//! Error types for the grounded RAG pipeline

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline errors
#[derive(Debug, Error)]
pub enum Error {
    /// Empty or malformed document, query, or request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// An external provider (embedding, generation, judge, vector backend) failed
    #[error("Provider '{provider}' failed: {message}")]
    Provider {
        provider: String,
        message: String,
        retriable: bool,
    },

    /// An external call exceeded its deadline
    #[error("Operation '{operation}' timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// The embedding provider could not produce a vector
    #[error("Embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// The generation provider could not produce an answer
    #[error("Generation provider unavailable: {0}")]
    GenerationUnavailable(String),

    /// The vector index holds no chunks
    #[error("The vector index is empty")]
    EmptyIndex,

    /// The vector index backend is unreachable
    #[error("Vector index unavailable: {0}")]
    IndexUnavailable(String),

    /// Retrieval produced no context to answer from
    #[error("Insufficient context to answer the question")]
    InsufficientContext,

    /// Requested entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// An evaluation record already exists for the interaction
    #[error("Interaction {0} has already been evaluated")]
    AlreadyEvaluated(Uuid),

    /// Persistent store error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create a provider error that may succeed on retry
    pub fn transient(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
            retriable: true,
        }
    }

    /// Create a provider error that will not succeed on retry
    pub fn permanent(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
            retriable: false,
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether retrying the failed call may succeed
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::Provider { retriable, .. } => *retriable,
            Error::Timeout { .. } | Error::IndexUnavailable(_) => true,
            Error::Http(err) => err.is_timeout() || err.is_connect(),
            _ => false,
        }
    }

    /// Stable identifier for logs and HTTP bodies
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "invalid_input",
            Error::Provider { .. } => "provider_error",
            Error::Timeout { .. } => "timeout",
            Error::EmbeddingUnavailable(_) => "embedding_unavailable",
            Error::GenerationUnavailable(_) => "generation_unavailable",
            Error::EmptyIndex => "empty_index",
            Error::IndexUnavailable(_) => "index_unavailable",
            Error::InsufficientContext => "insufficient_context",
            Error::NotFound(_) => "not_found",
            Error::AlreadyEvaluated(_) => "already_evaluated",
            Error::Storage(_) => "storage_error",
            Error::Config(_) => "config_error",
            Error::Io(_) => "io_error",
            Error::Json(_) => "json_error",
            Error::Http(_) => "http_error",
            Error::Internal(_) => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Error::InvalidInput(_) | Error::Json(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::AlreadyEvaluated(_) | Error::EmptyIndex => StatusCode::CONFLICT,
            Error::InsufficientContext => StatusCode::UNPROCESSABLE_ENTITY,
            Error::EmbeddingUnavailable(_)
            | Error::GenerationUnavailable(_)
            | Error::Provider { .. }
            | Error::Timeout { .. }
            | Error::IndexUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), "request failed: {}", self);
        }

        let body = Json(json!({
            "error": {
                "type": self.kind(),
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}
