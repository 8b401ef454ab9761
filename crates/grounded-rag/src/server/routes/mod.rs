//! API routes for the RAG server

pub mod documents;
pub mod evaluation;
pub mod feedback;
pub mod ingest;
pub mod query;

use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::server::state::AppState;

/// Build all API routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Question answering
        .route("/ask", post(query::ask))
        .route("/search", post(query::search))
        // Ingestion and index administration
        .route("/ingest", post(ingest::ingest_documents))
        .route("/ingest/directory", post(ingest::ingest_directory))
        .route("/documents", get(documents::list_documents))
        .route("/documents/:id", delete(documents::delete_document))
        .route("/index/stats", get(documents::index_stats))
        // Evaluation
        .route("/evaluations", post(evaluation::evaluate_batch))
        .route("/evaluations/dataset", post(evaluation::evaluate_dataset))
        .route(
            "/evaluations/:id",
            post(evaluation::evaluate_interaction).get(evaluation::get_evaluation),
        )
        .route("/evaluations/:id/status", get(evaluation::evaluation_status))
        .route("/quality", get(evaluation::quality_report))
        // Interactions and feedback
        .route("/interactions/:id", get(feedback::get_interaction))
        .route("/interactions/:id/feedback", post(feedback::submit_feedback))
        // Info
        .route("/info", get(info))
}

/// API info endpoint
async fn info() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "name": "grounded-rag",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Document-grounded question answering with answer quality evaluation",
        "endpoints": {
            "POST /api/ask": "Answer a question with cited sources",
            "POST /api/search": "Ranked chunks without generation",
            "POST /api/ingest": "Ingest documents from the request body",
            "POST /api/ingest/directory": "Ingest text files from a server directory",
            "GET /api/documents": "List ingested documents",
            "DELETE /api/documents/:id": "Delete a document and its chunks",
            "GET /api/index/stats": "Index and store statistics",
            "POST /api/evaluations": "Evaluate stored interactions in batch",
            "POST /api/evaluations/dataset": "Answer and evaluate question/ground-truth samples",
            "POST /api/evaluations/:id": "Evaluate one interaction (inline or deferred)",
            "GET /api/evaluations/:id": "Stored evaluation record",
            "GET /api/evaluations/:id/status": "Deferred evaluation status",
            "GET /api/quality": "Quality report over a trailing window",
            "GET /api/interactions/:id": "Stored interaction",
            "POST /api/interactions/:id/feedback": "Rate an answer from 1 to 5"
        }
    }))
}
