//! Question answering and semantic search endpoints

use axum::{extract::State, Json};

use crate::error::Result;
use crate::server::state::AppState;
use crate::types::{AskRequest, AskResponse, SearchRequest, SearchResponse};

/// POST /api/ask - Answer a question from the indexed documents
pub async fn ask(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>> {
    let response = state.service().ask(request).await?;
    Ok(Json(response))
}

/// POST /api/search - Ranked chunks without generation
pub async fn search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    tracing::info!("Search: \"{}\"", request.query);
    let response = state.service().search(request).await?;
    tracing::info!(
        "Search completed in {}ms, {} hits",
        response.search_time_ms,
        response.hits.len()
    );
    Ok(Json(response))
}
