//! Document registry and index administration endpoints

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::error::Result;
use crate::server::state::AppState;
use crate::service::IndexOverview;
use crate::storage::DocumentRecord;

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub document_id: Uuid,
    pub chunks_deleted: usize,
}

/// GET /api/documents - List ingested documents
pub async fn list_documents(State(state): State<AppState>) -> Result<Json<Vec<DocumentRecord>>> {
    Ok(Json(state.service().database().list_documents()?))
}

/// DELETE /api/documents/:id - Delete a document and its chunks
pub async fn delete_document(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeleteResponse>> {
    let chunks_deleted = state.service().delete_document(id).await?;
    Ok(Json(DeleteResponse {
        document_id: id,
        chunks_deleted,
    }))
}

/// GET /api/index/stats - Index size and store counts
pub async fn index_stats(State(state): State<AppState>) -> Result<Json<IndexOverview>> {
    Ok(Json(state.service().index_stats().await?))
}
