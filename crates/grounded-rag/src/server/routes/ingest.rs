//! Document ingestion endpoints

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::ingestion::{parse_document, IngestReport};
use crate::server::state::AppState;
use crate::types::Document;

/// A document submitted inline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentInput {
    /// File name or path; determines the document id
    pub source_path: String,
    /// Text, optionally starting with `Título:`/`Categoria:` header lines
    pub content: String,
    /// Overrides the header title
    #[serde(default)]
    pub title: Option<String>,
    /// Overrides the header category
    #[serde(default)]
    pub category: Option<String>,
}

impl DocumentInput {
    fn into_document(self) -> Document {
        let parsed = parse_document(&self.source_path, &self.content);
        if self.title.is_none() && self.category.is_none() {
            return parsed;
        }
        Document::new(
            self.title.unwrap_or(parsed.title),
            self.category.unwrap_or(parsed.category),
            parsed.source_path,
            parsed.raw_content,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    pub documents: Vec<DocumentInput>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryIngestRequest {
    /// Defaults to `ingestion.documents_dir`
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// POST /api/ingest - Ingest documents sent in the request body
pub async fn ingest_documents(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest>,
) -> Result<Json<IngestReport>> {
    if request.documents.is_empty() {
        return Err(Error::invalid_input("no documents provided"));
    }
    if let Some(blank) = request.documents.iter().find(|d| d.source_path.trim().is_empty()) {
        return Err(Error::invalid_input(format!(
            "document with {} bytes of content has no source_path",
            blank.content.len()
        )));
    }

    let documents = request
        .documents
        .into_iter()
        .map(DocumentInput::into_document)
        .collect();
    Ok(Json(state.service().ingest_documents(documents).await))
}

/// POST /api/ingest/directory - Ingest every text file under a server-side directory
pub async fn ingest_directory(
    State(state): State<AppState>,
    Json(request): Json<DirectoryIngestRequest>,
) -> Result<Json<IngestReport>> {
    let report = state
        .service()
        .ingest_directory(request.path.as_deref())
        .await?;
    Ok(Json(report))
}
