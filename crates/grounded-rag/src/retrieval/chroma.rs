//! Chroma vector index backend
//!
//! Talks to a Chroma server over its v1 REST API. Chunks are stored with cosine
//! distance; similarity is reported as `1 - distance`.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::config::RagConfig;
use crate::error::{Error, Result};
use crate::providers::ollama::is_transient_status;
use crate::providers::RetryPolicy;
use crate::types::{Chunk, ChunkMetadata, RetrievalResult, ScoredChunk};

use super::index::{check_vector, IndexStats, VectorIndex};

const PROVIDER: &str = "chroma";

/// Chroma collection used as the vector index
pub struct ChromaIndex {
    client: Client,
    base_url: String,
    collection: String,
    dimensions: usize,
    retry: RetryPolicy,
    collection_id: OnceCell<String>,
}

#[derive(Deserialize)]
struct CollectionResponse {
    id: String,
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    ids: Vec<String>,
    embeddings: Vec<&'a [f32]>,
    documents: Vec<&'a str>,
    metadatas: Vec<Value>,
}

#[derive(Deserialize)]
struct QueryResponse {
    ids: Vec<Vec<String>>,
    #[serde(default)]
    distances: Option<Vec<Vec<f32>>>,
    #[serde(default)]
    documents: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    metadatas: Option<Vec<Vec<Option<StoredMetadata>>>>,
}

#[derive(Deserialize)]
struct GetResponse {
    ids: Vec<String>,
}

/// Metadata stored next to each vector
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredMetadata {
    document_id: String,
    position_index: u32,
    category: String,
    source: String,
    title: String,
    token_count: usize,
}

impl StoredMetadata {
    fn from_chunk(chunk: &Chunk) -> Self {
        Self {
            document_id: chunk.document_id.to_string(),
            position_index: chunk.position_index,
            category: chunk.metadata.category.clone(),
            source: chunk.metadata.source.clone(),
            title: chunk.metadata.title.clone(),
            token_count: chunk.token_count,
        }
    }

    fn into_chunk(self, id: &str, text: String) -> Result<Chunk> {
        let parse = |value: &str| {
            Uuid::parse_str(value)
                .map_err(|e| Error::permanent(PROVIDER, format!("Invalid id '{}': {}", value, e)))
        };
        Ok(Chunk {
            id: parse(id)?,
            document_id: parse(&self.document_id)?,
            text,
            position_index: self.position_index,
            metadata: ChunkMetadata {
                category: self.category,
                source: self.source,
                title: self.title,
            },
            token_count: self.token_count,
            embedding: None,
        })
    }
}

impl ChromaIndex {
    pub fn new(
        base_url: impl Into<String>,
        collection: impl Into<String>,
        dimensions: usize,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            dimensions,
            retry,
            collection_id: OnceCell::new(),
        })
    }

    pub fn from_config(config: &RagConfig) -> Result<Self> {
        Self::new(
            &config.vector_index.chroma_url,
            &config.vector_index.collection,
            config.embeddings.dimensions,
            config.index_retry(),
        )
    }

    fn check_dimensions(&self, vector: &[f32]) -> Result<()> {
        check_vector(vector, self.dimensions)
    }

    /// Delete every record matching a `where` filter, returning how many were removed
    async fn delete_matching(&self, filter: Value) -> Result<usize> {
        let collection = self.collection_id().await?;
        let query = json!({ "where": filter, "include": [] });
        let existing: GetResponse = self
            .post(&format!("collections/{}/get", collection), &query)
            .await?;
        if existing.ids.is_empty() {
            return Ok(0);
        }

        let body = json!({ "ids": existing.ids });
        let _: Value = self
            .post(&format!("collections/{}/delete", collection), &body)
            .await?;
        Ok(existing.ids.len())
    }

    /// Collection id, created on first use
    async fn collection_id(&self) -> Result<&str> {
        let id = self
            .collection_id
            .get_or_try_init(|| async {
                let body = json!({
                    "name": self.collection,
                    "metadata": {"hnsw:space": "cosine"},
                    "get_or_create": true,
                });
                let response: CollectionResponse = self.post("collections", &body).await?;
                tracing::info!("Using Chroma collection '{}' ({})", self.collection, response.id);
                Ok::<_, Error>(response.id)
            })
            .await?;
        Ok(id.as_str())
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + Sync,
        T: for<'de> Deserialize<'de>,
    {
        let url = format!("{}/api/v1/{}", self.base_url, path);
        let (client, url) = (&self.client, url.as_str());
        self.retry
            .run("chroma.post", move || async move {
                let response = client.post(url).json(body).send().await.map_err(request_error)?;
                parse_response(response).await
            })
            .await
    }

    async fn get<T>(&self, path: &str) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let url = format!("{}/api/v1/{}", self.base_url, path);
        let (client, url) = (&self.client, url.as_str());
        self.retry
            .run("chroma.get", move || async move {
                let response = client.get(url).send().await.map_err(request_error)?;
                parse_response(response).await
            })
            .await
    }
}

fn request_error(err: reqwest::Error) -> Error {
    Error::IndexUnavailable(format!("Chroma request failed: {}", err))
}

async fn parse_response<T>(response: reqwest::Response) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = format!("HTTP {} - {}", status, body);
        return Err(if is_transient_status(status) {
            Error::IndexUnavailable(message)
        } else {
            Error::permanent(PROVIDER, message)
        });
    }
    response
        .json()
        .await
        .map_err(|e| Error::permanent(PROVIDER, format!("Invalid response: {}", e)))
}

/// Flatten Chroma's per-query nested arrays into ranked chunks
fn into_scored(response: QueryResponse) -> Result<Vec<ScoredChunk>> {
    let ids = response.ids.into_iter().next().unwrap_or_default();
    let distances = response
        .distances
        .and_then(|d| d.into_iter().next())
        .unwrap_or_default();
    let documents = response
        .documents
        .and_then(|d| d.into_iter().next())
        .unwrap_or_default();
    let metadatas = response
        .metadatas
        .and_then(|m| m.into_iter().next())
        .unwrap_or_default();

    let mut scored = Vec::with_capacity(ids.len());
    for (i, id) in ids.iter().enumerate() {
        let Some(Some(metadata)) = metadatas.get(i).cloned() else {
            tracing::warn!("Chroma result {} has no metadata, skipping", id);
            continue;
        };
        let text = documents.get(i).cloned().flatten().unwrap_or_default();
        let distance = distances.get(i).copied().unwrap_or(1.0);
        if !distance.is_finite() {
            tracing::warn!("Chroma result {} has a non-finite distance, skipping", id);
            continue;
        }
        scored.push(ScoredChunk {
            chunk: metadata.into_chunk(id, text)?,
            similarity: 1.0 - distance,
        });
    }

    // Stable: Chroma's own order is kept for ties
    scored.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    Ok(scored)
}

#[async_trait]
impl VectorIndex for ChromaIndex {
    async fn upsert(&self, chunk: &Chunk, vector: &[f32]) -> Result<()> {
        self.check_dimensions(vector)?;
        let collection = self.collection_id().await?;
        let request = UpsertRequest {
            ids: vec![chunk.id.to_string()],
            embeddings: vec![vector],
            documents: vec![chunk.text.as_str()],
            metadatas: vec![serde_json::to_value(StoredMetadata::from_chunk(chunk))?],
        };
        let _: Value = self
            .post(&format!("collections/{}/upsert", collection), &request)
            .await?;
        Ok(())
    }

    async fn upsert_batch(&self, chunks: &[Chunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let mut request = UpsertRequest {
            ids: Vec::with_capacity(chunks.len()),
            embeddings: Vec::with_capacity(chunks.len()),
            documents: Vec::with_capacity(chunks.len()),
            metadatas: Vec::with_capacity(chunks.len()),
        };
        for chunk in chunks {
            let vector = chunk.embedding.as_deref().ok_or_else(|| {
                Error::invalid_input(format!("chunk {} has no embedding", chunk.id))
            })?;
            self.check_dimensions(vector)?;
            request.ids.push(chunk.id.to_string());
            request.embeddings.push(vector);
            request.documents.push(chunk.text.as_str());
            request
                .metadatas
                .push(serde_json::to_value(StoredMetadata::from_chunk(chunk))?);
        }

        let collection = self.collection_id().await?;
        let _: Value = self
            .post(&format!("collections/{}/upsert", collection), &request)
            .await?;
        tracing::debug!("Upserted {} chunks into Chroma", chunks.len());
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        category: Option<&str>,
    ) -> Result<RetrievalResult> {
        self.check_dimensions(vector)?;
        let collection = self.collection_id().await?;

        let mut body = json!({
            "query_embeddings": [vector],
            "n_results": top_k,
            "include": ["documents", "metadatas", "distances"],
        });
        if let Some(category) = category {
            body["where"] = json!({ "category": category });
        }

        let response: QueryResponse = self
            .post(&format!("collections/{}/query", collection), &body)
            .await?;
        let mut chunks = into_scored(response)?;
        chunks.truncate(top_k);
        Ok(RetrievalResult::new(chunks))
    }

    async fn delete(&self, document_id: &Uuid) -> Result<usize> {
        self.delete_matching(json!({ "document_id": document_id.to_string() }))
            .await
    }

    async fn delete_from_position(&self, document_id: &Uuid, first: u32) -> Result<usize> {
        self.delete_matching(json!({
            "$and": [
                { "document_id": { "$eq": document_id.to_string() } },
                { "position_index": { "$gte": first } }
            ]
        }))
        .await
    }

    async fn contains_document(&self, document_id: &Uuid) -> Result<bool> {
        let collection = self.collection_id().await?;
        let filter = json!({
            "where": { "document_id": document_id.to_string() },
            "limit": 1,
            "include": [],
        });
        let existing: GetResponse = self
            .post(&format!("collections/{}/get", collection), &filter)
            .await?;
        Ok(!existing.ids.is_empty())
    }

    async fn stats(&self) -> Result<IndexStats> {
        let collection = self.collection_id().await?;
        let count: usize = self.get(&format!("collections/{}/count", collection)).await?;
        Ok(IndexStats {
            count,
            dimensions: self.dimensions,
        })
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/api/v1/heartbeat", self.base_url);
        match self.client.get(&url).timeout(self.retry.timeout()).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}
