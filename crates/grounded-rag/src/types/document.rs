//! Document and chunk types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Namespace for deterministic document and chunk ids
const ID_NAMESPACE: Uuid = Uuid::from_u128(0x6b1f_3c2e_9a4d_4f0b_8e21_5d7c_a903_e4f1);

/// Category assigned when a document carries no category header
pub const DEFAULT_CATEGORY: &str = "uncategorized";

/// An ingested document. Re-ingestion supersedes it; it is never edited in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Stable id derived from `source_path`
    pub id: Uuid,
    /// Display title
    pub title: String,
    /// Category copied onto every chunk
    pub category: String,
    /// Originating file name or path
    pub source_path: String,
    /// Body text (headers removed)
    pub raw_content: String,
    /// SHA-256 of `raw_content`, hex encoded
    pub content_hash: String,
    /// When this version was ingested
    pub ingested_at: DateTime<Utc>,
}

impl Document {
    /// Create a document; the id is a function of `source_path` alone
    pub fn new(
        title: impl Into<String>,
        category: impl Into<String>,
        source_path: impl Into<String>,
        raw_content: impl Into<String>,
    ) -> Self {
        let source_path = source_path.into();
        let raw_content = raw_content.into();
        let category = category.into();
        Self {
            id: Self::id_for_source(&source_path),
            title: title.into(),
            category: if category.trim().is_empty() {
                DEFAULT_CATEGORY.to_string()
            } else {
                category
            },
            content_hash: content_hash(&raw_content),
            source_path,
            raw_content,
            ingested_at: Utc::now(),
        }
    }

    /// Deterministic document id for a source path
    pub fn id_for_source(source_path: &str) -> Uuid {
        Uuid::new_v5(&ID_NAMESPACE, source_path.as_bytes())
    }

    /// File name part of `source_path`
    pub fn source_name(&self) -> &str {
        self.source_path
            .rsplit(|c: char| c == '/' || c == '\\')
            .next()
            .unwrap_or(&self.source_path)
    }

    /// Whether the body holds no text
    pub fn is_empty(&self) -> bool {
        self.raw_content.trim().is_empty()
    }
}

/// SHA-256 of a document body
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Metadata attached identically to every chunk of a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Document category, used for filtering
    pub category: String,
    /// Source file name
    pub source: String,
    /// Document title
    pub title: String,
}

impl ChunkMetadata {
    /// Metadata for chunks of a document
    pub fn for_document(document: &Document) -> Self {
        Self {
            category: document.category.clone(),
            source: document.source_name().to_string(),
            title: document.title.clone(),
        }
    }
}

/// A bounded text segment, the unit of embedding and retrieval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable id derived from `(document_id, position_index)`
    pub id: Uuid,
    /// Back-reference to the document
    pub document_id: Uuid,
    /// Exact slice of the document body
    pub text: String,
    /// Position within the document, starting at 0
    pub position_index: u32,
    /// Category, source and title
    pub metadata: ChunkMetadata,
    /// Whitespace-delimited token count
    pub token_count: usize,
    /// Embedding, attached after the embedding step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Chunk {
    /// Create an unembedded chunk of `document`
    pub fn new(document: &Document, text: String, position_index: u32, token_count: usize) -> Self {
        Self {
            id: Self::id_for(document.id, position_index),
            document_id: document.id,
            text,
            position_index,
            metadata: ChunkMetadata::for_document(document),
            token_count,
            embedding: None,
        }
    }

    /// Deterministic chunk id
    pub fn id_for(document_id: Uuid, position_index: u32) -> Uuid {
        let mut name = document_id.as_bytes().to_vec();
        name.extend_from_slice(&position_index.to_be_bytes());
        Uuid::new_v5(&ID_NAMESPACE, &name)
    }

    /// Attach an embedding
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_deterministic() {
        let a = Document::new("Crédito", "Política de Crédito", "docs/credito.txt", "texto");
        let b = Document::new("Other", "x", "docs/credito.txt", "outro texto");
        assert_eq!(a.id, b.id);
        assert_ne!(a.content_hash, b.content_hash);

        assert_eq!(Chunk::id_for(a.id, 3), Chunk::id_for(b.id, 3));
        assert_ne!(Chunk::id_for(a.id, 3), Chunk::id_for(a.id, 4));
    }

    #[test]
    fn test_blank_category_falls_back() {
        let doc = Document::new("t", "  ", "a.txt", "body");
        assert_eq!(doc.category, DEFAULT_CATEGORY);
    }

    #[test]
    fn test_chunk_metadata_uses_file_name() {
        let doc = Document::new("Crédito", "Política de Crédito", "/data/docs/credito.txt", "x y");
        let chunk = Chunk::new(&doc, "x y".into(), 0, 2);
        assert_eq!(chunk.metadata.source, "credito.txt");
        assert_eq!(chunk.metadata.category, "Política de Crédito");
        assert!(chunk.embedding.is_none());
    }
}
