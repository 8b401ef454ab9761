//! Vector index trait and the in-process implementation

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{Chunk, RetrievalResult, ScoredChunk};

/// Index size information
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    /// Chunks stored
    pub count: usize,
    /// Vector length
    pub dimensions: usize,
}

/// Stores chunk vectors and answers cosine nearest-neighbour queries.
///
/// Implementations:
/// - `InMemoryVectorIndex`: in-process, optional JSON snapshot
/// - `ChromaIndex`: remote Chroma collection
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace a chunk by id
    async fn upsert(&self, chunk: &Chunk, vector: &[f32]) -> Result<()>;

    /// Upsert chunks that carry their embedding
    async fn upsert_batch(&self, chunks: &[Chunk]) -> Result<()> {
        for chunk in chunks {
            let vector = chunk.embedding.as_deref().ok_or_else(|| {
                Error::invalid_input(format!("chunk {} has no embedding", chunk.id))
            })?;
            self.upsert(chunk, vector).await?;
        }
        Ok(())
    }

    /// Top `top_k` chunks by descending cosine similarity, optionally restricted to a category
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        category: Option<&str>,
    ) -> Result<RetrievalResult>;

    /// Delete every chunk of a document, returning how many were removed
    async fn delete(&self, document_id: &Uuid) -> Result<usize>;

    /// Delete a document's chunks at `position_index >= first`, returning how many were removed
    async fn delete_from_position(&self, document_id: &Uuid, first: u32) -> Result<usize>;

    /// Whether any chunk of the document is stored
    async fn contains_document(&self, document_id: &Uuid) -> Result<bool>;

    /// Count and dimensions
    async fn stats(&self) -> Result<IndexStats>;

    /// Check if the backend is reachable
    async fn health_check(&self) -> Result<bool>;

    /// Backend name for logging
    fn name(&self) -> &str;
}

/// Cosine similarity; 0.0 when either vector has zero magnitude or the
/// result is not finite
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let similarity = dot / (norm_a * norm_b);
    if similarity.is_finite() {
        similarity
    } else {
        0.0
    }
}

/// Reject vectors of the wrong length or with non-finite components
pub(crate) fn check_vector(vector: &[f32], dimensions: usize) -> Result<()> {
    if vector.len() != dimensions {
        return Err(Error::invalid_input(format!(
            "vector has {} dimensions, index expects {}",
            vector.len(),
            dimensions
        )));
    }
    if let Some(position) = vector.iter().position(|x| !x.is_finite()) {
        return Err(Error::invalid_input(format!(
            "vector component {} is not a finite number",
            position
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    /// Insertion rank, kept across re-upserts
    seq: u64,
    chunk: Chunk,
    vector: Vec<f32>,
}

#[derive(Debug, Default)]
struct IndexState {
    entries: HashMap<Uuid, Entry>,
    by_document: HashMap<Uuid, BTreeSet<Uuid>>,
    next_seq: u64,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    dimensions: usize,
    entries: Vec<Entry>,
}

/// In-process index. Readers never block each other; writers hold the lock only
/// for the map update.
pub struct InMemoryVectorIndex {
    dimensions: usize,
    state: RwLock<IndexState>,
}

impl InMemoryVectorIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            state: RwLock::new(IndexState::default()),
        }
    }

    fn check_dimensions(&self, vector: &[f32]) -> Result<()> {
        check_vector(vector, self.dimensions)
    }

    /// Number of distinct documents with chunks in the index
    pub fn document_count(&self) -> usize {
        self.state.read().by_document.len()
    }

    /// Load a snapshot, or start empty when the file does not exist
    pub fn load_snapshot(path: &Path, dimensions: usize) -> Result<Self> {
        let index = Self::new(dimensions);
        if !path.exists() {
            tracing::info!("No index snapshot at {}, starting empty", path.display());
            return Ok(index);
        }

        let file = std::fs::File::open(path)?;
        let snapshot: Snapshot = serde_json::from_reader(std::io::BufReader::new(file))?;
        if snapshot.dimensions != dimensions {
            return Err(Error::Config(format!(
                "Snapshot {} has {} dimensions, configured {}",
                path.display(),
                snapshot.dimensions,
                dimensions
            )));
        }

        {
            let mut state = index.state.write();
            for entry in snapshot.entries {
                state.next_seq = state.next_seq.max(entry.seq + 1);
                state
                    .by_document
                    .entry(entry.chunk.document_id)
                    .or_default()
                    .insert(entry.chunk.id);
                state.entries.insert(entry.chunk.id, entry);
            }
            tracing::info!(
                "Loaded {} chunks from index snapshot {}",
                state.entries.len(),
                path.display()
            );
        }
        Ok(index)
    }

    /// Write the index to `path` (via a temporary file and rename)
    pub fn save_snapshot(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let snapshot = {
            let state = self.state.read();
            let mut entries: Vec<Entry> = state.entries.values().cloned().collect();
            entries.sort_by_key(|e| e.seq);
            Snapshot {
                dimensions: self.dimensions,
                entries,
            }
        };

        let tmp = path.with_extension("tmp");
        let file = std::fs::File::create(&tmp)?;
        serde_json::to_writer(std::io::BufWriter::new(file), &snapshot)?;
        std::fs::rename(&tmp, path)?;
        tracing::info!("Saved {} chunks to {}", snapshot.entries.len(), path.display());
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, chunk: &Chunk, vector: &[f32]) -> Result<()> {
        self.check_dimensions(vector)?;

        let mut stored = chunk.clone();
        stored.embedding = None;

        let mut state = self.state.write();
        let seq = match state.entries.get(&chunk.id) {
            Some(existing) => {
                let previous_document = existing.chunk.document_id;
                let seq = existing.seq;
                if previous_document != chunk.document_id {
                    if let Some(ids) = state.by_document.get_mut(&previous_document) {
                        ids.remove(&chunk.id);
                        if ids.is_empty() {
                            state.by_document.remove(&previous_document);
                        }
                    }
                }
                seq
            }
            None => {
                let seq = state.next_seq;
                state.next_seq += 1;
                seq
            }
        };

        state
            .by_document
            .entry(chunk.document_id)
            .or_default()
            .insert(chunk.id);
        state.entries.insert(
            chunk.id,
            Entry {
                seq,
                chunk: stored,
                vector: vector.to_vec(),
            },
        );
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        category: Option<&str>,
    ) -> Result<RetrievalResult> {
        self.check_dimensions(vector)?;

        let state = self.state.read();
        let mut scored: Vec<(f32, &Entry)> = state
            .entries
            .values()
            .filter(|entry| category.map_or(true, |c| entry.chunk.metadata.category == c))
            .map(|entry| (cosine_similarity(vector, &entry.vector), entry))
            .collect();

        scored.sort_by(|(score_a, a), (score_b, b)| {
            score_b.total_cmp(score_a).then(a.seq.cmp(&b.seq))
        });
        scored.truncate(top_k);

        Ok(RetrievalResult::new(
            scored
                .into_iter()
                .map(|(similarity, entry)| ScoredChunk {
                    chunk: entry.chunk.clone(),
                    similarity,
                })
                .collect(),
        ))
    }

    async fn delete(&self, document_id: &Uuid) -> Result<usize> {
        let mut state = self.state.write();
        let Some(ids) = state.by_document.remove(document_id) else {
            return Ok(0);
        };
        for id in &ids {
            state.entries.remove(id);
        }
        Ok(ids.len())
    }

    async fn delete_from_position(&self, document_id: &Uuid, first: u32) -> Result<usize> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        let Some(ids) = state.by_document.get_mut(document_id) else {
            return Ok(0);
        };
        let stale: Vec<Uuid> = ids
            .iter()
            .filter(|id| {
                state
                    .entries
                    .get(*id)
                    .map_or(false, |entry| entry.chunk.position_index >= first)
            })
            .copied()
            .collect();
        for id in &stale {
            ids.remove(id);
            state.entries.remove(id);
        }
        if ids.is_empty() {
            state.by_document.remove(document_id);
        }
        Ok(stale.len())
    }

    async fn contains_document(&self, document_id: &Uuid) -> Result<bool> {
        Ok(self.state.read().by_document.contains_key(document_id))
    }

    async fn stats(&self) -> Result<IndexStats> {
        Ok(IndexStats {
            count: self.state.read().entries.len(),
            dimensions: self.dimensions,
        })
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn name(&self) -> &str {
        "memory"
    }
}
