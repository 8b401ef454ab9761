//! Vector indexing and retrieval

pub mod chroma;
pub mod index;
pub mod retriever;

pub use chroma::ChromaIndex;
pub use index::{cosine_similarity, IndexStats, InMemoryVectorIndex, VectorIndex};
pub use retriever::Retriever;
