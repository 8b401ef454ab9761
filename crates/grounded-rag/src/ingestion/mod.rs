//! Document ingestion: loading, chunking and indexing

pub mod chunker;
pub mod loader;
pub mod pipeline;

pub use chunker::TextChunker;
pub use loader::{parse_document, DocumentLoader, LoadFailure, LoadReport};
pub use pipeline::{DocumentIngest, IngestFailure, IngestOutcome, IngestPipeline, IngestReport};
