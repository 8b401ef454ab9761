//! Persistent storage for interactions, evaluations and feedback
//!
//! Kept separate from the vector index's own storage.

mod database;

pub use database::{DocumentRecord, FeedbackStore, RagDatabase, StoreStats};
