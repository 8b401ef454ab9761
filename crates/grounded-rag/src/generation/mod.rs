//! Answer generation with citation handling

pub mod citation;
pub mod generator;
pub mod prompt;

pub use citation::{cited_markers, is_refusal, strip_markers};
pub use generator::Generator;
pub use prompt::{PromptBuilder, PromptContext, REFUSAL_SENTENCE};
