//! Prompt assembly for grounded generation

use crate::types::{RetrievalResult, ScoredChunk};

/// Reply the model is instructed to give when the context does not hold the answer
pub const REFUSAL_SENTENCE: &str = "This information is not available in the provided documents.";

/// A chunk placed in the prompt under marker `[marker]`
#[derive(Debug, Clone)]
pub struct ContextEntry {
    /// 1-based marker the model cites
    pub marker: usize,
    pub scored: ScoredChunk,
}

/// The exact chunk set shown to the model.
///
/// Answers can only cite chunks through this type.
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    entries: Vec<ContextEntry>,
}

impl PromptContext {
    /// Use every chunk, in the given order
    pub fn from_ranked(chunks: Vec<ScoredChunk>) -> Self {
        let entries = chunks
            .into_iter()
            .enumerate()
            .map(|(i, scored)| ContextEntry {
                marker: i + 1,
                scored,
            })
            .collect();
        Self { entries }
    }

    /// Take the ranked prefix of `result` that fits in `max_tokens`.
    ///
    /// The best chunk is always kept, even when it alone exceeds the budget.
    pub fn assemble(result: &RetrievalResult, max_tokens: usize) -> Self {
        let mut used = 0usize;
        let mut selected = Vec::new();
        for scored in result.iter() {
            let tokens = scored.chunk.token_count;
            if !selected.is_empty() && used + tokens > max_tokens {
                break;
            }
            used += tokens;
            selected.push(scored.clone());
        }

        if selected.len() < result.len() {
            tracing::debug!(
                kept = selected.len(),
                retrieved = result.len(),
                tokens = used,
                "Context budget reached"
            );
        }
        Self::from_ranked(selected)
    }

    pub fn entries(&self) -> &[ContextEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Chunk texts in prompt order
    pub fn texts(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|entry| entry.scored.chunk.text.clone())
            .collect()
    }

    /// Context block with one marked section per chunk
    pub fn render(&self) -> String {
        let mut context = String::new();
        for entry in &self.entries {
            let meta = &entry.scored.chunk.metadata;
            context.push_str(&format!(
                "[{}] Source: {}, Category: {}, Title: {}\n\nContent:\n{}\n\n---\n\n",
                entry.marker, meta.source, meta.category, meta.title, entry.scored.chunk.text
            ));
        }
        context
    }
}

/// Prompt builder for grounded answers
pub struct PromptBuilder;

impl PromptBuilder {
    /// Strict grounding prompt; the model must cite with `[n]` markers or refuse
    pub fn grounded_prompt(question: &str, context: &PromptContext) -> String {
        format!(
            r#"You are a document-grounded assistant that ONLY uses information from provided documents.

CRITICAL GROUNDING RULES - YOU MUST FOLLOW THESE EXACTLY:
1. ONLY use information that is EXPLICITLY stated in the CONTEXT below
2. If the answer is not in the context: respond with "{refusal}"
3. NEVER use external knowledge, general knowledge, or training data
4. NEVER make inferences or guesses beyond what is explicitly stated
5. Cite every claim with the number of the section it comes from, e.g. [1] or [1, 3]
6. Answer in the language of the question

CONTEXT FROM DOCUMENTS:
{context}
QUESTION: {question}

Provide a grounded answer using ONLY the document content above:"#,
            refusal = REFUSAL_SENTENCE,
            context = context.render(),
            question = question.trim()
        )
    }
}
