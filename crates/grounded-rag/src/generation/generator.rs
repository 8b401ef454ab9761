//! Grounded answer generation

use std::sync::Arc;

use crate::config::RagConfig;
use crate::error::{Error, Result};
use crate::providers::{GenerationConstraints, GenerationProvider};
use crate::types::{Answer, RetrievalResult};

use super::citation::{cited_markers, is_refusal};
use super::prompt::{PromptBuilder, PromptContext, REFUSAL_SENTENCE};

/// Builds the grounded prompt, calls the model and links citations
pub struct Generator {
    provider: Arc<dyn GenerationProvider>,
    constraints: GenerationConstraints,
    max_context_tokens: usize,
}

impl Generator {
    pub fn new(
        provider: Arc<dyn GenerationProvider>,
        constraints: GenerationConstraints,
        max_context_tokens: usize,
    ) -> Self {
        Self {
            provider,
            constraints,
            max_context_tokens,
        }
    }

    pub fn from_config(provider: Arc<dyn GenerationProvider>, config: &RagConfig) -> Self {
        let mut constraints = GenerationConstraints::new(config.llm.temperature);
        constraints.max_tokens = config.llm.max_tokens;
        Self::new(provider, constraints, config.retrieval.max_context_tokens)
    }

    pub fn provider(&self) -> &Arc<dyn GenerationProvider> {
        &self.provider
    }

    /// Answer `question` from `retrieval` only.
    ///
    /// Returns `InsufficientContext` when nothing was retrieved and
    /// `GenerationUnavailable` when the model cannot be reached.
    pub async fn answer(&self, question: &str, retrieval: &RetrievalResult) -> Result<Answer> {
        if retrieval.is_empty() {
            return Err(Error::InsufficientContext);
        }

        let context = PromptContext::assemble(retrieval, self.max_context_tokens);
        let prompt = PromptBuilder::grounded_prompt(question, &context);
        let model = Some(self.provider.model().to_string());

        let reply = self
            .provider
            .complete(&prompt, &self.constraints)
            .await
            .map_err(|e| Error::GenerationUnavailable(e.to_string()))?;
        let reply = reply.trim();

        if reply.is_empty() || is_refusal(reply) {
            tracing::info!(chunks = context.len(), "Model declined to answer from context");
            let text = if reply.is_empty() { REFUSAL_SENTENCE } else { reply };
            return Ok(Answer::refused(text, &context, model));
        }

        let markers = cited_markers(reply, context.len());
        let answer = Answer::grounded(reply, &context, &markers, model);
        tracing::debug!(
            chunks = context.len(),
            cited = answer.source_documents().len(),
            "Generated grounded answer"
        );
        Ok(answer)
    }
}
