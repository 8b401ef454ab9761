//! Claim support judges
//!
//! A judge decides whether a context supports a single claim. Every metric is built
//! on these yes/no verdicts.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

use crate::config::{EvaluationConfig, JudgeKind};
use crate::error::Result;
use crate::providers::{GenerationConstraints, GenerationProvider};
use crate::types::JudgeCall;

/// Outcome of one judgement
#[derive(Debug, Clone)]
pub struct Verdict {
    pub supported: bool,
    /// Set when a generative model was asked
    pub call: Option<JudgeCall>,
}

/// Decides whether a context supports a claim.
///
/// Implementations:
/// - `LexicalJudge`: deterministic content-word overlap
/// - `LlmJudge`: YES/NO question to a generation provider at temperature 0
#[async_trait]
pub trait Judge: Send + Sync {
    /// Judge `claim` against `context`; `metric` labels the recorded call
    async fn judge(&self, metric: &str, claim: &str, context: &str) -> Result<Verdict>;

    /// Identifier stored with every evaluation record
    fn name(&self) -> String;
}

/// Build the configured judge
pub fn from_config(
    config: &EvaluationConfig,
    provider: Option<Arc<dyn GenerationProvider>>,
) -> Arc<dyn Judge> {
    match (config.judge, provider) {
        (JudgeKind::Llm, Some(provider)) => {
            Arc::new(LlmJudge::new(provider, config.judge_temperature))
        }
        (JudgeKind::Llm, None) => {
            tracing::warn!("LLM judge configured without a provider, using lexical judge");
            Arc::new(LexicalJudge::new(config.support_threshold))
        }
        (JudgeKind::Lexical, _) => Arc::new(LexicalJudge::new(config.support_threshold)),
    }
}

const STOPWORDS: &[&str] = &[
    // Portuguese
    "que", "para", "com", "uma", "uns", "umas", "por", "dos", "das", "nos", "nas", "pelo",
    "pela", "pelos", "pelas", "como", "mais", "mas", "não", "sim", "são", "ser", "está",
    "estão", "foi", "tem", "têm", "sua", "seu", "suas", "seus", "ele", "ela", "eles",
    "elas", "isso", "este", "esta", "esse", "essa", "aos", "até", "quando", "qual", "quais",
    "também", "há", "já", "muito", "pode", "deve", "sobre", "entre", "após", "cada",
    // English
    "the", "and", "for", "are", "was", "were", "with", "that", "this", "these", "those",
    "from", "have", "has", "had", "not", "but", "its", "can", "will", "all", "any", "which",
    "their", "there", "what", "when", "who", "how", "into", "than", "then", "also", "been",
];

/// Lowercased words of at least three characters that are not stopwords
pub fn content_words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(str::to_lowercase)
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// Supported when at least `threshold` of the claim's content words occur in the context.
///
/// A claim without content words asserts nothing checkable and counts as supported.
pub struct LexicalJudge {
    threshold: f32,
}

impl LexicalJudge {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    /// Fraction of the claim's content words found in the context
    pub fn coverage(claim: &str, context: &str) -> f32 {
        let claim_words: HashSet<String> = content_words(claim).into_iter().collect();
        if claim_words.is_empty() {
            return 1.0;
        }
        let context_words: HashSet<String> = context
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect();
        let found = claim_words
            .iter()
            .filter(|w| context_words.contains(*w))
            .count();
        found as f32 / claim_words.len() as f32
    }
}

#[async_trait]
impl Judge for LexicalJudge {
    async fn judge(&self, _metric: &str, claim: &str, context: &str) -> Result<Verdict> {
        Ok(Verdict {
            supported: Self::coverage(claim, context) >= self.threshold,
            call: None,
        })
    }

    fn name(&self) -> String {
        format!("lexical({:.2})", self.threshold)
    }
}

/// Asks a language model whether the context supports the claim
pub struct LlmJudge {
    provider: Arc<dyn GenerationProvider>,
    constraints: GenerationConstraints,
}

impl LlmJudge {
    pub fn new(provider: Arc<dyn GenerationProvider>, temperature: f32) -> Self {
        Self {
            provider,
            constraints: GenerationConstraints::new(temperature).with_max_tokens(8),
        }
    }

    fn prompt(claim: &str, context: &str) -> String {
        format!(
            r#"You verify whether a statement is supported by a context.

CONTEXT:
{context}

STATEMENT: {claim}

Reply with exactly one word: YES if the context explicitly supports the statement, NO otherwise.

Answer:"#,
            context = context,
            claim = claim
        )
    }

    fn parse(reply: &str) -> bool {
        let first = reply
            .trim()
            .split(|c: char| !c.is_alphanumeric())
            .find(|w| !w.is_empty())
            .unwrap_or_default()
            .to_uppercase();
        first == "YES" || first == "SIM"
    }
}

#[async_trait]
impl Judge for LlmJudge {
    async fn judge(&self, metric: &str, claim: &str, context: &str) -> Result<Verdict> {
        let prompt = Self::prompt(claim, context);
        let response = self.provider.complete(&prompt, &self.constraints).await?;
        let supported = Self::parse(&response);
        Ok(Verdict {
            supported,
            call: Some(JudgeCall {
                metric: metric.to_string(),
                claim: claim.to_string(),
                prompt,
                response,
                supported,
            }),
        })
    }

    fn name(&self) -> String {
        format!("llm({})", self.provider.model())
    }
}
