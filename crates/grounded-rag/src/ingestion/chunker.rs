//! Token-budgeted chunking with exact overlap between neighbours

use std::ops::Range;

use unicode_segmentation::UnicodeSegmentation;

use crate::config::ChunkingConfig;
use crate::types::{Chunk, Document};

/// A whitespace-delimited token as a byte span of the source text
#[derive(Debug, Clone, Copy)]
struct Token {
    start: usize,
    end: usize,
}

/// Splits documents into chunks of at most `max_tokens` tokens.
///
/// Breaks on paragraphs first, then sentences, then raw token windows. Adjacent chunks
/// share exactly `overlap_tokens` tokens; a document that fits the budget yields one chunk.
#[derive(Debug, Clone)]
pub struct TextChunker {
    /// Maximum tokens per chunk
    max_tokens: usize,
    /// Tokens repeated at the head of the next chunk
    overlap_tokens: usize,
}

impl TextChunker {
    /// Create a chunker. Overlap is capped below half the budget.
    pub fn new(max_tokens: usize, overlap_tokens: usize) -> Self {
        let max_tokens = max_tokens.max(1);
        Self {
            max_tokens,
            overlap_tokens: overlap_tokens.min((max_tokens - 1) / 2),
        }
    }

    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self::new(config.max_tokens, config.overlap_tokens)
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn overlap_tokens(&self) -> usize {
        self.overlap_tokens
    }

    /// Split a document. An empty document yields no chunks.
    pub fn split(&self, document: &Document) -> Vec<Chunk> {
        let text = &document.raw_content;
        let tokens = tokenize(text);

        self.spans(text, &tokens)
            .into_iter()
            .enumerate()
            .map(|(position, span)| {
                let slice = &text[tokens[span.start].start..tokens[span.end - 1].end];
                Chunk::new(document, slice.to_string(), position as u32, span.len())
            })
            .collect()
    }

    /// Token index ranges of each chunk
    fn spans(&self, text: &str, tokens: &[Token]) -> Vec<Range<usize>> {
        if tokens.is_empty() {
            return Vec::new();
        }
        if tokens.len() <= self.max_tokens {
            return vec![0..tokens.len()];
        }
        let units = self.units(text, tokens);
        self.pack(&units)
    }

    /// Contiguous token ranges no longer than `max_tokens - overlap_tokens`
    fn units(&self, text: &str, tokens: &[Token]) -> Vec<Range<usize>> {
        let unit_max = self.max_tokens - self.overlap_tokens;
        let sentence_ids = sentence_ids(text, tokens);
        let mut units = Vec::new();

        for paragraph in paragraphs(text, tokens) {
            if paragraph.len() <= unit_max {
                units.push(paragraph);
                continue;
            }

            let mut sentence_start = paragraph.start;
            for i in paragraph.start + 1..=paragraph.end {
                if i < paragraph.end && sentence_ids[i] == sentence_ids[i - 1] {
                    continue;
                }
                let mut window_start = sentence_start;
                while i - window_start > unit_max {
                    units.push(window_start..window_start + unit_max);
                    window_start += unit_max;
                }
                units.push(window_start..i);
                sentence_start = i;
            }
        }

        units
    }

    /// Greedily pack units into chunks, repeating the overlap at each boundary
    fn pack(&self, units: &[Range<usize>]) -> Vec<Range<usize>> {
        let close_at = (2 * self.overlap_tokens).max(1);
        let mut spans = Vec::new();
        let (mut start, mut end) = (0usize, 0usize);

        for unit in units {
            let mut next = unit.start;
            while next < unit.end {
                let held = end - start;
                let remaining = unit.end - next;

                if held + remaining <= self.max_tokens {
                    end = unit.end;
                    next = unit.end;
                } else if held >= close_at {
                    spans.push(start..end);
                    start = end - self.overlap_tokens;
                } else {
                    // Too little held to close: fill to the budget at a raw token boundary
                    let take = self.max_tokens - held;
                    end += take;
                    next += take;
                    spans.push(start..end);
                    start = end - self.overlap_tokens;
                }
            }
        }

        if end > start {
            spans.push(start..end);
        }
        spans
    }
}

impl Default for TextChunker {
    fn default() -> Self {
        Self::from_config(&ChunkingConfig::default())
    }
}

/// Count whitespace-delimited tokens
pub fn count_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut start = None;

    for (i, c) in text.char_indices() {
        match (c.is_whitespace(), start) {
            (true, Some(s)) => {
                tokens.push(Token { start: s, end: i });
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
    }
    if let Some(s) = start {
        tokens.push(Token { start: s, end: text.len() });
    }
    tokens
}

/// Paragraph token ranges; a gap holding two or more newlines separates paragraphs
fn paragraphs(text: &str, tokens: &[Token]) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = 0;
    for i in 1..tokens.len() {
        let gap = &text[tokens[i - 1].end..tokens[i].start];
        if gap.matches('\n').count() >= 2 {
            ranges.push(start..i);
            start = i;
        }
    }
    ranges.push(start..tokens.len());
    ranges
}

/// Sentence number of every token
fn sentence_ids(text: &str, tokens: &[Token]) -> Vec<usize> {
    let starts: Vec<usize> = text
        .split_sentence_bound_indices()
        .map(|(offset, _)| offset)
        .collect();
    tokens
        .iter()
        .map(|t| starts.partition_point(|&s| s <= t.start))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn doc(body: &str) -> Document {
        Document::new("Política", "Política de Crédito", "credito.txt", body)
    }

    fn words(n: usize, prefix: &str) -> String {
        (0..n).map(|i| format!("{}{}", prefix, i)).collect::<Vec<_>>().join(" ")
    }

    fn assert_exact_overlap(chunks: &[Chunk], overlap: usize) {
        for pair in chunks.windows(2) {
            let left: Vec<&str> = pair[0].text.split_whitespace().collect();
            let right: Vec<&str> = pair[1].text.split_whitespace().collect();
            assert_eq!(&left[left.len() - overlap..], &right[..overlap]);
        }
    }

    #[test]
    fn test_empty_document_yields_no_chunks() {
        let chunker = TextChunker::new(10, 2);
        assert!(chunker.split(&doc("")).is_empty());
        assert!(chunker.split(&doc(" \n\n\t ")).is_empty());
    }

    #[test]
    fn test_short_document_is_one_chunk() {
        let chunker = TextChunker::default();
        let body = "Primeiro parágrafo sobre crédito.\n\nSegundo parágrafo sobre limites.";
        let chunks = chunker.split(&doc(body));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, body);
        assert_eq!(chunks[0].token_count, 8);
        assert_eq!(chunks[0].position_index, 0);
    }

    #[test]
    fn test_paragraphs_are_kept_whole_when_they_fit() {
        let chunker = TextChunker::new(12, 2);
        let body = format!("{}\n\n{}\n\n{}", words(6, "a"), words(6, "b"), words(6, "c"));
        let chunks = chunker.split(&doc(&body));

        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].text.starts_with("a0"));
        assert!(chunks[0].text.ends_with("b5"));
        assert!(chunks[1].text.starts_with("b4 b5\n\nc0"));
        assert!(chunks.iter().all(|c| c.token_count <= 12));
        assert_exact_overlap(&chunks, 2);
    }

    #[test]
    fn test_long_paragraph_splits_on_sentences() {
        let chunker = TextChunker::new(10, 2);
        let body = "One two three four five. Six seven eight nine ten. \
                    Eleven twelve thirteen fourteen fifteen.";
        let chunks = chunker.split(&doc(body));

        assert!(chunks.len() >= 2);
        assert!(chunks.iter().all(|c| c.token_count <= 10));
        assert_exact_overlap(&chunks, 2);
        assert!(chunks.last().unwrap().text.ends_with("fifteen."));
    }

    #[test]
    fn test_run_on_text_splits_on_raw_windows() {
        let chunker = TextChunker::new(10, 3);
        let body = words(40, "w");
        let chunks = chunker.split(&doc(&body));

        assert!(chunks.iter().all(|c| c.token_count <= 10));
        assert_exact_overlap(&chunks, 3);
        assert_eq!(chunks[0].text.split_whitespace().next(), Some("w0"));
        assert_eq!(chunks.last().unwrap().text.split_whitespace().last(), Some("w39"));
    }

    #[test]
    fn test_metadata_and_positions() {
        let chunker = TextChunker::new(8, 2);
        let chunks = chunker.split(&doc(&words(30, "x")));
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.position_index as usize, i);
            assert_eq!(chunk.metadata.category, "Política de Crédito");
            assert_eq!(chunk.metadata.source, "credito.txt");
            assert_eq!(chunk.id, Chunk::id_for(chunk.document_id, i as u32));
        }
    }

    #[test]
    fn test_overlap_is_capped() {
        let chunker = TextChunker::new(10, 9);
        assert_eq!(chunker.overlap_tokens(), 4);
        let chunks = chunker.split(&doc(&words(50, "y")));
        assert_exact_overlap(&chunks, 4);
    }

    fn body_strategy() -> impl Strategy<Value = String> {
        let word = "[a-zà-ú]{1,8}[.]?";
        let paragraph = proptest::collection::vec(word, 1..40).prop_map(|w| w.join(" "));
        proptest::collection::vec(paragraph, 1..6).prop_map(|p| p.join("\n\n"))
    }

    proptest! {
        #[test]
        fn prop_budget_overlap_and_coverage(
            body in body_strategy(),
            max_tokens in 6usize..30,
            overlap in 0usize..6,
        ) {
            let chunker = TextChunker::new(max_tokens, overlap);
            let overlap = chunker.overlap_tokens();
            let chunks = chunker.split(&doc(&body));
            let total = count_tokens(&body);

            if total <= max_tokens {
                prop_assert_eq!(chunks.len(), 1);
            }

            let mut rebuilt: Vec<&str> = Vec::new();
            for (i, chunk) in chunks.iter().enumerate() {
                prop_assert!(chunk.token_count <= max_tokens);
                prop_assert_eq!(chunk.token_count, count_tokens(&chunk.text));
                let tokens: Vec<&str> = chunk.text.split_whitespace().collect();
                if i > 0 {
                    let prev: Vec<&str> = chunks[i - 1].text.split_whitespace().collect();
                    prop_assert_eq!(&prev[prev.len() - overlap..], &tokens[..overlap]);
                    rebuilt.extend(&tokens[overlap..]);
                } else {
                    rebuilt.extend(&tokens);
                }
            }
            let original: Vec<&str> = body.split_whitespace().collect();
            prop_assert_eq!(rebuilt, original);
        }
    }
}
