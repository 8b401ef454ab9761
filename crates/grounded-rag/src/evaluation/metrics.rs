//! Claim extraction and scoring helpers

use unicode_segmentation::UnicodeSegmentation;

use crate::generation::strip_markers;

/// Minimum words for a sentence to count as a claim
const MIN_CLAIM_WORDS: usize = 3;

/// Split text into claims: sentences of at least three words, citation markers removed.
///
/// When no sentence is long enough every non-empty sentence is a claim.
pub fn extract_claims(text: &str) -> Vec<String> {
    let cleaned = strip_markers(text);
    let sentences: Vec<String> = cleaned
        .unicode_sentences()
        .map(str::trim)
        .filter(|s| s.chars().any(char::is_alphanumeric))
        .map(str::to_string)
        .collect();

    let claims: Vec<String> = sentences
        .iter()
        .filter(|s| s.split_whitespace().count() >= MIN_CLAIM_WORDS)
        .cloned()
        .collect();

    if claims.is_empty() {
        sentences
    } else {
        claims
    }
}

/// `part / total`, or 0.0 when `total` is zero
pub fn fraction(part: usize, total: usize) -> f32 {
    if total == 0 {
        0.0
    } else {
        part as f32 / total as f32
    }
}

/// Average precision over a ranked relevance list; 0.0 when nothing is relevant
pub fn average_precision(relevance: &[bool]) -> f32 {
    let mut hits = 0usize;
    let mut sum = 0.0f32;
    for (rank, relevant) in relevance.iter().enumerate() {
        if *relevant {
            hits += 1;
            sum += hits as f32 / (rank + 1) as f32;
        }
    }
    if hits == 0 {
        0.0
    } else {
        sum / hits as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_claims() {
        let claims = extract_claims("O limite é anual [1]. Sim. A revisão ocorre em março [2].");
        assert_eq!(claims, vec!["O limite é anual.", "A revisão ocorre em março."]);
    }

    #[test]
    fn test_short_sentences_fall_back() {
        assert_eq!(extract_claims("Sim. Anual."), vec!["Sim.", "Anual."]);
        assert!(extract_claims("   ").is_empty());
    }

    #[test]
    fn test_average_precision_rewards_early_hits() {
        assert!((average_precision(&[true, false, false]) - 1.0).abs() < 1e-6);
        assert!((average_precision(&[false, true]) - 0.5).abs() < 1e-6);
        assert!((average_precision(&[true, false, true]) - (1.0 + 2.0 / 3.0) / 2.0).abs() < 1e-6);
        assert_eq!(average_precision(&[false, false]), 0.0);
        assert_eq!(average_precision(&[]), 0.0);
    }

    #[test]
    fn test_fraction() {
        assert_eq!(fraction(0, 0), 0.0);
        assert!((fraction(1, 4) - 0.25).abs() < 1e-6);
    }
}
