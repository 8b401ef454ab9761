//! Citation marker parsing

use regex::Regex;
use std::sync::OnceLock;

use super::prompt::REFUSAL_SENTENCE;

fn marker_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[(\d+(?:\s*,\s*\d+)*)\]").expect("Invalid regex"))
}

/// Markers cited in `answer`, deduplicated in order of first use.
///
/// Numbers outside `1..=max_marker` are dropped.
pub fn cited_markers(answer: &str, max_marker: usize) -> Vec<usize> {
    let mut markers = Vec::new();
    for cap in marker_pattern().captures_iter(answer) {
        let Some(list) = cap.get(1) else { continue };
        for number in list.as_str().split(',') {
            let Ok(marker) = number.trim().parse::<usize>() else {
                continue;
            };
            if (1..=max_marker).contains(&marker) && !markers.contains(&marker) {
                markers.push(marker);
            }
        }
    }
    markers
}

/// Remove `[n]` markers and the space before them
pub fn strip_markers(text: &str) -> String {
    let stripped = marker_pattern().replace_all(text, "");
    stripped
        .split(' ')
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .replace(" .", ".")
        .replace(" ,", ",")
}

/// Whether a model reply declines to answer
pub fn is_refusal(reply: &str) -> bool {
    let refusal = REFUSAL_SENTENCE.trim_end_matches('.').to_lowercase();
    reply.to_lowercase().contains(&refusal)
}

/// Truncate snippet to a maximum length while preserving word boundaries
pub fn truncate_snippet(snippet: &str, max_len: usize) -> String {
    if snippet.len() <= max_len {
        return snippet.to_string();
    }

    let mut end = max_len;
    while end > 0 && !snippet.is_char_boundary(end) {
        end -= 1;
    }

    if let Some(pos) = snippet[..end].rfind(' ') {
        return format!("{}...", &snippet[..pos]);
    }

    format!("{}...", &snippet[..end])
}
