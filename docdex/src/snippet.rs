//! Snippet hydration
//!
//! The FTS index is contentless, so snippets cannot come from the store's
//! snippet function; hits are hydrated in code from the mirror row's title
//! and metadata text. Highlights are char-indexed, the snippet window is
//! centered on the densest highlight cluster, and whitespace is normalized
//! with a position mapping so highlight ranges survive the rewrite.

use crate::models::{HighlightRange, SnippetData};

/// Context chars to include before/after a match in a snippet.
pub const SNIPPET_CONTEXT_CHARS: usize = 100;

/// Maximum snippet length handed to callers.
pub const SNIPPET_MAX_CHARS: usize = SNIPPET_CONTEXT_CHARS * 2;

/// Tokenize text into words with char offsets. Whitespace separates tokens;
/// punctuation runs form their own tokens so offsets stay contiguous.
fn tokenize_words(content: &str) -> Vec<(usize, usize, String)> {
    let chars: Vec<char> = content.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        if chars[i].is_whitespace() {
            i += 1;
            continue;
        }
        let start = i;
        if chars[i].is_alphanumeric() {
            while i < chars.len() && chars[i].is_alphanumeric() {
                i += 1;
            }
        } else {
            while i < chars.len() && !chars[i].is_alphanumeric() && !chars[i].is_whitespace() {
                i += 1;
            }
        }
        let token: String = chars[start..i].iter().collect();
        tokens.push((start, i, token));
    }
    tokens
}

/// Terms to highlight, extracted from a MATCH expression: operators, field
/// prefixes, and grouping are stripped; quoted phrases split into words.
/// A trailing `*` marks the term as a prefix match.
#[must_use]
pub fn highlight_terms(match_expr: &str) -> Vec<String> {
    let mut terms = Vec::new();
    let mut rest = match_expr;
    while !rest.is_empty() {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || matches!(c, '(' | ')' | ','));
        if rest.is_empty() {
            break;
        }
        if let Some(after_quote) = rest.strip_prefix('"') {
            let end = after_quote.find('"').unwrap_or(after_quote.len());
            for word in after_quote[..end].split_whitespace() {
                push_term(&mut terms, word);
            }
            rest = &after_quote[end.min(after_quote.len())..];
            rest = rest.strip_prefix('"').unwrap_or(rest);
        } else {
            let end = rest
                .find(|c: char| c.is_whitespace() || matches!(c, '(' | ')' | '"' | ','))
                .unwrap_or(rest.len());
            let raw = &rest[..end];
            let token = raw.rsplit(':').next().unwrap_or(raw);
            if !matches!(token, "AND" | "OR" | "NOT" | "NEAR")
                && !token.chars().all(|c| c.is_ascii_digit())
            {
                push_term(&mut terms, token);
            }
            rest = &rest[end..];
        }
    }
    terms
}

fn push_term(terms: &mut Vec<String>, raw: &str) {
    let term = raw.trim().to_lowercase();
    if !term.is_empty() && !terms.contains(&term) {
        terms.push(term);
    }
}

/// Find char ranges of words matching the given terms (exact, or prefix for
/// terms ending in `*`).
#[must_use]
pub fn find_highlights(content: &str, terms: &[String]) -> Vec<HighlightRange> {
    let mut ranges = Vec::new();
    for (start, end, word) in tokenize_words(content) {
        let word_lower = word.to_lowercase();
        for term in terms {
            let matched = match term.strip_suffix('*') {
                Some(stem) => !stem.is_empty() && word_lower.starts_with(stem),
                None => word_lower == *term,
            };
            if matched {
                ranges.push(HighlightRange {
                    start: start as u64,
                    end: end as u64,
                });
                break;
            }
        }
    }
    ranges
}

/// The highlight at the center of the densest cluster, by sliding window.
fn find_densest_highlight(highlights: &[HighlightRange], window_size: u64) -> Option<usize> {
    if highlights.is_empty() {
        return None;
    }
    if highlights.len() == 1 {
        return Some(0);
    }

    let mut indexed: Vec<(usize, &HighlightRange)> = highlights.iter().enumerate().collect();
    indexed.sort_by_key(|(_, h)| h.start);

    let mut left = 0;
    let mut best_left = 0;
    let mut best_coverage = 0u64;
    let mut current_coverage = 0u64;

    for right in 0..indexed.len() {
        while indexed[left].1.start + window_size <= indexed[right].1.start {
            current_coverage -= indexed[left].1.end - indexed[left].1.start;
            left += 1;
        }
        current_coverage += indexed[right].1.end - indexed[right].1.start;

        if current_coverage > best_coverage {
            best_coverage = current_coverage;
            best_left = left;
        }
    }

    Some(indexed[best_left].0)
}

/// Build the snippet for a hit from its searchable text and highlight terms.
#[must_use]
pub fn hydrate(content: &str, terms: &[String]) -> SnippetData {
    let highlights = find_highlights(content, terms);
    let (text, adjusted) = generate_snippet(content, &highlights, SNIPPET_MAX_CHARS);
    SnippetData {
        text,
        highlights: adjusted,
    }
}

/// Generate a snippet around the densest cluster of highlights. Returns the
/// normalized snippet text and the highlight ranges remapped into it.
#[must_use]
pub fn generate_snippet(
    content: &str,
    highlights: &[HighlightRange],
    max_len: usize,
) -> (String, Vec<HighlightRange>) {
    let content_char_len = content.chars().count();

    if highlights.is_empty() {
        let preview = normalize_snippet(content, 0, content_char_len, max_len);
        return (preview, Vec::new());
    }

    let center_idx =
        find_densest_highlight(highlights, SNIPPET_CONTEXT_CHARS as u64).unwrap_or(0);
    let center = &highlights[center_idx];
    let match_start_char = center.start as usize;
    let match_end_char = center.end as usize;

    let match_char_len = match_end_char.saturating_sub(match_start_char);
    let remaining_space = max_len.saturating_sub(match_char_len);

    let context_before = (remaining_space / 2)
        .min(SNIPPET_CONTEXT_CHARS)
        .min(match_start_char);
    let context_after =
        (remaining_space - context_before).min(content_char_len.saturating_sub(match_end_char));

    let mut snippet_start_char = match_start_char - context_before;
    let snippet_end_char = (match_end_char + context_after).min(content_char_len);

    // Nudge the start to a word boundary when one is close.
    if snippet_start_char > 0 {
        let search_start_char = snippet_start_char.saturating_sub(10);
        let search_range: String = content
            .chars()
            .skip(search_start_char)
            .take(snippet_start_char - search_start_char)
            .collect();
        if let Some(space_pos) = search_range.rfind(char::is_whitespace) {
            if search_range.is_char_boundary(space_pos) {
                let char_offset = search_range[..space_pos].chars().count();
                let new_start = search_start_char + char_offset + 1;
                if new_start <= match_start_char.saturating_sub(context_before) {
                    snippet_start_char = new_start;
                }
            }
        }
    }

    let ellipsis_reserve = usize::from(snippet_start_char > 0)
        + usize::from(snippet_end_char < content_char_len);
    let effective_max_len = max_len.saturating_sub(ellipsis_reserve);
    let (normalized_snippet, pos_map) =
        normalize_snippet_with_mapping(content, snippet_start_char, snippet_end_char, effective_max_len);

    let truncated_from_start = snippet_start_char > 0;
    let truncated_from_end = snippet_end_char < content_char_len;

    let prefix_offset = usize::from(truncated_from_start);
    let mut final_snippet = if truncated_from_start {
        format!("\u{2026}{normalized_snippet}")
    } else {
        normalized_snippet.clone()
    };
    if truncated_from_end {
        final_snippet.push('\u{2026}');
    }

    let adjusted_highlights: Vec<HighlightRange> = highlights
        .iter()
        .filter_map(|h| {
            let orig_start = (h.start as usize).checked_sub(snippet_start_char)?;
            let orig_end = (h.end as usize).saturating_sub(snippet_start_char);

            let norm_start = map_position(orig_start, &pos_map)?;
            let norm_end = map_position(orig_end, &pos_map).unwrap_or(normalized_snippet.len());

            if norm_start < normalized_snippet.chars().count() {
                Some(HighlightRange {
                    start: (norm_start + prefix_offset) as u64,
                    end: (norm_end.min(normalized_snippet.chars().count()) + prefix_offset) as u64,
                })
            } else {
                None
            }
        })
        .collect();

    (final_snippet, adjusted_highlights)
}

/// Normalize a snippet window and return the original-to-normalized char
/// position mapping. Newlines/tabs become spaces; space runs collapse.
fn normalize_snippet_with_mapping(
    content: &str,
    start: usize,
    end: usize,
    max_chars: usize,
) -> (String, Vec<usize>) {
    if end <= start {
        return (String::new(), vec![0]);
    }

    let mut result = String::with_capacity(max_chars);
    let mut pos_map = Vec::with_capacity(end - start + 1);
    let mut last_was_space = false;
    let mut norm_idx = 0;

    for ch in content.chars().skip(start).take(end - start) {
        pos_map.push(norm_idx);

        if norm_idx >= max_chars {
            continue;
        }

        let ch = match ch {
            '\n' | '\t' | '\r' => ' ',
            c => c,
        };

        if ch == ' ' {
            if last_was_space {
                continue;
            }
            last_was_space = true;
        } else {
            last_was_space = false;
        }

        result.push(ch);
        norm_idx += 1;
    }

    pos_map.push(norm_idx);

    if result.ends_with(' ') {
        result.pop();
    }

    (result, pos_map)
}

fn map_position(orig_pos: usize, pos_map: &[usize]) -> Option<usize> {
    pos_map.get(orig_pos).copied()
}

fn normalize_snippet(content: &str, start: usize, end: usize, max_chars: usize) -> String {
    normalize_snippet_with_mapping(content, start, end, max_chars).0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hr(start: u64, end: u64) -> HighlightRange {
        HighlightRange { start, end }
    }

    #[test]
    fn terms_from_simple_match() {
        assert_eq!(
            highlight_terms("(title:report AND author:\"alice smith\")"),
            vec!["report", "alice", "smith"]
        );
    }

    #[test]
    fn terms_skip_operators_and_distances() {
        assert_eq!(
            highlight_terms("title:NEAR(\"annual\" \"report\", 3)"),
            vec!["annual", "report"]
        );
        assert_eq!(highlight_terms("NOT (draft)"), vec!["draft"]);
    }

    #[test]
    fn terms_keep_prefix_star() {
        assert_eq!(highlight_terms("repo*"), vec!["repo*"]);
    }

    #[test]
    fn terms_dedupe() {
        assert_eq!(
            highlight_terms("(report OR report OR summary)"),
            vec!["report", "summary"]
        );
    }

    #[test]
    fn highlights_exact_and_prefix() {
        let ranges = find_highlights(
            "Annual reporting cycle report",
            &["report".to_string(), "annual".to_string()],
        );
        // "reporting" is not an exact match; "report" and "Annual" are.
        assert_eq!(ranges, vec![hr(0, 6), hr(23, 29)]);

        let prefix = find_highlights("Annual reporting cycle", &["report*".to_string()]);
        assert_eq!(prefix, vec![hr(7, 16)]);
    }

    #[test]
    fn snippet_contains_match_mid_content() {
        let content = "The quick brown fox jumps over the lazy dog and runs away fast";
        let (snippet, adj) = generate_snippet(content, &[hr(35, 39)], 30);
        assert!(snippet.contains("lazy"));
        let h = &adj[0];
        let highlighted: String = snippet
            .chars()
            .skip(h.start as usize)
            .take((h.end - h.start) as usize)
            .collect();
        assert_eq!(highlighted, "lazy");
    }

    #[test]
    fn snippet_normalizes_whitespace() {
        let content = "Line one\n\nLine two";
        let (snippet, adj) = generate_snippet(content, &[hr(0, 4)], 50);
        assert!(!snippet.contains('\n'));
        assert!(!snippet.contains("  "));
        let h = &adj[0];
        let highlighted: String = snippet
            .chars()
            .skip(h.start as usize)
            .take((h.end - h.start) as usize)
            .collect();
        assert_eq!(highlighted, "Line");
    }

    #[test]
    fn snippet_centers_on_densest_cluster() {
        let mut content = "x".repeat(10);
        content.push_str("LONE");
        content.push_str(&"y".repeat(500));
        content.push_str("ONE two THREE");
        let highlights = vec![hr(10, 14), hr(514, 517), hr(522, 527)];
        let (snippet, _) = generate_snippet(&content, &highlights, 60);
        assert!(snippet.contains("ONE"), "got: {snippet}");
        assert!(snippet.contains("THREE"));
    }

    #[test]
    fn snippet_handles_multibyte_chars() {
        let content = "Hello \u{4f60}\u{597d} world";
        let (snippet, adj) = generate_snippet(content, &[hr(6, 8)], 50);
        assert!(snippet.contains("\u{4f60}\u{597d}"));
        let h = &adj[0];
        let highlighted: String = snippet
            .chars()
            .skip(h.start as usize)
            .take((h.end - h.start) as usize)
            .collect();
        assert_eq!(highlighted, "\u{4f60}\u{597d}");
    }

    #[test]
    fn hydrate_produces_highlighted_snippet() {
        let data = hydrate(
            "Quarterly earnings report for the board",
            &["report".to_string()],
        );
        assert!(data.text.contains("report"));
        assert_eq!(data.highlights.len(), 1);
    }

    #[test]
    fn no_highlights_yields_plain_preview() {
        let data = hydrate("Nothing matches here", &["zebra".to_string()]);
        assert_eq!(data.text, "Nothing matches here");
        assert!(data.highlights.is_empty());
    }
}
