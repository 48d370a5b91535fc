//! Trigram generation for the fuzzy/wildcard fallback index
//!
//! The trigram index is a companion FTS table holding, per document, the
//! space-joined set of 3-grams of its searchable text. Queries against it are
//! assembled here as MATCH expressions over quoted trigram literals.

use crate::normalize::normalize;

/// Hard cap on trigram entries collected per document.
pub const MAX_TRIGRAM_TOKENS: usize = 2048;

/// Collect the unique trigrams of `text` in generation order.
///
/// The text is normalized first. Tokens of three characters or fewer are
/// emitted whole; longer tokens contribute every contiguous 3-character
/// window. Collection stops once `max_tokens` entries were gathered.
#[must_use]
pub fn collect_trigrams(text: &str, max_tokens: usize) -> Vec<String> {
    let normalized = normalize(text);
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();

    'tokens: for token in normalized.split(' ') {
        if token.is_empty() {
            continue;
        }
        let chars: Vec<char> = token.chars().collect();
        if chars.len() <= 3 {
            if seen.insert(token.to_string()) {
                out.push(token.to_string());
            }
        } else {
            for window in chars.windows(3) {
                let gram: String = window.iter().collect();
                if seen.insert(gram.clone()) {
                    out.push(gram);
                }
                if out.len() >= max_tokens {
                    break 'tokens;
                }
            }
        }
        if out.len() >= max_tokens {
            break;
        }
    }

    out
}

/// Sorted unique trigram set of `text`, capped at [`MAX_TRIGRAM_TOKENS`].
#[must_use]
pub fn build_trigrams(text: &str) -> Vec<String> {
    let mut grams = collect_trigrams(text, MAX_TRIGRAM_TOKENS);
    grams.sort_unstable();
    grams
}

/// The space-joined sorted trigram set, as stored in the trigram index.
#[must_use]
pub fn index_text(text: &str) -> String {
    build_trigrams(text).join(" ")
}

/// Quote a trigram literal for use in a MATCH expression.
///
/// Embedded double quotes are doubled. Trigram tokens come from normalized
/// text and so never contain quotes or whitespace, but the escaping keeps
/// the expression well-formed for any input.
fn quote(token: &str) -> String {
    format!("\"{}\"", token.replace('"', "\"\""))
}

/// Build a MATCH expression over the trigrams of `text`.
///
/// `require_all` joins the trigram literals with ` AND ` (every trigram must
/// be present), otherwise with ` OR `. Returns an empty string when nothing
/// survives normalization.
#[must_use]
pub fn build_match(text: &str, require_all: bool) -> String {
    let grams = collect_trigrams(text, MAX_TRIGRAM_TOKENS);
    let joiner = if require_all { " AND " } else { " OR " };
    grams
        .iter()
        .map(|g| quote(g))
        .collect::<Vec<_>>()
        .join(joiner)
}

/// Build a MATCH expression for a wildcard pattern containing `*` / `?`.
///
/// The pattern is split on wildcard characters; segments shorter than two
/// characters are dropped. Each remaining segment contributes an AND-joined
/// trigram sub-expression; sub-expressions are deduplicated by raw string
/// equality preserving order and OR-combined. A single remaining
/// sub-expression is not parenthesized.
#[must_use]
pub fn build_wildcard_match(pattern: &str) -> String {
    let mut sub_exprs: Vec<String> = Vec::new();
    for segment in pattern.split(|c| c == '*' || c == '?') {
        if segment.chars().count() < 2 {
            continue;
        }
        let expr = build_match(segment, true);
        if expr.is_empty() || sub_exprs.contains(&expr) {
            continue;
        }
        sub_exprs.push(expr);
    }

    match sub_exprs.len() {
        0 => String::new(),
        1 => sub_exprs.remove(0),
        _ => sub_exprs
            .iter()
            .map(|e| {
                if e.contains(" AND ") {
                    format!("({e})")
                } else {
                    e.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(" OR "),
    }
}
