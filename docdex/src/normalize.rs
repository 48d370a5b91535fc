//! Text normalization for trigram generation and term canonicalization
//!
//! The inverted index relies on the store's `unicode61 remove_diacritics 2`
//! tokenizer; this module provides the matching code-side canonical form so
//! that trigram generation and synonym lookups agree with what the index
//! tokenized.

use unicode_normalization::UnicodeNormalization;

/// Produce the canonical form of `text`:
///
/// - decompose to NFD and drop combining marks (diacritics)
/// - lowercase letters and digits
/// - keep `_`, `-`, `.` as word characters
/// - collapse every other character run into a single space
/// - trim leading/trailing whitespace
///
/// Normalization is idempotent: `normalize(normalize(t)) == normalize(t)`.
#[must_use]
pub fn normalize(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut pending_space = false;

    for ch in text.nfd() {
        // Combining marks are the separated diacritics after NFD.
        if is_combining_mark(ch) {
            continue;
        }
        if ch.is_alphanumeric() || matches!(ch, '_' | '-' | '.') {
            if pending_space && !result.is_empty() {
                result.push(' ');
            }
            pending_space = false;
            for lower in ch.to_lowercase() {
                result.push(lower);
            }
        } else {
            pending_space = true;
        }
    }

    result
}

/// Normalize `text` and return its first whitespace-separated token, or
/// `None` when nothing survives normalization.
#[must_use]
pub fn extract_single_token(text: &str) -> Option<String> {
    let normalized = normalize(text);
    normalized
        .split_whitespace()
        .next()
        .map(std::string::ToString::to_string)
}

/// Whether `ch` is a Unicode combining mark (category Mn/Mc/Me).
///
/// `char::is_alphanumeric` returns false for Mn marks, but we must skip them
/// explicitly so they neither emit characters nor break words apart.
fn is_combining_mark(ch: char) -> bool {
    // The combining-diacritical blocks cover what `remove_diacritics 2`
    // strips for Latin, Greek, and Cyrillic text.
    matches!(ch,
        '\u{0300}'..='\u{036F}'
        | '\u{1AB0}'..='\u{1AFF}'
        | '\u{1DC0}'..='\u{1DFF}'
        | '\u{20D0}'..='\u{20FF}'
        | '\u{FE20}'..='\u{FE2F}')
}
