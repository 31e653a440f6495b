//! Search phrase handling
//!
//! Turns free text typed by the user into an FTS5 MATCH expression for the
//! trigram index over file names.

/// Characters removed from a phrase before it reaches FTS5
const STRIPPED_CHARS: &[char] = &['"', '\'', '.', '*', '%', '&'];

/// Shortest term a trigram index can match
const MIN_TERM_CHARS: usize = 3;

/// Replace FTS-special characters with spaces and trim the result.
///
/// `"kick*.wav"` becomes `kick wav`.
pub fn sanitize_phrase(phrase: &str) -> String {
    let cleaned: String = phrase
        .chars()
        .map(|c| if STRIPPED_CHARS.contains(&c) { ' ' } else { c })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Build the MATCH expression for `phrase`, or `None` when nothing
/// searchable is left after sanitizing.
///
/// Every term is quoted so punctuation such as `-` or `(` is matched
/// literally, and terms are ANDed. Terms shorter than three characters are
/// dropped while a longer term remains, since they can never match.
pub fn build_match_expression(phrase: &str) -> Option<String> {
    let sanitized = sanitize_phrase(phrase);
    let terms: Vec<&str> = sanitized.split_whitespace().collect();
    if terms.is_empty() {
        return None;
    }

    let long_terms: Vec<&str> = terms
        .iter()
        .copied()
        .filter(|t| t.chars().count() >= MIN_TERM_CHARS)
        .collect();
    let terms = if long_terms.is_empty() { terms } else { long_terms };

    Some(
        terms
            .iter()
            .map(|t| format!("\"{}\"", t))
            .collect::<Vec<_>>()
            .join(" "),
    )
}
