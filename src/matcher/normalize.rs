//! Text canonicalization for keyword comparison.
//!
//! Mail bodies arrive with mixed casing, accents, punctuation, and ragged
//! whitespace. Everything that enters the matcher goes through `normalize`
//! first so that `"¡Tachó!"` and `"tacho"` compare equal.

use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Canonicalize text for comparison.
///
/// Steps, in order: lowercase; canonical decomposition with combining marks
/// dropped (accented letters fold to their base letter); every character
/// that is not a lowercase ASCII letter, digit, or whitespace becomes a
/// space; whitespace runs collapse to a single space; leading/trailing
/// whitespace is trimmed.
///
/// Total over any input. Idempotent: normalizing an already-normalized
/// string is a no-op.
pub fn normalize(text: &str) -> String {
    let folded: String = text
        .to_lowercase()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();

    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split text into word tokens after normalization.
///
/// Empty input yields a single empty token; the matcher skips empty tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    normalize(text).split(' ').map(str::to_owned).collect()
}
