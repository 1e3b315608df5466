//! Keyword matching engine — exact and fuzzy catalog lookups over mail text.
//!
//! Flow: normalize the catalog keys, tokenize the body, then scan every
//! (keyword, token) pair in catalog order. A token that equals a keyword, or
//! is a word fragment of a multi-word keyword, short-circuits the whole
//! search with full confidence. Otherwise the closest token within the edit
//! distance bound wins as a fuzzy hit.

pub mod distance;
pub mod normalize;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use distance::levenshtein;
use normalize::{normalize, tokenize};

/// A successful catalog hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordMatch {
    /// The catalog key in normalized form.
    pub keyword: String,
    /// The catalog key in its original casing, for display and price lookup.
    pub original_key: String,
    /// The body token that produced the hit.
    pub matched_token: String,
    /// Match strength in (0, 1]. Exact and substring hits score 1.0; fuzzy
    /// hits score `1 - distance / keyword_length`, kept strictly positive.
    pub confidence: f32,
}

/// Outcome of a matching pass over one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum MatchOutcome {
    /// The body references a catalog entry.
    Match(KeywordMatch),
    /// No catalog entry was close enough.
    NoMatch,
}

impl MatchOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Match(_))
    }

    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Match(_) => "match",
            Self::NoMatch => "no_match",
        }
    }
}

/// Matches message text against catalog keywords.
#[derive(Debug, Clone)]
pub struct KeywordMatcher {
    max_distance: usize,
}

impl KeywordMatcher {
    /// Default edit distance bound: tolerate single-character typos only.
    pub const DEFAULT_MAX_DISTANCE: usize = 1;

    pub fn new(max_distance: usize) -> Self {
        Self { max_distance }
    }

    /// Find the best catalog match in `body`.
    ///
    /// Exact and substring hits short-circuit in catalog order and are never
    /// superseded. Fuzzy candidates must beat the best distance seen so far
    /// strictly; the first candidate wins ties at equal distance. An empty
    /// catalog yields `NoMatch` for any input. Never errors.
    pub fn detect(&self, body: &str, catalog: &Catalog) -> MatchOutcome {
        if catalog.is_empty() {
            return MatchOutcome::NoMatch;
        }

        // Normalized keyword -> original key. When two keys normalize
        // identically, the later one in catalog iteration order wins (the
        // collision is warned about at catalog load).
        let mut originals: HashMap<String, &str> = HashMap::new();
        let mut keywords: Vec<String> = Vec::with_capacity(catalog.len());
        for (key, _) in catalog.iter() {
            let norm = normalize(key);
            if norm.is_empty() {
                continue;
            }
            originals.insert(norm.clone(), key.as_str());
            keywords.push(norm);
        }

        let tokens = tokenize(body);

        let mut best: Option<(usize, KeywordMatch)> = None;

        for keyword in &keywords {
            for token in &tokens {
                if token.is_empty() {
                    continue;
                }

                // Exact hit, or the token is a word fragment of a longer
                // keyword ("tacho" inside "tacho 20l").
                if token == keyword || keyword.contains(token.as_str()) {
                    return MatchOutcome::Match(KeywordMatch {
                        keyword: keyword.clone(),
                        original_key: originals[keyword].to_owned(),
                        matched_token: token.clone(),
                        confidence: 1.0,
                    });
                }

                let dist = levenshtein(token, keyword);
                if dist <= self.max_distance
                    && best.as_ref().is_none_or(|(b, _)| dist < *b)
                {
                    let len = keyword.chars().count();
                    // Stays strictly positive even when the distance equals
                    // the keyword length.
                    let confidence =
                        (1.0 - dist as f32 / len as f32).max(f32::EPSILON);
                    best = Some((
                        dist,
                        KeywordMatch {
                            keyword: keyword.clone(),
                            original_key: originals[keyword].to_owned(),
                            matched_token: token.clone(),
                            confidence,
                        },
                    ));
                }
            }
        }

        match best {
            Some((_, hit)) => MatchOutcome::Match(hit),
            None => MatchOutcome::NoMatch,
        }
    }
}

impl Default for KeywordMatcher {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_DISTANCE)
    }
}
