//! Fuzzy matching utilities
//!
//! Loose matching of language tags and voice names, used where voice
//! catalogs label languages inconsistently ("si_LK", "Sinhala", "sin").

use strsim::normalized_levenshtein;

/// Result of a fuzzy match with the matched value and score
#[derive(Debug, Clone)]
pub struct FuzzyMatch {
    pub value: String,
    pub score: f64,
}

/// Normalize a BCP-47-ish language tag: lowercase, `_` -> `-`, trimmed
pub fn normalize_tag(tag: &str) -> String {
    tag.trim().to_lowercase().replace('_', "-")
}

/// Primary language subtag (`si` for `si-LK`)
pub fn primary_subtag(tag: &str) -> String {
    normalize_tag(tag)
        .split('-')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Split a voice name or tag into lowercase words
pub fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Best candidate scoring at least `cutoff`. Exact (case-insensitive)
/// matches score 1.0; ties keep candidate order.
pub fn find_best_match(
    search_term: &str,
    candidates: &[String],
    cutoff: f64,
) -> Option<FuzzyMatch> {
    let search_lower = search_term.to_lowercase();

    let mut best: Option<FuzzyMatch> = None;
    for candidate in candidates {
        let score = normalized_levenshtein(&search_lower, &candidate.to_lowercase());
        if score < cutoff {
            continue;
        }
        if best.as_ref().map_or(true, |b| score > b.score) {
            best = Some(FuzzyMatch {
                value: candidate.clone(),
                score,
            });
        }
    }

    best
}
