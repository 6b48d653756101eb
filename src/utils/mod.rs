//! Utility modules

pub mod fuzzy;

pub use fuzzy::{find_best_match, normalize_tag, primary_subtag, words, FuzzyMatch};
