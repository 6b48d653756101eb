//! Voice Resolver
//!
//! Picks a synthesis voice for a target language from whatever catalog
//! the local synthesizer reports. Catalogs are often thin for languages
//! such as Sinhala or Tamil, so matching degrades from exact tag, to
//! language family, to name heuristics, and finally to the reference
//! language.

use crate::error::{CalloutError, CalloutResult};
use crate::utils::fuzzy::{find_best_match, normalize_tag, primary_subtag, words};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// A voice as listed by the local synthesizer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceCatalogEntry {
    pub id: String,
    pub language: String,
    pub name: String,
    /// Marked as the synthesizer's default voice
    #[serde(default)]
    pub default: bool,
}

impl VoiceCatalogEntry {
    pub fn new(id: &str, language: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            language: language.to_string(),
            name: name.to_string(),
            default: false,
        }
    }

    pub fn as_default(mut self) -> Self {
        self.default = true;
        self
    }
}

/// Which rule produced the choice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Family,
    Heuristic,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceChoice {
    pub voice_id: String,
    pub language: String,
    pub match_kind: MatchKind,
    /// Target language had no voice; pronunciation fidelity is reduced
    pub using_fallback_language: bool,
}

lazy_static! {
    /// Region assumed for a bare language code when looking for an exact tag
    static ref CANONICAL_REGION: HashMap<&'static str, &'static str> = HashMap::from([
        ("si", "lk"),
        ("ta", "lk"),
        ("dv", "mv"),
    ]);

    /// Names and endonyms that identify a language in catalogs that do
    /// not tag it properly. Matched against voice names.
    static ref LANGUAGE_NAMES: HashMap<&'static str, &'static [&'static str]> = HashMap::from([
        ("si", &["sinhala", "sinhalese", "සිංහල"][..]),
        ("ta", &["tamil", "தமிழ்"][..]),
        ("dv", &["dhivehi", "divehi", "maldivian"][..]),
        ("ne", &["nepali", "नेपाली"][..]),
        ("my", &["burmese", "myanmar"][..]),
        ("km", &["khmer", "cambodian"][..]),
        ("lo", &["lao", "laotian"][..]),
        ("hi", &["hindi", "हिन्दी"][..]),
        ("bn", &["bengali", "bangla"][..]),
        ("ur", &["urdu"][..]),
        ("ml", &["malayalam"][..]),
        ("te", &["telugu"][..]),
    ]);

    /// ISO 639-2 codes. Only meaningful inside a language tag: "Ben" is a
    /// voice name, not Bengali.
    static ref LANGUAGE_CODES: HashMap<&'static str, &'static [&'static str]> = HashMap::from([
        ("si", &["sin"][..]),
        ("ta", &["tam"][..]),
        ("dv", &["div"][..]),
        ("ne", &["nep"][..]),
        ("my", &["bur", "mya"][..]),
        ("km", &["khm"][..]),
        ("lo", &["lao"][..]),
        ("hi", &["hin"][..]),
        ("bn", &["ben"][..]),
        ("ur", &["urd"][..]),
        ("ml", &["mal"][..]),
        ("te", &["tel"][..]),
    ]);
}

const NAME_SIMILARITY_CUTOFF: f64 = 0.8;

/// Resolves voices against a reference language used as last resort
#[derive(Debug, Clone)]
pub struct VoiceResolver {
    reference_language: String,
}

impl Default for VoiceResolver {
    fn default() -> Self {
        Self::new("en")
    }
}

impl VoiceResolver {
    pub fn new(reference_language: &str) -> Self {
        Self {
            reference_language: normalize_tag(reference_language),
        }
    }

    pub fn reference_language(&self) -> &str {
        &self.reference_language
    }

    /// Pick the best voice for `language`. First matching rule wins:
    /// exact tag, family prefix, name heuristic, reference-language
    /// fallback. An empty catalog is `NoVoiceAvailable`.
    pub fn resolve(
        &self,
        language: &str,
        catalog: &[VoiceCatalogEntry],
    ) -> CalloutResult<VoiceChoice> {
        if catalog.is_empty() {
            return Err(CalloutError::NoVoiceAvailable);
        }

        let wanted = normalize_tag(language);
        if !wanted.is_empty() {
            if let Some(entry) = exact_match(&wanted, catalog) {
                return Ok(choice(entry, MatchKind::Exact, false));
            }
            if let Some(entry) = family_match(&wanted, catalog) {
                return Ok(choice(entry, MatchKind::Family, false));
            }
            if let Some(entry) = heuristic_match(&wanted, catalog) {
                return Ok(choice(entry, MatchKind::Heuristic, false));
            }
        }

        debug!(
            "🗣️ No voice for '{}', falling back to reference language '{}'",
            language, self.reference_language
        );
        let entry = catalog
            .iter()
            .find(|e| e.default)
            .or_else(|| exact_match(&self.reference_language, catalog))
            .or_else(|| family_match(&self.reference_language, catalog))
            .unwrap_or(&catalog[0]);

        Ok(choice(entry, MatchKind::Fallback, true))
    }
}

/// Resolve with the default reference language (`en`)
pub fn resolve(language: &str, catalog: &[VoiceCatalogEntry]) -> CalloutResult<VoiceChoice> {
    VoiceResolver::default().resolve(language, catalog)
}

fn choice(entry: &VoiceCatalogEntry, match_kind: MatchKind, fallback: bool) -> VoiceChoice {
    VoiceChoice {
        voice_id: entry.id.clone(),
        language: entry.language.clone(),
        match_kind,
        using_fallback_language: fallback,
    }
}

fn exact_match<'a>(wanted: &str, catalog: &'a [VoiceCatalogEntry]) -> Option<&'a VoiceCatalogEntry> {
    if let Some(entry) = catalog.iter().find(|e| normalize_tag(&e.language) == wanted) {
        return Some(entry);
    }

    // Bare code: accept the canonical regional tag (`si` -> `si-LK`)
    if !wanted.contains('-') {
        if let Some(region) = CANONICAL_REGION.get(wanted) {
            let regional = format!("{}-{}", wanted, region);
            return catalog
                .iter()
                .find(|e| normalize_tag(&e.language) == regional);
        }
    }
    None
}

fn family_match<'a>(
    wanted: &str,
    catalog: &'a [VoiceCatalogEntry],
) -> Option<&'a VoiceCatalogEntry> {
    let family = primary_subtag(wanted);
    let mut members = catalog
        .iter()
        .filter(|e| primary_subtag(&e.language) == family);

    let first = members.next()?;
    if first.default {
        return Some(first);
    }
    members.find(|e| e.default).or(Some(first))
}

fn heuristic_match<'a>(
    wanted: &str,
    catalog: &'a [VoiceCatalogEntry],
) -> Option<&'a VoiceCatalogEntry> {
    let family = primary_subtag(wanted);
    let names: &[&str] = LANGUAGE_NAMES.get(family.as_str()).copied().unwrap_or_default();
    let codes: &[&str] = LANGUAGE_CODES.get(family.as_str()).copied().unwrap_or_default();
    if names.is_empty() && codes.is_empty() {
        return None;
    }

    // Tag written as a code or a name ("sin", "sinhala")
    let tagged = catalog.iter().find(|e| {
        words(&e.language)
            .iter()
            .any(|w| codes.contains(&w.as_str()) || names.contains(&w.as_str()))
    });
    if tagged.is_some() {
        return tagged;
    }

    // Language named in the voice name
    let named = catalog
        .iter()
        .find(|e| words(&e.name).iter().any(|w| names.contains(&w.as_str())));
    if named.is_some() {
        return named;
    }

    // Misspelled names ("Sinhalla", "Tamill")
    let name_list: Vec<String> = names.iter().map(|n| n.to_string()).collect();
    catalog.iter().find(|e| {
        words(&e.name)
            .iter()
            .filter(|w| w.chars().count() > 3)
            .any(|w| find_best_match(w, &name_list, NAME_SIMILARITY_CUTOFF).is_some())
    })
}
