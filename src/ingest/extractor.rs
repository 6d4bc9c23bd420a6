// SPDX-License-Identifier: MIT OR Apache-2.0

//! Keyword-based metadata extractor.
//!
//! Tags each chunk with facet values drawn from the closed vocabulary. Tags
//! come from three places: document-level hints, a keyword lexicon matched
//! against the chunk text, and a few implicit inference rules (a blazer
//! implies a classic, layered look). Candidates outside the vocabulary are
//! dropped and counted instead of failing ingestion.
//!
//! [`confidence`] scores a tag set by which facets it fills, so that rules
//! carrying little styling signal can be held back at ingestion.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::vocabulary::{Facet, TagSet, Vocabulary};

/// Longest lexicon phrase, in words.
const MAX_PHRASE_WORDS: usize = 3;

/// `(facet, phrase, value)` keyword lexicon; phrases are lower-case words
/// separated by single spaces.
const LEXICON: &[(Facet, &str, &str)] = &[
    (Facet::StyleType, "athleisure", "athleisure"),
    (Facet::StyleType, "sporty", "athleisure"),
    (Facet::StyleType, "boho", "boho"),
    (Facet::StyleType, "bohemian", "boho"),
    (Facet::StyleType, "casual", "casual"),
    (Facet::StyleType, "classic", "classic"),
    (Facet::StyleType, "edgy", "edgy"),
    (Facet::StyleType, "formal", "formal"),
    (Facet::StyleType, "minimal", "minimal"),
    (Facet::StyleType, "minimalist", "minimal"),
    (Facet::StyleType, "polished", "polished"),
    (Facet::StyleType, "streetwear", "streetwear"),
    (Facet::StyleType, "street style", "streetwear"),
    (Facet::StyleType, "timeless", "timeless"),
    (Facet::StyleType, "trendy", "trendy"),
    (Facet::Occasion, "party", "party"),
    (Facet::Occasion, "parties", "party"),
    (Facet::Occasion, "office", "office"),
    (Facet::Occasion, "work", "work"),
    (Facet::Occasion, "workplace", "work"),
    (Facet::Occasion, "wedding", "formal"),
    (Facet::Occasion, "formal event", "formal"),
    (Facet::Occasion, "everyday", "everyday"),
    (Facet::Occasion, "daily", "everyday"),
    (Facet::Occasion, "weekend", "weekend"),
    (Facet::Occasion, "casual", "casual"),
    (Facet::Occasion, "workout", "workout"),
    (Facet::Occasion, "gym", "workout"),
    (Facet::Occasion, "beach", "beach_wear"),
    (Facet::Occasion, "beach wear", "beach_wear"),
    (Facet::Technique, "layer", "layering"),
    (Facet::Technique, "layering", "layering"),
    (Facet::Technique, "layered", "layering"),
    (Facet::Technique, "tuck", "tucking"),
    (Facet::Technique, "tucked", "tucking"),
    (Facet::Technique, "accessorize", "accessorizing"),
    (Facet::Technique, "accessories", "accessorizing"),
    (Facet::Technique, "color blocking", "color_blocking"),
    (Facet::Technique, "colour blocking", "color_blocking"),
    (Facet::Technique, "mix and match", "mix_and_match"),
    (Facet::Technique, "monochrome", "monochrome"),
    (Facet::Technique, "monochromatic", "monochrome"),
    (Facet::Technique, "proportions", "proportion_play"),
    (Facet::Season, "spring", "spring"),
    (Facet::Season, "summer", "summer"),
    (Facet::Season, "autumn", "autumn"),
    (Facet::Season, "fall", "autumn"),
    (Facet::Season, "winter", "winter"),
    (Facet::Season, "year round", "all_season"),
    (Facet::Season, "all season", "all_season"),
    (Facet::Color, "white", "white"),
    (Facet::Color, "black", "black"),
    (Facet::Color, "neutral", "neutral"),
    (Facet::Color, "neutrals", "neutral"),
    (Facet::Color, "beige", "beige"),
    (Facet::Color, "earthy", "earthy"),
    (Facet::Color, "earth tones", "earthy"),
    (Facet::Color, "brown", "brown"),
    (Facet::Color, "olive", "olive"),
    (Facet::Color, "pastel", "pastel"),
    (Facet::Color, "pastels", "pastel"),
    (Facet::Color, "bright", "bright"),
    (Facet::Color, "vibrant", "bright"),
    (Facet::Color, "dark", "dark"),
    (Facet::Gender, "women", "female"),
    (Facet::Gender, "womens", "female"),
    (Facet::Gender, "female", "female"),
    (Facet::Gender, "men", "male"),
    (Facet::Gender, "mens", "male"),
    (Facet::Gender, "male", "male"),
    (Facet::Gender, "unisex", "unisex"),
    (Facet::Gender, "non binary", "non_binary"),
];

/// Implicit inference rules: a trigger word implies extra tags.
const INFERENCES: &[(&str, &[(Facet, &str)])] = &[
    ("blazer", &[(Facet::StyleType, "classic"), (Facet::Technique, "layering")]),
    ("jacket", &[(Facet::Technique, "layering")]),
    ("coat", &[(Facet::Technique, "layering")]),
    ("jeans", &[(Facet::StyleType, "classic")]),
    ("denim", &[(Facet::StyleType, "classic")]),
    ("tailored", &[(Facet::StyleType, "polished")]),
];

/// Facet weights for [`confidence`]. Language carries no styling signal.
const CONFIDENCE_WEIGHTS: &[(Facet, f32)] = &[
    (Facet::StyleType, 1.0),
    (Facet::Occasion, 1.0),
    (Facet::Color, 1.0),
    (Facet::Season, 1.0),
    (Facet::Technique, 0.5),
    (Facet::Gender, 0.5),
];

/// Scores how much styling metadata a chunk carries, in `[0, 1]`.
///
/// Each filled facet adds its weight once, however many values it has. The
/// sum is scaled by the total weight and rounded to two decimals.
pub fn confidence(tags: &TagSet) -> f32 {
    let total: f32 = CONFIDENCE_WEIGHTS.iter().map(|(_, w)| w).sum();
    let score: f32 = CONFIDENCE_WEIGHTS
        .iter()
        .filter(|(facet, _)| tags.has_facet(*facet))
        .map(|(_, w)| w)
        .sum();
    ((score / total).min(1.0) * 100.0).round() / 100.0
}

static PHRASES: Lazy<HashMap<&'static str, Vec<(Facet, &'static str)>>> = Lazy::new(|| {
    let mut map: HashMap<&'static str, Vec<(Facet, &'static str)>> = HashMap::new();
    for (facet, phrase, value) in LEXICON {
        map.entry(*phrase).or_default().push((*facet, *value));
    }
    for (trigger, implied) in INFERENCES {
        map.entry(*trigger).or_default().extend_from_slice(implied);
    }
    map
});

/// Tags chunks with closed-vocabulary metadata.
pub struct MetadataExtractor {
    vocabulary: Arc<Vocabulary>,
    default_language: Option<String>,
    rejected: AtomicU64,
}

impl MetadataExtractor {
    pub fn new(vocabulary: Arc<Vocabulary>) -> Self {
        Self {
            vocabulary,
            default_language: None,
            rejected: AtomicU64::new(0),
        }
    }

    /// Language tag used when neither hints nor text provide one.
    pub fn with_default_language(mut self, language: impl Into<String>) -> Self {
        self.default_language = Some(language.into());
        self
    }

    /// Number of candidate tags discarded because they are not in the vocabulary.
    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Extracts the tag set for one chunk.
    pub fn extract(&self, chunk_text: &str, hints: &TagSet) -> TagSet {
        let mut tags = TagSet::new();

        for (facet, value) in hints.iter() {
            self.accept(&mut tags, facet, value);
        }

        for (facet, value) in Self::candidates(chunk_text) {
            self.accept(&mut tags, facet, value);
        }

        // Inferred colours lean minimal.
        if tags.contains(Facet::Color, "white") || tags.contains(Facet::Color, "neutral") {
            self.accept(&mut tags, Facet::StyleType, "minimal");
        }

        if !tags.has_facet(Facet::Language) {
            if let Some(language) = self.default_language.as_deref() {
                self.accept(&mut tags, Facet::Language, language);
            }
        }

        tags
    }

    fn accept(&self, tags: &mut TagSet, facet: Facet, value: &str) {
        if self.vocabulary.allows(facet, value) {
            tags.insert(facet, value);
        } else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(facet = %facet, value, "discarding tag outside vocabulary");
        }
    }

    /// Lexicon and inference candidates for `text`, in text order.
    fn candidates(text: &str) -> Vec<(Facet, &'static str)> {
        let lowered = text.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        let mut found = Vec::new();
        for start in 0..words.len() {
            for len in 1..=MAX_PHRASE_WORDS.min(words.len() - start) {
                let phrase = words[start..start + len].join(" ");
                if let Some(tags) = PHRASES.get(phrase.as_str()) {
                    found.extend_from_slice(tags);
                }
            }
        }
        found
    }
}
