// SPDX-License-Identifier: MIT OR Apache-2.0

//! Closed, versioned metadata vocabulary.
//!
//! Facet names are fixed in code ([`Facet`]); the allowed values per facet come
//! from a [`Vocabulary`], either the built-in one or a TOML file loaded once at
//! start-up:
//!
//! ```toml
//! version = "2026.1"
//!
//! [facets]
//! style_type = ["classic", "boho"]
//! season = ["summer", "winter"]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::errors::{RagError, Result};

/// Version string of the built-in vocabulary.
pub const BUILTIN_VOCABULARY_VERSION: &str = "builtin-1";

/// Metadata facet names attached to chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Facet {
    StyleType,
    Occasion,
    Technique,
    Season,
    Language,
    Color,
    Gender,
}

impl Facet {
    pub const ALL: [Facet; 7] = [
        Facet::StyleType,
        Facet::Occasion,
        Facet::Technique,
        Facet::Season,
        Facet::Language,
        Facet::Color,
        Facet::Gender,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Facet::StyleType => "style_type",
            Facet::Occasion => "occasion",
            Facet::Technique => "technique",
            Facet::Season => "season",
            Facet::Language => "language",
            Facet::Color => "color",
            Facet::Gender => "gender",
        }
    }
}

impl fmt::Display for Facet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Facet {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match normalize_value(s).as_str() {
            "style_type" | "style" => Ok(Facet::StyleType),
            "occasion" => Ok(Facet::Occasion),
            "technique" => Ok(Facet::Technique),
            "season" => Ok(Facet::Season),
            "language" | "lang" => Ok(Facet::Language),
            "color" | "colour" => Ok(Facet::Color),
            "gender" => Ok(Facet::Gender),
            other => Err(RagError::Validation(format!("unknown facet '{}'", other))),
        }
    }
}

/// Questionnaire facets of a user profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileFacet {
    Gender,
    Occasion,
    Style,
    Color,
    Season,
}

impl ProfileFacet {
    /// Slot order used when synthesizing query text.
    pub const SLOT_ORDER: [ProfileFacet; 5] = [
        ProfileFacet::Gender,
        ProfileFacet::Occasion,
        ProfileFacet::Style,
        ProfileFacet::Color,
        ProfileFacet::Season,
    ];

    /// Default relaxation order, least specific first.
    pub const DEFAULT_RELAXATION: [ProfileFacet; 5] = [
        ProfileFacet::Season,
        ProfileFacet::Color,
        ProfileFacet::Style,
        ProfileFacet::Occasion,
        ProfileFacet::Gender,
    ];

    /// Metadata facet a profile facet filters on.
    pub fn metadata_facet(&self) -> Facet {
        match self {
            ProfileFacet::Gender => Facet::Gender,
            ProfileFacet::Occasion => Facet::Occasion,
            ProfileFacet::Style => Facet::StyleType,
            ProfileFacet::Color => Facet::Color,
            ProfileFacet::Season => Facet::Season,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileFacet::Gender => "gender",
            ProfileFacet::Occasion => "occasion",
            ProfileFacet::Style => "style",
            ProfileFacet::Color => "color",
            ProfileFacet::Season => "season",
        }
    }
}

impl fmt::Display for ProfileFacet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProfileFacet {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match normalize_value(s).as_str() {
            "gender" => Ok(ProfileFacet::Gender),
            "occasion" => Ok(ProfileFacet::Occasion),
            "style" | "style_type" => Ok(ProfileFacet::Style),
            "color" | "colour" => Ok(ProfileFacet::Color),
            "season" => Ok(ProfileFacet::Season),
            other => Err(RagError::Validation(format!(
                "unknown profile facet '{}'",
                other
            ))),
        }
    }
}

/// Normalizes a free-form label into vocabulary form.
///
/// `"Beach Wear"` becomes `beach_wear`, `"Non-Binary"` becomes `non_binary`.
pub fn normalize_value(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

/// Multi-valued metadata tags for one chunk.
///
/// Values are kept sorted per facet so that serialized tag sets are stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(BTreeMap<Facet, BTreeSet<String>>);

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, facet: Facet, value: impl Into<String>) {
        self.0.entry(facet).or_default().insert(value.into());
    }

    /// Builder-style insert, handy in tests and record files.
    pub fn with(mut self, facet: Facet, value: impl Into<String>) -> Self {
        self.insert(facet, value);
        self
    }

    pub fn values(&self, facet: Facet) -> impl Iterator<Item = &str> {
        self.0
            .get(&facet)
            .into_iter()
            .flat_map(|values| values.iter().map(String::as_str))
    }

    pub fn contains(&self, facet: Facet, value: &str) -> bool {
        self.0
            .get(&facet)
            .map(|values| values.contains(value))
            .unwrap_or(false)
    }

    pub fn has_facet(&self, facet: Facet) -> bool {
        self.0.get(&facet).map(|v| !v.is_empty()).unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(BTreeSet::is_empty)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Facet, &str)> {
        self.0
            .iter()
            .flat_map(|(facet, values)| values.iter().map(move |v| (*facet, v.as_str())))
    }

    /// Total number of (facet, value) pairs.
    pub fn len(&self) -> usize {
        self.0.values().map(BTreeSet::len).sum()
    }
}

/// On-disk representation; facet names are checked against [`Facet`].
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct VocabularyFile {
    version: String,
    #[serde(default)]
    facets: BTreeMap<String, Vec<String>>,
}

/// Closed enumeration of allowed values per facet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vocabulary {
    version: String,
    facets: BTreeMap<Facet, BTreeSet<String>>,
}

impl Vocabulary {
    /// Built-in fashion vocabulary.
    pub fn builtin() -> Self {
        let table: [(Facet, &[&str]); 7] = [
            (
                Facet::StyleType,
                &[
                    "athleisure", "boho", "casual", "classic", "edgy", "formal", "minimal",
                    "polished", "streetwear", "timeless", "trendy",
                ],
            ),
            (
                Facet::Occasion,
                &[
                    "beach_wear", "casual", "everyday", "formal", "office", "party", "weekend",
                    "work", "workout",
                ],
            ),
            (
                Facet::Technique,
                &[
                    "accessorizing", "color_blocking", "layering", "mix_and_match", "monochrome",
                    "proportion_play", "tucking",
                ],
            ),
            (
                Facet::Season,
                &["all_season", "autumn", "spring", "summer", "winter"],
            ),
            (Facet::Language, &["de", "en", "es", "fr", "hi", "it"]),
            (
                Facet::Color,
                &[
                    "beige", "black", "bright", "brown", "dark", "earthy", "neutral", "olive",
                    "pastel", "white",
                ],
            ),
            (Facet::Gender, &["female", "male", "non_binary", "unisex"]),
        ];

        let facets = table
            .iter()
            .map(|(facet, values)| {
                (
                    *facet,
                    values.iter().map(|v| v.to_string()).collect::<BTreeSet<_>>(),
                )
            })
            .collect();

        Self {
            version: BUILTIN_VOCABULARY_VERSION.to_string(),
            facets,
        }
    }

    /// Loads a vocabulary file. Any problem is a configuration error.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RagError::Config(format!(
                "failed to read vocabulary {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: VocabularyFile = toml::from_str(content)
            .map_err(|e| RagError::Config(format!("invalid vocabulary file: {}", e)))?;

        if file.version.trim().is_empty() {
            return Err(RagError::Config("vocabulary version must not be empty".into()));
        }

        let mut facets = BTreeMap::new();
        for (name, values) in file.facets {
            let facet: Facet = name
                .parse()
                .map_err(|_| RagError::Config(format!("unknown facet '{}' in vocabulary", name)))?;
            let mut allowed = BTreeSet::new();
            for value in values {
                let normalized = normalize_value(&value);
                if normalized.is_empty() {
                    return Err(RagError::Config(format!(
                        "empty value for facet '{}' in vocabulary",
                        facet
                    )));
                }
                allowed.insert(normalized);
            }
            facets.insert(facet, allowed);
        }

        Ok(Self {
            version: file.version.trim().to_string(),
            facets,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn allows(&self, facet: Facet, value: &str) -> bool {
        self.facets
            .get(&facet)
            .map(|values| values.contains(value))
            .unwrap_or(false)
    }

    pub fn values(&self, facet: Facet) -> impl Iterator<Item = &str> {
        self.facets
            .get(&facet)
            .into_iter()
            .flat_map(|values| values.iter().map(String::as_str))
    }

    /// Rejects the first (facet, value) pair that is not in the vocabulary.
    pub fn validate_tags(&self, tags: &TagSet) -> Result<()> {
        for (facet, value) in tags.iter() {
            if !self.allows(facet, value) {
                return Err(RagError::Validation(format!(
                    "value '{}' is not allowed for facet '{}' (vocabulary {})",
                    value, facet, self.version
                )));
            }
        }
        Ok(())
    }
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_value() {
        assert_eq!(normalize_value("Beach Wear"), "beach_wear");
        assert_eq!(normalize_value("  Non-Binary "), "non_binary");
        assert_eq!(normalize_value("party"), "party");
        assert_eq!(normalize_value("   "), "");
    }

    #[test]
    fn test_profile_facet_mapping() {
        assert_eq!(ProfileFacet::Style.metadata_facet(), Facet::StyleType);
        assert_eq!(ProfileFacet::Season.metadata_facet(), Facet::Season);
        assert_eq!("colour".parse::<ProfileFacet>().unwrap(), ProfileFacet::Color);
        assert!("fit".parse::<ProfileFacet>().is_err());
    }

    #[test]
    fn test_builtin_vocabulary() {
        let vocab = Vocabulary::builtin();
        assert_eq!(vocab.version(), BUILTIN_VOCABULARY_VERSION);
        assert!(vocab.allows(Facet::Occasion, "party"));
        assert!(vocab.allows(Facet::StyleType, "boho"));
        assert!(!vocab.allows(Facet::Season, "monsoon"));
        for facet in Facet::ALL {
            assert!(vocab.values(facet).next().is_some(), "{} has values", facet);
        }
    }

    #[test]
    fn test_load_from_toml() {
        let vocab = Vocabulary::from_toml_str(
            r#"
version = "2026.1"

[facets]
style_type = ["Classic", "boho"]
season = ["summer"]
"#,
        )
        .unwrap();
        assert_eq!(vocab.version(), "2026.1");
        assert!(vocab.allows(Facet::StyleType, "classic"));
        assert!(!vocab.allows(Facet::Occasion, "party"));
    }

    #[test]
    fn test_unknown_facet_in_file_is_config_error() {
        let err = Vocabulary::from_toml_str(
            r#"
version = "x"
[facets]
fabric = ["silk"]
"#,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn test_validate_tags_rejects_unknown_value() {
        let vocab = Vocabulary::builtin();
        let ok = TagSet::new().with(Facet::Season, "summer");
        assert!(vocab.validate_tags(&ok).is_ok());

        let bad = TagSet::new().with(Facet::Season, "monsoon");
        let err = vocab.validate_tags(&bad).unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn test_tag_set_multi_values() {
        let a = TagSet::new()
            .with(Facet::Occasion, "party")
            .with(Facet::Occasion, "weekend")
            .with(Facet::Season, "summer");
        assert!(a.contains(Facet::Occasion, "party"));
        assert!(a.contains(Facet::Occasion, "weekend"));
        assert!(a.has_facet(Facet::Season));
        assert!(!a.has_facet(Facet::Color));
        assert_eq!(a.len(), 3);
    }
}
