// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-request user profile built from questionnaire answers.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::errors::{RagError, Result};
use crate::vocabulary::{normalize_value, ProfileFacet};

/// Answers that mean "no preference" and leave a facet unspecified.
const UNSPECIFIED_ANSWERS: &[&str] = &["", "any", "none", "unspecified", "prefer_not_to_say"];

/// A single-valued mapping from questionnaire facets to normalized answers.
///
/// Values are normalized on the way in but not validated; validation against
/// the vocabulary belongs to the query builder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserProfile {
    values: BTreeMap<ProfileFacet, String>,
}

impl UserProfile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a facet; "no preference" answers clear it instead.
    pub fn with(mut self, facet: ProfileFacet, value: impl AsRef<str>) -> Self {
        self.set(facet, value);
        self
    }

    pub fn set(&mut self, facet: ProfileFacet, value: impl AsRef<str>) {
        let normalized = normalize_value(value.as_ref());
        if UNSPECIFIED_ANSWERS.contains(&normalized.as_str()) {
            self.values.remove(&facet);
        } else {
            self.values.insert(facet, normalized);
        }
    }

    pub fn get(&self, facet: ProfileFacet) -> Option<&str> {
        self.values.get(&facet).map(String::as_str)
    }

    /// Present facets in query slot order.
    pub fn present(&self) -> impl Iterator<Item = (ProfileFacet, &str)> {
        ProfileFacet::SLOT_ORDER
            .into_iter()
            .filter_map(move |facet| self.get(facet).map(|value| (facet, value)))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Parses a JSON object of answers, e.g. `{"occasion": "Party", "gender": null}`.
    ///
    /// Unknown keys are rejected so that a misspelled facet is not silently
    /// treated as "no preference".
    pub fn from_json_str(content: &str) -> Result<Self> {
        let raw: BTreeMap<String, Option<String>> = serde_json::from_str(content)
            .map_err(|e| RagError::Validation(format!("invalid profile JSON: {}", e)))?;

        let mut profile = Self::new();
        for (key, value) in raw {
            let facet: ProfileFacet = key.parse()?;
            if let Some(value) = value {
                profile.set(facet, value);
            }
        }
        Ok(profile)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RagError::Validation(format!("failed to read profile {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&content)
    }
}

/// Lets callers deserialize profiles embedded in larger JSON payloads.
impl<'de> Deserialize<'de> for UserProfile {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = BTreeMap::<ProfileFacet, Option<String>>::deserialize(deserializer)?;
        let mut profile = UserProfile::new();
        for (facet, value) in raw {
            if let Some(value) = value {
                profile.set(facet, value);
            }
        }
        Ok(profile)
    }
}
