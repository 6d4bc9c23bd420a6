// SPDX-License-Identifier: MIT OR Apache-2.0

//! Turns a user profile into query text and a metadata filter.

use std::sync::Arc;

use crate::errors::{RagError, Result};
use crate::index::FilterPredicate;
use crate::profile::UserProfile;
use crate::vocabulary::{ProfileFacet, Vocabulary};

/// Query text used when the profile has no facets.
pub const GENERIC_QUERY: &str = "General styling rules for any wardrobe.";

/// Output of [`QueryBuilder::build`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltQuery {
    pub text: String,
    pub filter: FilterPredicate,
}

/// Maps profiles to retrieval requests.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    vocabulary: Arc<Vocabulary>,
}

impl QueryBuilder {
    pub fn new(vocabulary: Arc<Vocabulary>) -> Self {
        Self { vocabulary }
    }

    /// Validates the profile, then synthesizes the query text and filter.
    ///
    /// Present facets appear in slot order (gender, occasion, style, color,
    /// season); absent ones are left out of both the text and the filter.
    pub fn build(&self, profile: &UserProfile) -> Result<BuiltQuery> {
        for (facet, value) in profile.present() {
            let metadata = facet.metadata_facet();
            if !self.vocabulary.allows(metadata, value) {
                return Err(RagError::Validation(format!(
                    "'{}' is not a known {} value",
                    value, facet
                )));
            }
        }

        let mut filter = FilterPredicate::new();
        let mut phrases = Vec::new();
        for (facet, value) in profile.present() {
            filter.insert(facet.metadata_facet(), value);
            phrases.push(slot_phrase(facet, &value.replace('_', " ")));
        }

        let text = if phrases.is_empty() {
            GENERIC_QUERY.to_string()
        } else {
            format!("Styling rules {}.", phrases.join(", "))
        };

        Ok(BuiltQuery { text, filter })
    }
}

fn slot_phrase(facet: ProfileFacet, value: &str) -> String {
    match facet {
        ProfileFacet::Gender => format!("for a {} wardrobe", value),
        ProfileFacet::Occasion => format!("for {} occasions", value),
        ProfileFacet::Style => format!("in a {} style", value),
        ProfileFacet::Color => format!("with {} colors", value),
        ProfileFacet::Season => format!("for the {} season", value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocabulary::Facet;

    fn builder() -> QueryBuilder {
        QueryBuilder::new(Arc::new(Vocabulary::builtin()))
    }

    #[test]
    fn test_full_profile() {
        let profile = UserProfile::new()
            .with(ProfileFacet::Season, "summer")
            .with(ProfileFacet::Style, "boho")
            .with(ProfileFacet::Occasion, "beach wear")
            .with(ProfileFacet::Gender, "female")
            .with(ProfileFacet::Color, "earthy");
        let built = builder().build(&profile).unwrap();
        assert_eq!(
            built.text,
            "Styling rules for a female wardrobe, for beach wear occasions, in a boho style, \
             with earthy colors, for the summer season."
        );
        assert_eq!(built.filter.len(), 5);
        assert_eq!(built.filter.get(Facet::StyleType), Some("boho"));
        assert_eq!(built.filter.get(Facet::Occasion), Some("beach_wear"));
    }

    #[test]
    fn test_absent_facets_are_omitted() {
        let profile = UserProfile::new().with(ProfileFacet::Occasion, "office");
        let built = builder().build(&profile).unwrap();
        assert_eq!(built.text, "Styling rules for office occasions.");
        assert_eq!(built.filter, FilterPredicate::new().with(Facet::Occasion, "office"));
    }

    #[test]
    fn test_empty_profile_is_generic() {
        let built = builder().build(&UserProfile::new()).unwrap();
        assert_eq!(built.text, GENERIC_QUERY);
        assert!(built.filter.is_empty());
    }

    #[test]
    fn test_unknown_value_is_rejected() {
        let profile = UserProfile::new().with(ProfileFacet::Style, "cyberpunk");
        let err = builder().build(&profile).unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn test_deterministic() {
        let profile = UserProfile::new()
            .with(ProfileFacet::Style, "classic")
            .with(ProfileFacet::Season, "winter");
        assert_eq!(builder().build(&profile).unwrap(), builder().build(&profile).unwrap());
    }
}
