// SPDX-License-Identifier: MIT OR Apache-2.0

//! Exact-match metadata filters.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::vocabulary::{Facet, TagSet};

/// A conjunction of `facet = value` constraints.
///
/// A chunk matches when, for every constrained facet, its value set contains
/// the requested value. The empty predicate matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FilterPredicate {
    constraints: BTreeMap<Facet, String>,
}

impl FilterPredicate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, facet: Facet, value: impl Into<String>) -> Self {
        self.constraints.insert(facet, value.into());
        self
    }

    pub fn insert(&mut self, facet: Facet, value: impl Into<String>) {
        self.constraints.insert(facet, value.into());
    }

    /// Drops the constraint on `facet`, returning its value if there was one.
    pub fn remove(&mut self, facet: Facet) -> Option<String> {
        self.constraints.remove(&facet)
    }

    pub fn get(&self, facet: Facet) -> Option<&str> {
        self.constraints.get(&facet).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Facet, &str)> {
        self.constraints.iter().map(|(f, v)| (*f, v.as_str()))
    }

    pub fn matches(&self, tags: &TagSet) -> bool {
        self.constraints
            .iter()
            .all(|(facet, value)| tags.contains(*facet, value))
    }
}

impl fmt::Display for FilterPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.constraints.is_empty() {
            return f.write_str("(none)");
        }
        let parts: Vec<String> = self
            .constraints
            .iter()
            .map(|(facet, value)| format!("{}={}", facet, value))
            .collect();
        f.write_str(&parts.join(" AND "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(FilterPredicate::new().matches(&TagSet::new()));
    }

    #[test]
    fn test_conjunction_over_multi_valued_tags() {
        let tags = TagSet::new()
            .with(Facet::Occasion, "party")
            .with(Facet::Occasion, "weekend")
            .with(Facet::StyleType, "boho");

        assert!(FilterPredicate::new()
            .with(Facet::Occasion, "weekend")
            .with(Facet::StyleType, "boho")
            .matches(&tags));
        assert!(!FilterPredicate::new()
            .with(Facet::Occasion, "party")
            .with(Facet::Season, "summer")
            .matches(&tags));
    }

    #[test]
    fn test_display() {
        let filter = FilterPredicate::new()
            .with(Facet::Season, "summer")
            .with(Facet::Occasion, "party");
        assert_eq!(filter.to_string(), "occasion=party AND season=summer");
        assert_eq!(FilterPredicate::new().to_string(), "(none)");
    }
}
