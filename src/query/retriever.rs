// SPDX-License-Identifier: MIT OR Apache-2.0

//! Profile-driven retrieval with filter relaxation.
//!
//! The retriever asks the index for `k_target` chunks under the full filter.
//! While fewer than `k_min` come back, it drops one more present facet, in the
//! configured relaxation order, and queries again. Facets the configured
//! order does not name are dropped afterwards in the default order, so a
//! non-empty index always ends in an unfiltered search rather than an empty
//! answer. Relaxation is cumulative and stops once the filter is empty.

use std::sync::Arc;
use tracing::debug;

use super::builder::QueryBuilder;
use crate::embedding::EmbeddingAdapter;
use crate::errors::{RagError, Result};
use crate::index::{ChunkIndex, FilterPredicate, ScoredChunk};
use crate::profile::UserProfile;
use crate::vocabulary::ProfileFacet;

/// Result of one retrieval, including how the filter was relaxed.
#[derive(Debug, Clone)]
pub struct RetrievalOutcome {
    pub query_text: String,
    pub results: Vec<ScoredChunk>,
    /// Filter of the final query.
    pub applied_filter: FilterPredicate,
    /// Facets dropped from the filter, in drop order.
    pub dropped: Vec<ProfileFacet>,
}

pub struct Retriever {
    builder: QueryBuilder,
    adapter: EmbeddingAdapter,
    index: Arc<ChunkIndex>,
    relaxation_order: Vec<ProfileFacet>,
}

impl Retriever {
    pub fn new(builder: QueryBuilder, adapter: EmbeddingAdapter, index: Arc<ChunkIndex>) -> Self {
        Self {
            builder,
            adapter,
            index,
            relaxation_order: ProfileFacet::DEFAULT_RELAXATION.to_vec(),
        }
    }

    /// Overrides the relaxation order. Facets missing from `order` are dropped
    /// after it, in default order.
    pub fn with_relaxation_order(mut self, order: Vec<ProfileFacet>) -> Self {
        self.relaxation_order = order;
        self
    }

    pub fn relaxation_order(&self) -> &[ProfileFacet] {
        &self.relaxation_order
    }

    /// Retrieves up to `k_target` chunks for `profile`, relaxing the filter
    /// while fewer than `k_min` match.
    pub fn retrieve(
        &self,
        profile: &UserProfile,
        k_target: usize,
        k_min: usize,
    ) -> Result<RetrievalOutcome> {
        if k_min == 0 || k_min > k_target {
            return Err(RagError::Validation(format!(
                "need 1 <= k_min <= k_target, got k_min={} k_target={}",
                k_min, k_target
            )));
        }

        let built = self.builder.build(profile)?;
        let query = self.adapter.embed(&built.text)?;

        let mut filter = built.filter;
        let mut dropped = Vec::new();
        let mut results = self.index.query(&query, &filter, k_target)?;
        let fallback = ProfileFacet::DEFAULT_RELAXATION;
        let mut order = self.relaxation_order.iter().chain(fallback.iter());

        while results.len() < k_min && !filter.is_empty() {
            let Some(facet) = order
                .by_ref()
                .find(|facet| filter.get(facet.metadata_facet()).is_some())
            else {
                break;
            };
            filter.remove(facet.metadata_facet());
            dropped.push(*facet);
            debug!(
                facet = %facet,
                found = results.len(),
                k_min,
                "relaxing filter"
            );
            results = self.index.query(&query, &filter, k_target)?;
        }

        Ok(RetrievalOutcome {
            query_text: built.text,
            results,
            applied_filter: filter,
            dropped,
        })
    }
}
