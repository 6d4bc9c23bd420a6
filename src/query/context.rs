// SPDX-License-Identifier: MIT OR Apache-2.0

//! Context assembly: deduplicate ranked chunks and pack them into a token budget.

use serde::Serialize;

use crate::index::ScoredChunk;

/// Default share of the shorter span two chunks must overlap to count as duplicates.
pub const DEFAULT_DEDUP_OVERLAP_RATIO: f64 = 0.5;

/// Where a passage came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Provenance {
    pub source: String,
    pub chunk_id: String,
    pub ordinal: usize,
    pub token_start: usize,
    pub token_end: usize,
    pub score: f32,
    /// Metadata confidence of the chunk.
    pub confidence: f32,
}

/// Assembled grounding context, in rank order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AssembledContext {
    pub passages: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Vec<Provenance>>,
    /// Tokens used by the passages.
    pub tokens_used: usize,
    /// Ranked chunks skipped as near-duplicates of a higher-ranked one.
    pub duplicates_removed: usize,
}

/// Deduplicates and budgets retrieval results.
#[derive(Debug, Clone, Copy)]
pub struct ContextAssembler {
    dedup_overlap_ratio: f64,
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self {
            dedup_overlap_ratio: DEFAULT_DEDUP_OVERLAP_RATIO,
        }
    }
}

impl ContextAssembler {
    pub fn new(dedup_overlap_ratio: f64) -> Self {
        Self {
            dedup_overlap_ratio,
        }
    }

    /// Builds the context for `results` (already ranked) within `token_budget`.
    ///
    /// Near-duplicates are removed first, keeping the higher-ranked chunk.
    /// Passages are then taken greedily in rank order until the first one that
    /// does not fit; chunks are never truncated.
    pub fn assemble(
        &self,
        results: &[ScoredChunk],
        token_budget: usize,
        with_provenance: bool,
    ) -> AssembledContext {
        let mut kept: Vec<&ScoredChunk> = Vec::new();
        let mut duplicates_removed = 0;
        for result in results {
            if kept.iter().any(|k| self.is_near_duplicate(k, result)) {
                duplicates_removed += 1;
                continue;
            }
            kept.push(result);
        }

        let mut context = AssembledContext {
            duplicates_removed,
            provenance: with_provenance.then(Vec::new),
            ..Default::default()
        };

        for result in kept {
            let tokens = result.chunk.token_len();
            if context.tokens_used + tokens > token_budget {
                break;
            }
            context.tokens_used += tokens;
            context.passages.push(result.chunk.text.clone());
            if let Some(provenance) = context.provenance.as_mut() {
                provenance.push(Provenance {
                    source: result.chunk.source.clone(),
                    chunk_id: result.chunk.chunk_id.clone(),
                    ordinal: result.chunk.ordinal,
                    token_start: result.chunk.token_start,
                    token_end: result.chunk.token_end,
                    score: result.score,
                    confidence: result.chunk.confidence,
                });
            }
        }

        context
    }

    fn is_near_duplicate(&self, a: &ScoredChunk, b: &ScoredChunk) -> bool {
        if a.chunk.content_hash == b.chunk.content_hash {
            return true;
        }
        if a.chunk.source != b.chunk.source {
            return false;
        }
        let overlap = span_overlap(
            (a.chunk.token_start, a.chunk.token_end),
            (b.chunk.token_start, b.chunk.token_end),
        );
        let shorter = a.chunk.token_len().min(b.chunk.token_len());
        shorter > 0 && overlap as f64 >= self.dedup_overlap_ratio * shorter as f64
    }
}

/// Number of tokens shared by two half-open spans.
fn span_overlap(a: (usize, usize), b: (usize, usize)) -> usize {
    let start = a.0.max(b.0);
    let end = a.1.min(b.1);
    end.saturating_sub(start)
}
