// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query module - profile to ranked, budgeted grounding context

pub mod builder;
pub mod context;
pub mod retriever;

pub use builder::{BuiltQuery, QueryBuilder, GENERIC_QUERY};
pub use context::{AssembledContext, ContextAssembler, Provenance, DEFAULT_DEDUP_OVERLAP_RATIO};
pub use retriever::{RetrievalOutcome, Retriever};
