// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistent chunk index with metadata filtering.

pub mod filter;
pub mod storage;

pub use filter::FilterPredicate;
pub use storage::{chunk_id, content_hash, ChunkIndex, IndexStats, IndexedChunk, ScoredChunk};
