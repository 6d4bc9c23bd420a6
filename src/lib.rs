// SPDX-License-Identifier: MIT OR Apache-2.0

//! stylerag - Fashion styling-rule retrieval library
//!
//! Shared modules for the stylerag CLI tool: segmentation, tagging,
//! embedding, the chunk index and profile-driven retrieval.

pub mod config;
pub mod embedding;
pub mod engine;
pub mod errors;
pub mod index;
pub mod ingest;
pub mod output;
pub mod profile;
pub mod query;
pub mod vocabulary;

pub use engine::{Engine, EngineSettings, IngestReport, RetrievalResponse};
pub use errors::{RagError, Result};
