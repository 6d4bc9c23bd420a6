// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding module - turns text into fixed-length vectors
//!
//! Providers do the actual work; the adapter adds retries and shape checks
//! and is the only type the rest of the engine talks to.

pub mod adapter;
pub mod provider;

pub use adapter::{Embedding, EmbeddingAdapter, RetryPolicy};
#[cfg(not(all(target_os = "macos", target_arch = "x86_64")))]
pub use provider::FastEmbedder;
pub use provider::{CommandProvider, EmbeddingProvider, FastEmbedConfig, HashEmbedder, HASH_MODEL_ID};
