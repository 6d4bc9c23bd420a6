// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error taxonomy for the retrieval engine.
//!
//! Each variant maps to one failure class with its own handling policy:
//! configuration errors are fatal at start-up, validation errors reject a
//! single request, version errors poison an index until reconciled, adapter
//! errors are surfaced after bounded retries, and index errors are never
//! retried.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    /// Invalid segmenter, retrieval or vocabulary parameters.
    #[error("configuration error: {0}")]
    Config(String),

    /// A profile or metadata value outside the closed vocabulary, or an
    /// invalid request argument.
    #[error("validation error: {0}")]
    Validation(String),

    /// Model identifier or dimensionality does not match the index.
    #[error("embedding version mismatch: index uses {expected}, got {actual}")]
    EmbeddingVersion { expected: String, actual: String },

    /// Embedding call failed after all retry attempts.
    #[error("embedding adapter failed after {attempts} attempt(s): {reason}")]
    Adapter { attempts: u32, reason: String },

    /// Index storage is unreachable or returned an error.
    #[error("index unavailable: {0}")]
    IndexUnavailable(String),
}

impl From<rusqlite::Error> for RagError {
    fn from(err: rusqlite::Error) -> Self {
        RagError::IndexUnavailable(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RagError>;

impl RagError {
    /// Short machine-readable class name, used in batch reports and JSON output.
    pub fn kind(&self) -> &'static str {
        match self {
            RagError::Config(_) => "config",
            RagError::Validation(_) => "validation",
            RagError::EmbeddingVersion { .. } => "embedding_version",
            RagError::Adapter { .. } => "adapter",
            RagError::IndexUnavailable(_) => "index_unavailable",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_errors_map_to_index_unavailable() {
        let err: RagError = rusqlite::Error::InvalidQuery.into();
        assert_eq!(err.kind(), "index_unavailable");
    }

    #[test]
    fn test_version_error_message() {
        let err = RagError::EmbeddingVersion {
            expected: "v1/4".into(),
            actual: "v2/4".into(),
        };
        assert!(err.to_string().contains("v1/4"));
        assert!(err.to_string().contains("v2/4"));
    }
}
