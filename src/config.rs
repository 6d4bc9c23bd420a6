// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration file support for stylerag
//!
//! Loads configuration from an explicit `--config` path, `.styleragrc.toml` in
//! the current directory or `~/.config/stylerag/config.toml`, in that order.
//!
//! ```toml
//! [segmenter]
//! min_chunk_tokens = 120
//! max_chunk_tokens = 300
//! chunk_overlap = 30
//!
//! [embeddings]
//! provider = "hash"
//! dimension = 256
//!
//! [retrieval]
//! k_target = 5
//! k_min = 3
//! token_budget = 1200
//! relaxation_order = ["season", "color", "style", "occasion", "gender"]
//!
//! [index]
//! path = ".stylerag/index.sqlite"
//! default_language = "en"
//! min_confidence = 0.45
//! ```

use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::embedding::{CommandProvider, EmbeddingProvider, HashEmbedder, RetryPolicy};
use crate::errors::{RagError, Result};
use crate::ingest::segmenter::{
    SegmenterConfig, DEFAULT_CHUNK_OVERLAP, DEFAULT_MAX_CHUNK_TOKENS, DEFAULT_MIN_CHUNK_TOKENS,
};
use crate::query::DEFAULT_DEDUP_OVERLAP_RATIO;
use crate::vocabulary::{ProfileFacet, Vocabulary};

/// File name looked up in the current directory.
pub const LOCAL_CONFIG_FILE: &str = ".styleragrc.toml";

/// Embedding provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderType {
    Command,
    #[default]
    Builtin,
    Hash,
}

/// Segmenter configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SegmenterSection {
    /// Minimum tokens per chunk
    pub min_chunk_tokens: Option<usize>,
    /// Maximum tokens per chunk
    pub max_chunk_tokens: Option<usize>,
    /// Tokens shared by consecutive chunks
    pub chunk_overlap: Option<usize>,
}

impl SegmenterSection {
    /// Get min chunk tokens (defaults to 120)
    pub fn min_chunk_tokens(&self) -> usize {
        self.min_chunk_tokens.unwrap_or(DEFAULT_MIN_CHUNK_TOKENS)
    }

    /// Get max chunk tokens (defaults to 300)
    pub fn max_chunk_tokens(&self) -> usize {
        self.max_chunk_tokens.unwrap_or(DEFAULT_MAX_CHUNK_TOKENS)
    }

    /// Get chunk overlap (defaults to 30)
    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap.unwrap_or(DEFAULT_CHUNK_OVERLAP)
    }

    /// Segmenter parameters, validated.
    pub fn segmenter_config(&self) -> Result<SegmenterConfig> {
        SegmenterConfig::new(
            self.min_chunk_tokens(),
            self.max_chunk_tokens(),
            self.chunk_overlap(),
        )
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EmbeddingConfig {
    /// Provider type (command, builtin, hash)
    pub provider: Option<EmbeddingProviderType>,
    /// Model identifier pinned into the index
    pub model: Option<String>,
    /// Command to execute for the command provider
    pub command: Option<String>,
    /// Vector length produced by the command or hash provider
    pub dimension: Option<usize>,
    /// Extra attempts after a failed embedding call
    pub max_retries: Option<u32>,
    /// Delay before the first retry, doubled on each further retry
    pub retry_base_ms: Option<u64>,
}

impl EmbeddingConfig {
    /// Get provider type (defaults to Builtin)
    pub fn provider(&self) -> EmbeddingProviderType {
        self.provider.unwrap_or_default()
    }

    /// Get model identifier (defaults to "local-model-id")
    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or("local-model-id")
    }

    /// Get command (defaults to "embedder")
    pub fn command(&self) -> &str {
        self.command.as_deref().unwrap_or("embedder")
    }

    /// Get dimension (defaults to 384 for command, 256 for hash)
    pub fn dimension(&self) -> usize {
        self.dimension.unwrap_or(match self.provider() {
            EmbeddingProviderType::Hash => 256,
            _ => 384,
        })
    }

    /// Get max retries (defaults to 3)
    pub fn max_retries(&self) -> u32 {
        self.max_retries.unwrap_or(crate::embedding::adapter::DEFAULT_MAX_RETRIES)
    }

    /// Get retry base delay in milliseconds (defaults to 100)
    pub fn retry_base_ms(&self) -> u64 {
        self.retry_base_ms
            .unwrap_or(crate::embedding::adapter::DEFAULT_BASE_DELAY_MS)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries(), Duration::from_millis(self.retry_base_ms()))
    }

    /// Instantiates the configured provider.
    pub fn build_provider(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        match self.provider() {
            EmbeddingProviderType::Command => Ok(Arc::new(CommandProvider::new(
                self.command().to_string(),
                self.model().to_string(),
                self.dimension(),
            ))),
            EmbeddingProviderType::Hash => {
                let mut provider = HashEmbedder::new(self.dimension());
                if let Some(model) = self.model.as_deref() {
                    provider = provider.with_model_id(model);
                }
                Ok(Arc::new(provider))
            }
            EmbeddingProviderType::Builtin => build_builtin_provider(),
        }
    }
}

#[cfg(not(all(target_os = "macos", target_arch = "x86_64")))]
fn build_builtin_provider() -> Result<Arc<dyn EmbeddingProvider>> {
    let provider = crate::embedding::FastEmbedder::from_env()
        .map_err(|e| RagError::Config(format!("builtin embedding provider: {:#}", e)))?;
    Ok(Arc::new(provider))
}

#[cfg(all(target_os = "macos", target_arch = "x86_64"))]
fn build_builtin_provider() -> Result<Arc<dyn EmbeddingProvider>> {
    Err(RagError::Config(
        "the builtin embedding provider is not available on this platform; \
         use provider = \"command\" or \"hash\""
            .to_string(),
    ))
}

/// Retrieval configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrievalConfig {
    /// Number of chunks requested from the index
    pub k_target: Option<usize>,
    /// Minimum acceptable number of chunks before relaxing filters
    pub k_min: Option<usize>,
    /// Token budget for the assembled context
    pub token_budget: Option<usize>,
    /// Profile facets in the order they are dropped
    pub relaxation_order: Option<Vec<String>>,
    /// Share of the shorter span two chunks must overlap to be duplicates
    pub dedup_overlap_ratio: Option<f64>,
}

impl RetrievalConfig {
    /// Get k_target (defaults to 5)
    pub fn k_target(&self) -> usize {
        self.k_target.unwrap_or(5)
    }

    /// Get k_min (defaults to 3, capped at k_target)
    pub fn k_min(&self) -> usize {
        self.k_min.unwrap_or_else(|| 3.min(self.k_target()))
    }

    /// Get token budget (defaults to 1200)
    pub fn token_budget(&self) -> usize {
        self.token_budget.unwrap_or(1200)
    }

    /// Get dedup overlap ratio (defaults to 0.5)
    pub fn dedup_overlap_ratio(&self) -> f64 {
        self.dedup_overlap_ratio
            .unwrap_or(DEFAULT_DEDUP_OVERLAP_RATIO)
    }

    /// Parsed relaxation order (defaults to season, color, style, occasion, gender)
    pub fn relaxation_order(&self) -> Result<Vec<ProfileFacet>> {
        let Some(names) = &self.relaxation_order else {
            return Ok(ProfileFacet::DEFAULT_RELAXATION.to_vec());
        };

        let mut seen = BTreeSet::new();
        let mut order = Vec::with_capacity(names.len());
        for name in names {
            let facet: ProfileFacet = name
                .parse()
                .map_err(|_| RagError::Config(format!("unknown facet '{}' in relaxation_order", name)))?;
            if !seen.insert(facet) {
                return Err(RagError::Config(format!(
                    "facet '{}' listed twice in relaxation_order",
                    facet
                )));
            }
            order.push(facet);
        }
        Ok(order)
    }
}

/// Index configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IndexConfig {
    /// SQLite index file
    pub path: Option<PathBuf>,
    /// Language tag for chunks without one
    pub default_language: Option<String>,
    /// Vocabulary TOML file; the built-in vocabulary is used when unset
    pub vocabulary: Option<PathBuf>,
    /// Chunks scoring below this metadata confidence are not stored
    pub min_confidence: Option<f32>,
}

impl IndexConfig {
    /// Get index path (defaults to .stylerag/index.sqlite)
    pub fn path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| PathBuf::from(".stylerag").join("index.sqlite"))
    }

    /// Get default language (defaults to "en")
    pub fn default_language(&self) -> &str {
        self.default_language.as_deref().unwrap_or("en")
    }

    /// Get the ingestion confidence threshold (unset keeps every chunk)
    pub fn min_confidence(&self) -> Option<f32> {
        self.min_confidence
    }

    /// Loads the configured vocabulary.
    pub fn load_vocabulary(&self) -> Result<Vocabulary> {
        match &self.vocabulary {
            Some(path) => Vocabulary::load(path),
            None => Ok(Vocabulary::builtin()),
        }
    }
}

/// Configuration loaded from --config, .styleragrc.toml or ~/.config/stylerag/config.toml
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Segmenter configuration
    pub segmenter: SegmenterSection,

    /// Embedding configuration
    pub embeddings: EmbeddingConfig,

    /// Retrieval configuration
    pub retrieval: RetrievalConfig,

    /// Index configuration
    pub index: IndexConfig,
}

impl Config {
    /// Load configuration from files
    ///
    /// Precedence (highest to lowest):
    /// 1. `explicit` path (must exist)
    /// 2. .styleragrc.toml in current directory
    /// 3. ~/.config/stylerag/config.toml
    ///
    /// The result is validated; any problem is a configuration error.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config = match explicit {
            Some(path) => Self::load_from_path(path)?,
            None => Self::discover()?.unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }

    fn discover() -> Result<Option<Self>> {
        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.is_file() {
            return Self::load_from_path(&local).map(Some);
        }

        if let Some(home) = dirs::home_dir() {
            let config_path = home.join(".config").join("stylerag").join("config.toml");
            if config_path.is_file() {
                return Self::load_from_path(&config_path).map(Some);
            }
        }

        Ok(None)
    }

    fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RagError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        tracing::debug!(path = %path.display(), "loading configuration");
        Self::from_toml_str(&content)
            .map_err(|e| RagError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| RagError::Config(format!("invalid configuration: {}", e)))
    }

    /// Checks every parameter that can be checked without touching the index.
    pub fn validate(&self) -> Result<()> {
        self.segmenter.segmenter_config()?;

        let retrieval = &self.retrieval;
        if retrieval.k_min() == 0 || retrieval.k_min() > retrieval.k_target() {
            return Err(RagError::Config(format!(
                "retrieval needs 1 <= k_min <= k_target, got k_min={} k_target={}",
                retrieval.k_min(),
                retrieval.k_target()
            )));
        }
        if retrieval.token_budget() == 0 {
            return Err(RagError::Config("token_budget must be greater than 0".to_string()));
        }
        let ratio = retrieval.dedup_overlap_ratio();
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(RagError::Config(format!(
                "dedup_overlap_ratio must be in (0, 1], got {}",
                ratio
            )));
        }
        retrieval.relaxation_order()?;

        if self.embeddings.dimension() == 0 {
            return Err(RagError::Config("embedding dimension must be greater than 0".to_string()));
        }
        if self.embeddings.provider() == EmbeddingProviderType::Command
            && self.embeddings.command().trim().is_empty()
        {
            return Err(RagError::Config("embedding command must not be empty".to_string()));
        }

        if self.index.default_language().trim().is_empty() {
            return Err(RagError::Config("default_language must not be empty".to_string()));
        }
        if let Some(min) = self.index.min_confidence() {
            if !(0.0..=1.0).contains(&min) {
                return Err(RagError::Config(format!(
                    "min_confidence must be in [0, 1], got {}",
                    min
                )));
            }
        }

        Ok(())
    }

    /// Get the segmenter configuration
    pub fn segmenter(&self) -> &SegmenterSection {
        &self.segmenter
    }

    /// Get the embedding configuration
    pub fn embeddings(&self) -> &EmbeddingConfig {
        &self.embeddings
    }

    /// Get the retrieval configuration
    pub fn retrieval(&self) -> &RetrievalConfig {
        &self.retrieval
    }

    /// Get the index configuration
    pub fn index(&self) -> &IndexConfig {
        &self.index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.segmenter().min_chunk_tokens(), 120);
        assert_eq!(config.segmenter().max_chunk_tokens(), 300);
        assert_eq!(config.segmenter().chunk_overlap(), 30);
        assert_eq!(config.retrieval().k_target(), 5);
        assert_eq!(config.retrieval().k_min(), 3);
        assert_eq!(config.embeddings().provider(), EmbeddingProviderType::Builtin);
        assert_eq!(config.index().path(), PathBuf::from(".stylerag/index.sqlite"));
        assert_eq!(
            config.retrieval().relaxation_order().unwrap(),
            ProfileFacet::DEFAULT_RELAXATION.to_vec()
        );
    }

    #[test]
    fn test_parse_full_file() {
        let config = Config::from_toml_str(
            r#"
[segmenter]
min_chunk_tokens = 40
max_chunk_tokens = 80
chunk_overlap = 8

[embeddings]
provider = "hash"
dimension = 64
max_retries = 1

[retrieval]
k_target = 8
k_min = 2
token_budget = 500
relaxation_order = ["season", "style"]

[index]
path = "/tmp/rag.sqlite"
default_language = "fr"
min_confidence = 0.45
"#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.segmenter().segmenter_config().unwrap().max_size, 80);
        assert_eq!(config.embeddings().provider(), EmbeddingProviderType::Hash);
        assert_eq!(config.embeddings().dimension(), 64);
        assert_eq!(
            config.retrieval().relaxation_order().unwrap(),
            vec![ProfileFacet::Season, ProfileFacet::Style]
        );
        assert_eq!(config.index().default_language(), "fr");
        assert_eq!(config.index().min_confidence(), Some(0.45));

        let provider = config.embeddings().build_provider().unwrap();
        assert_eq!(provider.dimension(), 64);
    }

    #[test]
    fn test_invalid_segmenter_is_config_error() {
        let config = Config::from_toml_str("[segmenter]\nmin_chunk_tokens = 10\nchunk_overlap = 10\n").unwrap();
        assert_eq!(config.validate().unwrap_err().kind(), "config");
    }

    #[test]
    fn test_invalid_retrieval_bounds() {
        let config = Config::from_toml_str("[retrieval]\nk_target = 2\nk_min = 3\n").unwrap();
        assert_eq!(config.validate().unwrap_err().kind(), "config");

        let config =
            Config::from_toml_str("[retrieval]\nrelaxation_order = [\"season\", \"season\"]\n").unwrap();
        assert!(config.validate().is_err());

        let config = Config::from_toml_str("[retrieval]\ndedup_overlap_ratio = 0.0\n").unwrap();
        assert!(config.validate().is_err());

        let config = Config::from_toml_str("[index]\nmin_confidence = 1.5\n").unwrap();
        assert_eq!(config.validate().unwrap_err().kind(), "config");
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(Config::from_toml_str("[retrieval]\nk_max = 3\n").is_err());
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[embeddings]\nprovider = \"hash\"\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.embeddings().provider(), EmbeddingProviderType::Hash);

        let missing = dir.path().join("missing.toml");
        assert_eq!(Config::load(Some(&missing)).unwrap_err().kind(), "config");
    }
}
