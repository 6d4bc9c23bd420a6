// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding provider interface and implementations.
//!
//! The engine treats embedding as an external capability: text in, fixed
//! length vector out, deterministic for a given model identifier. Three
//! providers are available: a fastembed-based builtin model, a command
//! provider that shells out to an external process, and a feature-hashing
//! provider that needs no model at all.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::env;
use std::io::Write;
use std::process::{Command, Stdio};

const DEFAULT_FASTEMBED_BATCH_SIZE: usize = 256;
const MAX_FASTEMBED_BATCH_SIZE: usize = 1024;
const DEFAULT_FASTEMBED_MAX_CHARS: usize = 2000;
const DEFAULT_COMMAND_BATCH_SIZE: usize = 64;
const DEFAULT_HASH_BATCH_SIZE: usize = 512;

/// Model identifier reported by [`HashEmbedder`].
pub const HASH_MODEL_ID: &str = "hash-v1";

/// Trait for embedding providers.
///
/// Providers are shared between ingestion and concurrent retrieval requests,
/// so embedding takes `&self`.
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier pinned into the index.
    fn model_id(&self) -> &str;

    /// Returns the length of every vector this provider produces.
    fn dimension(&self) -> usize;

    /// Returns the batch size used by the provider.
    fn batch_size(&self) -> usize;

    /// Generates embeddings for the given texts.
    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Generates an embedding for a single text.
    fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut result = self.embed_texts(&[text.to_string()])?;
        result
            .pop()
            .ok_or_else(|| anyhow::anyhow!("No embedding returned"))
    }
}

/// Tuning knobs for the builtin fastembed provider, overridable from the
/// environment.
#[derive(Debug, Clone)]
pub struct FastEmbedConfig {
    pub batch_size: usize,
    pub max_chars: usize,
    pub normalize: bool,
}

impl Default for FastEmbedConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_FASTEMBED_BATCH_SIZE,
            max_chars: DEFAULT_FASTEMBED_MAX_CHARS,
            normalize: true,
        }
    }
}

impl FastEmbedConfig {
    pub fn from_env() -> Result<Self> {
        let mut batch_size =
            parse_usize_env("STYLERAG_EMBED_BATCH_SIZE", DEFAULT_FASTEMBED_BATCH_SIZE)?;
        if batch_size == 0 {
            batch_size = DEFAULT_FASTEMBED_BATCH_SIZE;
        }
        if batch_size > MAX_FASTEMBED_BATCH_SIZE {
            tracing::warn!(
                batch_size,
                max = MAX_FASTEMBED_BATCH_SIZE,
                "STYLERAG_EMBED_BATCH_SIZE exceeds maximum; clamping"
            );
            batch_size = MAX_FASTEMBED_BATCH_SIZE;
        }

        let mut max_chars = parse_usize_env("STYLERAG_EMBED_MAX_CHARS", DEFAULT_FASTEMBED_MAX_CHARS)?;
        if max_chars == 0 {
            max_chars = DEFAULT_FASTEMBED_MAX_CHARS;
        }

        let normalize = parse_bool_env("STYLERAG_EMBED_NORMALIZE", true)?;

        Ok(Self {
            batch_size,
            max_chars,
            normalize,
        })
    }
}

/// FastEmbed provider using sentence-transformers/all-MiniLM-L6-v2.
#[cfg(not(all(target_os = "macos", target_arch = "x86_64")))]
pub struct FastEmbedder {
    embedder: std::sync::Mutex<fastembed::TextEmbedding>,
    config: FastEmbedConfig,
    model_id: String,
    dimension: usize,
}

#[cfg(not(all(target_os = "macos", target_arch = "x86_64")))]
impl FastEmbedder {
    /// Output dimension of all-MiniLM-L6-v2.
    pub const DIMENSION: usize = 384;

    pub fn new(config: FastEmbedConfig) -> Result<Self> {
        let model = fastembed::EmbeddingModel::AllMiniLML6V2;
        let model_id = model.to_string();
        let init = fastembed::InitOptions::new(model);
        let embedder = fastembed::TextEmbedding::try_new(init)
            .context("Failed to initialize fastembed model")?;

        Ok(Self {
            embedder: std::sync::Mutex::new(embedder),
            config,
            model_id,
            dimension: Self::DIMENSION,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(FastEmbedConfig::from_env()?)
    }
}

#[cfg(not(all(target_os = "macos", target_arch = "x86_64")))]
impl EmbeddingProvider for FastEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn batch_size(&self) -> usize {
        self.config.batch_size
    }

    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let prepared: Vec<String> = texts
            .iter()
            .map(|text| truncate_to_chars(text, self.config.max_chars).to_string())
            .collect();

        let mut embedder = self
            .embedder
            .lock()
            .map_err(|_| anyhow::anyhow!("fastembed model lock poisoned"))?;
        let mut embeddings = embedder
            .embed(prepared, Some(self.config.batch_size))
            .map_err(|e| anyhow::anyhow!("fastembed inference failed: {}", e))?;

        if self.config.normalize {
            for embedding in embeddings.iter_mut() {
                l2_normalize(embedding);
            }
        }

        Ok(embeddings)
    }
}

/// Command provider that shells out to an external process.
///
/// The command receives `{"model": ..., "texts": [...]}` on stdin and must
/// print either a JSON array of vectors or an object with an `embeddings`,
/// `vectors` or `data` field.
pub struct CommandProvider {
    command: String,
    model: String,
    dimension: usize,
    batch_size: usize,
}

impl CommandProvider {
    pub fn new(command: String, model: String, dimension: usize) -> Self {
        Self {
            command,
            model,
            dimension,
            batch_size: DEFAULT_COMMAND_BATCH_SIZE,
        }
    }

    fn run_command(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let payload = serde_json::json!({
            "model": self.model,
            "texts": texts,
        });

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn embedding command: {}", self.command))?;

        if let Some(mut stdin) = child.stdin.take() {
            let payload_str = payload.to_string();
            stdin
                .write_all(payload_str.as_bytes())
                .context("Failed to write embeddings payload to stdin")?;
        }

        let output = child
            .wait_with_output()
            .context("Failed to read embeddings command output")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "Embedding command failed (status {}): {}",
                output.status,
                stderr.trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_command_output(stdout.trim())
    }
}

impl EmbeddingProvider for CommandProvider {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.run_command(texts)
    }
}

fn parse_command_output(stdout: &str) -> Result<Vec<Vec<f32>>> {
    let parsed: Value = serde_json::from_str(stdout)
        .with_context(|| "Failed to parse embeddings command output as JSON")?;

    let embeddings_value = match parsed {
        Value::Array(arr) => Value::Array(arr),
        Value::Object(ref obj) => {
            if let Some(value) = obj.get("embeddings") {
                value.clone()
            } else if let Some(value) = obj.get("vectors") {
                value.clone()
            } else if let Some(value) = obj.get("data") {
                value.clone()
            } else {
                bail!("Embeddings command output missing 'embeddings' field");
            }
        }
        _ => bail!("Embeddings command output must be JSON array or object"),
    };

    embeddings_value
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("Embeddings output must be a JSON array"))?
        .iter()
        .map(|row| {
            row.as_array()
                .ok_or_else(|| anyhow::anyhow!("Embedding row must be an array"))?
                .iter()
                .map(|value| {
                    value
                        .as_f64()
                        .ok_or_else(|| anyhow::anyhow!("Embedding value must be a number"))
                        .map(|v| v as f32)
                })
                .collect::<Result<Vec<f32>>>()
        })
        .collect::<Result<Vec<Vec<f32>>>>()
}

/// Deterministic feature-hashing embedder.
///
/// Every lower-cased word is hashed with blake3 into one of `dimension`
/// buckets with a hash-derived sign, and the result is L2-normalized. Texts
/// sharing words get positive cosine similarity, which is enough for offline
/// use and tests.
pub struct HashEmbedder {
    model_id: String,
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            model_id: HASH_MODEL_ID.to_string(),
            dimension: dimension.max(1),
        }
    }

    /// Uses a custom model identifier, e.g. to simulate a model upgrade.
    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let lowered = text.to_lowercase();
        for word in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let hash = blake3::hash(word.as_bytes());
            let bytes = hash.as_bytes();
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&bytes[..8]);
            let idx = (u64::from_le_bytes(bucket) % self.dimension as u64) as usize;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[idx] += sign;
        }
        l2_normalize(&mut vector);
        vector
    }
}

impl EmbeddingProvider for HashEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn batch_size(&self) -> usize {
        DEFAULT_HASH_BATCH_SIZE
    }

    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }
}

fn truncate_to_chars(input: &str, max_chars: usize) -> &str {
    if max_chars == 0 {
        return "";
    }
    match input.char_indices().nth(max_chars) {
        Some((idx, _)) => &input[..idx],
        None => input,
    }
}

fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vector.iter_mut() {
        *value /= norm;
    }
}

fn parse_usize_env(name: &str, default: usize) -> Result<usize> {
    match env::var(name) {
        Ok(raw) => {
            let value = raw.trim();
            if value.is_empty() {
                Ok(default)
            } else {
                value
                    .parse::<usize>()
                    .with_context(|| format!("Invalid {} value: {}", name, value))
            }
        }
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("Failed to read {}", name)),
    }
}

fn parse_bool_env(name: &str, default: bool) -> Result<bool> {
    match env::var(name) {
        Ok(raw) => {
            let value = raw.trim().to_lowercase();
            if value.is_empty() {
                return Ok(default);
            }
            match value.as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                other => bail!("Invalid {} value: {}", name, other),
            }
        }
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("Failed to read {}", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn test_hash_embedder_is_deterministic() {
        let provider = HashEmbedder::new(64);
        assert_eq!(provider.model_id(), HASH_MODEL_ID);

        let a = provider.embed_one("Boho summer party").unwrap();
        let b = provider.embed_one("boho SUMMER party!").unwrap();
        assert_eq!(a.len(), 64);
        assert_eq!(a, b);
        assert!((cosine(&a, &a) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hash_embedder_similarity_tracks_shared_words() {
        let provider = HashEmbedder::new(256);
        let query = provider.embed_one("party boho summer").unwrap();
        let close = provider.embed_one("a boho look for a summer party").unwrap();
        let far = provider.embed_one("classic winter office coat").unwrap();
        assert!(cosine(&query, &close) > cosine(&query, &far));
    }

    #[test]
    fn test_empty_embed() {
        let provider = HashEmbedder::new(8);
        assert!(provider.embed_texts(&[]).unwrap().is_empty());
        let zero = provider.embed_one("   ").unwrap();
        assert!(zero.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_parse_command_output_shapes() {
        let direct = parse_command_output("[[1.0, 2.0], [3.0, 4.0]]").unwrap();
        assert_eq!(direct, vec![vec![1.0, 2.0], vec![3.0, 4.0]]);

        let wrapped = parse_command_output(r#"{"embeddings": [[0.5]]}"#).unwrap();
        assert_eq!(wrapped, vec![vec![0.5]]);

        assert!(parse_command_output(r#"{"nope": []}"#).is_err());
        assert!(parse_command_output("[[\"x\"]]").is_err());
    }

    #[test]
    fn test_command_provider_round_trip() {
        let provider = CommandProvider::new(
            "cat > /dev/null; echo '[[0.1, 0.2, 0.3]]'".to_string(),
            "external".to_string(),
            3,
        );
        let vector = provider.embed_one("hello").unwrap();
        assert_eq!(vector.len(), 3);
        assert_eq!(provider.model_id(), "external");
    }

    #[test]
    fn test_truncate_to_chars() {
        assert_eq!(truncate_to_chars("hello", 2), "he");
        assert_eq!(truncate_to_chars("hello", 5), "hello");
        assert_eq!(truncate_to_chars("héllo", 2), "hé");
        assert_eq!(truncate_to_chars("hello", 0), "");
    }
}
