// SPDX-License-Identifier: MIT OR Apache-2.0

//! Retrying wrapper around an [`EmbeddingProvider`].
//!
//! Transient provider failures are retried with exponential backoff; once the
//! retry budget is spent the call fails with [`RagError::Adapter`]. Every
//! returned vector is checked against the provider's declared dimension.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::provider::EmbeddingProvider;
use crate::errors::{RagError, Result};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BASE_DELAY_MS: u64 = 100;

/// Retry policy: `max_retries` extra attempts, delays doubling from `base_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Delay before retry number `attempt` (1-based).
    fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

/// A vector tagged with the model that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub model_id: String,
    pub vector: Vec<f32>,
}

/// The engine's single point of contact with the embedding model.
#[derive(Clone)]
pub struct EmbeddingAdapter {
    provider: Arc<dyn EmbeddingProvider>,
    retry: RetryPolicy,
}

impl EmbeddingAdapter {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, retry: RetryPolicy) -> Self {
        Self { provider, retry }
    }

    pub fn model_id(&self) -> &str {
        self.provider.model_id()
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    /// Embeds one text.
    pub fn embed(&self, text: &str) -> Result<Embedding> {
        let mut vectors = self.embed_batch(&[text.to_string()])?;
        vectors.pop().ok_or_else(|| RagError::Adapter {
            attempts: 1,
            reason: "provider returned no embedding".to_string(),
        })
    }

    /// Embeds texts in provider-sized batches, retrying each batch.
    pub fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let batch_size = self.provider.batch_size().max(1);
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(batch_size) {
            for vector in self.embed_with_retry(batch)? {
                out.push(Embedding {
                    model_id: self.provider.model_id().to_string(),
                    vector,
                });
            }
        }
        Ok(out)
    }

    fn embed_with_retry(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut last_error = String::new();

        for attempt in 0..=self.retry.max_retries {
            if attempt > 0 {
                let delay = self.retry.delay_for(attempt);
                std::thread::sleep(delay);
                debug!(attempt, ?delay, "retrying embedding request");
            }

            match self.provider.embed_texts(batch) {
                Ok(vectors) => return self.check_shape(batch.len(), vectors, attempt + 1),
                Err(e) => {
                    warn!(attempt, error = %e, "embedding request failed");
                    last_error = format!("{:#}", e);
                }
            }
        }

        Err(RagError::Adapter {
            attempts: self.retry.max_retries + 1,
            reason: last_error,
        })
    }

    // A malformed response is not retried: the same input gives the same output.
    fn check_shape(
        &self,
        expected: usize,
        vectors: Vec<Vec<f32>>,
        attempts: u32,
    ) -> Result<Vec<Vec<f32>>> {
        if vectors.len() != expected {
            return Err(RagError::Adapter {
                attempts,
                reason: format!(
                    "provider returned {} vectors for {} texts",
                    vectors.len(),
                    expected
                ),
            });
        }
        let dimension = self.provider.dimension();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
            return Err(RagError::Adapter {
                attempts,
                reason: format!(
                    "provider returned a {}-dimensional vector, expected {}",
                    bad.len(),
                    dimension
                ),
            });
        }
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::provider::HashEmbedder;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` calls, then answers with unit vectors.
    struct FlakyProvider {
        failures: u32,
        calls: AtomicU32,
        dimension: usize,
        answer_dimension: usize,
    }

    impl FlakyProvider {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                dimension: 4,
                answer_dimension: 4,
            }
        }
    }

    impl EmbeddingProvider for FlakyProvider {
        fn model_id(&self) -> &str {
            "flaky"
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn batch_size(&self) -> usize {
            2
        }

        fn embed_texts(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                anyhow::bail!("transient failure {}", call);
            }
            Ok(texts
                .iter()
                .map(|_| {
                    let mut v = vec![0.0; self.answer_dimension];
                    v[0] = 1.0;
                    v
                })
                .collect())
        }
    }

    fn fast_retry(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(1))
    }

    #[test]
    fn test_retries_transient_failures() {
        let provider = Arc::new(FlakyProvider::new(2));
        let adapter = EmbeddingAdapter::new(provider.clone(), fast_retry(3));
        let embedding = adapter.embed("boho").unwrap();
        assert_eq!(embedding.model_id, "flaky");
        assert_eq!(embedding.vector.len(), 4);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_gives_up_after_budget() {
        let provider = Arc::new(FlakyProvider::new(10));
        let adapter = EmbeddingAdapter::new(provider.clone(), fast_retry(2));
        let err = adapter.embed("boho").unwrap_err();
        match err {
            RagError::Adapter { attempts, reason } => {
                assert_eq!(attempts, 3);
                assert!(reason.contains("transient failure 2"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_wrong_dimension_is_not_retried() {
        let mut provider = FlakyProvider::new(0);
        provider.answer_dimension = 3;
        let provider = Arc::new(provider);
        let adapter = EmbeddingAdapter::new(provider.clone(), fast_retry(3));
        let err = adapter.embed("boho").unwrap_err();
        assert_eq!(err.kind(), "adapter");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_batches_follow_provider_batch_size() {
        let provider = Arc::new(FlakyProvider::new(0));
        let adapter = EmbeddingAdapter::new(provider.clone(), RetryPolicy::none());
        let texts: Vec<String> = (0..5).map(|i| format!("text {i}")).collect();
        let out = adapter.embed_batch(&texts).unwrap();
        assert_eq!(out.len(), 5);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::new(4, Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn test_hash_provider_through_adapter() {
        let adapter = EmbeddingAdapter::new(Arc::new(HashEmbedder::new(32)), RetryPolicy::default());
        assert_eq!(adapter.dimension(), 32);
        assert_eq!(adapter.embed("a").unwrap(), adapter.embed("a").unwrap());
    }
}
