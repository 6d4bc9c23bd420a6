// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ingestion and retrieval entry points.
//!
//! [`Engine`] wires the segmenter, extractor, embedding adapter and index for
//! ingestion, and the query builder, retriever and context assembler for
//! retrieval. It is `Send + Sync`: documents can be ingested while requests
//! are served from other threads.

use indicatif::ProgressBar;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::Config;
use crate::embedding::{EmbeddingAdapter, EmbeddingProvider, RetryPolicy};
use crate::errors::{RagError, Result};
use crate::index::{ChunkIndex, FilterPredicate, IndexStats, IndexedChunk};
use crate::ingest::{MetadataExtractor, Segmenter, SegmenterConfig, SourceDocument};
use crate::profile::UserProfile;
use crate::query::{ContextAssembler, Provenance, QueryBuilder, Retriever};
use crate::vocabulary::{ProfileFacet, TagSet, Vocabulary};

/// Outcome of ingesting one document in a batch.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub source: String,
    /// Chunks stored; 0 on failure.
    pub chunks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<IngestFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestFailure {
    pub kind: &'static str,
    pub message: String,
}

impl IngestReport {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Answer to a retrieval request.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResponse {
    pub query_text: String,
    /// Passage texts in rank order.
    pub passages: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Vec<Provenance>>,
    pub applied_filter: FilterPredicate,
    pub dropped_facets: Vec<ProfileFacet>,
    /// Chunks returned by the index before dedupe and budgeting.
    pub candidates: usize,
    pub tokens_used: usize,
}

/// Engine-level knobs that are not owned by a single component.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub segmenter: SegmenterConfig,
    pub retry: RetryPolicy,
    pub relaxation_order: Vec<ProfileFacet>,
    pub dedup_overlap_ratio: f64,
    pub token_budget: usize,
    pub default_language: String,
    /// Chunks below this metadata confidence are not stored.
    pub min_confidence: Option<f32>,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            segmenter: config.segmenter().segmenter_config()?,
            retry: config.embeddings().retry_policy(),
            relaxation_order: config.retrieval().relaxation_order()?,
            dedup_overlap_ratio: config.retrieval().dedup_overlap_ratio(),
            token_budget: config.retrieval().token_budget(),
            default_language: config.index().default_language().to_string(),
            min_confidence: config.index().min_confidence(),
        })
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            segmenter: SegmenterConfig::default(),
            retry: RetryPolicy::default(),
            relaxation_order: ProfileFacet::DEFAULT_RELAXATION.to_vec(),
            dedup_overlap_ratio: crate::query::DEFAULT_DEDUP_OVERLAP_RATIO,
            token_budget: 1200,
            default_language: "en".to_string(),
            min_confidence: None,
        }
    }
}

pub struct Engine {
    segmenter: Segmenter,
    extractor: MetadataExtractor,
    adapter: EmbeddingAdapter,
    index: Arc<ChunkIndex>,
    vocabulary: Arc<Vocabulary>,
    retriever: Retriever,
    assembler: ContextAssembler,
    token_budget: usize,
    min_confidence: Option<f32>,
    low_confidence: AtomicU64,
}

impl Engine {
    /// Opens the engine described by `config`: vocabulary, provider and index.
    pub fn open(config: &Config) -> Result<Self> {
        let settings = EngineSettings::from_config(config)?;
        let vocabulary = Arc::new(config.index().load_vocabulary()?);
        let provider = config.embeddings().build_provider()?;
        let index = Arc::new(ChunkIndex::open(config.index().path(), vocabulary.version())?);
        Self::new(settings, vocabulary, provider, index)
    }

    /// Builds an engine from already constructed parts.
    pub fn new(
        settings: EngineSettings,
        vocabulary: Arc<Vocabulary>,
        provider: Arc<dyn EmbeddingProvider>,
        index: Arc<ChunkIndex>,
    ) -> Result<Self> {
        let adapter = EmbeddingAdapter::new(provider, settings.retry);
        let retriever = Retriever::new(
            QueryBuilder::new(Arc::clone(&vocabulary)),
            adapter.clone(),
            Arc::clone(&index),
        )
        .with_relaxation_order(settings.relaxation_order);

        Ok(Self {
            segmenter: Segmenter::new(settings.segmenter)?,
            extractor: MetadataExtractor::new(Arc::clone(&vocabulary))
                .with_default_language(settings.default_language),
            adapter,
            index,
            vocabulary,
            retriever,
            assembler: ContextAssembler::new(settings.dedup_overlap_ratio),
            token_budget: settings.token_budget,
            min_confidence: settings.min_confidence,
            low_confidence: AtomicU64::new(0),
        })
    }

    pub fn index(&self) -> &ChunkIndex {
        &self.index
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    pub fn adapter(&self) -> &EmbeddingAdapter {
        &self.adapter
    }

    /// Extractor candidates discarded as out of vocabulary so far.
    pub fn rejected_tags(&self) -> u64 {
        self.extractor.rejected_count()
    }

    /// Chunks held back below `min_confidence` so far.
    pub fn low_confidence_chunks(&self) -> u64 {
        self.low_confidence.load(Ordering::Relaxed)
    }

    /// Ingests one document, replacing any chunks previously stored for `source`.
    ///
    /// Hints are validated against the vocabulary first; an unknown value
    /// rejects the whole document and leaves the index untouched. Returns the
    /// number of chunks stored, which excludes chunks held back by the
    /// confidence threshold.
    pub fn ingest(&self, source: &str, text: &str, hints: &TagSet) -> Result<usize> {
        if source.trim().is_empty() {
            return Err(RagError::Validation("source name must not be empty".to_string()));
        }
        self.vocabulary.validate_tags(hints)?;
        self.index
            .ensure_model(self.adapter.model_id(), self.adapter.dimension())?;

        let segments = self.segmenter.segment(text);
        let texts: Vec<String> = segments.iter().map(|s| s.text.clone()).collect();
        let embeddings = self.adapter.embed_batch(&texts)?;

        let mut chunks: Vec<IndexedChunk> = segments
            .iter()
            .zip(embeddings)
            .map(|(segment, embedding)| {
                let tags = self.extractor.extract(&segment.text, hints);
                IndexedChunk::new(source, segment, tags, embedding)
            })
            .collect();

        if let Some(min) = self.min_confidence {
            let before = chunks.len();
            chunks.retain(|chunk| chunk.confidence >= min);
            let held_back = before - chunks.len();
            if held_back > 0 {
                self.low_confidence
                    .fetch_add(held_back as u64, Ordering::Relaxed);
                debug!(source, held_back, min_confidence = min, "held back low-confidence chunks");
            }
        }

        let (removed, stored) = self.index.replace_source(source, chunks)?;
        info!(source, chunks = stored, replaced = removed, "ingested document");
        Ok(stored)
    }

    /// Ingests a parsed source document.
    pub fn ingest_document(&self, doc: &SourceDocument) -> Result<usize> {
        let hints = doc.tag_hints()?;
        self.ingest(&doc.source, &doc.text, &hints)
    }

    /// Ingests documents in parallel; each document succeeds or fails on its own.
    ///
    /// Documents sharing a source run one after another in input order, so
    /// the last one wins. Reports come back in input order.
    pub fn ingest_batch(
        &self,
        docs: &[SourceDocument],
        progress: Option<&ProgressBar>,
    ) -> Vec<IngestReport> {
        let mut groups: Vec<Vec<usize>> = Vec::new();
        let mut by_source: HashMap<&str, usize> = HashMap::new();
        for (i, doc) in docs.iter().enumerate() {
            let group = *by_source.entry(doc.source.as_str()).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[group].push(i);
        }

        let mut reports: Vec<(usize, IngestReport)> = groups
            .par_iter()
            .flat_map_iter(|group| {
                group
                    .iter()
                    .map(|&i| (i, self.ingest_with_report(&docs[i], progress)))
                    .collect::<Vec<_>>()
            })
            .collect();
        reports.sort_by_key(|(i, _)| *i);
        reports.into_iter().map(|(_, report)| report).collect()
    }

    fn ingest_with_report(&self, doc: &SourceDocument, progress: Option<&ProgressBar>) -> IngestReport {
        let report = match self.ingest_document(doc) {
            Ok(chunks) => IngestReport {
                source: doc.source.clone(),
                chunks,
                error: None,
            },
            Err(e) => {
                tracing::warn!(source = %doc.source, error = %e, "failed to ingest document");
                IngestReport {
                    source: doc.source.clone(),
                    chunks: 0,
                    error: Some(IngestFailure {
                        kind: e.kind(),
                        message: e.to_string(),
                    }),
                }
            }
        };
        if let Some(pb) = progress {
            pb.inc(1);
        }
        report
    }

    /// Removes every chunk of `source`.
    pub fn delete_source(&self, source: &str) -> Result<usize> {
        let removed = self.index.delete_by_source(source)?;
        debug!(source, removed, "deleted source");
        Ok(removed)
    }

    /// Retrieves grounding passages for `profile` with the configured token budget.
    pub fn retrieve(
        &self,
        profile: &UserProfile,
        k_target: usize,
        k_min: usize,
        with_provenance: bool,
    ) -> Result<RetrievalResponse> {
        self.retrieve_with_budget(profile, k_target, k_min, self.token_budget, with_provenance)
    }

    pub fn retrieve_with_budget(
        &self,
        profile: &UserProfile,
        k_target: usize,
        k_min: usize,
        token_budget: usize,
        with_provenance: bool,
    ) -> Result<RetrievalResponse> {
        let outcome = self.retriever.retrieve(profile, k_target, k_min)?;
        let context = self
            .assembler
            .assemble(&outcome.results, token_budget, with_provenance);

        debug!(
            candidates = outcome.results.len(),
            passages = context.passages.len(),
            duplicates = context.duplicates_removed,
            tokens = context.tokens_used,
            "assembled context"
        );

        Ok(RetrievalResponse {
            query_text: outcome.query_text,
            passages: context.passages,
            provenance: context.provenance,
            applied_filter: outcome.applied_filter,
            dropped_facets: outcome.dropped,
            candidates: outcome.results.len(),
            tokens_used: context.tokens_used,
        })
    }

    pub fn stats(&self) -> Result<IndexStats> {
        self.index.stats()
    }

    /// Drops every chunk and unpins the embedding model.
    pub fn clear(&self) -> Result<()> {
        self.index.clear()
    }
}
