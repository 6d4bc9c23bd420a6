// SPDX-License-Identifier: MIT OR Apache-2.0

//! Boundary-aware text segmenter.
//!
//! Splits a cleaned document into overlapping chunks whose size, measured in
//! whitespace-delimited tokens, stays within `[min_size, max_size]`. Splits
//! prefer structural boundaries (blank lines, headings, bullets) and fall back
//! to a forced split at `max_size` tokens. Chunk texts are exact slices of the
//! document, so removing each chunk's overlap prefix and concatenating gives
//! the original text back.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::{RagError, Result};

/// Default minimum chunk size in tokens.
pub const DEFAULT_MIN_CHUNK_TOKENS: usize = 120;

/// Default maximum chunk size in tokens.
pub const DEFAULT_MAX_CHUNK_TOKENS: usize = 300;

/// Default overlap between consecutive chunks in tokens.
pub const DEFAULT_CHUNK_OVERLAP: usize = 30;

/// Heading (`#`, `## Title`), bullet (`-`, `*`, `+`, `•`) or numbered item (`1.`, `2)`).
static STRUCTURE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(#{1,6}\S*|[-*+•]|\d{1,3}[.)])$").expect("valid marker regex"));

/// Size parameters for the segmenter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmenterConfig {
    /// Minimum tokens per chunk (the last chunk may be shorter).
    pub min_size: usize,
    /// Maximum tokens per chunk.
    pub max_size: usize,
    /// Tokens shared by consecutive chunks.
    pub overlap: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            min_size: DEFAULT_MIN_CHUNK_TOKENS,
            max_size: DEFAULT_MAX_CHUNK_TOKENS,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl SegmenterConfig {
    /// Creates a validated configuration.
    pub fn new(min_size: usize, max_size: usize, overlap: usize) -> Result<Self> {
        let config = Self {
            min_size,
            max_size,
            overlap,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks `0 < overlap < min_size <= max_size`.
    pub fn validate(&self) -> Result<()> {
        if self.overlap == 0 {
            return Err(RagError::Config(
                "chunk overlap must be greater than 0".to_string(),
            ));
        }
        if self.overlap >= self.min_size {
            return Err(RagError::Config(format!(
                "chunk overlap ({}) must be less than min chunk size ({})",
                self.overlap, self.min_size
            )));
        }
        if self.min_size > self.max_size {
            return Err(RagError::Config(format!(
                "min chunk size ({}) must not exceed max chunk size ({})",
                self.min_size, self.max_size
            )));
        }
        Ok(())
    }
}

/// One chunk of a document with its position information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Position of the chunk within the document (0-based).
    pub ordinal: usize,
    /// First token of the chunk (inclusive).
    pub token_start: usize,
    /// Token after the last one in the chunk (exclusive).
    pub token_end: usize,
    /// Tokens shared with the previous chunk.
    pub overlap_tokens: usize,
    /// Byte length of the shared prefix within `text`.
    pub overlap_bytes: usize,
    /// Exact slice of the document covered by the chunk.
    pub text: String,
}

impl Segment {
    pub fn token_len(&self) -> usize {
        self.token_end - self.token_start
    }

    /// The part of the chunk not already covered by the previous chunk.
    pub fn novel_text(&self) -> &str {
        &self.text[self.overlap_bytes..]
    }
}

/// Splits documents into overlapping chunks.
#[derive(Debug, Clone)]
pub struct Segmenter {
    config: SegmenterConfig,
}

impl Segmenter {
    /// Creates a segmenter, rejecting invalid size parameters.
    pub fn new(config: SegmenterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SegmenterConfig {
        &self.config
    }

    /// Splits `text` into chunks.
    ///
    /// Algorithm:
    /// ```text
    /// cursor = 0
    /// while tokens remaining after cursor > max_size:
    ///   split = last boundary in [cursor + min_size, cursor + max_size]
    ///           or cursor + max_size when there is none
    ///   emit [cursor, split)
    ///   cursor = split - overlap
    /// emit [cursor, total)
    /// ```
    pub fn segment(&self, text: &str) -> Vec<Segment> {
        let spans = token_spans(text);
        let total = spans.len();
        if total == 0 {
            return Vec::new();
        }

        let starts: Vec<usize> = spans.iter().map(|(start, _)| *start).collect();
        let boundaries = structural_boundaries(text, &spans);

        let byte_start = |token: usize| if token == 0 { 0 } else { starts[token] };
        let byte_end = |token: usize| if token == total { text.len() } else { starts[token] };

        let SegmenterConfig {
            min_size,
            max_size,
            overlap,
        } = self.config;

        let mut segments = Vec::new();
        let mut cursor = 0usize;
        let mut overlap_tokens = 0usize;

        loop {
            let (end, last) = if total - cursor <= max_size {
                (total, true)
            } else {
                let lo = cursor + min_size;
                let hi = cursor + max_size;
                let split = (lo..=hi).rev().find(|&i| boundaries[i]).unwrap_or(hi);
                (split, false)
            };

            let from = byte_start(cursor);
            let overlap_bytes = if overlap_tokens > 0 {
                starts[cursor + overlap_tokens] - from
            } else {
                0
            };

            segments.push(Segment {
                ordinal: segments.len(),
                token_start: cursor,
                token_end: end,
                overlap_tokens,
                overlap_bytes,
                text: text[from..byte_end(end)].to_string(),
            });

            if last {
                break;
            }
            cursor = end - overlap;
            overlap_tokens = overlap;
        }

        segments
    }

    /// Rebuilds the document from its chunks by dropping overlap prefixes.
    pub fn reconstruct(segments: &[Segment]) -> String {
        segments.iter().map(Segment::novel_text).collect()
    }
}

/// Convenience wrapper: validates the parameters and segments `text`.
pub fn segment(text: &str, min_size: usize, max_size: usize, overlap: usize) -> Result<Vec<Segment>> {
    let segmenter = Segmenter::new(SegmenterConfig::new(min_size, max_size, overlap)?)?;
    Ok(segmenter.segment(text))
}

/// Token-count approximation used for chunk sizes and context budgets.
pub fn count_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Byte spans `(start, end)` of every whitespace-delimited token.
fn token_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut current: Option<usize> = None;

    for (idx, ch) in text.char_indices() {
        match (ch.is_whitespace(), current) {
            (false, None) => current = Some(idx),
            (true, Some(start)) => {
                spans.push((start, idx));
                current = None;
            }
            _ => {}
        }
    }
    if let Some(start) = current {
        spans.push((start, text.len()));
    }

    spans
}

/// `boundaries[i]` is true when a structural unit starts at token `i`.
fn structural_boundaries(text: &str, spans: &[(usize, usize)]) -> Vec<bool> {
    let mut boundaries = vec![false; spans.len() + 1];

    for i in 1..spans.len() {
        let gap = &text[spans[i - 1].1..spans[i].0];
        let newlines = gap.matches('\n').count();
        if newlines >= 2 {
            boundaries[i] = true;
        } else if newlines == 1 {
            let token = &text[spans[i].0..spans[i].1];
            boundaries[i] = STRUCTURE_MARKER.is_match(token);
        }
    }

    boundaries
}
