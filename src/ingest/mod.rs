// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ingestion side of the engine: segmentation, tagging and source loading.
//!
//! Documents arrive either as plain text files (the source name is the path
//! relative to the ingestion root) or as JSON / JSONL record files:
//!
//! ```json
//! {"source": "rules/layering", "text": "...", "hints": {"season": ["winter"], "occasion": "office"}}
//! ```

pub mod extractor;
pub mod segmenter;

pub use extractor::{confidence, MetadataExtractor};
pub use segmenter::{count_tokens, segment, Segment, Segmenter, SegmenterConfig};

use serde::Deserialize;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};

use crate::errors::{RagError, Result};
use crate::vocabulary::{normalize_value, Facet, TagSet};

/// Extensions picked up when ingesting a directory.
const TEXT_EXTENSIONS: &[&str] = &["txt", "md"];

/// A hint value may be a single string or a list of strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum HintValue {
    One(String),
    Many(Vec<String>),
}

impl HintValue {
    fn values(&self) -> Vec<&str> {
        match self {
            HintValue::One(value) => vec![value.as_str()],
            HintValue::Many(values) => values.iter().map(String::as_str).collect(),
        }
    }
}

/// A document waiting to be ingested.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceDocument {
    /// Source name; re-ingesting the same name replaces earlier chunks.
    pub source: String,
    /// Cleaned document text.
    pub text: String,
    /// Document-level metadata hints keyed by facet name.
    #[serde(default)]
    pub hints: BTreeMap<String, HintValue>,
}

impl SourceDocument {
    pub fn new(source: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            text: text.into(),
            hints: BTreeMap::new(),
        }
    }

    /// Adds a hint value, keeping values already present for the facet.
    pub fn add_hint(&mut self, facet: impl Into<String>, value: impl Into<String>) {
        let value = value.into();
        match self.hints.entry(facet.into()) {
            Entry::Vacant(entry) => {
                entry.insert(HintValue::One(value));
            }
            Entry::Occupied(mut entry) => {
                let mut values: Vec<String> =
                    entry.get().values().into_iter().map(str::to_string).collect();
                values.push(value);
                *entry.get_mut() = HintValue::Many(values);
            }
        }
    }

    /// Parses the raw hints into a tag set. Facet names must be known;
    /// vocabulary checks on the values happen at ingestion.
    pub fn tag_hints(&self) -> Result<TagSet> {
        parse_hints(
            self.hints
                .iter()
                .flat_map(|(facet, value)| value.values().into_iter().map(move |v| (facet.as_str(), v))),
        )
    }
}

/// Builds a tag set from `(facet, value)` pairs, normalizing values.
pub fn parse_hints<'a, I>(pairs: I) -> Result<TagSet>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut tags = TagSet::new();
    for (facet, value) in pairs {
        let facet: Facet = facet.parse()?;
        let value = normalize_value(value);
        if value.is_empty() {
            return Err(RagError::Validation(format!(
                "empty hint value for facet '{}'",
                facet
            )));
        }
        tags.insert(facet, value);
    }
    Ok(tags)
}

/// Parses a `facet=value` command line hint.
pub fn parse_hint_arg(arg: &str) -> Result<(String, String)> {
    let (facet, value) = arg.split_once('=').ok_or_else(|| {
        RagError::Validation(format!("hint '{}' must look like facet=value", arg))
    })?;
    Ok((facet.trim().to_string(), value.trim().to_string()))
}

/// Loads documents from a JSON array file or a JSONL file.
pub fn load_records<P: AsRef<Path>>(path: P) -> anyhow::Result<Vec<SourceDocument>> {
    use anyhow::Context;

    let path = path.as_ref();
    let is_jsonl = path.extension().and_then(|e| e.to_str()) == Some("jsonl");

    if is_jsonl {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open records file: {}", path.display()))?;
        let mut docs = Vec::new();
        for (line_no, line) in std::io::BufReader::new(file).lines().enumerate() {
            let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
            if line.trim().is_empty() {
                continue;
            }
            let doc: SourceDocument = serde_json::from_str(&line).with_context(|| {
                format!("Invalid record at {}:{}", path.display(), line_no + 1)
            })?;
            docs.push(doc);
        }
        Ok(docs)
    } else {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read records file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid records file: {}", path.display()))
    }
}

/// Lists `.txt` / `.md` files under `root`, sorted for stable ingestion order.
pub fn collect_text_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(|ext| TEXT_EXTENSIONS.contains(&ext))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    files
}

/// Reads text files under `root` into documents named by their relative path.
pub fn load_text_dir(root: &Path) -> anyhow::Result<Vec<SourceDocument>> {
    use anyhow::Context;

    let mut docs = Vec::new();
    for path in collect_text_files(root) {
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read file: {}", path.display()))?;
        let source = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .to_string_lossy()
            .replace('\\', "/");
        docs.push(SourceDocument::new(source, text));
    }
    Ok(docs)
}
