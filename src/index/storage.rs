// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite-backed chunk index.
//!
//! Chunks (text, metadata, vector) are persisted in a single SQLite file and
//! mirrored in an in-memory snapshot that serves similarity queries. Writes go
//! through the connection inside a transaction and are published to the
//! snapshot afterwards, so readers never observe a half-written chunk.
//!
//! The first insert pins the embedding model identifier and dimension in the
//! `meta` table. Inserts and queries under any other model are rejected until
//! the index is cleared.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::filter::FilterPredicate;
use crate::embedding::Embedding;
use crate::errors::{RagError, Result};
use crate::ingest::{confidence, Segment};
use crate::vocabulary::TagSet;

const SCHEMA_VERSION: &str = "2";
const META_SCHEMA_VERSION: &str = "schema_version";
const META_MODEL_ID: &str = "model_id";
const META_DIMENSION: &str = "dimension";
const META_VOCABULARY_VERSION: &str = "vocabulary_version";

/// A chunk as stored in the index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexedChunk {
    /// Stable id derived from the source name and ordinal.
    pub chunk_id: String,
    pub source: String,
    pub ordinal: usize,
    pub token_start: usize,
    pub token_end: usize,
    /// Tokens shared with the previous chunk of the same source.
    pub overlap_tokens: usize,
    /// blake3 hash of `text`.
    pub content_hash: String,
    pub text: String,
    pub tags: TagSet,
    /// Metadata confidence in `[0, 1]`, derived from `tags`.
    pub confidence: f32,
    pub model_id: String,
    #[serde(skip)]
    pub embedding: Vec<f32>,
}

impl IndexedChunk {
    /// Builds an index entry for one segment of `source`.
    pub fn new(source: &str, segment: &Segment, tags: TagSet, embedding: Embedding) -> Self {
        Self {
            chunk_id: chunk_id(source, segment.ordinal),
            source: source.to_string(),
            ordinal: segment.ordinal,
            token_start: segment.token_start,
            token_end: segment.token_end,
            overlap_tokens: segment.overlap_tokens,
            content_hash: content_hash(&segment.text),
            text: segment.text.clone(),
            confidence: confidence(&tags),
            tags,
            model_id: embedding.model_id,
            embedding: embedding.vector,
        }
    }

    pub fn token_len(&self) -> usize {
        self.token_end - self.token_start
    }
}

/// Stable chunk identifier: hash of the source name and ordinal.
pub fn chunk_id(source: &str, ordinal: usize) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(source.as_bytes());
    hasher.update(&[0]);
    hasher.update(ordinal.to_string().as_bytes());
    hasher.finalize().to_hex()[..16].to_string()
}

pub fn content_hash(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

/// A query hit.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Arc<IndexedChunk>,
    /// Cosine similarity with the query vector.
    pub score: f32,
}

/// Summary of the index contents.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub path: Option<PathBuf>,
    pub chunks: usize,
    pub sources: usize,
    pub model_id: Option<String>,
    pub dimension: Option<usize>,
    pub vocabulary_version: Option<String>,
}

#[derive(Debug, Default)]
struct Snapshot {
    chunks: BTreeMap<String, Arc<IndexedChunk>>,
    model_id: Option<String>,
    dimension: Option<usize>,
}

impl Snapshot {
    /// Rejects a model that differs from the pinned one.
    fn check_model(&self, model_id: &str, dimension: usize) -> Result<()> {
        match (&self.model_id, self.dimension) {
            (Some(pinned), Some(pinned_dim)) if pinned != model_id || pinned_dim != dimension => {
                Err(RagError::EmbeddingVersion {
                    expected: format!("{}/{}", pinned, pinned_dim),
                    actual: format!("{}/{}", model_id, dimension),
                })
            }
            _ => Ok(()),
        }
    }

    fn is_pinned(&self) -> bool {
        self.model_id.is_some()
    }
}

/// Persistent similarity index over chunks. `Send + Sync`; share it behind an `Arc`.
pub struct ChunkIndex {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
    snapshot: RwLock<Snapshot>,
    vocabulary_version: Option<String>,
}

impl ChunkIndex {
    /// Opens or creates an index at `path`.
    ///
    /// `vocabulary_version` is recorded on first open; opening an existing
    /// index under a different version logs a warning.
    pub fn open<P: AsRef<Path>>(path: P, vocabulary_version: &str) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    RagError::IndexUnavailable(format!(
                        "failed to create directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let conn = Connection::open(&path).map_err(|e| {
            RagError::IndexUnavailable(format!("failed to open {}: {}", path.display(), e))
        })?;
        Self::from_connection(conn, Some(path), vocabulary_version)
    }

    /// In-memory index, mostly for tests.
    pub fn open_in_memory(vocabulary_version: &str) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, None, vocabulary_version)
    }

    fn from_connection(
        conn: Connection,
        path: Option<PathBuf>,
        vocabulary_version: &str,
    ) -> Result<Self> {
        init_schema(&conn)?;

        let stored_vocabulary = get_meta(&conn, META_VOCABULARY_VERSION)?;
        match stored_vocabulary.as_deref() {
            None => set_meta(&conn, META_VOCABULARY_VERSION, vocabulary_version)?,
            Some(stored) if stored != vocabulary_version => {
                tracing::warn!(
                    index = stored,
                    loaded = vocabulary_version,
                    "index was built with a different vocabulary version"
                );
            }
            Some(_) => {}
        }

        let snapshot = load_snapshot(&conn)?;
        tracing::debug!(
            chunks = snapshot.chunks.len(),
            model = ?snapshot.model_id,
            "opened chunk index"
        );

        Ok(Self {
            conn: Mutex::new(conn),
            path,
            snapshot: RwLock::new(snapshot),
            vocabulary_version: Some(stored_vocabulary.unwrap_or_else(|| vocabulary_version.to_string())),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Fails with `EmbeddingVersion` when vectors from `model_id` / `dimension`
    /// would be rejected by this index.
    pub fn ensure_model(&self, model_id: &str, dimension: usize) -> Result<()> {
        self.read_snapshot()?.check_model(model_id, dimension)
    }

    /// Adds or replaces one chunk.
    pub fn insert(&self, chunk: IndexedChunk) -> Result<()> {
        self.insert_batch(vec![chunk]).map(|_| ())
    }

    /// Adds or replaces chunks in a single transaction.
    ///
    /// Either every chunk is stored or none is.
    pub fn insert_batch(&self, chunks: Vec<IndexedChunk>) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        self.write_chunks(None, chunks).map(|(_, stored)| stored)
    }

    /// Atomically replaces every chunk of `source` with `chunks`.
    ///
    /// Readers see either the old chunks or the new ones, never a mix. Returns
    /// `(removed, stored)`.
    pub fn replace_source(&self, source: &str, chunks: Vec<IndexedChunk>) -> Result<(usize, usize)> {
        if let Some(stray) = chunks.iter().find(|c| c.source != source) {
            return Err(RagError::Validation(format!(
                "chunk {} belongs to {}, not {}",
                stray.chunk_id, stray.source, source
            )));
        }
        self.write_chunks(Some(source), chunks)
    }

    fn write_chunks(
        &self,
        replace: Option<&str>,
        chunks: Vec<IndexedChunk>,
    ) -> Result<(usize, usize)> {
        let pin = match chunks.first() {
            Some(first) => {
                let dimension = first.embedding.len();
                if dimension == 0 {
                    return Err(RagError::Validation("empty embedding vector".to_string()));
                }
                Some((first.model_id.clone(), dimension))
            }
            None => None,
        };

        let mut conn = self.lock_conn()?;
        let pinned = {
            let snapshot = self.read_snapshot()?;
            if let Some((model_id, dimension)) = &pin {
                snapshot.check_model(model_id, *dimension)?;
            }
            snapshot.is_pinned()
        };
        if let Some((model_id, dimension)) = &pin {
            for chunk in &chunks[1..] {
                if &chunk.model_id != model_id || chunk.embedding.len() != *dimension {
                    return Err(RagError::EmbeddingVersion {
                        expected: format!("{}/{}", model_id, dimension),
                        actual: format!("{}/{}", chunk.model_id, chunk.embedding.len()),
                    });
                }
            }
        }

        let tx = conn.transaction()?;
        let removed = match replace {
            Some(source) => tx.execute("DELETE FROM chunks WHERE source = ?1", params![source])?,
            None => 0,
        };
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO chunks (
                    chunk_id, source, ordinal, token_start, token_end, overlap_tokens,
                    content_hash, text, tags, confidence, model_id, embedding
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                ON CONFLICT(chunk_id) DO UPDATE SET
                    source = excluded.source,
                    ordinal = excluded.ordinal,
                    token_start = excluded.token_start,
                    token_end = excluded.token_end,
                    overlap_tokens = excluded.overlap_tokens,
                    content_hash = excluded.content_hash,
                    text = excluded.text,
                    tags = excluded.tags,
                    confidence = excluded.confidence,
                    model_id = excluded.model_id,
                    embedding = excluded.embedding
                "#,
            )?;
            for chunk in &chunks {
                let tags = serde_json::to_string(&chunk.tags)
                    .map_err(|e| RagError::Validation(format!("unserializable tags: {}", e)))?;
                stmt.execute(params![
                    chunk.chunk_id,
                    chunk.source,
                    chunk.ordinal as i64,
                    chunk.token_start as i64,
                    chunk.token_end as i64,
                    chunk.overlap_tokens as i64,
                    chunk.content_hash,
                    chunk.text,
                    tags,
                    chunk.confidence as f64,
                    chunk.model_id,
                    embedding_to_blob(&chunk.embedding),
                ])?;
            }
        }
        let newly_pinned = if pinned { None } else { pin };
        if let Some((model_id, dimension)) = &newly_pinned {
            set_meta(&tx, META_MODEL_ID, model_id)?;
            set_meta(&tx, META_DIMENSION, &dimension.to_string())?;
        }
        tx.commit()?;

        let stored = chunks.len();
        let mut snapshot = self.write_snapshot()?;
        if let Some(source) = replace {
            snapshot.chunks.retain(|_, chunk| chunk.source != source);
        }
        if let Some((model_id, dimension)) = newly_pinned {
            snapshot.model_id = Some(model_id);
            snapshot.dimension = Some(dimension);
        }
        for chunk in chunks {
            snapshot.chunks.insert(chunk.chunk_id.clone(), Arc::new(chunk));
        }
        drop(snapshot);
        drop(conn);

        tracing::debug!(stored, removed, "wrote chunks");
        Ok((removed, stored))
    }

    /// Removes every chunk of `source`; returns how many were removed.
    pub fn delete_by_source(&self, source: &str) -> Result<usize> {
        let conn = self.lock_conn()?;
        let deleted = conn.execute("DELETE FROM chunks WHERE source = ?1", params![source])?;

        let mut snapshot = self.write_snapshot()?;
        snapshot.chunks.retain(|_, chunk| chunk.source != source);
        Ok(deleted)
    }

    /// Returns up to `k` chunks passing `filter`, most similar first.
    ///
    /// Ties are broken by ordinal, then chunk id. Chunks that fail the filter
    /// are never used to pad the result.
    pub fn query(
        &self,
        query: &Embedding,
        filter: &FilterPredicate,
        k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let snapshot = self.read_snapshot()?;
        snapshot.check_model(&query.model_id, query.vector.len())?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut results: Vec<ScoredChunk> = snapshot
            .chunks
            .values()
            .filter(|chunk| filter.matches(&chunk.tags))
            .map(|chunk| ScoredChunk {
                score: cosine_similarity(&query.vector, &chunk.embedding),
                chunk: Arc::clone(chunk),
            })
            .collect();
        drop(snapshot);

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.ordinal.cmp(&b.chunk.ordinal))
                .then_with(|| a.chunk.chunk_id.cmp(&b.chunk.chunk_id))
        });
        results.truncate(k);

        Ok(results)
    }

    pub fn get(&self, chunk_id: &str) -> Result<Option<Arc<IndexedChunk>>> {
        Ok(self.read_snapshot()?.chunks.get(chunk_id).cloned())
    }

    /// Distinct source names, sorted.
    pub fn list_sources(&self) -> Result<Vec<String>> {
        let snapshot = self.read_snapshot()?;
        let sources: BTreeSet<&str> = snapshot.chunks.values().map(|c| c.source.as_str()).collect();
        Ok(sources.into_iter().map(str::to_string).collect())
    }

    /// Chunks of one source in ordinal order.
    pub fn chunks_for_source(&self, source: &str) -> Result<Vec<Arc<IndexedChunk>>> {
        let snapshot = self.read_snapshot()?;
        let mut chunks: Vec<Arc<IndexedChunk>> = snapshot
            .chunks
            .values()
            .filter(|c| c.source == source)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| c.ordinal);
        Ok(chunks)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.read_snapshot()?.chunks.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn stats(&self) -> Result<IndexStats> {
        let sources = self.list_sources()?.len();
        let snapshot = self.read_snapshot()?;
        Ok(IndexStats {
            path: self.path.clone(),
            chunks: snapshot.chunks.len(),
            sources,
            model_id: snapshot.model_id.clone(),
            dimension: snapshot.dimension,
            vocabulary_version: self.vocabulary_version.clone(),
        })
    }

    /// Deletes every chunk and unpins the embedding model.
    pub fn clear(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute_batch(&format!(
            "DELETE FROM chunks; DELETE FROM meta WHERE key IN ('{}', '{}');",
            META_MODEL_ID, META_DIMENSION
        ))?;

        let mut snapshot = self.write_snapshot()?;
        *snapshot = Snapshot::default();
        tracing::info!("cleared chunk index");
        Ok(())
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| RagError::IndexUnavailable("index connection lock poisoned".to_string()))
    }

    fn read_snapshot(&self) -> Result<RwLockReadGuard<'_, Snapshot>> {
        self.snapshot
            .read()
            .map_err(|_| RagError::IndexUnavailable("index snapshot lock poisoned".to_string()))
    }

    fn write_snapshot(&self) -> Result<RwLockWriteGuard<'_, Snapshot>> {
        self.snapshot
            .write()
            .map_err(|_| RagError::IndexUnavailable("index snapshot lock poisoned".to_string()))
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chunks (
            chunk_id TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            ordinal INTEGER NOT NULL,
            token_start INTEGER NOT NULL,
            token_end INTEGER NOT NULL,
            overlap_tokens INTEGER NOT NULL,
            content_hash TEXT NOT NULL,
            text TEXT NOT NULL,
            tags TEXT NOT NULL,
            confidence REAL NOT NULL DEFAULT 0,
            model_id TEXT NOT NULL,
            embedding BLOB NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_chunks_source
            ON chunks(source, ordinal);
        "#,
    )?;

    match get_meta(conn, META_SCHEMA_VERSION)? {
        None => set_meta(conn, META_SCHEMA_VERSION, SCHEMA_VERSION)?,
        Some(version) if version == "1" => migrate_v1(conn)?,
        Some(version) if version != SCHEMA_VERSION => {
            return Err(RagError::IndexUnavailable(format!(
                "unsupported index schema version {}",
                version
            )));
        }
        Some(_) => {}
    }
    Ok(())
}

/// Version 1 indexes predate chunk confidence; scores are recomputed from tags.
fn migrate_v1(conn: &Connection) -> Result<()> {
    let has_column = conn
        .prepare("SELECT name FROM pragma_table_info('chunks') WHERE name = 'confidence'")?
        .exists([])?;
    if !has_column {
        conn.execute(
            "ALTER TABLE chunks ADD COLUMN confidence REAL NOT NULL DEFAULT 0",
            [],
        )?;
    }

    let rows: Vec<(String, String)> = conn
        .prepare("SELECT chunk_id, tags FROM chunks")?
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<_, _>>()?;
    for (chunk_id, tags_json) in rows {
        let tags: TagSet = serde_json::from_str(&tags_json).map_err(|e| {
            RagError::IndexUnavailable(format!("corrupt tags for chunk {}: {}", chunk_id, e))
        })?;
        conn.execute(
            "UPDATE chunks SET confidence = ?1 WHERE chunk_id = ?2",
            params![confidence(&tags) as f64, chunk_id],
        )?;
    }

    set_meta(conn, META_SCHEMA_VERSION, SCHEMA_VERSION)?;
    tracing::info!("migrated chunk index to schema version {}", SCHEMA_VERSION);
    Ok(())
}

fn load_snapshot(conn: &Connection) -> Result<Snapshot> {
    let mut stmt = conn.prepare(
        r#"
        SELECT chunk_id, source, ordinal, token_start, token_end, overlap_tokens,
               content_hash, text, tags, confidence, model_id, embedding
        FROM chunks
        "#,
    )?;

    let chunks = stmt
        .query_map([], |row| {
            let tags_json: String = row.get(8)?;
            let tags: TagSet = serde_json::from_str(&tags_json).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e))
            })?;
            let embedding_blob: Vec<u8> = row.get(11)?;
            Ok(IndexedChunk {
                chunk_id: row.get(0)?,
                source: row.get(1)?,
                ordinal: row.get::<_, i64>(2)? as usize,
                token_start: row.get::<_, i64>(3)? as usize,
                token_end: row.get::<_, i64>(4)? as usize,
                overlap_tokens: row.get::<_, i64>(5)? as usize,
                content_hash: row.get(6)?,
                text: row.get(7)?,
                tags,
                confidence: row.get::<_, f64>(9)? as f32,
                model_id: row.get(10)?,
                embedding: blob_to_embedding(&embedding_blob),
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let model_id = get_meta(conn, META_MODEL_ID)?;
    let dimension = match get_meta(conn, META_DIMENSION)? {
        Some(raw) => Some(raw.parse::<usize>().map_err(|_| {
            RagError::IndexUnavailable(format!("corrupt dimension in index meta: {}", raw))
        })?),
        None => None,
    };

    Ok(Snapshot {
        chunks: chunks
            .into_iter()
            .map(|chunk| (chunk.chunk_id.clone(), Arc::new(chunk)))
            .collect(),
        model_id,
        dimension,
    })
}

fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(value)
}

fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO meta (key, value)
        VALUES (?1, ?2)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
        params![key, value],
    )?;
    Ok(())
}

/// Converts an embedding vector to a compact little-endian blob.
fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return 0.0;
    }

    dot_product / (magnitude_a * magnitude_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocabulary::Facet;
    use tempfile::tempdir;

    fn embedding(model: &str, vector: Vec<f32>) -> Embedding {
        Embedding {
            model_id: model.to_string(),
            vector,
        }
    }

    fn chunk(source: &str, ordinal: usize, text: &str, tags: TagSet, vector: Vec<f32>) -> IndexedChunk {
        let segment = Segment {
            ordinal,
            token_start: ordinal * 10,
            token_end: ordinal * 10 + 10,
            overlap_tokens: 0,
            overlap_bytes: 0,
            text: text.to_string(),
        };
        IndexedChunk::new(source, &segment, tags, embedding("m1", vector))
    }

    #[test]
    fn test_chunk_id_is_stable() {
        assert_eq!(chunk_id("a", 0), chunk_id("a", 0));
        assert_ne!(chunk_id("a", 0), chunk_id("a", 1));
        assert_ne!(chunk_id("a1", 0), chunk_id("a", 10));
        assert_eq!(chunk_id("a", 0).len(), 16);
    }

    #[test]
    fn test_insert_and_query_ranked() {
        let index = ChunkIndex::open_in_memory("v1").unwrap();
        index
            .insert_batch(vec![
                chunk("doc", 0, "near", TagSet::new(), vec![1.0, 0.0]),
                chunk("doc", 1, "far", TagSet::new(), vec![0.0, 1.0]),
                chunk("doc", 2, "mid", TagSet::new(), vec![0.7, 0.7]),
            ])
            .unwrap();

        let results = index
            .query(&embedding("m1", vec![1.0, 0.0]), &FilterPredicate::new(), 2)
            .unwrap();
        let texts: Vec<&str> = results.iter().map(|r| r.chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["near", "mid"]);
        assert!((results[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_ties_break_by_ordinal() {
        let index = ChunkIndex::open_in_memory("v1").unwrap();
        index
            .insert_batch(vec![
                chunk("b", 3, "b3", TagSet::new(), vec![1.0, 0.0]),
                chunk("a", 1, "a1", TagSet::new(), vec![1.0, 0.0]),
                chunk("c", 2, "c2", TagSet::new(), vec![1.0, 0.0]),
            ])
            .unwrap();
        let results = index
            .query(&embedding("m1", vec![1.0, 0.0]), &FilterPredicate::new(), 3)
            .unwrap();
        let ordinals: Vec<usize> = results.iter().map(|r| r.chunk.ordinal).collect();
        assert_eq!(ordinals, vec![1, 2, 3]);
    }

    #[test]
    fn test_filter_never_pads() {
        let index = ChunkIndex::open_in_memory("v1").unwrap();
        index
            .insert_batch(vec![
                chunk("a", 0, "party", TagSet::new().with(Facet::Occasion, "party"), vec![1.0, 0.0]),
                chunk("b", 0, "office", TagSet::new().with(Facet::Occasion, "office"), vec![1.0, 0.0]),
            ])
            .unwrap();

        let filter = FilterPredicate::new().with(Facet::Occasion, "party");
        let results = index.query(&embedding("m1", vec![1.0, 0.0]), &filter, 5).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.source, "a");

        let none = FilterPredicate::new().with(Facet::Occasion, "wedding");
        assert!(index.query(&embedding("m1", vec![1.0, 0.0]), &none, 5).unwrap().is_empty());
    }

    #[test]
    fn test_insert_is_idempotent() {
        let index = ChunkIndex::open_in_memory("v1").unwrap();
        let c = chunk("a", 0, "text", TagSet::new(), vec![1.0, 0.0]);
        index.insert(c.clone()).unwrap();
        index.insert(c.clone()).unwrap();
        assert_eq!(index.len().unwrap(), 1);
        assert_eq!(index.get(&c.chunk_id).unwrap().as_deref(), Some(&c));
    }

    #[test]
    fn test_delete_by_source() {
        let index = ChunkIndex::open_in_memory("v1").unwrap();
        index
            .insert_batch(vec![
                chunk("a", 0, "a0", TagSet::new(), vec![1.0]),
                chunk("a", 1, "a1", TagSet::new(), vec![1.0]),
                chunk("b", 0, "b0", TagSet::new(), vec![1.0]),
            ])
            .unwrap();
        assert_eq!(index.delete_by_source("a").unwrap(), 2);
        assert_eq!(index.delete_by_source("a").unwrap(), 0);
        assert_eq!(index.list_sources().unwrap(), vec!["b".to_string()]);
    }

    #[test]
    fn test_replace_source_drops_stale_chunks() {
        let index = ChunkIndex::open_in_memory("v1").unwrap();
        index
            .insert_batch(vec![
                chunk("a", 0, "a0", TagSet::new(), vec![1.0]),
                chunk("a", 1, "a1", TagSet::new(), vec![1.0]),
                chunk("a", 2, "a2", TagSet::new(), vec![1.0]),
                chunk("b", 0, "b0", TagSet::new(), vec![1.0]),
            ])
            .unwrap();

        let (removed, stored) = index
            .replace_source("a", vec![chunk("a", 0, "new a0", TagSet::new(), vec![1.0])])
            .unwrap();
        assert_eq!((removed, stored), (3, 1));
        let texts: Vec<String> = index
            .chunks_for_source("a")
            .unwrap()
            .iter()
            .map(|c| c.text.clone())
            .collect();
        assert_eq!(texts, vec!["new a0"]);
        assert_eq!(index.len().unwrap(), 2);

        let err = index
            .replace_source("a", vec![chunk("b", 1, "b1", TagSet::new(), vec![1.0])])
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert_eq!(index.replace_source("a", Vec::new()).unwrap(), (1, 0));
        assert_eq!(index.list_sources().unwrap(), vec!["b".to_string()]);
    }

    #[test]
    fn test_model_is_pinned() {
        let index = ChunkIndex::open_in_memory("v1").unwrap();
        index.insert(chunk("a", 0, "a0", TagSet::new(), vec![1.0, 0.0])).unwrap();

        let mut other = chunk("b", 0, "b0", TagSet::new(), vec![1.0, 0.0]);
        other.model_id = "m2".to_string();
        let err = index.insert(other).unwrap_err();
        assert_eq!(err.kind(), "embedding_version");
        assert_eq!(index.len().unwrap(), 1);

        let err = index
            .query(&embedding("m1", vec![1.0, 0.0, 0.0]), &FilterPredicate::new(), 1)
            .unwrap_err();
        assert_eq!(err.kind(), "embedding_version");

        index.clear().unwrap();
        let mut other = chunk("b", 0, "b0", TagSet::new(), vec![1.0, 0.0]);
        other.model_id = "m2".to_string();
        index.insert(other).unwrap();
        assert_eq!(index.stats().unwrap().model_id.as_deref(), Some("m2"));
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("index.sqlite");
        let original = chunk(
            "a",
            0,
            "Layer a trench coat.",
            TagSet::new()
                .with(Facet::Technique, "layering")
                .with(Facet::Season, "autumn"),
            vec![0.1, -0.25, 1.0e-7, 3.5],
        );

        {
            let index = ChunkIndex::open(&path, "v1").unwrap();
            index.insert(original.clone()).unwrap();
        }

        let reopened = ChunkIndex::open(&path, "v1").unwrap();
        let loaded = reopened.get(&original.chunk_id).unwrap().unwrap();
        assert_eq!(*loaded, original);
        let stats = reopened.stats().unwrap();
        assert_eq!(stats.chunks, 1);
        assert_eq!(stats.dimension, Some(4));
        assert_eq!(stats.vocabulary_version.as_deref(), Some("v1"));
        assert_eq!(loaded.confidence, 0.3);
    }

    #[test]
    fn test_v1_index_gains_confidence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.sqlite");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                r#"
                CREATE TABLE meta (key TEXT PRIMARY KEY, value TEXT NOT NULL);
                CREATE TABLE chunks (
                    chunk_id TEXT PRIMARY KEY,
                    source TEXT NOT NULL,
                    ordinal INTEGER NOT NULL,
                    token_start INTEGER NOT NULL,
                    token_end INTEGER NOT NULL,
                    overlap_tokens INTEGER NOT NULL,
                    content_hash TEXT NOT NULL,
                    text TEXT NOT NULL,
                    tags TEXT NOT NULL,
                    model_id TEXT NOT NULL,
                    embedding BLOB NOT NULL
                );
                INSERT INTO meta (key, value) VALUES ('schema_version', '1');
                INSERT INTO meta (key, value) VALUES ('model_id', 'm1');
                INSERT INTO meta (key, value) VALUES ('dimension', '1');
                "#,
            )
            .unwrap();
            conn.execute(
                "INSERT INTO chunks VALUES ('c0', 'a', 0, 0, 3, 0, 'h', 'Boho for parties.', ?1, 'm1', ?2)",
                params![
                    r#"{"style_type":["boho"],"occasion":["party"]}"#,
                    embedding_to_blob(&[1.0])
                ],
            )
            .unwrap();
        }

        let index = ChunkIndex::open(&path, "v1").unwrap();
        let loaded = index.get("c0").unwrap().unwrap();
        assert_eq!(loaded.confidence, 0.4);
        assert!(loaded.tags.contains(Facet::Occasion, "party"));
    }

    #[test]
    fn test_chunks_for_source_in_order() {
        let index = ChunkIndex::open_in_memory("v1").unwrap();
        index
            .insert_batch(vec![
                chunk("a", 2, "a2", TagSet::new(), vec![1.0]),
                chunk("a", 0, "a0", TagSet::new(), vec![1.0]),
                chunk("a", 1, "a1", TagSet::new(), vec![1.0]),
            ])
            .unwrap();
        let texts: Vec<String> = index
            .chunks_for_source("a")
            .unwrap()
            .iter()
            .map(|c| c.text.clone())
            .collect();
        assert_eq!(texts, vec!["a0", "a1", "a2"]);
    }

    #[test]
    fn test_blob_round_trip() {
        let values = vec![0.0f32, -1.5, f32::MIN_POSITIVE, 42.125];
        assert_eq!(blob_to_embedding(&embedding_to_blob(&values)), values);
    }
}
