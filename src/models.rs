//! Core data models shared by ingestion and retrieval.
//!
//! These types describe the documents found on disk, the chunks cut from
//! them, the version records that drive incremental ingestion, and the
//! transient hits produced per query.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

/// A file discovered by the scanner. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentDescriptor {
    /// Path relative to the KB root with separators replaced by `_`.
    pub doc_id: String,
    pub file_path: PathBuf,
    /// Lowercase hex SHA-256 of the file contents (64 chars).
    pub content_hash: String,
    pub size: u64,
    /// Lowercase extension without the leading dot.
    pub extension: String,
}

/// Caller-supplied document metadata merged into every chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub source: Option<String>,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

/// Structured chunk identity: the owning document plus the chunk position.
///
/// Rendered as `"{doc_id}:{index}"` for display and serialization, but
/// compared field-wise, so `doc1` and `doc10` never alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId {
    pub doc_id: String,
    pub index: usize,
}

impl ChunkId {
    pub fn new(doc_id: impl Into<String>, index: usize) -> Self {
        Self {
            doc_id: doc_id.into(),
            index,
        }
    }

    /// Whether this chunk belongs to `doc_id`.
    pub fn belongs_to(&self, doc_id: &str) -> bool {
        self.doc_id == doc_id
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.doc_id, self.index)
    }
}

impl Serialize for ChunkId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Typed chunk metadata: the fields the engine depends on plus an open
/// string map for caller-specific keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub doc_id: String,
    pub title: Option<String>,
    pub source: Option<String>,
    pub chunk_index: usize,
    pub start_offset: usize,
    pub end_offset: usize,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl ChunkMetadata {
    pub fn from_document(
        doc_id: &str,
        doc: &DocumentMetadata,
        chunk_index: usize,
        start_offset: usize,
        end_offset: usize,
    ) -> Self {
        Self {
            doc_id: doc_id.to_string(),
            title: doc.title.clone(),
            source: doc.source.clone(),
            chunk_index,
            start_offset,
            end_offset,
            extra: doc.extra.clone(),
        }
    }
}

/// A bounded slice of a document's text; offsets are in characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub doc_id: String,
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub index: usize,
    pub metadata: ChunkMetadata,
}

/// Persisted state for one indexed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub version_hash: String,
    pub last_indexed: DateTime<Utc>,
    pub file_path: String,
    pub chunk_count: usize,
}

/// Routing signal returned with every retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Hit,
    NoHit,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Hit => f.write_str("hit"),
            Decision::NoHit => f.write_str("no_hit"),
        }
    }
}

/// One fused candidate. Produced per query, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalHit {
    pub id: ChunkId,
    /// Min-max normalized dense score in `[0, 1]`.
    pub score_vector: f64,
    /// Min-max normalized sparse score in `[0, 1]`.
    pub score_sparse: f64,
    pub score_final: f64,
    /// Channel scores before normalization (0 when the channel missed).
    pub raw_vector: f64,
    pub raw_sparse: f64,
    pub document_text: String,
    pub metadata: ChunkMetadata,
}

/// Counters for a single ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestionStats {
    pub new: usize,
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
    pub failed: usize,
    /// Chunks written to the dual index during this run.
    pub total_chunks: usize,
    pub elapsed_seconds: f64,
}
