//! Backing-store abstraction for the dense channel.
//!
//! The [`VectorStore`] trait is the narrow contract [`DenseIndex`](crate::dense::DenseIndex)
//! needs from a vector database: upsert, nearest-neighbour query, and
//! delete by metadata filter or by id list. Each vendor or storage engine
//! becomes one implementation, chosen at construction time.
//!
//! | Implementation | Module |
//! |----------------|--------|
//! | In-memory, brute-force cosine | [`memory`] |
//! | SQLite (`sqlx`), brute-force cosine | [`sqlite`] |
//!
//! [`sqlite`] also hosts the SQLite-persisted sparse index.

pub mod memory;
pub mod sqlite;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{ChunkId, ChunkMetadata};

/// One row written to a vector store.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: ChunkId,
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// One row returned by [`VectorStore::query`].
#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub id: ChunkId,
    /// Cosine distance (`1 - cosine_similarity`); lower is closer.
    pub distance: f32,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Equality filter over chunk metadata. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataFilter {
    pub doc_id: Option<String>,
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl MetadataFilter {
    /// Filter selecting every chunk of one document.
    pub fn doc(doc_id: &str) -> Self {
        Self {
            doc_id: Some(doc_id.to_string()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.doc_id.is_none() && self.source.is_none() && self.extra.is_empty()
    }

    pub fn matches(&self, meta: &ChunkMetadata) -> bool {
        if let Some(doc_id) = &self.doc_id {
            if &meta.doc_id != doc_id {
                return false;
            }
        }
        if let Some(source) = &self.source {
            if meta.source.as_ref() != Some(source) {
                return false;
            }
        }
        self.extra
            .iter()
            .all(|(k, v)| meta.extra.get(k) == Some(v))
    }
}

/// Vector similarity store.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Short identifier used in logs and errors.
    fn name(&self) -> &'static str;

    /// Insert or replace records by id.
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()>;

    /// The `k` records nearest to `embedding` among those matching `filter`,
    /// closest first.
    async fn query(
        &self,
        embedding: &[f32],
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<VectorMatch>>;

    /// Delete every record matching `filter`.
    ///
    /// Stores without filtered delete return
    /// [`Error::FilteredDeleteUnsupported`](crate::error::Error::FilteredDeleteUnsupported).
    async fn delete_where(&self, filter: &MetadataFilter) -> Result<usize>;

    /// Ids of every record matching `filter`.
    async fn ids_where(&self, filter: &MetadataFilter) -> Result<Vec<ChunkId>>;

    async fn delete_ids(&self, ids: &[ChunkId]) -> Result<usize>;

    async fn clear(&self) -> Result<()>;

    async fn len(&self) -> Result<usize>;
}
