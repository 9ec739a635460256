//! In-memory [`VectorStore`] for tests and ephemeral indexes.
//!
//! Records live in a `BTreeMap` behind a `tokio::sync::RwLock`; queries are
//! brute-force cosine over every stored vector.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::embedding::cosine_distance;
use crate::error::{Error, Result};
use crate::models::ChunkId;

use super::{MetadataFilter, VectorMatch, VectorRecord, VectorStore};

#[derive(Default)]
struct Inner {
    records: BTreeMap<ChunkId, VectorRecord>,
    dims: Option<usize>,
}

/// In-memory vector store.
pub struct InMemoryVectorStore {
    inner: RwLock<Inner>,
    filtered_delete: bool,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            filtered_delete: true,
        }
    }

    /// A store that rejects [`VectorStore::delete_where`], like backends
    /// that can only delete by id.
    pub fn without_filtered_delete() -> Self {
        Self {
            filtered_delete: false,
            ..Self::new()
        }
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()> {
        let mut inner = self.inner.write().await;
        let Some(expected) = inner.dims.or(records.first().map(|r| r.vector.len())) else {
            return Ok(());
        };
        if let Some(bad) = records.iter().find(|r| r.vector.len() != expected) {
            return Err(Error::DimensionMismatch {
                expected,
                actual: bad.vector.len(),
            });
        }
        inner.dims = Some(expected);
        for record in records {
            inner.records.insert(record.id.clone(), record);
        }
        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<VectorMatch>> {
        let inner = self.inner.read().await;
        if let Some(dims) = inner.dims {
            if embedding.len() != dims {
                return Err(Error::DimensionMismatch {
                    expected: dims,
                    actual: embedding.len(),
                });
            }
        }

        let mut matches: Vec<VectorMatch> = inner
            .records
            .values()
            .filter(|r| filter.matches(&r.metadata))
            .map(|r| VectorMatch {
                id: r.id.clone(),
                distance: cosine_distance(embedding, &r.vector),
                text: r.text.clone(),
                metadata: r.metadata.clone(),
            })
            .collect();
        matches.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        matches.truncate(k);
        Ok(matches)
    }

    async fn delete_where(&self, filter: &MetadataFilter) -> Result<usize> {
        if !self.filtered_delete {
            return Err(Error::FilteredDeleteUnsupported { store: self.name() });
        }
        let mut inner = self.inner.write().await;
        let before = inner.records.len();
        inner.records.retain(|_, r| !filter.matches(&r.metadata));
        Ok(before - inner.records.len())
    }

    async fn ids_where(&self, filter: &MetadataFilter) -> Result<Vec<ChunkId>> {
        let inner = self.inner.read().await;
        Ok(inner
            .records
            .values()
            .filter(|r| filter.matches(&r.metadata))
            .map(|r| r.id.clone())
            .collect())
    }

    async fn delete_ids(&self, ids: &[ChunkId]) -> Result<usize> {
        let mut inner = self.inner.write().await;
        Ok(ids
            .iter()
            .filter(|id| inner.records.remove(*id).is_some())
            .count())
    }

    async fn clear(&self) -> Result<()> {
        *self.inner.write().await = Inner::default();
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.inner.read().await.records.len())
    }
}
