//! Dense (embedding) retrieval channel.
//!
//! [`DenseIndex`] owns a [`VectorStore`] and an [`Embedder`] and exposes
//! chunk-level add/delete/query. Scores are reported as
//! `score_vector = 1 - cosine_distance`, clamped to `[0, 1]`, so higher is
//! better regardless of the store's native metric.
//!
//! Deleting a document first tries the store's filtered delete. Stores
//! that answer [`Error::FilteredDeleteUnsupported`] are handled by listing
//! the matching ids and deleting them explicitly
//! ([`DenseIndex::delete_by_listing`]).

use std::sync::Arc;

use tracing::debug;

use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::models::{Chunk, ChunkId, ChunkMetadata};
use crate::store::{MetadataFilter, VectorRecord, VectorStore};

/// One dense-channel candidate.
#[derive(Debug, Clone)]
pub struct DenseHit {
    pub id: ChunkId,
    pub score_vector: f64,
    pub text: String,
    pub metadata: ChunkMetadata,
}

pub struct DenseIndex {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
}

impl DenseIndex {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }

    /// Upsert `chunks`. When `embeddings` is `None` the injected embedder
    /// computes one vector per chunk text.
    pub async fn add_chunks(
        &self,
        chunks: &[Chunk],
        embeddings: Option<Vec<Vec<f32>>>,
    ) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }

        let vectors = match embeddings {
            Some(vectors) => vectors,
            None => {
                let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
                self.embedder.embed_batch(&texts).await?
            }
        };
        if vectors.len() != chunks.len() {
            return Err(Error::Embedding(format!(
                "expected {} embeddings, got {}",
                chunks.len(),
                vectors.len()
            )));
        }

        let records = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| VectorRecord {
                id: chunk.id.clone(),
                vector,
                text: chunk.text.clone(),
                metadata: chunk.metadata.clone(),
            })
            .collect();
        self.store.upsert(records).await
    }

    /// Remove every chunk of `doc_id`.
    pub async fn delete_by_doc_id(&self, doc_id: &str) -> Result<usize> {
        let filter = MetadataFilter::doc(doc_id);
        match self.store.delete_where(&filter).await {
            Err(Error::FilteredDeleteUnsupported { store }) => {
                debug!(store, doc_id, "filtered delete unsupported, deleting by id");
                self.delete_by_listing(&filter).await
            }
            other => other,
        }
    }

    /// Delete by listing matching ids, then deleting that id list.
    pub async fn delete_by_listing(&self, filter: &MetadataFilter) -> Result<usize> {
        let ids = self.store.ids_where(filter).await?;
        if ids.is_empty() {
            return Ok(0);
        }
        self.store.delete_ids(&ids).await
    }

    /// Remove chunks of `doc_id` whose index is `>= keep`.
    pub async fn truncate_doc(&self, doc_id: &str, keep: usize) -> Result<usize> {
        let stale: Vec<ChunkId> = self
            .ids_for_doc(doc_id)
            .await?
            .into_iter()
            .filter(|id| id.index >= keep)
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }
        self.store.delete_ids(&stale).await
    }

    pub async fn ids_for_doc(&self, doc_id: &str) -> Result<Vec<ChunkId>> {
        self.store.ids_where(&MetadataFilter::doc(doc_id)).await
    }

    pub async fn ids_where(&self, filter: &MetadataFilter) -> Result<Vec<ChunkId>> {
        self.store.ids_where(filter).await
    }

    pub async fn query(
        &self,
        embedding: &[f32],
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<DenseHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let matches = self.store.query(embedding, k, filter).await?;
        Ok(matches
            .into_iter()
            .map(|m| DenseHit {
                id: m.id,
                score_vector: (1.0 - m.distance as f64).clamp(0.0, 1.0),
                text: m.text,
                metadata: m.metadata,
            })
            .collect())
    }

    pub async fn clear(&self) -> Result<()> {
        self.store.clear().await
    }

    pub async fn len(&self) -> Result<usize> {
        self.store.len().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunker;
    use crate::embedding::HashEmbedder;
    use crate::models::DocumentMetadata;
    use crate::store::memory::InMemoryVectorStore;

    fn index(store: InMemoryVectorStore) -> DenseIndex {
        DenseIndex::new(Arc::new(store), Arc::new(HashEmbedder::new(64).unwrap()))
    }

    fn chunks(doc_id: &str, text: &str) -> Vec<Chunk> {
        Chunker::new(12, 2)
            .unwrap()
            .chunk(doc_id, text, &DocumentMetadata::default())
    }

    #[tokio::test]
    async fn test_add_embeds_when_vectors_missing() {
        let dense = index(InMemoryVectorStore::new());
        let doc = chunks("a", "alpha beta gamma delta epsilon");
        dense.add_chunks(&doc, None).await.unwrap();
        assert_eq!(dense.len().await.unwrap(), doc.len());

        let query = dense.embedder().embed_text(&doc[0].text).await.unwrap();
        let hits = dense.query(&query, 1, &MetadataFilter::default()).await.unwrap();
        assert_eq!(hits[0].id, doc[0].id);
        assert!((hits[0].score_vector - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_add_rejects_wrong_embedding_count() {
        let dense = index(InMemoryVectorStore::new());
        let doc = chunks("a", "alpha beta gamma delta epsilon");
        let err = dense.add_chunks(&doc, Some(vec![vec![1.0; 64]])).await.unwrap_err();
        assert!(matches!(err, Error::Embedding(_)));
    }

    #[tokio::test]
    async fn test_delete_uses_filtered_delete() {
        let dense = index(InMemoryVectorStore::new());
        dense.add_chunks(&chunks("doc1", "one two three four"), None).await.unwrap();
        dense.add_chunks(&chunks("doc10", "five six seven"), None).await.unwrap();

        let removed = dense.delete_by_doc_id("doc1").await.unwrap();
        assert!(removed > 0);
        assert!(dense.ids_for_doc("doc1").await.unwrap().is_empty());
        assert!(!dense.ids_for_doc("doc10").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_falls_back_to_id_listing() {
        let dense = index(InMemoryVectorStore::without_filtered_delete());
        let doc = chunks("doc1", "one two three four five six seven eight");
        dense.add_chunks(&doc, None).await.unwrap();
        dense.add_chunks(&chunks("doc10", "nine ten"), None).await.unwrap();

        let removed = dense.delete_by_doc_id("doc1").await.unwrap();
        assert_eq!(removed, doc.len());
        assert!(dense.ids_for_doc("doc1").await.unwrap().is_empty());
        assert_eq!(dense.ids_for_doc("doc10").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_by_listing_directly() {
        let dense = index(InMemoryVectorStore::new());
        dense.add_chunks(&chunks("a", "some text here"), None).await.unwrap();
        assert_eq!(
            dense.delete_by_listing(&MetadataFilter::doc("missing")).await.unwrap(),
            0
        );
        assert!(dense.delete_by_listing(&MetadataFilter::doc("a")).await.unwrap() > 0);
        assert_eq!(dense.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_truncate_doc() {
        let dense = index(InMemoryVectorStore::new());
        let doc = chunks("a", "one two three four five six seven eight nine ten");
        assert!(doc.len() > 2);
        dense.add_chunks(&doc, None).await.unwrap();
        dense.truncate_doc("a", 2).await.unwrap();
        let ids = dense.ids_for_doc("a").await.unwrap();
        assert_eq!(ids, vec![ChunkId::new("a", 0), ChunkId::new("a", 1)]);
    }
}
