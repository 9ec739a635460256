//! Lexical (sparse) retrieval channel.
//!
//! [`SparseIndex`] is the contract every lexical backend implements.
//! The persistent backend is
//! [`SqliteSparseIndex`](crate::store::sqlite::SqliteSparseIndex), ranked by
//! SQLite FTS5. [`Bm25Index`] is the in-memory implementation: it keeps per-term
//! posting lists that are updated in place on every add and delete, so a
//! mutation costs `O(tokens in the chunk)` instead of rebuilding the ranking
//! model over the whole corpus. Corpus statistics (`N`, average length, and
//! document frequencies) are read from the postings at query time, which
//! gives the same scores a full rebuild would.
//!
//! # Scoring
//!
//! Okapi BM25 with `k1 = 1.5`, `b = 0.75` and the non-negative IDF
//!
//! ```text
//! idf(t)   = ln(1 + (N - n_t + 0.5) / (n_t + 0.5))
//! score(d) = Σ_t idf(t) · tf(t,d)·(k1 + 1) / (tf(t,d) + k1·(1 - b + b·|d|/avgdl))
//! ```
//!
//! or, with [`SparseScoring::Overlap`], the number of distinct query tokens
//! present in the chunk. Only chunks with a positive score are returned.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::models::{Chunk, ChunkId, ChunkMetadata};

const BM25_K1: f64 = 1.5;
const BM25_B: f64 = 0.75;

/// Split on whitespace, strip surrounding punctuation, lowercase.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Ranking function used by the sparse backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SparseScoring {
    #[default]
    Bm25,
    Overlap,
}

/// One lexical match.
#[derive(Debug, Clone)]
pub struct SparseHit {
    pub id: ChunkId,
    pub score: f64,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Lexical index over chunk text, keyed by structured [`ChunkId`].
#[async_trait]
pub trait SparseIndex: Send + Sync {
    /// Insert or replace one chunk.
    async fn add_chunk(&self, id: &ChunkId, text: &str, metadata: &ChunkMetadata) -> Result<()>;

    async fn add_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        for chunk in chunks {
            self.add_chunk(&chunk.id, &chunk.text, &chunk.metadata).await?;
        }
        Ok(())
    }

    /// Remove every chunk owned by `doc_id`. Returns the number removed.
    async fn delete_by_doc_id(&self, doc_id: &str) -> Result<usize>;

    /// Remove chunks of `doc_id` whose index is `>= keep`.
    async fn truncate_doc(&self, doc_id: &str, keep: usize) -> Result<usize>;

    /// Top `k` chunks for `text`, optionally restricted to `filter_ids`.
    async fn query(
        &self,
        text: &str,
        k: usize,
        filter_ids: Option<&HashSet<ChunkId>>,
    ) -> Result<Vec<SparseHit>>;

    async fn clear(&self) -> Result<()>;

    async fn len(&self) -> Result<usize>;

    async fn contains(&self, id: &ChunkId) -> Result<bool>;
}

struct Entry {
    text: String,
    metadata: ChunkMetadata,
    term_freqs: HashMap<String, u32>,
    len: usize,
}

#[derive(Default)]
struct Corpus {
    entries: HashMap<ChunkId, Entry>,
    postings: HashMap<String, HashMap<ChunkId, u32>>,
    total_tokens: usize,
}

impl Corpus {
    fn insert(&mut self, id: &ChunkId, text: &str, metadata: &ChunkMetadata) {
        self.remove(id);

        let tokens = tokenize(text);
        let mut term_freqs: HashMap<String, u32> = HashMap::new();
        for token in &tokens {
            *term_freqs.entry(token.clone()).or_insert(0) += 1;
        }
        for (term, tf) in &term_freqs {
            self.postings
                .entry(term.clone())
                .or_default()
                .insert(id.clone(), *tf);
        }
        self.total_tokens += tokens.len();
        self.entries.insert(
            id.clone(),
            Entry {
                text: text.to_string(),
                metadata: metadata.clone(),
                term_freqs,
                len: tokens.len(),
            },
        );
    }

    fn remove(&mut self, id: &ChunkId) -> bool {
        let Some(entry) = self.entries.remove(id) else {
            return false;
        };
        for term in entry.term_freqs.keys() {
            if let Some(list) = self.postings.get_mut(term) {
                list.remove(id);
                if list.is_empty() {
                    self.postings.remove(term);
                }
            }
        }
        self.total_tokens -= entry.len;
        true
    }

    fn remove_where(&mut self, pred: impl Fn(&ChunkId) -> bool) -> usize {
        let ids: Vec<ChunkId> = self.entries.keys().filter(|id| pred(id)).cloned().collect();
        for id in &ids {
            self.remove(id);
        }
        ids.len()
    }

    fn score(
        &self,
        scoring: SparseScoring,
        query: &str,
        k: usize,
        filter_ids: Option<&HashSet<ChunkId>>,
    ) -> Vec<SparseHit> {
        let terms = tokenize(query);
        if terms.is_empty() || self.entries.is_empty() || k == 0 {
            return Vec::new();
        }

        let n_docs = self.entries.len() as f64;
        let avgdl = (self.total_tokens as f64 / n_docs).max(1.0);
        let allowed = |id: &ChunkId| filter_ids.map_or(true, |ids| ids.contains(id));

        let mut scores: HashMap<&ChunkId, f64> = HashMap::new();
        match scoring {
            SparseScoring::Bm25 => {
                for term in &terms {
                    let Some(list) = self.postings.get(term) else {
                        continue;
                    };
                    let df = list.len() as f64;
                    let idf = (1.0 + (n_docs - df + 0.5) / (df + 0.5)).ln();
                    for (id, tf) in list {
                        if !allowed(id) {
                            continue;
                        }
                        let dl = self.entries.get(id).map_or(0, |e| e.len) as f64;
                        let tf = *tf as f64;
                        let norm = tf + BM25_K1 * (1.0 - BM25_B + BM25_B * dl / avgdl);
                        *scores.entry(id).or_insert(0.0) += idf * tf * (BM25_K1 + 1.0) / norm;
                    }
                }
            }
            SparseScoring::Overlap => {
                let unique: HashSet<&String> = terms.iter().collect();
                for term in unique {
                    let Some(list) = self.postings.get(term) else {
                        continue;
                    };
                    for id in list.keys().filter(|id| allowed(*id)) {
                        *scores.entry(id).or_insert(0.0) += 1.0;
                    }
                }
            }
        }

        let mut ranked: Vec<(&ChunkId, f64)> =
            scores.into_iter().filter(|(_, s)| *s > 0.0).collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });
        ranked.truncate(k);

        ranked
            .into_iter()
            .filter_map(|(id, score)| {
                self.entries.get(id).map(|e| SparseHit {
                    id: id.clone(),
                    score,
                    text: e.text.clone(),
                    metadata: e.metadata.clone(),
                })
            })
            .collect()
    }
}

/// In-memory BM25 index with incremental posting lists.
pub struct Bm25Index {
    scoring: SparseScoring,
    corpus: RwLock<Corpus>,
}

impl Bm25Index {
    pub fn new() -> Self {
        Self::with_scoring(SparseScoring::Bm25)
    }

    pub fn with_scoring(scoring: SparseScoring) -> Self {
        Self {
            scoring,
            corpus: RwLock::new(Corpus::default()),
        }
    }

    pub fn scoring(&self) -> SparseScoring {
        self.scoring
    }
}

impl Default for Bm25Index {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SparseIndex for Bm25Index {
    async fn add_chunk(&self, id: &ChunkId, text: &str, metadata: &ChunkMetadata) -> Result<()> {
        self.corpus.write().await.insert(id, text, metadata);
        Ok(())
    }

    async fn add_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let mut corpus = self.corpus.write().await;
        for chunk in chunks {
            corpus.insert(&chunk.id, &chunk.text, &chunk.metadata);
        }
        Ok(())
    }

    async fn delete_by_doc_id(&self, doc_id: &str) -> Result<usize> {
        Ok(self
            .corpus
            .write()
            .await
            .remove_where(|id| id.belongs_to(doc_id)))
    }

    async fn truncate_doc(&self, doc_id: &str, keep: usize) -> Result<usize> {
        Ok(self
            .corpus
            .write()
            .await
            .remove_where(|id| id.belongs_to(doc_id) && id.index >= keep))
    }

    async fn query(
        &self,
        text: &str,
        k: usize,
        filter_ids: Option<&HashSet<ChunkId>>,
    ) -> Result<Vec<SparseHit>> {
        Ok(self
            .corpus
            .read()
            .await
            .score(self.scoring, text, k, filter_ids))
    }

    async fn clear(&self) -> Result<()> {
        *self.corpus.write().await = Corpus::default();
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.corpus.read().await.entries.len())
    }

    async fn contains(&self, id: &ChunkId) -> Result<bool> {
        Ok(self.corpus.read().await.entries.contains_key(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(doc_id: &str, index: usize) -> ChunkMetadata {
        ChunkMetadata {
            doc_id: doc_id.to_string(),
            chunk_index: index,
            ..Default::default()
        }
    }

    async fn index_with(docs: &[(&str, usize, &str)]) -> Bm25Index {
        let index = Bm25Index::new();
        for (doc, i, text) in docs {
            index
                .add_chunk(&ChunkId::new(*doc, *i), text, &meta(doc, *i))
                .await
                .unwrap();
        }
        index
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("  Hello, World!  (Rust) -- x "),
            vec!["hello", "world", "rust", "x"]
        );
        assert!(tokenize("  ...  ").is_empty());
    }

    #[tokio::test]
    async fn test_bm25_prefers_rarer_term_and_shorter_doc() {
        let index = index_with(&[
            ("a", 0, "rust cargo crates"),
            ("b", 0, "rust python python python ruby go java"),
            ("c", 0, "python notebooks"),
        ])
        .await;

        let hits = index.query("cargo", 10, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, ChunkId::new("a", 0));

        let hits = index.query("rust", 10, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, ChunkId::new("a", 0));
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn test_no_match_returns_nothing() {
        let index = index_with(&[("a", 0, "rust cargo")]).await;
        assert!(index.query("zzqx", 5, None).await.unwrap().is_empty());
        assert!(index.query("   ", 5, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_index_query() {
        let index = Bm25Index::new();
        assert!(index.query("anything", 5, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_filter_ids_restricts_results() {
        let index = index_with(&[("a", 0, "shared term"), ("b", 0, "shared term")]).await;
        let allow: HashSet<ChunkId> = [ChunkId::new("b", 0)].into_iter().collect();
        let hits = index.query("shared", 5, Some(&allow)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, ChunkId::new("b", 0));
    }

    #[tokio::test]
    async fn test_delete_by_doc_id_is_not_prefix_based() {
        let index = index_with(&[
            ("doc1", 0, "alpha"),
            ("doc1", 1, "alpha beta"),
            ("doc10", 0, "alpha gamma"),
        ])
        .await;
        assert_eq!(index.delete_by_doc_id("doc1").await.unwrap(), 2);
        assert_eq!(index.len().await.unwrap(), 1);
        assert!(index.contains(&ChunkId::new("doc10", 0)).await.unwrap());
        let hits = index.query("alpha", 5, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id.doc_id, "doc10");
    }

    #[tokio::test]
    async fn test_delete_drops_postings() {
        let index = index_with(&[("a", 0, "unique"), ("b", 0, "other")]).await;
        index.delete_by_doc_id("a").await.unwrap();
        assert!(index.query("unique", 5, None).await.unwrap().is_empty());
        let corpus = index.corpus.read().await;
        assert!(!corpus.postings.contains_key("unique"));
        assert_eq!(corpus.total_tokens, 1);
    }

    #[tokio::test]
    async fn test_readd_replaces_entry() {
        let index = index_with(&[("a", 0, "old words")]).await;
        index
            .add_chunk(&ChunkId::new("a", 0), "new words", &meta("a", 0))
            .await
            .unwrap();
        assert_eq!(index.len().await.unwrap(), 1);
        assert!(index.query("old", 5, None).await.unwrap().is_empty());
        assert_eq!(index.query("new", 5, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_truncate_doc_keeps_leading_chunks() {
        let index = index_with(&[
            ("a", 0, "zero"),
            ("a", 1, "one"),
            ("a", 2, "two"),
            ("b", 5, "five"),
        ])
        .await;
        assert_eq!(index.truncate_doc("a", 1).await.unwrap(), 2);
        assert!(index.contains(&ChunkId::new("a", 0)).await.unwrap());
        assert!(!index.contains(&ChunkId::new("a", 1)).await.unwrap());
        assert!(index.contains(&ChunkId::new("b", 5)).await.unwrap());
    }

    #[tokio::test]
    async fn test_overlap_scoring_counts_distinct_terms() {
        let index = Bm25Index::with_scoring(SparseScoring::Overlap);
        index
            .add_chunk(&ChunkId::new("a", 0), "red green blue", &meta("a", 0))
            .await
            .unwrap();
        index
            .add_chunk(&ChunkId::new("b", 0), "red red red", &meta("b", 0))
            .await
            .unwrap();
        let hits = index.query("red green", 5, None).await.unwrap();
        assert_eq!(hits[0].id, ChunkId::new("a", 0));
        assert_eq!(hits[0].score, 2.0);
        assert_eq!(hits[1].score, 1.0);
    }

    #[tokio::test]
    async fn test_k_truncates() {
        let index = index_with(&[("a", 0, "x"), ("b", 0, "x"), ("c", 0, "x")]).await;
        assert_eq!(index.query("x", 2, None).await.unwrap().len(), 2);
        index.clear().await.unwrap();
        assert_eq!(index.len().await.unwrap(), 0);
    }
}
