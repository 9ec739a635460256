//! Hybrid retrieval: dense + sparse fusion with a hit/no-hit decision.
//!
//! # Algorithm
//!
//! 1. Query both channels for up to `k` candidates each, concurrently.
//! 2. Merge by [`ChunkId`]; a candidate missing from a channel gets raw `0.0`
//!    for that channel.
//! 3. Min-max normalize each channel across the merged set:
//!
//! ```text
//! norm(s) = (s - min) / (max - min)     if max > min
//! norm(s) = 1.0                         if max == min
//! ```
//!
//!    A channel that returned no candidates at all contributes `0.0`.
//!
//! 4. `score_final = w_dense * norm_vector + w_sparse * norm_sparse`.
//! 5. Sort by `score_final` desc, ties broken by chunk id.
//! 6. If the set is empty or the top score is below `threshold`, the
//!    decision is [`Decision::NoHit`] and `hits` is empty. `topk` always
//!    carries the full ranked list.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::Serialize;

use crate::dense::{DenseHit, DenseIndex};
use crate::error::Result;
use crate::models::{ChunkId, ChunkMetadata, Decision, RetrievalHit};
use crate::sparse::{SparseHit, SparseIndex};
use crate::store::MetadataFilter;

/// Weights and cutoff for linear fusion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FusionParams {
    pub threshold: f64,
    pub w_dense: f64,
    pub w_sparse: f64,
}

impl Default for FusionParams {
    fn default() -> Self {
        Self {
            threshold: 0.6,
            w_dense: 0.5,
            w_sparse: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    pub hits: Vec<RetrievalHit>,
    pub decision: Decision,
    /// Full ranked candidate list, kept for diagnostics.
    pub topk: Vec<RetrievalHit>,
}

pub struct HybridRetriever {
    dense: Arc<DenseIndex>,
    sparse: Arc<dyn SparseIndex>,
    params: FusionParams,
}

impl HybridRetriever {
    pub fn new(dense: Arc<DenseIndex>, sparse: Arc<dyn SparseIndex>, params: FusionParams) -> Self {
        Self {
            dense,
            sparse,
            params,
        }
    }

    pub fn params(&self) -> &FusionParams {
        &self.params
    }

    pub fn dense(&self) -> &Arc<DenseIndex> {
        &self.dense
    }

    pub async fn retrieve(
        &self,
        query_embedding: &[f32],
        query_text: &str,
        k: usize,
        filters: &MetadataFilter,
    ) -> Result<RetrievalResult> {
        // The sparse index has no metadata of its own to filter on, so a
        // filtered query restricts it to the ids the dense store matches.
        let allowlist: Option<HashSet<ChunkId>> = if filters.is_empty() {
            None
        } else {
            Some(self.dense.ids_where(filters).await?.into_iter().collect())
        };

        let (dense, sparse) = tokio::join!(
            self.dense.query(query_embedding, k, filters),
            self.sparse.query(query_text, k, allowlist.as_ref()),
        );

        Ok(fuse(dense?, sparse?, k, &self.params))
    }
}

/// Min-max normalize to `[0, 1]`. All-equal input maps to `1.0`.
///
/// ```rust
/// use hybrid_kb::hybrid::min_max_normalize;
///
/// assert_eq!(min_max_normalize(&[2.0, 4.0, 3.0]), vec![0.0, 1.0, 0.5]);
/// assert_eq!(min_max_normalize(&[0.3, 0.3]), vec![1.0, 1.0]);
/// ```
pub fn min_max_normalize(values: &[f64]) -> Vec<f64> {
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if range.abs() < f64::EPSILON {
        return vec![1.0; values.len()];
    }
    values.iter().map(|v| (v - min) / range).collect()
}

struct Candidate {
    raw_vector: f64,
    raw_sparse: f64,
    text: String,
    metadata: ChunkMetadata,
}

/// Fuse channel results into a ranked, thresholded [`RetrievalResult`].
pub fn fuse(
    dense: Vec<DenseHit>,
    sparse: Vec<SparseHit>,
    k: usize,
    params: &FusionParams,
) -> RetrievalResult {
    let dense_empty = dense.is_empty();
    let sparse_empty = sparse.is_empty();

    let mut merged: BTreeMap<ChunkId, Candidate> = BTreeMap::new();
    for hit in dense {
        merged.insert(
            hit.id,
            Candidate {
                raw_vector: hit.score_vector,
                raw_sparse: 0.0,
                text: hit.text,
                metadata: hit.metadata,
            },
        );
    }
    for hit in sparse {
        merged
            .entry(hit.id)
            .and_modify(|c| c.raw_sparse = hit.score)
            .or_insert(Candidate {
                raw_vector: 0.0,
                raw_sparse: hit.score,
                text: hit.text,
                metadata: hit.metadata,
            });
    }

    let raw_vector: Vec<f64> = merged.values().map(|c| c.raw_vector).collect();
    let raw_sparse: Vec<f64> = merged.values().map(|c| c.raw_sparse).collect();
    let norm_vector = if dense_empty {
        vec![0.0; merged.len()]
    } else {
        min_max_normalize(&raw_vector)
    };
    let norm_sparse = if sparse_empty {
        vec![0.0; merged.len()]
    } else {
        min_max_normalize(&raw_sparse)
    };

    let mut ranked: Vec<RetrievalHit> = merged
        .into_iter()
        .zip(norm_vector.into_iter().zip(norm_sparse))
        .map(|((id, c), (nv, ns))| RetrievalHit {
            id,
            score_vector: nv,
            score_sparse: ns,
            score_final: params.w_dense * nv + params.w_sparse * ns,
            raw_vector: c.raw_vector,
            raw_sparse: c.raw_sparse,
            document_text: c.text,
            metadata: c.metadata,
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.score_final
            .partial_cmp(&a.score_final)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });

    let passes = ranked
        .first()
        .is_some_and(|top| top.score_final >= params.threshold);
    if !passes {
        return RetrievalResult {
            hits: Vec::new(),
            decision: Decision::NoHit,
            topk: ranked,
        };
    }

    let hits = ranked.iter().take(k).cloned().collect();
    RetrievalResult {
        hits,
        decision: Decision::Hit,
        topk: ranked,
    }
}
