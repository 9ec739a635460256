//! Query entry point.
//!
//! [`RetrievalService::route_and_retrieve`] is what upstream answer
//! generation calls. Per query it:
//!
//! 1. assigns a `run_id`,
//! 2. normalizes the text (trim + lowercase),
//! 3. embeds it and runs [`HybridRetriever::retrieve`] under one deadline,
//! 4. builds a [`TelemetryRecord`] and emits it as a single event on target
//!    `hybrid_kb::telemetry` (and, optionally, as one JSON line appended to
//!    a log file). Failed calls are recorded too, at `warn` level with the
//!    error set, before the error is returned.
//!
//! The returned [`Decision`] is the caller's signal to fall back when the
//! knowledge base has nothing relevant.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::hybrid::{HybridRetriever, RetrievalResult};
use crate::models::{ChunkId, Decision, RetrievalHit};
use crate::store::MetadataFilter;

pub const TELEMETRY_TARGET: &str = "hybrid_kb::telemetry";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Active retrieval settings recorded with each query.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigSnapshot {
    pub k: usize,
    pub threshold: f64,
    pub w_dense: f64,
    pub w_sparse: f64,
}

/// Compact view of one ranked candidate.
#[derive(Debug, Clone, Serialize)]
pub struct RankedEntry {
    pub id: ChunkId,
    pub score_final: f64,
    pub score_vector: f64,
    pub score_sparse: f64,
}

impl From<&RetrievalHit> for RankedEntry {
    fn from(hit: &RetrievalHit) -> Self {
        Self {
            id: hit.id.clone(),
            score_final: hit.score_final,
            score_vector: hit.score_vector,
            score_sparse: hit.score_sparse,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TelemetryRecord {
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub query: String,
    pub query_normalized: String,
    pub filters: MetadataFilter,
    pub k: usize,
    pub latency_embed_s: f64,
    pub latency_retrieval_s: f64,
    pub decision: Decision,
    pub topk: Vec<RankedEntry>,
    pub config_snapshot: ConfigSnapshot,
    pub elapsed_s: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievalOutcome {
    pub run_id: String,
    pub decision: Decision,
    pub hits: Vec<RetrievalHit>,
    pub topk: Vec<RetrievalHit>,
    pub telemetry: TelemetryRecord,
}

pub struct RetrievalService {
    embedder: Arc<dyn Embedder>,
    retriever: HybridRetriever,
    default_k: usize,
    timeout: Duration,
    telemetry_log: Option<PathBuf>,
}

/// Trim and lowercase.
pub fn normalize_query(query: &str) -> String {
    query.trim().to_lowercase()
}

impl RetrievalService {
    pub fn new(embedder: Arc<dyn Embedder>, retriever: HybridRetriever, default_k: usize) -> Self {
        Self {
            embedder,
            retriever,
            default_k,
            timeout: DEFAULT_TIMEOUT,
            telemetry_log: None,
        }
    }

    /// Deadline covering the embedding call and both index queries.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Also append every telemetry record to `path` as JSON Lines.
    pub fn with_telemetry_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.telemetry_log = Some(path.into());
        self
    }

    pub async fn route_and_retrieve(
        &self,
        query: &str,
        filters: &MetadataFilter,
        k: Option<usize>,
    ) -> Result<RetrievalOutcome> {
        let started = Instant::now();
        let run_id = Uuid::new_v4().to_string();
        let k = k.unwrap_or(self.default_k);
        let normalized = normalize_query(query);

        let mut latency_embed_s = 0.0;
        let mut latency_retrieval_s = 0.0;
        let attempt = if normalized.is_empty() {
            Ok(RetrievalResult {
                hits: Vec::new(),
                decision: Decision::NoHit,
                topk: Vec::new(),
            })
        } else {
            let run = async {
                let t = Instant::now();
                let embedding = self.embedder.embed_text(&normalized).await?;
                latency_embed_s = t.elapsed().as_secs_f64();

                let t = Instant::now();
                let result = self
                    .retriever
                    .retrieve(&embedding, &normalized, k, filters)
                    .await?;
                latency_retrieval_s = t.elapsed().as_secs_f64();
                Ok::<_, Error>(result)
            };
            match tokio::time::timeout(self.timeout, run).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(self.timeout)),
            }
        };

        let (decision, topk) = match &attempt {
            Ok(result) => (
                result.decision,
                result.topk.iter().map(RankedEntry::from).collect(),
            ),
            Err(_) => (Decision::NoHit, Vec::new()),
        };

        let params = self.retriever.params();
        let telemetry = TelemetryRecord {
            run_id: run_id.clone(),
            timestamp: Utc::now(),
            query: query.to_string(),
            query_normalized: normalized,
            filters: filters.clone(),
            k,
            latency_embed_s,
            latency_retrieval_s,
            decision,
            topk,
            config_snapshot: ConfigSnapshot {
                k,
                threshold: params.threshold,
                w_dense: params.w_dense,
                w_sparse: params.w_sparse,
            },
            elapsed_s: started.elapsed().as_secs_f64(),
            error: attempt.as_ref().err().map(|e| e.to_string()),
        };
        self.emit(&telemetry);
        let result = attempt?;

        Ok(RetrievalOutcome {
            run_id,
            decision: result.decision,
            hits: result.hits,
            topk: result.topk,
            telemetry,
        })
    }

    fn emit(&self, record: &TelemetryRecord) {
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                warn!(run_id = %record.run_id, error = %e, "failed to serialize telemetry");
                return;
            }
        };
        if let Some(error) = &record.error {
            warn!(
                target: TELEMETRY_TARGET,
                run_id = %record.run_id,
                error = %error,
                elapsed_s = record.elapsed_s,
                record = %line,
                "retrieval failed"
            );
        } else {
            info!(
                target: TELEMETRY_TARGET,
                run_id = %record.run_id,
                decision = %record.decision,
                candidates = record.topk.len(),
                latency_embed_s = record.latency_embed_s,
                latency_retrieval_s = record.latency_retrieval_s,
                elapsed_s = record.elapsed_s,
                record = %line,
                "retrieval"
            );
        }
        if let Some(path) = &self.telemetry_log {
            if let Err(e) = append_line(path, &line) {
                warn!(path = %path.display(), error = %e, "failed to append telemetry");
            }
        }
    }
}

fn append_line(path: &std::path::Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", line)
}
