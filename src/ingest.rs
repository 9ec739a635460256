//! Incremental ingestion.
//!
//! [`Indexer`] keeps the dual index and the [`VersionStore`] consistent with
//! the knowledge-base folder: scan → classify by content hash → extract →
//! chunk → embed → write both indices → record the version.
//!
//! An updated document is written reinsert-before-delete. Its new chunks
//! are upserted under their deterministic ids (overwriting the old chunks
//! with the same index), then any old chunks past the new chunk count are
//! pruned. The document therefore never has zero chunks mid-update.
//!
//! Each document is isolated: a failure is logged, counted in
//! [`IngestionStats::failed`], and the run moves on. If a write fails
//! partway, the document is purged from both indices and from the
//! version store so the next run re-indexes it from scratch.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::chunk::Chunker;
use crate::dense::DenseIndex;
use crate::error::Result;
use crate::extract::{FileTextExtractor, TextExtractor};
use crate::models::{Chunk, DocumentDescriptor, DocumentMetadata, IngestionStats};
use crate::scanner::{self, ScanOptions};
use crate::sparse::SparseIndex;
use crate::versions::VersionStore;

/// What an incremental run would do, without doing it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DryRunReport {
    pub new: Vec<String>,
    pub changed: Vec<String>,
    pub removed: Vec<String>,
    pub unchanged: usize,
}

pub struct Indexer {
    root: PathBuf,
    scan_options: ScanOptions,
    chunker: Chunker,
    versions: VersionStore,
    dense: Arc<DenseIndex>,
    sparse: Arc<dyn SparseIndex>,
    extractor: Arc<dyn TextExtractor>,
}

impl Indexer {
    pub fn new(
        root: impl Into<PathBuf>,
        scan_options: ScanOptions,
        chunker: Chunker,
        versions: VersionStore,
        dense: Arc<DenseIndex>,
        sparse: Arc<dyn SparseIndex>,
    ) -> Self {
        Self {
            root: root.into(),
            scan_options,
            chunker,
            versions,
            dense,
            sparse,
            extractor: Arc::new(FileTextExtractor),
        }
    }

    /// Replace the default extension-based extractor.
    pub fn with_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn versions(&self) -> &VersionStore {
        &self.versions
    }

    pub fn dense(&self) -> &Arc<DenseIndex> {
        &self.dense
    }

    pub fn sparse(&self) -> &Arc<dyn SparseIndex> {
        &self.sparse
    }

    fn scan(&self) -> Result<Vec<DocumentDescriptor>> {
        scanner::scan_with(&self.root, &self.scan_options)
    }

    /// Index new and changed documents, drop removed ones.
    pub async fn ingest_incremental(&mut self) -> Result<IngestionStats> {
        let started = Instant::now();
        let mut stats = IngestionStats::default();
        let docs = self.scan()?;
        let seen: HashSet<String> = docs.iter().map(|d| d.doc_id.clone()).collect();

        for doc in &docs {
            if !self.versions.has_changed(&doc.doc_id, &doc.content_hash) {
                stats.unchanged += 1;
                continue;
            }
            let existed = self.versions.get(&doc.doc_id).is_some();
            match self.index_document(doc, existed).await {
                Ok(written) => {
                    stats.total_chunks += written;
                    if existed {
                        stats.updated += 1;
                    } else {
                        stats.new += 1;
                    }
                }
                Err(e) => {
                    warn!(doc_id = %doc.doc_id, error = %e, "failed to index document");
                    stats.failed += 1;
                }
            }
        }

        for doc_id in self.versions.all_ids() {
            if seen.contains(&doc_id) {
                continue;
            }
            match self.remove_document(&doc_id).await {
                Ok(()) => stats.removed += 1,
                Err(e) => {
                    warn!(doc_id = %doc_id, error = %e, "failed to remove document");
                    stats.failed += 1;
                }
            }
        }

        stats.elapsed_seconds = started.elapsed().as_secs_f64();
        log_stats("incremental", &stats);
        Ok(stats)
    }

    /// Clear the version store and both indices, then index everything.
    pub async fn ingest_full_reindex(&mut self) -> Result<IngestionStats> {
        let started = Instant::now();
        let mut stats = IngestionStats::default();
        let docs = self.scan()?;
        let seen: HashSet<&str> = docs.iter().map(|d| d.doc_id.as_str()).collect();
        stats.removed = self
            .versions
            .all_ids()
            .iter()
            .filter(|id| !seen.contains(id.as_str()))
            .count();

        self.versions.clear()?;
        self.dense.clear().await?;
        self.sparse.clear().await?;

        for doc in &docs {
            match self.index_document(doc, false).await {
                Ok(written) => {
                    stats.total_chunks += written;
                    stats.new += 1;
                }
                Err(e) => {
                    warn!(doc_id = %doc.doc_id, error = %e, "failed to index document");
                    stats.failed += 1;
                }
            }
        }

        stats.elapsed_seconds = started.elapsed().as_secs_f64();
        log_stats("full", &stats);
        Ok(stats)
    }

    /// Classify the current folder against the version store. Read-only.
    pub fn dry_run(&self) -> Result<DryRunReport> {
        let docs = self.scan()?;
        let mut report = DryRunReport::default();
        let seen: HashSet<&str> = docs.iter().map(|d| d.doc_id.as_str()).collect();

        for doc in &docs {
            match self.versions.get_version(&doc.doc_id) {
                None => report.new.push(doc.doc_id.clone()),
                Some(hash) if hash != doc.content_hash => report.changed.push(doc.doc_id.clone()),
                Some(_) => report.unchanged += 1,
            }
        }
        report.removed = self
            .versions
            .all_ids()
            .into_iter()
            .filter(|id| !seen.contains(id.as_str()))
            .collect();
        Ok(report)
    }

    async fn index_document(&mut self, doc: &DocumentDescriptor, existed: bool) -> Result<usize> {
        let text = self.extractor.extract_text(&doc.file_path)?;
        let metadata = self.document_metadata(doc);
        let chunks = self.chunker.chunk(&doc.doc_id, &text, &metadata);

        // Embed before touching either index so an embedder failure leaves
        // the previous version intact.
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.dense.embedder().embed_batch(&texts).await?;

        if let Err(e) = self.write_chunks(doc, &chunks, vectors, existed).await {
            self.purge(&doc.doc_id).await;
            return Err(e);
        }
        self.versions
            .update(&doc.doc_id, &doc.content_hash, &doc.file_path, chunks.len())?;

        debug!(
            doc_id = %doc.doc_id,
            chunks = chunks.len(),
            updated = existed,
            "indexed document"
        );
        Ok(chunks.len())
    }

    async fn write_chunks(
        &self,
        doc: &DocumentDescriptor,
        chunks: &[Chunk],
        vectors: Vec<Vec<f32>>,
        existed: bool,
    ) -> Result<()> {
        self.dense.add_chunks(chunks, Some(vectors)).await?;
        self.sparse.add_chunks(chunks).await?;
        if existed {
            let keep = chunks.len();
            let dense_pruned = self.dense.truncate_doc(&doc.doc_id, keep).await?;
            let sparse_pruned = self.sparse.truncate_doc(&doc.doc_id, keep).await?;
            debug!(doc_id = %doc.doc_id, dense_pruned, sparse_pruned, "pruned stale chunks");
        }
        Ok(())
    }

    async fn remove_document(&mut self, doc_id: &str) -> Result<()> {
        let dense = self.dense.delete_by_doc_id(doc_id).await?;
        let sparse = self.sparse.delete_by_doc_id(doc_id).await?;
        self.versions.remove(doc_id)?;
        debug!(doc_id, dense, sparse, "removed document");
        Ok(())
    }

    /// Best-effort cleanup after a failed write.
    async fn purge(&mut self, doc_id: &str) {
        if let Err(e) = self.dense.delete_by_doc_id(doc_id).await {
            warn!(doc_id, error = %e, "dense cleanup failed");
        }
        if let Err(e) = self.sparse.delete_by_doc_id(doc_id).await {
            warn!(doc_id, error = %e, "sparse cleanup failed");
        }
        if let Err(e) = self.versions.remove(doc_id) {
            warn!(doc_id, error = %e, "version cleanup failed");
        }
    }

    fn document_metadata(&self, doc: &DocumentDescriptor) -> DocumentMetadata {
        let relative = doc.file_path.strip_prefix(&self.root).unwrap_or(&doc.file_path);
        let mut metadata = DocumentMetadata {
            title: doc
                .file_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned()),
            source: Some(relative.to_string_lossy().replace('\\', "/")),
            ..Default::default()
        };
        metadata
            .extra
            .insert("extension".to_string(), doc.extension.clone());
        metadata
    }
}

fn log_stats(mode: &str, stats: &IngestionStats) {
    info!(
        mode,
        new = stats.new,
        updated = stats.updated,
        removed = stats.removed,
        unchanged = stats.unchanged,
        failed = stats.failed,
        total_chunks = stats.total_chunks,
        elapsed_s = stats.elapsed_seconds,
        "ingestion finished"
    );
}
