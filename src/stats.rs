//! Index status and health overview.
//!
//! Summarizes what is indexed: tracked documents, chunk counts in each
//! half of the dual index, whether the two halves agree, and a
//! per-extension breakdown. Used by `hkb status` to confirm that ingestion
//! runs are keeping everything in sync.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::versions::VersionStore;

/// Per-extension breakdown of documents and chunks.
#[derive(Debug, Clone, Serialize)]
pub struct ExtensionStats {
    pub extension: String,
    pub doc_count: usize,
    pub chunk_count: usize,
    pub last_indexed: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub db_path: String,
    pub db_size: u64,
    pub versions_path: String,
    pub documents: usize,
    pub recorded_chunks: usize,
    pub dense_chunks: usize,
    pub sparse_chunks: usize,
    pub embedding_provider: String,
    pub embedding_dims: usize,
    pub by_extension: Vec<ExtensionStats>,
}

impl StatusReport {
    /// Both index halves and the version store agree on the chunk count.
    pub fn in_sync(&self) -> bool {
        self.dense_chunks == self.sparse_chunks && self.dense_chunks == self.recorded_chunks
    }
}

pub async fn collect_status(config: &Config) -> Result<StatusReport> {
    let pool = db::connect(&config.index.db_path)
        .await
        .with_context(|| format!("Failed to open index: {}", config.index.db_path.display()))?;
    migrate::run_migrations(&pool).await?;

    let dense_chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dense_chunks")
        .fetch_one(&pool)
        .await?;
    let sparse_chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sparse_chunks")
        .fetch_one(&pool)
        .await?;
    pool.close().await;

    let versions = VersionStore::open(&config.index.versions_path);
    let mut by_ext: BTreeMap<String, ExtensionStats> = BTreeMap::new();
    for doc_id in versions.all_ids() {
        let Some(record) = versions.get(&doc_id) else {
            continue;
        };
        let extension = std::path::Path::new(&record.file_path)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_else(|| "-".to_string());
        let entry = by_ext
            .entry(extension.clone())
            .or_insert_with(|| ExtensionStats {
                extension,
                doc_count: 0,
                chunk_count: 0,
                last_indexed: None,
            });
        entry.doc_count += 1;
        entry.chunk_count += record.chunk_count;
        if entry.last_indexed.map_or(true, |t| record.last_indexed > t) {
            entry.last_indexed = Some(record.last_indexed);
        }
    }
    let mut by_extension: Vec<ExtensionStats> = by_ext.into_values().collect();
    by_extension.sort_by(|a, b| b.doc_count.cmp(&a.doc_count).then(a.extension.cmp(&b.extension)));

    Ok(StatusReport {
        db_path: config.index.db_path.display().to_string(),
        db_size: std::fs::metadata(&config.index.db_path)
            .map(|m| m.len())
            .unwrap_or(0),
        versions_path: config.index.versions_path.display().to_string(),
        documents: versions.len(),
        recorded_chunks: versions.total_chunks(),
        dense_chunks: dense_chunks as usize,
        sparse_chunks: sparse_chunks as usize,
        embedding_provider: config.embedding.provider.clone(),
        embedding_dims: config.embedding.dims,
        by_extension,
    })
}

/// Run the status command: collect and print a summary.
pub async fn run_status(config: &Config) -> Result<()> {
    let report = collect_status(config).await?;

    println!("Hybrid KB Index Status");
    println!("======================");
    println!();
    println!("  Index:       {}", report.db_path);
    println!("  Size:        {}", format_bytes(report.db_size));
    println!("  Versions:    {}", report.versions_path);
    println!(
        "  Embedding:   {} ({} dims)",
        report.embedding_provider, report.embedding_dims
    );
    println!();
    println!("  Documents:   {}", report.documents);
    println!("  Chunks:      {}", report.recorded_chunks);
    println!("  Dense:       {}", report.dense_chunks);
    println!("  Sparse:      {}", report.sparse_chunks);
    println!(
        "  Consistency: {}",
        if report.in_sync() {
            "in sync"
        } else {
            "MISMATCH (run `hkb ingest --full`)"
        }
    );

    if !report.by_extension.is_empty() {
        println!();
        println!("  By extension:");
        println!(
            "  {:<12} {:>6} {:>8}   {}",
            "EXT", "DOCS", "CHUNKS", "LAST INDEXED"
        );
        println!("  {}", "-".repeat(52));
        for s in &report.by_extension {
            let when = s
                .last_indexed
                .map(|t| format_ts_relative(t.timestamp()))
                .unwrap_or_else(|| "never".to_string());
            println!(
                "  {:<12} {:>6} {:>8}   {}",
                s.extension, s.doc_count, s.chunk_count, when
            );
        }
    }

    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp relative to now (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }
    let (n, unit) = match delta {
        0..=59 => return "just now".to_string(),
        60..=3599 => (delta / 60, "min"),
        3600..=86_399 => (delta / 3600, "hour"),
        86_400..=2_591_999 => (delta / 86_400, "day"),
        _ => return format_ts_iso(ts),
    };
    format!("{} {}{} ago", n, unit, if n == 1 { "" } else { "s" })
}

fn format_ts_iso(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_format_ts_relative() {
        let now = Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 120), "2 mins ago");
        assert_eq!(format_ts_relative(now - 3600), "1 hour ago");
        assert_eq!(format_ts_relative(now - 3 * 86_400), "3 days ago");
    }

    #[tokio::test]
    async fn test_collect_status_on_empty_index() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config: Config = toml::from_str(&format!(
            "[kb]\nroot = \"{kb}\"\n[index]\ndb_path = \"{db}\"\nversions_path = \"{v}\"\n",
            kb = tmp.path().display(),
            db = tmp.path().join("hkb.sqlite").display(),
            v = tmp.path().join("versions.json").display(),
        ))
        .unwrap();
        let report = collect_status(&config).await.unwrap();
        assert_eq!(report.documents, 0);
        assert_eq!(report.dense_chunks, 0);
        assert!(report.in_sync());
        assert!(report.by_extension.is_empty());
    }
}
