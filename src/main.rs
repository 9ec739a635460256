//! # Hybrid KB CLI (`hkb`)
//!
//! The `hkb` binary drives incremental ingestion of a knowledge-base folder
//! and runs hybrid (dense + BM25) queries against the resulting index.
//!
//! ## Usage
//!
//! ```bash
//! hkb --config ./config/hkb.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `hkb init` | Create the SQLite index and its tables |
//! | `hkb scan` | List the documents the scanner would index |
//! | `hkb ingest` | Index new and changed documents, drop removed ones |
//! | `hkb ingest --full` | Clear everything and re-index from scratch |
//! | `hkb ingest --dry-run` | Show what an incremental run would do |
//! | `hkb query "<text>"` | Retrieve with a hit/no-hit decision |
//! | `hkb status` | Summarize the index and check both halves agree |
//!
//! Diagnostics go to stderr (`RUST_LOG`, default `hybrid_kb=info`) so
//! stdout stays parseable; `--log-json` switches them to JSON.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlx::SqlitePool;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hybrid_kb::chunk::Chunker;
use hybrid_kb::config::{self, Config};
use hybrid_kb::dense::DenseIndex;
use hybrid_kb::embedding::create_embedder;
use hybrid_kb::hybrid::HybridRetriever;
use hybrid_kb::ingest::Indexer;
use hybrid_kb::models::Decision;
use hybrid_kb::retrieval::RetrievalService;
use hybrid_kb::scanner;
use hybrid_kb::sparse::SparseIndex;
use hybrid_kb::store::sqlite::{SqliteSparseIndex, SqliteVectorStore};
use hybrid_kb::store::MetadataFilter;
use hybrid_kb::versions::VersionStore;
use hybrid_kb::{db, migrate, stats};

/// Hybrid KB: incremental knowledge-base ingestion and hybrid retrieval.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "hkb",
    about = "Incremental knowledge-base ingestion and hybrid (dense + BM25) retrieval",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/hkb.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the index schema. Idempotent.
    Init,

    /// List the documents found under the KB root with their hashes.
    Scan,

    /// Bring the index in line with the KB folder.
    ///
    /// Only documents whose content hash changed since the last run are
    /// re-indexed; documents that disappeared are removed from both indices.
    Ingest {
        /// Clear the version store and both indices, then re-index everything.
        #[arg(long)]
        full: bool,

        /// Classify documents as new/changed/removed without writing anything.
        #[arg(long, conflicts_with = "full")]
        dry_run: bool,
    },

    /// Query the index.
    Query {
        /// The query text.
        query: String,

        /// Number of hits to return (defaults to `retrieval.k`).
        #[arg(long)]
        k: Option<usize>,

        /// Restrict to one document id.
        #[arg(long)]
        doc: Option<String>,

        /// Restrict to one source path (relative to the KB root).
        #[arg(long)]
        source: Option<String>,

        /// Print the full outcome, telemetry included, as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show index statistics.
    Status,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "hybrid_kb=info".into());
    let plain = (!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));
    let structured =
        json.then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr));
    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(structured)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = open_pool(&cfg).await?;
            pool.close().await;
            println!("Index initialized successfully.");
        }
        Commands::Scan => run_scan(&cfg)?,
        Commands::Ingest { full, dry_run } => run_ingest(&cfg, full, dry_run).await?,
        Commands::Query {
            query,
            k,
            doc,
            source,
            json,
        } => {
            let filter = MetadataFilter {
                doc_id: doc,
                source,
                ..Default::default()
            };
            run_query(&cfg, &query, &filter, k, json).await?;
        }
        Commands::Status => stats::run_status(&cfg).await?,
    }

    Ok(())
}

async fn open_pool(cfg: &Config) -> Result<SqlitePool> {
    let pool = db::connect(&cfg.index.db_path)
        .await
        .with_context(|| format!("Failed to open index: {}", cfg.index.db_path.display()))?;
    migrate::run_migrations(&pool).await?;
    Ok(pool)
}

/// Build both halves of the dual index over one SQLite pool.
async fn open_index(
    cfg: &Config,
    pool: &SqlitePool,
) -> Result<(Arc<DenseIndex>, Arc<dyn SparseIndex>)> {
    let embedder = create_embedder(&cfg.embedding)?;
    let dense = Arc::new(DenseIndex::new(
        Arc::new(SqliteVectorStore::new(pool.clone())),
        embedder,
    ));
    let sparse: Arc<dyn SparseIndex> =
        Arc::new(SqliteSparseIndex::open(pool.clone(), cfg.retrieval.sparse_scoring).await?);
    Ok((dense, sparse))
}

fn run_scan(cfg: &Config) -> Result<()> {
    let docs = scanner::scan_with(&cfg.kb.root, &cfg.kb.scan_options())?;
    for doc in &docs {
        println!(
            "{}  {:>10}  {}",
            &doc.content_hash[..12],
            doc.size,
            doc.doc_id
        );
    }
    println!("{} documents", docs.len());
    Ok(())
}

async fn run_ingest(cfg: &Config, full: bool, dry_run: bool) -> Result<()> {
    let pool = open_pool(cfg).await?;
    let (dense, sparse) = open_index(cfg, &pool).await?;
    let chunker = Chunker::new(cfg.chunking.chunk_size, cfg.chunking.chunk_overlap)?;
    let versions = VersionStore::open(&cfg.index.versions_path);
    let mut indexer = Indexer::new(
        &cfg.kb.root,
        cfg.kb.scan_options(),
        chunker,
        versions,
        dense,
        sparse,
    );

    if dry_run {
        let report = indexer.dry_run()?;
        println!("ingest (dry-run)");
        println!("  new: {}", report.new.len());
        println!("  changed: {}", report.changed.len());
        println!("  removed: {}", report.removed.len());
        println!("  unchanged: {}", report.unchanged);
        for id in &report.new {
            println!("    + {}", id);
        }
        for id in &report.changed {
            println!("    ~ {}", id);
        }
        for id in &report.removed {
            println!("    - {}", id);
        }
        pool.close().await;
        return Ok(());
    }

    let stats = if full {
        indexer.ingest_full_reindex().await?
    } else {
        indexer.ingest_incremental().await?
    };

    println!("ingest ({})", if full { "full" } else { "incremental" });
    println!("  new: {}", stats.new);
    println!("  updated: {}", stats.updated);
    println!("  removed: {}", stats.removed);
    println!("  unchanged: {}", stats.unchanged);
    println!("  failed: {}", stats.failed);
    println!("  chunks written: {}", stats.total_chunks);
    println!("  elapsed: {:.2}s", stats.elapsed_seconds);
    println!("ok");

    pool.close().await;
    Ok(())
}

async fn run_query(
    cfg: &Config,
    query: &str,
    filter: &MetadataFilter,
    k: Option<usize>,
    json: bool,
) -> Result<()> {
    let pool = open_pool(cfg).await?;
    let (dense, sparse) = open_index(cfg, &pool).await?;
    let embedder = dense.embedder().clone();
    let retriever = HybridRetriever::new(dense, sparse, cfg.retrieval.fusion_params());
    let mut service = RetrievalService::new(embedder, retriever, cfg.retrieval.k)
        .with_timeout(Duration::from_secs(cfg.retrieval.timeout_secs));
    if let Some(path) = &cfg.telemetry.log_path {
        service = service.with_telemetry_log(path);
    }

    let outcome = service.route_and_retrieve(query, filter, k).await?;
    pool.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    println!("decision: {} (run {})", outcome.decision, outcome.run_id);
    if outcome.decision == Decision::NoHit {
        match outcome.topk.first() {
            Some(top) => println!(
                "No results above threshold {:.2} (best {:.2}: {}).",
                cfg.retrieval.threshold, top.score_final, top.id
            ),
            None => println!("No results."),
        }
        return Ok(());
    }

    println!();
    for (i, hit) in outcome.hits.iter().enumerate() {
        let source = hit.metadata.source.as_deref().unwrap_or(&hit.metadata.doc_id);
        let title = hit.metadata.title.as_deref().unwrap_or("(untitled)");
        println!("{}. [{:.2}] {} / {}", i + 1, hit.score_final, source, title);
        println!(
            "    dense: {:.2}  sparse: {:.2}",
            hit.score_vector, hit.score_sparse
        );
        println!(
            "    excerpt: \"{}\"",
            excerpt(&hit.document_text, 200).replace('\n', " ").trim()
        );
        println!("    id: {}", hit.id);
        println!();
    }
    Ok(())
}

fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
