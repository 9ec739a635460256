use std::fs;
use std::path::Path;
use std::sync::Arc;

use hybrid_kb::chunk::Chunker;
use hybrid_kb::db;
use hybrid_kb::dense::DenseIndex;
use hybrid_kb::embedding::{Embedder, HashEmbedder};
use hybrid_kb::hybrid::{FusionParams, HybridRetriever};
use hybrid_kb::ingest::Indexer;
use hybrid_kb::migrate;
use hybrid_kb::models::{ChunkId, Decision};
use hybrid_kb::retrieval::RetrievalService;
use hybrid_kb::scanner::ScanOptions;
use hybrid_kb::sparse::{SparseIndex, SparseScoring};
use hybrid_kb::store::sqlite::{SqliteSparseIndex, SqliteVectorStore};
use hybrid_kb::store::MetadataFilter;
use hybrid_kb::versions::VersionStore;
use tempfile::TempDir;

const A_V1: &str = "Solar panels convert sunlight into electricity using photovoltaic cells. \
Our quokka mascot appears on every installation manual and every warranty card we ship.";
const A_V2: &str = "Solar panels convert sunlight. The wombat mascot is new.";
const B: &str = "Gardening tips for growing tomatoes in raised beds with compost.";

struct Harness {
    indexer: Indexer,
    dense: Arc<DenseIndex>,
    sparse: Arc<dyn SparseIndex>,
    embedder: Arc<dyn Embedder>,
}

async fn harness(data: &Path, kb: &Path) -> Harness {
    let pool = db::connect(&data.join("hkb.sqlite")).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(128).unwrap());
    let dense = Arc::new(DenseIndex::new(
        Arc::new(SqliteVectorStore::new(pool.clone())),
        embedder.clone(),
    ));
    let sparse: Arc<dyn SparseIndex> = Arc::new(
        SqliteSparseIndex::open(pool, SparseScoring::Bm25)
            .await
            .unwrap(),
    );
    let indexer = Indexer::new(
        kb,
        ScanOptions {
            extensions: vec!["md".to_string()],
            ..Default::default()
        },
        Chunker::new(60, 15).unwrap(),
        VersionStore::open(data.join("versions.json")),
        dense.clone(),
        sparse.clone(),
    );
    Harness {
        indexer,
        dense,
        sparse,
        embedder,
    }
}

impl Harness {
    fn service(&self) -> RetrievalService {
        let params = FusionParams {
            threshold: 0.55,
            w_dense: 0.4,
            w_sparse: 0.6,
        };
        RetrievalService::new(
            self.embedder.clone(),
            HybridRetriever::new(self.dense.clone(), self.sparse.clone(), params),
            5,
        )
    }
}

#[tokio::test]
async fn test_end_to_end_incremental_scenario() {
    let tmp = TempDir::new().unwrap();
    let kb = tmp.path().join("kb");
    fs::create_dir_all(&kb).unwrap();
    fs::write(kb.join("A.md"), A_V1).unwrap();
    fs::write(kb.join("B.md"), B).unwrap();

    let mut h = harness(tmp.path(), &kb).await;

    // First run indexes both documents.
    let stats = h.indexer.ingest_incremental().await.unwrap();
    assert_eq!(stats.new, 2);
    assert_eq!(stats.updated, 0);
    let a_v1_ids = h.dense.ids_for_doc("A.md").await.unwrap();
    assert!(a_v1_ids.len() > 1);

    // Unchanged folder: nothing to do.
    let stats = h.indexer.ingest_incremental().await.unwrap();
    assert_eq!(stats.new, 0);
    assert_eq!(stats.updated, 0);

    // Edit A: one update, old chunks gone from both indices.
    fs::write(kb.join("A.md"), A_V2).unwrap();
    let stats = h.indexer.ingest_incremental().await.unwrap();
    assert_eq!(stats.new, 0);
    assert_eq!(stats.updated, 1);
    assert_eq!(stats.removed, 0);

    let a_v2_ids = h.dense.ids_for_doc("A.md").await.unwrap();
    assert_eq!(a_v2_ids, vec![ChunkId::new("A.md", 0)]);
    for stale in a_v1_ids.iter().filter(|id| !a_v2_ids.contains(id)) {
        assert!(!h.sparse.contains(stale).await.unwrap(), "stale {} in sparse", stale);
    }
    assert!(h.sparse.query("quokka", 10, None).await.unwrap().is_empty());

    // Delete B.
    fs::remove_file(kb.join("B.md")).unwrap();
    let stats = h.indexer.ingest_incremental().await.unwrap();
    assert_eq!(stats.removed, 1);
    assert!(h.dense.ids_for_doc("B.md").await.unwrap().is_empty());
    assert!(!h.sparse.contains(&ChunkId::new("B.md", 0)).await.unwrap());

    // A term unique to A is a hit, carried by the sparse channel.
    let service = h.service();
    let out = service
        .route_and_retrieve("wombat", &MetadataFilter::default(), None)
        .await
        .unwrap();
    assert_eq!(out.decision, Decision::Hit);
    assert_eq!(out.hits[0].id.doc_id, "A.md");
    assert_eq!(out.hits[0].score_sparse, 1.0);

    // The old term is gone.
    let out = service
        .route_and_retrieve("quokka", &MetadataFilter::default(), None)
        .await
        .unwrap();
    assert_eq!(out.decision, Decision::NoHit);

    // Gibberish never clears the threshold on the dense channel alone.
    let out = service
        .route_and_retrieve("xqzvvk plorbt", &MetadataFilter::default(), None)
        .await
        .unwrap();
    assert_eq!(out.decision, Decision::NoHit);
    assert!(out.hits.is_empty());
}

#[tokio::test]
async fn test_index_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    let kb = tmp.path().join("kb");
    fs::create_dir_all(&kb).unwrap();
    fs::write(kb.join("A.md"), A_V1).unwrap();

    {
        let mut h = harness(tmp.path(), &kb).await;
        h.indexer.ingest_incremental().await.unwrap();
    }

    let mut h = harness(tmp.path(), &kb).await;
    let stats = h.indexer.ingest_incremental().await.unwrap();
    assert_eq!(stats.new, 0);
    assert_eq!(stats.unchanged, 1);

    let out = h
        .service()
        .route_and_retrieve("quokka", &MetadataFilter::default(), None)
        .await
        .unwrap();
    assert_eq!(out.decision, Decision::Hit);
}

#[tokio::test]
async fn test_corrupt_version_store_forces_reindex() {
    let tmp = TempDir::new().unwrap();
    let kb = tmp.path().join("kb");
    fs::create_dir_all(&kb).unwrap();
    fs::write(kb.join("A.md"), A_V1).unwrap();
    fs::write(tmp.path().join("versions.json"), "{ not json").unwrap();

    let mut h = harness(tmp.path(), &kb).await;
    assert!(h.indexer.versions().is_empty());
    let stats = h.indexer.ingest_incremental().await.unwrap();
    assert_eq!(stats.new, 1);

    let raw = fs::read_to_string(tmp.path().join("versions.json")).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(parsed["A.md"]["version_hash"].as_str().unwrap().len(), 64);
}

#[tokio::test]
async fn test_full_reindex_matches_incremental() {
    let tmp = TempDir::new().unwrap();
    let kb = tmp.path().join("kb");
    fs::create_dir_all(&kb).unwrap();
    fs::write(kb.join("A.md"), A_V1).unwrap();
    fs::write(kb.join("B.md"), B).unwrap();

    let mut h = harness(tmp.path(), &kb).await;
    h.indexer.ingest_incremental().await.unwrap();
    let dense_before = h.dense.len().await.unwrap();

    let stats = h.indexer.ingest_full_reindex().await.unwrap();
    assert_eq!(stats.new, 2);
    assert_eq!(h.dense.len().await.unwrap(), dense_before);
    assert_eq!(h.sparse.len().await.unwrap(), dense_before);
    assert_eq!(h.indexer.versions().total_chunks(), dense_before);
}
