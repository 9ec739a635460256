//! # Hybrid KB
//!
//! Incremental knowledge-base ingestion feeding a hybrid (dense + lexical)
//! retrieval engine with an explicit hit/no-hit routing decision.
//!
//! A folder of documents is scanned, content-hashed, chunked, embedded and
//! written into a dual index: a dense vector store and a BM25 index keyed
//! by the same chunk ids. Queries hit both halves concurrently; the scores
//! are min-max normalized, linearly fused, and thresholded so callers know
//! when to fall back instead of trusting retrieved context.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌────────────────────┐
//! │ Scanner  │──▶│   Indexer    │──▶│ DenseIndex (vector) │
//! │ + hashes │   │ chunk+embed  │   │ SparseIndex (BM25)  │
//! └──────────┘   └──────┬───────┘   └─────────┬──────────┘
//!                       │                     │
//!                ┌──────▼───────┐    ┌────────▼─────────┐
//!                │ VersionStore │    │ HybridRetriever  │
//!                │  (JSON file) │    │ fuse + threshold │
//!                └──────────────┘    └────────┬─────────┘
//!                                             ▼
//!                                   ┌──────────────────┐
//!                                   │ RetrievalService │
//!                                   │  + telemetry     │
//!                                   └──────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! hkb init                      # create the index
//! hkb ingest                    # index new/changed documents
//! hkb query "rotate api keys"   # hybrid retrieval with a decision
//! hkb status                    # check both index halves agree
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy |
//! | [`scanner`] | KB folder walk and content hashing |
//! | [`versions`] | Persistent document version map |
//! | [`chunk`] | Character-window chunking |
//! | [`embedding`] | Embedder abstraction and vector helpers |
//! | [`extract`] | Plain-text extraction (text, PDF, OOXML) |
//! | [`store`] | Vector store trait, in-memory and SQLite stores |
//! | [`dense`] | Dense retrieval channel |
//! | [`sparse`] | Sparse (BM25) retrieval channel |
//! | [`hybrid`] | Score normalization, fusion, and decision |
//! | [`ingest`] | Incremental ingestion orchestrator |
//! | [`retrieval`] | Query entry point and telemetry |
//! | [`stats`] | Index status report |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod config;
pub mod db;
pub mod dense;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod hybrid;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod retrieval;
pub mod scanner;
pub mod sparse;
pub mod stats;
pub mod store;
pub mod versions;
