//! Error taxonomy for the ingestion and retrieval engine.
//!
//! Library code returns [`Error`]; the `hkb` binary wraps it in `anyhow`
//! with extra context. Variants map onto four failure classes:
//!
//! | Class | Variants | Handling |
//! |-------|----------|----------|
//! | Configuration | [`Error::InvalidConfig`] | fail fast at construction |
//! | Transient I/O | [`Error::Io`], [`Error::Embedding`], [`Error::Extract`], [`Error::Timeout`] | isolated per document or query |
//! | Consistency | [`Error::FilteredDeleteUnsupported`] | recovered by the dense delete fallback |
//! | Backing store | [`Error::Store`], [`Error::DimensionMismatch`], [`Error::Serialization`] | propagated |

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("text extraction failed for {path}: {reason}")]
    Extract { path: String, reason: String },

    #[error("{store} does not support filtered delete")]
    FilteredDeleteUnsupported { store: &'static str },

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("index store error: {0}")]
    Store(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("query timed out after {0:?}")]
    Timeout(Duration),
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::Store(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
