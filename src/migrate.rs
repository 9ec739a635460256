//! Schema for the persisted dual index.
//!
//! Both chunk tables are keyed by the structured chunk identity
//! `(doc_id, chunk_index)`. `sparse_fts` is the FTS5 full-text index over
//! `sparse_chunks.text`, sharing its row ids.

use sqlx::SqlitePool;

use crate::error::Result;

/// Create the dense and sparse tables and the full-text index. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dense_chunks (
            doc_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            embedding BLOB NOT NULL,
            dims INTEGER NOT NULL,
            PRIMARY KEY (doc_id, chunk_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sparse_chunks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            doc_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            UNIQUE (doc_id, chunk_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Virtual tables are created once; check first.
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='sparse_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        // Row ids mirror sparse_chunks.id.
        sqlx::query("CREATE VIRTUAL TABLE sparse_fts USING fts5(text)")
            .execute(pool)
            .await?;
    }

    Ok(())
}
