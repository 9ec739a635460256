//! SQLite-backed dense and sparse stores.
//!
//! [`SqliteVectorStore`] keeps vectors as little-endian `f32` BLOBs in
//! `dense_chunks` and ranks by brute-force cosine in Rust.
//! [`SqliteSparseIndex`] keeps chunk text and metadata in `sparse_chunks`
//! and ranks through the FTS5 table `sparse_fts`, so opening it costs
//! nothing regardless of corpus size. Run
//! [`run_migrations`](crate::migrate::run_migrations) before constructing
//! either.

use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::embedding::{blob_to_vec, cosine_distance, vec_to_blob};
use crate::error::{Error, Result};
use crate::models::{Chunk, ChunkId, ChunkMetadata};
use crate::sparse::{tokenize, SparseHit, SparseIndex, SparseScoring};

use super::{MetadataFilter, VectorMatch, VectorRecord, VectorStore};

fn chunk_id_from_row(row: &SqliteRow) -> Result<ChunkId> {
    let doc_id: String = row.try_get("doc_id")?;
    let index: i64 = row.try_get("chunk_index")?;
    Ok(ChunkId::new(doc_id, index as usize))
}

fn metadata_from_row(row: &SqliteRow) -> Result<ChunkMetadata> {
    let json: String = row.try_get("metadata_json")?;
    Ok(serde_json::from_str(&json)?)
}

// ============ Dense ============

/// Vector store over the `dense_chunks` table.
pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn stored_dims(&self) -> Result<Option<usize>> {
        let dims: Option<i64> = sqlx::query_scalar("SELECT dims FROM dense_chunks LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(dims.map(|d| d as usize))
    }

    async fn rows_for(&self, filter: &MetadataFilter, columns: &str) -> Result<Vec<SqliteRow>> {
        let rows = match &filter.doc_id {
            Some(doc_id) => {
                sqlx::query(&format!(
                    "SELECT {} FROM dense_chunks WHERE doc_id = ? ORDER BY chunk_index",
                    columns
                ))
                .bind(doc_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM dense_chunks ORDER BY doc_id, chunk_index",
                    columns
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows)
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()> {
        let Some(first) = records.first() else {
            return Ok(());
        };
        let expected = self.stored_dims().await?.unwrap_or(first.vector.len());
        if let Some(bad) = records.iter().find(|r| r.vector.len() != expected) {
            return Err(Error::DimensionMismatch {
                expected,
                actual: bad.vector.len(),
            });
        }

        let mut tx = self.pool.begin().await?;
        for record in &records {
            sqlx::query(
                r#"
                INSERT INTO dense_chunks (doc_id, chunk_index, text, metadata_json, embedding, dims)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(doc_id, chunk_index) DO UPDATE SET
                    text = excluded.text,
                    metadata_json = excluded.metadata_json,
                    embedding = excluded.embedding,
                    dims = excluded.dims
                "#,
            )
            .bind(&record.id.doc_id)
            .bind(record.id.index as i64)
            .bind(&record.text)
            .bind(serde_json::to_string(&record.metadata)?)
            .bind(vec_to_blob(&record.vector))
            .bind(record.vector.len() as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<VectorMatch>> {
        if let Some(dims) = self.stored_dims().await? {
            if embedding.len() != dims {
                return Err(Error::DimensionMismatch {
                    expected: dims,
                    actual: embedding.len(),
                });
            }
        }

        let rows = self
            .rows_for(filter, "doc_id, chunk_index, text, metadata_json, embedding")
            .await?;

        let mut matches = Vec::with_capacity(rows.len());
        for row in &rows {
            let metadata = metadata_from_row(row)?;
            if !filter.matches(&metadata) {
                continue;
            }
            let blob: Vec<u8> = row.try_get("embedding")?;
            matches.push(VectorMatch {
                id: chunk_id_from_row(row)?,
                distance: cosine_distance(embedding, &blob_to_vec(&blob)),
                text: row.try_get("text")?,
                metadata,
            });
        }

        matches.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        matches.truncate(k);
        Ok(matches)
    }

    async fn delete_where(&self, filter: &MetadataFilter) -> Result<usize> {
        let doc_only = filter.source.is_none() && filter.extra.is_empty();
        match &filter.doc_id {
            Some(doc_id) if doc_only => {
                let result = sqlx::query("DELETE FROM dense_chunks WHERE doc_id = ?")
                    .bind(doc_id)
                    .execute(&self.pool)
                    .await?;
                Ok(result.rows_affected() as usize)
            }
            _ => {
                let ids = self.ids_where(filter).await?;
                self.delete_ids(&ids).await
            }
        }
    }

    async fn ids_where(&self, filter: &MetadataFilter) -> Result<Vec<ChunkId>> {
        let rows = self
            .rows_for(filter, "doc_id, chunk_index, metadata_json")
            .await?;
        let mut ids = Vec::new();
        for row in &rows {
            if filter.matches(&metadata_from_row(row)?) {
                ids.push(chunk_id_from_row(row)?);
            }
        }
        Ok(ids)
    }

    async fn delete_ids(&self, ids: &[ChunkId]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut removed = 0usize;
        for id in ids {
            let result = sqlx::query("DELETE FROM dense_chunks WHERE doc_id = ? AND chunk_index = ?")
                .bind(&id.doc_id)
                .bind(id.index as i64)
                .execute(&mut *tx)
                .await?;
            removed += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(removed)
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM dense_chunks")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dense_chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}

// ============ Sparse ============

/// Quote every term as an FTS5 string and OR them, so arbitrary user text
/// is always a valid `MATCH` expression.
fn fts_match_expr(terms: &[String]) -> String {
    terms
        .iter()
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" OR ")
}

fn overlap_score(terms: &[String], text: &str) -> f64 {
    let present: HashSet<String> = tokenize(text).into_iter().collect();
    terms.iter().filter(|t| present.contains(*t)).count() as f64
}

/// Sparse index over `sparse_chunks`, ranked by SQLite FTS5.
///
/// With [`SparseScoring::Bm25`] the score is FTS5's `bm25()` rank negated,
/// so higher is better. With [`SparseScoring::Overlap`] the FTS5 matches
/// are rescored by the number of distinct query terms they contain.
pub struct SqliteSparseIndex {
    pool: SqlitePool,
    scoring: SparseScoring,
}

impl SqliteSparseIndex {
    /// Attach to a migrated database. Nothing is loaded into memory.
    pub async fn open(pool: SqlitePool, scoring: SparseScoring) -> Result<Self> {
        let ready: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='sparse_fts'",
        )
        .fetch_one(&pool)
        .await?;
        if !ready {
            return Err(Error::Store(
                "sparse_fts table missing; run migrations first".to_string(),
            ));
        }
        Ok(Self { pool, scoring })
    }

    pub fn scoring(&self) -> SparseScoring {
        self.scoring
    }

    async fn upsert(
        conn: &mut SqliteConnection,
        id: &ChunkId,
        text: &str,
        metadata: &ChunkMetadata,
    ) -> Result<()> {
        let metadata_json = serde_json::to_string(metadata)?;
        let existing: Option<i64> =
            sqlx::query_scalar("SELECT id FROM sparse_chunks WHERE doc_id = ? AND chunk_index = ?")
                .bind(&id.doc_id)
                .bind(id.index as i64)
                .fetch_optional(&mut *conn)
                .await?;

        let rowid = match existing {
            Some(rowid) => {
                sqlx::query("UPDATE sparse_chunks SET text = ?, metadata_json = ? WHERE id = ?")
                    .bind(text)
                    .bind(&metadata_json)
                    .bind(rowid)
                    .execute(&mut *conn)
                    .await?;
                sqlx::query("DELETE FROM sparse_fts WHERE rowid = ?")
                    .bind(rowid)
                    .execute(&mut *conn)
                    .await?;
                rowid
            }
            None => sqlx::query(
                "INSERT INTO sparse_chunks (doc_id, chunk_index, text, metadata_json) VALUES (?, ?, ?, ?)",
            )
            .bind(&id.doc_id)
            .bind(id.index as i64)
            .bind(text)
            .bind(&metadata_json)
            .execute(&mut *conn)
            .await?
            .last_insert_rowid(),
        };

        sqlx::query("INSERT INTO sparse_fts (rowid, text) VALUES (?, ?)")
            .bind(rowid)
            .bind(text)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Delete chunks of `doc_id` with `chunk_index >= keep` from both tables.
    async fn delete_from(&self, doc_id: &str, keep: usize) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            DELETE FROM sparse_fts WHERE rowid IN (
                SELECT id FROM sparse_chunks WHERE doc_id = ? AND chunk_index >= ?
            )
            "#,
        )
        .bind(doc_id)
        .bind(keep as i64)
        .execute(&mut *tx)
        .await?;
        let result = sqlx::query("DELETE FROM sparse_chunks WHERE doc_id = ? AND chunk_index >= ?")
            .bind(doc_id)
            .bind(keep as i64)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() as usize)
    }
}

#[async_trait]
impl SparseIndex for SqliteSparseIndex {
    async fn add_chunk(&self, id: &ChunkId, text: &str, metadata: &ChunkMetadata) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::upsert(&mut *tx, id, text, metadata).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn add_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for chunk in chunks {
            Self::upsert(&mut *tx, &chunk.id, &chunk.text, &chunk.metadata).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_by_doc_id(&self, doc_id: &str) -> Result<usize> {
        self.delete_from(doc_id, 0).await
    }

    async fn truncate_doc(&self, doc_id: &str, keep: usize) -> Result<usize> {
        self.delete_from(doc_id, keep).await
    }

    async fn query(
        &self,
        text: &str,
        k: usize,
        filter_ids: Option<&HashSet<ChunkId>>,
    ) -> Result<Vec<SparseHit>> {
        let mut terms = tokenize(text);
        terms.sort();
        terms.dedup();
        if terms.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        // Allowlists and overlap rescoring are applied below, so they need
        // every match rather than the top k.
        let limit: i64 = match (filter_ids, self.scoring) {
            (None, SparseScoring::Bm25) => k as i64,
            _ => -1,
        };

        let rows = sqlx::query(
            r#"
            SELECT c.doc_id, c.chunk_index, c.text, c.metadata_json, m.rank
            FROM (
                SELECT rowid, rank
                FROM sparse_fts
                WHERE sparse_fts MATCH ?
                ORDER BY rank
                LIMIT ?
            ) AS m
            JOIN sparse_chunks c ON c.id = m.rowid
            "#,
        )
        .bind(fts_match_expr(&terms))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let id = chunk_id_from_row(row)?;
            if filter_ids.is_some_and(|ids| !ids.contains(&id)) {
                continue;
            }
            let text: String = row.try_get("text")?;
            let score = match self.scoring {
                SparseScoring::Bm25 => {
                    let rank: f64 = row.try_get("rank")?;
                    -rank
                }
                SparseScoring::Overlap => overlap_score(&terms, &text),
            };
            if score <= 0.0 {
                continue;
            }
            hits.push(SparseHit {
                id,
                score,
                text,
                metadata: metadata_from_row(row)?,
            });
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(k);
        debug!(terms = terms.len(), hits = hits.len(), "sparse query");
        Ok(hits)
    }

    async fn clear(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM sparse_fts").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM sparse_chunks")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sparse_chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn contains(&self, id: &ChunkId) -> Result<bool> {
        let found: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sparse_chunks WHERE doc_id = ? AND chunk_index = ?",
        )
        .bind(&id.doc_id)
        .bind(id.index as i64)
        .fetch_one(&self.pool)
        .await?;
        Ok(found)
    }
}
