//! SQLite durable repository.
//!
//! Implements [`Storage`] over the `index_entries` table created by
//! [`migrate`](crate::migrate). Embeddings are stored as little-endian f32
//! BLOBs; vector search loads the scope's vectors and ranks them with
//! cosine similarity in process.
//!
//! Every `upsert` and `delete` call runs in one transaction, so a sub-batch
//! is either fully written or not at all.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::warn;

use codebase_index_core::embedding::{blob_to_vec, vec_to_blob};
use codebase_index_core::models::HashSnapshot;
use codebase_index_core::search::rank_entries;
use codebase_index_core::store::snapshot_hashes;
use codebase_index_core::{InMemoryStore, IndexEntry, SearchHit, Storage, TieredStore};

use crate::config::Config;
use crate::db;
use crate::migrate;

/// Build the tiered store for `config`.
///
/// With a `[db]` section the SQLite repository is opened (and its schema
/// created) as the durable tier. If it cannot be opened the run continues
/// on the in-memory tier alone. The pool is returned for closing.
pub async fn open_tiered(config: &Config) -> Result<(Arc<TieredStore>, Option<SqlitePool>)> {
    let fallback = Arc::new(InMemoryStore::new());
    let pool = match db::connect(config).await {
        Ok(Some(pool)) => match migrate::run_migrations(&pool).await {
            Ok(()) => Some(pool),
            Err(e) => {
                warn!(error = %format!("{:#}", e), "database schema unavailable, using in-memory store");
                pool.close().await;
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            warn!(error = %format!("{:#}", e), "database unavailable, using in-memory store");
            None
        }
    };

    let durable: Option<Arc<dyn Storage>> = pool
        .clone()
        .map(|p| Arc::new(SqliteStore::new(p)) as Arc<dyn Storage>);
    let store = TieredStore::new(durable, fallback)
        .with_upsert_batch_size(config.store.upsert_batch_size);
    Ok((Arc::new(store), pool))
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn load_scope(&self, scope: &str) -> Result<Vec<IndexEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT relative_path, source_path, absolute_path, content, content_hash,
                   embedding, file_type, last_modified, part_number, total_parts
            FROM index_entries
            WHERE scope = ?
            ORDER BY relative_path
            "#,
        )
        .bind(scope)
        .fetch_all(&self.pool)
        .await?;

        let entries = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                IndexEntry {
                    relative_path: row.get("relative_path"),
                    source_path: row.get("source_path"),
                    absolute_path: row.get("absolute_path"),
                    content: row.get("content"),
                    content_hash: row.get("content_hash"),
                    embedding: blob_to_vec(&blob),
                    file_type: row.get("file_type"),
                    last_modified: row.get("last_modified"),
                    part_number: row.get::<i64, _>("part_number") as usize,
                    total_parts: row.get::<i64, _>("total_parts") as usize,
                }
            })
            .collect();
        Ok(entries)
    }
}

#[async_trait]
impl Storage for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get_hashes(&self, scope: &str) -> Result<HashSnapshot> {
        let rows = sqlx::query(
            "SELECT source_path, content_hash, total_parts FROM index_entries WHERE scope = ?",
        )
        .bind(scope)
        .fetch_all(&self.pool)
        .await?;

        Ok(snapshot_hashes(rows.iter().map(|row| {
            (
                row.get::<String, _>("source_path"),
                row.get::<String, _>("content_hash"),
                row.get::<i64, _>("total_parts") as usize,
            )
        })))
    }

    async fn upsert(&self, scope: &str, entries: &[IndexEntry]) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        for entry in entries {
            if entry.part_number == 1 {
                sqlx::query("DELETE FROM index_entries WHERE scope = ? AND source_path = ?")
                    .bind(scope)
                    .bind(&entry.source_path)
                    .execute(&mut *tx)
                    .await?;
            }

            sqlx::query(
                r#"
                INSERT INTO index_entries (
                    scope, relative_path, source_path, absolute_path, content, content_hash,
                    embedding, dims, file_type, last_modified, part_number, total_parts, indexed_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(scope, relative_path) DO UPDATE SET
                    source_path = excluded.source_path,
                    absolute_path = excluded.absolute_path,
                    content = excluded.content,
                    content_hash = excluded.content_hash,
                    embedding = excluded.embedding,
                    dims = excluded.dims,
                    file_type = excluded.file_type,
                    last_modified = excluded.last_modified,
                    part_number = excluded.part_number,
                    total_parts = excluded.total_parts,
                    indexed_at = excluded.indexed_at
                "#,
            )
            .bind(scope)
            .bind(&entry.relative_path)
            .bind(&entry.source_path)
            .bind(&entry.absolute_path)
            .bind(&entry.content)
            .bind(&entry.content_hash)
            .bind(vec_to_blob(&entry.embedding))
            .bind(entry.embedding.len() as i64)
            .bind(&entry.file_type)
            .bind(entry.last_modified)
            .bind(entry.part_number as i64)
            .bind(entry.total_parts as i64)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, scope: &str, source_paths: &[String]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut removed = 0u64;

        for path in source_paths {
            let result = sqlx::query("DELETE FROM index_entries WHERE scope = ? AND source_path = ?")
                .bind(scope)
                .bind(path)
                .execute(&mut *tx)
                .await?;
            removed += result.rows_affected();
        }

        tx.commit().await?;
        Ok(removed as usize)
    }

    async fn search_vectors(
        &self,
        scope: &str,
        query_vec: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let entries = self.load_scope(scope).await?;
        Ok(rank_entries(query_vec, &entries, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codebase_index_core::store::INCOMPLETE_HASH;
    use tempfile::TempDir;

    async fn open() -> (TempDir, SqliteStore) {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("data").join("index.sqlite"))
            .await
            .unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        (tmp, SqliteStore::new(pool))
    }

    fn entry(source: &str, part: usize, total: usize, hash: &str, v: Vec<f32>) -> IndexEntry {
        let key = if total == 1 {
            source.to_string()
        } else {
            format!("{} (part {}/{})", source, part, total)
        };
        IndexEntry {
            relative_path: key,
            source_path: source.to_string(),
            absolute_path: format!("/ws/{}", source),
            content: format!("{} part {}", source, part),
            content_hash: hash.to_string(),
            embedding: v,
            file_type: "rs".to_string(),
            last_modified: 1_700_000_000,
            part_number: part,
            total_parts: total,
        }
    }

    #[tokio::test]
    async fn test_migrations_idempotent() {
        let (_tmp, store) = open().await;
        migrate::run_migrations(store.pool()).await.unwrap();
    }

    #[tokio::test]
    async fn test_upsert_then_hashes() {
        let (_tmp, store) = open().await;
        store
            .upsert(
                "ws",
                &[
                    entry("a.rs", 1, 1, "ha", vec![1.0, 0.0]),
                    entry("b.rs", 1, 2, "hb", vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();

        let hashes = store.get_hashes("ws").await.unwrap();
        assert_eq!(hashes.get("a.rs").map(String::as_str), Some("ha"));
        assert_eq!(
            hashes.get("b.rs").map(String::as_str),
            Some(INCOMPLETE_HASH),
            "incomplete file must still be reported"
        );
        assert!(store.get_hashes("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reindex_with_fewer_parts_leaves_no_orphans() {
        let (_tmp, store) = open().await;
        let old: Vec<IndexEntry> = (1..=3).map(|i| entry("big.rs", i, 3, "old", vec![1.0])).collect();
        store.upsert("ws", &old).await.unwrap();

        store
            .upsert("ws", &[entry("big.rs", 1, 1, "new", vec![1.0])])
            .await
            .unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM index_entries WHERE scope = 'ws'")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
        let hashes = store.get_hashes("ws").await.unwrap();
        assert_eq!(hashes.get("big.rs").map(String::as_str), Some("new"));
    }

    #[tokio::test]
    async fn test_delete_by_source_path() {
        let (_tmp, store) = open().await;
        store
            .upsert(
                "ws",
                &[
                    entry("big.rs", 1, 2, "h", vec![1.0]),
                    entry("big.rs", 2, 2, "h", vec![1.0]),
                    entry("keep.rs", 1, 1, "k", vec![1.0]),
                ],
            )
            .await
            .unwrap();
        store.upsert("other", &[entry("big.rs", 1, 1, "h", vec![1.0])]).await.unwrap();

        let removed = store.delete("ws", &["big.rs".to_string()]).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.get_hashes("ws").await.unwrap().len(), 1);
        assert_eq!(store.get_hashes("other").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_search_vectors_round_trips_embeddings() {
        let (_tmp, store) = open().await;
        store
            .upsert(
                "ws",
                &[
                    entry("auth.rs", 1, 1, "h", vec![0.9, 0.1, 0.0]),
                    entry("style.rs", 1, 1, "h", vec![0.0, 0.0, 1.0]),
                ],
            )
            .await
            .unwrap();

        let hits = store.search_vectors("ws", &[1.0, 0.0, 0.0], 5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].relative_path, "auth.rs");
        assert!(hits[0].score > 0.9);
        assert_eq!(hits[1].score, 0.0);
        assert!(store.search_vectors("none", &[1.0, 0.0, 0.0], 5).await.unwrap().is_empty());
    }
}
