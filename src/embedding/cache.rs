//! SQLite-backed embedding cache.
//!
//! Vectors live in the `embedding_cache` table keyed by
//! `(model, content_hash)`, next to the index itself, so unchanged chunk
//! text is never sent to the provider twice, across runs and across scopes.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use codebase_index_core::embedding::{blob_to_vec, vec_to_blob, EmbeddingClient};
use codebase_index_core::{CachedEmbedder, EmbeddingCache, InMemoryEmbeddingCache};

use crate::config::EmbeddingConfig;

/// SQLite's default bound-parameter limit is 999; one slot goes to `model`.
const LOOKUP_CHUNK: usize = 500;

pub struct SqliteEmbeddingCache {
    pool: SqlitePool,
}

impl SqliteEmbeddingCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EmbeddingCache for SqliteEmbeddingCache {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get_many(&self, model: &str, hashes: &[String]) -> Result<HashMap<String, Vec<f32>>> {
        let mut found = HashMap::new();
        for chunk in hashes.chunks(LOOKUP_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT content_hash, embedding FROM embedding_cache \
                 WHERE model = ? AND content_hash IN ({})",
                placeholders
            );
            let mut query = sqlx::query(&sql).bind(model);
            for hash in chunk {
                query = query.bind(hash);
            }
            for row in query.fetch_all(&self.pool).await? {
                let blob: Vec<u8> = row.get("embedding");
                found.insert(row.get::<String, _>("content_hash"), blob_to_vec(&blob));
            }
        }
        Ok(found)
    }

    async fn put_many(&self, model: &str, items: &[(String, Vec<f32>)]) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        for (hash, vector) in items {
            sqlx::query(
                r#"
                INSERT INTO embedding_cache (model, content_hash, embedding, dims, updated_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(model, content_hash) DO UPDATE SET
                    embedding = excluded.embedding,
                    dims = excluded.dims,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(model)
            .bind(hash)
            .bind(vec_to_blob(vector))
            .bind(vector.len() as i64)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

/// Wrap `provider` in a [`CachedEmbedder`] when `[embedding] cache` is on.
///
/// The cache is persisted in SQLite when a pool is available and kept in
/// memory for this process otherwise.
pub fn with_cache(
    config: &EmbeddingConfig,
    provider: Arc<dyn EmbeddingClient>,
    pool: Option<&SqlitePool>,
) -> (Arc<dyn EmbeddingClient>, Option<Arc<CachedEmbedder>>) {
    if !config.cache {
        return (provider, None);
    }
    let cache: Arc<dyn EmbeddingCache> = match pool {
        Some(pool) => Arc::new(SqliteEmbeddingCache::new(pool.clone())),
        None => Arc::new(InMemoryEmbeddingCache::new()),
    };
    let cached = Arc::new(CachedEmbedder::new(provider, cache));
    let client: Arc<dyn EmbeddingClient> = cached.clone();
    (client, Some(cached))
}
