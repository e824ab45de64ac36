//! Durable-first store with an in-memory fallback tier.
//!
//! | Operation | Durable tier | On durable failure / absence |
//! |-----------|--------------|------------------------------|
//! | `upsert` | written in sub-batches | remaining entries go to memory |
//! | `delete` | attempted | logged, non-fatal; memory still cleaned |
//! | `get_hashes` | read once | memory snapshot only |
//! | `search` | used when ≥1 hit | brute-force memory scan |
//!
//! Degradation is decided per call: a failing upsert falls back without
//! affecting the next call, which tries the durable tier again.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::models::{HashSnapshot, IndexEntry};
use crate::search::SearchHit;

use super::{InMemoryStore, Storage};

/// Default number of entries per durable write.
pub const DEFAULT_UPSERT_BATCH_SIZE: usize = 100;

/// Where the entries of one upsert call landed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TieredWrite {
    pub durable: usize,
    pub fallback: usize,
}

/// Composes an optional durable [`Storage`] with an [`InMemoryStore`].
pub struct TieredStore {
    durable: Option<Arc<dyn Storage>>,
    fallback: Arc<InMemoryStore>,
    upsert_batch_size: usize,
}

impl TieredStore {
    pub fn new(durable: Option<Arc<dyn Storage>>, fallback: Arc<InMemoryStore>) -> Self {
        Self {
            durable,
            fallback,
            upsert_batch_size: DEFAULT_UPSERT_BATCH_SIZE,
        }
    }

    /// Memory-only store (no durable tier configured).
    pub fn memory_only() -> Self {
        Self::new(None, Arc::new(InMemoryStore::new()))
    }

    pub fn with_upsert_batch_size(mut self, size: usize) -> Self {
        self.upsert_batch_size = size.max(1);
        self
    }

    pub fn fallback(&self) -> &InMemoryStore {
        &self.fallback
    }

    pub fn has_durable(&self) -> bool {
        self.durable.is_some()
    }

    /// Write entries durable-first, reporting how many landed in each tier.
    pub async fn upsert_tiered(&self, scope: &str, entries: &[IndexEntry]) -> TieredWrite {
        let mut written = TieredWrite::default();
        let Some(durable) = &self.durable else {
            self.fallback.insert(scope, entries);
            written.fallback = entries.len();
            return written;
        };

        for (i, sub_batch) in entries.chunks(self.upsert_batch_size).enumerate() {
            match durable.upsert(scope, sub_batch).await {
                Ok(()) => {
                    self.fallback.discard(scope, sub_batch);
                    written.durable += sub_batch.len();
                }
                Err(e) => {
                    let rest = &entries[i * self.upsert_batch_size..];
                    warn!(
                        store = durable.name(),
                        scope,
                        entries = rest.len(),
                        error = %format!("{:#}", e),
                        "durable upsert failed, writing to in-memory fallback"
                    );
                    self.fallback.insert(scope, rest);
                    written.fallback += rest.len();
                    break;
                }
            }
        }
        written
    }

    /// Rank entries for `query_vec`.
    ///
    /// With a scope, the durable ranking wins when it returns anything;
    /// otherwise the memory tier is scanned (all scopes when `scope` is `None`).
    pub async fn search(
        &self,
        scope: Option<&str>,
        query_vec: &[f32],
        limit: usize,
    ) -> Vec<SearchHit> {
        if let (Some(scope), Some(durable)) = (scope, &self.durable) {
            match durable.search_vectors(scope, query_vec, limit).await {
                Ok(hits) if !hits.is_empty() => return hits,
                Ok(_) => debug!(scope, "durable search returned no hits, scanning memory"),
                Err(e) => warn!(
                    store = durable.name(),
                    scope,
                    error = %format!("{:#}", e),
                    "durable search failed, scanning memory"
                ),
            }
        }
        self.fallback.rank(scope, query_vec, limit)
    }
}

#[async_trait]
impl Storage for TieredStore {
    fn name(&self) -> &str {
        "tiered"
    }

    async fn get_hashes(&self, scope: &str) -> Result<HashSnapshot> {
        let mut hashes = match &self.durable {
            Some(durable) => match durable.get_hashes(scope).await {
                Ok(h) => h,
                Err(e) => {
                    warn!(
                        store = durable.name(),
                        scope,
                        error = %format!("{:#}", e),
                        "durable hash read failed, using in-memory snapshot"
                    );
                    HashSnapshot::new()
                }
            },
            None => HashSnapshot::new(),
        };
        hashes.extend(self.fallback.hashes(scope));
        Ok(hashes)
    }

    async fn upsert(&self, scope: &str, entries: &[IndexEntry]) -> Result<()> {
        self.upsert_tiered(scope, entries).await;
        Ok(())
    }

    async fn delete(&self, scope: &str, source_paths: &[String]) -> Result<usize> {
        let mut removed = 0;
        if let Some(durable) = &self.durable {
            match durable.delete(scope, source_paths).await {
                Ok(n) => removed += n,
                Err(e) => warn!(
                    store = durable.name(),
                    scope,
                    paths = source_paths.len(),
                    error = %format!("{:#}", e),
                    "durable delete failed"
                ),
            }
        }
        removed += self.fallback.remove_sources(scope, source_paths);
        Ok(removed)
    }

    async fn search_vectors(
        &self,
        scope: &str,
        query_vec: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        Ok(self.search(Some(scope), query_vec, limit).await)
    }
}
