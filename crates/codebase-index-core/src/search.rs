//! Semantic search over the embedding index.
//!
//! The query text is embedded with the same provider used for indexing.
//! When a scope is supplied, the [`TieredStore`] asks the durable tier
//! first and uses its ranking if it returns at least one hit. Otherwise
//! (no scope, no durable tier, zero durable hits, or a durable failure)
//! the in-memory tier is scanned brute-force.
//!
//! Ranking is cosine similarity, descending. Ties keep the store's
//! enumeration order (the sort is stable).

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::embedding::{cosine_similarity, embed_query, EmbeddingClient};
use crate::models::IndexEntry;
use crate::store::TieredStore;

/// Length of the content excerpt attached to each hit.
pub const SNIPPET_CHARS: usize = 240;

/// A ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    /// Entry key (chunk path for multi-part files).
    pub relative_path: String,
    pub source_path: String,
    pub absolute_path: String,
    pub file_type: String,
    /// Cosine similarity to the query, in `[-1.0, 1.0]`.
    pub score: f32,
    /// First [`SNIPPET_CHARS`] characters of the entry content.
    pub snippet: String,
}

impl SearchHit {
    pub fn from_entry(entry: &IndexEntry, score: f32) -> Self {
        Self {
            relative_path: entry.relative_path.clone(),
            source_path: entry.source_path.clone(),
            absolute_path: entry.absolute_path.clone(),
            file_type: entry.file_type.clone(),
            score,
            snippet: entry.content.chars().take(SNIPPET_CHARS).collect(),
        }
    }
}

/// Brute-force rank `entries` against `query_vec` and keep the top `limit`.
pub fn rank_entries<'a, I>(query_vec: &[f32], entries: I, limit: usize) -> Vec<SearchHit>
where
    I: IntoIterator<Item = &'a IndexEntry>,
{
    let mut scored: Vec<(f32, &IndexEntry)> = entries
        .into_iter()
        .map(|e| (cosine_similarity(query_vec, &e.embedding), e))
        .collect();

    scored.sort_by(|a, b| {
        b.0.total_cmp(&a.0)
            .then_with(|| a.1.relative_path.cmp(&b.1.relative_path))
    });
    scored.truncate(limit);

    scored
        .into_iter()
        .map(|(score, e)| SearchHit::from_entry(e, score))
        .collect()
}

/// Embeds queries and ranks stored entries.
pub struct SearchEngine {
    embedder: Arc<dyn EmbeddingClient>,
    store: Arc<TieredStore>,
}

impl SearchEngine {
    pub fn new(embedder: Arc<dyn EmbeddingClient>, store: Arc<TieredStore>) -> Self {
        Self { embedder, store }
    }

    /// Search for `query`, returning at most `limit` hits.
    ///
    /// An empty query or a zero limit returns no results without calling
    /// the provider.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        scope: Option<&str>,
    ) -> Result<Vec<SearchHit>> {
        self.search_cancellable(query, limit, scope, &CancellationToken::new())
            .await
    }

    /// [`search`](Self::search) with a caller-owned cancellation token for
    /// the query embedding request.
    pub async fn search_cancellable(
        &self,
        query: &str,
        limit: usize,
        scope: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchHit>> {
        if query.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let query_vec = embed_query(self.embedder.as_ref(), query, cancel).await?;
        Ok(self.store.search(scope, &query_vec, limit).await)
    }
}
