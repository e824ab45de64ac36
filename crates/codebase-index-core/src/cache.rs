//! Content-addressed embedding cache.
//!
//! [`CachedEmbedder`] sits in front of any [`EmbeddingClient`] and keys
//! vectors by `(model, sha256(text))`. Only texts the cache has never seen
//! reach the provider, so editing one part of a multi-part file re-embeds
//! that part alone, and identical chunks across files are embedded once.
//!
//! Cache failures never fail a batch: a failed lookup is treated as a miss
//! and a failed write is logged.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::embedding::EmbeddingClient;
use crate::hash::compute_hash;

/// Vector storage keyed by model and text hash.
#[async_trait]
pub trait EmbeddingCache: Send + Sync {
    fn name(&self) -> &str;

    /// Cached vectors for whichever of `hashes` are present.
    async fn get_many(&self, model: &str, hashes: &[String]) -> Result<HashMap<String, Vec<f32>>>;

    async fn put_many(&self, model: &str, items: &[(String, Vec<f32>)]) -> Result<()>;
}

/// Process-local [`EmbeddingCache`].
#[derive(Default)]
pub struct InMemoryEmbeddingCache {
    vectors: RwLock<HashMap<(String, String), Vec<f32>>>,
}

impl InMemoryEmbeddingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.vectors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EmbeddingCache for InMemoryEmbeddingCache {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get_many(&self, model: &str, hashes: &[String]) -> Result<HashMap<String, Vec<f32>>> {
        let vectors = self.vectors.read().unwrap_or_else(PoisonError::into_inner);
        Ok(hashes
            .iter()
            .filter_map(|h| {
                vectors
                    .get(&(model.to_string(), h.clone()))
                    .map(|v| (h.clone(), v.clone()))
            })
            .collect())
    }

    async fn put_many(&self, model: &str, items: &[(String, Vec<f32>)]) -> Result<()> {
        let mut vectors = self.vectors.write().unwrap_or_else(PoisonError::into_inner);
        for (hash, vector) in items {
            vectors.insert((model.to_string(), hash.clone()), vector.clone());
        }
        Ok(())
    }
}

/// [`EmbeddingClient`] decorator that consults an [`EmbeddingCache`] first.
pub struct CachedEmbedder {
    inner: Arc<dyn EmbeddingClient>,
    cache: Arc<dyn EmbeddingCache>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingClient>, cache: Arc<dyn EmbeddingCache>) -> Self {
        Self {
            inner,
            cache,
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    /// Texts answered from the cache so far.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    /// Distinct texts sent to the provider so far.
    pub fn misses(&self) -> usize {
        self.misses.load(Ordering::Relaxed)
    }

    async fn lookup(&self, keys: &[String]) -> HashMap<String, Vec<f32>> {
        let dims = self.inner.dims();
        match self.cache.get_many(self.inner.model_name(), keys).await {
            Ok(mut found) => {
                // A vector cached under a different dimension setting is stale.
                found.retain(|_, v| dims == 0 || v.len() == dims);
                found
            }
            Err(e) => {
                warn!(cache = self.cache.name(), error = %format!("{:#}", e), "embedding cache lookup failed");
                HashMap::new()
            }
        }
    }
}

#[async_trait]
impl EmbeddingClient for CachedEmbedder {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dims(&self) -> usize {
        self.inner.dims()
    }

    async fn embed(&self, texts: &[String], cancel: &CancellationToken) -> Result<Vec<Vec<f32>>> {
        let keys: Vec<String> = texts.iter().map(|t| compute_hash(t)).collect();
        let mut known = self.lookup(&keys).await;

        let mut queued: HashSet<&str> = HashSet::new();
        let mut miss_keys: Vec<String> = Vec::new();
        let mut miss_texts: Vec<String> = Vec::new();
        for (key, text) in keys.iter().zip(texts) {
            if !known.contains_key(key) && queued.insert(key.as_str()) {
                miss_keys.push(key.clone());
                miss_texts.push(text.clone());
            }
        }
        let hits = texts.len() - miss_texts.len();
        self.hits.fetch_add(hits, Ordering::Relaxed);
        self.misses.fetch_add(miss_texts.len(), Ordering::Relaxed);
        debug!(model = self.inner.model_name(), hits, misses = miss_texts.len(), "embedding cache");

        if !miss_texts.is_empty() {
            let fresh = self.inner.embed(&miss_texts, cancel).await?;
            if fresh.len() != miss_texts.len() {
                bail!(
                    "embedding provider returned {} vectors for {} inputs",
                    fresh.len(),
                    miss_texts.len()
                );
            }
            let items: Vec<(String, Vec<f32>)> = miss_keys.into_iter().zip(fresh).collect();
            if let Err(e) = self.cache.put_many(self.inner.model_name(), &items).await {
                warn!(cache = self.cache.name(), error = %format!("{:#}", e), "embedding cache write failed");
            }
            known.extend(items);
        }

        keys.iter()
            .map(|k| {
                known
                    .get(k)
                    .cloned()
                    .ok_or_else(|| anyhow!("embedding cache lost vector for {}", k))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records every batch it is asked to embed.
    #[derive(Default)]
    struct Recording {
        batches: std::sync::Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl EmbeddingClient for Recording {
        fn model_name(&self) -> &str {
            "rec"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String], _cancel: &CancellationToken) -> Result<Vec<Vec<f32>>> {
            self.batches.lock().unwrap().push(texts.to_vec());
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    struct BrokenCache;

    #[async_trait]
    impl EmbeddingCache for BrokenCache {
        fn name(&self) -> &str {
            "broken"
        }
        async fn get_many(&self, _model: &str, _hashes: &[String]) -> Result<HashMap<String, Vec<f32>>> {
            bail!("disk I/O error")
        }
        async fn put_many(&self, _model: &str, _items: &[(String, Vec<f32>)]) -> Result<()> {
            bail!("disk I/O error")
        }
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_only_unseen_texts_reach_provider() {
        let inner = Arc::new(Recording::default());
        let cached = CachedEmbedder::new(inner.clone(), Arc::new(InMemoryEmbeddingCache::new()));
        let cancel = CancellationToken::new();

        let first = cached.embed(&strings(&["a", "bb"]), &cancel).await.unwrap();
        let second = cached.embed(&strings(&["bb", "ccc", "a"]), &cancel).await.unwrap();

        assert_eq!(first, vec![vec![1.0, 1.0], vec![2.0, 1.0]]);
        assert_eq!(second, vec![vec![2.0, 1.0], vec![3.0, 1.0], vec![1.0, 1.0]]);
        let batches = inner.batches.lock().unwrap();
        assert_eq!(batches[1], strings(&["ccc"]));
        assert_eq!(cached.hits(), 2);
        assert_eq!(cached.misses(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_texts_embedded_once() {
        let inner = Arc::new(Recording::default());
        let cached = CachedEmbedder::new(inner.clone(), Arc::new(InMemoryEmbeddingCache::new()));

        let out = cached
            .embed(&strings(&["x", "x", "yy"]), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], out[1]);
        assert_eq!(inner.batches.lock().unwrap()[0], strings(&["x", "yy"]));
    }

    #[tokio::test]
    async fn test_fully_cached_batch_skips_provider() {
        let inner = Arc::new(Recording::default());
        let cache = Arc::new(InMemoryEmbeddingCache::new());
        let cached = CachedEmbedder::new(inner.clone(), cache.clone());
        let cancel = CancellationToken::new();

        cached.embed(&strings(&["same"]), &cancel).await.unwrap();
        cached.embed(&strings(&["same"]), &cancel).await.unwrap();
        assert_eq!(inner.batches.lock().unwrap().len(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_wrong_dimension_entry_is_a_miss() {
        let inner = Arc::new(Recording::default());
        let cache = Arc::new(InMemoryEmbeddingCache::new());
        cache
            .put_many("rec", &[(compute_hash("a"), vec![9.0, 9.0, 9.0])])
            .await
            .unwrap();
        let cached = CachedEmbedder::new(inner.clone(), cache);

        let out = cached
            .embed(&strings(&["a"]), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out, vec![vec![1.0, 1.0]]);
        assert_eq!(inner.batches.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_broken_cache_falls_through_to_provider() {
        let inner = Arc::new(Recording::default());
        let cached = CachedEmbedder::new(inner.clone(), Arc::new(BrokenCache));

        let out = cached
            .embed(&strings(&["a", "bb"]), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(inner.batches.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cache_is_per_model() {
        let cache = InMemoryEmbeddingCache::new();
        cache
            .put_many("m1", &[("h".to_string(), vec![1.0])])
            .await
            .unwrap();
        assert!(cache.get_many("m2", &["h".to_string()]).await.unwrap().is_empty());
        assert_eq!(cache.get_many("m1", &["h".to_string()]).await.unwrap().len(), 1);
    }
}
