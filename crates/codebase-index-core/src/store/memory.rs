//! In-memory [`Storage`] implementation: the fallback tier.
//!
//! Entries live in a `BTreeMap` per scope behind `std::sync::RwLock`, so
//! enumeration order (and therefore search tie-breaking) is deterministic.
//! Vector search is brute-force cosine similarity over all stored vectors.
//!
//! Batch commits from the indexing pipeline are sequential, so the lock is
//! never contended by concurrent writers of the same run.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{HashSnapshot, IndexEntry};
use crate::search::{rank_entries, SearchHit};

use super::{snapshot_hashes, Storage};

type ScopeEntries = BTreeMap<String, IndexEntry>;

/// Process-local store keyed by scope, then by `relative_path`.
#[derive(Default)]
pub struct InMemoryStore {
    scopes: RwLock<HashMap<String, ScopeEntries>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, ScopeEntries>> {
        self.scopes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, ScopeEntries>> {
        self.scopes.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert entries, applying part-1 replacement of a source's older parts.
    pub fn insert(&self, scope: &str, entries: &[IndexEntry]) {
        let mut scopes = self.write();
        let stored = scopes.entry(scope.to_string()).or_default();
        for entry in entries {
            if entry.part_number == 1 {
                stored.retain(|_, e| e.source_path != entry.source_path);
            }
            stored.insert(entry.relative_path.clone(), entry.clone());
        }
    }

    /// Drop whatever these entries would replace. Used by [`TieredStore`]
    /// once the durable tier has accepted them.
    ///
    /// [`TieredStore`]: super::TieredStore
    pub fn discard(&self, scope: &str, entries: &[IndexEntry]) {
        let mut scopes = self.write();
        if let Some(stored) = scopes.get_mut(scope) {
            for entry in entries {
                if entry.part_number == 1 {
                    stored.retain(|_, e| e.source_path != entry.source_path);
                } else {
                    stored.remove(&entry.relative_path);
                }
            }
        }
    }

    /// Remove all entries of the given source paths.
    pub fn remove_sources(&self, scope: &str, source_paths: &[String]) -> usize {
        let mut scopes = self.write();
        let Some(stored) = scopes.get_mut(scope) else {
            return 0;
        };
        let before = stored.len();
        stored.retain(|_, e| !source_paths.contains(&e.source_path));
        before - stored.len()
    }

    /// Clone of every entry in `scope`, in key order.
    pub fn entries(&self, scope: &str) -> Vec<IndexEntry> {
        self.read()
            .get(scope)
            .map(|s| s.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of entries held for `scope`.
    pub fn len(&self, scope: &str) -> usize {
        self.read().get(scope).map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, scope: &str) -> bool {
        self.len(scope) == 0
    }

    /// Hash snapshot for `scope`.
    pub fn hashes(&self, scope: &str) -> HashSnapshot {
        let scopes = self.read();
        match scopes.get(scope) {
            Some(stored) => snapshot_hashes(stored.values().map(|e| {
                (e.source_path.clone(), e.content_hash.clone(), e.total_parts)
            })),
            None => HashSnapshot::new(),
        }
    }

    /// Brute-force rank one scope, or every scope when `scope` is `None`.
    pub fn rank(&self, scope: Option<&str>, query_vec: &[f32], limit: usize) -> Vec<SearchHit> {
        let scopes = self.read();
        match scope {
            Some(s) => match scopes.get(s) {
                Some(stored) => rank_entries(query_vec, stored.values(), limit),
                None => Vec::new(),
            },
            None => {
                let mut names: Vec<&String> = scopes.keys().collect();
                names.sort();
                let all = names.into_iter().flat_map(|n| scopes[n].values());
                rank_entries(query_vec, all, limit)
            }
        }
    }
}

#[async_trait]
impl Storage for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get_hashes(&self, scope: &str) -> Result<HashSnapshot> {
        Ok(self.hashes(scope))
    }

    async fn upsert(&self, scope: &str, entries: &[IndexEntry]) -> Result<()> {
        self.insert(scope, entries);
        Ok(())
    }

    async fn delete(&self, scope: &str, source_paths: &[String]) -> Result<usize> {
        Ok(self.remove_sources(scope, source_paths))
    }

    async fn search_vectors(
        &self,
        scope: &str,
        query_vec: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        Ok(self.rank(Some(scope), query_vec, limit))
    }
}
