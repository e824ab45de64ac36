//! Storage abstraction for the embedding index.
//!
//! The [`Storage`] trait is implemented by the durable repository (SQLite,
//! in the app crate) and by [`InMemoryStore`]. [`TieredStore`] composes the
//! two: it tries the durable tier first and falls back to memory when the
//! durable tier is absent or failing. That is the single place where the
//! durable-vs-fallback decision is made.
//!
//! # Entry replacement
//!
//! Upserting an entry with `part_number == 1` replaces every stored entry
//! with the same `source_path`, so a file that shrinks from four parts to
//! two leaves no orphaned parts behind.
//!
//! # Hash snapshots
//!
//! [`Storage::get_hashes`] reports every stored source file. A file whose
//! entries are incomplete (missing parts, or parts from different
//! versions) is reported with [`INCOMPLETE_HASH`], which never equals a
//! real content hash: it is re-indexed while it exists and removed as
//! stale once it is gone.

pub mod memory;
pub mod tiered;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

use crate::models::{HashSnapshot, IndexEntry};
use crate::search::SearchHit;

pub use memory::InMemoryStore;
pub use tiered::{TieredStore, TieredWrite};

/// Abstract storage backend for index entries, partitioned by scope.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get_hashes`](Storage::get_hashes) | One-shot source path → hash snapshot |
/// | [`upsert`](Storage::upsert) | Insert or replace entries |
/// | [`delete`](Storage::delete) | Remove all entries of the given source paths |
/// | [`search_vectors`](Storage::search_vectors) | Cosine-ranked vector search |
#[async_trait]
pub trait Storage: Send + Sync {
    /// Short backend label used in logs (`"sqlite"`, `"memory"`).
    fn name(&self) -> &str;

    /// Snapshot of every stored source file's content hash.
    async fn get_hashes(&self, scope: &str) -> Result<HashSnapshot>;

    /// Insert or update entries keyed by `relative_path`.
    async fn upsert(&self, scope: &str, entries: &[IndexEntry]) -> Result<()>;

    /// Remove every entry cut from the given source paths. Returns the
    /// number of entries removed.
    async fn delete(&self, scope: &str, source_paths: &[String]) -> Result<usize>;

    /// Rank the scope's entries by cosine similarity to `query_vec`.
    async fn search_vectors(
        &self,
        scope: &str,
        query_vec: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>>;
}

/// Hash reported for a source file whose stored parts are incomplete.
pub const INCOMPLETE_HASH: &str = "";

/// Fold `(source_path, content_hash, total_parts)` rows into a snapshot.
/// Source files whose parts are not all present with one hash map to
/// [`INCOMPLETE_HASH`].
pub fn snapshot_hashes<I>(rows: I) -> HashSnapshot
where
    I: IntoIterator<Item = (String, String, usize)>,
{
    struct Seen {
        hash: String,
        total_parts: usize,
        count: usize,
        consistent: bool,
    }

    let mut seen: HashMap<String, Seen> = HashMap::new();
    for (source_path, hash, total_parts) in rows {
        match seen.get_mut(&source_path) {
            Some(s) => {
                s.count += 1;
                if s.hash != hash || s.total_parts != total_parts {
                    s.consistent = false;
                }
            }
            None => {
                seen.insert(
                    source_path,
                    Seen {
                        hash,
                        total_parts,
                        count: 1,
                        consistent: true,
                    },
                );
            }
        }
    }

    seen.into_iter()
        .map(|(path, s)| {
            if s.consistent && s.count == s.total_parts {
                (path, s.hash)
            } else {
                (path, INCOMPLETE_HASH.to_string())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(path: &str, hash: &str, total: usize) -> (String, String, usize) {
        (path.to_string(), hash.to_string(), total)
    }

    #[test]
    fn test_snapshot_single_part() {
        let snap = snapshot_hashes(vec![row("a.ts", "h1", 1)]);
        assert_eq!(snap.get("a.ts").map(String::as_str), Some("h1"));
    }

    #[test]
    fn test_snapshot_marks_missing_parts_incomplete() {
        let snap = snapshot_hashes(vec![
            row("big.ts", "h", 3),
            row("big.ts", "h", 3),
            row("ok.ts", "k", 2),
            row("ok.ts", "k", 2),
        ]);
        assert_eq!(snap.get("big.ts").map(String::as_str), Some(INCOMPLETE_HASH));
        assert_eq!(snap.get("ok.ts").map(String::as_str), Some("k"));
    }

    #[test]
    fn test_snapshot_marks_mixed_hashes_incomplete() {
        let snap = snapshot_hashes(vec![row("m.ts", "old", 2), row("m.ts", "new", 2)]);
        assert_eq!(snap.len(), 1);
        assert_eq!(snap["m.ts"], INCOMPLETE_HASH);
    }
}
