//! Content hashing and change detection.
//!
//! A file needs (re)indexing when its content hash differs from the hash
//! recorded in the previous run's [`HashSnapshot`]. Diffing is a single map
//! lookup per file; stale paths are the snapshot keys no longer enumerated.

use sha2::{Digest, Sha256};
use std::collections::HashSet;

use crate::models::{HashSnapshot, SourceFile};

/// SHA-256 of the exact content bytes, lower-case hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Result of diffing the current file set against stored hashes.
#[derive(Debug, Default)]
pub struct ChangeSet {
    /// Files whose hash is missing or different, paired with the new hash.
    pub needs_indexing: Vec<(SourceFile, String)>,
    /// Paths whose stored hash matches.
    pub unchanged: Vec<String>,
    /// Stored paths absent from the current enumeration, sorted.
    pub stale: Vec<String>,
}

/// Partition `files` into changed and unchanged, and collect stale paths.
pub fn diff_files(existing: &HashSnapshot, files: Vec<SourceFile>) -> ChangeSet {
    let mut changes = ChangeSet::default();
    let mut current: HashSet<String> = HashSet::with_capacity(files.len());

    for file in files {
        let hash = compute_hash(&file.content);
        current.insert(file.relative_path.clone());
        match existing.get(&file.relative_path) {
            Some(stored) if *stored == hash => changes.unchanged.push(file.relative_path),
            _ => changes.needs_indexing.push((file, hash)),
        }
    }

    changes.stale = crate::reconcile::find_stale(existing, &current);
    changes
}
