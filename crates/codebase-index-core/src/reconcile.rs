//! Stale entry reconciliation.
//!
//! After the diff phase, any stored source path that the enumerator no
//! longer reports is stale and gets deleted. Deletion touches only stale
//! keys, which are disjoint from the keys the embedding phase writes, so
//! the two may run in either order.

use std::collections::HashSet;

use tracing::{info, warn};

use crate::models::HashSnapshot;
use crate::store::Storage;

/// `stored − current`, sorted for deterministic deletes and logs.
pub fn find_stale(existing: &HashSnapshot, current: &HashSet<String>) -> Vec<String> {
    let mut stale: Vec<String> = existing
        .keys()
        .filter(|path| !current.contains(*path))
        .cloned()
        .collect();
    stale.sort();
    stale
}

/// Delete stale paths from `store`. Failures are logged and reported as
/// zero removals; they never fail the run.
pub async fn remove_stale(store: &dyn Storage, scope: &str, stale: &[String]) -> usize {
    if stale.is_empty() {
        return 0;
    }
    match store.delete(scope, stale).await {
        Ok(removed) => {
            info!(scope, paths = stale.len(), removed, "removed stale entries");
            removed
        }
        Err(e) => {
            warn!(scope, paths = stale.len(), error = %format!("{:#}", e), "stale entry removal failed");
            0
        }
    }
}
