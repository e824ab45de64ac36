//! `IndexWorkspace`: the indexing orchestrator.
//!
//! One run for a scope:
//!
//! 1. List current files through the [`PathEnumerator`].
//! 2. Read the stored [`HashSnapshot`](crate::models::HashSnapshot) once and
//!    diff it against the listing.
//! 3. Check cancellation (end of the read phase).
//! 4. Delete stale source paths.
//! 5. Chunk changed files, pack the chunks into token-bounded batches.
//! 6. Embed and commit batch by batch ([`pipeline::run_batches`]).
//! 7. Finalize the session state: `complete`, `error`, or `idle` when
//!    cancelled.
//!
//! Errors never escape [`IndexWorkspace::run`]; they end up in the session
//! state and in the returned [`IndexReport`].

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::batch::{pack_batches, Batch, BatchLimits};
use crate::chunk::{chunk_file, estimate_tokens};
use crate::embedding::EmbeddingClient;
use crate::hash::{diff_files, ChangeSet};
use crate::models::{Chunk, HashSnapshot, IndexingStatus, SourceFile};
use crate::pipeline::{run_batches, PipelineOutcome};
use crate::reconcile::remove_stale;
use crate::state::IndexingSession;
use crate::store::{Storage, TieredStore};

/// Supplies the current set of indexable files for a workspace.
#[async_trait]
pub trait PathEnumerator: Send + Sync {
    /// List every indexable file. Implementations should stop early and
    /// return what they have (or an error) once `cancel` fires.
    async fn list(&self, cancel: &CancellationToken) -> Result<Vec<SourceFile>>;
}

/// Chunking and batching ceilings for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexOptions {
    pub max_chunk_tokens: usize,
    pub max_batch_tokens: usize,
    pub max_batch_items: usize,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            max_chunk_tokens: 6000,
            max_batch_tokens: 8000,
            max_batch_items: 64,
        }
    }
}

/// Summary of one indexing run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub scope: String,
    pub status: IndexingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub files_seen: usize,
    /// Files that needed (re)indexing.
    pub changed: usize,
    /// Changed files fully committed during this run.
    pub indexed: usize,
    pub unchanged: usize,
    pub removed: usize,
    pub chunks: usize,
    pub batches: usize,
    pub durable_writes: usize,
    pub fallback_writes: usize,
}

impl IndexReport {
    fn new(scope: &str) -> Self {
        Self {
            scope: scope.to_string(),
            status: IndexingStatus::InProgress,
            error: None,
            files_seen: 0,
            changed: 0,
            indexed: 0,
            unchanged: 0,
            removed: 0,
            chunks: 0,
            batches: 0,
            durable_writes: 0,
            fallback_writes: 0,
        }
    }
}

/// What a run would do, computed without embedding or deleting anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexPlan {
    pub files_seen: usize,
    pub needs_indexing: usize,
    pub unchanged: usize,
    pub stale: usize,
    pub chunks: usize,
    pub batches: usize,
    pub tokens: usize,
}

struct Prepared {
    files_seen: usize,
    changes: ChangeSet,
}

/// Orchestrates enumerate → diff → reconcile → chunk → batch → embed.
pub struct IndexWorkspace {
    enumerator: Arc<dyn PathEnumerator>,
    embedder: Arc<dyn EmbeddingClient>,
    store: Arc<TieredStore>,
    options: IndexOptions,
}

impl IndexWorkspace {
    pub fn new(
        enumerator: Arc<dyn PathEnumerator>,
        embedder: Arc<dyn EmbeddingClient>,
        store: Arc<TieredStore>,
        options: IndexOptions,
    ) -> Self {
        Self {
            enumerator,
            embedder,
            store,
            options,
        }
    }

    pub fn store(&self) -> &Arc<TieredStore> {
        &self.store
    }

    /// Dry run: enumerate and diff, then report chunk and batch counts.
    pub async fn plan(&self, scope: &str, cancel: &CancellationToken) -> Result<IndexPlan> {
        let prepared = self.prepare(scope, cancel).await?;
        let batches = self.batch(&prepared.changes);
        Ok(IndexPlan {
            files_seen: prepared.files_seen,
            needs_indexing: prepared.changes.needs_indexing.len(),
            unchanged: prepared.changes.unchanged.len(),
            stale: prepared.changes.stale.len(),
            chunks: batches.iter().map(Batch::len).sum(),
            batches: batches.len(),
            tokens: batches.iter().map(|b| b.tokens).sum(),
        })
    }

    /// Run one indexing pass for `session`'s scope.
    pub async fn run(&self, session: &IndexingSession) -> IndexReport {
        let scope = session.scope();
        let tracker = session.tracker();
        let cancel = session.cancel_token();
        let mut report = IndexReport::new(scope);

        if !tracker.start() {
            warn!(scope, "previous run never finished, resetting state");
            tracker.cancelled();
            tracker.start();
        }
        info!(scope, session = %session.id(), "indexing started");

        let prepared = match self.prepare(scope, cancel).await {
            Ok(p) => p,
            Err(e) => {
                let message = format!("{:#}", e);
                warn!(scope, error = %message, "indexing failed before embedding");
                tracker.fail(message.clone());
                report.status = IndexingStatus::Error;
                report.error = Some(message);
                return report;
            }
        };
        report.files_seen = prepared.files_seen;
        report.changed = prepared.changes.needs_indexing.len();
        report.unchanged = prepared.changes.unchanged.len();
        tracker.set_total(report.changed);

        if cancel.is_cancelled() {
            info!(scope, "cancelled after read phase");
            tracker.cancelled();
            report.status = IndexingStatus::Idle;
            return report;
        }

        report.removed =
            remove_stale(self.store.as_ref() as &dyn Storage, scope, &prepared.changes.stale)
                .await;

        let batches = self.batch(&prepared.changes);
        info!(
            scope,
            files = report.files_seen,
            changed = report.changed,
            unchanged = report.unchanged,
            stale = prepared.changes.stale.len(),
            batches = batches.len(),
            "diff complete"
        );

        let outcome = run_batches(self.embedder.as_ref(), &self.store, batches, session).await;
        report.indexed = outcome.files;
        report.chunks = outcome.chunks;
        report.batches = outcome.batches;
        report.durable_writes = outcome.durable_writes;
        report.fallback_writes = outcome.fallback_writes;

        match outcome.outcome {
            PipelineOutcome::Completed => {
                tracker.complete();
                report.status = IndexingStatus::Complete;
            }
            PipelineOutcome::Cancelled => {
                tracker.cancelled();
                report.status = IndexingStatus::Idle;
            }
            PipelineOutcome::Failed(e) => {
                let message = e.to_string();
                tracker.fail(message.clone());
                report.status = IndexingStatus::Error;
                report.error = Some(message);
            }
        }

        info!(
            scope,
            status = report.status.as_str(),
            indexed = report.indexed,
            removed = report.removed,
            batches = report.batches,
            "indexing finished"
        );
        report
    }

    /// Enumerate and diff. The hash snapshot is read once per call.
    async fn prepare(&self, scope: &str, cancel: &CancellationToken) -> Result<Prepared> {
        let files = self
            .enumerator
            .list(cancel)
            .await
            .context("listing workspace files")?;
        let files_seen = files.len();

        let existing = match self.store.get_hashes(scope).await {
            Ok(h) => h,
            Err(e) => {
                warn!(scope, error = %format!("{:#}", e), "hash snapshot unavailable, treating every file as new");
                HashSnapshot::new()
            }
        };

        Ok(Prepared {
            files_seen,
            changes: diff_files(&existing, files),
        })
    }

    fn batch(&self, changes: &ChangeSet) -> Vec<Batch<Chunk>> {
        let chunks: Vec<Chunk> = changes
            .needs_indexing
            .iter()
            .flat_map(|(file, hash)| chunk_file(file, hash, self.options.max_chunk_tokens))
            .collect();
        pack_batches(
            chunks,
            BatchLimits::new(self.options.max_batch_tokens, self.options.max_batch_items),
            |c| estimate_tokens(&c.content),
        )
    }
}
