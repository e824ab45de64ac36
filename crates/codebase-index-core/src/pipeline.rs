//! Sequential embedding loop with streaming commits.
//!
//! Batches run one after another. Before each batch the session's
//! cancellation token is checked; the same token is handed to the
//! embedding client so an in-flight request is aborted too. Each batch is
//! committed to the [`TieredStore`] as soon as its vectors arrive, and the
//! run's progress counter moves after the commit.
//!
//! A failing batch stops the loop (fail-fast). Entries committed by the
//! batches before it stay in the store.

use tracing::{info, warn};

use crate::batch::Batch;
use crate::embedding::{embed_checked, EmbedError, EmbeddingClient};
use crate::models::{Chunk, IndexEntry};
use crate::state::IndexingSession;
use crate::store::TieredStore;

/// How the loop ended.
#[derive(Debug)]
pub enum PipelineOutcome {
    Completed,
    Cancelled,
    Failed(EmbedError),
}

/// Counters for one pass over the batches.
#[derive(Debug)]
pub struct PipelineReport {
    pub outcome: PipelineOutcome,
    /// Batches embedded and committed.
    pub batches: usize,
    pub chunks: usize,
    /// Source files whose last part was committed.
    pub files: usize,
    pub durable_writes: usize,
    pub fallback_writes: usize,
}

impl PipelineReport {
    fn new() -> Self {
        Self {
            outcome: PipelineOutcome::Completed,
            batches: 0,
            chunks: 0,
            files: 0,
            durable_writes: 0,
            fallback_writes: 0,
        }
    }
}

/// Embed and commit `batches` in order for `session`'s scope.
pub async fn run_batches(
    embedder: &dyn EmbeddingClient,
    store: &TieredStore,
    batches: Vec<Batch<Chunk>>,
    session: &IndexingSession,
) -> PipelineReport {
    let scope = session.scope();
    let cancel = session.cancel_token();
    let total = batches.len();
    let mut report = PipelineReport::new();

    for (i, batch) in batches.into_iter().enumerate() {
        if cancel.is_cancelled() {
            info!(scope, batch = i + 1, of = total, "cancellation requested, stopping before batch");
            report.outcome = PipelineOutcome::Cancelled;
            return report;
        }

        let texts: Vec<String> = batch.items.iter().map(|c| c.content.clone()).collect();
        let vectors = match embed_checked(embedder, &texts, cancel).await {
            Ok(v) => v,
            Err(EmbedError::Cancelled) => {
                info!(scope, batch = i + 1, of = total, "embedding request aborted by cancellation");
                report.outcome = PipelineOutcome::Cancelled;
                return report;
            }
            Err(e) => {
                warn!(scope, batch = i + 1, of = total, texts = texts.len(), error = %e, "embedding batch failed");
                report.outcome = PipelineOutcome::Failed(e);
                return report;
            }
        };

        let entries: Vec<IndexEntry> = batch
            .items
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry::from_chunk(chunk, vector))
            .collect();
        let written = store.upsert_tiered(scope, &entries).await;

        let files_done = batch
            .items
            .iter()
            .filter(|c| c.part_number == c.total_parts)
            .count();
        session.tracker().add_indexed(files_done);

        report.batches += 1;
        report.chunks += entries.len();
        report.files += files_done;
        report.durable_writes += written.durable;
        report.fallback_writes += written.fallback;

        info!(
            scope,
            batch = i + 1,
            of = total,
            texts = entries.len(),
            tokens = batch.tokens,
            durable = written.durable,
            fallback = written.fallback,
            "embedding batch committed"
        );
    }

    report
}
