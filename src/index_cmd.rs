//! `cbi index`: one indexing pass over the configured workspace.

use std::sync::Arc;

use anyhow::{bail, Result};
use tokio_util::sync::CancellationToken;

use codebase_index_core::{IndexCoordinator, IndexReport, IndexWorkspace, IndexingStatus};

use crate::config::Config;
use crate::embedding;
use crate::enumerate::FilesystemEnumerator;
use crate::progress::{self, ProgressMode};
use crate::sqlite_store;

pub async fn run_index(config: &Config, dry_run: bool, progress_mode: ProgressMode) -> Result<()> {
    if !dry_run && !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let scope = config.workspace.scope.as_str();
    let enumerator = Arc::new(FilesystemEnumerator::from_config(&config.workspace)?);
    let provider = embedding::create_provider(&config.embedding)?;
    let (store, pool) = sqlite_store::open_tiered(config).await?;
    let (embedder, cache) = embedding::cache::with_cache(&config.embedding, provider, pool.as_ref());
    let workspace = IndexWorkspace::new(enumerator, embedder, store, config.index_options());

    if dry_run {
        let plan = workspace.plan(scope, &CancellationToken::new()).await?;
        println!("index {} (dry-run)", scope);
        println!("  files seen: {}", plan.files_seen);
        println!("  needs indexing: {}", plan.needs_indexing);
        println!("  unchanged: {}", plan.unchanged);
        println!("  stale: {}", plan.stale);
        println!("  chunks: {}", plan.chunks);
        println!("  batches: {}", plan.batches);
        println!("  estimated tokens: {}", plan.tokens);
        if let Some(pool) = pool {
            pool.close().await;
        }
        return Ok(());
    }

    let coordinator = IndexCoordinator::new();
    let session = coordinator.begin(scope)?;

    let cancel = session.cancel_token().clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted: finishing the current batch, then stopping.");
            cancel.cancel();
        }
    });
    let watcher = progress::follow(
        progress_mode.reporter(),
        scope.to_string(),
        session.tracker().subscribe(),
    );

    let report = workspace.run(&session).await;

    progress::finish(watcher, scope).await;
    interrupt.abort();
    drop(session);
    if let Some(pool) = pool {
        pool.close().await;
    }

    print_report(&report);
    if let Some(cache) = cache {
        println!("  embedding cache: {} hits, {} embedded", cache.hits(), cache.misses());
    }
    if report.status == IndexingStatus::Error {
        bail!(
            "indexing failed: {}",
            report.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn print_report(report: &IndexReport) {
    let status = match report.status {
        IndexingStatus::Idle => "cancelled",
        other => other.as_str(),
    };
    println!("index {}", report.scope);
    println!("  files seen: {}", report.files_seen);
    println!("  indexed: {}", report.indexed);
    println!("  unchanged: {}", report.unchanged);
    println!("  removed: {}", report.removed);
    println!("  batches: {}", report.batches);
    if report.fallback_writes > 0 {
        println!("  in-memory fallback entries: {}", report.fallback_writes);
    }
    println!("  status: {}", status);
}
