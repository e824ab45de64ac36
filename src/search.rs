//! `cbi search`: semantic search over the stored index.

use anyhow::{bail, Result};

use codebase_index_core::{SearchEngine, SearchHit};

use crate::config::Config;
use crate::embedding;
use crate::sqlite_store;

pub async fn run_search(config: &Config, query: &str, limit: Option<usize>) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    if !config.embedding.is_enabled() {
        bail!("Search requires embeddings. Set [embedding] provider in config.");
    }

    let embedder = embedding::create_provider(&config.embedding)?;
    let (store, pool) = sqlite_store::open_tiered(config).await?;
    let engine = SearchEngine::new(embedder, store);
    let final_limit = limit.unwrap_or(config.retrieval.final_limit);

    let hits = engine
        .search(query, final_limit, Some(&config.workspace.scope))
        .await?;

    if hits.is_empty() {
        println!("No results.");
    } else {
        print_hits(&hits);
    }

    if let Some(pool) = pool {
        pool.close().await;
    }
    Ok(())
}

fn print_hits(hits: &[SearchHit]) {
    for (i, hit) in hits.iter().enumerate() {
        println!("{}. [{:.2}] {}", i + 1, hit.score, hit.relative_path);
        println!("    type: {}", hit.file_type);
        println!("    path: {}", hit.absolute_path);
        println!("    excerpt: \"{}\"", hit.snippet.replace('\n', " ").trim());
        println!();
    }
}
