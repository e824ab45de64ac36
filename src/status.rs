//! Index statistics.
//!
//! Per-scope counts of source files, stored entries, and embedding
//! dimensions in the durable store. Used by `cbi status` to confirm that
//! indexing runs are landing where expected.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::migrate;

/// Per-scope breakdown of the `index_entries` table.
#[derive(Debug, PartialEq, Eq)]
pub struct ScopeStats {
    pub scope: String,
    pub files: i64,
    pub entries: i64,
    pub dims: Option<i64>,
    pub last_indexed: Option<i64>,
}

pub async fn scope_stats(pool: &SqlitePool) -> Result<Vec<ScopeStats>> {
    let rows = sqlx::query(
        r#"
        SELECT
            scope,
            COUNT(DISTINCT source_path) AS files,
            COUNT(*) AS entries,
            MAX(dims) AS dims,
            MAX(indexed_at) AS last_indexed
        FROM index_entries
        GROUP BY scope
        ORDER BY scope
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| ScopeStats {
            scope: row.get("scope"),
            files: row.get("files"),
            entries: row.get("entries"),
            dims: row.get("dims"),
            last_indexed: row.get("last_indexed"),
        })
        .collect())
}

/// Run the status command: query the database and print a summary.
pub async fn run_status(config: &Config) -> Result<()> {
    let Some(db_config) = &config.db else {
        println!("No [db] configured: the index lives in memory for the duration of one run.");
        return Ok(());
    };

    let pool = db::connect_path(&db_config.path).await?;
    migrate::run_migrations(&pool).await?;
    let stats = scope_stats(&pool).await?;

    let db_size = std::fs::metadata(&db_config.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("codebase-index status");
    println!("=====================");
    println!();
    println!("  Database:    {}", db_config.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Scope:       {}", config.workspace.scope);

    if stats.is_empty() {
        println!();
        println!("  Nothing indexed yet.");
    } else {
        println!();
        println!(
            "  {:<24} {:>8} {:>8} {:>6}   {}",
            "SCOPE", "FILES", "ENTRIES", "DIMS", "LAST INDEXED"
        );
        println!("  {}", "-".repeat(72));
        for s in &stats {
            let dims = s.dims.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string());
            let indexed = s
                .last_indexed
                .map(format_ts_iso)
                .unwrap_or_else(|| "never".to_string());
            println!(
                "  {:<24} {:>8} {:>8} {:>6}   {}",
                s.scope, s.files, s.entries, dims, indexed
            );
        }
    }
    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
