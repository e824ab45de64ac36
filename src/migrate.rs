use anyhow::Result;
use sqlx::SqlitePool;

/// Create the index schema. Safe to run repeatedly.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_entries (
            scope TEXT NOT NULL,
            relative_path TEXT NOT NULL,
            source_path TEXT NOT NULL,
            absolute_path TEXT NOT NULL,
            content TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            embedding BLOB NOT NULL,
            dims INTEGER NOT NULL,
            file_type TEXT NOT NULL,
            last_modified INTEGER NOT NULL,
            part_number INTEGER NOT NULL,
            total_parts INTEGER NOT NULL,
            indexed_at INTEGER NOT NULL,
            PRIMARY KEY (scope, relative_path)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_index_entries_source ON index_entries(scope, source_path)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embedding_cache (
            model TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            embedding BLOB NOT NULL,
            dims INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (model, content_hash)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
