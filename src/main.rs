//! # codebase-index CLI (`cbi`)
//!
//! ## Usage
//!
//! ```bash
//! cbi --config ./config/cbi.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cbi init` | Create the SQLite database and schema |
//! | `cbi index` | Embed new and changed files, remove deleted ones |
//! | `cbi search "<query>"` | Rank indexed files by semantic similarity |
//! | `cbi status` | Per-scope file and entry counts |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG`
//! (e.g. `RUST_LOG=codebase_index_core=debug`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use codebase_index::progress::ProgressMode;
use codebase_index::{config, db, index_cmd, migrate, search, status};

/// Incremental embedding index and semantic search for source trees.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "cbi",
    about = "Incremental embedding index and semantic search for source trees",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/cbi.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// This command is idempotent; running it multiple times is safe.
    Init,

    /// Index the configured workspace.
    ///
    /// Only files whose content changed since the last run are embedded;
    /// files that disappeared are removed. Ctrl-C stops after the current
    /// batch and keeps everything committed so far.
    Index {
        /// Show what would be indexed without embedding or deleting anything.
        #[arg(long)]
        dry_run: bool,

        /// Progress output on stderr. Defaults to `human` on a terminal, else `off`.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Search the index.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show what is stored in the durable index.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let Some(pool) = db::connect(&cfg).await? else {
                anyhow::bail!("No [db] section in config; nothing to initialize.");
            };
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Index { dry_run, progress } => {
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            index_cmd::run_index(&cfg, dry_run, mode).await?;
        }
        Commands::Search { query, limit } => {
            search::run_search(&cfg, &query, limit).await?;
        }
        Commands::Status => {
            status::run_status(&cfg).await?;
        }
    }

    Ok(())
}
