//! Configuration parsing and validation.
//!
//! `cbi` is configured by a single TOML file (default `./config/cbi.toml`).
//! Every section except `[workspace]` is optional and falls back to
//! defaults. Without a `[db]` section the index lives in the in-memory tier
//! only and is lost when the process exits.
//!
//! ```toml
//! [db]
//! path = "./data/index.sqlite"
//!
//! [workspace]
//! root = "."
//! scope = "default"
//! include_globs = ["**/*"]
//! exclude_globs = ["**/*.lock"]
//!
//! [embedding]
//! provider = "ollama"
//! model = "nomic-embed-text"
//! dims = 768
//! url = "http://localhost:11434"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use codebase_index_core::IndexOptions;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub db: Option<DbConfig>,
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkspaceConfig {
    pub root: PathBuf,
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default = "default_read_concurrency")]
    pub read_concurrency: usize,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

fn default_scope() -> String {
    "default".to_string()
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*".to_string()]
}
fn default_read_concurrency() -> usize {
    20
}
fn default_max_file_bytes() -> u64 {
    1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    6000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_batch_tokens")]
    pub max_batch_tokens: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Reuse vectors for chunk text that was embedded before.
    #[serde(default = "default_cache")]
    pub cache: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            max_batch_tokens: default_max_batch_tokens(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            cache: default_cache(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_batch_tokens() -> usize {
    8000
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_cache() -> bool {
    true
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_upsert_batch_size")]
    pub upsert_batch_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            upsert_batch_size: default_upsert_batch_size(),
        }
    }
}

fn default_upsert_batch_size() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_final_limit")]
    pub final_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            final_limit: default_final_limit(),
        }
    }
}

fn default_final_limit() -> usize {
    10
}

impl Config {
    /// Chunking and batching ceilings for the indexing orchestrator.
    pub fn index_options(&self) -> IndexOptions {
        IndexOptions {
            max_chunk_tokens: self.chunking.max_tokens,
            max_batch_tokens: self.embedding.max_batch_tokens,
            max_batch_items: self.embedding.batch_size,
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = parse_config(&content).context("Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn parse_config(content: &str) -> Result<Config> {
    Ok(toml::from_str(content)?)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }

    if config.workspace.scope.trim().is_empty() {
        anyhow::bail!("workspace.scope must not be empty");
    }
    if config.workspace.read_concurrency == 0 {
        anyhow::bail!("workspace.read_concurrency must be > 0");
    }

    if config.retrieval.final_limit < 1 {
        anyhow::bail!("retrieval.final_limit must be >= 1");
    }

    if config.embedding.max_batch_tokens == 0 {
        anyhow::bail!("embedding.max_batch_tokens must be > 0");
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    Ok(())
}
