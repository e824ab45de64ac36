//! Filesystem [`PathEnumerator`].
//!
//! Walks `workspace.root` with `walkdir`, keeps files matching the include
//! globs and none of the exclude globs (`.git/`, `target/` and
//! `node_modules/` are always excluded), then reads their contents with a
//! bounded number of concurrent reads. Files that are too large, not UTF-8,
//! or blank are skipped, as are files removed while the walk is running.
//! Any other I/O error fails the listing: a file that exists but could not
//! be read must not look deleted to the reconciler. Output is sorted by
//! relative path.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use globset::{Glob, GlobSet, GlobSetBuilder};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use walkdir::WalkDir;

use codebase_index_core::{PathEnumerator, SourceFile};

use crate::config::WorkspaceConfig;

const DEFAULT_EXCLUDES: [&str; 3] = ["**/.git/**", "**/target/**", "**/node_modules/**"];

pub struct FilesystemEnumerator {
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
    follow_symlinks: bool,
    read_concurrency: usize,
    max_file_bytes: u64,
}

impl FilesystemEnumerator {
    pub fn from_config(config: &WorkspaceConfig) -> Result<Self> {
        let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
        excludes.extend(config.exclude_globs.iter().cloned());

        Ok(Self {
            root: config.root.clone(),
            include: build_globset(&config.include_globs)?,
            exclude: build_globset(&excludes)?,
            follow_symlinks: config.follow_symlinks,
            read_concurrency: config.read_concurrency.max(1),
            max_file_bytes: config.max_file_bytes,
        })
    }

    /// Matching `(absolute path, relative path)` pairs, unsorted.
    fn walk(&self) -> Result<Vec<(PathBuf, String)>> {
        let root = std::fs::canonicalize(&self.root)
            .with_context(|| format!("Workspace root does not exist: {}", self.root.display()))?;
        if !root.is_dir() {
            anyhow::bail!("Workspace root is not a directory: {}", root.display());
        }

        let mut found = Vec::new();
        for entry in WalkDir::new(&root).follow_links(self.follow_symlinks) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) if is_vanished(e.io_error()) => {
                    debug!(error = %e, "skipping missing path");
                    continue;
                }
                Err(e) => {
                    let path = e
                        .path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| root.display().to_string());
                    return Err(e).with_context(|| format!("Failed to walk {}", path));
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(&root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().replace('\\', "/");

            if self.exclude.is_match(&rel_str) || !self.include.is_match(&rel_str) {
                continue;
            }
            found.push((path.to_path_buf(), rel_str));
        }
        Ok(found)
    }
}

#[async_trait]
impl PathEnumerator for FilesystemEnumerator {
    async fn list(&self, cancel: &CancellationToken) -> Result<Vec<SourceFile>> {
        let candidates = self.walk()?;
        let max_bytes = self.max_file_bytes;

        let results: Vec<Result<Option<SourceFile>>> = stream::iter(candidates)
            .map(|(path, rel)| async move { read_source_file(&path, rel, max_bytes).await })
            .buffer_unordered(self.read_concurrency)
            .take_until(cancel.cancelled())
            .collect()
            .await;

        let mut files = Vec::with_capacity(results.len());
        for result in results {
            if let Some(file) = result? {
                files.push(file);
            }
        }

        // Sort for deterministic ordering
        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        debug!(root = %self.root.display(), files = files.len(), "workspace listed");
        Ok(files)
    }
}

async fn read_source_file(
    path: &Path,
    relative_path: String,
    max_bytes: u64,
) -> Result<Option<SourceFile>> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(m) => m,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %relative_path, "skipping file: removed during walk");
            return Ok(None);
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to stat {}", path.display()));
        }
    };
    if metadata.len() > max_bytes {
        debug!(path = %relative_path, bytes = metadata.len(), "skipping file: too large");
        return Ok(None);
    }

    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %relative_path, "skipping file: removed during walk");
            return Ok(None);
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", path.display()));
        }
    };
    let content = match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(_) => {
            debug!(path = %relative_path, "skipping file: not UTF-8");
            return Ok(None);
        }
    };
    if content.trim().is_empty() {
        debug!(path = %relative_path, "skipping file: blank");
        return Ok(None);
    }

    let last_modified = metadata
        .modified()
        .unwrap_or(SystemTime::UNIX_EPOCH)
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;

    Ok(Some(SourceFile {
        file_type: file_type(path),
        absolute_path: path.display().to_string(),
        relative_path,
        content,
        last_modified,
    }))
}

fn is_vanished(err: Option<&std::io::Error>) -> bool {
    err.is_some_and(|e| e.kind() == ErrorKind::NotFound)
}

/// Lower-cased extension, or `"text"` when there is none.
fn file_type(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_else(|| "text".to_string())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}
