//! Indexing progress reporting.
//!
//! Follows a run's [`IndexingState`] through the `watch` channel published
//! by its [`StateTracker`](codebase_index_core::StateTracker) so users see
//! how many files are done and when the run ends. Progress is emitted on
//! **stderr** so stdout remains parseable for scripts.

use std::io::Write;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

use codebase_index_core::{IndexingState, IndexingStatus};

/// Reports indexing progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, scope: &str, state: &IndexingState);
}

/// Human-friendly progress on stderr: "index default  in_progress  1,234 / 5,000 files".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, scope: &str, state: &IndexingState) {
        let mut line = format!(
            "index {}  {}  {} / {} files",
            scope,
            state.status.as_str(),
            format_number(state.progress.files_indexed as u64),
            format_number(state.progress.total_files as u64)
        );
        if let Some(err) = &state.error {
            line.push_str(&format!("  ({})", err));
        }
        line.push('\n');
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, scope: &str, state: &IndexingState) {
        let obj = serde_json::json!({
            "event": "progress",
            "scope": scope,
            "status": state.status,
            "files_indexed": state.progress.files_indexed,
            "total_files": state.progress.total_files,
            "error": state.error,
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _scope: &str, _state: &IndexingState) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

/// Report every state change on `rx` until the run leaves `in_progress`.
pub fn follow(
    reporter: Box<dyn ProgressReporter>,
    scope: String,
    mut rx: watch::Receiver<IndexingState>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let state = rx.borrow_and_update().clone();
            reporter.report(&scope, &state);
            if state.status != IndexingStatus::InProgress {
                break;
            }
        }
    })
}

/// Wait for a [`follow`] task. A reporter that panicked or was aborted is
/// logged and otherwise ignored; returns whether it finished cleanly.
pub async fn finish(handle: JoinHandle<()>, scope: &str) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(e) => {
            warn!(scope, error = %e, "progress reporter stopped abnormally");
            false
        }
    }
}
