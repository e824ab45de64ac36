//! Indexing run state and single-flight sessions.
//!
//! ```text
//!           start                 finish
//!   idle ───────────▶ in_progress ───────▶ complete
//!    ▲                  │    │
//!    └──── cancelled ───┘    └───────────▶ error (message)
//! ```
//!
//! Only the orchestrator mutates the state; anyone holding a
//! [`StateTracker`] can read a snapshot or subscribe to changes.
//!
//! [`IndexCoordinator`] allows at most one [`IndexingSession`] per scope.
//! A session owns the run's [`CancellationToken`]; cancelling it stops new
//! batches from starting and aborts the in-flight embedding request.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::models::{IndexProgress, IndexingState, IndexingStatus};

/// Shared, observable [`IndexingState`].
#[derive(Clone)]
pub struct StateTracker {
    tx: Arc<watch::Sender<IndexingState>>,
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StateTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(IndexingState::default());
        Self { tx: Arc::new(tx) }
    }

    /// Current state.
    pub fn snapshot(&self) -> IndexingState {
        self.tx.borrow().clone()
    }

    /// Receiver that observes every subsequent change.
    pub fn subscribe(&self) -> watch::Receiver<IndexingState> {
        self.tx.subscribe()
    }

    /// `idle | complete | error → in_progress`. Returns false if a run is
    /// already in progress.
    pub fn start(&self) -> bool {
        let mut started = false;
        self.tx.send_modify(|s| {
            if s.status != IndexingStatus::InProgress {
                *s = IndexingState {
                    status: IndexingStatus::InProgress,
                    progress: IndexProgress::default(),
                    error: None,
                };
                started = true;
            }
        });
        started
    }

    /// Set the number of files this run will (re)index.
    pub fn set_total(&self, total_files: usize) {
        self.update_in_progress(|p| p.total_files = total_files);
    }

    /// Add files whose entries were all committed.
    pub fn add_indexed(&self, files: usize) {
        self.update_in_progress(|p| p.files_indexed += files);
    }

    /// `in_progress → complete`.
    pub fn complete(&self) {
        self.finish(IndexingStatus::Complete, None);
    }

    /// `in_progress → error`, with a human-readable message.
    pub fn fail(&self, message: impl Into<String>) {
        self.finish(IndexingStatus::Error, Some(message.into()));
    }

    /// `in_progress → idle`: cancellation honored. Not an error.
    pub fn cancelled(&self) {
        self.finish(IndexingStatus::Idle, None);
    }

    fn update_in_progress(&self, f: impl FnOnce(&mut IndexProgress)) {
        self.tx.send_if_modified(|s| {
            if s.status != IndexingStatus::InProgress {
                return false;
            }
            f(&mut s.progress);
            true
        });
    }

    fn finish(&self, status: IndexingStatus, error: Option<String>) {
        self.tx.send_if_modified(|s| {
            if s.status != IndexingStatus::InProgress {
                debug!(from = s.status.as_str(), to = status.as_str(), "ignored state transition");
                return false;
            }
            s.status = status;
            s.error = error;
            true
        });
    }
}

/// Raised when a second run is requested for a busy scope.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("indexing already running for scope '{scope}' (session {session})")]
    AlreadyRunning { scope: String, session: Uuid },
}

struct ActiveRun {
    id: Uuid,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Registry {
    active: HashMap<String, ActiveRun>,
    trackers: HashMap<String, StateTracker>,
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One indexing run: identity, cancellation, and state.
///
/// Dropping a session obtained from an [`IndexCoordinator`] frees its scope.
pub struct IndexingSession {
    id: Uuid,
    scope: String,
    cancel: CancellationToken,
    tracker: StateTracker,
    registry: Option<Arc<Mutex<Registry>>>,
}

impl IndexingSession {
    /// A session not tracked by any coordinator.
    pub fn standalone(scope: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            scope: scope.into(),
            cancel: CancellationToken::new(),
            tracker: StateTracker::new(),
            registry: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn tracker(&self) -> &StateTracker {
        &self.tracker
    }

    /// Request cooperative cancellation of this run.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for IndexingSession {
    fn drop(&mut self) {
        if let Some(registry) = &self.registry {
            let mut reg = lock(registry);
            if reg.active.get(&self.scope).map(|r| r.id) == Some(self.id) {
                reg.active.remove(&self.scope);
            }
        }
    }
}

/// Single-flight guard: at most one active session per scope.
#[derive(Clone, Default)]
pub struct IndexCoordinator {
    registry: Arc<Mutex<Registry>>,
}

impl IndexCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session for `scope`, or fail if one is already active.
    pub fn begin(&self, scope: &str) -> Result<IndexingSession, SessionError> {
        let mut reg = lock(&self.registry);
        if let Some(run) = reg.active.get(scope) {
            return Err(SessionError::AlreadyRunning {
                scope: scope.to_string(),
                session: run.id,
            });
        }

        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        reg.active.insert(
            scope.to_string(),
            ActiveRun {
                id,
                cancel: cancel.clone(),
            },
        );
        let tracker = reg.trackers.entry(scope.to_string()).or_default().clone();

        Ok(IndexingSession {
            id,
            scope: scope.to_string(),
            cancel,
            tracker,
            registry: Some(self.registry.clone()),
        })
    }

    /// Cancel the active run for `scope`. Returns false when none is active.
    pub fn cancel(&self, scope: &str) -> bool {
        match lock(&self.registry).active.get(scope) {
            Some(run) => {
                run.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, scope: &str) -> bool {
        lock(&self.registry).active.contains_key(scope)
    }

    /// Latest state for `scope` (idle if it never ran).
    pub fn state(&self, scope: &str) -> IndexingState {
        lock(&self.registry)
            .trackers
            .get(scope)
            .map(StateTracker::snapshot)
            .unwrap_or_default()
    }

    /// Tracker for `scope`, shared by all of its sessions.
    pub fn tracker(&self, scope: &str) -> StateTracker {
        lock(&self.registry)
            .trackers
            .entry(scope.to_string())
            .or_default()
            .clone()
    }
}
