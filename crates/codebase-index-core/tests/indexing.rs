//! End-to-end indexing and search runs over in-process fakes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use codebase_index_core::embedding::EmbeddingClient;
use codebase_index_core::models::HashSnapshot;
use codebase_index_core::{
    CachedEmbedder, IndexCoordinator, IndexEntry, IndexOptions, IndexWorkspace, IndexingSession, IndexingStatus,
    InMemoryEmbeddingCache, InMemoryStore, PathEnumerator, SearchEngine, SearchHit, SessionError, SourceFile, Storage,
    TieredStore,
};

const KEYWORDS: [&str; 6] = ["auth", "middleware", "token", "color", "margin", "parser"];

/// Bag-of-keywords embedder. Can cancel a coordinator scope or fail on a
/// given call number.
#[derive(Default)]
struct KeywordEmbedder {
    calls: AtomicUsize,
    texts: AtomicUsize,
    fail_on_call: Option<usize>,
    short_on_call: Option<usize>,
    cancel_on_call: Option<(usize, IndexCoordinator, String)>,
}

impl KeywordEmbedder {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn texts(&self) -> usize {
        self.texts.load(Ordering::SeqCst)
    }
}

fn keyword_vector(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    KEYWORDS
        .iter()
        .map(|kw| lower.matches(kw).count() as f32)
        .collect()
}

#[async_trait]
impl EmbeddingClient for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keywords"
    }

    fn dims(&self) -> usize {
        KEYWORDS.len()
    }

    async fn embed(&self, texts: &[String], cancel: &CancellationToken) -> Result<Vec<Vec<f32>>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((n, coordinator, scope)) = &self.cancel_on_call {
            if *n == call {
                coordinator.cancel(scope);
            }
        }
        if cancel.is_cancelled() {
            bail!("request aborted");
        }
        if self.fail_on_call == Some(call) {
            bail!("provider returned 503");
        }
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        let mut vectors: Vec<Vec<f32>> = texts.iter().map(|t| keyword_vector(t)).collect();
        if self.short_on_call == Some(call) {
            vectors.pop();
        }
        Ok(vectors)
    }
}

/// Mutable in-memory file listing.
#[derive(Default)]
struct FakeTree {
    files: Mutex<Vec<SourceFile>>,
    broken: Mutex<bool>,
}

impl FakeTree {
    fn with(files: &[(&str, &str)]) -> Arc<Self> {
        let tree = Arc::new(Self::default());
        for (path, content) in files {
            tree.write(path, content);
        }
        tree
    }

    fn write(&self, path: &str, content: &str) {
        let mut files = self.files.lock().unwrap();
        files.retain(|f| f.relative_path != path);
        files.push(SourceFile {
            relative_path: path.to_string(),
            absolute_path: format!("/ws/{}", path),
            content: content.to_string(),
            file_type: path.rsplit('.').next().unwrap_or("text").to_string(),
            last_modified: 1_700_000_000,
        });
        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    }

    fn remove(&self, path: &str) {
        self.files.lock().unwrap().retain(|f| f.relative_path != path);
    }
}

#[async_trait]
impl PathEnumerator for FakeTree {
    async fn list(&self, _cancel: &CancellationToken) -> Result<Vec<SourceFile>> {
        if *self.broken.lock().unwrap() {
            bail!("workspace root does not exist");
        }
        Ok(self.files.lock().unwrap().clone())
    }
}

/// Durable tier that rejects every call.
struct DownStore;

#[async_trait]
impl Storage for DownStore {
    fn name(&self) -> &str {
        "down"
    }
    async fn get_hashes(&self, _scope: &str) -> Result<HashSnapshot> {
        bail!("connection refused")
    }
    async fn upsert(&self, _scope: &str, _entries: &[IndexEntry]) -> Result<()> {
        bail!("connection refused")
    }
    async fn delete(&self, _scope: &str, _paths: &[String]) -> Result<usize> {
        bail!("connection refused")
    }
    async fn search_vectors(&self, _scope: &str, _q: &[f32], _limit: usize) -> Result<Vec<SearchHit>> {
        bail!("connection refused")
    }
}

/// One file per batch.
fn tiny_batches() -> IndexOptions {
    IndexOptions {
        max_chunk_tokens: 6000,
        max_batch_tokens: 1,
        max_batch_items: 64,
    }
}

fn workspace(
    tree: &Arc<FakeTree>,
    embedder: &Arc<KeywordEmbedder>,
    store: &Arc<TieredStore>,
    options: IndexOptions,
) -> IndexWorkspace {
    IndexWorkspace::new(tree.clone(), embedder.clone(), store.clone(), options)
}

fn four_files() -> Arc<FakeTree> {
    FakeTree::with(&[
        ("a.ts", "export const auth = true;\n"),
        ("b.ts", "const token = parse();\n"),
        ("c.ts", "function parser() {}\n"),
        ("d.css", "body { margin: 0; color: red; }\n"),
    ])
}

#[tokio::test]
async fn test_second_run_without_changes_embeds_nothing() {
    let tree = four_files();
    let embedder = Arc::new(KeywordEmbedder::default());
    let store = Arc::new(TieredStore::memory_only());
    let ws = workspace(&tree, &embedder, &store, IndexOptions::default());

    let first = ws.run(&IndexingSession::standalone("ws")).await;
    assert_eq!(first.status, IndexingStatus::Complete);
    assert_eq!(first.indexed, 4);
    let texts_after_first = embedder.texts();

    let second = ws.run(&IndexingSession::standalone("ws")).await;
    assert_eq!(second.status, IndexingStatus::Complete);
    assert_eq!(second.changed, 0);
    assert_eq!(second.unchanged, 4);
    assert_eq!(second.batches, 0);
    assert_eq!(embedder.texts(), texts_after_first);
}

#[tokio::test]
async fn test_only_modified_file_is_reembedded() {
    let tree = four_files();
    let embedder = Arc::new(KeywordEmbedder::default());
    let store = Arc::new(TieredStore::memory_only());
    let ws = workspace(&tree, &embedder, &store, IndexOptions::default());
    ws.run(&IndexingSession::standalone("ws")).await;
    let before = embedder.texts();

    tree.write("b.ts", "const token = refresh(token);\n");
    let report = ws.run(&IndexingSession::standalone("ws")).await;
    assert_eq!(report.changed, 1);
    assert_eq!(report.unchanged, 3);
    assert_eq!(embedder.texts() - before, 1);
}

#[tokio::test]
async fn test_removed_file_disappears_from_hashes_and_search() {
    let tree = four_files();
    let embedder = Arc::new(KeywordEmbedder::default());
    let store = Arc::new(TieredStore::memory_only());
    let ws = workspace(&tree, &embedder, &store, IndexOptions::default());
    ws.run(&IndexingSession::standalone("ws")).await;

    tree.remove("a.ts");
    let report = ws.run(&IndexingSession::standalone("ws")).await;
    assert_eq!(report.removed, 1);

    let hashes = store.get_hashes("ws").await.unwrap();
    assert!(!hashes.contains_key("a.ts"));
    let engine = SearchEngine::new(embedder.clone(), store.clone());
    let hits = engine.search("auth", 10, Some("ws")).await.unwrap();
    assert!(hits.iter().all(|h| h.source_path != "a.ts"));
}

#[tokio::test]
async fn test_cancel_mid_run_keeps_committed_entries() {
    let tree = four_files();
    let coordinator = IndexCoordinator::new();
    let embedder = Arc::new(KeywordEmbedder {
        cancel_on_call: Some((2, coordinator.clone(), "ws".to_string())),
        ..Default::default()
    });
    let store = Arc::new(TieredStore::memory_only());
    let ws = workspace(&tree, &embedder, &store, tiny_batches());

    let session = coordinator.begin("ws").unwrap();
    let report = ws.run(&session).await;
    drop(session);

    assert_eq!(report.status, IndexingStatus::Idle);
    assert!(report.error.is_none());
    assert_eq!(report.indexed, 1);
    assert_eq!(embedder.calls(), 2);
    assert_eq!(coordinator.state("ws").status, IndexingStatus::Idle);

    let engine = SearchEngine::new(embedder.clone(), store.clone());
    let hits = engine.search("auth", 1, Some("ws")).await.unwrap();
    assert_eq!(hits[0].relative_path, "a.ts");

    let resumed = ws.run(&coordinator.begin("ws").unwrap()).await;
    assert_eq!(resumed.status, IndexingStatus::Complete);
    assert_eq!(resumed.changed, 3);
    assert_eq!(resumed.unchanged, 1);
}

#[tokio::test]
async fn test_cancel_before_run_embeds_nothing() {
    let tree = four_files();
    let embedder = Arc::new(KeywordEmbedder::default());
    let store = Arc::new(TieredStore::memory_only());
    let ws = workspace(&tree, &embedder, &store, IndexOptions::default());

    let session = IndexingSession::standalone("ws");
    session.cancel();
    let report = ws.run(&session).await;
    assert_eq!(report.status, IndexingStatus::Idle);
    assert_eq!(embedder.calls(), 0);
    assert!(store.fallback().is_empty("ws"));
}

#[tokio::test]
async fn test_batch_failure_aborts_run() {
    let tree = four_files();
    let embedder = Arc::new(KeywordEmbedder {
        fail_on_call: Some(2),
        ..Default::default()
    });
    let store = Arc::new(TieredStore::memory_only());
    let ws = workspace(&tree, &embedder, &store, tiny_batches());

    let session = IndexingSession::standalone("ws");
    let report = ws.run(&session).await;
    assert_eq!(report.status, IndexingStatus::Error);
    assert!(report.error.as_deref().unwrap().contains("503"));
    assert_eq!(embedder.calls(), 2);
    assert_eq!(report.indexed, 1);
    assert_eq!(store.fallback().len("ws"), 1);

    let state = session.tracker().snapshot();
    assert_eq!(state.status, IndexingStatus::Error);
    assert_eq!(state.progress.files_indexed, 1);
    assert_eq!(state.progress.total_files, 4);
}

#[tokio::test]
async fn test_vector_count_mismatch_is_an_error() {
    let tree = four_files();
    let embedder = Arc::new(KeywordEmbedder {
        short_on_call: Some(1),
        ..Default::default()
    });
    let store = Arc::new(TieredStore::memory_only());
    let ws = workspace(&tree, &embedder, &store, IndexOptions::default());

    let report = ws.run(&IndexingSession::standalone("ws")).await;
    assert_eq!(report.status, IndexingStatus::Error);
    assert!(report.error.as_deref().unwrap().contains("3 vectors for 4 inputs"));
    assert!(store.fallback().is_empty("ws"));
}

#[tokio::test]
async fn test_enumeration_failure_sets_error_state() {
    let tree = four_files();
    *tree.broken.lock().unwrap() = true;
    let embedder = Arc::new(KeywordEmbedder::default());
    let store = Arc::new(TieredStore::memory_only());
    let ws = workspace(&tree, &embedder, &store, IndexOptions::default());

    let session = IndexingSession::standalone("ws");
    let report = ws.run(&session).await;
    assert_eq!(report.status, IndexingStatus::Error);
    let message = session.tracker().snapshot().error.unwrap();
    assert!(message.contains("workspace root does not exist"));
}

#[tokio::test]
async fn test_durable_outage_falls_back_to_memory() {
    let tree = four_files();
    let embedder = Arc::new(KeywordEmbedder::default());
    let durable: Arc<dyn Storage> = Arc::new(DownStore);
    let store = Arc::new(TieredStore::new(Some(durable), Arc::new(InMemoryStore::new())));
    let ws = workspace(&tree, &embedder, &store, IndexOptions::default());

    let report = ws.run(&IndexingSession::standalone("ws")).await;
    assert_eq!(report.status, IndexingStatus::Complete);
    assert_eq!(report.durable_writes, 0);
    assert_eq!(report.fallback_writes, 4);

    let again = ws.run(&IndexingSession::standalone("ws")).await;
    assert_eq!(again.changed, 0);

    let engine = SearchEngine::new(embedder.clone(), store.clone());
    let hits = engine.search("token", 1, Some("ws")).await.unwrap();
    assert_eq!(hits[0].relative_path, "b.ts");
}

#[tokio::test]
async fn test_auth_query_ranks_auth_file_first() {
    let tree = FakeTree::with(&[
        (
            "auth.ts",
            "export function authMiddleware(req) {\n  verifyToken(req.headers.auth);\n}\n",
        ),
        ("styles.css", ".header { color: blue; margin: 4px; }\n"),
    ]);
    let embedder = Arc::new(KeywordEmbedder::default());
    let store = Arc::new(TieredStore::memory_only());
    let ws = workspace(&tree, &embedder, &store, IndexOptions::default());
    ws.run(&IndexingSession::standalone("ws")).await;

    let engine = SearchEngine::new(embedder.clone(), store.clone());
    let hits = engine.search("auth middleware", 1, Some("ws")).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].relative_path, "auth.ts");
    assert!(hits[0].score > 0.5);
}

#[tokio::test]
async fn test_large_file_indexed_in_parts() {
    let big = big_file();
    let tree = FakeTree::with(&[("big.ts", big.as_str())]);
    let embedder = Arc::new(KeywordEmbedder::default());
    let store = Arc::new(TieredStore::memory_only());
    let ws = workspace(&tree, &embedder, &store, IndexOptions::default());

    let report = ws.run(&IndexingSession::standalone("ws")).await;
    assert_eq!(report.status, IndexingStatus::Complete);
    assert_eq!(report.chunks, 4);
    assert_eq!(report.indexed, 1);

    let entries = store.fallback().entries("ws");
    assert_eq!(entries.len(), 4);
    let mut parts = entries.clone();
    parts.sort_by_key(|e| e.part_number);
    let rebuilt: String = parts.iter().map(|e| e.content.as_str()).collect();
    assert_eq!(rebuilt, big);
    assert!(parts.iter().all(|e| e.total_parts == 4 && e.source_path == "big.ts"));

    let again = ws.run(&IndexingSession::standalone("ws")).await;
    assert_eq!(again.changed, 0);
}

fn big_file() -> String {
    let mut big = String::new();
    for i in 0..2000 {
        big.push_str(&format!("const value_{:05} = compute({:05});    \n", i, i));
    }
    big
}

/// One chunk per batch, so a failure lands between parts of one file.
fn part_per_batch() -> IndexOptions {
    IndexOptions {
        max_chunk_tokens: 6000,
        max_batch_tokens: 1,
        max_batch_items: 1,
    }
}

#[tokio::test]
async fn test_partially_indexed_file_is_removed_once_deleted() {
    let big = big_file();
    let tree = FakeTree::with(&[("big.ts", big.as_str()), ("auth.ts", "const auth = 1;\n")]);
    // auth.ts, then big.ts part 1, then the failure.
    let embedder = Arc::new(KeywordEmbedder {
        fail_on_call: Some(3),
        ..Default::default()
    });
    let store = Arc::new(TieredStore::memory_only());
    let ws = workspace(&tree, &embedder, &store, part_per_batch());

    let first = ws.run(&IndexingSession::standalone("ws")).await;
    assert_eq!(first.status, IndexingStatus::Error);
    assert_eq!(first.chunks, 2);
    assert!(store
        .fallback()
        .entries("ws")
        .iter()
        .any(|e| e.source_path == "big.ts"));

    tree.remove("big.ts");
    let second = ws.run(&IndexingSession::standalone("ws")).await;
    assert_eq!(second.status, IndexingStatus::Complete);
    assert_eq!(second.removed, 1);

    assert!(!store.get_hashes("ws").await.unwrap().contains_key("big.ts"));
    let engine = SearchEngine::new(embedder.clone(), store.clone());
    let hits = engine.search("value compute", 10, Some("ws")).await.unwrap();
    assert!(hits.iter().all(|h| h.source_path != "big.ts"));
}

#[tokio::test]
async fn test_partially_indexed_file_is_resumed() {
    let big = big_file();
    let tree = FakeTree::with(&[("big.ts", big.as_str())]);
    let embedder = Arc::new(KeywordEmbedder {
        fail_on_call: Some(3),
        ..Default::default()
    });
    let store = Arc::new(TieredStore::memory_only());
    let ws = workspace(&tree, &embedder, &store, part_per_batch());

    let first = ws.run(&IndexingSession::standalone("ws")).await;
    assert_eq!(first.status, IndexingStatus::Error);
    assert_eq!(first.indexed, 0);

    let second = ws.run(&IndexingSession::standalone("ws")).await;
    assert_eq!(second.status, IndexingStatus::Complete);
    assert_eq!(second.changed, 1);
    assert_eq!(second.removed, 0);
    assert_eq!(second.indexed, 1);
    assert_eq!(store.fallback().len("ws"), 4);
}

#[tokio::test]
async fn test_editing_one_part_reembeds_only_that_part() {
    let big = big_file();
    let tree = FakeTree::with(&[("big.ts", big.as_str())]);
    let provider = Arc::new(KeywordEmbedder::default());
    let cached = Arc::new(CachedEmbedder::new(
        provider.clone(),
        Arc::new(InMemoryEmbeddingCache::new()),
    ));
    let store = Arc::new(TieredStore::memory_only());
    let ws = IndexWorkspace::new(tree.clone(), cached.clone(), store.clone(), IndexOptions::default());

    let first = ws.run(&IndexingSession::standalone("ws")).await;
    assert_eq!(first.chunks, 4);
    assert_eq!(provider.texts(), 4);

    // Same length, so part boundaries do not move; line 1500 sits in part 3.
    let edited = big.replace(
        "const value_01500 = compute(01500);",
        "const token_01500 = compute(01500);",
    );
    assert_ne!(edited, big);
    tree.write("big.ts", &edited);

    let second = ws.run(&IndexingSession::standalone("ws")).await;
    assert_eq!(second.status, IndexingStatus::Complete);
    assert_eq!(second.changed, 1);
    assert_eq!(second.chunks, 4);
    assert_eq!(provider.texts(), 5);
    assert_eq!(cached.hits(), 3);

    let entries = store.fallback().entries("ws");
    assert_eq!(entries.len(), 4);
    let hash = &entries[0].content_hash;
    assert!(entries.iter().all(|e| &e.content_hash == hash));
    let engine = SearchEngine::new(provider.clone(), store.clone());
    let hits = engine.search("token", 1, Some("ws")).await.unwrap();
    assert_eq!(hits[0].relative_path, "big.ts (part 3/4)");
}

#[tokio::test]
async fn test_dry_run_plan_does_not_embed() {
    let tree = four_files();
    let embedder = Arc::new(KeywordEmbedder::default());
    let store = Arc::new(TieredStore::memory_only());
    let ws = workspace(&tree, &embedder, &store, tiny_batches());

    let plan = ws.plan("ws", &CancellationToken::new()).await.unwrap();
    assert_eq!(plan.files_seen, 4);
    assert_eq!(plan.needs_indexing, 4);
    assert_eq!(plan.chunks, 4);
    assert_eq!(plan.batches, 4);
    assert_eq!(embedder.calls(), 0);
}

#[tokio::test]
async fn test_second_session_for_busy_scope_is_rejected() {
    let coordinator = IndexCoordinator::new();
    let running = coordinator.begin("ws").unwrap();
    assert!(matches!(
        coordinator.begin("ws"),
        Err(SessionError::AlreadyRunning { .. })
    ));
    drop(running);
    assert!(coordinator.begin("ws").is_ok());
}
