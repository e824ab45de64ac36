//! # codebase-index core
//!
//! The incremental embedding index and semantic search engine behind
//! `codebase-index`: content-hash change detection, line-aligned chunking,
//! token-budgeted batching, a content-addressed embedding cache, a
//! cancellable sequential embedding pipeline with streaming commits, a
//! tiered (durable + in-memory) store, stale entry reconciliation, and
//! cosine-similarity search.
//!
//! This crate contains no sqlx, reqwest, or filesystem I/O. Collaborators
//! (path enumeration, the embedding provider, the durable repository) are
//! traits implemented by the application crate.
//!
//! ```text
//! PathEnumerator ─▶ hash/diff ─▶ chunk ─▶ batch ─▶ embed ─▶ TieredStore
//!                       │                                      ▲
//!                       └──────────── reconcile (stale) ───────┘
//! ```

pub mod batch;
pub mod cache;
pub mod chunk;
pub mod embedding;
pub mod hash;
pub mod index;
pub mod models;
pub mod pipeline;
pub mod reconcile;
pub mod search;
pub mod state;
pub mod store;

pub use cache::{CachedEmbedder, EmbeddingCache, InMemoryEmbeddingCache};
pub use index::{IndexOptions, IndexPlan, IndexReport, IndexWorkspace, PathEnumerator};
pub use models::{Chunk, IndexEntry, IndexingState, IndexingStatus, SourceFile};
pub use search::{SearchEngine, SearchHit};
pub use state::{IndexCoordinator, IndexingSession, SessionError, StateTracker};
pub use store::{InMemoryStore, Storage, TieredStore};
