//! # codebase-index
//!
//! Incremental embedding index and semantic search for source trees.
//!
//! The indexing engine itself (change detection, chunking, batching, the
//! embedding pipeline, tiered storage, search) lives in
//! [`codebase_index_core`]. This crate supplies its collaborators and the
//! `cbi` command line:
//!
//! ```text
//! ┌──────────────────┐   ┌──────────────────────┐   ┌──────────────┐
//! │ FilesystemEnum.  │──▶│  IndexWorkspace      │──▶│ TieredStore  │
//! │ walkdir+globset  │   │  (core)              │   │ SQLite + mem │
//! └──────────────────┘   └──────────┬───────────┘   └──────┬───────┘
//!                                   │                      │
//!                        ┌──────────▼───────────┐   ┌──────▼───────┐
//!                        │ OpenAI / Ollama      │   │ SearchEngine │
//!                        └──────────────────────┘   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cbi init                      # create database
//! cbi index                     # embed new and changed files
//! cbi search "auth middleware"  # rank indexed files
//! cbi status                    # per-scope counts
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | Durable repository over SQLite |
//! | [`embedding`] | OpenAI / Ollama providers |
//! | [`enumerate`] | Filesystem path enumerator |
//! | [`progress`] | Progress reporting on stderr |
//! | [`index_cmd`] | `cbi index` |
//! | [`search`] | `cbi search` |
//! | [`status`] | `cbi status` |

pub mod config;
pub mod db;
pub mod embedding;
pub mod enumerate;
pub mod index_cmd;
pub mod migrate;
pub mod progress;
pub mod search;
pub mod sqlite_store;
pub mod status;
