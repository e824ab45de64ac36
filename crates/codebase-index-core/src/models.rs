//! Core data models that flow through the indexing and search pipeline.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A file produced by a [`PathEnumerator`](crate::index::PathEnumerator).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Path relative to the workspace root; the identity of the file.
    pub relative_path: String,
    pub absolute_path: String,
    pub content: String,
    /// Lower-cased extension (`"ts"`, `"rs"`), or `"text"` when absent.
    pub file_type: String,
    /// Modification time, Unix seconds.
    pub last_modified: i64,
}

/// A line-aligned slice of one file, sized for the embedding provider.
///
/// Files that fit the chunk budget produce exactly one chunk whose
/// `chunk_path` equals the original path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub original_path: String,
    /// `path` for single-part files, `path (part i/n)` otherwise.
    pub chunk_path: String,
    pub absolute_path: String,
    pub content: String,
    /// 1-based.
    pub part_number: usize,
    pub total_parts: usize,
    pub file_type: String,
    pub last_modified: i64,
    /// Hash of the whole source file, shared by all of its parts.
    pub content_hash: String,
}

/// The unit of storage: one embedded chunk.
///
/// `relative_path` is the unique key within a scope. For multi-part files
/// it is the chunk path, and `source_path` names the file it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub relative_path: String,
    pub source_path: String,
    pub absolute_path: String,
    pub content: String,
    pub content_hash: String,
    pub embedding: Vec<f32>,
    pub file_type: String,
    pub last_modified: i64,
    pub part_number: usize,
    pub total_parts: usize,
}

impl IndexEntry {
    /// Build the entry for an embedded chunk.
    pub fn from_chunk(chunk: &Chunk, embedding: Vec<f32>) -> Self {
        Self {
            relative_path: chunk.chunk_path.clone(),
            source_path: chunk.original_path.clone(),
            absolute_path: chunk.absolute_path.clone(),
            content: chunk.content.clone(),
            content_hash: chunk.content_hash.clone(),
            embedding,
            file_type: chunk.file_type.clone(),
            last_modified: chunk.last_modified,
            part_number: chunk.part_number,
            total_parts: chunk.total_parts,
        }
    }
}

/// Source path → content hash, read once per indexing run.
pub type HashSnapshot = HashMap<String, String>;

/// Lifecycle status of an indexing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IndexingStatus {
    #[default]
    Idle,
    InProgress,
    Complete,
    Error,
}

impl IndexingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexingStatus::Idle => "idle",
            IndexingStatus::InProgress => "in_progress",
            IndexingStatus::Complete => "complete",
            IndexingStatus::Error => "error",
        }
    }
}

/// Live progress of an in-flight run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct IndexProgress {
    pub files_indexed: usize,
    pub total_files: usize,
}

/// Readable snapshot of the indexing state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct IndexingState {
    pub status: IndexingStatus,
    pub progress: IndexProgress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
