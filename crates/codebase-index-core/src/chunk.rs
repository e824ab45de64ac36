//! Line-aligned file chunker.
//!
//! Splits a file whose estimated token count exceeds `max_chunk_tokens`
//! into [`Chunk`]s that never cut through a line. Concatenating the chunks
//! of a file in `part_number` order reproduces the original content
//! byte-for-byte.
//!
//! # Algorithm
//!
//! 1. Convert `max_chunk_tokens` to a byte budget using a 4 chars/token ratio.
//! 2. If the whole file fits, emit one chunk (`part 1/1`, path unchanged).
//! 3. Otherwise walk the lines (newline kept with its line) and accumulate
//!    them until the next line would overflow the budget; then flush.
//! 4. A single line larger than the budget is placed whole in its own chunk.
//! 5. Once all pieces are cut, label them `path (part i/n)` with the final `n`.
//!
//! # Example
//!
//! ```rust
//! use codebase_index_core::chunk::chunk_file;
//! use codebase_index_core::models::SourceFile;
//!
//! let file = SourceFile {
//!     relative_path: "src/lib.rs".into(),
//!     absolute_path: "/ws/src/lib.rs".into(),
//!     content: "fn main() {}\n".into(),
//!     file_type: "rs".into(),
//!     last_modified: 0,
//! };
//! let chunks = chunk_file(&file, "hash", 6000);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].chunk_path, "src/lib.rs");
//! ```

use crate::models::{Chunk, SourceFile};

/// Approximate characters-per-token ratio.
///
/// A rough heuristic (4 chars ≈ 1 token) shared by the chunker and the
/// batcher so both agree on what "fits".
pub const CHARS_PER_TOKEN: usize = 4;

/// Estimated token count of `text`: `ceil(bytes / 4)`.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(CHARS_PER_TOKEN)
}

/// Split a file into line-aligned chunks of at most `max_chunk_tokens`.
///
/// # Guarantees
///
/// - At least one chunk is always returned (even for an empty file).
/// - Chunk contents concatenated in part order equal `file.content`.
/// - Every chunk except possibly the last ends on a newline.
/// - All chunks of a file carry the same `total_parts`.
pub fn chunk_file(file: &SourceFile, content_hash: &str, max_chunk_tokens: usize) -> Vec<Chunk> {
    let pieces = split_lines(&file.content, max_chunk_tokens);
    let total = pieces.len();

    pieces
        .into_iter()
        .enumerate()
        .map(|(i, piece)| {
            let part = i + 1;
            let chunk_path = if total == 1 {
                file.relative_path.clone()
            } else {
                format!("{} (part {}/{})", file.relative_path, part, total)
            };
            Chunk {
                original_path: file.relative_path.clone(),
                chunk_path,
                absolute_path: file.absolute_path.clone(),
                content: piece.to_string(),
                part_number: part,
                total_parts: total,
                file_type: file.file_type.clone(),
                last_modified: file.last_modified,
                content_hash: content_hash.to_string(),
            }
        })
        .collect()
}

fn split_lines(content: &str, max_chunk_tokens: usize) -> Vec<&str> {
    if estimate_tokens(content) <= max_chunk_tokens {
        return vec![content];
    }

    let max_bytes = max_chunk_tokens.saturating_mul(CHARS_PER_TOKEN);
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut len = 0;

    for line in content.split_inclusive('\n') {
        if len > 0 && len + line.len() > max_bytes {
            pieces.push(&content[start..start + len]);
            start += len;
            len = 0;
        }
        len += line.len();
    }

    if len > 0 {
        pieces.push(&content[start..start + len]);
    }

    pieces
}
