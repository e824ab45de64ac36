//! Embedding client trait and vector utilities.
//!
//! Defines the [`EmbeddingClient`] trait that all embedding backends
//! implement, the count checks applied to every provider response, plus
//! pure helper functions for vector serialization and similarity.
//!
//! Concrete providers (OpenAI, Ollama) live in the `codebase-index` app
//! crate.

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Trait for embedding providers.
///
/// `embed` returns one vector per input text, in input order. Implementations
/// must abort an in-flight request when `cancel` fires.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts.
    async fn embed(
        &self,
        texts: &[String],
        cancel: &CancellationToken,
    ) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Why an embedding batch failed.
#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding provider error: {0:#}")]
    Provider(anyhow::Error),
    #[error("embedding provider returned no vectors for {expected} inputs")]
    Empty { expected: usize },
    #[error("embedding provider returned {got} vectors for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },
    #[error("embedding request cancelled")]
    Cancelled,
}

/// Embed `texts` and verify the provider returned exactly one vector per input.
pub async fn embed_checked(
    client: &dyn EmbeddingClient,
    texts: &[String],
    cancel: &CancellationToken,
) -> Result<Vec<Vec<f32>>, EmbedError> {
    if cancel.is_cancelled() {
        return Err(EmbedError::Cancelled);
    }
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let vectors = match client.embed(texts, cancel).await {
        Ok(_) | Err(_) if cancel.is_cancelled() => return Err(EmbedError::Cancelled),
        Ok(v) => v,
        Err(e) => return Err(EmbedError::Provider(e)),
    };

    if vectors.is_empty() {
        return Err(EmbedError::Empty {
            expected: texts.len(),
        });
    }
    if vectors.len() != texts.len() {
        return Err(EmbedError::CountMismatch {
            expected: texts.len(),
            got: vectors.len(),
        });
    }
    Ok(vectors)
}

/// Embed a single query text.
pub async fn embed_query(
    client: &dyn EmbeddingClient,
    text: &str,
    cancel: &CancellationToken,
) -> Result<Vec<f32>, EmbedError> {
    let mut vectors = embed_checked(client, &[text.to_string()], cancel).await?;
    Ok(vectors.swap_remove(0))
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// # Example
///
/// ```rust
/// use codebase_index_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`. Vectors of different lengths, empty
/// vectors, zero-norm vectors, and non-finite results score `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    let sim = dot / denom;
    if sim.is_finite() {
        sim
    } else {
        0.0
    }
}
