//! Retrieval engine: document chunking, local embeddings, vector storage
//! and semantic search over indexed news articles.

pub mod chunker;
pub mod embedder;
mod pgvector_sqlx;
pub mod retriever;
pub mod store;

pub use chunker::Chunker;
pub use embedder::Embedder;
pub use pgvector_sqlx::PgVector;
pub use retriever::{ContextSource, Retriever};
pub use store::{JsonArrayBackend, PgVectorBackend, SearchResult, StoredChunk, VectorStore};

use thiserror::Error;

/// Output dimensionality of the embedding model (all-MiniLM-L6-v2)
pub const EMBEDDING_DIM: usize = 384;

#[derive(Debug, Error)]
pub enum RagError {
    #[error("embedding failure: {0}")]
    Embedding(String),

    #[error("invalid embedding dimension: expected {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },

    #[error("vector store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("vector store query failed: {0}")]
    Store(#[source] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RagError {
    /// Classify a sqlx error: connection-level failures mean the store is
    /// unreachable (degraded mode), everything else is a query failure.
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                RagError::StoreUnavailable(err.to_string())
            }
            other => RagError::Store(other),
        }
    }

}

/// Cosine similarity between two vectors. Zero-norm inputs (e.g. the
/// embedding of an empty string after quantization) report 0.0 rather
/// than dividing by zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![0.5_f32, -0.25, 1.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        let a = vec![1.0_f32, 0.0];
        let b = vec![0.0_f32, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn zero_norm_guard() {
        let a = vec![0.0_f32; 4];
        let b = vec![1.0_f32; 4];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }
}
