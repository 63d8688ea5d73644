//! Vector storage behind a single contract with two interchangeable
//! backends:
//!
//! - [`PgVectorBackend`] ranks inside PostgreSQL with the pgvector `<=>`
//!   cosine-distance operator (HNSW-accelerated).
//! - [`JsonArrayBackend`] stores vectors as JSON float arrays and ranks
//!   candidates in memory, for stores without the pgvector extension.
//!
//! Both report cosine similarity mapped to [0, 1], order by descending
//! similarity with ties broken by lowest chunk id, and replace an
//! article's chunks atomically (delete-then-reinsert in one transaction),
//! which makes reindexing idempotent at article granularity.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use super::{cosine_similarity, PgVector, RagError, EMBEDDING_DIM};

/// A chunk ready for storage: text, vector and denormalized metadata.
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub article_id: i64,
    pub chunk_index: i32,
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: Value,
}

/// One search hit. Ephemeral; never persisted.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub chunk_id: i64,
    pub article_id: i64,
    pub text: String,
    pub similarity: f32,
    pub metadata: Value,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Replace all stored chunks of an article with the given set.
    /// Calling this twice with the same input leaves the same chunk set.
    async fn replace_article_chunks(
        &self,
        article_id: i64,
        chunks: &[StoredChunk],
    ) -> Result<usize, RagError>;

    /// Top-k chunks by cosine similarity to `query`, optionally filtered
    /// to a ticker. `k <= 0` returns an empty list.
    async fn search(
        &self,
        query: &[f32],
        k: i64,
        ticker: Option<&str>,
    ) -> Result<Vec<SearchResult>, RagError>;

    /// Number of chunks currently stored for an article.
    async fn chunk_count(&self, article_id: i64) -> Result<i64, RagError>;
}

fn check_dimension(vector: &[f32]) -> Result<(), RagError> {
    if vector.len() != EMBEDDING_DIM {
        return Err(RagError::Dimension {
            expected: EMBEDDING_DIM,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// Rank in-memory candidates `(chunk_id, article_id, text, metadata,
/// embedding)` against a query vector: descending similarity, ties by
/// lowest chunk id, truncated to `k`. Similarity is clamped to [0, 1].
pub(crate) fn rank_candidates(
    candidates: Vec<(i64, i64, String, Value, Vec<f32>)>,
    query: &[f32],
    k: i64,
) -> Vec<SearchResult> {
    if k <= 0 {
        return Vec::new();
    }

    let mut results: Vec<SearchResult> = candidates
        .into_iter()
        .map(|(chunk_id, article_id, text, metadata, embedding)| SearchResult {
            chunk_id,
            article_id,
            text,
            similarity: cosine_similarity(query, &embedding).clamp(0.0, 1.0),
            metadata,
        })
        .collect();

    results.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then(a.chunk_id.cmp(&b.chunk_id))
    });
    results.truncate(k as usize);
    results
}

/// Backend A: native `vector(384)` column, ranking done by PostgreSQL.
pub struct PgVectorBackend {
    pool: PgPool,
}

impl PgVectorBackend {
    /// Create the backend, verifying the pgvector extension is present.
    pub async fn new(pool: PgPool) -> Result<Self, RagError> {
        let row = sqlx::query("SELECT 1 FROM pg_extension WHERE extname = 'vector'")
            .fetch_optional(&pool)
            .await
            .map_err(RagError::from_sqlx)?;

        if row.is_none() {
            return Err(RagError::StoreUnavailable(
                "pgvector extension not installed; run migrations or use the JSON backend"
                    .to_string(),
            ));
        }

        Ok(Self { pool })
    }
}

#[async_trait]
impl VectorStore for PgVectorBackend {
    async fn replace_article_chunks(
        &self,
        article_id: i64,
        chunks: &[StoredChunk],
    ) -> Result<usize, RagError> {
        for chunk in chunks {
            check_dimension(&chunk.embedding)?;
        }

        let mut tx = self.pool.begin().await.map_err(RagError::from_sqlx)?;

        sqlx::query("DELETE FROM embeddings WHERE article_id = $1")
            .bind(article_id)
            .execute(&mut *tx)
            .await
            .map_err(RagError::from_sqlx)?;

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO embeddings (article_id, chunk_text, chunk_index, embedding, metadata)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(chunk.article_id)
            .bind(&chunk.text)
            .bind(chunk.chunk_index)
            .bind(PgVector::new(chunk.embedding.clone()))
            .bind(&chunk.metadata)
            .execute(&mut *tx)
            .await
            .map_err(RagError::from_sqlx)?;
        }

        tx.commit().await.map_err(RagError::from_sqlx)?;
        info!("Stored {} chunks for article {}", chunks.len(), article_id);
        Ok(chunks.len())
    }

    async fn search(
        &self,
        query: &[f32],
        k: i64,
        ticker: Option<&str>,
    ) -> Result<Vec<SearchResult>, RagError> {
        if k <= 0 {
            return Ok(Vec::new());
        }
        check_dimension(query)?;

        // <=> is cosine distance; 1 - distance is the reported similarity
        let rows = sqlx::query(
            r#"
            SELECT e.id, e.article_id, e.chunk_text, e.metadata,
                   1 - (e.embedding <=> $1) AS similarity
            FROM embeddings e
            JOIN articles a ON a.id = e.article_id
            WHERE e.embedding IS NOT NULL
              AND ($2::varchar IS NULL OR a.ticker_symbol = $2)
            ORDER BY e.embedding <=> $1 ASC, e.id ASC
            LIMIT $3
            "#,
        )
        .bind(PgVector::new(query.to_vec()))
        .bind(ticker.map(|t| t.to_uppercase()))
        .bind(k)
        .fetch_all(&self.pool)
        .await
        .map_err(RagError::from_sqlx)?;

        let results = rows
            .iter()
            .map(|row| SearchResult {
                chunk_id: row.get("id"),
                article_id: row.get("article_id"),
                text: row.get("chunk_text"),
                similarity: (row.get::<f64, _>("similarity") as f32).clamp(0.0, 1.0),
                metadata: row.get("metadata"),
            })
            .collect::<Vec<_>>();

        debug!("pgvector search returned {} results", results.len());
        Ok(results)
    }

    async fn chunk_count(&self, article_id: i64) -> Result<i64, RagError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM embeddings WHERE article_id = $1")
            .bind(article_id)
            .fetch_one(&self.pool)
            .await
            .map_err(RagError::from_sqlx)?;
        Ok(row.get::<i64, _>("n"))
    }
}

/// Backend B: JSON float-array column, ranking computed in memory.
/// Works without the pgvector extension.
pub struct JsonArrayBackend {
    pool: PgPool,
}

impl JsonArrayBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VectorStore for JsonArrayBackend {
    async fn replace_article_chunks(
        &self,
        article_id: i64,
        chunks: &[StoredChunk],
    ) -> Result<usize, RagError> {
        for chunk in chunks {
            check_dimension(&chunk.embedding)?;
        }

        let mut tx = self.pool.begin().await.map_err(RagError::from_sqlx)?;

        sqlx::query("DELETE FROM embeddings WHERE article_id = $1")
            .bind(article_id)
            .execute(&mut *tx)
            .await
            .map_err(RagError::from_sqlx)?;

        for chunk in chunks {
            let encoded = serde_json::to_value(&chunk.embedding)?;
            sqlx::query(
                r#"
                INSERT INTO embeddings (article_id, chunk_text, chunk_index, embedding_json, metadata)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(chunk.article_id)
            .bind(&chunk.text)
            .bind(chunk.chunk_index)
            .bind(encoded)
            .bind(&chunk.metadata)
            .execute(&mut *tx)
            .await
            .map_err(RagError::from_sqlx)?;
        }

        tx.commit().await.map_err(RagError::from_sqlx)?;
        info!("Stored {} chunks for article {}", chunks.len(), article_id);
        Ok(chunks.len())
    }

    async fn search(
        &self,
        query: &[f32],
        k: i64,
        ticker: Option<&str>,
    ) -> Result<Vec<SearchResult>, RagError> {
        if k <= 0 {
            return Ok(Vec::new());
        }
        check_dimension(query)?;

        let rows = sqlx::query(
            r#"
            SELECT e.id, e.article_id, e.chunk_text, e.metadata, e.embedding_json
            FROM embeddings e
            JOIN articles a ON a.id = e.article_id
            WHERE e.embedding_json IS NOT NULL
              AND ($1::varchar IS NULL OR a.ticker_symbol = $1)
            "#,
        )
        .bind(ticker.map(|t| t.to_uppercase()))
        .fetch_all(&self.pool)
        .await
        .map_err(RagError::from_sqlx)?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            let embedding: Vec<f32> = serde_json::from_value(row.get("embedding_json"))?;
            candidates.push((
                row.get::<i64, _>("id"),
                row.get::<i64, _>("article_id"),
                row.get::<String, _>("chunk_text"),
                row.get::<Value, _>("metadata"),
                embedding,
            ));
        }

        let results = rank_candidates(candidates, query, k);
        debug!("json backend search returned {} results", results.len());
        Ok(results)
    }

    async fn chunk_count(&self, article_id: i64) -> Result<i64, RagError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM embeddings WHERE article_id = $1")
            .bind(article_id)
            .fetch_one(&self.pool)
            .await
            .map_err(RagError::from_sqlx)?;
        Ok(row.get::<i64, _>("n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn unit(axis: usize) -> Vec<f32> {
        let mut v = vec![0.0_f32; EMBEDDING_DIM];
        v[axis] = 1.0;
        v
    }

    fn candidate(id: i64, embedding: Vec<f32>) -> (i64, i64, String, Value, Vec<f32>) {
        (id, 1, format!("chunk {id}"), json!({}), embedding)
    }

    #[test]
    fn ranks_by_descending_similarity() {
        let query = unit(0);
        let mut far = unit(0);
        far[1] = 1.0; // 45 degrees off the query

        let results = rank_candidates(
            vec![candidate(1, unit(1)), candidate(2, unit(0)), candidate(3, far)],
            &query,
            3,
        );

        let ids: Vec<i64> = results.iter().map(|r| r.chunk_id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
        assert!(results[0].similarity > results[1].similarity);
        assert!(results.iter().all(|r| (0.0..=1.0).contains(&r.similarity)));
    }

    #[test]
    fn ties_break_by_lowest_chunk_id() {
        let query = unit(0);
        let results = rank_candidates(
            vec![candidate(7, unit(0)), candidate(3, unit(0)), candidate(5, unit(0))],
            &query,
            3,
        );
        let ids: Vec<i64> = results.iter().map(|r| r.chunk_id).collect();
        assert_eq!(ids, vec![3, 5, 7]);
    }

    #[test]
    fn non_positive_k_returns_empty() {
        let query = unit(0);
        assert!(rank_candidates(vec![candidate(1, unit(0))], &query, 0).is_empty());
        assert!(rank_candidates(vec![candidate(1, unit(0))], &query, -4).is_empty());
    }

    #[test]
    fn truncates_to_k() {
        let query = unit(0);
        let candidates = (1..=10).map(|i| candidate(i, unit(0))).collect();
        assert_eq!(rank_candidates(candidates, &query, 5).len(), 5);
    }

    #[test]
    fn negative_cosine_clamps_to_zero() {
        let query = unit(0);
        let mut opposite = vec![0.0_f32; EMBEDDING_DIM];
        opposite[0] = -1.0;

        let results = rank_candidates(vec![candidate(1, opposite)], &query, 1);
        assert_eq!(results[0].similarity, 0.0);
    }
}
