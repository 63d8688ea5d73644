use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{debug, info};

use crate::data::{news, Article, DataError};

use super::{Chunker, Embedder, RagError, SearchResult, StoredChunk, VectorStore};

/// Provides retrieved news context for a ticker. The research pipeline
/// depends on this seam rather than on the concrete retriever so it can
/// run degraded (or under test) without a vector store.
#[async_trait]
pub trait ContextSource: Send + Sync {
    async fn context_for_ticker(&self, ticker: &str, query: &str) -> Result<String, RagError>;
}

/// Composes chunker, embedder and vector store into the two retrieval
/// operations: index an article, search by query text.
pub struct Retriever {
    chunker: Chunker,
    embedder: Arc<Embedder>,
    store: Arc<dyn VectorStore>,
    top_k: usize,
}

impl Retriever {
    pub fn new(
        chunker: Chunker,
        embedder: Arc<Embedder>,
        store: Arc<dyn VectorStore>,
        top_k: usize,
    ) -> Self {
        Self {
            chunker,
            embedder,
            store,
            top_k,
        }
    }

    /// Chunk, embed and store an article. Returns the number of chunks
    /// written; an article with no text yields 0 without error.
    /// Re-running replaces the article's chunk set, so indexing is
    /// idempotent per article.
    pub async fn index_article(&self, article: &Article) -> Result<usize, RagError> {
        let chunks = self.chunker.article_chunks(article);
        if chunks.is_empty() {
            debug!("Article {} has no text to index", article.id);
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|(text, _)| text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;

        let stored: Vec<StoredChunk> = chunks
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(i, ((text, metadata), embedding))| StoredChunk {
                article_id: article.id,
                chunk_index: i as i32,
                text,
                embedding,
                metadata,
            })
            .collect();

        let written = self
            .store
            .replace_article_chunks(article.id, &stored)
            .await?;
        info!("Indexed {} chunks for article {}", written, article.id);
        Ok(written)
    }

    /// Index every article that has no chunks yet.
    /// Returns the total number of chunks written.
    pub async fn index_all_unindexed(&self, pool: &PgPool) -> Result<usize, RagError> {
        let articles = news::unindexed_articles(pool).await.map_err(|e| match e {
            DataError::Database(err) => RagError::from_sqlx(err),
            other => RagError::StoreUnavailable(other.to_string()),
        })?;

        let mut total = 0;
        for article in &articles {
            total += self.index_article(article).await?;
        }
        info!(
            "Indexed {} chunks from {} articles",
            total,
            articles.len()
        );
        Ok(total)
    }

    /// Embed the query once and delegate to the store.
    pub async fn search(
        &self,
        query: &str,
        k: i64,
        ticker: Option<&str>,
    ) -> Result<Vec<SearchResult>, RagError> {
        let embedding = self.embedder.embed(query).await?;
        self.store.search(&embedding, k, ticker).await
    }
}

#[async_trait]
impl ContextSource for Retriever {
    /// Top passages for a ticker formatted for prompt embedding.
    async fn context_for_ticker(&self, ticker: &str, query: &str) -> Result<String, RagError> {
        let results = self.search(query, self.top_k.max(10) as i64, Some(ticker)).await?;

        if results.is_empty() {
            return Ok("No recent news or context available.".to_string());
        }

        let parts: Vec<String> = results
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let source = r.metadata["source"].as_str().unwrap_or("Unknown");
                let date = r.metadata["published_at"].as_str().unwrap_or("N/A");
                format!("[{}] ({}, {}): {}", i + 1, source, date, r.text)
            })
            .collect();

        Ok(parts.join("\n\n"))
    }
}
