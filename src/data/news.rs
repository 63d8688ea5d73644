use sqlx::{PgPool, Row};
use std::sync::Arc;
use tracing::{debug, info};

use super::provider::FinancialDataProvider;
use super::{Article, DataResult, NewsStory};

/// Fetches news from the provider and stores new articles, deduplicated
/// by URL.
pub struct NewsFetcher {
    pool: PgPool,
    provider: Arc<dyn FinancialDataProvider>,
}

impl NewsFetcher {
    pub fn new(pool: PgPool, provider: Arc<dyn FinancialDataProvider>) -> Self {
        Self { pool, provider }
    }

    /// Fetch news for a symbol and store new articles.
    /// Returns (fetched_count, stored_count).
    pub async fn fetch_and_store(&self, symbol: &str) -> DataResult<(usize, usize)> {
        let symbol = symbol.to_uppercase();
        let stories = self.provider.news(&symbol).await?;
        info!("Fetched {} news items for {}", stories.len(), symbol);

        let mut stored = 0;
        for story in &stories {
            if self.store_story(&symbol, story).await?.is_some() {
                stored += 1;
            }
        }

        info!("Stored {}/{} new articles for {}", stored, stories.len(), symbol);
        Ok((stories.len(), stored))
    }

    /// Store a single story, skipping duplicates and stories without a URL.
    /// Returns the new article id when a row was inserted.
    pub async fn store_story(&self, symbol: &str, story: &NewsStory) -> DataResult<Option<i64>> {
        let Some(url) = story.url.as_deref() else {
            debug!("Skipping article without URL: {}", story.title);
            return Ok(None);
        };

        let existing = sqlx::query("SELECT id FROM articles WHERE url = $1")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;

        if existing.is_some() {
            return Ok(None);
        }

        let row = sqlx::query(
            r#"
            INSERT INTO articles (ticker_symbol, title, content, published_at, source, url, article_type)
            VALUES ($1, $2, $3, $4, $5, $6, 'news')
            RETURNING id
            "#,
        )
        .bind(symbol)
        .bind(&story.title)
        .bind(&story.summary)
        .bind(story.published_at)
        .bind(&story.source)
        .bind(url)
        .fetch_one(&self.pool)
        .await?;

        Ok(Some(row.get::<i64, _>("id")))
    }

    /// Fetch and store news for every active ticker.
    /// Returns (symbol, fetched, stored) triples.
    pub async fn fetch_all_tickers(&self) -> DataResult<Vec<(String, usize, usize)>> {
        let symbols = active_tickers(&self.pool).await?;

        let mut results = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            let (fetched, stored) = self.fetch_and_store(&symbol).await?;
            results.push((symbol, fetched, stored));
        }
        Ok(results)
    }
}

/// Symbols of all active tracked tickers
pub async fn active_tickers(pool: &PgPool) -> DataResult<Vec<String>> {
    let rows = sqlx::query("SELECT symbol FROM tickers WHERE is_active ORDER BY symbol")
        .fetch_all(pool)
        .await?;

    Ok(rows.iter().map(|r| r.get::<String, _>("symbol")).collect())
}

/// Articles that have no chunks indexed yet
pub async fn unindexed_articles(pool: &PgPool) -> DataResult<Vec<Article>> {
    let rows = sqlx::query(
        r#"
        SELECT id, ticker_symbol, title, content, published_at, source, url, article_type
        FROM articles
        WHERE id NOT IN (SELECT DISTINCT article_id FROM embeddings)
        ORDER BY id
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(article_from_row).collect())
}

pub async fn load_article(pool: &PgPool, id: i64) -> DataResult<Option<Article>> {
    let row = sqlx::query(
        r#"
        SELECT id, ticker_symbol, title, content, published_at, source, url, article_type
        FROM articles
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.as_ref().map(article_from_row))
}

fn article_from_row(row: &sqlx::postgres::PgRow) -> Article {
    Article {
        id: row.get("id"),
        ticker_symbol: row.get("ticker_symbol"),
        title: row.get("title"),
        content: row.get::<Option<String>, _>("content").unwrap_or_default(),
        published_at: row.get("published_at"),
        source: row.get("source"),
        url: row.get("url"),
        article_type: row.get("article_type"),
    }
}
