use sqlx::{PgPool, Row};
use std::sync::Arc;
use tracing::info;

use super::provider::FinancialDataProvider;
use super::{validation, DataResult, OhlcvBar};

/// Fetches daily OHLCV bars from the provider and persists them.
pub struct MarketDataFetcher {
    pool: PgPool,
    provider: Arc<dyn FinancialDataProvider>,
}

impl MarketDataFetcher {
    pub fn new(pool: PgPool, provider: Arc<dyn FinancialDataProvider>) -> Self {
        Self { pool, provider }
    }

    /// Fetch the last `days` of bars and persist them.
    /// Returns the number of newly inserted rows.
    pub async fn fetch_and_store(&self, symbol: &str, days: u32) -> DataResult<usize> {
        let symbol = symbol.to_uppercase();
        let bars = self.provider.price_history(&symbol, days).await?;
        let inserted = persist_bars(&self.pool, &symbol, &bars).await?;
        info!(
            "Persisted {}/{} OHLCV rows for {}",
            inserted,
            bars.len(),
            symbol
        );
        Ok(inserted)
    }
}

/// Insert bars, skipping (ticker, date) pairs that already exist.
pub async fn persist_bars(pool: &PgPool, symbol: &str, bars: &[OhlcvBar]) -> DataResult<usize> {
    let mut inserted = 0;
    for bar in bars {
        validation::validate_bar(bar)?;
        let result = sqlx::query(
            r#"
            INSERT INTO market_data
                (ticker_symbol, date, open_price, high_price, low_price, close_price, adj_close, volume)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (ticker_symbol, date) DO NOTHING
            "#,
        )
        .bind(symbol)
        .bind(bar.date)
        .bind(bar.open)
        .bind(bar.high)
        .bind(bar.low)
        .bind(bar.close)
        .bind(bar.adj_close)
        .bind(bar.volume)
        .execute(pool)
        .await?;
        inserted += result.rows_affected() as usize;
    }
    Ok(inserted)
}

/// Short recent-price summary for prompt context: latest close, volume,
/// day change and 5-day change.
pub async fn recent_summary(pool: &PgPool, symbol: &str) -> DataResult<String> {
    let rows = sqlx::query(
        r#"
        SELECT date, close_price, volume
        FROM market_data
        WHERE ticker_symbol = $1 AND close_price IS NOT NULL
        ORDER BY date DESC
        LIMIT 5
        "#,
    )
    .bind(symbol.to_uppercase())
    .fetch_all(pool)
    .await?;

    if rows.is_empty() {
        return Ok("No market data available.".to_string());
    }

    let close = |row: &sqlx::postgres::PgRow| row.get::<f64, _>("close_price");
    let latest = &rows[0];
    let latest_close = close(latest);

    let mut lines = vec![
        format!(
            "**Latest Close**: ${:.2} ({})",
            latest_close,
            latest.get::<chrono::NaiveDate, _>("date")
        ),
        format!(
            "**Volume**: {}",
            latest.get::<Option<i64>, _>("volume").unwrap_or(0)
        ),
    ];

    if rows.len() >= 2 {
        let prev = close(&rows[1]);
        if prev != 0.0 {
            lines.push(format!(
                "**Day Change**: {:+.2}%",
                (latest_close - prev) / prev * 100.0
            ));
        }
    }

    if rows.len() >= 5 {
        let oldest = close(&rows[rows.len() - 1]);
        if oldest != 0.0 {
            lines.push(format!(
                "**5-Day Change**: {:+.2}%",
                (latest_close - oldest) / oldest * 100.0
            ));
        }
    }

    Ok(lines.join("\n"))
}
