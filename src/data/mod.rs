//! Data layer: provider access for market data, news and fundamentals,
//! plus persistence of articles and OHLCV rows.

pub mod errors;
pub mod market;
pub mod news;
pub mod provider;
pub mod retry;
pub mod yahoo;

// Re-export commonly used types
pub use errors::{DataError, DataResult};
pub use provider::FinancialDataProvider;
pub use yahoo::YahooFinanceClient;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A stored news article. Immutable once written; deleting an article
/// cascades to its chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    pub ticker_symbol: String,
    pub title: String,
    pub content: String,
    pub published_at: Option<DateTime<Utc>>,
    pub source: Option<String>,
    pub url: Option<String>,
    pub article_type: String,
}

/// A raw news story as returned by the provider, before storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsStory {
    pub title: String,
    pub summary: String,
    pub url: Option<String>,
    pub source: String,
    pub published_at: Option<DateTime<Utc>>,
}

/// Daily OHLCV bar
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OhlcvBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub adj_close: Option<f64>,
    pub volume: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompanyProfile {
    pub symbol: String,
    pub name: String,
    pub sector: String,
    pub industry: String,
    pub description: String,
    pub market_cap: Option<f64>,
    pub employees: Option<i64>,
    pub website: String,
    pub exchange: String,
    pub country: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyMetrics {
    pub symbol: String,
    pub price: Option<f64>,
    pub pe_trailing: Option<f64>,
    pub pe_forward: Option<f64>,
    pub peg_ratio: Option<f64>,
    pub price_to_book: Option<f64>,
    pub price_to_sales: Option<f64>,
    pub ev_to_ebitda: Option<f64>,
    pub beta: Option<f64>,
    pub week_52_low: Option<f64>,
    pub week_52_high: Option<f64>,
    pub dividend_yield: Option<f64>,
    pub gross_margin: Option<f64>,
    pub operating_margin: Option<f64>,
    pub profit_margin: Option<f64>,
    pub return_on_equity: Option<f64>,
    pub return_on_assets: Option<f64>,
    pub debt_to_equity: Option<f64>,
    pub current_ratio: Option<f64>,
    pub revenue_growth: Option<f64>,
    pub earnings_growth: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatementKind {
    Income,
    Balance,
    CashFlow,
}

impl StatementKind {
    pub fn title(&self) -> &'static str {
        match self {
            StatementKind::Income => "Income Statement",
            StatementKind::Balance => "Balance Sheet",
            StatementKind::CashFlow => "Cash Flow",
        }
    }
}

/// One line item across reporting periods, aligned with
/// [`FinancialStatement::periods`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementRow {
    pub label: String,
    pub values: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinancialStatement {
    pub symbol: String,
    pub kind: StatementKind,
    pub periods: Vec<String>,
    pub rows: Vec<StatementRow>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalystConsensus {
    pub symbol: String,
    pub recommendation_key: Option<String>,
    pub analyst_count: Option<i64>,
    pub target_mean: Option<f64>,
    pub target_low: Option<f64>,
    pub target_high: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsiderTrade {
    pub date: String,
    pub insider: String,
    pub transaction: String,
    pub shares: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InsiderActivity {
    pub symbol: String,
    pub trades: Vec<InsiderTrade>,
}

/// Validation helpers
pub mod validation {
    use super::{DataError, DataResult};

    /// Validate a stock symbol (basic US market symbols)
    pub fn validate_symbol(symbol: &str) -> DataResult<()> {
        if symbol.is_empty() {
            return Err(DataError::validation_error("symbol", "Symbol cannot be empty"));
        }

        if symbol.len() > 10 {
            return Err(DataError::validation_error(
                "symbol",
                "Symbol too long (max 10 chars)",
            ));
        }

        if !symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
        {
            return Err(DataError::validation_error(
                "symbol",
                "Symbol contains invalid characters",
            ));
        }

        Ok(())
    }

    /// Validate an OHLCV bar before persistence
    pub fn validate_bar(bar: &super::OhlcvBar) -> DataResult<()> {
        if bar.open <= 0.0 || bar.high <= 0.0 || bar.low <= 0.0 || bar.close <= 0.0 {
            return Err(DataError::validation_error("price", "Prices must be positive"));
        }
        if bar.volume < 0 {
            return Err(DataError::validation_error("volume", "Volume cannot be negative"));
        }
        if bar.high < bar.low {
            return Err(DataError::validation_error(
                "high_low",
                "High price cannot be less than low price",
            ));
        }
        Ok(())
    }
}
