use async_trait::async_trait;

use super::{
    AnalystConsensus, CompanyProfile, DataResult, FinancialStatement, InsiderActivity, KeyMetrics,
    NewsStory, OhlcvBar,
};

/// Market/fundamentals data source.
///
/// Every research step goes through this trait so the orchestrator can be
/// exercised against test doubles and alternative providers. Each method
/// maps to one upstream endpoint and fails independently.
#[async_trait]
pub trait FinancialDataProvider: Send + Sync {
    async fn company_profile(&self, symbol: &str) -> DataResult<CompanyProfile>;

    async fn key_metrics(&self, symbol: &str) -> DataResult<KeyMetrics>;

    async fn income_statement(&self, symbol: &str, limit: usize) -> DataResult<FinancialStatement>;

    async fn balance_sheet(&self, symbol: &str, limit: usize) -> DataResult<FinancialStatement>;

    async fn cash_flow(&self, symbol: &str, limit: usize) -> DataResult<FinancialStatement>;

    /// Daily bars for roughly the last `days` calendar days, oldest first.
    async fn price_history(&self, symbol: &str, days: u32) -> DataResult<Vec<OhlcvBar>>;

    async fn news(&self, symbol: &str) -> DataResult<Vec<NewsStory>>;

    async fn analyst_recommendations(&self, symbol: &str) -> DataResult<AnalystConsensus>;

    async fn insider_trades(&self, symbol: &str) -> DataResult<InsiderActivity>;

    /// Provider name for logging and reports
    fn name(&self) -> &str;
}
