//! Yahoo Finance provider client.
//!
//! Covers the chart (OHLCV), quoteSummary (profile, metrics, statements,
//! analyst, insider) and search (news) endpoints. All responses are parsed
//! from untyped JSON since the upstream schema is loosely specified.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::provider::FinancialDataProvider;
use super::retry::retry_with_backoff;
use super::{
    validation, AnalystConsensus, CompanyProfile, DataError, DataResult, FinancialStatement,
    InsiderActivity, InsiderTrade, KeyMetrics, NewsStory, OhlcvBar, StatementKind, StatementRow,
};

const QUOTE_SUMMARY_URL: &str = "https://query1.finance.yahoo.com/v10/finance/quoteSummary";
const CHART_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";
const SEARCH_URL: &str = "https://query1.finance.yahoo.com/v1/finance/search";

const MAX_ATTEMPTS: usize = 3;

/// Rate limiter for API calls (token bucket)
struct RateLimiter {
    tokens: f64,
    max_tokens: f64,
    refill_rate: f64, // tokens per second
    last_refill: DateTime<Utc>,
}

impl RateLimiter {
    fn new(max_tokens: f64, refill_rate: f64) -> Self {
        Self {
            tokens: max_tokens,
            max_tokens,
            refill_rate,
            last_refill: Utc::now(),
        }
    }

    fn try_consume(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Wait until a token is available, then consume it
    async fn consume(&mut self) {
        loop {
            if self.try_consume() {
                return;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        }
    }

    fn refill(&mut self) {
        let now = Utc::now();
        let elapsed = (now - self.last_refill).num_milliseconds() as f64 / 1000.0;
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;
    }
}

pub struct YahooFinanceClient {
    client: reqwest::Client,
    rate_limiter: Arc<Mutex<RateLimiter>>,
}

impl Default for YahooFinanceClient {
    fn default() -> Self {
        Self::new()
    }
}

impl YahooFinanceClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (compatible; invest-advisor/0.1)")
            .build()
            .expect("Failed to build HTTP client");

        // 60 calls per minute, bursting up to 10
        let rate_limiter = Arc::new(Mutex::new(RateLimiter::new(10.0, 1.0)));

        Self {
            client,
            rate_limiter,
        }
    }

    async fn fetch_json(&self, url: &str) -> DataResult<Value> {
        self.rate_limiter.lock().await.consume().await;

        let response = self.client.get(url).send().await?;
        let status = response.status();

        if status.as_u16() == 429 {
            return Err(DataError::RateLimit { retry_after: 30 });
        }

        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unreadable body".to_string());
            return Err(DataError::api_error(
                status.as_u16(),
                format!("Yahoo Finance error: {}", body.chars().take(200).collect::<String>()),
            ));
        }

        Ok(response.json::<Value>().await?)
    }

    async fn quote_summary(&self, symbol: &str, modules: &str) -> DataResult<Value> {
        validation::validate_symbol(symbol)?;
        let url = format!(
            "{}/{}?modules={}",
            QUOTE_SUMMARY_URL,
            urlencoding::encode(symbol),
            urlencoding::encode(modules)
        );

        let json = retry_with_backoff(|| self.fetch_json(&url), MAX_ATTEMPTS).await?;

        json.pointer("/quoteSummary/result/0")
            .cloned()
            .ok_or_else(|| DataError::no_data(symbol, "empty quoteSummary result"))
    }
}

#[async_trait]
impl FinancialDataProvider for YahooFinanceClient {
    async fn company_profile(&self, symbol: &str) -> DataResult<CompanyProfile> {
        let result = self.quote_summary(symbol, "assetProfile,price").await?;
        Ok(parse_profile(symbol, &result))
    }

    async fn key_metrics(&self, symbol: &str) -> DataResult<KeyMetrics> {
        let result = self
            .quote_summary(symbol, "summaryDetail,defaultKeyStatistics,financialData")
            .await?;
        Ok(parse_key_metrics(symbol, &result))
    }

    async fn income_statement(&self, symbol: &str, limit: usize) -> DataResult<FinancialStatement> {
        let result = self.quote_summary(symbol, "incomeStatementHistory").await?;
        parse_statement(symbol, StatementKind::Income, &result, limit)
    }

    async fn balance_sheet(&self, symbol: &str, limit: usize) -> DataResult<FinancialStatement> {
        let result = self.quote_summary(symbol, "balanceSheetHistory").await?;
        parse_statement(symbol, StatementKind::Balance, &result, limit)
    }

    async fn cash_flow(&self, symbol: &str, limit: usize) -> DataResult<FinancialStatement> {
        let result = self.quote_summary(symbol, "cashflowStatementHistory").await?;
        parse_statement(symbol, StatementKind::CashFlow, &result, limit)
    }

    async fn price_history(&self, symbol: &str, days: u32) -> DataResult<Vec<OhlcvBar>> {
        validation::validate_symbol(symbol)?;
        let url = format!(
            "{}/{}?range={}d&interval=1d",
            CHART_URL,
            urlencoding::encode(symbol),
            days
        );

        let json = retry_with_backoff(|| self.fetch_json(&url), MAX_ATTEMPTS).await?;
        parse_chart(symbol, &json)
    }

    async fn news(&self, symbol: &str) -> DataResult<Vec<NewsStory>> {
        validation::validate_symbol(symbol)?;
        let url = format!(
            "{}?q={}&newsCount=12&quotesCount=0",
            SEARCH_URL,
            urlencoding::encode(symbol)
        );

        let json = retry_with_backoff(|| self.fetch_json(&url), MAX_ATTEMPTS).await?;
        Ok(parse_news(&json))
    }

    async fn analyst_recommendations(&self, symbol: &str) -> DataResult<AnalystConsensus> {
        let result = self.quote_summary(symbol, "financialData").await?;
        Ok(parse_analyst(symbol, &result))
    }

    async fn insider_trades(&self, symbol: &str) -> DataResult<InsiderActivity> {
        let result = self.quote_summary(symbol, "insiderTransactions").await?;
        Ok(parse_insider(symbol, &result))
    }

    fn name(&self) -> &str {
        "yahoo-finance"
    }
}

/// Yahoo wraps numbers as {"raw": 1.23, "fmt": "1.23"}; accept both that
/// shape and a plain number.
fn raw_f64(value: &Value) -> Option<f64> {
    value
        .get("raw")
        .and_then(Value::as_f64)
        .or_else(|| value.as_f64())
}

fn raw_i64(value: &Value) -> Option<i64> {
    value
        .get("raw")
        .and_then(Value::as_i64)
        .or_else(|| value.as_i64())
}

fn field_str(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or("N/A")
        .to_string()
}

fn parse_profile(symbol: &str, result: &Value) -> CompanyProfile {
    let profile = result.get("assetProfile").cloned().unwrap_or(Value::Null);
    let price = result.get("price").cloned().unwrap_or(Value::Null);

    CompanyProfile {
        symbol: symbol.to_uppercase(),
        name: price
            .get("longName")
            .or_else(|| price.get("shortName"))
            .and_then(Value::as_str)
            .unwrap_or("N/A")
            .to_string(),
        sector: field_str(&profile, "sector"),
        industry: field_str(&profile, "industry"),
        description: field_str(&profile, "longBusinessSummary"),
        market_cap: price.get("marketCap").and_then(raw_f64),
        employees: profile.get("fullTimeEmployees").and_then(raw_i64),
        website: field_str(&profile, "website"),
        exchange: field_str(&price, "exchangeName"),
        country: field_str(&profile, "country"),
    }
}

fn parse_key_metrics(symbol: &str, result: &Value) -> KeyMetrics {
    let detail = result.get("summaryDetail").cloned().unwrap_or(Value::Null);
    let stats = result
        .get("defaultKeyStatistics")
        .cloned()
        .unwrap_or(Value::Null);
    let financial = result.get("financialData").cloned().unwrap_or(Value::Null);

    let metric = |v: &Value, key: &str| v.get(key).and_then(raw_f64);

    KeyMetrics {
        symbol: symbol.to_uppercase(),
        price: metric(&financial, "currentPrice").or_else(|| metric(&detail, "previousClose")),
        pe_trailing: metric(&detail, "trailingPE"),
        pe_forward: metric(&stats, "forwardPE"),
        peg_ratio: metric(&stats, "pegRatio"),
        price_to_book: metric(&stats, "priceToBook"),
        price_to_sales: metric(&detail, "priceToSalesTrailing12Months"),
        ev_to_ebitda: metric(&stats, "enterpriseToEbitda"),
        beta: metric(&detail, "beta"),
        week_52_low: metric(&detail, "fiftyTwoWeekLow"),
        week_52_high: metric(&detail, "fiftyTwoWeekHigh"),
        dividend_yield: metric(&detail, "dividendYield"),
        gross_margin: metric(&financial, "grossMargins"),
        operating_margin: metric(&financial, "operatingMargins"),
        profit_margin: metric(&financial, "profitMargins"),
        return_on_equity: metric(&financial, "returnOnEquity"),
        return_on_assets: metric(&financial, "returnOnAssets"),
        debt_to_equity: metric(&financial, "debtToEquity"),
        current_ratio: metric(&financial, "currentRatio"),
        revenue_growth: metric(&financial, "revenueGrowth"),
        earnings_growth: metric(&financial, "earningsGrowth"),
    }
}

fn statement_line_items(kind: StatementKind) -> &'static [(&'static str, &'static str)] {
    match kind {
        StatementKind::Income => &[
            ("totalRevenue", "Total Revenue"),
            ("costOfRevenue", "Cost Of Revenue"),
            ("grossProfit", "Gross Profit"),
            ("operatingIncome", "Operating Income"),
            ("netIncome", "Net Income"),
        ],
        StatementKind::Balance => &[
            ("totalAssets", "Total Assets"),
            ("totalLiab", "Total Liabilities"),
            ("totalStockholderEquity", "Stockholders Equity"),
            ("cash", "Cash And Equivalents"),
            ("longTermDebt", "Long Term Debt"),
        ],
        StatementKind::CashFlow => &[
            ("totalCashFromOperatingActivities", "Operating Cash Flow"),
            ("capitalExpenditures", "Capital Expenditure"),
            ("dividendsPaid", "Dividends Paid"),
            ("changeInCash", "Change In Cash"),
        ],
    }
}

fn statement_entries<'a>(kind: StatementKind, result: &'a Value) -> Option<&'a Vec<Value>> {
    let pointer = match kind {
        StatementKind::Income => "/incomeStatementHistory/incomeStatementHistory",
        StatementKind::Balance => "/balanceSheetHistory/balanceSheetStatements",
        StatementKind::CashFlow => "/cashflowStatementHistory/cashflowStatements",
    };
    result.pointer(pointer).and_then(Value::as_array)
}

fn parse_statement(
    symbol: &str,
    kind: StatementKind,
    result: &Value,
    limit: usize,
) -> DataResult<FinancialStatement> {
    let entries = statement_entries(kind, result)
        .ok_or_else(|| DataError::no_data(symbol, "statement history missing from response"))?;

    let entries: Vec<&Value> = entries.iter().take(limit.max(1)).collect();
    if entries.is_empty() {
        return Err(DataError::no_data(symbol, "no statement periods reported"));
    }

    let periods: Vec<String> = entries
        .iter()
        .map(|e| {
            e.pointer("/endDate/fmt")
                .and_then(Value::as_str)
                .unwrap_or("N/A")
                .to_string()
        })
        .collect();

    let rows = statement_line_items(kind)
        .iter()
        .map(|(key, label)| StatementRow {
            label: (*label).to_string(),
            values: entries.iter().map(|e| e.get(*key).and_then(raw_f64)).collect(),
        })
        .collect();

    Ok(FinancialStatement {
        symbol: symbol.to_uppercase(),
        kind,
        periods,
        rows,
    })
}

fn parse_chart(symbol: &str, json: &Value) -> DataResult<Vec<OhlcvBar>> {
    let result = json
        .pointer("/chart/result/0")
        .ok_or_else(|| DataError::no_data(symbol, "empty chart result"))?;

    let timestamps = result
        .get("timestamp")
        .and_then(Value::as_array)
        .ok_or_else(|| DataError::no_data(symbol, "chart has no timestamps"))?;

    let quote = result
        .pointer("/indicators/quote/0")
        .ok_or_else(|| DataError::parse_error("chart has no quote block"))?;
    let adjclose = result.pointer("/indicators/adjclose/0/adjclose");

    let series = |key: &str| -> Vec<Option<f64>> {
        quote
            .get(key)
            .and_then(Value::as_array)
            .map(|arr| arr.iter().map(Value::as_f64).collect())
            .unwrap_or_default()
    };

    let opens = series("open");
    let highs = series("high");
    let lows = series("low");
    let closes = series("close");
    let volumes = series("volume");
    let adjusted: Vec<Option<f64>> = adjclose
        .and_then(Value::as_array)
        .map(|arr| arr.iter().map(Value::as_f64).collect())
        .unwrap_or_default();

    let mut bars = Vec::with_capacity(timestamps.len());
    for (i, ts) in timestamps.iter().enumerate() {
        let (Some(ts), Some(open), Some(high), Some(low), Some(close)) = (
            ts.as_i64(),
            opens.get(i).copied().flatten(),
            highs.get(i).copied().flatten(),
            lows.get(i).copied().flatten(),
            closes.get(i).copied().flatten(),
        ) else {
            // Market holidays come back as nulls; skip them
            continue;
        };

        let Some(date) = DateTime::from_timestamp(ts, 0).map(|dt| dt.date_naive()) else {
            continue;
        };

        bars.push(OhlcvBar {
            date,
            open,
            high,
            low,
            close,
            adj_close: adjusted.get(i).copied().flatten(),
            volume: volumes.get(i).copied().flatten().map(|v| v as i64).unwrap_or(0),
        });
    }

    if bars.is_empty() {
        return Err(DataError::no_data(symbol, "chart returned no usable bars"));
    }

    Ok(bars)
}

fn parse_news(json: &Value) -> Vec<NewsStory> {
    let Some(items) = json.get("news").and_then(Value::as_array) else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let title = item.get("title").and_then(Value::as_str)?.to_string();
            Some(NewsStory {
                title,
                summary: item
                    .get("summary")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string(),
                url: item.get("link").and_then(Value::as_str).map(String::from),
                source: item
                    .get("publisher")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown")
                    .to_string(),
                published_at: item
                    .get("providerPublishTime")
                    .and_then(Value::as_i64)
                    .and_then(|ts| DateTime::from_timestamp(ts, 0)),
            })
        })
        .collect()
}

fn parse_analyst(symbol: &str, result: &Value) -> AnalystConsensus {
    let financial = result.get("financialData").cloned().unwrap_or(Value::Null);

    AnalystConsensus {
        symbol: symbol.to_uppercase(),
        recommendation_key: financial
            .get("recommendationKey")
            .and_then(Value::as_str)
            .map(String::from),
        analyst_count: financial.get("numberOfAnalystOpinions").and_then(raw_i64),
        target_mean: financial.get("targetMeanPrice").and_then(raw_f64),
        target_low: financial.get("targetLowPrice").and_then(raw_f64),
        target_high: financial.get("targetHighPrice").and_then(raw_f64),
    }
}

fn parse_insider(symbol: &str, result: &Value) -> InsiderActivity {
    let trades = result
        .pointer("/insiderTransactions/transactions")
        .and_then(Value::as_array)
        .map(|transactions| {
            transactions
                .iter()
                .take(10)
                .map(|t| InsiderTrade {
                    date: t
                        .pointer("/startDate/fmt")
                        .and_then(Value::as_str)
                        .unwrap_or("N/A")
                        .to_string(),
                    insider: t
                        .get("filerName")
                        .and_then(Value::as_str)
                        .unwrap_or("N/A")
                        .to_string(),
                    transaction: t
                        .get("transactionText")
                        .and_then(Value::as_str)
                        .unwrap_or("N/A")
                        .to_string(),
                    shares: t.get("shares").and_then(raw_f64).unwrap_or(0.0),
                })
                .collect()
        })
        .unwrap_or_default();

    InsiderActivity {
        symbol: symbol.to_uppercase(),
        trades,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_chart_response() {
        let payload = json!({
            "chart": { "result": [{
                "timestamp": [1717372800i64, 1717459200i64, 1717545600i64],
                "indicators": {
                    "quote": [{
                        "open":   [100.0, 101.5, null],
                        "high":   [102.0, 103.0, null],
                        "low":    [99.0, 100.5, null],
                        "close":  [101.0, 102.5, null],
                        "volume": [1000000.0, 1200000.0, null]
                    }],
                    "adjclose": [{ "adjclose": [100.8, 102.3, null] }]
                }
            }]}
        });

        let bars = parse_chart("AAPL", &payload).expect("chart should parse");
        // Null row (holiday) is dropped
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].volume, 1_000_000);
        assert_eq!(bars[1].close, 102.5);
        assert_eq!(bars[1].adj_close, Some(102.3));
    }

    #[test]
    fn empty_chart_is_no_data() {
        let payload = json!({ "chart": { "result": [] } });
        assert!(matches!(
            parse_chart("AAPL", &payload),
            Err(DataError::NoData { .. })
        ));
    }

    #[test]
    fn parses_wrapped_and_plain_numbers() {
        assert_eq!(raw_f64(&json!({"raw": 1.5, "fmt": "1.50"})), Some(1.5));
        assert_eq!(raw_f64(&json!(2.25)), Some(2.25));
        assert_eq!(raw_f64(&json!("not a number")), None);
    }

    #[test]
    fn parses_profile() {
        let result = json!({
            "assetProfile": {
                "sector": "Technology",
                "industry": "Consumer Electronics",
                "longBusinessSummary": "Designs phones.",
                "fullTimeEmployees": 161000,
                "website": "https://example.com",
                "country": "United States"
            },
            "price": {
                "longName": "Apple Inc.",
                "marketCap": {"raw": 3.0e12},
                "exchangeName": "NasdaqGS"
            }
        });

        let profile = parse_profile("aapl", &result);
        assert_eq!(profile.symbol, "AAPL");
        assert_eq!(profile.name, "Apple Inc.");
        assert_eq!(profile.sector, "Technology");
        assert_eq!(profile.employees, Some(161000));
        assert_eq!(profile.market_cap, Some(3.0e12));
    }

    #[test]
    fn parses_income_statement_rows() {
        let result = json!({
            "incomeStatementHistory": { "incomeStatementHistory": [
                {
                    "endDate": {"raw": 1695945600i64, "fmt": "2023-09-30"},
                    "totalRevenue": {"raw": 383285000000.0},
                    "netIncome": {"raw": 96995000000.0}
                },
                {
                    "endDate": {"raw": 1664496000i64, "fmt": "2022-09-30"},
                    "totalRevenue": {"raw": 394328000000.0},
                    "netIncome": {"raw": 99803000000.0}
                }
            ]}
        });

        let statement = parse_statement("AAPL", StatementKind::Income, &result, 3)
            .expect("statement should parse");
        assert_eq!(statement.periods, vec!["2023-09-30", "2022-09-30"]);

        let revenue = statement
            .rows
            .iter()
            .find(|r| r.label == "Total Revenue")
            .expect("revenue row present");
        assert_eq!(revenue.values[0], Some(383285000000.0));
        assert_eq!(revenue.values.len(), 2);
    }

    #[test]
    fn parses_news_items() {
        let payload = json!({
            "news": [
                {
                    "title": "Apple unveils new chip",
                    "publisher": "Newswire",
                    "link": "https://example.com/a",
                    "providerPublishTime": 1717372800i64,
                    "summary": "A new chip."
                },
                { "publisher": "No title, dropped" }
            ]
        });

        let stories = parse_news(&payload);
        assert_eq!(stories.len(), 1);
        assert_eq!(stories[0].source, "Newswire");
        assert!(stories[0].published_at.is_some());
    }

    #[test]
    fn parses_analyst_consensus() {
        let result = json!({
            "financialData": {
                "recommendationKey": "buy",
                "numberOfAnalystOpinions": {"raw": 38},
                "targetMeanPrice": {"raw": 210.5},
                "targetLowPrice": {"raw": 160.0},
                "targetHighPrice": {"raw": 250.0}
            }
        });

        let consensus = parse_analyst("AAPL", &result);
        assert_eq!(consensus.recommendation_key.as_deref(), Some("buy"));
        assert_eq!(consensus.analyst_count, Some(38));
        assert_eq!(consensus.target_mean, Some(210.5));
    }
}
