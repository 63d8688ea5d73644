//! Deterministic prompt templates. Sections whose research step failed
//! are rendered as explicitly unavailable so the model never mistakes
//! missing data for a zero or neutral reading.

use crate::analysis;
use crate::data::{CompanyProfile, FinancialStatement, InsiderActivity, KeyMetrics};

use super::researcher::{ResearchBundle, StepOutcome};

pub const DISCLAIMER: &str =
    "*Disclaimer: AI-generated analysis for informational purposes only. Not financial advice.*";

/// Shared output contract so both the quick-advice and deep-research
/// responses parse identically.
const OUTPUT_FORMAT: &str = r#"## Required Output Format

### Summary
A brief 2-3 sentence executive summary of the current situation.

### Bull Case
Key reasons why the stock could perform well. Be specific about catalysts and timeframes.

### Bear Case
Key risks and reasons for caution. Include both company-specific and market risks.

### Recommendation
Your investment stance: **BUY**, **HOLD**, or **SELL** with a brief justification.

### Risk Score
Rate the overall risk on a scale of 1-10 where:
- 1-3: Low risk, stable company
- 4-6: Moderate risk, typical volatility
- 7-10: High risk, speculative

Format: RISK_SCORE: [number]

### Key Metrics to Watch
List 2-3 specific metrics or events investors should monitor."#;

/// Quick advice prompt: retrieved news context plus a recent market
/// summary.
pub fn advice_prompt(ticker: &str, context: &str, market_data: &str) -> String {
    format!(
        r#"You are a professional financial analyst providing investment insights based on recent news and market data.

## Recent News & Context
{context}

## Current Market Data for {ticker}
{market_data}

## Analysis Task
Based on the provided news context and market data for {ticker}, provide a comprehensive investment analysis.

Consider:
1. **News Sentiment**: What is the overall sentiment from recent news? Are there any material announcements?
2. **Price Action**: How has the stock been performing? Any notable patterns?
3. **Risk Factors**: What are the key risks to consider?
4. **Catalyst Events**: Are there upcoming earnings, product launches, or other catalysts?

{OUTPUT_FORMAT}

---
{DISCLAIMER}
"#
    )
}

/// Deep research prompt assembled from whatever bundle sections
/// succeeded.
pub fn research_prompt(bundle: &ResearchBundle) -> String {
    let symbol = &bundle.symbol;

    let overview = match &bundle.profile {
        StepOutcome::Succeeded(p) => {
            let description: String = p.description.chars().take(300).collect();
            format!(
                "Name: {}\nSector: {} | Industry: {}\nMarket Cap: {}\nExchange: {} | Country: {}\nDescription: {}",
                p.name,
                p.sector,
                p.industry,
                fmt_num(p.market_cap),
                p.exchange,
                p.country,
                description
            )
        }
        StepOutcome::Failed { detail, .. } => unavailable(detail),
    };

    let valuation = match &bundle.metrics {
        StepOutcome::Succeeded(m) => format!(
            "- Price: {}\n- P/E (TTM): {} | Forward P/E: {}\n- PEG Ratio: {}\n- P/B: {} | P/S: {}\n- EV/EBITDA: {}\n- Beta: {}\n- 52W Range: {} - {}\n- Dividend Yield: {}\n\nProfitability:\n- Gross Margin: {}\n- Operating Margin: {}\n- Profit Margin: {}\n- ROE: {}\n- ROA: {}\n\nFinancial Health:\n- Debt/Equity: {}\n- Current Ratio: {}\n- Revenue Growth: {}\n- Earnings Growth: {}",
            fmt_num(m.price),
            fmt_plain(m.pe_trailing),
            fmt_plain(m.pe_forward),
            fmt_plain(m.peg_ratio),
            fmt_plain(m.price_to_book),
            fmt_plain(m.price_to_sales),
            fmt_plain(m.ev_to_ebitda),
            fmt_plain(m.beta),
            fmt_num(m.week_52_low),
            fmt_num(m.week_52_high),
            fmt_pct(m.dividend_yield),
            fmt_pct(m.gross_margin),
            fmt_pct(m.operating_margin),
            fmt_pct(m.profit_margin),
            fmt_pct(m.return_on_equity),
            fmt_pct(m.return_on_assets),
            fmt_plain(m.debt_to_equity),
            fmt_plain(m.current_ratio),
            fmt_pct(m.revenue_growth),
            fmt_pct(m.earnings_growth),
        ),
        StepOutcome::Failed { detail, .. } => unavailable(detail),
    };

    let (income, balance, cash_flow) = match &bundle.statements {
        StepOutcome::Succeeded(s) => (
            format_statement(&s.income),
            format_statement(&s.balance),
            format_statement(&s.cash_flow),
        ),
        StepOutcome::Failed { detail, .. } => {
            let text = unavailable(detail);
            (text.clone(), text.clone(), text)
        }
    };

    let technical = match &bundle.technical {
        StepOutcome::Succeeded(snapshot) => analysis::summary(snapshot),
        StepOutcome::Failed { detail, .. } => unavailable(detail),
    };

    let news = match &bundle.news_context {
        StepOutcome::Succeeded(text) => text.clone(),
        StepOutcome::Failed { detail, .. } => unavailable(detail),
    };

    let analyst = match &bundle.analyst {
        StepOutcome::Succeeded(a) => format!(
            "Recommendation: {}\nNumber of Analysts: {}\nPrice Target (Mean): {}\nPrice Target Range: {} - {}\n\nInsider Activity:\n{}",
            a.consensus.recommendation_key.as_deref().unwrap_or("N/A"),
            a.consensus
                .analyst_count
                .map(|n| n.to_string())
                .unwrap_or_else(|| "N/A".to_string()),
            fmt_num(a.consensus.target_mean),
            fmt_num(a.consensus.target_low),
            fmt_num(a.consensus.target_high),
            format_insider(&a.insider),
        ),
        StepOutcome::Failed { detail, .. } => unavailable(detail),
    };

    let focus = if bundle.query.is_empty() {
        String::new()
    } else {
        format!("\n## Specific Research Focus\n{}\n", bundle.query)
    };

    format!(
        r#"You are a senior financial analyst conducting deep research on {symbol}.
Produce a comprehensive, data-driven investment research report. Sections
marked "Data not available" were not retrievable; do not treat them as
zero or neutral readings.

## Company Overview
{overview}

## Key Valuation Metrics
{valuation}

## Income Statement (Recent Periods)
{income}

## Balance Sheet (Recent Periods)
{balance}

## Cash Flow (Recent Periods)
{cash_flow}

## Technical Analysis
{technical}

## Recent News & Developments
{news}

## Analyst Consensus
{analyst}
{focus}
{OUTPUT_FORMAT}

---
{DISCLAIMER}
"#
    )
}

/// Per-ticker data gathered for a side-by-side comparison. Sections that
/// could not be fetched stay None and render as unavailable.
#[derive(Debug, Clone)]
pub struct ComparisonEntry {
    pub symbol: String,
    pub profile: Option<CompanyProfile>,
    pub metrics: Option<KeyMetrics>,
    pub technical: Option<String>,
}

/// Side-by-side comparison prompt for two or more tickers.
pub fn comparison_prompt(entries: &[ComparisonEntry], query: Option<&str>) -> String {
    let tickers: Vec<&str> = entries.iter().map(|e| e.symbol.as_str()).collect();
    let tickers = tickers.join(" vs ");

    let sections: Vec<String> = entries
        .iter()
        .map(|entry| {
            let header = match &entry.profile {
                Some(p) => format!(
                    "### {} - {}\nSector: {} | Industry: {}\nMarket Cap: {}",
                    entry.symbol,
                    p.name,
                    p.sector,
                    p.industry,
                    fmt_num(p.market_cap)
                ),
                None => format!("### {}\nProfile data not available.", entry.symbol),
            };

            let metrics = match &entry.metrics {
                Some(m) => format!(
                    "Price: {} | P/E: {} | P/B: {}\nGross Margin: {} | Operating Margin: {}\nROE: {} | Revenue Growth: {}\nDebt/Equity: {} | Beta: {} | Dividend Yield: {}",
                    fmt_num(m.price),
                    fmt_plain(m.pe_trailing),
                    fmt_plain(m.price_to_book),
                    fmt_pct(m.gross_margin),
                    fmt_pct(m.operating_margin),
                    fmt_pct(m.return_on_equity),
                    fmt_pct(m.revenue_growth),
                    fmt_plain(m.debt_to_equity),
                    fmt_plain(m.beta),
                    fmt_pct(m.dividend_yield),
                ),
                None => "Valuation data not available.".to_string(),
            };

            let technical = entry
                .technical
                .as_deref()
                .unwrap_or("Technical data not available.");

            format!("{header}\n{metrics}\n\nTechnical Summary:\n{technical}\n")
        })
        .collect();
    let sections = sections.join("\n");

    let focus = match query {
        Some(query) => format!("\n## Specific Comparison Focus\n{query}\n"),
        None => String::new(),
    };

    format!(
        r#"You are a senior financial analyst comparing {tickers}.

## Company Data
{sections}
{focus}
## Required Output
Provide a side-by-side comparison:

### Overview Comparison Table
Create a comparison table of key metrics.

### Valuation Comparison
Which is more attractively valued and why?

### Growth Comparison
Which has stronger growth prospects?

### Risk Comparison
Which carries more risk and why?

### Recommendation
Which stock is the better investment right now and why?
Provide clear reasoning with specific data points.

---
{DISCLAIMER}
"#
    )
}

fn unavailable(detail: &str) -> String {
    format!("Data not available ({detail}).")
}

fn format_statement(statement: &FinancialStatement) -> String {
    if statement.rows.is_empty() {
        return "Data not available.".to_string();
    }

    statement
        .rows
        .iter()
        .map(|row| {
            let values: Vec<String> = statement
                .periods
                .iter()
                .zip(&row.values)
                .map(|(period, value)| format!("{}: {}", period, fmt_num(*value)))
                .collect();
            format!("- {}: {}", row.label, values.join(" | "))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_insider(insider: &InsiderActivity) -> String {
    if insider.trades.is_empty() {
        return "No insider trades data available.".to_string();
    }

    insider
        .trades
        .iter()
        .take(10)
        .map(|t| {
            format!(
                "- {}: {} - {} - {:.0} shares",
                t.date, t.insider, t.transaction, t.shares
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Format a dollar amount with a magnitude suffix
pub fn fmt_num(value: Option<f64>) -> String {
    let Some(value) = value else {
        return "N/A".to_string();
    };
    let abs = value.abs();
    if abs >= 1e12 {
        format!("${:.2}T", value / 1e12)
    } else if abs >= 1e9 {
        format!("${:.2}B", value / 1e9)
    } else if abs >= 1e6 {
        format!("${:.2}M", value / 1e6)
    } else if abs >= 1e3 {
        format!("${:.1}K", value / 1e3)
    } else {
        format!("${value:.2}")
    }
}

/// Format a fraction as a percentage
pub fn fmt_pct(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.2}%", v * 100.0),
        None => "N/A".to_string(),
    }
}

/// Format a plain ratio
pub fn fmt_plain(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:.2}"),
        None => "N/A".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisor::researcher::{FailureKind, StepOutcome};
    use crate::data::CompanyProfile;

    fn empty_bundle(symbol: &str) -> ResearchBundle {
        fn failed<T>() -> StepOutcome<T> {
            StepOutcome::Failed {
                kind: FailureKind::Provider,
                detail: "endpoint offline".to_string(),
            }
        }
        ResearchBundle {
            symbol: symbol.to_string(),
            query: String::new(),
            profile: failed(),
            metrics: failed(),
            statements: failed(),
            technical: failed(),
            news_context: failed(),
            analyst: failed(),
        }
    }

    #[test]
    fn number_formatting_uses_magnitude_suffixes() {
        assert_eq!(fmt_num(Some(3.2e12)), "$3.20T");
        assert_eq!(fmt_num(Some(1.5e9)), "$1.50B");
        assert_eq!(fmt_num(Some(2.5e6)), "$2.50M");
        assert_eq!(fmt_num(Some(1234.0)), "$1.2K");
        assert_eq!(fmt_num(Some(42.5)), "$42.50");
        assert_eq!(fmt_num(None), "N/A");
    }

    #[test]
    fn percentages_render_from_fractions() {
        assert_eq!(fmt_pct(Some(0.245)), "24.50%");
        assert_eq!(fmt_pct(None), "N/A");
    }

    #[test]
    fn failed_sections_are_marked_unavailable() {
        let prompt = research_prompt(&empty_bundle("AAPL"));
        assert!(prompt.contains("Data not available (endpoint offline)."));
        assert!(prompt.contains("do not treat them as"));
    }

    #[test]
    fn succeeded_profile_is_rendered() {
        let mut bundle = empty_bundle("AAPL");
        bundle.profile = StepOutcome::Succeeded(CompanyProfile {
            symbol: "AAPL".to_string(),
            name: "Apple Inc.".to_string(),
            sector: "Technology".to_string(),
            industry: "Consumer Electronics".to_string(),
            description: "Designs smartphones.".to_string(),
            market_cap: Some(3.0e12),
            employees: Some(161_000),
            website: "https://apple.com".to_string(),
            exchange: "NasdaqGS".to_string(),
            country: "United States".to_string(),
        });

        let prompt = research_prompt(&bundle);
        assert!(prompt.contains("Apple Inc."));
        assert!(prompt.contains("$3.00T"));
        assert!(prompt.contains("RISK_SCORE"));
    }

    #[test]
    fn advice_prompt_embeds_context_and_market_data() {
        let prompt = advice_prompt("NVDA", "[1] (Newswire, 2025): chip demand", "Close: $900");
        assert!(prompt.contains("chip demand"));
        assert!(prompt.contains("Close: $900"));
        assert!(prompt.contains("**BUY**, **HOLD**, or **SELL**"));
    }
}
