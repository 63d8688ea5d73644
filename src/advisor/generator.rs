//! Advice synthesis: render the prompt, invoke the LLM once, parse the
//! structured fields out of the response and append the result to the
//! advice history.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::llm::{CompletionProvider, LlmError};

use super::prompts;
use super::researcher::ResearchBundle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recommendation {
    Buy,
    Hold,
    Sell,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::Buy => "BUY",
            Recommendation::Hold => "HOLD",
            Recommendation::Sell => "SELL",
        }
    }
}

/// Parse failures ("the model answered badly") are distinct from LLM
/// transport failures ("the model did not answer").
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("llm call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("could not parse structured advice: {0}")]
    Parse(String),

    #[error("failed to persist advice record: {0}")]
    Persist(#[source] sqlx::Error),
}

/// Persisted output of one synthesis call. Append-only; never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdviceRecord {
    pub id: Option<i64>,
    pub ticker: String,
    pub query: String,
    pub context_summary: Option<String>,
    pub advice: String,
    pub recommendation: Recommendation,
    pub risk_score: i32,
    pub model: String,
    pub created_at: DateTime<Utc>,
}

pub struct Synthesizer {
    llm: Arc<dyn CompletionProvider>,
    /// History is persisted when a pool is available; in degraded mode
    /// the record is still produced and displayed.
    pool: Option<PgPool>,
}

impl Synthesizer {
    pub fn new(llm: Arc<dyn CompletionProvider>, pool: Option<PgPool>) -> Self {
        Self { llm, pool }
    }

    /// Synthesize a deep-research report from a bundle.
    pub async fn synthesize(&self, bundle: &ResearchBundle) -> Result<AdviceRecord, SynthesisError> {
        let prompt = prompts::research_prompt(bundle);
        let context_summary = bundle
            .news_context
            .as_succeeded()
            .map(|text| text.chars().take(500).collect());

        self.run(&bundle.symbol, &bundle.query, context_summary, &prompt)
            .await
    }

    /// Quick advice from retrieved context and a market summary, without
    /// the full research fan-out.
    pub async fn quick_advice(
        &self,
        ticker: &str,
        query: &str,
        context: &str,
        market_summary: &str,
    ) -> Result<AdviceRecord, SynthesisError> {
        let prompt = prompts::advice_prompt(ticker, context, market_summary);
        let context_summary = Some(context.chars().take(500).collect());
        self.run(ticker, query, context_summary, &prompt).await
    }

    async fn run(
        &self,
        ticker: &str,
        query: &str,
        context_summary: Option<String>,
        prompt: &str,
    ) -> Result<AdviceRecord, SynthesisError> {
        let completion = self.llm.complete(prompt).await?;
        let (recommendation, risk_score) = parse_structured_fields(&completion.content)?;

        let mut record = AdviceRecord {
            id: None,
            ticker: ticker.to_uppercase(),
            query: query.to_string(),
            context_summary,
            advice: completion.content,
            recommendation,
            risk_score,
            model: completion.model,
            created_at: Utc::now(),
        };

        if let Some(pool) = &self.pool {
            record.id = Some(persist(pool, &record).await?);
            info!(
                "Stored advice record {:?} for {} ({})",
                record.id,
                record.ticker,
                record.recommendation.as_str()
            );
        } else {
            warn!("No database available; advice record not persisted");
        }

        Ok(record)
    }
}

/// Extract the recommendation and risk score from the response text.
/// Missing or malformed fields are a parse error so callers can tell a
/// bad answer apart from no answer.
fn parse_structured_fields(advice: &str) -> Result<(Recommendation, i32), SynthesisError> {
    let recommendation = extract_recommendation(advice).ok_or_else(|| {
        SynthesisError::Parse("no BUY/HOLD/SELL recommendation found in response".to_string())
    })?;

    let risk_score = extract_risk_score(advice).ok_or_else(|| {
        SynthesisError::Parse("no RISK_SCORE field found in response".to_string())
    })?;

    let upper = advice.to_uppercase();
    if !upper.contains("BULL CASE") || !upper.contains("BEAR CASE") {
        return Err(SynthesisError::Parse(
            "response is missing the bull/bear case sections".to_string(),
        ));
    }

    Ok((recommendation, risk_score))
}

fn extract_recommendation(advice: &str) -> Option<Recommendation> {
    let upper = advice.to_uppercase();
    for (marker, recommendation) in [
        ("**BUY**", Recommendation::Buy),
        ("RECOMMENDATION: BUY", Recommendation::Buy),
        ("**SELL**", Recommendation::Sell),
        ("RECOMMENDATION: SELL", Recommendation::Sell),
        ("**HOLD**", Recommendation::Hold),
        ("RECOMMENDATION: HOLD", Recommendation::Hold),
    ] {
        if upper.contains(marker) {
            return Some(recommendation);
        }
    }
    None
}

fn extract_risk_score(advice: &str) -> Option<i32> {
    // Regex is static and known-valid
    let pattern = Regex::new(r"RISK_SCORE:\s*\[?(\d+)\]?").ok()?;
    let captures = pattern.captures(advice)?;
    let score: i32 = captures.get(1)?.as_str().parse().ok()?;
    Some(score.clamp(1, 10))
}

async fn persist(pool: &PgPool, record: &AdviceRecord) -> Result<i64, SynthesisError> {
    let row = sqlx::query(
        r#"
        INSERT INTO advice_history
            (ticker_symbol, query, context_summary, advice, recommendation, risk_score, model_used)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING id
        "#,
    )
    .bind(&record.ticker)
    .bind(&record.query)
    .bind(&record.context_summary)
    .bind(&record.advice)
    .bind(record.recommendation.as_str())
    .bind(record.risk_score)
    .bind(&record.model)
    .fetch_one(pool)
    .await
    .map_err(SynthesisError::Persist)?;

    Ok(row.get::<i64, _>("id"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const WELL_FORMED: &str = r#"### Summary
Solid quarter.

### Bull Case
Services growth is accelerating.

### Bear Case
Hardware demand is softening.

### Recommendation
**BUY** - momentum and margins support upside.

### Risk Score
RISK_SCORE: 4
"#;

    #[test]
    fn parses_well_formed_response() {
        let (recommendation, risk) =
            parse_structured_fields(WELL_FORMED).expect("response should parse");
        assert_eq!(recommendation, Recommendation::Buy);
        assert_eq!(risk, 4);
    }

    #[test]
    fn recommendation_marker_variants() {
        assert_eq!(
            extract_recommendation("Recommendation: SELL based on valuation"),
            Some(Recommendation::Sell)
        );
        assert_eq!(
            extract_recommendation("We rate this **hold** for now"),
            Some(Recommendation::Hold)
        );
        assert_eq!(extract_recommendation("no stance given"), None);
    }

    #[test]
    fn risk_score_is_clamped() {
        assert_eq!(extract_risk_score("RISK_SCORE: 7"), Some(7));
        assert_eq!(extract_risk_score("RISK_SCORE: [3]"), Some(3));
        assert_eq!(extract_risk_score("RISK_SCORE: 99"), Some(10));
        assert_eq!(extract_risk_score("RISK_SCORE: 0"), Some(1));
        assert_eq!(extract_risk_score("no score"), None);
    }

    #[test]
    fn unstructured_response_is_a_parse_error() {
        let result = parse_structured_fields("The stock seems fine, probably.");
        assert!(matches!(result, Err(SynthesisError::Parse(_))));
    }

    #[test]
    fn missing_risk_score_is_a_parse_error() {
        let result = parse_structured_fields(
            "### Bull Case\ngrowth\n### Bear Case\nrisk\n**BUY** it",
        );
        assert!(matches!(result, Err(SynthesisError::Parse(_))));
    }

    #[test]
    fn missing_bull_bear_sections_is_a_parse_error() {
        let result = parse_structured_fields("**BUY**\nRISK_SCORE: 5");
        assert!(matches!(result, Err(SynthesisError::Parse(_))));
    }
}
