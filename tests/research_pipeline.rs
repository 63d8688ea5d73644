//! Research pipeline tests with stubbed provider, context source and LLM.
//! No network, database or model download required.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use invest_advisor::advisor::{
    FailureKind, ResearchOrchestrator, StepOutcome, SynthesisError, Synthesizer,
};
use invest_advisor::data::{
    AnalystConsensus, CompanyProfile, DataError, DataResult, FinancialDataProvider,
    FinancialStatement, InsiderActivity, InsiderTrade, KeyMetrics, NewsStory, OhlcvBar,
    StatementKind, StatementRow,
};
use invest_advisor::llm::{Completion, CompletionProvider, LlmError};
use invest_advisor::rag::{ContextSource, RagError};

/// Provider stub with selectively failing endpoints
struct StubProvider {
    fail: HashSet<&'static str>,
    slow: HashSet<&'static str>,
}

impl StubProvider {
    fn healthy() -> Self {
        Self {
            fail: HashSet::new(),
            slow: HashSet::new(),
        }
    }

    fn failing(endpoints: &[&'static str]) -> Self {
        Self {
            fail: endpoints.iter().copied().collect(),
            slow: HashSet::new(),
        }
    }

    fn slow_on(endpoint: &'static str) -> Self {
        Self {
            fail: HashSet::new(),
            slow: [endpoint].into_iter().collect(),
        }
    }

    async fn gate(&self, endpoint: &'static str) -> DataResult<()> {
        if self.slow.contains(endpoint) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.fail.contains(endpoint) {
            return Err(DataError::api_error(503, format!("{endpoint} offline")));
        }
        Ok(())
    }
}

fn rising_bars(n: usize) -> Vec<OhlcvBar> {
    (0..n)
        .map(|i| OhlcvBar {
            date: NaiveDate::from_ymd_opt(2025, 1, 1)
                .expect("valid date")
                .checked_add_days(chrono::Days::new(i as u64))
                .expect("valid date"),
            open: 100.0 + i as f64,
            high: 101.5 + i as f64,
            low: 99.0 + i as f64,
            close: 101.0 + i as f64,
            adj_close: None,
            volume: 2_000_000,
        })
        .collect()
}

fn stub_statement(kind: StatementKind) -> FinancialStatement {
    FinancialStatement {
        symbol: "AAPL".to_string(),
        kind,
        periods: vec!["2024-09-30".to_string(), "2023-09-30".to_string()],
        rows: vec![StatementRow {
            label: "Total Revenue".to_string(),
            values: vec![Some(391.0e9), Some(383.0e9)],
        }],
    }
}

#[async_trait]
impl FinancialDataProvider for StubProvider {
    async fn company_profile(&self, symbol: &str) -> DataResult<CompanyProfile> {
        self.gate("profile").await?;
        Ok(CompanyProfile {
            symbol: symbol.to_string(),
            name: "Apple Inc.".to_string(),
            sector: "Technology".to_string(),
            industry: "Consumer Electronics".to_string(),
            description: "Designs smartphones and services.".to_string(),
            market_cap: Some(3.0e12),
            employees: Some(161_000),
            website: "https://apple.com".to_string(),
            exchange: "NasdaqGS".to_string(),
            country: "United States".to_string(),
        })
    }

    async fn key_metrics(&self, symbol: &str) -> DataResult<KeyMetrics> {
        self.gate("metrics").await?;
        Ok(KeyMetrics {
            symbol: symbol.to_string(),
            price: Some(210.0),
            pe_trailing: Some(32.0),
            gross_margin: Some(0.45),
            ..KeyMetrics::default()
        })
    }

    async fn income_statement(&self, _symbol: &str, _limit: usize) -> DataResult<FinancialStatement> {
        self.gate("income").await?;
        Ok(stub_statement(StatementKind::Income))
    }

    async fn balance_sheet(&self, _symbol: &str, _limit: usize) -> DataResult<FinancialStatement> {
        self.gate("balance").await?;
        Ok(stub_statement(StatementKind::Balance))
    }

    async fn cash_flow(&self, _symbol: &str, _limit: usize) -> DataResult<FinancialStatement> {
        self.gate("cashflow").await?;
        Ok(stub_statement(StatementKind::CashFlow))
    }

    async fn price_history(&self, _symbol: &str, _days: u32) -> DataResult<Vec<OhlcvBar>> {
        self.gate("prices").await?;
        Ok(rising_bars(60))
    }

    async fn news(&self, _symbol: &str) -> DataResult<Vec<NewsStory>> {
        self.gate("news").await?;
        Ok(Vec::new())
    }

    async fn analyst_recommendations(&self, symbol: &str) -> DataResult<AnalystConsensus> {
        self.gate("analyst").await?;
        Ok(AnalystConsensus {
            symbol: symbol.to_string(),
            recommendation_key: Some("buy".to_string()),
            analyst_count: Some(38),
            target_mean: Some(235.0),
            target_low: Some(180.0),
            target_high: Some(280.0),
        })
    }

    async fn insider_trades(&self, symbol: &str) -> DataResult<InsiderActivity> {
        self.gate("insider").await?;
        Ok(InsiderActivity {
            symbol: symbol.to_string(),
            trades: vec![InsiderTrade {
                date: "2025-05-01".to_string(),
                insider: "COOK TIMOTHY".to_string(),
                transaction: "Sale".to_string(),
                shares: 50_000.0,
            }],
        })
    }

    fn name(&self) -> &str {
        "stub"
    }
}

struct StubContext;

#[async_trait]
impl ContextSource for StubContext {
    async fn context_for_ticker(&self, _ticker: &str, _query: &str) -> Result<String, RagError> {
        Ok("[1] (Newswire, 2025-06-01): Apple unveils new AI chip for data centers.".to_string())
    }
}

struct FailingContext;

#[async_trait]
impl ContextSource for FailingContext {
    async fn context_for_ticker(&self, _ticker: &str, _query: &str) -> Result<String, RagError> {
        Err(RagError::StoreUnavailable("connection refused".to_string()))
    }
}

const WELL_FORMED_REPORT: &str = r#"### Summary
Apple remains a high-quality compounder.

### Bull Case
Services revenue and AI chip demand keep growing.

### Bear Case
Hardware cycle is maturing and multiples are stretched.

### Recommendation
**BUY** with medium conviction over 6-12 months.

### Risk Score
RISK_SCORE: 4

### Key Metrics to Watch
- Services growth rate
- Gross margin trend
"#;

enum StubLlmMode {
    WellFormed,
    Unstructured,
    Timeout,
}

struct StubLlm {
    mode: StubLlmMode,
}

#[async_trait]
impl CompletionProvider for StubLlm {
    async fn complete(&self, _prompt: &str) -> Result<Completion, LlmError> {
        match self.mode {
            StubLlmMode::WellFormed => Ok(Completion {
                content: WELL_FORMED_REPORT.to_string(),
                model: "stub-model".to_string(),
            }),
            StubLlmMode::Unstructured => Ok(Completion {
                content: "It will probably go up, or maybe down.".to_string(),
                model: "stub-model".to_string(),
            }),
            StubLlmMode::Timeout => Err(LlmError::Timeout { timeout_seconds: 60 }),
        }
    }

    fn model(&self) -> &str {
        "stub-model"
    }
}

fn orchestrator(provider: StubProvider, context: bool) -> ResearchOrchestrator {
    let context: Option<Arc<dyn ContextSource>> = if context {
        Some(Arc::new(StubContext))
    } else {
        None
    };
    ResearchOrchestrator::new(Arc::new(provider), context, Duration::from_secs(30))
}

#[tokio::test]
async fn all_steps_succeed_and_synthesize() {
    let bundle = orchestrator(StubProvider::healthy(), true)
        .research("aapl", None)
        .await
        .expect("research should succeed");

    assert_eq!(bundle.symbol, "AAPL");
    assert_eq!(bundle.succeeded_steps(), 6);
    assert!(bundle.failures().is_empty());

    let technical = bundle.technical.as_succeeded().expect("technical step");
    assert_eq!(technical.rsi_14, Some(100.0));

    let synthesizer = Synthesizer::new(
        Arc::new(StubLlm {
            mode: StubLlmMode::WellFormed,
        }),
        None,
    );
    let record = synthesizer.synthesize(&bundle).await.expect("synthesis");
    assert_eq!(record.ticker, "AAPL");
    assert_eq!(record.recommendation.as_str(), "BUY");
    assert_eq!(record.risk_score, 4);
    assert_eq!(record.model, "stub-model");
}

#[tokio::test]
async fn single_failed_step_does_not_stop_the_run() {
    let bundle = orchestrator(StubProvider::failing(&["profile"]), true)
        .research("AAPL", None)
        .await
        .expect("research should still succeed");

    assert_eq!(bundle.succeeded_steps(), 5);
    let failures = bundle.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, "company profile");
    assert!(failures[0].1.contains("profile offline"));

    match &bundle.profile {
        StepOutcome::Failed { kind, .. } => assert_eq!(*kind, FailureKind::Provider),
        StepOutcome::Succeeded(_) => panic!("profile step should have failed"),
    }

    // A partial bundle still synthesizes into an advice record
    let synthesizer = Synthesizer::new(
        Arc::new(StubLlm {
            mode: StubLlmMode::WellFormed,
        }),
        None,
    );
    let record = synthesizer.synthesize(&bundle).await.expect("synthesis");
    assert_eq!(record.recommendation.as_str(), "BUY");
}

#[tokio::test]
async fn failed_sections_are_marked_in_the_prompt() {
    let bundle = orchestrator(StubProvider::failing(&["metrics"]), true)
        .research("AAPL", None)
        .await
        .expect("research should succeed");

    let prompt = invest_advisor::advisor::prompts::research_prompt(&bundle);
    assert!(prompt.contains("Data not available"));
    assert!(prompt.contains("metrics offline"));
    // Succeeded sections still render real data
    assert!(prompt.contains("Apple Inc."));
}

#[tokio::test]
async fn zero_successful_steps_is_a_hard_failure() {
    let provider = StubProvider::failing(&[
        "profile", "metrics", "income", "balance", "cashflow", "prices", "analyst", "insider",
    ]);
    let result = orchestrator(provider, false).research("AAPL", None).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn missing_vector_store_degrades_only_the_news_step() {
    let bundle = orchestrator(StubProvider::healthy(), false)
        .research("AAPL", None)
        .await
        .expect("research should succeed");

    assert_eq!(bundle.succeeded_steps(), 5);
    match &bundle.news_context {
        StepOutcome::Failed { kind, .. } => assert_eq!(*kind, FailureKind::Store),
        StepOutcome::Succeeded(_) => panic!("news step should be degraded"),
    }
}

#[tokio::test]
async fn unreachable_store_is_recorded_as_store_failure() {
    let orchestrator = ResearchOrchestrator::new(
        Arc::new(StubProvider::healthy()),
        Some(Arc::new(FailingContext)),
        Duration::from_secs(30),
    );
    let bundle = orchestrator
        .research("AAPL", None)
        .await
        .expect("research should succeed");

    match &bundle.news_context {
        StepOutcome::Failed { kind, detail } => {
            assert_eq!(*kind, FailureKind::Store);
            assert!(detail.contains("connection refused"));
        }
        StepOutcome::Succeeded(_) => panic!("news step should have failed"),
    }
}

#[tokio::test(start_paused = true)]
async fn hanging_step_times_out_without_cancelling_siblings() {
    let orchestrator = ResearchOrchestrator::new(
        Arc::new(StubProvider::slow_on("prices")),
        Some(Arc::new(StubContext)),
        Duration::from_secs(5),
    );
    let bundle = orchestrator
        .research("AAPL", None)
        .await
        .expect("research should succeed");

    assert_eq!(bundle.succeeded_steps(), 5);
    match &bundle.technical {
        StepOutcome::Failed { kind, .. } => assert_eq!(*kind, FailureKind::Timeout),
        StepOutcome::Succeeded(_) => panic!("technical step should have timed out"),
    }
}

#[tokio::test]
async fn unstructured_llm_output_is_a_parse_error() {
    let bundle = orchestrator(StubProvider::healthy(), true)
        .research("AAPL", None)
        .await
        .expect("research should succeed");

    let synthesizer = Synthesizer::new(
        Arc::new(StubLlm {
            mode: StubLlmMode::Unstructured,
        }),
        None,
    );
    let result = synthesizer.synthesize(&bundle).await;
    assert!(matches!(result, Err(SynthesisError::Parse(_))));
}

#[tokio::test]
async fn llm_timeout_is_distinct_from_parse_failure() {
    let bundle = orchestrator(StubProvider::healthy(), true)
        .research("AAPL", None)
        .await
        .expect("research should succeed");

    let synthesizer = Synthesizer::new(
        Arc::new(StubLlm {
            mode: StubLlmMode::Timeout,
        }),
        None,
    );
    let result = synthesizer.synthesize(&bundle).await;
    assert!(matches!(
        result,
        Err(SynthesisError::Llm(LlmError::Timeout { .. }))
    ));
}

#[tokio::test]
async fn query_defaults_to_a_ticker_news_search() {
    let bundle = orchestrator(StubProvider::healthy(), true)
        .research("NVDA", None)
        .await
        .expect("research should succeed");
    assert_eq!(bundle.query, "latest news and developments for NVDA");

    let focused = orchestrator(StubProvider::healthy(), true)
        .research("NVDA", Some("data center capex"))
        .await
        .expect("research should succeed");
    assert_eq!(focused.query, "data center capex");
}
