//! Multi-step research orchestrator.
//!
//! Runs six independent data-gathering steps concurrently: company
//! profile, key metrics, financial statements, technical indicators,
//! retrieved news context and analyst/insider data. Every step is
//! individually fallible and timeout-guarded; a failure is recorded in
//! the bundle without cancelling or failing the sibling steps. Only a
//! bundle with zero successful steps is a hard error.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::analysis::{self, TechnicalSnapshot};
use crate::data::{
    AnalystConsensus, CompanyProfile, DataError, DataResult, FinancialDataProvider,
    FinancialStatement, InsiderActivity, KeyMetrics,
};
use crate::rag::{ContextSource, RagError};

/// Why a research step failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    Provider,
    Store,
    Embedding,
    Timeout,
}

/// Outcome of one research step
#[derive(Debug, Clone)]
pub enum StepOutcome<T> {
    Succeeded(T),
    Failed { kind: FailureKind, detail: String },
}

impl<T> StepOutcome<T> {
    pub fn is_succeeded(&self) -> bool {
        matches!(self, StepOutcome::Succeeded(_))
    }

    pub fn as_succeeded(&self) -> Option<&T> {
        match self {
            StepOutcome::Succeeded(value) => Some(value),
            StepOutcome::Failed { .. } => None,
        }
    }

    pub fn failure(&self) -> Option<(FailureKind, &str)> {
        match self {
            StepOutcome::Succeeded(_) => None,
            StepOutcome::Failed { kind, detail } => Some((*kind, detail.as_str())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Statements {
    pub income: FinancialStatement,
    pub balance: FinancialStatement,
    pub cash_flow: FinancialStatement,
}

#[derive(Debug, Clone)]
pub struct AnalystData {
    pub consensus: AnalystConsensus,
    pub insider: InsiderActivity,
}

/// Everything the six steps produced, successful or not. Consumed once
/// by the synthesizer.
#[derive(Debug)]
pub struct ResearchBundle {
    pub symbol: String,
    pub query: String,
    pub profile: StepOutcome<CompanyProfile>,
    pub metrics: StepOutcome<KeyMetrics>,
    pub statements: StepOutcome<Statements>,
    pub technical: StepOutcome<TechnicalSnapshot>,
    pub news_context: StepOutcome<String>,
    pub analyst: StepOutcome<AnalystData>,
}

impl ResearchBundle {
    pub fn succeeded_steps(&self) -> usize {
        [
            self.profile.is_succeeded(),
            self.metrics.is_succeeded(),
            self.statements.is_succeeded(),
            self.technical.is_succeeded(),
            self.news_context.is_succeeded(),
            self.analyst.is_succeeded(),
        ]
        .iter()
        .filter(|ok| **ok)
        .count()
    }

    /// (step name, failure detail) for every failed step
    pub fn failures(&self) -> Vec<(&'static str, String)> {
        let mut failed = Vec::new();
        let mut push = |name: &'static str, failure: Option<(FailureKind, &str)>| {
            if let Some((_, detail)) = failure {
                failed.push((name, detail.to_string()));
            }
        };

        push("company profile", self.profile.failure());
        push("key metrics", self.metrics.failure());
        push("financial statements", self.statements.failure());
        push("technical indicators", self.technical.failure());
        push("news context", self.news_context.failure());
        push("analyst data", self.analyst.failure());
        failed
    }
}

/// Number of price-history days fetched for indicator computation.
/// Enough for SMA(200) on trading days plus weekends/holidays.
const TECHNICAL_LOOKBACK_DAYS: u32 = 300;

const STATEMENT_PERIODS: usize = 3;

pub struct ResearchOrchestrator {
    provider: Arc<dyn FinancialDataProvider>,
    context: Option<Arc<dyn ContextSource>>,
    step_timeout: Duration,
}

impl ResearchOrchestrator {
    /// `context` is None when the vector store is unreachable; the news
    /// step then reports a store failure and research proceeds without it.
    pub fn new(
        provider: Arc<dyn FinancialDataProvider>,
        context: Option<Arc<dyn ContextSource>>,
        step_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            context,
            step_timeout,
        }
    }

    /// Run all six steps and collect their outcomes. Fails only when
    /// nothing at all succeeded.
    pub async fn research(
        &self,
        symbol: &str,
        query: Option<&str>,
    ) -> anyhow::Result<ResearchBundle> {
        let symbol = symbol.to_uppercase();
        let search_query = query
            .map(str::to_string)
            .unwrap_or_else(|| format!("latest news and developments for {symbol}"));

        info!("Starting deep research for {}", symbol);

        let (profile, metrics, statements, technical, news_context, analyst) = tokio::join!(
            self.guard("company profile", self.provider.company_profile(&symbol)),
            self.guard("key metrics", self.provider.key_metrics(&symbol)),
            self.guard("financial statements", self.fetch_statements(&symbol)),
            self.guard("technical indicators", self.fetch_technicals(&symbol)),
            self.fetch_news_context(&symbol, &search_query),
            self.guard("analyst data", self.fetch_analyst(&symbol)),
        );

        let bundle = ResearchBundle {
            symbol: symbol.clone(),
            query: search_query,
            profile,
            metrics,
            statements,
            technical,
            news_context,
            analyst,
        };

        let succeeded = bundle.succeeded_steps();
        if succeeded == 0 {
            anyhow::bail!("research for {symbol} failed: no data-gathering step succeeded");
        }

        info!(
            "Research for {} complete: {}/6 steps succeeded",
            symbol, succeeded
        );
        Ok(bundle)
    }

    /// Wrap a provider-backed step with the timeout and map its error to
    /// a recorded failure instead of propagating it.
    async fn guard<T>(
        &self,
        step: &'static str,
        future: impl std::future::Future<Output = DataResult<T>>,
    ) -> StepOutcome<T> {
        match timeout(self.step_timeout, future).await {
            Ok(Ok(value)) => StepOutcome::Succeeded(value),
            Ok(Err(e)) => {
                warn!("Research step '{}' failed: {}", step, e);
                let kind = match &e {
                    DataError::Timeout { .. } => FailureKind::Timeout,
                    _ => FailureKind::Provider,
                };
                StepOutcome::Failed {
                    kind,
                    detail: e.to_string(),
                }
            }
            Err(_) => {
                warn!(
                    "Research step '{}' timed out after {:?}",
                    step, self.step_timeout
                );
                StepOutcome::Failed {
                    kind: FailureKind::Timeout,
                    detail: format!("step timed out after {:?}", self.step_timeout),
                }
            }
        }
    }

    async fn fetch_statements(&self, symbol: &str) -> DataResult<Statements> {
        let income = self.provider.income_statement(symbol, STATEMENT_PERIODS).await?;
        let balance = self.provider.balance_sheet(symbol, STATEMENT_PERIODS).await?;
        let cash_flow = self.provider.cash_flow(symbol, STATEMENT_PERIODS).await?;
        Ok(Statements {
            income,
            balance,
            cash_flow,
        })
    }

    async fn fetch_technicals(&self, symbol: &str) -> DataResult<TechnicalSnapshot> {
        let bars = self
            .provider
            .price_history(symbol, TECHNICAL_LOOKBACK_DAYS)
            .await?;
        analysis::analyze(symbol, &bars)
            .ok_or_else(|| DataError::no_data(symbol, "price history is empty"))
    }

    async fn fetch_analyst(&self, symbol: &str) -> DataResult<AnalystData> {
        let consensus = self.provider.analyst_recommendations(symbol).await?;
        let insider = self.provider.insider_trades(symbol).await?;
        Ok(AnalystData { consensus, insider })
    }

    /// News retrieval is optional: a missing or unreachable vector store
    /// records a store failure and research continues without context.
    async fn fetch_news_context(&self, symbol: &str, query: &str) -> StepOutcome<String> {
        let Some(context) = &self.context else {
            warn!("Vector store not available; researching {} without news context", symbol);
            return StepOutcome::Failed {
                kind: FailureKind::Store,
                detail: "vector store not available".to_string(),
            };
        };

        match timeout(self.step_timeout, context.context_for_ticker(symbol, query)).await {
            Ok(Ok(text)) => StepOutcome::Succeeded(text),
            Ok(Err(e)) => {
                warn!("News context retrieval failed: {}", e);
                let kind = match &e {
                    RagError::Embedding(_) | RagError::Dimension { .. } => FailureKind::Embedding,
                    _ => FailureKind::Store,
                };
                StepOutcome::Failed {
                    kind,
                    detail: e.to_string(),
                }
            }
            Err(_) => StepOutcome::Failed {
                kind: FailureKind::Timeout,
                detail: format!("news retrieval timed out after {:?}", self.step_timeout),
            },
        }
    }
}
