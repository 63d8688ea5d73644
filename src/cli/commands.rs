use anyhow::{Context, Result};
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::advisor::{AdviceRecord, ResearchOrchestrator, Synthesizer};
use crate::analysis;
use crate::config::Config;
use crate::data::{
    market::{self, MarketDataFetcher},
    news::{self, NewsFetcher},
    FinancialDataProvider, YahooFinanceClient,
};
use crate::db::Database;
use crate::llm::{CompletionProvider, OpenRouterClient};
use crate::rag::{
    Chunker, ContextSource, Embedder, JsonArrayBackend, PgVectorBackend, Retriever, SearchResult,
    VectorStore,
};

/// Per-step budget for research fan-out; matches the provider HTTP timeout
const STEP_TIMEOUT: Duration = Duration::from_secs(30);

fn provider() -> Arc<dyn FinancialDataProvider> {
    Arc::new(YahooFinanceClient::new())
}

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

async fn build_store(pool: PgPool, backend: &str) -> Result<Arc<dyn VectorStore>> {
    match backend {
        "native" | "pgvector" => Ok(Arc::new(PgVectorBackend::new(pool).await?)),
        "json" => Ok(Arc::new(JsonArrayBackend::new(pool))),
        other => anyhow::bail!("unknown vector backend '{other}' (expected 'native' or 'json')"),
    }
}

fn build_retriever(config: &Config, store: Arc<dyn VectorStore>) -> Result<Retriever> {
    let embedder = Embedder::load(config.rag.model_cache_dir.as_deref())
        .context("Failed to load embedding model")?;
    Ok(Retriever::new(
        Chunker::new(config.rag.chunk_size, config.rag.chunk_overlap),
        Arc::new(embedder),
        store,
        config.rag.top_k,
    ))
}

fn require_llm(config: &Config) -> Result<Arc<OpenRouterClient>> {
    let api_key = config
        .apis
        .openrouter_api_key
        .as_deref()
        .context("OPENROUTER_API_KEY not configured in .env")?;
    Ok(Arc::new(OpenRouterClient::new(&config.llm, api_key)))
}

/// Fetch news and market data, then index new articles
pub async fn fetch(
    config: &Config,
    ticker: Option<String>,
    all: bool,
    days: u32,
    index_after: bool,
) -> Result<()> {
    let db = Database::connect(&config.database).await?;
    let provider = provider();
    let news_fetcher = NewsFetcher::new(db.pool.clone(), provider.clone());
    let market_fetcher = MarketDataFetcher::new(db.pool.clone(), provider.clone());

    if let Some(symbol) = ticker {
        let symbol = symbol.to_uppercase();
        println!("Fetching data for {symbol}...");
        let (fetched, stored) = news_fetcher.fetch_and_store(&symbol).await?;
        let bars = market_fetcher.fetch_and_store(&symbol, days).await?;
        println!("  news: {stored}/{fetched} new articles, market: {bars} new rows");
    } else if all {
        println!("Fetching data for all tracked tickers...");
        let mut table = new_table();
        table.set_header(vec!["Ticker", "News Fetched", "News Stored", "Market Rows"]);

        for symbol in news::active_tickers(&db.pool).await? {
            let (fetched, stored) = news_fetcher.fetch_and_store(&symbol).await?;
            let bars = market_fetcher.fetch_and_store(&symbol, days).await?;
            table.add_row(vec![
                symbol,
                fetched.to_string(),
                stored.to_string(),
                bars.to_string(),
            ]);
        }
        println!("{table}");
    } else {
        anyhow::bail!("specify --ticker SYMBOL or --all");
    }

    if index_after {
        println!("\nIndexing new articles...");
        let store = build_store(db.pool.clone(), "native").await?;
        let retriever = build_retriever(config, store)?;
        let chunks = retriever.index_all_unindexed(&db.pool).await?;
        println!("Indexed {chunks} chunks");
    }

    println!("\n✓ Fetch complete");
    Ok(())
}

/// Index all articles that have no chunks yet
pub async fn index(config: &Config) -> Result<()> {
    let db = Database::connect(&config.database).await?;
    let store = build_store(db.pool.clone(), "native").await?;
    let retriever = build_retriever(config, store)?;

    let chunks = retriever.index_all_unindexed(&db.pool).await?;
    println!("✓ Indexed {chunks} chunks");
    Ok(())
}

/// Semantic search across indexed chunks. Store failures surface here:
/// search is the whole point of this command, so there is no degraded
/// mode.
pub async fn search(
    config: &Config,
    query: &str,
    ticker: Option<&str>,
    limit: i64,
    backend: &str,
) -> Result<()> {
    let db = Database::connect(&config.database)
        .await
        .context("Vector store unavailable")?;
    let store = build_store(db.pool.clone(), backend).await?;
    let retriever = build_retriever(config, store)?;

    let results = retriever.search(query, limit, ticker).await?;
    print_search_results(&results);
    Ok(())
}

fn print_search_results(results: &[SearchResult]) {
    if results.is_empty() {
        println!("No results found");
        return;
    }

    let mut table = new_table();
    table.set_header(vec!["Score", "Ticker", "Source", "Text Preview"]);

    for result in results {
        let ticker = result.metadata["ticker"].as_str().unwrap_or("N/A");
        let source = result.metadata["source"].as_str().unwrap_or("N/A");
        let preview: String = if result.text.chars().count() > 100 {
            format!("{}...", result.text.chars().take(100).collect::<String>())
        } else {
            result.text.clone()
        };
        table.add_row(vec![
            format!("{:.3}", result.similarity),
            ticker.to_string(),
            source.to_string(),
            preview,
        ]);
    }

    println!("{table}");
}

/// Quick AI advice from retrieved context and recent market data
pub async fn advise(config: &Config, ticker: &str, query: Option<&str>) -> Result<()> {
    let ticker = ticker.to_uppercase();
    let llm = require_llm(config)?;

    let db = Database::connect(&config.database).await?;
    let store = build_store(db.pool.clone(), "native").await?;
    let retriever = build_retriever(config, store)?;

    let search_query = query
        .map(str::to_string)
        .unwrap_or_else(|| format!("latest news developments for {ticker}"));

    println!("Generating investment advice for {ticker}...");
    let context = retriever.context_for_ticker(&ticker, &search_query).await?;
    let market_summary = market::recent_summary(&db.pool, &ticker).await?;

    let synthesizer = Synthesizer::new(llm, Some(db.pool.clone()));
    let record = synthesizer
        .quick_advice(&ticker, &search_query, &context, &market_summary)
        .await?;

    print_advice(&record);
    Ok(())
}

/// Deep multi-step research. The vector store being down degrades the
/// news step instead of failing the run.
pub async fn research(config: &Config, ticker: &str, query: Option<&str>) -> Result<()> {
    let ticker = ticker.to_uppercase();
    let llm = require_llm(config)?;
    let provider = provider();

    let (pool, context): (Option<PgPool>, Option<Arc<dyn ContextSource>>) =
        match Database::connect(&config.database).await {
            Ok(db) => match build_store(db.pool.clone(), "native").await {
                Ok(store) => match build_retriever(config, store) {
                    Ok(retriever) => (Some(db.pool.clone()), Some(Arc::new(retriever))),
                    Err(e) => {
                        warn!("Embedder unavailable, researching without news context: {e}");
                        (Some(db.pool.clone()), None)
                    }
                },
                Err(e) => {
                    warn!("Vector store unavailable, researching without news context: {e}");
                    (Some(db.pool.clone()), None)
                }
            },
            Err(e) => {
                warn!("Database unreachable, researching without news context: {e}");
                (None, None)
            }
        };

    println!("🔬 Deep research: {ticker}");
    let orchestrator = ResearchOrchestrator::new(provider, context, STEP_TIMEOUT);
    let bundle = orchestrator.research(&ticker, query).await?;

    let failures = bundle.failures();
    if !failures.is_empty() {
        println!("\nSteps without data:");
        for (step, detail) in &failures {
            println!("  - {step}: {detail}");
        }
    }

    println!("\nSynthesizing research report...");
    let synthesizer = Synthesizer::new(llm, pool);
    let record = synthesizer.synthesize(&bundle).await?;

    print_advice(&record);
    Ok(())
}

fn print_advice(record: &AdviceRecord) {
    println!("\n{}", "=".repeat(72));
    println!("Investment Analysis: {}", record.ticker);
    println!("{}", "=".repeat(72));
    println!("{}\n", record.advice);
    println!(
        "Recommendation: {} | Risk Score: {}/10 | Model: {}",
        record.recommendation.as_str(),
        record.risk_score,
        record.model
    );
}

/// Side-by-side comparison of two or more tickers
pub async fn compare(config: &Config, tickers: &[String], query: Option<&str>) -> Result<()> {
    if tickers.len() < 2 {
        anyhow::bail!("provide at least 2 tickers to compare");
    }

    let llm = require_llm(config)?;
    let provider = provider();

    let mut entries = Vec::with_capacity(tickers.len());
    for symbol in tickers {
        let symbol = symbol.to_uppercase();
        println!("Analyzing {symbol}...");

        let profile = match provider.company_profile(&symbol).await {
            Ok(profile) => Some(profile),
            Err(e) => {
                warn!("Profile fetch failed for {symbol}: {e}");
                None
            }
        };
        let metrics = match provider.key_metrics(&symbol).await {
            Ok(metrics) => Some(metrics),
            Err(e) => {
                warn!("Metrics fetch failed for {symbol}: {e}");
                None
            }
        };
        let technical = match provider.price_history(&symbol, 180).await {
            Ok(bars) => analysis::analyze(&symbol, &bars).map(|s| analysis::summary(&s)),
            Err(e) => {
                warn!("Price history fetch failed for {symbol}: {e}");
                None
            }
        };

        entries.push(crate::advisor::prompts::ComparisonEntry {
            symbol,
            profile,
            metrics,
            technical,
        });
    }

    println!("\nGenerating comparison report...");
    let prompt = crate::advisor::prompts::comparison_prompt(&entries, query);
    let completion = llm.complete(&prompt).await?;

    println!("\n{}", "=".repeat(72));
    println!(
        "Comparison: {}",
        tickers
            .iter()
            .map(|t| t.to_uppercase())
            .collect::<Vec<_>>()
            .join(" vs ")
    );
    println!("{}", "=".repeat(72));
    println!("{}", completion.content);
    Ok(())
}

/// Technical indicator report straight from provider price history
pub async fn technical(_config: &Config, ticker: &str, days: u32) -> Result<()> {
    let ticker = ticker.to_uppercase();
    let bars = provider().price_history(&ticker, days).await?;
    let snapshot = analysis::analyze(&ticker, &bars)
        .context("No price history available for technical analysis")?;

    println!(
        "{} @ ${:.2} | Signal: {} ({:.1}%)",
        snapshot.symbol,
        snapshot.latest_price,
        snapshot.signal.direction.as_str(),
        snapshot.signal.strength_pct
    );

    let mut ma_table = new_table();
    ma_table.set_header(vec!["Indicator", "Value", "vs Price"]);
    for (label, value) in [
        ("SMA 20", snapshot.moving_averages.sma_20),
        ("SMA 50", snapshot.moving_averages.sma_50),
        ("SMA 200", snapshot.moving_averages.sma_200),
        ("EMA 12", Some(snapshot.moving_averages.ema_12)),
        ("EMA 26", Some(snapshot.moving_averages.ema_26)),
    ] {
        if let Some(value) = value {
            let diff = (snapshot.latest_price - value) / value * 100.0;
            ma_table.add_row(vec![
                label.to_string(),
                format!("${value:.2}"),
                format!("{diff:+.2}%"),
            ]);
        }
    }
    ma_table.add_row(vec![
        "Trend".to_string(),
        snapshot.moving_averages.trend.as_str().to_string(),
        String::new(),
    ]);
    println!("{ma_table}");

    let mut momentum = new_table();
    momentum.set_header(vec!["Indicator", "Value"]);
    momentum.add_row(vec![
        "RSI (14)".to_string(),
        snapshot
            .rsi_14
            .map(|v| format!("{v:.1}"))
            .unwrap_or_else(|| "—".to_string()),
    ]);
    if let Some(macd) = &snapshot.macd {
        momentum.add_row(vec![
            "MACD".to_string(),
            format!("{:.4} / signal {:.4}", macd.macd_line, macd.signal_line),
        ]);
        momentum.add_row(vec!["Histogram".to_string(), format!("{:+.4}", macd.histogram)]);
    }
    if let Some(bb) = &snapshot.bollinger {
        momentum.add_row(vec![
            "Bollinger (20, 2)".to_string(),
            format!("${:.2} / ${:.2} / ${:.2}", bb.lower, bb.middle, bb.upper),
        ]);
        momentum.add_row(vec!["%B".to_string(), format!("{:.2}", bb.percent_b)]);
    }
    momentum.add_row(vec![
        "Volume ratio".to_string(),
        format!("{:.2}x 20-day avg", snapshot.volume.ratio),
    ]);
    println!("{momentum}");

    let mut levels = new_table();
    levels.set_header(vec!["Level", "Price"]);
    let l = &snapshot.levels;
    for (label, value) in [
        ("Resistance 2", l.resistance_2),
        ("Resistance 1", l.resistance_1),
        ("Pivot", l.pivot),
        ("Support 1", l.support_1),
        ("Support 2", l.support_2),
        ("30D High", l.high_30d),
        ("30D Low", l.low_30d),
    ] {
        levels.add_row(vec![label.to_string(), format!("${value:.2}")]);
    }
    println!("{levels}");

    Ok(())
}

/// Financial fundamentals reports
pub async fn fundamentals(ticker: &str, report: &str) -> Result<()> {
    let ticker = ticker.to_uppercase();
    let provider = provider();

    let reports: Vec<&str> = if report == "all" {
        vec![
            "profile", "metrics", "income", "balance", "cashflow", "analyst", "insider",
        ]
    } else {
        vec![report]
    };

    for kind in reports {
        match kind {
            "profile" => {
                let p = provider.company_profile(&ticker).await?;
                let mut table = new_table();
                table.set_header(vec!["Field", "Value"]);
                table.add_row(vec!["Name".to_string(), p.name]);
                table.add_row(vec!["Sector".to_string(), p.sector]);
                table.add_row(vec!["Industry".to_string(), p.industry]);
                table.add_row(vec![
                    "Market Cap".to_string(),
                    crate::advisor::prompts::fmt_num(p.market_cap),
                ]);
                table.add_row(vec![
                    "Employees".to_string(),
                    p.employees.map(|e| e.to_string()).unwrap_or_else(|| "N/A".to_string()),
                ]);
                table.add_row(vec!["Exchange".to_string(), p.exchange]);
                table.add_row(vec!["Country".to_string(), p.country]);
                println!("{table}");
            }
            "metrics" => {
                let m = provider.key_metrics(&ticker).await?;
                let mut table = new_table();
                table.set_header(vec!["Metric", "Value"]);
                use crate::advisor::prompts::{fmt_num, fmt_pct, fmt_plain};
                for (label, value) in [
                    ("Price", fmt_num(m.price)),
                    ("P/E (TTM)", fmt_plain(m.pe_trailing)),
                    ("Forward P/E", fmt_plain(m.pe_forward)),
                    ("PEG", fmt_plain(m.peg_ratio)),
                    ("P/B", fmt_plain(m.price_to_book)),
                    ("P/S", fmt_plain(m.price_to_sales)),
                    ("EV/EBITDA", fmt_plain(m.ev_to_ebitda)),
                    ("Beta", fmt_plain(m.beta)),
                    ("Gross Margin", fmt_pct(m.gross_margin)),
                    ("Operating Margin", fmt_pct(m.operating_margin)),
                    ("Profit Margin", fmt_pct(m.profit_margin)),
                    ("ROE", fmt_pct(m.return_on_equity)),
                    ("Debt/Equity", fmt_plain(m.debt_to_equity)),
                    ("Revenue Growth", fmt_pct(m.revenue_growth)),
                ] {
                    table.add_row(vec![label.to_string(), value]);
                }
                println!("{table}");
            }
            "income" | "balance" | "cashflow" => {
                let statement = match kind {
                    "income" => provider.income_statement(&ticker, 3).await?,
                    "balance" => provider.balance_sheet(&ticker, 3).await?,
                    _ => provider.cash_flow(&ticker, 3).await?,
                };
                let mut table = new_table();
                let mut header = vec![statement.kind.title().to_string()];
                header.extend(statement.periods.iter().cloned());
                table.set_header(header);
                for row in &statement.rows {
                    let mut cells = vec![row.label.clone()];
                    cells.extend(
                        row.values
                            .iter()
                            .map(|v| crate::advisor::prompts::fmt_num(*v)),
                    );
                    table.add_row(cells);
                }
                println!("{table}");
            }
            "analyst" => {
                let a = provider.analyst_recommendations(&ticker).await?;
                let mut table = new_table();
                table.set_header(vec!["Field", "Value"]);
                table.add_row(vec![
                    "Consensus".to_string(),
                    a.recommendation_key.unwrap_or_else(|| "N/A".to_string()),
                ]);
                table.add_row(vec![
                    "Analysts".to_string(),
                    a.analyst_count.map(|n| n.to_string()).unwrap_or_else(|| "N/A".to_string()),
                ]);
                table.add_row(vec![
                    "Target Mean".to_string(),
                    crate::advisor::prompts::fmt_num(a.target_mean),
                ]);
                table.add_row(vec![
                    "Target Range".to_string(),
                    format!(
                        "{} - {}",
                        crate::advisor::prompts::fmt_num(a.target_low),
                        crate::advisor::prompts::fmt_num(a.target_high)
                    ),
                ]);
                println!("{table}");
            }
            "insider" => {
                let activity = provider.insider_trades(&ticker).await?;
                if activity.trades.is_empty() {
                    println!("No insider trades reported for {ticker}");
                } else {
                    let mut table = new_table();
                    table.set_header(vec!["Date", "Insider", "Transaction", "Shares"]);
                    for trade in &activity.trades {
                        table.add_row(vec![
                            trade.date.clone(),
                            trade.insider.clone(),
                            trade.transaction.clone(),
                            format!("{:.0}", trade.shares),
                        ]);
                    }
                    println!("{table}");
                }
            }
            other => println!("Unknown report type: {other}"),
        }
        println!();
    }

    Ok(())
}

/// Manage the tracked-ticker registry
pub async fn tickers(config: &Config, action: &str, symbols: &[String]) -> Result<()> {
    let db = Database::connect(&config.database).await?;

    match action {
        "list" => {
            let rows = sqlx::query(
                "SELECT symbol, name, sector, is_active FROM tickers ORDER BY symbol",
            )
            .fetch_all(&db.pool)
            .await?;

            let mut table = new_table();
            table.set_header(vec!["Symbol", "Name", "Sector", "Active"]);
            for row in &rows {
                table.add_row(vec![
                    row.get::<String, _>("symbol"),
                    row.get::<Option<String>, _>("name").unwrap_or_else(|| "N/A".to_string()),
                    row.get::<Option<String>, _>("sector").unwrap_or_else(|| "N/A".to_string()),
                    (if row.get::<bool, _>("is_active") { "✓" } else { "✗" }).to_string(),
                ]);
            }
            println!("{table}");
        }
        "add" if !symbols.is_empty() => {
            for symbol in symbols {
                let symbol = symbol.to_uppercase();
                let result = sqlx::query(
                    "INSERT INTO tickers (symbol, is_active) VALUES ($1, TRUE)
                     ON CONFLICT (symbol) DO UPDATE SET is_active = TRUE",
                )
                .bind(&symbol)
                .execute(&db.pool)
                .await?;
                if result.rows_affected() > 0 {
                    println!("Added {symbol}");
                }
            }
        }
        "remove" if !symbols.is_empty() => {
            for symbol in symbols {
                let symbol = symbol.to_uppercase();
                let result = sqlx::query("UPDATE tickers SET is_active = FALSE WHERE symbol = $1")
                    .bind(&symbol)
                    .execute(&db.pool)
                    .await?;
                if result.rows_affected() > 0 {
                    println!("Deactivated {symbol}");
                } else {
                    println!("{symbol} not found");
                }
            }
        }
        _ => println!("Usage: invest tickers [list|add|remove] [SYMBOLS...]"),
    }

    Ok(())
}

/// System status: connectivity, row counts and configuration
pub async fn status(config: &Config) -> Result<()> {
    let db = Database::connect(&config.database).await?;
    db.health_check().await?;
    println!("✓ Database connected");

    let pgvector = db.check_pgvector().await?;

    let count = |table: &'static str, pool: PgPool| async move {
        let row = sqlx::query(&format!("SELECT COUNT(*) AS n FROM {table}"))
            .fetch_one(&pool)
            .await?;
        Ok::<i64, anyhow::Error>(row.get::<i64, _>("n"))
    };

    let mut stats = new_table();
    stats.set_header(vec!["Metric", "Count"]);
    stats.add_row(vec![
        "Tracked Tickers".to_string(),
        count("tickers", db.pool.clone()).await?.to_string(),
    ]);
    stats.add_row(vec![
        "News Articles".to_string(),
        count("articles", db.pool.clone()).await?.to_string(),
    ]);
    stats.add_row(vec![
        "Embeddings (Chunks)".to_string(),
        count("embeddings", db.pool.clone()).await?.to_string(),
    ]);
    stats.add_row(vec![
        "Market Data Points".to_string(),
        count("market_data", db.pool.clone()).await?.to_string(),
    ]);
    stats.add_row(vec![
        "Advice Records".to_string(),
        count("advice_history", db.pool.clone()).await?.to_string(),
    ]);
    println!("{stats}");

    let mut settings = new_table();
    settings.set_header(vec!["Setting", "Value"]);
    settings.add_row(vec!["LLM Model".to_string(), config.llm.model.clone()]);
    settings.add_row(vec![
        "OpenRouter Key".to_string(),
        if config.apis.openrouter_api_key.is_some() {
            "✓ Configured".to_string()
        } else {
            "✗ Not set".to_string()
        },
    ]);
    settings.add_row(vec![
        "Chunk Size / Overlap".to_string(),
        format!("{} / {}", config.rag.chunk_size, config.rag.chunk_overlap),
    ]);
    settings.add_row(vec![
        "pgvector".to_string(),
        (if pgvector { "✓ Installed" } else { "✗ Missing" }).to_string(),
    ]);
    println!("{settings}");

    Ok(())
}

/// Run database migrations
pub async fn migrate(config: &Config) -> Result<()> {
    let db = Database::connect(&config.database).await?;
    db.run_migrations().await?;
    println!("✓ Migrations applied");
    Ok(())
}
