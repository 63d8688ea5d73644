use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use crate::config::Config;

pub mod commands;

#[derive(Parser)]
#[command(
    name = "invest",
    about = "RAG-powered financial news analysis with deep research",
    version = "0.1.0"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch latest news and market data for a ticker (or all tracked tickers)
    Fetch {
        /// Specific ticker to fetch
        #[arg(short, long)]
        ticker: Option<String>,

        /// Fetch for all tracked tickers
        #[arg(short, long)]
        all: bool,

        /// Days of market data to fetch
        #[arg(short, long, default_value_t = 30)]
        days: u32,

        /// Skip indexing articles after fetching
        #[arg(long)]
        no_index: bool,
    },

    /// Index all unindexed articles for semantic search
    Index,

    /// Semantic search across indexed news articles
    Search {
        /// Search query
        query: String,

        /// Filter by ticker
        #[arg(short, long)]
        ticker: Option<String>,

        /// Number of results
        #[arg(short = 'n', long, default_value_t = 5)]
        limit: i64,

        /// Vector backend: native (pgvector) or json
        #[arg(short, long, default_value = "native")]
        backend: String,
    },

    /// Generate AI-powered investment advice for a ticker
    Advise {
        /// Ticker symbol to analyze
        ticker: String,

        /// Specific focus area
        #[arg(short, long)]
        query: Option<String>,
    },

    /// Deep multi-step research: profile, fundamentals, technicals,
    /// news retrieval and analyst data synthesized into one report
    Research {
        /// Ticker symbol to research
        ticker: String,

        /// Specific research question
        #[arg(short, long)]
        query: Option<String>,
    },

    /// Compare two or more tickers side by side
    Compare {
        /// Ticker symbols to compare (e.g. NVDA AMD)
        #[arg(num_args = 2..)]
        tickers: Vec<String>,

        /// Comparison focus
        #[arg(short, long)]
        query: Option<String>,
    },

    /// Run technical analysis with indicators (RSI, MACD, Bollinger, SMA)
    Technical {
        /// Ticker symbol to analyze
        ticker: String,

        /// Days of history to analyze
        #[arg(short, long, default_value_t = 180)]
        days: u32,
    },

    /// View financial fundamentals for a ticker
    Fundamentals {
        /// Ticker symbol
        ticker: String,

        /// Report type: all, profile, metrics, income, balance, cashflow, analyst, insider
        #[arg(short, long, default_value = "all")]
        report: String,
    },

    /// Manage tracked tickers
    Tickers {
        /// Action: list, add, remove
        #[arg(default_value = "list")]
        action: String,

        /// Ticker symbols (for add/remove)
        symbols: Vec<String>,
    },

    /// Check system status and database statistics
    Status,

    /// Run database migrations
    Migrate,
}

/// Execute a CLI command
pub async fn run(cli: Cli, config: Config) -> Result<()> {
    match cli.command {
        Commands::Fetch {
            ticker,
            all,
            days,
            no_index,
        } => {
            commands::fetch(&config, ticker, all, days, !no_index).await?;
        }
        Commands::Index => {
            commands::index(&config).await?;
        }
        Commands::Search {
            query,
            ticker,
            limit,
            backend,
        } => {
            info!("Searching for: {}", query);
            commands::search(&config, &query, ticker.as_deref(), limit, &backend).await?;
        }
        Commands::Advise { ticker, query } => {
            commands::advise(&config, &ticker, query.as_deref()).await?;
        }
        Commands::Research { ticker, query } => {
            commands::research(&config, &ticker, query.as_deref()).await?;
        }
        Commands::Compare { tickers, query } => {
            commands::compare(&config, &tickers, query.as_deref()).await?;
        }
        Commands::Technical { ticker, days } => {
            commands::technical(&config, &ticker, days).await?;
        }
        Commands::Fundamentals { ticker, report } => {
            commands::fundamentals(&ticker, &report).await?;
        }
        Commands::Tickers { action, symbols } => {
            commands::tickers(&config, &action, &symbols).await?;
        }
        Commands::Status => {
            commands::status(&config).await?;
        }
        Commands::Migrate => {
            commands::migrate(&config).await?;
        }
    }
    Ok(())
}
