use anyhow::Result;
use clap::Parser;
use tracing::info;

use invest_advisor::cli::{self, Cli};
use invest_advisor::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let config = Config::load()?;
    info!(version = env!("CARGO_PKG_VERSION"), "invest-advisor starting");

    cli::run(cli, config).await?;

    Ok(())
}
