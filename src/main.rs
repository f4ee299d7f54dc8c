mod config;
mod error;
mod http;
mod market;
mod models;
mod normalize;
mod pipeline;
mod snapshot;
mod storage;
mod utils;
mod weather;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::{AppConfig, StorageBackend, normalise_symbols};
use crate::http::{ReqwestTransport, RetryingFetcher, USER_AGENT};
use crate::market::AlphaVantageAdapter;
use crate::pipeline::{Pipeline, PollOutcome};
use crate::snapshot::SystemClock;
use crate::storage::{Repository, open_sink};
use crate::weather::OpenMeteoAdapter;

#[derive(Parser)]
#[command(name = "snapshot-etl", about = "Market and weather snapshot poller", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Directory holding default.toml / local.toml
    #[arg(long, env = "SNAPSHOT_CONFIG_DIR", default_value = "config", global = true)]
    config_dir: PathBuf,
}

#[derive(Subcommand)]
enum Command {
    /// Poll Alpha Vantage once and store one snapshot per symbol
    Market {
        /// Override configured symbols (comma separated)
        #[arg(long, value_delimiter = ',')]
        symbols: Option<Vec<String>>,
    },

    /// Poll Open-Meteo once and store one snapshot for the configured location
    Weather,

    /// Apply DuckDB schema migrations
    Migrate,

    /// Show DuckDB snapshot statistics
    Stats,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "snapshot_etl=info,warn",
        1 => "snapshot_etl=debug,info",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(filter)
        .init();
}

/// Print missing settings and report whether any were found.
fn report_missing(missing: &[&str]) -> bool {
    if missing.is_empty() {
        return false;
    }
    eprintln!("Missing required configuration: {}", missing.join(", "));
    true
}

fn outcome_code(outcome: &PollOutcome) -> ExitCode {
    ExitCode::from(outcome.exit_code())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = AppConfig::load(&cli.config_dir)
        .with_context(|| format!("Failed to load configuration from {:?}", cli.config_dir))?;

    match cli.command {
        Command::Market { symbols } => {
            if let Some(symbols) = symbols {
                config.market.symbols = normalise_symbols(&symbols);
            }
            if report_missing(&config.missing_for_market()) {
                return Ok(ExitCode::FAILURE);
            }
            if config.market.symbols.is_empty() {
                error!("No symbols configured");
                return Ok(ExitCode::FAILURE);
            }

            let _t = utils::Timer::start("market poll");
            let fetcher = RetryingFetcher::new(Arc::new(ReqwestTransport::new(USER_AGENT)?));
            let source = AlphaVantageAdapter::new(fetcher, &config.market);
            let symbols = config.market.symbols.clone();
            let sink = open_sink(&config.storage)?;
            let pipeline = Pipeline::new(config, sink, Arc::new(SystemClock));

            let outcome = pipeline.run_market_poll(&source, &symbols).await;
            Ok(outcome_code(&outcome))
        }

        Command::Weather => {
            if report_missing(&config.missing_for_weather()) {
                return Ok(ExitCode::FAILURE);
            }

            let _t = utils::Timer::start("weather poll");
            let fetcher = RetryingFetcher::new(Arc::new(ReqwestTransport::new(USER_AGENT)?));
            let source = OpenMeteoAdapter::new(fetcher, &config.weather);
            let sink = open_sink(&config.storage)?;
            let pipeline = Pipeline::new(config, sink, Arc::new(SystemClock));

            let outcome = pipeline.run_weather_poll(&source).await;
            Ok(outcome_code(&outcome))
        }

        Command::Migrate => {
            Repository::open(&config.storage.db_path)?.run_migrations()?;
            println!("Migrations applied to {:?}.", config.storage.db_path);
            Ok(ExitCode::SUCCESS)
        }

        Command::Stats => {
            if config.storage.backend != StorageBackend::Duckdb {
                info!("Stats read the local DuckDB file regardless of the configured backend");
            }
            let repo = Repository::open(&config.storage.db_path)?;
            repo.run_migrations()?;
            println!("─────────────────────────────────────────────");
            println!("  Snapshot store: {:?}", config.storage.db_path);
            println!("─────────────────────────────────────────────");
            for t in repo.stats()? {
                println!("  {}", t.table);
                println!("    Rows     : {}", utils::fmt_count(t.rows));
                println!("    Subjects : {}", utils::fmt_count(t.subjects));
                println!("    Latest   : {}", utils::fmt_or_dash(t.latest));
            }
            println!("─────────────────────────────────────────────");
            Ok(ExitCode::SUCCESS)
        }
    }
}
