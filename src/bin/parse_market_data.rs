//! CLI for reconstructing order validity intervals over a date range.
//!
//! # Usage
//!
//! ```bash
//! # EPEX, one week
//! cargo run --release --bin parse_market_data -- \
//!     --exchange epex \
//!     --start-date 2021-03-01 --end-date 2021-03-07 \
//!     --source data/raw/epex \
//!     --destination data/orderbook
//!
//! # Settings from a JSON file, overriding the end date
//! cargo run --release --bin parse_market_data -- \
//!     --config run.json --end-date 2021-03-31 --verbose
//! ```
//!
//! Writes `orderbook_{YYYY-MM-DD}.csv.zip` per day into the destination.
//! Exits with status 1 naming the failing day on the first error.

use std::path::PathBuf;
use std::time::Instant;

use chrono::NaiveDate;
use clap::Parser;

use cob_interval_reconstructor::{CobError, Exchange, Pipeline, PipelineConfig, Result, TiePolicy};

/// Reconstruct per-order validity intervals from raw order book feeds
#[derive(Parser, Debug)]
#[command(name = "parse_market_data")]
#[command(about = "Reconstruct per-order validity intervals from raw order book feeds")]
struct Cli {
    /// JSON configuration file; flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Exchange whose feed is read (epex, nordpool)
    #[arg(short, long, value_parser = parse_exchange)]
    exchange: Option<Exchange>,

    /// First day to emit (YYYY-MM-DD)
    #[arg(long)]
    start_date: Option<NaiveDate>,

    /// Last day to emit, inclusive (YYYY-MM-DD)
    #[arg(long)]
    end_date: Option<NaiveDate>,

    /// Root directory of the raw exchange files
    #[arg(short, long, env = "COB_SOURCE_ROOT")]
    source: Option<PathBuf>,

    /// Output directory
    #[arg(short, long, env = "COB_DESTINATION")]
    destination: Option<PathBuf>,

    /// Latest-version tie handling (error, prefer_last_seen)
    #[arg(long, value_parser = parse_tie_policy)]
    tie_policy: Option<TiePolicy>,

    /// Save a JSON run summary here
    #[arg(long)]
    summary: Option<PathBuf>,

    /// Log per-day progress
    #[arg(short, long)]
    verbose: bool,
}

fn parse_exchange(raw: &str) -> std::result::Result<Exchange, String> {
    Exchange::parse(raw).map_err(|e| e.to_string())
}

fn parse_tie_policy(raw: &str) -> std::result::Result<TiePolicy, String> {
    TiePolicy::parse(raw).map_err(|e| e.to_string())
}

fn missing(flag: &str) -> CobError {
    CobError::Configuration(format!("{flag} is required without --config"))
}

fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let mut config = PipelineConfig::load_json(path)?;
            if let Some(exchange) = cli.exchange {
                config.exchange = exchange;
            }
            if let Some(start) = cli.start_date {
                config.start_date = start;
            }
            if let Some(end) = cli.end_date {
                config.end_date = end;
            }
            if let Some(source) = &cli.source {
                config.source_root = source.clone();
            }
            if let Some(destination) = &cli.destination {
                config.destination = destination.clone();
            }
            config
        }
        None => PipelineConfig::new(
            cli.exchange.ok_or_else(|| missing("--exchange"))?,
            cli.start_date.ok_or_else(|| missing("--start-date"))?,
            cli.end_date.ok_or_else(|| missing("--end-date"))?,
            cli.source.clone().ok_or_else(|| missing("--source"))?,
            cli.destination.clone().ok_or_else(|| missing("--destination"))?,
        ),
    };

    if cli.verbose {
        config.verbose = true;
    }
    if let Some(policy) = cli.tie_policy {
        config.tie_policy = policy;
    }
    if let Some(summary) = &cli.summary {
        config.summary_path = Some(summary.clone());
    }
    Ok(config)
}

fn main() {
    let cli = Cli::parse();

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    // Initialize logging
    let default_filter = if config.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_millis()
        .init();

    let start_time = Instant::now();
    let summary = match Pipeline::from_config(config).and_then(|pipeline| pipeline.run()) {
        Ok(summary) => summary,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    println!("\nSummary:");
    println!("  Days written: {}", summary.days.len());
    println!("  Rows written: {}", summary.total_rows());
    println!("  Orphan events dropped: {}", summary.total_orphans());
    println!("  Elapsed: {:.1}s", start_time.elapsed().as_secs_f64());
}
