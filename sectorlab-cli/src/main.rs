//! SectorLab CLI: run sector analysis from the command line.
//!
//! Commands:
//! - `analyze`: fetch bars for symbols and print the historical-data response
//! - `request`: answer JSON request messages read line by line from stdin
//! - `config`: print the effective configuration as TOML

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use sectorlab_core::config::AppConfig;
use sectorlab_runner::{
    AnalysisService, BarSource, ClientMessage, CsvSource, HistoricalDataRequest, SyntheticSource,
};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "sectorlab",
    about = "SectorLab CLI: price sectors and mean-reversion signals"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SourceKind {
    /// Deterministic random-walk bars.
    Synthetic,
    /// `<SYMBOL>.csv` files in --csv-dir.
    Csv,
}

#[derive(clap::Args)]
struct SourceArgs {
    /// Path to a TOML config file. Defaults are used when absent.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Where bars come from.
    #[arg(long, value_enum, default_value_t = SourceKind::Synthetic)]
    source: SourceKind,

    /// Directory holding `<SYMBOL>.csv` files (with --source csv).
    #[arg(long, default_value = "data")]
    csv_dir: PathBuf,

    /// Pretty-print JSON output.
    #[arg(long, default_value_t = false)]
    pretty: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze symbols and print one historical-data response as JSON.
    Analyze {
        /// Symbols to analyze (e.g., AAPL MSFT SPY).
        #[arg(required = true)]
        symbols: Vec<String>,

        /// Bar size, e.g. "1 day" or "1 hour". Defaults to the configured value.
        #[arg(long)]
        bar_size: Option<String>,

        /// Lookback window, e.g. "1 M" or "1 Y". Defaults to the configured value.
        #[arg(long)]
        duration: Option<String>,

        /// Restrict intraday bars to regular trading hours.
        #[arg(long)]
        rth: Option<bool>,

        #[command(flatten)]
        common: SourceArgs,
    },
    /// Read `get_historical_data` messages from stdin, one JSON object per
    /// line, and write one response per line to stdout.
    Request {
        #[command(flatten)]
        common: SourceArgs,
    },
    /// Print the effective configuration (file, then SECTORLAB_* overrides).
    Config {
        /// Path to a TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze {
            symbols,
            bar_size,
            duration,
            rth,
            common,
        } => {
            let request = HistoricalDataRequest {
                tickers: symbols,
                bar_size,
                duration,
                rth,
            };
            run_analyze(request, &common)
        }
        Commands::Request { common } => run_request_loop(&common),
        Commands::Config { config } => run_config(config.as_deref()),
    }
}

/// Load config and install the subscriber. `RUST_LOG` wins over the
/// configured level. Logs go to stderr so stdout stays pure JSON.
fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = AppConfig::load(path).context("loading configuration")?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_writer(std::io::stderr)
        .init();
    Ok(config)
}

fn build_source(args: &SourceArgs) -> Result<Arc<dyn BarSource>> {
    let source: Arc<dyn BarSource> = match args.source {
        SourceKind::Synthetic => Arc::new(SyntheticSource::new()),
        SourceKind::Csv => {
            if !args.csv_dir.is_dir() {
                anyhow::bail!("CSV directory not found: {}", args.csv_dir.display());
            }
            Arc::new(CsvSource::new(args.csv_dir.clone()))
        }
    };
    info!(source = source.name(), "bar source ready");
    Ok(source)
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building async runtime")
}

fn to_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<String> {
    Ok(if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    })
}

fn run_analyze(request: HistoricalDataRequest, args: &SourceArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let service = AnalysisService::new(build_source(args)?, &config)?;

    let response = runtime()?.block_on(service.handle(&request));
    let failed = response.reports.values().filter(|r| r.error().is_some()).count();
    info!(
        symbols = response.reports.len(),
        failed,
        "analysis complete"
    );

    println!("{}", to_json(&response, args.pretty)?);
    Ok(())
}

fn run_request_loop(args: &SourceArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let service = AnalysisService::new(build_source(args)?, &config)?;
    let rt = runtime()?;

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout().lock();
    for line in stdin.lock().lines() {
        let line = line.context("reading stdin")?;
        if line.trim().is_empty() {
            continue;
        }
        match ClientMessage::from_json(&line) {
            Ok(ClientMessage::GetHistoricalData(request)) => {
                let response = rt.block_on(service.handle(&request));
                writeln!(stdout, "{}", to_json(&response, args.pretty)?)?;
                stdout.flush()?;
            }
            Err(e) => warn!(error = %e, "ignoring unrecognized message"),
        }
    }
    Ok(())
}

fn run_config(path: Option<&Path>) -> Result<()> {
    let config = load_config(path)?;
    print!("{}", config.to_toml()?);
    Ok(())
}
