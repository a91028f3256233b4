use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

use chanscan::binance::rest::MarketDataClient;
use chanscan::config::Config;
use chanscan::loader::HistoryLoader;
use chanscan::output;
use chanscan::runner::run_scan;
use chanscan::store::IngestionPipeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Csv,
    Json,
    Both,
}

#[derive(Debug, Parser)]
#[command(name = "chanscan", about = "Regression channel scanner")]
struct Cli {
    /// Comma-separated symbols, or ALL for the configured list.
    #[arg(long, default_value = "ALL")]
    symbols: String,

    /// Bar interval: 1d, 4h, 1h or 15m.
    #[arg(long)]
    timeframe: Option<String>,

    /// Days of history to scan.
    #[arg(long)]
    days: Option<u32>,

    /// Polynomial degree override.
    #[arg(long)]
    degree: Option<usize>,

    /// Dispersion multiplier override.
    #[arg(long)]
    kstd: Option<f64>,

    /// Run parameter optimization for the configured major symbols.
    #[arg(long)]
    optimize: bool,

    /// Optimizer trial budget override.
    #[arg(long)]
    max_trials: Option<usize>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Both)]
    output: OutputFormat,

    #[arg(long, default_value = "out")]
    out_dir: PathBuf,

    #[arg(long, default_value = "config/default.toml")]
    config: PathBuf,
}

fn main() {
    std::process::exit(run());
}

#[tokio::main]
async fn run() -> i32 {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return 1;
        }
    };

    if let Err(e) = init_tracing(&config) {
        eprintln!("Failed to initialize logging: {:#}", e);
        return 1;
    }

    let symbols = match resolve_symbols(&cli, &config) {
        Ok(symbols) => symbols,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return 1;
        }
    };

    tracing::info!(
        symbols = symbols.len(),
        timeframe = %config.scan.timeframe,
        days = config.scan.days,
        optimize = config.optimizer.enabled,
        "Starting scan run"
    );

    let client = match MarketDataClient::new(&config.source) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            eprintln!("Failed to build market data client: {:#}", e);
            return 1;
        }
    };
    let loader = Arc::new(HistoryLoader::new(client, &config.scan));
    let config = Arc::new(config);

    let (artifacts, summary) = run_scan(loader, config.clone(), symbols).await;

    let now_ms = chrono::Utc::now().timestamp_millis() as u64;
    let mut pipeline = IngestionPipeline::new(&config.storage);
    let ingestion = pipeline.ingest(&artifacts, now_ms);
    pipeline.purge_expired(now_ms);

    let reports: Vec<_> = artifacts.iter().map(|a| a.report.clone()).collect();
    if matches!(cli.output, OutputFormat::Csv | OutputFormat::Both) {
        let path = cli.out_dir.join("signals.csv");
        if let Err(e) = output::write_csv(&reports, &path) {
            tracing::error!(path = %path.display(), error = %e, "CSV write failed");
        }
    }
    if matches!(cli.output, OutputFormat::Json | OutputFormat::Both) {
        let path = cli.out_dir.join("signals.json");
        if let Err(e) = output::write_json(&reports, &path) {
            tracing::error!(path = %path.display(), error = %e, "JSON write failed");
        }
    }

    let run_output = serde_json::json!({
        "summary": summary,
        "batch_id": ingestion.batch_id,
        "records_persisted": ingestion.accepted,
        "records_rejected": ingestion.rejected,
        "storage_tier": ingestion.tier().map(|t| t.as_str()),
        "analytics_ok": ingestion.analytics_ok,
    });
    match serde_json::to_string_pretty(&run_output) {
        Ok(text) => println!("{text}"),
        Err(e) => tracing::error!(error = %e, "Failed to render run summary"),
    }

    if ingestion.accepted == 0 {
        tracing::error!("No asset produced a valid result");
        return 2;
    }
    0
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(&cli.config)?;
    if let Some(timeframe) = &cli.timeframe {
        config.scan.timeframe = timeframe.clone();
    }
    if let Some(days) = cli.days {
        config.scan.days = days;
    }
    if let Some(degree) = cli.degree {
        config.scan.degree = degree;
    }
    if let Some(kstd) = cli.kstd {
        config.scan.k = kstd;
    }
    if cli.optimize {
        config.optimizer.enabled = true;
    }
    if let Some(max_trials) = cli.max_trials {
        config.optimizer.max_trials = max_trials;
    }
    config.validate()?;
    Ok(config)
}

fn resolve_symbols(cli: &Cli, config: &Config) -> Result<Vec<String>> {
    let known = config.scan.known_symbols();
    if cli.symbols.trim().eq_ignore_ascii_case("ALL") {
        return Ok(known);
    }
    let mut out = Vec::new();
    for part in cli.symbols.split(',') {
        let symbol = part.trim().to_ascii_uppercase();
        if symbol.is_empty() {
            continue;
        }
        if !known.iter().any(|s| s == &symbol) {
            anyhow::bail!(
                "symbol '{}' is not in the configured asset list",
                symbol
            );
        }
        if !out.contains(&symbol) {
            out.push(symbol);
        }
    }
    if out.is_empty() {
        anyhow::bail!("no symbols requested");
    }
    Ok(out)
}

fn init_tracing(config: &Config) -> Result<()> {
    let log_file = std::fs::File::create(&config.logging.file)
        .with_context(|| format!("failed to create {}", config.logging.file))?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                config
                    .logging
                    .level
                    .parse()
                    .unwrap_or_else(|_| "info".parse().unwrap())
            }),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .json()
        .init();
    Ok(())
}
