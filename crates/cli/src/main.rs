use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tempo_api::{ChartApi, ChartReader, InProcApi, Page};
use tempo_core::Movement;
use tempo_engine::{spawn_scheduler, CycleRunner, EngineConfig};
use tempo_persist::{default_db_path, SqliteChartStore};
use tempo_signals::{SignalAggregator, SqliteSignals};
use tempo_store::RankingStore;
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "tempoctl", version, about = "Tempo trending chart CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Chart database (published lists)
    #[arg(long = "db", env = "TEMPO_DB_PATH", global = true)]
    db: Option<String>,

    /// Catalog and engagement database, opened read-only
    #[arg(long = "signals-db", env = "TEMPO_SIGNALS_DB", global = true)]
    signals_db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one ranking cycle now and print the new chart
    Cycle {
        /// Entries to print after publishing
        #[arg(long = "limit", default_value_t = 20)]
        limit: usize,
    },
    /// Run cycles on the configured cadence until Ctrl-C
    Serve {
        /// Override TEMPO_CADENCE_SECS
        #[arg(long = "cadence-secs")]
        cadence_secs: Option<u64>,
    },
    /// Print the last published chart
    Chart {
        #[arg(long = "offset", default_value_t = 0)]
        offset: usize,
        #[arg(long = "limit", default_value_t = 20)]
        limit: usize,
    },
}

fn init_tracing() {
    let env = std::env::var("TEMPO_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("TEMPO_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid TEMPO_METRICS_ADDR; expected host:port");
        }
    }
}

/// Store backed by the on-disk mirror, holding whatever was last published.
fn open_store(db: Option<&str>) -> Result<Arc<RankingStore>> {
    let mirror = match db {
        Some(path) => SqliteChartStore::open(path)?,
        None => SqliteChartStore::open_default()?,
    };
    let store = Arc::new(RankingStore::with_mirror(Arc::new(mirror)));
    match store.warm_start().context("loading last published chart")? {
        Some(epoch) => info!(epoch, "warm start"),
        None => info!("no published chart on disk; starting empty"),
    }
    Ok(store)
}

fn open_runner(db: Option<&str>, signals_db: Option<&str>, config: EngineConfig) -> Result<Arc<CycleRunner>> {
    let store = open_store(db)?;
    let path = signals_db.map(str::to_string).unwrap_or_else(|| default_db_path("catalog.db"));
    let signals = Arc::new(SqliteSignals::open_read_only(&path)?);
    let aggregator = SignalAggregator::new(signals.clone(), signals);
    Ok(Arc::new(CycleRunner::new(aggregator, store, config)))
}

fn movement_label(m: Movement) -> String {
    match m {
        Movement::New => "new".to_string(),
        Movement::Up(n) => format!("+{}", n),
        Movement::Down(n) => format!("-{}", n),
        Movement::Same => "=".to_string(),
    }
}

fn print_page(output: Output, page: &Page) -> Result<()> {
    match output {
        Output::Json => println!("{}", serde_json::to_string_pretty(page)?),
        Output::Human => {
            match page.published_at {
                Some(at) => println!("epoch {} • published {} • {} entries", page.epoch, at.to_rfc3339(), page.total),
                None => println!("no chart published yet"),
            }
            for e in &page.entries {
                println!("{:>4}  {:>10}  {:>12.2}  {}", e.rank, e.item_id, e.score, movement_label(e.movement()));
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Cycle { limit } => {
            let runner = open_runner(cli.db.as_deref(), cli.signals_db.as_deref(), EngineConfig::from_env())?;
            let report = runner.run_cycle().await?;
            match cli.output {
                Output::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                Output::Human => println!(
                    "cycle {} • epoch {} • {} candidates • {} skipped • {} published • {}ms",
                    report.cycle_id,
                    report.epoch,
                    report.candidates,
                    report.skipped,
                    report.published,
                    report.took.as_millis()
                ),
            }
            if cli.output == Output::Human {
                print_page(cli.output, &ChartReader::new(runner.store().clone()).page(0, limit))?;
            }
        }
        Commands::Serve { cadence_secs } => {
            let mut config = EngineConfig::from_env();
            if let Some(secs) = cadence_secs {
                config.cadence = Duration::from_secs(secs.max(1));
            }
            let runner = open_runner(cli.db.as_deref(), cli.signals_db.as_deref(), config.clone())?;
            let mut epochs = runner.store().subscribe_epoch();
            let handle = spawn_scheduler(runner.clone(), config.cadence);
            let api = InProcApi::with_scheduler(runner, handle.trigger_handle());
            info!(cadence_secs = config.cadence.as_secs(), chart_size = config.chart_size, "serving; Ctrl-C to stop");
            loop {
                tokio::select! {
                    _ = signal::ctrl_c() => break,
                    changed = epochs.changed() => {
                        if changed.is_err() {
                            warn!("store closed; stopping");
                            break;
                        }
                        let stats = api.stats().await?;
                        info!(epoch = stats.epoch, entries = stats.entries, "chart published");
                    }
                }
            }
            info!("shutting down; waiting for any running cycle");
            handle.shutdown().await;
        }
        Commands::Chart { offset, limit } => {
            let store = open_store(cli.db.as_deref())?;
            print_page(cli.output, &ChartReader::new(store).page(offset, limit))?;
        }
    }
    Ok(())
}
