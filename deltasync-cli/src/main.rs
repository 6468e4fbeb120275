//! deltasync CLI — thin caller of the differential updater.
//!
//! Commands:
//! - `apply` — apply one JSON batch of records to a symbol
//! - `batch` — apply a JSON array of `{symbol, records, source}` requests
//! - `show` — stored records for one symbol
//! - `stats` — updater, cache and store statistics
//! - `history` — recent diff log entries
//! - `export` / `backup` — copy one symbol's snapshot out of the store
//! - `cleanup` — drop records older than a cutoff
//! - `optimize` — dedupe and re-sort a stored snapshot

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use deltasync_core::{DateRange, RawRecord};
use deltasync_updater::{DifferentialUpdater, UpdateRequest, UpdateStatus, UpdaterConfig};

#[derive(Parser)]
#[command(name = "deltasync", about = "deltasync — differential updates for daily market data")]
struct Cli {
    /// TOML config file. Defaults are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Store directory; overrides `store_root` from the config.
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a JSON array of records to one symbol.
    Apply {
        #[arg(long)]
        symbol: String,

        /// JSON file holding an array of record objects.
        #[arg(long)]
        input: PathBuf,

        /// Source tag stored with the update.
        #[arg(long, default_value = "cli")]
        source: String,
    },
    /// Apply a JSON array of `{symbol, records, source}` requests.
    Batch {
        #[arg(long)]
        input: PathBuf,
    },
    /// Print one symbol's stored records, optionally within a date range.
    Show {
        #[arg(long)]
        symbol: String,

        /// First day to include (YYYY-MM-DD).
        #[arg(long)]
        from: Option<String>,

        /// Last day to include (YYYY-MM-DD).
        #[arg(long)]
        to: Option<String>,
    },
    /// Print updater, cache and store statistics.
    Stats,
    /// Print recent diff log entries, newest first.
    History {
        #[arg(long)]
        symbol: Option<String>,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Export one symbol's snapshot and provenance to a file.
    Export {
        #[arg(long)]
        symbol: String,

        #[arg(long)]
        output: PathBuf,
    },
    /// Drop records older than a cutoff across all symbols.
    Cleanup {
        /// Drop records dated before this day (YYYY-MM-DD).
        #[arg(long, conflicts_with = "days")]
        before: Option<String>,

        /// Keep only this many trailing days.
        #[arg(long)]
        days: Option<i64>,
    },
    /// Write a timestamped backup of one symbol.
    Backup {
        #[arg(long)]
        symbol: String,
    },
    /// Dedupe and re-sort one symbol's stored snapshot.
    Optimize {
        #[arg(long)]
        symbol: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let updater = open_updater(cli.config.as_deref(), cli.store)?;

    match cli.command {
        Commands::Apply {
            symbol,
            input,
            source,
        } => run_apply(&updater, &symbol, &input, &source),
        Commands::Batch { input } => run_batch(&updater, &input),
        Commands::Show { symbol, from, to } => {
            let range = DateRange::new(parse_day(from.as_deref())?, parse_day(to.as_deref())?);
            print_json(&updater.store().read_snapshot(&symbol, Some(range))?)
        }
        Commands::Stats => print_json(&updater.statistics()),
        Commands::History { symbol, limit } => {
            print_json(&updater.history(symbol.as_deref(), limit)?)
        }
        Commands::Export { symbol, output } => {
            print_json(&updater.export_snapshot(&symbol, &output)?)
        }
        Commands::Cleanup { before, days } => run_cleanup(&updater, before, days),
        Commands::Backup { symbol } => match updater.create_backup(&symbol) {
            Some(path) => {
                println!("{}", path.display());
                Ok(())
            }
            None => bail!("backup of {symbol} failed (see log)"),
        },
        Commands::Optimize { symbol } => print_json(&updater.optimize_snapshot(&symbol)?),
    }
}

fn open_updater(config_path: Option<&Path>, store: Option<PathBuf>) -> Result<DifferentialUpdater> {
    let mut config = match config_path {
        Some(path) => UpdaterConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => UpdaterConfig::default(),
    };
    if let Some(root) = store {
        config.store_root = root;
    }
    tracing::debug!(?config, "resolved config");
    DifferentialUpdater::open(config).context("opening store")
}

fn run_apply(updater: &DifferentialUpdater, symbol: &str, input: &Path, source: &str) -> Result<()> {
    let records: Vec<RawRecord> = read_json(input)?;
    let result = updater.apply_update(symbol, &records, source)?;
    print_json(&result)?;
    if !result.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

fn run_batch(updater: &DifferentialUpdater, input: &Path) -> Result<()> {
    let requests: Vec<UpdateRequest> = read_json(input)?;
    let batch = updater.batch_apply(requests);
    print_json(&batch)?;
    if batch.failed > 0 {
        for r in batch.results.iter().filter(|r| !r.is_success()) {
            let kind = match r.status {
                UpdateStatus::ValidationError => "invalid",
                _ => "failed",
            };
            eprintln!("{kind} {}: {}", r.symbol, r.message);
        }
        std::process::exit(1);
    }
    Ok(())
}

fn run_cleanup(updater: &DifferentialUpdater, before: Option<String>, days: Option<i64>) -> Result<()> {
    let report = match (before, days) {
        (Some(date), None) => {
            let cutoff = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                .with_context(|| format!("invalid --before date '{date}'"))?;
            updater.cleanup_before(cutoff)?
        }
        (None, Some(days)) => updater.cleanup_older_than(days)?,
        _ => bail!("one of --before or --days is required"),
    };
    print_json(&report)
}

fn parse_day(value: Option<&str>) -> Result<Option<NaiveDate>> {
    value
        .map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .transpose()
        .with_context(|| format!("invalid date '{}'", value.unwrap_or_default()))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
