//! CLI entry point for the temperature/humidity tools.
//!
//! Provides subcommands for copying a date range of sensor records between
//! MongoDB deployments and for exporting yesterday's hourly averages.

mod logging;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use temphum_tools::{
    aggregate::{TIMEZONE, hourly, pipeline},
    config::{AggregateConfig, EnvOverlay, TransferConfig},
    output::{export_csv, write_console},
    record::{DateRange, parse_instant},
    store::MongoStore,
    transfer::{TransferMode, transfer},
};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "temphum")]
#[command(about = "Move and aggregate temperature/humidity readings in MongoDB", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy records in a date range from SOURCE_MONGO_URI to DEST_MONGO_URI
    Transfer {
        /// Write strategy for matched records
        #[arg(short, long, value_enum, default_value_t = TransferMode::Upsert)]
        mode: TransferMode,

        /// Inclusive start (RFC 3339, or YYYY-MM-DD as UTC midnight)
        #[arg(long, value_parser = parse_instant, default_value = "2020-05-01")]
        start: DateTime<Utc>,

        /// Exclusive end (RFC 3339, or YYYY-MM-DD as UTC midnight)
        #[arg(long, value_parser = parse_instant, default_value = "2020-09-01")]
        end: DateTime<Utc>,
    },
    /// Average one day of readings per local hour from MONGO_URI
    Hourly {
        /// Where to write the rows
        #[arg(short, long, value_enum, default_value_t = Sink::Csv)]
        output: Sink,

        /// Directory for the CSV file
        #[arg(short = 'd', long, default_value = ".")]
        output_dir: PathBuf,

        /// Local day to aggregate (defaults to yesterday)
        #[arg(long, value_name = "YYYY-MM-DD")]
        day: Option<NaiveDate>,

        /// Aggregate in-process instead of with a server-side pipeline
        #[arg(long, default_value_t = false)]
        local: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Sink {
    Console,
    Csv,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let _log_guard = match logging::init() {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Fatal error");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let env = EnvOverlay::load(Path::new("."))?;

    match cli.command {
        Commands::Transfer { mode, start, end } => {
            let config = TransferConfig::from_env(&env)?;
            let range = DateRange::new(start, end)?;
            run_transfer(&config, &range, mode).await
        }
        Commands::Hourly {
            output,
            output_dir,
            day,
            local,
        } => {
            let config = AggregateConfig::from_env(&env)?;
            run_hourly(&config, output, &output_dir, day, local).await
        }
    }
}

/// Connects to both deployments, transfers, and disconnects both whatever
/// the outcome.
#[tracing::instrument(skip(config), fields(start = %range.start(), end = %range.end()))]
async fn run_transfer(config: &TransferConfig, range: &DateRange, mode: TransferMode) -> Result<()> {
    let source = MongoStore::connect(&config.source_uri, "source").await?;
    let dest = match MongoStore::connect(&config.dest_uri, "destination").await {
        Ok(dest) => dest,
        Err(e) => {
            source.shutdown().await;
            return Err(e);
        }
    };

    let result = transfer(&source, &dest, range, mode).await;

    source.shutdown().await;
    dest.shutdown().await;

    let report = result?;
    info!(transferred = report.written, "Successfully transferred records");
    Ok(())
}

/// Aggregates one local day and writes the rows to the chosen sink.
#[tracing::instrument(skip(config))]
async fn run_hourly(
    config: &AggregateConfig,
    output: Sink,
    output_dir: &Path,
    day: Option<NaiveDate>,
    local: bool,
) -> Result<()> {
    let now = Utc::now();
    let range = match day {
        Some(day) => DateRange::local_day(day, &TIMEZONE)?,
        None => DateRange::yesterday(now, &TIMEZONE)?,
    };
    info!(start = %range.start(), end = %range.end(), "Aggregating day");

    let store = MongoStore::connect(&config.mongo_uri, "aggregation").await?;
    let rows = if local {
        hourly::from_source(&store, &range, &TIMEZONE).await
    } else {
        pipeline::run(store.collection(), &range, TIMEZONE.name()).await
    };
    store.shutdown().await;
    let rows = rows?;

    match output {
        Sink::Console => write_console(&mut std::io::stdout().lock(), &rows)?,
        Sink::Csv => {
            let run_date = now.with_timezone(&TIMEZONE).date_naive();
            let path = export_csv(output_dir, run_date, &rows)?;
            info!(path = %path.display(), rows = rows.len(), "Data successfully written");
        }
    }

    Ok(())
}
