//! Seisarc CLI
//!
//! Command-line interface for archive synchronization:
//! - Run a config-driven sync
//! - Rebuild the index from the day files on disk
//! - Compact the index
//! - Run ad-hoc queries against the index

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Duration;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use seisarc::archive::rescan_archive;
use seisarc::index::QueryOutcome;
use seisarc::mirror::NoTravelTimes;
use seisarc::{
    generate_default_config, CancelToken, Config, MirrorBackend, RescanOptions, RunOutcome,
    SyncEngine, TimeSeriesIndex,
};

#[derive(Parser)]
#[command(name = "seisarc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Archive synchronization for day-partitioned seismic waveform data")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path (default: standard locations, then environment)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the configured sync against a mirror archive
    Run {
        /// Source day-file tree to sync from
        #[arg(long)]
        source: PathBuf,
    },

    /// Rebuild index coverage from the day files on disk
    SyncDb {
        /// Filename patterns to scan (? and * wildcards); default: all
        #[arg(short, long)]
        patterns: Vec<String>,
        /// Only scan files modified after this time (RFC 3339)
        #[arg(long)]
        newer_than: Option<String>,
        /// Scan worker threads
        #[arg(short, long, default_value = "4")]
        workers: usize,
        /// Gap tolerance for the closing compaction (seconds, default: from config)
        #[arg(short, long)]
        gap_tolerance: Option<i64>,
    },

    /// Merge adjacent index intervals
    Compact {
        /// Gap tolerance in seconds (default: from config)
        #[arg(short, long)]
        gap_tolerance: Option<i64>,
    },

    /// Run an ad-hoc SQL statement against the index
    Query {
        /// SQL text; SELECTs print a bounded result table
        sql: String,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn load_config(path: &Option<PathBuf>) -> Result<Config, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(Config::load_with_env(path)?),
        None => Ok(Config::load_default()),
    }
}

fn init_logging(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG")
            .unwrap_or_else(|_| format!("seisarc={}", config.logging.level)),
    );
    if config.logging.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn open_index(config: &Config) -> Result<TimeSeriesIndex, Box<dyn std::error::Error>> {
    Ok(TimeSeriesIndex::open(
        std::path::Path::new(&config.index.path),
        &config.index.retry_policy(),
    )?)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // The config subcommand must work before any config file exists.
    if let Commands::Config { output } = &cli.command {
        let template = generate_default_config();
        match output {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, &template)?;
                println!("Config written to {:?}", path);
            }
            None => print!("{}", template),
        }
        return Ok(());
    }

    let config = load_config(&cli.config)?;
    init_logging(&config);
    tracing::info!("seisarc v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Run { source } => {
            let backend = MirrorBackend::open(&source)?;
            let mode = config.waveform.mode.clone();
            let cancel = CancelToken::new();
            let mut engine = SyncEngine::new(
                config,
                &backend,
                Arc::new(backend.directory()),
                Arc::new(NoTravelTimes),
                cancel,
            )?;

            let outcome = match mode.as_str() {
                "continuous" => engine.run_continuous()?,
                "event" => engine.run_event()?,
                other => {
                    eprintln!("Unknown mode {:?}; use \"continuous\" or \"event\"", other);
                    std::process::exit(1);
                }
            };

            match outcome {
                RunOutcome::Completed(report) => {
                    println!("Planned requests:   {}", report.planned);
                    println!("After pruning:      {}", report.after_prune);
                    println!("Executed:           {}", report.executed);
                    println!("No data:            {}", report.no_data);
                    println!("Failed:             {}", report.failed);
                    for summary in &report.events {
                        println!();
                        println!("Event {}", summary.event_id);
                        for (station, coverage) in &summary.coverage {
                            println!("  {:<12} {:?}", station, coverage);
                        }
                    }
                    if report.failed > 0 {
                        std::process::exit(1);
                    }
                }
                RunOutcome::Cancelled => {
                    println!("Run cancelled");
                    std::process::exit(130);
                }
            }
        }

        Commands::SyncDb {
            patterns,
            newer_than,
            workers,
            gap_tolerance,
        } => {
            let newer_than = match newer_than.as_deref() {
                Some(text) => Some(
                    chrono::DateTime::parse_from_rfc3339(text)
                        .map_err(|e| format!("invalid --newer-than: {}", e))?
                        .with_timezone(&chrono::Utc),
                ),
                None => None,
            };
            let options = RescanOptions {
                patterns,
                newer_than,
                workers,
                gap_tolerance: Duration::seconds(
                    gap_tolerance.unwrap_or(config.processing.gap_tolerance_secs),
                ),
            };

            let mut index = open_index(&config)?;
            let report = rescan_archive(
                std::path::Path::new(&config.archive.root),
                &mut index,
                &options,
            )?;

            println!("Files seen:      {}", report.files_seen);
            println!("Files scanned:   {}", report.files_scanned);
            println!("Files failed:    {}", report.files_failed);
            println!("Intervals added: {}", report.intervals_added);
        }

        Commands::Compact { gap_tolerance } => {
            let tolerance =
                Duration::seconds(gap_tolerance.unwrap_or(config.processing.gap_tolerance_secs));
            let mut index = open_index(&config)?;
            let stats = index.compact(tolerance)?;
            println!("Rows examined: {}", stats.rows_examined);
            println!("Rows removed:  {}", stats.rows_removed);
            println!("Intervals out: {}", stats.intervals_out);
        }

        Commands::Query { sql } => {
            let mut index = open_index(&config)?;
            match index.execute_query(&sql)? {
                QueryOutcome::Affected(count) => {
                    println!("{} rows affected", count);
                }
                QueryOutcome::Table {
                    columns,
                    rows,
                    truncated,
                } => {
                    if cli.format == "json" {
                        let objects: Vec<serde_json::Value> = rows
                            .iter()
                            .map(|row| {
                                columns
                                    .iter()
                                    .cloned()
                                    .zip(row.iter().cloned().map(serde_json::Value::String))
                                    .collect::<serde_json::Map<_, _>>()
                                    .into()
                            })
                            .collect();
                        println!("{}", serde_json::to_string_pretty(&objects)?);
                    } else {
                        print_table(&columns, &rows);
                    }
                    if truncated {
                        eprintln!("(result truncated)");
                    }
                }
            }
        }

        Commands::Config { .. } => unreachable!("handled above"),
    }

    Ok(())
}

fn print_table(columns: &[String], rows: &[Vec<String>]) {
    if rows.is_empty() {
        println!("No rows");
        return;
    }

    let mut widths: Vec<usize> = columns.iter().map(|c| c.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let header: Vec<String> = columns
        .iter()
        .zip(&widths)
        .map(|(c, w)| format!("{:<width$}", c, width = w))
        .collect();
    println!("{}", header.join(" | "));
    println!("{}", "-".repeat(widths.iter().sum::<usize>() + 3 * (widths.len().saturating_sub(1))));

    for row in rows {
        let cells: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(cell, w)| format!("{:<width$}", cell, width = w))
            .collect();
        println!("{}", cells.join(" | "));
    }
}
