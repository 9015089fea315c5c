//! esgpanel CLI: download and inspect ESG/financial panels.
//!
//! Commands:
//! - `download`: fetch static and historic data, write the combined panel
//! - `industry-codes`: fetch GICS industry code and name per instrument
//! - `empty-columns`: list the columns of a CSV file that are empty in every row
//! - `status`: show the resolved configuration and partial download progress

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use esgpanel_core::{HttpProvider, RetrievalClient, Session};
use esgpanel_runner::{
    download_industry_codes, empty_columns_in_csv, run_download, write_table_csv, OutputLayout,
    PipelineConfig, ResolvedConfig, RunReport,
};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "esgpanel",
    about = "esgpanel: chunked ESG/financial panel downloader"
)]
struct Cli {
    /// Log filter (e.g. info, debug, esgpanel_core=trace). RUST_LOG takes precedence.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Also write logs to this file.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download all static and historic data and build the combined panel.
    Download {
        /// Path to a TOML config file. Defaults to ./esgpanel.toml.
        #[arg(long, default_value = "esgpanel.toml")]
        config: PathBuf,

        /// Override the instrument chunk size of both paths.
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Override the number of worker threads.
        #[arg(long)]
        max_workers: Option<usize>,
    },
    /// Download GICS industry codes for every instrument.
    IndustryCodes {
        /// Path to a TOML config file. Defaults to ./esgpanel.toml.
        #[arg(long, default_value = "esgpanel.toml")]
        config: PathBuf,
    },
    /// List the columns of a CSV file that have no value in any row.
    EmptyColumns {
        /// CSV file to inspect.
        csv: PathBuf,
    },
    /// Show the resolved configuration and download progress.
    Status {
        /// Path to a TOML config file. Defaults to ./esgpanel.toml.
        #[arg(long, default_value = "esgpanel.toml")]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_file.as_deref())?;

    match cli.command {
        Commands::Download {
            config,
            chunk_size,
            max_workers,
        } => run_download_cmd(&config, chunk_size, max_workers),
        Commands::IndustryCodes { config } => run_industry_codes(&config),
        Commands::EmptyColumns { csv } => run_empty_columns(&csv),
        Commands::Status { config } => run_status(&config),
    }
}

fn init_logging(level: &str, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);

    match log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("cannot create log file {}", path.display()))?;
            builder.with_ansi(false).with_writer(Arc::new(file)).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

fn load_config(path: &Path) -> Result<ResolvedConfig> {
    let settings = PipelineConfig::from_file(path)
        .with_context(|| format!("loading config {}", path.display()))?;
    settings
        .resolve()
        .with_context(|| format!("resolving lists of {}", path.display()))
}

fn build_provider(config: &ResolvedConfig) -> Result<HttpProvider> {
    let provider = &config.settings.provider;
    Ok(HttpProvider::new(
        provider.base_url.clone(),
        provider.api_key(),
        provider.timeout(),
    )?)
}

fn run_download_cmd(
    config_path: &Path,
    chunk_size: Option<usize>,
    max_workers: Option<usize>,
) -> Result<()> {
    let mut settings = PipelineConfig::from_file(config_path)
        .with_context(|| format!("loading config {}", config_path.display()))?;
    if let Some(size) = chunk_size {
        settings.instrument_chunk_size_static = size;
        settings.instrument_chunk_size_historic = size;
    }
    if let Some(workers) = max_workers {
        settings.max_workers = workers;
    }
    let config = settings.resolve()?;
    tracing::info!(
        config = %config_path.display(),
        instruments = config.instruments.len(),
        "starting download"
    );

    let provider = build_provider(&config)?;
    let output = run_download(&provider, &config)?;
    let report = &output.report;

    println!("Combined panel: {}", output.layout.combined_csv().display());
    println!(
        "Rows: {}  Columns: {}  Instruments: {}/{}",
        report.combined_rows,
        report.combined_columns,
        report.historic_instruments,
        report.instruments_requested
    );
    for warning in &report.warnings {
        println!("Warning: {warning}");
    }

    if !report.is_complete() {
        for failure in &report.chunk_failures {
            eprintln!(
                "Failed {} chunk {}..{}: {}",
                failure.kind, failure.first, failure.last, failure.error
            );
        }
        for failure in &report.instrument_failures {
            eprintln!("Excluded {}: {}", failure.instrument, failure.error);
        }
        std::process::exit(1);
    }

    Ok(())
}

fn run_industry_codes(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let provider = build_provider(&config)?;

    let session = Session::open(&provider)?;
    let client = RetrievalClient::new(
        session.provider(),
        config.settings.retry_policy(),
        config.settings.history_params(),
    );
    let outcome = download_industry_codes(&client, &config)?;
    drop(session);

    let layout = OutputLayout::new(config.settings.datasets_dir());
    let path = layout.industry_codes_csv();
    write_table_csv(&outcome.table, &path)?;
    println!("Industry codes for {} instruments: {}", outcome.table.len(), path.display());

    if !outcome.failures.is_empty() {
        for failure in &outcome.failures {
            eprintln!("Error: {failure}");
        }
        std::process::exit(1);
    }
    Ok(())
}

fn run_empty_columns(csv: &Path) -> Result<()> {
    let empty = empty_columns_in_csv(csv).with_context(|| format!("reading {}", csv.display()))?;
    if empty.is_empty() {
        println!("No empty columns in {}", csv.display());
    } else {
        println!("{} empty columns in {}:", empty.len(), csv.display());
        for name in &empty {
            println!("  {name}");
        }
    }
    Ok(())
}

fn run_status(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let s = &config.settings;
    let layout = OutputLayout::new(s.datasets_dir());

    println!("Config: {}", config_path.display());
    println!("Provider: {}", s.provider.base_url);
    println!("Date range: {} to {}", s.start_date, s.end_date);
    println!("Instruments: {}", config.instruments.len());
    println!("Static fields: {}", config.static_fields.len());
    println!("Historic fields: {}", config.historic_fields.len());
    println!(
        "Chunk sizes: instruments {}/{} (static/historic), fields {}/{}",
        s.instrument_chunk_size_static,
        s.instrument_chunk_size_historic,
        s.static_field_chunk_size,
        s.historic_field_chunk_size
    );
    println!("Workers: {}  Retries: {}", s.max_workers, s.max_retries);
    let backoff: Vec<String> = s
        .retry_policy()
        .backoff_schedule()
        .iter()
        .map(|d| format!("{:.1}s", d.as_secs_f64()))
        .collect();
    if !backoff.is_empty() {
        println!("Backoff: {}", backoff.join(", "));
    }

    let expected = config.planned_chunks()?;
    let (static_done, historic_done) = layout.partial_counts();
    println!();
    println!("{:<10} {:>8} {:>8}", "Path", "Partials", "Chunks");
    println!("{}", "-".repeat(28));
    println!("{:<10} {:>8} {:>8}", "static", static_done, expected.0);
    println!("{:<10} {:>8} {:>8}", "historic", historic_done, expected.1);

    let report_path = layout.report_json();
    if report_path.exists() {
        let report = RunReport::read(&report_path)?;
        println!();
        println!(
            "Last run {}: {} rows, {} failed chunks, {} excluded instruments",
            report.generated_at.format("%Y-%m-%d %H:%M:%S"),
            report.combined_rows,
            report.chunk_failures.len(),
            report.instrument_failures.len()
        );
        println!("Hash: {}", report.combined_hash);
    }
    Ok(())
}
