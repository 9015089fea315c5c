//! Concurrent chunk download on a bounded worker pool.
//!
//! One task per instrument chunk. A task walks every field chunk of its path
//! in order and joins the standardized pieces, so a task never shares state
//! with another one. The pool only produces per-chunk results; all merging
//! happens on the calling thread afterwards, keyed by instrument, so the
//! outcome does not depend on completion order.

use crate::config::{ConfigError, ResolvedConfig};
use crate::export::{partial_file_name, write_table_csv, OutputLayout};
use esgpanel_core::{
    aggregate_static, clean_static, empty_panel, split_in_chunks, standardize_historic,
    DownloadError, JoinValidation, PanelKey, RequestKind, RetrievalClient, Table,
    TableError, ValidationError, YearRange,
};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("chunk planning failed: {0}")]
    Planning(#[from] esgpanel_core::ChunkError),

    #[error("failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error("table error: {0}")]
    Table(#[from] TableError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

/// Why a whole instrument chunk produced nothing.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error("join failed: {0}")]
    Table(#[from] TableError),
}

#[derive(Debug, Clone)]
pub struct ChunkFailure {
    pub kind: RequestKind,
    pub instruments: Vec<String>,
    pub error: TaskError,
}

/// Everything that went wrong without stopping the run.
#[derive(Debug, Clone, Default)]
pub struct DownloadReport {
    pub chunk_failures: Vec<ChunkFailure>,
    pub instrument_failures: Vec<ValidationError>,
}

impl DownloadReport {
    pub fn is_clean(&self) -> bool {
        self.chunk_failures.is_empty() && self.instrument_failures.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    /// One row per instrument that returned any static data.
    pub static_data: Table<String>,
    /// Standardized yearly panel per instrument.
    pub historic: BTreeMap<String, Table<PanelKey>>,
    pub report: DownloadReport,
}

/// Panels of one historic task plus the instruments it had to exclude.
#[derive(Debug, Clone, Default)]
struct HistoricChunk {
    panels: BTreeMap<String, Table<PanelKey>>,
    failures: Vec<ValidationError>,
}

/// Download and standardize every static and historic chunk.
///
/// When `layout` is given, each finished task also writes its partial CSV.
pub fn download_all_frames(
    client: &RetrievalClient<'_>,
    config: &ResolvedConfig,
    layout: Option<&OutputLayout>,
) -> Result<DownloadOutcome, SchedulerError> {
    let settings = &config.settings;
    let range = settings.year_range()?;

    let static_chunks = split_in_chunks(
        &config.instruments,
        settings.instrument_chunk_size_static,
        settings.chunk_limit,
        settings.skip_chunks,
    )?;
    let historic_chunks = split_in_chunks(
        &config.instruments,
        settings.instrument_chunk_size_historic,
        settings.chunk_limit,
        settings.skip_chunks,
    )?;
    let static_fields = split_in_chunks(&config.static_fields, settings.static_field_chunk_size, 0, 0)?;
    let historic_fields =
        split_in_chunks(&config.historic_fields, settings.historic_field_chunk_size, 0, 0)?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(settings.max_workers)
        .thread_name(|i| format!("esgpanel-worker-{i}"))
        .build()?;

    tracing::info!(
        instruments = config.instruments.len(),
        static_chunks = static_chunks.len(),
        historic_chunks = historic_chunks.len(),
        static_field_chunks = static_fields.len(),
        historic_field_chunks = historic_fields.len(),
        workers = settings.max_workers,
        "starting download"
    );

    let mut report = DownloadReport::default();

    // ── Static path ──
    let static_dir = layout.map(OutputLayout::static_dir);
    let done = AtomicUsize::new(0);
    let static_results: Vec<Result<Table<String>, TaskError>> = pool.install(|| {
        static_chunks
            .par_iter()
            .map(|chunk| {
                let result = static_task(client, chunk, &static_fields, static_dir.as_deref());
                log_progress(RequestKind::Static, chunk, &done, static_chunks.len(), &result);
                result
            })
            .collect()
    });

    let mut static_tables = Vec::new();
    for (chunk, result) in static_chunks.iter().zip(static_results) {
        match result {
            Ok(table) => static_tables.push(table),
            Err(error) => report.chunk_failures.push(ChunkFailure {
                kind: RequestKind::Static,
                instruments: chunk.clone(),
                error,
            }),
        }
    }
    let static_data = Table::concat(static_tables)?;

    // ── Historic path ──
    let historic_dir = layout.map(OutputLayout::historic_dir);
    let done = AtomicUsize::new(0);
    let historic_results: Vec<Result<HistoricChunk, TaskError>> = pool.install(|| {
        historic_chunks
            .par_iter()
            .map(|chunk| {
                let result =
                    historic_task(client, chunk, &historic_fields, &range, historic_dir.as_deref());
                log_progress(RequestKind::Historic, chunk, &done, historic_chunks.len(), &result);
                result
            })
            .collect()
    });

    let mut historic = BTreeMap::new();
    for (chunk, result) in historic_chunks.iter().zip(historic_results) {
        match result {
            Ok(part) => {
                historic.extend(part.panels);
                report.instrument_failures.extend(part.failures);
            }
            Err(error) => report.chunk_failures.push(ChunkFailure {
                kind: RequestKind::Historic,
                instruments: chunk.clone(),
                error,
            }),
        }
    }

    tracing::info!(
        static_rows = static_data.len(),
        historic_instruments = historic.len(),
        failed_chunks = report.chunk_failures.len(),
        failed_instruments = report.instrument_failures.len(),
        "download finished"
    );

    Ok(DownloadOutcome {
        static_data,
        historic,
        report,
    })
}

fn log_progress<T>(
    kind: RequestKind,
    chunk: &[String],
    done: &AtomicUsize,
    total: usize,
    result: &Result<T, TaskError>,
) {
    let n = done.fetch_add(1, Ordering::Relaxed) + 1;
    let first = chunk.first().map(String::as_str).unwrap_or("");
    let last = chunk.last().map(String::as_str).unwrap_or("");
    match result {
        Ok(_) => tracing::info!(%kind, first, last, progress = %format!("{n}/{total}"), "chunk done"),
        Err(e) => tracing::error!(%kind, first, last, error = %e, "chunk failed"),
    }
}

/// Fetch all static field chunks for one instrument chunk and join them.
fn static_task(
    client: &RetrievalClient<'_>,
    instruments: &[String],
    field_chunks: &[Vec<String>],
    checkpoint_dir: Option<&Path>,
) -> Result<Table<String>, TaskError> {
    let mut joined = Table::with_rows(
        Vec::new(),
        instruments.iter().map(|id| (id.clone(), Vec::new())),
    )?;

    for fields in field_chunks {
        let raw = client.fetch(instruments, fields, RequestKind::Static)?;
        let part = aggregate_static(&raw)?;
        joined = joined.left_join(&part, JoinValidation::OneToOne)?;
    }

    // An instrument with no value at all has no static row.
    let table = clean_static(joined.drop_empty_rows()?);

    if let Some(dir) = checkpoint_dir {
        write_partial(&table, dir, instruments);
    }
    Ok(table)
}

/// Fetch all historic field chunks for one instrument chunk and join each
/// instrument's standardized panels on (instrument, year).
fn historic_task(
    client: &RetrievalClient<'_>,
    instruments: &[String],
    field_chunks: &[Vec<String>],
    range: &YearRange,
    checkpoint_dir: Option<&Path>,
) -> Result<HistoricChunk, TaskError> {
    let mut panels: BTreeMap<String, Table<PanelKey>> = instruments
        .iter()
        .map(|id| Ok((id.clone(), empty_panel(id, range)?)))
        .collect::<Result<_, TableError>>()?;
    let mut failures = Vec::new();

    for fields in field_chunks {
        let raw = client.fetch(instruments, fields, RequestKind::Historic)?;

        let mut excluded = Vec::new();
        for (id, panel) in panels.iter_mut() {
            let joined = standardize_historic(id, &raw, range).and_then(|part| {
                panel
                    .left_join(&part, JoinValidation::OneToOne)
                    .map_err(|source| ValidationError::Table {
                        instrument: id.clone(),
                        source,
                    })
            });
            match joined {
                Ok(next) => *panel = next,
                Err(e) => {
                    tracing::error!(instrument = %id, error = %e, "instrument excluded");
                    excluded.push(id.clone());
                    failures.push(e);
                }
            }
        }
        for id in excluded {
            panels.remove(&id);
        }
    }

    let empty: Vec<String> = panels
        .iter()
        .filter(|(_, panel)| panel.width() == 0)
        .map(|(id, _)| id.clone())
        .collect();
    for id in empty {
        panels.remove(&id);
        tracing::warn!(instrument = %id, "no historic data");
        failures.push(ValidationError::EmptyFrame { instrument: id });
    }

    if let Some(dir) = checkpoint_dir {
        let partial = Table::concat(panels.values().cloned())?;
        write_partial(&partial, dir, instruments);
    }
    Ok(HistoricChunk { panels, failures })
}

/// A checkpoint that cannot be written does not fail the chunk.
fn write_partial<K: esgpanel_core::TableKey>(table: &Table<K>, dir: &Path, instruments: &[String]) {
    let path = dir.join(partial_file_name(instruments));
    if let Err(e) = write_table_csv(table, &path) {
        tracing::warn!(path = %path.display(), error = %e, "failed to write partial file");
    }
}
