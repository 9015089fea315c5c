//! End-to-end download run: session, scheduler, merge and file output.

use crate::config::ResolvedConfig;
use crate::export::{table_hash, write_table_csv, ExportError, OutputLayout};
use crate::merge::{self, MergeOutcome};
use crate::report::RunReport;
use crate::scheduler::{download_all_frames, DownloadOutcome, SchedulerError};
use esgpanel_core::{DataProvider, ProviderError, RetrievalClient, Session, Table, TableError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("export error: {0}")]
    Export(#[from] ExportError),

    #[error("table error: {0}")]
    Table(#[from] TableError),
}

/// In-memory result of a run, alongside what was written to disk.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub download: DownloadOutcome,
    pub merged: MergeOutcome,
    pub report: RunReport,
    pub layout: OutputLayout,
}

/// Open a session on `provider` and run the whole download.
///
/// The session is closed when this returns, whatever the outcome.
pub fn run_download(
    provider: &dyn DataProvider,
    config: &ResolvedConfig,
) -> Result<RunOutput, PipelineError> {
    let session = Session::open(provider)?;
    let client = RetrievalClient::new(
        session.provider(),
        config.settings.retry_policy(),
        config.settings.history_params(),
    );
    run_with_client(&client, config)
}

/// Run the download with an already configured client and write:
/// `static/static.csv`, `historic/historic.csv`, `all_data.csv` and
/// `report.json` under the datasets directory.
pub fn run_with_client(
    client: &RetrievalClient<'_>,
    config: &ResolvedConfig,
) -> Result<RunOutput, PipelineError> {
    let layout = OutputLayout::new(config.settings.datasets_dir());
    layout.create_dirs()?;

    let download = download_all_frames(client, config, Some(&layout))?;

    write_table_csv(&download.static_data, &layout.static_csv())?;
    let historic = Table::concat(download.historic.values().cloned())?;
    write_table_csv(&historic, &layout.historic_csv())?;

    let merged = merge::join(&download.static_data, &download.historic)?;
    write_table_csv(&merged.combined, &layout.combined_csv())?;

    let report = RunReport::new(
        config.instruments.len(),
        download.static_data.len(),
        &download.report,
        &merged,
        table_hash(&merged.combined)?,
    );
    report.write(&layout.report_json())?;

    if report.is_complete() {
        tracing::info!(
            rows = report.combined_rows,
            path = %layout.combined_csv().display(),
            "run complete"
        );
    } else {
        tracing::warn!(
            rows = report.combined_rows,
            failed_chunks = report.chunk_failures.len(),
            failed_instruments = report.instrument_failures.len(),
            "run finished with failures, see report.json"
        );
    }

    Ok(RunOutput {
        download,
        merged,
        report,
        layout,
    })
}
