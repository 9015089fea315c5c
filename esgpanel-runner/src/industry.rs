//! GICS industry classification snapshot for the configured instruments.

use crate::config::ResolvedConfig;
use crate::scheduler::SchedulerError;
use esgpanel_core::{
    split_in_chunks, standardize_static, DownloadError, RequestKind, RetrievalClient, Table,
};

pub const INDUSTRY_FIELDS: [&str; 2] = ["TR.GICSIndustryCode", "TR.GICSIndustry"];

#[derive(Debug, Clone)]
pub struct IndustryOutcome {
    pub table: Table<String>,
    pub failures: Vec<DownloadError>,
}

/// Fetch industry code and name for every instrument, one static instrument
/// chunk at a time. Failed chunks are collected, not fatal.
pub fn download_industry_codes(
    client: &RetrievalClient<'_>,
    config: &ResolvedConfig,
) -> Result<IndustryOutcome, SchedulerError> {
    let fields: Vec<String> = INDUSTRY_FIELDS.iter().map(|f| f.to_string()).collect();
    let chunks = split_in_chunks(
        &config.instruments,
        config.settings.instrument_chunk_size_static,
        config.settings.chunk_limit,
        config.settings.skip_chunks,
    )?;

    let mut tables = Vec::with_capacity(chunks.len());
    let mut failures = Vec::new();
    for (i, chunk) in chunks.iter().enumerate() {
        match client.fetch(chunk, &fields, RequestKind::Static) {
            Ok(raw) => tables.push(standardize_static(&raw)?),
            Err(e) => {
                tracing::error!(chunk = i, error = %e, "industry chunk failed");
                failures.push(e);
            }
        }
    }

    let table = Table::concat(tables)?;
    tracing::info!(instruments = table.len(), failed_chunks = failures.len(), "industry codes downloaded");
    Ok(IndustryOutcome { table, failures })
}
