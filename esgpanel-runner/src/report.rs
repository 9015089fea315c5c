//! Run summary persisted next to the datasets as `report.json`.

use crate::export::ExportError;
use crate::merge::MergeOutcome;
use crate::scheduler::DownloadReport;
use chrono::{DateTime, Utc};
use esgpanel_core::RequestKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkFailureEntry {
    pub kind: RequestKind,
    pub first: String,
    pub last: String,
    pub instruments: usize,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentFailureEntry {
    pub instrument: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub generated_at: DateTime<Utc>,
    pub instruments_requested: usize,
    pub static_rows: usize,
    pub historic_instruments: usize,
    pub combined_rows: usize,
    pub combined_columns: usize,
    /// BLAKE3 hash of `all_data.csv`.
    pub combined_hash: String,
    pub chunk_failures: Vec<ChunkFailureEntry>,
    pub instrument_failures: Vec<InstrumentFailureEntry>,
    pub warnings: Vec<String>,
}

impl RunReport {
    pub fn new(
        instruments_requested: usize,
        static_rows: usize,
        download: &DownloadReport,
        merged: &MergeOutcome,
        combined_hash: String,
    ) -> Self {
        let historic_instruments = merged
            .combined
            .keys()
            .map(|k| k.instrument.as_str())
            .collect::<std::collections::BTreeSet<_>>()
            .len();

        let chunk_failures = download
            .chunk_failures
            .iter()
            .map(|f| ChunkFailureEntry {
                kind: f.kind,
                first: f.instruments.first().cloned().unwrap_or_default(),
                last: f.instruments.last().cloned().unwrap_or_default(),
                instruments: f.instruments.len(),
                error: f.error.to_string(),
            })
            .collect();

        let instrument_failures = download
            .instrument_failures
            .iter()
            .chain(&merged.failures)
            .map(|e| InstrumentFailureEntry {
                instrument: e.instrument().to_string(),
                error: e.to_string(),
            })
            .collect();

        Self {
            generated_at: Utc::now(),
            instruments_requested,
            static_rows,
            historic_instruments,
            combined_rows: merged.combined.len(),
            combined_columns: merged.combined.width(),
            combined_hash,
            chunk_failures,
            instrument_failures,
            warnings: merged.warnings.iter().map(ToString::to_string).collect(),
        }
    }

    /// True when no chunk and no instrument failed.
    pub fn is_complete(&self) -> bool {
        self.chunk_failures.is_empty() && self.instrument_failures.is_empty()
    }

    pub fn write(&self, path: &Path) -> Result<(), ExportError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|source| ExportError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn read(path: &Path) -> Result<Self, ExportError> {
        let content = std::fs::read_to_string(path).map_err(|source| ExportError::Io {
            path: PathBuf::from(path),
            source,
        })?;
        Ok(serde_json::from_str(&content)?)
    }
}
