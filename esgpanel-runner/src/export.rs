//! Flat-file output: CSV panels, partial chunk checkpoints and hashing.
//!
//! Layout under `{data_dir}/datasets`:
//! - `static/static.csv`: one row per instrument
//! - `static/companies-{first}-{last}.csv`: one per static instrument chunk
//! - `historic/historic.csv`: one row per instrument and year
//! - `historic/companies-{first}-{last}.csv`: one per historic instrument chunk
//! - `all_data.csv`: the combined panel
//! - `report.json`: run summary
//!
//! Key columns come first, then data columns in table order, so identical
//! tables always serialize to identical bytes.

use esgpanel_core::value::render_cell;
use esgpanel_core::{Table, TableKey};
use polars::prelude::*;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to read {}: {message}", path.display())]
    Frame { path: PathBuf, message: String },
}

/// Output paths of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputLayout {
    pub datasets_dir: PathBuf,
}

impl OutputLayout {
    pub fn new(datasets_dir: impl Into<PathBuf>) -> Self {
        Self {
            datasets_dir: datasets_dir.into(),
        }
    }

    pub fn static_dir(&self) -> PathBuf {
        self.datasets_dir.join("static")
    }

    pub fn historic_dir(&self) -> PathBuf {
        self.datasets_dir.join("historic")
    }

    pub fn static_csv(&self) -> PathBuf {
        self.static_dir().join("static.csv")
    }

    pub fn historic_csv(&self) -> PathBuf {
        self.historic_dir().join("historic.csv")
    }

    pub fn combined_csv(&self) -> PathBuf {
        self.datasets_dir.join("all_data.csv")
    }

    pub fn report_json(&self) -> PathBuf {
        self.datasets_dir.join("report.json")
    }

    pub fn industry_codes_csv(&self) -> PathBuf {
        self.datasets_dir.join("industry_codes.csv")
    }

    /// Create the dataset directories.
    pub fn create_dirs(&self) -> Result<(), ExportError> {
        for dir in [self.static_dir(), self.historic_dir()] {
            std::fs::create_dir_all(&dir).map_err(|source| ExportError::Io { path: dir, source })?;
        }
        Ok(())
    }

    /// Count partial chunk files per directory: (static, historic).
    pub fn partial_counts(&self) -> (usize, usize) {
        (
            count_partials(&self.static_dir()),
            count_partials(&self.historic_dir()),
        )
    }
}

/// File name of a partial chunk checkpoint.
pub fn partial_file_name(instruments: &[String]) -> String {
    let first = instruments.first().map(String::as_str).unwrap_or("none");
    let last = instruments.last().map(String::as_str).unwrap_or("none");
    format!("companies-{}-{}.csv", sanitize(first), sanitize(last))
}

fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect()
}

fn count_partials(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|e| {
                    let name = e.file_name();
                    let name = name.to_string_lossy();
                    name.starts_with("companies-") && name.ends_with(".csv")
                })
                .count()
        })
        .unwrap_or(0)
}

/// Serialize a table as CSV into any writer.
pub fn write_table<K: TableKey, W: Write>(table: &Table<K>, writer: W) -> Result<(), ExportError> {
    let mut wtr = csv::Writer::from_writer(writer);

    let columns = table.columns();
    let header: Vec<&str> = K::key_columns()
        .iter()
        .copied()
        .chain(columns.iter().map(String::as_str))
        .collect();
    wtr.write_record(&header)?;

    for (key, row) in table.rows() {
        let record: Vec<String> = key
            .key_fields()
            .into_iter()
            .chain(row.iter().map(render_cell))
            .collect();
        wtr.write_record(&record)?;
    }

    wtr.flush().map_err(|source| ExportError::Io {
        path: PathBuf::from("<writer>"),
        source,
    })?;
    Ok(())
}

/// Write a table to `path`, creating parent directories as needed.
pub fn write_table_csv<K: TableKey>(table: &Table<K>, path: &Path) -> Result<(), ExportError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| ExportError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let file = std::fs::File::create(path).map_err(|source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    write_table(table, std::io::BufWriter::new(file))
}

/// Columns of a CSV file that are blank in every row.
///
/// Every column is read as text, so a column of zeros is not empty.
pub fn empty_columns_in_csv(path: &Path) -> Result<Vec<String>, ExportError> {
    let frame_error = |e: PolarsError| ExportError::Frame {
        path: path.to_path_buf(),
        message: e.to_string(),
    };
    let frame = LazyCsvReader::new(path)
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .finish()
        .and_then(LazyFrame::collect)
        .map_err(frame_error)?;

    let mut empty = Vec::new();
    for column in frame.get_columns() {
        let values = column.str().map_err(frame_error)?;
        if values
            .into_iter()
            .all(|v| v.map_or(true, |s| s.trim().is_empty()))
        {
            empty.push(column.name().to_string());
        }
    }
    Ok(empty)
}

/// Deterministic BLAKE3 hash over a table's CSV rendering.
pub fn table_hash<K: TableKey>(table: &Table<K>) -> Result<String, ExportError> {
    let mut hasher = blake3::Hasher::new();
    write_table(table, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}
