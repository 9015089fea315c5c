//! Turning raw provider frames into keyed tables.
//!
//! - [`static_data`]: one row per instrument, first non-missing value wins
//! - [`historic`]: one row per instrument and calendar year over a fixed range

pub mod historic;
pub mod static_data;

pub use historic::{empty_panel, merge_duplicates, standardize_historic, MergeConflict, YearRange};
pub use static_data::{aggregate_static, clean_static, standardize_static};

use crate::table::TableError;
use polars::prelude::{col, Expr};
use thiserror::Error;

/// First non-missing value of each column within a group, in row order.
fn first_present(columns: &[String]) -> Vec<Expr> {
    columns
        .iter()
        .map(|c| col(c.as_str()).drop_nulls().first())
        .collect()
}

/// A per-instrument panel that cannot be standardized.
///
/// Never retried: the response is structurally wrong and asking again
/// returns the same shape. The instrument is excluded from the combined
/// panel and reported.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{instrument}: expected {expected} yearly rows, got {actual} (columns: {})", columns.join(", "))]
    RowCountMismatch {
        instrument: String,
        expected: usize,
        actual: usize,
        columns: Vec<String>,
    },

    #[error("{instrument}: {count} rows share the date {date}, only pairs of duplicates can be merged")]
    AmbiguousDuplicates {
        instrument: String,
        date: String,
        count: usize,
    },

    #[error("{instrument}: unparseable date '{value}'")]
    InvalidDate { instrument: String, value: String },

    #[error("{instrument}: no data columns after cleaning")]
    EmptyFrame { instrument: String },

    #[error("{instrument}: duplicate columns {}", columns.join(", "))]
    DuplicateColumns {
        instrument: String,
        columns: Vec<String>,
    },

    #[error("{instrument}: {source}")]
    Table {
        instrument: String,
        #[source]
        source: TableError,
    },
}

impl ValidationError {
    pub fn instrument(&self) -> &str {
        match self {
            ValidationError::RowCountMismatch { instrument, .. }
            | ValidationError::AmbiguousDuplicates { instrument, .. }
            | ValidationError::InvalidDate { instrument, .. }
            | ValidationError::EmptyFrame { instrument }
            | ValidationError::DuplicateColumns { instrument, .. }
            | ValidationError::Table { instrument, .. } => instrument,
        }
    }
}
