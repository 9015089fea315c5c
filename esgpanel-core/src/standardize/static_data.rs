//! Static (non-time-varying) data: collapse a snapshot response to exactly
//! one row per instrument.

use super::first_present;
use crate::provider::RawFrame;
use crate::table::{cells_to_column, duplicate_names, Table, TableError, INSTRUMENT};
use polars::prelude::*;

/// Group raw rows by instrument. Each column takes the first non-missing
/// value in response order, or stays missing. No averaging, no conflict
/// reporting.
pub fn aggregate_static(raw: &RawFrame) -> Result<Table<String>, TableError> {
    let columns = raw.columns();
    let mut names = vec![INSTRUMENT.to_string()];
    names.extend(columns.iter().cloned());
    if let Some(dup) = duplicate_names(&names).into_iter().next() {
        return Err(TableError::DuplicateColumn(dup));
    }

    let ids: Vec<&str> = raw.rows().iter().map(|r| r.instrument.as_str()).collect();
    let mut frame_columns = vec![Column::new(INSTRUMENT.into(), ids)];
    for (i, name) in columns.iter().enumerate() {
        let cells: Vec<_> = raw.rows().iter().map(|r| r.values[i].clone()).collect();
        frame_columns.push(cells_to_column(name, &cells));
    }

    let grouped = DataFrame::new(frame_columns)?
        .lazy()
        .group_by_stable([col(INSTRUMENT)])
        .agg(first_present(columns))
        .collect()?;
    Table::from_frame(grouped)
}

/// Remove columns that are missing for every instrument.
pub fn clean_static(table: Table<String>) -> Table<String> {
    table.drop_empty_columns()
}

/// `aggregate_static` followed by `clean_static`.
pub fn standardize_static(raw: &RawFrame) -> Result<Table<String>, TableError> {
    aggregate_static(raw).map(clean_static)
}
