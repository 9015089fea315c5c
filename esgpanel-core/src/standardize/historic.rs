//! Historic (dated) data: one panel per instrument with exactly one row per
//! calendar year in the configured range.
//!
//! Pipeline, in this order:
//! 1. drop columns that are missing in every row
//! 2. merge rows that share a date
//! 3. bucket by calendar year, first non-missing value per column
//! 4. reindex to every year of the range and check the row count
//! 5. key every row by (instrument, year)

use super::{first_present, ValidationError};
use crate::provider::{RawFrame, RawRow};
use crate::table::{
    cells_to_column, duplicate_names, read_cell, PanelKey, Table, TableError, INSTRUMENT, YEAR,
};
use crate::value::{Cell, Value};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use std::ops::RangeInclusive;

const DATE: &str = "Date";
const ROWS: &str = "__rows";
const LAST: &str = "__last:";

/// Inclusive date bound of the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YearRange {
    since: NaiveDate,
    till: NaiveDate,
}

impl YearRange {
    /// `None` if `since` is after `till`.
    pub fn new(since: NaiveDate, till: NaiveDate) -> Option<Self> {
        (since <= till).then_some(Self { since, till })
    }

    pub fn since(&self) -> NaiveDate {
        self.since
    }

    pub fn till(&self) -> NaiveDate {
        self.till
    }

    pub fn years(&self) -> RangeInclusive<i32> {
        self.since.year()..=self.till.year()
    }

    /// Rows every standardized panel must have.
    pub fn year_count(&self) -> usize {
        (self.till.year() - self.since.year() + 1) as usize
    }
}

/// Two observations for the same date that disagree.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeConflict {
    pub column: String,
    pub first: Value,
    pub second: Value,
}

/// Standardize one instrument's rows of a history response.
///
/// Rows of other instruments in `raw` are ignored. An instrument without any
/// rows yields a panel with the full year range and no columns.
pub fn standardize_historic(
    instrument: &str,
    raw: &RawFrame,
    range: &YearRange,
) -> Result<Table<PanelKey>, ValidationError> {
    standardize(instrument, raw, range).map(|(panel, _)| panel)
}

/// The panel plus every duplicate-date conflict that was logged on the way.
fn standardize(
    instrument: &str,
    raw: &RawFrame,
    range: &YearRange,
) -> Result<(Table<PanelKey>, Vec<MergeConflict>), ValidationError> {
    let mut names = vec![DATE.to_string()];
    names.extend(raw.columns().iter().cloned());
    let dups = duplicate_names(&names);
    if !dups.is_empty() {
        return Err(ValidationError::DuplicateColumns {
            instrument: instrument.to_string(),
            columns: dups,
        });
    }

    let frame = dated_frame(instrument, raw)?;
    let columns = non_empty_columns(&frame);
    if columns.is_empty() {
        let panel = empty_panel(instrument, range).map_err(|e| table_error(instrument, e))?;
        return Ok((panel, Vec::new()));
    }

    let (merged, conflicts) = merge_duplicate_dates(instrument, frame, &columns)?;
    let yearly = aggregate_years(merged, &columns, range);
    let panel =
        resize_to_range_of_years(instrument, yearly, range).map_err(|e| table_error(instrument, e))?;

    if panel.len() != range.year_count() {
        return Err(ValidationError::RowCountMismatch {
            instrument: instrument.to_string(),
            expected: range.year_count(),
            actual: panel.len(),
            columns: panel.columns(),
        });
    }
    Ok((panel, conflicts))
}

/// A panel spanning the full range with no columns, used as the starting
/// point when joining field chunks.
pub fn empty_panel(instrument: &str, range: &YearRange) -> Result<Table<PanelKey>, TableError> {
    Table::with_rows(
        Vec::new(),
        range
            .years()
            .map(|year| (PanelKey::new(instrument, year), Vec::new())),
    )
}

/// Merge two rows observed for the same date, column by column:
/// both missing stays missing, a single present value is taken, equal values
/// are kept, and differing values keep the first one and are reported.
pub fn merge_duplicates(
    columns: &[String],
    first: &[Cell],
    second: &[Cell],
) -> (Vec<Cell>, Vec<MergeConflict>) {
    let mut conflicts = Vec::new();
    let merged = columns
        .iter()
        .zip(first.iter().zip(second))
        .map(|(column, pair)| match pair {
            (None, None) => None,
            (None, Some(b)) => Some(b.clone()),
            (Some(a), None) => Some(a.clone()),
            (Some(a), Some(b)) => {
                if a != b {
                    conflicts.push(MergeConflict {
                        column: column.clone(),
                        first: a.clone(),
                        second: b.clone(),
                    });
                }
                Some(a.clone())
            }
        })
        .collect();
    (merged, conflicts)
}

fn table_error(instrument: &str, source: impl Into<TableError>) -> ValidationError {
    ValidationError::Table {
        instrument: instrument.to_string(),
        source: source.into(),
    }
}

fn parse_date(label: &str) -> Option<NaiveDate> {
    let label = label.trim();
    NaiveDate::parse_from_str(label, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(label, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|dt| dt.date())
        })
        .or_else(|| {
            NaiveDateTime::parse_from_str(label, "%Y-%m-%d %H:%M:%S%.f")
                .ok()
                .map(|dt| dt.date())
        })
        .or_else(|| {
            DateTime::parse_from_rfc3339(label)
                .ok()
                .map(|dt| dt.date_naive())
        })
}

fn from_days(days: i32) -> NaiveDate {
    NaiveDate::default()
        .checked_add_signed(chrono::Duration::days(i64::from(days)))
        .unwrap_or_default()
}

/// The instrument's rows in response order: `Date` followed by every
/// response column.
fn dated_frame(instrument: &str, raw: &RawFrame) -> Result<DataFrame, ValidationError> {
    let rows: Vec<&RawRow> = raw.rows_for(instrument).collect();
    let mut days = Vec::with_capacity(rows.len());
    for row in &rows {
        let label = row.date.as_deref().unwrap_or_default();
        let date = parse_date(label).ok_or_else(|| ValidationError::InvalidDate {
            instrument: instrument.to_string(),
            value: label.to_string(),
        })?;
        days.push((date - NaiveDate::default()).num_days() as i32);
    }

    let dates = Column::new(DATE.into(), days)
        .cast(&DataType::Date)
        .map_err(|e| table_error(instrument, e))?;
    let mut columns = vec![dates];
    for (i, name) in raw.columns().iter().enumerate() {
        let cells: Vec<Cell> = rows.iter().map(|r| r.values[i].clone()).collect();
        columns.push(cells_to_column(name, &cells));
    }
    DataFrame::new(columns).map_err(|e| table_error(instrument, e))
}

/// Response columns holding at least one value.
fn non_empty_columns(frame: &DataFrame) -> Vec<String> {
    frame
        .get_columns()
        .iter()
        .skip(1)
        .filter(|c| c.null_count() < c.len())
        .map(|c| c.name().to_string())
        .collect()
}

fn cells_at(
    frame: &DataFrame,
    names: impl Iterator<Item = String>,
    row: usize,
) -> PolarsResult<Vec<Cell>> {
    names
        .map(|name| frame.column(&name).map(|c| read_cell(c, row)))
        .collect()
}

/// Collapse the rows sharing a date into one row, sorted by date. A pair
/// merges column by column as [`merge_duplicates`] does, every disagreement
/// is logged and returned. Three or more rows on one date cannot be
/// reconciled.
fn merge_duplicate_dates(
    instrument: &str,
    frame: DataFrame,
    columns: &[String],
) -> Result<(DataFrame, Vec<MergeConflict>), ValidationError> {
    let fail = |e: PolarsError| table_error(instrument, e);

    let lasts = columns
        .iter()
        .map(|c| col(c.as_str()).drop_nulls().last().alias(format!("{LAST}{c}")));
    let aggregations: Vec<Expr> = first_present(columns)
        .into_iter()
        .chain(lasts)
        .chain([len().alias(ROWS)])
        .collect();
    let grouped = frame
        .lazy()
        .group_by_stable([col(DATE)])
        .agg(aggregations)
        .sort([DATE], SortMultipleOptions::default())
        .collect()
        .map_err(fail)?;

    let dates = grouped.column(DATE).map_err(fail)?.date().map_err(fail)?;
    let counts = grouped
        .column(ROWS)
        .map_err(fail)?
        .cast(&DataType::Int64)
        .map_err(fail)?;
    let counts = counts.i64().map_err(fail)?;

    let mut conflicts = Vec::new();
    for row in 0..grouped.height() {
        let count = counts.get(row).unwrap_or(0);
        if count < 2 {
            continue;
        }
        let date = dates.get(row).map(from_days).unwrap_or_default();
        if count > 2 {
            return Err(ValidationError::AmbiguousDuplicates {
                instrument: instrument.to_string(),
                date: date.to_string(),
                count: count as usize,
            });
        }

        // With at most two rows, the first and last present values of a
        // column are the two observations whenever both exist.
        let first = cells_at(&grouped, columns.iter().cloned(), row).map_err(fail)?;
        let second = cells_at(&grouped, columns.iter().map(|c| format!("{LAST}{c}")), row)
            .map_err(fail)?;
        let (_, found) = merge_duplicates(columns, &first, &second);
        for c in &found {
            tracing::warn!(
                instrument,
                %date,
                column = %c.column,
                first = %c.first,
                second = %c.second,
                "duplicate rows disagree, keeping the first value"
            );
        }
        conflicts.extend(found);
    }

    let kept: Vec<String> = std::iter::once(DATE.to_string())
        .chain(columns.iter().cloned())
        .collect();
    let merged = grouped.select(kept).map_err(fail)?;
    Ok((merged, conflicts))
}

/// First non-missing value per column within each calendar year, in date
/// order. Dates outside the range are discarded.
fn aggregate_years(frame: DataFrame, columns: &[String], range: &YearRange) -> LazyFrame {
    let in_range = col(DATE)
        .gt_eq(lit(range.since()))
        .and(col(DATE).lt_eq(lit(range.till())));
    frame
        .lazy()
        .filter(in_range)
        .sort([DATE], SortMultipleOptions::default().with_maintain_order(true))
        .group_by_stable([col(DATE).dt().year().alias(YEAR)])
        .agg(first_present(columns))
}

/// Left-join the yearly rows onto every year of the range and key them by
/// instrument. Years without observations are missing in every column.
fn resize_to_range_of_years(
    instrument: &str,
    yearly: LazyFrame,
    range: &YearRange,
) -> Result<Table<PanelKey>, TableError> {
    let years: Vec<i32> = range.years().collect();
    let calendar = DataFrame::new(vec![Column::new(YEAR.into(), years)])?;
    let args = JoinArgs {
        how: JoinType::Left,
        validation: JoinValidation::OneToOne,
        ..Default::default()
    };

    let panel = calendar
        .lazy()
        .join(yearly, [col(YEAR)], [col(YEAR)], args)
        .with_column(lit(instrument).alias(INSTRUMENT))
        .collect()?;
    Table::from_frame(panel)
}
