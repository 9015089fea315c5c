//! Keyed tables.
//!
//! A `Table<K>` is a polars `DataFrame` whose leading columns hold the row
//! key, plus the decoded keys themselves. Key uniqueness is checked every
//! time a table is built, so a table can never silently carry duplicate
//! rows. Rows are kept sorted by key, which makes every rendering of a table
//! independent of the order its rows arrived in.
//!
//! Data columns are `Float64` when every present cell is a number, `String`
//! when any cell is text (numbers are then stored in their rendered form)
//! and `Null` when every cell is missing.

use crate::value::{Cell, Value};
use polars::prelude::*;
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

pub use polars::prelude::JoinValidation;

pub(crate) const INSTRUMENT: &str = "Instrument";
pub(crate) const YEAR: &str = "Year";

/// Structural errors raised by table operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TableError {
    #[error("duplicate column '{0}'")]
    DuplicateColumn(String),

    #[error("duplicate row key {0}")]
    DuplicateKey(String),

    #[error("row has {actual} cells but the table has {expected} columns")]
    RowWidth { expected: usize, actual: usize },

    #[error("columns present on both sides of the join: {}", .0.join(", "))]
    ColumnOverlap(Vec<String>),

    #[error("key columns missing: {}", .0.join(", "))]
    MissingKeyColumns(Vec<String>),

    #[error("row without a key")]
    MissingKey,

    #[error("frame error: {0}")]
    Frame(String),
}

impl From<PolarsError> for TableError {
    fn from(e: PolarsError) -> Self {
        TableError::Frame(e.to_string())
    }
}

/// Row key of a table.
pub trait TableKey: Ord + Clone + fmt::Debug + Send + Sync {
    /// Header names of the key columns, in output order.
    fn key_columns() -> &'static [&'static str];

    /// Key values rendered in the same order as `key_columns`.
    fn key_fields(&self) -> Vec<String>;

    /// Frame columns holding `keys`, one per entry of `key_columns`.
    fn to_columns(keys: &[Self]) -> Vec<Column>;

    /// Decode the key of every row of `frame`.
    fn from_frame(frame: &DataFrame) -> Result<Vec<Self>, TableError>;

    /// Human-readable label for error messages.
    fn label(&self) -> String {
        self.key_fields().join("/")
    }
}

/// Instrument-keyed tables (static data).
impl TableKey for String {
    fn key_columns() -> &'static [&'static str] {
        &[INSTRUMENT]
    }

    fn key_fields(&self) -> Vec<String> {
        vec![self.clone()]
    }

    fn to_columns(keys: &[Self]) -> Vec<Column> {
        vec![Column::new(INSTRUMENT.into(), keys)]
    }

    fn from_frame(frame: &DataFrame) -> Result<Vec<Self>, TableError> {
        let ids = frame.column(INSTRUMENT)?.str()?;
        ids.into_iter()
            .map(|id| id.map(str::to_string).ok_or(TableError::MissingKey))
            .collect()
    }
}

/// Composite panel key: one row per instrument and calendar year.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PanelKey {
    pub instrument: String,
    pub year: i32,
}

impl PanelKey {
    pub fn new(instrument: impl Into<String>, year: i32) -> Self {
        Self {
            instrument: instrument.into(),
            year,
        }
    }
}

impl TableKey for PanelKey {
    fn key_columns() -> &'static [&'static str] {
        &[INSTRUMENT, YEAR]
    }

    fn key_fields(&self) -> Vec<String> {
        vec![self.instrument.clone(), self.year.to_string()]
    }

    fn to_columns(keys: &[Self]) -> Vec<Column> {
        let instruments: Vec<&str> = keys.iter().map(|k| k.instrument.as_str()).collect();
        let years: Vec<i32> = keys.iter().map(|k| k.year).collect();
        vec![
            Column::new(INSTRUMENT.into(), instruments),
            Column::new(YEAR.into(), years),
        ]
    }

    fn from_frame(frame: &DataFrame) -> Result<Vec<Self>, TableError> {
        let ids = frame.column(INSTRUMENT)?.str()?;
        let years = frame.column(YEAR)?.i32()?;
        ids.into_iter()
            .zip(years.into_iter())
            .map(|pair| match pair {
                (Some(id), Some(year)) => Ok(PanelKey::new(id, year)),
                _ => Err(TableError::MissingKey),
            })
            .collect()
    }
}

/// Key columns followed by data columns, sorted by key.
#[derive(Debug, Clone)]
pub struct Table<K: TableKey> {
    frame: DataFrame,
    keys: Vec<K>,
}

impl<K: TableKey> Default for Table<K> {
    fn default() -> Self {
        Self {
            frame: DataFrame::new(K::to_columns(&[])).unwrap_or_default(),
            keys: Vec::new(),
        }
    }
}

impl<K: TableKey> PartialEq for Table<K> {
    fn eq(&self, other: &Self) -> bool {
        self.keys == other.keys
            && self.columns() == other.columns()
            && self.rows().eq(other.rows())
    }
}

impl<K: TableKey> Table<K> {
    /// Create an empty table. Column names must be unique.
    pub fn new(columns: Vec<String>) -> Result<Self, TableError> {
        Self::with_rows(columns, std::iter::empty())
    }

    /// Create a table and fill it in one go. Fails on a duplicate column, a
    /// duplicate key or a row whose width does not match `columns`.
    pub fn with_rows(
        columns: Vec<String>,
        rows: impl IntoIterator<Item = (K, Vec<Cell>)>,
    ) -> Result<Self, TableError> {
        let mut names: Vec<String> = K::key_columns().iter().map(|c| c.to_string()).collect();
        names.extend(columns.iter().cloned());
        if let Some(dup) = duplicate_names(&names).into_iter().next() {
            return Err(TableError::DuplicateColumn(dup));
        }

        let mut keys = Vec::new();
        let mut cells: Vec<Vec<Cell>> = vec![Vec::new(); columns.len()];
        for (key, values) in rows {
            if values.len() != columns.len() {
                return Err(TableError::RowWidth {
                    expected: columns.len(),
                    actual: values.len(),
                });
            }
            keys.push(key);
            for (column, value) in cells.iter_mut().zip(values) {
                column.push(value);
            }
        }

        let mut frame_columns = K::to_columns(&keys);
        frame_columns.extend(
            columns
                .iter()
                .zip(&cells)
                .map(|(name, cells)| cells_to_column(name, cells)),
        );
        Self::from_frame(DataFrame::new(frame_columns)?)
    }

    /// Wrap a frame holding every key column. Key columns are moved to the
    /// front and rows are sorted by key.
    pub(crate) fn from_frame(frame: DataFrame) -> Result<Self, TableError> {
        let names: Vec<String> = frame
            .get_column_names()
            .into_iter()
            .map(|n| n.to_string())
            .collect();
        let missing: Vec<String> = K::key_columns()
            .iter()
            .filter(|key| !names.iter().any(|n| n == *key))
            .map(|key| key.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(TableError::MissingKeyColumns(missing));
        }

        let order: Vec<String> = K::key_columns()
            .iter()
            .map(|c| c.to_string())
            .chain(
                names
                    .into_iter()
                    .filter(|n| !K::key_columns().contains(&n.as_str())),
            )
            .collect();
        let frame = frame.select(order)?.sort(
            K::key_columns().to_vec(),
            SortMultipleOptions::default().with_maintain_order(true),
        )?;

        let keys = K::from_frame(&frame)?;
        if let Some(pair) = keys.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(TableError::DuplicateKey(pair[0].label()));
        }
        Ok(Self { frame, keys })
    }

    /// Data column names (key columns excluded).
    pub fn columns(&self) -> Vec<String> {
        self.data_columns().map(|c| c.name().to_string()).collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.data_columns().position(|c| c.name().as_str() == name)
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Number of data columns (key columns excluded).
    pub fn width(&self) -> usize {
        self.data_columns().count()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.keys.iter()
    }

    /// Rows in key order.
    pub fn rows(&self) -> impl Iterator<Item = (&K, Vec<Cell>)> + '_ {
        self.keys
            .iter()
            .enumerate()
            .map(|(i, key)| (key, self.row_at(i)))
    }

    pub fn get(&self, key: &K) -> Option<Vec<Cell>> {
        self.position(key).map(|i| self.row_at(i))
    }

    /// Look up a single cell by key and column name.
    pub fn cell(&self, key: &K, column: &str) -> Option<Cell> {
        let row = self.position(key)?;
        let column = self.data_columns().find(|c| c.name().as_str() == column)?;
        Some(read_cell(column, row))
    }

    /// Names of columns that are missing in every row.
    ///
    /// A table without rows reports every column as empty.
    pub fn empty_columns(&self) -> Vec<String> {
        self.data_columns()
            .filter(|c| c.null_count() == c.len())
            .map(|c| c.name().to_string())
            .collect()
    }

    /// Drop every column that is missing in every row.
    pub fn drop_empty_columns(self) -> Self {
        let empty = self.empty_columns();
        if empty.is_empty() {
            return self;
        }
        Self {
            frame: self.frame.drop_many(empty),
            keys: self.keys,
        }
    }

    /// Drop every row whose data cells are all missing.
    pub fn drop_empty_rows(self) -> Result<Self, TableError> {
        let any_present = self
            .columns()
            .iter()
            .map(|c| col(c.as_str()).is_not_null())
            .reduce(|a, b| a.or(b));
        match any_present {
            Some(predicate) => Self::from_frame(self.frame.lazy().filter(predicate).collect()?),
            None => Self::new(Vec::new()),
        }
    }

    /// Left join on the right table's key columns, which must all be key
    /// columns of this table. Every left row is kept; right columns are
    /// appended and left missing where no right row matches. Columns present
    /// on both sides are rejected. `validation` is checked on the join keys.
    pub fn left_join<R: TableKey>(
        &self,
        right: &Table<R>,
        validation: JoinValidation,
    ) -> Result<Table<K>, TableError> {
        let unshared: Vec<String> = R::key_columns()
            .iter()
            .filter(|key| !K::key_columns().contains(key))
            .map(|key| key.to_string())
            .collect();
        if !unshared.is_empty() {
            return Err(TableError::MissingKeyColumns(unshared));
        }

        let left_columns = self.columns();
        let overlap: Vec<String> = right
            .columns()
            .into_iter()
            .filter(|c| left_columns.contains(c))
            .collect();
        if !overlap.is_empty() {
            return Err(TableError::ColumnOverlap(overlap));
        }

        let on: Vec<Expr> = R::key_columns().iter().map(|key| col(*key)).collect();
        let args = JoinArgs {
            how: JoinType::Left,
            validation,
            ..Default::default()
        };
        let joined = self
            .frame
            .clone()
            .lazy()
            .join(right.frame.clone().lazy(), on.clone(), on, args)
            .collect()?;
        Self::from_frame(joined)
    }

    /// Stack tables vertically. Columns are the union of all inputs in order
    /// of first appearance; cells a table does not have are missing. Keys
    /// must be unique across all inputs.
    pub fn concat(tables: impl IntoIterator<Item = Table<K>>) -> Result<Table<K>, TableError> {
        let frames: Vec<LazyFrame> = tables.into_iter().map(|t| t.frame.lazy()).collect();
        if frames.is_empty() {
            return Ok(Self::default());
        }
        let args = UnionArgs {
            to_supertypes: true,
            ..Default::default()
        };
        let stacked = concat_lf_diagonal(frames, args)?.collect()?;
        Self::from_frame(stacked)
    }

    fn data_columns(&self) -> impl Iterator<Item = &Column> {
        self.frame
            .get_columns()
            .iter()
            .skip(K::key_columns().len())
    }

    fn position(&self, key: &K) -> Option<usize> {
        self.keys.iter().position(|k| k == key)
    }

    fn row_at(&self, row: usize) -> Vec<Cell> {
        self.data_columns().map(|c| read_cell(c, row)).collect()
    }
}

/// Build a frame column from cells.
pub(crate) fn cells_to_column(name: &str, cells: &[Cell]) -> Column {
    if cells.iter().all(Option::is_none) {
        return Column::full_null(name.into(), cells.len(), &DataType::Null);
    }
    if cells.iter().all(|c| !matches!(c, Some(Value::Text(_)))) {
        let numbers: Vec<Option<f64>> = cells
            .iter()
            .map(|c| match c {
                Some(Value::Number(n)) => Some(*n),
                _ => None,
            })
            .collect();
        return Column::new(name.into(), numbers);
    }
    let texts: Vec<Option<String>> = cells
        .iter()
        .map(|c| c.as_ref().map(ToString::to_string))
        .collect();
    Column::new(name.into(), texts)
}

/// Decode one cell of a frame column.
pub(crate) fn read_cell(column: &Column, row: usize) -> Cell {
    column.get(row).ok().and_then(cell_from_any)
}

fn cell_from_any(value: AnyValue<'_>) -> Cell {
    match value {
        AnyValue::Null => None,
        AnyValue::Float64(n) => Value::number(n),
        AnyValue::Float32(n) => Value::number(f64::from(n)),
        AnyValue::Int32(n) => Value::number(f64::from(n)),
        AnyValue::Int64(n) => Value::number(n as f64),
        AnyValue::UInt32(n) => Value::number(f64::from(n)),
        AnyValue::UInt64(n) => Value::number(n as f64),
        AnyValue::String(s) => Value::text(s),
        AnyValue::StringOwned(s) => Value::text(s.as_str()),
        other => Value::text(&other.to_string()),
    }
}

/// Names that occur more than once, in order of their second occurrence.
pub fn duplicate_names(names: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut dups = Vec::new();
    for name in names {
        if !seen.insert(name.as_str()) && !dups.contains(name) {
            dups.push(name.clone());
        }
    }
    dups
}
