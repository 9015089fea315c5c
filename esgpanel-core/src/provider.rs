//! Data provider trait, raw response frames and the scoped provider session.
//!
//! The `DataProvider` trait abstracts over the remote data source so the HTTP
//! implementation can be swapped for a scripted one in tests. Providers are
//! shared by every worker of the pool, so they must be `Send + Sync`.

use crate::table::TableError;
use crate::value::Cell;
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

/// Extra request parameters for time-series calls (e.g. `Frq = CY`).
pub type HistoryParams = BTreeMap<String, String>;

/// Errors raised by a provider call.
///
/// Only the transient variants are worth retrying; everything else means the
/// request itself is wrong and will fail the same way again.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("rate limited by provider")]
    RateLimited,

    #[error("provider unavailable (HTTP {status})")]
    Unavailable { status: u16 },

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("provider session is not open")]
    SessionClosed,

    #[error("HTTP client error: {0}")]
    Client(String),
}

impl ProviderError {
    /// Whether a retry has a chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::NetworkUnreachable(_)
                | ProviderError::Timeout(_)
                | ProviderError::RateLimited
                | ProviderError::Unavailable { .. }
        )
    }
}

/// One row of a provider response.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub instrument: String,
    /// Observation date label; `None` for snapshot responses.
    pub date: Option<String>,
    pub values: Vec<Cell>,
}

/// A provider response as received: possibly several rows per instrument,
/// possibly repeated dates, possibly empty columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawFrame {
    columns: Vec<String>,
    rows: Vec<RawRow>,
}

impl RawFrame {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Append a row, checking it has one cell per column.
    pub fn push(
        &mut self,
        instrument: impl Into<String>,
        date: Option<String>,
        values: Vec<Cell>,
    ) -> Result<(), TableError> {
        if values.len() != self.columns.len() {
            return Err(TableError::RowWidth {
                expected: self.columns.len(),
                actual: values.len(),
            });
        }
        self.rows.push(RawRow {
            instrument: instrument.into(),
            date,
            values,
        });
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[RawRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Distinct instruments in order of first appearance.
    pub fn instruments(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.rows
            .iter()
            .filter(|r| seen.insert(r.instrument.as_str()))
            .map(|r| r.instrument.clone())
            .collect()
    }

    /// Rows belonging to one instrument, in response order.
    pub fn rows_for<'a>(&'a self, instrument: &'a str) -> impl Iterator<Item = &'a RawRow> + 'a {
        self.rows.iter().filter(move |r| r.instrument == instrument)
    }
}

/// Remote data source.
pub trait DataProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Open the connection. Called once before any request.
    fn open_session(&self) -> Result<(), ProviderError>;

    /// Close the connection. Called once after all requests.
    fn close_session(&self);

    /// Current snapshot of `fields` for every instrument in `universe`.
    fn get_data(&self, universe: &[String], fields: &[String]) -> Result<RawFrame, ProviderError>;

    /// Dated time series of `fields` for every instrument in `universe`.
    fn get_history(
        &self,
        universe: &[String],
        fields: &[String],
        params: &HistoryParams,
    ) -> Result<RawFrame, ProviderError>;
}

/// An open provider session. The session is closed when the guard is dropped,
/// on every exit path including unwinding out of the worker pool.
pub struct Session<'p> {
    provider: &'p dyn DataProvider,
}

impl<'p> Session<'p> {
    pub fn open(provider: &'p dyn DataProvider) -> Result<Self, ProviderError> {
        provider.open_session()?;
        tracing::info!(provider = provider.name(), "provider session opened");
        Ok(Self { provider })
    }

    pub fn provider(&self) -> &'p dyn DataProvider {
        self.provider
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        self.provider.close_session();
        tracing::info!(provider = self.provider.name(), "provider session closed");
    }
}
