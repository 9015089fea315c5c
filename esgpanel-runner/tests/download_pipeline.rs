//! End-to-end download runs against a scripted in-memory provider.
//!
//! Covers:
//! 1. Two instruments × three years → six combined rows, unique keys
//! 2. Transient failures retried with the configured backoff
//! 3. A failing chunk leaves the other chunks' output intact
//! 4. Output files and report written under the datasets directory

use chrono::NaiveDate;
use esgpanel_core::{
    DataProvider, HistoryParams, PanelKey, ProviderError, RawFrame, RetrievalClient, Sleeper,
    Value,
};
use esgpanel_runner::{run_download, run_with_client, PipelineConfig, ResolvedConfig, RunReport};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Scripted provider ────────────────────────────────────────────────

struct Scripted {
    /// Number of initial history calls that time out.
    flaky_history_calls: AtomicUsize,
    /// Instruments whose requests are always rejected.
    rejected: Vec<String>,
    /// Instruments with no static data.
    no_static: Vec<String>,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

impl Scripted {
    fn new() -> Self {
        Self {
            flaky_history_calls: AtomicUsize::new(0),
            rejected: Vec::new(),
            no_static: Vec::new(),
            opened: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
        }
    }

    fn check(&self, universe: &[String]) -> Result<(), ProviderError> {
        if universe.iter().any(|id| self.rejected.contains(id)) {
            return Err(ProviderError::Rejected("instrument not entitled".into()));
        }
        Ok(())
    }
}

impl DataProvider for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    fn open_session(&self) -> Result<(), ProviderError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close_session(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }

    fn get_data(&self, universe: &[String], fields: &[String]) -> Result<RawFrame, ProviderError> {
        self.check(universe)?;
        let mut raw = RawFrame::new(fields.to_vec());
        for id in universe.iter().filter(|id| !self.no_static.contains(id)) {
            // First row partially blank, second row fills the gap.
            let first = fields
                .iter()
                .enumerate()
                .map(|(i, f)| if i == 0 { None } else { Value::text(&format!("{id}/{f}")) })
                .collect();
            let second = fields.iter().map(|f| Value::text(&format!("{id}/{f}"))).collect();
            raw.push(id.clone(), None, first).unwrap();
            raw.push(id.clone(), None, second).unwrap();
        }
        Ok(raw)
    }

    fn get_history(
        &self,
        universe: &[String],
        fields: &[String],
        _params: &HistoryParams,
    ) -> Result<RawFrame, ProviderError> {
        let flaky = self
            .flaky_history_calls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if flaky {
            return Err(ProviderError::Timeout("scripted timeout".into()));
        }
        self.check(universe)?;

        let mut raw = RawFrame::new(fields.to_vec());
        for id in universe {
            for year in 2019..=2023 {
                let values: Vec<_> = fields
                    .iter()
                    .enumerate()
                    .map(|(i, _)| Value::number(year as f64 * 10.0 + i as f64))
                    .collect();
                raw.push(id.clone(), Some(format!("{year}-06-30")), values.clone())
                    .unwrap();
                // Same date twice with one blank cell.
                let mut dup = values;
                dup[0] = None;
                raw.push(id.clone(), Some(format!("{year}-06-30T00:00:00")), dup)
                    .unwrap();
            }
        }
        Ok(raw)
    }
}

#[derive(Default)]
struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

fn config(data_dir: &Path, instruments: &[&str]) -> ResolvedConfig {
    let settings = PipelineConfig {
        data_dir: data_dir.to_path_buf(),
        start_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
        end_date: NaiveDate::from_ymd_opt(2022, 12, 31).unwrap(),
        instrument_chunk_size_static: 1,
        instrument_chunk_size_historic: 1,
        static_field_chunk_size: 1,
        historic_field_chunk_size: 1,
        max_workers: 2,
        max_retries: 3,
        retry_delay_secs: 1.0,
        retry_backoff_multiplier: 2.0,
        ..PipelineConfig::default()
    };
    ResolvedConfig::from_lists(
        settings,
        instruments.iter().map(|s| s.to_string()).collect(),
        vec!["TR.CompanyName".into(), "TR.HQCountryCode".into()],
        vec!["TR.TRESGScore".into(), "TR.CO2EmissionTotal".into()],
    )
    .unwrap()
}

// ── 1. Happy path ────────────────────────────────────────────────────

#[test]
fn two_instruments_three_years_give_six_rows() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), &["AAPL.O", "MSFT.O"]);
    let provider = Scripted::new();

    let out = run_download(&provider, &cfg).unwrap();
    let combined = &out.merged.combined;

    assert_eq!(combined.len(), 6);
    let keys: HashSet<&PanelKey> = combined.keys().collect();
    assert_eq!(keys.len(), 6);
    assert_eq!(
        combined.columns(),
        ["TR.TRESGScore", "TR.CO2EmissionTotal", "TR.CompanyName", "TR.HQCountryCode"]
    );

    // Duplicate date rows merged; out-of-range years dropped.
    assert_eq!(
        combined.cell(&PanelKey::new("MSFT.O", 2021), "TR.TRESGScore"),
        Some(Some(Value::Number(20210.0)))
    );
    assert!(combined.get(&PanelKey::new("MSFT.O", 2019)).is_none());
    assert_eq!(
        combined.cell(&PanelKey::new("AAPL.O", 2020), "TR.CompanyName"),
        Some(Some(Value::Text("AAPL.O/TR.CompanyName".into())))
    );

    assert!(out.report.is_complete());
    assert_eq!(provider.opened.load(Ordering::SeqCst), 1);
    assert_eq!(provider.closed.load(Ordering::SeqCst), 1);
}

// ── 2. Retry ─────────────────────────────────────────────────────────

#[test]
fn transient_failures_are_retried_with_backoff() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path(), &["AAPL.O"]);
    cfg.historic_fields.truncate(1);
    cfg.settings.max_workers = 1;

    let provider = Scripted::new();
    provider.flaky_history_calls.store(2, Ordering::SeqCst);
    let sleeper = Arc::new(RecordingSleeper::default());
    let client = RetrievalClient::new(
        &provider,
        cfg.settings.retry_policy(),
        cfg.settings.history_params(),
    )
    .with_sleeper(sleeper.clone());

    let out = run_with_client(&client, &cfg).unwrap();

    assert!(out.report.is_complete());
    assert_eq!(out.merged.combined.len(), 3);
    assert_eq!(
        *sleeper.sleeps.lock().unwrap(),
        vec![Duration::from_secs(1), Duration::from_secs(2)]
    );
}

#[test]
fn exhausted_retries_fail_only_that_chunk() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path(), &["AAPL.O"]);
    cfg.historic_fields.truncate(1);
    cfg.settings.max_workers = 1;

    let provider = Scripted::new();
    provider.flaky_history_calls.store(3, Ordering::SeqCst);
    let sleeper = Arc::new(RecordingSleeper::default());
    let client = RetrievalClient::new(
        &provider,
        cfg.settings.retry_policy(),
        cfg.settings.history_params(),
    )
    .with_sleeper(sleeper.clone());

    let out = run_with_client(&client, &cfg).unwrap();

    assert_eq!(out.report.chunk_failures.len(), 1);
    assert_eq!(out.report.chunk_failures[0].first, "AAPL.O");
    assert_eq!(sleeper.sleeps.lock().unwrap().len(), 2);
    assert!(out.merged.combined.is_empty());
    // Static data still made it.
    assert_eq!(out.download.static_data.len(), 1);
}

// ── 3. Partial failure ───────────────────────────────────────────────

#[test]
fn rejected_chunk_and_missing_static_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), &["AAPL.O", "IBM.N", "MSFT.O"]);
    let mut provider = Scripted::new();
    provider.rejected = vec!["IBM.N".into()];
    provider.no_static = vec!["MSFT.O".into()];

    let out = run_download(&provider, &cfg).unwrap();

    assert_eq!(out.report.chunk_failures.len(), 2);
    assert!(out.report.chunk_failures.iter().all(|f| f.first == "IBM.N"));
    assert_eq!(out.merged.combined.len(), 6);
    assert_eq!(
        out.report.warnings,
        vec!["MSFT.O: no static data, static columns left missing".to_string()]
    );
    assert_eq!(
        out.merged
            .combined
            .cell(&PanelKey::new("MSFT.O", 2022), "TR.CompanyName"),
        Some(None)
    );
    assert_eq!(provider.closed.load(Ordering::SeqCst), 1);
}

// ── 4. Files ─────────────────────────────────────────────────────────

#[test]
fn writes_datasets_partials_and_report() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), &["AAPL.O", "MSFT.O"]);
    let provider = Scripted::new();

    let out = run_download(&provider, &cfg).unwrap();
    let layout = &out.layout;

    for path in [
        layout.static_csv(),
        layout.historic_csv(),
        layout.combined_csv(),
        layout.report_json(),
    ] {
        assert!(path.exists(), "missing {}", path.display());
    }
    assert_eq!(layout.partial_counts(), (2, 2));

    let combined = std::fs::read_to_string(layout.combined_csv()).unwrap();
    let mut lines = combined.lines();
    assert_eq!(
        lines.next(),
        Some("Instrument,Year,TR.TRESGScore,TR.CO2EmissionTotal,TR.CompanyName,TR.HQCountryCode")
    );
    assert_eq!(lines.count(), 6);

    let report = RunReport::read(&layout.report_json()).unwrap();
    assert_eq!(report, out.report);
    assert_eq!(report.combined_rows, 6);
}

#[test]
fn identical_runs_hash_identically() {
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    let provider = Scripted::new();

    let a = run_download(&provider, &config(first.path(), &["AAPL.O", "MSFT.O"])).unwrap();
    let b = run_download(&provider, &config(second.path(), &["AAPL.O", "MSFT.O"])).unwrap();
    assert_eq!(a.report.combined_hash, b.report.combined_hash);
}
