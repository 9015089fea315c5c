//! Criterion benchmarks for the standardization hot paths.
//!
//! Benchmarks:
//! 1. Historic standardization of one instrument (quarterly rows, duplicates)
//! 2. Static aggregation of a multi-row snapshot

use chrono::{Duration, NaiveDate};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use esgpanel_core::{aggregate_static, standardize_historic, RawFrame, Value, YearRange};

// ── Helpers ──────────────────────────────────────────────────────────

fn make_history(columns: usize, years: i64) -> RawFrame {
    let names = (0..columns).map(|c| format!("Field{c}")).collect();
    let mut raw = RawFrame::new(names);
    let base = NaiveDate::from_ymd_opt(2010, 3, 31).unwrap();
    for q in 0..years * 4 {
        let date = base + Duration::days(q * 91);
        let values: Vec<_> = (0..columns)
            .map(|c| {
                if (q as usize + c) % 3 == 0 {
                    None
                } else {
                    Value::number((q as f64 * 0.7 + c as f64).sin())
                }
            })
            .collect();
        raw.push("AAPL.O", Some(date.to_string()), values.clone())
            .unwrap();
        if q % 8 == 0 {
            raw.push("AAPL.O", Some(date.to_string()), values).unwrap();
        }
    }
    raw
}

fn make_snapshot(instruments: usize, columns: usize) -> RawFrame {
    let names = (0..columns).map(|c| format!("Field{c}")).collect();
    let mut raw = RawFrame::new(names);
    for i in 0..instruments {
        for rep in 0..3 {
            let values = (0..columns)
                .map(|c| {
                    if (rep + c) % 2 == 0 {
                        None
                    } else {
                        Some(Value::Number((i * c) as f64))
                    }
                })
                .collect();
            raw.push(format!("INST{i}"), None, values).unwrap();
        }
    }
    raw
}

// ── 1. Historic ──────────────────────────────────────────────────────

fn bench_historic(c: &mut Criterion) {
    let range = YearRange::new(
        NaiveDate::from_ymd_opt(2010, 1, 1).unwrap(),
        NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
    )
    .unwrap();

    let mut group = c.benchmark_group("standardize_historic");
    for columns in [10usize, 100] {
        let raw = make_history(columns, 15);
        group.bench_with_input(BenchmarkId::from_parameter(columns), &raw, |b, raw| {
            b.iter(|| standardize_historic(black_box("AAPL.O"), black_box(raw), &range).unwrap())
        });
    }
    group.finish();
}

// ── 2. Static ────────────────────────────────────────────────────────

fn bench_static(c: &mut Criterion) {
    let raw = make_snapshot(500, 50);
    c.bench_function("aggregate_static_500x50", |b| {
        b.iter(|| aggregate_static(black_box(&raw)).unwrap())
    });
}

criterion_group!(benches, bench_historic, bench_static);
criterion_main!(benches);
