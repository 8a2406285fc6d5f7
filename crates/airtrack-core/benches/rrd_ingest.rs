//! Benchmarks for RRD sample ingest.
//!
//! Performance budgets:
//! - Pure snapshot `add_sample` (same minute): **< 1μs**
//! - Tracked `add_sample` through the value tree: **< 10μs**
//! - Export of a full RRD to JSON: **< 200μs**

use airtrack_core::aggregator::{PeakSignalAggregator, SumAggregator};
use airtrack_core::export::to_json;
use airtrack_core::rrd::RrdSnapshot;
use airtrack_core::{Component, ElementStore, FieldRegistry, TrackedMinuteRrd, TrackedRrd};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;

const BASE_TS: u64 = 1_700_000_000;

// =============================================================================
// Pure algorithm
// =============================================================================

fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("rrd_snapshot_add_sample");
    group.throughput(Throughput::Elements(1));

    let steps = [
        ("merge", 0u64),
        ("advance", 1),
        ("minute_gap", 61),
        ("hour_gap", 3_601),
    ];
    for (name, step) in steps {
        group.bench_with_input(BenchmarkId::new("sum", name), &step, |b, &step| {
            let mut snap = RrdSnapshot::default();
            let mut ts = BASE_TS;
            b.iter(|| {
                ts += step;
                black_box(snap.add_sample(&SumAggregator, black_box(7), ts));
            });
        });
    }
    group.finish();
}

// =============================================================================
// Through the value tree
// =============================================================================

fn bench_tracked(c: &mut Criterion) {
    let mut group = c.benchmark_group("rrd_tracked_add_sample");
    group.throughput(Throughput::Elements(1));

    group.bench_function("full_sum_advance", |b| {
        let mut reg = FieldRegistry::new();
        let mut store = ElementStore::new();
        let rrd = TrackedRrd::create(&mut reg, &mut store).unwrap();
        let mut ts = BASE_TS;
        b.iter(|| {
            ts += 1;
            black_box(rrd.add_sample(&mut store, black_box(3), ts).unwrap());
        });
    });

    group.bench_function("minute_peak_advance", |b| {
        let mut reg = FieldRegistry::new();
        let mut store = ElementStore::new();
        let rrd = TrackedMinuteRrd::with_aggregator(
            &mut reg,
            &mut store,
            Arc::new(PeakSignalAggregator),
            None,
            None,
        )
        .unwrap();
        let mut ts = BASE_TS;
        b.iter(|| {
            ts += 1;
            black_box(rrd.add_sample(&mut store, black_box(-55), ts).unwrap());
        });
    });
    group.finish();
}

fn bench_export(c: &mut Criterion) {
    let mut reg = FieldRegistry::new();
    let mut store = ElementStore::new();
    let rrd = TrackedRrd::create(&mut reg, &mut store).unwrap();
    for t in 0..3_600 {
        rrd.add_sample(&mut store, t as i64 % 17, BASE_TS + t).unwrap();
    }
    c.bench_function("rrd_export_json", |b| {
        b.iter(|| black_box(to_json(&reg, &store, rrd.root()).unwrap()));
    });
}

// =============================================================================
// Criterion groups and main
// =============================================================================

criterion_group!(benches, bench_snapshot, bench_tracked, bench_export);
criterion_main!(benches);
