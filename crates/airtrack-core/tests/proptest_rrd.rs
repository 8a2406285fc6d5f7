//! Property-based tests for the ring-buffer aggregators.
//!
//! Verifies ingest invariants for arbitrary sample streams:
//! - Slot counts are fixed at 60/60/24 regardless of input
//! - last_time is the largest accepted timestamp; older samples are Stale
//!   and change nothing
//! - Seconds hold exactly the samples of the trailing 60 s window
//! - With the sum policy, the current minute slot is the mean of the
//!   seconds and the current hour slot is the mean of the minutes
//! - The tracked RRD agrees with the pure snapshot algorithm
//! - The minute-only variant keeps the same seconds as the full RRD

use proptest::prelude::*;

use airtrack_core::aggregator::{
    Aggregator, ExtremeAggregator, PeakSignalAggregator, SumAggregator,
};
use airtrack_core::rrd::{MinuteSnapshot, RrdSnapshot};
use airtrack_core::{
    Component, ElementStore, FieldRegistry, SampleOutcome, TrackedMinuteRrd, TrackedRrd,
};

// ────────────────────────────────────────────────────────────────────
// Strategies
// ────────────────────────────────────────────────────────────────────

/// A stream of `(value, timestamp)` with mostly forward steps of every
/// scale (same second, seconds, minutes, hours, days) and some stale ones.
fn arb_stream() -> impl Strategy<Value = Vec<(i64, u64)>> {
    let step = prop_oneof![
        3 => Just(0u64),
        6 => 1u64..=5,
        3 => 55u64..=65,
        2 => 61u64..=3_000,
        1 => 3_500u64..=90_000,
    ];
    let backwards = 1u64..=120;
    prop::collection::vec(
        (-1_000i64..=1_000, prop::bool::weighted(0.1), step, backwards),
        1..120,
    )
    .prop_map(|raw| {
        let mut ts = 1_700_000_000u64;
        raw.into_iter()
            .map(|(value, stale, step, back)| {
                if stale {
                    (value, ts.saturating_sub(back))
                } else {
                    ts += step;
                    (value, ts)
                }
            })
            .collect()
    })
}

fn arb_policy() -> impl Strategy<Value = usize> {
    0usize..3
}

/// Truncating mean, computed independently of the policy.
fn mean(slots: &[i64]) -> i64 {
    let sum: i128 = slots.iter().map(|&v| i128::from(v)).sum();
    (sum / slots.len() as i128) as i64
}

fn policy(i: usize) -> Box<dyn Aggregator> {
    match i {
        0 => Box::new(SumAggregator),
        1 => Box::new(PeakSignalAggregator),
        _ => Box::new(ExtremeAggregator),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// last_time tracks the newest accepted sample; stale samples are no-ops.
    #[test]
    fn stale_samples_change_nothing(stream in arb_stream(), p in arb_policy()) {
        let agg = policy(p);
        let mut snap = RrdSnapshot::default();
        for (value, ts) in stream {
            let before = snap.clone();
            let outcome = snap.add_sample(agg.as_ref(), value, ts);
            if ts < before.last_time {
                prop_assert_eq!(outcome, SampleOutcome::Stale);
                prop_assert_eq!(&snap, &before);
            } else {
                prop_assert_ne!(outcome, SampleOutcome::Stale);
                prop_assert_eq!(snap.last_time, ts);
            }
        }
    }

    /// Under the sum policy the seconds hold exactly the trailing minute.
    #[test]
    fn seconds_cover_trailing_minute(stream in arb_stream()) {
        let mut snap = RrdSnapshot::default();
        let mut accepted = Vec::new();
        for &(value, ts) in &stream {
            if snap.add_sample(&SumAggregator, value, ts) != SampleOutcome::Stale {
                accepted.push((value, ts));
            }
        }
        let window_start = snap.last_time.saturating_sub(60);
        let expected: i64 = accepted
            .iter()
            .filter(|&&(_, ts)| ts > window_start)
            .map(|&(v, _)| v)
            .sum();
        prop_assert_eq!(snap.seconds.iter().sum::<i64>(), expected);
    }

    /// Under the sum policy each current rollup is the mean of the level
    /// below it. A day-long gap writes the raw sample at every level, so
    /// the property is checked after every other accepted sample.
    #[test]
    fn rollups_match_lower_level(stream in arb_stream()) {
        let mut snap = RrdSnapshot::default();
        for (value, ts) in stream {
            let outcome = snap.add_sample(&SumAggregator, value, ts);
            if matches!(outcome, SampleOutcome::Stale | SampleOutcome::Reset) {
                continue;
            }
            let min = ((snap.last_time / 60) % 60) as usize;
            let hour = ((snap.last_time / 3_600) % 24) as usize;
            prop_assert_eq!(snap.minutes[min], mean(&snap.seconds));
            prop_assert_eq!(snap.hours[hour], mean(&snap.minutes));
        }
    }

    /// The minute-only ring keeps the same seconds as the full one.
    #[test]
    fn minute_variant_matches_full_seconds(stream in arb_stream(), p in arb_policy()) {
        let agg = policy(p);
        let mut full = RrdSnapshot::default();
        let mut minute = MinuteSnapshot::default();
        for (value, ts) in stream {
            full.add_sample(agg.as_ref(), value, ts);
            minute.add_sample(agg.as_ref(), value, ts);
            prop_assert_eq!(full.seconds, minute.seconds);
            prop_assert_eq!(full.last_time, minute.last_time);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Writing through the value tree gives the same result as the pure
    /// algorithm, and the tree keeps its fixed shape.
    #[test]
    fn tracked_rrd_agrees_with_snapshot(stream in arb_stream(), p in arb_policy()) {
        let mut reg = FieldRegistry::new();
        let mut store = ElementStore::new();
        let rrd = TrackedRrd::with_aggregator(
            &mut reg,
            &mut store,
            policy(p).into(),
            None,
            None,
        )
        .unwrap();
        let agg = policy(p);
        let mut snap = RrdSnapshot::blank(agg.default_value());
        let live = store.len();

        for (value, ts) in stream {
            let tracked = rrd.add_sample(&mut store, value, ts).unwrap();
            let pure = snap.add_sample(agg.as_ref(), value, ts);
            prop_assert_eq!(tracked, pure);
        }
        prop_assert_eq!(rrd.snapshot(&store).unwrap(), snap);
        prop_assert_eq!(rrd.seconds(&store).unwrap().len(), 60);
        prop_assert_eq!(rrd.minutes(&store).unwrap().len(), 60);
        prop_assert_eq!(rrd.hours(&store).unwrap().len(), 24);
        prop_assert_eq!(store.len(), live);
        prop_assert!(store.check_invariants().is_ok());
    }

    /// Same for the minute-only variant.
    #[test]
    fn tracked_minute_rrd_agrees_with_snapshot(stream in arb_stream(), p in arb_policy()) {
        let mut reg = FieldRegistry::new();
        let mut store = ElementStore::new();
        let rrd = TrackedMinuteRrd::with_aggregator(
            &mut reg,
            &mut store,
            policy(p).into(),
            None,
            None,
        )
        .unwrap();
        let agg = policy(p);
        let mut snap = MinuteSnapshot::blank(agg.default_value());

        for (value, ts) in stream {
            rrd.add_sample(&mut store, value, ts).unwrap();
            snap.add_sample(agg.as_ref(), value, ts);
        }
        prop_assert_eq!(rrd.snapshot(&store).unwrap(), snap);
    }
}

#[test]
fn fresh_tracked_rrd_is_blank() {
    let mut reg = FieldRegistry::new();
    let mut store = ElementStore::new();
    let rrd = TrackedRrd::create(&mut reg, &mut store).unwrap();
    assert_eq!(rrd.snapshot(&store).unwrap(), RrdSnapshot::default());
}
