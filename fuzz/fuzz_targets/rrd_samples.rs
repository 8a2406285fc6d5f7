#![no_main]

use airtrack_core::rrd::{MinuteSnapshot, RrdSnapshot};
use airtrack_core::{AggregatorKind, SampleOutcome};
use libfuzzer_sys::fuzz_target;

const POLICIES: [AggregatorKind; 3] = [
    AggregatorKind::Default,
    AggregatorKind::PeakSignal,
    AggregatorKind::Extreme,
];

fuzz_target!(|data: &[u8]| {
    let Some((&policy, rest)) = data.split_first() else {
        return;
    };
    if rest.len() > 65_536 {
        return;
    }

    let agg = POLICIES[usize::from(policy % 3)].build();
    let mut full = RrdSnapshot::blank(agg.default_value());
    let mut minute = MinuteSnapshot::blank(agg.default_value());
    let mut ts = 1_700_000_000u64;

    for chunk in rest.chunks(6) {
        let [step_tag, s0, s1, s2, v0, v1] = match chunk {
            [a, b, c, d, e, f] => [*a, *b, *c, *d, *e, *f],
            _ => break,
        };
        let step = u64::from_le_bytes([s0, s1, s2, 0, 0, 0, 0, 0]);
        let value = i64::from(i16::from_le_bytes([v0, v1]));

        // high bit walks backwards to exercise stale samples
        if step_tag & 0x80 == 0 {
            ts = ts.saturating_add(step >> (step_tag % 24));
        }
        let at = if step_tag & 0x80 == 0 {
            ts
        } else {
            ts.saturating_sub(step % 120)
        };

        let before = full.clone();
        let outcome = full.add_sample(agg.as_ref(), value, at);
        minute.add_sample(agg.as_ref(), value, at);

        if outcome == SampleOutcome::Stale {
            assert_eq!(full, before);
        } else {
            assert_eq!(full.last_time, at);
        }
        assert_eq!(full.seconds, minute.seconds);
        assert_eq!(full.last_time, minute.last_time);
    }
});
