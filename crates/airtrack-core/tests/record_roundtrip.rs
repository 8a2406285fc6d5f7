//! Export → import → attach round trips for the built-in records.
//!
//! Each test builds a record in one store, exports it to JSON text, rebuilds
//! it in a fresh store against a fresh registry, attaches the record type
//! to the rebuilt root and checks the attached view reads back the same
//! values and keeps working.

use std::sync::Arc;

use airtrack_core::aggregator::PeakSignalAggregator;
use airtrack_core::export::{export_component, to_json, to_value};
use airtrack_core::import::from_json_str;
use airtrack_core::location::TrackedLocation;
use airtrack_core::seenby::SeenByData;
use airtrack_core::signal::{GpsFix, Layer1Info, SignalData, SignalType};
use airtrack_core::{
    Component, ElementStore, ElementType, FieldRegistry, SampleOutcome, TrackedMinuteRrd,
    TrackedRrd, register_builtin_fields,
};

/// Fresh registry with every built-in field, as a restarted process has.
fn fresh() -> (FieldRegistry, ElementStore) {
    let mut reg = FieldRegistry::new();
    register_builtin_fields(&mut reg).unwrap();
    (reg, ElementStore::new())
}

fn dbm(signal: i32) -> Layer1Info {
    Layer1Info {
        signal_type: SignalType::Dbm,
        signal_dbm: signal,
        noise_dbm: -95,
        carrier: 0b1,
        encoding: 0b10,
        datarate: 54.0,
        ..Layer1Info::default()
    }
}

#[test]
fn signal_data_survives_round_trip() {
    let (mut reg, mut store) = fresh();
    let mut signal = SignalData::create(&mut reg, &mut store).unwrap();
    let gps = GpsFix {
        lat: 40.7,
        lon: -74.0,
        alt: 12.0,
        fix: 3,
    };
    signal.add_signal(&mut store, &dbm(-61), Some(&gps), 1_000).unwrap();
    signal.add_signal(&mut store, &dbm(-48), Some(&gps), 1_001).unwrap();
    signal.add_signal(&mut store, &dbm(-70), None, 1_002).unwrap();

    let exported = export_component(&reg, &mut store, &mut signal, 1_010).unwrap();
    let text = serde_json::to_string(&exported).unwrap();

    let (mut reg2, mut store2) = fresh();
    let root = from_json_str(&reg2, &mut store2, &text, None).unwrap();
    assert_eq!(store2.len(), store.len());

    let again = SignalData::build(&mut reg2, &mut store2, None, Some(root)).unwrap();
    assert_eq!(again.max_signal_dbm(&store2).unwrap(), -48);
    assert_eq!(again.min_signal_dbm(&store2).unwrap(), -70);
    assert_eq!(again.last_noise_dbm(&store2).unwrap(), -95);
    assert_eq!(again.carrier_set(&store2).unwrap(), 0b1);
    assert_eq!(again.peak_loc().lat(&store2).unwrap(), 40.7);
    assert_eq!(
        again.signal_rrd().seconds(&store2).unwrap(),
        signal.signal_rrd().seconds(&store).unwrap()
    );
    assert_eq!(
        again.signal_rrd().aggregator_name(&store2).unwrap(),
        "peak_signal"
    );

    again.add_signal(&mut store2, &dbm(-30), None, 1_011).unwrap();
    assert_eq!(again.max_signal_dbm(&store2).unwrap(), -30);
    assert!(store2.check_invariants().is_ok());

    assert_eq!(
        to_value(&reg, &store, signal.root()).unwrap(),
        exported,
        "export is pure once pre_serialize has run"
    );
}

#[test]
fn rrd_history_continues_after_reload() {
    let (mut reg, mut store) = fresh();
    let rrd = TrackedRrd::create(&mut reg, &mut store).unwrap();
    for t in 0..90u64 {
        rrd.add_sample(&mut store, 1, 5_000 + t).unwrap();
    }
    let text = to_json(&reg, &store, rrd.root()).unwrap();

    let (mut reg2, mut store2) = fresh();
    let root = from_json_str(&reg2, &mut store2, &text, None).unwrap();
    let again = TrackedRrd::build(&mut reg2, &mut store2, None, Some(root)).unwrap();
    assert_eq!(again.snapshot(&store2).unwrap(), rrd.snapshot(&store).unwrap());

    assert_eq!(
        again.add_sample(&mut store2, 1, 5_000).unwrap(),
        SampleOutcome::Stale
    );
    assert_eq!(
        again.add_sample(&mut store2, 1, 5_090).unwrap(),
        SampleOutcome::Advanced
    );
}

#[test]
fn peak_history_exported_at_last_sample_second_keeps_reading() {
    let (mut reg, mut store) = fresh();
    let mut rrd = TrackedMinuteRrd::with_aggregator(
        &mut reg,
        &mut store,
        Arc::new(PeakSignalAggregator),
        None,
        None,
    )
    .unwrap();
    rrd.add_sample(&mut store, -40, 1_000).unwrap();

    let exported = export_component(&reg, &mut store, &mut rrd, 1_000).unwrap();
    let seconds = exported["airtrack.common.rrd.minute_vec"].as_array().unwrap();
    assert_eq!(seconds[1_000 % 60], -40);
}

#[test]
fn tracked_location_averages_survive_round_trip() {
    let (mut reg, mut store) = fresh();
    let loc = TrackedLocation::create(&mut reg, &mut store).unwrap();
    loc.add_loc(&mut store, 10.0, 20.0, 100.0, 3).unwrap();
    loc.add_loc(&mut store, 12.0, 22.0, 110.0, 3).unwrap();
    let text = to_json(&reg, &store, loc.root()).unwrap();

    let (mut reg2, mut store2) = fresh();
    let root = from_json_str(&reg2, &mut store2, &text, None).unwrap();
    let again = TrackedLocation::build(&mut reg2, &mut store2, None, Some(root)).unwrap();
    assert_eq!(again.num_samples(&store2).unwrap(), 2);
    assert_eq!(again.min_loc().lat(&store2).unwrap(), 10.0);
    assert_eq!(again.max_loc().lon(&store2).unwrap(), 22.0);

    again.add_loc(&mut store2, 14.0, 24.0, 120.0, 3).unwrap();
    assert_eq!(again.num_samples(&store2).unwrap(), 3);
    assert!((again.avg_loc().lat(&store2).unwrap() - 12.0).abs() < 1e-3);
}

#[test]
fn seen_by_frequency_map_survives_round_trip() {
    let (mut reg, mut store) = fresh();
    let seen = SeenByData::create(&mut reg, &mut store).unwrap();
    seen.observe(&mut store, 100, Some(2_412_000)).unwrap();
    seen.observe(&mut store, 101, Some(5_180_000)).unwrap();
    let text = to_json(&reg, &store, seen.root()).unwrap();

    let (mut reg2, mut store2) = fresh();
    let root = from_json_str(&reg2, &mut store2, &text, None).unwrap();
    let again = SeenByData::build(&mut reg2, &mut store2, None, Some(root)).unwrap();
    assert_eq!(
        again.frequencies(&store2).unwrap(),
        vec![(2_412_000, 1), (5_180_000, 1)]
    );
    assert_eq!(again.num_packets(&store2).unwrap(), 2);
}

#[test]
fn attach_repairs_partial_record() {
    let (mut reg, mut store) = fresh();
    let text = r#"{
        "airtrack.common.rrd.last_time": 100,
        "airtrack.common.rrd.minute_vec": [1, 2, 3],
        "airtrack.common.rrd.aggregator": "extreme"
    }"#;
    let root = from_json_str(&reg, &mut store, text, None).unwrap();
    assert_eq!(store.element_type(root).unwrap(), ElementType::Map);

    let rrd = TrackedRrd::build(&mut reg, &mut store, None, Some(root)).unwrap();
    let seconds = rrd.seconds(&store).unwrap();
    assert_eq!(seconds.len(), 60);
    assert_eq!(&seconds[..3], &[1, 2, 3]);
    assert_eq!(rrd.hours(&store).unwrap().len(), 24);
    assert_eq!(rrd.aggregator_name(&store).unwrap(), "default");
    assert_eq!(rrd.last_time(&store).unwrap(), 100);
}
