//! Per-entity signal statistics.
//!
//! Readings arrive as [`Layer1Info`] from the capture layer. A reading of
//! exactly zero means the radio did not report that value, so zeros never
//! move the last/min/max fields. Devices report either dBm or RSSI; the
//! two scales are tracked separately.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::aggregator::PeakSignalAggregator;
use crate::component::{Component, ComponentBase};
use crate::element::{ElementId, ElementType, FieldId};
use crate::error::Result;
use crate::location::LocationTriplet;
use crate::registry::FieldRegistry;
use crate::rrd::{RrdPrototype, TrackedMinuteRrd};
use crate::store::ElementStore;

/// Units of a layer-1 signal reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    #[default]
    None,
    Dbm,
    Rssi,
}

/// Radio-level facts about one received frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Layer1Info {
    pub signal_type: SignalType,
    pub signal_dbm: i32,
    pub noise_dbm: i32,
    pub signal_rssi: i32,
    pub noise_rssi: i32,
    /// Carrier bitset.
    pub carrier: u64,
    /// Encoding bitset.
    pub encoding: u64,
    pub datarate: f64,
}

/// Receiver position at the time of a frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
    pub fix: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalDataFields {
    pub last_signal_dbm: FieldId,
    pub last_noise_dbm: FieldId,
    pub min_signal_dbm: FieldId,
    pub min_noise_dbm: FieldId,
    pub max_signal_dbm: FieldId,
    pub max_noise_dbm: FieldId,
    pub last_signal_rssi: FieldId,
    pub last_noise_rssi: FieldId,
    pub min_signal_rssi: FieldId,
    pub min_noise_rssi: FieldId,
    pub max_signal_rssi: FieldId,
    pub max_noise_rssi: FieldId,
    pub peak_loc: FieldId,
    pub maxseenrate: FieldId,
    pub encodingset: FieldId,
    pub carrierset: FieldId,
    pub signal_rrd: FieldId,
}

/// last/min/max trio for one reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Extremes {
    last: ElementId,
    min: ElementId,
    max: ElementId,
}

impl Extremes {
    /// Record a reading. Returns whether it set a new maximum.
    fn observe(&self, store: &mut ElementStore, reading: i32) -> Result<bool> {
        store.set(self.last, reading)?;
        let min = store.get::<i32>(self.min)?;
        if min == 0 || min > reading {
            store.set(self.min, reading)?;
        }
        let max = store.get::<i32>(self.max)?;
        if max == 0 || max < reading {
            store.set(self.max, reading)?;
            return Ok(true);
        }
        Ok(false)
    }
}

/// Signal and noise statistics, a minute of peak-signal history, and where
/// the strongest signal was heard.
#[derive(Debug, Clone)]
pub struct SignalData {
    base: ComponentBase,
    signal_dbm: Extremes,
    noise_dbm: Extremes,
    signal_rssi: Extremes,
    noise_rssi: Extremes,
    peak_loc: LocationTriplet,
    maxseenrate: ElementId,
    encodingset: ElementId,
    carrierset: ElementId,
    signal_rrd: TrackedMinuteRrd,
}

impl SignalData {
    /// Fold one frame's radio info in. `gps` is where the receiver was;
    /// `now` timestamps the signal history sample.
    pub fn add_signal(
        &self,
        store: &mut ElementStore,
        layer1: &Layer1Info,
        gps: Option<&GpsFix>,
        now: u64,
    ) -> Result<()> {
        let (signal, noise, signal_reading, noise_reading) = match layer1.signal_type {
            SignalType::Dbm => (
                Some(&self.signal_dbm),
                Some(&self.noise_dbm),
                layer1.signal_dbm,
                layer1.noise_dbm,
            ),
            SignalType::Rssi => (
                Some(&self.signal_rssi),
                Some(&self.noise_rssi),
                layer1.signal_rssi,
                layer1.noise_rssi,
            ),
            SignalType::None => (None, None, 0, 0),
        };

        if let Some(signal) = signal {
            if signal_reading != 0 {
                let new_peak = signal.observe(store, signal_reading)?;
                if new_peak {
                    if let Some(gps) = gps {
                        self.peak_loc
                            .set_full(store, gps.lat, gps.lon, gps.alt, gps.fix)?;
                    }
                }
                self.signal_rrd
                    .add_sample(store, i64::from(signal_reading), now)?;
            }
        }
        if let Some(noise) = noise {
            if noise_reading != 0 {
                noise.observe(store, noise_reading)?;
            }
        }

        store.bitor_assign(self.carrierset, layer1.carrier)?;
        store.bitor_assign(self.encodingset, layer1.encoding)?;
        if store.get::<f64>(self.maxseenrate)? < layer1.datarate {
            store.set(self.maxseenrate, layer1.datarate)?;
        }
        Ok(())
    }

    pub fn last_signal_dbm(&self, store: &ElementStore) -> Result<i32> {
        store.get(self.signal_dbm.last)
    }

    pub fn min_signal_dbm(&self, store: &ElementStore) -> Result<i32> {
        store.get(self.signal_dbm.min)
    }

    pub fn max_signal_dbm(&self, store: &ElementStore) -> Result<i32> {
        store.get(self.signal_dbm.max)
    }

    pub fn last_noise_dbm(&self, store: &ElementStore) -> Result<i32> {
        store.get(self.noise_dbm.last)
    }

    pub fn min_noise_dbm(&self, store: &ElementStore) -> Result<i32> {
        store.get(self.noise_dbm.min)
    }

    pub fn max_noise_dbm(&self, store: &ElementStore) -> Result<i32> {
        store.get(self.noise_dbm.max)
    }

    pub fn last_signal_rssi(&self, store: &ElementStore) -> Result<i32> {
        store.get(self.signal_rssi.last)
    }

    pub fn min_signal_rssi(&self, store: &ElementStore) -> Result<i32> {
        store.get(self.signal_rssi.min)
    }

    pub fn max_signal_rssi(&self, store: &ElementStore) -> Result<i32> {
        store.get(self.signal_rssi.max)
    }

    pub fn last_noise_rssi(&self, store: &ElementStore) -> Result<i32> {
        store.get(self.noise_rssi.last)
    }

    pub fn min_noise_rssi(&self, store: &ElementStore) -> Result<i32> {
        store.get(self.noise_rssi.min)
    }

    pub fn max_noise_rssi(&self, store: &ElementStore) -> Result<i32> {
        store.get(self.noise_rssi.max)
    }

    /// Highest data rate seen (phy dependent units).
    pub fn max_seen_rate(&self, store: &ElementStore) -> Result<f64> {
        store.get(self.maxseenrate)
    }

    pub fn encoding_set(&self, store: &ElementStore) -> Result<u64> {
        store.get(self.encodingset)
    }

    pub fn carrier_set(&self, store: &ElementStore) -> Result<u64> {
        store.get(self.carrierset)
    }

    #[must_use]
    pub fn peak_loc(&self) -> &LocationTriplet {
        &self.peak_loc
    }

    #[must_use]
    pub fn signal_rrd(&self) -> &TrackedMinuteRrd {
        &self.signal_rrd
    }

    pub fn signal_rrd_mut(&mut self) -> &mut TrackedMinuteRrd {
        &mut self.signal_rrd
    }
}

fn register_extremes(
    registry: &mut FieldRegistry,
    reading: &str,
    unit: &str,
) -> Result<[FieldId; 3]> {
    let mut ids = [FieldId::new(0); 3];
    for (slot, which) in ids.iter_mut().zip(["last", "min", "max"]) {
        *slot = registry.register(
            &format!("airtrack.common.signal.{which}_{reading}_{unit}"),
            ElementType::Int32,
            &format!("{which} {reading} ({unit})"),
        )?;
    }
    Ok(ids)
}

impl Component for SignalData {
    type Fields = SignalDataFields;

    fn register_fields(registry: &mut FieldRegistry) -> Result<SignalDataFields> {
        let [last_signal_dbm, min_signal_dbm, max_signal_dbm] =
            register_extremes(registry, "signal", "dbm")?;
        let [last_noise_dbm, min_noise_dbm, max_noise_dbm] =
            register_extremes(registry, "noise", "dbm")?;
        let [last_signal_rssi, min_signal_rssi, max_signal_rssi] =
            register_extremes(registry, "signal", "rssi")?;
        let [last_noise_rssi, min_noise_rssi, max_noise_rssi] =
            register_extremes(registry, "noise", "rssi")?;

        Ok(SignalDataFields {
            last_signal_dbm,
            last_noise_dbm,
            min_signal_dbm,
            min_noise_dbm,
            max_signal_dbm,
            max_noise_dbm,
            last_signal_rssi,
            last_noise_rssi,
            min_signal_rssi,
            min_noise_rssi,
            max_signal_rssi,
            max_noise_rssi,
            peak_loc: registry.register_complex(
                "airtrack.common.signal.peak_loc",
                LocationTriplet::factory(),
                "location of strongest signal",
            )?,
            maxseenrate: registry.register(
                "airtrack.common.signal.maxseenrate",
                ElementType::Double,
                "maximum observed data rate (phy dependent)",
            )?,
            encodingset: registry.register(
                "airtrack.common.signal.encodingset",
                ElementType::UInt64,
                "bitset of observed encodings",
            )?,
            carrierset: registry.register(
                "airtrack.common.signal.carrierset",
                ElementType::UInt64,
                "bitset of observed carrier types",
            )?,
            signal_rrd: registry.register_complex(
                "airtrack.common.signal.signal_rrd",
                Arc::new(RrdPrototype::minute(Arc::new(PeakSignalAggregator))),
                "signal data for past minute",
            )?,
        })
    }

    fn attach(
        registry: &mut FieldRegistry,
        store: &mut ElementStore,
        fields: SignalDataFields,
        base: ComponentBase,
    ) -> Result<Self> {
        let mut extremes = |last, min, max| -> Result<Extremes> {
            Ok(Extremes {
                last: base.reserve(registry, store, last)?,
                min: base.reserve(registry, store, min)?,
                max: base.reserve(registry, store, max)?,
            })
        };
        let signal_dbm = extremes(
            fields.last_signal_dbm,
            fields.min_signal_dbm,
            fields.max_signal_dbm,
        )?;
        let noise_dbm = extremes(
            fields.last_noise_dbm,
            fields.min_noise_dbm,
            fields.max_noise_dbm,
        )?;
        let signal_rssi = extremes(
            fields.last_signal_rssi,
            fields.min_signal_rssi,
            fields.max_signal_rssi,
        )?;
        let noise_rssi = extremes(
            fields.last_noise_rssi,
            fields.min_noise_rssi,
            fields.max_noise_rssi,
        )?;

        let rrd_field = fields.signal_rrd;
        Ok(Self {
            signal_dbm,
            noise_dbm,
            signal_rssi,
            noise_rssi,
            peak_loc: base.reserve_component(registry, store, fields.peak_loc)?,
            maxseenrate: base.reserve(registry, store, fields.maxseenrate)?,
            encodingset: base.reserve(registry, store, fields.encodingset)?,
            carrierset: base.reserve(registry, store, fields.carrierset)?,
            signal_rrd: base.reserve_with(registry, store, rrd_field, |registry, store, existing| {
                TrackedMinuteRrd::with_aggregator(
                    registry,
                    store,
                    Arc::new(PeakSignalAggregator),
                    Some(rrd_field),
                    existing,
                )
            })?,
            base,
        })
    }

    fn base(&self) -> &ComponentBase {
        &self.base
    }

    fn pre_serialize(&mut self, store: &mut ElementStore, now: u64) -> Result<()> {
        self.signal_rrd.pre_serialize(store, now)
    }
}
