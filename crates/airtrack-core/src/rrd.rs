//! Round-robin ring buffers of per-second, per-minute and per-hour samples.
//!
//! [`TrackedRrd`] keeps 60 second slots, 60 minute slots and 24 hour slots;
//! [`TrackedMinuteRrd`] keeps only the 60 second slots. Each slot is
//! addressed by `timestamp mod period`. Coarser slots are rollups of the
//! finer bucket below them, reduced by the record's [`Aggregator`].
//!
//! Samples must arrive in nondecreasing time order. Older samples are
//! dropped. When time jumps forward, the slots covering the silent interval
//! are fast-forwarded to the policy's default value.
//!
//! The ring arithmetic lives in [`RrdSnapshot`] / [`MinuteSnapshot`], which
//! are plain values. The tracked records load a snapshot from the store,
//! apply the sample, then write back only the slots that changed, so a
//! failed load leaves the tree untouched.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::aggregator::{Aggregator, SumAggregator};
use crate::component::{Component, ComponentBase, ComponentFactory, build_with};
use crate::element::{ElementId, ElementType, FieldId};
use crate::error::{OwnershipError, Result};
use crate::registry::FieldRegistry;
use crate::store::ElementStore;

pub const SECONDS_PER_MINUTE: usize = 60;
pub const MINUTES_PER_HOUR: usize = 60;
pub const HOURS_PER_DAY: usize = 24;

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * 60;
const DAY: u64 = 60 * 60 * 24;

/// Which path [`RrdSnapshot::add_sample`] took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleOutcome {
    /// Older than the last update; nothing changed.
    Stale,
    /// Same timestamp as the last update; folded into its second slot.
    Merged,
    /// Within a minute of the last update.
    Advanced,
    /// More than a minute but at most an hour since the last update.
    MinuteGap,
    /// More than an hour but at most a day since the last update.
    HourGap,
    /// More than a day since the last update (or, for the minute-only
    /// variant, more than a minute); every slot was reset.
    Reset,
}

impl fmt::Display for SampleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stale => "stale",
            Self::Merged => "merged",
            Self::Advanced => "advanced",
            Self::MinuteGap => "minute_gap",
            Self::HourGap => "hour_gap",
            Self::Reset => "reset",
        };
        f.write_str(s)
    }
}

/// Blank every slot strictly between `last` and `current`, wrapping.
///
/// When `last == current` every slot except `current` is blanked, since
/// the ring has come all the way round.
fn fast_forward(slots: &mut [i64], last: usize, current: usize, blank: i64) {
    let len = slots.len();
    let span = (current + len - last - 1) % len;
    for step in 1..=span {
        slots[(last + step) % len] = blank;
    }
}

/// Blank every slot, then write `value` at `index`.
fn reset_to(slots: &mut [i64], index: usize, value: i64, blank: i64) {
    slots.fill(blank);
    slots[index] = value;
}

// =============================================================================
// Snapshots
// =============================================================================

/// In-memory state of a full ring buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RrdSnapshot {
    pub last_time: u64,
    pub seconds: [i64; SECONDS_PER_MINUTE],
    pub minutes: [i64; MINUTES_PER_HOUR],
    pub hours: [i64; HOURS_PER_DAY],
}

impl Default for RrdSnapshot {
    fn default() -> Self {
        Self::blank(0)
    }
}

impl RrdSnapshot {
    /// Every slot set to `blank`, last update at 0.
    #[must_use]
    pub fn blank(blank: i64) -> Self {
        Self {
            last_time: 0,
            seconds: [blank; SECONDS_PER_MINUTE],
            minutes: [blank; MINUTES_PER_HOUR],
            hours: [blank; HOURS_PER_DAY],
        }
    }

    /// Apply one sample.
    pub fn add_sample(
        &mut self,
        agg: &dyn Aggregator,
        value: i64,
        timestamp: u64,
    ) -> SampleOutcome {
        if timestamp < self.last_time {
            return SampleOutcome::Stale;
        }

        let blank = agg.default_value();
        let sec = (timestamp % MINUTE) as usize;
        let min = ((timestamp / MINUTE) % MINUTES_PER_HOUR as u64) as usize;
        let hour = ((timestamp / HOUR) % HOURS_PER_DAY as u64) as usize;
        let last = self.last_time;
        let last_sec = (last % MINUTE) as usize;
        let last_min = ((last / MINUTE) % MINUTES_PER_HOUR as u64) as usize;
        let last_hour = ((last / HOUR) % HOURS_PER_DAY as u64) as usize;
        let gap = timestamp - last;

        let outcome = if gap > DAY {
            // nothing we hold is still inside the window
            reset_to(&mut self.seconds, sec, value, blank);
            reset_to(&mut self.minutes, min, value, blank);
            reset_to(&mut self.hours, hour, value, blank);
            SampleOutcome::Reset
        } else if gap > HOUR {
            reset_to(&mut self.seconds, sec, value, blank);
            let minute_value = agg.combine_bucket(&self.seconds);
            reset_to(&mut self.minutes, min, minute_value, blank);
            fast_forward(&mut self.hours, last_hour, hour, blank);
            self.hours[hour] = agg.combine_bucket(&self.minutes);
            SampleOutcome::HourGap
        } else if gap > MINUTE {
            reset_to(&mut self.seconds, sec, value, blank);
            fast_forward(&mut self.minutes, last_min, min, blank);
            self.minutes[min] = agg.combine_bucket(&self.seconds);
            self.hours[hour] = agg.combine_bucket(&self.minutes);
            SampleOutcome::MinuteGap
        } else {
            let outcome = if gap == 0 {
                self.seconds[sec] = agg.combine_element(self.seconds[sec], value);
                SampleOutcome::Merged
            } else {
                fast_forward(&mut self.seconds, last_sec, sec, blank);
                self.seconds[sec] = value;
                SampleOutcome::Advanced
            };
            self.minutes[min] = agg.combine_bucket(&self.seconds);
            self.hours[hour] = agg.combine_bucket(&self.minutes);
            outcome
        };

        self.last_time = timestamp;
        outcome
    }
}

/// In-memory state of a minute-only ring buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinuteSnapshot {
    pub last_time: u64,
    pub seconds: [i64; SECONDS_PER_MINUTE],
}

impl Default for MinuteSnapshot {
    fn default() -> Self {
        Self::blank(0)
    }
}

impl MinuteSnapshot {
    #[must_use]
    pub fn blank(blank: i64) -> Self {
        Self {
            last_time: 0,
            seconds: [blank; SECONDS_PER_MINUTE],
        }
    }

    /// Apply one sample. A gap of more than a minute wipes the window and
    /// keeps only this sample.
    pub fn add_sample(
        &mut self,
        agg: &dyn Aggregator,
        value: i64,
        timestamp: u64,
    ) -> SampleOutcome {
        if timestamp < self.last_time {
            return SampleOutcome::Stale;
        }

        let blank = agg.default_value();
        let sec = (timestamp % MINUTE) as usize;
        let last_sec = (self.last_time % MINUTE) as usize;
        let gap = timestamp - self.last_time;

        let outcome = if gap > MINUTE {
            reset_to(&mut self.seconds, sec, value, blank);
            SampleOutcome::Reset
        } else if gap == 0 {
            self.seconds[sec] = agg.combine_element(self.seconds[sec], value);
            SampleOutcome::Merged
        } else {
            fast_forward(&mut self.seconds, last_sec, sec, blank);
            self.seconds[sec] = value;
            SampleOutcome::Advanced
        };

        self.last_time = timestamp;
        outcome
    }
}

// =============================================================================
// Field registration
// =============================================================================

/// Ids of every field either ring-buffer variant uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RrdFields {
    pub last_time: FieldId,
    pub minute_vec: FieldId,
    pub hour_vec: FieldId,
    pub day_vec: FieldId,
    pub blank_val: FieldId,
    pub aggregator: FieldId,
    pub second: FieldId,
    pub minute: FieldId,
    pub hour: FieldId,
}

impl RrdFields {
    pub fn register(registry: &mut FieldRegistry) -> Result<Self> {
        let fields = Self {
            last_time: registry.register(
                "airtrack.common.rrd.last_time",
                ElementType::UInt64,
                "last time updated",
            )?,
            minute_vec: registry.register(
                "airtrack.common.rrd.minute_vec",
                ElementType::Vector,
                "past minute values per second",
            )?,
            hour_vec: registry.register(
                "airtrack.common.rrd.hour_vec",
                ElementType::Vector,
                "past hour values per minute",
            )?,
            day_vec: registry.register(
                "airtrack.common.rrd.day_vec",
                ElementType::Vector,
                "past day values per hour",
            )?,
            blank_val: registry.register(
                "airtrack.common.rrd.blank_val",
                ElementType::Int64,
                "blank value",
            )?,
            aggregator: registry.register(
                "airtrack.common.rrd.aggregator",
                ElementType::String,
                "aggregator name",
            )?,
            second: registry.register(
                "airtrack.common.rrd.second",
                ElementType::Int64,
                "second value",
            )?,
            minute: registry.register(
                "airtrack.common.rrd.minute",
                ElementType::Int64,
                "minute value",
            )?,
            hour: registry.register(
                "airtrack.common.rrd.hour",
                ElementType::Int64,
                "hour value",
            )?,
        };
        registry.set_entry_field(fields.minute_vec, fields.second)?;
        registry.set_entry_field(fields.hour_vec, fields.minute)?;
        registry.set_entry_field(fields.day_vec, fields.hour)?;
        Ok(fields)
    }
}

// =============================================================================
// Slot plumbing
// =============================================================================

/// Pad or trim `vector` to exactly `len` int64 slots tagged `slot_field`.
fn fit_slots(
    store: &mut ElementStore,
    vector: ElementId,
    slot_field: FieldId,
    len: usize,
    blank: i64,
) -> Result<()> {
    let have = store.size(vector)?;
    if have > len {
        warn!(%vector, have, len, "trimming oversized rrd slot vector");
        store.truncate(vector, len)?;
    } else if have < len {
        if have > 0 {
            warn!(%vector, have, len, "padding short rrd slot vector");
        }
        for _ in have..len {
            let slot = store.alloc_scalar(blank, Some(slot_field));
            store.push(vector, slot)?;
        }
    }
    Ok(())
}

fn load_slots<const N: usize>(store: &ElementStore, vector: ElementId) -> Result<[i64; N]> {
    let ids = store.vector(vector)?;
    if ids.len() != N {
        return Err(OwnershipError::IndexOutOfRange {
            index: N - 1,
            len: ids.len(),
        }
        .into());
    }
    let mut out = [0i64; N];
    for (slot, &id) in out.iter_mut().zip(ids) {
        *slot = store.get::<i64>(id)?;
    }
    Ok(out)
}

fn store_slots(
    store: &mut ElementStore,
    vector: ElementId,
    before: &[i64],
    after: &[i64],
) -> Result<()> {
    let ids = store.vector(vector)?.to_vec();
    for ((&id, old), &new) in ids.iter().zip(before).zip(after) {
        if *old != new {
            store.set(id, new)?;
        }
    }
    Ok(())
}

/// Write policy metadata, warning if an attached record named another policy.
fn stamp_policy(
    store: &mut ElementStore,
    blank_val: ElementId,
    aggregator_name: ElementId,
    aggregator: &dyn Aggregator,
) -> Result<()> {
    let previous = store.get_str(aggregator_name)?;
    if !previous.is_empty() && previous != aggregator.name() {
        warn!(
            previous,
            current = aggregator.name(),
            "attached rrd was built with a different aggregator"
        );
    }
    store.set(blank_val, aggregator.default_value())?;
    store.set(aggregator_name, aggregator.name().to_string())?;
    Ok(())
}

// =============================================================================
// TrackedRrd
// =============================================================================

/// Second/minute/hour ring buffer stored in the value tree.
#[derive(Debug, Clone)]
pub struct TrackedRrd {
    base: ComponentBase,
    aggregator: Arc<dyn Aggregator>,
    update_before_serialize: bool,
    last_time: ElementId,
    minute_vec: ElementId,
    hour_vec: ElementId,
    day_vec: ElementId,
    blank_val: ElementId,
    aggregator_name: ElementId,
}

impl TrackedRrd {
    /// Build or attach a ring buffer that aggregates with `aggregator`.
    pub fn with_aggregator(
        registry: &mut FieldRegistry,
        store: &mut ElementStore,
        aggregator: Arc<dyn Aggregator>,
        field_id: Option<FieldId>,
        existing: Option<ElementId>,
    ) -> Result<Self> {
        build_with(registry, store, field_id, existing, |registry, store, fields, base| {
            Self::attach_with(registry, store, fields, base, aggregator)
        })
    }

    fn attach_with(
        registry: &mut FieldRegistry,
        store: &mut ElementStore,
        fields: RrdFields,
        base: ComponentBase,
        aggregator: Arc<dyn Aggregator>,
    ) -> Result<Self> {
        let rrd = Self {
            last_time: base.reserve(registry, store, fields.last_time)?,
            minute_vec: base.reserve(registry, store, fields.minute_vec)?,
            hour_vec: base.reserve(registry, store, fields.hour_vec)?,
            day_vec: base.reserve(registry, store, fields.day_vec)?,
            blank_val: base.reserve(registry, store, fields.blank_val)?,
            aggregator_name: base.reserve(registry, store, fields.aggregator)?,
            base,
            aggregator,
            update_before_serialize: true,
        };
        let blank = rrd.aggregator.default_value();
        fit_slots(store, rrd.minute_vec, fields.second, SECONDS_PER_MINUTE, blank)?;
        fit_slots(store, rrd.hour_vec, fields.minute, MINUTES_PER_HOUR, blank)?;
        fit_slots(store, rrd.day_vec, fields.hour, HOURS_PER_DAY, blank)?;
        stamp_policy(store, rrd.blank_val, rrd.aggregator_name, rrd.aggregator.as_ref())?;
        Ok(rrd)
    }

    #[must_use]
    pub fn aggregator(&self) -> &Arc<dyn Aggregator> {
        &self.aggregator
    }

    #[must_use]
    pub fn update_before_serialize(&self) -> bool {
        self.update_before_serialize
    }

    /// Whether [`Component::pre_serialize`] first fast-forwards to `now`.
    ///
    /// On by default. Records refreshed on a fixed schedule, where the most
    /// recent real value matters, may turn it off.
    pub fn set_update_before_serialize(&mut self, update: bool) {
        self.update_before_serialize = update;
    }

    /// Fold a sample into the ring at `timestamp` (seconds since epoch).
    pub fn add_sample(
        &self,
        store: &mut ElementStore,
        value: i64,
        timestamp: u64,
    ) -> Result<SampleOutcome> {
        let before = self.snapshot(store)?;
        let mut after = before.clone();
        let outcome = after.add_sample(self.aggregator.as_ref(), value, timestamp);
        debug!(root = %self.root(), value, timestamp, %outcome, "rrd sample");
        if outcome == SampleOutcome::Stale {
            return Ok(outcome);
        }
        store_slots(store, self.minute_vec, &before.seconds, &after.seconds)?;
        store_slots(store, self.hour_vec, &before.minutes, &after.minutes)?;
        store_slots(store, self.day_vec, &before.hours, &after.hours)?;
        store.set(self.last_time, after.last_time)?;
        Ok(outcome)
    }

    /// Read every slot at once.
    pub fn snapshot(&self, store: &ElementStore) -> Result<RrdSnapshot> {
        Ok(RrdSnapshot {
            last_time: store.get::<u64>(self.last_time)?,
            seconds: load_slots(store, self.minute_vec)?,
            minutes: load_slots(store, self.hour_vec)?,
            hours: load_slots(store, self.day_vec)?,
        })
    }

    pub fn last_time(&self, store: &ElementStore) -> Result<u64> {
        store.get::<u64>(self.last_time)
    }

    /// Per-second slots of the current minute.
    pub fn seconds(&self, store: &ElementStore) -> Result<Vec<i64>> {
        Ok(load_slots::<SECONDS_PER_MINUTE>(store, self.minute_vec)?.to_vec())
    }

    /// Per-minute slots of the current hour.
    pub fn minutes(&self, store: &ElementStore) -> Result<Vec<i64>> {
        Ok(load_slots::<MINUTES_PER_HOUR>(store, self.hour_vec)?.to_vec())
    }

    /// Per-hour slots of the current day.
    pub fn hours(&self, store: &ElementStore) -> Result<Vec<i64>> {
        Ok(load_slots::<HOURS_PER_DAY>(store, self.day_vec)?.to_vec())
    }

    pub fn blank_value(&self, store: &ElementStore) -> Result<i64> {
        store.get::<i64>(self.blank_val)
    }

    pub fn aggregator_name<'s>(&self, store: &'s ElementStore) -> Result<&'s str> {
        store.get_str(self.aggregator_name)
    }
}

impl Component for TrackedRrd {
    type Fields = RrdFields;

    fn register_fields(registry: &mut FieldRegistry) -> Result<RrdFields> {
        RrdFields::register(registry)
    }

    fn attach(
        registry: &mut FieldRegistry,
        store: &mut ElementStore,
        fields: RrdFields,
        base: ComponentBase,
    ) -> Result<Self> {
        Self::attach_with(registry, store, fields, base, Arc::new(SumAggregator))
    }

    fn base(&self) -> &ComponentBase {
        &self.base
    }

    fn pre_serialize(&mut self, store: &mut ElementStore, now: u64) -> Result<()> {
        if self.update_before_serialize {
            self.add_sample(store, self.aggregator.default_value(), now)?;
        }
        Ok(())
    }

    fn clone_type(&self) -> Arc<dyn ComponentFactory> {
        Arc::new(RrdPrototype::full(Arc::clone(&self.aggregator)))
    }
}

// =============================================================================
// TrackedMinuteRrd
// =============================================================================

/// Per-second ring buffer covering a single minute.
#[derive(Debug, Clone)]
pub struct TrackedMinuteRrd {
    base: ComponentBase,
    aggregator: Arc<dyn Aggregator>,
    update_before_serialize: bool,
    last_time: ElementId,
    minute_vec: ElementId,
    blank_val: ElementId,
    aggregator_name: ElementId,
}

impl TrackedMinuteRrd {
    /// Build or attach a minute ring buffer that aggregates with `aggregator`.
    pub fn with_aggregator(
        registry: &mut FieldRegistry,
        store: &mut ElementStore,
        aggregator: Arc<dyn Aggregator>,
        field_id: Option<FieldId>,
        existing: Option<ElementId>,
    ) -> Result<Self> {
        build_with(registry, store, field_id, existing, |registry, store, fields, base| {
            Self::attach_with(registry, store, fields, base, aggregator)
        })
    }

    fn attach_with(
        registry: &mut FieldRegistry,
        store: &mut ElementStore,
        fields: RrdFields,
        base: ComponentBase,
        aggregator: Arc<dyn Aggregator>,
    ) -> Result<Self> {
        let rrd = Self {
            last_time: base.reserve(registry, store, fields.last_time)?,
            minute_vec: base.reserve(registry, store, fields.minute_vec)?,
            blank_val: base.reserve(registry, store, fields.blank_val)?,
            aggregator_name: base.reserve(registry, store, fields.aggregator)?,
            base,
            aggregator,
            update_before_serialize: true,
        };
        let blank = rrd.aggregator.default_value();
        fit_slots(store, rrd.minute_vec, fields.second, SECONDS_PER_MINUTE, blank)?;
        stamp_policy(store, rrd.blank_val, rrd.aggregator_name, rrd.aggregator.as_ref())?;
        Ok(rrd)
    }

    #[must_use]
    pub fn aggregator(&self) -> &Arc<dyn Aggregator> {
        &self.aggregator
    }

    #[must_use]
    pub fn update_before_serialize(&self) -> bool {
        self.update_before_serialize
    }

    pub fn set_update_before_serialize(&mut self, update: bool) {
        self.update_before_serialize = update;
    }

    /// Fold a sample into the ring at `timestamp` (seconds since epoch).
    pub fn add_sample(
        &self,
        store: &mut ElementStore,
        value: i64,
        timestamp: u64,
    ) -> Result<SampleOutcome> {
        let before = self.snapshot(store)?;
        let mut after = before.clone();
        let outcome = after.add_sample(self.aggregator.as_ref(), value, timestamp);
        debug!(root = %self.root(), value, timestamp, %outcome, "minute rrd sample");
        if outcome == SampleOutcome::Stale {
            return Ok(outcome);
        }
        store_slots(store, self.minute_vec, &before.seconds, &after.seconds)?;
        store.set(self.last_time, after.last_time)?;
        Ok(outcome)
    }

    pub fn snapshot(&self, store: &ElementStore) -> Result<MinuteSnapshot> {
        Ok(MinuteSnapshot {
            last_time: store.get::<u64>(self.last_time)?,
            seconds: load_slots(store, self.minute_vec)?,
        })
    }

    pub fn last_time(&self, store: &ElementStore) -> Result<u64> {
        store.get::<u64>(self.last_time)
    }

    pub fn seconds(&self, store: &ElementStore) -> Result<Vec<i64>> {
        Ok(load_slots::<SECONDS_PER_MINUTE>(store, self.minute_vec)?.to_vec())
    }

    /// Bucket reduction of the whole minute.
    pub fn minute_value(&self, store: &ElementStore) -> Result<i64> {
        Ok(self.aggregator.combine_bucket(&self.seconds(store)?))
    }

    pub fn blank_value(&self, store: &ElementStore) -> Result<i64> {
        store.get::<i64>(self.blank_val)
    }

    pub fn aggregator_name<'s>(&self, store: &'s ElementStore) -> Result<&'s str> {
        store.get_str(self.aggregator_name)
    }
}

impl Component for TrackedMinuteRrd {
    type Fields = RrdFields;

    fn register_fields(registry: &mut FieldRegistry) -> Result<RrdFields> {
        RrdFields::register(registry)
    }

    fn attach(
        registry: &mut FieldRegistry,
        store: &mut ElementStore,
        fields: RrdFields,
        base: ComponentBase,
    ) -> Result<Self> {
        Self::attach_with(registry, store, fields, base, Arc::new(SumAggregator))
    }

    fn base(&self) -> &ComponentBase {
        &self.base
    }

    fn pre_serialize(&mut self, store: &mut ElementStore, now: u64) -> Result<()> {
        if self.update_before_serialize {
            self.add_sample(store, self.aggregator.default_value(), now)?;
        }
        Ok(())
    }

    fn clone_type(&self) -> Arc<dyn ComponentFactory> {
        Arc::new(RrdPrototype::minute(Arc::clone(&self.aggregator)))
    }
}

// =============================================================================
// RrdPrototype
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RrdVariant {
    Full,
    Minute,
}

/// Factory for ring buffers that keeps the aggregation policy.
#[derive(Debug, Clone)]
pub struct RrdPrototype {
    aggregator: Arc<dyn Aggregator>,
    variant: RrdVariant,
}

impl RrdPrototype {
    /// Factory for [`TrackedRrd`].
    #[must_use]
    pub fn full(aggregator: Arc<dyn Aggregator>) -> Self {
        Self {
            aggregator,
            variant: RrdVariant::Full,
        }
    }

    /// Factory for [`TrackedMinuteRrd`].
    #[must_use]
    pub fn minute(aggregator: Arc<dyn Aggregator>) -> Self {
        Self {
            aggregator,
            variant: RrdVariant::Minute,
        }
    }
}

impl ComponentFactory for RrdPrototype {
    fn instantiate(
        &self,
        registry: &mut FieldRegistry,
        store: &mut ElementStore,
        field_id: FieldId,
    ) -> Result<ElementId> {
        let aggregator = Arc::clone(&self.aggregator);
        let field_id = Some(field_id);
        let root = match self.variant {
            RrdVariant::Full => {
                TrackedRrd::with_aggregator(registry, store, aggregator, field_id, None)?.root()
            }
            RrdVariant::Minute => {
                TrackedMinuteRrd::with_aggregator(registry, store, aggregator, field_id, None)?
                    .root()
            }
        };
        Ok(root)
    }

    fn type_name(&self) -> &'static str {
        match self.variant {
            RrdVariant::Full => std::any::type_name::<TrackedRrd>(),
            RrdVariant::Minute => std::any::type_name::<TrackedMinuteRrd>(),
        }
    }
}
