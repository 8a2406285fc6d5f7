//! Which capture source saw an entity, when, and on which frequencies.

use uuid::Uuid;

use crate::component::{Component, ComponentBase};
use crate::element::{ElementId, ElementType, FieldId};
use crate::error::Result;
use crate::registry::FieldRegistry;
use crate::store::ElementStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeenByFields {
    pub uuid: FieldId,
    pub first_time: FieldId,
    pub last_time: FieldId,
    pub num_packets: FieldId,
    pub freq_khz_map: FieldId,
    /// Field id carried by each per-frequency counter.
    pub frequency_count: FieldId,
}

/// Per-source sighting record.
#[derive(Debug, Clone, Copy)]
pub struct SeenByData {
    base: ComponentBase,
    uuid: ElementId,
    first_time: ElementId,
    last_time: ElementId,
    num_packets: ElementId,
    freq_khz_map: ElementId,
    frequency_count: FieldId,
}

impl SeenByData {
    pub fn uuid(&self, store: &ElementStore) -> Result<Uuid> {
        store.get(self.uuid)
    }

    pub fn set_uuid(&self, store: &mut ElementStore, uuid: Uuid) -> Result<()> {
        store.set(self.uuid, uuid)
    }

    pub fn first_time(&self, store: &ElementStore) -> Result<u64> {
        store.get(self.first_time)
    }

    pub fn set_first_time(&self, store: &mut ElementStore, ts: u64) -> Result<()> {
        store.set(self.first_time, ts)
    }

    pub fn last_time(&self, store: &ElementStore) -> Result<u64> {
        store.get(self.last_time)
    }

    pub fn set_last_time(&self, store: &mut ElementStore, ts: u64) -> Result<()> {
        store.set(self.last_time, ts)
    }

    pub fn num_packets(&self, store: &ElementStore) -> Result<u64> {
        store.get(self.num_packets)
    }

    pub fn inc_num_packets(&self, store: &mut ElementStore) -> Result<()> {
        store.increment(self.num_packets)
    }

    /// Bump the packet count for `freq_khz`, creating the counter at 1.
    pub fn inc_frequency_count(&self, store: &mut ElementStore, freq_khz: u32) -> Result<()> {
        let key = i64::from(freq_khz);
        if let Some(counter) = store.int_map_get(self.freq_khz_map, key)? {
            return store.increment(counter);
        }
        let counter = store.alloc_scalar(1u64, Some(self.frequency_count));
        if let Err(err) = store.int_map_insert(self.freq_khz_map, key, counter) {
            let _ = store.destroy(counter);
            return Err(err);
        }
        Ok(())
    }

    /// Packets counted on `freq_khz`, 0 if never seen there.
    pub fn frequency_count(&self, store: &ElementStore, freq_khz: u32) -> Result<u64> {
        match store.int_map_get(self.freq_khz_map, i64::from(freq_khz))? {
            Some(counter) => store.get(counter),
            None => Ok(0),
        }
    }

    /// `(kHz, packets)` pairs in ascending frequency order.
    pub fn frequencies(&self, store: &ElementStore) -> Result<Vec<(i64, u64)>> {
        store
            .int_map(self.freq_khz_map)?
            .iter()
            .map(|(&freq, &counter)| Ok((freq, store.get::<u64>(counter)?)))
            .collect()
    }

    /// Account one packet seen at `now` on `freq_khz`.
    pub fn observe(&self, store: &mut ElementStore, now: u64, freq_khz: Option<u32>) -> Result<()> {
        if store.get::<u64>(self.first_time)? == 0 {
            store.set(self.first_time, now)?;
        }
        if store.get::<u64>(self.last_time)? < now {
            store.set(self.last_time, now)?;
        }
        self.inc_num_packets(store)?;
        if let Some(freq) = freq_khz {
            self.inc_frequency_count(store, freq)?;
        }
        Ok(())
    }
}

impl Component for SeenByData {
    type Fields = SeenByFields;

    fn register_fields(registry: &mut FieldRegistry) -> Result<SeenByFields> {
        let fields = SeenByFields {
            uuid: registry.register(
                "airtrack.common.seenby.uuid",
                ElementType::Uuid,
                "UUID of source",
            )?,
            first_time: registry.register(
                "airtrack.common.seenby.first_time",
                ElementType::UInt64,
                "first time seen",
            )?,
            last_time: registry.register(
                "airtrack.common.seenby.last_time",
                ElementType::UInt64,
                "last time seen",
            )?,
            num_packets: registry.register(
                "airtrack.common.seenby.num_packets",
                ElementType::UInt64,
                "number of packets seen by this device",
            )?,
            freq_khz_map: registry.register(
                "airtrack.common.seenby.freq_khz_map",
                ElementType::IntMap,
                "packets seen per frequency (khz)",
            )?,
            frequency_count: registry.register(
                "airtrack.common.seenby.frequency.count",
                ElementType::UInt64,
                "frequency packet count",
            )?,
        };
        registry.set_entry_field(fields.freq_khz_map, fields.frequency_count)?;
        Ok(fields)
    }

    fn attach(
        registry: &mut FieldRegistry,
        store: &mut ElementStore,
        fields: SeenByFields,
        base: ComponentBase,
    ) -> Result<Self> {
        Ok(Self {
            uuid: base.reserve(registry, store, fields.uuid)?,
            first_time: base.reserve(registry, store, fields.first_time)?,
            last_time: base.reserve(registry, store, fields.last_time)?,
            num_packets: base.reserve(registry, store, fields.num_packets)?,
            freq_khz_map: base.reserve(registry, store, fields.freq_khz_map)?,
            frequency_count: fields.frequency_count,
            base,
        })
    }

    fn base(&self) -> &ComponentBase {
        &self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seen() -> (FieldRegistry, ElementStore, SeenByData) {
        let mut reg = FieldRegistry::new();
        let mut store = ElementStore::new();
        let seen = SeenByData::create(&mut reg, &mut store).unwrap();
        (reg, store, seen)
    }

    #[test]
    fn frequency_counter_created_then_incremented() {
        let (reg, mut store, seen) = seen();
        seen.inc_frequency_count(&mut store, 2_412_000).unwrap();
        seen.inc_frequency_count(&mut store, 2_412_000).unwrap();
        seen.inc_frequency_count(&mut store, 5_180_000).unwrap();

        assert_eq!(seen.frequency_count(&store, 2_412_000).unwrap(), 2);
        assert_eq!(seen.frequency_count(&store, 5_180_000).unwrap(), 1);
        assert_eq!(seen.frequency_count(&store, 5_200_000).unwrap(), 0);
        assert_eq!(
            seen.frequencies(&store).unwrap(),
            vec![(2_412_000, 2), (5_180_000, 1)]
        );

        let counter = store.int_map_get(seen.freq_khz_map, 2_412_000).unwrap().unwrap();
        let field = store.field_id(counter).unwrap().unwrap();
        assert_eq!(reg.name(field), Some("airtrack.common.seenby.frequency.count"));
    }

    #[test]
    fn observe_tracks_times_and_packets() {
        let (_reg, mut store, seen) = seen();
        seen.observe(&mut store, 100, Some(2_437_000)).unwrap();
        seen.observe(&mut store, 90, None).unwrap();
        seen.observe(&mut store, 150, Some(2_437_000)).unwrap();

        assert_eq!(seen.first_time(&store).unwrap(), 100);
        assert_eq!(seen.last_time(&store).unwrap(), 150);
        assert_eq!(seen.num_packets(&store).unwrap(), 3);
        assert_eq!(seen.frequency_count(&store, 2_437_000).unwrap(), 2);
    }

    #[test]
    fn uuid_round_trips() {
        let (_reg, mut store, seen) = seen();
        assert!(seen.uuid(&store).unwrap().is_nil());
        let id = Uuid::from_u128(0x1234_5678);
        seen.set_uuid(&mut store, id).unwrap();
        assert_eq!(seen.uuid(&store).unwrap(), id);
    }

    #[test]
    fn release_frees_frequency_counters() {
        let (_reg, mut store, seen) = seen();
        seen.inc_frequency_count(&mut store, 1).unwrap();
        seen.inc_frequency_count(&mut store, 2).unwrap();
        seen.base().release(&mut store).unwrap();
        assert!(store.is_empty());
    }
}
