//! Serializing a value tree.
//!
//! [`ElementView`] borrows a store and a registry and implements
//! [`serde::Serialize`], so any serde format can consume a tree. Id-keyed
//! map entries are named by their registered dotted field name; int and
//! MAC map keys become strings.

use serde::ser::{Error as _, SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use crate::component::Component;
use crate::element::{ElementId, ElementValue};
use crate::error::Result;
use crate::registry::FieldRegistry;
use crate::store::ElementStore;

/// Serializable view of the subtree rooted at one element.
#[derive(Debug, Clone, Copy)]
pub struct ElementView<'a> {
    registry: &'a FieldRegistry,
    store: &'a ElementStore,
    id: ElementId,
}

impl<'a> ElementView<'a> {
    #[must_use]
    pub fn new(registry: &'a FieldRegistry, store: &'a ElementStore, id: ElementId) -> Self {
        Self {
            registry,
            store,
            id,
        }
    }

    fn child(&self, id: ElementId) -> Self {
        Self { id, ..*self }
    }
}

impl Serialize for ElementView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let element = self.store.element(self.id).map_err(S::Error::custom)?;
        match element.value() {
            ElementValue::Int8(v) => serializer.serialize_i8(*v),
            ElementValue::UInt8(v) => serializer.serialize_u8(*v),
            ElementValue::Int16(v) => serializer.serialize_i16(*v),
            ElementValue::UInt16(v) => serializer.serialize_u16(*v),
            ElementValue::Int32(v) => serializer.serialize_i32(*v),
            ElementValue::UInt32(v) => serializer.serialize_u32(*v),
            ElementValue::Int64(v) => serializer.serialize_i64(*v),
            ElementValue::UInt64(v) => serializer.serialize_u64(*v),
            ElementValue::Float(v) => serializer.serialize_f32(*v),
            ElementValue::Double(v) => serializer.serialize_f64(*v),
            ElementValue::String(v) => serializer.serialize_str(v),
            ElementValue::Mac(v) => v.serialize(serializer),
            ElementValue::Uuid(v) => v.serialize(serializer),
            ElementValue::Vector(children) => {
                let mut seq = serializer.serialize_seq(Some(children.len()))?;
                for &child in children {
                    seq.serialize_element(&self.child(child))?;
                }
                seq.end()
            }
            ElementValue::Map(children) => {
                let mut map = serializer.serialize_map(Some(children.len()))?;
                for (&field, &child) in children {
                    match self.registry.name(field) {
                        Some(name) => map.serialize_entry(name, &self.child(child))?,
                        None => map.serialize_entry(&field.to_string(), &self.child(child))?,
                    }
                }
                map.end()
            }
            ElementValue::IntMap(children) => {
                let mut map = serializer.serialize_map(Some(children.len()))?;
                for (key, &child) in children {
                    map.serialize_entry(&key.to_string(), &self.child(child))?;
                }
                map.end()
            }
            ElementValue::MacMap(children) => {
                let mut map = serializer.serialize_map(Some(children.len()))?;
                for (key, &child) in children {
                    map.serialize_entry(&key.to_string(), &self.child(child))?;
                }
                map.end()
            }
        }
    }
}

/// The subtree at `id` as a JSON value.
pub fn to_value(
    registry: &FieldRegistry,
    store: &ElementStore,
    id: ElementId,
) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(ElementView::new(registry, store, id))?)
}

/// The subtree at `id` as pretty-printed JSON.
pub fn to_json(registry: &FieldRegistry, store: &ElementStore, id: ElementId) -> Result<String> {
    Ok(serde_json::to_string_pretty(&ElementView::new(
        registry, store, id,
    ))?)
}

/// Run the record's pre-serialize hook at `now`, then export it.
pub fn export_component<T: Component>(
    registry: &FieldRegistry,
    store: &mut ElementStore,
    record: &mut T,
    now: u64,
) -> Result<serde_json::Value> {
    record.pre_serialize(store, now)?;
    to_value(registry, store, record.root())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ElementType;
    use crate::location::LocationTriplet;
    use crate::mac::MacAddr;
    use crate::rrd::TrackedMinuteRrd;
    use serde_json::json;

    #[test]
    fn scalars_and_named_map_entries() {
        let mut reg = FieldRegistry::new();
        let mut store = ElementStore::new();
        let loc = LocationTriplet::create(&mut reg, &mut store).unwrap();
        loc.set_full(&mut store, 1.5, -2.25, 10.0, 3).unwrap();

        let value = to_value(&reg, &store, loc.root()).unwrap();
        assert_eq!(value["airtrack.common.location.lat"], json!(1.5));
        assert_eq!(value["airtrack.common.location.lon"], json!(-2.25));
        assert_eq!(value["airtrack.common.location.fix"], json!(3));
        assert_eq!(value["airtrack.common.location.valid"], json!(1));
    }

    #[test]
    fn keyed_maps_use_string_keys() {
        let reg = FieldRegistry::new();
        let mut store = ElementStore::new();
        let ints = store.alloc_empty(ElementType::IntMap, None);
        let a = store.alloc_scalar(7u64, None);
        store.int_map_insert(ints, -3, a).unwrap();

        let macs = store.alloc_empty(ElementType::MacMap, None);
        let mac: MacAddr = "00:11:22:33:44:55".parse().unwrap();
        let b = store.alloc_scalar(mac, None);
        store.mac_map_insert(macs, mac, b).unwrap();

        assert_eq!(to_value(&reg, &store, ints).unwrap(), json!({"-3": 7}));
        assert_eq!(
            to_value(&reg, &store, macs).unwrap(),
            json!({"00:11:22:33:44:55": "00:11:22:33:44:55"})
        );
    }

    #[test]
    fn unregistered_field_falls_back_to_id() {
        let reg = FieldRegistry::new();
        let mut store = ElementStore::new();
        let map = store.alloc_empty(ElementType::Map, None);
        let fid = crate::element::FieldId::new(12);
        let child = store.alloc_scalar(String::from("x"), Some(fid));
        store.map_insert(map, child).unwrap();
        assert_eq!(to_value(&reg, &store, map).unwrap(), json!({"12": "x"}));
    }

    #[test]
    fn dangling_root_is_an_error() {
        let reg = FieldRegistry::new();
        let mut store = ElementStore::new();
        let id = store.alloc_scalar(1i32, None);
        store.destroy(id).unwrap();
        assert!(to_value(&reg, &store, id).is_err());
    }

    #[test]
    fn export_component_runs_pre_serialize() {
        let mut reg = FieldRegistry::new();
        let mut store = ElementStore::new();
        let mut rrd = TrackedMinuteRrd::create(&mut reg, &mut store).unwrap();
        rrd.add_sample(&mut store, 9, 100).unwrap();

        let value = export_component(&reg, &mut store, &mut rrd, 103).unwrap();
        assert_eq!(value["airtrack.common.rrd.last_time"], json!(103));
        let slots = value["airtrack.common.rrd.minute_vec"].as_array().unwrap();
        assert_eq!(slots.len(), 60);
        assert_eq!(slots[40], json!(9));
        assert_eq!(value["airtrack.common.rrd.aggregator"], json!("default"));
    }

    #[test]
    fn pretty_json_renders() {
        let mut reg = FieldRegistry::new();
        let mut store = ElementStore::new();
        let loc = LocationTriplet::create(&mut reg, &mut store).unwrap();
        let text = to_json(&reg, &store, loc.root()).unwrap();
        assert!(text.contains("\"airtrack.common.location.speed\": 0.0"));
    }
}
