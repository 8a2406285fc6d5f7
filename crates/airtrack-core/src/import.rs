//! Rebuilding a value tree from exported JSON.
//!
//! Kinds come from the registry wherever a field is known: id-keyed map
//! entries by their dotted name, container entries by the container's
//! declared entry field. Anything else is inferred from the JSON shape.
//! The rebuilt tree has refcount 0 and can be handed to any record's
//! `build` as the existing root.

use serde_json::Value;

use crate::element::{ElementId, ElementType, ElementValue, FieldId};
use crate::error::{Error, Result};
use crate::mac::MacAddr;
use crate::registry::FieldRegistry;
use crate::store::ElementStore;

/// Parse `text` and rebuild it as an element tagged `field`.
pub fn from_json_str(
    registry: &FieldRegistry,
    store: &mut ElementStore,
    text: &str,
    field: Option<FieldId>,
) -> Result<ElementId> {
    let value: Value = serde_json::from_str(text)?;
    from_json(registry, store, &value, field)
}

/// Rebuild `value` as an element tagged `field`.
///
/// On error nothing is left behind in the store.
pub fn from_json(
    registry: &FieldRegistry,
    store: &mut ElementStore,
    value: &Value,
    field: Option<FieldId>,
) -> Result<ElementId> {
    let (kind, entry) = match field {
        Some(id) => {
            let descriptor = registry.descriptor(id)?;
            (descriptor.kind(), descriptor.entry_field())
        }
        None => (infer_kind(registry, value)?, None),
    };

    if !kind.is_container() {
        return Ok(store.alloc(scalar(kind, value)?, field));
    }

    let container = store.alloc_empty(kind, field);
    if let Err(err) = fill(registry, store, container, kind, entry, value) {
        let _ = store.destroy(container);
        return Err(err);
    }
    Ok(container)
}

fn fill(
    registry: &FieldRegistry,
    store: &mut ElementStore,
    container: ElementId,
    kind: ElementType,
    entry: Option<FieldId>,
    value: &Value,
) -> Result<()> {
    match kind {
        ElementType::Vector => {
            let items = value
                .as_array()
                .ok_or_else(|| shape_error(kind, value))?;
            for item in items {
                let child = from_json(registry, store, item, entry)?;
                adopt(store, child, |store| store.push(container, child))?;
            }
        }
        ElementType::Map => {
            let items = value
                .as_object()
                .ok_or_else(|| shape_error(kind, value))?;
            for (name, item) in items {
                let key = resolve_name(registry, name)
                    .ok_or_else(|| Error::UnknownFieldName(name.clone()))?;
                let child = from_json(registry, store, item, Some(key))?;
                adopt(store, child, |store| store.map_insert_at(container, key, child))?;
            }
        }
        ElementType::IntMap => {
            let items = value
                .as_object()
                .ok_or_else(|| shape_error(kind, value))?;
            for (key, item) in items {
                let key: i64 = key
                    .parse()
                    .map_err(|_| Error::Import(format!("intmap key `{key}` is not an integer")))?;
                let child = from_json(registry, store, item, entry)?;
                adopt(store, child, |store| store.int_map_insert(container, key, child))?;
            }
        }
        ElementType::MacMap => {
            let items = value
                .as_object()
                .ok_or_else(|| shape_error(kind, value))?;
            for (key, item) in items {
                let key: MacAddr = key
                    .parse()
                    .map_err(|e| Error::Import(format!("macmap key `{key}`: {e}")))?;
                let child = from_json(registry, store, item, entry)?;
                adopt(store, child, |store| store.mac_map_insert(container, key, child))?;
            }
        }
        _ => return Err(Error::mismatch("import container", kind)),
    }
    Ok(())
}

fn adopt(
    store: &mut ElementStore,
    child: ElementId,
    insert: impl FnOnce(&mut ElementStore) -> Result<()>,
) -> Result<()> {
    if let Err(err) = insert(store) {
        let _ = store.destroy(child);
        return Err(err);
    }
    Ok(())
}

/// Registered name, or the numeric id the exporter writes for unnamed fields.
fn resolve_name(registry: &FieldRegistry, name: &str) -> Option<FieldId> {
    registry.lookup(name).or_else(|| {
        let id = FieldId::new(name.parse().ok()?);
        registry.descriptor(id).ok().map(|d| d.id())
    })
}

fn infer_kind(registry: &FieldRegistry, value: &Value) -> Result<ElementType> {
    let kind = match value {
        Value::Bool(_) => ElementType::UInt8,
        Value::Number(n) if n.is_i64() => ElementType::Int64,
        Value::Number(n) if n.is_u64() => ElementType::UInt64,
        Value::Number(_) => ElementType::Double,
        Value::String(_) => ElementType::String,
        Value::Array(_) => ElementType::Vector,
        Value::Object(map) => {
            // all-integer keys are an intmap even when they collide with field ids
            if !map.is_empty() && map.keys().all(|k| k.parse::<i64>().is_ok()) {
                ElementType::IntMap
            } else if map.keys().all(|k| resolve_name(registry, k).is_some()) {
                ElementType::Map
            } else if map.keys().all(|k| k.parse::<MacAddr>().is_ok()) {
                ElementType::MacMap
            } else {
                return Err(Error::Import(
                    "object keys are neither field names, integers nor MAC addresses".into(),
                ));
            }
        }
        Value::Null => return Err(Error::Import("null has no element kind".into())),
    };
    Ok(kind)
}

fn shape_error(kind: ElementType, value: &Value) -> Error {
    Error::Import(format!("expected {kind}, found `{value}`"))
}

fn int<T: TryFrom<i64> + TryFrom<u64>>(kind: ElementType, value: &Value) -> Result<T> {
    let converted = match value {
        Value::Number(n) => match (n.as_i64(), n.as_u64()) {
            (Some(v), _) => <T as TryFrom<i64>>::try_from(v).ok(),
            (None, Some(v)) => <T as TryFrom<u64>>::try_from(v).ok(),
            (None, None) => None,
        },
        Value::Bool(b) => <T as TryFrom<i64>>::try_from(i64::from(*b)).ok(),
        _ => None,
    };
    converted.ok_or_else(|| shape_error(kind, value))
}

fn scalar(kind: ElementType, value: &Value) -> Result<ElementValue> {
    let text = || value.as_str().ok_or_else(|| shape_error(kind, value));
    let float = || value.as_f64().ok_or_else(|| shape_error(kind, value));
    Ok(match kind {
        ElementType::Int8 => ElementValue::Int8(int(kind, value)?),
        ElementType::UInt8 => ElementValue::UInt8(int(kind, value)?),
        ElementType::Int16 => ElementValue::Int16(int(kind, value)?),
        ElementType::UInt16 => ElementValue::UInt16(int(kind, value)?),
        ElementType::Int32 => ElementValue::Int32(int(kind, value)?),
        ElementType::UInt32 => ElementValue::UInt32(int(kind, value)?),
        ElementType::Int64 => ElementValue::Int64(int(kind, value)?),
        ElementType::UInt64 => ElementValue::UInt64(int(kind, value)?),
        #[allow(clippy::cast_possible_truncation)]
        ElementType::Float => ElementValue::Float(float()? as f32),
        ElementType::Double => ElementValue::Double(float()?),
        ElementType::String => ElementValue::String(text()?.to_string()),
        ElementType::Mac => ElementValue::Mac(
            text()?
                .parse()
                .map_err(|e| Error::Import(format!("bad MAC address: {e}")))?,
        ),
        ElementType::Uuid => ElementValue::Uuid(
            text()?
                .parse()
                .map_err(|e| Error::Import(format!("bad UUID: {e}")))?,
        ),
        ElementType::Vector | ElementType::Map | ElementType::IntMap | ElementType::MacMap => {
            return Err(Error::mismatch("import scalar", kind));
        }
    })
}
