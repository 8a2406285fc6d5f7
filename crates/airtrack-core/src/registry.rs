//! Field registry: stable ids for dotted field names.
//!
//! Records never hold a global registry; every constructor takes a
//! `&mut FieldRegistry` so ids are scoped to whoever owns the registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::component::ComponentFactory;
use crate::element::{ElementId, ElementType, FieldId};
use crate::error::{Error, Result};
use crate::store::ElementStore;

/// Everything the registry knows about one field.
#[derive(Clone)]
pub struct FieldDescriptor {
    id: FieldId,
    name: String,
    kind: ElementType,
    description: String,
    factory: Option<Arc<dyn ComponentFactory>>,
    entry: Option<FieldId>,
}

impl FieldDescriptor {
    #[must_use]
    pub fn id(&self) -> FieldId {
        self.id
    }

    /// Dotted name, e.g. `airtrack.common.rrd.last_time`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn kind(&self) -> ElementType {
        self.kind
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Whether instances are built by a record factory.
    #[must_use]
    pub fn is_complex(&self) -> bool {
        self.factory.is_some()
    }

    /// Field carried by every entry of this sequence or keyed map.
    #[must_use]
    pub fn entry_field(&self) -> Option<FieldId> {
        self.entry
    }
}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("description", &self.description)
            .field("factory", &self.factory.as_ref().map(|f| f.type_name()))
            .field("entry", &self.entry)
            .finish()
    }
}

/// Allocator of field ids, keyed by dotted name.
#[derive(Debug, Clone, Default)]
pub struct FieldRegistry {
    by_name: HashMap<String, FieldId>,
    fields: Vec<FieldDescriptor>,
}

impl FieldRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Register a plain field, or return the id it already has.
    ///
    /// Re-registering a name under a different kind fails with
    /// [`Error::FieldKindConflict`].
    pub fn register(
        &mut self,
        name: &str,
        kind: ElementType,
        description: &str,
    ) -> Result<FieldId> {
        self.register_inner(name, kind, description, None)
    }

    /// Register a composite field whose instances are built by `factory`.
    ///
    /// If the name is already registered as a map, the existing id is
    /// returned and the first factory is kept.
    pub fn register_complex(
        &mut self,
        name: &str,
        factory: Arc<dyn ComponentFactory>,
        description: &str,
    ) -> Result<FieldId> {
        self.register_inner(name, ElementType::Map, description, Some(factory))
    }

    fn register_inner(
        &mut self,
        name: &str,
        kind: ElementType,
        description: &str,
        factory: Option<Arc<dyn ComponentFactory>>,
    ) -> Result<FieldId> {
        if let Some(&id) = self.by_name.get(name) {
            let descriptor = &mut self.fields[id.get() as usize];
            if descriptor.kind != kind {
                return Err(Error::FieldKindConflict {
                    name: name.to_string(),
                    registered: descriptor.kind,
                    requested: kind,
                });
            }
            if descriptor.factory.is_none() {
                descriptor.factory = factory;
            }
            return Ok(id);
        }

        let id = FieldId::new(self.fields.len() as u32);
        debug!(field = name, %id, %kind, "registered field");
        self.fields.push(FieldDescriptor {
            id,
            name: name.to_string(),
            kind,
            description: description.to_string(),
            factory,
            entry: None,
        });
        self.by_name.insert(name.to_string(), id);
        Ok(id)
    }

    /// Declare that entries of the container field `container` are
    /// `entry` elements.
    ///
    /// Entries of sequences and int/MAC maps have no name of their own once
    /// exported; the importer uses this to rebuild them with the right kind
    /// and field id.
    pub fn set_entry_field(&mut self, container: FieldId, entry: FieldId) -> Result<()> {
        self.descriptor(entry)?;
        let descriptor = self
            .fields
            .get_mut(container.get() as usize)
            .ok_or(Error::UnknownField(container))?;
        let kind = descriptor.kind;
        if !matches!(
            kind,
            ElementType::Vector | ElementType::IntMap | ElementType::MacMap
        ) {
            return Err(Error::mismatch("declare entry field", kind));
        }
        descriptor.entry = Some(entry);
        Ok(())
    }

    /// Id registered under `name`, if any.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<FieldId> {
        self.by_name.get(name).copied()
    }

    /// Id registered under `name`, or [`Error::UnknownFieldName`].
    pub fn require(&self, name: &str) -> Result<FieldId> {
        self.lookup(name)
            .ok_or_else(|| Error::UnknownFieldName(name.to_string()))
    }

    /// Descriptor for `id`, or [`Error::UnknownField`].
    pub fn descriptor(&self, id: FieldId) -> Result<&FieldDescriptor> {
        self.fields
            .get(id.get() as usize)
            .ok_or(Error::UnknownField(id))
    }

    /// Dotted name of `id`.
    #[must_use]
    pub fn name(&self, id: FieldId) -> Option<&str> {
        self.fields.get(id.get() as usize).map(FieldDescriptor::name)
    }

    /// All descriptors in id order.
    pub fn iter(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter()
    }

    /// Build a fresh, empty element for `id`.
    ///
    /// Plain fields get a zeroed scalar or empty container of their declared
    /// kind. Composite fields get a fully reserved record from their factory.
    /// The returned element has refcount 0.
    pub fn instantiate(&mut self, store: &mut ElementStore, id: FieldId) -> Result<ElementId> {
        let descriptor = self.descriptor(id)?;
        let kind = descriptor.kind;
        match descriptor.factory.clone() {
            Some(factory) => factory.instantiate(self, store, id),
            None => Ok(store.alloc_empty(kind, Some(id))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::LocationTriplet;
    use crate::component::Component;

    #[test]
    fn register_is_idempotent() {
        let mut reg = FieldRegistry::new();
        let a = reg
            .register("airtrack.test.count", ElementType::UInt64, "a count")
            .unwrap();
        let b = reg
            .register("airtrack.test.count", ElementType::UInt64, "ignored")
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.descriptor(a).unwrap().description(), "a count");
    }

    #[test]
    fn kind_conflict_is_rejected() {
        let mut reg = FieldRegistry::new();
        reg.register("airtrack.test.x", ElementType::Int32, "")
            .unwrap();
        let err = reg
            .register("airtrack.test.x", ElementType::Double, "")
            .unwrap_err();
        assert!(matches!(err, Error::FieldKindConflict { .. }));
    }

    #[test]
    fn ids_are_distinct_and_dense() {
        let mut reg = FieldRegistry::new();
        let ids: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|n| reg.register(n, ElementType::Int8, "").unwrap())
            .collect();
        assert_eq!(ids, vec![FieldId::new(0), FieldId::new(1), FieldId::new(2)]);
        assert_eq!(reg.name(ids[1]), Some("b"));
        assert_eq!(reg.lookup("c"), Some(ids[2]));
        assert!(reg.require("d").is_err());
    }

    #[test]
    fn entry_field_only_on_keyed_or_sequence_containers() {
        let mut reg = FieldRegistry::new();
        let vec = reg.register("airtrack.test.vec", ElementType::Vector, "").unwrap();
        let map = reg.register("airtrack.test.map", ElementType::Map, "").unwrap();
        let slot = reg.register("airtrack.test.slot", ElementType::Int64, "").unwrap();

        reg.set_entry_field(vec, slot).unwrap();
        assert_eq!(reg.descriptor(vec).unwrap().entry_field(), Some(slot));
        assert!(reg.set_entry_field(map, slot).unwrap_err().is_type_mismatch());
        assert!(matches!(
            reg.set_entry_field(vec, FieldId::new(42)),
            Err(Error::UnknownField(_))
        ));
    }

    #[test]
    fn instantiate_plain_field() {
        let mut reg = FieldRegistry::new();
        let mut store = ElementStore::new();
        let id = reg
            .register("airtrack.test.freq", ElementType::IntMap, "")
            .unwrap();
        let e = reg.instantiate(&mut store, id).unwrap();
        assert_eq!(store.element_type(e).unwrap(), ElementType::IntMap);
        assert_eq!(store.field_id(e).unwrap(), Some(id));
        assert_eq!(store.refcount(e).unwrap(), 0);
    }

    #[test]
    fn instantiate_unknown_field_fails() {
        let mut reg = FieldRegistry::new();
        let mut store = ElementStore::new();
        let err = reg.instantiate(&mut store, FieldId::new(99)).unwrap_err();
        assert!(matches!(err, Error::UnknownField(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn instantiate_complex_field_builds_record() {
        let mut reg = FieldRegistry::new();
        let mut store = ElementStore::new();
        let id = reg
            .register_complex(
                "airtrack.test.loc",
                LocationTriplet::factory(),
                "a location",
            )
            .unwrap();
        assert!(reg.descriptor(id).unwrap().is_complex());

        let root = reg.instantiate(&mut store, id).unwrap();
        assert_eq!(store.element_type(root).unwrap(), ElementType::Map);
        assert_eq!(store.field_id(root).unwrap(), Some(id));
        let lat = reg.require("airtrack.common.location.lat").unwrap();
        let lat_elem = store.map_get(root, lat).unwrap().unwrap();
        assert_eq!(store.get::<f64>(lat_elem).unwrap(), 0.0);
    }
}
