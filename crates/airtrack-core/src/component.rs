//! Structured records built on one id-keyed map.
//!
//! A record declares its fields with the registry, then attaches to a root
//! map: either a fresh one, or an existing map (for example one rebuilt by
//! [`crate::import`]). Attaching resolves every declared field among the
//! map's children and only creates the ones that are missing.
//!
//! Records are thin typed views. All state lives in the [`ElementStore`],
//! so a record handle can be dropped and rebuilt from its root at any time.

use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::warn;

use crate::element::{ElementId, ElementType, FieldId};
use crate::error::{Error, Result};
use crate::registry::{FieldDescriptor, FieldRegistry};
use crate::store::ElementStore;

// =============================================================================
// Component
// =============================================================================

/// A typed record over a map element.
pub trait Component: Sized + 'static {
    /// Ids of the declared fields, captured by [`Component::register_fields`].
    type Fields: Copy;

    /// Declare every field with the registry.
    fn register_fields(registry: &mut FieldRegistry) -> Result<Self::Fields>;

    /// Resolve or create each declared field under `base`'s root map.
    fn attach(
        registry: &mut FieldRegistry,
        store: &mut ElementStore,
        fields: Self::Fields,
        base: ComponentBase,
    ) -> Result<Self>;

    /// Shared root handle.
    fn base(&self) -> &ComponentBase;

    /// Register fields, then attach to `existing` or to a fresh map.
    ///
    /// A fresh root is freed again if attaching fails.
    fn build(
        registry: &mut FieldRegistry,
        store: &mut ElementStore,
        field_id: Option<FieldId>,
        existing: Option<ElementId>,
    ) -> Result<Self> {
        build_with(registry, store, field_id, existing, Self::attach)
    }

    /// Build a record on a fresh, anonymous root.
    fn create(registry: &mut FieldRegistry, store: &mut ElementStore) -> Result<Self> {
        Self::build(registry, store, None, None)
    }

    /// Root map of this record.
    fn root(&self) -> ElementId {
        self.base().root()
    }

    /// Hook run immediately before the tree under this record is exported.
    fn pre_serialize(&mut self, _store: &mut ElementStore, _now: u64) -> Result<()> {
        Ok(())
    }

    /// Factory producing fresh, empty records of this same shape.
    fn clone_type(&self) -> Arc<dyn ComponentFactory> {
        Self::factory()
    }

    /// Factory producing records of this type with default settings.
    fn factory() -> Arc<dyn ComponentFactory> {
        Arc::new(Prototype::<Self>::new())
    }
}

/// [`Component::build`] with a caller-supplied attach step, for records
/// whose attach needs more than the registry and store.
pub fn build_with<T, F>(
    registry: &mut FieldRegistry,
    store: &mut ElementStore,
    field_id: Option<FieldId>,
    existing: Option<ElementId>,
    attach: F,
) -> Result<T>
where
    T: Component,
    F: FnOnce(&mut FieldRegistry, &mut ElementStore, T::Fields, ComponentBase) -> Result<T>,
{
    let fields = T::register_fields(registry)?;
    let base = ComponentBase::new(store, field_id, existing)?;
    let root = base.root();
    if existing.is_some() {
        check_registered_kinds(registry, store, root)?;
    }
    match attach(registry, store, fields, base) {
        Ok(record) => Ok(record),
        Err(err) => {
            if existing.is_none() && store.refcount(root).unwrap_or(1) == 0 {
                // best effort: the attach error is what the caller needs
                let _ = store.destroy(root);
            }
            Err(err)
        }
    }
}

/// Check every descendant of `root` against the kind its field was
/// registered with, before an attach creates or pads anything.
///
/// Map children are checked by their own field id. Children of the other
/// containers are checked by the container's declared entry field.
fn check_registered_kinds(
    registry: &FieldRegistry,
    store: &ElementStore,
    root: ElementId,
) -> Result<()> {
    let mut stack = vec![root];
    while let Some(parent) = stack.pop() {
        let kind = store.element_type(parent)?;
        if !kind.is_container() {
            continue;
        }
        let entry = match store.field_id(parent)? {
            Some(field) if kind != ElementType::Map => registry
                .descriptor(field)
                .ok()
                .and_then(FieldDescriptor::entry_field),
            _ => None,
        };
        for child in store.children(parent)? {
            let field = if kind == ElementType::Map {
                store.field_id(child)?
            } else {
                entry
            };
            let expected = field
                .and_then(|field| registry.descriptor(field).ok())
                .map(FieldDescriptor::kind);
            let found = store.element_type(child)?;
            if let Some(expected) = expected.filter(|&expected| expected != found) {
                warn!(%parent, %found, %expected, "attached field has the wrong kind");
                return Err(Error::mismatch("attach field", found));
            }
            stack.push(child);
        }
    }
    Ok(())
}

// =============================================================================
// ComponentFactory
// =============================================================================

/// Builds a fresh record's root map for a composite field.
pub trait ComponentFactory: Send + Sync {
    /// Build and reserve a fresh record tagged with `field_id`, returning its
    /// root at refcount 0.
    fn instantiate(
        &self,
        registry: &mut FieldRegistry,
        store: &mut ElementStore,
        field_id: FieldId,
    ) -> Result<ElementId>;

    /// Name of the record type, for diagnostics.
    fn type_name(&self) -> &'static str;
}

/// Default-settings factory for any [`Component`].
pub struct Prototype<T>(PhantomData<fn() -> T>);

impl<T> Prototype<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for Prototype<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Prototype<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Prototype").field(&type_name::<T>()).finish()
    }
}

impl<T: Component> ComponentFactory for Prototype<T> {
    fn instantiate(
        &self,
        registry: &mut FieldRegistry,
        store: &mut ElementStore,
        field_id: FieldId,
    ) -> Result<ElementId> {
        Ok(T::build(registry, store, Some(field_id), None)?.root())
    }

    fn type_name(&self) -> &'static str {
        type_name::<T>()
    }
}

// =============================================================================
// ComponentBase
// =============================================================================

/// Root map handle shared by every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentBase {
    root: ElementId,
    field_id: Option<FieldId>,
}

impl ComponentBase {
    /// Adopt `existing` (which must be a map) or allocate a fresh map.
    pub fn new(
        store: &mut ElementStore,
        field_id: Option<FieldId>,
        existing: Option<ElementId>,
    ) -> Result<Self> {
        let root = match existing {
            Some(root) => {
                let kind = store.element_type(root)?;
                if kind != ElementType::Map {
                    return Err(Error::mismatch("attach record", kind));
                }
                root
            }
            None => store.alloc_empty(ElementType::Map, field_id),
        };
        Ok(Self { root, field_id })
    }

    #[must_use]
    pub fn root(&self) -> ElementId {
        self.root
    }

    /// Field id this record was built for, if any.
    #[must_use]
    pub fn field_id(&self) -> Option<FieldId> {
        self.field_id
    }

    /// Find `field` among the root's children, or instantiate and insert it.
    ///
    /// An existing child of the wrong kind is a type mismatch.
    pub fn reserve(
        &self,
        registry: &mut FieldRegistry,
        store: &mut ElementStore,
        field: FieldId,
    ) -> Result<ElementId> {
        let expected = registry.descriptor(field)?.kind();
        if let Some(child) = store.map_get(self.root, field)? {
            let found = store.element_type(child)?;
            if found != expected {
                warn!(%field, %found, %expected, "attached field has the wrong kind");
                return Err(Error::mismatch("attach field", found));
            }
            return Ok(child);
        }
        let child = registry.instantiate(store, field)?;
        self.adopt(store, field, child)?;
        Ok(child)
    }

    /// Find or build a nested record stored under `field`.
    pub fn reserve_component<T: Component>(
        &self,
        registry: &mut FieldRegistry,
        store: &mut ElementStore,
        field: FieldId,
    ) -> Result<T> {
        self.reserve_with(registry, store, field, |registry, store, existing| {
            T::build(registry, store, Some(field), existing)
        })
    }

    /// [`ComponentBase::reserve_component`] with a caller-supplied builder,
    /// which receives the existing child map if there is one.
    pub fn reserve_with<T, F>(
        &self,
        registry: &mut FieldRegistry,
        store: &mut ElementStore,
        field: FieldId,
        build: F,
    ) -> Result<T>
    where
        T: Component,
        F: FnOnce(&mut FieldRegistry, &mut ElementStore, Option<ElementId>) -> Result<T>,
    {
        if let Some(child) = store.map_get(self.root, field)? {
            return build(registry, store, Some(child));
        }
        let record = build(registry, store, None)?;
        self.adopt(store, field, record.root())?;
        Ok(record)
    }

    /// Insert a freshly built, unheld element under `field`, freeing it if
    /// the insert fails.
    pub fn adopt(&self, store: &mut ElementStore, field: FieldId, child: ElementId) -> Result<()> {
        if let Err(err) = store.map_insert_at(self.root, field, child) {
            let _ = store.destroy(child);
            return Err(err);
        }
        Ok(())
    }

    /// Destroy the root map. Fails if some container still holds it.
    pub fn release(self, store: &mut ElementStore) -> Result<()> {
        store.destroy(self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy)]
    struct CounterFields {
        count: FieldId,
        label: FieldId,
    }

    #[derive(Debug)]
    struct Counter {
        base: ComponentBase,
        count: ElementId,
        label: ElementId,
    }

    impl Component for Counter {
        type Fields = CounterFields;

        fn register_fields(registry: &mut FieldRegistry) -> Result<CounterFields> {
            Ok(CounterFields {
                count: registry.register("test.counter.count", ElementType::UInt64, "count")?,
                label: registry.register("test.counter.label", ElementType::String, "label")?,
            })
        }

        fn attach(
            registry: &mut FieldRegistry,
            store: &mut ElementStore,
            fields: CounterFields,
            base: ComponentBase,
        ) -> Result<Self> {
            Ok(Self {
                count: base.reserve(registry, store, fields.count)?,
                label: base.reserve(registry, store, fields.label)?,
                base,
            })
        }

        fn base(&self) -> &ComponentBase {
            &self.base
        }
    }

    #[test]
    fn fresh_build_creates_every_field() {
        let mut reg = FieldRegistry::new();
        let mut store = ElementStore::new();
        let c = Counter::create(&mut reg, &mut store).unwrap();
        assert_eq!(store.size(c.root()).unwrap(), 2);
        assert_eq!(store.refcount(c.count).unwrap(), 1);
        store.check_invariants().unwrap();
    }

    #[test]
    fn attach_reuses_existing_children() {
        let mut reg = FieldRegistry::new();
        let mut store = ElementStore::new();
        let first = Counter::create(&mut reg, &mut store).unwrap();
        store.set(first.count, 41u64).unwrap();
        store.increment(first.count).unwrap();

        let again = Counter::build(&mut reg, &mut store, None, Some(first.root())).unwrap();
        assert_eq!(again.count, first.count);
        assert_eq!(store.get::<u64>(again.count).unwrap(), 42);
        assert_eq!(store.size(again.root()).unwrap(), 2);
    }

    #[test]
    fn attach_fills_missing_fields() {
        let mut reg = FieldRegistry::new();
        let mut store = ElementStore::new();
        let fields = Counter::register_fields(&mut reg).unwrap();
        let root = store.alloc_empty(ElementType::Map, None);
        let count = store.alloc_scalar(9u64, Some(fields.count));
        store.map_insert(root, count).unwrap();

        let c = Counter::build(&mut reg, &mut store, None, Some(root)).unwrap();
        assert_eq!(c.count, count);
        assert_eq!(store.get_str(c.label).unwrap(), "");
        assert_eq!(store.size(root).unwrap(), 2);
    }

    #[test]
    fn attach_rejects_non_map_root() {
        let mut reg = FieldRegistry::new();
        let mut store = ElementStore::new();
        let not_a_map = store.alloc_empty(ElementType::Vector, None);
        let err = Counter::build(&mut reg, &mut store, None, Some(not_a_map)).unwrap_err();
        assert!(err.is_type_mismatch());
    }

    #[test]
    fn attach_rejects_wrong_field_kind() {
        let mut reg = FieldRegistry::new();
        let mut store = ElementStore::new();
        let fields = Counter::register_fields(&mut reg).unwrap();
        let root = store.alloc_empty(ElementType::Map, None);
        let bogus = store.alloc_scalar(1i32, Some(fields.count));
        store.map_insert(root, bogus).unwrap();

        let err = Counter::build(&mut reg, &mut store, None, Some(root)).unwrap_err();
        assert!(err.is_type_mismatch());
        assert_eq!(store.get::<i32>(bogus).unwrap(), 1);
    }

    #[test]
    fn failed_attach_creates_nothing() {
        let mut reg = FieldRegistry::new();
        let mut store = ElementStore::new();
        let fields = Counter::register_fields(&mut reg).unwrap();
        let root = store.alloc_empty(ElementType::Map, None);
        let bogus = store.alloc_scalar(7u8, Some(fields.label));
        store.map_insert(root, bogus).unwrap();
        let live = store.len();

        let err = Counter::build(&mut reg, &mut store, None, Some(root)).unwrap_err();
        assert!(err.is_type_mismatch());
        assert_eq!(store.size(root).unwrap(), 1);
        assert_eq!(store.map_get(root, fields.count).unwrap(), None);
        assert_eq!(store.len(), live);
    }

    #[test]
    fn release_frees_whole_record() {
        let mut reg = FieldRegistry::new();
        let mut store = ElementStore::new();
        let c = Counter::create(&mut reg, &mut store).unwrap();
        c.base().release(&mut store).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn clone_type_builds_same_shape() {
        let mut reg = FieldRegistry::new();
        let mut store = ElementStore::new();
        let c = Counter::create(&mut reg, &mut store).unwrap();
        let factory = c.clone_type();
        assert!(factory.type_name().ends_with("Counter"));
        let id = reg.register_complex("test.counter", factory, "").unwrap();
        let root = reg.instantiate(&mut store, id).unwrap();
        assert_eq!(store.size(root).unwrap(), 2);
        assert_eq!(store.field_id(root).unwrap(), Some(id));
    }
}
