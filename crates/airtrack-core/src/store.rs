//! Arena holding every element of a value tree.
//!
//! Elements are addressed by generation-checked [`ElementId`] handles.
//! Containers hold handles to their children and each insertion links the
//! child (refcount + 1); removal, replacement, or destruction of the
//! container unlinks it (refcount - 1). An element whose refcount drops to
//! zero through an unlink is destroyed, and destruction unlinks every child
//! in turn, so aliased children survive as long as some other container
//! still holds them.
//!
//! Top-level elements (record roots) start at refcount zero and live until
//! [`ElementStore::destroy`] is called, or until they are inserted into a
//! container and later unlinked.
//!
//! # Failure atomicity
//!
//! Every mutating call validates kinds, handles, bounds and acyclicity
//! before it changes anything, so a failed call leaves the store untouched.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use tracing::{error, trace};

use crate::element::{
    Element, ElementId, ElementType, ElementValue, FieldId, TrackedInteger, TrackedNumeric,
    TrackedScalar,
};
use crate::error::{Error, OwnershipError, Result};
use crate::mac::MacAddr;

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, Default)]
struct Slot {
    generation: u32,
    element: Option<Element>,
}

/// Key addressing a child within one of the four container kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContainerKey {
    Append,
    Field(FieldId),
    Int(i64),
    Mac(MacAddr),
}

impl ContainerKey {
    const fn operation(self) -> &'static str {
        match self {
            Self::Append => "push onto vector",
            Self::Field(_) => "insert into map",
            Self::Int(_) => "insert into intmap",
            Self::Mac(_) => "insert into macmap",
        }
    }
}

/// Summary of the store's bookkeeping, for invariant checks and telemetry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreAudit {
    /// Elements currently alive.
    pub live: usize,
    /// Sum of all live elements' refcounts.
    pub total_refcount: u64,
    /// Number of parent-to-child edges across all containers.
    pub edges: u64,
}

// =============================================================================
// ElementStore
// =============================================================================

/// Slab of elements plus a free list of reusable slots.
#[derive(Debug, Clone, Default)]
pub struct ElementStore {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl ElementStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store with room for `capacity` elements.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            live: 0,
        }
    }

    /// Number of live elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live
    }

    /// Whether no element is alive.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Whether the handle refers to a live element.
    #[must_use]
    pub fn contains(&self, id: ElementId) -> bool {
        self.slot(id).is_some()
    }

    /// Handles of every live element, in slot order.
    pub fn ids(&self) -> impl Iterator<Item = ElementId> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.element
                .as_ref()
                .map(|_| ElementId::new(index as u32, slot.generation))
        })
    }

    // -------------------------------------------------------------------------
    // Allocation
    // -------------------------------------------------------------------------

    /// Allocate an element holding `value`. The new element has refcount 0.
    pub fn alloc(&mut self, value: ElementValue, field_id: Option<FieldId>) -> ElementId {
        let element = Element::new(value, field_id);
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.element = Some(element);
            return ElementId::new(index, slot.generation);
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            element: Some(element),
        });
        ElementId::new(index, 0)
    }

    /// Allocate a zeroed scalar or empty container of `kind`.
    pub fn alloc_empty(&mut self, kind: ElementType, field_id: Option<FieldId>) -> ElementId {
        self.alloc(ElementValue::empty(kind), field_id)
    }

    /// Allocate a scalar element from a typed value.
    pub fn alloc_scalar<T: TrackedScalar>(
        &mut self,
        value: T,
        field_id: Option<FieldId>,
    ) -> ElementId {
        self.alloc(value.into_value(), field_id)
    }

    // -------------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------------

    /// Borrow a live element.
    pub fn element(&self, id: ElementId) -> Result<&Element> {
        self.slot(id)
            .ok_or_else(|| OwnershipError::Dangling(id).into())
    }

    /// Kind of a live element.
    pub fn element_type(&self, id: ElementId) -> Result<ElementType> {
        Ok(self.element(id)?.element_type())
    }

    /// Field id of a live element.
    pub fn field_id(&self, id: ElementId) -> Result<Option<FieldId>> {
        Ok(self.element(id)?.field_id())
    }

    /// Refcount of a live element.
    pub fn refcount(&self, id: ElementId) -> Result<u32> {
        Ok(self.element(id)?.refcount())
    }

    // -------------------------------------------------------------------------
    // Typed scalar access
    // -------------------------------------------------------------------------

    /// Read a scalar of exactly type `T`.
    pub fn get<T: TrackedScalar>(&self, id: ElementId) -> Result<T> {
        self.get_ref::<T>(id).cloned()
    }

    /// Borrow a scalar of exactly type `T`.
    pub fn get_ref<T: TrackedScalar>(&self, id: ElementId) -> Result<&T> {
        let value = self.element(id)?.value();
        T::slot(value).ok_or_else(|| Error::mismatch(T::GET, value.element_type()))
    }

    /// Borrow a string element.
    pub fn get_str(&self, id: ElementId) -> Result<&str> {
        self.get_ref::<String>(id).map(String::as_str)
    }

    /// Overwrite a scalar of exactly type `T`.
    pub fn set<T: TrackedScalar>(&mut self, id: ElementId, value: T) -> Result<()> {
        let slot = self.scalar_mut::<T>(id, T::SET)?;
        *slot = value;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Arithmetic
    // -------------------------------------------------------------------------

    /// Add one to any numeric element. Integers wrap.
    pub fn increment(&mut self, id: ElementId) -> Result<()> {
        self.step(id, true)
    }

    /// Subtract one from any numeric element. Integers wrap.
    pub fn decrement(&mut self, id: ElementId) -> Result<()> {
        self.step(id, false)
    }

    /// `element += rhs`, requiring the element to be exactly type `T`.
    pub fn add_assign<T: TrackedNumeric>(&mut self, id: ElementId, rhs: T) -> Result<()> {
        self.update::<T>(id, "add-assign", |v| v.add(rhs))
    }

    /// `element -= rhs`, requiring the element to be exactly type `T`.
    pub fn sub_assign<T: TrackedNumeric>(&mut self, id: ElementId, rhs: T) -> Result<()> {
        self.update::<T>(id, "sub-assign", |v| v.sub(rhs))
    }

    /// `element |= rhs` on an integer element of exactly type `T`.
    pub fn bitor_assign<T: TrackedInteger>(&mut self, id: ElementId, rhs: T) -> Result<()> {
        self.update::<T>(id, "or-assign", |v| v.bitor(rhs))
    }

    /// `element &= rhs` on an integer element of exactly type `T`.
    pub fn bitand_assign<T: TrackedInteger>(&mut self, id: ElementId, rhs: T) -> Result<()> {
        self.update::<T>(id, "and-assign", |v| v.bitand(rhs))
    }

    /// `element ^= rhs` on an integer element of exactly type `T`.
    pub fn bitxor_assign<T: TrackedInteger>(&mut self, id: ElementId, rhs: T) -> Result<()> {
        self.update::<T>(id, "xor-assign", |v| v.bitxor(rhs))
    }

    fn step(&mut self, id: ElementId, up: bool) -> Result<()> {
        fn bump<T: TrackedNumeric>(v: &mut T, one: T, up: bool) {
            *v = if up { v.add(one) } else { v.sub(one) };
        }

        let operation = if up { "increment" } else { "decrement" };
        match self.element_mut(id)?.value_mut() {
            ElementValue::Int8(v) => bump(v, 1, up),
            ElementValue::UInt8(v) => bump(v, 1, up),
            ElementValue::Int16(v) => bump(v, 1, up),
            ElementValue::UInt16(v) => bump(v, 1, up),
            ElementValue::Int32(v) => bump(v, 1, up),
            ElementValue::UInt32(v) => bump(v, 1, up),
            ElementValue::Int64(v) => bump(v, 1, up),
            ElementValue::UInt64(v) => bump(v, 1, up),
            ElementValue::Float(v) => bump(v, 1.0, up),
            ElementValue::Double(v) => bump(v, 1.0, up),
            other => return Err(Error::mismatch(operation, other.element_type())),
        }
        Ok(())
    }

    fn update<T: TrackedNumeric>(
        &mut self,
        id: ElementId,
        operation: &'static str,
        f: impl FnOnce(T) -> T,
    ) -> Result<()> {
        let slot = self.scalar_mut::<T>(id, operation)?;
        *slot = f(*slot);
        Ok(())
    }

    fn scalar_mut<T: TrackedScalar>(
        &mut self,
        id: ElementId,
        operation: &'static str,
    ) -> Result<&mut T> {
        let value = self.element_mut(id)?.value_mut();
        let found = value.element_type();
        T::slot_mut(value).ok_or_else(|| Error::mismatch(operation, found))
    }

    // -------------------------------------------------------------------------
    // Containers: read
    // -------------------------------------------------------------------------

    /// Number of children of a container.
    pub fn size(&self, id: ElementId) -> Result<usize> {
        match self.element(id)?.value() {
            ElementValue::Vector(v) => Ok(v.len()),
            ElementValue::Map(m) => Ok(m.len()),
            ElementValue::IntMap(m) => Ok(m.len()),
            ElementValue::MacMap(m) => Ok(m.len()),
            other => Err(Error::mismatch("size", other.element_type())),
        }
    }

    /// Children of a container in iteration order (position or key order).
    pub fn children(&self, id: ElementId) -> Result<Vec<ElementId>> {
        let value = self.element(id)?.value();
        if !value.element_type().is_container() {
            return Err(Error::mismatch("iterate", value.element_type()));
        }
        Ok(value.child_ids())
    }

    /// Borrow a sequence's children.
    pub fn vector(&self, id: ElementId) -> Result<&[ElementId]> {
        match self.element(id)?.value() {
            ElementValue::Vector(v) => Ok(v),
            other => Err(Error::mismatch("index vector", other.element_type())),
        }
    }

    /// Child at `index` of a sequence, if any.
    pub fn get_index(&self, id: ElementId, index: usize) -> Result<Option<ElementId>> {
        Ok(self.vector(id)?.get(index).copied())
    }

    /// Borrow an id-keyed map's entries.
    pub fn map(&self, id: ElementId) -> Result<&BTreeMap<FieldId, ElementId>> {
        match self.element(id)?.value() {
            ElementValue::Map(m) => Ok(m),
            other => Err(Error::mismatch("find in map", other.element_type())),
        }
    }

    /// Child stored under `key` in an id-keyed map.
    pub fn map_get(&self, id: ElementId, key: FieldId) -> Result<Option<ElementId>> {
        Ok(self.map(id)?.get(&key).copied())
    }

    /// Borrow an integer-keyed map's entries.
    pub fn int_map(&self, id: ElementId) -> Result<&BTreeMap<i64, ElementId>> {
        match self.element(id)?.value() {
            ElementValue::IntMap(m) => Ok(m),
            other => Err(Error::mismatch("find in intmap", other.element_type())),
        }
    }

    /// Child stored under `key` in an integer-keyed map.
    pub fn int_map_get(&self, id: ElementId, key: i64) -> Result<Option<ElementId>> {
        Ok(self.int_map(id)?.get(&key).copied())
    }

    /// Borrow a MAC-keyed map's entries.
    pub fn mac_map(&self, id: ElementId) -> Result<&BTreeMap<MacAddr, ElementId>> {
        match self.element(id)?.value() {
            ElementValue::MacMap(m) => Ok(m),
            other => Err(Error::mismatch("find in macmap", other.element_type())),
        }
    }

    /// Child stored under `key` in a MAC-keyed map.
    pub fn mac_map_get(&self, id: ElementId, key: MacAddr) -> Result<Option<ElementId>> {
        Ok(self.mac_map(id)?.get(&key).copied())
    }

    // -------------------------------------------------------------------------
    // Containers: insert
    // -------------------------------------------------------------------------

    /// Append `child` to a sequence.
    pub fn push(&mut self, parent: ElementId, child: ElementId) -> Result<()> {
        self.insert_keyed(parent, ContainerKey::Append, child)
    }

    /// Insert `child` into an id-keyed map under its own field id.
    pub fn map_insert(&mut self, parent: ElementId, child: ElementId) -> Result<()> {
        let key = self
            .field_id(child)?
            .ok_or(OwnershipError::AnonymousMapChild(child))?;
        self.insert_keyed(parent, ContainerKey::Field(key), child)
    }

    /// Insert `child` into an id-keyed map under an explicit key.
    pub fn map_insert_at(
        &mut self,
        parent: ElementId,
        key: FieldId,
        child: ElementId,
    ) -> Result<()> {
        self.insert_keyed(parent, ContainerKey::Field(key), child)
    }

    /// Insert `child` into an integer-keyed map.
    pub fn int_map_insert(&mut self, parent: ElementId, key: i64, child: ElementId) -> Result<()> {
        self.insert_keyed(parent, ContainerKey::Int(key), child)
    }

    /// Insert `child` into a MAC-keyed map.
    pub fn mac_map_insert(
        &mut self,
        parent: ElementId,
        key: MacAddr,
        child: ElementId,
    ) -> Result<()> {
        self.insert_keyed(parent, ContainerKey::Mac(key), child)
    }

    fn insert_keyed(
        &mut self,
        parent: ElementId,
        key: ContainerKey,
        child: ElementId,
    ) -> Result<()> {
        let found = self.element_type(parent)?;
        let expected = match key {
            ContainerKey::Append => ElementType::Vector,
            ContainerKey::Field(_) => ElementType::Map,
            ContainerKey::Int(_) => ElementType::IntMap,
            ContainerKey::Mac(_) => ElementType::MacMap,
        };
        if found != expected {
            return Err(Error::mismatch(key.operation(), found));
        }
        self.element(child)?;
        if self.reaches(child, parent) {
            return Err(OwnershipError::Cycle { parent, child }.into());
        }

        let previous = match (self.element_mut(parent)?.value_mut(), key) {
            (ElementValue::Vector(v), ContainerKey::Append) => {
                v.push(child);
                None
            }
            (ElementValue::Map(m), ContainerKey::Field(k)) => m.insert(k, child),
            (ElementValue::IntMap(m), ContainerKey::Int(k)) => m.insert(k, child),
            (ElementValue::MacMap(m), ContainerKey::Mac(k)) => m.insert(k, child),
            (other, _) => return Err(Error::mismatch(key.operation(), other.element_type())),
        };

        if previous == Some(child) {
            return Ok(());
        }
        self.link(child)?;
        if let Some(old) = previous {
            self.unlink(old)?;
        }
        Ok(())
    }

    /// Whether `target` is reachable from `from` through container edges.
    fn reaches(&self, from: ElementId, target: ElementId) -> bool {
        let mut stack = vec![from];
        let mut seen = HashSet::new();
        while let Some(id) = stack.pop() {
            if id == target {
                return true;
            }
            if !seen.insert(id) {
                continue;
            }
            if let Some(element) = self.slot(id) {
                if element.element_type().is_container() {
                    stack.extend(element.value().child_ids());
                }
            }
        }
        false
    }

    // -------------------------------------------------------------------------
    // Containers: remove
    // -------------------------------------------------------------------------

    /// Remove the child at `index` of a sequence, shifting later children down.
    pub fn remove_index(&mut self, parent: ElementId, index: usize) -> Result<()> {
        let child = match self.element_mut(parent)?.value_mut() {
            ElementValue::Vector(v) => {
                if index >= v.len() {
                    return Err(OwnershipError::IndexOutOfRange {
                        index,
                        len: v.len(),
                    }
                    .into());
                }
                v.remove(index)
            }
            other => return Err(Error::mismatch("remove from vector", other.element_type())),
        };
        self.unlink(child)
    }

    /// Drop children past `len` from a sequence.
    pub fn truncate(&mut self, parent: ElementId, len: usize) -> Result<()> {
        let removed = match self.element_mut(parent)?.value_mut() {
            ElementValue::Vector(v) => v.split_off(len.min(v.len())),
            other => return Err(Error::mismatch("truncate", other.element_type())),
        };
        removed.into_iter().try_for_each(|child| self.unlink(child))
    }

    /// Remove the child under `key` from an id-keyed map.
    /// Returns whether a child was present.
    pub fn map_remove(&mut self, parent: ElementId, key: FieldId) -> Result<bool> {
        let removed = match self.element_mut(parent)?.value_mut() {
            ElementValue::Map(m) => m.remove(&key),
            other => return Err(Error::mismatch("remove from map", other.element_type())),
        };
        self.unlink_removed(removed)
    }

    /// Remove the child under `key` from an integer-keyed map.
    pub fn int_map_remove(&mut self, parent: ElementId, key: i64) -> Result<bool> {
        let removed = match self.element_mut(parent)?.value_mut() {
            ElementValue::IntMap(m) => m.remove(&key),
            other => return Err(Error::mismatch("remove from intmap", other.element_type())),
        };
        self.unlink_removed(removed)
    }

    /// Remove the child under `key` from a MAC-keyed map.
    pub fn mac_map_remove(&mut self, parent: ElementId, key: MacAddr) -> Result<bool> {
        let removed = match self.element_mut(parent)?.value_mut() {
            ElementValue::MacMap(m) => m.remove(&key),
            other => return Err(Error::mismatch("remove from macmap", other.element_type())),
        };
        self.unlink_removed(removed)
    }

    /// Remove every child of a container.
    pub fn clear(&mut self, parent: ElementId) -> Result<()> {
        let value = self.element_mut(parent)?.value_mut();
        let kind = value.element_type();
        if !kind.is_container() {
            return Err(Error::mismatch("clear", kind));
        }
        let removed = std::mem::replace(value, ElementValue::empty(kind)).child_ids();
        removed.into_iter().try_for_each(|child| self.unlink(child))
    }

    fn unlink_removed(&mut self, removed: Option<ElementId>) -> Result<bool> {
        match removed {
            Some(child) => {
                self.unlink(child)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // -------------------------------------------------------------------------
    // Ownership bookkeeping
    // -------------------------------------------------------------------------

    /// Record one more holder of `id`. Only container inserts call this.
    pub(crate) fn link(&mut self, id: ElementId) -> Result<()> {
        let refcount = self.element_mut(id)?.refcount_mut();
        *refcount = refcount.saturating_add(1);
        trace!(element = %id, refcount = *refcount, "link");
        Ok(())
    }

    /// Drop one holder of `id`, destroying it when no holder remains.
    pub(crate) fn unlink(&mut self, id: ElementId) -> Result<()> {
        let refcount = self.element_mut(id)?.refcount_mut();
        if *refcount == 0 {
            return Err(OwnershipError::RefcountUnderflow(id).into());
        }
        *refcount -= 1;
        let remaining = *refcount;
        trace!(element = %id, refcount = remaining, "unlink");
        if remaining == 0 {
            self.destroy_unreferenced(id);
        }
        Ok(())
    }

    /// Destroy an element that no container holds, unlinking its children.
    pub fn destroy(&mut self, id: ElementId) -> Result<()> {
        let refcount = self.refcount(id)?;
        if refcount > 0 {
            return Err(OwnershipError::DestroyReferenced { id, refcount }.into());
        }
        self.destroy_unreferenced(id);
        Ok(())
    }

    /// Free `root` and every descendant whose last holder disappears with it.
    ///
    /// Uses an explicit stack so arbitrarily deep trees don't overflow.
    fn destroy_unreferenced(&mut self, root: ElementId) {
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(element) = self.take(id) else {
                error!(element = %id, "destroy reached a dead element");
                continue;
            };
            for child in element.value().child_ids() {
                let Some(child_element) = self.slot_mut(child) else {
                    error!(parent = %id, child = %child, "destroy found a dangling child");
                    continue;
                };
                let refcount = child_element.refcount_mut();
                if *refcount == 0 {
                    error!(parent = %id, child = %child, "child already at zero refcount");
                    continue;
                }
                *refcount -= 1;
                if *refcount == 0 {
                    stack.push(child);
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Auditing
    // -------------------------------------------------------------------------

    /// Count live elements, refcounts and container edges.
    #[must_use]
    pub fn audit(&self) -> StoreAudit {
        let mut audit = StoreAudit::default();
        for element in self.slots.iter().filter_map(|s| s.element.as_ref()) {
            audit.live += 1;
            audit.total_refcount += u64::from(element.refcount());
            audit.edges += element.value().child_ids().len() as u64;
        }
        audit
    }

    /// Verify that every refcount equals the number of container edges
    /// pointing at it and that no container holds a dead handle.
    pub fn check_invariants(&self) -> Result<()> {
        let mut holders: HashMap<ElementId, u32> = HashMap::new();
        for id in self.ids() {
            for child in self.element(id)?.value().child_ids() {
                if !self.contains(child) {
                    return Err(OwnershipError::Dangling(child).into());
                }
                *holders.entry(child).or_default() += 1;
            }
        }
        for id in self.ids() {
            let refcount = self.refcount(id)?;
            let held = holders.get(&id).copied().unwrap_or(0);
            if refcount != held {
                return Err(OwnershipError::RefcountMismatch {
                    id,
                    refcount,
                    holders: held,
                }
                .into());
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Slot plumbing
    // -------------------------------------------------------------------------

    fn slot(&self, id: ElementId) -> Option<&Element> {
        self.slots
            .get(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.element.as_ref())
    }

    fn slot_mut(&mut self, id: ElementId) -> Option<&mut Element> {
        self.slots
            .get_mut(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.element.as_mut())
    }

    fn element_mut(&mut self, id: ElementId) -> Result<&mut Element> {
        self.slot_mut(id)
            .ok_or_else(|| OwnershipError::Dangling(id).into())
    }

    fn take(&mut self, id: ElementId) -> Option<Element> {
        let slot = self
            .slots
            .get_mut(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())?;
        let element = slot.element.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index());
        self.live -= 1;
        Some(element)
    }
}
