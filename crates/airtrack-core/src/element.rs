//! Tagged value nodes: kinds, payloads and typed scalar access.
//!
//! Every tracked value is an [`Element`] held by the [`ElementStore`]
//! arena. The element's kind is never stored separately from its payload:
//! [`ElementValue`] is the payload, and [`ElementValue::element_type`]
//! derives the kind from it, so a node can't claim one kind while holding
//! another.
//!
//! Container payloads hold [`ElementId`] handles rather than owned
//! children. A child may sit in more than one container; its
//! [`Element::refcount`] counts those containers.
//!
//! [`ElementStore`]: crate::store::ElementStore

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::mac::MacAddr;

// =============================================================================
// Identities
// =============================================================================

/// Stable small-integer identity allocated by the field registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldId(u32);

impl FieldId {
    /// Wrap a raw id.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw id value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle to an element slot in the store.
///
/// The generation distinguishes a live element from a later element that
/// reused the same slot, so a stale handle is reported rather than aliased.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ElementId {
    index: u32,
    generation: u32,
}

impl ElementId {
    /// Build a handle from its parts.
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index in the arena.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Generation of the slot when this handle was issued.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

// =============================================================================
// ElementType
// =============================================================================

/// The fixed set of kinds an element can have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    #[serde(rename = "int8_t")]
    Int8,
    #[serde(rename = "uint8_t")]
    UInt8,
    #[serde(rename = "int16_t")]
    Int16,
    #[serde(rename = "uint16_t")]
    UInt16,
    #[serde(rename = "int32_t")]
    Int32,
    #[serde(rename = "uint32_t")]
    UInt32,
    #[serde(rename = "int64_t")]
    Int64,
    #[serde(rename = "uint64_t")]
    UInt64,
    #[serde(rename = "float")]
    Float,
    #[serde(rename = "double")]
    Double,
    #[serde(rename = "string")]
    String,
    #[serde(rename = "mac_addr")]
    Mac,
    #[serde(rename = "uuid")]
    Uuid,
    /// Ordered sequence of children.
    #[serde(rename = "vector<>")]
    Vector,
    /// Children keyed by their field id.
    #[serde(rename = "map<>")]
    Map,
    /// Children keyed by an arbitrary integer.
    #[serde(rename = "intmap<>")]
    IntMap,
    /// Children keyed by MAC address.
    #[serde(rename = "macmap<>")]
    MacMap,
}

impl ElementType {
    /// Every kind, scalars first.
    pub const ALL: [ElementType; 17] = [
        Self::Int8,
        Self::UInt8,
        Self::Int16,
        Self::UInt16,
        Self::Int32,
        Self::UInt32,
        Self::Int64,
        Self::UInt64,
        Self::Float,
        Self::Double,
        Self::String,
        Self::Mac,
        Self::Uuid,
        Self::Vector,
        Self::Map,
        Self::IntMap,
        Self::MacMap,
    ];

    /// Stable display name used in errors and field listings.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Int8 => "int8_t",
            Self::UInt8 => "uint8_t",
            Self::Int16 => "int16_t",
            Self::UInt16 => "uint16_t",
            Self::Int32 => "int32_t",
            Self::UInt32 => "uint32_t",
            Self::Int64 => "int64_t",
            Self::UInt64 => "uint64_t",
            Self::Float => "float",
            Self::Double => "double",
            Self::String => "string",
            Self::Mac => "mac_addr",
            Self::Uuid => "uuid",
            Self::Vector => "vector<>",
            Self::Map => "map<>",
            Self::IntMap => "intmap<>",
            Self::MacMap => "macmap<>",
        }
    }

    /// Integer or floating-point kinds.
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        self.is_integer() || matches!(self, Self::Float | Self::Double)
    }

    /// Signed or unsigned integer kinds.
    #[must_use]
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            Self::Int8
                | Self::UInt8
                | Self::Int16
                | Self::UInt16
                | Self::Int32
                | Self::UInt32
                | Self::Int64
                | Self::UInt64
        )
    }

    /// The four container kinds.
    #[must_use]
    pub const fn is_container(self) -> bool {
        matches!(self, Self::Vector | Self::Map | Self::IntMap | Self::MacMap)
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ElementType {
    type Err = ParseElementTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| ParseElementTypeError(s.to_string()))
    }
}

/// Error parsing an [`ElementType`] from its stable name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown element kind `{0}`")]
pub struct ParseElementTypeError(String);

// =============================================================================
// ElementValue
// =============================================================================

/// Payload of an element. The variant is the element's kind.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementValue {
    Int8(i8),
    UInt8(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(String),
    Mac(MacAddr),
    Uuid(Uuid),
    Vector(Vec<ElementId>),
    Map(BTreeMap<FieldId, ElementId>),
    IntMap(BTreeMap<i64, ElementId>),
    MacMap(BTreeMap<MacAddr, ElementId>),
}

impl ElementValue {
    /// Zeroed scalar or empty container of the given kind.
    #[must_use]
    pub fn empty(kind: ElementType) -> Self {
        match kind {
            ElementType::Int8 => Self::Int8(0),
            ElementType::UInt8 => Self::UInt8(0),
            ElementType::Int16 => Self::Int16(0),
            ElementType::UInt16 => Self::UInt16(0),
            ElementType::Int32 => Self::Int32(0),
            ElementType::UInt32 => Self::UInt32(0),
            ElementType::Int64 => Self::Int64(0),
            ElementType::UInt64 => Self::UInt64(0),
            ElementType::Float => Self::Float(0.0),
            ElementType::Double => Self::Double(0.0),
            ElementType::String => Self::String(String::new()),
            ElementType::Mac => Self::Mac(MacAddr::default()),
            ElementType::Uuid => Self::Uuid(Uuid::nil()),
            ElementType::Vector => Self::Vector(Vec::new()),
            ElementType::Map => Self::Map(BTreeMap::new()),
            ElementType::IntMap => Self::IntMap(BTreeMap::new()),
            ElementType::MacMap => Self::MacMap(BTreeMap::new()),
        }
    }

    /// Kind of this payload.
    #[must_use]
    pub const fn element_type(&self) -> ElementType {
        match self {
            Self::Int8(_) => ElementType::Int8,
            Self::UInt8(_) => ElementType::UInt8,
            Self::Int16(_) => ElementType::Int16,
            Self::UInt16(_) => ElementType::UInt16,
            Self::Int32(_) => ElementType::Int32,
            Self::UInt32(_) => ElementType::UInt32,
            Self::Int64(_) => ElementType::Int64,
            Self::UInt64(_) => ElementType::UInt64,
            Self::Float(_) => ElementType::Float,
            Self::Double(_) => ElementType::Double,
            Self::String(_) => ElementType::String,
            Self::Mac(_) => ElementType::Mac,
            Self::Uuid(_) => ElementType::Uuid,
            Self::Vector(_) => ElementType::Vector,
            Self::Map(_) => ElementType::Map,
            Self::IntMap(_) => ElementType::IntMap,
            Self::MacMap(_) => ElementType::MacMap,
        }
    }

    /// Handles of every child held by a container payload, in key order.
    /// Empty for scalars.
    #[must_use]
    pub fn child_ids(&self) -> Vec<ElementId> {
        match self {
            Self::Vector(v) => v.clone(),
            Self::Map(m) => m.values().copied().collect(),
            Self::IntMap(m) => m.values().copied().collect(),
            Self::MacMap(m) => m.values().copied().collect(),
            _ => Vec::new(),
        }
    }
}

// =============================================================================
// Element
// =============================================================================

/// A single node of the value tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    field_id: Option<FieldId>,
    refcount: u32,
    value: ElementValue,
}

impl Element {
    pub(crate) fn new(value: ElementValue, field_id: Option<FieldId>) -> Self {
        Self {
            field_id,
            refcount: 0,
            value,
        }
    }

    /// Registered identity, or `None` for anonymous nodes.
    #[must_use]
    pub fn field_id(&self) -> Option<FieldId> {
        self.field_id
    }

    /// Number of containers currently holding this element.
    #[must_use]
    pub fn refcount(&self) -> u32 {
        self.refcount
    }

    /// Kind of this element.
    #[must_use]
    pub fn element_type(&self) -> ElementType {
        self.value.element_type()
    }

    /// Read-only payload, for kind-dispatching walkers.
    #[must_use]
    pub fn value(&self) -> &ElementValue {
        &self.value
    }

    pub(crate) fn value_mut(&mut self) -> &mut ElementValue {
        &mut self.value
    }

    pub(crate) fn refcount_mut(&mut self) -> &mut u32 {
        &mut self.refcount
    }
}

// =============================================================================
// Typed scalar access
// =============================================================================

/// Rust types that map one-to-one onto a scalar element kind.
///
/// Access through this trait never coerces: an `i64` can only be read from
/// or written to an [`ElementType::Int64`] element.
pub trait TrackedScalar: Sized + Clone {
    /// Element kind backing this type.
    const KIND: ElementType;
    /// Operation name reported for a mismatched read.
    const GET: &'static str;
    /// Operation name reported for a mismatched write.
    const SET: &'static str;

    /// Borrow the payload if it has this kind.
    fn slot(value: &ElementValue) -> Option<&Self>;

    /// Mutably borrow the payload if it has this kind.
    fn slot_mut(value: &mut ElementValue) -> Option<&mut Self>;

    /// Wrap into a payload of this kind.
    fn into_value(self) -> ElementValue;
}

/// Numeric scalars supporting compound `+=` / `-=`.
pub trait TrackedNumeric: TrackedScalar + Copy {
    /// Addition with integer wraparound.
    fn add(self, rhs: Self) -> Self;
    /// Subtraction with integer wraparound.
    fn sub(self, rhs: Self) -> Self;
}

/// Integer scalars supporting compound bitwise operators.
pub trait TrackedInteger: TrackedNumeric {
    fn bitor(self, rhs: Self) -> Self;
    fn bitand(self, rhs: Self) -> Self;
    fn bitxor(self, rhs: Self) -> Self;
}

macro_rules! tracked_scalar {
    ($ty:ty, $variant:ident, $name:literal) => {
        impl TrackedScalar for $ty {
            const KIND: ElementType = ElementType::$variant;
            const GET: &'static str = concat!("get ", $name);
            const SET: &'static str = concat!("set ", $name);

            fn slot(value: &ElementValue) -> Option<&Self> {
                match value {
                    ElementValue::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn slot_mut(value: &mut ElementValue) -> Option<&mut Self> {
                match value {
                    ElementValue::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn into_value(self) -> ElementValue {
                ElementValue::$variant(self)
            }
        }
    };
}

macro_rules! tracked_integer {
    ($ty:ty, $variant:ident, $name:literal) => {
        tracked_scalar!($ty, $variant, $name);

        impl TrackedNumeric for $ty {
            fn add(self, rhs: Self) -> Self {
                self.wrapping_add(rhs)
            }

            fn sub(self, rhs: Self) -> Self {
                self.wrapping_sub(rhs)
            }
        }

        impl TrackedInteger for $ty {
            fn bitor(self, rhs: Self) -> Self {
                self | rhs
            }

            fn bitand(self, rhs: Self) -> Self {
                self & rhs
            }

            fn bitxor(self, rhs: Self) -> Self {
                self ^ rhs
            }
        }
    };
}

macro_rules! tracked_float {
    ($ty:ty, $variant:ident, $name:literal) => {
        tracked_scalar!($ty, $variant, $name);

        impl TrackedNumeric for $ty {
            fn add(self, rhs: Self) -> Self {
                self + rhs
            }

            fn sub(self, rhs: Self) -> Self {
                self - rhs
            }
        }
    };
}

tracked_integer!(i8, Int8, "int8_t");
tracked_integer!(u8, UInt8, "uint8_t");
tracked_integer!(i16, Int16, "int16_t");
tracked_integer!(u16, UInt16, "uint16_t");
tracked_integer!(i32, Int32, "int32_t");
tracked_integer!(u32, UInt32, "uint32_t");
tracked_integer!(i64, Int64, "int64_t");
tracked_integer!(u64, UInt64, "uint64_t");
tracked_float!(f32, Float, "float");
tracked_float!(f64, Double, "double");
tracked_scalar!(String, String, "string");
tracked_scalar!(MacAddr, Mac, "mac_addr");
tracked_scalar!(Uuid, Uuid, "uuid");
