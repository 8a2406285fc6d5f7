//! airtrack-core: tracked-element value tree for wireless monitoring
//!
//! Every observed entity is described by a tree of typed elements. Nodes
//! live in an [`ElementStore`] arena and are addressed by generation-checked
//! [`ElementId`] handles. Containers share children through explicit
//! reference counts; an element is freed when its last holder lets go.
//!
//! # Architecture
//!
//! ```text
//! FieldRegistry ── names/kinds ──► Component (structured record)
//!                                      │ reserve / attach
//!                                      ▼
//!                               ElementStore (arena)
//!                                      │
//!               TrackedRrd / SignalData / TrackedLocation / ...
//!                                      │ pre_serialize
//!                                      ▼
//!                         export::ElementView ──► serde
//! ```
//!
//! # Modules
//!
//! - `element`: kinds, payloads and typed scalar access
//! - `store`: the arena, container operations and ownership
//! - `registry`: dotted field names to stable ids
//! - `component`: structured records over a map element
//! - `aggregator`: RRD aggregation policies
//! - `rrd`: second/minute/hour ring buffers
//! - `location`, `signal`, `seenby`, `ipdata`: built-in records
//! - `export`, `import`: serde view and JSON rebuild
//! - `config`, `logging`: ambient setup for binaries
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod aggregator;
pub mod component;
pub mod config;
pub mod element;
pub mod error;
pub mod export;
pub mod import;
pub mod ipdata;
pub mod location;
pub mod logging;
pub mod mac;
pub mod registry;
pub mod rrd;
pub mod seenby;
pub mod signal;
pub mod store;

pub use aggregator::{Aggregator, AggregatorKind};
pub use component::{Component, ComponentBase, ComponentFactory};
pub use element::{ElementId, ElementType, ElementValue, FieldId};
pub use error::{Error, Result};
pub use mac::MacAddr;
pub use registry::{FieldDescriptor, FieldRegistry};
pub use rrd::{SampleOutcome, TrackedMinuteRrd, TrackedRrd};
pub use store::ElementStore;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Register the fields of every built-in record.
///
/// Records register their own fields when first built; this is for callers
/// that want the full catalogue up front, e.g. to list it.
pub fn register_builtin_fields(registry: &mut FieldRegistry) -> Result<()> {
    location::LocationTriplet::register_fields(registry)?;
    location::TrackedLocation::register_fields(registry)?;
    rrd::RrdFields::register(registry)?;
    signal::SignalData::register_fields(registry)?;
    seenby::SeenByData::register_fields(registry)?;
    ipdata::IpData::register_fields(registry)?;
    Ok(())
}
