//! GPS location records.
//!
//! [`LocationTriplet`] is a single fix. [`TrackedLocation`] keeps the
//! bounding box and running average of every fix seen for an entity.

use crate::component::{Component, ComponentBase};
use crate::element::{ElementId, ElementType, FieldId};
use crate::error::Result;
use crate::registry::FieldRegistry;
use crate::store::ElementStore;

/// Fixed-point multiplier for the running location sums.
pub const PRECISION_MULTIPLIER: f64 = 10_000.0;

/// Running sums are rescaled once any of them touches these bits.
const OVERFLOW_MASK: u64 = 0xF000_0000_0000_0000;

// =============================================================================
// LocationTriplet
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocationTripletFields {
    pub lat: FieldId,
    pub lon: FieldId,
    pub alt: FieldId,
    pub speed: FieldId,
    pub fix: FieldId,
    pub valid: FieldId,
}

/// One position: latitude, longitude, altitude, speed and fix quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocationTriplet {
    base: ComponentBase,
    lat: ElementId,
    lon: ElementId,
    alt: ElementId,
    speed: ElementId,
    fix: ElementId,
    valid: ElementId,
}

impl LocationTriplet {
    pub fn lat(&self, store: &ElementStore) -> Result<f64> {
        store.get(self.lat)
    }

    pub fn set_lat(&self, store: &mut ElementStore, lat: f64) -> Result<()> {
        store.set(self.lat, lat)
    }

    pub fn lon(&self, store: &ElementStore) -> Result<f64> {
        store.get(self.lon)
    }

    pub fn set_lon(&self, store: &mut ElementStore, lon: f64) -> Result<()> {
        store.set(self.lon, lon)
    }

    pub fn alt(&self, store: &ElementStore) -> Result<f64> {
        store.get(self.alt)
    }

    pub fn set_alt(&self, store: &mut ElementStore, alt: f64) -> Result<()> {
        store.set(self.alt, alt)
    }

    pub fn speed(&self, store: &ElementStore) -> Result<f64> {
        store.get(self.speed)
    }

    pub fn set_speed(&self, store: &mut ElementStore, speed: f64) -> Result<()> {
        store.set(self.speed, speed)
    }

    /// Fix quality: 0 none, 2 for 2D, 3 for 3D.
    pub fn fix(&self, store: &ElementStore) -> Result<u8> {
        store.get(self.fix)
    }

    pub fn set_fix(&self, store: &mut ElementStore, fix: u8) -> Result<()> {
        store.set(self.fix, fix)
    }

    pub fn is_valid(&self, store: &ElementStore) -> Result<bool> {
        Ok(store.get::<u8>(self.valid)? != 0)
    }

    pub fn set_valid(&self, store: &mut ElementStore, valid: bool) -> Result<()> {
        store.set(self.valid, u8::from(valid))
    }

    /// Set a full position and mark it valid.
    pub fn set_full(
        &self,
        store: &mut ElementStore,
        lat: f64,
        lon: f64,
        alt: f64,
        fix: u8,
    ) -> Result<()> {
        self.set_lat(store, lat)?;
        self.set_lon(store, lon)?;
        self.set_alt(store, alt)?;
        self.set_fix(store, fix)?;
        self.set_valid(store, true)
    }

    /// Set a 2D position (fix 2) and mark it valid.
    pub fn set_2d(&self, store: &mut ElementStore, lat: f64, lon: f64) -> Result<()> {
        self.set_lat(store, lat)?;
        self.set_lon(store, lon)?;
        self.set_fix(store, 2)?;
        self.set_valid(store, true)
    }

    /// Copy every value from `other`.
    pub fn copy_from(&self, store: &mut ElementStore, other: &LocationTriplet) -> Result<()> {
        let lat = other.lat(store)?;
        let lon = other.lon(store)?;
        let alt = other.alt(store)?;
        let speed = other.speed(store)?;
        let fix = other.fix(store)?;
        let valid = other.is_valid(store)?;
        self.set_lat(store, lat)?;
        self.set_lon(store, lon)?;
        self.set_alt(store, alt)?;
        self.set_speed(store, speed)?;
        self.set_fix(store, fix)?;
        self.set_valid(store, valid)
    }
}

impl Component for LocationTriplet {
    type Fields = LocationTripletFields;

    fn register_fields(registry: &mut FieldRegistry) -> Result<LocationTripletFields> {
        Ok(LocationTripletFields {
            lat: registry.register(
                "airtrack.common.location.lat",
                ElementType::Double,
                "latitude",
            )?,
            lon: registry.register(
                "airtrack.common.location.lon",
                ElementType::Double,
                "longitude",
            )?,
            alt: registry.register(
                "airtrack.common.location.alt",
                ElementType::Double,
                "altitude (meters)",
            )?,
            speed: registry.register(
                "airtrack.common.location.speed",
                ElementType::Double,
                "speed (kph)",
            )?,
            fix: registry.register(
                "airtrack.common.location.fix",
                ElementType::UInt8,
                "gps fix",
            )?,
            valid: registry.register(
                "airtrack.common.location.valid",
                ElementType::UInt8,
                "valid location",
            )?,
        })
    }

    fn attach(
        registry: &mut FieldRegistry,
        store: &mut ElementStore,
        fields: LocationTripletFields,
        base: ComponentBase,
    ) -> Result<Self> {
        Ok(Self {
            lat: base.reserve(registry, store, fields.lat)?,
            lon: base.reserve(registry, store, fields.lon)?,
            alt: base.reserve(registry, store, fields.alt)?,
            speed: base.reserve(registry, store, fields.speed)?,
            fix: base.reserve(registry, store, fields.fix)?,
            valid: base.reserve(registry, store, fields.valid)?,
            base,
        })
    }

    fn base(&self) -> &ComponentBase {
        &self.base
    }
}

// =============================================================================
// TrackedLocation
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedLocationFields {
    pub loc_valid: FieldId,
    pub loc_fix: FieldId,
    pub min_loc: FieldId,
    pub max_loc: FieldId,
    pub avg_loc: FieldId,
    pub avg_lat: FieldId,
    pub avg_lon: FieldId,
    pub avg_alt: FieldId,
    pub avg_num: FieldId,
    pub avg_alt_num: FieldId,
}

/// Bounding box and running average of an entity's positions.
///
/// A coordinate of exactly zero in the min/max corners means "not seen yet".
/// Altitude only contributes when the fix is 3D.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedLocation {
    base: ComponentBase,
    loc_valid: ElementId,
    loc_fix: ElementId,
    min_loc: LocationTriplet,
    max_loc: LocationTriplet,
    avg_loc: LocationTriplet,
    avg_lat: ElementId,
    avg_lon: ElementId,
    avg_alt: ElementId,
    avg_num: ElementId,
    avg_alt_num: ElementId,
}

impl TrackedLocation {
    #[must_use]
    pub fn min_loc(&self) -> &LocationTriplet {
        &self.min_loc
    }

    #[must_use]
    pub fn max_loc(&self) -> &LocationTriplet {
        &self.max_loc
    }

    #[must_use]
    pub fn avg_loc(&self) -> &LocationTriplet {
        &self.avg_loc
    }

    pub fn is_valid(&self, store: &ElementStore) -> Result<bool> {
        Ok(store.get::<u8>(self.loc_valid)? != 0)
    }

    /// Best fix seen so far.
    pub fn fix(&self, store: &ElementStore) -> Result<u8> {
        store.get(self.loc_fix)
    }

    /// Number of positions in the running average.
    pub fn num_samples(&self, store: &ElementStore) -> Result<i64> {
        store.get(self.avg_num)
    }

    /// Number of altitudes in the running average.
    pub fn num_alt_samples(&self, store: &ElementStore) -> Result<i64> {
        store.get(self.avg_alt_num)
    }

    /// Fold one position into the bounding box and the running average.
    pub fn add_loc(
        &self,
        store: &mut ElementStore,
        lat: f64,
        lon: f64,
        alt: f64,
        fix: u8,
    ) -> Result<()> {
        store.set(self.loc_valid, 1u8)?;
        if fix > self.fix(store)? {
            store.set(self.loc_fix, fix)?;
        }

        widen(
            store,
            lat,
            &self.min_loc,
            &self.max_loc,
            LocationTriplet::lat,
            LocationTriplet::set_lat,
        )?;
        widen(
            store,
            lon,
            &self.min_loc,
            &self.max_loc,
            LocationTriplet::lon,
            LocationTriplet::set_lon,
        )?;
        if fix > 2 {
            widen(
                store,
                alt,
                &self.min_loc,
                &self.max_loc,
                LocationTriplet::alt,
                LocationTriplet::set_alt,
            )?;
        }

        store.add_assign(self.avg_lat, (lat * PRECISION_MULTIPLIER) as i64)?;
        store.add_assign(self.avg_lon, (lon * PRECISION_MULTIPLIER) as i64)?;
        store.increment(self.avg_num)?;
        if fix > 2 {
            store.add_assign(self.avg_alt, (alt * PRECISION_MULTIPLIER) as i64)?;
            store.increment(self.avg_alt_num)?;
        }

        let sum_lat = store.get::<i64>(self.avg_lat)?;
        let sum_lon = store.get::<i64>(self.avg_lon)?;
        let sum_alt = store.get::<i64>(self.avg_alt)?;
        let num = store.get::<i64>(self.avg_num)?;
        let num_alt = store.get::<i64>(self.avg_alt_num)?;

        let calc_lat = (sum_lat / num) as f64 / PRECISION_MULTIPLIER;
        let calc_lon = (sum_lon / num) as f64 / PRECISION_MULTIPLIER;
        let calc_alt = if num_alt == 0 {
            0.0
        } else {
            (sum_alt / num_alt) as f64 / PRECISION_MULTIPLIER
        };
        self.avg_loc.set_full(store, calc_lat, calc_lon, calc_alt, 3)?;

        let near_overflow = [sum_lat, sum_lon, sum_alt, num, num_alt]
            .iter()
            .any(|v| v.unsigned_abs() & OVERFLOW_MASK != 0);
        if near_overflow {
            store.set(self.avg_lat, (calc_lat * PRECISION_MULTIPLIER) as i64)?;
            store.set(self.avg_lon, (calc_lon * PRECISION_MULTIPLIER) as i64)?;
            store.set(self.avg_alt, (calc_alt * PRECISION_MULTIPLIER) as i64)?;
            store.set(self.avg_num, 1i64)?;
            store.set(self.avg_alt_num, 1i64)?;
        }
        Ok(())
    }
}

/// Extend the min/max corners along one axis. Zero means unset.
fn widen(
    store: &mut ElementStore,
    value: f64,
    min: &LocationTriplet,
    max: &LocationTriplet,
    get: fn(&LocationTriplet, &ElementStore) -> Result<f64>,
    set: fn(&LocationTriplet, &mut ElementStore, f64) -> Result<()>,
) -> Result<()> {
    let low = get(min, store)?;
    if value < low || low == 0.0 {
        set(min, store, value)?;
    }
    let high = get(max, store)?;
    if value > high || high == 0.0 {
        set(max, store, value)?;
    }
    Ok(())
}

impl Component for TrackedLocation {
    type Fields = TrackedLocationFields;

    fn register_fields(registry: &mut FieldRegistry) -> Result<TrackedLocationFields> {
        let triplet = LocationTriplet::factory();
        Ok(TrackedLocationFields {
            loc_valid: registry.register(
                "airtrack.common.location.loc_valid",
                ElementType::UInt8,
                "location data valid",
            )?,
            loc_fix: registry.register(
                "airtrack.common.location.loc_fix",
                ElementType::UInt8,
                "location fix precision (2d/3d)",
            )?,
            min_loc: registry.register_complex(
                "airtrack.common.location.min_loc",
                triplet.clone(),
                "minimum corner of bounding rectangle",
            )?,
            max_loc: registry.register_complex(
                "airtrack.common.location.max_loc",
                triplet.clone(),
                "maximum corner of bounding rectangle",
            )?,
            avg_loc: registry.register_complex(
                "airtrack.common.location.avg_loc",
                triplet,
                "average location",
            )?,
            avg_lat: registry.register(
                "airtrack.common.location.avg_lat",
                ElementType::Int64,
                "run-time average latitude",
            )?,
            avg_lon: registry.register(
                "airtrack.common.location.avg_lon",
                ElementType::Int64,
                "run-time average longitude",
            )?,
            avg_alt: registry.register(
                "airtrack.common.location.avg_alt",
                ElementType::Int64,
                "run-time average altitude",
            )?,
            avg_num: registry.register(
                "airtrack.common.location.avg_num",
                ElementType::Int64,
                "number of run-time average samples",
            )?,
            avg_alt_num: registry.register(
                "airtrack.common.location.avg_alt_num",
                ElementType::Int64,
                "number of run-time average samples (altitude)",
            )?,
        })
    }

    fn attach(
        registry: &mut FieldRegistry,
        store: &mut ElementStore,
        fields: TrackedLocationFields,
        base: ComponentBase,
    ) -> Result<Self> {
        Ok(Self {
            loc_valid: base.reserve(registry, store, fields.loc_valid)?,
            loc_fix: base.reserve(registry, store, fields.loc_fix)?,
            min_loc: base.reserve_component(registry, store, fields.min_loc)?,
            max_loc: base.reserve_component(registry, store, fields.max_loc)?,
            avg_loc: base.reserve_component(registry, store, fields.avg_loc)?,
            avg_lat: base.reserve(registry, store, fields.avg_lat)?,
            avg_lon: base.reserve(registry, store, fields.avg_lon)?,
            avg_alt: base.reserve(registry, store, fields.avg_alt)?,
            avg_num: base.reserve(registry, store, fields.avg_num)?,
            avg_alt_num: base.reserve(registry, store, fields.avg_alt_num)?,
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

    fn setup() -> (FieldRegistry, ElementStore) {
        (FieldRegistry::new(), ElementStore::new())
    }

    #[test]
    fn triplet_set_2d_marks_valid() {
        let (mut reg, mut store) = setup();
        let loc = LocationTriplet::create(&mut reg, &mut store).unwrap();
        assert!(!loc.is_valid(&store).unwrap());
        loc.set_2d(&mut store, 51.5, -0.12).unwrap();
        assert!(loc.is_valid(&store).unwrap());
        assert_eq!(loc.fix(&store).unwrap(), 2);
        assert_eq!(loc.lon(&store).unwrap(), -0.12);
    }

    #[test]
    fn triplet_copy_from() {
        let (mut reg, mut store) = setup();
        let a = LocationTriplet::create(&mut reg, &mut store).unwrap();
        let b = LocationTriplet::create(&mut reg, &mut store).unwrap();
        a.set_full(&mut store, 1.0, 2.0, 3.0, 3).unwrap();
        a.set_speed(&mut store, 40.0).unwrap();
        b.copy_from(&mut store, &a).unwrap();
        assert_eq!(b.alt(&store).unwrap(), 3.0);
        assert_eq!(b.speed(&store).unwrap(), 40.0);
        assert_eq!(b.fix(&store).unwrap(), 3);
    }

    #[test]
    fn tracked_location_nests_triplets() {
        let (mut reg, mut store) = setup();
        let loc = TrackedLocation::create(&mut reg, &mut store).unwrap();
        let min_loc = reg.require("airtrack.common.location.min_loc").unwrap();
        let nested = store.map_get(loc.root(), min_loc).unwrap().unwrap();
        assert_eq!(nested, loc.min_loc().root());
        assert_eq!(store.refcount(nested).unwrap(), 1);
        store.check_invariants().unwrap();
    }

    #[test]
    fn add_loc_tracks_bounds_and_average() {
        let (mut reg, mut store) = setup();
        let loc = TrackedLocation::create(&mut reg, &mut store).unwrap();
        loc.add_loc(&mut store, 10.0, 20.0, 100.0, 3).unwrap();
        loc.add_loc(&mut store, 12.0, 18.0, 0.0, 2).unwrap();

        assert!(loc.is_valid(&store).unwrap());
        assert_eq!(loc.fix(&store).unwrap(), 3);
        assert_eq!(loc.min_loc().lat(&store).unwrap(), 10.0);
        assert_eq!(loc.max_loc().lat(&store).unwrap(), 12.0);
        assert_eq!(loc.min_loc().lon(&store).unwrap(), 18.0);
        assert_eq!(loc.max_loc().lon(&store).unwrap(), 20.0);
        // 2D fix leaves altitude alone
        assert_eq!(loc.min_loc().alt(&store).unwrap(), 100.0);

        assert_eq!(loc.num_samples(&store).unwrap(), 2);
        assert_eq!(loc.num_alt_samples(&store).unwrap(), 1);
        assert_eq!(loc.avg_loc().lat(&store).unwrap(), 11.0);
        assert_eq!(loc.avg_loc().lon(&store).unwrap(), 19.0);
        assert_eq!(loc.avg_loc().alt(&store).unwrap(), 100.0);
    }

    #[test]
    fn add_loc_handles_western_hemisphere() {
        let (mut reg, mut store) = setup();
        let loc = TrackedLocation::create(&mut reg, &mut store).unwrap();
        loc.add_loc(&mut store, 40.0, -74.0, 0.0, 2).unwrap();
        loc.add_loc(&mut store, 42.0, -72.0, 0.0, 2).unwrap();
        assert_eq!(loc.num_samples(&store).unwrap(), 2);
        assert_eq!(loc.avg_loc().lon(&store).unwrap(), -73.0);
        assert_eq!(loc.min_loc().lon(&store).unwrap(), -74.0);
    }

    #[test]
    fn attach_to_existing_location() {
        let (mut reg, mut store) = setup();
        let loc = TrackedLocation::create(&mut reg, &mut store).unwrap();
        loc.add_loc(&mut store, 1.0, 1.0, 1.0, 3).unwrap();
        let before = store.len();
        let again = TrackedLocation::build(&mut reg, &mut store, None, Some(loc.root())).unwrap();
        assert_eq!(store.len(), before);
        assert_eq!(again.avg_loc().lat(&store).unwrap(), 1.0);
    }
}
