//! Areas
//!
//! Regions that override gravity and damping for the bodies inside them and
//! report objects entering or leaving.
//!
//! Monitoring is deferred: pairs bump a signed counter per
//! (object, object shape, area shape) during the step, and
//! `Space::call_queries` turns non-zero counters into [`MonitorEvent`]s
//! afterwards.
//!
//! Author: Moroya Sakamoto

use crate::collision_object::{ObjectKind, Rid};
use crate::math::{Fix128, Transform, Vec3Fix};

use alloc::collections::BTreeMap;

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

/// How an area's value meets the values of lower-priority areas and the space
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SpaceOverrideMode {
    /// No override
    #[default]
    Disabled,
    /// Add to what lower areas produce
    Combine,
    /// Add, then stop looking at lower areas
    CombineReplace,
    /// Discard what came before, then stop
    Replace,
    /// Discard what came before, keep looking at lower areas
    ReplaceCombine,
}

impl SpaceOverrideMode {
    #[inline]
    pub fn is_enabled(self) -> bool {
        self != SpaceOverrideMode::Disabled
    }

    /// Whether processing lower-priority areas stops after this one
    #[inline]
    pub(crate) fn stops(self) -> bool {
        matches!(self, SpaceOverrideMode::CombineReplace | SpaceOverrideMode::Replace)
    }

    #[inline]
    pub(crate) fn replaces(self) -> bool {
        matches!(self, SpaceOverrideMode::Replace | SpaceOverrideMode::ReplaceCombine)
    }
}

/// Entered or exited
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MonitorStatus {
    Entered,
    Exited,
}

/// One notification emitted from `call_queries`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MonitorEvent {
    pub status: MonitorStatus,
    /// Kind of the object that entered or left
    pub kind: ObjectKind,
    pub object: Rid,
    pub instance_id: Option<u64>,
    pub object_shape: usize,
    pub area_shape: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct MonitorKey {
    pub object: Rid,
    pub object_shape: usize,
    pub area_shape: usize,
    pub instance_id: Option<u64>,
    pub kind: ObjectKind,
}

/// Wind emitted by an area, felt by soft bodies
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindField {
    pub magnitude: Fix128,
    pub attenuation: Fix128,
    pub source: Vec3Fix,
    pub direction: Vec3Fix,
}

impl WindField {
    pub fn force_at(&self, position: Vec3Fix) -> Vec3Fix {
        if !self.magnitude.is_positive() {
            return Vec3Fix::ZERO;
        }
        let distance = (position - self.source).length();
        let falloff = Fix128::ONE + self.attenuation * distance;
        self.direction.normalize() * (self.magnitude / falloff)
    }
}

/// Area state
#[derive(Clone, Debug)]
pub struct Area {
    pub gravity_override_mode: SpaceOverrideMode,
    pub linear_damp_override_mode: SpaceOverrideMode,
    pub angular_damp_override_mode: SpaceOverrideMode,

    /// Gravity strength
    pub gravity: Fix128,
    /// Direction, or the attractor point (area space) for point gravity
    pub gravity_vector: Vec3Fix,
    pub gravity_is_point: bool,
    /// Distance at which point gravity equals `gravity` (0 = constant)
    pub gravity_point_unit_distance: Fix128,
    pub linear_damp: Fix128,
    pub angular_damp: Fix128,
    /// Higher priority areas are processed first
    pub priority: i32,

    pub wind_force_magnitude: Fix128,
    pub wind_attenuation_factor: Fix128,
    pub wind_source: Vec3Fix,
    pub wind_direction: Vec3Fix,

    pub(crate) monitorable: bool,
    pub(crate) has_monitor_callback: bool,
    pub(crate) has_area_monitor_callback: bool,

    monitored: BTreeMap<MonitorKey, i32>,
}

impl Default for Area {
    fn default() -> Self {
        Self::new()
    }
}

impl Area {
    pub fn new() -> Self {
        Self {
            gravity_override_mode: SpaceOverrideMode::Disabled,
            linear_damp_override_mode: SpaceOverrideMode::Disabled,
            angular_damp_override_mode: SpaceOverrideMode::Disabled,
            gravity: Fix128::from_ratio(98, 10),
            gravity_vector: Vec3Fix::new(Fix128::ZERO, Fix128::NEG_ONE, Fix128::ZERO),
            gravity_is_point: false,
            gravity_point_unit_distance: Fix128::ZERO,
            linear_damp: Fix128::from_ratio(1, 10),
            angular_damp: Fix128::from_ratio(1, 10),
            priority: 0,
            wind_force_magnitude: Fix128::ZERO,
            wind_attenuation_factor: Fix128::ZERO,
            wind_source: Vec3Fix::ZERO,
            wind_direction: Vec3Fix::ZERO,
            monitorable: false,
            has_monitor_callback: false,
            has_area_monitor_callback: false,
            monitored: BTreeMap::new(),
        }
    }

    #[inline]
    pub fn is_monitorable(&self) -> bool {
        self.monitorable
    }

    #[inline]
    pub fn has_monitor_callback(&self) -> bool {
        self.has_monitor_callback
    }

    #[inline]
    pub fn has_area_monitor_callback(&self) -> bool {
        self.has_area_monitor_callback
    }

    /// Any parameter overrides the space
    pub fn has_space_override(&self) -> bool {
        self.gravity_override_mode.is_enabled()
            || self.linear_damp_override_mode.is_enabled()
            || self.angular_damp_override_mode.is_enabled()
    }

    /// Gravity this area applies at a world position
    pub fn compute_gravity(&self, area_transform: &Transform, position: Vec3Fix) -> Vec3Fix {
        if !self.gravity_is_point {
            return self.gravity_vector * self.gravity;
        }
        let v = area_transform.xform(self.gravity_vector) - position;
        if self.gravity_point_unit_distance.is_positive() {
            let d2 = v.length_squared();
            if d2.is_zero() {
                return Vec3Fix::ZERO;
            }
            let unit = self.gravity_point_unit_distance;
            v.normalize() * (self.gravity * unit * unit / d2)
        } else {
            v.normalize() * self.gravity
        }
    }

    /// Wind force on a point, fading with distance from the source
    pub fn wind_force(&self, position: Vec3Fix) -> Vec3Fix {
        self.wind_field().force_at(position)
    }

    /// Copy of the wind settings, usable while the area itself is borrowed elsewhere
    pub fn wind_field(&self) -> WindField {
        WindField {
            magnitude: self.wind_force_magnitude,
            attenuation: self.wind_attenuation_factor,
            source: self.wind_source,
            direction: self.wind_direction,
        }
    }

    // ------------------------------------------------------------------
    // Monitoring
    // ------------------------------------------------------------------

    pub(crate) fn add_to_query(&mut self, key: MonitorKey) {
        *self.monitored.entry(key).or_insert(0) += 1;
    }

    pub(crate) fn remove_from_query(&mut self, key: MonitorKey) {
        *self.monitored.entry(key).or_insert(0) -= 1;
    }

    pub(crate) fn has_pending_queries(&self) -> bool {
        !self.monitored.is_empty()
    }

    /// Turn counters into events and clear them
    ///
    /// Body and soft-body entries go to the body monitor, area entries to
    /// the area monitor. Entries without a listener are dropped.
    pub(crate) fn drain_queries(&mut self) -> (Vec<MonitorEvent>, Vec<MonitorEvent>) {
        let mut objects = Vec::new();
        let mut areas = Vec::new();
        for (key, count) in core::mem::take(&mut self.monitored) {
            if count == 0 {
                continue;
            }
            let event = MonitorEvent {
                status: if count > 0 {
                    MonitorStatus::Entered
                } else {
                    MonitorStatus::Exited
                },
                kind: key.kind,
                object: key.object,
                instance_id: key.instance_id,
                object_shape: key.object_shape,
                area_shape: key.area_shape,
            };
            if key.kind == ObjectKind::Area {
                if self.has_area_monitor_callback {
                    areas.push(event);
                }
            } else if self.has_monitor_callback {
                objects.push(event);
            }
        }
        (objects, areas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn key(rid: Rid, kind: ObjectKind) -> MonitorKey {
        MonitorKey {
            object: rid,
            object_shape: 0,
            area_shape: 0,
            instance_id: Some(7),
            kind,
        }
    }

    #[test]
    fn test_counters_cancel() {
        let mut ids: SlotMap<Rid, ()> = SlotMap::with_key();
        let rid = ids.insert(());
        let mut area = Area::new();
        area.has_monitor_callback = true;
        area.add_to_query(key(rid, ObjectKind::Body));
        area.remove_from_query(key(rid, ObjectKind::Body));
        let (objects, areas) = area.drain_queries();
        assert!(objects.is_empty() && areas.is_empty());
        assert!(!area.has_pending_queries());
    }

    #[test]
    fn test_enter_and_exit_events() {
        let mut ids: SlotMap<Rid, ()> = SlotMap::with_key();
        let (a, b) = (ids.insert(()), ids.insert(()));
        let mut area = Area::new();
        area.has_monitor_callback = true;
        area.add_to_query(key(a, ObjectKind::Body));
        area.remove_from_query(key(b, ObjectKind::Body));
        area.add_to_query(key(b, ObjectKind::Area));
        let (objects, areas) = area.drain_queries();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].status, MonitorStatus::Entered);
        assert_eq!(objects[1].status, MonitorStatus::Exited);
        // No area monitor registered
        assert!(areas.is_empty());
    }

    #[test]
    fn test_directional_gravity() {
        let mut area = Area::new();
        area.gravity = Fix128::from_int(2);
        area.gravity_vector = Vec3Fix::UNIT_X;
        let g = area.compute_gravity(&Transform::IDENTITY, Vec3Fix::from_int(5, 5, 5));
        assert_eq!(g, Vec3Fix::from_int(2, 0, 0));
    }

    #[test]
    fn test_point_gravity_inverse_square() {
        let mut area = Area::new();
        area.gravity = Fix128::from_int(8);
        area.gravity_vector = Vec3Fix::ZERO;
        area.gravity_is_point = true;
        area.gravity_point_unit_distance = Fix128::ONE;
        let xf = Transform::from_origin(Vec3Fix::from_int(0, 0, 0));
        let g = area.compute_gravity(&xf, Vec3Fix::from_int(2, 0, 0));
        // Pulls toward the center, 8 / 2^2
        assert!((g.x.to_f64() + 2.0).abs() < 1e-9);
        assert!(area.compute_gravity(&xf, Vec3Fix::ZERO).is_zero());
    }

    #[test]
    fn test_wind_fades_with_distance() {
        let mut area = Area::new();
        assert!(area.wind_force(Vec3Fix::ZERO).is_zero());
        area.wind_force_magnitude = Fix128::from_int(4);
        area.wind_attenuation_factor = Fix128::ONE;
        area.wind_direction = Vec3Fix::from_int(2, 0, 0);
        assert_eq!(area.wind_force(Vec3Fix::ZERO), Vec3Fix::from_int(4, 0, 0));
        assert_eq!(area.wind_force(Vec3Fix::from_int(0, 3, 0)), Vec3Fix::from_int(1, 0, 0));
    }

    #[test]
    fn test_override_mode_flags() {
        assert!(SpaceOverrideMode::Replace.stops() && SpaceOverrideMode::Replace.replaces());
        assert!(SpaceOverrideMode::CombineReplace.stops());
        assert!(!SpaceOverrideMode::ReplaceCombine.stops());
        assert!(!SpaceOverrideMode::Combine.replaces());
        assert!(!Area::new().has_space_override());
    }
}
