//! Area Pairs
//!
//! Overlap trackers between an area and a body, another area, or a soft
//! body. They never apply impulses: `setup` detects a change of the overlap
//! state, `pre_solve` forwards it to the area's monitor counters and to the
//! body's override list.
//!
//! The override registration is remembered when the overlap starts so the
//! matching removal happens on exit even if the area's override modes were
//! edited in between.

use crate::area::{Area, MonitorKey};
use crate::collision_object::{ObjectArena, ObjectKind, Rid};
use crate::collision_solver::CollisionSolver;
use crate::constraint::{ConstraintBase, StepEvents};
use crate::math::Fix128;

fn monitor_key(objects: &ObjectArena, object: Rid, object_shape: usize, area_shape: usize) -> MonitorKey {
    let (instance_id, kind) = objects
        .get(object)
        .map_or((None, ObjectKind::Body), |o| (o.instance_id, o.kind()));
    MonitorKey {
        object,
        object_shape,
        area_shape,
        instance_id,
        kind,
    }
}

fn shapes_overlap(objects: &ObjectArena, a: Rid, shape_a: usize, b: Rid, shape_b: usize) -> bool {
    let (Some(oa), Some(ob)) = (objects.get(a), objects.get(b)) else {
        return false;
    };
    let (Ok(sa), Ok(sb)) = (oa.shape(shape_a), ob.shape(shape_b)) else {
        return false;
    };
    CollisionSolver::solve_static(
        &sa.shape,
        &oa.shape_transform(shape_a),
        &sb.shape,
        &ob.shape_transform(shape_b),
        None,
        None,
        Fix128::ZERO,
        Fix128::ZERO,
    )
}

fn area_of(objects: &ObjectArena, rid: Rid) -> Option<&Area> {
    objects.get(rid).and_then(|o| o.as_area())
}

// ============================================================================
// Body x Area
// ============================================================================

/// Body overlapping an area; objects are `[body, area]`
#[derive(Clone, Debug)]
pub struct AreaPair {
    pub(crate) base: ConstraintBase,
    body_shape: usize,
    area_shape: usize,
    colliding: bool,
    process_collision: bool,
    /// Override registered on the body while colliding
    has_space_override: bool,
    /// Monitor notified on entry
    monitored: bool,
}

impl AreaPair {
    pub(crate) fn new(body: Rid, body_shape: usize, area: Rid, area_shape: usize) -> Self {
        Self {
            base: ConstraintBase::new(body, area),
            body_shape,
            area_shape,
            colliding: false,
            process_collision: false,
            has_space_override: false,
            monitored: false,
        }
    }

    #[inline]
    pub fn is_colliding(&self) -> bool {
        self.colliding
    }

    pub(crate) fn setup(&mut self, objects: &ObjectArena) -> bool {
        let [body, area] = *self.base.objects();
        let result = match (objects.get(body), objects.get(area)) {
            (Some(b), Some(a)) => {
                a.collides_with(b) && shapes_overlap(objects, body, self.body_shape, area, self.area_shape)
            }
            _ => false,
        };

        self.process_collision = false;
        if result != self.colliding {
            if let Some(a) = area_of(objects, area) {
                if result {
                    self.has_space_override = a.has_space_override();
                    self.monitored = a.has_monitor_callback();
                }
                self.process_collision = self.has_space_override || self.monitored;
            }
            self.colliding = result;
        }
        self.process_collision
    }

    pub(crate) fn pre_solve(&mut self, objects: &mut ObjectArena, events: &mut StepEvents) -> bool {
        if !self.process_collision {
            return false;
        }
        let [body, area] = *self.base.objects();
        let priority = area_of(objects, area).map_or(0, |a| a.priority);
        if self.has_space_override {
            if let Some(b) = objects.get_mut(body).and_then(|o| o.as_body_mut()) {
                if self.colliding {
                    b.add_area(area, priority);
                } else {
                    b.remove_area(area);
                }
            }
        }
        if self.monitored {
            self.notify(objects, events, self.colliding);
        }
        if !self.colliding {
            self.has_space_override = false;
            self.monitored = false;
        }
        false
    }

    fn notify(&self, objects: &mut ObjectArena, events: &mut StepEvents, entered: bool) {
        let [body, area] = *self.base.objects();
        let key = monitor_key(objects, body, self.body_shape, self.area_shape);
        if let Some(a) = objects.get_mut(area).and_then(|o| o.as_area_mut()) {
            if entered {
                a.add_to_query(key);
            } else {
                a.remove_from_query(key);
            }
            events.monitor_queries.insert(area);
        }
    }

    pub(crate) fn on_remove(&mut self, objects: &mut ObjectArena, events: &mut StepEvents) {
        if !self.colliding {
            return;
        }
        let [body, area] = *self.base.objects();
        if self.has_space_override {
            if let Some(b) = objects.get_mut(body).and_then(|o| o.as_body_mut()) {
                b.remove_area(area);
            }
        }
        if self.monitored {
            self.notify(objects, events, false);
        }
        self.colliding = false;
    }
}

// ============================================================================
// Area x Area
// ============================================================================

/// Two overlapping areas; each side reports the other to its area monitor
#[derive(Clone, Debug)]
pub struct Area2Pair {
    pub(crate) base: ConstraintBase,
    shape_a: usize,
    shape_b: usize,
    colliding_a: bool,
    colliding_b: bool,
    process_collision_a: bool,
    process_collision_b: bool,
    area_a_monitorable: bool,
    area_b_monitorable: bool,
}

impl Area2Pair {
    pub(crate) fn new(objects: &ObjectArena, a: Rid, shape_a: usize, b: Rid, shape_b: usize) -> Self {
        let monitorable = |rid| area_of(objects, rid).map_or(false, |a| a.is_monitorable());
        Self {
            base: ConstraintBase::new(a, b),
            shape_a,
            shape_b,
            colliding_a: false,
            colliding_b: false,
            process_collision_a: false,
            process_collision_b: false,
            area_a_monitorable: monitorable(a),
            area_b_monitorable: monitorable(b),
        }
    }

    pub(crate) fn setup(&mut self, objects: &ObjectArena) -> bool {
        let [a, b] = *self.base.objects();
        let (Some(oa), Some(ob)) = (objects.get(a), objects.get(b)) else {
            return false;
        };
        let mut result_a = oa.collides_with(ob);
        let mut result_b = ob.collides_with(oa);
        if (result_a || result_b) && !shapes_overlap(objects, a, self.shape_a, b, self.shape_b) {
            result_a = false;
            result_b = false;
        }

        let listens = |rid| area_of(objects, rid).map_or(false, |x| x.has_area_monitor_callback());

        self.process_collision_a = false;
        if result_a != self.colliding_a {
            self.process_collision_a = listens(a) && self.area_b_monitorable;
            self.colliding_a = result_a;
        }
        self.process_collision_b = false;
        if result_b != self.colliding_b {
            self.process_collision_b = listens(b) && self.area_a_monitorable;
            self.colliding_b = result_b;
        }
        self.process_collision_a || self.process_collision_b
    }

    pub(crate) fn pre_solve(&mut self, objects: &mut ObjectArena, events: &mut StepEvents) -> bool {
        let [a, b] = *self.base.objects();
        if self.process_collision_a {
            Self::notify(objects, events, a, self.shape_a, b, self.shape_b, self.colliding_a);
        }
        if self.process_collision_b {
            Self::notify(objects, events, b, self.shape_b, a, self.shape_a, self.colliding_b);
        }
        false
    }

    /// Tell `listener` that `other` entered or left
    fn notify(
        objects: &mut ObjectArena,
        events: &mut StepEvents,
        listener: Rid,
        listener_shape: usize,
        other: Rid,
        other_shape: usize,
        entered: bool,
    ) {
        let key = monitor_key(objects, other, other_shape, listener_shape);
        if let Some(area) = objects.get_mut(listener).and_then(|o| o.as_area_mut()) {
            if entered {
                area.add_to_query(key);
            } else {
                area.remove_from_query(key);
            }
            events.monitor_queries.insert(listener);
        }
    }

    pub(crate) fn on_remove(&mut self, objects: &mut ObjectArena, events: &mut StepEvents) {
        let [a, b] = *self.base.objects();
        let listens = |objects: &ObjectArena, rid| {
            area_of(objects, rid).map_or(false, |x| x.has_area_monitor_callback())
        };
        if self.colliding_a && self.area_b_monitorable && listens(objects, a) {
            Self::notify(objects, events, a, self.shape_a, b, self.shape_b, false);
        }
        if self.colliding_b && self.area_a_monitorable && listens(objects, b) {
            Self::notify(objects, events, b, self.shape_b, a, self.shape_a, false);
        }
        self.colliding_a = false;
        self.colliding_b = false;
    }
}

// ============================================================================
// Soft body x Area
// ============================================================================

/// Soft body overlapping an area; objects are `[soft_body, area]`
///
/// The soft body counts as inside once any of its nodes lies inside the
/// area shape.
#[derive(Clone, Debug)]
pub struct AreaSoftBodyPair {
    pub(crate) base: ConstraintBase,
    area_shape: usize,
    colliding: bool,
    process_collision: bool,
    has_space_override: bool,
    monitored: bool,
}

impl AreaSoftBodyPair {
    pub(crate) fn new(soft_body: Rid, area: Rid, area_shape: usize) -> Self {
        Self {
            base: ConstraintBase::new(soft_body, area),
            area_shape,
            colliding: false,
            process_collision: false,
            has_space_override: false,
            monitored: false,
        }
    }

    #[inline]
    pub fn is_colliding(&self) -> bool {
        self.colliding
    }

    fn nodes_inside(&self, objects: &ObjectArena) -> bool {
        let [soft, area] = *self.base.objects();
        let (Some(os), Some(oa)) = (objects.get(soft), objects.get(area)) else {
            return false;
        };
        let (Some(sb), Ok(inst)) = (os.as_soft_body(), oa.shape(self.area_shape)) else {
            return false;
        };
        if !oa.collides_with(os) {
            return false;
        }
        let xf = oa.shape_transform(self.area_shape);
        if !inst.shape.aabb(&xf).intersects(&sb.aabb()) {
            return false;
        }
        sb.nodes()
            .iter()
            .any(|n| inst.shape.intersect_point(xf.xform_inv(n.position)))
    }

    pub(crate) fn setup(&mut self, objects: &ObjectArena) -> bool {
        let result = self.nodes_inside(objects);
        self.process_collision = false;
        if result != self.colliding {
            if let Some(a) = area_of(objects, self.base.objects()[1]) {
                if result {
                    self.has_space_override = a.has_space_override();
                    self.monitored = a.has_monitor_callback();
                }
                self.process_collision = self.has_space_override || self.monitored;
            }
            self.colliding = result;
        }
        self.process_collision
    }

    pub(crate) fn pre_solve(&mut self, objects: &mut ObjectArena, events: &mut StepEvents) -> bool {
        if !self.process_collision {
            return false;
        }
        self.apply(objects, events, self.colliding);
        if !self.colliding {
            self.has_space_override = false;
            self.monitored = false;
        }
        false
    }

    fn apply(&self, objects: &mut ObjectArena, events: &mut StepEvents, entered: bool) {
        let [soft, area] = *self.base.objects();
        let priority = area_of(objects, area).map_or(0, |a| a.priority);
        if self.has_space_override {
            if let Some(sb) = objects.get_mut(soft).and_then(|o| o.as_soft_body_mut()) {
                if entered {
                    sb.add_area(area, priority);
                } else {
                    sb.remove_area(area);
                }
            }
        }
        if self.monitored {
            let key = monitor_key(objects, soft, 0, self.area_shape);
            if let Some(a) = objects.get_mut(area).and_then(|o| o.as_area_mut()) {
                if entered {
                    a.add_to_query(key);
                } else {
                    a.remove_from_query(key);
                }
                events.monitor_queries.insert(area);
            }
        }
    }

    pub(crate) fn on_remove(&mut self, objects: &mut ObjectArena, events: &mut StepEvents) {
        if self.colliding {
            self.apply(objects, events, false);
            self.colliding = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::area::{MonitorStatus, SpaceOverrideMode};
    use crate::body::{Body, BodyMode};
    use crate::collision_object::{CollisionObject, ObjectData};
    use crate::math::{Transform, Vec3Fix};
    use crate::shape::Shape;
    use crate::soft_body::SoftBody;
    use alloc::sync::Arc;

    fn arena_with_body_and_area(body_at: Vec3Fix) -> (ObjectArena, Rid, Rid) {
        let mut objects = ObjectArena::with_key();
        let mut body = CollisionObject::new(ObjectData::Body(Body::new(BodyMode::Dynamic)));
        body.add_shape(Arc::new(Shape::sphere(Fix128::HALF)), Transform::IDENTITY, false);
        body.set_transform(Transform::from_origin(body_at)).unwrap();
        let mut area = Area::new();
        area.has_monitor_callback = true;
        area.gravity_override_mode = SpaceOverrideMode::Replace;
        let mut area_obj = CollisionObject::new(ObjectData::Area(area));
        area_obj.add_shape(
            Arc::new(Shape::cuboid(Vec3Fix::from_int(2, 2, 2))),
            Transform::IDENTITY,
            false,
        );
        let b = objects.insert(body);
        let a = objects.insert(area_obj);
        (objects, b, a)
    }

    #[test]
    fn test_area_pair_enter_and_exit() {
        let (mut objects, b, a) = arena_with_body_and_area(Vec3Fix::ZERO);
        let mut events = StepEvents::default();
        let mut pair = AreaPair::new(b, 0, a, 0);

        assert!(pair.setup(&objects));
        assert!(!pair.pre_solve(&mut objects, &mut events));
        assert!(events.monitor_queries.contains(&a));
        assert_eq!(objects[b].as_body().unwrap().areas.len(), 1);

        // Steady overlap does nothing
        assert!(!pair.setup(&objects));

        objects[b]
            .set_transform(Transform::from_origin(Vec3Fix::from_int(10, 0, 0)))
            .unwrap();
        assert!(pair.setup(&objects));
        pair.pre_solve(&mut objects, &mut events);
        assert!(objects[b].as_body().unwrap().areas.is_empty());

        // Entered then exited in the same flush cancels out
        let (events_obj, _) = objects[a].as_area_mut().unwrap().drain_queries();
        assert!(events_obj.is_empty());
    }

    #[test]
    fn test_area_pair_exit_uses_entry_override() {
        let (mut objects, b, a) = arena_with_body_and_area(Vec3Fix::ZERO);
        let mut events = StepEvents::default();
        let mut pair = AreaPair::new(b, 0, a, 0);
        pair.setup(&objects);
        pair.pre_solve(&mut objects, &mut events);
        objects[a].as_area_mut().unwrap().drain_queries();

        // Override switched off while the body is inside
        objects[a].as_area_mut().unwrap().gravity_override_mode = SpaceOverrideMode::Disabled;
        pair.on_remove(&mut objects, &mut events);
        assert!(objects[b].as_body().unwrap().areas.is_empty());
        let (evs, _) = objects[a].as_area_mut().unwrap().drain_queries();
        assert_eq!(evs.len(), 1);
        assert_eq!(evs[0].status, MonitorStatus::Exited);
    }

    #[test]
    fn test_area_pair_respects_mask() {
        let (mut objects, b, a) = arena_with_body_and_area(Vec3Fix::ZERO);
        objects[a].collision_mask = 0;
        let mut pair = AreaPair::new(b, 0, a, 0);
        assert!(!pair.setup(&objects));
        assert!(!pair.is_colliding());
    }

    #[test]
    fn test_area2_pair_needs_monitorable_partner() {
        let mut objects = ObjectArena::with_key();
        let make = |monitorable: bool, listens: bool| {
            let mut area = Area::new();
            area.monitorable = monitorable;
            area.has_area_monitor_callback = listens;
            let mut o = CollisionObject::new(ObjectData::Area(area));
            o.add_shape(Arc::new(Shape::sphere(Fix128::ONE)), Transform::IDENTITY, false);
            o
        };
        let a = objects.insert(make(false, true));
        let b = objects.insert(make(true, false));
        let mut events = StepEvents::default();
        let mut pair = Area2Pair::new(&objects, a, 0, b, 0);
        assert!(pair.setup(&objects));
        pair.pre_solve(&mut objects, &mut events);
        let (_, areas) = objects[a].as_area_mut().unwrap().drain_queries();
        assert_eq!(areas.len(), 1);
        assert_eq!(areas[0].object, b);
        // B listens to nobody and A is not monitorable
        assert!(!objects[b].as_area().unwrap().has_pending_queries());
    }

    #[test]
    fn test_soft_body_node_inside_area() {
        let mut objects = ObjectArena::with_key();
        let mut sb = SoftBody::new();
        sb.set_points(&[Vec3Fix::from_int(5, 0, 0), Vec3Fix::from_int(1, 0, 0)]);
        let soft = objects.insert(CollisionObject::new(ObjectData::SoftBody(sb)));
        let mut area = Area::new();
        area.has_monitor_callback = true;
        let mut ao = CollisionObject::new(ObjectData::Area(area));
        ao.add_shape(Arc::new(Shape::sphere(Fix128::from_int(2))), Transform::IDENTITY, false);
        let a = objects.insert(ao);

        let mut events = StepEvents::default();
        let mut pair = AreaSoftBodyPair::new(soft, a, 0);
        assert!(pair.setup(&objects));
        pair.pre_solve(&mut objects, &mut events);
        let (evs, _) = objects[a].as_area_mut().unwrap().drain_queries();
        assert_eq!(evs.len(), 1);
        assert_eq!(evs[0].kind, ObjectKind::SoftBody);
        assert_eq!(evs[0].status, MonitorStatus::Entered);
    }
}
