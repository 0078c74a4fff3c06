//! Physics Space
//!
//! Owns every object, constraint and broad-phase leaf of one simulated
//! world and drives the step.
//!
//! # Usage
//!
//! ```ignore
//! let mut space = Space::new()?;
//! let ground = space.add_body(Body::new(BodyMode::Static), Transform::IDENTITY)?;
//! space.add_shape(ground, Arc::new(Shape::cuboid(half)), Transform::IDENTITY, false)?;
//! loop {
//!     space.step(Fix128::from_ratio(1, 60))?;
//!     space.call_queries();
//! }
//! ```
//!
//! Structural edits (objects, shapes, joints) are refused with
//! [`PhysicsError::SpaceLocked`] while a step or a query flush is running.
//! Monitor and state-sync callbacks never run inside `step`; they are
//! flushed by [`Space::call_queries`].
//!
//! Author: Moroya Sakamoto

use crate::area::{Area, MonitorEvent};
use crate::area_pair::{Area2Pair, AreaPair, AreaSoftBodyPair};
use crate::body::{Body, BodyMode};
use crate::body_pair::BodyPair;
use crate::body_state::BodyState;
use crate::broad_phase::{BroadPhase, BroadPhaseFactory, BroadPhaseId, BvhBroadPhase, LeafOwner};
use crate::collision_object::{CollisionObject, ObjectArena, ObjectData, ObjectKind, Rid};
use crate::config::{SpaceConfig, SpaceParameter};
use crate::constraint::{Constraint, ConstraintKey, StepEvents};
use crate::error::{PhysicsError, PhysicsResult};
use crate::joint::Joint;
use crate::math::{Fix128, Transform, Vec3Fix};
use crate::shape::Shape;
use crate::soft_body::SoftBody;
use crate::space_state::{MotionResult, SpaceState};
use crate::step::{Step, StepTimings};

use alloc::boxed::Box;
use alloc::collections::{BTreeMap, BTreeSet};
use alloc::sync::Arc;
use slotmap::SlotMap;

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

/// Receives monitor notifications from [`Space::call_queries`]
pub type MonitorCallback = Box<dyn FnMut(MonitorEvent) + Send>;

/// Receives the new state of a body that moved during the last step
pub type StateSyncCallback = Box<dyn FnMut(&BodySync) + Send>;

/// Body state handed to a [`StateSyncCallback`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BodySync {
    pub body: Rid,
    pub instance_id: Option<u64>,
    pub transform: Transform,
    pub linear_velocity: Vec3Fix,
    pub angular_velocity: Vec3Fix,
    pub sleeping: bool,
}

/// Simulation state shared by the step and the broad-phase callbacks
pub struct World {
    pub(crate) objects: ObjectArena,
    pub(crate) constraints: SlotMap<ConstraintKey, Constraint>,
    pub(crate) config: SpaceConfig,
    pub(crate) active_bodies: BTreeSet<Rid>,
    pub(crate) active_soft_bodies: BTreeSet<Rid>,
    pub(crate) moved_areas: BTreeSet<Rid>,
    /// Bodies whose state changed since the last `call_queries`
    pub(crate) state_queries: BTreeSet<Rid>,
    pub(crate) mass_updates: BTreeSet<Rid>,
    pub(crate) events: StepEvents,
    pub(crate) collision_pairs: usize,
    pub(crate) step_counter: u64,
}

impl World {
    pub(crate) fn new(config: SpaceConfig) -> Self {
        Self {
            objects: ObjectArena::with_key(),
            constraints: SlotMap::with_key(),
            config,
            active_bodies: BTreeSet::new(),
            active_soft_bodies: BTreeSet::new(),
            moved_areas: BTreeSet::new(),
            state_queries: BTreeSet::new(),
            mass_updates: BTreeSet::new(),
            events: StepEvents::default(),
            collision_pairs: 0,
            step_counter: 0,
        }
    }

    /// Store a constraint and register it with both participants
    pub(crate) fn insert_constraint(&mut self, constraint: Constraint) -> ConstraintKey {
        let [a, b] = *constraint.objects();
        let key = self.constraints.insert(constraint);
        for (slot, rid) in [a, b].into_iter().enumerate() {
            if let Some(object) = self.objects.get_mut(rid) {
                object.constraints.insert(key, slot);
            }
        }
        key
    }

    /// Undo a constraint's effects, deregister and drop it
    pub(crate) fn remove_constraint(&mut self, key: ConstraintKey) -> Option<Constraint> {
        let mut constraint = self.constraints.remove(key)?;
        constraint.on_remove(&mut self.objects, &mut self.events);
        for rid in constraint.objects() {
            if let Some(object) = self.objects.get_mut(*rid) {
                object.constraints.remove(&key);
            }
        }
        Some(constraint)
    }

    pub(crate) fn set_body_active(&mut self, rid: Rid, active: bool) {
        let Some(body) = self.objects.get_mut(rid).and_then(|o| o.as_body_mut()) else {
            return;
        };
        if active && body.mode() == BodyMode::Static {
            return;
        }
        body.active = active;
        if active {
            body.reset_still_time();
            self.active_bodies.insert(rid);
        } else {
            self.active_bodies.remove(&rid);
        }
    }

    /// Wake every dynamic body sharing a constraint with `rid`
    pub(crate) fn wake_neighbours(&mut self, rid: Rid) {
        let Some(object) = self.objects.get(rid) else {
            return;
        };
        let others: Vec<Rid> = object
            .constraints
            .iter()
            .filter_map(|(key, slot)| self.constraints.get(*key).map(|c| c.objects()[1 - (*slot).min(1)]))
            .collect();
        for other in others {
            let dynamic = self
                .objects
                .get(other)
                .and_then(|o| o.as_body())
                .map_or(false, |b| b.mode().is_dynamic());
            if dynamic {
                self.set_body_active(other, true);
            }
        }
    }
}

// ============================================================================
// Broad-phase callbacks
// ============================================================================

fn pair_objects(world: &mut World, a: LeafOwner, b: LeafOwner) -> Option<ConstraintKey> {
    let (oa, ob) = (world.objects.get(a.object)?, world.objects.get(b.object)?);
    if !oa.interacts_with(ob) {
        return None;
    }
    let (a, b, kind_a, kind_b) = if oa.kind() <= ob.kind() {
        (a, b, oa.kind(), ob.kind())
    } else {
        (b, a, ob.kind(), oa.kind())
    };

    let constraint = match (kind_a, kind_b) {
        (ObjectKind::Area, ObjectKind::Area) => Constraint::Area2Pair(Area2Pair::new(
            &world.objects,
            b.object,
            b.subindex,
            a.object,
            a.subindex,
        )),
        (ObjectKind::Area, ObjectKind::SoftBody) => {
            Constraint::AreaSoftBodyPair(AreaSoftBodyPair::new(b.object, a.object, a.subindex))
        }
        (ObjectKind::Area, ObjectKind::Body) => {
            let kinematic = world
                .objects
                .get(b.object)
                .map_or(false, |o| o.body_mode() == BodyMode::Kinematic);
            if kinematic {
                world.set_body_active(b.object, true);
            }
            Constraint::AreaPair(AreaPair::new(b.object, b.subindex, a.object, a.subindex))
        }
        (ObjectKind::Body, ObjectKind::Body) => {
            Constraint::BodyPair(BodyPair::new(a.object, a.subindex, b.object, b.subindex))
        }
        // Soft bodies only meet areas
        _ => return None,
    };

    world.collision_pairs += 1;
    let key = world.insert_constraint(constraint);
    log::debug!("pair {:?} created between {:?} and {:?}", key, a.object, b.object);
    Some(key)
}

fn unpair_objects(world: &mut World, _a: LeafOwner, _b: LeafOwner, data: Option<ConstraintKey>) {
    let Some(key) = data else {
        return;
    };
    if world.remove_constraint(key).is_some() {
        world.collision_pairs = world.collision_pairs.saturating_sub(1);
        log::debug!("pair {:?} removed", key);
    }
}

// ============================================================================
// Leaf maintenance
// ============================================================================

/// Refresh cached AABBs and move existing leaves
pub(crate) fn move_leaves(broad_phase: &mut dyn BroadPhase<World>, object: &mut CollisionObject) {
    let xf = *object.transform();
    for inst in object.shapes.iter_mut() {
        if !inst.bpid.is_valid() {
            continue;
        }
        let aabb = inst.shape.aabb(&xf.mul(&inst.xform));
        inst.aabb_cache = aabb;
        broad_phase.move_aabb(inst.bpid, aabb);
    }
}

/// Create, move or drop leaves so they match the enabled shapes
fn sync_leaves(broad_phase: &mut dyn BroadPhase<World>, world: &mut World, rid: Rid) {
    let Some(object) = world.objects.get_mut(rid) else {
        return;
    };
    let xf = *object.transform();
    let is_static = object.is_static();

    if let Some(soft) = object.as_soft_body_mut() {
        let aabb = soft.aabb();
        if soft.bpid.is_valid() {
            broad_phase.move_aabb(soft.bpid, aabb);
        } else {
            soft.bpid = broad_phase.create(rid, 0, aabb, false);
        }
        return;
    }

    let mut stale = Vec::new();
    for (i, inst) in object.shapes.iter_mut().enumerate() {
        if inst.disabled {
            if inst.bpid.is_valid() {
                stale.push(core::mem::replace(&mut inst.bpid, BroadPhaseId::INVALID));
            }
            continue;
        }
        let aabb = inst.shape.aabb(&xf.mul(&inst.xform));
        inst.aabb_cache = aabb;
        if inst.bpid.is_valid() {
            broad_phase.move_aabb(inst.bpid, aabb);
        } else {
            inst.bpid = broad_phase.create(rid, i, aabb, is_static);
        }
    }
    for id in stale {
        broad_phase.remove(id, world);
    }
}

/// Drop the leaves of shapes `from..`; `from == 0` also drops a soft body's leaf
fn remove_leaves(broad_phase: &mut dyn BroadPhase<World>, world: &mut World, rid: Rid, from: usize) {
    let Some(object) = world.objects.get_mut(rid) else {
        return;
    };
    let mut ids: Vec<BroadPhaseId> = object
        .shapes
        .iter_mut()
        .skip(from)
        .filter(|s| s.bpid.is_valid())
        .map(|s| core::mem::replace(&mut s.bpid, BroadPhaseId::INVALID))
        .collect();
    if from == 0 {
        if let Some(soft) = object.as_soft_body_mut() {
            if soft.bpid.is_valid() {
                ids.push(core::mem::replace(&mut soft.bpid, BroadPhaseId::INVALID));
            }
        }
    }
    for id in ids {
        broad_phase.remove(id, world);
    }
}

fn set_leaves_static(broad_phase: &mut dyn BroadPhase<World>, object: &CollisionObject) {
    let is_static = object.is_static();
    for inst in object.shapes.iter().filter(|s| s.bpid.is_valid()) {
        broad_phase.set_static(inst.bpid, is_static);
    }
}

// ============================================================================
// Space
// ============================================================================

/// One simulated world
pub struct Space {
    world: World,
    broad_phase: Box<dyn BroadPhase<World>>,
    step: Step,
    locked: bool,
    monitor_callbacks: BTreeMap<Rid, MonitorCallback>,
    area_monitor_callbacks: BTreeMap<Rid, MonitorCallback>,
    state_sync_callbacks: BTreeMap<Rid, StateSyncCallback>,
}

fn invalid_object(rid: Rid) -> PhysicsError {
    log::error!("object {:?} is not in this space", rid);
    PhysicsError::InvalidObject
}

impl Space {
    /// Space with default settings and the BVH broad phase
    pub fn new() -> PhysicsResult<Self> {
        Self::with_config(SpaceConfig::default())
    }

    pub fn with_config(config: SpaceConfig) -> PhysicsResult<Self> {
        Self::with_broad_phase(config, BvhBroadPhase::<World>::create_boxed)
    }

    /// Space using the broad-phase strategy built by `factory`
    pub fn with_broad_phase(config: SpaceConfig, factory: BroadPhaseFactory<World>) -> PhysicsResult<Self> {
        let step = Step::new(config.worker_threads)?;
        let mut broad_phase = factory();
        broad_phase.set_pair_callback(pair_objects);
        broad_phase.set_unpair_callback(unpair_objects);
        Ok(Self {
            world: World::new(config),
            broad_phase,
            step,
            locked: false,
            monitor_callbacks: BTreeMap::new(),
            area_monitor_callbacks: BTreeMap::new(),
            state_sync_callbacks: BTreeMap::new(),
        })
    }

    // ------------------------------------------------------------------
    // Configuration and counters
    // ------------------------------------------------------------------

    #[inline]
    pub fn config(&self) -> &SpaceConfig {
        &self.world.config
    }

    pub fn param(&self, param: SpaceParameter) -> Fix128 {
        self.world.config.param(param)
    }

    pub fn set_param(&mut self, param: SpaceParameter, value: Fix128) {
        self.world.config.set_param(param, value);
    }

    pub fn set_default_gravity(&mut self, gravity: Vec3Fix) {
        self.world.config.default_gravity = gravity;
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Awake bodies and soft bodies
    pub fn active_objects(&self) -> usize {
        self.world.active_bodies.len() + self.world.active_soft_bodies.len()
    }

    /// Body islands solved in the last step
    pub fn island_count(&self) -> usize {
        self.step.island_count()
    }

    /// Live pair constraints created by the broad phase
    pub fn collision_pairs(&self) -> usize {
        self.world.collision_pairs
    }

    /// Steps run so far
    pub fn step_count(&self) -> u64 {
        self.world.step_counter
    }

    pub fn timings(&self) -> &StepTimings {
        self.step.timings()
    }

    /// Keep up to `max` world contact points per step (0 disables)
    pub fn set_debug_contacts(&mut self, max: usize) {
        self.world.events.max_debug_contacts = max;
        self.world.events.debug_contacts.truncate(max);
    }

    pub fn debug_contacts(&self) -> &[Vec3Fix] {
        &self.world.events.debug_contacts
    }

    fn check_unlocked(&self, operation: &'static str) -> PhysicsResult<()> {
        if self.locked {
            log::error!("space is locked, cannot {}", operation);
            return Err(PhysicsError::SpaceLocked { operation });
        }
        Ok(())
    }

    fn object_mut_checked(&mut self, rid: Rid) -> PhysicsResult<&mut CollisionObject> {
        self.world.objects.get_mut(rid).ok_or_else(|| invalid_object(rid))
    }

    // ------------------------------------------------------------------
    // Objects
    // ------------------------------------------------------------------

    pub fn add_body(&mut self, body: Body, transform: Transform) -> PhysicsResult<Rid> {
        self.insert_object(ObjectData::Body(body), transform)
    }

    pub fn add_area(&mut self, area: Area, transform: Transform) -> PhysicsResult<Rid> {
        self.insert_object(ObjectData::Area(area), transform)
    }

    /// Node positions are taken relative to `transform`
    pub fn add_soft_body(&mut self, soft_body: SoftBody, transform: Transform) -> PhysicsResult<Rid> {
        self.insert_object(ObjectData::SoftBody(soft_body), transform)
    }

    fn insert_object(&mut self, data: ObjectData, transform: Transform) -> PhysicsResult<Rid> {
        self.check_unlocked("add object")?;
        let mut object = CollisionObject::new(data);
        object.set_transform(transform)?;
        object.in_space = true;
        match &mut object.data {
            ObjectData::Body(body) => {
                body.new_transform = transform;
                body.first_time_kinematic = false;
                body.update_transform_dependent(&transform);
            }
            ObjectData::SoftBody(soft) => soft.transform_nodes(|p| transform.xform(p)),
            ObjectData::Area(_) => {}
        }
        let kind = object.kind();
        let dynamic = object.body_mode().is_dynamic();
        let rid = self.world.objects.insert(object);

        match kind {
            ObjectKind::Body => {
                self.world.mass_updates.insert(rid);
                if dynamic {
                    self.world.active_bodies.insert(rid);
                }
            }
            ObjectKind::Area => {
                self.world.moved_areas.insert(rid);
            }
            ObjectKind::SoftBody => {
                self.world.active_soft_bodies.insert(rid);
            }
        }
        sync_leaves(self.broad_phase.as_mut(), &mut self.world, rid);
        log::debug!("added {:?} {:?}", kind, rid);
        Ok(rid)
    }

    /// Remove an object with its leaves, pairs and joints
    pub fn remove_object(&mut self, rid: Rid) -> PhysicsResult<()> {
        self.check_unlocked("remove object")?;
        if !self.world.objects.contains_key(rid) {
            return Err(invalid_object(rid));
        }
        self.world.wake_neighbours(rid);
        remove_leaves(self.broad_phase.as_mut(), &mut self.world, rid, 0);

        let remaining: Vec<ConstraintKey> = self
            .world
            .objects
            .get(rid)
            .map(|o| o.constraints.keys().copied().collect())
            .unwrap_or_default();
        for key in remaining {
            self.world.remove_constraint(key);
        }

        self.world.active_bodies.remove(&rid);
        self.world.active_soft_bodies.remove(&rid);
        self.world.moved_areas.remove(&rid);
        self.world.state_queries.remove(&rid);
        self.world.mass_updates.remove(&rid);
        self.monitor_callbacks.remove(&rid);
        self.area_monitor_callbacks.remove(&rid);
        self.state_sync_callbacks.remove(&rid);

        if let Some(mut object) = self.world.objects.remove(rid) {
            object.in_space = false;
            log::debug!("removed {:?} {:?}", object.kind(), rid);
        }
        Ok(())
    }

    pub fn contains(&self, rid: Rid) -> bool {
        self.world.objects.contains_key(rid)
    }

    pub fn object(&self, rid: Rid) -> Option<&CollisionObject> {
        self.world.objects.get(rid)
    }

    pub fn objects(&self) -> impl Iterator<Item = (Rid, &CollisionObject)> {
        self.world.objects.iter()
    }

    pub fn body(&self, rid: Rid) -> Option<&Body> {
        self.world.objects.get(rid).and_then(|o| o.as_body())
    }

    /// Direct access; use [`Space::body_state`] to also wake the body
    pub fn body_mut(&mut self, rid: Rid) -> Option<&mut Body> {
        self.world.objects.get_mut(rid).and_then(|o| o.as_body_mut())
    }

    pub fn area(&self, rid: Rid) -> Option<&Area> {
        self.world.objects.get(rid).and_then(|o| o.as_area())
    }

    pub fn area_mut(&mut self, rid: Rid) -> Option<&mut Area> {
        self.world.objects.get_mut(rid).and_then(|o| o.as_area_mut())
    }

    pub fn soft_body(&self, rid: Rid) -> Option<&SoftBody> {
        self.world.objects.get(rid).and_then(|o| o.as_soft_body())
    }

    pub fn set_instance_id(&mut self, rid: Rid, instance_id: Option<u64>) -> PhysicsResult<()> {
        self.object_mut_checked(rid)?.instance_id = instance_id;
        Ok(())
    }

    pub fn set_collision_layer(&mut self, rid: Rid, layer: u32) -> PhysicsResult<()> {
        self.check_unlocked("change collision layer")?;
        self.object_mut_checked(rid)?.collision_layer = layer;
        self.filter_changed(rid);
        Ok(())
    }

    pub fn set_collision_mask(&mut self, rid: Rid, mask: u32) -> PhysicsResult<()> {
        self.check_unlocked("change collision mask")?;
        self.object_mut_checked(rid)?.collision_mask = mask;
        self.filter_changed(rid);
        Ok(())
    }

    /// Pairs are filtered when created, so rebuild the leaves
    fn filter_changed(&mut self, rid: Rid) {
        self.world.wake_neighbours(rid);
        remove_leaves(self.broad_phase.as_mut(), &mut self.world, rid, 0);
        sync_leaves(self.broad_phase.as_mut(), &mut self.world, rid);
        self.world.set_body_active(rid, true);
        if self.world.objects.get(rid).map_or(false, |o| o.kind() == ObjectKind::Area) {
            self.world.moved_areas.insert(rid);
        }
    }

    pub fn set_ray_pickable(&mut self, rid: Rid, pickable: bool) -> PhysicsResult<()> {
        self.object_mut_checked(rid)?.ray_pickable = pickable;
        Ok(())
    }

    /// Move an object
    ///
    /// Kinematic bodies reach the new transform during the next step, with
    /// the velocity that motion implies. Moving a static body wakes the
    /// bodies touching it.
    pub fn set_transform(&mut self, rid: Rid, transform: Transform) -> PhysicsResult<()> {
        let object = self.world.objects.get_mut(rid).ok_or_else(|| invalid_object(rid))?;
        let kind = object.kind();
        let mode = object.body_mode();

        match kind {
            ObjectKind::Body => {
                if mode == BodyMode::Kinematic {
                    let deferred = match object.as_body_mut() {
                        Some(body) => {
                            body.new_transform = transform;
                            !core::mem::replace(&mut body.first_time_kinematic, false)
                        }
                        None => false,
                    };
                    if deferred {
                        self.world.set_body_active(rid, true);
                        return Ok(());
                    }
                }
                object.set_transform(transform)?;
                if let Some(body) = object.as_body_mut() {
                    body.new_transform = transform;
                    body.update_transform_dependent(&transform);
                }
                if mode == BodyMode::Static {
                    self.world.wake_neighbours(rid);
                } else {
                    self.world.set_body_active(rid, true);
                }
                self.world.state_queries.insert(rid);
            }
            ObjectKind::Area => {
                object.set_transform(transform)?;
                self.world.moved_areas.insert(rid);
            }
            ObjectKind::SoftBody => {
                let old_inv = *object.inv_transform();
                object.set_transform(transform)?;
                if let Some(soft) = object.as_soft_body_mut() {
                    soft.transform_nodes(|p| transform.xform(old_inv.xform(p)));
                }
                self.world.active_soft_bodies.insert(rid);
            }
        }
        sync_leaves(self.broad_phase.as_mut(), &mut self.world, rid);
        Ok(())
    }

    pub fn body_set_mode(&mut self, rid: Rid, mode: BodyMode) -> PhysicsResult<()> {
        self.check_unlocked("change body mode")?;
        let object = self.world.objects.get_mut(rid).ok_or_else(|| invalid_object(rid))?;
        let body = object.as_body_mut().ok_or(PhysicsError::WrongObjectKind { expected: "body" })?;
        body.set_mode(mode);
        object.refresh_static_flag();
        set_leaves_static(self.broad_phase.as_mut(), object);
        self.world.mass_updates.insert(rid);
        self.world.set_body_active(rid, mode != BodyMode::Static);
        Ok(())
    }

    /// Wake or put to sleep
    pub fn body_set_active(&mut self, rid: Rid, active: bool) -> PhysicsResult<()> {
        if self.body(rid).is_none() {
            return Err(PhysicsError::WrongObjectKind { expected: "body" });
        }
        self.world.set_body_active(rid, active);
        Ok(())
    }

    pub fn wake_up(&mut self, rid: Rid) {
        self.world.set_body_active(rid, true);
    }

    pub fn area_set_monitorable(&mut self, rid: Rid, monitorable: bool) -> PhysicsResult<()> {
        self.check_unlocked("change monitorable")?;
        let object = self.world.objects.get_mut(rid).ok_or_else(|| invalid_object(rid))?;
        let area = object.as_area_mut().ok_or(PhysicsError::WrongObjectKind { expected: "area" })?;
        area.monitorable = monitorable;
        object.refresh_static_flag();
        set_leaves_static(self.broad_phase.as_mut(), object);
        self.world.moved_areas.insert(rid);
        Ok(())
    }

    /// Replace a soft body's nodes (world positions)
    pub fn soft_body_set_points(&mut self, rid: Rid, points: &[Vec3Fix]) -> PhysicsResult<()> {
        let soft = self
            .object_mut_checked(rid)?
            .as_soft_body_mut()
            .ok_or(PhysicsError::WrongObjectKind { expected: "soft body" })?;
        soft.set_points(points);
        self.world.active_soft_bodies.insert(rid);
        sync_leaves(self.broad_phase.as_mut(), &mut self.world, rid);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Shapes
    // ------------------------------------------------------------------

    fn shapes_changed(&mut self, rid: Rid) {
        sync_leaves(self.broad_phase.as_mut(), &mut self.world, rid);
        if let Some(body) = self.world.objects.get_mut(rid).and_then(|o| o.as_body_mut()) {
            body.mass_dirty = true;
            self.world.mass_updates.insert(rid);
            self.world.set_body_active(rid, true);
        }
    }

    pub fn add_shape(&mut self, rid: Rid, shape: Arc<Shape>, xform: Transform, disabled: bool) -> PhysicsResult<usize> {
        self.check_unlocked("add shape")?;
        let index = self.object_mut_checked(rid)?.add_shape(shape, xform, disabled);
        self.shapes_changed(rid);
        Ok(index)
    }

    pub fn set_shape(&mut self, rid: Rid, index: usize, shape: Arc<Shape>) -> PhysicsResult<()> {
        self.check_unlocked("set shape")?;
        let old = self.object_mut_checked(rid)?.set_shape(index, shape)?;
        if old.is_valid() {
            self.broad_phase.remove(old, &mut self.world);
        }
        self.shapes_changed(rid);
        Ok(())
    }

    pub fn set_shape_transform(&mut self, rid: Rid, index: usize, xform: Transform) -> PhysicsResult<()> {
        self.check_unlocked("move shape")?;
        self.object_mut_checked(rid)?.set_shape_transform(index, xform)?;
        self.shapes_changed(rid);
        Ok(())
    }

    pub fn set_shape_disabled(&mut self, rid: Rid, index: usize, disabled: bool) -> PhysicsResult<()> {
        self.check_unlocked("disable shape")?;
        self.object_mut_checked(rid)?.set_shape_disabled(index, disabled)?;
        self.shapes_changed(rid);
        Ok(())
    }

    /// Remove one shape; later shapes shift down one index
    pub fn remove_shape(&mut self, rid: Rid, index: usize) -> PhysicsResult<()> {
        self.check_unlocked("remove shape")?;
        let count = self.object_mut_checked(rid)?.shape_count();
        if index >= count {
            log::error!("shape index {} out of range ({})", index, count);
            return Err(PhysicsError::InvalidShapeIndex { index, count });
        }
        // Leaves after the removed shape carry stale subindices
        remove_leaves(self.broad_phase.as_mut(), &mut self.world, rid, index);
        self.object_mut_checked(rid)?.remove_shape(index)?;
        self.shapes_changed(rid);
        Ok(())
    }

    /// Remove every instance of `shape`; returns how many were removed
    pub fn remove_shape_ref(&mut self, rid: Rid, shape: &Arc<Shape>) -> PhysicsResult<usize> {
        let mut removed = 0;
        while let Some(index) = self.object(rid).and_then(|o| o.find_shape(shape)) {
            self.remove_shape(rid, index)?;
            removed += 1;
        }
        if !self.contains(rid) {
            return Err(invalid_object(rid));
        }
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Collision exceptions
    // ------------------------------------------------------------------

    pub fn add_collision_exception(&mut self, body: Rid, other: Rid) -> PhysicsResult<()> {
        self.object_mut_checked(body)?
            .as_body_mut()
            .ok_or(PhysicsError::WrongObjectKind { expected: "body" })?
            .add_collision_exception(other);
        self.world.set_body_active(body, true);
        Ok(())
    }

    pub fn remove_collision_exception(&mut self, body: Rid, other: Rid) -> PhysicsResult<()> {
        self.object_mut_checked(body)?
            .as_body_mut()
            .ok_or(PhysicsError::WrongObjectKind { expected: "body" })?
            .remove_collision_exception(other);
        self.world.set_body_active(body, true);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Joints
    // ------------------------------------------------------------------

    fn check_joint_bodies(&self, a: Rid, b: Rid) -> PhysicsResult<()> {
        self.check_unlocked("create joint")?;
        for rid in [a, b] {
            let object = self.world.objects.get(rid).ok_or_else(|| invalid_object(rid))?;
            if object.as_body().is_none() {
                log::error!("joints connect bodies, {:?} is a {:?}", rid, object.kind());
                return Err(PhysicsError::WrongObjectKind { expected: "body" });
            }
        }
        if a == b {
            log::error!("a joint needs two distinct bodies");
            return Err(PhysicsError::InvalidConfiguration {
                reason: "joint bodies must differ",
            });
        }
        Ok(())
    }

    fn add_joint(&mut self, joint: Joint) -> ConstraintKey {
        let (a, b) = joint.bodies();
        let key = self.world.insert_constraint(Constraint::Joint(joint));
        self.world.set_body_active(a, true);
        self.world.set_body_active(b, true);
        log::debug!("joint {:?} created between {:?} and {:?}", key, a, b);
        key
    }

    /// Ball socket; pivots are local to each body
    pub fn create_pin_joint(&mut self, a: Rid, local_a: Vec3Fix, b: Rid, local_b: Vec3Fix) -> PhysicsResult<ConstraintKey> {
        self.check_joint_bodies(a, b)?;
        Ok(self.add_joint(Joint::pin(a, local_a, b, local_b)))
    }

    /// Spring between local anchors; rest length is their current distance
    pub fn create_damped_spring_joint(
        &mut self,
        a: Rid,
        anchor_a: Vec3Fix,
        b: Rid,
        anchor_b: Vec3Fix,
    ) -> PhysicsResult<ConstraintKey> {
        self.check_joint_bodies(a, b)?;
        let anchor_world = |rid: Rid, anchor: Vec3Fix| {
            self.world
                .objects
                .get(rid)
                .map(|o| o.transform().xform(anchor))
                .ok_or_else(|| invalid_object(rid))
        };
        let world_a = anchor_world(a, anchor_a)?;
        let world_b = anchor_world(b, anchor_b)?;
        let rest = world_a.distance_to(world_b);
        Ok(self.add_joint(Joint::damped_spring(a, anchor_a, b, anchor_b, rest)))
    }

    pub fn remove_joint(&mut self, key: ConstraintKey) -> PhysicsResult<()> {
        self.check_unlocked("remove joint")?;
        if self.joint(key).is_none() {
            log::error!("constraint {:?} is not a joint of this space", key);
            return Err(PhysicsError::InvalidConstraint);
        }
        if let Some(constraint) = self.world.remove_constraint(key) {
            for rid in constraint.objects() {
                self.world.set_body_active(*rid, true);
            }
        }
        Ok(())
    }

    pub fn joint(&self, key: ConstraintKey) -> Option<&Joint> {
        self.world.constraints.get(key).and_then(|c| c.as_joint())
    }

    pub fn joint_mut(&mut self, key: ConstraintKey) -> Option<&mut Joint> {
        self.world.constraints.get_mut(key).and_then(|c| c.as_joint_mut())
    }

    /// Stop (or resume) contacts between the two jointed bodies
    pub fn joint_disable_collisions_between_bodies(&mut self, key: ConstraintKey, disable: bool) -> PhysicsResult<()> {
        let World {
            constraints,
            objects,
            ..
        } = &mut self.world;
        let joint = constraints
            .get_mut(key)
            .and_then(|c| c.as_joint_mut())
            .ok_or(PhysicsError::InvalidConstraint)?;
        joint.set_disable_collisions(objects, disable);
        let (a, b) = joint.bodies();
        self.world.set_body_active(a, true);
        self.world.set_body_active(b, true);
        Ok(())
    }

    /// Any pair or joint
    pub fn constraint(&self, key: ConstraintKey) -> Option<&Constraint> {
        self.world.constraints.get(key)
    }

    /// Constraints `rid` takes part in
    pub fn constraints_of(&self, rid: Rid) -> Vec<ConstraintKey> {
        self.world
            .objects
            .get(rid)
            .map(|o| o.constraints.keys().copied().collect())
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Callbacks
    // ------------------------------------------------------------------

    /// Body and soft-body enter/exit notifications of an area
    pub fn set_monitor_callback(&mut self, area: Rid, callback: Option<MonitorCallback>) -> PhysicsResult<()> {
        let object = self.world.objects.get_mut(area).ok_or_else(|| invalid_object(area))?;
        let a = object.as_area_mut().ok_or(PhysicsError::WrongObjectKind { expected: "area" })?;
        a.has_monitor_callback = callback.is_some();
        object.refresh_static_flag();
        set_leaves_static(self.broad_phase.as_mut(), object);
        match callback {
            Some(cb) => self.monitor_callbacks.insert(area, cb),
            None => self.monitor_callbacks.remove(&area),
        };
        self.world.moved_areas.insert(area);
        Ok(())
    }

    /// Area enter/exit notifications of an area
    pub fn set_area_monitor_callback(&mut self, area: Rid, callback: Option<MonitorCallback>) -> PhysicsResult<()> {
        let object = self.world.objects.get_mut(area).ok_or_else(|| invalid_object(area))?;
        let a = object.as_area_mut().ok_or(PhysicsError::WrongObjectKind { expected: "area" })?;
        a.has_area_monitor_callback = callback.is_some();
        object.refresh_static_flag();
        set_leaves_static(self.broad_phase.as_mut(), object);
        match callback {
            Some(cb) => self.area_monitor_callbacks.insert(area, cb),
            None => self.area_monitor_callbacks.remove(&area),
        };
        self.world.moved_areas.insert(area);
        Ok(())
    }

    pub fn set_state_sync_callback(&mut self, body: Rid, callback: Option<StateSyncCallback>) -> PhysicsResult<()> {
        if self.body(body).is_none() {
            return Err(PhysicsError::WrongObjectKind { expected: "body" });
        }
        match callback {
            Some(cb) => self.state_sync_callbacks.insert(body, cb),
            None => self.state_sync_callbacks.remove(&body),
        };
        Ok(())
    }

    // ------------------------------------------------------------------
    // Stepping
    // ------------------------------------------------------------------

    /// Advance the simulation by `delta` seconds
    pub fn step(&mut self, delta: Fix128) -> PhysicsResult<()> {
        if !delta.is_positive() {
            log::error!("step delta must be positive, got {:?}", delta);
            return Err(PhysicsError::InvalidConfiguration {
                reason: "step delta must be positive",
            });
        }
        self.check_unlocked("step")?;
        self.locked = true;
        self.world.events.debug_contacts.clear();
        self.step.run(&mut self.world, self.broad_phase.as_mut(), delta);
        self.locked = false;
        Ok(())
    }

    /// Flush state-sync and monitor notifications gathered since the last call
    pub fn call_queries(&mut self) {
        self.locked = true;

        for rid in core::mem::take(&mut self.world.state_queries) {
            let Some(callback) = self.state_sync_callbacks.get_mut(&rid) else {
                continue;
            };
            let Some(object) = self.world.objects.get(rid) else {
                continue;
            };
            let Some(body) = object.as_body() else {
                continue;
            };
            callback(&BodySync {
                body: rid,
                instance_id: object.instance_id,
                transform: *object.transform(),
                linear_velocity: body.linear_velocity(),
                angular_velocity: body.angular_velocity(),
                sleeping: !body.is_active(),
            });
        }

        for rid in core::mem::take(&mut self.world.events.monitor_queries) {
            let Some(area) = self.world.objects.get_mut(rid).and_then(|o| o.as_area_mut()) else {
                continue;
            };
            let (object_events, area_events) = area.drain_queries();
            if let Some(callback) = self.monitor_callbacks.get_mut(&rid) {
                for event in object_events {
                    callback(event);
                }
            }
            if let Some(callback) = self.area_monitor_callbacks.get_mut(&rid) {
                for event in area_events {
                    callback(event);
                }
            }
        }

        self.locked = false;
    }

    // ------------------------------------------------------------------
    // Direct access
    // ------------------------------------------------------------------

    /// Read-only queries against the current state
    pub fn direct_state(&self) -> SpaceState<'_> {
        SpaceState::new(&self.world, &*self.broad_phase)
    }

    /// Mutable access to one body that wakes it on every change
    pub fn body_state(&mut self, rid: Rid) -> Option<BodyState<'_>> {
        self.body(rid)?;
        Some(BodyState::new(self, rid))
    }

    pub(crate) fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub(crate) fn world(&self) -> &World {
        &self.world
    }

    /// Sweep a body from `from` along `motion`; `None` when nothing is hit
    pub fn test_body_motion(
        &self,
        body: Rid,
        from: &Transform,
        motion: Vec3Fix,
        margin: Fix128,
    ) -> Option<MotionResult> {
        self.direct_state().body_motion(body, from, motion, margin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc as StdArc, Mutex};

    fn cube(half: i64) -> Arc<Shape> {
        Arc::new(Shape::cuboid(Vec3Fix::from_int(half, half, half)))
    }

    fn at(x: i64, y: i64, z: i64) -> Transform {
        Transform::from_origin(Vec3Fix::from_int(x, y, z))
    }

    fn dt() -> Fix128 {
        Fix128::from_ratio(1, 60)
    }

    #[test]
    fn test_overlapping_bodies_pair_and_unpair() {
        let mut space = Space::new().unwrap();
        let a = space.add_body(Body::new(BodyMode::Dynamic), at(0, 0, 0)).unwrap();
        let b = space.add_body(Body::new(BodyMode::Dynamic), at(1, 0, 0)).unwrap();
        space.add_shape(a, cube(1), Transform::IDENTITY, false).unwrap();
        space.add_shape(b, cube(1), Transform::IDENTITY, false).unwrap();
        space.step(dt()).unwrap();
        assert_eq!(space.collision_pairs(), 1);
        assert_eq!(space.constraints_of(a), space.constraints_of(b));

        space.remove_object(b).unwrap();
        assert_eq!(space.collision_pairs(), 0);
        assert!(space.constraints_of(a).is_empty());
        assert!(!space.contains(b));
    }

    #[test]
    fn test_layer_mask_blocks_pair() {
        let mut space = Space::new().unwrap();
        let a = space.add_body(Body::new(BodyMode::Dynamic), at(0, 0, 0)).unwrap();
        let b = space.add_body(Body::new(BodyMode::Dynamic), at(1, 0, 0)).unwrap();
        space.add_shape(a, cube(1), Transform::IDENTITY, false).unwrap();
        space.add_shape(b, cube(1), Transform::IDENTITY, false).unwrap();
        space.set_collision_layer(a, 0b10).unwrap();
        space.set_collision_mask(a, 0b10).unwrap();
        space.step(dt()).unwrap();
        assert_eq!(space.collision_pairs(), 0);
    }

    #[test]
    fn test_disabled_shape_drops_leaf() {
        let mut space = Space::new().unwrap();
        let a = space.add_body(Body::new(BodyMode::Static), at(0, 0, 0)).unwrap();
        let b = space.add_body(Body::new(BodyMode::Dynamic), at(0, 1, 0)).unwrap();
        space.add_shape(a, cube(1), Transform::IDENTITY, false).unwrap();
        space.add_shape(b, cube(1), Transform::IDENTITY, false).unwrap();
        space.step(dt()).unwrap();
        assert_eq!(space.collision_pairs(), 1);
        space.set_shape_disabled(b, 0, true).unwrap();
        assert_eq!(space.collision_pairs(), 0);
        assert!(!space.object(b).unwrap().shapes()[0].bpid.is_valid());
    }

    #[test]
    fn test_joint_validation() {
        let mut space = Space::new().unwrap();
        let a = space.add_body(Body::new(BodyMode::Dynamic), at(0, 0, 0)).unwrap();
        let area = space.add_area(Area::new(), at(0, 0, 0)).unwrap();
        assert_eq!(
            space.create_pin_joint(a, Vec3Fix::ZERO, a, Vec3Fix::ZERO),
            Err(PhysicsError::InvalidConfiguration {
                reason: "joint bodies must differ"
            })
        );
        assert_eq!(
            space.create_pin_joint(a, Vec3Fix::ZERO, area, Vec3Fix::ZERO),
            Err(PhysicsError::WrongObjectKind { expected: "body" })
        );

        let b = space.add_body(Body::new(BodyMode::Dynamic), at(0, 2, 0)).unwrap();
        let key = space
            .create_damped_spring_joint(a, Vec3Fix::ZERO, b, Vec3Fix::ZERO)
            .unwrap();
        let joint = space.joint(key).unwrap();
        assert_eq!(
            joint.damped_spring_param(crate::joint::DampedSpringParam::RestLength),
            Fix128::from_int(2)
        );
        space.joint_disable_collisions_between_bodies(key, true).unwrap();
        assert!(space.body(a).unwrap().has_exception(b));
        space.remove_joint(key).unwrap();
        assert!(!space.body(a).unwrap().has_exception(b));
        assert_eq!(space.remove_joint(key), Err(PhysicsError::InvalidConstraint));

        space.remove_object(b).unwrap();
        assert_eq!(
            space.create_damped_spring_joint(a, Vec3Fix::ZERO, b, Vec3Fix::ZERO),
            Err(PhysicsError::InvalidObject)
        );
    }

    #[test]
    fn test_state_sync_after_step() {
        let mut space = Space::new().unwrap();
        let a = space.add_body(Body::new(BodyMode::Dynamic), at(0, 10, 0)).unwrap();
        space.add_shape(a, cube(1), Transform::IDENTITY, false).unwrap();
        let seen = StdArc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        space
            .set_state_sync_callback(a, Some(Box::new(move |s: &BodySync| sink.lock().unwrap().push(s.transform.origin.y))))
            .unwrap();
        space.step(dt()).unwrap();
        space.call_queries();
        space.call_queries();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0] < Fix128::from_int(10));
    }

    #[test]
    fn test_remove_shape_shifts_indices() {
        let mut space = Space::new().unwrap();
        let a = space.add_body(Body::new(BodyMode::Dynamic), at(0, 0, 0)).unwrap();
        let small = cube(1);
        let big = cube(2);
        space.add_shape(a, small.clone(), Transform::IDENTITY, false).unwrap();
        space.add_shape(a, big.clone(), Transform::IDENTITY, false).unwrap();
        space.add_shape(a, small.clone(), at(3, 0, 0), false).unwrap();
        assert_eq!(space.remove_shape_ref(a, &small), Ok(2));
        let object = space.object(a).unwrap();
        assert_eq!(object.shape_count(), 1);
        assert!(Arc::ptr_eq(&object.shapes()[0].shape, &big));
        assert!(object.shapes()[0].bpid.is_valid());
        assert_eq!(
            space.remove_shape(a, 5),
            Err(PhysicsError::InvalidShapeIndex { index: 5, count: 1 })
        );
    }

    #[test]
    fn test_invalid_step_delta() {
        let mut space = Space::new().unwrap();
        assert!(space.step(Fix128::ZERO).is_err());
        assert_eq!(space.step_count(), 0);
        space.step(dt()).unwrap();
        assert_eq!(space.step_count(), 1);
        assert!(!space.is_locked());
    }
}
