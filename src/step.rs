//! Step Pipeline
//!
//! Advances a space by one tick:
//!
//! 1. refresh dirty mass properties
//! 2. integrate forces (area overrides resolved per body)
//! 3. predict soft-body motion
//! 4. broad-phase update (pairs created and destroyed here)
//! 5. islands: moved areas, active bodies, soft bodies
//! 6. setup every claimed constraint (parallel)
//! 7. pre-solve in island order (serial, mutates objects)
//! 8. solve islands on island-local velocity buffers (parallel)
//! 9. integrate velocities and move broad-phase leaves
//! 10. put still islands to sleep
//! 11. commit soft-body motion
//!
//! With the `parallel` feature the two parallel phases run on a rayon pool
//! owned by the `Step`; without it they run in place, in the same order.
//!
//! Author: Moroya Sakamoto

use crate::area::{SpaceOverrideMode, WindField};
use crate::body::{AreaRef, ForceEnvironment};
use crate::broad_phase::BroadPhase;
use crate::collision_object::{ObjectArena, Rid};
use crate::config::SpaceConfig;
use crate::constraint::{Constraint, ConstraintKey, SolverBody};
use crate::error::PhysicsResult;
use crate::math::{Fix128, Vec3Fix};
use crate::space::{move_leaves, World};

use alloc::collections::{BTreeMap, BTreeSet};

#[cfg(not(feature = "std"))]
use alloc::{vec, vec::Vec};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Wall-clock time of the last step per phase, in microseconds
///
/// Stays zero without the `std` feature.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StepTimings {
    pub integrate_forces_us: u64,
    pub broad_phase_us: u64,
    pub generate_islands_us: u64,
    pub setup_constraints_us: u64,
    pub pre_solve_us: u64,
    pub solve_constraints_us: u64,
    pub integrate_velocities_us: u64,
}

struct PhaseClock {
    #[cfg(feature = "std")]
    last: std::time::Instant,
}

impl PhaseClock {
    fn start() -> Self {
        Self {
            #[cfg(feature = "std")]
            last: std::time::Instant::now(),
        }
    }

    #[cfg(feature = "std")]
    fn lap(&mut self) -> u64 {
        let now = std::time::Instant::now();
        let us = now.duration_since(self.last).as_micros() as u64;
        self.last = now;
        us
    }

    #[cfg(not(feature = "std"))]
    fn lap(&mut self) -> u64 {
        0
    }
}

/// Constraints (and dynamic bodies) solved together
#[derive(Clone, Debug, Default)]
pub(crate) struct Island {
    pub bodies: Vec<Rid>,
    pub constraints: Vec<ConstraintKey>,
}

/// One island's solver input
struct IslandJob<'a> {
    bodies: Vec<SolverBody>,
    constraints: Vec<&'a mut Constraint>,
}

/// Step driver; owns the worker pool
pub struct Step {
    #[cfg(feature = "parallel")]
    pool: rayon::ThreadPool,
    island_count: usize,
    active_objects: usize,
    timings: StepTimings,
}

impl Step {
    /// `worker_threads == 0` lets rayon pick the thread count
    pub fn new(worker_threads: usize) -> PhysicsResult<Self> {
        #[cfg(feature = "parallel")]
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(worker_threads)
            .thread_name(|i| format!("space-solver-{}", i))
            .build()
            .map_err(|e| {
                log::error!("failed to build solver pool: {}", e);
                crate::error::PhysicsError::ThreadPool {
                    reason: "rayon pool could not be built",
                }
            })?;
        #[cfg(not(feature = "parallel"))]
        let _ = worker_threads;

        Ok(Self {
            #[cfg(feature = "parallel")]
            pool,
            island_count: 0,
            active_objects: 0,
            timings: StepTimings::default(),
        })
    }

    /// Body islands solved in the last step
    #[inline]
    pub fn island_count(&self) -> usize {
        self.island_count
    }

    /// Awake bodies and soft bodies after the last step
    #[inline]
    pub fn active_objects(&self) -> usize {
        self.active_objects
    }

    #[inline]
    pub fn timings(&self) -> &StepTimings {
        &self.timings
    }

    #[cfg(feature = "parallel")]
    fn for_each_mut<T, F>(&self, items: &mut [T], f: F)
    where
        T: Send,
        F: Fn(&mut T) + Send + Sync,
    {
        self.pool.install(|| items.par_iter_mut().for_each(f));
    }

    #[cfg(not(feature = "parallel"))]
    fn for_each_mut<T, F>(&self, items: &mut [T], f: F)
    where
        F: Fn(&mut T),
    {
        items.iter_mut().for_each(f);
    }

    pub(crate) fn run(&mut self, world: &mut World, broad_phase: &mut dyn BroadPhase<World>, delta: Fix128) {
        let step = world.step_counter;
        let mut clock = PhaseClock::start();

        update_mass_properties(world);
        integrate_forces(world, delta);
        predict_soft_bodies(world, delta);
        self.timings.integrate_forces_us = clock.lap();

        broad_phase.update(world);
        self.timings.broad_phase_us = clock.lap();

        let islands = generate_islands(world, step);
        self.island_count = islands.iter().filter(|i| !i.bodies.is_empty()).count();
        self.timings.generate_islands_us = clock.lap();

        let ready = self.setup_constraints(world, step, delta);
        self.timings.setup_constraints_us = clock.lap();

        let solving = pre_solve_constraints(world, &islands, &ready, delta);
        self.timings.pre_solve_us = clock.lap();

        self.solve_islands(world, &islands, &solving, delta);
        self.timings.solve_constraints_us = clock.lap();

        integrate_velocities(world, broad_phase, delta);
        self.timings.integrate_velocities_us = clock.lap();

        check_suspend(world, &islands, delta);
        solve_soft_bodies(world, broad_phase, delta);

        self.active_objects = world.active_bodies.len() + world.active_soft_bodies.len();
        world.step_counter += 1;
        log::trace!(
            "step {}: {} islands, {} constraints solved, {} active",
            step,
            self.island_count,
            solving.len(),
            self.active_objects
        );
    }

    /// Returns the constraints whose `setup` asked for `pre_solve`
    fn setup_constraints(&self, world: &mut World, step: u64, delta: Fix128) -> BTreeSet<ConstraintKey> {
        let World {
            objects,
            constraints,
            config,
            ..
        } = world;
        let objects: &ObjectArena = objects;
        let config: &SpaceConfig = config;

        let mut claimed: Vec<(ConstraintKey, &mut Constraint, bool)> = constraints
            .iter_mut()
            .filter(|(_, c)| c.base().island_step == step)
            .map(|(k, c)| (k, c, false))
            .collect();
        self.for_each_mut(&mut claimed, |(_, c, ready)| {
            *ready = c.setup(objects, config, delta);
        });
        claimed
            .into_iter()
            .filter(|(_, _, ready)| *ready)
            .map(|(k, _, _)| k)
            .collect()
    }

    fn solve_islands(
        &self,
        world: &mut World,
        islands: &[Island],
        solving: &BTreeSet<ConstraintKey>,
        delta: Fix128,
    ) {
        let World {
            objects,
            constraints,
            config,
            ..
        } = world;
        let iterations = config.solver_iterations.max(1);

        let mut by_key: BTreeMap<ConstraintKey, &mut Constraint> = constraints
            .iter_mut()
            .filter(|(k, _)| solving.contains(k))
            .collect();

        let mut jobs: Vec<IslandJob<'_>> = Vec::new();
        for island in islands.iter().filter(|i| !i.bodies.is_empty()) {
            let mut bodies = Vec::new();
            let mut slots = BTreeMap::new();
            let mut members = Vec::new();
            for key in &island.constraints {
                let Some(c) = by_key.remove(key) else {
                    continue;
                };
                let [a, b] = *c.objects();
                let (Some(sa), Some(sb)) = (
                    solver_slot(a, objects, &mut bodies, &mut slots),
                    solver_slot(b, objects, &mut bodies, &mut slots),
                ) else {
                    continue;
                };
                c.base_mut().slots = [sa, sb];
                members.push(c);
            }
            if members.is_empty() {
                continue;
            }
            // Stable: equal priorities keep island (creation) order
            members.sort_by_key(|c| core::cmp::Reverse(c.base().priority));
            jobs.push(IslandJob {
                bodies,
                constraints: members,
            });
        }

        self.for_each_mut(&mut jobs, |job| {
            for _ in 0..iterations {
                for c in job.constraints.iter_mut() {
                    c.solve(&mut job.bodies, delta);
                }
            }
        });

        for job in &jobs {
            for body in &job.bodies {
                if let Some(object) = objects.get_mut(body.rid) {
                    body.write_back(object);
                }
            }
        }
    }
}

fn solver_slot(
    rid: Rid,
    objects: &ObjectArena,
    bodies: &mut Vec<SolverBody>,
    slots: &mut BTreeMap<Rid, usize>,
) -> Option<usize> {
    if let Some(&slot) = slots.get(&rid) {
        return Some(slot);
    }
    let object = objects.get(rid)?;
    bodies.push(SolverBody::from_object(rid, object));
    let slot = bodies.len() - 1;
    slots.insert(rid, slot);
    Some(slot)
}

fn apply_override<T>(total: &mut T, mode: SpaceOverrideMode, value: T) -> bool
where
    T: Copy + core::ops::Add<Output = T>,
{
    if !mode.is_enabled() {
        return false;
    }
    *total = if mode.replaces() { value } else { *total + value };
    mode.stops()
}

/// Gravity and damping at `position` after walking the overlapping areas
///
/// `areas` is sorted by ascending priority; the walk starts at the top. A
/// parameter no area stopped on also receives the space default.
pub(crate) fn resolve_overrides(
    objects: &ObjectArena,
    areas: &[AreaRef],
    position: Vec3Fix,
    config: &SpaceConfig,
) -> ForceEnvironment {
    let mut env = ForceEnvironment {
        gravity: Vec3Fix::ZERO,
        linear_damp: Fix128::ZERO,
        angular_damp: Fix128::ZERO,
    };
    let (mut gravity_done, mut linear_done, mut angular_done) = (false, false, false);

    for entry in areas.iter().rev() {
        if gravity_done && linear_done && angular_done {
            break;
        }
        let Some(object) = objects.get(entry.area) else {
            continue;
        };
        let Some(area) = object.as_area() else {
            continue;
        };
        if !gravity_done {
            let g = area.compute_gravity(object.transform(), position);
            gravity_done = apply_override(&mut env.gravity, area.gravity_override_mode, g);
        }
        if !linear_done {
            linear_done = apply_override(&mut env.linear_damp, area.linear_damp_override_mode, area.linear_damp);
        }
        if !angular_done {
            angular_done = apply_override(&mut env.angular_damp, area.angular_damp_override_mode, area.angular_damp);
        }
    }

    if !gravity_done {
        env.gravity += config.default_gravity;
    }
    if !linear_done {
        env.linear_damp += config.default_linear_damp;
    }
    if !angular_done {
        env.angular_damp += config.default_angular_damp;
    }
    env
}

fn update_mass_properties(world: &mut World) {
    let mut pending = core::mem::take(&mut world.mass_updates);
    pending.extend(world.active_bodies.iter().copied().filter(|rid| {
        world
            .objects
            .get(*rid)
            .and_then(|o| o.as_body())
            .map_or(false, |b| b.mass_dirty)
    }));
    for rid in pending {
        if let Some(object) = world.objects.get_mut(rid) {
            object.update_mass_properties();
        }
    }
}

fn integrate_forces(world: &mut World, delta: Fix128) {
    let World {
        objects,
        active_bodies,
        config,
        ..
    } = world;
    for &rid in active_bodies.iter() {
        let Some(object) = objects.get(rid) else {
            continue;
        };
        let Some(body) = object.as_body() else {
            continue;
        };
        let xf = *object.transform();
        let env = resolve_overrides(objects, &body.areas, xf.origin + body.center_of_mass(), config);
        if let Some(body) = objects.get_mut(rid).and_then(|o| o.as_body_mut()) {
            body.integrate_forces(&xf, &env, delta);
        }
    }
}

fn predict_soft_bodies(world: &mut World, delta: Fix128) {
    let World {
        objects,
        active_soft_bodies,
        config,
        ..
    } = world;
    for &rid in active_soft_bodies.iter() {
        let Some(soft) = objects.get(rid).and_then(|o| o.as_soft_body()) else {
            continue;
        };
        let env = resolve_overrides(objects, &soft.areas, soft.aabb().center(), config);
        let winds: Vec<WindField> = soft
            .areas
            .iter()
            .filter_map(|entry| objects.get(entry.area).and_then(|o| o.as_area()))
            .map(|area| area.wind_field())
            .filter(|wind| wind.magnitude.is_positive())
            .collect();
        if let Some(soft) = objects.get_mut(rid).and_then(|o| o.as_soft_body_mut()) {
            let wind = |p: Vec3Fix| winds.iter().fold(Vec3Fix::ZERO, |acc, w| acc + w.force_at(p));
            soft.predict_motion(&env, wind, delta);
        }
    }
}

/// Stamp a body as visited; false if it already was or is not a body
fn mark_body(objects: &mut ObjectArena, rid: Rid, step: u64) -> bool {
    match objects.get_mut(rid).and_then(|o| o.as_body_mut()) {
        Some(body) if body.island_step != step => {
            body.island_step = step;
            true
        }
        _ => false,
    }
}

fn is_dynamic_body(objects: &ObjectArena, rid: Rid) -> bool {
    objects
        .get(rid)
        .and_then(|o| o.as_body())
        .map_or(false, |b| b.mode().is_dynamic())
}

/// Claim every constraint of `rid` not yet claimed this step
fn claim_all(world: &mut World, rid: Rid, step: u64, mut claim: impl FnMut(ConstraintKey)) {
    let Some(object) = world.objects.get(rid) else {
        return;
    };
    let keys: Vec<ConstraintKey> = object.constraints.keys().copied().collect();
    for key in keys {
        if let Some(c) = world.constraints.get_mut(key) {
            if c.base().island_step != step {
                c.base_mut().island_step = step;
                claim(key);
            }
        }
    }
}

/// Partition this step's work into islands
///
/// Static, kinematic and area objects end a flood fill. A non-dynamic seed
/// leaves its constraints with dynamic bodies to those bodies' islands.
pub(crate) fn generate_islands(world: &mut World, step: u64) -> Vec<Island> {
    let mut islands = Vec::new();

    // Moved areas re-test every pair they own, one island each
    for rid in core::mem::take(&mut world.moved_areas) {
        claim_all(world, rid, step, |key| {
            islands.push(Island {
                bodies: Vec::new(),
                constraints: vec![key],
            })
        });
    }

    let mut seeds: Vec<Rid> = world.active_bodies.iter().copied().collect();
    let mut next = 0;
    while next < seeds.len() {
        let seed = seeds[next];
        next += 1;
        if !mark_body(&mut world.objects, seed, step) {
            continue;
        }

        let mut island = Island::default();
        let mut stack = vec![seed];
        while let Some(rid) = stack.pop() {
            let Some(object) = world.objects.get(rid) else {
                continue;
            };
            let dynamic = object.body_mode().is_dynamic();
            if dynamic {
                island.bodies.push(rid);
            }
            let links: Vec<(ConstraintKey, usize)> = object.constraints.iter().map(|(k, s)| (*k, *s)).collect();
            for (key, slot) in links {
                let Some(c) = world.constraints.get_mut(key) else {
                    continue;
                };
                if c.base().island_step == step {
                    continue;
                }
                let other = c.objects()[1 - slot.min(1)];
                let other_dynamic = other != rid && is_dynamic_body(&world.objects, other);
                if !dynamic && other_dynamic {
                    seeds.push(other);
                    continue;
                }
                c.base_mut().island_step = step;
                island.constraints.push(key);
                if other_dynamic && mark_body(&mut world.objects, other, step) {
                    stack.push(other);
                }
            }
        }
        if !island.bodies.is_empty() || !island.constraints.is_empty() {
            islands.push(island);
        }
    }

    let soft_bodies: Vec<Rid> = world.active_soft_bodies.iter().copied().collect();
    for rid in soft_bodies {
        if let Some(soft) = world.objects.get_mut(rid).and_then(|o| o.as_soft_body_mut()) {
            soft.island_step = step;
        }
        let mut island = Island::default();
        claim_all(world, rid, step, |key| island.constraints.push(key));
        if !island.constraints.is_empty() {
            islands.push(island);
        }
    }

    islands
}

fn pre_solve_constraints(
    world: &mut World,
    islands: &[Island],
    ready: &BTreeSet<ConstraintKey>,
    delta: Fix128,
) -> BTreeSet<ConstraintKey> {
    let World {
        objects,
        constraints,
        config,
        events,
        ..
    } = world;
    let mut solving = BTreeSet::new();
    for key in islands.iter().flat_map(|i| i.constraints.iter()) {
        if !ready.contains(key) {
            continue;
        }
        let Some(c) = constraints.get_mut(*key) else {
            continue;
        };
        if c.pre_solve(objects, events, config, delta) && c.is_solvable() {
            solving.insert(*key);
        }
    }
    solving
}

fn integrate_velocities(world: &mut World, broad_phase: &mut dyn BroadPhase<World>, delta: Fix128) {
    let rids: Vec<Rid> = world.active_bodies.iter().copied().collect();
    for rid in rids {
        let Some(object) = world.objects.get_mut(rid) else {
            continue;
        };
        let xf = *object.transform();
        let Some(body) = object.as_body_mut() else {
            continue;
        };
        let next = body.integrate_velocities(&xf, delta);
        let still_active = body.active;

        if let Some(next) = next {
            if object.set_transform(next).is_ok() {
                if let Some(body) = object.as_body_mut() {
                    body.update_transform_dependent(&next);
                }
                move_leaves(broad_phase, object);
                world.state_queries.insert(rid);
            }
        }
        if !still_active {
            world.active_bodies.remove(&rid);
        }
    }
}

/// Islands sleep or wake as a unit
fn check_suspend(world: &mut World, islands: &[Island], delta: Fix128) {
    let World {
        objects,
        config,
        active_bodies,
        ..
    } = world;
    for island in islands.iter().filter(|i| !i.bodies.is_empty()) {
        let mut can_sleep = true;
        for rid in &island.bodies {
            if let Some(body) = objects.get_mut(*rid).and_then(|o| o.as_body_mut()) {
                if !body.sleep_test(
                    delta,
                    config.body_linear_velocity_sleep_threshold,
                    config.body_angular_velocity_sleep_threshold,
                    config.body_time_to_sleep,
                ) {
                    can_sleep = false;
                }
            }
        }
        for rid in &island.bodies {
            if let Some(body) = objects.get_mut(*rid).and_then(|o| o.as_body_mut()) {
                body.active = !can_sleep;
            }
            if can_sleep {
                active_bodies.remove(rid);
            } else {
                active_bodies.insert(*rid);
            }
        }
    }
}

fn solve_soft_bodies(world: &mut World, broad_phase: &mut dyn BroadPhase<World>, delta: Fix128) {
    let World {
        objects,
        active_soft_bodies,
        ..
    } = world;
    for &rid in active_soft_bodies.iter() {
        let Some(soft) = objects.get_mut(rid).and_then(|o| o.as_soft_body_mut()) else {
            continue;
        };
        soft.solve_constraints(delta);
        if soft.bpid.is_valid() {
            broad_phase.move_aabb(soft.bpid, soft.aabb());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::area::Area;
    use crate::body::{Body, BodyMode};
    use crate::body_pair::BodyPair;
    use crate::collision_object::{CollisionObject, ObjectData};

    fn add_body(world: &mut World, mode: BodyMode, active: bool) -> Rid {
        let rid = world
            .objects
            .insert(CollisionObject::new(ObjectData::Body(Body::new(mode))));
        if active {
            world.active_bodies.insert(rid);
        }
        rid
    }

    fn link(world: &mut World, a: Rid, b: Rid) -> ConstraintKey {
        world.insert_constraint(Constraint::BodyPair(BodyPair::new(a, 0, b, 0)))
    }

    #[test]
    fn test_static_bodies_split_islands() {
        let mut world = World::new(SpaceConfig::default());
        let ground = add_body(&mut world, BodyMode::Static, false);
        let a = add_body(&mut world, BodyMode::Dynamic, true);
        let b = add_body(&mut world, BodyMode::Dynamic, true);
        let c = add_body(&mut world, BodyMode::Dynamic, true);
        let ga = link(&mut world, ground, a);
        let gb = link(&mut world, ground, b);
        let ac = link(&mut world, a, c);

        let islands = generate_islands(&mut world, 0);
        assert_eq!(islands.len(), 2);
        let with_a = islands.iter().find(|i| i.bodies.contains(&a)).unwrap();
        assert!(with_a.bodies.contains(&c));
        assert!(with_a.constraints.contains(&ga) && with_a.constraints.contains(&ac));
        let with_b = islands.iter().find(|i| i.bodies.contains(&b)).unwrap();
        assert_eq!(with_b.constraints, vec![gb]);
    }

    #[test]
    fn test_kinematic_seed_defers_to_dynamic_island() {
        let mut world = World::new(SpaceConfig::default());
        let k = add_body(&mut world, BodyMode::Kinematic, true);
        let d = add_body(&mut world, BodyMode::Dynamic, false);
        let kd = link(&mut world, k, d);

        let islands = generate_islands(&mut world, 0);
        assert_eq!(islands.len(), 1);
        assert_eq!(islands[0].bodies, vec![d]);
        assert_eq!(islands[0].constraints, vec![kd]);
    }

    #[test]
    fn test_each_constraint_claimed_once() {
        let mut world = World::new(SpaceConfig::default());
        let a = add_body(&mut world, BodyMode::Dynamic, true);
        let b = add_body(&mut world, BodyMode::Dynamic, true);
        link(&mut world, a, b);
        link(&mut world, b, a);
        let islands = generate_islands(&mut world, 0);
        assert_eq!(islands.len(), 1);
        assert_eq!(islands[0].constraints.len(), 2);
        assert_eq!(islands[0].bodies.len(), 2);
        // Next step starts from scratch
        assert_eq!(generate_islands(&mut world, 1).len(), 1);
    }

    fn area_object(mode: SpaceOverrideMode, gravity_y: i64, priority: i32) -> CollisionObject {
        let mut area = Area::new();
        area.gravity_override_mode = mode;
        area.gravity = Fix128::from_int(gravity_y.abs());
        area.gravity_vector = if gravity_y < 0 {
            Vec3Fix::from_int(0, -1, 0)
        } else {
            Vec3Fix::from_int(0, 1, 0)
        };
        area.priority = priority;
        CollisionObject::new(ObjectData::Area(area))
    }

    fn area_ref(area: Rid, priority: i32) -> AreaRef {
        AreaRef {
            area,
            priority,
            refcount: 1,
        }
    }

    #[test]
    fn test_override_walk() {
        let config = SpaceConfig::default().with_gravity(Vec3Fix::from_int(0, -10, 0));
        let mut objects = ObjectArena::with_key();
        let low = objects.insert(area_object(SpaceOverrideMode::Combine, -1, 0));
        let high = objects.insert(area_object(SpaceOverrideMode::Replace, -3, 5));

        // Replace on top stops the walk
        let env = resolve_overrides(&objects, &[area_ref(low, 0), area_ref(high, 5)], Vec3Fix::ZERO, &config);
        assert_eq!(env.gravity, Vec3Fix::from_int(0, -3, 0));

        // Combine alone adds to the default
        let env = resolve_overrides(&objects, &[area_ref(low, 0)], Vec3Fix::ZERO, &config);
        assert_eq!(env.gravity, Vec3Fix::from_int(0, -11, 0));

        // No areas: defaults
        let env = resolve_overrides(&objects, &[], Vec3Fix::ZERO, &config);
        assert_eq!(env.gravity, config.default_gravity);
        assert_eq!(env.linear_damp, config.default_linear_damp);
    }

    #[test]
    fn test_replace_combine_keeps_walking() {
        let config = SpaceConfig::default().with_gravity(Vec3Fix::ZERO);
        let mut objects = ObjectArena::with_key();
        let low = objects.insert(area_object(SpaceOverrideMode::Combine, -2, 0));
        let mid = objects.insert(area_object(SpaceOverrideMode::ReplaceCombine, -4, 1));
        let high = objects.insert(area_object(SpaceOverrideMode::Combine, 1, 2));
        let areas = [area_ref(low, 0), area_ref(mid, 1), area_ref(high, 2)];
        let env = resolve_overrides(&objects, &areas, Vec3Fix::ZERO, &config);
        // high adds +1, mid discards it and sets -4, low adds -2
        assert_eq!(env.gravity, Vec3Fix::from_int(0, -6, 0));
    }

    #[test]
    fn test_new_step_is_empty() {
        let step = Step::new(0).unwrap();
        assert_eq!(step.island_count(), 0);
        assert_eq!(*step.timings(), StepTimings::default());
    }
}
