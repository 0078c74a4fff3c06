//! Body Pairs
//!
//! Persistent contact manifold between two rigid bodies with a sequential
//! impulse solver.
//!
//! # Pipeline
//!
//! - `setup`: filter (layers, exceptions, modes), drop stale contacts, run
//!   the narrow phase. New points inherit the accumulated impulses of an old
//!   point within `contact_recycle_radius`; when the manifold is full the
//!   shallowest point is replaced.
//! - `pre_solve`: report contacts, compute effective masses, bias and
//!   restitution targets, warm start. Fast bodies with continuous collision
//!   detection get a ray test here when the shapes did not touch.
//! - `solve`: split-impulse bias pass (angular correction capped at
//!   `MAX_BIAS_ROTATION` per step), normal impulse, then friction along two
//!   tangents clamped to the Coulomb cone.
//!
//! Contact points are kept relative to body A's origin so large world
//! coordinates do not eat precision.
//!
//! Author: Moroya Sakamoto

use crate::body::{Body, BodyMode, Contact};
use crate::collision_object::{CollisionObject, ObjectArena, Rid};
use crate::collision_solver::CollisionSolver;
use crate::config::SpaceConfig;
use crate::constraint::{
    effective_inv_mass, solver_mass, ConstraintBase, SolverBody, StepEvents, MAX_BIAS_ROTATION,
    MIN_VELOCITY,
};
use crate::gjk::world_supports;
use crate::math::{Fix128, Transform, Vec3Fix};
use crate::shape::ConvexSupport;

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

/// Persistent points per pair
pub const MAX_CONTACTS: usize = 4;

#[derive(Clone, Copy, Debug, Default)]
struct PairContact {
    /// Point on A in A's basis, relative to A's origin
    local_a: Vec3Fix,
    /// Point on B in B's basis, relative to B's origin
    local_b: Vec3Fix,
    /// From A toward B
    normal: Vec3Fix,
    depth: Fix128,
    /// Offsets from the centers of mass, world orientation
    ra: Vec3Fix,
    rb: Vec3Fix,
    tangents: [Vec3Fix; 2],
    mass_normal: Fix128,
    mass_tangent: [Fix128; 2],
    bias: Fix128,
    bounce: Fix128,
    acc_normal_impulse: Fix128,
    acc_tangent_impulse: [Fix128; 2],
    acc_bias_impulse: Fix128,
    acc_bias_impulse_center_of_mass: Fix128,
    /// Net impulse applied to A, reported to the host
    acc_impulse: Vec3Fix,
    active: bool,
    reused: bool,
}

/// Contact constraint between two bodies; objects are `[a, b]`
#[derive(Clone, Debug)]
pub struct BodyPair {
    pub(crate) base: ConstraintBase,
    shape_a: usize,
    shape_b: usize,
    contacts: Vec<PairContact>,
    sep_axis: Vec3Fix,
    /// B's origin relative to A's origin
    offset_b: Vec3Fix,
    collided: bool,
    check_ccd: bool,
    collide_a: bool,
    collide_b: bool,
    report_contacts_only: bool,
    friction: Fix128,
}

/// Frame data needed while matching new contacts against old ones
struct Frames {
    a: Transform,
    b: Transform,
    offset_b: Vec3Fix,
    recycle_radius_sq: Fix128,
}

impl Frames {
    fn depth(&self, c: &PairContact) -> Fix128 {
        let (ga, gb) = self.globals(c);
        (ga - gb).dot(c.normal)
    }

    /// Points relative to A's origin, world orientation
    fn globals(&self, c: &PairContact) -> (Vec3Fix, Vec3Fix) {
        (
            self.a.basis_xform(c.local_a),
            self.b.basis_xform(c.local_b) + self.offset_b,
        )
    }
}

fn combine_bounce(a: &Body, b: &Body) -> Fix128 {
    (a.bounce + b.bounce).clamp(Fix128::ZERO, Fix128::ONE)
}

fn combine_friction(a: &Body, b: &Body) -> Fix128 {
    a.friction.min(b.friction).abs()
}

impl BodyPair {
    pub(crate) fn new(a: Rid, shape_a: usize, b: Rid, shape_b: usize) -> Self {
        Self {
            base: ConstraintBase::new(a, b),
            shape_a,
            shape_b,
            contacts: Vec::with_capacity(MAX_CONTACTS),
            sep_axis: Vec3Fix::ZERO,
            offset_b: Vec3Fix::ZERO,
            collided: false,
            check_ccd: false,
            collide_a: false,
            collide_b: false,
            report_contacts_only: false,
            friction: Fix128::ZERO,
        }
    }

    #[inline]
    pub fn is_colliding(&self) -> bool {
        self.collided
    }

    #[inline]
    pub fn contact_count(&self) -> usize {
        self.contacts.len()
    }

    /// Shape indices on A and B
    #[inline]
    pub fn shapes(&self) -> (usize, usize) {
        (self.shape_a, self.shape_b)
    }

    /// Drop points that were not refreshed or drifted apart
    fn validate_contacts(&mut self, frames: &Frames, max_separation: Fix128) {
        let max_sep_sq = max_separation * max_separation;
        self.contacts.retain_mut(|c| {
            if !c.reused {
                return false;
            }
            c.reused = false;
            let (ga, gb) = frames.globals(c);
            let depth = (ga - gb).dot(c.normal);
            depth >= -max_separation && (gb + c.normal * depth - ga).length_squared() <= max_sep_sq
        });
    }

    fn contact_added(contacts: &mut Vec<PairContact>, frames: &Frames, point_a: Vec3Fix, point_b: Vec3Fix) {
        let mut contact = PairContact {
            local_a: frames.a.basis_xform_inv(point_a),
            local_b: frames.b.basis_xform_inv(point_b - frames.offset_b),
            normal: (point_a - point_b).normalize(),
            reused: true,
            ..PairContact::default()
        };
        if contact.normal.is_zero() {
            return;
        }

        for c in contacts.iter_mut() {
            if c.local_a.distance_squared_to(contact.local_a) < frames.recycle_radius_sq
                && c.local_b.distance_squared_to(contact.local_b) < frames.recycle_radius_sq
            {
                contact.acc_normal_impulse = c.acc_normal_impulse;
                contact.acc_bias_impulse = c.acc_bias_impulse;
                contact.acc_bias_impulse_center_of_mass = c.acc_bias_impulse_center_of_mass;
                contact.acc_tangent_impulse = c.acc_tangent_impulse;
                *c = contact;
                return;
            }
        }

        if contacts.len() < MAX_CONTACTS {
            contacts.push(contact);
            return;
        }

        // Full: replace the shallowest point if the newcomer is deeper
        let mut min_depth = frames.depth(&contact);
        let mut least_deep = None;
        for (i, c) in contacts.iter().enumerate() {
            let d = frames.depth(c);
            if d < min_depth {
                min_depth = d;
                least_deep = Some(i);
            }
        }
        if let Some(i) = least_deep {
            contacts[i] = contact;
        }
    }

    pub(crate) fn setup(&mut self, objects: &ObjectArena, config: &SpaceConfig, _delta: Fix128) -> bool {
        let [a, b] = *self.base.objects();
        let (Some(oa), Some(ob)) = (objects.get(a), objects.get(b)) else {
            self.collided = false;
            return false;
        };
        let (Some(ba), Some(bb)) = (oa.as_body(), ob.as_body()) else {
            self.collided = false;
            return false;
        };

        if !oa.interacts_with(ob) || ba.has_exception(b) || bb.has_exception(a) {
            self.collided = false;
            return false;
        }

        self.collide_a = ba.mode().is_dynamic() && oa.collides_with(ob);
        self.collide_b = bb.mode().is_dynamic() && ob.collides_with(oa);
        self.report_contacts_only = false;
        if !self.collide_a && !self.collide_b {
            if ba.can_report_contacts() || bb.can_report_contacts() {
                self.report_contacts_only = true;
            } else {
                self.collided = false;
                return false;
            }
        }

        let (Ok(sa), Ok(sb)) = (oa.shape(self.shape_a), ob.shape(self.shape_b)) else {
            self.collided = false;
            return false;
        };
        if sa.disabled || sb.disabled {
            self.collided = false;
            return false;
        }

        let origin_a = oa.transform().origin;
        self.offset_b = ob.transform().origin - origin_a;
        let frames = Frames {
            a: Transform::new(oa.transform().basis, Vec3Fix::ZERO),
            b: Transform::new(ob.transform().basis, self.offset_b),
            offset_b: self.offset_b,
            recycle_radius_sq: config.contact_recycle_radius * config.contact_recycle_radius,
        };
        self.validate_contacts(&frames, config.contact_max_separation);

        let xf_a = frames.a.mul(&sa.xform);
        let xf_b = frames.b.mul(&sb.xform);
        let contacts = &mut self.contacts;
        let mut sink = |pa: Vec3Fix, pb: Vec3Fix| Self::contact_added(contacts, &frames, pa, pb);
        self.collided = CollisionSolver::solve_static(
            &sa.shape,
            &xf_a,
            &sb.shape,
            &xf_b,
            Some(&mut sink),
            Some(&mut self.sep_axis),
            Fix128::ZERO,
            Fix128::ZERO,
        );

        if !self.collided {
            self.check_ccd = (ba.continuous_cd && self.collide_a) || (bb.continuous_cd && self.collide_b);
            return self.check_ccd;
        }
        true
    }

    pub(crate) fn pre_solve(
        &mut self,
        objects: &mut ObjectArena,
        events: &mut StepEvents,
        config: &SpaceConfig,
        delta: Fix128,
    ) -> bool {
        let [a, b] = *self.base.objects();
        let Some([oa, ob]) = objects.get_disjoint_mut([a, b]) else {
            return false;
        };

        if !self.collided {
            if self.check_ccd {
                self.check_ccd = false;
                self.run_ccd(oa, ob, delta);
            }
            return false;
        }

        let bias_factor = self.contact_bias(oa, ob, config);
        let max_penetration = config.contact_max_allowed_penetration;
        let inv_dt = Fix128::ONE / delta;
        let origin_a = oa.transform().origin;
        let basis_a = oa.transform().basis;
        let basis_b = ob.transform().basis;
        let (inv_mass_a, inv_inertia_a) = solver_mass(oa);
        let (inv_mass_b, inv_inertia_b) = solver_mass(ob);
        let (instance_a, instance_b) = (oa.instance_id, ob.instance_id);
        let (Some(ba), Some(bb)) = (oa.as_body_mut(), ob.as_body_mut()) else {
            return false;
        };

        let bounce = combine_bounce(ba, bb);
        self.friction = combine_friction(ba, bb);
        let mut do_process = false;

        for c in self.contacts.iter_mut() {
            c.active = false;
            let global_a = basis_a.mul_vec(c.local_a);
            let global_b = basis_b.mul_vec(c.local_b) + self.offset_b;
            let depth = c.normal.dot(global_a - global_b);
            if !depth.is_positive() {
                continue;
            }

            events.add_debug_contact(global_a + origin_a);
            events.add_debug_contact(global_b + origin_a);

            c.ra = global_a - ba.center_of_mass();
            c.rb = global_b - bb.center_of_mass() - self.offset_b;

            if ba.can_report_contacts() || bb.can_report_contacts() {
                let vel_a = ba.velocity_at(global_a);
                let vel_b = bb.velocity_at(global_b - self.offset_b);
                ba.add_contact(Contact {
                    local_pos: global_a,
                    local_normal: -c.normal,
                    depth,
                    local_shape: self.shape_a,
                    local_velocity_at_pos: vel_a,
                    collider_pos: global_b + origin_a,
                    collider_shape: self.shape_b,
                    collider_instance_id: instance_b,
                    collider: b,
                    collider_velocity_at_pos: vel_b,
                    impulse: c.acc_impulse,
                });
                bb.add_contact(Contact {
                    local_pos: global_b - self.offset_b,
                    local_normal: c.normal,
                    depth,
                    local_shape: self.shape_b,
                    local_velocity_at_pos: vel_b,
                    collider_pos: global_a + origin_a,
                    collider_shape: self.shape_a,
                    collider_instance_id: instance_a,
                    collider: a,
                    collider_velocity_at_pos: vel_a,
                    impulse: -c.acc_impulse,
                });
            }

            if self.report_contacts_only {
                continue;
            }

            c.active = true;
            do_process = true;

            let k = effective_inv_mass(inv_mass_a, &inv_inertia_a, c.ra, inv_mass_b, &inv_inertia_b, c.rb, c.normal);
            c.mass_normal = if k.is_zero() { Fix128::ZERO } else { Fix128::ONE / k };
            let t0 = c.normal.any_perpendicular().normalize();
            c.tangents = [t0, c.normal.cross(t0)];
            for i in 0..2 {
                let kt = effective_inv_mass(inv_mass_a, &inv_inertia_a, c.ra, inv_mass_b, &inv_inertia_b, c.rb, c.tangents[i]);
                c.mass_tangent[i] = if kt.is_zero() { Fix128::ZERO } else { Fix128::ONE / kt };
            }
            c.bias = -bias_factor * inv_dt * (-depth + max_penetration).min(Fix128::ZERO);
            c.depth = depth;

            // Warm start
            let j = c.normal * c.acc_normal_impulse
                + c.tangents[0] * c.acc_tangent_impulse[0]
                + c.tangents[1] * c.acc_tangent_impulse[1];
            if self.collide_a {
                ba.apply_impulse(-j, c.ra + ba.center_of_mass());
            }
            if self.collide_b {
                bb.apply_impulse(j, c.rb + bb.center_of_mass());
            }
            c.acc_impulse = -j;

            c.bounce = Fix128::ZERO;
            if !bounce.is_zero() {
                let va = ba.prev_linear_velocity + ba.prev_angular_velocity.cross(c.ra);
                let vb = bb.prev_linear_velocity + bb.prev_angular_velocity.cross(c.rb);
                c.bounce = bounce * (vb - va).dot(c.normal);
            }
        }

        if self.report_contacts_only {
            self.collided = false;
        }
        do_process
    }

    /// Bias factor from the shapes' custom biases, falling back to the space default
    fn contact_bias(&self, oa: &CollisionObject, ob: &CollisionObject, config: &SpaceConfig) -> Fix128 {
        let bias_of = |o: &CollisionObject, i: usize| o.shape(i).map_or(Fix128::ZERO, |s| s.shape.custom_bias);
        let (ba, bb) = (bias_of(oa, self.shape_a), bias_of(ob, self.shape_b));
        match (ba.is_zero(), bb.is_zero()) {
            (true, true) => config.contact_default_bias,
            (true, false) => bb,
            (false, true) => ba,
            (false, false) => (ba + bb).half(),
        }
    }

    fn run_ccd(&self, oa: &mut CollisionObject, ob: &mut CollisionObject, delta: Fix128) {
        let ccd_a = self.collide_a && oa.as_body().map_or(false, |b| b.continuous_cd);
        let ccd_b = self.collide_b && ob.as_body().map_or(false, |b| b.continuous_cd);
        if ccd_a {
            clamp_fast_motion(oa, self.shape_a, ob, self.shape_b, delta);
        }
        if ccd_b {
            clamp_fast_motion(ob, self.shape_b, oa, self.shape_a, delta);
        }
    }

    pub(crate) fn solve(&mut self, a: &mut SolverBody, b: &mut SolverBody, delta: Fix128) {
        if !self.collided {
            return;
        }
        let max_bias_av = MAX_BIAS_ROTATION / delta;
        let inv_mass_sum = a.inv_mass + b.inv_mass;
        let friction = self.friction;

        for c in self.contacts.iter_mut() {
            if !c.active {
                continue;
            }
            c.active = false;

            // Bias
            let dbv = b.biased_velocity_at(c.rb) - a.biased_velocity_at(c.ra);
            let vbn = dbv.dot(c.normal);
            if (-vbn + c.bias).abs() > MIN_VELOCITY {
                let jbn = (-vbn + c.bias) * c.mass_normal;
                let old = c.acc_bias_impulse;
                c.acc_bias_impulse = (old + jbn).max(Fix128::ZERO);
                let jb = c.normal * (c.acc_bias_impulse - old);
                if self.collide_a {
                    a.apply_bias_impulse(-jb, c.ra, max_bias_av);
                }
                if self.collide_b {
                    b.apply_bias_impulse(jb, c.rb, max_bias_av);
                }

                let dbv = b.biased_velocity_at(c.rb) - a.biased_velocity_at(c.ra);
                let vbn = dbv.dot(c.normal);
                if (-vbn + c.bias).abs() > MIN_VELOCITY && !inv_mass_sum.is_zero() {
                    let jbn_com = (-vbn + c.bias) / inv_mass_sum;
                    let old_com = c.acc_bias_impulse_center_of_mass;
                    c.acc_bias_impulse_center_of_mass = (old_com + jbn_com).max(Fix128::ZERO);
                    let jb_com = c.normal * (c.acc_bias_impulse_center_of_mass - old_com);
                    if self.collide_a {
                        a.apply_bias_impulse(-jb_com, Vec3Fix::ZERO, Fix128::ZERO);
                    }
                    if self.collide_b {
                        b.apply_bias_impulse(jb_com, Vec3Fix::ZERO, Fix128::ZERO);
                    }
                }
                c.active = true;
            }

            // Normal
            let dv = b.velocity_at(c.rb) - a.velocity_at(c.ra);
            let vn = dv.dot(c.normal);
            if vn.abs() > MIN_VELOCITY {
                let jn = -(c.bounce + vn) * c.mass_normal;
                let old = c.acc_normal_impulse;
                c.acc_normal_impulse = (old + jn).max(Fix128::ZERO);
                let j = c.normal * (c.acc_normal_impulse - old);
                if self.collide_a {
                    a.apply_impulse(-j, c.ra);
                }
                if self.collide_b {
                    b.apply_impulse(j, c.rb);
                }
                c.acc_impulse -= j;
                c.active = true;
            }

            // Friction
            let dv = b.velocity_at(c.rb) - a.velocity_at(c.ra);
            let tangential = dv - c.normal * c.normal.dot(dv);
            if tangential.length() > MIN_VELOCITY {
                let old = c.acc_tangent_impulse;
                let mut acc = [Fix128::ZERO; 2];
                for i in 0..2 {
                    let vt = dv.dot(c.tangents[i]);
                    acc[i] = old[i] - vt * c.mass_tangent[i];
                }
                let len = (acc[0] * acc[0] + acc[1] * acc[1]).sqrt();
                let max = c.acc_normal_impulse * friction;
                if len > Fix128::CMP_EPSILON && len > max {
                    let s = max / len;
                    acc = [acc[0] * s, acc[1] * s];
                }
                c.acc_tangent_impulse = acc;
                let jt = c.tangents[0] * (acc[0] - old[0]) + c.tangents[1] * (acc[1] - old[1]);
                if self.collide_a {
                    a.apply_impulse(-jt, c.ra);
                }
                if self.collide_b {
                    b.apply_impulse(jt, c.rb);
                }
                c.acc_impulse -= jt;
                c.active = true;
            }
        }
    }
}

/// Slow a fast body down so it lands just inside the other shape next step
///
/// Returns whether the velocity was changed.
fn clamp_fast_motion(
    mover: &mut CollisionObject,
    mover_shape: usize,
    other: &CollisionObject,
    other_shape: usize,
    delta: Fix128,
) -> bool {
    let Some(body) = mover.as_body() else {
        return false;
    };
    let motion = body.linear_velocity() * delta;
    let mlen = motion.length();
    if mlen < Fix128::CMP_EPSILON {
        return false;
    }
    let mnormal = motion / mlen;
    let (Ok(sa), Ok(sb)) = (mover.shape(mover_shape), other.shape(other_shape)) else {
        return false;
    };
    if !sa.shape.is_convex() {
        return false;
    }

    let xf_a = mover.shape_transform(mover_shape);
    let max = xf_a.xform(sa.shape.support(xf_a.basis_xform_inv(mnormal))).dot(mnormal);
    let min = xf_a.xform(sa.shape.support(xf_a.basis_xform_inv(-mnormal))).dot(mnormal);
    let extent = max - min;
    // Moving less than a third of its own extent cannot tunnel
    if mlen <= extent * Fix128::from_ratio(3, 10) {
        return false;
    }

    let other_velocity = other.as_body().map_or(Vec3Fix::ZERO, |b| b.linear_velocity());
    let predicted_b = other.shape_transform(other_shape).translated(other_velocity * delta);
    let inv_b = predicted_b.affine_inverse();

    let feature = world_supports(&*sa.shape, &xf_a, mnormal);
    let mut best: Option<(Fix128, Vec3Fix, Vec3Fix)> = None;
    for from in feature.points() {
        let to = *from + motion;
        let local_from = inv_b.xform(*from - motion * Fix128::from_ratio(1, 10));
        let local_to = inv_b.xform(to);
        if let Some(hit) = sb.shape.intersect_segment(local_from, local_to) {
            let len = local_from.distance_to(hit.point);
            if best.map_or(true, |(l, _, _)| len < l) {
                best = Some((len, *from, hit.point));
            }
        }
    }
    let Some((_, support, local_hit)) = best else {
        return false;
    };

    let hit = predicted_b.xform(local_hit);
    let new_len = hit.distance_to(support) + extent * Fix128::from_ratio(1, 100);
    if let Some(b) = mover.as_body_mut() {
        if b.mode() != BodyMode::Static {
            b.set_linear_velocity(mnormal * (new_len / delta));
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision_object::ObjectData;
    use crate::constraint::SolverBody;
    use crate::shape::Shape;
    use alloc::sync::Arc;

    fn body_object(mode: BodyMode, half: i64, origin: Vec3Fix) -> CollisionObject {
        let mut o = CollisionObject::new(ObjectData::Body(Body::new(mode)));
        o.add_shape(
            Arc::new(Shape::cuboid(Vec3Fix::from_int(half, half, half))),
            Transform::IDENTITY,
            false,
        );
        o.set_transform(Transform::from_origin(origin)).unwrap();
        let shapes = o.shapes.clone();
        let xf = *o.transform();
        if let Some(b) = o.as_body_mut() {
            b.update_mass_properties(&shapes, &xf);
        }
        o
    }

    fn stacked(depth_num: i64) -> (ObjectArena, Rid, Rid) {
        let mut objects = ObjectArena::with_key();
        let ground = objects.insert(body_object(BodyMode::Static, 1, Vec3Fix::ZERO));
        let y = Fix128::from_int(2) - Fix128::from_ratio(depth_num, 100);
        let top = objects.insert(body_object(
            BodyMode::Dynamic,
            1,
            Vec3Fix::new(Fix128::ZERO, y, Fix128::ZERO),
        ));
        (objects, ground, top)
    }

    #[test]
    fn test_setup_builds_manifold() {
        let (objects, ground, top) = stacked(5);
        let cfg = SpaceConfig::default();
        let mut pair = BodyPair::new(ground, 0, top, 0);
        assert!(pair.setup(&objects, &cfg, Fix128::from_ratio(1, 60)));
        assert!(pair.is_colliding());
        assert_eq!(pair.contact_count(), MAX_CONTACTS);
    }

    #[test]
    fn test_exception_filters_pair() {
        let (mut objects, ground, top) = stacked(5);
        objects[top].as_body_mut().unwrap().add_collision_exception(ground);
        let mut pair = BodyPair::new(ground, 0, top, 0);
        assert!(!pair.setup(&objects, &SpaceConfig::default(), Fix128::ONE));
        assert!(!pair.is_colliding());
    }

    #[test]
    fn test_static_pair_without_reporting_skipped() {
        let mut objects = ObjectArena::with_key();
        let a = objects.insert(body_object(BodyMode::Static, 1, Vec3Fix::ZERO));
        let b = objects.insert(body_object(BodyMode::Kinematic, 1, Vec3Fix::from_int(1, 0, 0)));
        let mut pair = BodyPair::new(a, 0, b, 0);
        assert!(!pair.setup(&objects, &SpaceConfig::default(), Fix128::ONE));

        objects[b].as_body_mut().unwrap().set_max_contacts_reported(4);
        assert!(pair.setup(&objects, &SpaceConfig::default(), Fix128::ONE));
        let mut events = StepEvents::default();
        let dt = Fix128::from_ratio(1, 60);
        assert!(!pair.pre_solve(&mut objects, &mut events, &SpaceConfig::default(), dt));
        assert!(objects[b].as_body().unwrap().contact_count() > 0);
    }

    #[test]
    fn test_solve_stops_approach() {
        let (mut objects, ground, top) = stacked(5);
        objects[top]
            .as_body_mut()
            .unwrap()
            .set_linear_velocity(Vec3Fix::from_int(0, -2, 0));
        let cfg = SpaceConfig::default();
        let dt = Fix128::from_ratio(1, 60);
        let mut pair = BodyPair::new(ground, 0, top, 0);
        assert!(pair.setup(&objects, &cfg, dt));
        let mut events = StepEvents::default();
        assert!(pair.pre_solve(&mut objects, &mut events, &cfg, dt));

        let mut a = SolverBody::from_object(ground, &objects[ground]);
        let mut b = SolverBody::from_object(top, &objects[top]);
        for _ in 0..16 {
            pair.solve(&mut a, &mut b, dt);
        }
        assert!(b.linear_velocity.y > Fix128::from_ratio(-1, 100));
        // Penetration is pushed out through the bias channel
        assert!(b.biased_linear_velocity.y.is_positive());
        assert!(a.linear_velocity.is_zero());
    }

    #[test]
    fn test_contacts_recycled_between_steps() {
        let (objects, ground, top) = stacked(5);
        let cfg = SpaceConfig::default();
        let mut pair = BodyPair::new(ground, 0, top, 0);
        pair.setup(&objects, &cfg, Fix128::ONE);
        pair.contacts[0].acc_normal_impulse = Fix128::from_int(3);
        pair.setup(&objects, &cfg, Fix128::ONE);
        assert_eq!(pair.contact_count(), MAX_CONTACTS);
        assert!(pair.contacts.iter().any(|c| c.acc_normal_impulse == Fix128::from_int(3)));
    }

    #[test]
    fn test_ccd_clamps_fast_body() {
        let mut objects = ObjectArena::with_key();
        let wall = objects.insert(body_object(BodyMode::Static, 2, Vec3Fix::from_int(10, 0, 0)));
        let mut bullet = body_object(BodyMode::Dynamic, 1, Vec3Fix::ZERO);
        bullet.as_body_mut().unwrap().set_linear_velocity(Vec3Fix::from_int(1200, 0, 0));
        let bullet = objects.insert(bullet);
        let dt = Fix128::from_ratio(1, 60);
        let Some([ob, ow]) = objects.get_disjoint_mut([bullet, wall]) else {
            panic!("missing objects");
        };
        assert!(clamp_fast_motion(ob, 0, ow, 0, dt));
        let v = objects[bullet].as_body().unwrap().linear_velocity();
        // Lands just past the wall face at x = 8 instead of 20 units further
        assert!(v.x * dt < Fix128::from_int(8));
        assert!(v.x.is_positive());
    }
}
