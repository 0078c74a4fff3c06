//! Joints
//!
//! Host-authored constraints between two bodies, solved with the contact
//! pairs inside the same island.
//!
//! # Joint Types
//!
//! - **Pin**: ball socket; each world axis is solved separately with
//!   Baumgarte position correction, velocity damping and an optional
//!   impulse clamp
//! - **DampedSpring**: spring along the anchor line; the spring impulse is
//!   applied once per step, the damping is solved iteratively
//!
//! Anchors are given in the local frame of their body.
//!
//! Author: Moroya Sakamoto

use crate::body::BodyMode;
use crate::collision_object::{ObjectArena, Rid};
use crate::config::SpaceConfig;
use crate::constraint::{effective_inv_mass, solver_mass, ConstraintBase, SolverBody};
use crate::math::{Fix128, Vec3Fix};

/// Joint type enumeration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum JointType {
    Pin,
    DampedSpring,
}

/// Pin joint parameters
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PinParam {
    /// Position correction factor
    Bias,
    Damping,
    /// Largest impulse per iteration (0 = unlimited)
    ImpulseClamp,
}

/// Damped spring parameters
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DampedSpringParam {
    RestLength,
    Stiffness,
    Damping,
}

/// Settings shared by every joint
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct JointCommon {
    /// Overrides the kind's own correction factor when positive
    pub bias: Fix128,
    /// Cap on the correction velocity (0 = none)
    pub max_bias: Fix128,
    /// Cap on the force the joint may apply (0 = none)
    pub max_force: Fix128,
    pub(crate) disable_collisions: bool,
    pub enabled: bool,
}

impl Default for JointCommon {
    fn default() -> Self {
        Self {
            bias: Fix128::ZERO,
            max_bias: Fix128::ZERO,
            max_force: Fix128::ZERO,
            disable_collisions: false,
            enabled: true,
        }
    }
}

/// Ball socket
#[derive(Clone, Copy, Debug)]
pub struct PinJoint {
    pub local_a: Vec3Fix,
    pub local_b: Vec3Fix,
    pub tau: Fix128,
    pub damping: Fix128,
    pub impulse_clamp: Fix128,
    applied_impulse: Fix128,
    // Per step
    ra: Vec3Fix,
    rb: Vec3Fix,
    /// World pivot of A minus world pivot of B
    offset: Vec3Fix,
    jac_inv: [Fix128; 3],
    effective_tau: Fix128,
}

impl PinJoint {
    fn new(local_a: Vec3Fix, local_b: Vec3Fix) -> Self {
        Self {
            local_a,
            local_b,
            tau: Fix128::from_ratio(3, 10),
            damping: Fix128::ONE,
            impulse_clamp: Fix128::ZERO,
            applied_impulse: Fix128::ZERO,
            ra: Vec3Fix::ZERO,
            rb: Vec3Fix::ZERO,
            offset: Vec3Fix::ZERO,
            jac_inv: [Fix128::ZERO; 3],
            effective_tau: Fix128::ZERO,
        }
    }

    /// Accumulated impulse of the last step
    #[inline]
    pub fn applied_impulse(&self) -> Fix128 {
        self.applied_impulse
    }
}

/// Spring along the line between two anchors
#[derive(Clone, Copy, Debug)]
pub struct DampedSpringJoint {
    pub anchor_a: Vec3Fix,
    pub anchor_b: Vec3Fix,
    pub rest_length: Fix128,
    pub stiffness: Fix128,
    pub damping: Fix128,
    // Per step
    ra: Vec3Fix,
    rb: Vec3Fix,
    n: Vec3Fix,
    n_mass: Fix128,
    target_vrn: Fix128,
    v_coef: Fix128,
    spring_impulse: Vec3Fix,
}

impl DampedSpringJoint {
    fn new(anchor_a: Vec3Fix, anchor_b: Vec3Fix, rest_length: Fix128) -> Self {
        Self {
            anchor_a,
            anchor_b,
            rest_length,
            stiffness: Fix128::from_int(20),
            damping: Fix128::ONE,
            ra: Vec3Fix::ZERO,
            rb: Vec3Fix::ZERO,
            n: Vec3Fix::ZERO,
            n_mass: Fix128::ZERO,
            target_vrn: Fix128::ZERO,
            v_coef: Fix128::ZERO,
            spring_impulse: Vec3Fix::ZERO,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub enum JointKind {
    Pin(PinJoint),
    DampedSpring(DampedSpringJoint),
}

/// A joint between bodies `[a, b]`
#[derive(Clone, Debug)]
pub struct Joint {
    pub(crate) base: ConstraintBase,
    pub common: JointCommon,
    kind: JointKind,
}

/// `e^-x` for `x >= 0`, by halving the argument into Taylor range and squaring back
pub(crate) fn exp_neg(x: Fix128) -> Fix128 {
    if !x.is_positive() {
        return Fix128::ONE;
    }
    if x > Fix128::from_int(40) {
        return Fix128::ZERO;
    }
    let mut y = x;
    let mut squarings = 0;
    while y > Fix128::from_ratio(1, 8) {
        y = y.half();
        squarings += 1;
    }
    // e^-y to sixth order
    let mut term = Fix128::ONE;
    let mut sum = Fix128::ONE;
    for i in 1..=6 {
        term = -term * y / Fix128::from_int(i);
        sum += term;
    }
    for _ in 0..squarings {
        sum = sum * sum;
    }
    sum
}

impl Joint {
    pub fn pin(a: Rid, local_a: Vec3Fix, b: Rid, local_b: Vec3Fix) -> Self {
        Self {
            base: ConstraintBase::new(a, b),
            common: JointCommon::default(),
            kind: JointKind::Pin(PinJoint::new(local_a, local_b)),
        }
    }

    pub fn damped_spring(a: Rid, anchor_a: Vec3Fix, b: Rid, anchor_b: Vec3Fix, rest_length: Fix128) -> Self {
        Self {
            base: ConstraintBase::new(a, b),
            common: JointCommon::default(),
            kind: JointKind::DampedSpring(DampedSpringJoint::new(anchor_a, anchor_b, rest_length)),
        }
    }

    pub fn joint_type(&self) -> JointType {
        match self.kind {
            JointKind::Pin(_) => JointType::Pin,
            JointKind::DampedSpring(_) => JointType::DampedSpring,
        }
    }

    pub fn kind(&self) -> &JointKind {
        &self.kind
    }

    #[inline]
    pub fn bodies(&self) -> (Rid, Rid) {
        let [a, b] = *self.base.objects();
        (a, b)
    }

    #[inline]
    pub fn disables_collisions(&self) -> bool {
        self.common.disable_collisions
    }

    pub fn pin_param(&self, param: PinParam) -> Fix128 {
        let JointKind::Pin(p) = &self.kind else {
            log::error!("not a pin joint");
            return Fix128::ZERO;
        };
        match param {
            PinParam::Bias => p.tau,
            PinParam::Damping => p.damping,
            PinParam::ImpulseClamp => p.impulse_clamp,
        }
    }

    pub fn set_pin_param(&mut self, param: PinParam, value: Fix128) {
        let JointKind::Pin(p) = &mut self.kind else {
            log::error!("not a pin joint");
            return;
        };
        match param {
            PinParam::Bias => p.tau = value,
            PinParam::Damping => p.damping = value,
            PinParam::ImpulseClamp => p.impulse_clamp = value,
        }
    }

    /// Local pivots of a pin joint
    pub fn set_pin_pivots(&mut self, local_a: Vec3Fix, local_b: Vec3Fix) {
        match &mut self.kind {
            JointKind::Pin(p) => {
                p.local_a = local_a;
                p.local_b = local_b;
            }
            JointKind::DampedSpring(_) => log::error!("not a pin joint"),
        }
    }

    pub fn damped_spring_param(&self, param: DampedSpringParam) -> Fix128 {
        let JointKind::DampedSpring(s) = &self.kind else {
            log::error!("not a damped spring joint");
            return Fix128::ZERO;
        };
        match param {
            DampedSpringParam::RestLength => s.rest_length,
            DampedSpringParam::Stiffness => s.stiffness,
            DampedSpringParam::Damping => s.damping,
        }
    }

    pub fn set_damped_spring_param(&mut self, param: DampedSpringParam, value: Fix128) {
        let JointKind::DampedSpring(s) = &mut self.kind else {
            log::error!("not a damped spring joint");
            return;
        };
        match param {
            DampedSpringParam::RestLength => s.rest_length = value.max(Fix128::ZERO),
            DampedSpringParam::Stiffness => s.stiffness = value,
            DampedSpringParam::Damping => s.damping = value,
        }
    }

    /// Add or drop the mutual collision exception between the two bodies
    pub(crate) fn set_disable_collisions(&mut self, objects: &mut ObjectArena, disable: bool) {
        self.common.disable_collisions = disable;
        let [a, b] = *self.base.objects();
        for (this, other) in [(a, b), (b, a)] {
            if let Some(body) = objects.get_mut(this).and_then(|o| o.as_body_mut()) {
                if disable {
                    body.add_collision_exception(other);
                } else {
                    body.remove_collision_exception(other);
                }
            }
        }
    }

    pub(crate) fn setup(&mut self, objects: &ObjectArena, config: &SpaceConfig, delta: Fix128) -> bool {
        if !self.common.enabled {
            return false;
        }
        let [a, b] = *self.base.objects();
        let (Some(oa), Some(ob)) = (objects.get(a), objects.get(b)) else {
            return false;
        };
        let (Some(ba), Some(bb)) = (oa.as_body(), ob.as_body()) else {
            return false;
        };
        if !ba.mode().is_dynamic() && !bb.mode().is_dynamic() {
            return false;
        }

        let (inv_mass_a, inv_inertia_a) = solver_mass(oa);
        let (inv_mass_b, inv_inertia_b) = solver_mass(ob);
        let com_a = oa.transform().origin + ba.center_of_mass();
        let com_b = ob.transform().origin + bb.center_of_mass();
        let common = self.common;

        match &mut self.kind {
            JointKind::Pin(p) => {
                let pivot_a = oa.transform().xform(p.local_a);
                let pivot_b = ob.transform().xform(p.local_b);
                p.ra = pivot_a - com_a;
                p.rb = pivot_b - com_b;
                p.offset = pivot_a - pivot_b;
                p.applied_impulse = Fix128::ZERO;
                for (i, axis) in [Vec3Fix::UNIT_X, Vec3Fix::UNIT_Y, Vec3Fix::UNIT_Z].into_iter().enumerate() {
                    let k = effective_inv_mass(inv_mass_a, &inv_inertia_a, p.ra, inv_mass_b, &inv_inertia_b, p.rb, axis);
                    p.jac_inv[i] = if k.is_zero() { Fix128::ZERO } else { Fix128::ONE / k };
                }
                p.effective_tau = if common.bias.is_positive() {
                    common.bias
                } else if p.tau.is_positive() {
                    p.tau
                } else {
                    config.constraint_default_bias
                };
            }
            JointKind::DampedSpring(s) => {
                let anchor_a = oa.transform().xform(s.anchor_a);
                let anchor_b = ob.transform().xform(s.anchor_b);
                s.ra = anchor_a - com_a;
                s.rb = anchor_b - com_b;
                let d = anchor_b - anchor_a;
                let dist = d.length();
                s.n = if dist.is_zero() { Vec3Fix::ZERO } else { d / dist };

                let k = effective_inv_mass(inv_mass_a, &inv_inertia_a, s.ra, inv_mass_b, &inv_inertia_b, s.rb, s.n);
                s.n_mass = if k.is_zero() { Fix128::ZERO } else { Fix128::ONE / k };
                s.target_vrn = Fix128::ZERO;
                s.v_coef = Fix128::ONE - exp_neg(s.damping * delta * k);

                let mut f_spring = (s.rest_length - dist) * s.stiffness;
                if common.max_force.is_positive() {
                    f_spring = f_spring.clamp(-common.max_force, common.max_force);
                }
                s.spring_impulse = s.n * (f_spring * delta);
            }
        }
        true
    }

    /// Applies the once-per-step spring impulse
    pub(crate) fn pre_solve(&mut self, objects: &mut ObjectArena) -> bool {
        let JointKind::DampedSpring(s) = &self.kind else {
            return true;
        };
        let [a, b] = *self.base.objects();
        let j = s.spring_impulse;
        for (rid, impulse, r) in [(a, -j, s.ra), (b, j, s.rb)] {
            let Some(body) = objects.get_mut(rid).and_then(|o| o.as_body_mut()) else {
                continue;
            };
            if body.mode().is_dynamic() {
                let com = body.center_of_mass();
                if body.mode() == BodyMode::DynamicLinear {
                    body.apply_central_impulse(impulse);
                } else {
                    body.apply_impulse(impulse, r + com);
                }
            }
        }
        true
    }

    pub(crate) fn solve(&mut self, a: &mut SolverBody, b: &mut SolverBody, delta: Fix128) {
        let common = self.common;
        match &mut self.kind {
            JointKind::Pin(p) => {
                let max_impulse = if common.max_force.is_positive() {
                    common.max_force * delta
                } else {
                    p.impulse_clamp
                };
                for (i, axis) in [Vec3Fix::UNIT_X, Vec3Fix::UNIT_Y, Vec3Fix::UNIT_Z].into_iter().enumerate() {
                    let rel_vel = (a.velocity_at(p.ra) - b.velocity_at(p.rb)).dot(axis);
                    let depth = -p.offset.dot(axis);
                    let mut correction = depth * p.effective_tau / delta;
                    if common.max_bias.is_positive() {
                        correction = correction.clamp(-common.max_bias, common.max_bias);
                    }
                    let mut impulse = (correction - p.damping * rel_vel) * p.jac_inv[i];
                    if max_impulse.is_positive() {
                        impulse = impulse.clamp(-max_impulse, max_impulse);
                    }
                    p.applied_impulse += impulse;
                    let j = axis * impulse;
                    a.apply_impulse(j, p.ra);
                    b.apply_impulse(-j, p.rb);
                }
            }
            JointKind::DampedSpring(s) => {
                let dv = b.velocity_at(s.rb) - a.velocity_at(s.ra);
                let vrn = s.n.dot(dv) - s.target_vrn;
                let v_damp = -vrn * s.v_coef;
                s.target_vrn = vrn + v_damp;
                let j = s.n * (v_damp * s.n_mass);
                a.apply_impulse(-j, s.ra);
                b.apply_impulse(j, s.rb);
            }
        }
    }

    pub(crate) fn on_remove(&mut self, objects: &mut ObjectArena) {
        if self.common.disable_collisions {
            self.set_disable_collisions(objects, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::Body;
    use crate::collision_object::{CollisionObject, ObjectData};
    use crate::math::Transform;
    use crate::shape::Shape;
    use alloc::sync::Arc;

    fn body(mode: BodyMode, origin: Vec3Fix) -> CollisionObject {
        let mut o = CollisionObject::new(ObjectData::Body(Body::new(mode)));
        o.add_shape(Arc::new(Shape::sphere(Fix128::HALF)), Transform::IDENTITY, false);
        o.set_transform(Transform::from_origin(origin)).unwrap();
        let shapes = o.shapes.clone();
        let xf = *o.transform();
        o.as_body_mut().unwrap().update_mass_properties(&shapes, &xf);
        o
    }

    fn dt() -> Fix128 {
        Fix128::from_ratio(1, 60)
    }

    #[test]
    fn test_exp_neg() {
        assert_eq!(exp_neg(Fix128::ZERO), Fix128::ONE);
        let e1 = exp_neg(Fix128::ONE).to_f64();
        assert!((e1 - (-1.0f64).exp()).abs() < 1e-9);
        let e5 = exp_neg(Fix128::from_int(5)).to_f64();
        assert!((e5 - (-5.0f64).exp()).abs() < 1e-9);
        assert!(exp_neg(Fix128::from_int(100)).is_zero());
    }

    #[test]
    fn test_pin_pulls_bodies_together() {
        let mut objects = ObjectArena::with_key();
        let anchor = objects.insert(body(BodyMode::Static, Vec3Fix::ZERO));
        let bob = objects.insert(body(BodyMode::Dynamic, Vec3Fix::from_int(0, -2, 0)));
        // Pivot sits at the anchor origin but one unit above the bob
        let mut joint = Joint::pin(anchor, Vec3Fix::ZERO, bob, Vec3Fix::from_int(0, 1, 0));
        assert!(joint.setup(&objects, &SpaceConfig::default(), dt()));
        assert!(joint.pre_solve(&mut objects));

        let mut a = SolverBody::from_object(anchor, &objects[anchor]);
        let mut b = SolverBody::from_object(bob, &objects[bob]);
        joint.solve(&mut a, &mut b, dt());
        assert!(b.linear_velocity.y.is_positive());
        assert!(a.linear_velocity.is_zero());
    }

    #[test]
    fn test_pin_impulse_clamp() {
        let mut objects = ObjectArena::with_key();
        let anchor = objects.insert(body(BodyMode::Static, Vec3Fix::ZERO));
        let bob = objects.insert(body(BodyMode::Dynamic, Vec3Fix::from_int(0, -5, 0)));
        let mut joint = Joint::pin(anchor, Vec3Fix::ZERO, bob, Vec3Fix::ZERO);
        joint.set_pin_param(PinParam::ImpulseClamp, Fix128::from_ratio(1, 100));
        joint.setup(&objects, &SpaceConfig::default(), dt());
        let mut a = SolverBody::from_object(anchor, &objects[anchor]);
        let mut b = SolverBody::from_object(bob, &objects[bob]);
        joint.solve(&mut a, &mut b, dt());
        let JointKind::Pin(p) = joint.kind() else {
            panic!("expected pin");
        };
        assert!(p.applied_impulse().abs() <= Fix128::from_ratio(1, 100));
    }

    #[test]
    fn test_static_pair_not_solved() {
        let mut objects = ObjectArena::with_key();
        let a = objects.insert(body(BodyMode::Static, Vec3Fix::ZERO));
        let b = objects.insert(body(BodyMode::Kinematic, Vec3Fix::from_int(1, 0, 0)));
        let mut joint = Joint::pin(a, Vec3Fix::ZERO, b, Vec3Fix::ZERO);
        assert!(!joint.setup(&objects, &SpaceConfig::default(), dt()));
        joint.common.enabled = false;
        assert!(!joint.setup(&objects, &SpaceConfig::default(), dt()));
    }

    #[test]
    fn test_stretched_spring_contracts() {
        let mut objects = ObjectArena::with_key();
        let a = objects.insert(body(BodyMode::Static, Vec3Fix::ZERO));
        let b = objects.insert(body(BodyMode::Dynamic, Vec3Fix::from_int(3, 0, 0)));
        let mut joint = Joint::damped_spring(a, Vec3Fix::ZERO, b, Vec3Fix::ZERO, Fix128::ONE);
        assert!(joint.setup(&objects, &SpaceConfig::default(), dt()));
        joint.pre_solve(&mut objects);
        // Spring impulse pulls b back toward a
        assert!(objects[b].as_body().unwrap().linear_velocity().x.is_negative());

        let mut sa = SolverBody::from_object(a, &objects[a]);
        let mut sb = SolverBody::from_object(b, &objects[b]);
        let before = sb.linear_velocity.x;
        joint.solve(&mut sa, &mut sb, dt());
        // Damping works against the motion
        assert!(sb.linear_velocity.x > before);
    }

    #[test]
    fn test_disable_collisions_exceptions() {
        let mut objects = ObjectArena::with_key();
        let a = objects.insert(body(BodyMode::Dynamic, Vec3Fix::ZERO));
        let b = objects.insert(body(BodyMode::Dynamic, Vec3Fix::from_int(1, 0, 0)));
        let mut joint = Joint::pin(a, Vec3Fix::ZERO, b, Vec3Fix::ZERO);
        joint.set_disable_collisions(&mut objects, true);
        assert!(objects[a].as_body().unwrap().has_exception(b));
        assert!(objects[b].as_body().unwrap().has_exception(a));
        joint.on_remove(&mut objects);
        assert!(!objects[a].as_body().unwrap().has_exception(b));
    }

    #[test]
    fn test_wrong_kind_params() {
        let mut ids = ObjectArena::with_key();
        let a = ids.insert(body(BodyMode::Dynamic, Vec3Fix::ZERO));
        let mut joint = Joint::pin(a, Vec3Fix::ZERO, a, Vec3Fix::ZERO);
        joint.set_damped_spring_param(DampedSpringParam::Stiffness, Fix128::ONE);
        assert!(joint.damped_spring_param(DampedSpringParam::Stiffness).is_zero());
        assert_eq!(joint.pin_param(PinParam::Bias), Fix128::from_ratio(3, 10));
        assert_eq!(joint.joint_type(), JointType::Pin);
    }
}
