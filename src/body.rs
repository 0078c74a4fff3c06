//! Rigid Bodies
//!
//! Mass properties, velocity state, force accumulators, the reported-contact
//! buffer and sleep bookkeeping of a rigid body. The body does not own its
//! transform; the surrounding [`CollisionObject`](crate::collision_object::CollisionObject)
//! does, and the integration methods take it as an argument.
//!
//! # Modes
//!
//! - **Static**: never moves, infinite mass
//! - **Kinematic**: follows a target transform, pushes dynamic bodies,
//!   never receives impulses
//! - **Dynamic**: full rigid body
//! - **DynamicLinear**: dynamic without rotation
//!
//! Author: Moroya Sakamoto

use crate::collision_object::{Rid, ShapeInstance};
use crate::math::{Fix128, Mat3Fix, Transform, Vec3Fix};

use alloc::collections::BTreeSet;

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

/// Body simulation mode
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BodyMode {
    Static,
    Kinematic,
    Dynamic,
    DynamicLinear,
}

impl BodyMode {
    /// Receives impulses from the solver
    #[inline]
    pub fn is_dynamic(self) -> bool {
        matches!(self, BodyMode::Dynamic | BodyMode::DynamicLinear)
    }
}

/// Scalar body parameters
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BodyParameter {
    Bounce,
    Friction,
    Mass,
    GravityScale,
    LinearDamp,
    AngularDamp,
}

/// How a body's own damping meets the area/space damping
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DampMode {
    /// Added to the environment's damping
    #[default]
    Combine,
    /// Replaces the environment's damping
    Replace,
}

/// Per-axis motion locks
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct AxisLocks(pub u8);

impl AxisLocks {
    pub const LINEAR_X: u8 = 1 << 0;
    pub const LINEAR_Y: u8 = 1 << 1;
    pub const LINEAR_Z: u8 = 1 << 2;
    pub const ANGULAR_X: u8 = 1 << 3;
    pub const ANGULAR_Y: u8 = 1 << 4;
    pub const ANGULAR_Z: u8 = 1 << 5;

    #[inline]
    pub fn linear(self, axis: usize) -> bool {
        self.0 & (Self::LINEAR_X << axis) != 0
    }

    #[inline]
    pub fn angular(self, axis: usize) -> bool {
        self.0 & (Self::ANGULAR_X << axis) != 0
    }
}

/// A contact kept for the host, in world orientation relative to the body origin
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Contact {
    pub local_pos: Vec3Fix,
    pub local_normal: Vec3Fix,
    pub depth: Fix128,
    pub local_shape: usize,
    pub local_velocity_at_pos: Vec3Fix,
    pub collider_pos: Vec3Fix,
    pub collider_shape: usize,
    pub collider_instance_id: Option<u64>,
    pub collider: Rid,
    pub collider_velocity_at_pos: Vec3Fix,
    pub impulse: Vec3Fix,
}

/// An overlapping area that overrides this body's environment
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct AreaRef {
    pub area: Rid,
    pub priority: i32,
    pub refcount: u32,
}

/// Environment resolved from areas and space defaults for one step
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ForceEnvironment {
    pub gravity: Vec3Fix,
    pub linear_damp: Fix128,
    pub angular_damp: Fix128,
}

/// Rigid body state
#[derive(Clone, Debug)]
pub struct Body {
    mode: BodyMode,

    pub bounce: Fix128,
    pub friction: Fix128,
    mass: Fix128,
    pub gravity_scale: Fix128,
    pub linear_damp: Fix128,
    pub angular_damp: Fix128,
    pub linear_damp_mode: DampMode,
    pub angular_damp_mode: DampMode,

    inv_mass: Fix128,
    /// Body-space inertia tensor inverse
    inv_inertia_local: Mat3Fix,
    /// World-space inertia tensor inverse
    inv_inertia_tensor: Mat3Fix,
    /// Principal moments, for reporting
    inertia: Vec3Fix,
    custom_inertia: Option<Vec3Fix>,
    center_of_mass_local: Vec3Fix,
    custom_center_of_mass: Option<Vec3Fix>,
    /// Center of mass relative to the body origin, world orientation
    center_of_mass: Vec3Fix,
    pub(crate) mass_dirty: bool,

    pub(crate) linear_velocity: Vec3Fix,
    pub(crate) angular_velocity: Vec3Fix,
    pub(crate) prev_linear_velocity: Vec3Fix,
    pub(crate) prev_angular_velocity: Vec3Fix,
    pub(crate) biased_linear_velocity: Vec3Fix,
    pub(crate) biased_angular_velocity: Vec3Fix,
    pub constant_linear_velocity: Vec3Fix,
    pub constant_angular_velocity: Vec3Fix,

    applied_force: Vec3Fix,
    applied_torque: Vec3Fix,
    constant_force: Vec3Fix,
    constant_torque: Vec3Fix,

    pub(crate) total_gravity: Vec3Fix,
    pub(crate) total_linear_damp: Fix128,
    pub(crate) total_angular_damp: Fix128,

    /// Kinematic target
    pub(crate) new_transform: Transform,
    pub(crate) first_time_kinematic: bool,

    pub axis_locks: AxisLocks,
    pub omit_force_integration: bool,
    pub continuous_cd: bool,

    pub(crate) active: bool,
    pub can_sleep: bool,
    still_time: Fix128,

    contacts: Vec<Contact>,
    max_contacts_reported: usize,

    pub(crate) exceptions: BTreeSet<Rid>,
    pub(crate) areas: Vec<AreaRef>,
    pub(crate) island_step: u64,
}

impl Body {
    pub fn new(mode: BodyMode) -> Self {
        let mut body = Self {
            mode,
            bounce: Fix128::ZERO,
            friction: Fix128::ONE,
            mass: Fix128::ONE,
            gravity_scale: Fix128::ONE,
            linear_damp: Fix128::ZERO,
            angular_damp: Fix128::ZERO,
            linear_damp_mode: DampMode::Combine,
            angular_damp_mode: DampMode::Combine,
            inv_mass: Fix128::ONE,
            inv_inertia_local: Mat3Fix::IDENTITY,
            inv_inertia_tensor: Mat3Fix::IDENTITY,
            inertia: Vec3Fix::from_int(1, 1, 1),
            custom_inertia: None,
            center_of_mass_local: Vec3Fix::ZERO,
            custom_center_of_mass: None,
            center_of_mass: Vec3Fix::ZERO,
            mass_dirty: true,
            linear_velocity: Vec3Fix::ZERO,
            angular_velocity: Vec3Fix::ZERO,
            prev_linear_velocity: Vec3Fix::ZERO,
            prev_angular_velocity: Vec3Fix::ZERO,
            biased_linear_velocity: Vec3Fix::ZERO,
            biased_angular_velocity: Vec3Fix::ZERO,
            constant_linear_velocity: Vec3Fix::ZERO,
            constant_angular_velocity: Vec3Fix::ZERO,
            applied_force: Vec3Fix::ZERO,
            applied_torque: Vec3Fix::ZERO,
            constant_force: Vec3Fix::ZERO,
            constant_torque: Vec3Fix::ZERO,
            total_gravity: Vec3Fix::ZERO,
            total_linear_damp: Fix128::ZERO,
            total_angular_damp: Fix128::ZERO,
            new_transform: Transform::IDENTITY,
            first_time_kinematic: true,
            axis_locks: AxisLocks::default(),
            omit_force_integration: false,
            continuous_cd: false,
            active: mode.is_dynamic(),
            can_sleep: true,
            still_time: Fix128::ZERO,
            contacts: Vec::new(),
            max_contacts_reported: 0,
            exceptions: BTreeSet::new(),
            areas: Vec::new(),
            island_step: u64::MAX,
        };
        if !mode.is_dynamic() {
            body.inv_mass = Fix128::ZERO;
            body.inv_inertia_local = Mat3Fix::ZERO;
            body.inv_inertia_tensor = Mat3Fix::ZERO;
        }
        body
    }

    #[inline]
    pub fn mode(&self) -> BodyMode {
        self.mode
    }

    /// Change mode; the caller refreshes the object's static flag and wakes the body
    pub(crate) fn set_mode(&mut self, mode: BodyMode) {
        let prev = self.mode;
        self.mode = mode;
        match mode {
            BodyMode::Static | BodyMode::Kinematic => {
                self.linear_velocity = Vec3Fix::ZERO;
                self.angular_velocity = Vec3Fix::ZERO;
                if mode == BodyMode::Kinematic && prev != BodyMode::Kinematic {
                    self.first_time_kinematic = true;
                }
            }
            BodyMode::DynamicLinear => self.angular_velocity = Vec3Fix::ZERO,
            BodyMode::Dynamic => {}
        }
        self.mass_dirty = true;
    }

    // ------------------------------------------------------------------
    // Parameters
    // ------------------------------------------------------------------

    pub fn param(&self, param: BodyParameter) -> Fix128 {
        match param {
            BodyParameter::Bounce => self.bounce,
            BodyParameter::Friction => self.friction,
            BodyParameter::Mass => self.mass,
            BodyParameter::GravityScale => self.gravity_scale,
            BodyParameter::LinearDamp => self.linear_damp,
            BodyParameter::AngularDamp => self.angular_damp,
        }
    }

    pub fn set_param(&mut self, param: BodyParameter, value: Fix128) {
        match param {
            BodyParameter::Bounce => self.bounce = value,
            BodyParameter::Friction => self.friction = value,
            BodyParameter::Mass => {
                if !value.is_positive() {
                    log::error!("body mass must be positive, got {:?}", value);
                    return;
                }
                self.mass = value;
                self.mass_dirty = true;
            }
            BodyParameter::GravityScale => self.gravity_scale = value,
            BodyParameter::LinearDamp => self.linear_damp = value,
            BodyParameter::AngularDamp => self.angular_damp = value,
        }
    }

    /// Override the principal moments; zero components stay computed
    pub fn set_custom_inertia(&mut self, inertia: Option<Vec3Fix>) {
        self.custom_inertia = inertia;
        self.mass_dirty = true;
    }

    /// Override the center of mass (body space)
    pub fn set_custom_center_of_mass(&mut self, com: Option<Vec3Fix>) {
        self.custom_center_of_mass = com;
        self.mass_dirty = true;
    }

    #[inline]
    pub fn mass(&self) -> Fix128 {
        self.mass
    }

    #[inline]
    pub fn inv_mass(&self) -> Fix128 {
        self.inv_mass
    }

    #[inline]
    pub fn inertia(&self) -> Vec3Fix {
        self.inertia
    }

    #[inline]
    pub fn inv_inertia_tensor(&self) -> Mat3Fix {
        self.inv_inertia_tensor
    }

    /// Inverse principal moments (body space diagonal)
    pub fn inv_inertia(&self) -> Vec3Fix {
        Vec3Fix::new(
            self.inv_inertia_local.col0.x,
            self.inv_inertia_local.col1.y,
            self.inv_inertia_local.col2.z,
        )
    }

    /// Center of mass relative to the origin, world orientation
    #[inline]
    pub fn center_of_mass(&self) -> Vec3Fix {
        self.center_of_mass
    }

    #[inline]
    pub fn center_of_mass_local(&self) -> Vec3Fix {
        self.center_of_mass_local
    }

    #[inline]
    pub fn linear_velocity(&self) -> Vec3Fix {
        self.linear_velocity
    }

    #[inline]
    pub fn angular_velocity(&self) -> Vec3Fix {
        self.angular_velocity
    }

    pub fn set_linear_velocity(&mut self, v: Vec3Fix) {
        if self.mode == BodyMode::Static {
            return;
        }
        self.linear_velocity = v;
    }

    pub fn set_angular_velocity(&mut self, v: Vec3Fix) {
        if matches!(self.mode, BodyMode::Static | BodyMode::DynamicLinear) {
            return;
        }
        self.angular_velocity = v;
    }

    /// Velocity of a point given relative to the body origin
    #[inline]
    pub fn velocity_at(&self, rel_pos: Vec3Fix) -> Vec3Fix {
        self.linear_velocity + self.angular_velocity.cross(rel_pos - self.center_of_mass)
    }

    #[inline]
    pub fn total_gravity(&self) -> Vec3Fix {
        self.total_gravity
    }

    #[inline]
    pub fn total_linear_damp(&self) -> Fix128 {
        self.total_linear_damp
    }

    #[inline]
    pub fn total_angular_damp(&self) -> Fix128 {
        self.total_angular_damp
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[inline]
    pub fn constant_force(&self) -> Vec3Fix {
        self.constant_force
    }

    #[inline]
    pub fn constant_torque(&self) -> Vec3Fix {
        self.constant_torque
    }

    // ------------------------------------------------------------------
    // Mass properties
    // ------------------------------------------------------------------

    /// Recompute mass split, center of mass and inertia from the shapes
    pub(crate) fn update_mass_properties(&mut self, shapes: &[ShapeInstance], transform: &Transform) {
        match self.mode {
            BodyMode::Static | BodyMode::Kinematic => {
                self.inv_mass = Fix128::ZERO;
                self.inv_inertia_local = Mat3Fix::ZERO;
            }
            BodyMode::DynamicLinear => {
                self.inv_mass = Fix128::ONE / self.mass;
                self.inv_inertia_local = Mat3Fix::ZERO;
                self.center_of_mass_local = self.compute_center_of_mass(shapes);
            }
            BodyMode::Dynamic => {
                self.inv_mass = Fix128::ONE / self.mass;
                self.center_of_mass_local = self.compute_center_of_mass(shapes);
                self.compute_inertia(shapes);
            }
        }
        self.mass_dirty = false;
        self.update_transform_dependent(transform);
    }

    fn total_area(shapes: &[ShapeInstance]) -> Fix128 {
        shapes
            .iter()
            .filter(|s| !s.disabled)
            .fold(Fix128::ZERO, |acc, s| acc + s.area_cache)
    }

    fn compute_center_of_mass(&self, shapes: &[ShapeInstance]) -> Vec3Fix {
        if let Some(com) = self.custom_center_of_mass {
            return com;
        }
        let total = Self::total_area(shapes);
        if total.is_zero() {
            return Vec3Fix::ZERO;
        }
        let mut com = Vec3Fix::ZERO;
        for s in shapes.iter().filter(|s| !s.disabled) {
            com += s.xform.origin * (s.area_cache / total);
        }
        com
    }

    fn compute_inertia(&mut self, shapes: &[ShapeInstance]) {
        let total = Self::total_area(shapes);
        let mut tensor = Mat3Fix::ZERO;
        let mut any = false;
        for s in shapes.iter().filter(|s| !s.disabled) {
            if s.area_cache.is_zero() || total.is_zero() {
                continue;
            }
            any = true;
            let mass = s.area_cache * self.mass / total;
            let basis = s.xform.basis.orthonormalized();
            let local = basis * Mat3Fix::diagonal(s.shape.inertia(mass)) * basis.transpose();
            // Parallel axis
            let r = s.xform.origin - self.center_of_mass_local;
            let outer = Mat3Fix::from_cols(r * r.x, r * r.y, r * r.z);
            let shift = (Mat3Fix::diagonal(Vec3Fix::splat(r.dot(r))) - outer).scale(mass);
            tensor = tensor + local + shift;
        }
        if !any {
            tensor = Mat3Fix::IDENTITY;
        }
        if let Some(custom) = self.custom_inertia {
            if custom.x.is_positive() {
                tensor.col0.x = custom.x;
            }
            if custom.y.is_positive() {
                tensor.col1.y = custom.y;
            }
            if custom.z.is_positive() {
                tensor.col2.z = custom.z;
            }
        }
        self.inertia = Vec3Fix::new(tensor.col0.x, tensor.col1.y, tensor.col2.z);
        self.inv_inertia_local = tensor.inverse().unwrap_or(Mat3Fix::ZERO);
    }

    /// Refresh world-space mass data after the transform changed
    pub(crate) fn update_transform_dependent(&mut self, transform: &Transform) {
        let basis = transform.basis.orthonormalized();
        self.center_of_mass = basis.mul_vec(self.center_of_mass_local);
        self.inv_inertia_tensor = basis * self.inv_inertia_local * basis.transpose();
    }

    // ------------------------------------------------------------------
    // Forces and impulses
    // ------------------------------------------------------------------

    pub fn apply_central_impulse(&mut self, impulse: Vec3Fix) {
        self.linear_velocity += impulse * self.inv_mass;
    }

    /// `position` is relative to the body origin
    pub fn apply_impulse(&mut self, impulse: Vec3Fix, position: Vec3Fix) {
        self.linear_velocity += impulse * self.inv_mass;
        self.angular_velocity += self
            .inv_inertia_tensor
            .mul_vec((position - self.center_of_mass).cross(impulse));
    }

    pub fn apply_torque_impulse(&mut self, torque: Vec3Fix) {
        self.angular_velocity += self.inv_inertia_tensor.mul_vec(torque);
    }

    pub fn apply_central_force(&mut self, force: Vec3Fix) {
        self.applied_force += force;
    }

    pub fn apply_force(&mut self, force: Vec3Fix, position: Vec3Fix) {
        self.applied_force += force;
        self.applied_torque += (position - self.center_of_mass).cross(force);
    }

    pub fn apply_torque(&mut self, torque: Vec3Fix) {
        self.applied_torque += torque;
    }

    pub fn add_constant_central_force(&mut self, force: Vec3Fix) {
        self.constant_force += force;
    }

    pub fn add_constant_force(&mut self, force: Vec3Fix, position: Vec3Fix) {
        self.constant_force += force;
        self.constant_torque += (position - self.center_of_mass).cross(force);
    }

    pub fn add_constant_torque(&mut self, torque: Vec3Fix) {
        self.constant_torque += torque;
    }

    pub fn set_constant_force(&mut self, force: Vec3Fix) {
        self.constant_force = force;
    }

    pub fn set_constant_torque(&mut self, torque: Vec3Fix) {
        self.constant_torque = torque;
    }

    // ------------------------------------------------------------------
    // Contacts
    // ------------------------------------------------------------------

    /// Capacity of the reported-contact buffer (0 disables reporting)
    pub fn set_max_contacts_reported(&mut self, count: usize) {
        self.max_contacts_reported = count;
        self.contacts.truncate(count);
    }

    #[inline]
    pub fn max_contacts_reported(&self) -> usize {
        self.max_contacts_reported
    }

    #[inline]
    pub fn can_report_contacts(&self) -> bool {
        self.max_contacts_reported > 0
    }

    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    #[inline]
    pub fn contact_count(&self) -> usize {
        self.contacts.len()
    }

    /// Store a contact; when full, the shallowest one is replaced by a deeper newcomer
    pub(crate) fn add_contact(&mut self, contact: Contact) {
        if self.max_contacts_reported == 0 {
            return;
        }
        if self.contacts.len() < self.max_contacts_reported {
            self.contacts.push(contact);
            return;
        }
        let mut least = 0;
        for (i, c) in self.contacts.iter().enumerate() {
            if c.depth < self.contacts[least].depth {
                least = i;
            }
        }
        if self.contacts[least].depth < contact.depth {
            self.contacts[least] = contact;
        }
    }

    // ------------------------------------------------------------------
    // Exceptions and areas
    // ------------------------------------------------------------------

    pub fn add_collision_exception(&mut self, other: Rid) {
        self.exceptions.insert(other);
    }

    pub fn remove_collision_exception(&mut self, other: Rid) {
        self.exceptions.remove(&other);
    }

    #[inline]
    pub fn has_exception(&self, other: Rid) -> bool {
        self.exceptions.contains(&other)
    }

    pub fn collision_exceptions(&self) -> impl Iterator<Item = Rid> + '_ {
        self.exceptions.iter().copied()
    }

    /// Register an overriding area; kept sorted by ascending priority
    pub(crate) fn add_area(&mut self, area: Rid, priority: i32) {
        if let Some(existing) = self.areas.iter_mut().find(|a| a.area == area) {
            existing.refcount += 1;
            return;
        }
        let entry = AreaRef {
            area,
            priority,
            refcount: 1,
        };
        let at = self
            .areas
            .iter()
            .position(|a| (a.priority, a.area) > (priority, area))
            .unwrap_or(self.areas.len());
        self.areas.insert(at, entry);
    }

    pub(crate) fn remove_area(&mut self, area: Rid) {
        if let Some(i) = self.areas.iter().position(|a| a.area == area) {
            self.areas[i].refcount -= 1;
            if self.areas[i].refcount == 0 {
                self.areas.remove(i);
            }
        }
    }

    // ------------------------------------------------------------------
    // Integration
    // ------------------------------------------------------------------

    /// Accumulate forces into velocities
    ///
    /// Damping scales velocity by `1 - delta * damp`, floored at zero.
    /// Kinematic bodies derive their velocity from the motion toward their
    /// target transform instead.
    pub(crate) fn integrate_forces(&mut self, transform: &Transform, env: &ForceEnvironment, delta: Fix128) {
        match self.mode {
            BodyMode::Static => return,
            BodyMode::Kinematic => {
                let motion = self.new_transform.origin - transform.origin;
                self.linear_velocity = self.constant_linear_velocity + motion / delta;
                // Small per-step rotation: axis * sin(angle) from the skew part
                let rot = self.new_transform.basis.orthonormalized() * transform.basis.orthonormalized().transpose();
                let half_skew = Vec3Fix::new(
                    rot.col1.z - rot.col2.y,
                    rot.col2.x - rot.col0.z,
                    rot.col0.y - rot.col1.x,
                )
                .scale(Fix128::HALF);
                self.angular_velocity = self.constant_angular_velocity + half_skew / delta;
                self.contacts.clear();
                return;
            }
            BodyMode::Dynamic | BodyMode::DynamicLinear => {}
        }

        self.total_gravity = env.gravity * self.gravity_scale;
        self.total_linear_damp = match self.linear_damp_mode {
            DampMode::Combine => env.linear_damp + self.linear_damp,
            DampMode::Replace => self.linear_damp,
        };
        self.total_angular_damp = match self.angular_damp_mode {
            DampMode::Combine => env.angular_damp + self.angular_damp,
            DampMode::Replace => self.angular_damp,
        };

        self.prev_linear_velocity = self.linear_velocity;
        self.prev_angular_velocity = self.angular_velocity;

        if !self.omit_force_integration {
            let force = self.total_gravity * self.mass + self.applied_force + self.constant_force;
            let torque = self.applied_torque + self.constant_torque;

            let damp = (Fix128::ONE - delta * self.total_linear_damp).max(Fix128::ZERO);
            self.linear_velocity = self.linear_velocity * damp;
            let angular_damp = (Fix128::ONE - delta * self.total_angular_damp).max(Fix128::ZERO);
            self.angular_velocity = self.angular_velocity * angular_damp;

            self.linear_velocity += force * (self.inv_mass * delta);
            self.angular_velocity += self.inv_inertia_tensor.mul_vec(torque) * delta;
        }

        self.applied_force = Vec3Fix::ZERO;
        self.applied_torque = Vec3Fix::ZERO;
        self.biased_linear_velocity = Vec3Fix::ZERO;
        self.biased_angular_velocity = Vec3Fix::ZERO;
        self.contacts.clear();
    }

    /// Advance the transform by the solved velocities; `None` when nothing moves
    pub(crate) fn integrate_velocities(&mut self, transform: &Transform, delta: Fix128) -> Option<Transform> {
        if self.mode == BodyMode::Static {
            return None;
        }

        for axis in 0..3 {
            if self.axis_locks.linear(axis) {
                self.linear_velocity.set_axis(axis, Fix128::ZERO);
                self.biased_linear_velocity.set_axis(axis, Fix128::ZERO);
                self.new_transform.origin.set_axis(axis, transform.origin.axis(axis));
            }
            if self.axis_locks.angular(axis) {
                self.angular_velocity.set_axis(axis, Fix128::ZERO);
                self.biased_angular_velocity.set_axis(axis, Fix128::ZERO);
            }
        }

        if self.mode == BodyMode::Kinematic {
            if self.linear_velocity.is_zero() && self.angular_velocity.is_zero() {
                // Stopped moving
                self.active = false;
            }
            return Some(self.new_transform);
        }

        let mut next = *transform;
        let total_angular = self.angular_velocity + self.biased_angular_velocity;
        let ang_speed = total_angular.length();
        if !ang_speed.is_zero_approx() {
            let rot = Mat3Fix::from_axis_angle(total_angular / ang_speed, ang_speed * delta);
            // Rotate about the center of mass, not the origin
            let com_before = next.basis.mul_vec(self.center_of_mass_local);
            next.basis = (rot * next.basis).orthonormalized();
            next.origin += com_before - next.basis.mul_vec(self.center_of_mass_local);
        }
        next.origin += (self.linear_velocity + self.biased_linear_velocity) * delta;
        self.update_transform_dependent(&next);
        Some(next)
    }

    // ------------------------------------------------------------------
    // Sleep
    // ------------------------------------------------------------------

    /// Whether this body is ready to sleep; accumulates still time
    pub(crate) fn sleep_test(
        &mut self,
        delta: Fix128,
        linear_threshold: Fix128,
        angular_threshold: Fix128,
        time_to_sleep: Fix128,
    ) -> bool {
        match self.mode {
            BodyMode::Static | BodyMode::Kinematic => return true,
            _ if !self.can_sleep => return false,
            _ => {}
        }
        if self.angular_velocity.length() < angular_threshold
            && self.linear_velocity.length_squared() < linear_threshold * linear_threshold
        {
            self.still_time += delta;
            self.still_time > time_to_sleep
        } else {
            self.still_time = Fix128::ZERO;
            false
        }
    }

    pub(crate) fn reset_still_time(&mut self) {
        self.still_time = Fix128::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::Shape;
    use alloc::sync::Arc;
    use slotmap::SlotMap;

    fn instance(shape: Shape, origin: Vec3Fix) -> ShapeInstance {
        let area_cache = shape.volume();
        ShapeInstance {
            shape: Arc::new(shape),
            xform: Transform::from_origin(origin),
            xform_inv: Transform::from_origin(-origin),
            bpid: crate::broad_phase::BroadPhaseId::INVALID,
            aabb_cache: crate::math::AABB::default(),
            area_cache,
            disabled: false,
        }
    }

    fn env(gravity: Vec3Fix) -> ForceEnvironment {
        ForceEnvironment {
            gravity,
            linear_damp: Fix128::ZERO,
            angular_damp: Fix128::ZERO,
        }
    }

    #[test]
    fn test_mass_split_center_of_mass() {
        let mut b = Body::new(BodyMode::Dynamic);
        b.set_param(BodyParameter::Mass, Fix128::from_int(2));
        let shapes = [
            instance(Shape::cuboid(Vec3Fix::from_int(1, 1, 1)), Vec3Fix::from_int(-2, 0, 0)),
            instance(Shape::cuboid(Vec3Fix::from_int(1, 1, 1)), Vec3Fix::from_int(2, 0, 0)),
        ];
        b.update_mass_properties(&shapes, &Transform::IDENTITY);
        assert!(b.center_of_mass_local().is_zero());
        assert_eq!(b.inv_mass(), Fix128::HALF);
        // Spread along X raises the Y and Z moments above X
        assert!(b.inertia().y > b.inertia().x);
    }

    #[test]
    fn test_gravity_integration() {
        let mut b = Body::new(BodyMode::Dynamic);
        b.update_mass_properties(&[], &Transform::IDENTITY);
        let dt = Fix128::from_ratio(1, 10);
        b.integrate_forces(&Transform::IDENTITY, &env(Vec3Fix::from_int(0, -10, 0)), dt);
        assert!((b.linear_velocity().y.to_f64() + 1.0).abs() < 1e-9);
        let next = b.integrate_velocities(&Transform::IDENTITY, dt).expect("dynamic moves");
        assert!((next.origin.y.to_f64() + 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_damping_is_linear_in_step() {
        let mut b = Body::new(BodyMode::Dynamic);
        b.update_mass_properties(&[], &Transform::IDENTITY);
        b.set_linear_velocity(Vec3Fix::from_int(10, 0, 0));
        b.set_angular_velocity(Vec3Fix::from_int(0, 4, 0));
        let env = ForceEnvironment {
            gravity: Vec3Fix::ZERO,
            linear_damp: Fix128::HALF,
            angular_damp: Fix128::ONE,
        };
        b.integrate_forces(&Transform::IDENTITY, &env, Fix128::from_ratio(1, 10));
        assert!((b.linear_velocity().x.to_f64() - 9.5).abs() < 1e-9);
        assert!((b.angular_velocity().y.to_f64() - 3.6).abs() < 1e-9);

        // A step longer than 1/damp stops the body instead of reversing it
        b.integrate_forces(&Transform::IDENTITY, &env, Fix128::from_int(3));
        assert!(b.linear_velocity().is_zero());
        assert!(b.angular_velocity().is_zero());
    }

    #[test]
    fn test_impulse_at_offset_spins() {
        let mut b = Body::new(BodyMode::Dynamic);
        b.update_mass_properties(&[instance(Shape::sphere(Fix128::ONE), Vec3Fix::ZERO)], &Transform::IDENTITY);
        b.apply_impulse(Vec3Fix::UNIT_Z, Vec3Fix::UNIT_X);
        assert!(b.linear_velocity().z.is_positive());
        // X cross Z = -Y
        assert!(b.angular_velocity().y.is_negative());
    }

    #[test]
    fn test_static_and_linear_ignore_rotation() {
        let mut s = Body::new(BodyMode::Static);
        s.update_mass_properties(&[], &Transform::IDENTITY);
        s.apply_central_impulse(Vec3Fix::UNIT_X);
        assert!(s.linear_velocity().is_zero());

        let mut l = Body::new(BodyMode::DynamicLinear);
        l.update_mass_properties(&[], &Transform::IDENTITY);
        l.apply_torque_impulse(Vec3Fix::UNIT_Y);
        assert!(l.angular_velocity().is_zero());
    }

    #[test]
    fn test_contact_buffer_keeps_deepest() {
        let mut keys: SlotMap<Rid, ()> = SlotMap::with_key();
        let other = keys.insert(());
        let mut b = Body::new(BodyMode::Dynamic);
        b.set_max_contacts_reported(2);
        let contact = |depth: i64| Contact {
            local_pos: Vec3Fix::ZERO,
            local_normal: Vec3Fix::UNIT_Y,
            depth: Fix128::from_ratio(depth, 100),
            local_shape: 0,
            local_velocity_at_pos: Vec3Fix::ZERO,
            collider_pos: Vec3Fix::ZERO,
            collider_shape: 0,
            collider_instance_id: None,
            collider: other,
            collider_velocity_at_pos: Vec3Fix::ZERO,
            impulse: Vec3Fix::ZERO,
        };
        b.add_contact(contact(5));
        b.add_contact(contact(1));
        b.add_contact(contact(3));
        b.add_contact(contact(0));
        assert_eq!(b.contact_count(), 2);
        let depths: Vec<i64> = b.contacts().iter().map(|c| (c.depth.to_f64() * 100.0).round() as i64).collect();
        assert!(depths.contains(&5) && depths.contains(&3));
    }

    #[test]
    fn test_sleep_test_accumulates() {
        let mut b = Body::new(BodyMode::Dynamic);
        let (lin, ang, t) = (Fix128::from_ratio(1, 10), Fix128::from_ratio(1, 10), Fix128::HALF);
        let dt = Fix128::from_ratio(1, 4);
        assert!(!b.sleep_test(dt, lin, ang, t));
        assert!(!b.sleep_test(dt, lin, ang, t));
        assert!(b.sleep_test(dt, lin, ang, t));
        b.set_linear_velocity(Vec3Fix::UNIT_X);
        assert!(!b.sleep_test(dt, lin, ang, t));
        b.can_sleep = false;
        b.set_linear_velocity(Vec3Fix::ZERO);
        assert!(!b.sleep_test(dt, lin, ang, t));
    }

    #[test]
    fn test_area_priority_order() {
        let mut keys: SlotMap<Rid, ()> = SlotMap::with_key();
        let (a, c) = (keys.insert(()), keys.insert(()));
        let mut b = Body::new(BodyMode::Dynamic);
        b.add_area(a, 5);
        b.add_area(c, 1);
        b.add_area(a, 5);
        assert_eq!(b.areas.iter().map(|r| r.area).collect::<Vec<_>>(), vec![c, a]);
        b.remove_area(a);
        assert_eq!(b.areas.len(), 2);
        b.remove_area(a);
        assert_eq!(b.areas.len(), 1);
    }
}
