//! Direct body access
//!
//! A short-lived handle over one body of a [`Space`] for scripting-style
//! access between steps. Every setter wakes the body so the change takes
//! effect on the next step. Contact getters validate the index; an index
//! past the reported contacts logs an error and yields a default value.

use crate::body::{Body, Contact};
use crate::collision_object::Rid;
use crate::math::{Fix128, Transform, Vec3Fix};
use crate::space::Space;
use crate::space_state::SpaceState;

/// Mutable view of one body
pub struct BodyState<'a> {
    space: &'a mut Space,
    rid: Rid,
}

impl<'a> BodyState<'a> {
    /// `rid` must name a body of `space`
    pub(crate) fn new(space: &'a mut Space, rid: Rid) -> Self {
        Self { space, rid }
    }

    #[inline]
    pub fn rid(&self) -> Rid {
        self.rid
    }

    fn body(&self) -> Option<&Body> {
        self.space.body(self.rid)
    }

    fn with_body<R: Default>(&self, f: impl FnOnce(&Body) -> R) -> R {
        self.body().map(f).unwrap_or_default()
    }

    /// Run `f` on the body, then wake it
    fn edit(&mut self, f: impl FnOnce(&mut Body)) {
        if let Some(body) = self.space.world_mut().objects.get_mut(self.rid).and_then(|o| o.as_body_mut()) {
            f(body);
        }
        self.space.world_mut().set_body_active(self.rid, true);
    }

    fn contact(&self, index: usize) -> Option<&Contact> {
        let contacts = self.body()?.contacts();
        let contact = contacts.get(index);
        if contact.is_none() {
            log::error!("contact index {} out of range ({})", index, contacts.len());
        }
        contact
    }

    // ------------------------------------------------------------------
    // Transform and velocity
    // ------------------------------------------------------------------

    pub fn transform(&self) -> Transform {
        self.space
            .object(self.rid)
            .map_or(Transform::IDENTITY, |o| *o.transform())
    }

    pub fn set_transform(&mut self, transform: Transform) {
        if let Err(err) = self.space.set_transform(self.rid, transform) {
            log::error!("body state: {}", err);
        }
    }

    pub fn linear_velocity(&self) -> Vec3Fix {
        self.with_body(|b| b.linear_velocity())
    }

    pub fn set_linear_velocity(&mut self, velocity: Vec3Fix) {
        self.edit(|b| b.set_linear_velocity(velocity));
    }

    pub fn angular_velocity(&self) -> Vec3Fix {
        self.with_body(|b| b.angular_velocity())
    }

    pub fn set_angular_velocity(&mut self, velocity: Vec3Fix) {
        self.edit(|b| b.set_angular_velocity(velocity));
    }

    /// Velocity of the body point at world position `point`
    pub fn velocity_at_position(&self, point: Vec3Fix) -> Vec3Fix {
        let origin = self.transform().origin;
        self.with_body(|b| b.velocity_at(point - origin))
    }

    pub fn center_of_mass(&self) -> Vec3Fix {
        self.with_body(|b| b.center_of_mass())
    }

    pub fn inverse_mass(&self) -> Fix128 {
        self.with_body(|b| b.inv_mass())
    }

    pub fn inverse_inertia(&self) -> Vec3Fix {
        self.with_body(|b| b.inv_inertia())
    }

    pub fn total_gravity(&self) -> Vec3Fix {
        self.with_body(|b| b.total_gravity())
    }

    pub fn total_linear_damp(&self) -> Fix128 {
        self.with_body(|b| b.total_linear_damp())
    }

    pub fn total_angular_damp(&self) -> Fix128 {
        self.with_body(|b| b.total_angular_damp())
    }

    // ------------------------------------------------------------------
    // Forces and impulses
    // ------------------------------------------------------------------

    pub fn apply_central_impulse(&mut self, impulse: Vec3Fix) {
        self.edit(|b| b.apply_central_impulse(impulse));
    }

    /// `position` is relative to the body origin, in world orientation
    pub fn apply_impulse(&mut self, impulse: Vec3Fix, position: Vec3Fix) {
        self.edit(|b| b.apply_impulse(impulse, position));
    }

    pub fn apply_torque_impulse(&mut self, torque: Vec3Fix) {
        self.edit(|b| b.apply_torque_impulse(torque));
    }

    pub fn apply_central_force(&mut self, force: Vec3Fix) {
        self.edit(|b| b.apply_central_force(force));
    }

    pub fn apply_force(&mut self, force: Vec3Fix, position: Vec3Fix) {
        self.edit(|b| b.apply_force(force, position));
    }

    pub fn apply_torque(&mut self, torque: Vec3Fix) {
        self.edit(|b| b.apply_torque(torque));
    }

    pub fn add_constant_central_force(&mut self, force: Vec3Fix) {
        self.edit(|b| b.add_constant_central_force(force));
    }

    pub fn add_constant_force(&mut self, force: Vec3Fix, position: Vec3Fix) {
        self.edit(|b| b.add_constant_force(force, position));
    }

    pub fn add_constant_torque(&mut self, torque: Vec3Fix) {
        self.edit(|b| b.add_constant_torque(torque));
    }

    pub fn constant_force(&self) -> Vec3Fix {
        self.with_body(|b| b.constant_force())
    }

    pub fn set_constant_force(&mut self, force: Vec3Fix) {
        self.edit(|b| b.set_constant_force(force));
    }

    pub fn constant_torque(&self) -> Vec3Fix {
        self.with_body(|b| b.constant_torque())
    }

    pub fn set_constant_torque(&mut self, torque: Vec3Fix) {
        self.edit(|b| b.set_constant_torque(torque));
    }

    // ------------------------------------------------------------------
    // Sleep
    // ------------------------------------------------------------------

    pub fn is_sleeping(&self) -> bool {
        !self.with_body(|b| b.is_active())
    }

    pub fn set_sleep_state(&mut self, sleeping: bool) {
        self.space.world_mut().set_body_active(self.rid, !sleeping);
    }

    // ------------------------------------------------------------------
    // Contacts
    // ------------------------------------------------------------------

    pub fn contact_count(&self) -> usize {
        self.with_body(|b| b.contact_count())
    }

    pub fn contact_local_position(&self, index: usize) -> Vec3Fix {
        self.contact(index).map_or(Vec3Fix::ZERO, |c| c.local_pos)
    }

    pub fn contact_local_normal(&self, index: usize) -> Vec3Fix {
        self.contact(index).map_or(Vec3Fix::ZERO, |c| c.local_normal)
    }

    pub fn contact_impulse(&self, index: usize) -> Vec3Fix {
        self.contact(index).map_or(Vec3Fix::ZERO, |c| c.impulse)
    }

    pub fn contact_local_shape(&self, index: usize) -> usize {
        self.contact(index).map_or(0, |c| c.local_shape)
    }

    pub fn contact_local_velocity_at_position(&self, index: usize) -> Vec3Fix {
        self.contact(index).map_or(Vec3Fix::ZERO, |c| c.local_velocity_at_pos)
    }

    pub fn contact_collider(&self, index: usize) -> Option<Rid> {
        self.contact(index).map(|c| c.collider)
    }

    pub fn contact_collider_position(&self, index: usize) -> Vec3Fix {
        self.contact(index).map_or(Vec3Fix::ZERO, |c| c.collider_pos)
    }

    pub fn contact_collider_instance_id(&self, index: usize) -> Option<u64> {
        self.contact(index).and_then(|c| c.collider_instance_id)
    }

    pub fn contact_collider_shape(&self, index: usize) -> usize {
        self.contact(index).map_or(0, |c| c.collider_shape)
    }

    pub fn contact_collider_velocity_at_position(&self, index: usize) -> Vec3Fix {
        self.contact(index).map_or(Vec3Fix::ZERO, |c| c.collider_velocity_at_pos)
    }

    /// Queries against the space this body lives in
    pub fn space_state(&self) -> SpaceState<'_> {
        self.space.direct_state()
    }

    /// Steps the space has run
    pub fn step_count(&self) -> u64 {
        self.space.world().step_counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::BodyMode;
    use crate::space::Space;

    #[test]
    fn test_setter_wakes_body() {
        let mut space = Space::new().unwrap();
        let rid = space.add_body(Body::new(BodyMode::Dynamic), Transform::IDENTITY).unwrap();
        space.body_set_active(rid, false).unwrap();
        assert!(!space.body(rid).unwrap().is_active());

        let mut state = space.body_state(rid).unwrap();
        assert!(state.is_sleeping());
        state.set_linear_velocity(Vec3Fix::from_int(1, 0, 0));
        assert!(!state.is_sleeping());
        assert_eq!(state.linear_velocity(), Vec3Fix::from_int(1, 0, 0));
    }

    #[test]
    fn test_contact_index_out_of_range() {
        let mut space = Space::new().unwrap();
        let rid = space.add_body(Body::new(BodyMode::Dynamic), Transform::IDENTITY).unwrap();
        let state = space.body_state(rid).unwrap();
        assert_eq!(state.contact_count(), 0);
        assert_eq!(state.contact_local_position(3), Vec3Fix::ZERO);
        assert_eq!(state.contact_collider(0), None);
    }

    #[test]
    fn test_static_body_stays_asleep() {
        let mut space = Space::new().unwrap();
        let rid = space.add_body(Body::new(BodyMode::Static), Transform::IDENTITY).unwrap();
        let mut state = space.body_state(rid).unwrap();
        state.apply_central_impulse(Vec3Fix::from_int(0, 1, 0));
        assert!(state.is_sleeping());
        assert!(space.body_state(Rid::default()).is_none());
    }
}
