//! Soft Bodies
//!
//! Point-mass soft bodies: a cloud of nodes that falls under gravity, feels
//! area overrides and wind, and reports to monitoring areas. Deformation
//! constraints between nodes are not modelled; the body takes part in the
//! step through `predict_motion` and `solve_constraints` only.
//!
//! A soft body owns one broad-phase leaf spanning all of its nodes.
//!
//! Author: Moroya Sakamoto

use crate::body::{AreaRef, ForceEnvironment};
use crate::broad_phase::BroadPhaseId;
use crate::collision_object::Rid;
use crate::math::{Fix128, Vec3Fix, AABB};

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

/// One simulated point
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SoftNode {
    pub position: Vec3Fix,
    pub velocity: Vec3Fix,
    /// Zero pins the node in place
    pub inv_mass: Fix128,
    predicted: Vec3Fix,
}

impl SoftNode {
    pub fn new(position: Vec3Fix, inv_mass: Fix128) -> Self {
        Self {
            position,
            velocity: Vec3Fix::ZERO,
            inv_mass,
            predicted: position,
        }
    }

    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.inv_mass.is_zero()
    }
}

/// Soft body state
#[derive(Clone, Debug)]
pub struct SoftBody {
    nodes: Vec<SoftNode>,
    total_mass: Fix128,
    /// Velocity damping per second
    pub damping_coefficient: Fix128,
    /// Collision margin added around the node bounds
    pub collision_margin: Fix128,
    aabb: AABB,
    pub(crate) bpid: BroadPhaseId,
    pub(crate) areas: Vec<AreaRef>,
    pub(crate) active: bool,
    pub(crate) island_step: u64,
}

impl Default for SoftBody {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftBody {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            total_mass: Fix128::ONE,
            damping_coefficient: Fix128::from_ratio(1, 100),
            collision_margin: Fix128::from_ratio(1, 100),
            aabb: AABB::default(),
            bpid: BroadPhaseId::INVALID,
            areas: Vec::new(),
            active: true,
            island_step: u64::MAX,
        }
    }

    /// Replace the node cloud; mass is spread evenly over the nodes
    pub fn set_points(&mut self, points: &[Vec3Fix]) {
        let inv = self.node_inv_mass(points.len());
        self.nodes = points.iter().map(|p| SoftNode::new(*p, inv)).collect();
        self.update_bounds();
        self.active = true;
    }

    fn node_inv_mass(&self, count: usize) -> Fix128 {
        if count == 0 || !self.total_mass.is_positive() {
            return Fix128::ZERO;
        }
        Fix128::from_int(count as i64) / self.total_mass
    }

    pub fn set_total_mass(&mut self, mass: Fix128) {
        if !mass.is_positive() {
            log::error!("soft body mass must be positive, got {:?}", mass);
            return;
        }
        self.total_mass = mass;
        let inv = self.node_inv_mass(self.nodes.len());
        for node in self.nodes.iter_mut().filter(|n| !n.is_pinned()) {
            node.inv_mass = inv;
        }
    }

    #[inline]
    pub fn total_mass(&self) -> Fix128 {
        self.total_mass
    }

    pub fn nodes(&self) -> &[SoftNode] {
        &self.nodes
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node_position(&self, index: usize) -> Vec3Fix {
        match self.nodes.get(index) {
            Some(n) => n.position,
            None => {
                log::error!("soft body node {} out of range ({})", index, self.nodes.len());
                Vec3Fix::ZERO
            }
        }
    }

    /// Pin or release a node
    pub fn pin_node(&mut self, index: usize, pinned: bool) {
        let inv = self.node_inv_mass(self.nodes.len());
        match self.nodes.get_mut(index) {
            Some(n) => {
                n.inv_mass = if pinned { Fix128::ZERO } else { inv };
                if pinned {
                    n.velocity = Vec3Fix::ZERO;
                }
            }
            None => log::error!("soft body node {} out of range", index),
        }
    }

    /// Move a node; pinned nodes follow this without simulation
    pub fn set_node_position(&mut self, index: usize, position: Vec3Fix) {
        match self.nodes.get_mut(index) {
            Some(n) => {
                n.position = position;
                n.predicted = position;
            }
            None => log::error!("soft body node {} out of range", index),
        }
        self.update_bounds();
    }

    /// Map every node through `f`, velocities untouched
    pub(crate) fn transform_nodes<F: Fn(Vec3Fix) -> Vec3Fix>(&mut self, f: F) {
        for node in self.nodes.iter_mut() {
            node.position = f(node.position);
            node.predicted = node.position;
        }
        self.update_bounds();
    }

    /// Bounds over all nodes, grown by the collision margin
    #[inline]
    pub fn aabb(&self) -> AABB {
        self.aabb
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub(crate) fn update_bounds(&mut self) {
        let mut iter = self.nodes.iter();
        let Some(first) = iter.next() else {
            self.aabb = AABB::default();
            return;
        };
        let aabb = iter.fold(AABB::new(first.position, first.position), |acc, n| {
            acc.expand_to(n.position)
        });
        self.aabb = aabb.grow(self.collision_margin);
    }

    /// Integrate external forces into node velocities and predict positions
    ///
    /// `wind` returns the wind force at a node position.
    pub(crate) fn predict_motion<W>(&mut self, env: &ForceEnvironment, wind: W, delta: Fix128)
    where
        W: Fn(Vec3Fix) -> Vec3Fix,
    {
        let damp = (Fix128::ONE - delta * (self.damping_coefficient + env.linear_damp))
            .max(Fix128::ZERO);
        for node in self.nodes.iter_mut() {
            if node.is_pinned() {
                node.predicted = node.position;
                continue;
            }
            let accel = env.gravity + wind(node.position) * node.inv_mass;
            node.velocity = (node.velocity + accel * delta) * damp;
            node.predicted = node.position + node.velocity * delta;
        }
    }

    /// Commit predicted positions and refresh the bounds
    pub(crate) fn solve_constraints(&mut self, delta: Fix128) {
        if delta.is_zero() {
            return;
        }
        for node in self.nodes.iter_mut() {
            if !node.is_pinned() {
                node.velocity = (node.predicted - node.position) / delta;
            }
            node.position = node.predicted;
        }
        self.update_bounds();
    }

    /// Register an overriding area; same ordering as bodies
    pub(crate) fn add_area(&mut self, area: Rid, priority: i32) {
        if let Some(existing) = self.areas.iter_mut().find(|a| a.area == area) {
            existing.refcount += 1;
            return;
        }
        let at = self
            .areas
            .iter()
            .position(|a| (a.priority, a.area) > (priority, area))
            .unwrap_or(self.areas.len());
        self.areas.insert(
            at,
            AreaRef {
                area,
                priority,
                refcount: 1,
            },
        );
    }

    pub(crate) fn remove_area(&mut self, area: Rid) {
        if let Some(i) = self.areas.iter().position(|a| a.area == area) {
            self.areas[i].refcount -= 1;
            if self.areas[i].refcount == 0 {
                self.areas.remove(i);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(gravity_y: i64) -> ForceEnvironment {
        ForceEnvironment {
            gravity: Vec3Fix::from_int(0, gravity_y, 0),
            linear_damp: Fix128::ZERO,
            angular_damp: Fix128::ZERO,
        }
    }

    #[test]
    fn test_bounds_cover_nodes() {
        let mut sb = SoftBody::new();
        sb.collision_margin = Fix128::ZERO;
        sb.set_points(&[Vec3Fix::from_int(-1, 0, 0), Vec3Fix::from_int(2, 3, 1)]);
        assert_eq!(sb.aabb().min, Vec3Fix::from_int(-1, 0, 0));
        assert_eq!(sb.aabb().max, Vec3Fix::from_int(2, 3, 1));
    }

    #[test]
    fn test_nodes_fall_and_pins_hold() {
        let mut sb = SoftBody::new();
        sb.damping_coefficient = Fix128::ZERO;
        sb.set_points(&[Vec3Fix::ZERO, Vec3Fix::from_int(1, 0, 0)]);
        sb.pin_node(1, true);
        let dt = Fix128::from_ratio(1, 10);
        sb.predict_motion(&env(-10), |_| Vec3Fix::ZERO, dt);
        sb.solve_constraints(dt);
        assert!(sb.nodes()[0].position.y.is_negative());
        assert_eq!(sb.nodes()[1].position, Vec3Fix::from_int(1, 0, 0));
        assert!(sb.nodes()[0].velocity.y.is_negative());
    }

    #[test]
    fn test_mass_split_evenly() {
        let mut sb = SoftBody::new();
        sb.set_points(&[Vec3Fix::ZERO; 4]);
        sb.set_total_mass(Fix128::from_int(2));
        assert_eq!(sb.nodes()[0].inv_mass, Fix128::from_int(2));
        // Rejected
        sb.set_total_mass(Fix128::ZERO);
        assert_eq!(sb.total_mass(), Fix128::from_int(2));
    }

    #[test]
    fn test_wind_pushes_nodes() {
        let mut sb = SoftBody::new();
        sb.set_points(&[Vec3Fix::ZERO]);
        let dt = Fix128::from_ratio(1, 10);
        sb.predict_motion(&env(0), |_| Vec3Fix::from_int(1, 0, 0), dt);
        sb.solve_constraints(dt);
        assert!(sb.nodes()[0].position.x.is_positive());
    }
}
