//! Constraint Layer
//!
//! Everything the step solves lives in one arena of [`Constraint`]s: contact
//! pairs created by the broad phase and joints created by the host. Each
//! variant runs the same three phases:
//!
//! 1. `setup`: narrow phase and bookkeeping, read-only access to objects.
//!    Runs in parallel across constraints.
//! 2. `pre_solve`: notifications, contact reports, warm starting. Serial,
//!    with mutable access to objects.
//! 3. `solve`: sequential impulses on island-local [`SolverBody`] buffers.
//!
//! Author: Moroya Sakamoto

use crate::area_pair::{Area2Pair, AreaPair, AreaSoftBodyPair};
use crate::body::BodyMode;
use crate::body_pair::BodyPair;
use crate::collision_object::{CollisionObject, ObjectArena, Rid};
use crate::config::SpaceConfig;
use crate::joint::Joint;
use crate::math::{Fix128, Mat3Fix, Vec3Fix};

use alloc::collections::BTreeSet;

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

slotmap::new_key_type! {
    /// Key of a pair or joint inside its space
    pub struct ConstraintKey;
}

/// Largest angular correction the bias pass may add per step, before dividing by the step
pub(crate) const MAX_BIAS_ROTATION: Fix128 = Fix128 {
    hi: 0,
    lo: 0x6487_ED51_10B4_611A, // PI / 8
};

/// Relative velocities below this are treated as zero by the solvers
pub(crate) const MIN_VELOCITY: Fix128 = Fix128 {
    hi: 0,
    lo: 0x0006_8DB8_BAC7_10CB, // 0.0001
};

/// Fields shared by every constraint
#[derive(Clone, Debug)]
pub struct ConstraintBase {
    objects: [Rid; 2],
    /// Step counter value when the constraint was last claimed by an island
    pub(crate) island_step: u64,
    /// Participants' indices in the island's solver buffer
    pub(crate) slots: [usize; 2],
    /// Larger values are solved first inside an island
    pub priority: i32,
}

impl ConstraintBase {
    pub(crate) fn new(a: Rid, b: Rid) -> Self {
        Self {
            objects: [a, b],
            island_step: u64::MAX,
            slots: [0, 0],
            priority: 1,
        }
    }

    #[inline]
    pub fn objects(&self) -> &[Rid; 2] {
        &self.objects
    }
}

/// Side effects of `pre_solve` that belong to the space
#[derive(Clone, Debug, Default)]
pub(crate) struct StepEvents {
    /// Areas with pending monitor counters
    pub monitor_queries: BTreeSet<Rid>,
    pub debug_contacts: Vec<Vec3Fix>,
    pub max_debug_contacts: usize,
}

impl StepEvents {
    pub(crate) fn add_debug_contact(&mut self, point: Vec3Fix) {
        if self.debug_contacts.len() < self.max_debug_contacts {
            self.debug_contacts.push(point);
        }
    }
}

/// Velocity state of one body, copied into an island buffer for solving
///
/// Static and kinematic bodies are copied with zero inverse mass so every
/// impulse applied to them vanishes.
#[derive(Clone, Copy, Debug)]
pub(crate) struct SolverBody {
    pub rid: Rid,
    pub dynamic: bool,
    pub inv_mass: Fix128,
    pub inv_inertia: Mat3Fix,
    pub linear_velocity: Vec3Fix,
    pub angular_velocity: Vec3Fix,
    pub biased_linear_velocity: Vec3Fix,
    pub biased_angular_velocity: Vec3Fix,
}

impl SolverBody {
    pub(crate) fn from_object(rid: Rid, object: &CollisionObject) -> Self {
        match object.as_body() {
            Some(body) => {
                let dynamic = body.mode().is_dynamic();
                Self {
                    rid,
                    dynamic,
                    inv_mass: if dynamic { body.inv_mass() } else { Fix128::ZERO },
                    inv_inertia: if body.mode() == BodyMode::Dynamic {
                        body.inv_inertia_tensor()
                    } else {
                        Mat3Fix::ZERO
                    },
                    linear_velocity: body.linear_velocity,
                    angular_velocity: body.angular_velocity,
                    biased_linear_velocity: body.biased_linear_velocity,
                    biased_angular_velocity: body.biased_angular_velocity,
                }
            }
            None => Self::fixed(rid),
        }
    }

    fn fixed(rid: Rid) -> Self {
        Self {
            rid,
            dynamic: false,
            inv_mass: Fix128::ZERO,
            inv_inertia: Mat3Fix::ZERO,
            linear_velocity: Vec3Fix::ZERO,
            angular_velocity: Vec3Fix::ZERO,
            biased_linear_velocity: Vec3Fix::ZERO,
            biased_angular_velocity: Vec3Fix::ZERO,
        }
    }

    /// Velocity of a point given relative to the center of mass
    #[inline]
    pub fn velocity_at(&self, r: Vec3Fix) -> Vec3Fix {
        self.linear_velocity + self.angular_velocity.cross(r)
    }

    #[inline]
    pub fn biased_velocity_at(&self, r: Vec3Fix) -> Vec3Fix {
        self.biased_linear_velocity + self.biased_angular_velocity.cross(r)
    }

    /// `r` is relative to the center of mass
    #[inline]
    pub fn apply_impulse(&mut self, impulse: Vec3Fix, r: Vec3Fix) {
        if !self.dynamic {
            return;
        }
        self.linear_velocity += impulse * self.inv_mass;
        self.angular_velocity += self.inv_inertia.mul_vec(r.cross(impulse));
    }

    /// Split-impulse variant; the angular change is capped at `max_delta_av` when positive
    pub fn apply_bias_impulse(&mut self, impulse: Vec3Fix, r: Vec3Fix, max_delta_av: Fix128) {
        if !self.dynamic {
            return;
        }
        self.biased_linear_velocity += impulse * self.inv_mass;
        let mut delta_av = self.inv_inertia.mul_vec(r.cross(impulse));
        if max_delta_av.is_positive() {
            let len = delta_av.length();
            if len > max_delta_av {
                delta_av = delta_av * (max_delta_av / len);
            }
        }
        self.biased_angular_velocity += delta_av;
    }

    /// Copy solved velocities back; only dynamic bodies are written
    pub(crate) fn write_back(&self, object: &mut CollisionObject) {
        if !self.dynamic {
            return;
        }
        if let Some(body) = object.as_body_mut() {
            body.linear_velocity = self.linear_velocity;
            body.angular_velocity = self.angular_velocity;
            body.biased_linear_velocity = self.biased_linear_velocity;
            body.biased_angular_velocity = self.biased_angular_velocity;
        }
    }
}

/// Effective inverse mass of a pair along `n` at offsets `ra`, `rb` from the centers of mass
pub(crate) fn effective_inv_mass(
    inv_mass_a: Fix128,
    inv_inertia_a: &Mat3Fix,
    ra: Vec3Fix,
    inv_mass_b: Fix128,
    inv_inertia_b: &Mat3Fix,
    rb: Vec3Fix,
    n: Vec3Fix,
) -> Fix128 {
    let ia = inv_inertia_a.mul_vec(ra.cross(n)).cross(ra);
    let ib = inv_inertia_b.mul_vec(rb.cross(n)).cross(rb);
    inv_mass_a + inv_mass_b + n.dot(ia + ib)
}

/// Inverse mass and world inverse inertia as the solver sees them
pub(crate) fn solver_mass(object: &CollisionObject) -> (Fix128, Mat3Fix) {
    match object.as_body() {
        Some(b) if b.mode() == BodyMode::Dynamic => (b.inv_mass(), b.inv_inertia_tensor()),
        Some(b) if b.mode() == BodyMode::DynamicLinear => (b.inv_mass(), Mat3Fix::ZERO),
        _ => (Fix128::ZERO, Mat3Fix::ZERO),
    }
}

/// A pair or joint
#[derive(Clone, Debug)]
pub enum Constraint {
    /// Two rigid bodies in contact
    BodyPair(BodyPair),
    /// A body overlapping an area
    AreaPair(AreaPair),
    /// Two overlapping areas
    Area2Pair(Area2Pair),
    /// A soft body overlapping an area
    AreaSoftBodyPair(AreaSoftBodyPair),
    /// Host-authored joint
    Joint(Joint),
}

impl Constraint {
    pub fn base(&self) -> &ConstraintBase {
        match self {
            Constraint::BodyPair(c) => &c.base,
            Constraint::AreaPair(c) => &c.base,
            Constraint::Area2Pair(c) => &c.base,
            Constraint::AreaSoftBodyPair(c) => &c.base,
            Constraint::Joint(c) => &c.base,
        }
    }

    pub(crate) fn base_mut(&mut self) -> &mut ConstraintBase {
        match self {
            Constraint::BodyPair(c) => &mut c.base,
            Constraint::AreaPair(c) => &mut c.base,
            Constraint::Area2Pair(c) => &mut c.base,
            Constraint::AreaSoftBodyPair(c) => &mut c.base,
            Constraint::Joint(c) => &mut c.base,
        }
    }

    #[inline]
    pub fn objects(&self) -> &[Rid; 2] {
        self.base().objects()
    }

    /// Pairs and joints that take part in the impulse solve
    #[inline]
    pub fn is_solvable(&self) -> bool {
        matches!(self, Constraint::BodyPair(_) | Constraint::Joint(_))
    }

    pub fn as_joint(&self) -> Option<&Joint> {
        match self {
            Constraint::Joint(j) => Some(j),
            _ => None,
        }
    }

    pub fn as_joint_mut(&mut self) -> Option<&mut Joint> {
        match self {
            Constraint::Joint(j) => Some(j),
            _ => None,
        }
    }

    pub fn as_body_pair(&self) -> Option<&BodyPair> {
        match self {
            Constraint::BodyPair(p) => Some(p),
            _ => None,
        }
    }

    /// Returns whether `pre_solve` should run this step
    pub(crate) fn setup(&mut self, objects: &ObjectArena, config: &SpaceConfig, delta: Fix128) -> bool {
        match self {
            Constraint::BodyPair(c) => c.setup(objects, config, delta),
            Constraint::AreaPair(c) => c.setup(objects),
            Constraint::Area2Pair(c) => c.setup(objects),
            Constraint::AreaSoftBodyPair(c) => c.setup(objects),
            Constraint::Joint(c) => c.setup(objects, config, delta),
        }
    }

    /// Returns whether `solve` should run this step
    pub(crate) fn pre_solve(
        &mut self,
        objects: &mut ObjectArena,
        events: &mut StepEvents,
        config: &SpaceConfig,
        delta: Fix128,
    ) -> bool {
        match self {
            Constraint::BodyPair(c) => c.pre_solve(objects, events, config, delta),
            Constraint::AreaPair(c) => c.pre_solve(objects, events),
            Constraint::Area2Pair(c) => c.pre_solve(objects, events),
            Constraint::AreaSoftBodyPair(c) => c.pre_solve(objects, events),
            Constraint::Joint(c) => c.pre_solve(objects),
        }
    }

    pub(crate) fn solve(&mut self, bodies: &mut [SolverBody], delta: Fix128) {
        let [sa, sb] = self.base().slots;
        if sa == sb || sa >= bodies.len() || sb >= bodies.len() {
            return;
        }
        let (a, b) = pair_mut(bodies, sa, sb);
        match self {
            Constraint::BodyPair(c) => c.solve(a, b, delta),
            Constraint::Joint(c) => c.solve(a, b, delta),
            // Notification-only pairs have nothing to solve
            _ => {}
        }
    }

    /// Undo every effect on the participants before the constraint is dropped
    pub(crate) fn on_remove(&mut self, objects: &mut ObjectArena, events: &mut StepEvents) {
        match self {
            Constraint::AreaPair(c) => c.on_remove(objects, events),
            Constraint::Area2Pair(c) => c.on_remove(objects, events),
            Constraint::AreaSoftBodyPair(c) => c.on_remove(objects, events),
            Constraint::Joint(c) => c.on_remove(objects),
            Constraint::BodyPair(_) => {}
        }
    }
}

/// Two distinct mutable entries of a slice
fn pair_mut<T>(items: &mut [T], a: usize, b: usize) -> (&mut T, &mut T) {
    if a < b {
        let (lo, hi) = items.split_at_mut(b);
        (&mut lo[a], &mut hi[0])
    } else {
        let (lo, hi) = items.split_at_mut(a);
        (&mut hi[0], &mut lo[b])
    }
}
