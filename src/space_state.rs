//! Direct Space Queries
//!
//! Read-only point, ray and shape queries against the broad phase and the
//! narrow phase of a [`Space`](crate::space::Space), plus the body motion
//! test used by character controllers.
//!
//! Every query culls candidate leaves through the broad phase, filters them
//! with a [`QueryFilter`], and runs the exact test per shape instance.
//! Result counts are capped by the caller's `max` and never exceed
//! [`INTERSECTION_QUERY_MAX`].

use crate::broad_phase::{BroadPhase, LeafOwner};
use crate::collision_object::{CollisionObject, ObjectKind, Rid, ShapeInstance};
use crate::collision_solver::CollisionSolver;
use crate::config::INTERSECTION_QUERY_MAX;
use crate::gjk::gjk_distance;
use crate::math::{Fix128, Transform, Vec3Fix, AABB};
use crate::shape::{ConvexSupport, Shape, SupportFeature};
use crate::space::World;

use alloc::collections::BTreeSet;

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

/// Binary search steps of a motion cast
const CAST_MOTION_ITERATIONS: usize = 8;

/// Depenetration passes of a body motion test
const RECOVERY_ITERATIONS: usize = 4;

/// Share of the penetration removed per recovery pass
const RECOVERY_FACTOR: Fix128 = Fix128 {
    hi: 0,
    lo: 0x6666_6666_6666_6666,
}; // 0.4

/// Contacts gathered per recovery pass
const RECOVERY_MAX_CONTACTS: usize = 32;

/// Lower bound of the motion test margin (~1e-4)
const MOTION_MARGIN_MIN: Fix128 = Fix128 {
    hi: 0,
    lo: 0x0006_8DB8_BAC7_10CB,
};

/// Which objects a query may report
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryFilter {
    pub exclude: BTreeSet<Rid>,
    pub collision_mask: u32,
    pub collide_with_bodies: bool,
    pub collide_with_areas: bool,
}

impl Default for QueryFilter {
    fn default() -> Self {
        Self {
            exclude: BTreeSet::new(),
            collision_mask: u32::MAX,
            collide_with_bodies: true,
            collide_with_areas: false,
        }
    }
}

impl QueryFilter {
    pub fn with_mask(mut self, mask: u32) -> Self {
        self.collision_mask = mask;
        self
    }

    pub fn with_areas(mut self, areas: bool) -> Self {
        self.collide_with_areas = areas;
        self
    }

    pub fn with_bodies(mut self, bodies: bool) -> Self {
        self.collide_with_bodies = bodies;
        self
    }

    pub fn excluding(mut self, rid: Rid) -> Self {
        self.exclude.insert(rid);
        self
    }

    fn accepts(&self, rid: Rid, object: &CollisionObject) -> bool {
        if self.exclude.contains(&rid) || object.collision_layer & self.collision_mask == 0 {
            return false;
        }
        match object.kind() {
            ObjectKind::Area => self.collide_with_areas,
            ObjectKind::Body => self.collide_with_bodies,
            // Soft bodies carry no shapes to test against
            ObjectKind::SoftBody => false,
        }
    }
}

/// One overlapping shape
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShapeResult {
    pub rid: Rid,
    pub instance_id: Option<u64>,
    pub shape: usize,
}

/// Closest ray hit
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RayResult {
    pub position: Vec3Fix,
    /// Zero when the ray starts inside the shape
    pub normal: Vec3Fix,
    pub rid: Rid,
    pub instance_id: Option<u64>,
    pub shape: usize,
    pub face_index: Option<usize>,
}

/// Segment query input
#[derive(Clone, Debug)]
pub struct RayParameters {
    pub from: Vec3Fix,
    pub to: Vec3Fix,
    pub filter: QueryFilter,
    /// Report a hit at `from` for shapes containing it
    pub hit_from_inside: bool,
    /// Skip objects that are not ray pickable
    pub pick_ray: bool,
}

impl RayParameters {
    pub fn new(from: Vec3Fix, to: Vec3Fix) -> Self {
        Self {
            from,
            to,
            filter: QueryFilter::default(),
            hit_from_inside: false,
            pick_ray: false,
        }
    }
}

/// Shape query input
#[derive(Clone, Debug)]
pub struct ShapeParameters<'s> {
    pub shape: &'s Shape,
    pub transform: Transform,
    pub motion: Vec3Fix,
    pub margin: Fix128,
    pub filter: QueryFilter,
}

impl<'s> ShapeParameters<'s> {
    pub fn new(shape: &'s Shape, transform: Transform) -> Self {
        Self {
            shape,
            transform,
            motion: Vec3Fix::ZERO,
            margin: Fix128::ZERO,
            filter: QueryFilter::default(),
        }
    }

    pub fn with_motion(mut self, motion: Vec3Fix) -> Self {
        self.motion = motion;
        self
    }

    pub fn with_margin(mut self, margin: Fix128) -> Self {
        self.margin = margin;
        self
    }

    pub fn with_filter(mut self, filter: QueryFilter) -> Self {
        self.filter = filter;
        self
    }

    fn swept_aabb(&self) -> AABB {
        self.shape
            .aabb(&self.transform)
            .merged_with_motion(self.motion)
            .grow(self.margin)
    }
}

/// Deepest contact of a shape at rest
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RestInfo {
    /// Point on the other object
    pub point: Vec3Fix,
    /// Pointing from the other object toward the query shape
    pub normal: Vec3Fix,
    pub rid: Rid,
    pub instance_id: Option<u64>,
    pub shape: usize,
    pub linear_velocity: Vec3Fix,
}

/// Outcome of a body motion test that hit something
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MotionResult {
    /// Applied motion, depenetration included
    pub travel: Vec3Fix,
    /// Motion left after the hit
    pub remainder: Vec3Fix,
    pub collision_point: Vec3Fix,
    pub collision_normal: Vec3Fix,
    pub collision_depth: Fix128,
    pub collider: Rid,
    pub collider_instance_id: Option<u64>,
    pub collider_shape: usize,
    pub collider_velocity: Vec3Fix,
    /// Shape of the moving body
    pub local_shape: usize,
    pub safe_fraction: Fix128,
    pub unsafe_fraction: Fix128,
}

/// A convex shape swept along a local motion
struct MotionShape<'s> {
    shape: &'s Shape,
    motion: Vec3Fix,
}

impl ConvexSupport for MotionShape<'_> {
    fn core_support(&self, dir: Vec3Fix) -> Vec3Fix {
        let p = self.shape.core_support(dir);
        if self.motion.dot(dir).is_positive() {
            p + self.motion
        } else {
            p
        }
    }

    fn core_radius(&self) -> Fix128 {
        self.shape.core_radius()
    }

    fn supports(&self, dir: Vec3Fix) -> SupportFeature {
        SupportFeature::point(self.support(dir))
    }
}

/// Deepest contact seen by a sink
#[derive(Default)]
struct DeepestContact {
    best: Option<(Fix128, Vec3Fix, Vec3Fix)>,
}

impl DeepestContact {
    fn offer(&mut self, a: Vec3Fix, b: Vec3Fix) -> bool {
        let depth = a.distance_to(b);
        if self.best.map_or(true, |(d, _, _)| depth > d) {
            self.best = Some((depth, a, b));
            return true;
        }
        false
    }
}

/// Read-only view used for direct queries
pub struct SpaceState<'a> {
    world: &'a World,
    broad_phase: &'a dyn BroadPhase<World>,
}

impl<'a> SpaceState<'a> {
    pub(crate) fn new(world: &'a World, broad_phase: &'a dyn BroadPhase<World>) -> Self {
        Self { world, broad_phase }
    }

    /// Accepted candidates as (rid, object, shape index, instance)
    fn candidates<'s>(
        &'s self,
        leaves: &'s [LeafOwner],
        filter: &'s QueryFilter,
    ) -> impl Iterator<Item = (Rid, &'a CollisionObject, usize, &'a ShapeInstance)> + 's {
        let world: &'a World = self.world;
        let objects = &world.objects;
        leaves.iter().filter_map(move |leaf| {
            let object = objects.get(leaf.object)?;
            if !filter.accepts(leaf.object, object) {
                return None;
            }
            let inst = object.shapes().get(leaf.subindex)?;
            if inst.disabled {
                return None;
            }
            Some((leaf.object, object, leaf.subindex, inst))
        })
    }

    fn cull_aabb(&self, aabb: &AABB) -> Vec<LeafOwner> {
        let mut leaves = Vec::new();
        self.broad_phase.cull_aabb(aabb, &mut leaves, INTERSECTION_QUERY_MAX);
        leaves
    }

    fn velocity_at(object: &CollisionObject, point: Vec3Fix) -> Vec3Fix {
        object
            .as_body()
            .map_or(Vec3Fix::ZERO, |b| b.velocity_at(point - object.transform().origin))
    }

    /// Shapes containing `point`
    pub fn intersect_point(
        &self,
        point: Vec3Fix,
        filter: &QueryFilter,
        results: &mut Vec<ShapeResult>,
        max: usize,
    ) -> usize {
        let max = max.min(INTERSECTION_QUERY_MAX);
        let mut leaves = Vec::new();
        self.broad_phase.cull_point(point, &mut leaves, INTERSECTION_QUERY_MAX);

        let start = results.len();
        for (rid, object, index, inst) in self.candidates(&leaves, filter) {
            if results.len() - start >= max {
                break;
            }
            let local = inst.xform_inv.xform(object.inv_transform().xform(point));
            if inst.shape.intersect_point(local) {
                results.push(ShapeResult {
                    rid,
                    instance_id: object.instance_id,
                    shape: index,
                });
            }
        }
        results.len() - start
    }

    /// Closest hit along the segment
    pub fn intersect_ray(&self, params: &RayParameters) -> Option<RayResult> {
        let mut leaves = Vec::new();
        self.broad_phase
            .cull_segment(params.from, params.to, &mut leaves, INTERSECTION_QUERY_MAX);

        let mut best: Option<(Fix128, RayResult)> = None;
        for (rid, object, index, inst) in self.candidates(&leaves, &params.filter) {
            if params.pick_ray && !object.ray_pickable {
                continue;
            }
            let shape_xf = object.transform().mul(&inst.xform);
            let inv = inst.xform_inv.mul(object.inv_transform());
            let local_from = inv.xform(params.from);
            let local_to = inv.xform(params.to);

            let (point, normal, face_index) =
                if params.hit_from_inside && inst.shape.intersect_point(local_from) {
                    (params.from, Vec3Fix::ZERO, None)
                } else {
                    let Some(hit) = inst.shape.intersect_segment(local_from, local_to) else {
                        continue;
                    };
                    (
                        shape_xf.xform(hit.point),
                        shape_xf.basis_xform(hit.normal).normalize(),
                        hit.face_index,
                    )
                };

            let distance = params.from.distance_squared_to(point);
            if best.map_or(true, |(d, _)| distance < d) {
                best = Some((
                    distance,
                    RayResult {
                        position: point,
                        normal,
                        rid,
                        instance_id: object.instance_id,
                        shape: index,
                        face_index,
                    },
                ));
            }
        }
        best.map(|(_, hit)| hit)
    }

    /// Shapes overlapping the query shape
    pub fn intersect_shape(&self, params: &ShapeParameters<'_>, results: &mut Vec<ShapeResult>, max: usize) -> usize {
        let max = max.min(INTERSECTION_QUERY_MAX);
        let aabb = params.shape.aabb(&params.transform).grow(params.margin);
        let leaves = self.cull_aabb(&aabb);

        let start = results.len();
        for (rid, object, index, inst) in self.candidates(&leaves, &params.filter) {
            if results.len() - start >= max {
                break;
            }
            let shape_xf = object.transform().mul(&inst.xform);
            if CollisionSolver::solve_static(
                params.shape,
                &params.transform,
                &inst.shape,
                &shape_xf,
                None,
                None,
                params.margin,
                Fix128::ZERO,
            ) {
                results.push(ShapeResult {
                    rid,
                    instance_id: object.instance_id,
                    shape: index,
                });
            }
        }
        results.len() - start
    }

    /// Fractions `(safe, unsafe)` of `params.motion` the shape can travel
    ///
    /// `(1, 1)` when nothing is in the way. Objects the shape already
    /// overlaps at the start are ignored.
    pub fn cast_motion(&self, params: &ShapeParameters<'_>) -> (Fix128, Fix128) {
        let aabb = params.swept_aabb();
        let leaves = self.cull_aabb(&aabb);
        let mut best = (Fix128::ONE, Fix128::ONE);

        for (_, object, _, inst) in self.candidates(&leaves, &params.filter) {
            let shape_xf = object.transform().mul(&inst.xform);
            let hit = cast_against(params.shape, &params.transform, params.motion, &inst.shape, &shape_xf, &aabb);
            if let Some((safe, unsafe_)) = hit {
                if safe < best.0 {
                    best = (safe, unsafe_);
                }
            }
        }
        best
    }

    /// Contact pairs `(point on query shape, point on other)`
    pub fn collide_shape(
        &self,
        params: &ShapeParameters<'_>,
        results: &mut Vec<(Vec3Fix, Vec3Fix)>,
        max: usize,
    ) -> usize {
        let max = max.min(INTERSECTION_QUERY_MAX);
        let leaves = self.cull_aabb(&params.swept_aabb());
        let moved = params.transform.translated(params.motion);

        let start = results.len();
        for (_, object, _, inst) in self.candidates(&leaves, &params.filter) {
            if results.len() - start >= max {
                break;
            }
            let shape_xf = object.transform().mul(&inst.xform);
            let mut sink = |a: Vec3Fix, b: Vec3Fix| {
                if results.len() - start < max {
                    results.push((a, b));
                }
            };
            CollisionSolver::solve_static(
                params.shape,
                &moved,
                &inst.shape,
                &shape_xf,
                Some(&mut sink),
                None,
                params.margin,
                Fix128::ZERO,
            );
        }
        results.len() - start
    }

    /// Deepest contact of the shape placed at `params.transform + params.motion`
    pub fn rest_info(&self, params: &ShapeParameters<'_>) -> Option<RestInfo> {
        let leaves = self.cull_aabb(&params.swept_aabb());
        let moved = params.transform.translated(params.motion);

        let mut deepest = DeepestContact::default();
        let mut owner = None;
        for (rid, object, index, inst) in self.candidates(&leaves, &params.filter) {
            let shape_xf = object.transform().mul(&inst.xform);
            let mut improved = false;
            let mut sink = |a: Vec3Fix, b: Vec3Fix| improved |= deepest.offer(a, b);
            CollisionSolver::solve_static(
                params.shape,
                &moved,
                &inst.shape,
                &shape_xf,
                Some(&mut sink),
                None,
                params.margin,
                Fix128::ZERO,
            );
            if improved {
                owner = Some((rid, object, index));
            }
        }

        let (_, a, b) = deepest.best?;
        let (rid, object, shape) = owner?;
        Some(RestInfo {
            point: b,
            normal: (b - a).normalize(),
            rid,
            instance_id: object.instance_id,
            shape,
            linear_velocity: Self::velocity_at(object, b),
        })
    }

    // ------------------------------------------------------------------
    // Body motion
    // ------------------------------------------------------------------

    /// Bodies `body` may hit, per its mask and exceptions
    fn motion_filter(&self, body: Rid) -> Option<QueryFilter> {
        let object = self.world.objects.get(body)?;
        let b = object.as_body()?;
        let mut filter = QueryFilter::default().with_mask(object.collision_mask);
        filter.exclude.insert(body);
        filter.exclude.extend(b.collision_exceptions());
        Some(filter)
    }

    fn body_aabb(object: &CollisionObject, xf: &Transform) -> Option<AABB> {
        object
            .shapes()
            .iter()
            .filter(|s| !s.disabled)
            .map(|s| s.shape.aabb(&xf.mul(&s.xform)))
            .reduce(|a, b| a.union(&b))
    }

    fn excepted(&self, body: Rid, other: &CollisionObject) -> bool {
        other.as_body().map_or(false, |b| b.has_exception(body))
    }

    /// Push the body out of whatever it overlaps; returns the applied offset
    fn recover(
        &self,
        body: Rid,
        object: &CollisionObject,
        xf: &mut Transform,
        filter: &QueryFilter,
        margin: Fix128,
    ) -> Option<Vec3Fix> {
        let min_contact_depth = margin * Fix128::from_ratio(1, 10);
        let mut total = Vec3Fix::ZERO;
        let mut recovered = false;

        for _ in 0..RECOVERY_ITERATIONS {
            let Some(aabb) = Self::body_aabb(object, xf) else {
                break;
            };
            let leaves = self.cull_aabb(&aabb.grow(margin));
            let mut contacts: Vec<(Vec3Fix, Vec3Fix)> = Vec::new();

            for inst in object.shapes().iter().filter(|s| !s.disabled) {
                let body_shape_xf = xf.mul(&inst.xform);
                for (_, other, _, other_inst) in self.candidates(&leaves, filter) {
                    if self.excepted(body, other) {
                        continue;
                    }
                    let other_xf = other.transform().mul(&other_inst.xform);
                    let mut sink = |a: Vec3Fix, b: Vec3Fix| {
                        if contacts.len() < RECOVERY_MAX_CONTACTS {
                            contacts.push((a, b));
                        }
                    };
                    CollisionSolver::solve_static(
                        &inst.shape,
                        &body_shape_xf,
                        &other_inst.shape,
                        &other_xf,
                        Some(&mut sink),
                        None,
                        margin,
                        Fix128::ZERO,
                    );
                }
            }
            if contacts.is_empty() {
                break;
            }

            let mut step = Vec3Fix::ZERO;
            for (a, b) in contacts {
                let n = (a - b).normalize();
                if n.is_zero() {
                    continue;
                }
                let depth = n.dot(a + step) - n.dot(b);
                if depth > min_contact_depth + Fix128::CMP_EPSILON {
                    step -= n * ((depth - min_contact_depth) * RECOVERY_FACTOR);
                }
            }
            if step.is_zero() {
                break;
            }
            recovered = true;
            xf.origin += step;
            total += step;
        }

        if recovered {
            Some(total)
        } else {
            None
        }
    }

    /// Sweep a body from `from` along `motion`
    ///
    /// The body is first pushed out of any overlap, then cast along the
    /// motion; the deepest contact at the unsafe fraction is reported.
    /// `None` when the motion completes without touching anything.
    pub fn body_motion(&self, body: Rid, from: &Transform, motion: Vec3Fix, margin: Fix128) -> Option<MotionResult> {
        let object = self.world.objects.get(body)?;
        let filter = self.motion_filter(body)?;
        let margin = margin.max(MOTION_MARGIN_MIN);

        let mut xf = *from;
        let recovery = self.recover(body, object, &mut xf, &filter, margin);
        let recover_motion = recovery.unwrap_or(Vec3Fix::ZERO);

        // Cast
        let mut safe = Fix128::ONE;
        let mut unsafe_ = Fix128::ONE;
        let mut best_shape = None;
        if !motion.is_zero() {
            for (index, inst) in object.shapes().iter().enumerate().filter(|(_, s)| !s.disabled) {
                let body_shape_xf = xf.mul(&inst.xform);
                let aabb = inst
                    .shape
                    .aabb(&body_shape_xf)
                    .merged_with_motion(motion)
                    .grow(margin);
                let leaves = self.cull_aabb(&aabb);
                for (_, other, _, other_inst) in self.candidates(&leaves, &filter) {
                    if self.excepted(body, other) {
                        continue;
                    }
                    let other_xf = other.transform().mul(&other_inst.xform);
                    let hit = cast_against(&inst.shape, &body_shape_xf, motion, &other_inst.shape, &other_xf, &aabb);
                    if let Some((s, u)) = hit {
                        if s < safe {
                            safe = s;
                            unsafe_ = u;
                            best_shape = Some(index);
                        }
                    }
                }
            }
        }

        if recovery.is_none() && best_shape.is_none() {
            return None;
        }

        // Rest info at the unsafe position
        let unsafe_xf = xf.translated(motion * unsafe_);
        let mut deepest = DeepestContact::default();
        let mut owner = None;
        for (index, inst) in object.shapes().iter().enumerate().filter(|(_, s)| !s.disabled) {
            if best_shape.map_or(false, |b| b != index) {
                continue;
            }
            let body_shape_xf = unsafe_xf.mul(&inst.xform);
            let aabb = inst.shape.aabb(&body_shape_xf).grow(margin);
            let leaves = self.cull_aabb(&aabb);
            for (rid, other, other_index, other_inst) in self.candidates(&leaves, &filter) {
                if self.excepted(body, other) {
                    continue;
                }
                let other_xf = other.transform().mul(&other_inst.xform);
                let mut improved = false;
                let mut sink = |a: Vec3Fix, b: Vec3Fix| improved |= deepest.offer(a, b);
                CollisionSolver::solve_static(
                    &inst.shape,
                    &body_shape_xf,
                    &other_inst.shape,
                    &other_xf,
                    Some(&mut sink),
                    None,
                    margin,
                    Fix128::ZERO,
                );
                if improved {
                    owner = Some((rid, other, other_index, index));
                }
            }
        }

        let (depth, a, b) = deepest.best?;
        let (collider, other, collider_shape, local_shape) = owner?;
        let travel = motion * safe + recover_motion;
        Some(MotionResult {
            travel,
            remainder: motion - motion * safe,
            collision_point: b,
            collision_normal: (b - a).normalize(),
            collision_depth: depth,
            collider,
            collider_instance_id: other.instance_id,
            collider_shape,
            collider_velocity: Self::velocity_at(other, b),
            local_shape,
            safe_fraction: safe,
            unsafe_fraction: unsafe_,
        })
    }
}

/// Separated at `xf`, per the distance solver
fn separated(shape: &Shape, xf: &Transform, other: &Shape, other_xf: &Transform, hint: &AABB) -> bool {
    CollisionSolver::solve_distance(shape, xf, other, other_xf, hint).is_some()
}

/// Binary search of the first touching fraction of `motion`
///
/// `None` when the shapes already overlap at the start or never meet.
fn cast_against(
    shape: &Shape,
    xf: &Transform,
    motion: Vec3Fix,
    other: &Shape,
    other_xf: &Transform,
    world_aabb: &AABB,
) -> Option<(Fix128, Fix128)> {
    let hint = world_aabb.transformed(&other_xf.affine_inverse());

    if shape.is_convex() && other.is_convex() {
        let swept = MotionShape {
            shape,
            motion: xf.basis_xform_inv(motion),
        };
        let r = gjk_distance(&swept, xf, other, other_xf, motion);
        if !r.overlapping && r.distance > swept.core_radius() + other.core_radius() {
            return None;
        }
    }

    if !separated(shape, xf, other, other_xf, &hint) {
        return None;
    }

    let mut low = Fix128::ZERO;
    let mut high = Fix128::ONE;
    for _ in 0..CAST_MOTION_ITERATIONS {
        let fraction = (low + high).half();
        if separated(shape, &xf.translated(motion * fraction), other, other_xf, &hint) {
            low = fraction;
        } else {
            high = fraction;
        }
    }
    if high >= Fix128::ONE && separated(shape, &xf.translated(motion), other, other_xf, &hint) {
        return None;
    }
    Some((low, high))
}

#[cfg(test)]
mod tests {
    use crate::area::Area;
    use crate::body::{Body, BodyMode};
    use crate::math::{Fix128, Transform, Vec3Fix};
    use crate::shape::Shape;
    use crate::space::Space;
    use alloc::sync::Arc;

    use super::*;

    fn at(x: i64, y: i64, z: i64) -> Transform {
        Transform::from_origin(Vec3Fix::from_int(x, y, z))
    }

    fn unit_box() -> Arc<Shape> {
        Arc::new(Shape::cuboid(Vec3Fix::from_int(1, 1, 1)))
    }

    fn space_with_wall() -> (Space, Rid) {
        let mut space = Space::new().unwrap();
        let wall = space.add_body(Body::new(BodyMode::Static), at(10, 0, 0)).unwrap();
        space.add_shape(wall, unit_box(), Transform::IDENTITY, false).unwrap();
        (space, wall)
    }

    #[test]
    fn test_intersect_point() {
        let (space, wall) = space_with_wall();
        let state = space.direct_state();
        let mut results = Vec::new();
        let n = state.intersect_point(Vec3Fix::from_int(10, 0, 0), &QueryFilter::default(), &mut results, 8);
        assert_eq!(n, 1);
        assert_eq!(results[0].rid, wall);

        results.clear();
        let n = state.intersect_point(
            Vec3Fix::from_int(10, 0, 0),
            &QueryFilter::default().excluding(wall),
            &mut results,
            8,
        );
        assert_eq!(n, 0);
    }

    #[test]
    fn test_intersect_ray_hits_near_face() {
        let (space, wall) = space_with_wall();
        let hit = space
            .direct_state()
            .intersect_ray(&RayParameters::new(Vec3Fix::ZERO, Vec3Fix::from_int(20, 0, 0)))
            .unwrap();
        assert_eq!(hit.rid, wall);
        assert!((hit.position.x - Fix128::from_int(9)).abs() < Fix128::from_ratio(1, 1000));
        assert!(hit.normal.x < Fix128::ZERO);

        let miss = space
            .direct_state()
            .intersect_ray(&RayParameters::new(Vec3Fix::ZERO, Vec3Fix::from_int(0, 20, 0)));
        assert!(miss.is_none());
    }

    #[test]
    fn test_areas_need_opt_in() {
        let mut space = Space::new().unwrap();
        let area = space.add_area(Area::new(), at(0, 0, 0)).unwrap();
        space.add_shape(area, unit_box(), Transform::IDENTITY, false).unwrap();
        let state = space.direct_state();
        let mut results = Vec::new();
        assert_eq!(state.intersect_point(Vec3Fix::ZERO, &QueryFilter::default(), &mut results, 8), 0);
        assert_eq!(
            state.intersect_point(Vec3Fix::ZERO, &QueryFilter::default().with_areas(true), &mut results, 8),
            1
        );
    }

    #[test]
    fn test_cast_motion_stops_before_wall() {
        let (space, _) = space_with_wall();
        let probe = Shape::sphere(Fix128::HALF);
        let params = ShapeParameters::new(&probe, Transform::IDENTITY).with_motion(Vec3Fix::from_int(20, 0, 0));
        let (safe, unsafe_) = space.direct_state().cast_motion(&params);
        // Contact at x = 8.5, i.e. fraction 0.425
        assert!(safe <= unsafe_);
        assert!(safe < Fix128::from_ratio(425, 1000));
        assert!(unsafe_ > Fix128::from_ratio(41, 100));

        let clear = ShapeParameters::new(&probe, Transform::IDENTITY).with_motion(Vec3Fix::from_int(0, 5, 0));
        assert_eq!(space.direct_state().cast_motion(&clear), (Fix128::ONE, Fix128::ONE));
    }

    #[test]
    fn test_rest_info_normal_faces_query() {
        let (space, wall) = space_with_wall();
        let probe = Shape::sphere(Fix128::ONE);
        let params = ShapeParameters::new(&probe, at(8, 0, 0)).with_motion(Vec3Fix::new(Fix128::HALF, Fix128::ZERO, Fix128::ZERO));
        let info = space.direct_state().rest_info(&params).unwrap();
        assert_eq!(info.rid, wall);
        assert!(info.normal.x < Fix128::ZERO);
        assert_eq!(info.linear_velocity, Vec3Fix::ZERO);

        let mut pairs = Vec::new();
        assert!(space.direct_state().collide_shape(&params, &mut pairs, 4) > 0);
        assert!(pairs.len() <= 4);
    }

    #[test]
    fn test_body_motion_hits_floor() {
        let mut space = Space::new().unwrap();
        let floor = space.add_body(Body::new(BodyMode::Static), at(0, -1, 0)).unwrap();
        space
            .add_shape(floor, Arc::new(Shape::cuboid(Vec3Fix::from_int(10, 1, 10))), Transform::IDENTITY, false)
            .unwrap();
        let mover = space.add_body(Body::new(BodyMode::Kinematic), at(0, 3, 0)).unwrap();
        space.add_shape(mover, unit_box(), Transform::IDENTITY, false).unwrap();

        let result = space
            .test_body_motion(mover, &at(0, 3, 0), Vec3Fix::from_int(0, -5, 0), Fix128::from_ratio(1, 1000))
            .unwrap();
        assert_eq!(result.collider, floor);
        assert!(result.collision_normal.y > Fix128::HALF);
        assert!(result.safe_fraction < Fix128::from_ratio(2, 5));
        assert!(result.travel.y > Fix128::from_int(-2));

        let free = space.test_body_motion(mover, &at(0, 3, 0), Vec3Fix::from_int(0, 1, 0), Fix128::from_ratio(1, 1000));
        assert!(free.is_none());
    }
}
