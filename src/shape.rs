//! Collision Shapes
//!
//! Immutable geometric primitives shared between collision objects through
//! `Arc<Shape>`. Every owner keeps its own local transform for the instance.
//!
//! # Features
//!
//! - Sphere, box, capsule (Y axis), convex hull, triangle mesh
//! - Separation ray probing along local +Z
//! - World boundary (infinite half space)
//! - Support features (point / edge / face) for manifold generation
//! - Segment and point queries in shape-local space
//!
//! Convex kinds are described as a *core* plus a radius: a sphere is a point
//! core, a capsule a segment core. GJK runs on the cores and adds the radius
//! afterwards, which keeps rounded shapes exact.

use crate::dynamic_bvh::AabbTree;
use crate::math::{Fix128, Plane, Transform, Vec3Fix, AABB};

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

/// Maximum number of points a support feature can hold
pub const MAX_SUPPORTS: usize = 16;

/// Half extent of the bounds reported for a world boundary
pub const WORLD_BOUNDARY_EXTENT: i64 = 1 << 21;

/// `|dir . axis|` above which a box reports a whole face
const FACE_SUPPORT_THRESHOLD: Fix128 = Fix128 {
    hi: 0,
    lo: 0xFAE1_47AE_147A_E000, // 0.98
};

/// `|dir . axis|` below which a box or capsule reports an edge along `axis`
const EDGE_SUPPORT_THRESHOLD: Fix128 = Fix128 {
    hi: 0,
    lo: 0x0CCC_CCCC_CCCC_CCCD, // 0.05
};

/// Relative tolerance for grouping hull vertices into one feature
const HULL_FEATURE_TOLERANCE: Fix128 = Fix128 {
    hi: 0,
    lo: 0x051E_B851_EB85_1EB8, // 0.02
};

// ============================================================================
// Support features
// ============================================================================

/// Shape of the extreme region along a direction
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeatureKind {
    Point,
    Edge,
    Face,
}

/// Extreme points of a shape along a direction
///
/// Face points are ordered around the face (either winding).
#[derive(Clone, Copy, Debug)]
pub struct SupportFeature {
    pub kind: FeatureKind,
    points: [Vec3Fix; MAX_SUPPORTS],
    count: usize,
}

impl SupportFeature {
    /// Single-point feature
    pub fn point(p: Vec3Fix) -> Self {
        let mut f = Self {
            kind: FeatureKind::Point,
            points: [Vec3Fix::ZERO; MAX_SUPPORTS],
            count: 0,
        };
        f.push(p);
        f
    }

    /// Edge feature
    pub fn edge(a: Vec3Fix, b: Vec3Fix) -> Self {
        let mut f = Self::point(a);
        f.kind = FeatureKind::Edge;
        f.push(b);
        f
    }

    /// Face feature from ordered points (extra points beyond capacity are ignored)
    pub fn face(points: &[Vec3Fix]) -> Self {
        let mut f = Self {
            kind: FeatureKind::Face,
            points: [Vec3Fix::ZERO; MAX_SUPPORTS],
            count: 0,
        };
        for p in points {
            f.push(*p);
        }
        f
    }

    fn push(&mut self, p: Vec3Fix) {
        if self.count < MAX_SUPPORTS {
            self.points[self.count] = p;
            self.count += 1;
        }
    }

    /// Feature points
    pub fn points(&self) -> &[Vec3Fix] {
        &self.points[..self.count]
    }

    /// Same feature with every point mapped through `f`
    pub fn map<F: Fn(Vec3Fix) -> Vec3Fix>(&self, f: F) -> Self {
        let mut out = *self;
        for p in out.points[..out.count].iter_mut() {
            *p = f(*p);
        }
        out
    }
}

/// Shapes that GJK, EPA and the manifold builder can consume
pub trait ConvexSupport {
    /// Farthest core point along `dir` (need not be unit)
    fn core_support(&self, dir: Vec3Fix) -> Vec3Fix;

    /// Radius added around the core
    fn core_radius(&self) -> Fix128;

    /// Extreme feature of the full shape along the unit direction `dir`
    fn supports(&self, dir: Vec3Fix) -> SupportFeature;

    /// Farthest point of the full shape along `dir`
    fn support(&self, dir: Vec3Fix) -> Vec3Fix {
        self.core_support(dir) + dir.normalize() * self.core_radius()
    }
}

/// Group the vertices lying within a tolerance of the maximum along `dir`
fn supports_from_vertices(vertices: &[Vec3Fix], dir: Vec3Fix) -> SupportFeature {
    let Some(first) = vertices.first() else {
        return SupportFeature::point(Vec3Fix::ZERO);
    };
    let max = vertices
        .iter()
        .map(|v| v.dot(dir))
        .fold(first.dot(dir), Fix128::max);
    let extent = AABB::from_points(vertices).size();
    let tolerance = extent.x.max(extent.y).max(extent.z) * HULL_FEATURE_TOLERANCE;

    let mut picked = [Vec3Fix::ZERO; MAX_SUPPORTS];
    let mut count = 0;
    for v in vertices {
        if v.dot(dir) >= max - tolerance && count < MAX_SUPPORTS {
            picked[count] = *v;
            count += 1;
        }
    }
    match count {
        0 | 1 => SupportFeature::point(picked[0]),
        2 => SupportFeature::edge(picked[0], picked[1]),
        _ => order_face(&mut picked[..count], dir),
    }
}

/// Sort coplanar points around their centroid; collapse colinear sets to an edge
fn order_face(points: &mut [Vec3Fix], normal: Vec3Fix) -> SupportFeature {
    let n = Fix128::from_int(points.len() as i64);
    let centroid = points.iter().fold(Vec3Fix::ZERO, |acc, p| acc + *p) / n;
    let (mut far_a, mut far_b, mut best) = (points[0], points[1], Fix128::ZERO);
    for (i, a) in points.iter().enumerate() {
        for b in points[i + 1..].iter() {
            let d = a.distance_squared_to(*b);
            if d > best {
                best = d;
                far_a = *a;
                far_b = *b;
            }
        }
    }
    let u = (far_a - centroid).normalize();
    let v = normal.normalize().cross(u);
    let key = |p: &Vec3Fix| {
        let rel = *p - centroid;
        diamond_angle(rel.dot(u), rel.dot(v))
    };
    points.sort_by_key(key);

    let mut area2 = Fix128::ZERO;
    for i in 0..points.len() {
        let a = points[i] - centroid;
        let b = points[(i + 1) % points.len()] - centroid;
        area2 += a.cross(b).length();
    }
    if area2 <= best * HULL_FEATURE_TOLERANCE {
        return SupportFeature::edge(far_a, far_b);
    }
    SupportFeature::face(points)
}

/// Monotone stand-in for `atan2` in `[0, 4)`
fn diamond_angle(x: Fix128, y: Fix128) -> Fix128 {
    let ratio = |num: Fix128, den: Fix128| {
        if den.is_zero() {
            Fix128::ZERO
        } else {
            num / den
        }
    };
    if !y.is_negative() {
        if !x.is_negative() {
            ratio(y, x + y)
        } else {
            Fix128::ONE + ratio(-x, -x + y)
        }
    } else if x.is_negative() {
        Fix128::from_int(2) + ratio(-y, -x - y)
    } else {
        Fix128::from_int(3) + ratio(x, x - y)
    }
}

// ============================================================================
// Triangle
// ============================================================================

/// Triangle with counter-clockwise front face
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Triangle {
    pub v0: Vec3Fix,
    pub v1: Vec3Fix,
    pub v2: Vec3Fix,
}

impl Triangle {
    #[inline]
    pub fn new(v0: Vec3Fix, v1: Vec3Fix, v2: Vec3Fix) -> Self {
        Self { v0, v1, v2 }
    }

    /// Unnormalized face normal
    #[inline]
    pub fn normal(&self) -> Vec3Fix {
        (self.v1 - self.v0).cross(self.v2 - self.v0)
    }

    #[inline]
    pub fn unit_normal(&self) -> Vec3Fix {
        self.normal().normalize()
    }

    #[inline]
    pub fn vertices(&self) -> [Vec3Fix; 3] {
        [self.v0, self.v1, self.v2]
    }

    pub fn aabb(&self) -> AABB {
        AABB::from_points(&self.vertices())
    }

    /// True for zero-area triangles
    pub fn is_degenerate(&self) -> bool {
        self.normal().length_squared().is_zero()
    }

    /// Closest point on the triangle to `p` (Voronoi region walk)
    pub fn closest_point(&self, p: Vec3Fix) -> Vec3Fix {
        let ab = self.v1 - self.v0;
        let ac = self.v2 - self.v0;
        let ap = p - self.v0;

        let d1 = ab.dot(ap);
        let d2 = ac.dot(ap);
        if d1 <= Fix128::ZERO && d2 <= Fix128::ZERO {
            return self.v0;
        }

        let bp = p - self.v1;
        let d3 = ab.dot(bp);
        let d4 = ac.dot(bp);
        if d3 >= Fix128::ZERO && d4 <= d3 {
            return self.v1;
        }

        let vc = d1 * d4 - d3 * d2;
        if vc <= Fix128::ZERO && d1 >= Fix128::ZERO && d3 <= Fix128::ZERO {
            return self.v0 + ab * (d1 / (d1 - d3));
        }

        let cp = p - self.v2;
        let d5 = ab.dot(cp);
        let d6 = ac.dot(cp);
        if d6 >= Fix128::ZERO && d5 <= d6 {
            return self.v2;
        }

        let vb = d5 * d2 - d1 * d6;
        if vb <= Fix128::ZERO && d2 >= Fix128::ZERO && d6 <= Fix128::ZERO {
            return self.v0 + ac * (d2 / (d2 - d6));
        }

        let va = d3 * d6 - d5 * d4;
        let d4_d3 = d4 - d3;
        let d5_d6 = d5 - d6;
        if va <= Fix128::ZERO && d4_d3 >= Fix128::ZERO && d5_d6 >= Fix128::ZERO {
            return self.v1 + (self.v2 - self.v1) * (d4_d3 / (d4_d3 + d5_d6));
        }

        let denom = va + vb + vc;
        if denom.is_zero() {
            return self.v0;
        }
        self.v0 + ab * (vb / denom) + ac * (vc / denom)
    }

    /// Segment hit as `(t, point)`; back faces only when `backface` is set
    pub fn intersect_segment(
        &self,
        from: Vec3Fix,
        to: Vec3Fix,
        backface: bool,
    ) -> Option<(Fix128, Vec3Fix)> {
        let dir = to - from;
        let e1 = self.v1 - self.v0;
        let e2 = self.v2 - self.v0;
        let p = dir.cross(e2);
        let det = e1.dot(p);
        if det.is_zero() || (!backface && det.is_negative()) {
            return None;
        }
        let s = from - self.v0;
        let u = s.dot(p) / det;
        if u < Fix128::ZERO || u > Fix128::ONE {
            return None;
        }
        let q = s.cross(e1);
        let v = dir.dot(q) / det;
        if v < Fix128::ZERO || u + v > Fix128::ONE {
            return None;
        }
        let t = e2.dot(q) / det;
        if t < Fix128::ZERO || t > Fix128::ONE {
            return None;
        }
        Some((t, from + dir * t))
    }
}

impl ConvexSupport for Triangle {
    fn core_support(&self, dir: Vec3Fix) -> Vec3Fix {
        let d0 = self.v0.dot(dir);
        let d1 = self.v1.dot(dir);
        let d2 = self.v2.dot(dir);
        if d0 >= d1 && d0 >= d2 {
            self.v0
        } else if d1 >= d2 {
            self.v1
        } else {
            self.v2
        }
    }

    fn core_radius(&self) -> Fix128 {
        Fix128::ZERO
    }

    fn supports(&self, dir: Vec3Fix) -> SupportFeature {
        supports_from_vertices(&self.vertices(), dir)
    }
}

// ============================================================================
// Concave mesh
// ============================================================================

/// Triangle soup with an AABB tree for culling
#[derive(Clone, Debug)]
pub struct ConcaveMesh {
    triangles: Vec<Triangle>,
    tree: AabbTree<u32>,
    bounds: AABB,
    backface_collision: bool,
}

impl ConcaveMesh {
    /// Build from triangles; degenerate triangles are kept but never collide
    pub fn new(triangles: Vec<Triangle>, backface_collision: bool) -> Self {
        let mut tree = AabbTree::new();
        let mut bounds: Option<AABB> = None;
        for (i, tri) in triangles.iter().enumerate() {
            if tri.is_degenerate() {
                continue;
            }
            let aabb = tri.aabb();
            tree.insert(aabb, i as u32);
            bounds = Some(match bounds {
                Some(b) => b.union(&aabb),
                None => aabb,
            });
        }
        Self {
            triangles,
            tree,
            bounds: bounds.unwrap_or_default(),
            backface_collision,
        }
    }

    pub fn triangles(&self) -> &[Triangle] {
        &self.triangles
    }

    pub fn backface_collision(&self) -> bool {
        self.backface_collision
    }

    pub fn bounds(&self) -> AABB {
        self.bounds
    }

    /// Visit triangles whose bounds touch `aabb`; return `false` to stop
    pub fn cull<F: FnMut(usize, &Triangle) -> bool>(&self, aabb: &AABB, mut visit: F) {
        self.tree
            .query_aabb(aabb, |_, index| visit(index as usize, &self.triangles[index as usize]));
    }

    /// Nearest triangle hit along the segment
    pub fn intersect_segment(&self, from: Vec3Fix, to: Vec3Fix) -> Option<SegmentHit> {
        let mut best: Option<(Fix128, SegmentHit)> = None;
        self.tree.query_segment(from, to, |_, index| {
            let tri = &self.triangles[index as usize];
            if let Some((t, point)) = tri.intersect_segment(from, to, self.backface_collision) {
                if best.as_ref().map_or(true, |(bt, _)| t < *bt) {
                    let mut normal = tri.unit_normal();
                    if normal.dot(to - from).is_positive() {
                        normal = -normal;
                    }
                    best = Some((
                        t,
                        SegmentHit {
                            point,
                            normal,
                            face_index: Some(index as usize),
                        },
                    ));
                }
            }
            true
        });
        best.map(|(_, hit)| hit)
    }

    /// Closest point over every triangle
    pub fn closest_point(&self, p: Vec3Fix) -> Vec3Fix {
        let mut best = p;
        let mut best_d = Fix128::MAX;
        for tri in self.triangles.iter().filter(|t| !t.is_degenerate()) {
            let c = tri.closest_point(p);
            let d = c.distance_squared_to(p);
            if d < best_d {
                best_d = d;
                best = c;
            }
        }
        best
    }
}

// ============================================================================
// Shape
// ============================================================================

/// Result of a segment query in shape-local space
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmentHit {
    pub point: Vec3Fix,
    /// Surface normal facing the segment origin
    pub normal: Vec3Fix,
    /// Triangle index for concave shapes
    pub face_index: Option<usize>,
}

/// Shape geometry
#[derive(Clone, Debug)]
pub enum ShapeKind {
    Sphere {
        radius: Fix128,
    },
    Box {
        half_extents: Vec3Fix,
    },
    /// Y-aligned capsule; `height` includes both caps
    Capsule {
        radius: Fix128,
        height: Fix128,
    },
    ConvexPolygon {
        points: Vec<Vec3Fix>,
    },
    ConcavePolygon(ConcaveMesh),
    /// Probe from the origin along +Z
    SeparationRay {
        length: Fix128,
        slide_on_slope: bool,
    },
    /// Solid below `plane`
    WorldBoundary {
        plane: Plane,
    },
}

/// Immutable collision shape
#[derive(Clone, Debug)]
pub struct Shape {
    kind: ShapeKind,
    local_aabb: AABB,
    /// Contact bias used instead of the space default when non-zero
    pub custom_bias: Fix128,
}

impl Shape {
    fn from_kind(kind: ShapeKind) -> Self {
        let local_aabb = compute_local_aabb(&kind);
        Self {
            kind,
            local_aabb,
            custom_bias: Fix128::ZERO,
        }
    }

    pub fn sphere(radius: Fix128) -> Self {
        Self::from_kind(ShapeKind::Sphere {
            radius: radius.max(Fix128::ZERO),
        })
    }

    pub fn cuboid(half_extents: Vec3Fix) -> Self {
        Self::from_kind(ShapeKind::Box {
            half_extents: half_extents.abs(),
        })
    }

    pub fn capsule(radius: Fix128, height: Fix128) -> Self {
        Self::from_kind(ShapeKind::Capsule {
            radius: radius.max(Fix128::ZERO),
            height: height.max(Fix128::ZERO),
        })
    }

    pub fn convex_polygon(points: Vec<Vec3Fix>) -> Self {
        Self::from_kind(ShapeKind::ConvexPolygon { points })
    }

    pub fn concave_polygon(triangles: Vec<Triangle>, backface_collision: bool) -> Self {
        Self::from_kind(ShapeKind::ConcavePolygon(ConcaveMesh::new(
            triangles,
            backface_collision,
        )))
    }

    pub fn separation_ray(length: Fix128, slide_on_slope: bool) -> Self {
        Self::from_kind(ShapeKind::SeparationRay {
            length: length.max(Fix128::ZERO),
            slide_on_slope,
        })
    }

    /// Half space below `plane` (the normal is normalized here)
    pub fn world_boundary(plane: Plane) -> Self {
        let normal = plane.normal.normalize();
        let len = plane.normal.length();
        let d = if len.is_zero() { Fix128::ZERO } else { plane.d / len };
        Self::from_kind(ShapeKind::WorldBoundary {
            plane: Plane::new(normal, d),
        })
    }

    /// Set the per-shape contact bias
    pub fn with_custom_bias(mut self, bias: Fix128) -> Self {
        self.custom_bias = bias;
        self
    }

    #[inline]
    pub fn kind(&self) -> &ShapeKind {
        &self.kind
    }

    /// Sphere, box, capsule or convex hull
    pub fn is_convex(&self) -> bool {
        matches!(
            self.kind,
            ShapeKind::Sphere { .. }
                | ShapeKind::Box { .. }
                | ShapeKind::Capsule { .. }
                | ShapeKind::ConvexPolygon { .. }
        )
    }

    pub fn is_concave(&self) -> bool {
        matches!(self.kind, ShapeKind::ConcavePolygon(_))
    }

    /// True when the shape cannot produce any contact
    pub fn is_degenerate(&self) -> bool {
        match &self.kind {
            ShapeKind::Sphere { radius } => radius.is_zero(),
            ShapeKind::Box { half_extents } => half_extents.is_zero(),
            ShapeKind::Capsule { radius, height } => radius.is_zero() && height.is_zero(),
            ShapeKind::ConvexPolygon { points } => points.is_empty(),
            ShapeKind::ConcavePolygon(mesh) => mesh.tree.is_empty(),
            ShapeKind::SeparationRay { length, .. } => length.is_zero(),
            ShapeKind::WorldBoundary { plane } => plane.normal.is_zero(),
        }
    }

    /// Bounds in shape-local space
    #[inline]
    pub fn local_aabb(&self) -> AABB {
        self.local_aabb
    }

    /// Bounds after placing the shape with `xf`
    pub fn aabb(&self, xf: &Transform) -> AABB {
        match self.kind {
            ShapeKind::WorldBoundary { .. } => self.local_aabb,
            _ => self.local_aabb.transformed(xf),
        }
    }

    /// Volume, used to split a body's mass between its shapes
    pub fn volume(&self) -> Fix128 {
        match &self.kind {
            ShapeKind::Sphere { radius } => sphere_volume(*radius),
            ShapeKind::Box { half_extents } => {
                Fix128::from_int(8) * half_extents.x * half_extents.y * half_extents.z
            }
            ShapeKind::Capsule { radius, height } => {
                let cylinder = capsule_half_segment(*radius, *height).double();
                Fix128::PI * *radius * *radius * cylinder + sphere_volume(*radius)
            }
            ShapeKind::ConvexPolygon { .. } | ShapeKind::ConcavePolygon(_) => {
                let s = self.local_aabb.size();
                s.x * s.y * s.z
            }
            ShapeKind::SeparationRay { .. } | ShapeKind::WorldBoundary { .. } => Fix128::ZERO,
        }
    }

    /// Principal moments of inertia for `mass` about the shape origin
    pub fn inertia(&self, mass: Fix128) -> Vec3Fix {
        match &self.kind {
            ShapeKind::Sphere { radius } => {
                Vec3Fix::splat(Fix128::from_ratio(2, 5) * mass * *radius * *radius)
            }
            ShapeKind::Box { half_extents } => box_inertia(mass, *half_extents),
            ShapeKind::SeparationRay { .. } | ShapeKind::WorldBoundary { .. } => Vec3Fix::ZERO,
            _ => box_inertia(mass, self.local_aabb.size().scale(Fix128::HALF)),
        }
    }

    /// Segment query in shape-local space
    pub fn intersect_segment(&self, from: Vec3Fix, to: Vec3Fix) -> Option<SegmentHit> {
        let hit = |point: Vec3Fix, normal: Vec3Fix| SegmentHit {
            point,
            normal,
            face_index: None,
        };
        match &self.kind {
            ShapeKind::Sphere { radius } => {
                let t = sphere_segment_t(from, to - from, *radius)?;
                let point = from + (to - from) * t;
                Some(hit(point, point.normalize()))
            }
            ShapeKind::Box { half_extents } => box_segment(*half_extents, from, to),
            ShapeKind::Capsule { radius, height } => {
                capsule_segment(*radius, capsule_half_segment(*radius, *height), from, to)
            }
            ShapeKind::ConvexPolygon { .. } => {
                let (t, normal) = crate::gjk::ray_cast(self, from, to)?;
                Some(hit(from + (to - from) * t, normal))
            }
            ShapeKind::ConcavePolygon(mesh) => mesh.intersect_segment(from, to),
            ShapeKind::SeparationRay { .. } => None,
            ShapeKind::WorldBoundary { plane } => {
                // Only segments entering the solid side hit
                if plane.distance_to(from).is_negative() {
                    return None;
                }
                let point = plane.intersect_segment(from, to)?;
                Some(hit(point, plane.normal))
            }
        }
    }

    /// Point containment in shape-local space
    pub fn intersect_point(&self, p: Vec3Fix) -> bool {
        match &self.kind {
            ShapeKind::Sphere { radius } => p.length_squared() < *radius * *radius,
            ShapeKind::Box { half_extents } => {
                p.x.abs() < half_extents.x && p.y.abs() < half_extents.y && p.z.abs() < half_extents.z
            }
            ShapeKind::Capsule { radius, height } => {
                let hs = capsule_half_segment(*radius, *height);
                let on_axis = Vec3Fix::new(Fix128::ZERO, p.y.clamp(-hs, hs), Fix128::ZERO);
                p.distance_squared_to(on_axis) < *radius * *radius
            }
            ShapeKind::ConvexPolygon { .. } => {
                !self.is_degenerate() && crate::gjk::point_distance(self, p).is_zero()
            }
            ShapeKind::ConcavePolygon(_) | ShapeKind::SeparationRay { .. } => false,
            ShapeKind::WorldBoundary { plane } => plane.distance_to(p).is_negative(),
        }
    }

    /// Closest point of the shape to `p`; points inside solid shapes map to themselves
    pub fn closest_point_to(&self, p: Vec3Fix) -> Vec3Fix {
        match &self.kind {
            ShapeKind::Sphere { radius } => {
                if p.length() < *radius {
                    p
                } else {
                    p.normalize() * *radius
                }
            }
            ShapeKind::Box { half_extents } => p.max(-*half_extents).min(*half_extents),
            ShapeKind::Capsule { radius, height } => {
                let hs = capsule_half_segment(*radius, *height);
                let axis = Vec3Fix::new(Fix128::ZERO, p.y.clamp(-hs, hs), Fix128::ZERO);
                let rel = p - axis;
                if rel.length() < *radius {
                    p
                } else {
                    axis + rel.normalize() * *radius
                }
            }
            ShapeKind::ConvexPolygon { .. } => {
                if self.is_degenerate() {
                    return p;
                }
                crate::gjk::closest_point(self, p)
            }
            ShapeKind::ConcavePolygon(mesh) => mesh.closest_point(p),
            ShapeKind::SeparationRay { length, .. } => {
                Vec3Fix::new(Fix128::ZERO, Fix128::ZERO, p.z.clamp(Fix128::ZERO, *length))
            }
            ShapeKind::WorldBoundary { plane } => {
                if plane.distance_to(p).is_negative() {
                    p
                } else {
                    plane.project(p)
                }
            }
        }
    }

    /// Concave mesh triangles touching `aabb` (no-op for other kinds)
    pub fn cull<F: FnMut(usize, &Triangle) -> bool>(&self, aabb: &AABB, visit: F) {
        if let ShapeKind::ConcavePolygon(mesh) = &self.kind {
            mesh.cull(aabb, visit);
        }
    }
}

impl ConvexSupport for Shape {
    fn core_support(&self, dir: Vec3Fix) -> Vec3Fix {
        match &self.kind {
            ShapeKind::Sphere { .. } => Vec3Fix::ZERO,
            ShapeKind::Box { half_extents } => Vec3Fix::new(
                signed(half_extents.x, dir.x),
                signed(half_extents.y, dir.y),
                signed(half_extents.z, dir.z),
            ),
            ShapeKind::Capsule { radius, height } => {
                let hs = capsule_half_segment(*radius, *height);
                Vec3Fix::new(Fix128::ZERO, signed(hs, dir.y), Fix128::ZERO)
            }
            ShapeKind::ConvexPolygon { points } => {
                let mut best = Vec3Fix::ZERO;
                let mut best_d = -Fix128::MAX;
                for p in points {
                    let d = p.dot(dir);
                    if d > best_d {
                        best_d = d;
                        best = *p;
                    }
                }
                best
            }
            ShapeKind::SeparationRay { length, .. } => {
                if dir.z.is_positive() {
                    Vec3Fix::new(Fix128::ZERO, Fix128::ZERO, *length)
                } else {
                    Vec3Fix::ZERO
                }
            }
            ShapeKind::ConcavePolygon(_) | ShapeKind::WorldBoundary { .. } => Vec3Fix::ZERO,
        }
    }

    fn core_radius(&self) -> Fix128 {
        match &self.kind {
            ShapeKind::Sphere { radius } | ShapeKind::Capsule { radius, .. } => *radius,
            _ => Fix128::ZERO,
        }
    }

    fn supports(&self, dir: Vec3Fix) -> SupportFeature {
        match &self.kind {
            ShapeKind::Sphere { radius } => SupportFeature::point(dir * *radius),
            ShapeKind::Box { half_extents } => box_supports(*half_extents, dir),
            ShapeKind::Capsule { radius, height } => {
                let hs = capsule_half_segment(*radius, *height);
                if dir.y.abs() < EDGE_SUPPORT_THRESHOLD && !hs.is_zero() {
                    let flat = Vec3Fix::new(dir.x, Fix128::ZERO, dir.z).normalize() * *radius;
                    let up = Vec3Fix::new(Fix128::ZERO, hs, Fix128::ZERO);
                    SupportFeature::edge(flat + up, flat - up)
                } else {
                    SupportFeature::point(self.support(dir))
                }
            }
            ShapeKind::ConvexPolygon { points } => supports_from_vertices(points, dir),
            _ => SupportFeature::point(self.core_support(dir)),
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

#[inline]
fn signed(magnitude: Fix128, dir: Fix128) -> Fix128 {
    if dir.is_negative() {
        -magnitude
    } else {
        magnitude
    }
}

/// Half length of the capsule's inner segment
#[inline]
pub(crate) fn capsule_half_segment(radius: Fix128, height: Fix128) -> Fix128 {
    (height.half() - radius).max(Fix128::ZERO)
}

fn sphere_volume(radius: Fix128) -> Fix128 {
    Fix128::from_ratio(4, 3) * Fix128::PI * radius * radius * radius
}

fn box_inertia(mass: Fix128, half: Vec3Fix) -> Vec3Fix {
    let k = mass / Fix128::from_int(3);
    let (x2, y2, z2) = (half.x * half.x, half.y * half.y, half.z * half.z);
    Vec3Fix::new(k * (y2 + z2), k * (x2 + z2), k * (x2 + y2))
}

fn compute_local_aabb(kind: &ShapeKind) -> AABB {
    match kind {
        ShapeKind::Sphere { radius } => AABB::from_center_half(Vec3Fix::ZERO, Vec3Fix::splat(*radius)),
        ShapeKind::Box { half_extents } => AABB::from_center_half(Vec3Fix::ZERO, *half_extents),
        ShapeKind::Capsule { radius, height } => {
            let hs = capsule_half_segment(*radius, *height);
            AABB::from_center_half(Vec3Fix::ZERO, Vec3Fix::new(*radius, hs + *radius, *radius))
        }
        ShapeKind::ConvexPolygon { points } => AABB::from_points(points),
        ShapeKind::ConcavePolygon(mesh) => mesh.bounds(),
        ShapeKind::SeparationRay { length, .. } => AABB::new(
            Vec3Fix::ZERO,
            Vec3Fix::new(Fix128::ZERO, Fix128::ZERO, *length),
        ),
        ShapeKind::WorldBoundary { plane } => {
            if plane.normal.is_zero() {
                AABB::default()
            } else {
                let e = Fix128::from_int(WORLD_BOUNDARY_EXTENT);
                AABB::from_center_half(Vec3Fix::ZERO, Vec3Fix::splat(e))
            }
        }
    }
}

/// Box supports: face, then edge, then vertex
fn box_supports(half: Vec3Fix, dir: Vec3Fix) -> SupportFeature {
    for i in 0..3 {
        let dot = dir.axis(i);
        if dot.abs() > FACE_SUPPORT_THRESHOLD {
            let (j, k) = ((i + 1) % 3, (i + 2) % 3);
            let mut corners = [Vec3Fix::ZERO; 4];
            let signs = [(1, 1), (1, -1), (-1, -1), (-1, 1)];
            for (c, (sj, sk)) in corners.iter_mut().zip(signs) {
                c.set_axis(i, signed(half.axis(i), dot));
                c.set_axis(j, half.axis(j) * Fix128::from_int(sj));
                c.set_axis(k, half.axis(k) * Fix128::from_int(sk));
            }
            return SupportFeature::face(&corners);
        }
    }
    for i in 0..3 {
        if dir.axis(i).abs() < EDGE_SUPPORT_THRESHOLD {
            let mut a = Vec3Fix::ZERO;
            for j in 0..3 {
                if j != i {
                    a.set_axis(j, signed(half.axis(j), dir.axis(j)));
                }
            }
            let mut b = a;
            a.set_axis(i, half.axis(i));
            b.set_axis(i, -half.axis(i));
            return SupportFeature::edge(a, b);
        }
    }
    SupportFeature::point(Vec3Fix::new(
        signed(half.x, dir.x),
        signed(half.y, dir.y),
        signed(half.z, dir.z),
    ))
}

/// Entry parameter of the segment `from + dir * t` into a sphere at the origin
fn sphere_segment_t(from: Vec3Fix, dir: Vec3Fix, radius: Fix128) -> Option<Fix128> {
    let len = dir.length();
    if len.is_zero() {
        return None;
    }
    let u = dir / len;
    let b = from.dot(u);
    let c = from.length_squared() - radius * radius;
    let disc = b * b - c;
    if disc.is_negative() {
        return None;
    }
    let dist = -b - disc.sqrt();
    if dist.is_negative() || dist > len {
        return None;
    }
    Some(dist / len)
}

fn box_segment(half: Vec3Fix, from: Vec3Fix, to: Vec3Fix) -> Option<SegmentHit> {
    let dir = to - from;
    let mut t_min = Fix128::ZERO;
    let mut t_max = Fix128::ONE;
    let mut axis_hit: Option<(usize, Fix128)> = None;
    for i in 0..3 {
        let o = from.axis(i);
        let d = dir.axis(i);
        let h = half.axis(i);
        if d.is_zero() {
            if o < -h || o > h {
                return None;
            }
            continue;
        }
        let (mut t0, mut t1) = ((-h - o) / d, (h - o) / d);
        let mut side = -Fix128::ONE;
        if t0 > t1 {
            core::mem::swap(&mut t0, &mut t1);
            side = Fix128::ONE;
        }
        if t0 > t_min {
            t_min = t0;
            axis_hit = Some((i, side));
        }
        t_max = t_max.min(t1);
        if t_min > t_max {
            return None;
        }
    }
    // Origin inside the box
    let (axis, side) = axis_hit?;
    let mut normal = Vec3Fix::ZERO;
    normal.set_axis(axis, side);
    Some(SegmentHit {
        point: from + dir * t_min,
        normal,
        face_index: None,
    })
}

fn capsule_segment(radius: Fix128, half_seg: Fix128, from: Vec3Fix, to: Vec3Fix) -> Option<SegmentHit> {
    let dir = to - from;
    let mut best: Option<(Fix128, Vec3Fix)> = None;
    let mut consider = |t: Fix128, normal: Vec3Fix| {
        if best.map_or(true, |(bt, _)| t < bt) {
            best = Some((t, normal));
        }
    };

    // Cylinder wall in the XZ plane
    let flat_from = Vec3Fix::new(from.x, Fix128::ZERO, from.z);
    let flat_dir = Vec3Fix::new(dir.x, Fix128::ZERO, dir.z);
    if let Some(t) = sphere_segment_t(flat_from, flat_dir, radius) {
        let p = from + dir * t;
        if p.y.abs() <= half_seg {
            consider(t, Vec3Fix::new(p.x, Fix128::ZERO, p.z).normalize());
        }
    }

    for cy in [half_seg, -half_seg] {
        let center = Vec3Fix::new(Fix128::ZERO, cy, Fix128::ZERO);
        if let Some(t) = sphere_segment_t(from - center, dir, radius) {
            let p = from + dir * t;
            consider(t, (p - center).normalize());
        }
    }

    best.map(|(t, normal)| SegmentHit {
        point: from + dir * t,
        normal,
        face_index: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(x: i64, y: i64, z: i64) -> Vec3Fix {
        Vec3Fix::from_int(x, y, z)
    }

    fn approx(a: Fix128, b: f64) -> bool {
        (a.to_f64() - b).abs() < 1e-6
    }

    #[test]
    fn test_box_face_support() {
        let b = Shape::cuboid(v(1, 2, 3));
        let f = b.supports(Vec3Fix::UNIT_Y);
        assert_eq!(f.kind, FeatureKind::Face);
        assert_eq!(f.points().len(), 4);
        assert!(f.points().iter().all(|p| p.y == Fix128::from_int(2)));
    }

    #[test]
    fn test_box_edge_and_vertex_support() {
        let b = Shape::cuboid(v(1, 1, 1));
        let edge = b.supports(Vec3Fix::new(Fix128::ZERO, Fix128::ONE, Fix128::ONE).normalize());
        assert_eq!(edge.kind, FeatureKind::Edge);
        let corner = b.supports(Vec3Fix::from_int(1, 1, 1).normalize());
        assert_eq!(corner.kind, FeatureKind::Point);
        assert_eq!(corner.points()[0], v(1, 1, 1));
    }

    #[test]
    fn test_capsule_side_edge() {
        let c = Shape::capsule(Fix128::HALF, Fix128::from_int(2));
        let f = c.supports(Vec3Fix::UNIT_X);
        assert_eq!(f.kind, FeatureKind::Edge);
        assert!(approx(f.points()[0].x, 0.5));
        assert!(approx(f.points()[0].y, 0.5));
        assert!(approx(f.points()[1].y, -0.5));
    }

    #[test]
    fn test_hull_face_grouping() {
        let mut cube = Vec::new();
        for x in [-1, 1] {
            for y in [-1, 1] {
                for z in [-1, 1] {
                    cube.push(v(x, y, z));
                }
            }
        }
        let hull = Shape::convex_polygon(cube);
        let f = hull.supports(-Vec3Fix::UNIT_Z);
        assert_eq!(f.kind, FeatureKind::Face);
        assert_eq!(f.points().len(), 4);
        // Consecutive face points share an edge of the square
        for i in 0..4 {
            let a = f.points()[i];
            let b = f.points()[(i + 1) % 4];
            assert!(approx(a.distance_to(b), 2.0));
        }
    }

    #[test]
    fn test_aabbs() {
        let s = Shape::sphere(Fix128::from_int(2));
        let xf = Transform::from_origin(v(5, 0, 0));
        let aabb = s.aabb(&xf);
        assert_eq!(aabb.min, v(3, -2, -2));
        assert_eq!(aabb.max, v(7, 2, 2));

        let ray = Shape::separation_ray(Fix128::from_int(3), false);
        assert_eq!(ray.local_aabb().max.z, Fix128::from_int(3));

        let wb = Shape::world_boundary(Plane::new(Vec3Fix::UNIT_Y, Fix128::ZERO));
        assert_eq!(wb.aabb(&xf).max.x, Fix128::from_int(WORLD_BOUNDARY_EXTENT));
    }

    #[test]
    fn test_degenerate_shapes() {
        assert!(Shape::sphere(Fix128::ZERO).is_degenerate());
        assert!(Shape::convex_polygon(Vec::new()).is_degenerate());
        let flat = Triangle::new(v(0, 0, 0), v(1, 0, 0), v(2, 0, 0));
        assert!(Shape::concave_polygon(vec![flat], false).is_degenerate());
    }

    #[test]
    fn test_volume_and_inertia() {
        let b = Shape::cuboid(v(1, 1, 1));
        assert_eq!(b.volume(), Fix128::from_int(8));
        let i = b.inertia(Fix128::from_int(3));
        assert!(approx(i.x, 2.0));

        let s = Shape::sphere(Fix128::ONE);
        assert!(approx(s.inertia(Fix128::from_int(5)).y, 2.0));
        assert!(approx(s.volume(), 4.0 / 3.0 * core::f64::consts::PI));
    }

    #[test]
    fn test_sphere_segment() {
        let s = Shape::sphere(Fix128::ONE);
        let hit = s.intersect_segment(v(-5, 0, 0), v(5, 0, 0)).expect("hit");
        assert!(approx(hit.point.x, -1.0));
        assert!(approx(hit.normal.x, -1.0));
        assert!(s.intersect_segment(v(-5, 2, 0), v(5, 2, 0)).is_none());
    }

    #[test]
    fn test_box_segment_normal() {
        let b = Shape::cuboid(v(1, 1, 1));
        let hit = b.intersect_segment(v(0, 5, 0), v(0, -5, 0)).expect("hit");
        assert!(approx(hit.point.y, 1.0));
        assert_eq!(hit.normal, Vec3Fix::UNIT_Y);
        assert!(b.intersect_segment(v(0, 5, 0), v(0, 3, 0)).is_none());
    }

    #[test]
    fn test_capsule_segment() {
        let c = Shape::capsule(Fix128::ONE, Fix128::from_int(4));
        let top = c.intersect_segment(v(0, 10, 0), v(0, -10, 0)).expect("hit");
        assert!(approx(top.point.y, 2.0));
        let side = c.intersect_segment(v(5, 0, 0), v(-5, 0, 0)).expect("hit");
        assert!(approx(side.point.x, 1.0));
        assert!(approx(side.normal.x, 1.0));
    }

    #[test]
    fn test_concave_segment_and_backface() {
        let tri = Triangle::new(v(-5, 0, -5), v(0, 0, 5), v(5, 0, -5));
        let front = Shape::concave_polygon(vec![tri], false);
        // Normal of this winding points +Y
        assert!(tri.normal().y.is_positive());
        let hit = front.intersect_segment(v(0, 3, 0), v(0, -3, 0)).expect("hit");
        assert_eq!(hit.face_index, Some(0));
        assert!(front.intersect_segment(v(0, -3, 0), v(0, 3, 0)).is_none());

        let both = Shape::concave_polygon(vec![tri], true);
        assert!(both.intersect_segment(v(0, -3, 0), v(0, 3, 0)).is_some());
    }

    #[test]
    fn test_point_queries() {
        let c = Shape::capsule(Fix128::ONE, Fix128::from_int(4));
        assert!(c.intersect_point(v(0, 2, 0).scale(Fix128::HALF)));
        assert!(!c.intersect_point(v(0, 4, 0)));
        let wb = Shape::world_boundary(Plane::new(Vec3Fix::UNIT_Y, Fix128::ZERO));
        assert!(wb.intersect_point(v(0, -1, 0)));
        assert_eq!(wb.closest_point_to(v(3, 4, 0)), v(3, 0, 0));
        let b = Shape::cuboid(v(1, 1, 1));
        assert_eq!(b.closest_point_to(v(3, 0, -4)), v(1, 0, -1));
    }

    #[test]
    fn test_concave_cull() {
        let tris = (0..10)
            .map(|i| Triangle::new(v(i * 2, 0, 0), v(i * 2 + 1, 0, 1), v(i * 2 + 1, 0, 0)))
            .collect();
        let mesh = Shape::concave_polygon(tris, false);
        let mut seen = Vec::new();
        mesh.cull(&AABB::new(v(3, -1, -1), v(5, 1, 1)), |i, _| {
            seen.push(i);
            true
        });
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2]);
    }

    #[test]
    fn test_triangle_closest_point() {
        let tri = Triangle::new(v(0, 0, 0), v(2, 0, 0), v(0, 2, 0));
        assert_eq!(tri.closest_point(v(1, 1, 5)), v(1, 1, 0));
        assert_eq!(tri.closest_point(v(-3, -3, 0)), v(0, 0, 0));
    }
}
