//! Narrow Phase
//!
//! Exact tests between two placed shapes. Results are reported as pairs of
//! world-space points `(point_a, point_b)`; for every reported pair
//! `point_a - point_b` points from A toward B and its length is the
//! penetration depth.
//!
//! # Dispatch
//!
//! - World boundary vs anything: supports of the other shape against the plane
//! - Separation ray vs anything: one-directional segment probe
//! - Concave vs convex: per-triangle convex tests over a culled AABB
//! - Convex vs convex: GJK on cores, EPA when cores overlap, then feature
//!   clipping for up to [`MAX_MANIFOLD_POINTS`] points
//!
//! Margins inflate both shapes so contacts appear slightly before the
//! surfaces touch.

use crate::gjk::{self, PointShape};
use crate::math::{Fix128, Transform, Vec3Fix, AABB};
use crate::shape::{ConvexSupport, FeatureKind, Shape, ShapeKind, SupportFeature};

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

/// Upper bound of contact pairs one convex test reports
pub const MAX_MANIFOLD_POINTS: usize = 8;

/// Depth below zero still accepted for clipped points
const CONTACT_EPSILON: Fix128 = Fix128 { hi: 0, lo: 0x0000_A7C5_AC47_1B47 }; // ~1e-5

/// Distance under which two concave contacts are merged
const DEDUP_DISTANCE_SQ: Fix128 = Fix128 { hi: 0, lo: 0x0000_0006_8DB8_BAC7 }; // (1e-5)^2

/// Receives `(point_a, point_b)` in world space
pub type ContactSink<'a> = &'a mut dyn FnMut(Vec3Fix, Vec3Fix);

/// Triangle indices of a concave shape to skip
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExcludedShape {
    pub triangles: Vec<usize>,
}

impl ExcludedShape {
    #[inline]
    pub fn contains(&self, triangle: usize) -> bool {
        self.triangles.contains(&triangle)
    }
}

/// Narrow-phase entry points
pub struct CollisionSolver;

impl CollisionSolver {
    /// Test two shapes at rest
    ///
    /// `sep_axis` caches a separating axis across calls for the same pair.
    #[allow(clippy::too_many_arguments)]
    pub fn solve_static(
        shape_a: &Shape,
        xf_a: &Transform,
        shape_b: &Shape,
        xf_b: &Transform,
        sink: Option<ContactSink<'_>>,
        sep_axis: Option<&mut Vec3Fix>,
        margin_a: Fix128,
        margin_b: Fix128,
    ) -> bool {
        Self::solve(
            shape_a,
            xf_a,
            Vec3Fix::ZERO,
            shape_b,
            xf_b,
            Vec3Fix::ZERO,
            sink,
            sep_axis,
            margin_a,
            margin_b,
            None,
        )
    }

    /// Full entry point; `motion_*` widen the triangle culling of concave shapes
    #[allow(clippy::too_many_arguments)]
    pub fn solve(
        shape_a: &Shape,
        xf_a: &Transform,
        motion_a: Vec3Fix,
        shape_b: &Shape,
        xf_b: &Transform,
        motion_b: Vec3Fix,
        sink: Option<ContactSink<'_>>,
        sep_axis: Option<&mut Vec3Fix>,
        margin_a: Fix128,
        margin_b: Fix128,
        excluded: Option<&ExcludedShape>,
    ) -> bool {
        if shape_a.is_degenerate() || shape_b.is_degenerate() {
            return false;
        }
        let mut noop = |_: Vec3Fix, _: Vec3Fix| {};
        let sink: ContactSink<'_> = match sink {
            Some(s) => s,
            None => &mut noop,
        };

        use ShapeKind::*;
        match (shape_a.kind(), shape_b.kind()) {
            (WorldBoundary { .. }, WorldBoundary { .. })
            | (WorldBoundary { .. }, ConcavePolygon(_))
            | (ConcavePolygon(_), WorldBoundary { .. })
            | (ConcavePolygon(_), ConcavePolygon(_))
            | (SeparationRay { .. }, SeparationRay { .. }) => false,
            (WorldBoundary { .. }, _) => {
                solve_world_boundary(shape_a, xf_a, shape_b, xf_b, margin_b, sink, false)
            }
            (_, WorldBoundary { .. }) => {
                solve_world_boundary(shape_b, xf_b, shape_a, xf_a, margin_a, sink, true)
            }
            (SeparationRay { .. }, _) => {
                solve_separation_ray(shape_a, xf_a, shape_b, xf_b, margin_a, sink, false)
            }
            (_, SeparationRay { .. }) => {
                solve_separation_ray(shape_b, xf_b, shape_a, xf_a, margin_b, sink, true)
            }
            (ConcavePolygon(_), _) => {
                let mut swapped = |a: Vec3Fix, b: Vec3Fix| sink(b, a);
                solve_concave(
                    shape_b,
                    xf_b,
                    motion_b - motion_a,
                    shape_a,
                    xf_a,
                    &mut swapped,
                    margin_b,
                    margin_a,
                    excluded,
                )
            }
            (_, ConcavePolygon(_)) => solve_concave(
                shape_a,
                xf_a,
                motion_a - motion_b,
                shape_b,
                xf_b,
                sink,
                margin_a,
                margin_b,
                excluded,
            ),
            _ => solve_convex(shape_a, xf_a, shape_b, xf_b, sink, sep_axis, margin_a, margin_b, None),
        }
    }

    /// Closest points of two separated shapes, `None` when they touch
    ///
    /// `concave_hint` bounds (in B's local space) the triangles considered
    /// when B is concave.
    pub fn solve_distance(
        shape_a: &Shape,
        xf_a: &Transform,
        shape_b: &Shape,
        xf_b: &Transform,
        concave_hint: &AABB,
    ) -> Option<(Vec3Fix, Vec3Fix)> {
        if shape_a.is_degenerate() || shape_b.is_degenerate() || !shape_a.is_convex() {
            return None;
        }
        match shape_b.kind() {
            ShapeKind::ConcavePolygon(_) => {
                let mut best: Option<(Fix128, Vec3Fix, Vec3Fix)> = None;
                let mut touching = false;
                shape_b.cull(concave_hint, |_, tri| {
                    match convex_distance(shape_a, xf_a, tri, xf_b) {
                        Some((pa, pb)) => {
                            let d = pa.distance_squared_to(pb);
                            if best.map_or(true, |(bd, _, _)| d < bd) {
                                best = Some((d, pa, pb));
                            }
                            true
                        }
                        None => {
                            touching = true;
                            false
                        }
                    }
                });
                if touching {
                    return None;
                }
                best.map(|(_, pa, pb)| (pa, pb))
            }
            ShapeKind::WorldBoundary { plane } => {
                let plane = plane.transformed(xf_b);
                let deepest = xf_a.xform(shape_a.support(xf_a.basis_xform_inv(-plane.normal)));
                if plane.distance_to(deepest).is_positive() {
                    Some((deepest, plane.project(deepest)))
                } else {
                    None
                }
            }
            ShapeKind::SeparationRay { .. } => None,
            _ => convex_distance(shape_a, xf_a, shape_b, xf_b),
        }
    }
}

// ============================================================================
// World boundary
// ============================================================================

fn solve_world_boundary(
    plane_shape: &Shape,
    plane_xf: &Transform,
    other: &Shape,
    other_xf: &Transform,
    margin: Fix128,
    sink: ContactSink<'_>,
    swap: bool,
) -> bool {
    let ShapeKind::WorldBoundary { plane } = plane_shape.kind() else {
        return false;
    };
    let plane = plane.transformed(plane_xf);
    let down = -plane.normal;

    let mut points: Vec<Vec3Fix> = Vec::new();
    match other.kind() {
        ShapeKind::ConcavePolygon(_) | ShapeKind::WorldBoundary { .. } => return false,
        ShapeKind::SeparationRay { length, .. } => {
            points.push(other_xf.origin);
            points.push(other_xf.xform(Vec3Fix::new(Fix128::ZERO, Fix128::ZERO, *length)));
        }
        _ => {
            let feature = gjk::world_supports(other, other_xf, down);
            points.extend_from_slice(feature.points());
        }
    }

    let mut found = false;
    for p in points {
        let p = p + down * margin;
        if !plane.distance_to(p).is_negative() {
            continue;
        }
        found = true;
        let on_plane = plane.project(p);
        if swap {
            sink(p, on_plane);
        } else {
            sink(on_plane, p);
        }
    }
    found
}

// ============================================================================
// Separation ray
// ============================================================================

fn solve_separation_ray(
    ray_shape: &Shape,
    ray_xf: &Transform,
    other: &Shape,
    other_xf: &Transform,
    margin: Fix128,
    sink: ContactSink<'_>,
    swap: bool,
) -> bool {
    let ShapeKind::SeparationRay { length, slide_on_slope } = *ray_shape.kind() else {
        return false;
    };
    let from = ray_xf.origin;
    let to = from + ray_xf.basis.col2.normalize() * (length + margin);
    let tip = to;

    let inv = other_xf.affine_inverse();
    let Some(hit) = other.intersect_segment(inv.xform(from), inv.xform(to)) else {
        return false;
    };
    let mut surface = other_xf.xform(hit.point);
    if slide_on_slope {
        let n = other_xf.basis_xform(hit.normal).normalize();
        surface = tip + n * n.dot(surface - tip);
    }
    if swap {
        sink(surface, tip);
    } else {
        sink(tip, surface);
    }
    true
}

// ============================================================================
// Concave
// ============================================================================

#[allow(clippy::too_many_arguments)]
fn solve_concave(
    convex: &Shape,
    convex_xf: &Transform,
    relative_motion: Vec3Fix,
    concave: &Shape,
    concave_xf: &Transform,
    sink: ContactSink<'_>,
    margin_convex: Fix128,
    margin_concave: Fix128,
    excluded: Option<&ExcludedShape>,
) -> bool {
    let ShapeKind::ConcavePolygon(mesh) = concave.kind() else {
        return false;
    };
    let inv = concave_xf.affine_inverse();
    let local_xf = inv.mul(convex_xf);
    let local_motion = inv.basis_xform(relative_motion);
    let cull_box = convex
        .local_aabb()
        .transformed(&local_xf)
        .merged_with_motion(local_motion)
        .grow(margin_convex + margin_concave);

    let backface = mesh.backface_collision();
    let mut collected: Vec<(Vec3Fix, Vec3Fix)> = Vec::new();
    mesh.cull(&cull_box, |index, tri| {
        if excluded.map_or(false, |e| e.contains(index)) {
            return true;
        }
        let front = concave_xf.basis_xform(tri.unit_normal());
        let mut local: Vec<(Vec3Fix, Vec3Fix)> = Vec::new();
        let mut push = |a: Vec3Fix, b: Vec3Fix| local.push((a, b));
        let mut axis = Vec3Fix::ZERO;
        if solve_convex(
            convex,
            convex_xf,
            tri,
            concave_xf,
            &mut push,
            Some(&mut axis),
            margin_convex,
            margin_concave,
            None,
        ) {
            // One-sided triangles only push convexes lying in front of them
            if !backface && axis.dot(front).is_positive() {
                return true;
            }
            for (a, b) in local {
                if !collected.iter().any(|(_, cb)| cb.distance_squared_to(b) <= DEDUP_DISTANCE_SQ) {
                    collected.push((a, b));
                }
            }
        }
        true
    });

    for (a, b) in &collected {
        sink(*a, *b);
    }
    !collected.is_empty()
}

// ============================================================================
// Convex
// ============================================================================

/// Closest points of two separated convex shapes
fn convex_distance<A, B>(a: &A, xf_a: &Transform, b: &B, xf_b: &Transform) -> Option<(Vec3Fix, Vec3Fix)>
where
    A: ConvexSupport + ?Sized,
    B: ConvexSupport + ?Sized,
{
    let r = gjk::gjk_distance(a, xf_a, b, xf_b, Vec3Fix::ZERO);
    let (ra, rb) = (a.core_radius(), b.core_radius());
    if r.overlapping || r.distance <= ra + rb {
        return None;
    }
    let n = r.normal();
    Some((r.point_a + n * ra, r.point_b - n * rb))
}

/// Convex test; the last argument lets callers observe the contact normal
#[allow(clippy::too_many_arguments)]
pub(crate) fn solve_convex<A, B>(
    a: &A,
    xf_a: &Transform,
    b: &B,
    xf_b: &Transform,
    sink: ContactSink<'_>,
    sep_axis: Option<&mut Vec3Fix>,
    margin_a: Fix128,
    margin_b: Fix128,
    normal_out: Option<&mut Vec3Fix>,
) -> bool
where
    A: ConvexSupport + ?Sized,
    B: ConvexSupport + ?Sized,
{
    let ra = a.core_radius() + margin_a;
    let rb = b.core_radius() + margin_b;

    let mut guess = Vec3Fix::ZERO;
    if let Some(axis) = sep_axis.as_deref() {
        let n = axis.normalize();
        if !n.is_zero() {
            // Early out on the cached axis
            let a_max = n.dot(xf_a.xform(a.core_support(xf_a.basis_xform_inv(n)))) + ra;
            let b_min = n.dot(xf_b.xform(b.core_support(xf_b.basis_xform_inv(-n)))) - rb;
            if b_min > a_max {
                return false;
            }
            guess = -n;
        }
    }

    let r = gjk::gjk_distance(a, xf_a, b, xf_b, guess);
    let normal = if r.overlapping {
        match gjk::epa(a, xf_a, b, xf_b, &r) {
            Some(p) => p.normal,
            None => return false,
        }
    } else {
        if r.distance > ra + rb {
            if let Some(axis) = sep_axis {
                *axis = r.normal();
            }
            return false;
        }
        r.normal()
    };
    if normal.is_zero() {
        return false;
    }
    if let Some(axis) = sep_axis {
        *axis = normal;
    }
    if let Some(out) = normal_out {
        *out = normal;
    }

    let fa = gjk::world_supports(a, xf_a, normal).map(|p| p + normal * margin_a);
    let fb = gjk::world_supports(b, xf_b, -normal).map(|p| p - normal * margin_b);
    generate_contacts(&fa, &fb, normal, sink) > 0
}

// ============================================================================
// Manifold generation
// ============================================================================

fn generate_contacts(fa: &SupportFeature, fb: &SupportFeature, normal: Vec3Fix, sink: ContactSink<'_>) -> usize {
    let mut pairs: Vec<(Vec3Fix, Vec3Fix)> = Vec::new();
    match (fa.kind, fb.kind) {
        (FeatureKind::Point, _) => {
            let pa = fa.points()[0];
            pairs.push((pa, closest_on_feature(fb, pa, normal)));
        }
        (_, FeatureKind::Point) => {
            let pb = fb.points()[0];
            pairs.push((closest_on_feature(fa, pb, normal), pb));
        }
        (FeatureKind::Edge, FeatureKind::Edge) => edge_edge(fa.points(), fb.points(), &mut pairs),
        (_, FeatureKind::Face) => clip_against_face(fa.points(), fb.points(), normal, false, &mut pairs),
        (FeatureKind::Face, _) => clip_against_face(fb.points(), fa.points(), normal, true, &mut pairs),
    }

    let mut count = 0;
    for (pa, pb) in pairs.into_iter().take(MAX_MANIFOLD_POINTS) {
        if (pa - pb).dot(normal) < -CONTACT_EPSILON {
            continue;
        }
        sink(pa, pb);
        count += 1;
    }
    count
}

/// Point of `feature` matching `p` along `normal`
fn closest_on_feature(feature: &SupportFeature, p: Vec3Fix, normal: Vec3Fix) -> Vec3Fix {
    let pts = feature.points();
    match feature.kind {
        FeatureKind::Point => pts[0],
        FeatureKind::Edge => closest_on_segment(pts[0], pts[1], p),
        FeatureKind::Face => p - normal * normal.dot(p - pts[0]),
    }
}

fn closest_on_segment(a: Vec3Fix, b: Vec3Fix, p: Vec3Fix) -> Vec3Fix {
    let ab = b - a;
    let len2 = ab.length_squared();
    if len2.is_zero() {
        return a;
    }
    a + ab * ((p - a).dot(ab) / len2).clamp(Fix128::ZERO, Fix128::ONE)
}

fn edge_edge(ea: &[Vec3Fix], eb: &[Vec3Fix], out: &mut Vec<(Vec3Fix, Vec3Fix)>) {
    let (p1, q1, p2, q2) = (ea[0], ea[1], eb[0], eb[1]);
    let d1 = q1 - p1;
    let d2 = q2 - p2;
    let r = p1 - p2;
    let a = d1.length_squared();
    let e = d2.length_squared();
    let f = d2.dot(r);
    if a.is_zero() || e.is_zero() {
        let pa = if a.is_zero() { p1 } else { closest_on_segment(p1, q1, p2) };
        let pb = closest_on_segment(p2, q2, pa);
        out.push((pa, pb));
        return;
    }
    let c = d1.dot(r);
    let b = d1.dot(d2);
    let denom = a * e - b * b;

    if denom <= a * e * CONTACT_EPSILON {
        // Parallel: overlap interval of A projected on B's line
        let dir = d2 / e.sqrt();
        let len_b = e.sqrt();
        let ta0 = (p1 - p2).dot(dir);
        let ta1 = (q1 - p2).dot(dir);
        let lo = ta0.min(ta1).max(Fix128::ZERO);
        let hi = ta0.max(ta1).min(len_b);
        if lo <= hi && ta0 != ta1 {
            for t in [lo, hi] {
                let pa = p1 + d1 * ((t - ta0) / (ta1 - ta0));
                out.push((pa, p2 + dir * t));
            }
            return;
        }
    }

    let mut s = if denom.is_zero() {
        Fix128::ZERO
    } else {
        ((b * f - c * e) / denom).clamp(Fix128::ZERO, Fix128::ONE)
    };
    let mut t = (b * s + f) / e;
    if t.is_negative() {
        t = Fix128::ZERO;
        s = (-c / a).clamp(Fix128::ZERO, Fix128::ONE);
    } else if t > Fix128::ONE {
        t = Fix128::ONE;
        s = ((b - c) / a).clamp(Fix128::ZERO, Fix128::ONE);
    }
    out.push((p1 + d1 * s, p2 + d2 * t));
}

/// Clip `incident` (edge or face) against the side planes of `reference`
///
/// `reference_is_a` tells which shape owns the reference face.
fn clip_against_face(
    incident: &[Vec3Fix],
    reference: &[Vec3Fix],
    normal: Vec3Fix,
    reference_is_a: bool,
    out: &mut Vec<(Vec3Fix, Vec3Fix)>,
) {
    let n = Fix128::from_int(reference.len() as i64);
    let centroid = reference.iter().fold(Vec3Fix::ZERO, |acc, p| acc + *p) / n;

    let mut poly: Vec<Vec3Fix> = incident.to_vec();
    for i in 0..reference.len() {
        let r0 = reference[i];
        let r1 = reference[(i + 1) % reference.len()];
        let mut side = (r1 - r0).cross(normal);
        if side.dot(centroid - r0).is_negative() {
            side = -side;
        }
        poly = if poly.len() == 2 {
            clip_segment(&poly, r0, side)
        } else {
            clip_polygon(&poly, r0, side)
        };
        if poly.is_empty() {
            return;
        }
    }

    let origin = reference[0];
    for p in poly {
        let q = p - normal * normal.dot(p - origin);
        if reference_is_a {
            out.push((q, p));
        } else {
            out.push((p, q));
        }
    }
}

/// Keep the part of a polygon on the positive side of the plane `(origin, side)`
fn clip_polygon(poly: &[Vec3Fix], origin: Vec3Fix, side: Vec3Fix) -> Vec<Vec3Fix> {
    let mut out = Vec::with_capacity(poly.len() + 1);
    for i in 0..poly.len() {
        let cur = poly[i];
        let next = poly[(i + 1) % poly.len()];
        let dc = side.dot(cur - origin);
        let dn = side.dot(next - origin);
        if !dc.is_negative() {
            out.push(cur);
        }
        if (dc.is_negative() && dn.is_positive()) || (dc.is_positive() && dn.is_negative()) {
            out.push(cur + (next - cur) * (dc / (dc - dn)));
        }
    }
    out
}

fn clip_segment(seg: &[Vec3Fix], origin: Vec3Fix, side: Vec3Fix) -> Vec<Vec3Fix> {
    let (a, b) = (seg[0], seg[1]);
    let da = side.dot(a - origin);
    let db = side.dot(b - origin);
    match (da.is_negative(), db.is_negative()) {
        (false, false) => Vec::from([a, b]),
        (true, true) => Vec::new(),
        _ => {
            let cut = a + (b - a) * (da / (da - db));
            if da.is_negative() {
                Vec::from([cut, b])
            } else {
                Vec::from([a, cut])
            }
        }
    }
}

/// Distance from a point to a placed convex shape (zero inside)
pub fn point_shape_distance(shape: &Shape, xf: &Transform, p: Vec3Fix) -> Fix128 {
    if !shape.is_convex() {
        return Fix128::MAX;
    }
    let r = gjk::gjk_distance(shape, xf, &PointShape(p), &Transform::IDENTITY, Vec3Fix::ZERO);
    (r.distance - shape.core_radius()).max(Fix128::ZERO)
}
