//! GJK Distance and EPA Penetration
//!
//! Runs on the *cores* of [`ConvexSupport`] shapes placed with rigid
//! transforms. GJK returns the closest core points (with barycentric witness
//! tracking); when the cores overlap, EPA expands the final simplex into the
//! penetration normal and depth.
//!
//! # Conventions
//!
//! - The Minkowski difference is `A - B`.
//! - Normals point from A toward B, so `point_a - point_b == normal * depth`
//!   for penetrating results.
//! - Fixed iteration caps keep every query bounded and deterministic.

use crate::math::{Fix128, Transform, Vec3Fix};
use crate::shape::{ConvexSupport, SupportFeature};

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

const GJK_MAX_ITERATIONS: usize = 64;
const EPA_MAX_ITERATIONS: usize = 64;
const EPA_MAX_FACES: usize = 256;
const RAY_MAX_ITERATIONS: usize = 64;

/// Squared core distance treated as touching (~3e-8 squared)
const GJK_OVERLAP_EPSILON: Fix128 = Fix128 { hi: 0, lo: 0x0000_0000_0000_4000 };

/// Relative convergence tolerance for GJK (2^-30)
const GJK_RELATIVE_EPSILON: Fix128 = Fix128 { hi: 0, lo: 0x0000_0004_0000_0000 };

/// EPA expansion tolerance (~1.5e-5)
const EPA_EPSILON: Fix128 = Fix128 { hi: 0, lo: 0x0001_0000_0000_0000 };

/// Surface distance at which a ray counts as hitting (~1e-9)
const RAY_HIT_EPSILON: Fix128 = Fix128 { hi: 0, lo: 0x0000_0004_0000_0000 };

// ============================================================================
// Placed shapes
// ============================================================================

/// Support in world space for a shape placed with `xf`
#[inline]
fn world_core_support<S: ConvexSupport + ?Sized>(shape: &S, xf: &Transform, dir: Vec3Fix) -> Vec3Fix {
    xf.xform(shape.core_support(xf.basis_xform_inv(dir)))
}

/// World-space supports of a placed shape along a world unit direction
pub fn world_supports<S: ConvexSupport + ?Sized>(shape: &S, xf: &Transform, dir: Vec3Fix) -> SupportFeature {
    let local = xf.basis_xform_inv(dir).normalize();
    shape.supports(local).map(|p| xf.xform(p))
}

/// A single point as a convex shape
#[derive(Clone, Copy, Debug)]
pub struct PointShape(pub Vec3Fix);

impl ConvexSupport for PointShape {
    fn core_support(&self, _dir: Vec3Fix) -> Vec3Fix {
        self.0
    }

    fn core_radius(&self) -> Fix128 {
        Fix128::ZERO
    }

    fn supports(&self, _dir: Vec3Fix) -> SupportFeature {
        SupportFeature::point(self.0)
    }
}

// ============================================================================
// Simplex
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Vertex {
    /// `a - b`
    w: Vec3Fix,
    a: Vec3Fix,
    b: Vec3Fix,
}

#[derive(Clone, Copy, Debug)]
struct Simplex {
    verts: [Vertex; 4],
    weights: [Fix128; 4],
    len: usize,
}

impl Simplex {
    fn new() -> Self {
        Self {
            verts: [Vertex::default(); 4],
            weights: [Fix128::ZERO; 4],
            len: 0,
        }
    }

    fn contains(&self, w: Vec3Fix) -> bool {
        self.verts[..self.len].iter().any(|v| v.w == w)
    }

    fn push(&mut self, v: Vertex) {
        if self.len < 4 {
            self.verts[self.len] = v;
            self.len += 1;
        }
    }

    /// Closest point to the origin; drops vertices that do not support it.
    /// Returns `None` when the origin lies inside a full tetrahedron.
    fn reduce(&mut self) -> Option<Vec3Fix> {
        let (weights, keep) = match self.len {
            1 => ([Fix128::ONE, Fix128::ZERO, Fix128::ZERO, Fix128::ZERO], [true, false, false, false]),
            2 => {
                let (l, k) = closest_on_segment(self.verts[0].w, self.verts[1].w);
                ([l[0], l[1], Fix128::ZERO, Fix128::ZERO], [k[0], k[1], false, false])
            }
            3 => {
                let (l, k) = closest_on_triangle(self.verts[0].w, self.verts[1].w, self.verts[2].w);
                ([l[0], l[1], l[2], Fix128::ZERO], [k[0], k[1], k[2], false])
            }
            _ => closest_on_tetrahedron(&self.verts)?,
        };

        let mut out = Simplex::new();
        for i in 0..self.len {
            if keep[i] {
                out.verts[out.len] = self.verts[i];
                out.weights[out.len] = weights[i];
                out.len += 1;
            }
        }
        *self = out;
        Some(self.point(|v| v.w))
    }

    fn point<F: Fn(&Vertex) -> Vec3Fix>(&self, f: F) -> Vec3Fix {
        self.verts[..self.len]
            .iter()
            .zip(self.weights.iter())
            .fold(Vec3Fix::ZERO, |acc, (v, w)| acc + f(v) * *w)
    }
}

fn closest_on_segment(a: Vec3Fix, b: Vec3Fix) -> ([Fix128; 2], [bool; 2]) {
    let ab = b - a;
    let denom = ab.length_squared();
    if denom.is_zero() {
        return ([Fix128::ONE, Fix128::ZERO], [true, false]);
    }
    let t = -a.dot(ab) / denom;
    if !t.is_positive() {
        ([Fix128::ONE, Fix128::ZERO], [true, false])
    } else if t >= Fix128::ONE {
        ([Fix128::ZERO, Fix128::ONE], [false, true])
    } else {
        ([Fix128::ONE - t, t], [true, true])
    }
}

/// Barycentric closest point of triangle `abc` to the origin (Voronoi regions)
fn closest_on_triangle(a: Vec3Fix, b: Vec3Fix, c: Vec3Fix) -> ([Fix128; 3], [bool; 3]) {
    let z = Fix128::ZERO;
    let one = Fix128::ONE;
    let ab = b - a;
    let ac = c - a;
    let ap = -a;
    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= z && d2 <= z {
        return ([one, z, z], [true, false, false]);
    }
    let bp = -b;
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= z && d4 <= d3 {
        return ([z, one, z], [false, true, false]);
    }
    let vc = d1 * d4 - d3 * d2;
    if vc <= z && d1 >= z && d3 <= z {
        let v = d1 / (d1 - d3);
        return ([one - v, v, z], [true, true, false]);
    }
    let cp = -c;
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= z && d5 <= d6 {
        return ([z, z, one], [false, false, true]);
    }
    let vb = d5 * d2 - d1 * d6;
    if vb <= z && d2 >= z && d6 <= z {
        let w = d2 / (d2 - d6);
        return ([one - w, z, w], [true, false, true]);
    }
    let va = d3 * d6 - d5 * d4;
    let d4_d3 = d4 - d3;
    let d5_d6 = d5 - d6;
    if va <= z && d4_d3 >= z && d5_d6 >= z {
        let w = d4_d3 / (d4_d3 + d5_d6);
        return ([z, one - w, w], [false, true, true]);
    }
    let denom = va + vb + vc;
    if denom.is_zero() {
        // Degenerate triangle: fall back to its best edge
        let (l, k) = closest_on_segment(a, b);
        return ([l[0], l[1], z], [k[0], k[1], false]);
    }
    let v = vb / denom;
    let w = vc / denom;
    ([one - v - w, v, w], [true, true, true])
}

type TetraResult = ([Fix128; 4], [bool; 4]);

fn closest_on_tetrahedron(verts: &[Vertex; 4]) -> Option<TetraResult> {
    const FACES: [([usize; 3], usize); 4] = [([0, 1, 2], 3), ([0, 3, 1], 2), ([0, 2, 3], 1), ([1, 3, 2], 0)];
    let mut best: Option<(Fix128, TetraResult)> = None;
    for (face, opposite) in FACES {
        let [i, j, k] = face;
        let (a, b, c) = (verts[i].w, verts[j].w, verts[k].w);
        let n = (b - a).cross(c - a);
        let side_origin = -n.dot(a);
        let side_opposite = n.dot(verts[opposite].w - a);
        let outside = side_opposite.is_zero()
            || (!side_origin.is_zero() && side_origin.is_negative() != side_opposite.is_negative());
        if !outside {
            continue;
        }
        let (l, keep) = closest_on_triangle(a, b, c);
        let p = a * l[0] + b * l[1] + c * l[2];
        let d = p.length_squared();
        if best.as_ref().map_or(true, |(bd, _)| d < *bd) {
            let mut weights = [Fix128::ZERO; 4];
            let mut mask = [false; 4];
            for (slot, idx) in face.iter().enumerate() {
                weights[*idx] = l[slot];
                mask[*idx] = keep[slot];
            }
            best = Some((d, (weights, mask)));
        }
    }
    best.map(|(_, r)| r)
}

// ============================================================================
// GJK
// ============================================================================

/// Closest-core result of [`gjk_distance`]
#[derive(Clone, Copy, Debug)]
pub struct GjkResult {
    /// Distance between the cores (zero when overlapping)
    pub distance: Fix128,
    /// Closest core point on A (world)
    pub point_a: Vec3Fix,
    /// Closest core point on B (world)
    pub point_b: Vec3Fix,
    pub overlapping: bool,
    simplex: Simplex,
}

impl GjkResult {
    /// Unit direction from A toward B, zero when overlapping
    pub fn normal(&self) -> Vec3Fix {
        if self.overlapping {
            Vec3Fix::ZERO
        } else {
            (self.point_b - self.point_a).normalize()
        }
    }
}

struct Pair<'s, A: ?Sized, B: ?Sized> {
    a: &'s A,
    xf_a: &'s Transform,
    b: &'s B,
    xf_b: &'s Transform,
}

impl<A: ConvexSupport + ?Sized, B: ConvexSupport + ?Sized> Pair<'_, A, B> {
    #[inline]
    fn support(&self, dir: Vec3Fix) -> Vertex {
        let a = world_core_support(self.a, self.xf_a, dir);
        let b = world_core_support(self.b, self.xf_b, -dir);
        Vertex { w: a - b, a, b }
    }
}

/// GJK closest points between the cores of two placed shapes
///
/// `guess` seeds the search direction (e.g. a cached separating axis); pass
/// zero to start from the centre offset.
pub fn gjk_distance<A, B>(a: &A, xf_a: &Transform, b: &B, xf_b: &Transform, guess: Vec3Fix) -> GjkResult
where
    A: ConvexSupport + ?Sized,
    B: ConvexSupport + ?Sized,
{
    let pair = Pair { a, xf_a, b, xf_b };
    let mut simplex = Simplex::new();

    let seed = if guess.is_zero() { xf_b.origin - xf_a.origin } else { guess };
    let seed = if seed.is_zero() { Vec3Fix::UNIT_X } else { seed };
    let first = pair.support(seed);
    simplex.push(first);
    simplex.weights[0] = Fix128::ONE;
    let mut v = first.w;
    let mut overlapping = false;

    for _ in 0..GJK_MAX_ITERATIONS {
        let vv = v.length_squared();
        if vv <= GJK_OVERLAP_EPSILON {
            overlapping = true;
            break;
        }
        let w = pair.support(-v);
        if simplex.contains(w.w) || vv - v.dot(w.w) <= vv * GJK_RELATIVE_EPSILON {
            break;
        }
        simplex.push(w);
        match simplex.reduce() {
            None => {
                overlapping = true;
                break;
            }
            Some(next) => {
                if next.length_squared() >= vv {
                    // No progress: numerical floor reached
                    break;
                }
                v = next;
            }
        }
    }

    let point_a = simplex.point(|x| x.a);
    let point_b = simplex.point(|x| x.b);
    GjkResult {
        distance: if overlapping { Fix128::ZERO } else { v.length() },
        point_a,
        point_b,
        overlapping,
        simplex,
    }
}

// ============================================================================
// EPA
// ============================================================================

/// Penetration of overlapping cores
#[derive(Clone, Copy, Debug)]
pub struct Penetration {
    /// Unit normal from A toward B
    pub normal: Vec3Fix,
    pub depth: Fix128,
    pub point_a: Vec3Fix,
    pub point_b: Vec3Fix,
}

#[derive(Clone, Copy, Debug)]
struct EpaFace {
    indices: [usize; 3],
    normal: Vec3Fix,
    distance: Fix128,
}

fn make_face(vertices: &[Vertex], i: usize, j: usize, k: usize) -> Option<EpaFace> {
    let a = vertices[i].w;
    let normal = (vertices[j].w - a).cross(vertices[k].w - a).normalize();
    if normal.is_zero() {
        return None;
    }
    Some(EpaFace {
        indices: [i, j, k],
        normal,
        distance: a.dot(normal),
    })
}

/// Grow a touching simplex into a tetrahedron around the origin
fn blow_up<A, B>(pair: &Pair<'_, A, B>, simplex: &Simplex) -> Option<Vec<Vertex>>
where
    A: ConvexSupport + ?Sized,
    B: ConvexSupport + ?Sized,
{
    let mut verts: Vec<Vertex> = simplex.verts[..simplex.len].to_vec();
    let axes = [
        Vec3Fix::UNIT_X,
        -Vec3Fix::UNIT_X,
        Vec3Fix::UNIT_Y,
        -Vec3Fix::UNIT_Y,
        Vec3Fix::UNIT_Z,
        -Vec3Fix::UNIT_Z,
    ];
    if verts.len() == 1 {
        for dir in axes {
            let s = pair.support(dir);
            if s.w != verts[0].w {
                verts.push(s);
                break;
            }
        }
    }
    if verts.len() == 2 {
        let line = verts[1].w - verts[0].w;
        let perp = line.any_perpendicular();
        for dir in [perp, -perp, line.cross(perp), -line.cross(perp)] {
            let s = pair.support(dir);
            if !(s.w - verts[0].w).cross(line).length_squared().is_zero() {
                verts.push(s);
                break;
            }
        }
    }
    if verts.len() == 3 {
        let n = (verts[1].w - verts[0].w).cross(verts[2].w - verts[0].w);
        for dir in [n, -n] {
            let s = pair.support(dir);
            if !n.dot(s.w - verts[0].w).is_zero() {
                verts.push(s);
                break;
            }
        }
    }
    if verts.len() != 4 {
        return None;
    }
    // Orient so face (0,1,2) points away from vertex 3
    let n = (verts[1].w - verts[0].w).cross(verts[2].w - verts[0].w);
    if n.dot(verts[3].w - verts[0].w).is_positive() {
        verts.swap(1, 2);
    }
    Some(verts)
}

/// EPA on the cores of two shapes that [`gjk_distance`] found overlapping
pub fn epa<A, B>(a: &A, xf_a: &Transform, b: &B, xf_b: &Transform, gjk: &GjkResult) -> Option<Penetration>
where
    A: ConvexSupport + ?Sized,
    B: ConvexSupport + ?Sized,
{
    let pair = Pair { a, xf_a, b, xf_b };
    match blow_up(&pair, &gjk.simplex) {
        Some(vertices) => expand(&pair, vertices).or_else(|| flat_penetration(&pair, &gjk.simplex)),
        None => flat_penetration(&pair, &gjk.simplex),
    }
}

/// Penetration of cores whose difference has no volume (coincident points,
/// a point on a segment, crossing segments, coplanar faces)
///
/// Picks the least overlapping of the centre offset, the simplex's own
/// perpendiculars and the world axes. Ties keep the earlier candidate.
fn flat_penetration<A, B>(pair: &Pair<'_, A, B>, simplex: &Simplex) -> Option<Penetration>
where
    A: ConvexSupport + ?Sized,
    B: ConvexSupport + ?Sized,
{
    let mut candidates: Vec<Vec3Fix> = Vec::with_capacity(12);
    candidates.push(pair.xf_b.origin - pair.xf_a.origin);
    let w = |i: usize| simplex.verts[i].w;
    if simplex.len >= 2 {
        let line = w(1) - w(0);
        let perp = line.any_perpendicular();
        candidates.push(perp);
        candidates.push(line.cross(perp));
    }
    if simplex.len >= 3 {
        candidates.push((w(1) - w(0)).cross(w(2) - w(0)));
    }
    candidates.extend([Vec3Fix::UNIT_Y, Vec3Fix::UNIT_X, Vec3Fix::UNIT_Z]);

    let mut best: Option<(Fix128, Vec3Fix)> = None;
    for dir in candidates {
        let n = dir.normalize();
        if n.is_zero() {
            continue;
        }
        for n in [n, -n] {
            let overlap = pair.support(n).w.dot(n);
            if best.map_or(true, |(d, _)| overlap < d) {
                best = Some((overlap, n));
            }
        }
    }

    let (depth, normal) = best?;
    let depth = depth.max(Fix128::ZERO);
    let point_b = simplex.point(|x| x.b);
    Some(Penetration {
        normal,
        depth,
        point_a: point_b + normal * depth,
        point_b,
    })
}

fn expand<A, B>(pair: &Pair<'_, A, B>, mut vertices: Vec<Vertex>) -> Option<Penetration>
where
    A: ConvexSupport + ?Sized,
    B: ConvexSupport + ?Sized,
{
    let mut faces: Vec<EpaFace> = [(0, 1, 2), (0, 3, 1), (0, 2, 3), (1, 3, 2)]
        .iter()
        .filter_map(|&(i, j, k)| make_face(&vertices, i, j, k))
        .collect();

    let mut best = None;
    for _ in 0..EPA_MAX_ITERATIONS {
        let closest = *faces.iter().min_by(|x, y| x.distance.cmp(&y.distance))?;
        best = Some(closest);

        let support = pair.support(closest.normal);
        let distance = support.w.dot(closest.normal);
        if distance - closest.distance < EPA_EPSILON || faces.len() >= EPA_MAX_FACES {
            break;
        }

        let new_idx = vertices.len();
        vertices.push(support);

        let mut edges: Vec<(usize, usize)> = Vec::new();
        faces.retain(|face| {
            let to_new = support.w - vertices[face.indices[0]].w;
            if face.normal.dot(to_new).is_positive() {
                for i in 0..3 {
                    let edge = (face.indices[i], face.indices[(i + 1) % 3]);
                    if let Some(pos) = edges.iter().position(|&e| e == (edge.1, edge.0)) {
                        edges.remove(pos);
                    } else {
                        edges.push(edge);
                    }
                }
                false
            } else {
                true
            }
        });
        for (i, j) in edges {
            if let Some(face) = make_face(&vertices, i, j, new_idx) {
                faces.push(face);
            }
        }
    }

    let face = best?;
    let [i, j, k] = face.indices;
    let (va, vb, vc) = (vertices[i], vertices[j], vertices[k]);
    let l = barycentric(face.normal * face.distance, va.w, vb.w, vc.w);
    Some(Penetration {
        normal: face.normal,
        depth: face.distance.max(Fix128::ZERO),
        point_a: va.a * l[0] + vb.a * l[1] + vc.a * l[2],
        point_b: va.b * l[0] + vb.b * l[1] + vc.b * l[2],
    })
}

fn barycentric(p: Vec3Fix, a: Vec3Fix, b: Vec3Fix, c: Vec3Fix) -> [Fix128; 3] {
    let v0 = b - a;
    let v1 = c - a;
    let v2 = p - a;
    let d00 = v0.dot(v0);
    let d01 = v0.dot(v1);
    let d11 = v1.dot(v1);
    let d20 = v2.dot(v0);
    let d21 = v2.dot(v1);
    let denom = d00 * d11 - d01 * d01;
    if denom.is_zero() {
        return [Fix128::ONE, Fix128::ZERO, Fix128::ZERO];
    }
    let v = (d11 * d20 - d01 * d21) / denom;
    let w = (d00 * d21 - d01 * d20) / denom;
    [Fix128::ONE - v - w, v, w]
}

// ============================================================================
// Single-shape helpers
// ============================================================================

/// Distance from `p` to the surface of a convex shape, zero inside (local space)
pub fn point_distance<S: ConvexSupport + ?Sized>(shape: &S, p: Vec3Fix) -> Fix128 {
    let r = gjk_distance(shape, &Transform::IDENTITY, &PointShape(p), &Transform::IDENTITY, Vec3Fix::ZERO);
    (r.distance - shape.core_radius()).max(Fix128::ZERO)
}

/// Closest surface point of a convex shape to an outside point (local space)
pub fn closest_point<S: ConvexSupport + ?Sized>(shape: &S, p: Vec3Fix) -> Vec3Fix {
    let r = gjk_distance(shape, &Transform::IDENTITY, &PointShape(p), &Transform::IDENTITY, Vec3Fix::ZERO);
    if r.overlapping || r.distance <= shape.core_radius() {
        return p;
    }
    r.point_a + r.normal() * shape.core_radius()
}

/// Conservative-advancement ray cast against a convex shape in local space
///
/// Returns the hit fraction along `from -> to` and the outward surface normal.
/// Segments starting inside the shape do not hit.
pub fn ray_cast<S: ConvexSupport + ?Sized>(shape: &S, from: Vec3Fix, to: Vec3Fix) -> Option<(Fix128, Vec3Fix)> {
    let seg = to - from;
    let len = seg.length();
    if len.is_zero() {
        return None;
    }
    let dir = seg / len;
    let radius = shape.core_radius();
    let mut t = Fix128::ZERO;
    let mut guess = Vec3Fix::ZERO;
    let mut normal = Vec3Fix::ZERO;
    for step in 0..RAY_MAX_ITERATIONS {
        let x = from + dir * t;
        let r = gjk_distance(shape, &Transform::IDENTITY, &PointShape(x), &Transform::IDENTITY, guess);
        let gap = r.distance - radius;
        if !r.overlapping {
            normal = r.normal();
        }
        if r.overlapping || gap <= RAY_HIT_EPSILON {
            if step == 0 {
                return None;
            }
            return Some((t / len, normal));
        }
        let approach = -normal.dot(dir);
        if !approach.is_positive() {
            return None;
        }
        t += gap / approach;
        if t > len {
            return None;
        }
        guess = -normal;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Mat3Fix;
    use crate::shape::Shape;

    fn at(x: i64, y: i64, z: i64) -> Transform {
        Transform::from_origin(Vec3Fix::from_int(x, y, z))
    }

    fn approx(a: Fix128, b: f64, tol: f64) -> bool {
        (a.to_f64() - b).abs() < tol
    }

    #[test]
    fn test_separated_boxes_distance() {
        let b = Shape::cuboid(Vec3Fix::from_int(1, 1, 1));
        let r = gjk_distance(&b, &at(0, 0, 0), &b, &at(5, 0, 0), Vec3Fix::ZERO);
        assert!(!r.overlapping);
        assert!(approx(r.distance, 3.0, 1e-9));
        assert!(approx(r.point_a.x, 1.0, 1e-9));
        assert!(approx(r.point_b.x, 4.0, 1e-9));
        assert!(approx(r.normal().x, 1.0, 1e-9));
    }

    #[test]
    fn test_sphere_cores_are_points() {
        let s = Shape::sphere(Fix128::ONE);
        let r = gjk_distance(&s, &at(0, 0, 0), &s, &at(0, 3, 0), Vec3Fix::ZERO);
        assert!(approx(r.distance, 3.0, 1e-9));
    }

    #[test]
    fn test_overlapping_boxes_epa() {
        let b = Shape::cuboid(Vec3Fix::from_int(1, 1, 1));
        let xf_a = Transform::from_origin(Vec3Fix::new(Fix128::HALF, Fix128::ZERO, Fix128::ZERO));
        let r = gjk_distance(&b, &xf_a, &b, &at(0, 0, 0), Vec3Fix::ZERO);
        assert!(r.overlapping);
        let p = epa(&b, &xf_a, &b, &at(0, 0, 0), &r).expect("penetration");
        assert!(approx(p.depth, 1.5, 1e-4));
        assert!(approx(p.normal.x, -1.0, 1e-4));
        let sep = (p.point_a - p.point_b).dot(p.normal);
        assert!(approx(sep, 1.5, 1e-3));
    }

    #[test]
    fn test_epa_on_coincident_cores() {
        let s = Shape::sphere(Fix128::ONE);
        let r = gjk_distance(&s, &at(0, 0, 0), &s, &at(0, 0, 0), Vec3Fix::ZERO);
        assert!(r.overlapping);
        let p = epa(&s, &at(0, 0, 0), &s, &at(0, 0, 0), &r).expect("penetration");
        assert!(approx(p.normal.length(), 1.0, 1e-9));
        assert!(p.depth.is_zero());
    }

    #[test]
    fn test_epa_on_point_inside_segment_core() {
        let capsule = Shape::capsule(Fix128::HALF, Fix128::from_int(4));
        let point = PointShape(Vec3Fix::new(Fix128::ZERO, Fix128::HALF, Fix128::ZERO));
        let r = gjk_distance(&point, &Transform::IDENTITY, &capsule, &at(0, 0, 0), Vec3Fix::ZERO);
        assert!(r.overlapping);
        let p = epa(&point, &Transform::IDENTITY, &capsule, &at(0, 0, 0), &r).expect("penetration");
        // Sideways is shorter than sliding off either end of the axis
        assert!(p.normal.y.is_zero());
        assert!(p.depth.is_zero());
    }

    #[test]
    fn test_rotated_box_distance() {
        let b = Shape::cuboid(Vec3Fix::from_int(1, 1, 1));
        let rot = Mat3Fix::from_axis_angle(Vec3Fix::UNIT_Z, Fix128::PI / Fix128::from_int(4));
        let xf_b = Transform::new(rot, Vec3Fix::from_int(4, 0, 0));
        let r = gjk_distance(&b, &at(0, 0, 0), &b, &xf_b, Vec3Fix::ZERO);
        // Corner of the rotated box sits sqrt(2) from its centre
        assert!(approx(r.distance, 3.0 - 2f64.sqrt(), 1e-6));
    }

    #[test]
    fn test_point_queries() {
        let hull = Shape::convex_polygon(vec![
            Vec3Fix::from_int(0, 0, 0),
            Vec3Fix::from_int(2, 0, 0),
            Vec3Fix::from_int(0, 2, 0),
            Vec3Fix::from_int(0, 0, 2),
        ]);
        assert!(point_distance(&hull, Vec3Fix::new(Fix128::HALF, Fix128::HALF, Fix128::HALF)).is_zero());
        assert!(approx(point_distance(&hull, Vec3Fix::from_int(-3, 0, 0)), 3.0, 1e-9));
        let c = closest_point(&hull, Vec3Fix::from_int(0, -4, 0));
        assert!(c.length_squared().is_zero_approx());
    }

    #[test]
    fn test_ray_cast_hull() {
        let hull = Shape::convex_polygon(vec![
            Vec3Fix::from_int(-1, -1, -1),
            Vec3Fix::from_int(1, -1, -1),
            Vec3Fix::from_int(-1, 1, -1),
            Vec3Fix::from_int(1, 1, -1),
            Vec3Fix::from_int(-1, -1, 1),
            Vec3Fix::from_int(1, -1, 1),
            Vec3Fix::from_int(-1, 1, 1),
            Vec3Fix::from_int(1, 1, 1),
        ]);
        let (t, n) = ray_cast(&hull, Vec3Fix::from_int(0, 5, 0), Vec3Fix::from_int(0, -5, 0)).expect("hit");
        assert!(approx(t, 0.4, 1e-6));
        assert!(approx(n.y, 1.0, 1e-6));
        assert!(ray_cast(&hull, Vec3Fix::from_int(3, 5, 0), Vec3Fix::from_int(3, -5, 0)).is_none());
        assert!(ray_cast(&hull, Vec3Fix::ZERO, Vec3Fix::from_int(0, -5, 0)).is_none());
    }
}
