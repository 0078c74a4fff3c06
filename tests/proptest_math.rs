//! Property tests for the fixed-point math layer

use alice_space::{Fix128, Mat3Fix, Transform, Vec3Fix, AABB};
use proptest::prelude::*;

fn tolerance() -> Fix128 {
    Fix128::from_ratio(1, 1_000_000)
}

fn small_vec() -> impl Strategy<Value = Vec3Fix> {
    (-1000i64..1000, -1000i64..1000, -1000i64..1000).prop_map(|(x, y, z)| Vec3Fix::from_int(x, y, z))
}

fn close(a: Vec3Fix, b: Vec3Fix, tol: Fix128) -> bool {
    (a.x - b.x).abs() < tol && (a.y - b.y).abs() < tol && (a.z - b.z).abs() < tol
}

proptest! {
    #[test]
    fn add_sub_round_trip(a in -1_000_000i64..1_000_000, b in -1_000_000i64..1_000_000, d in 1i64..1000) {
        let x = Fix128::from_ratio(a, d);
        let y = Fix128::from_int(b);
        prop_assert_eq!(x + y - y, x);
        prop_assert_eq!(x * Fix128::ONE, x);
        prop_assert_eq!(-(-x), x);
    }

    #[test]
    fn sqrt_squares_back(n in 0i64..1_000_000) {
        let x = Fix128::from_int(n);
        let r = x.sqrt();
        prop_assert!(!r.is_negative());
        prop_assert!((r * r - x).abs() < Fix128::from_ratio(1, 1000));
    }

    #[test]
    fn cross_is_perpendicular(a in small_vec(), b in small_vec()) {
        let c = a.cross(b);
        prop_assert!(c.dot(a).is_zero());
        prop_assert!(c.dot(b).is_zero());
        prop_assert_eq!(b.cross(a), -c);
    }

    #[test]
    fn normalize_gives_unit_length(v in small_vec()) {
        prop_assume!(!v.is_zero());
        let n = v.normalize();
        prop_assert!((n.length() - Fix128::ONE).abs() < tolerance());
    }

    #[test]
    fn transform_inverse_round_trip(
        axis in small_vec(),
        angle_milli in -3141i64..3141,
        origin in small_vec(),
        p in small_vec(),
    ) {
        prop_assume!(!axis.is_zero());
        let basis = Mat3Fix::from_axis_angle(axis.normalize(), Fix128::from_ratio(angle_milli, 1000));
        let xf = Transform::new(basis, origin);
        let back = xf.xform_inv(xf.xform(p));
        prop_assert!(close(back, p, Fix128::from_ratio(1, 10_000)));
        let via_inverse = xf.affine_inverse().xform(xf.xform(p));
        prop_assert!(close(via_inverse, p, Fix128::from_ratio(1, 10_000)));
    }

    #[test]
    fn aabb_union_contains_both(a in small_vec(), b in small_vec(), c in small_vec(), d in small_vec()) {
        let first = AABB::from_points(&[a, b]);
        let second = AABB::from_points(&[c, d]);
        let merged = first.union(&second);
        for p in [a, b, c, d] {
            prop_assert!(merged.has_point(p));
        }
        prop_assert!(merged.intersects(&first));
        prop_assert!(merged.intersects(&second));
    }
}
