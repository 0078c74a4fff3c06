//! Deterministic Fixed-Point Mathematics
//!
//! > "Two machines, one simulation, zero drift."
//!
//! # Overview
//!
//! Every quantity the space simulates (positions, velocities, impulses,
//! inertia) is carried as 128-bit fixed point so that a step produces
//! bit-identical results on every platform.
//!
//! # Features
//!
//! - **Exact division**: 192-by-128 bit long division for every divisor size
//! - **Integer square root**: no floating point on the hot path
//! - **Geometry helpers**: basis matrices, rigid transforms, planes and AABBs
//!
//! # Types
//!
//! - `Fix128` (I64F64): 64 integer bits, 64 fractional bits
//! - `Vec3Fix`: 3D vector of `Fix128`
//! - `Mat3Fix`: 3x3 matrix stored by columns (a rotation basis or an inertia tensor)
//! - `Transform`: basis + origin
//! - `Plane`, `AABB`
//!
//! Author: Moroya Sakamoto

use core::cmp::Ordering;
use core::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

// ============================================================================
// Fix128 (I64F64)
// ============================================================================

/// 128-bit fixed-point number (64 integer bits, 64 fractional bits)
///
/// `value = ((hi << 64) | lo) / 2^64`, two's complement.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(C)]
pub struct Fix128 {
    /// Integer part (signed)
    pub hi: i64,
    /// Fractional part
    pub lo: u64,
}

impl Fix128 {
    /// 0.0
    pub const ZERO: Self = Self { hi: 0, lo: 0 };

    /// 1.0
    pub const ONE: Self = Self { hi: 1, lo: 0 };

    /// -1.0
    pub const NEG_ONE: Self = Self { hi: -1, lo: 0 };

    /// 0.5
    pub const HALF: Self = Self { hi: 0, lo: 1 << 63 };

    /// Pi
    pub const PI: Self = Self {
        hi: 3,
        lo: 0x243F_6A88_85A3_08D3,
    };

    /// Pi / 2
    pub const HALF_PI: Self = Self {
        hi: 1,
        lo: 0x921F_B544_42D1_8469,
    };

    /// 2 Pi
    pub const TWO_PI: Self = Self {
        hi: 6,
        lo: 0x487E_D511_0B46_11A6,
    };

    /// Approximately 1e-5, the tolerance used for "close to zero" checks.
    pub const CMP_EPSILON: Self = Self {
        hi: 0,
        lo: 0x0000_A7C5_AC47_1B47,
    };

    /// Smallest positive value (2^-64)
    pub const DELTA: Self = Self { hi: 0, lo: 1 };

    /// Largest representable value
    pub const MAX: Self = Self {
        hi: i64::MAX,
        lo: u64::MAX,
    };

    /// Create from integer
    #[inline]
    pub const fn from_int(n: i64) -> Self {
        Self { hi: n, lo: 0 }
    }

    /// Create from raw parts (hi = integer, lo = fraction)
    #[inline]
    pub const fn from_raw(hi: i64, lo: u64) -> Self {
        Self { hi, lo }
    }

    /// Raw two's complement bits
    #[inline]
    pub const fn to_bits(self) -> i128 {
        ((self.hi as i128) << 64) | (self.lo as i128)
    }

    /// Inverse of [`Fix128::to_bits`]
    #[inline]
    pub const fn from_bits(bits: i128) -> Self {
        Self {
            hi: (bits >> 64) as i64,
            lo: bits as u64,
        }
    }

    /// Create from f64 (configuration and tests only)
    #[cfg(feature = "std")]
    pub fn from_f64(f: f64) -> Self {
        if !f.is_finite() {
            return Self::ZERO;
        }
        let whole = f.floor();
        let frac = f - whole;
        Self {
            hi: whole as i64,
            lo: (frac * 18_446_744_073_709_551_616.0) as u64,
        }
    }

    /// Convert to f64 (debugging and tests only)
    #[cfg(feature = "std")]
    pub fn to_f64(self) -> f64 {
        self.hi as f64 + self.lo as f64 / 18_446_744_073_709_551_616.0
    }

    /// `num / denom`, zero when `denom` is zero
    pub fn from_ratio(num: i64, denom: i64) -> Self {
        if denom == 0 {
            return Self::ZERO;
        }
        Self::from_int(num) / Self::from_int(denom)
    }

    /// True when exactly zero
    #[inline]
    pub const fn is_zero(self) -> bool {
        self.hi == 0 && self.lo == 0
    }

    /// True when strictly negative
    #[inline]
    pub const fn is_negative(self) -> bool {
        self.hi < 0
    }

    /// True when strictly positive
    #[inline]
    pub const fn is_positive(self) -> bool {
        self.hi > 0 || (self.hi == 0 && self.lo != 0)
    }

    /// Absolute value
    #[inline]
    pub fn abs(self) -> Self {
        if self.is_negative() {
            -self
        } else {
            self
        }
    }

    /// Round toward negative infinity
    #[inline]
    pub const fn floor(self) -> Self {
        Self { hi: self.hi, lo: 0 }
    }

    /// Round to nearest integer, halves away from negative infinity
    #[inline]
    pub fn round(self) -> Self {
        (self + Self::HALF).floor()
    }

    /// Divide by two (arithmetic shift)
    #[inline]
    pub const fn half(self) -> Self {
        Self::from_bits(self.to_bits() >> 1)
    }

    /// Multiply by two
    #[inline]
    pub const fn double(self) -> Self {
        Self::from_bits(self.to_bits().wrapping_shl(1))
    }

    /// Smaller of two values
    #[inline]
    pub fn min(self, other: Self) -> Self {
        if self <= other {
            self
        } else {
            other
        }
    }

    /// Larger of two values
    #[inline]
    pub fn max(self, other: Self) -> Self {
        if self >= other {
            self
        } else {
            other
        }
    }

    /// Clamp into `[lo, hi]`
    #[inline]
    pub fn clamp(self, lo: Self, hi: Self) -> Self {
        self.max(lo).min(hi)
    }

    /// `|self| < CMP_EPSILON`
    #[inline]
    pub fn is_zero_approx(self) -> bool {
        self.abs() < Self::CMP_EPSILON
    }

    /// Square root, zero for non-positive input
    ///
    /// Integer square root of the raw bits gives 32 correct fractional bits;
    /// two Newton steps bring the result to full precision.
    pub fn sqrt(self) -> Self {
        if !self.is_positive() {
            return Self::ZERO;
        }
        let raw = self.to_bits() as u128;
        let root = isqrt_u128(raw) << 32;
        let mut x = Self::from_bits(root as i128);
        if x.is_zero() {
            x = Self::DELTA;
        }
        for _ in 0..2 {
            x = (x + self / x).half();
        }
        x
    }

    /// Sine and cosine by range reduction and a fixed-length Taylor series
    pub fn sin_cos(self) -> (Self, Self) {
        let turns = (self / Self::TWO_PI).round();
        let mut x = self - Self::TWO_PI * turns;
        let mut flip_cos = false;
        if x > Self::HALF_PI {
            x = Self::PI - x;
            flip_cos = true;
        } else if x < -Self::HALF_PI {
            x = -Self::PI - x;
            flip_cos = true;
        }

        let x2 = x * x;
        let mut sin = x;
        let mut cos = Self::ONE;
        let mut term_s = x;
        let mut term_c = Self::ONE;
        for k in 1..=13i64 {
            term_s = -(term_s * x2) / Self::from_int((2 * k) * (2 * k + 1));
            term_c = -(term_c * x2) / Self::from_int((2 * k - 1) * (2 * k));
            sin += term_s;
            cos += term_c;
        }
        (sin, if flip_cos { -cos } else { cos })
    }
}

/// Floor of the square root of a 128-bit integer (digit-by-digit)
fn isqrt_u128(n: u128) -> u128 {
    if n < 2 {
        return n;
    }
    let mut rem = n;
    let mut root = 0u128;
    let mut bit = 1u128 << 126;
    while bit > n {
        bit >>= 2;
    }
    while bit != 0 {
        if rem >= root + bit {
            rem -= root + bit;
            root = (root >> 1) + bit;
        } else {
            root >>= 1;
        }
        bit >>= 2;
    }
    root
}

/// `floor(rem * 2^64 / divisor)` for `rem < divisor`
fn fraction_digits(mut rem: u128, divisor: u128) -> u64 {
    if divisor >> 96 == 0 {
        // rem < 2^96, so two 32-bit digit steps never overflow
        let r1 = rem << 32;
        let q1 = r1 / divisor;
        let r2 = (r1 % divisor) << 32;
        let q2 = r2 / divisor;
        return ((q1 << 32) | q2) as u64;
    }

    let mut quot = 0u64;
    for _ in 0..64 {
        let carry = rem >> 127;
        rem <<= 1;
        quot <<= 1;
        if carry != 0 || rem >= divisor {
            rem = rem.wrapping_sub(divisor);
            quot |= 1;
        }
    }
    quot
}

impl Add for Fix128 {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        let (lo, carry) = self.lo.overflowing_add(rhs.lo);
        let hi = self.hi.wrapping_add(rhs.hi).wrapping_add(carry as i64);
        Self { hi, lo }
    }
}

impl AddAssign for Fix128 {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Fix128 {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        let (lo, borrow) = self.lo.overflowing_sub(rhs.lo);
        let hi = self.hi.wrapping_sub(rhs.hi).wrapping_sub(borrow as i64);
        Self { hi, lo }
    }
}

impl SubAssign for Fix128 {
    #[inline]
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl Mul for Fix128 {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        // Middle 128 bits of the 256-bit product:
        // (a_hi*b_hi << 64) + a_hi*b_lo + a_lo*b_hi + (a_lo*b_lo >> 64)
        let a_hi = self.hi as i128;
        let a_lo = self.lo as u128;
        let b_hi = rhs.hi as i128;
        let b_lo = rhs.lo as u128;

        let ll = a_lo.wrapping_mul(b_lo);
        let hl = a_hi.wrapping_mul(b_lo as i128);
        let lh = (a_lo as i128).wrapping_mul(b_hi);
        let hh = a_hi.wrapping_mul(b_hi);

        let mid = hl.wrapping_add(lh).wrapping_add((ll >> 64) as i128);
        Self {
            hi: (hh as i64).wrapping_add((mid >> 64) as i64),
            lo: mid as u64,
        }
    }
}

impl Div for Fix128 {
    type Output = Self;

    /// Division by zero yields zero.
    fn div(self, rhs: Self) -> Self {
        if rhs.is_zero() {
            return Self::ZERO;
        }
        let neg = self.is_negative() != rhs.is_negative();
        let a = self.to_bits().unsigned_abs();
        let b = rhs.to_bits().unsigned_abs();

        let whole = a / b;
        let frac = fraction_digits(a % b, b);
        let result = Self {
            hi: whole as i64,
            lo: frac,
        };
        if neg {
            -result
        } else {
            result
        }
    }
}

impl Neg for Fix128 {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        let (lo, carry) = (!self.lo).overflowing_add(1);
        let hi = (!self.hi).wrapping_add(carry as i64);
        Self { hi, lo }
    }
}

impl PartialOrd for Fix128 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Fix128 {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.hi.cmp(&other.hi) {
            Ordering::Equal => self.lo.cmp(&other.lo),
            ord => ord,
        }
    }
}

// ============================================================================
// Vec3Fix
// ============================================================================

/// 3D vector using Fix128 components
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(C)]
pub struct Vec3Fix {
    pub x: Fix128,
    pub y: Fix128,
    pub z: Fix128,
}

impl Vec3Fix {
    /// Zero vector
    pub const ZERO: Self = Self::new(Fix128::ZERO, Fix128::ZERO, Fix128::ZERO);
    /// Unit X
    pub const UNIT_X: Self = Self::new(Fix128::ONE, Fix128::ZERO, Fix128::ZERO);
    /// Unit Y
    pub const UNIT_Y: Self = Self::new(Fix128::ZERO, Fix128::ONE, Fix128::ZERO);
    /// Unit Z
    pub const UNIT_Z: Self = Self::new(Fix128::ZERO, Fix128::ZERO, Fix128::ONE);

    /// Create new vector
    #[inline]
    pub const fn new(x: Fix128, y: Fix128, z: Fix128) -> Self {
        Self { x, y, z }
    }

    /// Create from integers
    #[inline]
    pub const fn from_int(x: i64, y: i64, z: i64) -> Self {
        Self::new(Fix128::from_int(x), Fix128::from_int(y), Fix128::from_int(z))
    }

    /// All three components set to `v`
    #[inline]
    pub const fn splat(v: Fix128) -> Self {
        Self::new(v, v, v)
    }

    /// Create from f64 components (configuration and tests only)
    #[cfg(feature = "std")]
    pub fn from_f64(x: f64, y: f64, z: f64) -> Self {
        Self::new(Fix128::from_f64(x), Fix128::from_f64(y), Fix128::from_f64(z))
    }

    /// Component by axis index (0 = x, 1 = y, anything else = z)
    #[inline]
    pub fn axis(self, i: usize) -> Fix128 {
        match i {
            0 => self.x,
            1 => self.y,
            _ => self.z,
        }
    }

    /// Replace the component at axis index `i`
    #[inline]
    pub fn set_axis(&mut self, i: usize, v: Fix128) {
        match i {
            0 => self.x = v,
            1 => self.y = v,
            _ => self.z = v,
        }
    }

    /// Dot product
    #[inline]
    pub fn dot(self, rhs: Self) -> Fix128 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    /// Cross product
    #[inline]
    pub fn cross(self, rhs: Self) -> Self {
        Self {
            x: self.y * rhs.z - self.z * rhs.y,
            y: self.z * rhs.x - self.x * rhs.z,
            z: self.x * rhs.y - self.y * rhs.x,
        }
    }

    /// Squared length
    #[inline]
    pub fn length_squared(self) -> Fix128 {
        self.dot(self)
    }

    /// Length
    #[inline]
    pub fn length(self) -> Fix128 {
        self.length_squared().sqrt()
    }

    /// Distance to another point
    #[inline]
    pub fn distance_to(self, other: Self) -> Fix128 {
        (other - self).length()
    }

    /// Squared distance to another point
    #[inline]
    pub fn distance_squared_to(self, other: Self) -> Fix128 {
        (other - self).length_squared()
    }

    /// Unit vector in the same direction, zero for a zero vector
    pub fn normalize(self) -> Self {
        let len = self.length();
        if len.is_zero() {
            Self::ZERO
        } else {
            self / len
        }
    }

    /// Scale by scalar
    #[inline]
    pub fn scale(self, s: Fix128) -> Self {
        Self::new(self.x * s, self.y * s, self.z * s)
    }

    /// Component-wise product
    #[inline]
    pub fn mul_elem(self, rhs: Self) -> Self {
        Self::new(self.x * rhs.x, self.y * rhs.y, self.z * rhs.z)
    }

    /// Component-wise absolute value
    #[inline]
    pub fn abs(self) -> Self {
        Self::new(self.x.abs(), self.y.abs(), self.z.abs())
    }

    /// Component-wise minimum
    #[inline]
    pub fn min(self, rhs: Self) -> Self {
        Self::new(self.x.min(rhs.x), self.y.min(rhs.y), self.z.min(rhs.z))
    }

    /// Component-wise maximum
    #[inline]
    pub fn max(self, rhs: Self) -> Self {
        Self::new(self.x.max(rhs.x), self.y.max(rhs.y), self.z.max(rhs.z))
    }

    /// True when every component is exactly zero
    #[inline]
    pub fn is_zero(self) -> bool {
        self.x.is_zero() && self.y.is_zero() && self.z.is_zero()
    }

    /// Linear interpolation
    #[inline]
    pub fn lerp(self, to: Self, t: Fix128) -> Self {
        self + (to - self) * t
    }

    /// Index of the component with the largest magnitude
    pub fn max_axis(self) -> usize {
        let a = self.abs();
        if a.x >= a.y && a.x >= a.z {
            0
        } else if a.y >= a.z {
            1
        } else {
            2
        }
    }

    /// Any unit vector perpendicular to `self` (which must be non-zero)
    pub fn any_perpendicular(self) -> Self {
        let helper = if self.x.abs() < Fix128::from_ratio(57, 100) {
            Self::UNIT_X
        } else {
            Self::UNIT_Y
        };
        self.cross(helper).normalize()
    }
}

impl Add for Vec3Fix {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl AddAssign for Vec3Fix {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Vec3Fix {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl SubAssign for Vec3Fix {
    #[inline]
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl Mul<Fix128> for Vec3Fix {
    type Output = Self;

    #[inline]
    fn mul(self, rhs: Fix128) -> Self {
        self.scale(rhs)
    }
}

impl Div<Fix128> for Vec3Fix {
    type Output = Self;

    #[inline]
    fn div(self, rhs: Fix128) -> Self {
        Self::new(self.x / rhs, self.y / rhs, self.z / rhs)
    }
}

impl Neg for Vec3Fix {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

// ============================================================================
// Mat3Fix
// ============================================================================

/// 3x3 matrix stored by columns
///
/// As a basis, column `i` is the image of the local axis `i`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(C)]
pub struct Mat3Fix {
    pub col0: Vec3Fix,
    pub col1: Vec3Fix,
    pub col2: Vec3Fix,
}

impl Mat3Fix {
    /// Identity matrix
    pub const IDENTITY: Self = Self::from_cols(Vec3Fix::UNIT_X, Vec3Fix::UNIT_Y, Vec3Fix::UNIT_Z);

    /// Zero matrix
    pub const ZERO: Self = Self::from_cols(Vec3Fix::ZERO, Vec3Fix::ZERO, Vec3Fix::ZERO);

    /// Create from columns
    #[inline]
    pub const fn from_cols(col0: Vec3Fix, col1: Vec3Fix, col2: Vec3Fix) -> Self {
        Self { col0, col1, col2 }
    }

    /// Create from rows
    #[inline]
    pub fn from_rows(row0: Vec3Fix, row1: Vec3Fix, row2: Vec3Fix) -> Self {
        Self::from_cols(row0, row1, row2).transpose()
    }

    /// Diagonal matrix
    #[inline]
    pub fn diagonal(d: Vec3Fix) -> Self {
        Self::from_cols(
            Vec3Fix::new(d.x, Fix128::ZERO, Fix128::ZERO),
            Vec3Fix::new(Fix128::ZERO, d.y, Fix128::ZERO),
            Vec3Fix::new(Fix128::ZERO, Fix128::ZERO, d.z),
        )
    }

    /// Rotation of `angle` radians around the unit vector `axis`
    pub fn from_axis_angle(axis: Vec3Fix, angle: Fix128) -> Self {
        let axis = axis.normalize();
        let (s, c) = angle.sin_cos();
        let t = Fix128::ONE - c;
        let (x, y, z) = (axis.x, axis.y, axis.z);
        Self::from_rows(
            Vec3Fix::new(t * x * x + c, t * x * y - s * z, t * x * z + s * y),
            Vec3Fix::new(t * x * y + s * z, t * y * y + c, t * y * z - s * x),
            Vec3Fix::new(t * x * z - s * y, t * y * z + s * x, t * z * z + c),
        )
    }

    /// Cross-product matrix: `skew(v) * w == v.cross(w)`
    pub fn skew(v: Vec3Fix) -> Self {
        Self::from_rows(
            Vec3Fix::new(Fix128::ZERO, -v.z, v.y),
            Vec3Fix::new(v.z, Fix128::ZERO, -v.x),
            Vec3Fix::new(-v.y, v.x, Fix128::ZERO),
        )
    }

    /// Column `i` (0, 1 or 2)
    #[inline]
    pub fn axis(self, i: usize) -> Vec3Fix {
        match i {
            0 => self.col0,
            1 => self.col1,
            _ => self.col2,
        }
    }

    /// Row `i` (0, 1 or 2)
    #[inline]
    pub fn row(self, i: usize) -> Vec3Fix {
        Vec3Fix::new(self.col0.axis(i), self.col1.axis(i), self.col2.axis(i))
    }

    /// Matrix-vector multiplication
    #[inline]
    pub fn mul_vec(self, v: Vec3Fix) -> Vec3Fix {
        self.col0 * v.x + self.col1 * v.y + self.col2 * v.z
    }

    /// `transpose() * v` without building the transpose
    #[inline]
    pub fn transpose_mul_vec(self, v: Vec3Fix) -> Vec3Fix {
        Vec3Fix::new(self.col0.dot(v), self.col1.dot(v), self.col2.dot(v))
    }

    /// Transpose
    #[inline]
    pub fn transpose(self) -> Self {
        Self::from_cols(self.row(0), self.row(1), self.row(2))
    }

    /// Scale all elements
    #[inline]
    pub fn scale(self, s: Fix128) -> Self {
        Self::from_cols(self.col0 * s, self.col1 * s, self.col2 * s)
    }

    /// Determinant
    #[inline]
    pub fn determinant(self) -> Fix128 {
        self.col0.dot(self.col1.cross(self.col2))
    }

    /// Inverse, or `None` for a singular matrix
    pub fn inverse(self) -> Option<Self> {
        let det = self.determinant();
        if det.is_zero() {
            return None;
        }
        let r0 = self.col1.cross(self.col2) / det;
        let r1 = self.col2.cross(self.col0) / det;
        let r2 = self.col0.cross(self.col1) / det;
        Some(Self::from_rows(r0, r1, r2))
    }

    /// Gram-Schmidt on the columns
    pub fn orthonormalized(self) -> Self {
        let x = self.col0.normalize();
        let y = (self.col1 - x * x.dot(self.col1)).normalize();
        let z = (self.col2 - x * x.dot(self.col2) - y * y.dot(self.col2)).normalize();
        Self::from_cols(x, y, z)
    }

    /// Length of each column
    pub fn scale_factors(self) -> Vec3Fix {
        Vec3Fix::new(self.col0.length(), self.col1.length(), self.col2.length())
    }
}

impl Mul<Mat3Fix> for Mat3Fix {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        Self::from_cols(
            self.mul_vec(rhs.col0),
            self.mul_vec(rhs.col1),
            self.mul_vec(rhs.col2),
        )
    }
}

impl Add for Mat3Fix {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::from_cols(self.col0 + rhs.col0, self.col1 + rhs.col1, self.col2 + rhs.col2)
    }
}

impl Sub for Mat3Fix {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::from_cols(self.col0 - rhs.col0, self.col1 - rhs.col1, self.col2 - rhs.col2)
    }
}

// ============================================================================
// Transform
// ============================================================================

/// Basis + origin
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Transform {
    pub basis: Mat3Fix,
    pub origin: Vec3Fix,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    /// Identity transform
    pub const IDENTITY: Self = Self {
        basis: Mat3Fix::IDENTITY,
        origin: Vec3Fix::ZERO,
    };

    /// Create from basis and origin
    #[inline]
    pub const fn new(basis: Mat3Fix, origin: Vec3Fix) -> Self {
        Self { basis, origin }
    }

    /// Pure translation
    #[inline]
    pub const fn from_origin(origin: Vec3Fix) -> Self {
        Self {
            basis: Mat3Fix::IDENTITY,
            origin,
        }
    }

    /// Local point to parent space
    #[inline]
    pub fn xform(&self, v: Vec3Fix) -> Vec3Fix {
        self.basis.mul_vec(v) + self.origin
    }

    /// Parent point to local space (orthonormal basis only)
    #[inline]
    pub fn xform_inv(&self, v: Vec3Fix) -> Vec3Fix {
        self.basis.transpose_mul_vec(v - self.origin)
    }

    /// Rotate/scale a direction
    #[inline]
    pub fn basis_xform(&self, v: Vec3Fix) -> Vec3Fix {
        self.basis.mul_vec(v)
    }

    /// Inverse-rotate a direction (orthonormal basis only)
    #[inline]
    pub fn basis_xform_inv(&self, v: Vec3Fix) -> Vec3Fix {
        self.basis.transpose_mul_vec(v)
    }

    /// Inverse of an arbitrary (scaled, sheared) transform
    ///
    /// A singular basis yields the identity basis.
    pub fn affine_inverse(&self) -> Self {
        let inv = self.basis.inverse().unwrap_or(Mat3Fix::IDENTITY);
        Self {
            basis: inv,
            origin: -inv.mul_vec(self.origin),
        }
    }

    /// `self * other`: apply `other` first
    #[inline]
    pub fn mul(&self, other: &Transform) -> Transform {
        Transform {
            basis: self.basis * other.basis,
            origin: self.xform(other.origin),
        }
    }

    /// Same transform shifted by `offset`
    #[inline]
    pub fn translated(&self, offset: Vec3Fix) -> Transform {
        Transform {
            basis: self.basis,
            origin: self.origin + offset,
        }
    }
}

// ============================================================================
// Plane
// ============================================================================

/// Plane `normal . p = d`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Plane {
    pub normal: Vec3Fix,
    pub d: Fix128,
}

impl Plane {
    /// Create from a (not necessarily unit) normal and offset
    pub fn new(normal: Vec3Fix, d: Fix128) -> Self {
        Self { normal, d }
    }

    /// Plane through `point` with `normal`
    pub fn from_point_normal(point: Vec3Fix, normal: Vec3Fix) -> Self {
        let n = normal.normalize();
        Self {
            normal: n,
            d: n.dot(point),
        }
    }

    /// Signed distance (positive on the normal side)
    #[inline]
    pub fn distance_to(&self, p: Vec3Fix) -> Fix128 {
        self.normal.dot(p) - self.d
    }

    /// Orthogonal projection of `p` on the plane
    #[inline]
    pub fn project(&self, p: Vec3Fix) -> Vec3Fix {
        p - self.normal * self.distance_to(p)
    }

    /// Any point on the plane
    #[inline]
    pub fn center(&self) -> Vec3Fix {
        self.normal * self.d
    }

    /// Plane in the parent space of `xf` (orthonormal basis)
    pub fn transformed(&self, xf: &Transform) -> Plane {
        Plane::from_point_normal(xf.xform(self.center()), xf.basis_xform(self.normal))
    }

    /// Segment intersection, `None` when parallel or outside `[from, to]`
    pub fn intersect_segment(&self, from: Vec3Fix, to: Vec3Fix) -> Option<Vec3Fix> {
        let seg = to - from;
        let den = self.normal.dot(seg);
        if den.is_zero() {
            return None;
        }
        let t = (self.d - self.normal.dot(from)) / den;
        if t < Fix128::ZERO || t > Fix128::ONE {
            return None;
        }
        Some(from + seg * t)
    }
}

// ============================================================================
// AABB
// ============================================================================

/// Axis-aligned bounding box
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AABB {
    /// Minimum corner
    pub min: Vec3Fix,
    /// Maximum corner
    pub max: Vec3Fix,
}

impl AABB {
    /// Create a new AABB from min and max corners
    #[inline]
    pub const fn new(min: Vec3Fix, max: Vec3Fix) -> Self {
        Self { min, max }
    }

    /// Create from center and half-extents
    #[inline]
    pub fn from_center_half(center: Vec3Fix, half: Vec3Fix) -> Self {
        Self::new(center - half, center + half)
    }

    /// Smallest box containing every point (empty box at origin for no points)
    pub fn from_points(points: &[Vec3Fix]) -> Self {
        let Some(first) = points.first() else {
            return Self::default();
        };
        points
            .iter()
            .fold(Self::new(*first, *first), |acc, p| acc.expand_to(*p))
    }

    /// Overlap test (touching counts)
    #[inline]
    pub fn intersects(&self, other: &AABB) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// True when `other` lies fully inside
    #[inline]
    pub fn contains(&self, other: &AABB) -> bool {
        self.min.x <= other.min.x
            && self.min.y <= other.min.y
            && self.min.z <= other.min.z
            && self.max.x >= other.max.x
            && self.max.y >= other.max.y
            && self.max.z >= other.max.z
    }

    /// True when the point lies inside or on the boundary
    #[inline]
    pub fn has_point(&self, p: Vec3Fix) -> bool {
        p.x >= self.min.x
            && p.y >= self.min.y
            && p.z >= self.min.z
            && p.x <= self.max.x
            && p.y <= self.max.y
            && p.z <= self.max.z
    }

    /// Union of two boxes
    #[inline]
    pub fn union(&self, other: &AABB) -> AABB {
        AABB::new(self.min.min(other.min), self.max.max(other.max))
    }

    /// Box grown to include `p`
    #[inline]
    pub fn expand_to(&self, p: Vec3Fix) -> AABB {
        AABB::new(self.min.min(p), self.max.max(p))
    }

    /// Box grown by `margin` on every side
    #[inline]
    pub fn grow(&self, margin: Fix128) -> AABB {
        let m = Vec3Fix::splat(margin);
        AABB::new(self.min - m, self.max + m)
    }

    /// Box swept along `motion`
    #[inline]
    pub fn merged_with_motion(&self, motion: Vec3Fix) -> AABB {
        self.union(&AABB::new(self.min + motion, self.max + motion))
    }

    /// Center point
    #[inline]
    pub fn center(&self) -> Vec3Fix {
        (self.min + self.max).scale(Fix128::HALF)
    }

    /// Full size along each axis
    #[inline]
    pub fn size(&self) -> Vec3Fix {
        self.max - self.min
    }

    /// Surface area (BVH cost heuristic)
    pub fn surface_area(&self) -> Fix128 {
        let d = self.size();
        (d.x * d.y + d.y * d.z + d.z * d.x).double()
    }

    /// Bounds of this box after applying `xf`
    pub fn transformed(&self, xf: &Transform) -> AABB {
        let center = xf.xform(self.center());
        let half = self.size().scale(Fix128::HALF);
        let b = xf.basis;
        let extent = Vec3Fix::new(
            b.row(0).abs().dot(half),
            b.row(1).abs().dot(half),
            b.row(2).abs().dot(half),
        );
        AABB::from_center_half(center, extent)
    }

    /// Slab test against the segment `from -> to`
    pub fn intersects_segment(&self, from: Vec3Fix, to: Vec3Fix) -> bool {
        let dir = to - from;
        let mut t_min = Fix128::ZERO;
        let mut t_max = Fix128::ONE;
        for i in 0..3 {
            let o = from.axis(i);
            let d = dir.axis(i);
            let lo = self.min.axis(i);
            let hi = self.max.axis(i);
            if d.is_zero() {
                if o < lo || o > hi {
                    return false;
                }
                continue;
            }
            let mut t0 = (lo - o) / d;
            let mut t1 = (hi - o) / d;
            if t0 > t1 {
                core::mem::swap(&mut t0, &mut t1);
            }
            t_min = t_min.max(t0);
            t_max = t_max.min(t1);
            if t_min > t_max {
                return false;
            }
        }
        true
    }
}
