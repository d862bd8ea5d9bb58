//! Rigid-body math on top of glam: rotations, transforms, sweeps.

use std::f32::consts::TAU;

use glam::{Mat2, Vec2};

/// Cross product of a vector and a scalar: `v × s`.
#[inline]
pub fn cross_vs(v: Vec2, s: f32) -> Vec2 {
    Vec2::new(s * v.y, -s * v.x)
}

/// Cross product of a scalar and a vector: `s × v`.
#[inline]
pub fn cross_sv(s: f32, v: Vec2) -> Vec2 {
    Vec2::new(-s * v.y, s * v.x)
}

/// Solve `m * x = b`. Returns zero when `m` is singular.
#[inline]
pub fn solve22(m: Mat2, b: Vec2) -> Vec2 {
    let (a11, a12, a21, a22) = (m.x_axis.x, m.y_axis.x, m.x_axis.y, m.y_axis.y);
    let mut det = a11 * a22 - a12 * a21;
    if det != 0.0 {
        det = 1.0 / det;
    }
    Vec2::new(det * (a22 * b.x - a12 * b.y), det * (a11 * b.y - a21 * b.x))
}

/// Inverse of `m`, or the zero matrix when `m` is singular.
#[inline]
pub fn inverse22(m: Mat2) -> Mat2 {
    let (a, b, c, d) = (m.x_axis.x, m.y_axis.x, m.x_axis.y, m.y_axis.y);
    let mut det = a * d - b * c;
    if det != 0.0 {
        det = 1.0 / det;
    }
    Mat2::from_cols(Vec2::new(det * d, -det * c), Vec2::new(-det * b, det * a))
}

/// Rotation stored as sine and cosine.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Rot {
    pub s: f32,
    pub c: f32,
}

impl Default for Rot {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Rot {
    pub const IDENTITY: Self = Self { s: 0.0, c: 1.0 };

    #[inline]
    pub fn from_angle(angle: f32) -> Self {
        let (s, c) = angle.sin_cos();
        Self { s, c }
    }

    #[inline]
    pub fn angle(&self) -> f32 {
        self.s.atan2(self.c)
    }

    #[inline]
    pub fn x_axis(&self) -> Vec2 {
        Vec2::new(self.c, self.s)
    }

    #[inline]
    pub fn y_axis(&self) -> Vec2 {
        Vec2::new(-self.s, self.c)
    }

    /// Rotate a vector.
    #[inline]
    pub fn rotate(&self, v: Vec2) -> Vec2 {
        Vec2::new(self.c * v.x - self.s * v.y, self.s * v.x + self.c * v.y)
    }

    /// Inverse rotate a vector.
    #[inline]
    pub fn inv_rotate(&self, v: Vec2) -> Vec2 {
        Vec2::new(self.c * v.x + self.s * v.y, -self.s * v.x + self.c * v.y)
    }

    /// `self * other`
    #[inline]
    pub fn mul(&self, other: &Rot) -> Rot {
        Rot {
            s: self.s * other.c + self.c * other.s,
            c: self.c * other.c - self.s * other.s,
        }
    }

    /// `transpose(self) * other`
    #[inline]
    pub fn inv_mul(&self, other: &Rot) -> Rot {
        Rot {
            s: self.c * other.s - self.s * other.c,
            c: self.c * other.c + self.s * other.s,
        }
    }
}

/// Translation plus rotation. Represents the position and orientation of a rigid frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Transform {
    pub p: Vec2,
    pub q: Rot,
}

impl Transform {
    pub const IDENTITY: Self = Self {
        p: Vec2::ZERO,
        q: Rot::IDENTITY,
    };

    #[inline]
    pub fn new(p: Vec2, angle: f32) -> Self {
        Self {
            p,
            q: Rot::from_angle(angle),
        }
    }

    #[inline]
    pub fn from_translation(p: Vec2) -> Self {
        Self { p, q: Rot::IDENTITY }
    }

    #[inline]
    pub fn transform_point(&self, v: Vec2) -> Vec2 {
        self.q.rotate(v) + self.p
    }

    #[inline]
    pub fn inv_transform_point(&self, v: Vec2) -> Vec2 {
        self.q.inv_rotate(v - self.p)
    }

    /// `self * other`
    #[inline]
    pub fn mul(&self, other: &Transform) -> Transform {
        Transform {
            q: self.q.mul(&other.q),
            p: self.q.rotate(other.p) + self.p,
        }
    }

    /// `inverse(self) * other`
    #[inline]
    pub fn inv_mul(&self, other: &Transform) -> Transform {
        Transform {
            q: self.q.inv_mul(&other.q),
            p: self.q.inv_rotate(other.p - self.p),
        }
    }
}

/// Motion of a body over a time step, used for continuous collision.
///
/// Shapes are defined relative to the body origin, which may not coincide
/// with the center of mass. The sweep interpolates the center of mass.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Sweep {
    /// Local center of mass position.
    pub local_center: Vec2,
    /// Center world position at `alpha0`.
    pub c0: Vec2,
    /// Center world position at the end of the step.
    pub c: Vec2,
    /// World angle at `alpha0`.
    pub a0: f32,
    /// World angle at the end of the step.
    pub a: f32,
    /// Fraction of the current time step in `[0, 1)` where `c0`/`a0` are valid.
    pub alpha0: f32,
}

impl Sweep {
    /// Interpolated transform at `beta ∈ [0, 1]` of the remaining sweep.
    #[inline]
    pub fn transform_at(&self, beta: f32) -> Transform {
        let c = (1.0 - beta) * self.c0 + beta * self.c;
        let angle = (1.0 - beta) * self.a0 + beta * self.a;
        let q = Rot::from_angle(angle);
        Transform {
            p: c - q.rotate(self.local_center),
            q,
        }
    }

    /// Advance the sweep start to `alpha`, keeping the end state.
    pub fn advance(&mut self, alpha: f32) {
        debug_assert!(self.alpha0 < 1.0);
        let beta = (alpha - self.alpha0) / (1.0 - self.alpha0);
        self.c0 += beta * (self.c - self.c0);
        self.a0 += beta * (self.a - self.a0);
        self.alpha0 = alpha;
    }

    /// Keep angles in `[0, 2π)` to avoid precision loss over long runs.
    pub fn normalize(&mut self) {
        let d = TAU * (self.a0 / TAU).floor();
        self.a0 -= d;
        self.a -= d;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_roundtrip_point() {
        let xf = Transform::new(Vec2::new(1.0, 2.0), 0.7);
        let p = Vec2::new(-3.0, 0.5);
        let back = xf.inv_transform_point(xf.transform_point(p));
        assert!((back - p).length() < 1e-5);
    }

    #[test]
    fn test_inv_mul_matches_composition() {
        let a = Transform::new(Vec2::new(1.0, -1.0), 0.3);
        let b = Transform::new(Vec2::new(4.0, 2.0), -1.2);
        let rel = a.inv_mul(&b);
        let p = Vec2::new(0.25, 0.75);
        let via_rel = a.transform_point(rel.transform_point(p));
        let direct = b.transform_point(p);
        assert!((via_rel - direct).length() < 1e-5);
    }

    #[test]
    fn test_solve22_singular_returns_zero() {
        let m = Mat2::from_cols(Vec2::new(1.0, 2.0), Vec2::new(2.0, 4.0));
        assert_eq!(solve22(m, Vec2::new(1.0, 1.0)), Vec2::ZERO);
    }

    #[test]
    fn test_sweep_advance_and_transform() {
        let mut sweep = Sweep {
            local_center: Vec2::ZERO,
            c0: Vec2::ZERO,
            c: Vec2::new(10.0, 0.0),
            a0: 0.0,
            a: 0.0,
            alpha0: 0.0,
        };
        let mid = sweep.transform_at(0.5);
        assert!((mid.p - Vec2::new(5.0, 0.0)).length() < 1e-5);

        sweep.advance(0.5);
        assert!((sweep.c0 - Vec2::new(5.0, 0.0)).length() < 1e-5);
        assert_eq!(sweep.alpha0, 0.5);
    }

    #[test]
    fn test_sweep_normalize_keeps_difference() {
        let mut sweep = Sweep {
            a0: 7.0,
            a: 7.5,
            ..Default::default()
        };
        sweep.normalize();
        assert!(sweep.a0 >= 0.0 && sweep.a0 < TAU);
        assert!((sweep.a - sweep.a0 - 0.5).abs() < 1e-5);
    }
}
