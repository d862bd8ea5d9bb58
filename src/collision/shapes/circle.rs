use std::f32::consts::PI;

use glam::Vec2;

use crate::collision::{Aabb, RayCastInput, RayCastOutput};
use crate::math::Transform;

use super::MassData;

/// A solid circle.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CircleShape {
    /// Center in the body frame.
    pub p: Vec2,
    pub radius: f32,
}

impl CircleShape {
    pub fn new(p: Vec2, radius: f32) -> Self {
        Self { p, radius }
    }

    pub fn test_point(&self, xf: &Transform, p: Vec2) -> bool {
        let center = xf.transform_point(self.p);
        let d = p - center;
        d.dot(d) <= self.radius * self.radius
    }

    /// Collision detection in computational geometry, p. 46.
    pub fn ray_cast(&self, input: &RayCastInput, xf: &Transform) -> Option<RayCastOutput> {
        let position = xf.transform_point(self.p);
        let s = input.p1 - position;
        let b = s.dot(s) - self.radius * self.radius;

        // Solve quadratic equation.
        let r = input.p2 - input.p1;
        let c = s.dot(r);
        let rr = r.dot(r);
        let sigma = c * c - rr * b;

        // Check for negative discriminant and short segment.
        if sigma < 0.0 || rr < f32::EPSILON {
            return None;
        }

        // Find the point of intersection of the line with the circle.
        let a = -(c + sigma.sqrt());

        // Is the intersection point on the segment?
        if 0.0 <= a && a <= input.max_fraction * rr {
            let a = a / rr;
            return Some(RayCastOutput {
                fraction: a,
                normal: (s + a * r).normalize_or_zero(),
            });
        }

        None
    }

    pub fn compute_aabb(&self, xf: &Transform) -> Aabb {
        let p = xf.transform_point(self.p);
        Aabb {
            min: p - Vec2::splat(self.radius),
            max: p + Vec2::splat(self.radius),
        }
    }

    pub fn compute_mass(&self, density: f32) -> MassData {
        let rr = self.radius * self.radius;
        let mass = density * PI * rr;
        MassData {
            mass,
            center: self.p,
            // inertia about the local origin
            i: mass * (0.5 * rr + self.p.dot(self.p)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circle_aabb() {
        let circle = CircleShape::new(Vec2::ZERO, 1.0);
        let xf = Transform::from_translation(Vec2::new(0.0, 5.0));
        let aabb = circle.compute_aabb(&xf);

        let eps = 1e-5;
        assert!((aabb.min - Vec2::new(-1.0, 4.0)).length() < eps);
        assert!((aabb.max - Vec2::new(1.0, 6.0)).length() < eps);
    }

    #[test]
    fn test_circle_ray_cast() {
        let circle = CircleShape::new(Vec2::ZERO, 1.0);
        let input = RayCastInput {
            p1: Vec2::new(-3.0, 0.0),
            p2: Vec2::new(3.0, 0.0),
            max_fraction: 1.0,
        };
        let hit = circle
            .ray_cast(&input, &Transform::IDENTITY)
            .expect("ray should hit the circle");
        assert!((hit.fraction - 2.0 / 6.0).abs() < 1e-5);
        assert!((hit.normal - Vec2::new(-1.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_circle_mass() {
        let circle = CircleShape::new(Vec2::ZERO, 1.0);
        let md = circle.compute_mass(1.0);
        assert!((md.mass - PI).abs() < 1e-5);
        assert!((md.i - 0.5 * PI).abs() < 1e-5);
    }
}
