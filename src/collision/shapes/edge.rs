use glam::Vec2;

use crate::collision::{Aabb, RayCastInput, RayCastOutput};
use crate::math::Transform;
use crate::settings::POLYGON_RADIUS;

use super::MassData;

/// A line segment with optional ghost vertices.
///
/// Ghost vertices `v0` and `v3` describe the neighbouring edges so that
/// shapes sliding along connected geometry do not catch on interior
/// corners.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EdgeShape {
    pub v1: Vec2,
    pub v2: Vec2,
    pub v0: Vec2,
    pub v3: Vec2,
    pub has_vertex0: bool,
    pub has_vertex3: bool,
    pub radius: f32,
}

impl EdgeShape {
    pub fn new(v1: Vec2, v2: Vec2) -> Self {
        Self {
            v1,
            v2,
            v0: Vec2::ZERO,
            v3: Vec2::ZERO,
            has_vertex0: false,
            has_vertex3: false,
            radius: POLYGON_RADIUS,
        }
    }

    /// Attach ghost vertices for smooth collision against neighbours.
    pub fn with_adjacency(mut self, v0: Option<Vec2>, v3: Option<Vec2>) -> Self {
        if let Some(v0) = v0 {
            self.v0 = v0;
            self.has_vertex0 = true;
        }
        if let Some(v3) = v3 {
            self.v3 = v3;
            self.has_vertex3 = true;
        }
        self
    }

    // p = p1 + t * d
    // v = v1 + s * e
    // p1 + t * d = v1 + s * e
    pub fn ray_cast(&self, input: &RayCastInput, xf: &Transform) -> Option<RayCastOutput> {
        let p1 = xf.q.inv_rotate(input.p1 - xf.p);
        let p2 = xf.q.inv_rotate(input.p2 - xf.p);
        let d = p2 - p1;

        let e = self.v2 - self.v1;
        let normal = Vec2::new(e.y, -e.x).normalize_or_zero();

        // q = p1 + t * d
        // dot(normal, q - v1) = 0
        let numerator = normal.dot(self.v1 - p1);
        let denominator = normal.dot(d);
        if denominator == 0.0 {
            return None;
        }

        let t = numerator / denominator;
        if t < 0.0 || input.max_fraction < t {
            return None;
        }

        let q = p1 + t * d;

        // q = v1 + s * r
        let r = self.v2 - self.v1;
        let rr = r.dot(r);
        if rr == 0.0 {
            return None;
        }

        let s = (q - self.v1).dot(r) / rr;
        if !(0.0..=1.0).contains(&s) {
            return None;
        }

        let world_normal = xf.q.rotate(normal);
        Some(RayCastOutput {
            fraction: t,
            normal: if numerator > 0.0 {
                -world_normal
            } else {
                world_normal
            },
        })
    }

    pub fn compute_aabb(&self, xf: &Transform) -> Aabb {
        let v1 = xf.transform_point(self.v1);
        let v2 = xf.transform_point(self.v2);
        let r = Vec2::splat(self.radius);
        Aabb {
            min: v1.min(v2) - r,
            max: v1.max(v2) + r,
        }
    }

    pub fn compute_mass(&self) -> MassData {
        MassData {
            mass: 0.0,
            center: 0.5 * (self.v1 + self.v2),
            i: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_ray_cast_both_sides() {
        let edge = EdgeShape::new(Vec2::new(-1.0, 0.0), Vec2::new(1.0, 0.0));

        let from_above = RayCastInput {
            p1: Vec2::new(0.0, 2.0),
            p2: Vec2::new(0.0, -2.0),
            max_fraction: 1.0,
        };
        let hit = edge
            .ray_cast(&from_above, &Transform::IDENTITY)
            .expect("ray should hit the edge");
        assert!((hit.fraction - 0.5).abs() < 1e-5);
        assert!((hit.normal - Vec2::Y).length() < 1e-5);

        let from_below = RayCastInput {
            p1: Vec2::new(0.0, -2.0),
            p2: Vec2::new(0.0, 2.0),
            max_fraction: 1.0,
        };
        let hit = edge
            .ray_cast(&from_below, &Transform::IDENTITY)
            .expect("ray should hit the edge");
        assert!((hit.normal + Vec2::Y).length() < 1e-5);

        let miss = RayCastInput {
            p1: Vec2::new(3.0, 2.0),
            p2: Vec2::new(3.0, -2.0),
            max_fraction: 1.0,
        };
        assert!(edge.ray_cast(&miss, &Transform::IDENTITY).is_none());
    }

    #[test]
    fn test_edge_adjacency() {
        let edge = EdgeShape::new(Vec2::ZERO, Vec2::X).with_adjacency(Some(-Vec2::X), None);
        assert!(edge.has_vertex0);
        assert!(!edge.has_vertex3);
        assert_eq!(edge.v0, -Vec2::X);
    }
}
