use glam::Vec2;

use crate::collision::{Aabb, RayCastInput, RayCastOutput};
use crate::math::{cross_vs, Rot, Transform};
use crate::settings::{LINEAR_SLOP, MAX_POLYGON_VERTICES, POLYGON_RADIUS};

use super::{MassData, ShapeError};

/// A solid convex polygon with counter-clockwise winding.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PolygonShape {
    pub centroid: Vec2,
    pub vertices: [Vec2; MAX_POLYGON_VERTICES],
    /// Outward unit normal of edge `i` (from vertex `i` to `i + 1`).
    pub normals: [Vec2; MAX_POLYGON_VERTICES],
    pub count: usize,
    pub radius: f32,
}

impl PolygonShape {
    /// Build the convex hull of `points`.
    ///
    /// Points closer than half the linear slop are welded. Collinear or
    /// welded input that leaves fewer than three hull points is rejected.
    pub fn new(points: &[Vec2]) -> Result<Self, ShapeError> {
        if points.len() < 3 {
            return Err(ShapeError::TooFewVertices(points.len()));
        }
        if points.len() > MAX_POLYGON_VERTICES {
            return Err(ShapeError::TooManyVertices {
                count: points.len(),
                max: MAX_POLYGON_VERTICES,
            });
        }

        // Weld close points.
        let weld_sq = (0.5 * LINEAR_SLOP) * (0.5 * LINEAR_SLOP);
        let mut ps: Vec<Vec2> = Vec::with_capacity(points.len());
        for &v in points {
            if ps.iter().all(|p| v.distance_squared(*p) > weld_sq) {
                ps.push(v);
            }
        }
        let n = ps.len();
        if n < 3 {
            return Err(ShapeError::TooFewVertices(n));
        }

        // Gift wrapping, starting from the rightmost (then lowest) point.
        let mut i0 = 0;
        let mut x0 = ps[0].x;
        for (i, p) in ps.iter().enumerate().skip(1) {
            if p.x > x0 || (p.x == x0 && p.y < ps[i0].y) {
                i0 = i;
                x0 = p.x;
            }
        }

        let mut hull = [0usize; MAX_POLYGON_VERTICES];
        let mut m = 0;
        let mut ih = i0;
        loop {
            if m >= n {
                return Err(ShapeError::DegenerateHull);
            }
            hull[m] = ih;

            let mut ie = 0;
            for j in 1..n {
                if ie == ih {
                    ie = j;
                    continue;
                }
                let r = ps[ie] - ps[hull[m]];
                let v = ps[j] - ps[hull[m]];
                let c = r.perp_dot(v);
                if c < 0.0 {
                    ie = j;
                }
                // Collinear, keep the farthest.
                if c == 0.0 && v.length_squared() > r.length_squared() {
                    ie = j;
                }
            }

            m += 1;
            ih = ie;
            if ie == i0 {
                break;
            }
        }

        if m < 3 {
            return Err(ShapeError::DegenerateHull);
        }

        let mut vertices = [Vec2::ZERO; MAX_POLYGON_VERTICES];
        for i in 0..m {
            vertices[i] = ps[hull[i]];
        }

        let mut normals = [Vec2::ZERO; MAX_POLYGON_VERTICES];
        for i in 0..m {
            let edge = vertices[(i + 1) % m] - vertices[i];
            if edge.length_squared() <= f32::EPSILON * f32::EPSILON {
                return Err(ShapeError::DegenerateHull);
            }
            normals[i] = cross_vs(edge, 1.0).normalize();
        }

        let centroid = compute_centroid(&vertices[..m]);
        Ok(Self {
            centroid,
            vertices,
            normals,
            count: m,
            radius: POLYGON_RADIUS,
        })
    }

    /// Axis-aligned box centered on the body origin.
    pub fn new_box(hx: f32, hy: f32) -> Self {
        let mut vertices = [Vec2::ZERO; MAX_POLYGON_VERTICES];
        let mut normals = [Vec2::ZERO; MAX_POLYGON_VERTICES];
        vertices[..4].copy_from_slice(&[
            Vec2::new(-hx, -hy),
            Vec2::new(hx, -hy),
            Vec2::new(hx, hy),
            Vec2::new(-hx, hy),
        ]);
        normals[..4].copy_from_slice(&[
            Vec2::new(0.0, -1.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(0.0, 1.0),
            Vec2::new(-1.0, 0.0),
        ]);
        Self {
            centroid: Vec2::ZERO,
            vertices,
            normals,
            count: 4,
            radius: POLYGON_RADIUS,
        }
    }

    /// Box with half-widths `hx`, `hy` placed at `center` and rotated by `angle`.
    pub fn new_oriented_box(hx: f32, hy: f32, center: Vec2, angle: f32) -> Self {
        let mut shape = Self::new_box(hx, hy);
        let xf = Transform {
            p: center,
            q: Rot::from_angle(angle),
        };
        for i in 0..shape.count {
            shape.vertices[i] = xf.transform_point(shape.vertices[i]);
            shape.normals[i] = xf.q.rotate(shape.normals[i]);
        }
        shape.centroid = center;
        shape
    }

    #[inline]
    pub fn vertices(&self) -> &[Vec2] {
        &self.vertices[..self.count]
    }

    #[inline]
    pub fn normals(&self) -> &[Vec2] {
        &self.normals[..self.count]
    }

    /// Every vertex lies strictly on the inner side of every edge.
    pub fn validate(&self) -> bool {
        for i in 0..self.count {
            let i2 = if i + 1 < self.count { i + 1 } else { 0 };
            let p = self.vertices[i];
            let e = self.vertices[i2] - p;
            for j in 0..self.count {
                if j == i || j == i2 {
                    continue;
                }
                if e.perp_dot(self.vertices[j] - p) < 0.0 {
                    return false;
                }
            }
        }
        true
    }

    pub fn test_point(&self, xf: &Transform, p: Vec2) -> bool {
        let p_local = xf.q.inv_rotate(p - xf.p);
        self.normals()
            .iter()
            .zip(self.vertices())
            .all(|(n, v)| n.dot(p_local - *v) <= 0.0)
    }

    pub fn ray_cast(&self, input: &RayCastInput, xf: &Transform) -> Option<RayCastOutput> {
        // Put the ray into the polygon's frame of reference.
        let p1 = xf.q.inv_rotate(input.p1 - xf.p);
        let p2 = xf.q.inv_rotate(input.p2 - xf.p);
        let d = p2 - p1;

        let mut lower = 0.0;
        let mut upper = input.max_fraction;
        let mut index = None;

        for i in 0..self.count {
            // p = p1 + a * d
            // dot(normal, p - v) = 0
            // dot(normal, p1 - v) + a * dot(normal, d) = 0
            let numerator = self.normals[i].dot(self.vertices[i] - p1);
            let denominator = self.normals[i].dot(d);

            if denominator == 0.0 {
                if numerator < 0.0 {
                    return None;
                }
            } else if denominator < 0.0 && numerator < lower * denominator {
                // The segment enters this half-space.
                lower = numerator / denominator;
                index = Some(i);
            } else if denominator > 0.0 && numerator < upper * denominator {
                // The segment exits this half-space.
                upper = numerator / denominator;
            }

            if upper < lower {
                return None;
            }
        }

        debug_assert!(0.0 <= lower && lower <= input.max_fraction);

        index.map(|i| RayCastOutput {
            fraction: lower,
            normal: xf.q.rotate(self.normals[i]),
        })
    }

    pub fn compute_aabb(&self, xf: &Transform) -> Aabb {
        let first = xf.transform_point(self.vertices[0]);
        let (min, max) = self.vertices()[1..]
            .iter()
            .fold((first, first), |(lo, hi), v| {
                let p = xf.transform_point(*v);
                (lo.min(p), hi.max(p))
            });
        let r = Vec2::splat(self.radius);
        Aabb {
            min: min - r,
            max: max + r,
        }
    }

    /// Polygon mass, centroid and inertia, integrated over triangle fans
    /// around an interior reference point.
    pub fn compute_mass(&self, density: f32) -> MassData {
        debug_assert!(self.count >= 3);

        // Reference point inside the polygon for accuracy.
        let s = self.vertices().iter().copied().sum::<Vec2>() / self.count as f32;

        let mut center = Vec2::ZERO;
        let mut area = 0.0;
        let mut inertia = 0.0;
        const INV3: f32 = 1.0 / 3.0;

        for i in 0..self.count {
            let e1 = self.vertices[i] - s;
            let e2 = if i + 1 < self.count {
                self.vertices[i + 1] - s
            } else {
                self.vertices[0] - s
            };

            let d = e1.perp_dot(e2);
            let triangle_area = 0.5 * d;
            area += triangle_area;

            center += triangle_area * INV3 * (e1 + e2);

            let intx2 = e1.x * e1.x + e2.x * e1.x + e2.x * e2.x;
            let inty2 = e1.y * e1.y + e2.y * e1.y + e2.y * e2.y;
            inertia += (0.25 * INV3 * d) * (intx2 + inty2);
        }

        let mass = density * area;
        debug_assert!(area > f32::EPSILON);
        center *= 1.0 / area;
        let world_center = center + s;

        // Shift to the body origin.
        let i = density * inertia + mass * (world_center.dot(world_center) - center.dot(center));

        MassData {
            mass,
            center: world_center,
            i,
        }
    }
}

fn compute_centroid(vs: &[Vec2]) -> Vec2 {
    debug_assert!(vs.len() >= 3);

    let mut c = Vec2::ZERO;
    let mut area = 0.0;

    // Reference point on the hull keeps the fan triangles small.
    let p_ref = vs[0];
    const INV3: f32 = 1.0 / 3.0;

    for i in 0..vs.len() {
        let p1 = p_ref;
        let p2 = vs[i];
        let p3 = if i + 1 < vs.len() { vs[i + 1] } else { vs[0] };

        let e1 = p2 - p1;
        let e2 = p3 - p1;
        let triangle_area = 0.5 * e1.perp_dot(e2);
        area += triangle_area;

        c += triangle_area * INV3 * (p1 + p2 + p3);
    }

    debug_assert!(area > f32::EPSILON);
    c * (1.0 / area)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_box_aabb() {
        let shape = PolygonShape::new_box(1.0, 2.0);
        let aabb = shape.compute_aabb(&Transform::IDENTITY);
        let r = POLYGON_RADIUS;
        let eps = 1e-5;
        assert!((aabb.min - Vec2::new(-1.0 - r, -2.0 - r)).length() < eps);
        assert!((aabb.max - Vec2::new(1.0 + r, 2.0 + r)).length() < eps);
    }

    #[test]
    fn test_hull_discards_interior_points_and_winds_ccw() {
        let points = [
            Vec2::new(-1.0, -1.0),
            Vec2::new(0.0, 0.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(1.0, -1.0),
            Vec2::new(-1.0, 1.0),
        ];
        let poly = PolygonShape::new(&points).unwrap();
        assert_eq!(poly.count, 4);
        assert!(poly.validate());
        assert!(poly.centroid.length() < 1e-5);
        for (v, n) in poly.vertices().iter().zip(poly.normals()) {
            assert!((n.length() - 1.0).abs() < 1e-5);
            assert!(n.dot(*v) > 0.0, "normals point outward");
        }
    }

    #[test]
    fn test_collinear_points_rejected() {
        let points = [
            Vec2::new(0.0, 0.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(2.0, 0.0),
        ];
        assert_eq!(
            PolygonShape::new(&points),
            Err(ShapeError::DegenerateHull)
        );
    }

    #[test]
    fn test_welded_points_rejected() {
        let points = [
            Vec2::new(0.0, 0.0),
            Vec2::new(0.0001, 0.0),
            Vec2::new(1.0, 1.0),
        ];
        assert_eq!(
            PolygonShape::new(&points),
            Err(ShapeError::TooFewVertices(2))
        );
    }

    #[test]
    fn test_too_many_vertices_rejected() {
        let points: Vec<Vec2> = (0..9)
            .map(|i| {
                let a = i as f32 / 9.0 * std::f32::consts::TAU;
                Vec2::new(a.cos(), a.sin())
            })
            .collect();
        assert!(matches!(
            PolygonShape::new(&points),
            Err(ShapeError::TooManyVertices { count: 9, .. })
        ));
    }

    #[test]
    fn test_box_mass() {
        let shape = PolygonShape::new_box(1.0, 0.5);
        let md = shape.compute_mass(2.0);
        // 2 x 1 box with density 2
        assert!((md.mass - 4.0).abs() < 1e-4);
        assert!(md.center.length() < 1e-5);
        let expected_i = md.mass * (4.0 + 1.0) / 12.0;
        assert!((md.i - expected_i).abs() < 1e-4);
    }

    #[test]
    fn test_offset_box_mass_uses_parallel_axis() {
        let center = Vec2::new(2.0, 0.0);
        let shape = PolygonShape::new_oriented_box(0.5, 0.5, center, 0.0);
        let md = shape.compute_mass(1.0);
        assert!((md.center - center).length() < 1e-4);
        let expected_i = md.mass * (1.0 + 1.0) / 12.0 + md.mass * center.length_squared();
        assert!((md.i - expected_i).abs() < 1e-3);
    }

    #[test]
    fn test_polygon_ray_cast_and_test_point() {
        let shape = PolygonShape::new_box(1.0, 1.0);
        let xf = Transform::new(Vec2::new(5.0, 0.0), 0.0);
        assert!(shape.test_point(&xf, Vec2::new(5.5, 0.5)));
        assert!(!shape.test_point(&xf, Vec2::new(6.5, 0.5)));

        let input = RayCastInput {
            p1: Vec2::new(0.0, 0.0),
            p2: Vec2::new(10.0, 0.0),
            max_fraction: 1.0,
        };
        let hit = shape.ray_cast(&input, &xf).expect("ray should hit the box");
        assert!((hit.fraction - 0.4).abs() < 1e-5);
        assert!((hit.normal - Vec2::new(-1.0, 0.0)).length() < 1e-5);
    }
}
