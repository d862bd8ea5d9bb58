//! Edge versus circle and edge versus polygon, aware of edge adjacency.
//!
//! Ghost vertices on the edge let both routines suppress contacts that
//! belong to a neighbouring edge, so shapes slide over chain joints without
//! snagging.

use glam::Vec2;

use crate::collision::manifold::{
    clip_segment_to_line, ClipVertex, ContactId, FeatureType, Manifold, ManifoldType,
};
use crate::collision::shapes::{CircleShape, EdgeShape, PolygonShape};
use crate::math::Transform;
use crate::settings::{ANGULAR_SLOP, MAX_MANIFOLD_POINTS, MAX_POLYGON_VERTICES};

use super::polygon::{ABSOLUTE_TOL, RELATIVE_TOL};

/// Manifold for an edge and a circle.
pub fn collide_edge_and_circle(
    edge_a: &EdgeShape,
    xf_a: &Transform,
    circle_b: &CircleShape,
    xf_b: &Transform,
) -> Manifold {
    let mut manifold = Manifold::default();

    // Compute circle in frame of edge
    let q = xf_a.inv_transform_point(xf_b.transform_point(circle_b.p));

    let a = edge_a.v1;
    let b = edge_a.v2;
    let e = b - a;

    // Barycentric coordinates
    let u = e.dot(b - q);
    let v = e.dot(q - a);

    let radius = edge_a.radius + circle_b.radius;

    let vertex_contact = |index_a: u8, p: Vec2| {
        let mut m = Manifold {
            point_count: 1,
            manifold_type: ManifoldType::Circles,
            local_normal: Vec2::ZERO,
            local_point: p,
            ..Default::default()
        };
        m.points[0].id = ContactId::new(index_a, 0, FeatureType::Vertex, FeatureType::Vertex);
        m.points[0].local_point = circle_b.p;
        m
    };

    // Region A
    if v <= 0.0 {
        let p = a;
        let d = q - p;
        if d.dot(d) > radius * radius {
            return manifold;
        }

        // Is there an edge connected to A?
        if edge_a.has_vertex0 {
            let a1 = edge_a.v0;
            let b1 = a;
            let e1 = b1 - a1;
            let u1 = e1.dot(b1 - q);

            // Is the circle in Region AB of the previous edge?
            if u1 > 0.0 {
                return manifold;
            }
        }

        return vertex_contact(0, p);
    }

    // Region B
    if u <= 0.0 {
        let p = b;
        let d = q - p;
        if d.dot(d) > radius * radius {
            return manifold;
        }

        // Is there an edge connected to B?
        if edge_a.has_vertex3 {
            let b2 = edge_a.v3;
            let a2 = b;
            let e2 = b2 - a2;
            let v2 = e2.dot(q - a2);

            // Is the circle in Region AB of the next edge?
            if v2 > 0.0 {
                return manifold;
            }
        }

        return vertex_contact(1, p);
    }

    // Region AB
    let den = e.dot(e);
    debug_assert!(den > 0.0);
    let p = (1.0 / den) * (u * a + v * b);
    let d = q - p;
    if d.dot(d) > radius * radius {
        return manifold;
    }

    let mut n = Vec2::new(-e.y, e.x);
    if n.dot(q - a) < 0.0 {
        n = -n;
    }

    manifold.point_count = 1;
    manifold.manifold_type = ManifoldType::FaceA;
    manifold.local_normal = n.normalize();
    manifold.local_point = a;
    manifold.points[0].id = ContactId::new(0, 0, FeatureType::Face, FeatureType::Vertex);
    manifold.points[0].local_point = circle_b.p;
    manifold
}

/// Manifold for an edge and a polygon.
pub fn collide_edge_and_polygon(
    edge_a: &EdgeShape,
    xf_a: &Transform,
    polygon_b: &PolygonShape,
    xf_b: &Transform,
) -> Manifold {
    EpCollider::new(edge_a, xf_a, polygon_b, xf_b).collide(polygon_b)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EpAxisType {
    Unknown,
    EdgeA,
    EdgeB,
}

#[derive(Debug, Clone, Copy)]
struct EpAxis {
    axis_type: EpAxisType,
    index: usize,
    separation: f32,
}

/// Reference face used for clipping.
#[derive(Debug, Clone, Copy, Default)]
struct ReferenceFace {
    i1: usize,
    i2: usize,
    v1: Vec2,
    v2: Vec2,
    normal: Vec2,
    side_normal1: Vec2,
    side_offset1: f32,
    side_normal2: Vec2,
    side_offset2: f32,
}

/// Polygon B expressed in the edge's frame.
#[derive(Debug, Clone, Copy)]
struct TempPolygon {
    vertices: [Vec2; MAX_POLYGON_VERTICES],
    normals: [Vec2; MAX_POLYGON_VERTICES],
    count: usize,
}

// Algorithm:
// 1. Classify v1 and v2
// 2. Classify polygon centroid as front or back
// 3. Flip normal if necessary
// 4. Initialize normal range to [-pi, pi] about face normal
// 5. Adjust normal range according to adjacent edges
// 6. Visit each separating axes, only accept axes within the range
// 7. Return if _any_ axis indicates separation
// 8. Clip
struct EpCollider {
    polygon_b: TempPolygon,
    xf: Transform,
    v1: Vec2,
    v2: Vec2,
    normal: Vec2,
    normal1: Vec2,
    lower_limit: Vec2,
    upper_limit: Vec2,
    radius: f32,
    front: bool,
}

impl EpCollider {
    fn new(
        edge_a: &EdgeShape,
        xf_a: &Transform,
        polygon_b: &PolygonShape,
        xf_b: &Transform,
    ) -> Self {
        let xf = xf_a.inv_mul(xf_b);
        let centroid_b = xf.transform_point(polygon_b.centroid);

        let v0 = edge_a.v0;
        let v1 = edge_a.v1;
        let v2 = edge_a.v2;
        let v3 = edge_a.v3;

        let has_vertex0 = edge_a.has_vertex0;
        let has_vertex3 = edge_a.has_vertex3;

        let edge1 = (v2 - v1).normalize();
        let normal1 = Vec2::new(edge1.y, -edge1.x);
        let offset1 = normal1.dot(centroid_b - v1);

        let mut normal0 = Vec2::ZERO;
        let mut normal2 = Vec2::ZERO;
        let mut offset0 = 0.0;
        let mut offset2 = 0.0;
        let mut convex1 = false;
        let mut convex2 = false;

        // Is there a preceding edge?
        if has_vertex0 {
            let edge0 = (v1 - v0).normalize();
            normal0 = Vec2::new(edge0.y, -edge0.x);
            convex1 = edge0.perp_dot(edge1) >= 0.0;
            offset0 = normal0.dot(centroid_b - v0);
        }

        // Is there a following edge?
        if has_vertex3 {
            let edge2 = (v3 - v2).normalize();
            normal2 = Vec2::new(edge2.y, -edge2.x);
            convex2 = edge1.perp_dot(edge2) > 0.0;
            offset2 = normal2.dot(centroid_b - v2);
        }

        // Determine front or back collision. Determine collision normal limits.
        let (front, lower_limit, upper_limit) = match (has_vertex0, has_vertex3) {
            (true, true) => {
                if convex1 && convex2 {
                    let front = offset0 >= 0.0 || offset1 >= 0.0 || offset2 >= 0.0;
                    if front {
                        (front, normal0, normal2)
                    } else {
                        (front, -normal1, -normal1)
                    }
                } else if convex1 {
                    let front = offset0 >= 0.0 || (offset1 >= 0.0 && offset2 >= 0.0);
                    if front {
                        (front, normal0, normal1)
                    } else {
                        (front, -normal2, -normal1)
                    }
                } else if convex2 {
                    let front = offset2 >= 0.0 || (offset0 >= 0.0 && offset1 >= 0.0);
                    if front {
                        (front, normal1, normal2)
                    } else {
                        (front, -normal1, -normal0)
                    }
                } else {
                    let front = offset0 >= 0.0 && offset1 >= 0.0 && offset2 >= 0.0;
                    if front {
                        (front, normal1, normal1)
                    } else {
                        (front, -normal2, -normal0)
                    }
                }
            }
            (true, false) => {
                if convex1 {
                    let front = offset0 >= 0.0 || offset1 >= 0.0;
                    if front {
                        (front, normal0, -normal1)
                    } else {
                        (front, normal1, -normal1)
                    }
                } else {
                    let front = offset0 >= 0.0 && offset1 >= 0.0;
                    if front {
                        (front, normal1, -normal1)
                    } else {
                        (front, normal1, -normal0)
                    }
                }
            }
            (false, true) => {
                if convex2 {
                    let front = offset1 >= 0.0 || offset2 >= 0.0;
                    if front {
                        (front, -normal1, normal2)
                    } else {
                        (front, -normal1, normal1)
                    }
                } else {
                    let front = offset1 >= 0.0 && offset2 >= 0.0;
                    if front {
                        (front, -normal1, normal1)
                    } else {
                        (front, -normal2, normal1)
                    }
                }
            }
            (false, false) => {
                let front = offset1 >= 0.0;
                if front {
                    (front, -normal1, -normal1)
                } else {
                    (front, normal1, normal1)
                }
            }
        };
        let normal = if front { normal1 } else { -normal1 };

        // Get polygon B in frame A.
        let mut temp = TempPolygon {
            vertices: [Vec2::ZERO; MAX_POLYGON_VERTICES],
            normals: [Vec2::ZERO; MAX_POLYGON_VERTICES],
            count: polygon_b.count,
        };
        for i in 0..polygon_b.count {
            temp.vertices[i] = xf.transform_point(polygon_b.vertices[i]);
            temp.normals[i] = xf.q.rotate(polygon_b.normals[i]);
        }

        Self {
            polygon_b: temp,
            xf,
            v1,
            v2,
            normal,
            normal1,
            lower_limit,
            upper_limit,
            radius: edge_a.radius + polygon_b.radius,
            front,
        }
    }

    fn collide(&self, polygon_b: &PolygonShape) -> Manifold {
        let mut manifold = Manifold::default();

        let edge_axis = self.compute_edge_separation();

        // If no valid normal can be found than this edge should not collide.
        if edge_axis.axis_type == EpAxisType::Unknown {
            return manifold;
        }

        if edge_axis.separation > self.radius {
            return manifold;
        }

        let polygon_axis = self.compute_polygon_separation();
        if polygon_axis.axis_type != EpAxisType::Unknown && polygon_axis.separation > self.radius {
            return manifold;
        }

        // Use hysteresis for jitter reduction.
        let primary_axis = if polygon_axis.axis_type == EpAxisType::Unknown {
            edge_axis
        } else if polygon_axis.separation > RELATIVE_TOL * edge_axis.separation + ABSOLUTE_TOL {
            polygon_axis
        } else {
            edge_axis
        };

        let poly = &self.polygon_b;
        let next = |i: usize| if i + 1 < poly.count { i + 1 } else { 0 };

        let (ie, mut rf) = if primary_axis.axis_type == EpAxisType::EdgeA {
            manifold.manifold_type = ManifoldType::FaceA;

            // Search for the polygon normal that is most anti-parallel to the edge normal.
            let mut best_index = 0;
            let mut best_value = self.normal.dot(poly.normals[0]);
            for i in 1..poly.count {
                let value = self.normal.dot(poly.normals[i]);
                if value < best_value {
                    best_value = value;
                    best_index = i;
                }
            }

            let i1 = best_index;
            let i2 = next(i1);

            let ie = [
                ClipVertex {
                    v: poly.vertices[i1],
                    id: ContactId::new(0, i1 as u8, FeatureType::Face, FeatureType::Vertex),
                },
                ClipVertex {
                    v: poly.vertices[i2],
                    id: ContactId::new(0, i2 as u8, FeatureType::Face, FeatureType::Vertex),
                },
            ];

            let rf = if self.front {
                ReferenceFace {
                    i1: 0,
                    i2: 1,
                    v1: self.v1,
                    v2: self.v2,
                    normal: self.normal1,
                    ..Default::default()
                }
            } else {
                ReferenceFace {
                    i1: 1,
                    i2: 0,
                    v1: self.v2,
                    v2: self.v1,
                    normal: -self.normal1,
                    ..Default::default()
                }
            };
            (ie, rf)
        } else {
            manifold.manifold_type = ManifoldType::FaceB;

            let face = primary_axis.index as u8;
            let ie = [
                ClipVertex {
                    v: self.v1,
                    id: ContactId::new(0, face, FeatureType::Vertex, FeatureType::Face),
                },
                ClipVertex {
                    v: self.v2,
                    id: ContactId::new(0, face, FeatureType::Vertex, FeatureType::Face),
                },
            ];

            let i1 = primary_axis.index;
            let i2 = next(i1);
            let rf = ReferenceFace {
                i1,
                i2,
                v1: poly.vertices[i1],
                v2: poly.vertices[i2],
                normal: poly.normals[i1],
                ..Default::default()
            };
            (ie, rf)
        };

        rf.side_normal1 = Vec2::new(rf.normal.y, -rf.normal.x);
        rf.side_normal2 = -rf.side_normal1;
        rf.side_offset1 = rf.side_normal1.dot(rf.v1);
        rf.side_offset2 = rf.side_normal2.dot(rf.v2);

        // Clip incident edge against extruded edge1 side edges.
        let (clip_points1, np) =
            clip_segment_to_line(&ie, rf.side_normal1, rf.side_offset1, rf.i1 as u8);
        if np < MAX_MANIFOLD_POINTS {
            return manifold;
        }

        let (clip_points2, np) =
            clip_segment_to_line(&clip_points1, rf.side_normal2, rf.side_offset2, rf.i2 as u8);
        if np < MAX_MANIFOLD_POINTS {
            return manifold;
        }

        // Now clip_points2 contains the clipped points.
        if primary_axis.axis_type == EpAxisType::EdgeA {
            manifold.local_normal = rf.normal;
            manifold.local_point = rf.v1;
        } else {
            manifold.local_normal = polygon_b.normals[rf.i1];
            manifold.local_point = polygon_b.vertices[rf.i1];
        }

        let mut point_count = 0;
        for cv in &clip_points2 {
            let separation = rf.normal.dot(cv.v - rf.v1);
            if separation <= self.radius {
                let cp = &mut manifold.points[point_count];
                if primary_axis.axis_type == EpAxisType::EdgeA {
                    cp.local_point = self.xf.inv_transform_point(cv.v);
                    cp.id = cv.id;
                } else {
                    cp.local_point = cv.v;
                    cp.id = ContactId {
                        cf: cv.id.cf.flipped(),
                    };
                }
                point_count += 1;
            }
        }

        manifold.point_count = point_count;
        manifold
    }

    fn compute_edge_separation(&self) -> EpAxis {
        let separation = self.polygon_b.vertices[..self.polygon_b.count]
            .iter()
            .map(|v| self.normal.dot(*v - self.v1))
            .fold(f32::MAX, f32::min);

        EpAxis {
            axis_type: EpAxisType::EdgeA,
            index: if self.front { 0 } else { 1 },
            separation,
        }
    }

    fn compute_polygon_separation(&self) -> EpAxis {
        let mut axis = EpAxis {
            axis_type: EpAxisType::Unknown,
            index: 0,
            separation: -f32::MAX,
        };

        let perp = Vec2::new(-self.normal.y, self.normal.x);

        for i in 0..self.polygon_b.count {
            let n = -self.polygon_b.normals[i];

            let s1 = n.dot(self.polygon_b.vertices[i] - self.v1);
            let s2 = n.dot(self.polygon_b.vertices[i] - self.v2);
            let s = s1.min(s2);

            if s > self.radius {
                // No collision
                return EpAxis {
                    axis_type: EpAxisType::EdgeB,
                    index: i,
                    separation: s,
                };
            }

            // Adjacency
            let limit = if n.dot(perp) >= 0.0 {
                self.upper_limit
            } else {
                self.lower_limit
            };
            if (n - limit).dot(self.normal) < -ANGULAR_SLOP {
                continue;
            }

            if s > axis.separation {
                axis = EpAxis {
                    axis_type: EpAxisType::EdgeB,
                    index: i,
                    separation: s,
                };
            }
        }

        axis
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::manifold::WorldManifold;
    use crate::collision::shapes::ChainShape;

    #[test]
    fn test_edge_circle_face_region() {
        let edge = EdgeShape::new(Vec2::new(-2.0, 0.0), Vec2::new(2.0, 0.0));
        let circle = CircleShape::new(Vec2::ZERO, 0.5);
        let xf_b = Transform::from_translation(Vec2::new(0.5, 0.45));
        let m = collide_edge_and_circle(&edge, &Transform::IDENTITY, &circle, &xf_b);
        assert_eq!(m.point_count, 1);
        assert_eq!(m.manifold_type, ManifoldType::FaceA);
        assert!((m.local_normal - Vec2::Y).length() < 1e-5);

        // Below the edge the normal flips.
        let xf_b = Transform::from_translation(Vec2::new(0.5, -0.45));
        let m = collide_edge_and_circle(&edge, &Transform::IDENTITY, &circle, &xf_b);
        assert!((m.local_normal + Vec2::Y).length() < 1e-5);
    }

    #[test]
    fn test_edge_circle_ghost_vertex_suppresses_corner() {
        let circle = CircleShape::new(Vec2::ZERO, 0.5);
        let xf_b = Transform::from_translation(Vec2::new(-0.2, 0.4));

        let lone = EdgeShape::new(Vec2::ZERO, Vec2::new(2.0, 0.0));
        let m = collide_edge_and_circle(&lone, &Transform::IDENTITY, &circle, &xf_b);
        assert_eq!(m.point_count, 1);
        assert_eq!(m.manifold_type, ManifoldType::Circles);
        assert_eq!(m.points[0].id.cf.index_a, 0);

        // The previous edge owns this region.
        let linked = lone.with_adjacency(Some(Vec2::new(-2.0, 0.0)), None);
        let m = collide_edge_and_circle(&linked, &Transform::IDENTITY, &circle, &xf_b);
        assert_eq!(m.point_count, 0);
    }

    #[test]
    fn test_edge_polygon_resting_box() {
        let edge = EdgeShape::new(Vec2::new(-5.0, 0.0), Vec2::new(5.0, 0.0));
        let block = PolygonShape::new_box(0.5, 0.5);
        let xf_a = Transform::IDENTITY;
        let xf_b = Transform::from_translation(Vec2::new(0.0, 0.49));

        let m = collide_edge_and_polygon(&edge, &xf_a, &block, &xf_b);
        assert_eq!(m.point_count, 2);
        assert_eq!(m.manifold_type, ManifoldType::FaceA);

        let wm = WorldManifold::new(&m, &xf_a, edge.radius, &xf_b, block.radius);
        assert!((wm.normal - Vec2::Y).length() < 1e-5, "normal = {:?}", wm.normal);
        for s in &wm.separations[..2] {
            assert!((s - (-0.01 - edge.radius - block.radius)).abs() < 1e-4);
        }
    }

    #[test]
    fn test_edge_polygon_separated() {
        let edge = EdgeShape::new(Vec2::new(-5.0, 0.0), Vec2::new(5.0, 0.0));
        let block = PolygonShape::new_box(0.5, 0.5);
        let xf_b = Transform::from_translation(Vec2::new(0.0, 0.6));
        let m = collide_edge_and_polygon(&edge, &Transform::IDENTITY, &block, &xf_b);
        assert_eq!(m.point_count, 0);
    }

    #[test]
    fn test_chain_joint_keeps_upward_normal() {
        let chain = ChainShape::new_chain(&[
            Vec2::new(-4.0, 0.0),
            Vec2::new(0.0, 0.0),
            Vec2::new(4.0, 0.0),
        ])
        .unwrap();
        let block = PolygonShape::new_box(0.5, 0.5);
        let xf_a = Transform::IDENTITY;
        // Straddles the joint between the two child edges.
        let xf_b = Transform::from_translation(Vec2::new(-0.1, 0.49));

        for child in 0..chain.child_count() {
            let edge = chain.child_edge(child);
            let m = collide_edge_and_polygon(&edge, &xf_a, &block, &xf_b);
            assert!(m.point_count > 0, "child {child} should touch");
            let wm = WorldManifold::new(&m, &xf_a, edge.radius, &xf_b, block.radius);
            assert!(
                (wm.normal - Vec2::Y).length() < 1e-4,
                "child {child}: normal = {:?}",
                wm.normal
            );
        }
    }
}
