//! Polygon versus polygon by separating axes and incident-edge clipping.

use glam::Vec2;

use crate::collision::manifold::{
    clip_segment_to_line, ClipVertex, ContactId, FeatureType, Manifold, ManifoldType,
};
use crate::collision::shapes::PolygonShape;
use crate::math::{cross_vs, Transform};
use crate::settings::MAX_MANIFOLD_POINTS;

/// Relative tolerance for preferring the A side reference face.
pub(crate) const RELATIVE_TOL: f32 = 0.98;
/// Absolute tolerance for preferring the A side reference face.
pub(crate) const ABSOLUTE_TOL: f32 = 0.001;

/// Separation between `poly1` and `poly2` along edge normal `edge1` of `poly1`.
fn edge_separation(
    poly1: &PolygonShape,
    xf1: &Transform,
    edge1: usize,
    poly2: &PolygonShape,
    xf2: &Transform,
) -> f32 {
    debug_assert!(edge1 < poly1.count);

    // Convert normal from poly1's frame into poly2's frame.
    let normal1_world = xf1.q.rotate(poly1.normals[edge1]);
    let normal1 = xf2.q.inv_rotate(normal1_world);

    // Find support vertex on poly2 for -normal.
    let mut index = 0;
    let mut min_dot = f32::MAX;
    for (i, v) in poly2.vertices().iter().enumerate() {
        let dot = v.dot(normal1);
        if dot < min_dot {
            min_dot = dot;
            index = i;
        }
    }

    let v1 = xf1.transform_point(poly1.vertices[edge1]);
    let v2 = xf2.transform_point(poly2.vertices[index]);
    (v2 - v1).dot(normal1_world)
}

/// Max separation between `poly1` and `poly2` over the edge normals of `poly1`.
///
/// Starts from the normal best aligned with the centroid offset and climbs
/// towards neighbouring edges while the separation improves.
fn find_max_separation(
    poly1: &PolygonShape,
    xf1: &Transform,
    poly2: &PolygonShape,
    xf2: &Transform,
) -> (usize, f32) {
    let count1 = poly1.count;

    // Vector pointing from the centroid of poly1 to the centroid of poly2.
    let d = xf2.transform_point(poly2.centroid) - xf1.transform_point(poly1.centroid);
    let d_local1 = xf1.q.inv_rotate(d);

    // Find edge normal on poly1 that has the largest projection onto d.
    let mut edge = 0;
    let mut max_dot = -f32::MAX;
    for (i, n) in poly1.normals().iter().enumerate() {
        let dot = n.dot(d_local1);
        if dot > max_dot {
            max_dot = dot;
            edge = i;
        }
    }

    let prev = |e: usize| if e > 0 { e - 1 } else { count1 - 1 };
    let next = |e: usize| if e + 1 < count1 { e + 1 } else { 0 };

    // Get the separation for the edge normal and its neighbours.
    let s = edge_separation(poly1, xf1, edge, poly2, xf2);
    let prev_edge = prev(edge);
    let s_prev = edge_separation(poly1, xf1, prev_edge, poly2, xf2);
    let next_edge = next(edge);
    let s_next = edge_separation(poly1, xf1, next_edge, poly2, xf2);

    // Find the best edge and the search direction.
    let (mut best_edge, mut best_separation, forward) = if s_prev > s && s_prev > s_next {
        (prev_edge, s_prev, false)
    } else if s_next > s {
        (next_edge, s_next, true)
    } else {
        return (edge, s);
    };

    // Perform a local search for the best edge normal.
    loop {
        let edge = if forward {
            next(best_edge)
        } else {
            prev(best_edge)
        };

        let s = edge_separation(poly1, xf1, edge, poly2, xf2);
        if s > best_separation {
            best_edge = edge;
            best_separation = s;
        } else {
            break;
        }
    }

    (best_edge, best_separation)
}

/// Edge of `poly2` most anti-parallel to reference edge `edge1` of `poly1`,
/// as world-space clip vertices.
fn find_incident_edge(
    poly1: &PolygonShape,
    xf1: &Transform,
    edge1: usize,
    poly2: &PolygonShape,
    xf2: &Transform,
) -> [ClipVertex; 2] {
    debug_assert!(edge1 < poly1.count);

    // Get the normal of the reference edge in poly2's frame.
    let normal1 = xf2.q.inv_rotate(xf1.q.rotate(poly1.normals[edge1]));

    // Find the incident edge on poly2.
    let mut index = 0;
    let mut min_dot = f32::MAX;
    for (i, n) in poly2.normals().iter().enumerate() {
        let dot = normal1.dot(*n);
        if dot < min_dot {
            min_dot = dot;
            index = i;
        }
    }

    // Build the clip vertices for the incident edge.
    let i1 = index;
    let i2 = if i1 + 1 < poly2.count { i1 + 1 } else { 0 };

    [
        ClipVertex {
            v: xf2.transform_point(poly2.vertices[i1]),
            id: ContactId::new(edge1 as u8, i1 as u8, FeatureType::Face, FeatureType::Vertex),
        },
        ClipVertex {
            v: xf2.transform_point(poly2.vertices[i2]),
            id: ContactId::new(edge1 as u8, i2 as u8, FeatureType::Face, FeatureType::Vertex),
        },
    ]
}

// Find edge normal of max separation on A - return if separating axis is found
// Find edge normal of max separation on B - return if separation axis is found
// Choose reference edge as min(minA, minB)
// Find incident edge
// Clip

/// Manifold for two polygons. The normal points from A to B.
pub fn collide_polygons(
    poly_a: &PolygonShape,
    xf_a: &Transform,
    poly_b: &PolygonShape,
    xf_b: &Transform,
) -> Manifold {
    let mut manifold = Manifold::default();
    let total_radius = poly_a.radius + poly_b.radius;

    let (edge_a, separation_a) = find_max_separation(poly_a, xf_a, poly_b, xf_b);
    if separation_a > total_radius {
        return manifold;
    }

    let (edge_b, separation_b) = find_max_separation(poly_b, xf_b, poly_a, xf_a);
    if separation_b > total_radius {
        return manifold;
    }

    // poly1 is the reference polygon, poly2 the incident one.
    let (poly1, xf1, poly2, xf2, edge1, flip) =
        if separation_b > RELATIVE_TOL * separation_a + ABSOLUTE_TOL {
            manifold.manifold_type = ManifoldType::FaceB;
            (poly_b, xf_b, poly_a, xf_a, edge_b, true)
        } else {
            manifold.manifold_type = ManifoldType::FaceA;
            (poly_a, xf_a, poly_b, xf_b, edge_a, false)
        };

    let incident_edge = find_incident_edge(poly1, xf1, edge1, poly2, xf2);

    let iv1 = edge1;
    let iv2 = if edge1 + 1 < poly1.count { edge1 + 1 } else { 0 };

    let mut v11 = poly1.vertices[iv1];
    let mut v12 = poly1.vertices[iv2];

    let local_tangent = (v12 - v11).normalize();
    let local_normal = cross_vs(local_tangent, 1.0);
    let plane_point = 0.5 * (v11 + v12);

    let tangent = xf1.q.rotate(local_tangent);
    let normal = cross_vs(tangent, 1.0);

    v11 = xf1.transform_point(v11);
    v12 = xf1.transform_point(v12);

    // Face offset.
    let front_offset = normal.dot(v11);

    // Side offsets, extended by polytope skin thickness.
    let side_offset1 = -tangent.dot(v11) + total_radius;
    let side_offset2 = tangent.dot(v12) + total_radius;

    // Clip incident edge against extruded edge1 side edges.
    let (clip_points1, np) =
        clip_segment_to_line(&incident_edge, -tangent, side_offset1, iv1 as u8);
    if np < 2 {
        return manifold;
    }

    let (clip_points2, np) = clip_segment_to_line(&clip_points1, tangent, side_offset2, iv2 as u8);
    if np < 2 {
        return manifold;
    }

    // Now clip_points2 contains the clipped points.
    manifold.local_normal = local_normal;
    manifold.local_point = plane_point;

    let mut point_count = 0;
    for cv in clip_points2.iter().take(MAX_MANIFOLD_POINTS) {
        let separation = normal.dot(cv.v) - front_offset;
        if separation <= total_radius {
            let cp = &mut manifold.points[point_count];
            cp.local_point = xf2.inv_transform_point(cv.v);
            cp.id = cv.id;
            if flip {
                // Swap features
                cp.id.cf = cv.id.cf.flipped();
            }
            point_count += 1;
        }
    }

    manifold.point_count = point_count;
    manifold
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::manifold::WorldManifold;
    use crate::settings::LINEAR_SLOP;
    use std::f32::consts::{FRAC_PI_4, SQRT_2};

    fn world(
        m: &Manifold,
        a: &PolygonShape,
        xf_a: &Transform,
        b: &PolygonShape,
        xf_b: &Transform,
    ) -> WorldManifold {
        WorldManifold::new(m, xf_a, a.radius, xf_b, b.radius)
    }

    #[test]
    fn test_stacked_boxes_two_points() {
        let ground = PolygonShape::new_box(5.0, 0.5);
        let block = PolygonShape::new_box(0.5, 0.5);
        let xf_a = Transform::IDENTITY;
        let xf_b = Transform::from_translation(Vec2::new(0.0, 0.99));

        let m = collide_polygons(&ground, &xf_a, &block, &xf_b);
        assert_eq!(m.point_count, 2);
        assert_eq!(m.manifold_type, ManifoldType::FaceA);

        let wm = world(&m, &ground, &xf_a, &block, &xf_b);
        assert!((wm.normal - Vec2::Y).length() < 1e-5);
        for i in 0..2 {
            assert!(
                (wm.separations[i] - (-0.01 - 2.0 * ground.radius)).abs() < 1e-4,
                "separation = {}",
                wm.separations[i]
            );
        }
    }

    #[test]
    fn test_separated_boxes_have_no_points() {
        let a = PolygonShape::new_box(0.5, 0.5);
        let m = collide_polygons(
            &a,
            &Transform::IDENTITY,
            &a,
            &Transform::from_translation(Vec2::new(1.5, 0.0)),
        );
        assert_eq!(m.point_count, 0);
    }

    #[test]
    fn test_manifold_symmetry() {
        let a = PolygonShape::new_box(1.0, 0.5);
        let b = PolygonShape::new_box(0.4, 0.4);
        let xf_a = Transform::from_translation(Vec2::new(0.2, 0.0));
        let xf_b = Transform::new(Vec2::new(0.3, 0.85), 0.1);

        let ab = collide_polygons(&a, &xf_a, &b, &xf_b);
        let ba = collide_polygons(&b, &xf_b, &a, &xf_a);
        assert_eq!(ab.manifold_type, ManifoldType::FaceA);
        assert_eq!(ba.manifold_type, ManifoldType::FaceB);
        assert_eq!(ab.point_count, 2);
        assert_eq!(ab.point_count, ba.point_count);

        let wab = world(&ab, &a, &xf_a, &b, &xf_b);
        let wba = world(&ba, &b, &xf_b, &a, &xf_a);
        assert!((wab.normal + wba.normal).length() < 1e-4, "Normals should be antiparallel");

        for p in &wab.points[..ab.point_count] {
            let nearest = wba.points[..ba.point_count]
                .iter()
                .map(|q| q.distance(*p))
                .fold(f32::MAX, f32::min);
            assert!(nearest < LINEAR_SLOP, "Contact points should coincide: {nearest}");
        }
    }

    #[test]
    fn test_contact_ids_stable_under_perturbation() {
        let a = PolygonShape::new_box(2.0, 0.5);
        let b = PolygonShape::new_box(0.5, 0.5);
        let xf_a = Transform::IDENTITY;
        let xf_b1 = Transform::new(Vec2::new(0.1, 0.98), 0.01);
        let xf_b2 = Transform::new(Vec2::new(0.1001, 0.9799), 0.0101);

        let m1 = collide_polygons(&a, &xf_a, &b, &xf_b1);
        let m2 = collide_polygons(&a, &xf_a, &b, &xf_b2);
        assert_eq!(m1.point_count, 2);
        assert_eq!(m2.point_count, 2);
        for (p1, p2) in m1.points().iter().zip(m2.points()) {
            assert_eq!(p1.id.key(), p2.id.key());
        }
    }

    #[test]
    fn test_flipped_reference_face() {
        // A diamond tip poking into a flat face: the flat face on B is the reference.
        let diamond = PolygonShape::new_oriented_box(0.25, 0.25, Vec2::ZERO, FRAC_PI_4);
        let slab = PolygonShape::new_box(2.0, 0.5);
        let tip = 0.25 * SQRT_2;
        let xf_a = Transform::from_translation(Vec2::new(0.0, -0.5 - tip + 0.01));
        let xf_b = Transform::IDENTITY;

        let m = collide_polygons(&diamond, &xf_a, &slab, &xf_b);
        assert_eq!(m.manifold_type, ManifoldType::FaceB);
        assert_eq!(m.point_count, 1);
        assert_eq!(m.points[0].id.cf.type_a, FeatureType::Vertex);

        let wm = WorldManifold::new(&m, &xf_a, diamond.radius, &xf_b, slab.radius);
        assert!((wm.normal - Vec2::Y).length() < 1e-4, "normal = {:?}", wm.normal);
    }
}
