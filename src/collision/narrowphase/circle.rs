//! Circle versus circle and polygon versus circle.

use crate::collision::manifold::{ContactId, Manifold, ManifoldType};
use crate::collision::shapes::{CircleShape, PolygonShape};
use crate::math::Transform;

/// Manifold for two circles. At most one point, type `Circles`.
pub fn collide_circles(
    circle_a: &CircleShape,
    xf_a: &Transform,
    circle_b: &CircleShape,
    xf_b: &Transform,
) -> Manifold {
    let mut manifold = Manifold::default();

    let p_a = xf_a.transform_point(circle_a.p);
    let p_b = xf_b.transform_point(circle_b.p);

    let dist_sqr = p_a.distance_squared(p_b);
    let radius = circle_a.radius + circle_b.radius;
    if dist_sqr > radius * radius {
        return manifold;
    }

    manifold.manifold_type = ManifoldType::Circles;
    manifold.local_point = circle_a.p;
    manifold.point_count = 1;
    manifold.points[0].local_point = circle_b.p;
    manifold.points[0].id = ContactId::default();
    manifold
}

/// Manifold for a polygon and a circle. At most one point, type `FaceA`.
pub fn collide_polygon_and_circle(
    polygon_a: &PolygonShape,
    xf_a: &Transform,
    circle_b: &CircleShape,
    xf_b: &Transform,
) -> Manifold {
    let mut manifold = Manifold::default();

    // Compute circle position in the frame of the polygon.
    let c = xf_b.transform_point(circle_b.p);
    let c_local = xf_a.inv_transform_point(c);

    // Find the min separating edge.
    let radius = polygon_a.radius + circle_b.radius;
    let vertices = polygon_a.vertices();
    let normals = polygon_a.normals();

    let mut normal_index = 0;
    let mut separation = -f32::MAX;
    for (i, (n, v)) in normals.iter().zip(vertices).enumerate() {
        let s = n.dot(c_local - *v);
        if s > radius {
            // Early out.
            return manifold;
        }
        if s > separation {
            separation = s;
            normal_index = i;
        }
    }

    // Vertices that subtend the incident face.
    let vert_index1 = normal_index;
    let vert_index2 = if vert_index1 + 1 < vertices.len() {
        vert_index1 + 1
    } else {
        0
    };
    let v1 = vertices[vert_index1];
    let v2 = vertices[vert_index2];

    manifold.point_count = 1;
    manifold.manifold_type = ManifoldType::FaceA;
    manifold.points[0].local_point = circle_b.p;
    manifold.points[0].id = ContactId::default();

    // If the center is inside the polygon ...
    if separation < f32::EPSILON {
        manifold.local_normal = normals[normal_index];
        manifold.local_point = 0.5 * (v1 + v2);
        return manifold;
    }

    // Compute barycentric coordinates
    let u1 = (c_local - v1).dot(v2 - v1);
    let u2 = (c_local - v2).dot(v1 - v2);
    if u1 <= 0.0 {
        if c_local.distance_squared(v1) > radius * radius {
            return Manifold::default();
        }
        manifold.local_normal = (c_local - v1).normalize();
        manifold.local_point = v1;
    } else if u2 <= 0.0 {
        if c_local.distance_squared(v2) > radius * radius {
            return Manifold::default();
        }
        manifold.local_normal = (c_local - v2).normalize();
        manifold.local_point = v2;
    } else {
        let face_center = 0.5 * (v1 + v2);
        let separation = (c_local - face_center).dot(normals[vert_index1]);
        if separation > radius {
            return Manifold::default();
        }
        manifold.local_normal = normals[vert_index1];
        manifold.local_point = face_center;
    }

    manifold
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec2;

    #[test]
    fn test_circles_touching_and_apart() {
        let a = CircleShape::new(Vec2::ZERO, 1.0);
        let b = CircleShape::new(Vec2::ZERO, 0.5);
        let xf_a = Transform::IDENTITY;

        let m = collide_circles(&a, &xf_a, &b, &Transform::from_translation(Vec2::new(1.4, 0.0)));
        assert_eq!(m.point_count, 1);
        assert_eq!(m.manifold_type, ManifoldType::Circles);

        // Exactly touching counts.
        let m = collide_circles(&a, &xf_a, &b, &Transform::from_translation(Vec2::new(1.5, 0.0)));
        assert_eq!(m.point_count, 1);

        let m = collide_circles(&a, &xf_a, &b, &Transform::from_translation(Vec2::new(1.6, 0.0)));
        assert_eq!(m.point_count, 0);
    }

    #[test]
    fn test_polygon_circle_face_region() {
        let square = PolygonShape::new_box(1.0, 1.0);
        let circle = CircleShape::new(Vec2::ZERO, 0.5);
        let m = collide_polygon_and_circle(
            &square,
            &Transform::IDENTITY,
            &circle,
            &Transform::from_translation(Vec2::new(0.0, 1.4)),
        );
        assert_eq!(m.point_count, 1);
        assert_eq!(m.manifold_type, ManifoldType::FaceA);
        assert!((m.local_normal - Vec2::Y).length() < 1e-5);
    }

    #[test]
    fn test_polygon_circle_vertex_region() {
        let square = PolygonShape::new_box(1.0, 1.0);
        let circle = CircleShape::new(Vec2::ZERO, 0.5);
        let m = collide_polygon_and_circle(
            &square,
            &Transform::IDENTITY,
            &circle,
            &Transform::from_translation(Vec2::new(1.3, 1.3)),
        );
        assert_eq!(m.point_count, 1);
        assert!((m.local_point - Vec2::new(1.0, 1.0)).length() < 1e-5);
        let expected = Vec2::new(1.0, 1.0).normalize();
        assert!((m.local_normal - expected).length() < 1e-5);

        // Outside the corner's reach.
        let m = collide_polygon_and_circle(
            &square,
            &Transform::IDENTITY,
            &circle,
            &Transform::from_translation(Vec2::new(1.5, 1.5)),
        );
        assert_eq!(m.point_count, 0);
    }

    #[test]
    fn test_polygon_circle_center_inside() {
        let square = PolygonShape::new_box(1.0, 1.0);
        let circle = CircleShape::new(Vec2::ZERO, 0.25);
        let m = collide_polygon_and_circle(
            &square,
            &Transform::IDENTITY,
            &circle,
            &Transform::from_translation(Vec2::new(0.1, 0.6)),
        );
        assert_eq!(m.point_count, 1);
        assert!((m.local_normal - Vec2::Y).length() < 1e-5);
    }
}
