//! Narrowphase: contact manifolds for each supported shape pairing, plus a
//! boolean overlap test built on GJK.
//!
//! Every routine takes the two shapes with their transforms and returns a
//! [`Manifold`](super::Manifold) in the local frames of the shapes. An empty
//! manifold (`point_count == 0`) means the shapes are not touching.
//! Chains collide per child through [`ChainShape::child_edge`](super::ChainShape::child_edge).

mod circle;
mod edge;
mod polygon;

pub use circle::{collide_circles, collide_polygon_and_circle};
pub use edge::{collide_edge_and_circle, collide_edge_and_polygon};
pub use polygon::collide_polygons;

use crate::math::Transform;

use super::distance::{distance, DistanceInput, DistanceProxy, SimplexCache};
use super::shapes::Shape;

/// True when the two children are within a tiny tolerance of each other,
/// radii included.
pub fn test_overlap(
    shape_a: &Shape,
    index_a: usize,
    shape_b: &Shape,
    index_b: usize,
    xf_a: &Transform,
    xf_b: &Transform,
) -> bool {
    let input = DistanceInput {
        proxy_a: DistanceProxy::from_shape(shape_a, index_a),
        proxy_b: DistanceProxy::from_shape(shape_b, index_b),
        transform_a: *xf_a,
        transform_b: *xf_b,
        use_radii: true,
    };

    let mut cache = SimplexCache::default();
    let output = distance(&mut cache, &input);

    output.distance < 10.0 * f32::EPSILON
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::shapes::{CircleShape, PolygonShape};
    use glam::Vec2;

    #[test]
    fn test_overlap_circle_and_box() {
        let circle = Shape::from(CircleShape::new(Vec2::ZERO, 0.5));
        let block = Shape::from(PolygonShape::new_box(1.0, 1.0));
        let xf_a = Transform::IDENTITY;

        let near = Transform::from_translation(Vec2::new(1.4, 0.0));
        assert!(test_overlap(&circle, 0, &block, 0, &near, &xf_a));

        let far = Transform::from_translation(Vec2::new(1.6, 0.0));
        assert!(!test_overlap(&circle, 0, &block, 0, &far, &xf_a));
    }

    #[test]
    fn test_overlap_counts_radius() {
        // Cores are 0.01 apart but the polygon skins overlap.
        let a = Shape::from(PolygonShape::new_box(0.5, 0.5));
        let b = Shape::from(PolygonShape::new_box(0.5, 0.5));
        let xf_b = Transform::from_translation(Vec2::new(1.01, 0.0));
        assert!(test_overlap(&a, 0, &b, 0, &Transform::IDENTITY, &xf_b));
    }
}
