//! Convex collision shapes.
//!
//! Every shape is a convex point set inflated by a skin radius. Chains are
//! collections of edges and collide one child edge at a time.

mod chain;
mod circle;
mod edge;
mod polygon;

use glam::Vec2;
use thiserror::Error;

use crate::math::Transform;

use super::{Aabb, RayCastInput, RayCastOutput};

pub use chain::ChainShape;
pub use circle::CircleShape;
pub use edge::EdgeShape;
pub use polygon::PolygonShape;

/// Errors raised while building shapes from user geometry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ShapeError {
    #[error("polygon needs at least 3 distinct vertices, got {0}")]
    TooFewVertices(usize),
    #[error("polygon supports at most {max} vertices, got {count}")]
    TooManyVertices { count: usize, max: usize },
    #[error("polygon hull is degenerate (collinear or welded points)")]
    DegenerateHull,
    #[error("chain needs at least {min} vertices, got {count}")]
    ChainTooShort { count: usize, min: usize },
    #[error("chain vertices {0} and {1} are too close together")]
    VerticesTooClose(usize, usize),
}

/// Mass properties of a shape.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MassData {
    /// Mass in kilograms.
    pub mass: f32,
    /// Center of mass relative to the shape origin.
    pub center: Vec2,
    /// Rotational inertia about the shape origin.
    pub i: f32,
}

/// Shape kind tag. The discriminant doubles as the contact registry index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ShapeType {
    Circle = 0,
    Edge = 1,
    Polygon = 2,
    Chain = 3,
}

impl ShapeType {
    pub const COUNT: usize = 4;

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// A collision shape.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Shape {
    Circle(CircleShape),
    Polygon(PolygonShape),
    Edge(EdgeShape),
    Chain(ChainShape),
}

impl Shape {
    #[inline]
    pub fn shape_type(&self) -> ShapeType {
        match self {
            Shape::Circle(_) => ShapeType::Circle,
            Shape::Polygon(_) => ShapeType::Polygon,
            Shape::Edge(_) => ShapeType::Edge,
            Shape::Chain(_) => ShapeType::Chain,
        }
    }

    /// Skin radius.
    #[inline]
    pub fn radius(&self) -> f32 {
        match self {
            Shape::Circle(s) => s.radius,
            Shape::Polygon(s) => s.radius,
            Shape::Edge(s) => s.radius,
            Shape::Chain(s) => s.radius,
        }
    }

    /// Number of child primitives. Only chains have more than one.
    #[inline]
    pub fn child_count(&self) -> usize {
        match self {
            Shape::Chain(s) => s.child_count(),
            _ => 1,
        }
    }

    /// Whether a world point lies inside the shape. Always false for edges and chains.
    pub fn test_point(&self, xf: &Transform, p: Vec2) -> bool {
        match self {
            Shape::Circle(s) => s.test_point(xf, p),
            Shape::Polygon(s) => s.test_point(xf, p),
            Shape::Edge(_) | Shape::Chain(_) => false,
        }
    }

    /// Cast a ray against a child primitive.
    pub fn ray_cast(
        &self,
        input: &RayCastInput,
        xf: &Transform,
        child_index: usize,
    ) -> Option<RayCastOutput> {
        match self {
            Shape::Circle(s) => s.ray_cast(input, xf),
            Shape::Polygon(s) => s.ray_cast(input, xf),
            Shape::Edge(s) => s.ray_cast(input, xf),
            Shape::Chain(s) => s.child_edge(child_index).ray_cast(input, xf),
        }
    }

    /// World-space AABB of a child primitive, including the skin radius.
    pub fn compute_aabb(&self, xf: &Transform, child_index: usize) -> Aabb {
        match self {
            Shape::Circle(s) => s.compute_aabb(xf),
            Shape::Polygon(s) => s.compute_aabb(xf),
            Shape::Edge(s) => s.compute_aabb(xf),
            Shape::Chain(s) => s.compute_aabb(xf, child_index),
        }
    }

    /// Mass properties for the given density. Edges and chains are massless.
    pub fn compute_mass(&self, density: f32) -> MassData {
        match self {
            Shape::Circle(s) => s.compute_mass(density),
            Shape::Polygon(s) => s.compute_mass(density),
            Shape::Edge(s) => s.compute_mass(),
            Shape::Chain(_) => MassData::default(),
        }
    }
}

impl From<CircleShape> for Shape {
    fn from(s: CircleShape) -> Self {
        Shape::Circle(s)
    }
}

impl From<PolygonShape> for Shape {
    fn from(s: PolygonShape) -> Self {
        Shape::Polygon(s)
    }
}

impl From<EdgeShape> for Shape {
    fn from(s: EdgeShape) -> Self {
        Shape::Edge(s)
    }
}

impl From<ChainShape> for Shape {
    fn from(s: ChainShape) -> Self {
        Shape::Chain(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_dispatch() {
        let circle: Shape = CircleShape::new(Vec2::ZERO, 1.0).into();
        assert_eq!(circle.shape_type(), ShapeType::Circle);
        assert_eq!(circle.child_count(), 1);
        assert!(circle.test_point(&Transform::IDENTITY, Vec2::new(0.5, 0.5)));

        let chain: Shape = ChainShape::new_chain(&[
            Vec2::new(0.0, 0.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(2.0, 0.0),
        ])
        .unwrap()
        .into();
        assert_eq!(chain.child_count(), 2);
        assert!(!chain.test_point(&Transform::IDENTITY, Vec2::ZERO));
        assert_eq!(chain.compute_mass(1.0).mass, 0.0);
    }

    #[test]
    fn test_shape_type_indices_are_dense() {
        let all = [
            ShapeType::Circle,
            ShapeType::Edge,
            ShapeType::Polygon,
            ShapeType::Chain,
        ];
        for (i, t) in all.iter().enumerate() {
            assert_eq!(t.index(), i);
        }
        assert_eq!(all.len(), ShapeType::COUNT);
    }
}
