use glam::Vec2;

use crate::collision::Aabb;
use crate::math::Transform;
use crate::settings::{LINEAR_SLOP, POLYGON_RADIUS};

use super::{EdgeShape, ShapeError};

/// A polyline of edges, open or closed.
///
/// A loop repeats its first vertex at the end so every child edge is
/// `vertices[i]..vertices[i + 1]`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChainShape {
    pub vertices: Vec<Vec2>,
    pub prev_vertex: Vec2,
    pub next_vertex: Vec2,
    pub has_prev_vertex: bool,
    pub has_next_vertex: bool,
    pub radius: f32,
}

impl ChainShape {
    /// Closed loop. Connectivity is set automatically.
    pub fn new_loop(points: &[Vec2]) -> Result<Self, ShapeError> {
        if points.len() < 3 {
            return Err(ShapeError::ChainTooShort {
                count: points.len(),
                min: 3,
            });
        }
        check_spacing(points)?;

        let mut vertices = points.to_vec();
        vertices.push(points[0]);
        let count = vertices.len();
        Ok(Self {
            prev_vertex: vertices[count - 2],
            next_vertex: vertices[1],
            has_prev_vertex: true,
            has_next_vertex: true,
            vertices,
            radius: POLYGON_RADIUS,
        })
    }

    /// Open chain without ghost vertices at the ends.
    pub fn new_chain(points: &[Vec2]) -> Result<Self, ShapeError> {
        if points.len() < 2 {
            return Err(ShapeError::ChainTooShort {
                count: points.len(),
                min: 2,
            });
        }
        check_spacing(points)?;

        Ok(Self {
            vertices: points.to_vec(),
            prev_vertex: Vec2::ZERO,
            next_vertex: Vec2::ZERO,
            has_prev_vertex: false,
            has_next_vertex: false,
            radius: POLYGON_RADIUS,
        })
    }

    /// Ghost vertex before the first vertex, for connecting chains.
    pub fn set_prev_vertex(&mut self, prev: Vec2) {
        self.prev_vertex = prev;
        self.has_prev_vertex = true;
    }

    /// Ghost vertex after the last vertex.
    pub fn set_next_vertex(&mut self, next: Vec2) {
        self.next_vertex = next;
        self.has_next_vertex = true;
    }

    #[inline]
    pub fn child_count(&self) -> usize {
        self.vertices.len() - 1
    }

    /// Child edge `index` with neighbouring vertices as ghosts.
    pub fn child_edge(&self, index: usize) -> EdgeShape {
        debug_assert!(index < self.child_count());
        let count = self.vertices.len();

        let mut edge = EdgeShape::new(self.vertices[index], self.vertices[index + 1]);
        edge.radius = self.radius;

        if index > 0 {
            edge.v0 = self.vertices[index - 1];
            edge.has_vertex0 = true;
        } else {
            edge.v0 = self.prev_vertex;
            edge.has_vertex0 = self.has_prev_vertex;
        }

        if index + 2 < count {
            edge.v3 = self.vertices[index + 2];
            edge.has_vertex3 = true;
        } else {
            edge.v3 = self.next_vertex;
            edge.has_vertex3 = self.has_next_vertex;
        }

        edge
    }

    pub fn compute_aabb(&self, xf: &Transform, child_index: usize) -> Aabb {
        let v1 = xf.transform_point(self.vertices[child_index]);
        let v2 = xf.transform_point(self.vertices[child_index + 1]);
        let r = Vec2::splat(self.radius);
        Aabb {
            min: v1.min(v2) - r,
            max: v1.max(v2) + r,
        }
    }
}

fn check_spacing(points: &[Vec2]) -> Result<(), ShapeError> {
    for (i, pair) in points.windows(2).enumerate() {
        if pair[0].distance_squared(pair[1]) <= LINEAR_SLOP * LINEAR_SLOP {
            return Err(ShapeError::VerticesTooClose(i, i + 1));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<Vec2> {
        vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(0.0, 1.0),
        ]
    }

    #[test]
    fn test_loop_wraps_ghost_vertices() {
        let chain = ChainShape::new_loop(&square()).unwrap();
        assert_eq!(chain.child_count(), 4);

        let first = chain.child_edge(0);
        assert!(first.has_vertex0 && first.has_vertex3);
        assert_eq!(first.v0, Vec2::new(0.0, 1.0));
        assert_eq!(first.v3, Vec2::new(1.0, 1.0));

        let last = chain.child_edge(3);
        assert_eq!(last.v1, Vec2::new(0.0, 1.0));
        assert_eq!(last.v2, Vec2::new(0.0, 0.0));
        assert_eq!(last.v3, Vec2::new(1.0, 0.0));
    }

    #[test]
    fn test_open_chain_ends_have_no_ghosts() {
        let mut chain = ChainShape::new_chain(&square()).unwrap();
        assert_eq!(chain.child_count(), 3);
        assert!(!chain.child_edge(0).has_vertex0);
        assert!(!chain.child_edge(2).has_vertex3);
        assert!(chain.child_edge(1).has_vertex0);

        chain.set_prev_vertex(Vec2::new(-1.0, 0.0));
        let first = chain.child_edge(0);
        assert!(first.has_vertex0);
        assert_eq!(first.v0, Vec2::new(-1.0, 0.0));
    }

    #[test]
    fn test_chain_rejects_close_vertices() {
        let points = [Vec2::ZERO, Vec2::new(0.001, 0.0), Vec2::ONE];
        assert_eq!(
            ChainShape::new_chain(&points),
            Err(ShapeError::VerticesTooClose(0, 1))
        );
        assert!(matches!(
            ChainShape::new_loop(&points[..2]),
            Err(ShapeError::ChainTooShort { count: 2, min: 3 })
        ));
    }
}
