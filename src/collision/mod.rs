//! Collision detection: bounding volumes, broad phase, GJK distance,
//! contact manifolds and time of impact.
//!
//! # Pipeline
//!
//! 1. [`BroadPhase`] keeps fat AABBs in a [`DynamicTree`] and reports
//!    candidate pairs once per step.
//! 2. [`narrowphase`] builds a [`Manifold`] for each candidate pair.
//! 3. [`distance()`] and [`time_of_impact()`] answer closest-point and
//!    swept queries for convex proxies.

pub mod broadphase;
pub mod distance;
pub mod dynamic_tree;
pub mod manifold;
pub mod narrowphase;
pub mod shapes;
pub mod time_of_impact;

use glam::Vec2;

pub use broadphase::BroadPhase;
pub use distance::{
    distance, DistanceInput, DistanceOutput, DistanceProxy, GjkStats, SimplexCache,
};
pub use dynamic_tree::DynamicTree;
pub use manifold::{
    clip_segment_to_line, point_states, ClipVertex, ContactFeature, ContactId, FeatureType,
    Manifold, ManifoldPoint, ManifoldType, PointState, WorldManifold,
};
pub use narrowphase::test_overlap;
pub use shapes::{
    ChainShape, CircleShape, EdgeShape, MassData, PolygonShape, Shape, ShapeError, ShapeType,
};
pub use time_of_impact::{time_of_impact, ToiInput, ToiOutput, ToiState, ToiStats};

/// Ray-cast input. The ray extends from `p1` to `p1 + max_fraction * (p2 - p1)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayCastInput {
    pub p1: Vec2,
    pub p2: Vec2,
    pub max_fraction: f32,
}

/// Ray-cast hit. The ray hits at `p1 + fraction * (p2 - p1)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayCastOutput {
    pub normal: Vec2,
    pub fraction: f32,
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Aabb {
    pub min: Vec2,
    pub max: Vec2,
}

impl Aabb {
    #[inline]
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    /// Bounds are sorted and finite.
    pub fn is_valid(&self) -> bool {
        let d = self.max - self.min;
        d.x >= 0.0 && d.y >= 0.0 && self.min.is_finite() && self.max.is_finite()
    }

    #[inline]
    pub fn center(&self) -> Vec2 {
        0.5 * (self.min + self.max)
    }

    /// Half-widths.
    #[inline]
    pub fn extents(&self) -> Vec2 {
        0.5 * (self.max - self.min)
    }

    /// Perimeter length, the tree's insertion cost metric.
    #[inline]
    pub fn perimeter(&self) -> f32 {
        2.0 * ((self.max.x - self.min.x) + (self.max.y - self.min.y))
    }

    /// Smallest box enclosing both.
    #[inline]
    pub fn combine(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Whether `other` lies entirely inside this box.
    #[inline]
    pub fn contains(&self, other: &Aabb) -> bool {
        self.min.x <= other.min.x
            && self.min.y <= other.min.y
            && other.max.x <= self.max.x
            && other.max.y <= self.max.y
    }

    /// Test whether two AABBs overlap. Touching boxes overlap.
    #[inline]
    pub fn overlaps(&self, other: &Aabb) -> bool {
        let d1 = other.min - self.max;
        let d2 = self.min - other.max;
        !(d1.x > 0.0 || d1.y > 0.0 || d2.x > 0.0 || d2.y > 0.0)
    }

    /// Slab test. Misses when the ray starts inside the box.
    pub fn ray_cast(&self, input: &RayCastInput) -> Option<RayCastOutput> {
        let mut tmin = -f32::MAX;
        let mut tmax = f32::MAX;

        let p = input.p1;
        let d = input.p2 - input.p1;
        let abs_d = d.abs();
        let mut normal = Vec2::ZERO;

        for i in 0..2 {
            if abs_d[i] < f32::EPSILON {
                // Parallel.
                if p[i] < self.min[i] || self.max[i] < p[i] {
                    return None;
                }
            } else {
                let inv_d = 1.0 / d[i];
                let mut t1 = (self.min[i] - p[i]) * inv_d;
                let mut t2 = (self.max[i] - p[i]) * inv_d;

                let mut s = -1.0;
                if t1 > t2 {
                    std::mem::swap(&mut t1, &mut t2);
                    s = 1.0;
                }

                if t1 > tmin {
                    normal = Vec2::ZERO;
                    normal[i] = s;
                    tmin = t1;
                }

                tmax = tmax.min(t2);
                if tmin > tmax {
                    return None;
                }
            }
        }

        if tmin < 0.0 || input.max_fraction < tmin {
            return None;
        }

        Some(RayCastOutput {
            normal,
            fraction: tmin,
        })
    }
}
