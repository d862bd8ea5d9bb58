//! Contact manifolds and feature ids.
//!
//! A manifold stores contact points in the local frame of one of the shapes
//! so it stays meaningful while bodies move during the position solve.
//! Each point carries a [`ContactId`] naming the features that produced it,
//! which lets impulses survive from one step to the next.

use glam::Vec2;

use crate::math::Transform;
use crate::settings::MAX_MANIFOLD_POINTS;

/// Kind of feature that produced a contact point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum FeatureType {
    #[default]
    Vertex = 0,
    Face = 1,
}

/// The features that intersect to form a contact point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ContactFeature {
    /// Feature index on shape A.
    pub index_a: u8,
    /// Feature index on shape B.
    pub index_b: u8,
    pub type_a: FeatureType,
    pub type_b: FeatureType,
}

impl ContactFeature {
    /// Same contact seen from the other shape.
    #[inline]
    pub fn flipped(self) -> Self {
        Self {
            index_a: self.index_b,
            index_b: self.index_a,
            type_a: self.type_b,
            type_b: self.type_a,
        }
    }
}

/// Contact id used to match points between steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ContactId {
    pub cf: ContactFeature,
}

impl ContactId {
    #[inline]
    pub fn new(index_a: u8, index_b: u8, type_a: FeatureType, type_b: FeatureType) -> Self {
        Self {
            cf: ContactFeature {
                index_a,
                index_b,
                type_a,
                type_b,
            },
        }
    }

    /// The four feature bytes packed into one word, one byte lane each.
    #[inline]
    pub fn key(&self) -> u32 {
        u32::from(self.cf.index_a)
            | u32::from(self.cf.index_b) << 8
            | (self.cf.type_a as u32) << 16
            | (self.cf.type_b as u32) << 24
    }
}

/// A contact point in a manifold.
///
/// The local point depends on the manifold type:
/// - `Circles`: the local center of circle B
/// - `FaceA`: the local center of circle B or the clip point of polygon B
/// - `FaceB`: the clip point of polygon A
///
/// Impulses are carried across steps for warm starting.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ManifoldPoint {
    pub local_point: Vec2,
    /// Non-penetration impulse.
    pub normal_impulse: f32,
    /// Friction impulse.
    pub tangent_impulse: f32,
    pub id: ContactId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ManifoldType {
    #[default]
    Circles,
    FaceA,
    FaceB,
}

/// Contact points for a touching shape pair. All points share one normal.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Manifold {
    pub points: [ManifoldPoint; MAX_MANIFOLD_POINTS],
    /// Not used for `Circles`.
    pub local_normal: Vec2,
    /// Usage depends on the manifold type.
    pub local_point: Vec2,
    pub manifold_type: ManifoldType,
    pub point_count: usize,
}

impl Manifold {
    #[inline]
    pub fn points(&self) -> &[ManifoldPoint] {
        &self.points[..self.point_count]
    }

    #[inline]
    pub fn points_mut(&mut self) -> &mut [ManifoldPoint] {
        &mut self.points[..self.point_count]
    }
}

/// A manifold resolved into world space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WorldManifold {
    /// Points from A to B.
    pub normal: Vec2,
    /// World contact points, midway between the two surfaces.
    pub points: [Vec2; MAX_MANIFOLD_POINTS],
    /// Negative when overlapping.
    pub separations: [f32; MAX_MANIFOLD_POINTS],
}

impl WorldManifold {
    pub fn new(
        manifold: &Manifold,
        xf_a: &Transform,
        radius_a: f32,
        xf_b: &Transform,
        radius_b: f32,
    ) -> Self {
        let mut wm = WorldManifold::default();
        if manifold.point_count == 0 {
            return wm;
        }

        match manifold.manifold_type {
            ManifoldType::Circles => {
                wm.normal = Vec2::X;
                let point_a = xf_a.transform_point(manifold.local_point);
                let point_b = xf_b.transform_point(manifold.points[0].local_point);
                if point_a.distance_squared(point_b) > f32::EPSILON * f32::EPSILON {
                    wm.normal = (point_b - point_a).normalize();
                }

                let c_a = point_a + radius_a * wm.normal;
                let c_b = point_b - radius_b * wm.normal;
                wm.points[0] = 0.5 * (c_a + c_b);
                wm.separations[0] = (c_b - c_a).dot(wm.normal);
            }
            ManifoldType::FaceA => {
                wm.normal = xf_a.q.rotate(manifold.local_normal);
                let plane_point = xf_a.transform_point(manifold.local_point);

                for (i, mp) in manifold.points().iter().enumerate() {
                    let clip_point = xf_b.transform_point(mp.local_point);
                    let c_a = clip_point
                        + (radius_a - (clip_point - plane_point).dot(wm.normal)) * wm.normal;
                    let c_b = clip_point - radius_b * wm.normal;
                    wm.points[i] = 0.5 * (c_a + c_b);
                    wm.separations[i] = (c_b - c_a).dot(wm.normal);
                }
            }
            ManifoldType::FaceB => {
                let normal = xf_b.q.rotate(manifold.local_normal);
                let plane_point = xf_b.transform_point(manifold.local_point);

                for (i, mp) in manifold.points().iter().enumerate() {
                    let clip_point = xf_a.transform_point(mp.local_point);
                    let c_b = clip_point
                        + (radius_b - (clip_point - plane_point).dot(normal)) * normal;
                    let c_a = clip_point - radius_a * normal;
                    wm.points[i] = 0.5 * (c_a + c_b);
                    wm.separations[i] = (c_a - c_b).dot(normal);
                }

                // Ensure normal points from A to B.
                wm.normal = -normal;
            }
        }

        wm
    }
}

/// Life-cycle of a contact point between two manifolds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PointState {
    /// Point does not exist.
    #[default]
    Null,
    /// Point was added in the update.
    Add,
    /// Point persisted across the update.
    Persist,
    /// Point was removed in the update.
    Remove,
}

/// Compare two manifolds by contact id. Returns the state of each point of
/// `manifold1` (persist or remove) and of `manifold2` (add or persist).
pub fn point_states(
    manifold1: &Manifold,
    manifold2: &Manifold,
) -> (
    [PointState; MAX_MANIFOLD_POINTS],
    [PointState; MAX_MANIFOLD_POINTS],
) {
    let mut state1 = [PointState::Null; MAX_MANIFOLD_POINTS];
    let mut state2 = [PointState::Null; MAX_MANIFOLD_POINTS];

    // Detect persists and removes.
    for (i, p1) in manifold1.points().iter().enumerate() {
        let key = p1.id.key();
        state1[i] = if manifold2.points().iter().any(|p2| p2.id.key() == key) {
            PointState::Persist
        } else {
            PointState::Remove
        };
    }

    // Detect persists and adds.
    for (i, p2) in manifold2.points().iter().enumerate() {
        let key = p2.id.key();
        state2[i] = if manifold1.points().iter().any(|p1| p1.id.key() == key) {
            PointState::Persist
        } else {
            PointState::Add
        };
    }

    (state1, state2)
}

/// Vertex used when clipping an incident edge.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ClipVertex {
    pub v: Vec2,
    pub id: ContactId,
}

/// Sutherland-Hodgman clipping of a segment against the half-plane
/// `dot(normal, v) <= offset`.
///
/// A newly created vertex gets an id combining `vertex_index_a` (the
/// clipping edge's vertex) with the clipped edge's face index.
pub fn clip_segment_to_line(
    v_in: &[ClipVertex; 2],
    normal: Vec2,
    offset: f32,
    vertex_index_a: u8,
) -> ([ClipVertex; 2], usize) {
    let mut v_out = [ClipVertex::default(); 2];
    let mut count = 0;

    // Calculate the distance of end points to the line
    let distance0 = normal.dot(v_in[0].v) - offset;
    let distance1 = normal.dot(v_in[1].v) - offset;

    // If the points are behind the plane
    if distance0 <= 0.0 {
        v_out[count] = v_in[0];
        count += 1;
    }
    if distance1 <= 0.0 {
        v_out[count] = v_in[1];
        count += 1;
    }

    // If the points are on different sides of the plane
    if distance0 * distance1 < 0.0 {
        // Find intersection point of edge and plane
        let interp = distance0 / (distance0 - distance1);
        v_out[count] = ClipVertex {
            v: v_in[0].v + interp * (v_in[1].v - v_in[0].v),
            // VertexA is hitting edgeB.
            id: ContactId::new(
                vertex_index_a,
                v_in[0].id.cf.index_b,
                FeatureType::Vertex,
                FeatureType::Face,
            ),
        };
        count += 1;
    }

    debug_assert!(count <= 2);
    (v_out, count)
}
