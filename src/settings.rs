//! Global tuning constants based on meters-kilograms-seconds (MKS) units.

use std::f32::consts::PI;

// Collision

/// The maximum number of contact points between two convex shapes.
pub const MAX_MANIFOLD_POINTS: usize = 2;

/// The maximum number of vertices on a convex polygon.
pub const MAX_POLYGON_VERTICES: usize = 8;

/// Margin used to fatten AABBs in the dynamic tree, in meters.
pub const AABB_EXTENSION: f32 = 0.1;

/// Multiplier applied to a proxy's displacement to predict its next fat AABB.
pub const AABB_MULTIPLIER: f32 = 2.0;

/// Collision and constraint tolerance. Numerically significant, visually insignificant.
pub const LINEAR_SLOP: f32 = 0.005;

/// Angular collision and constraint tolerance.
pub const ANGULAR_SLOP: f32 = 2.0 / 180.0 * PI;

/// Skin radius of polygons and edges.
pub const POLYGON_RADIUS: f32 = 2.0 * LINEAR_SLOP;

/// Maximum number of sub-steps per contact in continuous physics simulation.
pub const MAX_SUB_STEPS: u32 = 8;

// Iteration caps

/// GJK iteration cap.
pub const MAX_GJK_ITERATIONS: u32 = 20;

/// Time of impact outer loop cap.
pub const MAX_TOI_ITERATIONS: u32 = 20;

/// Time of impact root finder cap.
pub const MAX_TOI_ROOT_ITERATIONS: u32 = 50;

// Dynamics

/// Maximum number of contacts handled when solving a time of impact.
pub const MAX_TOI_CONTACTS: usize = 32;

/// Relative normal speed below which collisions are treated as inelastic.
pub const VELOCITY_THRESHOLD: f32 = 1.0;

/// Maximum linear position correction per position iteration.
pub const MAX_LINEAR_CORRECTION: f32 = 0.2;

/// Maximum angular position correction per position iteration.
pub const MAX_ANGULAR_CORRECTION: f32 = 8.0 / 180.0 * PI;

/// Maximum translation of a body per step.
pub const MAX_TRANSLATION: f32 = 2.0;
pub const MAX_TRANSLATION_SQUARED: f32 = MAX_TRANSLATION * MAX_TRANSLATION;

/// Maximum rotation of a body per step.
pub const MAX_ROTATION: f32 = 0.5 * PI;
pub const MAX_ROTATION_SQUARED: f32 = MAX_ROTATION * MAX_ROTATION;

/// Fraction of overlap resolved per step.
pub const BAUMGARTE: f32 = 0.2;
pub const TOI_BAUMGARTE: f32 = 0.75;
