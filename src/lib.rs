//! impulse2d
//!
//! A 2D rigid-body collision and contact engine built on glam.
//!
//! # Architecture
//!
//! The library is organized into layers:
//!
//! 1. **settings** - Tuning constants (slop, iteration caps, polygon limits)
//! 2. **math** - Rotations, transforms and sweeps on top of glam
//! 3. **collision** - Shapes, dynamic AABB tree, broad phase, GJK distance,
//!    contact manifolds and time of impact
//! 4. **dynamics** - Bodies, fixtures, contacts and the sequential impulse
//!    solver backed by a hecs registry (feature = "dynamics")

pub mod collision;
pub mod math;
pub mod settings;

#[cfg(feature = "dynamics")]
pub mod dynamics;

// Re-export commonly used types
pub use collision::{
    Aabb, BroadPhase, ChainShape, CircleShape, DynamicTree, EdgeShape, Manifold, MassData,
    PolygonShape, RayCastInput, RayCastOutput, Shape, ShapeError, ShapeType, WorldManifold,
};
pub use math::{Rot, Sweep, Transform};

#[cfg(feature = "dynamics")]
pub use dynamics::{
    BodyDef, BodyType, Contact, ContactListener, Fixture, FixtureDef, PhysicsConfig, RigidBody,
    World,
};

// Re-export glam for convenience
pub use glam;
