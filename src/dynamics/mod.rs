//! Rigid-body host for the collision core.
//!
//! # Architecture
//!
//! Bodies and fixtures are `hecs` entities. The [`World`] runs a fixed
//! timestep loop:
//!
//! 1. Find new contacts (broad-phase pairs)
//! 2. Collide (update manifolds, drop stale pairs)
//! 3. Integrate velocities (gravity, damping)
//! 4. Solve contact constraints (sequential impulse)
//! 5. Integrate positions and solve position constraints
//! 6. Synchronize fixtures with the broad phase
//! 7. Continuous collision (time of impact sub-steps)
//! 8. Clear force accumulators

pub mod body;
pub mod contact;
pub mod contact_manager;
pub mod contact_solver;
pub mod fixture;
pub mod world;

pub use body::{BodyDef, BodyType, RigidBody};
pub use contact::{
    mix_friction, mix_restitution, Contact, ContactFilter, ContactImpulse, ContactListener,
    DefaultContactFilter, DefaultContactListener,
};
pub use contact_manager::ContactManager;
pub use contact_solver::{ContactSolver, Position, SolverContact, TimeStep, Velocity};
pub use fixture::{Filter, Fixture, FixtureDef, FixtureProxyKey};
pub use world::{PhysicsConfig, World};
