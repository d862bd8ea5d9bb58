//! Rigid body component.

use glam::Vec2;

use crate::collision::shapes::MassData;
use crate::math::{cross_sv, Rot, Sweep, Transform};

/// Rigid body type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BodyType {
    /// Zero mass, zero velocity, may be moved manually.
    #[default]
    Static,
    /// Zero mass, velocity set by the user, moved by the solver.
    Kinematic,
    /// Positive mass, velocity determined by forces, moved by the solver.
    Dynamic,
}

/// Everything needed to construct a [`RigidBody`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BodyDef {
    pub body_type: BodyType,
    /// World position of the body origin.
    pub position: Vec2,
    /// World angle in radians.
    pub angle: f32,
    pub linear_velocity: Vec2,
    pub angular_velocity: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub gravity_scale: f32,
    /// Fast body that should not tunnel through other dynamic bodies.
    pub bullet: bool,
    pub fixed_rotation: bool,
}

impl Default for BodyDef {
    fn default() -> Self {
        Self {
            body_type: BodyType::Static,
            position: Vec2::ZERO,
            angle: 0.0,
            linear_velocity: Vec2::ZERO,
            angular_velocity: 0.0,
            linear_damping: 0.0,
            angular_damping: 0.0,
            gravity_scale: 1.0,
            bullet: false,
            fixed_rotation: false,
        }
    }
}

impl BodyDef {
    pub fn new_dynamic(position: Vec2) -> Self {
        Self {
            body_type: BodyType::Dynamic,
            position,
            ..Default::default()
        }
    }

    pub fn new_static(position: Vec2) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn new_kinematic(position: Vec2) -> Self {
        Self {
            body_type: BodyType::Kinematic,
            position,
            ..Default::default()
        }
    }
}

/// Rigid body component.
#[derive(Debug, Clone)]
pub struct RigidBody {
    pub body_type: BodyType,
    /// Body origin transform.
    pub(crate) xf: Transform,
    /// Swept motion for continuous collision.
    pub(crate) sweep: Sweep,
    pub linear_velocity: Vec2,
    pub angular_velocity: f32,
    pub force: Vec2,
    pub torque: f32,
    pub(crate) mass: f32,
    pub(crate) inv_mass: f32,
    /// Rotational inertia about the center of mass.
    pub(crate) inertia: f32,
    pub(crate) inv_inertia: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub gravity_scale: f32,
    pub bullet: bool,
    pub fixed_rotation: bool,
    pub(crate) fixtures: Vec<hecs::Entity>,
    pub(crate) island_index: usize,
}

impl RigidBody {
    pub fn new(def: &BodyDef) -> Self {
        let xf = Transform::new(def.position, def.angle);
        let sweep = Sweep {
            local_center: Vec2::ZERO,
            c0: xf.p,
            c: xf.p,
            a0: def.angle,
            a: def.angle,
            alpha0: 0.0,
        };

        let (mass, inv_mass) = if def.body_type == BodyType::Dynamic {
            (1.0, 1.0)
        } else {
            (0.0, 0.0)
        };

        Self {
            body_type: def.body_type,
            xf,
            sweep,
            linear_velocity: def.linear_velocity,
            angular_velocity: def.angular_velocity,
            force: Vec2::ZERO,
            torque: 0.0,
            mass,
            inv_mass,
            inertia: 0.0,
            inv_inertia: 0.0,
            linear_damping: def.linear_damping,
            angular_damping: def.angular_damping,
            gravity_scale: def.gravity_scale,
            bullet: def.bullet,
            fixed_rotation: def.fixed_rotation,
            fixtures: Vec::new(),
            island_index: 0,
        }
    }

    pub fn new_dynamic(position: Vec2) -> Self {
        Self::new(&BodyDef::new_dynamic(position))
    }

    pub fn new_static(position: Vec2) -> Self {
        Self::new(&BodyDef::new_static(position))
    }

    pub fn new_kinematic(position: Vec2) -> Self {
        Self::new(&BodyDef::new_kinematic(position))
    }

    #[inline]
    pub fn transform(&self) -> &Transform {
        &self.xf
    }

    #[inline]
    pub fn position(&self) -> Vec2 {
        self.xf.p
    }

    #[inline]
    pub fn angle(&self) -> f32 {
        self.sweep.a
    }

    #[inline]
    pub fn world_center(&self) -> Vec2 {
        self.sweep.c
    }

    #[inline]
    pub fn local_center(&self) -> Vec2 {
        self.sweep.local_center
    }

    #[inline]
    pub fn mass(&self) -> f32 {
        self.mass
    }

    /// Rotational inertia about the body origin.
    pub fn inertia(&self) -> f32 {
        self.inertia + self.mass * self.sweep.local_center.length_squared()
    }

    pub fn fixtures(&self) -> &[hecs::Entity] {
        &self.fixtures
    }

    pub fn is_dynamic(&self) -> bool {
        self.body_type == BodyType::Dynamic
    }

    /// Apply a force at a world point. Off-center forces also produce torque.
    pub fn apply_force(&mut self, force: Vec2, point: Vec2) {
        if self.body_type != BodyType::Dynamic {
            return;
        }
        self.force += force;
        self.torque += (point - self.sweep.c).perp_dot(force);
    }

    pub fn apply_force_to_center(&mut self, force: Vec2) {
        if self.body_type != BodyType::Dynamic {
            return;
        }
        self.force += force;
    }

    pub fn apply_torque(&mut self, torque: f32) {
        if self.body_type != BodyType::Dynamic {
            return;
        }
        self.torque += torque;
    }

    /// Apply an impulse at a world point, changing velocity immediately.
    pub fn apply_linear_impulse(&mut self, impulse: Vec2, point: Vec2) {
        if self.body_type != BodyType::Dynamic {
            return;
        }
        self.linear_velocity += self.inv_mass * impulse;
        self.angular_velocity += self.inv_inertia * (point - self.sweep.c).perp_dot(impulse);
    }

    /// At least one of the two bodies must be dynamic for contacts to form.
    pub fn should_collide(&self, other: &RigidBody) -> bool {
        self.body_type == BodyType::Dynamic || other.body_type == BodyType::Dynamic
    }

    /// Recompute mass, center of mass and inertia from fixture mass data.
    pub(crate) fn reset_mass_data(&mut self, fixture_mass: &[MassData]) {
        self.mass = 0.0;
        self.inv_mass = 0.0;
        self.inertia = 0.0;
        self.inv_inertia = 0.0;
        self.sweep.local_center = Vec2::ZERO;

        // Static and kinematic bodies have zero mass.
        if self.body_type != BodyType::Dynamic {
            self.sweep.c0 = self.xf.p;
            self.sweep.c = self.xf.p;
            self.sweep.a0 = self.sweep.a;
            return;
        }

        // Accumulate mass over all fixtures.
        let mut local_center = Vec2::ZERO;
        for md in fixture_mass {
            self.mass += md.mass;
            local_center += md.mass * md.center;
            self.inertia += md.i;
        }

        if self.mass > 0.0 {
            self.inv_mass = 1.0 / self.mass;
            local_center *= self.inv_mass;
        } else {
            // Force all dynamic bodies to have a positive mass.
            self.mass = 1.0;
            self.inv_mass = 1.0;
        }

        if self.inertia > 0.0 && !self.fixed_rotation {
            // Center the inertia about the center of mass.
            self.inertia -= self.mass * local_center.length_squared();
            debug_assert!(self.inertia > 0.0);
            self.inv_inertia = 1.0 / self.inertia;
        } else {
            self.inertia = 0.0;
            self.inv_inertia = 0.0;
        }

        // Move center of mass.
        let old_center = self.sweep.c;
        self.sweep.local_center = local_center;
        self.sweep.c = self.xf.transform_point(local_center);
        self.sweep.c0 = self.sweep.c;

        // Update center of mass velocity.
        self.linear_velocity += cross_sv(self.angular_velocity, self.sweep.c - old_center);
    }

    /// Teleport the body origin. Contacts update on the next step.
    pub fn set_transform(&mut self, position: Vec2, angle: f32) {
        self.xf = Transform::new(position, angle);
        self.sweep.c = self.xf.transform_point(self.sweep.local_center);
        self.sweep.a = angle;
        self.sweep.c0 = self.sweep.c;
        self.sweep.a0 = angle;
    }

    pub(crate) fn synchronize_transform(&mut self) {
        self.xf.q = Rot::from_angle(self.sweep.a);
        self.xf.p = self.sweep.c - self.xf.q.rotate(self.sweep.local_center);
    }

    /// Transform at the start of the sweep.
    pub(crate) fn sweep_start_transform(&self) -> Transform {
        let q = Rot::from_angle(self.sweep.a0);
        Transform {
            p: self.sweep.c0 - q.rotate(self.sweep.local_center),
            q,
        }
    }

    /// Move the body to a safe time of impact and freeze it there.
    pub(crate) fn advance(&mut self, alpha: f32) {
        self.sweep.advance(alpha);
        self.sweep.c = self.sweep.c0;
        self.sweep.a = self.sweep.a0;
        self.synchronize_transform();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_constructors() {
        let dynamic = RigidBody::new_dynamic(Vec2::new(1.0, 2.0));
        assert_eq!(dynamic.body_type, BodyType::Dynamic);
        assert_eq!(dynamic.mass(), 1.0);
        assert_eq!(dynamic.position(), Vec2::new(1.0, 2.0));

        let ground = RigidBody::new_static(Vec2::ZERO);
        assert_eq!(ground.mass(), 0.0);
        assert!(!ground.should_collide(&RigidBody::new_kinematic(Vec2::ZERO)));
        assert!(ground.should_collide(&dynamic));
    }

    #[test]
    fn test_reset_mass_data_moves_center() {
        let mut body = RigidBody::new_dynamic(Vec2::new(5.0, 0.0));
        body.reset_mass_data(&[MassData {
            mass: 2.0,
            center: Vec2::new(1.0, 0.0),
            i: 2.0 + 2.0 * 1.0,
        }]);
        assert!((body.mass() - 2.0).abs() < 1e-6);
        assert!((body.world_center() - Vec2::new(6.0, 0.0)).length() < 1e-6);
        assert!(
            (body.inertia - 2.0).abs() < 1e-5,
            "central inertia = {}",
            body.inertia
        );
        assert!((body.inertia() - 4.0).abs() < 1e-5);
    }

    #[test]
    fn test_zero_density_dynamic_body_keeps_unit_mass() {
        let mut body = RigidBody::new_dynamic(Vec2::ZERO);
        body.reset_mass_data(&[]);
        assert_eq!(body.mass(), 1.0);
        assert_eq!(body.inv_inertia, 0.0);
    }

    #[test]
    fn test_off_center_impulse_spins() {
        let mut body = RigidBody::new_dynamic(Vec2::ZERO);
        body.reset_mass_data(&[MassData {
            mass: 1.0,
            center: Vec2::ZERO,
            i: 0.5,
        }]);
        body.apply_linear_impulse(Vec2::new(0.0, 1.0), Vec2::new(1.0, 0.0));
        assert!((body.linear_velocity - Vec2::new(0.0, 1.0)).length() < 1e-6);
        assert!((body.angular_velocity - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_advance_freezes_sweep() {
        let mut body = RigidBody::new_dynamic(Vec2::ZERO);
        body.sweep.c = Vec2::new(4.0, 0.0);
        body.advance(0.25);
        assert!((body.position() - Vec2::new(1.0, 0.0)).length() < 1e-6);
        assert_eq!(body.sweep.c, body.sweep.c0);
    }
}
