//! The physics world: owns bodies, fixtures and contacts, and steps them.

use anyhow::{Context, Result};
use glam::Vec2;

use crate::collision::distance::DistanceProxy;
use crate::collision::shapes::MassData;
use crate::collision::time_of_impact::{time_of_impact, ToiInput, ToiState, ToiStats};
use crate::collision::{Aabb, RayCastInput};
use crate::math::Sweep;
use crate::settings::{
    MAX_ROTATION, MAX_ROTATION_SQUARED, MAX_SUB_STEPS, MAX_TOI_CONTACTS, MAX_TRANSLATION,
    MAX_TRANSLATION_SQUARED,
};

use super::body::{BodyDef, BodyType, RigidBody};
use super::contact::{Contact, ContactFilter, ContactFlags, ContactImpulse, ContactListener};
use super::contact_manager::ContactManager;
use super::contact_solver::{ContactSolver, Position, SolverContact, TimeStep, Velocity};
use super::fixture::{Filter, Fixture, FixtureDef};

/// Position iterations used to resolve a single time of impact event.
const TOI_POSITION_ITERATIONS: u32 = 20;

/// Configuration for the simulation.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PhysicsConfig {
    /// Gravity vector. Default: (0, -10).
    pub gravity: Vec2,
    /// Fixed timestep in seconds used by [`World::step`]. Default: 1/60.
    pub fixed_timestep: f64,
    /// Maximum number of fixed steps per [`World::step`] call. Default: 4.
    pub max_substeps: u32,
    /// Velocity solver iterations. Default: 8.
    pub velocity_iterations: u32,
    /// Position solver iterations. Default: 3.
    pub position_iterations: u32,
    /// Scale stored impulses into the next step. Default: true.
    pub warm_starting: bool,
    /// Time of impact sub-stepping for fast bodies. Default: true.
    pub continuous_physics: bool,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            gravity: Vec2::new(0.0, -10.0),
            fixed_timestep: 1.0 / 60.0,
            max_substeps: 4,
            velocity_iterations: 8,
            position_iterations: 3,
            warm_starting: true,
            continuous_physics: true,
        }
    }
}

/// Bodies and fixtures live as components in a [`hecs::World`]; contacts
/// and the broad phase live in the [`ContactManager`].
pub struct World {
    config: PhysicsConfig,
    accumulator: f64,
    registry: hecs::World,
    contact_manager: ContactManager,
    /// Inverse of the previous step, used to scale warm starting impulses.
    inv_dt0: f32,
    toi_stats: ToiStats,
}

impl Default for World {
    fn default() -> Self {
        Self::new(PhysicsConfig::default())
    }
}

impl World {
    pub fn new(config: PhysicsConfig) -> Self {
        Self {
            config,
            accumulator: 0.0,
            registry: hecs::World::new(),
            contact_manager: ContactManager::new(),
            inv_dt0: 0.0,
            toi_stats: ToiStats::default(),
        }
    }

    pub fn config(&self) -> &PhysicsConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut PhysicsConfig {
        &mut self.config
    }

    pub fn gravity(&self) -> Vec2 {
        self.config.gravity
    }

    pub fn set_gravity(&mut self, gravity: Vec2) {
        self.config.gravity = gravity;
    }

    /// Backing ECS registry. Extra components may be attached to bodies.
    pub fn registry(&self) -> &hecs::World {
        &self.registry
    }

    pub fn contact_manager(&self) -> &ContactManager {
        &self.contact_manager
    }

    pub fn contacts(&self) -> &[Contact] {
        self.contact_manager.contacts()
    }

    pub fn contact_count(&self) -> usize {
        self.contact_manager.contact_count()
    }

    pub fn body_count(&self) -> usize {
        self.registry.query::<&RigidBody>().iter().count()
    }

    pub fn proxy_count(&self) -> usize {
        self.contact_manager.broad_phase.proxy_count()
    }

    pub fn toi_stats(&self) -> &ToiStats {
        &self.toi_stats
    }

    pub fn set_contact_listener(&mut self, listener: impl ContactListener + 'static) {
        self.contact_manager.listener = Box::new(listener);
    }

    pub fn set_contact_filter(&mut self, filter: impl ContactFilter + 'static) {
        self.contact_manager.filter = Box::new(filter);
    }

    pub fn create_body(&mut self, def: &BodyDef) -> hecs::Entity {
        self.registry.spawn((RigidBody::new(def),))
    }

    /// Destroy a body along with its fixtures and their contacts.
    pub fn destroy_body(&mut self, body: hecs::Entity) -> Result<()> {
        let fixtures = self
            .body(body)
            .context("Failed to destroy body")?
            .fixtures
            .clone();

        for fixture in fixtures {
            self.remove_fixture(fixture)?;
        }

        self.registry
            .despawn(body)
            .with_context(|| format!("Failed to despawn body {body:?}"))?;
        Ok(())
    }

    /// Attach a shape to a body. Mass is recomputed when the fixture has
    /// positive density.
    pub fn create_fixture(&mut self, body: hecs::Entity, def: FixtureDef) -> Result<hecs::Entity> {
        let xf = *self
            .body(body)
            .context("Failed to create fixture")?
            .transform();
        let density = def.density;

        let fixture = self.registry.spawn((Fixture::new(body, def),));
        self.registry
            .get::<&mut Fixture>(fixture)?
            .create_proxies(&mut self.contact_manager.broad_phase, &xf, fixture);
        self.registry
            .get::<&mut RigidBody>(body)?
            .fixtures
            .push(fixture);

        if density > 0.0 {
            self.reset_mass_data(body)?;
        }

        Ok(fixture)
    }

    pub fn destroy_fixture(&mut self, fixture: hecs::Entity) -> Result<()> {
        let body = self
            .fixture(fixture)
            .context("Failed to destroy fixture")?
            .body();

        self.remove_fixture(fixture)?;
        self.registry
            .get::<&mut RigidBody>(body)?
            .fixtures
            .retain(|f| *f != fixture);
        self.reset_mass_data(body)
    }

    pub fn body(&self, body: hecs::Entity) -> Result<hecs::Ref<'_, RigidBody>> {
        self.registry
            .get::<&RigidBody>(body)
            .with_context(|| format!("No rigid body for entity {body:?}"))
    }

    pub fn body_mut(&self, body: hecs::Entity) -> Result<hecs::RefMut<'_, RigidBody>> {
        self.registry
            .get::<&mut RigidBody>(body)
            .with_context(|| format!("No rigid body for entity {body:?}"))
    }

    pub fn fixture(&self, fixture: hecs::Entity) -> Result<hecs::Ref<'_, Fixture>> {
        self.registry
            .get::<&Fixture>(fixture)
            .with_context(|| format!("No fixture for entity {fixture:?}"))
    }

    /// Replace a fixture's filter and re-evaluate its contacts next step.
    pub fn set_filter(&mut self, fixture: hecs::Entity, filter: Filter) -> Result<()> {
        self.registry
            .get::<&mut Fixture>(fixture)
            .with_context(|| format!("No fixture for entity {fixture:?}"))?
            .filter = filter;
        self.contact_manager.refilter(fixture);

        // Touch the proxies so new pairs are considered.
        let proxy_ids: Vec<_> = self
            .fixture(fixture)?
            .proxies
            .iter()
            .map(|p| p.proxy_id)
            .collect();
        for proxy_id in proxy_ids {
            self.contact_manager.broad_phase.touch_proxy(proxy_id);
        }
        Ok(())
    }

    /// Recompute a body's mass from its fixtures' densities.
    pub fn reset_mass_data(&mut self, body: hecs::Entity) -> Result<()> {
        let fixtures = self.body(body)?.fixtures.clone();
        let mass: Vec<MassData> = fixtures
            .iter()
            .filter_map(|f| self.registry.get::<&Fixture>(*f).ok())
            .filter(|f| f.density > 0.0)
            .map(|f| f.mass_data())
            .collect();

        self.body_mut(body)?.reset_mass_data(&mass);
        Ok(())
    }

    /// Advance by `delta_time` seconds in fixed increments.
    pub fn step(&mut self, delta_time: f64) {
        self.accumulator += delta_time;

        let mut substeps = 0u32;
        while self.accumulator >= self.config.fixed_timestep && substeps < self.config.max_substeps
        {
            self.fixed_step(self.config.fixed_timestep as f32);
            self.accumulator -= self.config.fixed_timestep;
            substeps += 1;
        }

        // Clamp accumulator to avoid spiral of death
        if self.accumulator > self.config.fixed_timestep * self.config.max_substeps as f64 {
            self.accumulator = 0.0;
        }
    }

    /// One simulation step of `dt` seconds.
    pub fn fixed_step(&mut self, dt: f32) {
        let inv_dt = if dt > 0.0 { 1.0 / dt } else { 0.0 };
        let step = TimeStep {
            dt,
            inv_dt,
            dt_ratio: self.inv_dt0 * dt,
            velocity_iterations: self.config.velocity_iterations,
            position_iterations: self.config.position_iterations,
            warm_starting: self.config.warm_starting,
        };

        // New fixtures since the last step.
        self.contact_manager.find_new_contacts(&self.registry);

        // Update contacts. This is where some contacts are destroyed.
        self.contact_manager.collide(&self.registry);

        if step.dt > 0.0 {
            self.solve(&step);

            if self.config.continuous_physics {
                self.solve_toi(&step);
            }

            self.inv_dt0 = step.inv_dt;
        }

        self.clear_forces();
    }

    /// Integrate velocities, solve touching contacts, integrate positions.
    fn solve(&mut self, step: &TimeStep) {
        let h = step.dt;
        let gravity = self.config.gravity;

        let mut bodies = Vec::new();
        let mut positions = Vec::new();
        let mut velocities = Vec::new();

        for (entity, body) in self.registry.query_mut::<&mut RigidBody>() {
            body.island_index = bodies.len();
            bodies.push(entity);

            let c = body.sweep.c;
            let a = body.sweep.a;
            let mut v = body.linear_velocity;
            let mut w = body.angular_velocity;

            // Store positions for continuous collision.
            body.sweep.c0 = c;
            body.sweep.a0 = a;

            if body.body_type == BodyType::Dynamic {
                v += h * (body.gravity_scale * gravity + body.inv_mass * body.force);
                w += h * body.inv_inertia * body.torque;

                // Pade approximation of exponential damping.
                v *= 1.0 / (1.0 + h * body.linear_damping);
                w *= 1.0 / (1.0 + h * body.angular_damping);
            }

            positions.push(Position { c, a });
            velocities.push(Velocity { v, w });
        }

        let registry = &self.registry;
        let solver_contacts: Vec<SolverContact<'_>> = self
            .contact_manager
            .contacts
            .iter_mut()
            .enumerate()
            .filter(|(_, c)| c.is_enabled() && c.is_touching() && !c.is_sensor())
            .filter_map(|(index, c)| {
                solver_contact(registry, index, c, |e| {
                    registry.get::<&RigidBody>(e).ok().map(|b| b.island_index)
                })
            })
            .collect();

        let mut solver = ContactSolver::new(*step, solver_contacts);
        solver.initialize_velocity_constraints(&positions, &velocities);

        if step.warm_starting {
            solver.warm_start(&mut velocities);
        }

        for _ in 0..step.velocity_iterations {
            solver.solve_velocity_constraints(&mut velocities);
        }

        solver.store_impulses();

        integrate_positions(&mut positions, &mut velocities, h);

        for _ in 0..step.position_iterations {
            if solver.solve_position_constraints(&mut positions) {
                break;
            }
        }

        let impulses = solver.impulses();
        drop(solver);

        self.write_back(&bodies, &positions, &velocities);
        self.report(&impulses);
        self.synchronize_fixtures();

        // Look for new contacts.
        self.contact_manager.find_new_contacts(&self.registry);
    }

    /// Find the earliest time of impact, resolve it in a mini island and
    /// repeat until the step is consumed.
    fn solve_toi(&mut self, step: &TimeStep) {
        for (_, body) in self.registry.query_mut::<&mut RigidBody>() {
            body.sweep.alpha0 = 0.0;
        }

        for contact in &mut self.contact_manager.contacts {
            contact.flags.remove(ContactFlags::TOI);
            contact.flags.remove(ContactFlags::ISLAND);
            contact.toi_count = 0;
            contact.toi = 1.0;
        }

        loop {
            // Find the first TOI.
            let mut min_contact = None;
            let mut min_alpha = 1.0f32;

            for index in 0..self.contact_manager.contacts.len() {
                let Some(alpha) = self.contact_toi(index) else {
                    continue;
                };
                if alpha < min_alpha {
                    min_contact = Some(index);
                    min_alpha = alpha;
                }
            }

            let Some(min_index) = min_contact else {
                break;
            };
            if 1.0 - 10.0 * f32::EPSILON < min_alpha {
                break;
            }

            self.resolve_toi_event(min_index, min_alpha, step);
        }
    }

    /// Cached or freshly computed TOI of a contact as a fraction of the step.
    fn contact_toi(&mut self, index: usize) -> Option<f32> {
        let contact = &self.contact_manager.contacts[index];

        // Is this contact disabled?
        if !contact.is_enabled() {
            return None;
        }

        // Prevent excessive sub-stepping.
        if contact.toi_count > MAX_SUB_STEPS {
            return None;
        }

        if contact.flags.contains(ContactFlags::TOI) {
            // This contact has a valid cached TOI.
            return Some(contact.toi);
        }

        if contact.is_sensor() {
            return None;
        }

        let (body_a, body_b) = (contact.body_a, contact.body_b);
        let (fixture_a, fixture_b) = (contact.fixture_a, contact.fixture_b);
        let (child_a, child_b) = (contact.child_a, contact.child_b);

        let (type_a, bullet_a, alpha0_a) = self.body_motion(body_a)?;
        let (type_b, bullet_b, alpha0_b) = self.body_motion(body_b)?;

        // Is at least one body active?
        if type_a == BodyType::Static && type_b == BodyType::Static {
            return None;
        }

        // Are these two non-bullet dynamic bodies?
        let collide_a = bullet_a || type_a != BodyType::Dynamic;
        let collide_b = bullet_b || type_b != BodyType::Dynamic;
        if !collide_a && !collide_b {
            return None;
        }

        // Put the sweeps onto the same time interval.
        let alpha0 = if alpha0_a < alpha0_b {
            self.registry
                .get::<&mut RigidBody>(body_a)
                .ok()?
                .sweep
                .advance(alpha0_b);
            alpha0_b
        } else if alpha0_b < alpha0_a {
            self.registry
                .get::<&mut RigidBody>(body_b)
                .ok()?
                .sweep
                .advance(alpha0_a);
            alpha0_a
        } else {
            alpha0_a
        };
        debug_assert!(alpha0 < 1.0);

        let input = {
            let fixture_a = self.registry.get::<&Fixture>(fixture_a).ok()?;
            let fixture_b = self.registry.get::<&Fixture>(fixture_b).ok()?;
            ToiInput {
                proxy_a: DistanceProxy::from_shape(fixture_a.shape(), child_a),
                proxy_b: DistanceProxy::from_shape(fixture_b.shape(), child_b),
                sweep_a: self.body_sweep(body_a)?,
                sweep_b: self.body_sweep(body_b)?,
                t_max: 1.0,
            }
        };

        // Compute the TOI for this contact.
        let output = time_of_impact(&input);
        self.toi_stats.record(&output);

        // Beta is the fraction of the remaining portion of the step.
        let alpha = if output.state == ToiState::Touching {
            (alpha0 + (1.0 - alpha0) * output.t).min(1.0)
        } else {
            1.0
        };

        let contact = &mut self.contact_manager.contacts[index];
        contact.toi = alpha;
        contact.flags.insert(ContactFlags::TOI);
        Some(alpha)
    }

    fn resolve_toi_event(&mut self, min_index: usize, min_alpha: f32, step: &TimeStep) {
        let (body_a, body_b) = {
            let contact = &self.contact_manager.contacts[min_index];
            (contact.body_a, contact.body_b)
        };

        let (Some(backup_a), Some(backup_b)) = (self.body_sweep(body_a), self.body_sweep(body_b))
        else {
            self.contact_manager.contacts[min_index].set_enabled(false);
            return;
        };

        self.advance_body(body_a, min_alpha);
        self.advance_body(body_b, min_alpha);

        // The TOI contact likely has some new contact points.
        self.update_contact(min_index);
        let contact = &mut self.contact_manager.contacts[min_index];
        contact.flags.remove(ContactFlags::TOI);
        contact.toi_count += 1;

        // Is the contact solid?
        if !contact.is_enabled() || !contact.is_touching() {
            // Restore the sweeps.
            contact.set_enabled(false);
            self.restore_sweep(body_a, backup_a);
            self.restore_sweep(body_b, backup_b);
            return;
        }
        contact.flags.insert(ContactFlags::ISLAND);

        // Build the island.
        let mut island_bodies = vec![body_a, body_b];
        let mut island_contacts = vec![min_index];

        for body in [body_a, body_b] {
            let Some((body_type, bullet, _)) = self.body_motion(body) else {
                continue;
            };
            if body_type != BodyType::Dynamic {
                continue;
            }

            for index in 0..self.contact_manager.contacts.len() {
                if island_contacts.len() == MAX_TOI_CONTACTS {
                    break;
                }

                let contact = &self.contact_manager.contacts[index];
                if contact.body_a != body && contact.body_b != body {
                    continue;
                }

                // Has this contact already been added to the island?
                if contact.flags.contains(ContactFlags::ISLAND) {
                    continue;
                }

                // Skip sensors.
                if contact.is_sensor() {
                    continue;
                }

                let other = if contact.body_a == body {
                    contact.body_b
                } else {
                    contact.body_a
                };

                // Only add static, kinematic, or bullet bodies.
                let Some((other_type, other_bullet, _)) = self.body_motion(other) else {
                    continue;
                };
                if other_type == BodyType::Dynamic && !bullet && !other_bullet {
                    continue;
                }

                // Tentatively advance the body to the TOI.
                let Some(backup) = self.body_sweep(other) else {
                    continue;
                };
                let in_island = island_bodies.contains(&other);
                if !in_island {
                    self.advance_body(other, min_alpha);
                }

                // Update the contact points.
                self.update_contact(index);

                let contact = &self.contact_manager.contacts[index];
                if !contact.is_enabled() || !contact.is_touching() {
                    self.restore_sweep(other, backup);
                    continue;
                }

                self.contact_manager.contacts[index]
                    .flags
                    .insert(ContactFlags::ISLAND);
                island_contacts.push(index);

                if !in_island {
                    island_bodies.push(other);
                }
            }
        }

        let dt = (1.0 - min_alpha) * step.dt;
        let sub_step = TimeStep {
            dt,
            inv_dt: if dt > 0.0 { 1.0 / dt } else { 0.0 },
            dt_ratio: 1.0,
            velocity_iterations: step.velocity_iterations,
            position_iterations: TOI_POSITION_ITERATIONS,
            warm_starting: false,
        };
        self.solve_toi_island(&sub_step, &island_bodies, &island_contacts);

        // Reset island flags and synchronize broad-phase proxies.
        for &body in &island_bodies {
            if !matches!(self.body_motion(body), Some((BodyType::Dynamic, _, _))) {
                continue;
            }

            self.synchronize_body_fixtures(body);

            // Invalidate all contact TOIs on this displaced body.
            for contact in &mut self.contact_manager.contacts {
                if contact.body_a == body || contact.body_b == body {
                    contact.flags.remove(ContactFlags::TOI);
                    contact.flags.remove(ContactFlags::ISLAND);
                }
            }
        }

        // Commit fixture proxy movements to the broad phase so that new
        // contacts are created. Also, some contacts can be destroyed.
        self.contact_manager.find_new_contacts(&self.registry);
    }

    /// Sub-step solve for a TOI island. Bodies 0 and 1 are the TOI pair.
    fn solve_toi_island(
        &mut self,
        sub_step: &TimeStep,
        bodies: &[hecs::Entity],
        contact_indices: &[usize],
    ) {
        let mut positions = Vec::with_capacity(bodies.len());
        let mut velocities = Vec::with_capacity(bodies.len());
        for &entity in bodies {
            let (position, velocity) = match self.registry.get::<&RigidBody>(entity) {
                Ok(body) => (
                    Position {
                        c: body.sweep.c,
                        a: body.sweep.a,
                    },
                    Velocity {
                        v: body.linear_velocity,
                        w: body.angular_velocity,
                    },
                ),
                Err(_) => (Position::default(), Velocity::default()),
            };
            positions.push(position);
            velocities.push(velocity);
        }

        let registry = &self.registry;
        let solver_contacts: Vec<SolverContact<'_>> = self
            .contact_manager
            .contacts
            .iter_mut()
            .enumerate()
            .filter(|(index, _)| contact_indices.contains(index))
            .filter_map(|(index, c)| {
                solver_contact(registry, index, c, |e| bodies.iter().position(|b| *b == e))
            })
            .collect();

        let mut solver = ContactSolver::new(*sub_step, solver_contacts);

        // Solve position constraints.
        for _ in 0..sub_step.position_iterations {
            if solver.solve_toi_position_constraints(&mut positions, 0, 1) {
                break;
            }
        }

        // Leap of faith to the new safe state.
        for (i, &entity) in bodies.iter().enumerate().take(2) {
            if let Ok(mut body) = registry.get::<&mut RigidBody>(entity) {
                body.sweep.c0 = positions[i].c;
                body.sweep.a0 = positions[i].a;
            }
        }

        // No warm starting is needed for TOI events because warm starting
        // impulses were applied in the discrete solver.
        solver.initialize_velocity_constraints(&positions, &velocities);

        for _ in 0..sub_step.velocity_iterations {
            solver.solve_velocity_constraints(&mut velocities);
        }

        // Don't store the TOI contact forces for warm starting because they
        // can be quite large.

        integrate_positions(&mut positions, &mut velocities, sub_step.dt);

        let impulses = solver.impulses();
        drop(solver);

        self.write_back(bodies, &positions, &velocities);
        self.report(&impulses);
    }

    fn write_back(&mut self, bodies: &[hecs::Entity], positions: &[Position], velocities: &[Velocity]) {
        for (i, &entity) in bodies.iter().enumerate() {
            if let Ok(mut body) = self.registry.get::<&mut RigidBody>(entity) {
                body.sweep.c = positions[i].c;
                body.sweep.a = positions[i].a;
                body.linear_velocity = velocities[i].v;
                body.angular_velocity = velocities[i].w;
                body.synchronize_transform();
            }
        }
    }

    fn report(&mut self, impulses: &[(usize, ContactImpulse)]) {
        let manager = &mut self.contact_manager;
        for (index, impulse) in impulses {
            if let Some(contact) = manager.contacts.get(*index) {
                manager.listener.post_solve(contact, impulse);
            }
        }
    }

    /// Move broad-phase proxies of every non-static body over its sweep.
    fn synchronize_fixtures(&mut self) {
        let registry = &self.registry;
        let broad_phase = &mut self.contact_manager.broad_phase;

        for (_, body) in registry.query::<&RigidBody>().iter() {
            if body.body_type == BodyType::Static {
                continue;
            }

            let xf1 = body.sweep_start_transform();
            for &fixture in &body.fixtures {
                if let Ok(mut fixture) = registry.get::<&mut Fixture>(fixture) {
                    fixture.synchronize(broad_phase, &xf1, &body.xf);
                }
            }
        }
    }

    fn synchronize_body_fixtures(&mut self, entity: hecs::Entity) {
        let Ok(body) = self.registry.get::<&RigidBody>(entity) else {
            return;
        };
        let xf1 = body.sweep_start_transform();
        for &fixture in &body.fixtures {
            if let Ok(mut fixture) = self.registry.get::<&mut Fixture>(fixture) {
                fixture.synchronize(&mut self.contact_manager.broad_phase, &xf1, &body.xf);
            }
        }
    }

    fn update_contact(&mut self, index: usize) {
        let contact = &self.contact_manager.contacts[index];
        let (Ok(fixture_a), Ok(fixture_b), Ok(body_a), Ok(body_b)) = (
            self.registry.get::<&Fixture>(contact.fixture_a),
            self.registry.get::<&Fixture>(contact.fixture_b),
            self.registry.get::<&RigidBody>(contact.body_a),
            self.registry.get::<&RigidBody>(contact.body_b),
        ) else {
            return;
        };

        let manager = &mut self.contact_manager;
        manager.contacts[index].update(
            fixture_a.shape(),
            body_a.transform(),
            fixture_b.shape(),
            body_b.transform(),
            manager.listener.as_mut(),
        );
    }

    fn remove_fixture(&mut self, fixture: hecs::Entity) -> Result<()> {
        self.contact_manager.destroy_fixture_contacts(fixture);
        self.registry
            .get::<&mut Fixture>(fixture)
            .with_context(|| format!("No fixture for entity {fixture:?}"))?
            .destroy_proxies(&mut self.contact_manager.broad_phase);
        self.registry
            .despawn(fixture)
            .with_context(|| format!("Failed to despawn fixture {fixture:?}"))?;
        Ok(())
    }

    fn body_motion(&self, entity: hecs::Entity) -> Option<(BodyType, bool, f32)> {
        let body = self.registry.get::<&RigidBody>(entity).ok()?;
        Some((body.body_type, body.bullet, body.sweep.alpha0))
    }

    fn body_sweep(&self, entity: hecs::Entity) -> Option<Sweep> {
        self.registry
            .get::<&RigidBody>(entity)
            .ok()
            .map(|body| body.sweep)
    }

    fn advance_body(&mut self, entity: hecs::Entity, alpha: f32) {
        if let Ok(mut body) = self.registry.get::<&mut RigidBody>(entity) {
            body.advance(alpha);
        }
    }

    fn restore_sweep(&mut self, entity: hecs::Entity, sweep: Sweep) {
        if let Ok(mut body) = self.registry.get::<&mut RigidBody>(entity) {
            body.sweep = sweep;
            body.synchronize_transform();
        }
    }

    fn clear_forces(&mut self) {
        for (_, body) in self.registry.query_mut::<&mut RigidBody>() {
            body.force = Vec2::ZERO;
            body.torque = 0.0;
        }
    }

    /// Report every fixture whose fat AABB overlaps `aabb`. Return `false`
    /// from the callback to stop.
    pub fn query_aabb<F>(&self, aabb: &Aabb, mut callback: F)
    where
        F: FnMut(hecs::Entity) -> bool,
    {
        let broad_phase = &self.contact_manager.broad_phase;
        broad_phase.query(aabb, |proxy_id| match broad_phase.user_data(proxy_id) {
            Some(key) => callback(key.fixture),
            None => true,
        });
    }

    /// Cast a ray from `p1` to `p2`.
    ///
    /// The callback receives the fixture, hit point, normal and fraction and
    /// returns the new max fraction: `0` stops, a negative value ignores the
    /// fixture, `1` continues unclipped, anything in between clips the ray.
    pub fn ray_cast<F>(&self, p1: Vec2, p2: Vec2, mut callback: F)
    where
        F: FnMut(hecs::Entity, Vec2, Vec2, f32) -> f32,
    {
        let registry = &self.registry;
        let broad_phase = &self.contact_manager.broad_phase;
        let input = RayCastInput {
            p1,
            p2,
            max_fraction: 1.0,
        };

        broad_phase.ray_cast(&input, |sub_input, proxy_id| {
            let Some(key) = broad_phase.user_data(proxy_id) else {
                return sub_input.max_fraction;
            };
            let Ok(fixture) = registry.get::<&Fixture>(key.fixture) else {
                return sub_input.max_fraction;
            };
            let Ok(body) = registry.get::<&RigidBody>(fixture.body()) else {
                return sub_input.max_fraction;
            };

            match fixture.ray_cast(sub_input, body.transform(), key.child_index) {
                Some(output) => {
                    let fraction = output.fraction;
                    let point = (1.0 - fraction) * p1 + fraction * p2;
                    callback(key.fixture, point, output.normal, fraction)
                }
                None => sub_input.max_fraction,
            }
        });
    }

    /// Move the world origin. Useful for large worlds.
    pub fn shift_origin(&mut self, new_origin: Vec2) {
        for (_, body) in self.registry.query_mut::<&mut RigidBody>() {
            body.xf.p -= new_origin;
            body.sweep.c0 -= new_origin;
            body.sweep.c -= new_origin;
        }

        for (_, fixture) in self.registry.query_mut::<&mut Fixture>() {
            for proxy in &mut fixture.proxies {
                proxy.aabb.min -= new_origin;
                proxy.aabb.max -= new_origin;
            }
        }

        self.contact_manager.broad_phase.shift_origin(new_origin);
    }
}

/// Gather what the solver needs from one contact and its two bodies.
fn solver_contact<'a>(
    registry: &hecs::World,
    contact_index: usize,
    contact: &'a mut Contact,
    index_of: impl Fn(hecs::Entity) -> Option<usize>,
) -> Option<SolverContact<'a>> {
    let index_a = index_of(contact.body_a)?;
    let index_b = index_of(contact.body_b)?;

    let body_a = registry.get::<&RigidBody>(contact.body_a).ok()?;
    let body_b = registry.get::<&RigidBody>(contact.body_b).ok()?;
    let radius_a = registry
        .get::<&Fixture>(contact.fixture_a)
        .ok()?
        .shape()
        .radius();
    let radius_b = registry
        .get::<&Fixture>(contact.fixture_b)
        .ok()?
        .shape()
        .radius();

    Some(SolverContact {
        contact_index,
        index_a,
        index_b,
        inv_mass_a: body_a.inv_mass,
        inv_mass_b: body_b.inv_mass,
        inv_i_a: body_a.inv_inertia,
        inv_i_b: body_b.inv_inertia,
        local_center_a: body_a.sweep.local_center,
        local_center_b: body_b.sweep.local_center,
        radius_a,
        radius_b,
        friction: contact.friction,
        restitution: contact.restitution,
        tangent_speed: contact.tangent_speed,
        manifold: &mut contact.manifold,
    })
}

/// Clamp large velocities, then integrate positions.
fn integrate_positions(positions: &mut [Position], velocities: &mut [Velocity], h: f32) {
    for (position, velocity) in positions.iter_mut().zip(velocities.iter_mut()) {
        let translation = h * velocity.v;
        if translation.length_squared() > MAX_TRANSLATION_SQUARED {
            velocity.v *= MAX_TRANSLATION / translation.length();
        }

        let rotation = h * velocity.w;
        if rotation * rotation > MAX_ROTATION_SQUARED {
            velocity.w *= MAX_ROTATION / rotation.abs();
        }

        position.c += h * velocity.v;
        position.a += h * velocity.w;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::collision::shapes::{CircleShape, EdgeShape, PolygonShape};
    use crate::settings::{LINEAR_SLOP, POLYGON_RADIUS};

    const DT: f32 = 1.0 / 60.0;

    fn ground_box(world: &mut World) -> hecs::Entity {
        let ground = world.create_body(&BodyDef::new_static(Vec2::ZERO));
        world
            .create_fixture(ground, FixtureDef::new(PolygonShape::new_box(10.0, 0.5)))
            .unwrap();
        ground
    }

    fn ball(world: &mut World, def: BodyDef, radius: f32) -> hecs::Entity {
        let body = world.create_body(&def);
        world
            .create_fixture(
                body,
                FixtureDef::new(CircleShape::new(Vec2::ZERO, radius)).with_density(1.0),
            )
            .unwrap();
        body
    }

    #[test]
    fn test_free_fall() {
        let mut world = World::default();
        let body = world.create_body(&BodyDef::new_dynamic(Vec2::new(0.0, 10.0)));

        for _ in 0..60 {
            world.fixed_step(DT);
        }

        let body = world.body(body).unwrap();
        // Semi-implicit Euler: y = y0 - g dt^2 n (n + 1) / 2
        let expected_y = 10.0 - 10.0 * DT * DT * 60.0 * 61.0 / 2.0;
        assert!(
            (body.linear_velocity.y + 10.0).abs() < 1e-3,
            "vy = {}",
            body.linear_velocity.y
        );
        assert!(
            (body.position().y - expected_y).abs() < 1e-3,
            "y = {}, expected {expected_y}",
            body.position().y
        );
    }

    #[test]
    fn test_step_uses_fixed_timestep() {
        let mut world = World::default();
        let body = world.create_body(&BodyDef::new_dynamic(Vec2::ZERO));

        world.step(1.0 / 30.0);

        let vy = world.body(body).unwrap().linear_velocity.y;
        assert!((vy + 2.0 * 10.0 / 60.0).abs() < 1e-5, "two substeps, vy = {vy}");
    }

    #[test]
    fn test_circle_comes_to_rest_on_box() {
        let mut world = World::default();
        ground_box(&mut world);
        let body = ball(&mut world, BodyDef::new_dynamic(Vec2::new(0.0, 2.0)), 0.5);

        for _ in 0..120 {
            world.fixed_step(DT);
        }

        let body = world.body(body).unwrap();
        let penetration = 0.5 + 0.5 + POLYGON_RADIUS - body.position().y;
        assert!(
            penetration > -LINEAR_SLOP && penetration < 3.0 * LINEAR_SLOP,
            "penetration = {penetration}"
        );
        assert!(
            body.linear_velocity.y.abs() < 0.05,
            "vy = {}",
            body.linear_velocity.y
        );
        assert_eq!(world.contact_count(), 1);
        assert!(world.contacts()[0].is_touching());
    }

    #[test]
    fn test_box_rests_on_edge() {
        let mut world = World::default();
        let ground = world.create_body(&BodyDef::new_static(Vec2::ZERO));
        world
            .create_fixture(
                ground,
                FixtureDef::new(EdgeShape::new(Vec2::new(-10.0, 0.0), Vec2::new(10.0, 0.0))),
            )
            .unwrap();

        let body = world.create_body(&BodyDef::new_dynamic(Vec2::new(0.0, 1.0)));
        world
            .create_fixture(
                body,
                FixtureDef::new(PolygonShape::new_box(0.5, 0.5)).with_density(1.0),
            )
            .unwrap();

        for _ in 0..120 {
            world.fixed_step(DT);
        }

        let body = world.body(body).unwrap();
        let penetration = 0.5 + 2.0 * POLYGON_RADIUS - body.position().y;
        assert!(
            penetration > -LINEAR_SLOP && penetration < 3.0 * LINEAR_SLOP,
            "penetration = {penetration}"
        );
        assert!(body.angle().abs() < 1e-2, "angle = {}", body.angle());
    }

    #[test]
    fn test_fast_ball_does_not_tunnel() {
        let mut world = World::new(PhysicsConfig {
            gravity: Vec2::ZERO,
            ..Default::default()
        });

        let wall = world.create_body(&BodyDef::new_static(Vec2::ZERO));
        world
            .create_fixture(wall, FixtureDef::new(PolygonShape::new_box(0.05, 5.0)))
            .unwrap();

        let body = ball(
            &mut world,
            BodyDef {
                linear_velocity: Vec2::new(600.0, 0.0),
                bullet: true,
                ..BodyDef::new_dynamic(Vec2::new(-5.0, 0.0))
            },
            0.25,
        );

        for _ in 0..20 {
            world.fixed_step(DT);
        }

        let x = world.body(body).unwrap().position().x;
        assert!(x < 0.0, "ball tunneled to x = {x}");
        assert!(world.toi_stats().calls > 0);
    }

    #[test]
    fn test_create_fixture_on_missing_body_fails() {
        let mut world = World::default();
        let body = world.create_body(&BodyDef::new_dynamic(Vec2::ZERO));
        world.destroy_body(body).unwrap();

        let result = world.create_fixture(body, FixtureDef::new(CircleShape::new(Vec2::ZERO, 1.0)));
        assert!(result.is_err());
    }

    #[test]
    fn test_destroy_body_removes_proxies_and_contacts() {
        let mut world = World::default();
        ground_box(&mut world);
        let body = ball(&mut world, BodyDef::new_dynamic(Vec2::new(0.0, 0.99)), 0.5);

        world.fixed_step(DT);
        assert_eq!(world.contact_count(), 1);
        assert_eq!(world.proxy_count(), 2);

        world.destroy_body(body).unwrap();
        assert_eq!(world.contact_count(), 0);
        assert_eq!(world.proxy_count(), 1);
        assert_eq!(world.body_count(), 1);
    }

    #[test]
    fn test_fixture_density_sets_mass() {
        let mut world = World::default();
        let body = ball(&mut world, BodyDef::new_dynamic(Vec2::ZERO), 1.0);

        let mass = world.body(body).unwrap().mass();
        assert!(
            (mass - std::f32::consts::PI).abs() < 1e-5,
            "unit circle at density 1, mass = {mass}"
        );
    }

    #[test]
    fn test_listener_sees_begin_contact() {
        struct Counter(Arc<AtomicUsize>);
        impl ContactListener for Counter {
            fn begin_contact(&mut self, _contact: &Contact) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let begins = Arc::new(AtomicUsize::new(0));
        let mut world = World::default();
        world.set_contact_listener(Counter(begins.clone()));
        ground_box(&mut world);
        ball(&mut world, BodyDef::new_dynamic(Vec2::new(0.0, 2.0)), 0.5);

        for _ in 0..60 {
            world.fixed_step(DT);
        }

        assert_eq!(begins.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_sensor_touches_without_response() {
        let mut world = World::default();
        let ground = world.create_body(&BodyDef::new_static(Vec2::ZERO));
        world
            .create_fixture(
                ground,
                FixtureDef::new(PolygonShape::new_box(10.0, 0.5)).sensor(),
            )
            .unwrap();
        let body = ball(&mut world, BodyDef::new_dynamic(Vec2::new(0.0, 1.2)), 0.5);

        for _ in 0..60 {
            world.fixed_step(DT);
        }

        assert!(world.body(body).unwrap().position().y < 0.0, "ball fell through the sensor");
    }

    #[test]
    fn test_query_aabb_and_ray_cast() {
        let mut world = World::default();
        ground_box(&mut world);
        let body = ball(&mut world, BodyDef::new_static(Vec2::new(0.0, 5.0)), 0.5);
        let ball_fixture = world.body(body).unwrap().fixtures()[0];

        let mut found = Vec::new();
        world.query_aabb(
            &Aabb::new(Vec2::new(-0.1, 4.9), Vec2::new(0.1, 5.1)),
            |fixture| {
                found.push(fixture);
                true
            },
        );
        assert_eq!(found, vec![ball_fixture]);

        // Closest hit along a downward ray from above the ball.
        let mut closest = None;
        world.ray_cast(Vec2::new(0.0, 10.0), Vec2::new(0.0, -10.0), |fixture, point, normal, fraction| {
            closest = Some((fixture, point, normal));
            fraction
        });
        let (fixture, point, normal) = closest.unwrap();
        assert_eq!(fixture, ball_fixture);
        assert!((point.y - 5.5).abs() < 1e-4, "hit at {point}");
        assert!((normal - Vec2::Y).length() < 1e-4);
    }

    #[test]
    fn test_shift_origin() {
        let mut world = World::default();
        let body = ball(&mut world, BodyDef::new_static(Vec2::new(100.0, 0.0)), 0.5);

        world.shift_origin(Vec2::new(100.0, 0.0));

        assert!(world.body(body).unwrap().position().length() < 1e-5);
        let mut hits = 0;
        world.query_aabb(&Aabb::new(Vec2::splat(-0.1), Vec2::splat(0.1)), |_| {
            hits += 1;
            true
        });
        assert_eq!(hits, 1);
    }
}
