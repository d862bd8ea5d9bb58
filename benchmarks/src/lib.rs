//! Shared setup helpers for impulse2d benchmarks.
//!
//! ## Running
//!
//! Wall-clock (criterion):
//!   cargo bench --manifest-path benchmarks/Cargo.toml --bench physics
//!
//! iai-callgrind (instruction counts, requires valgrind):
//!   cargo install iai-callgrind-runner
//!   cargo bench --manifest-path benchmarks/Cargo.toml --bench physics_iai
//!
//! Filter by group:
//!   cargo bench --manifest-path benchmarks/Cargo.toml --bench physics -- broadphase
//!   cargo bench --manifest-path benchmarks/Cargo.toml --bench physics -- world

use glam::Vec2;
use impulse2d::collision::broadphase::ProxyId;
use impulse2d::collision::narrowphase::collide_polygons;
use impulse2d::dynamics::{
    BodyDef, ContactSolver, FixtureDef, PhysicsConfig, Position, SolverContact, TimeStep,
    Velocity, World,
};
use impulse2d::{Aabb, BroadPhase, CircleShape, DynamicTree, Manifold, PolygonShape, Transform};

pub const DT: f32 = 1.0 / 60.0;

// ---------------------------------------------------------------------------
// Trees and broad phase
// ---------------------------------------------------------------------------

fn grid_aabb(i: usize, cols: usize, spacing: f32) -> Aabb {
    let center = Vec2::new((i % cols) as f32 * spacing, (i / cols) as f32 * spacing);
    Aabb::new(center - Vec2::splat(0.5), center + Vec2::splat(0.5))
}

/// `n` unit boxes on a grid. `spacing < 1` makes neighbours overlap.
pub fn setup_tree(n: usize, spacing: f32) -> DynamicTree<usize> {
    let cols = (n as f32).sqrt().ceil() as usize;
    let mut tree = DynamicTree::new();
    for i in 0..n {
        tree.create_proxy(grid_aabb(i, cols, spacing), i);
    }
    tree
}

/// Broad phase with `n` proxies on a grid, pairs already flushed.
///
/// `proxies[i]` is the proxy of grid cell `i`.
pub fn setup_broad_phase(n: usize, spacing: f32) -> (BroadPhase<usize>, Vec<ProxyId>) {
    let cols = (n as f32).sqrt().ceil() as usize;
    let mut broad_phase = BroadPhase::new();
    let proxies = (0..n)
        .map(|i| broad_phase.create_proxy(grid_aabb(i, cols, spacing), i))
        .collect();
    broad_phase.update_pairs(|_, _| {});
    (broad_phase, proxies)
}

/// Shift every proxy so the next `update_pairs` has a full move buffer.
pub fn move_all_proxies(
    broad_phase: &mut BroadPhase<usize>,
    proxies: &[ProxyId],
    spacing: f32,
    offset: Vec2,
) {
    let cols = (proxies.len() as f32).sqrt().ceil() as usize;
    for (i, &proxy_id) in proxies.iter().enumerate() {
        let aabb = grid_aabb(i, cols, spacing);
        let moved = Aabb::new(aabb.min + offset, aabb.max + offset);
        broad_phase.move_proxy(proxy_id, moved, offset);
    }
}

// ---------------------------------------------------------------------------
// Solver
// ---------------------------------------------------------------------------

/// A column of `n` boxes resting on each other, plus the static ground.
///
/// Body 0 is the ground; manifold `i` joins body `i` and body `i + 1`.
pub fn setup_stack_manifolds(n: usize) -> (Vec<Manifold>, Vec<Position>, Vec<Velocity>) {
    let ground = PolygonShape::new_box(5.0, 0.5);
    let cube = PolygonShape::new_box(0.5, 0.5);

    let mut positions = vec![Position {
        c: Vec2::ZERO,
        a: 0.0,
    }];
    let mut velocities = vec![Velocity::default()];
    let mut manifolds = Vec::with_capacity(n);

    for i in 0..n {
        let y = 0.995 + i as f32 * 0.995;
        positions.push(Position {
            c: Vec2::new(0.0, y),
            a: 0.0,
        });
        velocities.push(Velocity {
            v: Vec2::new(0.0, -DT * 10.0),
            w: 0.0,
        });

        let below = &positions[i];
        let xf_a = Transform::new(below.c, below.a);
        let xf_b = Transform::new(Vec2::new(0.0, y), 0.0);
        let shape_a = if i == 0 { &ground } else { &cube };
        manifolds.push(collide_polygons(shape_a, &xf_a, &cube, &xf_b));
    }

    (manifolds, positions, velocities)
}

/// One full solver pass over a stack built by [`setup_stack_manifolds`].
pub fn solve_stack(
    manifolds: &mut [Manifold],
    positions: &mut [Position],
    velocities: &mut [Velocity],
    iterations: u32,
) {
    let step = TimeStep {
        dt: DT,
        inv_dt: 1.0 / DT,
        dt_ratio: 1.0,
        velocity_iterations: iterations,
        position_iterations: 3,
        warm_starting: true,
    };

    let contacts = manifolds
        .iter_mut()
        .enumerate()
        .filter(|(_, m)| m.point_count > 0)
        .map(|(i, manifold)| SolverContact {
            manifold,
            contact_index: i,
            index_a: i,
            index_b: i + 1,
            inv_mass_a: if i == 0 { 0.0 } else { 1.0 },
            inv_mass_b: 1.0,
            inv_i_a: if i == 0 { 0.0 } else { 6.0 },
            inv_i_b: 6.0,
            local_center_a: Vec2::ZERO,
            local_center_b: Vec2::ZERO,
            radius_a: impulse2d::settings::POLYGON_RADIUS,
            radius_b: impulse2d::settings::POLYGON_RADIUS,
            friction: 0.6,
            restitution: 0.0,
            tangent_speed: 0.0,
        })
        .collect();

    let mut solver = ContactSolver::new(step, contacts);
    solver.initialize_velocity_constraints(positions, velocities);
    solver.warm_start(velocities);
    for _ in 0..step.velocity_iterations {
        solver.solve_velocity_constraints(velocities);
    }
    solver.store_impulses();
    for _ in 0..step.position_iterations {
        if solver.solve_position_constraints(positions) {
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// Worlds
// ---------------------------------------------------------------------------

fn add_ground(world: &mut World) -> anyhow::Result<hecs::Entity> {
    let ground = world.create_body(&BodyDef::new_static(Vec2::ZERO));
    world.create_fixture(ground, FixtureDef::new(PolygonShape::new_box(40.0, 0.5)))?;
    Ok(ground)
}

/// Classic box pyramid with `rows` rows on a static ground.
pub fn setup_pyramid(rows: usize) -> anyhow::Result<World> {
    let mut world = World::new(PhysicsConfig::default());
    add_ground(&mut world)?;

    let half = 0.5;
    for row in 0..rows {
        let count = rows - row;
        let y = half + 0.5 + row as f32 * 2.0 * half;
        let x0 = -(count as f32 - 1.0) * half * 1.125;
        for i in 0..count {
            let x = x0 + i as f32 * 2.0 * half * 1.125;
            let body = world.create_body(&BodyDef::new_dynamic(Vec2::new(x, y)));
            world.create_fixture(
                body,
                FixtureDef::new(PolygonShape::new_box(half, half)).with_density(1.0),
            )?;
        }
    }
    Ok(world)
}

/// `n` balls dropped in a loose grid above the ground.
pub fn setup_ball_rain(n: usize) -> anyhow::Result<World> {
    let mut world = World::new(PhysicsConfig::default());
    add_ground(&mut world)?;

    let cols = (n as f32).sqrt().ceil() as usize;
    for i in 0..n {
        let x = (i % cols) as f32 * 1.1 - cols as f32 * 0.55;
        let y = 2.0 + (i / cols) as f32 * 1.1;
        let body = world.create_body(&BodyDef::new_dynamic(Vec2::new(x, y)));
        world.create_fixture(
            body,
            FixtureDef::new(CircleShape::new(Vec2::ZERO, 0.5)).with_density(1.0),
        )?;
    }
    Ok(world)
}

/// Fast bullets fired at a thin wall, exercising time of impact.
pub fn setup_bullets(n: usize) -> anyhow::Result<World> {
    let mut world = World::new(PhysicsConfig {
        gravity: Vec2::ZERO,
        ..Default::default()
    });

    let wall = world.create_body(&BodyDef::new_static(Vec2::ZERO));
    world.create_fixture(wall, FixtureDef::new(PolygonShape::new_box(0.1, n as f32)))?;

    for i in 0..n {
        let body = world.create_body(&BodyDef {
            linear_velocity: Vec2::new(300.0, 0.0),
            bullet: true,
            ..BodyDef::new_dynamic(Vec2::new(-10.0, i as f32 * 2.0 - n as f32))
        });
        world.create_fixture(
            body,
            FixtureDef::new(CircleShape::new(Vec2::ZERO, 0.25)).with_density(1.0),
        )?;
    }
    Ok(world)
}

pub fn run_frames(world: &mut World, frames: usize) {
    for _ in 0..frames {
        world.fixed_step(DT);
    }
}
