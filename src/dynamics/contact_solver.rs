//! Sequential impulse contact solver with a 2x2 block solver for two-point
//! manifolds.
//!
//! Bodies are addressed by index into caller-owned [`Position`] and
//! [`Velocity`] arrays. Impulses are warm-started from, and written back to,
//! the manifolds the solver was built over.

use glam::{Mat2, Vec2};

use crate::collision::manifold::{Manifold, ManifoldType, WorldManifold};
use crate::math::{cross_sv, cross_vs, inverse22, Rot, Transform};
use crate::settings::{
    BAUMGARTE, LINEAR_SLOP, MAX_LINEAR_CORRECTION, MAX_MANIFOLD_POINTS, TOI_BAUMGARTE,
    VELOCITY_THRESHOLD,
};

use super::contact::ContactImpulse;

/// Ensure a reasonable condition number for the block solver.
const MAX_CONDITION_NUMBER: f32 = 1000.0;

/// Per-step solver parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeStep {
    pub dt: f32,
    /// Inverse time step (0 if `dt == 0`).
    pub inv_dt: f32,
    /// `dt * inv_dt0`, rescales warm-start impulses when the step changes.
    pub dt_ratio: f32,
    pub velocity_iterations: u32,
    pub position_iterations: u32,
    pub warm_starting: bool,
}

/// Center of mass position and angle.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub c: Vec2,
    pub a: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Velocity {
    pub v: Vec2,
    pub w: f32,
}

/// One touching contact handed to the solver.
#[derive(Debug)]
pub struct SolverContact<'a> {
    pub manifold: &'a mut Manifold,
    /// Caller tag echoed back by [`ContactSolver::impulses`].
    pub contact_index: usize,
    pub index_a: usize,
    pub index_b: usize,
    pub inv_mass_a: f32,
    pub inv_mass_b: f32,
    pub inv_i_a: f32,
    pub inv_i_b: f32,
    pub local_center_a: Vec2,
    pub local_center_b: Vec2,
    pub radius_a: f32,
    pub radius_b: f32,
    pub friction: f32,
    pub restitution: f32,
    pub tangent_speed: f32,
}

#[derive(Debug, Clone, Copy, Default)]
struct VelocityConstraintPoint {
    r_a: Vec2,
    r_b: Vec2,
    normal_impulse: f32,
    tangent_impulse: f32,
    normal_mass: f32,
    tangent_mass: f32,
    velocity_bias: f32,
}

#[derive(Debug, Clone, Copy)]
struct VelocityConstraint {
    points: [VelocityConstraintPoint; MAX_MANIFOLD_POINTS],
    normal: Vec2,
    normal_mass: Mat2,
    k: Mat2,
    index_a: usize,
    index_b: usize,
    inv_mass_a: f32,
    inv_mass_b: f32,
    inv_i_a: f32,
    inv_i_b: f32,
    friction: f32,
    restitution: f32,
    tangent_speed: f32,
    point_count: usize,
    contact_index: usize,
}

#[derive(Debug, Clone, Copy)]
struct PositionConstraint {
    local_points: [Vec2; MAX_MANIFOLD_POINTS],
    local_normal: Vec2,
    local_point: Vec2,
    index_a: usize,
    index_b: usize,
    inv_mass_a: f32,
    inv_mass_b: f32,
    local_center_a: Vec2,
    local_center_b: Vec2,
    inv_i_a: f32,
    inv_i_b: f32,
    manifold_type: ManifoldType,
    radius_a: f32,
    radius_b: f32,
    point_count: usize,
}

impl PositionConstraint {
    /// World normal, contact point and separation for point `index`.
    fn evaluate(&self, xf_a: &Transform, xf_b: &Transform, index: usize) -> (Vec2, Vec2, f32) {
        debug_assert!(self.point_count > 0);

        match self.manifold_type {
            ManifoldType::Circles => {
                let point_a = xf_a.transform_point(self.local_point);
                let point_b = xf_b.transform_point(self.local_points[0]);
                let normal = (point_b - point_a).normalize_or_zero();
                let point = 0.5 * (point_a + point_b);
                let separation = (point_b - point_a).dot(normal) - self.radius_a - self.radius_b;
                (normal, point, separation)
            }
            ManifoldType::FaceA => {
                let normal = xf_a.q.rotate(self.local_normal);
                let plane_point = xf_a.transform_point(self.local_point);
                let clip_point = xf_b.transform_point(self.local_points[index]);
                let separation =
                    (clip_point - plane_point).dot(normal) - self.radius_a - self.radius_b;
                (normal, clip_point, separation)
            }
            ManifoldType::FaceB => {
                let normal = xf_b.q.rotate(self.local_normal);
                let plane_point = xf_b.transform_point(self.local_point);
                let clip_point = xf_a.transform_point(self.local_points[index]);
                let separation =
                    (clip_point - plane_point).dot(normal) - self.radius_a - self.radius_b;
                // Ensure normal points from A to B
                (-normal, clip_point, separation)
            }
        }
    }
}

fn body_transform(position: &Position, local_center: Vec2) -> Transform {
    let q = Rot::from_angle(position.a);
    Transform {
        p: position.c - q.rotate(local_center),
        q,
    }
}

/// Solver state for one group of contacts.
pub struct ContactSolver<'a> {
    manifolds: Vec<&'a mut Manifold>,
    velocity_constraints: Vec<VelocityConstraint>,
    position_constraints: Vec<PositionConstraint>,
}

impl<'a> ContactSolver<'a> {
    pub fn new(step: TimeStep, contacts: Vec<SolverContact<'a>>) -> Self {
        let mut manifolds = Vec::with_capacity(contacts.len());
        let mut velocity_constraints = Vec::with_capacity(contacts.len());
        let mut position_constraints = Vec::with_capacity(contacts.len());

        for contact in contacts {
            let manifold = contact.manifold;
            let point_count = manifold.point_count;
            assert!(point_count > 0, "solver contact has an empty manifold");

            let mut vc = VelocityConstraint {
                points: [VelocityConstraintPoint::default(); MAX_MANIFOLD_POINTS],
                normal: Vec2::ZERO,
                normal_mass: Mat2::ZERO,
                k: Mat2::ZERO,
                index_a: contact.index_a,
                index_b: contact.index_b,
                inv_mass_a: contact.inv_mass_a,
                inv_mass_b: contact.inv_mass_b,
                inv_i_a: contact.inv_i_a,
                inv_i_b: contact.inv_i_b,
                friction: contact.friction,
                restitution: contact.restitution,
                tangent_speed: contact.tangent_speed,
                point_count,
                contact_index: contact.contact_index,
            };

            let mut pc = PositionConstraint {
                local_points: [Vec2::ZERO; MAX_MANIFOLD_POINTS],
                local_normal: manifold.local_normal,
                local_point: manifold.local_point,
                index_a: contact.index_a,
                index_b: contact.index_b,
                inv_mass_a: contact.inv_mass_a,
                inv_mass_b: contact.inv_mass_b,
                local_center_a: contact.local_center_a,
                local_center_b: contact.local_center_b,
                inv_i_a: contact.inv_i_a,
                inv_i_b: contact.inv_i_b,
                manifold_type: manifold.manifold_type,
                radius_a: contact.radius_a,
                radius_b: contact.radius_b,
                point_count,
            };

            for (j, cp) in manifold.points().iter().enumerate() {
                let vcp = &mut vc.points[j];
                if step.warm_starting {
                    vcp.normal_impulse = step.dt_ratio * cp.normal_impulse;
                    vcp.tangent_impulse = step.dt_ratio * cp.tangent_impulse;
                }
                pc.local_points[j] = cp.local_point;
            }

            velocity_constraints.push(vc);
            position_constraints.push(pc);
            manifolds.push(manifold);
        }

        Self {
            manifolds,
            velocity_constraints,
            position_constraints,
        }
    }

    pub fn constraint_count(&self) -> usize {
        self.velocity_constraints.len()
    }

    /// Anchors, effective masses and restitution bias from the current state.
    pub fn initialize_velocity_constraints(
        &mut self,
        positions: &[Position],
        velocities: &[Velocity],
    ) {
        for ((vc, pc), manifold) in self
            .velocity_constraints
            .iter_mut()
            .zip(&self.position_constraints)
            .zip(&self.manifolds)
        {
            let m_a = vc.inv_mass_a;
            let m_b = vc.inv_mass_b;
            let i_a = vc.inv_i_a;
            let i_b = vc.inv_i_b;

            let c_a = positions[vc.index_a].c;
            let v_a = velocities[vc.index_a].v;
            let w_a = velocities[vc.index_a].w;

            let c_b = positions[vc.index_b].c;
            let v_b = velocities[vc.index_b].v;
            let w_b = velocities[vc.index_b].w;

            debug_assert!(manifold.point_count > 0);

            let xf_a = body_transform(&positions[vc.index_a], pc.local_center_a);
            let xf_b = body_transform(&positions[vc.index_b], pc.local_center_b);

            let world_manifold =
                WorldManifold::new(manifold, &xf_a, pc.radius_a, &xf_b, pc.radius_b);

            vc.normal = world_manifold.normal;
            let tangent = cross_vs(vc.normal, 1.0);

            for j in 0..vc.point_count {
                let vcp = &mut vc.points[j];

                vcp.r_a = world_manifold.points[j] - c_a;
                vcp.r_b = world_manifold.points[j] - c_b;

                let rn_a = vcp.r_a.perp_dot(vc.normal);
                let rn_b = vcp.r_b.perp_dot(vc.normal);

                let k_normal = m_a + m_b + i_a * rn_a * rn_a + i_b * rn_b * rn_b;
                vcp.normal_mass = if k_normal > 0.0 { 1.0 / k_normal } else { 0.0 };

                let rt_a = vcp.r_a.perp_dot(tangent);
                let rt_b = vcp.r_b.perp_dot(tangent);

                let k_tangent = m_a + m_b + i_a * rt_a * rt_a + i_b * rt_b * rt_b;
                vcp.tangent_mass = if k_tangent > 0.0 { 1.0 / k_tangent } else { 0.0 };

                // Setup a velocity bias for restitution.
                vcp.velocity_bias = 0.0;
                let v_rel = vc
                    .normal
                    .dot(v_b + cross_sv(w_b, vcp.r_b) - v_a - cross_sv(w_a, vcp.r_a));
                if v_rel < -VELOCITY_THRESHOLD {
                    vcp.velocity_bias = -vc.restitution * v_rel;
                }
            }

            // If we have two points, then prepare the block solver.
            if vc.point_count == 2 {
                let vcp1 = &vc.points[0];
                let vcp2 = &vc.points[1];

                let rn1_a = vcp1.r_a.perp_dot(vc.normal);
                let rn1_b = vcp1.r_b.perp_dot(vc.normal);
                let rn2_a = vcp2.r_a.perp_dot(vc.normal);
                let rn2_b = vcp2.r_b.perp_dot(vc.normal);

                let k11 = m_a + m_b + i_a * rn1_a * rn1_a + i_b * rn1_b * rn1_b;
                let k22 = m_a + m_b + i_a * rn2_a * rn2_a + i_b * rn2_b * rn2_b;
                let k12 = m_a + m_b + i_a * rn1_a * rn2_a + i_b * rn1_b * rn2_b;

                if k11 * k11 < MAX_CONDITION_NUMBER * (k11 * k22 - k12 * k12) {
                    // K is safe to invert.
                    vc.k = Mat2::from_cols(Vec2::new(k11, k12), Vec2::new(k12, k22));
                    vc.normal_mass = inverse22(vc.k);
                } else {
                    // The constraints are redundant, just use one.
                    vc.point_count = 1;
                }
            }
        }
    }

    /// Apply the previous step's impulses.
    pub fn warm_start(&self, velocities: &mut [Velocity]) {
        for vc in &self.velocity_constraints {
            let m_a = vc.inv_mass_a;
            let i_a = vc.inv_i_a;
            let m_b = vc.inv_mass_b;
            let i_b = vc.inv_i_b;

            let mut v_a = velocities[vc.index_a].v;
            let mut w_a = velocities[vc.index_a].w;
            let mut v_b = velocities[vc.index_b].v;
            let mut w_b = velocities[vc.index_b].w;

            let normal = vc.normal;
            let tangent = cross_vs(normal, 1.0);

            for vcp in &vc.points[..vc.point_count] {
                let p = vcp.normal_impulse * normal + vcp.tangent_impulse * tangent;
                w_a -= i_a * vcp.r_a.perp_dot(p);
                v_a -= m_a * p;
                w_b += i_b * vcp.r_b.perp_dot(p);
                v_b += m_b * p;
            }

            velocities[vc.index_a] = Velocity { v: v_a, w: w_a };
            velocities[vc.index_b] = Velocity { v: v_b, w: w_b };
        }
    }

    /// One sequential impulse sweep: friction first, then the normal
    /// constraints.
    pub fn solve_velocity_constraints(&mut self, velocities: &mut [Velocity]) {
        for vc in &mut self.velocity_constraints {
            let m_a = vc.inv_mass_a;
            let i_a = vc.inv_i_a;
            let m_b = vc.inv_mass_b;
            let i_b = vc.inv_i_b;

            let mut v_a = velocities[vc.index_a].v;
            let mut w_a = velocities[vc.index_a].w;
            let mut v_b = velocities[vc.index_b].v;
            let mut w_b = velocities[vc.index_b].w;

            let normal = vc.normal;
            let tangent = cross_vs(normal, 1.0);
            let friction = vc.friction;

            debug_assert!(vc.point_count == 1 || vc.point_count == 2);

            // Solve tangent constraints first because non-penetration is more
            // important than friction.
            for vcp in &mut vc.points[..vc.point_count] {
                // Relative velocity at contact
                let dv = v_b + cross_sv(w_b, vcp.r_b) - v_a - cross_sv(w_a, vcp.r_a);

                // Compute tangent force
                let vt = dv.dot(tangent) - vc.tangent_speed;
                let lambda = vcp.tangent_mass * (-vt);

                // Clamp against the normal impulse from the previous iteration.
                let max_friction = friction * vcp.normal_impulse;
                let new_impulse =
                    (vcp.tangent_impulse + lambda).clamp(-max_friction, max_friction);
                let lambda = new_impulse - vcp.tangent_impulse;
                vcp.tangent_impulse = new_impulse;

                // Apply contact impulse
                let p = lambda * tangent;

                v_a -= m_a * p;
                w_a -= i_a * vcp.r_a.perp_dot(p);

                v_b += m_b * p;
                w_b += i_b * vcp.r_b.perp_dot(p);
            }

            if vc.point_count == 1 {
                let vcp = &mut vc.points[0];

                // Relative velocity at contact
                let dv = v_b + cross_sv(w_b, vcp.r_b) - v_a - cross_sv(w_a, vcp.r_a);

                // Compute normal impulse
                let vn = dv.dot(normal);
                let lambda = -vcp.normal_mass * (vn - vcp.velocity_bias);

                // Clamp the accumulated impulse
                let new_impulse = (vcp.normal_impulse + lambda).max(0.0);
                let lambda = new_impulse - vcp.normal_impulse;
                vcp.normal_impulse = new_impulse;

                // Apply contact impulse
                let p = lambda * normal;
                v_a -= m_a * p;
                w_a -= i_a * vcp.r_a.perp_dot(p);

                v_b += m_b * p;
                w_b += i_b * vcp.r_b.perp_dot(p);
            } else {
                // Block solver for the two-point LCP
                //
                //   vn = A * x + b, vn >= 0, x >= 0 and vn_i * x_i = 0 with i = 1..2
                //
                // Solved incrementally against the accumulated impulse `a`,
                // x = a + d, so that vn = A * x + b', b' = b - A * a. The
                // four cases are enumerated in order and the first one that
                // satisfies the complementarity conditions wins.
                let (cp1, cp2) = (vc.points[0], vc.points[1]);

                let a = Vec2::new(cp1.normal_impulse, cp2.normal_impulse);
                debug_assert!(a.x >= 0.0 && a.y >= 0.0);

                // Relative velocity at contact
                let dv1 = v_b + cross_sv(w_b, cp1.r_b) - v_a - cross_sv(w_a, cp1.r_a);
                let dv2 = v_b + cross_sv(w_b, cp2.r_b) - v_a - cross_sv(w_a, cp2.r_a);

                // Compute normal velocity
                let vn1 = dv1.dot(normal);
                let vn2 = dv2.dot(normal);

                // Compute b'
                let b = Vec2::new(vn1 - cp1.velocity_bias, vn2 - cp2.velocity_bias) - vc.k * a;

                let candidates = [
                    // Case 1: both constraints active, vn = 0.
                    {
                        let x = -(vc.normal_mass * b);
                        (x, x.x >= 0.0 && x.y >= 0.0)
                    },
                    // Case 2: x2 = 0, vn1 = 0.
                    {
                        let x = Vec2::new(-cp1.normal_mass * b.x, 0.0);
                        let vn2 = vc.k.x_axis.y * x.x + b.y;
                        (x, x.x >= 0.0 && vn2 >= 0.0)
                    },
                    // Case 3: x1 = 0, vn2 = 0.
                    {
                        let x = Vec2::new(0.0, -cp2.normal_mass * b.y);
                        let vn1 = vc.k.y_axis.x * x.y + b.x;
                        (x, x.y >= 0.0 && vn1 >= 0.0)
                    },
                    // Case 4: x1 = x2 = 0.
                    (Vec2::ZERO, b.x >= 0.0 && b.y >= 0.0),
                ];

                match candidates.iter().find(|(_, ok)| *ok) {
                    Some(&(x, _)) => {
                        // Get the incremental impulse
                        let d = x - a;

                        // Apply incremental impulse
                        let p1 = d.x * normal;
                        let p2 = d.y * normal;
                        v_a -= m_a * (p1 + p2);
                        w_a -= i_a * (cp1.r_a.perp_dot(p1) + cp2.r_a.perp_dot(p2));

                        v_b += m_b * (p1 + p2);
                        w_b += i_b * (cp1.r_b.perp_dot(p1) + cp2.r_b.perp_dot(p2));

                        // Accumulate
                        vc.points[0].normal_impulse = x.x;
                        vc.points[1].normal_impulse = x.y;
                    }
                    None => {
                        // No solution, give up. This is hit sometimes, but it
                        // doesn't seem to matter.
                        tracing::trace!(
                            "Block solver found no solution for contact {}",
                            vc.contact_index
                        );
                    }
                }
            }

            velocities[vc.index_a] = Velocity { v: v_a, w: w_a };
            velocities[vc.index_b] = Velocity { v: v_b, w: w_b };
        }
    }

    /// Write accumulated impulses back to the manifolds for warm starting.
    pub fn store_impulses(&mut self) {
        for (vc, manifold) in self.velocity_constraints.iter().zip(self.manifolds.iter_mut()) {
            for (j, vcp) in vc.points[..vc.point_count].iter().enumerate() {
                manifold.points[j].normal_impulse = vcp.normal_impulse;
                manifold.points[j].tangent_impulse = vcp.tangent_impulse;
            }
        }
    }

    /// Impulses for post-solve reporting, tagged with the caller's contact index.
    pub fn impulses(&self) -> Vec<(usize, ContactImpulse)> {
        self.velocity_constraints
            .iter()
            .map(|vc| {
                let mut impulse = ContactImpulse {
                    count: vc.point_count,
                    ..Default::default()
                };
                for (j, vcp) in vc.points[..vc.point_count].iter().enumerate() {
                    impulse.normal_impulses[j] = vcp.normal_impulse;
                    impulse.tangent_impulses[j] = vcp.tangent_impulse;
                }
                (vc.contact_index, impulse)
            })
            .collect()
    }

    /// Non-linear Gauss-Seidel position correction. Returns true when the
    /// worst overlap is within tolerance.
    pub fn solve_position_constraints(&self, positions: &mut [Position]) -> bool {
        let mut min_separation: f32 = 0.0;

        for pc in &self.position_constraints {
            let separation = Self::solve_position_constraint(
                pc,
                positions,
                (pc.inv_mass_a, pc.inv_i_a),
                (pc.inv_mass_b, pc.inv_i_b),
                BAUMGARTE,
            );
            min_separation = min_separation.min(separation);
        }

        // We can't expect min_separation >= -LINEAR_SLOP because we don't
        // push the separation above -LINEAR_SLOP.
        min_separation >= -3.0 * LINEAR_SLOP
    }

    /// Position correction for a time-of-impact sub-step. Only the two TOI
    /// bodies move, every other body acts as if it had infinite mass.
    pub fn solve_toi_position_constraints(
        &self,
        positions: &mut [Position],
        toi_index_a: usize,
        toi_index_b: usize,
    ) -> bool {
        let mut min_separation: f32 = 0.0;

        let is_toi_body = |index: usize| index == toi_index_a || index == toi_index_b;

        for pc in &self.position_constraints {
            let mass_a = if is_toi_body(pc.index_a) {
                (pc.inv_mass_a, pc.inv_i_a)
            } else {
                (0.0, 0.0)
            };
            let mass_b = if is_toi_body(pc.index_b) {
                (pc.inv_mass_b, pc.inv_i_b)
            } else {
                (0.0, 0.0)
            };

            let separation =
                Self::solve_position_constraint(pc, positions, mass_a, mass_b, TOI_BAUMGARTE);
            min_separation = min_separation.min(separation);
        }

        // We can't expect min_separation >= -LINEAR_SLOP because we don't
        // push the separation above -LINEAR_SLOP.
        min_separation >= -1.5 * LINEAR_SLOP
    }

    /// Push one constraint apart and return its smallest separation.
    fn solve_position_constraint(
        pc: &PositionConstraint,
        positions: &mut [Position],
        (m_a, i_a): (f32, f32),
        (m_b, i_b): (f32, f32),
        baumgarte: f32,
    ) -> f32 {
        let mut min_separation = f32::MAX;

        let mut pos_a = positions[pc.index_a];
        let mut pos_b = positions[pc.index_b];

        // Solve normal constraints
        for j in 0..pc.point_count {
            let xf_a = body_transform(&pos_a, pc.local_center_a);
            let xf_b = body_transform(&pos_b, pc.local_center_b);

            let (normal, point, separation) = pc.evaluate(&xf_a, &xf_b, j);

            let r_a = point - pos_a.c;
            let r_b = point - pos_b.c;

            // Track max constraint error.
            min_separation = min_separation.min(separation);

            // Prevent large corrections and allow slop.
            let c = (baumgarte * (separation + LINEAR_SLOP)).clamp(-MAX_LINEAR_CORRECTION, 0.0);

            // Compute the effective mass.
            let rn_a = r_a.perp_dot(normal);
            let rn_b = r_b.perp_dot(normal);
            let k = m_a + m_b + i_a * rn_a * rn_a + i_b * rn_b * rn_b;

            // Compute normal impulse
            let impulse = if k > 0.0 { -c / k } else { 0.0 };

            let p = impulse * normal;

            pos_a.c -= m_a * p;
            pos_a.a -= i_a * r_a.perp_dot(p);

            pos_b.c += m_b * p;
            pos_b.a += i_b * r_b.perp_dot(p);
        }

        positions[pc.index_a] = pos_a;
        positions[pc.index_b] = pos_b;

        min_separation
    }
}
