//! Time of impact by conservative advancement.
//!
//! Each outer iteration runs GJK at the current time `t1`, builds a
//! separating axis from the witness configuration and pushes `t1` forward to
//! where that axis predicts the target separation. Rotation is handled by
//! evaluating the axis on interpolated transforms.

use glam::Vec2;

use crate::math::{cross_vs, Sweep, Transform};
use crate::settings::{
    LINEAR_SLOP, MAX_POLYGON_VERTICES, MAX_TOI_ITERATIONS, MAX_TOI_ROOT_ITERATIONS,
};

use super::distance::{distance, DistanceInput, DistanceProxy, SimplexCache};

/// Input for [`time_of_impact`].
#[derive(Debug, Clone, Copy)]
pub struct ToiInput {
    pub proxy_a: DistanceProxy,
    pub proxy_b: DistanceProxy,
    pub sweep_a: Sweep,
    pub sweep_b: Sweep,
    /// Sweep interval is `[0, t_max]`.
    pub t_max: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToiState {
    #[default]
    Unknown,
    Failed,
    Overlapped,
    Touching,
    Separated,
}

/// Result of [`time_of_impact`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ToiOutput {
    pub state: ToiState,
    pub t: f32,
    /// Outer (advancement) iterations used.
    pub iterations: u32,
    /// Root-finder iterations summed over the whole query.
    pub root_iterations: u32,
}

/// Running totals over many TOI queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ToiStats {
    pub calls: u32,
    pub iters: u32,
    pub max_iters: u32,
    pub root_iters: u32,
    pub max_root_iters: u32,
}

impl ToiStats {
    pub fn record(&mut self, output: &ToiOutput) {
        self.calls += 1;
        self.iters += output.iterations;
        self.max_iters = self.max_iters.max(output.iterations);
        self.root_iters += output.root_iterations;
        self.max_root_iters = self.max_root_iters.max(output.root_iterations);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SeparationKind {
    Points,
    FaceA,
    FaceB,
}

/// Separating axis frozen at `t1`, evaluated along the sweeps.
struct SeparationFunction<'a> {
    proxy_a: &'a DistanceProxy,
    proxy_b: &'a DistanceProxy,
    sweep_a: Sweep,
    sweep_b: Sweep,
    kind: SeparationKind,
    local_point: Vec2,
    axis: Vec2,
}

impl<'a> SeparationFunction<'a> {
    fn new(
        cache: &SimplexCache,
        proxy_a: &'a DistanceProxy,
        sweep_a: Sweep,
        proxy_b: &'a DistanceProxy,
        sweep_b: Sweep,
        t1: f32,
    ) -> Self {
        debug_assert!(0 < cache.count && cache.count < 3);

        let xf_a = sweep_a.transform_at(t1);
        let xf_b = sweep_b.transform_at(t1);

        let mut f = Self {
            proxy_a,
            proxy_b,
            sweep_a,
            sweep_b,
            kind: SeparationKind::Points,
            local_point: Vec2::ZERO,
            axis: Vec2::ZERO,
        };

        if cache.count == 1 {
            let point_a = xf_a.transform_point(proxy_a.vertex(cache.index_a[0]));
            let point_b = xf_b.transform_point(proxy_b.vertex(cache.index_b[0]));
            f.axis = (point_b - point_a).normalize_or_zero();
        } else if cache.index_a[0] == cache.index_a[1] {
            // Two points on B and one on A.
            f.kind = SeparationKind::FaceB;
            let local_b1 = proxy_b.vertex(cache.index_b[0]);
            let local_b2 = proxy_b.vertex(cache.index_b[1]);

            f.axis = cross_vs(local_b2 - local_b1, 1.0).normalize_or_zero();
            let normal = xf_b.q.rotate(f.axis);

            f.local_point = 0.5 * (local_b1 + local_b2);
            let point_b = xf_b.transform_point(f.local_point);
            let point_a = xf_a.transform_point(proxy_a.vertex(cache.index_a[0]));

            if (point_a - point_b).dot(normal) < 0.0 {
                f.axis = -f.axis;
            }
        } else {
            // Two points on A and one or two points on B.
            f.kind = SeparationKind::FaceA;
            let local_a1 = proxy_a.vertex(cache.index_a[0]);
            let local_a2 = proxy_a.vertex(cache.index_a[1]);

            f.axis = cross_vs(local_a2 - local_a1, 1.0).normalize_or_zero();
            let normal = xf_a.q.rotate(f.axis);

            f.local_point = 0.5 * (local_a1 + local_a2);
            let point_a = xf_a.transform_point(f.local_point);
            let point_b = xf_b.transform_point(proxy_b.vertex(cache.index_b[0]));

            if (point_b - point_a).dot(normal) < 0.0 {
                f.axis = -f.axis;
            }
        }

        f
    }

    fn transforms(&self, t: f32) -> (Transform, Transform) {
        (self.sweep_a.transform_at(t), self.sweep_b.transform_at(t))
    }

    /// Deepest points along the axis at time `t`. Returns the separation and
    /// the support indices; the index on the face side is unused.
    fn find_min_separation(&self, t: f32) -> (f32, usize, usize) {
        let (xf_a, xf_b) = self.transforms(t);

        match self.kind {
            SeparationKind::Points => {
                let axis_a = xf_a.q.inv_rotate(self.axis);
                let axis_b = xf_b.q.inv_rotate(-self.axis);

                let index_a = self.proxy_a.support(axis_a);
                let index_b = self.proxy_b.support(axis_b);

                let point_a = xf_a.transform_point(self.proxy_a.vertex(index_a));
                let point_b = xf_b.transform_point(self.proxy_b.vertex(index_b));

                ((point_b - point_a).dot(self.axis), index_a, index_b)
            }
            SeparationKind::FaceA => {
                let normal = xf_a.q.rotate(self.axis);
                let point_a = xf_a.transform_point(self.local_point);

                let axis_b = xf_b.q.inv_rotate(-normal);
                let index_b = self.proxy_b.support(axis_b);
                let point_b = xf_b.transform_point(self.proxy_b.vertex(index_b));

                ((point_b - point_a).dot(normal), 0, index_b)
            }
            SeparationKind::FaceB => {
                let normal = xf_b.q.rotate(self.axis);
                let point_b = xf_b.transform_point(self.local_point);

                let axis_a = xf_a.q.inv_rotate(-normal);
                let index_a = self.proxy_a.support(axis_a);
                let point_a = xf_a.transform_point(self.proxy_a.vertex(index_a));

                ((point_a - point_b).dot(normal), index_a, 0)
            }
        }
    }

    /// Separation of the given support points along the axis at time `t`.
    fn evaluate(&self, index_a: usize, index_b: usize, t: f32) -> f32 {
        let (xf_a, xf_b) = self.transforms(t);

        match self.kind {
            SeparationKind::Points => {
                let point_a = xf_a.transform_point(self.proxy_a.vertex(index_a));
                let point_b = xf_b.transform_point(self.proxy_b.vertex(index_b));
                (point_b - point_a).dot(self.axis)
            }
            SeparationKind::FaceA => {
                let normal = xf_a.q.rotate(self.axis);
                let point_a = xf_a.transform_point(self.local_point);
                let point_b = xf_b.transform_point(self.proxy_b.vertex(index_b));
                (point_b - point_a).dot(normal)
            }
            SeparationKind::FaceB => {
                let normal = xf_b.q.rotate(self.axis);
                let point_b = xf_b.transform_point(self.local_point);
                let point_a = xf_a.transform_point(self.proxy_a.vertex(index_a));
                (point_a - point_b).dot(normal)
            }
        }
    }
}

/// Upper bound on the time in `[0, t_max]` at which the two swept proxies
/// first reach the target separation.
///
/// The target is slightly less than the sum of the skin radii so the
/// position solver still sees a small overlap after advancing. The query is
/// conservative: it may miss a collision when the motion is very fast and
/// rotational, but it never reports a time after the true impact.
pub fn time_of_impact(input: &ToiInput) -> ToiOutput {
    let mut output = ToiOutput {
        state: ToiState::Unknown,
        t: input.t_max,
        iterations: 0,
        root_iterations: 0,
    };

    let proxy_a = &input.proxy_a;
    let proxy_b = &input.proxy_b;

    let mut sweep_a = input.sweep_a;
    let mut sweep_b = input.sweep_b;

    // Large rotations can make the root finder fail, so normalize the sweep angles.
    sweep_a.normalize();
    sweep_b.normalize();

    let t_max = input.t_max;

    let total_radius = proxy_a.radius + proxy_b.radius;
    let target = LINEAR_SLOP.max(total_radius - 3.0 * LINEAR_SLOP);
    let tolerance = 0.25 * LINEAR_SLOP;
    debug_assert!(target > tolerance);

    let mut t1 = 0.0;
    let mut cache = SimplexCache::default();

    // The outer loop progressively attempts to compute new separating axes.
    loop {
        let xf_a = sweep_a.transform_at(t1);
        let xf_b = sweep_b.transform_at(t1);

        // Get the distance between shapes. Radii are excluded so the core
        // shapes stay apart.
        let distance_input = DistanceInput {
            proxy_a: *proxy_a,
            proxy_b: *proxy_b,
            transform_a: xf_a,
            transform_b: xf_b,
            use_radii: false,
        };
        let distance_output = distance(&mut cache, &distance_input);

        // If the shapes are overlapped, we give up on continuous collision.
        if distance_output.distance <= 0.0 {
            output.state = ToiState::Overlapped;
            output.t = 0.0;
            break;
        }

        if distance_output.distance < target + tolerance {
            // Victory!
            output.state = ToiState::Touching;
            output.t = t1;
            break;
        }

        let fcn = SeparationFunction::new(&cache, proxy_a, sweep_a, proxy_b, sweep_b, t1);

        // Resolve the deepest point on the separating axis. Multiple deepest
        // points may appear as the shapes rotate, hence the inner loop.
        let mut done = false;
        let mut t2 = t_max;
        let mut push_back_iter = 0;
        loop {
            let (mut s2, index_a, index_b) = fcn.find_min_separation(t2);

            // Is the final configuration separated?
            if s2 > target + tolerance {
                output.state = ToiState::Separated;
                output.t = t_max;
                done = true;
                break;
            }

            // Has the separation reached tolerance?
            if s2 > target - tolerance {
                // Advance the sweeps
                t1 = t2;
                break;
            }

            let mut s1 = fcn.evaluate(index_a, index_b, t1);

            // Initial overlap along this axis means the root finder has no bracket.
            if s1 < target - tolerance {
                output.state = ToiState::Failed;
                output.t = t1;
                done = true;
                break;
            }

            // Touching at the start of the interval.
            if s1 <= target + tolerance {
                output.state = ToiState::Touching;
                output.t = t1;
                done = true;
                break;
            }

            // Compute 1D root of: f(x) - target = 0
            let mut root_iter = 0;
            let mut a1 = t1;
            let mut a2 = t2;
            loop {
                // Alternate secant and bisection for guaranteed convergence.
                let t = if root_iter & 1 == 1 {
                    a1 + (target - s1) * (a2 - a1) / (s2 - s1)
                } else {
                    0.5 * (a1 + a2)
                };
                root_iter += 1;
                output.root_iterations += 1;

                let s = fcn.evaluate(index_a, index_b, t);

                if (s - target).abs() < tolerance {
                    // t2 holds a tentative value for t1
                    t2 = t;
                    break;
                }

                // Ensure we continue to bracket the root.
                if s > target {
                    a1 = t;
                    s1 = s;
                } else {
                    a2 = t;
                    s2 = s;
                }

                if root_iter == MAX_TOI_ROOT_ITERATIONS {
                    break;
                }
            }

            push_back_iter += 1;
            if push_back_iter == MAX_POLYGON_VERTICES {
                break;
            }
        }

        output.iterations += 1;

        if done {
            break;
        }

        if output.iterations == MAX_TOI_ITERATIONS {
            // Root finder got stuck. Semi-victory.
            output.state = ToiState::Failed;
            output.t = t1;
            break;
        }
    }

    if output.state == ToiState::Failed {
        tracing::debug!(
            t = output.t,
            iterations = output.iterations,
            root_iterations = output.root_iterations,
            "time of impact failed to converge"
        );
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::shapes::PolygonShape;

    fn still(c: Vec2) -> Sweep {
        Sweep {
            c0: c,
            c,
            ..Default::default()
        }
    }

    fn moving(from: Vec2, to: Vec2) -> Sweep {
        Sweep {
            c0: from,
            c: to,
            ..Default::default()
        }
    }

    fn box_proxy(hx: f32, hy: f32) -> DistanceProxy {
        let poly = PolygonShape::new_box(hx, hy);
        DistanceProxy::new(poly.vertices(), poly.radius)
    }

    #[test]
    fn test_falling_box_touches_thin_ground() {
        let input = ToiInput {
            proxy_a: box_proxy(10.0, 0.1),
            proxy_b: box_proxy(0.5, 0.5),
            sweep_a: still(Vec2::ZERO),
            sweep_b: moving(Vec2::new(0.0, 20.0), Vec2::new(0.0, -20.0)),
            t_max: 1.0,
        };

        let output = time_of_impact(&input);
        assert_eq!(output.state, ToiState::Touching);

        // Core gap at impact sits at the target, well short of tunnelling.
        let y = input.sweep_b.transform_at(output.t).p.y;
        let gap = y - 0.5 - 0.1;
        let target = LINEAR_SLOP.max(2.0 * crate::settings::POLYGON_RADIUS - 3.0 * LINEAR_SLOP);
        assert!(
            (gap - target).abs() < 0.25 * LINEAR_SLOP + 1e-3,
            "gap at impact = {gap}, expected about {target}"
        );
        assert!(output.iterations >= 1);
    }

    #[test]
    fn test_parallel_motion_is_separated() {
        let input = ToiInput {
            proxy_a: box_proxy(0.5, 0.5),
            proxy_b: box_proxy(0.5, 0.5),
            sweep_a: moving(Vec2::ZERO, Vec2::new(5.0, 0.0)),
            sweep_b: moving(Vec2::new(0.0, 3.0), Vec2::new(5.0, 3.0)),
            t_max: 1.0,
        };

        let output = time_of_impact(&input);
        assert_eq!(output.state, ToiState::Separated);
        assert_eq!(output.t, 1.0);
    }

    #[test]
    fn test_initial_overlap_gives_up() {
        let input = ToiInput {
            proxy_a: box_proxy(0.5, 0.5),
            proxy_b: box_proxy(0.5, 0.5),
            sweep_a: still(Vec2::ZERO),
            sweep_b: moving(Vec2::new(0.3, 0.0), Vec2::new(3.0, 0.0)),
            t_max: 1.0,
        };

        let output = time_of_impact(&input);
        assert_eq!(output.state, ToiState::Overlapped);
        assert_eq!(output.t, 0.0);
    }

    #[test]
    fn test_rotating_bar_hits_box() {
        // A long thin bar spinning a quarter turn sweeps into a box beside it.
        let input = ToiInput {
            proxy_a: box_proxy(0.5, 0.5),
            proxy_b: box_proxy(2.0, 0.05),
            sweep_a: still(Vec2::new(0.0, 1.5)),
            sweep_b: Sweep {
                a0: 0.0,
                a: std::f32::consts::FRAC_PI_2,
                ..Default::default()
            },
            t_max: 1.0,
        };

        let output = time_of_impact(&input);
        assert_eq!(output.state, ToiState::Touching);
        assert!(output.t > 0.0 && output.t < 1.0, "t = {}", output.t);
    }

    #[test]
    fn test_stats_accumulate() {
        let input = ToiInput {
            proxy_a: box_proxy(10.0, 0.1),
            proxy_b: box_proxy(0.5, 0.5),
            sweep_a: still(Vec2::ZERO),
            sweep_b: moving(Vec2::new(0.0, 20.0), Vec2::new(0.0, -20.0)),
            t_max: 1.0,
        };

        let mut stats = ToiStats::default();
        for _ in 0..3 {
            stats.record(&time_of_impact(&input));
        }
        assert_eq!(stats.calls, 3);
        assert!(stats.iters >= 3);
        assert!(stats.max_iters <= MAX_TOI_ITERATIONS);
    }
}
