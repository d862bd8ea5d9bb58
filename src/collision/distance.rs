//! GJK closest-point queries between convex proxies.
//!
//! A [`SimplexCache`] carried by the caller warm-starts the next query with
//! the previous simplex. Statistics are accumulated by the caller through
//! [`GjkStats`] instead of global counters.

use glam::Vec2;

use crate::math::{cross_sv, cross_vs, Transform};
use crate::settings::{MAX_GJK_ITERATIONS, MAX_POLYGON_VERTICES};

use super::shapes::Shape;

/// A convex point cloud plus skin radius. This is all GJK needs to know
/// about a shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceProxy {
    vertices: [Vec2; MAX_POLYGON_VERTICES],
    count: usize,
    pub radius: f32,
}

impl DistanceProxy {
    pub fn new(vertices: &[Vec2], radius: f32) -> Self {
        assert!(
            !vertices.is_empty() && vertices.len() <= MAX_POLYGON_VERTICES,
            "distance proxy needs 1 to {MAX_POLYGON_VERTICES} vertices"
        );
        let mut buffer = [Vec2::ZERO; MAX_POLYGON_VERTICES];
        buffer[..vertices.len()].copy_from_slice(vertices);
        Self {
            vertices: buffer,
            count: vertices.len(),
            radius,
        }
    }

    /// Proxy for one child of a shape.
    pub fn from_shape(shape: &Shape, index: usize) -> Self {
        match shape {
            Shape::Circle(circle) => Self::new(&[circle.p], circle.radius),
            Shape::Polygon(poly) => Self::new(poly.vertices(), poly.radius),
            Shape::Chain(chain) => {
                assert!(index < chain.child_count(), "chain child {index} out of range");
                let v1 = chain.vertices[index];
                let v2 = chain.vertices[index + 1];
                Self::new(&[v1, v2], chain.radius)
            }
            Shape::Edge(edge) => Self::new(&[edge.v1, edge.v2], edge.radius),
        }
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn vertex(&self, index: usize) -> Vec2 {
        debug_assert!(index < self.count);
        self.vertices[index]
    }

    #[inline]
    pub fn vertices(&self) -> &[Vec2] {
        &self.vertices[..self.count]
    }

    /// Index of the vertex furthest along `d`.
    pub fn support(&self, d: Vec2) -> usize {
        let mut best_index = 0;
        let mut best_value = self.vertices[0].dot(d);
        for i in 1..self.count {
            let value = self.vertices[i].dot(d);
            if value > best_value {
                best_index = i;
                best_value = value;
            }
        }
        best_index
    }

    #[inline]
    pub fn support_vertex(&self, d: Vec2) -> Vec2 {
        self.vertices[self.support(d)]
    }
}

/// Warm-start data for [`distance`]. Set `count` to zero on the first call.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SimplexCache {
    /// Length or area of the cached simplex.
    pub metric: f32,
    pub count: usize,
    /// Vertices on shape A.
    pub index_a: [usize; 3],
    /// Vertices on shape B.
    pub index_b: [usize; 3],
}

/// Input for [`distance`].
#[derive(Debug, Clone, Copy)]
pub struct DistanceInput {
    pub proxy_a: DistanceProxy,
    pub proxy_b: DistanceProxy,
    pub transform_a: Transform,
    pub transform_b: Transform,
    pub use_radii: bool,
}

/// Output for [`distance`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DistanceOutput {
    /// Closest point on shape A.
    pub point_a: Vec2,
    /// Closest point on shape B.
    pub point_b: Vec2,
    pub distance: f32,
    /// Number of GJK iterations used.
    pub iterations: u32,
}

/// Running totals over many GJK queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GjkStats {
    pub calls: u32,
    pub iters: u32,
    pub max_iters: u32,
}

impl GjkStats {
    pub fn record(&mut self, output: &DistanceOutput) {
        self.calls += 1;
        self.iters += output.iterations;
        self.max_iters = self.max_iters.max(output.iterations);
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct SimplexVertex {
    /// Support point in proxy A.
    w_a: Vec2,
    /// Support point in proxy B.
    w_b: Vec2,
    /// `w_b - w_a`
    w: Vec2,
    /// Barycentric coordinate for the closest point.
    a: f32,
    index_a: usize,
    index_b: usize,
}

impl SimplexVertex {
    fn new(
        proxy_a: &DistanceProxy,
        xf_a: &Transform,
        index_a: usize,
        proxy_b: &DistanceProxy,
        xf_b: &Transform,
        index_b: usize,
    ) -> Self {
        let w_a = xf_a.transform_point(proxy_a.vertex(index_a));
        let w_b = xf_b.transform_point(proxy_b.vertex(index_b));
        Self {
            w_a,
            w_b,
            w: w_b - w_a,
            a: 0.0,
            index_a,
            index_b,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Simplex {
    v: [SimplexVertex; 3],
    count: usize,
}

impl Simplex {
    fn read_cache(
        cache: &SimplexCache,
        proxy_a: &DistanceProxy,
        xf_a: &Transform,
        proxy_b: &DistanceProxy,
        xf_b: &Transform,
    ) -> Self {
        debug_assert!(cache.count <= 3);

        let mut simplex = Simplex {
            count: cache.count,
            ..Default::default()
        };
        for i in 0..simplex.count {
            simplex.v[i] = SimplexVertex::new(
                proxy_a,
                xf_a,
                cache.index_a[i],
                proxy_b,
                xf_b,
                cache.index_b[i],
            );
        }

        // Flush the cache if the simplex changed shape too much since it was
        // stored. Large swings usually mean the indices are stale.
        if simplex.count > 1 {
            let metric1 = cache.metric;
            let metric2 = simplex.metric();
            if metric2 < 0.5 * metric1 || 2.0 * metric1 < metric2 || metric2 < f32::EPSILON {
                simplex.count = 0;
            }
        }

        // Empty cache: start from the first vertices.
        if simplex.count == 0 {
            simplex.v[0] = SimplexVertex::new(proxy_a, xf_a, 0, proxy_b, xf_b, 0);
            simplex.v[0].a = 1.0;
            simplex.count = 1;
        }

        simplex
    }

    fn write_cache(&self, cache: &mut SimplexCache) {
        cache.metric = self.metric();
        cache.count = self.count;
        for i in 0..self.count {
            cache.index_a[i] = self.v[i].index_a;
            cache.index_b[i] = self.v[i].index_b;
        }
    }

    fn search_direction(&self) -> Vec2 {
        match self.count {
            1 => -self.v[0].w,
            2 => {
                let e12 = self.v[1].w - self.v[0].w;
                let sgn = e12.perp_dot(-self.v[0].w);
                if sgn > 0.0 {
                    // Origin is left of e12.
                    cross_sv(1.0, e12)
                } else {
                    // Origin is right of e12.
                    cross_vs(e12, 1.0)
                }
            }
            _ => {
                debug_assert!(false, "invalid simplex count {}", self.count);
                Vec2::ZERO
            }
        }
    }

    fn witness_points(&self) -> (Vec2, Vec2) {
        let v = &self.v;
        match self.count {
            1 => (v[0].w_a, v[0].w_b),
            2 => (
                v[0].a * v[0].w_a + v[1].a * v[1].w_a,
                v[0].a * v[0].w_b + v[1].a * v[1].w_b,
            ),
            3 => {
                let p = v[0].a * v[0].w_a + v[1].a * v[1].w_a + v[2].a * v[2].w_a;
                (p, p)
            }
            _ => {
                debug_assert!(false, "invalid simplex count {}", self.count);
                (Vec2::ZERO, Vec2::ZERO)
            }
        }
    }

    fn metric(&self) -> f32 {
        let v = &self.v;
        match self.count {
            2 => v[0].w.distance(v[1].w),
            3 => (v[1].w - v[0].w).perp_dot(v[2].w - v[0].w),
            _ => 0.0,
        }
    }

    // Solve a line segment using barycentric coordinates.
    //
    // p = a1 * w1 + a2 * w2
    // a1 + a2 = 1
    //
    // The vector from the origin to the closest point on the line is
    // perpendicular to the line.
    // e12 = w2 - w1
    // dot(p, e) = 0
    // a1 * dot(w1, e) + a2 * dot(w2, e) = 0
    //
    // 2-by-2 linear system
    // [1      1     ][a1] = [1]
    // [w1.e12 w2.e12][a2] = [0]
    //
    // Define
    // d12_1 =  dot(w2, e12)
    // d12_2 = -dot(w1, e12)
    // d12 = d12_1 + d12_2
    //
    // Solution
    // a1 = d12_1 / d12
    // a2 = d12_2 / d12
    fn solve2(&mut self) {
        let w1 = self.v[0].w;
        let w2 = self.v[1].w;
        let e12 = w2 - w1;

        // w1 region
        let d12_2 = -w1.dot(e12);
        if d12_2 <= 0.0 {
            // a2 <= 0, so we clamp it to 0
            self.v[0].a = 1.0;
            self.count = 1;
            return;
        }

        // w2 region
        let d12_1 = w2.dot(e12);
        if d12_1 <= 0.0 {
            // a1 <= 0, so we clamp it to 0
            self.v[1].a = 1.0;
            self.count = 1;
            self.v[0] = self.v[1];
            return;
        }

        // Must be in e12 region.
        let inv_d12 = 1.0 / (d12_1 + d12_2);
        self.v[0].a = d12_1 * inv_d12;
        self.v[1].a = d12_2 * inv_d12;
        self.count = 2;
    }

    // Possible regions:
    // - points[2]
    // - edge points[0]-points[2]
    // - edge points[1]-points[2]
    // - inside the triangle
    fn solve3(&mut self) {
        let w1 = self.v[0].w;
        let w2 = self.v[1].w;
        let w3 = self.v[2].w;

        // Edge12
        let e12 = w2 - w1;
        let d12_1 = w2.dot(e12);
        let d12_2 = -w1.dot(e12);

        // Edge13
        let e13 = w3 - w1;
        let d13_1 = w3.dot(e13);
        let d13_2 = -w1.dot(e13);

        // Edge23
        let e23 = w3 - w2;
        let d23_1 = w3.dot(e23);
        let d23_2 = -w2.dot(e23);

        // Triangle123
        let n123 = e12.perp_dot(e13);

        let d123_1 = n123 * w2.perp_dot(w3);
        let d123_2 = n123 * w3.perp_dot(w1);
        let d123_3 = n123 * w1.perp_dot(w2);

        // w1 region
        if d12_2 <= 0.0 && d13_2 <= 0.0 {
            self.v[0].a = 1.0;
            self.count = 1;
            return;
        }

        // e12
        if d12_1 > 0.0 && d12_2 > 0.0 && d123_3 <= 0.0 {
            let inv_d12 = 1.0 / (d12_1 + d12_2);
            self.v[0].a = d12_1 * inv_d12;
            self.v[1].a = d12_2 * inv_d12;
            self.count = 2;
            return;
        }

        // e13
        if d13_1 > 0.0 && d13_2 > 0.0 && d123_2 <= 0.0 {
            let inv_d13 = 1.0 / (d13_1 + d13_2);
            self.v[0].a = d13_1 * inv_d13;
            self.v[2].a = d13_2 * inv_d13;
            self.count = 2;
            self.v[1] = self.v[2];
            return;
        }

        // w2 region
        if d12_1 <= 0.0 && d23_2 <= 0.0 {
            self.v[1].a = 1.0;
            self.count = 1;
            self.v[0] = self.v[1];
            return;
        }

        // w3 region
        if d13_1 <= 0.0 && d23_1 <= 0.0 {
            self.v[2].a = 1.0;
            self.count = 1;
            self.v[0] = self.v[2];
            return;
        }

        // e23
        if d23_1 > 0.0 && d23_2 > 0.0 && d123_1 <= 0.0 {
            let inv_d23 = 1.0 / (d23_1 + d23_2);
            self.v[1].a = d23_1 * inv_d23;
            self.v[2].a = d23_2 * inv_d23;
            self.count = 2;
            self.v[0] = self.v[2];
            return;
        }

        // Must be in triangle123
        let inv_d123 = 1.0 / (d123_1 + d123_2 + d123_3);
        self.v[0].a = d123_1 * inv_d123;
        self.v[1].a = d123_2 * inv_d123;
        self.v[2].a = d123_3 * inv_d123;
        self.count = 3;
    }
}

/// Compute the closest points between two convex proxies.
///
/// On first use set `cache.count` to zero. The cache is rewritten with the
/// final simplex so the next call for the same pair starts close to the
/// answer.
pub fn distance(cache: &mut SimplexCache, input: &DistanceInput) -> DistanceOutput {
    let proxy_a = &input.proxy_a;
    let proxy_b = &input.proxy_b;
    let xf_a = &input.transform_a;
    let xf_b = &input.transform_b;

    // Initialize the simplex.
    let mut simplex = Simplex::read_cache(cache, proxy_a, xf_a, proxy_b, xf_b);

    // These store the vertices of the last simplex so that we
    // can check for duplicates and prevent cycling.
    let mut save_a = [0usize; 3];
    let mut save_b = [0usize; 3];

    // Main iteration loop.
    let mut iter = 0;
    while iter < MAX_GJK_ITERATIONS {
        // Copy simplex so we can identify duplicates.
        let save_count = simplex.count;
        for i in 0..save_count {
            save_a[i] = simplex.v[i].index_a;
            save_b[i] = simplex.v[i].index_b;
        }

        match simplex.count {
            1 => {}
            2 => simplex.solve2(),
            3 => simplex.solve3(),
            n => debug_assert!(false, "invalid simplex count {n}"),
        }

        // If we have 3 points, then the origin is in the corresponding triangle.
        if simplex.count == 3 {
            break;
        }

        let d = simplex.search_direction();

        // Ensure the search direction is numerically fit.
        if d.length_squared() < f32::EPSILON * f32::EPSILON {
            // The origin is probably contained by a line segment
            // or triangle. Thus the shapes are overlapped.

            // We can't return zero here even though there may be overlap.
            // In case the simplex is a point, segment, or triangle it is difficult
            // to determine if the origin is contained in the CSO or very close to it.
            break;
        }

        // Compute a tentative new simplex vertex using support points.
        let index_a = proxy_a.support(xf_a.q.inv_rotate(-d));
        let index_b = proxy_b.support(xf_b.q.inv_rotate(d));
        simplex.v[simplex.count] =
            SimplexVertex::new(proxy_a, xf_a, index_a, proxy_b, xf_b, index_b);

        // Iteration count is equated to the number of support point calls.
        iter += 1;

        // Check for duplicate support points. This is the main termination criteria.
        let duplicate = (0..save_count).any(|i| save_a[i] == index_a && save_b[i] == index_b);
        if duplicate {
            // If we found a duplicate support point we must exit to avoid cycling.
            break;
        }

        // New vertex is ok and needed.
        simplex.count += 1;
    }

    // Prepare output.
    let (mut point_a, mut point_b) = simplex.witness_points();
    let mut dist = point_a.distance(point_b);

    // Cache the simplex.
    simplex.write_cache(cache);

    // Apply radii if requested.
    if input.use_radii {
        let r_a = proxy_a.radius;
        let r_b = proxy_b.radius;

        if dist > r_a + r_b && dist > f32::EPSILON {
            // Shapes are still no overlapped.
            // Move the witness points to the outer surface.
            dist -= r_a + r_b;
            let normal = (point_b - point_a).normalize();
            point_a += r_a * normal;
            point_b -= r_b * normal;
        } else {
            // Shapes are overlapped when radii are considered.
            // Move the witness points to the middle.
            let p = 0.5 * (point_a + point_b);
            point_a = p;
            point_b = p;
            dist = 0.0;
        }
    }

    DistanceOutput {
        point_a,
        point_b,
        distance: dist,
        iterations: iter,
    }
}
