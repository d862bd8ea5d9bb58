//! Broad phase: candidate pair discovery on top of the dynamic tree.
//!
//! Proxies that are created, moved or touched are buffered. Once per step
//! [`BroadPhase::update_pairs`] queries the tree for every buffered proxy and
//! reports each overlapping pair exactly once.

use glam::Vec2;

use super::dynamic_tree::{DynamicTree, NULL_NODE};
use super::{Aabb, RayCastInput};

/// Broad-phase proxy index.
pub type ProxyId = usize;

/// Sentinel for "no proxy".
pub const NULL_PROXY: ProxyId = NULL_NODE;

#[derive(Debug, Clone)]
pub struct BroadPhase<T> {
    tree: DynamicTree<T>,
    proxy_count: usize,
    move_buffer: Vec<ProxyId>,
    pair_buffer: Vec<(ProxyId, ProxyId)>,
}

impl<T> Default for BroadPhase<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BroadPhase<T> {
    pub fn new() -> Self {
        Self {
            tree: DynamicTree::new(),
            proxy_count: 0,
            move_buffer: Vec::with_capacity(16),
            pair_buffer: Vec::with_capacity(16),
        }
    }

    /// Create a proxy with an initial tight AABB. Pairs are not reported
    /// until [`update_pairs`](Self::update_pairs) is called.
    pub fn create_proxy(&mut self, aabb: Aabb, user_data: T) -> ProxyId {
        let proxy_id = self.tree.create_proxy(aabb, user_data);
        self.proxy_count += 1;
        self.buffer_move(proxy_id);
        proxy_id
    }

    pub fn destroy_proxy(&mut self, proxy_id: ProxyId) -> Option<T> {
        self.unbuffer_move(proxy_id);
        self.proxy_count -= 1;
        self.tree.destroy_proxy(proxy_id)
    }

    /// Move a proxy. Only proxies that leave their fat AABB are buffered.
    pub fn move_proxy(&mut self, proxy_id: ProxyId, aabb: Aabb, displacement: Vec2) {
        if self.tree.move_proxy(proxy_id, aabb, displacement) {
            self.buffer_move(proxy_id);
        }
    }

    /// Force a pair re-check for this proxy on the next update.
    pub fn touch_proxy(&mut self, proxy_id: ProxyId) {
        self.buffer_move(proxy_id);
    }

    pub fn fat_aabb(&self, proxy_id: ProxyId) -> &Aabb {
        self.tree.fat_aabb(proxy_id)
    }

    pub fn user_data(&self, proxy_id: ProxyId) -> Option<&T> {
        self.tree.user_data(proxy_id)
    }

    /// Whether the fat AABBs of two proxies overlap.
    pub fn test_overlap(&self, proxy_a: ProxyId, proxy_b: ProxyId) -> bool {
        self.tree
            .fat_aabb(proxy_a)
            .overlaps(self.tree.fat_aabb(proxy_b))
    }

    pub fn proxy_count(&self) -> usize {
        self.proxy_count
    }

    pub fn tree_height(&self) -> i32 {
        self.tree.height()
    }

    pub fn tree_balance(&self) -> i32 {
        self.tree.max_balance()
    }

    pub fn tree_quality(&self) -> f32 {
        self.tree.area_ratio()
    }

    /// Report every new overlapping pair once, then clear the move buffer.
    pub fn update_pairs<F>(&mut self, mut callback: F)
    where
        F: FnMut(&T, &T),
    {
        self.pair_buffer.clear();

        // Perform tree queries for all moving proxies.
        let tree = &self.tree;
        let pairs = &mut self.pair_buffer;
        for &query_proxy_id in &self.move_buffer {
            if query_proxy_id == NULL_PROXY {
                continue;
            }

            // Query with the fat AABB so pairs that may touch soon are found.
            let fat_aabb = *tree.fat_aabb(query_proxy_id);
            tree.query(&fat_aabb, |proxy_id| {
                // A proxy cannot form a pair with itself.
                if proxy_id != query_proxy_id {
                    pairs.push((
                        proxy_id.min(query_proxy_id),
                        proxy_id.max(query_proxy_id),
                    ));
                }
                true
            });
        }

        self.move_buffer.clear();

        // Sort so duplicates are adjacent, then report each unique pair.
        self.pair_buffer.sort_unstable();
        self.pair_buffer.dedup();

        tracing::trace!("Broad phase reporting {} pairs", self.pair_buffer.len());

        for &(a, b) in &self.pair_buffer {
            if let (Some(data_a), Some(data_b)) = (self.tree.user_data(a), self.tree.user_data(b))
            {
                callback(data_a, data_b);
            }
        }
    }

    pub fn query<F>(&self, aabb: &Aabb, callback: F)
    where
        F: FnMut(ProxyId) -> bool,
    {
        self.tree.query(aabb, callback);
    }

    pub fn ray_cast<F>(&self, input: &RayCastInput, callback: F)
    where
        F: FnMut(&RayCastInput, ProxyId) -> f32,
    {
        self.tree.ray_cast(input, callback);
    }

    pub fn shift_origin(&mut self, new_origin: Vec2) {
        self.tree.shift_origin(new_origin);
    }

    fn buffer_move(&mut self, proxy_id: ProxyId) {
        self.move_buffer.push(proxy_id);
    }

    fn unbuffer_move(&mut self, proxy_id: ProxyId) {
        for id in self.move_buffer.iter_mut().filter(|id| **id == proxy_id) {
            *id = NULL_PROXY;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn aabb_at(x: f32, y: f32, half: f32) -> Aabb {
        Aabb::new(Vec2::new(x - half, y - half), Vec2::new(x + half, y + half))
    }

    fn collect_pairs<T: Copy + Ord>(bp: &mut BroadPhase<T>) -> Vec<(T, T)> {
        let mut pairs = Vec::new();
        bp.update_pairs(|a, b| pairs.push(((*a).min(*b), (*a).max(*b))));
        pairs
    }

    #[test]
    fn test_overlapping_proxies_reported_once() {
        let mut bp = BroadPhase::new();
        let a = bp.create_proxy(aabb_at(0.0, 0.0, 1.0), 'a');
        let _b = bp.create_proxy(aabb_at(1.5, 0.0, 1.0), 'b');
        let _c = bp.create_proxy(aabb_at(10.0, 0.0, 1.0), 'c');

        // Duplicate buffering must not produce duplicate pairs.
        bp.touch_proxy(a);
        bp.touch_proxy(a);

        let pairs = collect_pairs(&mut bp);
        assert_eq!(pairs, vec![('a', 'b')]);

        // Nothing moved, nothing reported.
        assert!(collect_pairs(&mut bp).is_empty());
    }

    #[test]
    fn test_destroyed_proxy_not_reported() {
        let mut bp = BroadPhase::new();
        let a = bp.create_proxy(aabb_at(0.0, 0.0, 1.0), 1);
        let _b = bp.create_proxy(aabb_at(0.5, 0.0, 1.0), 2);
        assert_eq!(bp.destroy_proxy(a), Some(1));
        assert_eq!(bp.proxy_count(), 1);
        assert!(collect_pairs(&mut bp).is_empty());
    }

    #[test]
    fn test_reported_pairs_have_overlapping_fat_boxes() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut bp = BroadPhase::new();
        let ids: Vec<ProxyId> = (0..200usize)
            .map(|i| {
                let x = rng.gen_range(-30.0..30.0);
                let y = rng.gen_range(-30.0..30.0);
                bp.create_proxy(aabb_at(x, y, rng.gen_range(0.2..2.0)), i)
            })
            .collect();

        let mut seen = std::collections::HashSet::new();
        bp.update_pairs(|a, b| {
            let key = ((*a).min(*b), (*a).max(*b));
            assert!(seen.insert(key), "pair {key:?} reported twice");
        });
        for (a, b) in seen {
            assert!(bp.test_overlap(ids[a], ids[b]));
        }
    }

    #[test]
    fn test_thousand_proxies_single_new_overlap() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut bp = BroadPhase::new();

        // One proxy per 10x10 cell keeps all fat boxes disjoint.
        let mut boxes = Vec::with_capacity(1000);
        for i in 0..1000 {
            let cx = (i % 40) as f32 * 10.0 + 5.0;
            let cy = (i / 40) as f32 * 10.0 + 5.0;
            let x = cx + rng.gen_range(-2.0..2.0);
            let y = cy + rng.gen_range(-2.0..2.0);
            let aabb = aabb_at(x, y, rng.gen_range(0.5..2.0));
            boxes.push((bp.create_proxy(aabb, i), aabb));
        }

        assert!(collect_pairs(&mut bp).is_empty());
        assert_eq!(bp.proxy_count(), 1000);

        // Move proxy 0 exactly onto proxy 517.
        let (mover, _) = boxes[0];
        let (_, target) = boxes[517];
        bp.move_proxy(mover, target, Vec2::ZERO);

        let pairs = collect_pairs(&mut bp);
        assert_eq!(pairs, vec![(0, 517)]);
        assert!(bp.tree_balance() <= 1);
    }

    #[test]
    fn test_broadphase_query_and_ray_cast() {
        let mut bp = BroadPhase::new();
        let a = bp.create_proxy(aabb_at(0.0, 0.0, 1.0), ());
        let b = bp.create_proxy(aabb_at(5.0, 0.0, 1.0), ());

        let mut found = Vec::new();
        bp.query(&aabb_at(5.0, 0.0, 0.1), |id| {
            found.push(id);
            true
        });
        assert_eq!(found, vec![b]);

        let input = RayCastInput {
            p1: Vec2::new(-5.0, 0.0),
            p2: Vec2::new(10.0, 0.0),
            max_fraction: 1.0,
        };
        let mut first = None;
        bp.ray_cast(&input, |_, id| {
            first = Some(id);
            // Stop at the first proxy touched.
            0.0
        });
        assert!(first == Some(a) || first == Some(b));
    }
}
