//! Dynamic AABB tree.
//!
//! Leaves hold fattened boxes around client shapes so that small motions do
//! not touch the tree. Nodes live in a pool and are addressed by index, which
//! keeps proxy ids stable while the pool grows. Internal nodes are kept
//! height-balanced with AVL-style rotations.

use glam::Vec2;

use crate::settings::{AABB_EXTENSION, AABB_MULTIPLIER};

use super::{Aabb, RayCastInput};

/// Sentinel index for "no node".
pub const NULL_NODE: usize = usize::MAX;

const INITIAL_CAPACITY: usize = 16;

#[derive(Debug, Clone)]
struct TreeNode<T> {
    /// Fat AABB for leaves, enclosing box for internal nodes.
    aabb: Aabb,
    user_data: Option<T>,
    /// Parent while allocated, next free node while on the free list.
    parent_or_next: usize,
    child1: usize,
    child2: usize,
    /// Leaf = 0, free node = -1.
    height: i32,
}

impl<T> TreeNode<T> {
    fn free(next: usize) -> Self {
        Self {
            aabb: Aabb::default(),
            user_data: None,
            parent_or_next: next,
            child1: NULL_NODE,
            child2: NULL_NODE,
            height: -1,
        }
    }

    #[inline]
    fn is_leaf(&self) -> bool {
        self.child1 == NULL_NODE
    }
}

/// A dynamic AABB tree over user data `T`.
#[derive(Debug, Clone)]
pub struct DynamicTree<T> {
    root: usize,
    nodes: Vec<TreeNode<T>>,
    node_count: usize,
    free_list: usize,
    insertion_count: usize,
}

impl<T> Default for DynamicTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DynamicTree<T> {
    pub fn new() -> Self {
        let mut nodes = Vec::with_capacity(INITIAL_CAPACITY);
        for i in 0..INITIAL_CAPACITY {
            let next = if i + 1 < INITIAL_CAPACITY { i + 1 } else { NULL_NODE };
            nodes.push(TreeNode::free(next));
        }
        Self {
            root: NULL_NODE,
            nodes,
            node_count: 0,
            free_list: 0,
            insertion_count: 0,
        }
    }

    /// Create a proxy from a tight AABB. The stored box is fattened.
    pub fn create_proxy(&mut self, aabb: Aabb, user_data: T) -> usize {
        let proxy_id = self.allocate_node();

        let r = Vec2::splat(AABB_EXTENSION);
        let node = &mut self.nodes[proxy_id];
        node.aabb = Aabb::new(aabb.min - r, aabb.max + r);
        node.user_data = Some(user_data);
        node.height = 0;

        self.insert_leaf(proxy_id);
        proxy_id
    }

    /// Destroy a proxy and hand back its user data.
    pub fn destroy_proxy(&mut self, proxy_id: usize) -> Option<T> {
        assert!(proxy_id < self.nodes.len(), "proxy id {proxy_id} out of range");
        assert!(self.nodes[proxy_id].is_leaf(), "proxy {proxy_id} is not a leaf");

        self.remove_leaf(proxy_id);
        let data = self.nodes[proxy_id].user_data.take();
        self.free_node(proxy_id);
        data
    }

    /// Move a proxy with a swept AABB. Returns true if the proxy left its fat
    /// box and was reinserted.
    pub fn move_proxy(&mut self, proxy_id: usize, aabb: Aabb, displacement: Vec2) -> bool {
        assert!(proxy_id < self.nodes.len(), "proxy id {proxy_id} out of range");
        assert!(self.nodes[proxy_id].is_leaf(), "proxy {proxy_id} is not a leaf");

        if self.nodes[proxy_id].aabb.contains(&aabb) {
            return false;
        }

        self.remove_leaf(proxy_id);

        // Extend AABB.
        let r = Vec2::splat(AABB_EXTENSION);
        let mut b = Aabb::new(aabb.min - r, aabb.max + r);

        // Predict AABB displacement.
        let d = AABB_MULTIPLIER * displacement;
        if d.x < 0.0 {
            b.min.x += d.x;
        } else {
            b.max.x += d.x;
        }
        if d.y < 0.0 {
            b.min.y += d.y;
        } else {
            b.max.y += d.y;
        }

        self.nodes[proxy_id].aabb = b;
        self.insert_leaf(proxy_id);
        true
    }

    pub fn user_data(&self, proxy_id: usize) -> Option<&T> {
        self.nodes.get(proxy_id).and_then(|n| n.user_data.as_ref())
    }

    pub fn fat_aabb(&self, proxy_id: usize) -> &Aabb {
        assert!(proxy_id < self.nodes.len(), "proxy id {proxy_id} out of range");
        &self.nodes[proxy_id].aabb
    }

    /// Number of allocated nodes, leaves and internal nodes together.
    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn insertion_count(&self) -> usize {
        self.insertion_count
    }

    /// Visit every leaf whose fat AABB overlaps `aabb`. Returning false from
    /// the callback ends the query.
    pub fn query<F>(&self, aabb: &Aabb, mut callback: F)
    where
        F: FnMut(usize) -> bool,
    {
        let mut stack = Vec::with_capacity(256);
        stack.push(self.root);

        while let Some(node_id) = stack.pop() {
            if node_id == NULL_NODE {
                continue;
            }

            let node = &self.nodes[node_id];
            if node.aabb.overlaps(aabb) {
                if node.is_leaf() {
                    if !callback(node_id) {
                        return;
                    }
                } else {
                    stack.push(node.child1);
                    stack.push(node.child2);
                }
            }
        }
    }

    /// Cast a ray against the leaves.
    ///
    /// The callback receives the clipped input and the proxy id and returns a
    /// new max fraction: `0` ends the cast, a negative value ignores the proxy,
    /// anything else clips the ray.
    pub fn ray_cast<F>(&self, input: &RayCastInput, mut callback: F)
    where
        F: FnMut(&RayCastInput, usize) -> f32,
    {
        let p1 = input.p1;
        let p2 = input.p2;
        let r = p2 - p1;
        assert!(r.length_squared() > 0.0, "degenerate ray");
        let r = r.normalize();

        // v is perpendicular to the segment.
        let v = Vec2::new(-r.y, r.x);
        let abs_v = v.abs();

        // Separating axis for segment (Gino, p80).
        // |dot(v, p1 - c)| > dot(|v|, h)

        let mut max_fraction = input.max_fraction;

        let segment_aabb = |fraction: f32| {
            let t = p1 + fraction * (p2 - p1);
            Aabb::new(p1.min(t), p1.max(t))
        };
        let mut segment = segment_aabb(max_fraction);

        let mut stack = Vec::with_capacity(256);
        stack.push(self.root);

        while let Some(node_id) = stack.pop() {
            if node_id == NULL_NODE {
                continue;
            }

            let node = &self.nodes[node_id];
            if !node.aabb.overlaps(&segment) {
                continue;
            }

            let c = node.aabb.center();
            let h = node.aabb.extents();
            let separation = v.dot(p1 - c).abs() - abs_v.dot(h);
            if separation > 0.0 {
                continue;
            }

            if node.is_leaf() {
                let sub_input = RayCastInput {
                    p1,
                    p2,
                    max_fraction,
                };

                let value = callback(&sub_input, node_id);
                if value == 0.0 {
                    // The client has terminated the ray cast.
                    return;
                }

                if value > 0.0 {
                    max_fraction = value;
                    segment = segment_aabb(max_fraction);
                }
            } else {
                stack.push(node.child1);
                stack.push(node.child2);
            }
        }
    }

    /// Height of the tree. An empty tree has height 0.
    pub fn height(&self) -> i32 {
        if self.root == NULL_NODE {
            0
        } else {
            self.nodes[self.root].height
        }
    }

    /// Largest height difference between the two children of any node.
    pub fn max_balance(&self) -> i32 {
        self.nodes
            .iter()
            .filter(|n| n.height > 1)
            .map(|n| (self.nodes[n.child2].height - self.nodes[n.child1].height).abs())
            .max()
            .unwrap_or(0)
    }

    /// Sum of node perimeters over the root perimeter. Lower is tighter.
    pub fn area_ratio(&self) -> f32 {
        if self.root == NULL_NODE {
            return 0.0;
        }

        let root_area = self.nodes[self.root].aabb.perimeter();
        let total_area: f32 = self
            .nodes
            .iter()
            .filter(|n| n.height >= 0)
            .map(|n| n.aabb.perimeter())
            .sum();

        total_area / root_area
    }

    /// Check parent links, free list size, heights and enclosing boxes.
    pub fn validate(&self) -> bool {
        if !self.validate_structure(self.root) || !self.validate_metrics(self.root) {
            return false;
        }

        let mut free_count = 0;
        let mut free_index = self.free_list;
        while free_index != NULL_NODE {
            if free_index >= self.nodes.len() {
                return false;
            }
            free_index = self.nodes[free_index].parent_or_next;
            free_count += 1;
        }

        self.height() == self.compute_height(self.root)
            && self.node_count + free_count == self.nodes.len()
    }

    /// Build an optimal-ish tree from scratch. Slow, but tightens a tree
    /// that has degraded after many moves.
    pub fn rebuild_bottom_up(&mut self) {
        let mut leaves = Vec::with_capacity(self.node_count);

        // Build array of leaves. Free everything else.
        for i in 0..self.nodes.len() {
            if self.nodes[i].height < 0 {
                // free node in pool
                continue;
            }

            if self.nodes[i].is_leaf() {
                self.nodes[i].parent_or_next = NULL_NODE;
                leaves.push(i);
            } else {
                self.free_node(i);
            }
        }

        while leaves.len() > 1 {
            let mut min_cost = f32::MAX;
            let (mut i_min, mut j_min) = (0, 1);
            for i in 0..leaves.len() {
                let aabb_i = self.nodes[leaves[i]].aabb;
                for j in (i + 1)..leaves.len() {
                    let cost = aabb_i.combine(&self.nodes[leaves[j]].aabb).perimeter();
                    if cost < min_cost {
                        i_min = i;
                        j_min = j;
                        min_cost = cost;
                    }
                }
            }

            let index1 = leaves[i_min];
            let index2 = leaves[j_min];

            let parent_index = self.allocate_node();
            let aabb = self.nodes[index1].aabb.combine(&self.nodes[index2].aabb);
            let height = 1 + self.nodes[index1].height.max(self.nodes[index2].height);
            let parent = &mut self.nodes[parent_index];
            parent.child1 = index1;
            parent.child2 = index2;
            parent.height = height;
            parent.aabb = aabb;
            parent.parent_or_next = NULL_NODE;

            self.nodes[index1].parent_or_next = parent_index;
            self.nodes[index2].parent_or_next = parent_index;

            leaves[i_min] = parent_index;
            leaves.swap_remove(j_min);
        }

        self.root = leaves.first().copied().unwrap_or(NULL_NODE);
        debug_assert!(self.validate());
    }

    /// Shift the world origin. Useful for large worlds.
    pub fn shift_origin(&mut self, new_origin: Vec2) {
        for node in &mut self.nodes {
            node.aabb.min -= new_origin;
            node.aabb.max -= new_origin;
        }
    }

    fn allocate_node(&mut self) -> usize {
        // Grow the pool and relink the new tail as free nodes.
        if self.free_list == NULL_NODE {
            debug_assert_eq!(self.node_count, self.nodes.len());

            let old_capacity = self.nodes.len();
            let new_capacity = (old_capacity * 2).max(INITIAL_CAPACITY);
            for i in old_capacity..new_capacity {
                let next = if i + 1 < new_capacity { i + 1 } else { NULL_NODE };
                self.nodes.push(TreeNode::free(next));
            }
            self.free_list = old_capacity;

            tracing::debug!(
                "Dynamic tree pool grown from {} to {} nodes",
                old_capacity,
                new_capacity
            );
        }

        let node_id = self.free_list;
        let node = &mut self.nodes[node_id];
        self.free_list = node.parent_or_next;
        node.parent_or_next = NULL_NODE;
        node.child1 = NULL_NODE;
        node.child2 = NULL_NODE;
        node.height = 0;
        node.user_data = None;
        self.node_count += 1;
        node_id
    }

    fn free_node(&mut self, node_id: usize) {
        assert!(node_id < self.nodes.len());
        assert!(self.node_count > 0);
        let node = &mut self.nodes[node_id];
        node.parent_or_next = self.free_list;
        node.child1 = NULL_NODE;
        node.child2 = NULL_NODE;
        node.height = -1;
        node.user_data = None;
        self.free_list = node_id;
        self.node_count -= 1;
    }

    fn insert_leaf(&mut self, leaf: usize) {
        self.insertion_count += 1;

        if self.root == NULL_NODE {
            self.root = leaf;
            self.nodes[leaf].parent_or_next = NULL_NODE;
            return;
        }

        // Find the best sibling for this node.
        let leaf_aabb = self.nodes[leaf].aabb;
        let mut index = self.root;
        while !self.nodes[index].is_leaf() {
            let node = &self.nodes[index];
            let child1 = node.child1;
            let child2 = node.child2;

            let area = node.aabb.perimeter();
            let combined_area = node.aabb.combine(&leaf_aabb).perimeter();

            // Cost of creating a new parent for this node and the new leaf.
            let cost = 2.0 * combined_area;

            // Minimum cost of pushing the leaf further down the tree.
            let inheritance_cost = 2.0 * (combined_area - area);

            let cost1 = self.descend_cost(child1, &leaf_aabb) + inheritance_cost;
            let cost2 = self.descend_cost(child2, &leaf_aabb) + inheritance_cost;

            // Descend according to the minimum cost.
            if cost < cost1 && cost < cost2 {
                break;
            }

            index = if cost1 < cost2 { child1 } else { child2 };
        }

        let sibling = index;

        // Create a new parent.
        let old_parent = self.nodes[sibling].parent_or_next;
        let new_parent = self.allocate_node();
        let sibling_aabb = self.nodes[sibling].aabb;
        let sibling_height = self.nodes[sibling].height;
        {
            let node = &mut self.nodes[new_parent];
            node.parent_or_next = old_parent;
            node.aabb = leaf_aabb.combine(&sibling_aabb);
            node.height = sibling_height + 1;
            node.child1 = sibling;
            node.child2 = leaf;
        }
        self.nodes[sibling].parent_or_next = new_parent;
        self.nodes[leaf].parent_or_next = new_parent;

        if old_parent != NULL_NODE {
            // The sibling was not the root.
            if self.nodes[old_parent].child1 == sibling {
                self.nodes[old_parent].child1 = new_parent;
            } else {
                self.nodes[old_parent].child2 = new_parent;
            }
        } else {
            // The sibling was the root.
            self.root = new_parent;
        }

        // Walk back up the tree fixing heights and AABBs.
        let mut index = self.nodes[leaf].parent_or_next;
        while index != NULL_NODE {
            index = self.balance(index);
            self.refit(index);
            index = self.nodes[index].parent_or_next;
        }
    }

    fn descend_cost(&self, child: usize, leaf_aabb: &Aabb) -> f32 {
        let node = &self.nodes[child];
        let aabb = leaf_aabb.combine(&node.aabb);
        if node.is_leaf() {
            aabb.perimeter()
        } else {
            aabb.perimeter() - node.aabb.perimeter()
        }
    }

    fn remove_leaf(&mut self, leaf: usize) {
        if leaf == self.root {
            self.root = NULL_NODE;
            return;
        }

        let parent = self.nodes[leaf].parent_or_next;
        let grand_parent = self.nodes[parent].parent_or_next;
        let sibling = if self.nodes[parent].child1 == leaf {
            self.nodes[parent].child2
        } else {
            self.nodes[parent].child1
        };

        if grand_parent != NULL_NODE {
            // Destroy parent and connect sibling to grand parent.
            if self.nodes[grand_parent].child1 == parent {
                self.nodes[grand_parent].child1 = sibling;
            } else {
                self.nodes[grand_parent].child2 = sibling;
            }
            self.nodes[sibling].parent_or_next = grand_parent;
            self.free_node(parent);

            // Adjust ancestor bounds.
            let mut index = grand_parent;
            while index != NULL_NODE {
                index = self.balance(index);
                self.refit(index);
                index = self.nodes[index].parent_or_next;
            }
        } else {
            self.root = sibling;
            self.nodes[sibling].parent_or_next = NULL_NODE;
            self.free_node(parent);
        }
    }

    /// Recompute an internal node's box and height from its children.
    fn refit(&mut self, index: usize) {
        let child1 = self.nodes[index].child1;
        let child2 = self.nodes[index].child2;
        debug_assert!(child1 != NULL_NODE && child2 != NULL_NODE);

        let height = 1 + self.nodes[child1].height.max(self.nodes[child2].height);
        let aabb = self.nodes[child1].aabb.combine(&self.nodes[child2].aabb);
        let node = &mut self.nodes[index];
        node.height = height;
        node.aabb = aabb;
    }

    /// Perform a left or right rotation if node `i_a` is imbalanced.
    /// Returns the new root index of the subtree.
    fn balance(&mut self, i_a: usize) -> usize {
        debug_assert!(i_a != NULL_NODE);

        if self.nodes[i_a].is_leaf() || self.nodes[i_a].height < 2 {
            return i_a;
        }

        let i_b = self.nodes[i_a].child1;
        let i_c = self.nodes[i_a].child2;

        let balance = self.nodes[i_c].height - self.nodes[i_b].height;

        if balance > 1 {
            // Rotate C up.
            self.rotate_up(i_a, i_c, i_b, false);
            return i_c;
        }

        if balance < -1 {
            // Rotate B up.
            self.rotate_up(i_a, i_b, i_c, true);
            return i_b;
        }

        i_a
    }

    /// Lift `i_up` (a child of `i_a`) above `i_a`. `i_other` is the sibling
    /// that stays under `i_a`. `up_is_child1` tells which slot of `i_a`
    /// `i_up` occupied.
    fn rotate_up(&mut self, i_a: usize, i_up: usize, i_other: usize, up_is_child1: bool) {
        let i_f = self.nodes[i_up].child1;
        let i_g = self.nodes[i_up].child2;

        // Swap A and the lifted child.
        let a_parent = self.nodes[i_a].parent_or_next;
        self.nodes[i_up].child1 = i_a;
        self.nodes[i_up].parent_or_next = a_parent;
        self.nodes[i_a].parent_or_next = i_up;

        // A's old parent should point to the lifted child.
        if a_parent != NULL_NODE {
            if self.nodes[a_parent].child1 == i_a {
                self.nodes[a_parent].child1 = i_up;
            } else {
                debug_assert_eq!(self.nodes[a_parent].child2, i_a);
                self.nodes[a_parent].child2 = i_up;
            }
        } else {
            self.root = i_up;
        }

        // The taller grandchild stays with the lifted node, the other moves under A.
        let (keep, moved) = if self.nodes[i_f].height > self.nodes[i_g].height {
            (i_f, i_g)
        } else {
            (i_g, i_f)
        };

        self.nodes[i_up].child2 = keep;
        if up_is_child1 {
            self.nodes[i_a].child1 = moved;
        } else {
            self.nodes[i_a].child2 = moved;
        }
        self.nodes[moved].parent_or_next = i_a;

        let a_aabb = self.nodes[i_other].aabb.combine(&self.nodes[moved].aabb);
        let a_height = 1 + self.nodes[i_other].height.max(self.nodes[moved].height);
        self.nodes[i_a].aabb = a_aabb;
        self.nodes[i_a].height = a_height;

        self.nodes[i_up].aabb = a_aabb.combine(&self.nodes[keep].aabb);
        self.nodes[i_up].height = 1 + a_height.max(self.nodes[keep].height);
    }

    fn compute_height(&self, node_id: usize) -> i32 {
        if node_id == NULL_NODE {
            return 0;
        }
        let node = &self.nodes[node_id];
        if node.is_leaf() {
            return 0;
        }
        1 + self
            .compute_height(node.child1)
            .max(self.compute_height(node.child2))
    }

    fn validate_structure(&self, index: usize) -> bool {
        if index == NULL_NODE {
            return true;
        }

        let node = &self.nodes[index];
        if index == self.root && node.parent_or_next != NULL_NODE {
            return false;
        }

        let (child1, child2) = (node.child1, node.child2);
        if node.is_leaf() {
            return child2 == NULL_NODE && node.height == 0 && node.user_data.is_some();
        }

        child1 < self.nodes.len()
            && child2 < self.nodes.len()
            && self.nodes[child1].parent_or_next == index
            && self.nodes[child2].parent_or_next == index
            && self.validate_structure(child1)
            && self.validate_structure(child2)
    }

    fn validate_metrics(&self, index: usize) -> bool {
        if index == NULL_NODE {
            return true;
        }

        let node = &self.nodes[index];
        if node.is_leaf() {
            return node.height == 0;
        }

        let (c1, c2) = (&self.nodes[node.child1], &self.nodes[node.child2]);
        let height = 1 + c1.height.max(c2.height);
        let union = c1.aabb.combine(&c2.aabb);

        node.height == height
            && node.aabb.contains(&union)
            && self.validate_metrics(node.child1)
            && self.validate_metrics(node.child2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn aabb_at(x: f32, y: f32, half: f32) -> Aabb {
        Aabb::new(Vec2::new(x - half, y - half), Vec2::new(x + half, y + half))
    }

    #[test]
    fn test_create_proxy_fattens_aabb() {
        let mut tree = DynamicTree::new();
        let id = tree.create_proxy(aabb_at(0.0, 0.0, 1.0), 7u32);
        let fat = tree.fat_aabb(id);
        let eps = 1e-6;
        assert!((fat.min.x - (-1.0 - AABB_EXTENSION)).abs() < eps);
        assert!((fat.max.y - (1.0 + AABB_EXTENSION)).abs() < eps);
        assert_eq!(tree.user_data(id), Some(&7));
        assert!(tree.validate());
    }

    #[test]
    fn test_move_proxy_inside_fat_box_is_noop() {
        let mut tree = DynamicTree::new();
        let id = tree.create_proxy(aabb_at(0.0, 0.0, 1.0), ());
        let before = *tree.fat_aabb(id);

        let moved = tree.move_proxy(id, aabb_at(0.05, 0.0, 1.0), Vec2::new(0.05, 0.0));
        assert!(!moved, "Small motion should stay inside the fat AABB");
        assert_eq!(*tree.fat_aabb(id), before);

        let moved = tree.move_proxy(id, aabb_at(3.0, 0.0, 1.0), Vec2::new(3.0, 0.0));
        assert!(moved);
        // Predicted displacement extends the box forward only.
        let fat = tree.fat_aabb(id);
        assert!((fat.max.x - (4.0 + AABB_EXTENSION + AABB_MULTIPLIER * 3.0)).abs() < 1e-5);
        assert!((fat.min.x - (2.0 - AABB_EXTENSION)).abs() < 1e-5);
    }

    #[test]
    fn test_pool_growth_keeps_ids_stable() {
        let mut tree = DynamicTree::new();
        let ids: Vec<usize> = (0..100)
            .map(|i| tree.create_proxy(aabb_at(i as f32 * 3.0, 0.0, 0.5), i))
            .collect();
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(tree.user_data(*id), Some(&i));
        }
        assert!(tree.validate());
        assert!(tree.max_balance() <= 1);
        assert_eq!(tree.node_count(), 2 * 100 - 1);
    }

    #[test]
    fn test_destroy_returns_user_data_and_reuses_node() {
        let mut tree = DynamicTree::new();
        let a = tree.create_proxy(aabb_at(0.0, 0.0, 1.0), "a");
        let _b = tree.create_proxy(aabb_at(5.0, 0.0, 1.0), "b");
        assert_eq!(tree.destroy_proxy(a), Some("a"));
        assert!(tree.validate());
        assert_eq!(tree.node_count(), 1);

        let c = tree.create_proxy(aabb_at(-5.0, 0.0, 1.0), "c");
        assert_eq!(tree.user_data(c), Some(&"c"));
        assert!(tree.validate());
    }

    #[test]
    fn test_query_visits_overlapping_leaves() {
        let mut tree = DynamicTree::new();
        for i in 0..10 {
            tree.create_proxy(aabb_at(i as f32 * 10.0, 0.0, 1.0), i);
        }

        let mut hits = Vec::new();
        tree.query(&aabb_at(20.0, 0.0, 0.5), |id| {
            hits.push(*tree.user_data(id).unwrap());
            true
        });
        assert_eq!(hits, vec![2]);

        let mut count = 0;
        tree.query(&Aabb::new(Vec2::splat(-100.0), Vec2::splat(100.0)), |_| {
            count += 1;
            count < 3
        });
        assert_eq!(count, 3, "Query should stop when the callback returns false");
    }

    #[test]
    fn test_ray_cast_clips_to_nearest() {
        let mut tree = DynamicTree::new();
        let near = tree.create_proxy(aabb_at(5.0, 0.0, 1.0), 0);
        let _far = tree.create_proxy(aabb_at(10.0, 0.0, 1.0), 1);
        let _off = tree.create_proxy(aabb_at(5.0, 10.0, 1.0), 2);

        let input = RayCastInput {
            p1: Vec2::ZERO,
            p2: Vec2::new(20.0, 0.0),
            max_fraction: 1.0,
        };

        let mut best = None;
        tree.ray_cast(&input, |sub, id| {
            let aabb = tree.fat_aabb(id);
            match aabb.ray_cast(sub) {
                Some(out) => {
                    best = Some((id, out.fraction));
                    out.fraction
                }
                None => -1.0,
            }
        });

        let (id, fraction) = best.expect("ray should hit a proxy");
        assert_eq!(id, near);
        assert!((fraction - (4.0 - AABB_EXTENSION) / 20.0).abs() < 1e-5);
    }

    #[test]
    fn test_rebuild_bottom_up_and_shift_origin() {
        let mut tree = DynamicTree::new();
        let ids: Vec<usize> = (0..32)
            .map(|i| tree.create_proxy(aabb_at((i % 8) as f32 * 2.5, (i / 8) as f32 * 2.5, 1.0), i))
            .collect();
        tree.rebuild_bottom_up();
        assert!(tree.validate());
        assert!(tree.area_ratio() >= 1.0);

        let before = *tree.fat_aabb(ids[5]);
        tree.shift_origin(Vec2::new(1.0, 2.0));
        let after = tree.fat_aabb(ids[5]);
        assert!((before.min - after.min - Vec2::new(1.0, 2.0)).length() < 1e-5);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Create(f32, f32, f32),
        Move(usize, f32, f32),
        Destroy(usize),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (-50.0f32..50.0, -50.0f32..50.0, 0.1f32..3.0).prop_map(|(x, y, h)| Op::Create(x, y, h)),
            (any::<usize>(), -5.0f32..5.0, -5.0f32..5.0).prop_map(|(i, dx, dy)| Op::Move(i, dx, dy)),
            any::<usize>().prop_map(Op::Destroy),
        ]
    }

    proptest! {
        #[test]
        fn test_tree_invariants_hold(ops in prop::collection::vec(op_strategy(), 1..200)) {
            let mut tree = DynamicTree::new();
            let mut live: Vec<(usize, Aabb)> = Vec::new();

            for op in ops {
                match op {
                    Op::Create(x, y, h) => {
                        let aabb = aabb_at(x, y, h);
                        let id = tree.create_proxy(aabb, live.len());
                        live.push((id, aabb));
                    }
                    Op::Move(i, dx, dy) if !live.is_empty() => {
                        let slot = i % live.len();
                        let (id, aabb) = live[slot];
                        let d = Vec2::new(dx, dy);
                        let moved = Aabb::new(aabb.min + d, aabb.max + d);
                        tree.move_proxy(id, moved, d);
                        live[slot].1 = moved;
                    }
                    Op::Destroy(i) if !live.is_empty() => {
                        let slot = i % live.len();
                        let (id, _) = live.swap_remove(slot);
                        tree.destroy_proxy(id);
                    }
                    _ => {}
                }

                prop_assert!(tree.validate());
                prop_assert!(tree.max_balance() <= 1);
                for (id, aabb) in &live {
                    prop_assert!(tree.fat_aabb(*id).contains(aabb));
                }
            }
        }
    }
}
