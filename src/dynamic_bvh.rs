//! Dynamic AABB Tree (Incremental BVH)
//!
//! A self-balancing binary tree of AABBs. The broad phase keeps one leaf per
//! object shape in it, and concave shapes keep one leaf per triangle.
//!
//! # Features
//!
//! - **Incremental updates**: insert, remove and move leaves without a rebuild
//! - **Fat AABBs**: an optional margin around each leaf so that small motions
//!   do not re-insert
//! - **SAH insertion**: sibling choice by surface-area cost
//! - **AVL rotations**: height difference between siblings stays at most one
//! - **Deterministic**: fixed-point comparisons, explicit traversal order

use crate::math::{Fix128, Vec3Fix, AABB};

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

/// Null node sentinel
pub const NULL_NODE: u32 = u32::MAX;

#[derive(Clone, Debug)]
struct Node<T> {
    /// Fat AABB for leaves, union of children for branches
    aabb: AABB,
    parent: u32,
    children: [u32; 2],
    /// -1 when the node sits on the free list
    height: i32,
    /// `Some` exactly for leaves
    payload: Option<T>,
}

impl<T> Node<T> {
    fn empty() -> Self {
        Self {
            aabb: AABB::default(),
            parent: NULL_NODE,
            children: [NULL_NODE, NULL_NODE],
            height: -1,
            payload: None,
        }
    }

    #[inline]
    fn is_leaf(&self) -> bool {
        self.payload.is_some()
    }
}

/// Dynamic AABB tree carrying a `Copy` payload per leaf
#[derive(Clone, Debug)]
pub struct AabbTree<T: Copy> {
    nodes: Vec<Node<T>>,
    free_list: Vec<u32>,
    root: u32,
    leaf_count: usize,
    /// Amount each leaf AABB is enlarged by on every side
    pub margin: Fix128,
}

impl<T: Copy> Default for AabbTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy> AabbTree<T> {
    /// Empty tree with tight leaves
    pub fn new() -> Self {
        Self::with_margin(Fix128::ZERO)
    }

    /// Empty tree whose leaves are fattened by `margin`
    pub fn with_margin(margin: Fix128) -> Self {
        Self {
            nodes: Vec::new(),
            free_list: Vec::new(),
            root: NULL_NODE,
            leaf_count: 0,
            margin,
        }
    }

    /// Insert a leaf, returning its node id
    pub fn insert(&mut self, aabb: AABB, payload: T) -> u32 {
        let id = self.alloc_node();
        let node = &mut self.nodes[id as usize];
        node.aabb = aabb.grow(self.margin);
        node.height = 0;
        node.payload = Some(payload);
        self.insert_leaf(id);
        self.leaf_count += 1;
        id
    }

    /// Remove a leaf, returning its payload
    pub fn remove(&mut self, id: u32) -> Option<T> {
        let payload = self.nodes.get(id as usize)?.payload?;
        self.remove_leaf(id);
        self.free_node(id);
        self.leaf_count -= 1;
        Some(payload)
    }

    /// Move a leaf. Re-inserts only when `aabb` escapes the fat bounds;
    /// returns true when the tree changed.
    pub fn update(&mut self, id: u32, aabb: AABB) -> bool {
        match self.nodes.get(id as usize) {
            Some(node) if node.is_leaf() => {
                if node.aabb.contains(&aabb) {
                    return false;
                }
            }
            _ => return false,
        }
        self.remove_leaf(id);
        self.nodes[id as usize].aabb = aabb.grow(self.margin);
        self.insert_leaf(id);
        true
    }

    /// Payload of a leaf
    #[inline]
    pub fn payload(&self, id: u32) -> Option<T> {
        self.nodes.get(id as usize).and_then(|n| n.payload)
    }

    /// Fat AABB of a leaf
    #[inline]
    pub fn fat_aabb(&self, id: u32) -> Option<AABB> {
        self.nodes
            .get(id as usize)
            .filter(|n| n.is_leaf())
            .map(|n| n.aabb)
    }

    /// Number of leaves
    #[inline]
    pub fn len(&self) -> usize {
        self.leaf_count
    }

    /// True when the tree has no leaves
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.leaf_count == 0
    }

    /// Height of the root (0 for a single leaf or an empty tree)
    pub fn height(&self) -> i32 {
        if self.root == NULL_NODE {
            0
        } else {
            self.nodes[self.root as usize].height
        }
    }

    /// Visit leaves whose fat AABB overlaps `aabb`.
    /// The visitor returns false to stop the traversal.
    pub fn query_aabb<F: FnMut(u32, T) -> bool>(&self, aabb: &AABB, visit: F) {
        self.traverse(|b| b.intersects(aabb), visit);
    }

    /// Visit leaves whose fat AABB contains `point`
    pub fn query_point<F: FnMut(u32, T) -> bool>(&self, point: Vec3Fix, visit: F) {
        self.traverse(|b| b.has_point(point), visit);
    }

    /// Visit leaves whose fat AABB is crossed by the segment `from -> to`
    pub fn query_segment<F: FnMut(u32, T) -> bool>(&self, from: Vec3Fix, to: Vec3Fix, visit: F) {
        self.traverse(|b| b.intersects_segment(from, to), visit);
    }

    /// Collect every payload overlapping `aabb`
    pub fn collect_aabb(&self, aabb: &AABB) -> Vec<T> {
        let mut out = Vec::new();
        self.query_aabb(aabb, |_, p| {
            out.push(p);
            true
        });
        out
    }

    fn traverse<P, F>(&self, mut accept: P, mut visit: F)
    where
        P: FnMut(&AABB) -> bool,
        F: FnMut(u32, T) -> bool,
    {
        if self.root == NULL_NODE {
            return;
        }
        let mut stack: Vec<u32> = Vec::with_capacity(64);
        stack.push(self.root);
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id as usize];
            if !accept(&node.aabb) {
                continue;
            }
            match node.payload {
                Some(p) => {
                    if !visit(id, p) {
                        return;
                    }
                }
                None => {
                    // right pushed first so the left subtree is visited first
                    stack.push(node.children[1]);
                    stack.push(node.children[0]);
                }
            }
        }
    }

    // ---------------------------------------------------------------------
    // Node pool
    // ---------------------------------------------------------------------

    fn alloc_node(&mut self) -> u32 {
        match self.free_list.pop() {
            Some(id) => {
                self.nodes[id as usize] = Node::empty();
                id
            }
            None => {
                self.nodes.push(Node::empty());
                (self.nodes.len() - 1) as u32
            }
        }
    }

    fn free_node(&mut self, id: u32) {
        self.nodes[id as usize] = Node::empty();
        self.free_list.push(id);
    }

    // ---------------------------------------------------------------------
    // Structure
    // ---------------------------------------------------------------------

    fn insert_leaf(&mut self, leaf: u32) {
        if self.root == NULL_NODE {
            self.root = leaf;
            self.nodes[leaf as usize].parent = NULL_NODE;
            return;
        }

        let leaf_aabb = self.nodes[leaf as usize].aabb;
        let mut sibling = self.root;
        while !self.nodes[sibling as usize].is_leaf() {
            let node = &self.nodes[sibling as usize];
            let area = node.aabb.surface_area();
            let combined_area = node.aabb.union(&leaf_aabb).surface_area();

            // cost of pairing with this node vs. pushing the leaf down
            let direct = combined_area.double();
            let inherited = (combined_area - area).double();
            let [c0, c1] = node.children;
            let cost0 = self.descend_cost(c0, &leaf_aabb) + inherited;
            let cost1 = self.descend_cost(c1, &leaf_aabb) + inherited;

            if direct < cost0 && direct < cost1 {
                break;
            }
            sibling = if cost0 <= cost1 { c0 } else { c1 };
        }

        let old_parent = self.nodes[sibling as usize].parent;
        let branch = self.alloc_node();
        {
            let sibling_aabb = self.nodes[sibling as usize].aabb;
            let sibling_height = self.nodes[sibling as usize].height;
            let node = &mut self.nodes[branch as usize];
            node.parent = old_parent;
            node.aabb = leaf_aabb.union(&sibling_aabb);
            node.height = sibling_height + 1;
            node.children = [sibling, leaf];
        }
        self.replace_child(old_parent, sibling, branch);
        self.nodes[sibling as usize].parent = branch;
        self.nodes[leaf as usize].parent = branch;

        self.refit_from(branch);
    }

    fn descend_cost(&self, child: u32, leaf_aabb: &AABB) -> Fix128 {
        let node = &self.nodes[child as usize];
        let combined = node.aabb.union(leaf_aabb).surface_area();
        if node.is_leaf() {
            combined
        } else {
            combined - node.aabb.surface_area()
        }
    }

    fn remove_leaf(&mut self, leaf: u32) {
        if leaf == self.root {
            self.root = NULL_NODE;
            return;
        }
        let parent = self.nodes[leaf as usize].parent;
        let grand_parent = self.nodes[parent as usize].parent;
        let [c0, c1] = self.nodes[parent as usize].children;
        let sibling = if c0 == leaf { c1 } else { c0 };

        self.replace_child(grand_parent, parent, sibling);
        self.nodes[sibling as usize].parent = grand_parent;
        self.free_node(parent);
        self.nodes[leaf as usize].parent = NULL_NODE;

        if grand_parent != NULL_NODE {
            self.refit_from(grand_parent);
        }
    }

    /// Point `parent`'s link at `old` to `new` (or the root when `parent` is null)
    fn replace_child(&mut self, parent: u32, old: u32, new: u32) {
        if parent == NULL_NODE {
            self.root = new;
            return;
        }
        let children = &mut self.nodes[parent as usize].children;
        if children[0] == old {
            children[0] = new;
        } else {
            children[1] = new;
        }
    }

    fn refit(&mut self, id: u32) {
        let [c0, c1] = self.nodes[id as usize].children;
        let (a, b) = (&self.nodes[c0 as usize], &self.nodes[c1 as usize]);
        let aabb = a.aabb.union(&b.aabb);
        let height = 1 + a.height.max(b.height);
        let node = &mut self.nodes[id as usize];
        node.aabb = aabb;
        node.height = height;
    }

    fn refit_from(&mut self, start: u32) {
        let mut id = start;
        while id != NULL_NODE {
            id = self.balance(id);
            self.refit(id);
            id = self.nodes[id as usize].parent;
        }
    }

    /// Rotate the taller child up when the children differ in height by more
    /// than one; returns the node now occupying `id`'s position.
    fn balance(&mut self, id: u32) -> u32 {
        let node = &self.nodes[id as usize];
        if node.is_leaf() || node.height < 2 {
            return id;
        }
        let [c0, c1] = node.children;
        let diff = self.nodes[c1 as usize].height - self.nodes[c0 as usize].height;
        if diff > 1 {
            self.rotate_up(id, 1)
        } else if diff < -1 {
            self.rotate_up(id, 0)
        } else {
            id
        }
    }

    /// Promote child `side` of `id`. The promoted node keeps its taller
    /// grandchild and hands the shorter one down to `id`.
    fn rotate_up(&mut self, id: u32, side: usize) -> u32 {
        let up = self.nodes[id as usize].children[side];
        let [g0, g1] = self.nodes[up as usize].children;
        let parent = self.nodes[id as usize].parent;

        let (keep, give) = if self.nodes[g0 as usize].height > self.nodes[g1 as usize].height {
            (g0, g1)
        } else {
            (g1, g0)
        };

        self.nodes[up as usize].children = [id, keep];
        self.nodes[up as usize].parent = parent;
        self.nodes[id as usize].parent = up;
        self.nodes[id as usize].children[side] = give;
        self.nodes[give as usize].parent = id;
        self.nodes[keep as usize].parent = up;
        self.replace_child(parent, id, up);

        self.refit(id);
        self.refit(up);
        up
    }
}
