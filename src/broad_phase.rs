//! Broad Phase
//!
//! Maps shape-instance AABBs to candidate pairs. Leaves are created per shape
//! instance; when two leaves start overlapping the pair callback runs and its
//! return value is kept as per-pair data until the unpair callback receives
//! it back.
//!
//! # Features
//!
//! - `BroadPhase<U>` strategy trait, selected through a factory function
//! - `BvhBroadPhase<U>`: dynamic AABB tree with fattened leaves
//! - Deferred pairing: `move_aabb` only marks a leaf dirty, `update` pairs
//! - Point, segment and AABB culling for space queries
//!
//! Handles are `BroadPhaseId(u32)`; zero is never handed out.

use core::marker::PhantomData;

use crate::collision_object::Rid;
use crate::constraint::ConstraintKey;
use crate::dynamic_bvh::AabbTree;
use crate::math::{Fix128, Vec3Fix, AABB};

#[cfg(not(feature = "std"))]
use alloc::{boxed::Box, vec::Vec};

/// Opaque broad-phase leaf handle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BroadPhaseId(pub u32);

impl BroadPhaseId {
    /// The reserved invalid handle
    pub const INVALID: Self = Self(0);

    #[inline]
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

/// Owner of a leaf: object and shape index
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LeafOwner {
    pub object: Rid,
    pub subindex: usize,
}

/// Called when two leaves start overlapping; the result is kept as pair data
pub type PairCallback<U> = fn(&mut U, LeafOwner, LeafOwner) -> Option<ConstraintKey>;

/// Called when two leaves stop overlapping (or one is removed)
pub type UnpairCallback<U> = fn(&mut U, LeafOwner, LeafOwner, Option<ConstraintKey>);

/// Creates a broad-phase strategy for a new space
pub type BroadPhaseFactory<U> = fn() -> Box<dyn BroadPhase<U>>;

/// Broad-phase strategy
///
/// Handles must come from `create` on the same instance. Passing anything
/// else is a programming error: implementations log it and ignore the call.
pub trait BroadPhase<U>: Send {
    /// Insert a leaf and return its handle
    fn create(&mut self, object: Rid, subindex: usize, aabb: AABB, is_static: bool) -> BroadPhaseId;

    /// Update a leaf's bounds; pairing changes are applied by `update`
    fn move_aabb(&mut self, id: BroadPhaseId, aabb: AABB);

    /// Reclassify a leaf; static leaves never pair with each other
    fn set_static(&mut self, id: BroadPhaseId, is_static: bool);

    /// Delete a leaf, firing the unpair callback for each of its pairs
    fn remove(&mut self, id: BroadPhaseId, user: &mut U);

    fn get_owner(&self, id: BroadPhaseId) -> Option<LeafOwner>;

    fn is_static(&self, id: BroadPhaseId) -> bool;

    /// Leaves whose bounds contain `point`; returns the number appended
    fn cull_point(&self, point: Vec3Fix, results: &mut Vec<LeafOwner>, max: usize) -> usize;

    /// Leaves whose bounds are crossed by the segment
    fn cull_segment(
        &self,
        from: Vec3Fix,
        to: Vec3Fix,
        results: &mut Vec<LeafOwner>,
        max: usize,
    ) -> usize;

    /// Leaves whose bounds overlap `aabb`
    fn cull_aabb(&self, aabb: &AABB, results: &mut Vec<LeafOwner>, max: usize) -> usize;

    fn set_pair_callback(&mut self, callback: PairCallback<U>);

    fn set_unpair_callback(&mut self, callback: UnpairCallback<U>);

    /// Create and destroy pairs for every leaf moved since the last update
    fn update(&mut self, user: &mut U);

    /// Number of live pairs
    fn pair_count(&self) -> usize;
}

// ============================================================================
// BVH strategy
// ============================================================================

#[derive(Clone, Debug)]
struct Leaf {
    owner: LeafOwner,
    aabb: AABB,
    node: u32,
    is_static: bool,
    dirty: bool,
    /// Paired leaf ids with their pair data
    pairs: Vec<(u32, Option<ConstraintKey>)>,
}

/// Broad phase over a dynamic AABB tree
pub struct BvhBroadPhase<U> {
    /// Slot `i` holds leaf id `i + 1`
    leaves: Vec<Option<Leaf>>,
    free_ids: Vec<u32>,
    tree: AabbTree<u32>,
    dirty: Vec<u32>,
    pair_count: usize,
    pair_callback: Option<PairCallback<U>>,
    unpair_callback: Option<UnpairCallback<U>>,
    _user: PhantomData<fn(&mut U)>,
}

/// Leaf fattening used by [`BvhBroadPhase::new`]
pub const DEFAULT_LEAF_MARGIN: Fix128 = Fix128 {
    hi: 0,
    lo: 0x1999_9999_9999_999A, // 0.1
};

impl<U> Default for BvhBroadPhase<U> {
    fn default() -> Self {
        Self::new()
    }
}

impl<U: 'static> BvhBroadPhase<U> {
    /// Factory for [`Space::with_broad_phase`](crate::space::Space::with_broad_phase)
    pub fn create_boxed() -> Box<dyn BroadPhase<U>> {
        Box::new(Self::new())
    }
}

impl<U> BvhBroadPhase<U> {
    pub fn new() -> Self {
        Self {
            leaves: Vec::new(),
            free_ids: Vec::new(),
            tree: AabbTree::with_margin(DEFAULT_LEAF_MARGIN),
            dirty: Vec::new(),
            pair_count: 0,
            pair_callback: None,
            unpair_callback: None,
            _user: PhantomData,
        }
    }

    fn leaf(&self, id: u32) -> Option<&Leaf> {
        if id == 0 {
            return None;
        }
        self.leaves.get(id as usize - 1).and_then(|l| l.as_ref())
    }

    fn leaf_mut(&mut self, id: u32) -> Option<&mut Leaf> {
        if id == 0 {
            return None;
        }
        self.leaves.get_mut(id as usize - 1).and_then(|l| l.as_mut())
    }

    fn mark_dirty(&mut self, id: u32) {
        if let Some(leaf) = self.leaf_mut(id) {
            if !leaf.dirty {
                leaf.dirty = true;
                self.dirty.push(id);
            }
        }
    }

    fn can_pair(a: &Leaf, b: &Leaf) -> bool {
        !(a.is_static && b.is_static) && a.owner.object != b.owner.object
    }

    fn is_paired(&self, a: u32, b: u32) -> bool {
        self.leaf(a)
            .map_or(false, |l| l.pairs.iter().any(|(other, _)| *other == b))
    }

    fn add_pair(&mut self, a: u32, b: u32, user: &mut U) {
        let (Some(la), Some(lb)) = (self.leaf(a), self.leaf(b)) else {
            return;
        };
        let (oa, ob) = (la.owner, lb.owner);
        let data = match self.pair_callback {
            Some(cb) => cb(user, oa, ob),
            None => None,
        };
        if let Some(l) = self.leaf_mut(a) {
            l.pairs.push((b, data));
        }
        if let Some(l) = self.leaf_mut(b) {
            l.pairs.push((a, data));
        }
        self.pair_count += 1;
    }

    fn remove_pair(&mut self, a: u32, b: u32, user: &mut U) {
        let mut data = None;
        let mut owner_a = None;
        if let Some(l) = self.leaf_mut(a) {
            if let Some(pos) = l.pairs.iter().position(|(o, _)| *o == b) {
                data = l.pairs.remove(pos).1;
                owner_a = Some(l.owner);
            }
        }
        let mut owner_b = None;
        if let Some(l) = self.leaf_mut(b) {
            l.pairs.retain(|(o, _)| *o != a);
            owner_b = Some(l.owner);
        }
        if let (Some(oa), Some(ob)) = (owner_a, owner_b) {
            self.pair_count = self.pair_count.saturating_sub(1);
            if let Some(cb) = self.unpair_callback {
                cb(user, oa, ob, data);
            }
        }
    }

    fn collect<F>(&self, results: &mut Vec<LeafOwner>, max: usize, query: F) -> usize
    where
        F: FnOnce(&mut dyn FnMut(u32, u32) -> bool),
    {
        let start = results.len();
        let mut visit = |_node: u32, id: u32| {
            if results.len() - start >= max {
                return false;
            }
            if let Some(leaf) = self.leaf(id) {
                results.push(leaf.owner);
            }
            results.len() - start < max
        };
        query(&mut visit);
        results.len() - start
    }
}

impl<U> BroadPhase<U> for BvhBroadPhase<U> {
    fn create(&mut self, object: Rid, subindex: usize, aabb: AABB, is_static: bool) -> BroadPhaseId {
        let id = match self.free_ids.pop() {
            Some(id) => id,
            None => {
                self.leaves.push(None);
                self.leaves.len() as u32
            }
        };
        let node = self.tree.insert(aabb, id);
        self.leaves[id as usize - 1] = Some(Leaf {
            owner: LeafOwner { object, subindex },
            aabb,
            node,
            is_static,
            dirty: false,
            pairs: Vec::new(),
        });
        self.mark_dirty(id);
        BroadPhaseId(id)
    }

    fn move_aabb(&mut self, id: BroadPhaseId, aabb: AABB) {
        let Some(leaf) = self.leaf_mut(id.0) else {
            log::error!("broad phase: move on invalid leaf {}", id.0);
            return;
        };
        leaf.aabb = aabb;
        let node = leaf.node;
        self.tree.update(node, aabb);
        self.mark_dirty(id.0);
    }

    fn set_static(&mut self, id: BroadPhaseId, is_static: bool) {
        let Some(leaf) = self.leaf_mut(id.0) else {
            log::error!("broad phase: set_static on invalid leaf {}", id.0);
            return;
        };
        if leaf.is_static != is_static {
            leaf.is_static = is_static;
            self.mark_dirty(id.0);
        }
    }

    fn remove(&mut self, id: BroadPhaseId, user: &mut U) {
        let Some(leaf) = self.leaf(id.0) else {
            log::error!("broad phase: remove on invalid leaf {}", id.0);
            return;
        };
        let partners: Vec<u32> = leaf.pairs.iter().map(|(o, _)| *o).collect();
        let node = leaf.node;
        for other in partners {
            self.remove_pair(id.0, other, user);
        }
        self.tree.remove(node);
        self.leaves[id.0 as usize - 1] = None;
        self.dirty.retain(|d| *d != id.0);
        self.free_ids.push(id.0);
    }

    fn get_owner(&self, id: BroadPhaseId) -> Option<LeafOwner> {
        self.leaf(id.0).map(|l| l.owner)
    }

    fn is_static(&self, id: BroadPhaseId) -> bool {
        self.leaf(id.0).map_or(false, |l| l.is_static)
    }

    fn cull_point(&self, point: Vec3Fix, results: &mut Vec<LeafOwner>, max: usize) -> usize {
        self.collect(results, max, |visit| {
            self.tree.query_point(point, |node, id| {
                let inside = self.leaf(id).map_or(false, |l| l.aabb.has_point(point));
                !inside || visit(node, id)
            })
        })
    }

    fn cull_segment(
        &self,
        from: Vec3Fix,
        to: Vec3Fix,
        results: &mut Vec<LeafOwner>,
        max: usize,
    ) -> usize {
        self.collect(results, max, |visit| {
            self.tree.query_segment(from, to, |node, id| {
                let crossed = self
                    .leaf(id)
                    .map_or(false, |l| l.aabb.intersects_segment(from, to));
                !crossed || visit(node, id)
            })
        })
    }

    fn cull_aabb(&self, aabb: &AABB, results: &mut Vec<LeafOwner>, max: usize) -> usize {
        self.collect(results, max, |visit| {
            self.tree.query_aabb(aabb, |node, id| {
                let hit = self.leaf(id).map_or(false, |l| l.aabb.intersects(aabb));
                !hit || visit(node, id)
            })
        })
    }

    fn set_pair_callback(&mut self, callback: PairCallback<U>) {
        self.pair_callback = Some(callback);
    }

    fn set_unpair_callback(&mut self, callback: UnpairCallback<U>) {
        self.unpair_callback = Some(callback);
    }

    fn update(&mut self, user: &mut U) {
        let mut dirty = core::mem::take(&mut self.dirty);
        dirty.sort_unstable();
        for &id in &dirty {
            if let Some(leaf) = self.leaf_mut(id) {
                leaf.dirty = false;
            }
        }

        for &id in &dirty {
            let Some(leaf) = self.leaf(id) else {
                continue;
            };

            // Leavers first
            let leavers: Vec<u32> = leaf
                .pairs
                .iter()
                .map(|(o, _)| *o)
                .filter(|o| {
                    self.leaf(*o)
                        .map_or(true, |other| !other.aabb.intersects(&leaf.aabb) || !Self::can_pair(leaf, other))
                })
                .collect();
            for other in leavers {
                self.remove_pair(id, other, user);
            }

            let Some(leaf) = self.leaf(id) else {
                continue;
            };
            let aabb = leaf.aabb;
            let mut newcomers = Vec::new();
            self.tree.query_aabb(&aabb, |_, other| {
                if other != id {
                    if let Some(o) = self.leaf(other) {
                        if o.aabb.intersects(&aabb) && Self::can_pair(leaf, o) && !self.is_paired(id, other) {
                            newcomers.push(other);
                        }
                    }
                }
                true
            });
            newcomers.sort_unstable();
            for other in newcomers {
                let (a, b) = if id < other { (id, other) } else { (other, id) };
                self.add_pair(a, b, user);
            }
        }
    }

    fn pair_count(&self) -> usize {
        self.pair_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[derive(Default)]
    struct Recorder {
        keys: SlotMap<ConstraintKey, ()>,
        paired: Vec<(LeafOwner, LeafOwner)>,
        unpaired: Vec<(LeafOwner, LeafOwner, Option<ConstraintKey>)>,
    }

    fn on_pair(r: &mut Recorder, a: LeafOwner, b: LeafOwner) -> Option<ConstraintKey> {
        r.paired.push((a, b));
        Some(r.keys.insert(()))
    }

    fn on_unpair(r: &mut Recorder, a: LeafOwner, b: LeafOwner, data: Option<ConstraintKey>) {
        r.unpaired.push((a, b, data));
    }

    fn unit_box(x: i64) -> AABB {
        AABB::new(Vec3Fix::from_int(x, 0, 0), Vec3Fix::from_int(x + 1, 1, 1))
    }

    fn setup() -> (BvhBroadPhase<Recorder>, Recorder, Vec<Rid>) {
        let mut bp = BvhBroadPhase::new();
        bp.set_pair_callback(on_pair);
        bp.set_unpair_callback(on_unpair);
        let mut objects: SlotMap<Rid, ()> = SlotMap::with_key();
        let rids = (0..4).map(|_| objects.insert(())).collect();
        (bp, Recorder::default(), rids)
    }

    #[test]
    fn test_ids_are_nonzero() {
        let (mut bp, _, rids) = setup();
        let id = bp.create(rids[0], 0, unit_box(0), false);
        assert!(id.is_valid());
        assert_ne!(id, BroadPhaseId::INVALID);
    }

    #[test]
    fn test_pair_on_update_only() {
        let (mut bp, mut rec, rids) = setup();
        bp.create(rids[0], 0, unit_box(0), false);
        bp.create(rids[1], 0, unit_box(0), false);
        assert!(rec.paired.is_empty());
        bp.update(&mut rec);
        assert_eq!(rec.paired.len(), 1);
        assert_eq!(bp.pair_count(), 1);
        bp.update(&mut rec);
        assert_eq!(rec.paired.len(), 1);
    }

    #[test]
    fn test_move_apart_unpairs_with_data() {
        let (mut bp, mut rec, rids) = setup();
        let a = bp.create(rids[0], 0, unit_box(0), false);
        bp.create(rids[1], 0, unit_box(0), false);
        bp.update(&mut rec);
        bp.move_aabb(a, unit_box(10));
        bp.update(&mut rec);
        assert_eq!(rec.unpaired.len(), 1);
        assert!(rec.unpaired[0].2.is_some());
        assert_eq!(bp.pair_count(), 0);
    }

    #[test]
    fn test_static_and_same_object_never_pair() {
        let (mut bp, mut rec, rids) = setup();
        bp.create(rids[0], 0, unit_box(0), true);
        bp.create(rids[1], 0, unit_box(0), true);
        bp.create(rids[2], 0, unit_box(0), false);
        bp.create(rids[2], 1, unit_box(0), false);
        bp.update(&mut rec);
        // rids[2] shape 0 and 1 each pair with both statics
        assert_eq!(rec.paired.len(), 4);
        assert!(rec
            .paired
            .iter()
            .all(|(a, b)| a.object != b.object));
    }

    #[test]
    fn test_set_static_breaks_static_pairs() {
        let (mut bp, mut rec, rids) = setup();
        bp.create(rids[0], 0, unit_box(0), true);
        let b = bp.create(rids[1], 0, unit_box(0), false);
        bp.update(&mut rec);
        assert_eq!(bp.pair_count(), 1);
        bp.set_static(b, true);
        bp.update(&mut rec);
        assert_eq!(bp.pair_count(), 0);
        assert_eq!(rec.unpaired.len(), 1);
    }

    #[test]
    fn test_remove_fires_unpair_then_silence() {
        let (mut bp, mut rec, rids) = setup();
        let a = bp.create(rids[0], 0, unit_box(0), false);
        bp.create(rids[1], 0, unit_box(0), false);
        bp.update(&mut rec);
        bp.remove(a, &mut rec);
        assert_eq!(rec.unpaired.len(), 1);
        assert!(bp.get_owner(a).is_none());

        rec.paired.clear();
        rec.unpaired.clear();
        bp.create(rids[2], 0, unit_box(0), false);
        bp.update(&mut rec);
        assert_eq!(rec.paired.len(), 1);
        assert!(rec
            .paired
            .iter()
            .all(|(x, y)| x.object != rids[0] && y.object != rids[0]));
        assert!(rec.unpaired.is_empty());
    }

    #[test]
    fn test_culling_respects_max() {
        let (mut bp, _, rids) = setup();
        for (i, rid) in rids.iter().enumerate() {
            bp.create(*rid, 0, unit_box(i as i64 * 2), false);
        }
        let mut out = Vec::new();
        let n = bp.cull_aabb(
            &AABB::new(Vec3Fix::from_int(-1, -1, -1), Vec3Fix::from_int(100, 2, 2)),
            &mut out,
            2,
        );
        assert_eq!(n, 2);
        assert_eq!(out.len(), 2);

        out.clear();
        let n = bp.cull_point(Vec3Fix::new(Fix128::HALF, Fix128::HALF, Fix128::HALF), &mut out, 16);
        assert_eq!(n, 1);
        assert_eq!(out[0].object, rids[0]);

        out.clear();
        let n = bp.cull_segment(Vec3Fix::from_int(-5, 0, 0), Vec3Fix::from_int(-1, 0, 0), &mut out, 16);
        assert_eq!(n, 0);
    }
}
