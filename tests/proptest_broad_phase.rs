//! Property tests for the BVH broad phase
//!
//! Pairing must not depend on insertion order, must match a brute-force
//! overlap scan, and must go silent for removed leaves.

use std::collections::BTreeSet;

use alice_space::broad_phase::{BroadPhase, BroadPhaseId, BvhBroadPhase, LeafOwner};
use alice_space::{ConstraintKey, Fix128, Rid, Vec3Fix, AABB};
use proptest::prelude::*;
use slotmap::SlotMap;

type PairSet = BTreeSet<((Rid, usize), (Rid, usize))>;

#[derive(Default)]
struct Pairs {
    live: PairSet,
    removed: BTreeSet<(Rid, usize)>,
    ghost: bool,
}

fn key(a: LeafOwner, b: LeafOwner) -> ((Rid, usize), (Rid, usize)) {
    let (a, b) = ((a.object, a.subindex), (b.object, b.subindex));
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn on_pair(p: &mut Pairs, a: LeafOwner, b: LeafOwner) -> Option<ConstraintKey> {
    p.ghost |= p.removed.contains(&(a.object, a.subindex)) || p.removed.contains(&(b.object, b.subindex));
    p.live.insert(key(a, b));
    None
}

fn on_unpair(p: &mut Pairs, a: LeafOwner, b: LeafOwner, _: Option<ConstraintKey>) {
    p.live.remove(&key(a, b));
}

#[derive(Clone, Debug)]
struct Leaf {
    min: (i64, i64, i64),
    size: (i64, i64, i64),
    is_static: bool,
}

impl Leaf {
    fn aabb(&self) -> AABB {
        let (x, y, z) = self.min;
        let (w, h, d) = self.size;
        AABB::new(Vec3Fix::from_int(x, y, z), Vec3Fix::from_int(x + w, y + h, z + d))
    }
}

fn leaf() -> impl Strategy<Value = Leaf> {
    ((-20i64..20, -20i64..20, -20i64..20), (1i64..6, 1i64..6, 1i64..6), prop::bool::weighted(0.3))
        .prop_map(|(min, size, is_static)| Leaf { min, size, is_static })
}

fn build(leaves: &[Leaf], rids: &[Rid], order: &[usize]) -> (BvhBroadPhase<Pairs>, Pairs, Vec<BroadPhaseId>) {
    let mut bp = BvhBroadPhase::new();
    bp.set_pair_callback(on_pair);
    bp.set_unpair_callback(on_unpair);
    let mut ids = vec![BroadPhaseId::INVALID; leaves.len()];
    for &i in order {
        ids[i] = bp.create(rids[i], 0, leaves[i].aabb(), leaves[i].is_static);
    }
    let mut pairs = Pairs::default();
    bp.update(&mut pairs);
    (bp, pairs, ids)
}

fn brute_force(leaves: &[Leaf], rids: &[Rid], alive: impl Fn(usize) -> bool) -> PairSet {
    let mut expected = PairSet::new();
    for i in 0..leaves.len() {
        for j in (i + 1)..leaves.len() {
            if !alive(i) || !alive(j) || (leaves[i].is_static && leaves[j].is_static) {
                continue;
            }
            if leaves[i].aabb().intersects(&leaves[j].aabb()) {
                let a = LeafOwner { object: rids[i], subindex: 0 };
                let b = LeafOwner { object: rids[j], subindex: 0 };
                expected.insert(key(a, b));
            }
        }
    }
    expected
}

fn rids(n: usize) -> Vec<Rid> {
    let mut objects: SlotMap<Rid, ()> = SlotMap::with_key();
    (0..n).map(|_| objects.insert(())).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn pairs_independent_of_insertion_order(leaves in prop::collection::vec(leaf(), 1..24)) {
        let rids = rids(leaves.len());
        let forward: Vec<usize> = (0..leaves.len()).collect();
        let backward: Vec<usize> = forward.iter().rev().copied().collect();

        let (bp_f, pairs_f, _) = build(&leaves, &rids, &forward);
        let (bp_b, pairs_b, _) = build(&leaves, &rids, &backward);

        prop_assert_eq!(&pairs_f.live, &pairs_b.live);
        prop_assert_eq!(&pairs_f.live, &brute_force(&leaves, &rids, |_| true));
        prop_assert_eq!(bp_f.pair_count(), pairs_f.live.len());
        prop_assert_eq!(bp_b.pair_count(), pairs_b.live.len());
    }

    #[test]
    fn removed_leaves_never_pair_again(
        leaves in prop::collection::vec(leaf(), 2..20),
        remove_mask in prop::collection::vec(any::<bool>(), 20),
        shift in -3i64..3,
    ) {
        let rids = rids(leaves.len());
        let order: Vec<usize> = (0..leaves.len()).collect();
        let (mut bp, mut pairs, ids) = build(&leaves, &rids, &order);

        for (i, id) in ids.iter().enumerate() {
            if remove_mask[i] {
                bp.remove(*id, &mut pairs);
                pairs.removed.insert((rids[i], 0));
            }
        }
        // Shake the survivors so they re-query the tree
        for (i, id) in ids.iter().enumerate() {
            if !remove_mask[i] {
                let offset = Vec3Fix::new(Fix128::from_int(shift), Fix128::ZERO, Fix128::ZERO);
                let aabb = leaves[i].aabb();
                bp.move_aabb(*id, AABB::new(aabb.min + offset, aabb.max + offset));
                bp.move_aabb(*id, aabb);
            }
        }
        bp.update(&mut pairs);

        prop_assert!(!pairs.ghost);
        prop_assert!(pairs.live.iter().all(|(a, b)| !pairs.removed.contains(a) && !pairs.removed.contains(b)));
        prop_assert_eq!(&pairs.live, &brute_force(&leaves, &rids, |i| !remove_mask[i]));
    }
}
