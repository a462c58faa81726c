//! Replacement engine: victim selection and recency reordering.
//!
//! FIFO and LRU share one representation: within a set, way 0 is the most
//! recently inserted (or used) entry and way `ways - 1` the oldest, so
//! insertion always displaces the last way and shifts the rest right. The
//! two differ only on a hit, where LRU rotates the hit way back to the
//! front and FIFO leaves the order alone. MRU mirrors LRU with way
//! `ways - 1` as the hot slot, and RR draws the victim way from the
//! injected generator.
//!
//! Whenever ways are shifted, the sub-block touch bits move with their
//! entries; the bits of a displaced way are consulted (for the non-temporal
//! decision) before anything overwrites them.

use rand::Rng;

use super::entry::{CacheEntry, EntryStore};

/// The four supported replacement policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplacementPolicy {
    /// First-in first-out: insertion order only, hits do not reorder.
    Fifo,
    /// Least recently used: hits rotate the way to the front.
    Lru,
    /// Most recently used: the hot slot is replaced first.
    Mru,
    /// Random replacement, drawn from the hierarchy's seeded generator.
    Rr,
}

impl ReplacementPolicy {
    /// Map a configuration id (0 = FIFO, 1 = LRU, 2 = MRU, 3 = RR) to a
    /// policy.
    pub fn from_id(id: i64) -> Option<Self> {
        match id {
            0 => Some(Self::Fifo),
            1 => Some(Self::Lru),
            2 => Some(Self::Mru),
            3 => Some(Self::Rr),
            _ => None,
        }
    }

    /// The configuration id of this policy.
    pub fn id(self) -> i64 {
        match self {
            Self::Fifo => 0,
            Self::Lru => 1,
            Self::Mru => 2,
            Self::Rr => 3,
        }
    }

    /// Whether a hit mutates the recency order.
    pub fn reorders_on_hit(self) -> bool {
        matches!(self, Self::Lru | Self::Mru)
    }
}

/// Outcome of inserting a new entry into a set.
#[derive(Debug, Clone, Copy)]
pub struct Insertion {
    /// Way the new entry was written to.
    pub way: usize,
    /// The entry that was displaced to make room. May be vacant.
    pub displaced: CacheEntry,
    /// Whether every touch bit of the displaced way was set, read out
    /// before the bits were moved or cleared. `None` when the level tracks
    /// no sub-blocks.
    pub displaced_fully_touched: Option<bool>,
}

/// Insert `entry` into `set_id`, displacing a victim chosen by `policy`.
///
/// `legacy_mru` selects the legacy MRU behavior (overwrite the hot slot,
/// report way 0 as displaced, no reorder), kept for bit-for-bit counter
/// parity with historic traces; the default is the mirror-of-LRU semantics.
pub fn insert_entry<R: Rng>(
    store: &mut EntryStore,
    policy: ReplacementPolicy,
    legacy_mru: bool,
    set_id: usize,
    entry: CacheEntry,
    rng: &mut R,
) -> Insertion {
    let ways = store.ways();
    // `target` is where the new entry lands; `ejected_way` is the slot whose
    // occupant leaves the set. They coincide except for FIFO/LRU, which eject
    // the last way but write at way 0 after the shift.
    let (target, ejected_way, displaced) = match policy {
        ReplacementPolicy::Fifo | ReplacementPolicy::Lru => {
            (0, ways - 1, store.get(set_id, ways - 1))
        }
        ReplacementPolicy::Mru if legacy_mru => (ways - 1, ways - 1, store.get(set_id, 0)),
        ReplacementPolicy::Mru => (ways - 1, ways - 1, store.get(set_id, ways - 1)),
        ReplacementPolicy::Rr => {
            let way = rng.gen_range(0..ways);
            (way, way, store.get(set_id, way))
        }
    };

    // Consult the ejected way's touch bits before any shift overwrites them.
    let displaced_fully_touched = store
        .touch()
        .map(|touch| touch.way_fully_touched(set_id, ejected_way));

    if matches!(policy, ReplacementPolicy::Fifo | ReplacementPolicy::Lru) {
        store.shift_right(set_id, ways - 1);
    }

    store.put(set_id, target, entry);
    if let Some(touch) = store.touch_mut() {
        touch.clear_way(set_id, target);
    }

    Insertion {
        way: target,
        displaced,
        displaced_fully_touched,
    }
}

/// Reorder a set after a hit on `way`, returning the hit entry's new way.
///
/// FIFO and RR leave the order unchanged. LRU rotates the hit way to way 0;
/// MRU rotates it to the far end, or in legacy mode to way 0 like LRU.
pub fn promote_on_hit(
    store: &mut EntryStore,
    policy: ReplacementPolicy,
    legacy_mru: bool,
    set_id: usize,
    way: usize,
) -> usize {
    match policy {
        ReplacementPolicy::Fifo | ReplacementPolicy::Rr => way,
        ReplacementPolicy::Lru => promote_to_front(store, set_id, way),
        ReplacementPolicy::Mru if legacy_mru => promote_to_front(store, set_id, way),
        ReplacementPolicy::Mru => {
            let last = store.ways() - 1;
            if way != last {
                let hit = store.get(set_id, way);
                let bits = store.touch().map(|t| t.snapshot_way(set_id, way));
                store.shift_left(set_id, way);
                store.put(set_id, last, hit);
                if let (Some(touch), Some(bits)) = (store.touch_mut(), bits) {
                    touch.restore_way(set_id, last, &bits);
                }
            }
            last
        }
    }
}

// The shift copies neighbor bits over the hit slot, so the hit way's own
// bits are snapshotted first and rebuilt at the destination.
fn promote_to_front(store: &mut EntryStore, set_id: usize, way: usize) -> usize {
    if way != 0 {
        let hit = store.get(set_id, way);
        let bits = store.touch().map(|t| t.snapshot_way(set_id, way));
        store.shift_right(set_id, way);
        store.put(set_id, 0, hit);
        if let (Some(touch), Some(bits)) = (store.touch_mut(), bits) {
            touch.restore_way(set_id, 0, &bits);
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn filled_store(ways: usize) -> EntryStore {
        let mut store = EntryStore::new(1, ways, None);
        for way in 0..ways {
            store.put(0, way, CacheEntry::clean(way as u64));
        }
        store
    }

    #[test]
    fn test_fifo_insert_displaces_oldest() {
        let mut store = filled_store(3);
        let mut rng = SmallRng::seed_from_u64(0);
        let out = insert_entry(
            &mut store,
            ReplacementPolicy::Fifo,
            false,
            0,
            CacheEntry::clean(9),
            &mut rng,
        );
        assert_eq!(out.way, 0);
        assert_eq!(out.displaced.cl_id, 2);
        assert!(!out.displaced.invalid);
        // Order is now 9, 0, 1.
        assert_eq!(store.get(0, 0).cl_id, 9);
        assert_eq!(store.get(0, 1).cl_id, 0);
        assert_eq!(store.get(0, 2).cl_id, 1);
    }

    #[test]
    fn test_lru_hit_promotes_to_front() {
        let mut store = filled_store(3);
        let new_way = promote_on_hit(&mut store, ReplacementPolicy::Lru, false, 0, 2);
        assert_eq!(new_way, 0);
        assert_eq!(store.get(0, 0).cl_id, 2);
        assert_eq!(store.get(0, 1).cl_id, 0);
        assert_eq!(store.get(0, 2).cl_id, 1);
    }

    #[test]
    fn test_lru_hit_preserves_dirty() {
        let mut store = EntryStore::new(1, 2, None);
        store.put(0, 0, CacheEntry::clean(0));
        store.put(0, 1, CacheEntry::dirty(1));
        promote_on_hit(&mut store, ReplacementPolicy::Lru, false, 0, 1);
        assert!(store.get(0, 0).dirty);
        assert_eq!(store.get(0, 0).cl_id, 1);
    }

    #[test]
    fn test_fifo_hit_keeps_order() {
        let mut store = filled_store(3);
        let way = promote_on_hit(&mut store, ReplacementPolicy::Fifo, false, 0, 2);
        assert_eq!(way, 2);
        assert_eq!(store.get(0, 0).cl_id, 0);
        assert_eq!(store.get(0, 2).cl_id, 2);
    }

    #[test]
    fn test_mru_insert_displaces_hot_slot() {
        let mut store = filled_store(3);
        let mut rng = SmallRng::seed_from_u64(0);
        let out = insert_entry(
            &mut store,
            ReplacementPolicy::Mru,
            false,
            0,
            CacheEntry::clean(9),
            &mut rng,
        );
        assert_eq!(out.way, 2);
        assert_eq!(out.displaced.cl_id, 2);
        assert_eq!(store.get(0, 2).cl_id, 9);
        // Other ways untouched.
        assert_eq!(store.get(0, 0).cl_id, 0);
        assert_eq!(store.get(0, 1).cl_id, 1);
    }

    #[test]
    fn test_mru_hit_promotes_to_far_end() {
        let mut store = filled_store(3);
        let way = promote_on_hit(&mut store, ReplacementPolicy::Mru, false, 0, 0);
        assert_eq!(way, 2);
        assert_eq!(store.get(0, 2).cl_id, 0);
        assert_eq!(store.get(0, 0).cl_id, 1);
        assert_eq!(store.get(0, 1).cl_id, 2);
    }

    #[test]
    fn test_mru_legacy_reports_way_zero() {
        let mut store = filled_store(3);
        let mut rng = SmallRng::seed_from_u64(0);
        let out = insert_entry(
            &mut store,
            ReplacementPolicy::Mru,
            true,
            0,
            CacheEntry::clean(9),
            &mut rng,
        );
        assert_eq!(out.way, 2);
        assert_eq!(out.displaced.cl_id, 0);
        // No reorder: way 0 keeps its entry, the hot slot is overwritten.
        assert_eq!(store.get(0, 0).cl_id, 0);
        assert_eq!(store.get(0, 2).cl_id, 9);
    }

    #[test]
    fn test_rr_victim_within_bounds_and_seeded() {
        let mut rng_a = SmallRng::seed_from_u64(1234);
        let mut rng_b = SmallRng::seed_from_u64(1234);
        for _ in 0..32 {
            let mut store_a = filled_store(4);
            let mut store_b = filled_store(4);
            let out_a = insert_entry(
                &mut store_a,
                ReplacementPolicy::Rr,
                false,
                0,
                CacheEntry::clean(9),
                &mut rng_a,
            );
            let out_b = insert_entry(
                &mut store_b,
                ReplacementPolicy::Rr,
                false,
                0,
                CacheEntry::clean(9),
                &mut rng_b,
            );
            assert!(out_a.way < 4);
            assert_eq!(out_a.way, out_b.way);
        }
    }

    #[test]
    fn test_insert_clears_touch_bits_after_consulting() {
        let mut store = EntryStore::new(1, 2, Some(4));
        store.put(0, 0, CacheEntry::dirty(0));
        store.put(0, 1, CacheEntry::dirty(1));
        store.touch_mut().unwrap().set_range(0, 1, 0, 4);
        let mut rng = SmallRng::seed_from_u64(0);
        let out = insert_entry(
            &mut store,
            ReplacementPolicy::Lru,
            false,
            0,
            CacheEntry::dirty(2),
            &mut rng,
        );
        // The displaced way (old way 1) was fully touched.
        assert_eq!(out.displaced.cl_id, 1);
        assert_eq!(out.displaced_fully_touched, Some(true));
        // Way 0's old bits (all clear) moved to way 1; the new entry at way
        // 0 starts untouched.
        assert!(!store.touch().unwrap().way_fully_touched(0, 0));
        assert!(!store.touch().unwrap().way_fully_touched(0, 1));
    }

    #[test]
    fn test_lru_hit_carries_touch_bits() {
        let mut store = EntryStore::new(1, 3, Some(4));
        for way in 0..3 {
            store.put(0, way, CacheEntry::dirty(way as u64));
        }
        store.touch_mut().unwrap().set_range(0, 2, 0, 4);
        promote_on_hit(&mut store, ReplacementPolicy::Lru, false, 0, 2);
        // The fully touched way rotated to the front; the bits came along.
        assert!(store.touch().unwrap().way_fully_touched(0, 0));
        assert!(!store.touch().unwrap().way_fully_touched(0, 1));
        assert!(!store.touch().unwrap().way_fully_touched(0, 2));
    }

    #[test]
    fn test_policy_ids_roundtrip() {
        for id in 0..4 {
            assert_eq!(ReplacementPolicy::from_id(id).unwrap().id(), id);
        }
        assert!(ReplacementPolicy::from_id(4).is_none());
        assert!(ReplacementPolicy::from_id(-1).is_none());
    }
}
