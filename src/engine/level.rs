//! A single cache level: geometry, policy flags, storage and counters.
//!
//! A level owns nothing but its own state. The downstream edges are plain
//! handles into the hierarchy arena; all control flow that crosses levels
//! (miss fills, write-backs, victim routing) lives in
//! [`hierarchy`](super::hierarchy), which borrows one level at a time.

use std::collections::BTreeSet;

use rand::Rng;
use thiserror::Error;

use super::entry::{CacheEntry, EntryStore};
use super::hierarchy::LevelId;
use super::line::{is_power_of_two, AddrRange, LineGeometry};
use super::replace::{insert_entry, promote_on_hit, Insertion, ReplacementPolicy};
use super::stats::LevelStats;

/// Geometry constraint violations, fatal at assembly.
#[derive(Error, Debug)]
pub enum GeometryError {
    /// Line size must be a power of two so line ids are a shift.
    #[error("cache level '{name}': cl_size {cl_size} is not a power of two")]
    ClSizeNotPowerOfTwo {
        /// Offending level.
        name: String,
        /// Configured line size.
        cl_size: u64,
    },

    /// Sub-block size must evenly divide the line size.
    #[error("cache level '{name}': subblock_size {subblock_size} does not divide cl_size {cl_size}")]
    SubblockNotDivisor {
        /// Offending level.
        name: String,
        /// Configured sub-block size.
        subblock_size: u64,
        /// Configured line size.
        cl_size: u64,
    },

    /// Both dimensions of the entry array must be at least 1.
    #[error("cache level '{name}': sets and ways must both be at least 1")]
    EmptyGeometry {
        /// Offending level.
        name: String,
    },
}

/// Construction parameters for one cache level.
///
/// `new` fills in the usual defaults (LRU, write-back, write-allocate); the
/// remaining fields are plain and can be set directly.
#[derive(Debug, Clone)]
pub struct LevelParams {
    /// Level identifier, used in logs and for linking.
    pub name: String,
    /// Number of sets. Need not be a power of two.
    pub sets: usize,
    /// Ways per set.
    pub ways: usize,
    /// Bytes per cache line. Must be a power of two.
    pub cl_size: u64,
    /// Bytes per sub-block; `None` means one sub-block spanning the line.
    pub subblock_size: Option<u64>,
    /// Victim selection policy.
    pub replacement_policy: ReplacementPolicy,
    /// Write-back (true) or write-through (false).
    pub write_back: bool,
    /// Load a missed line before storing into it.
    pub write_allocate: bool,
    /// Buffer sub-block writes in the touch bitfield.
    pub write_combining: bool,
    /// Parsed and stored but not acted upon; reserved for an exclusive-cache
    /// mode.
    pub swap_on_load: bool,
    /// Use the legacy MRU behavior (overwrite without reorder) for counter
    /// parity with historic traces.
    pub legacy_mru: bool,
}

impl LevelParams {
    /// Parameters for a `sets x ways` level of `cl_size`-byte lines with the
    /// default policy set (LRU, write-back, write-allocate).
    pub fn new(name: impl Into<String>, sets: usize, ways: usize, cl_size: u64) -> Self {
        Self {
            name: name.into(),
            sets,
            ways,
            cl_size,
            subblock_size: None,
            replacement_policy: ReplacementPolicy::Lru,
            write_back: true,
            write_allocate: true,
            write_combining: false,
            swap_on_load: false,
            legacy_mru: false,
        }
    }
}

/// One level of the memory hierarchy.
#[derive(Debug)]
pub struct CacheLevel {
    name: String,
    geometry: LineGeometry,
    ways: usize,
    subblock_size: u64,
    subblock_bits: usize,
    policy: ReplacementPolicy,
    write_back: bool,
    write_allocate: bool,
    write_combining: bool,
    swap_on_load: bool,
    legacy_mru: bool,
    load_from: Option<LevelId>,
    store_to: Option<LevelId>,
    victims_to: Option<LevelId>,
    entries: EntryStore,
    pub(crate) stats: LevelStats,
}

impl CacheLevel {
    /// Build a level from validated parameters. All storage is sized here
    /// and never grows.
    pub fn new(params: LevelParams) -> Result<Self, GeometryError> {
        let LevelParams {
            name,
            sets,
            ways,
            cl_size,
            subblock_size,
            replacement_policy,
            write_back,
            write_allocate,
            write_combining,
            swap_on_load,
            legacy_mru,
        } = params;

        if sets == 0 || ways == 0 {
            return Err(GeometryError::EmptyGeometry { name });
        }
        if !is_power_of_two(cl_size) {
            return Err(GeometryError::ClSizeNotPowerOfTwo { name, cl_size });
        }
        let subblock_size = subblock_size.unwrap_or(cl_size);
        if subblock_size == 0 || cl_size % subblock_size != 0 {
            return Err(GeometryError::SubblockNotDivisor {
                name,
                subblock_size,
                cl_size,
            });
        }
        let subblock_bits = (cl_size / subblock_size) as usize;

        // The bitfield is only materialized when sub-blocking is in play; a
        // write-combining level without it drains conservatively (never
        // non-temporal).
        let touch = (write_combining && subblock_size != cl_size).then_some(subblock_bits);

        Ok(Self {
            name,
            geometry: LineGeometry::new(sets, cl_size),
            ways,
            subblock_size,
            subblock_bits,
            policy: replacement_policy,
            write_back,
            write_allocate,
            write_combining,
            swap_on_load,
            legacy_mru,
            load_from: None,
            store_to: None,
            victims_to: None,
            entries: EntryStore::new(sets, ways, touch),
            stats: LevelStats::default(),
        })
    }

    /// Level identifier.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Line geometry of this level.
    #[inline]
    pub fn geometry(&self) -> LineGeometry {
        self.geometry
    }

    /// Number of sets.
    #[inline]
    pub fn sets(&self) -> usize {
        self.geometry.sets()
    }

    /// Ways per set.
    #[inline]
    pub fn ways(&self) -> usize {
        self.ways
    }

    /// Bytes per cache line.
    #[inline]
    pub fn cl_size(&self) -> u64 {
        self.geometry.cl_size()
    }

    /// Bytes per sub-block.
    #[inline]
    pub fn subblock_size(&self) -> u64 {
        self.subblock_size
    }

    /// Touch bits per way (sub-blocks per line).
    #[inline]
    pub fn subblock_bits(&self) -> usize {
        self.subblock_bits
    }

    /// Victim selection policy.
    #[inline]
    pub fn replacement_policy(&self) -> ReplacementPolicy {
        self.policy
    }

    /// Write-back (true) or write-through (false).
    #[inline]
    pub fn write_back(&self) -> bool {
        self.write_back
    }

    /// Whether a store miss loads the line first.
    #[inline]
    pub fn write_allocate(&self) -> bool {
        self.write_allocate
    }

    /// Whether this level combines sub-block writes.
    #[inline]
    pub fn write_combining(&self) -> bool {
        self.write_combining
    }

    /// Reserved exclusive-cache flag; never acted upon.
    #[inline]
    pub fn swap_on_load(&self) -> bool {
        self.swap_on_load
    }

    /// Where misses fetch from, if anywhere.
    #[inline]
    pub fn load_from(&self) -> Option<LevelId> {
        self.load_from
    }

    /// Where write-backs and write-throughs are delivered.
    #[inline]
    pub fn store_to(&self) -> Option<LevelId> {
        self.store_to
    }

    /// Where clean evictions are routed.
    #[inline]
    pub fn victims_to(&self) -> Option<LevelId> {
        self.victims_to
    }

    /// The five counter pairs.
    #[inline]
    pub fn stats(&self) -> &LevelStats {
        &self.stats
    }

    pub(crate) fn link(
        &mut self,
        load_from: Option<LevelId>,
        store_to: Option<LevelId>,
        victims_to: Option<LevelId>,
    ) {
        self.load_from = load_from;
        self.store_to = store_to;
        self.victims_to = victims_to;
    }

    pub(crate) fn lookup(&self, set_id: usize, cl_id: u64) -> Option<usize> {
        self.entries.lookup(set_id, cl_id)
    }

    pub(crate) fn insert<R: Rng>(&mut self, entry: CacheEntry, rng: &mut R) -> Insertion {
        let set_id = self.geometry.set_id(entry.cl_id);
        insert_entry(
            &mut self.entries,
            self.policy,
            self.legacy_mru,
            set_id,
            entry,
            rng,
        )
    }

    pub(crate) fn promote(&mut self, set_id: usize, way: usize) -> usize {
        promote_on_hit(&mut self.entries, self.policy, self.legacy_mru, set_id, way)
    }

    pub(crate) fn mark_dirty(&mut self, set_id: usize, way: usize) {
        self.entries.mark_dirty(set_id, way);
    }

    /// Mark every sub-block overlapped by `clipped` (a range already clipped
    /// to line `cl_id`) as touched at `(set_id, way)`.
    pub(crate) fn touch_range(&mut self, set_id: usize, way: usize, cl_id: u64, clipped: AddrRange) {
        let base = self.geometry.base_addr(cl_id);
        let subblock = self.subblock_size;
        let first = ((clipped.addr - base) / subblock) as usize;
        let last = ((clipped.end() - base).div_ceil(subblock)) as usize;
        if let Some(touch) = self.entries.touch_mut() {
            touch.set_range(set_id, way, first, last);
        }
    }

    pub(crate) fn entries(&self) -> &EntryStore {
        &self.entries
    }

    pub(crate) fn entries_mut(&mut self) -> &mut EntryStore {
        &mut self.entries
    }

    /// True iff the line containing `addr` is resident.
    pub fn contains(&self, addr: u64) -> bool {
        let cl_id = self.geometry.cl_id(addr);
        let set_id = self.geometry.set_id(cl_id);
        self.lookup(set_id, cl_id).is_some()
    }

    /// Every byte address currently resident at this level.
    pub fn cached(&self) -> BTreeSet<u64> {
        let mut addrs = BTreeSet::new();
        for entry in self.entries.iter() {
            if entry.invalid {
                continue;
            }
            let base = self.geometry.base_addr(entry.cl_id);
            addrs.extend(base..base + self.geometry.cl_size());
        }
        addrs
    }

    /// Number of vacant entry slots.
    pub fn count_invalid_entries(&self) -> usize {
        self.entries.count_invalid()
    }

    /// Empty every slot; counters are left untouched.
    pub fn mark_all_invalid(&mut self) {
        self.entries.mark_all_invalid();
    }

    /// Zero all five counter pairs; stored entries are left untouched.
    pub fn reset_stats(&mut self) {
        self.stats.reset();
    }
}
