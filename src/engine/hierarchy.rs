//! The cache hierarchy: an arena of levels linked by handle edges.
//!
//! Levels are owned by a flat arena and addressed by [`LevelId`]; the three
//! downstream edges (`load_from`, `store_to`, `victims_to`) are handles into
//! the same arena. Every operation takes the arena plus a handle, so a
//! recursive call borrows the arena once and indexes a different level at
//! each step. The graph is a validated DAG, so no call chain can re-enter a
//! level it is currently mutating.
//!
//! All downstream effects of a reference are synchronous: when a top-level
//! `load` or `store` returns, every miss fill, injection, eviction, victim
//! routing and write-back it triggered has completed.

use std::collections::BTreeSet;
use std::fmt;

use log::{debug, trace};
use rand::rngs::SmallRng;
use rand::SeedableRng;

use super::entry::CacheEntry;
use super::level::CacheLevel;
use super::line::AddrRange;
use super::replace::Insertion;

/// Handle of one level inside a [`Hierarchy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LevelId(usize);

impl LevelId {
    /// Wrap an arena index.
    #[inline]
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    /// The arena index.
    #[inline]
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for LevelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "level#{}", self.0)
    }
}

/// A linked cache hierarchy plus the seeded generator feeding RR
/// replacement. Built by [`assemble`](crate::config::assemble).
#[derive(Debug)]
pub struct Hierarchy {
    levels: Vec<CacheLevel>,
    top: LevelId,
    topo: Vec<LevelId>,
    rng: SmallRng,
}

impl Hierarchy {
    /// Assemble from already-linked levels. `topo` must order every level
    /// before its downstream targets, starting at `top`.
    pub(crate) fn from_parts(
        levels: Vec<CacheLevel>,
        top: LevelId,
        topo: Vec<LevelId>,
        seed: u64,
    ) -> Self {
        Self {
            levels,
            top,
            topo,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Handle of the unique entry level.
    #[inline]
    pub fn top(&self) -> LevelId {
        self.top
    }

    /// Number of levels.
    #[inline]
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// True iff the hierarchy has no levels. Assembly guarantees at least
    /// one, so this only answers `false` in practice.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// The level behind a handle.
    #[inline]
    pub fn level(&self, id: LevelId) -> &CacheLevel {
        &self.levels[id.0]
    }

    /// Look a level up by its configured name.
    pub fn level_by_name(&self, name: &str) -> Option<&CacheLevel> {
        self.levels.iter().find(|level| level.name() == name)
    }

    /// All levels in arena order, with their handles.
    pub fn iter(&self) -> impl Iterator<Item = (LevelId, &CacheLevel)> {
        self.levels
            .iter()
            .enumerate()
            .map(|(idx, level)| (LevelId(idx), level))
    }

    /// Issue one load of `length` bytes at `addr` to the top level.
    pub fn load(&mut self, addr: u64, length: u64) {
        let top = self.top;
        self.load_at(top, AddrRange::new(addr, length));
    }

    /// Issue one store of `length` bytes at `addr` to the top level.
    /// External stores are never non-temporal.
    pub fn store(&mut self, addr: u64, length: u64) {
        let top = self.top;
        self.store_at(top, AddrRange::new(addr, length), false);
    }

    /// Issue one load of `length` bytes per address.
    pub fn iter_load<I>(&mut self, addrs: I, length: u64)
    where
        I: IntoIterator<Item = u64>,
    {
        for addr in addrs {
            self.load(addr, length);
        }
    }

    /// Issue one store of `length` bytes per address.
    pub fn iter_store<I>(&mut self, addrs: I, length: u64)
    where
        I: IntoIterator<Item = u64>,
    {
        for addr in addrs {
            self.store(addr, length);
        }
    }

    /// Apply `(loads, stores)` pairs: for each pair, all loads are issued
    /// first, then all stores, each of `length` bytes. Either side of a pair
    /// may be absent.
    pub fn load_store<I>(&mut self, pairs: I, length: u64)
    where
        I: IntoIterator<Item = (Option<Vec<u64>>, Option<Vec<u64>>)>,
    {
        for (loads, stores) in pairs {
            if let Some(loads) = loads {
                self.iter_load(loads, length);
            }
            if let Some(stores) = stores {
                self.iter_store(stores, length);
            }
        }
    }

    /// Drain all dirty lines of every level, top-down, so counters can be
    /// read for a completed region. Upper-level drains may dirty lower
    /// lines; the topological walk flushes those too.
    pub fn force_write_back(&mut self) {
        let order = self.topo.clone();
        for id in order {
            self.force_write_back_at(id);
        }
    }

    /// Zero the counters of every level.
    pub fn reset_stats(&mut self) {
        for level in &mut self.levels {
            level.reset_stats();
        }
    }

    /// Empty every entry of every level. Counters are left untouched.
    pub fn mark_all_invalid(&mut self) {
        for level in &mut self.levels {
            level.mark_all_invalid();
        }
    }

    /// Total number of vacant entry slots across all levels.
    pub fn count_invalid_entries(&self) -> usize {
        self.levels
            .iter()
            .map(CacheLevel::count_invalid_entries)
            .sum()
    }

    /// True iff the line containing `addr` is resident at the top level.
    pub fn contains(&self, addr: u64) -> bool {
        self.level(self.top).contains(addr)
    }

    /// Every byte address resident at the top level.
    pub fn cached(&self) -> BTreeSet<u64> {
        self.level(self.top).cached()
    }

    /// Handle one load at `id`, walking every covered line. Returns the way
    /// the last processed line occupies, which write-allocate consumes after
    /// a single-line fill.
    fn load_at(&mut self, id: LevelId, range: AddrRange) -> Option<usize> {
        debug_assert!(range.length > 0);
        let idx = id.0;
        let geom = self.levels[idx].geometry();
        let cl_size = geom.cl_size();
        let load_from = self.levels[idx].load_from();
        let victims_to = self.levels[idx].victims_to();

        self.levels[idx].stats.load.add(range.length);

        let mut placement = None;
        for cl_id in geom.covered_lines(range) {
            let set_id = geom.set_id(cl_id);

            if let Some(way) = self.levels[idx].lookup(set_id, cl_id) {
                // Byte counters deliberately add the request length capped at
                // one line, not the per-line clipped length.
                self.levels[idx].stats.hit.add(cl_size.min(range.length));
                trace!("{}: HIT cl_id={cl_id} set={set_id}", self.levels[idx].name());
                placement = Some(self.levels[idx].promote(set_id, way));
                continue;
            }

            self.levels[idx].stats.miss.add(cl_size.min(range.length));
            trace!("{}: MISS cl_id={cl_id} set={set_id}", self.levels[idx].name());

            let line = geom.line_range(cl_id);
            let victim_hit = victims_to.is_some_and(|vid| {
                let victim = &self.levels[vid.0];
                let v_cl = victim.geometry().cl_id(line.addr);
                let v_set = victim.geometry().set_id(v_cl);
                victim.lookup(v_set, v_cl).is_some()
            });

            if victim_hit {
                // The victim cache supplies the line; the regular downstream
                // path is not consulted.
                if let Some(vid) = victims_to {
                    self.load_at(vid, line);
                }
            } else if let Some(lid) = load_from {
                self.load_at(lid, line);
            }

            placement = Some(self.inject_at(id, CacheEntry::clean(cl_id)));
        }
        placement
    }

    /// Handle one store at `id`, walking every covered line.
    fn store_at(&mut self, id: LevelId, range: AddrRange, non_temporal: bool) {
        debug_assert!(range.length > 0);
        let idx = id.0;
        let geom = self.levels[idx].geometry();
        let write_back = self.levels[idx].write_back();
        let write_allocate = self.levels[idx].write_allocate();
        let write_combining = self.levels[idx].write_combining();
        let store_to = self.levels[idx].store_to();

        self.levels[idx].stats.store.add(range.length);

        for cl_id in geom.covered_lines(range) {
            let set_id = geom.set_id(cl_id);
            let mut location = self.levels[idx].lookup(set_id, cl_id);

            if write_allocate && !non_temporal {
                // Ensure the line is present; the fill cascades through the
                // hierarchy and ends with an injection here.
                if location.is_none() {
                    location = self.load_at(id, geom.line_range(cl_id));
                }
            } else if write_back && location.is_none() {
                // Write-back without allocate-on-read: install the line
                // dirty without fetching it.
                location = Some(self.inject_at(id, CacheEntry::dirty(cl_id)));
            }

            if write_combining {
                if let Some(way) = location {
                    let clipped = geom.clip_to_line(cl_id, range);
                    self.levels[idx].touch_range(set_id, way, cl_id, clipped);
                }
            }

            match location {
                Some(way) if write_back => {
                    self.levels[idx].mark_dirty(set_id, way);
                }
                _ => {
                    // Write-through, or no slot to buffer in: ripple the
                    // clipped portion downstream so byte counts stay exact.
                    if let Some(sid) = store_to {
                        let clipped = geom.clip_to_line(cl_id, range);
                        self.levels[idx].stats.evict.add(clipped.length);
                        self.store_at(sid, clipped, non_temporal);
                    }
                }
            }
        }
    }

    /// Install `entry` at its set in `id` and route the displaced occupant:
    /// dirty under write-back goes downstream as a store, otherwise a
    /// configured victim cache absorbs it. Returns the way written.
    fn inject_at(&mut self, id: LevelId, entry: CacheEntry) -> usize {
        let idx = id.0;
        let Insertion {
            way,
            displaced,
            displaced_fully_touched,
        } = self.levels[idx].insert(entry, &mut self.rng);

        if displaced.invalid {
            return way;
        }

        let write_back = self.levels[idx].write_back();
        let write_combining = self.levels[idx].write_combining();
        let cl_size = self.levels[idx].cl_size();
        let geom = self.levels[idx].geometry();
        let store_to = self.levels[idx].store_to();
        let victims_to = self.levels[idx].victims_to();

        if write_back && displaced.dirty {
            self.levels[idx].stats.evict.add(cl_size);
            debug!(
                "{}: EVICT dirty cl_id={}",
                self.levels[idx].name(),
                displaced.cl_id
            );
            if let Some(sid) = store_to {
                // A fully touched write-combining line skips the downstream
                // allocate and goes out non-temporally.
                let non_temporal = if write_combining {
                    displaced_fully_touched.unwrap_or(false)
                } else {
                    false
                };
                self.store_at(sid, geom.line_range(displaced.cl_id), non_temporal);
            }
        } else if let Some(vid) = victims_to {
            debug!(
                "{}: EVICT clean cl_id={} to victim cache",
                self.levels[idx].name(),
                displaced.cl_id
            );
            self.inject_at(vid, displaced);
            self.levels[idx].stats.evict.add(cl_size);
            let victim_cl_size = self.levels[vid.0].cl_size();
            self.levels[vid.0].stats.store.add(victim_cl_size);
        }

        way
    }

    /// Drain every dirty line of one level: the write-back routing is
    /// identical to eviction (including the non-temporal decision), then the
    /// dirty bit is cleared.
    fn force_write_back_at(&mut self, id: LevelId) {
        let idx = id.0;
        let geom = self.levels[idx].geometry();
        let cl_size = geom.cl_size();
        let ways = self.levels[idx].ways();
        let write_combining = self.levels[idx].write_combining();
        let store_to = self.levels[idx].store_to();
        let total = self.levels[idx].sets() * ways;

        for flat in 0..total {
            let entry = self.levels[idx].entries().get_flat(flat);
            if entry.invalid || !entry.dirty {
                continue;
            }
            self.levels[idx].stats.evict.add(cl_size);
            debug!(
                "{}: EVICT cl_id={} (forced)",
                self.levels[idx].name(),
                entry.cl_id
            );
            if let Some(sid) = store_to {
                let non_temporal = if write_combining {
                    let set_id = flat / ways;
                    let way = flat % ways;
                    match self.levels[idx].entries_mut().touch_mut() {
                        Some(touch) => {
                            let full = touch.way_fully_touched(set_id, way);
                            touch.clear_way(set_id, way);
                            full
                        }
                        None => false,
                    }
                } else {
                    false
                };
                self.store_at(sid, geom.line_range(entry.cl_id), non_temporal);
            }
            self.levels[idx].entries_mut().clean_flat(flat);
        }
    }
}
