//! Per-level access counters.
//!
//! Every cache level carries five `(count, bytes)` pairs: LOAD, STORE, HIT,
//! MISS and EVICT. Counters only ever grow between `reset` calls; the
//! engine never decrements them.

use serde::{Deserialize, Serialize};

/// A single `(count, bytes)` counter pair.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    /// Number of recorded events.
    pub count: u64,
    /// Total bytes attributed to those events.
    pub bytes: u64,
}

impl Counter {
    /// Record one event worth `bytes` bytes.
    #[inline]
    pub fn add(&mut self, bytes: u64) {
        self.count += 1;
        self.bytes += bytes;
    }

    /// Zero the pair.
    #[inline]
    pub fn reset(&mut self) {
        *self = Counter::default();
    }
}

/// The five counter pairs of one cache level.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelStats {
    /// Loads issued against this level.
    pub load: Counter,
    /// Stores issued against this level.
    pub store: Counter,
    /// Line lookups that were present.
    pub hit: Counter,
    /// Line lookups that were absent.
    pub miss: Counter,
    /// Lines evicted or written through from this level.
    pub evict: Counter,
}

impl LevelStats {
    /// Zero all five counter pairs.
    pub fn reset(&mut self) {
        self.load.reset();
        self.store.reset();
        self.hit.reset();
        self.miss.reset();
        self.evict.reset();
    }
}
