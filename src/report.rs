//! Counter snapshots and report rendering for the driver.
//!
//! The engine exposes live counters per level; this module freezes them
//! into a serializable snapshot and renders it as an aligned text table or
//! JSON. Rendering lives outside the engine on purpose: the simulation core
//! never formats anything.

use serde::Serialize;

use crate::engine::{Counter, Hierarchy};

/// Frozen counters of one level.
#[derive(Debug, Clone, Serialize)]
pub struct LevelReport {
    /// Level name from the configuration.
    pub name: String,
    /// Loads issued against the level.
    pub load: Counter,
    /// Stores issued against the level.
    pub store: Counter,
    /// Present lookups.
    pub hit: Counter,
    /// Absent lookups.
    pub miss: Counter,
    /// Evictions and write-throughs.
    pub evict: Counter,
}

/// Frozen counters of every level, in arena order (top first).
#[derive(Debug, Clone, Serialize)]
pub struct HierarchyReport {
    /// Per-level snapshots.
    pub levels: Vec<LevelReport>,
}

impl HierarchyReport {
    /// Snapshot the current counters of `hierarchy`.
    pub fn capture(hierarchy: &Hierarchy) -> Self {
        let levels = hierarchy
            .iter()
            .map(|(_, level)| {
                let stats = level.stats();
                LevelReport {
                    name: level.name().to_string(),
                    load: stats.load,
                    store: stats.store,
                    hit: stats.hit,
                    miss: stats.miss,
                    evict: stats.evict,
                }
            })
            .collect();
        Self { levels }
    }

    /// Pretty-printed JSON for machine consumers.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Aligned text table, one row per level.
    pub fn render_table(&self) -> String {
        fn cell(counter: &Counter) -> String {
            format!("{}/{}B", counter.count, counter.bytes)
        }

        let mut out = String::new();
        out.push_str(&format!(
            "{:<12} {:>14} {:>14} {:>14} {:>14} {:>14}\n",
            "level", "LOAD", "STORE", "HIT", "MISS", "EVICT"
        ));
        for level in &self.levels {
            out.push_str(&format!(
                "{:<12} {:>14} {:>14} {:>14} {:>14} {:>14}\n",
                level.name,
                cell(&level.load),
                cell(&level.store),
                cell(&level.hit),
                cell(&level.miss),
                cell(&level.evict),
            ));
        }
        out
    }
}
