//! # Tracesim - Memory Hierarchy Simulator
//!
//! A trace-driven simulator of multi-level CPU memory hierarchies. Given an
//! ordered stream of memory references (loads and stores with address and
//! length), it models how each reference propagates through a configured
//! graph of cache levels, determining hits, misses, evictions and
//! write-backs, and accumulating per-level counters.
//!
//! ## Architecture
//!
//! - `engine`: the cache-hierarchy core — entry storage, line math,
//!   replacement policies, the recursive load/store/inject paths, and the
//!   per-level counters
//! - `config`: the line-oriented configuration format and hierarchy assembly
//! - `report`: counter snapshots with table and JSON rendering
//!
//! ## Quick start
//!
//! ```
//! use tracesim::config::{assemble, LevelSpec};
//!
//! let specs = vec![
//!     LevelSpec::new("L1", 8, 4, 64).load_from("L2").store_to("L2"),
//!     LevelSpec::new("L2", 64, 8, 64),
//! ];
//! let mut hierarchy = assemble(specs, 42).unwrap();
//! hierarchy.load(0x2a, 8);
//! hierarchy.store(0x2a, 8);
//! hierarchy.force_write_back();
//! assert_eq!(hierarchy.level_by_name("L1").unwrap().stats().miss.count, 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// The simulation core
pub mod engine;

// Configuration parsing and hierarchy assembly
pub mod config;

// Stats snapshots and rendering
pub mod report;

// Re-export commonly used types
pub use config::{assemble, load_config, parse_config, ConfigError, LevelSpec};
pub use engine::{
    AddrRange, CacheLevel, Counter, Hierarchy, LevelId, LevelStats, LineGeometry,
    ReplacementPolicy,
};
pub use report::{HierarchyReport, LevelReport};

/// Re-export version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
