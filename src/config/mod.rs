//! Level specifications, the text configuration format, and hierarchy
//! assembly.
//!
//! A configuration file is line-oriented: the first significant line is the
//! level count `N`, followed by `N` level lines of comma-separated
//! `key=value` tokens. Blank lines and lines starting with `#` are skipped
//! and do not count toward `N`. Unrecognized keys are reported and ignored;
//! missing required keys are fatal.
//!
//! Assembly validates each level's geometry, resolves the three named edges
//! and identifies the unique top of the hierarchy (the one level no edge
//! points at). Every failure here is a [`ConfigError`]; nothing surfaces
//! from `load`/`store` at run time.

use std::collections::HashMap;
use std::path::Path;

use log::warn;
use thiserror::Error;

use crate::engine::level::GeometryError;
use crate::engine::{CacheLevel, Hierarchy, LevelId, LevelParams, ReplacementPolicy};

/// Everything that can go wrong between reading a configuration and holding
/// a linked hierarchy. All variants abort assembly.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// The file contains no significant lines at all.
    #[error("configuration is empty")]
    Empty,

    /// The first significant line is not an integer.
    #[error("line {line}: expected integer level count, found '{found}'")]
    InvalidLevelCount {
        /// 1-based source line.
        line: usize,
        /// The offending text.
        found: String,
    },

    /// The declared level count is zero or negative.
    #[error("level count must be at least 1, got {0}")]
    NonPositiveLevelCount(i64),

    /// Fewer level lines than the declared count.
    #[error("configuration declares {expected} levels but only {found} level lines follow")]
    TruncatedConfig {
        /// Declared level count.
        expected: usize,
        /// Level lines actually present.
        found: usize,
    },

    /// A token on a level line is not of the form `key=value`.
    #[error("line {line}: malformed token '{token}' (expected key=value)")]
    MalformedToken {
        /// 1-based source line.
        line: usize,
        /// The offending token.
        token: String,
    },

    /// A recognized key carries an unparsable or out-of-range value.
    #[error("line {line}: invalid value '{value}' for key '{key}'")]
    InvalidValue {
        /// 1-based source line.
        line: usize,
        /// The key being parsed.
        key: String,
        /// The offending value.
        value: String,
    },

    /// A level line lacks one of `name`, `sets`, `ways`, `cl_size`.
    #[error("line {line}: level is missing required field '{field}'")]
    MissingField {
        /// 1-based source line.
        line: usize,
        /// The absent key.
        field: String,
    },

    /// Geometry constraint violation (line size, sub-block size, emptiness).
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    /// Two levels share a name, so edges cannot resolve unambiguously.
    #[error("duplicate level name '{0}'")]
    DuplicateName(String),

    /// An edge names a level that does not exist.
    #[error("level '{level}': {edge} target '{target}' does not name a level")]
    UnresolvedEdge {
        /// Level carrying the edge.
        level: String,
        /// Which edge (`load_from`, `store_to`, `victims_to`).
        edge: &'static str,
        /// The unmatched name.
        target: String,
    },

    /// Every level has an inbound edge; no entry point exists.
    #[error("no top-level cache: every level has an inbound edge")]
    NoTopLevel,

    /// More than one level has no inbound edge.
    #[error("ambiguous top-level cache: candidates {0:?}")]
    AmbiguousTop(Vec<String>),

    /// The edges form a cycle, which the access paths cannot terminate on.
    #[error("hierarchy contains a cycle reachable through level '{0}'")]
    CyclicHierarchy(String),
}

/// One level of a hierarchy as described by a configuration, before edges
/// are resolved.
#[derive(Debug, Clone)]
pub struct LevelSpec {
    /// Level identifier; edge targets refer to it.
    pub name: String,
    /// Number of sets.
    pub sets: usize,
    /// Ways per set.
    pub ways: usize,
    /// Bytes per cache line.
    pub cl_size: u64,
    /// Bytes per sub-block; `None` defaults to `cl_size`.
    pub subblock_size: Option<u64>,
    /// Victim selection policy.
    pub replacement_policy: ReplacementPolicy,
    /// Write-back (true) or write-through (false).
    pub write_back: bool,
    /// Load a missed line before storing into it.
    pub write_allocate: bool,
    /// Buffer sub-block writes in the touch bitfield.
    pub write_combining: bool,
    /// Parsed and stored; reserved for an exclusive-cache mode.
    pub swap_on_load: bool,
    /// Use the legacy MRU behavior for counter parity (test use).
    pub legacy_mru: bool,
    /// Name of the level misses fetch from.
    pub load_from: Option<String>,
    /// Name of the level write-backs and write-throughs go to.
    pub store_to: Option<String>,
    /// Name of the level absorbing clean evictions.
    pub victims_to: Option<String>,
}

impl LevelSpec {
    /// A spec with the configuration defaults: LRU, write-back,
    /// write-allocate, no write-combining, no edges.
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
            load_from: None,
            store_to: None,
            victims_to: None,
        }
    }

    /// Set the miss-fill target.
    pub fn load_from(mut self, name: impl Into<String>) -> Self {
        self.load_from = Some(name.into());
        self
    }

    /// Set the write-back / write-through target.
    pub fn store_to(mut self, name: impl Into<String>) -> Self {
        self.store_to = Some(name.into());
        self
    }

    /// Set the clean-eviction target.
    pub fn victims_to(mut self, name: impl Into<String>) -> Self {
        self.victims_to = Some(name.into());
        self
    }

    fn params(&self) -> LevelParams {
        LevelParams {
            name: self.name.clone(),
            sets: self.sets,
            ways: self.ways,
            cl_size: self.cl_size,
            subblock_size: self.subblock_size,
            replacement_policy: self.replacement_policy,
            write_back: self.write_back,
            write_allocate: self.write_allocate,
            write_combining: self.write_combining,
            swap_on_load: self.swap_on_load,
            legacy_mru: self.legacy_mru,
        }
    }
}

/// Read and parse a configuration file.
pub fn load_config(path: impl AsRef<Path>) -> Result<Vec<LevelSpec>, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    parse_config(&text)
}

/// Parse configuration text into level specs. See the module docs for the
/// format.
pub fn parse_config(text: &str) -> Result<Vec<LevelSpec>, ConfigError> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(idx, raw)| (idx + 1, raw.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'));

    let (count_line, count_text) = lines.next().ok_or(ConfigError::Empty)?;
    let count: i64 =
        count_text
            .parse()
            .map_err(|_| ConfigError::InvalidLevelCount {
                line: count_line,
                found: count_text.to_string(),
            })?;
    if count <= 0 {
        return Err(ConfigError::NonPositiveLevelCount(count));
    }
    let count = count as usize;

    let mut specs = Vec::with_capacity(count);
    for _ in 0..count {
        let (line_no, line) = lines.next().ok_or(ConfigError::TruncatedConfig {
            expected: count,
            found: specs.len(),
        })?;
        specs.push(parse_level_line(line_no, line)?);
    }
    Ok(specs)
}

fn parse_level_line(line_no: usize, line: &str) -> Result<LevelSpec, ConfigError> {
    let mut name = None;
    let mut sets = None;
    let mut ways = None;
    let mut cl_size = None;
    let mut spec_rest = LevelSpec::new("", 0, 0, 0);

    for token in line.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        let (key, value) = token.split_once('=').ok_or_else(|| ConfigError::MalformedToken {
            line: line_no,
            token: token.to_string(),
        })?;
        let key = key.trim();
        let value = value.trim();

        let invalid = || ConfigError::InvalidValue {
            line: line_no,
            key: key.to_string(),
            value: value.to_string(),
        };

        match key {
            "name" => name = Some(value.to_string()),
            "sets" => sets = Some(value.parse::<usize>().map_err(|_| invalid())?),
            "ways" => ways = Some(value.parse::<usize>().map_err(|_| invalid())?),
            "cl_size" => cl_size = Some(value.parse::<u64>().map_err(|_| invalid())?),
            "subblock_size" => {
                spec_rest.subblock_size = Some(value.parse::<u64>().map_err(|_| invalid())?)
            }
            "replacement_policy_id" => {
                let id = value.parse::<i64>().map_err(|_| invalid())?;
                spec_rest.replacement_policy =
                    ReplacementPolicy::from_id(id).ok_or_else(invalid)?;
            }
            "write_back" => spec_rest.write_back = parse_flag(value).ok_or_else(invalid)?,
            "write_allocate" => spec_rest.write_allocate = parse_flag(value).ok_or_else(invalid)?,
            "write_combining" => {
                spec_rest.write_combining = parse_flag(value).ok_or_else(invalid)?
            }
            "swap_on_load" => spec_rest.swap_on_load = parse_flag(value).ok_or_else(invalid)?,
            "load_from" => spec_rest.load_from = Some(value.to_string()),
            "store_to" => spec_rest.store_to = Some(value.to_string()),
            "victims_to" => spec_rest.victims_to = Some(value.to_string()),
            _ => warn!("line {line_no}: unrecognized key '{key}' ignored"),
        }
    }

    let missing = |field: &str| ConfigError::MissingField {
        line: line_no,
        field: field.to_string(),
    };
    spec_rest.name = name.ok_or_else(|| missing("name"))?;
    spec_rest.sets = sets.ok_or_else(|| missing("sets"))?;
    spec_rest.ways = ways.ok_or_else(|| missing("ways"))?;
    spec_rest.cl_size = cl_size.ok_or_else(|| missing("cl_size"))?;
    Ok(spec_rest)
}

fn parse_flag(value: &str) -> Option<bool> {
    value.parse::<i64>().ok().map(|v| v != 0)
}

/// Link level specs into a runnable [`Hierarchy`].
///
/// Validates geometry, resolves the named edges, requires a unique entry
/// level and a cycle-free graph, and seeds the replacement generator.
pub fn assemble(specs: Vec<LevelSpec>, seed: u64) -> Result<Hierarchy, ConfigError> {
    let mut by_name: HashMap<&str, usize> = HashMap::new();
    for (idx, spec) in specs.iter().enumerate() {
        if by_name.insert(spec.name.as_str(), idx).is_some() {
            return Err(ConfigError::DuplicateName(spec.name.clone()));
        }
    }

    let resolve = |level: &str, edge: &'static str, target: &Option<String>| {
        target
            .as_deref()
            .map(|t| {
                by_name
                    .get(t)
                    .map(|&idx| LevelId::new(idx))
                    .ok_or_else(|| ConfigError::UnresolvedEdge {
                        level: level.to_string(),
                        edge,
                        target: t.to_string(),
                    })
            })
            .transpose()
    };

    let mut edges = Vec::with_capacity(specs.len());
    let mut inbound = vec![0usize; specs.len()];
    for spec in &specs {
        let load_from = resolve(&spec.name, "load_from", &spec.load_from)?;
        let store_to = resolve(&spec.name, "store_to", &spec.store_to)?;
        let victims_to = resolve(&spec.name, "victims_to", &spec.victims_to)?;
        for target in [load_from, store_to, victims_to].into_iter().flatten() {
            inbound[target.index()] += 1;
        }
        edges.push((load_from, store_to, victims_to));
    }

    let tops: Vec<usize> = (0..specs.len()).filter(|&idx| inbound[idx] == 0).collect();
    let top = match tops.as_slice() {
        [] => return Err(ConfigError::NoTopLevel),
        [single] => LevelId::new(*single),
        candidates => {
            let names = candidates.iter().map(|&idx| specs[idx].name.clone()).collect();
            return Err(ConfigError::AmbiguousTop(names));
        }
    };

    let mut levels = Vec::with_capacity(specs.len());
    for (spec, (load_from, store_to, victims_to)) in specs.iter().zip(&edges) {
        let mut level = CacheLevel::new(spec.params())?;
        level.link(*load_from, *store_to, *victims_to);
        levels.push(level);
    }

    // Kahn's walk doubles as cycle detection: a cycle never reaches inbound
    // zero and stays unprocessed.
    let mut remaining = inbound;
    let mut queue = vec![top];
    let mut topo = Vec::with_capacity(levels.len());
    while let Some(id) = queue.pop() {
        topo.push(id);
        let (load_from, store_to, victims_to) = edges[id.index()];
        for target in [load_from, store_to, victims_to].into_iter().flatten() {
            remaining[target.index()] -= 1;
            if remaining[target.index()] == 0 {
                queue.push(target);
            }
        }
    }
    if topo.len() < levels.len() {
        let stuck = (0..levels.len())
            .find(|idx| !topo.iter().any(|id| id.index() == *idx))
            .map(|idx| specs[idx].name.clone())
            .unwrap_or_default();
        return Err(ConfigError::CyclicHierarchy(stuck));
    }

    Ok(Hierarchy::from_parts(levels, top, topo, seed))
}
