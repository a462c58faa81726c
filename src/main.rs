//! Tracesim - Memory Hierarchy Simulator
//!
//! Driver binary: loads a cache configuration, replays a memory-reference
//! trace against the assembled hierarchy, drains dirty lines and reports
//! the per-level counters.
//!
//! Trace format: one reference per line, `addr length kind`, where kind is
//! `1` for a load and `0` for a store. Blank lines and `#` comments are
//! skipped. The trace is read from the given file or, if absent, stdin.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};

use tracesim::report::HierarchyReport;
use tracesim::{assemble, load_config, Hierarchy};

const USAGE: &str = "\
usage: tracesim [OPTIONS] <config-file> [trace-file]

Replays a memory-reference trace against a configured cache hierarchy and
prints per-level counters. The trace is read from <trace-file> or stdin.

OPTIONS:
    --json        emit the report as JSON instead of a table
    --seed <N>    seed for the replacement generator (default 42)
    -h, --help    print this help
";

const DEFAULT_SEED: u64 = 42;

struct Options {
    config: PathBuf,
    trace: Option<PathBuf>,
    json: bool,
    seed: u64,
}

fn main() -> ExitCode {
    init_logging();

    let options = match parse_args() {
        Ok(Some(options)) => options,
        Ok(None) => return ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e:#}");
            eprint!("{USAGE}");
            return ExitCode::FAILURE;
        }
    };

    match run(&options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Logging goes to stderr by default; setting `TRACESIM_LOG_FILE` redirects
/// it to a file for hosts that do not permit stderr.
fn init_logging() {
    let env = env_logger::Env::default().default_filter_or("info");
    let mut builder = env_logger::Builder::from_env(env);
    if let Ok(path) = std::env::var("TRACESIM_LOG_FILE") {
        match File::create(&path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("tracesim: cannot open log file '{path}': {e}"),
        }
    }
    builder.init();
}

fn parse_args() -> Result<Option<Options>> {
    let mut config = None;
    let mut trace = None;
    let mut json = false;
    let mut seed = DEFAULT_SEED;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print!("{USAGE}");
                return Ok(None);
            }
            "--json" => json = true,
            "--seed" => {
                let value = args.next().context("--seed requires a value")?;
                seed = value
                    .parse()
                    .with_context(|| format!("invalid seed '{value}'"))?;
            }
            other if other.starts_with('-') => bail!("unknown option '{other}'"),
            other => {
                if config.is_none() {
                    config = Some(PathBuf::from(other));
                } else if trace.is_none() {
                    trace = Some(PathBuf::from(other));
                } else {
                    bail!("unexpected argument '{other}'");
                }
            }
        }
    }

    let config = config.context("missing <config-file> argument")?;
    Ok(Some(Options {
        config,
        trace,
        json,
        seed,
    }))
}

fn run(options: &Options) -> Result<()> {
    let specs = load_config(&options.config)
        .with_context(|| format!("loading '{}'", options.config.display()))?;
    let mut hierarchy = assemble(specs, options.seed)?;

    log::info!(
        "tracesim {}: {} levels, top '{}'",
        tracesim::VERSION,
        hierarchy.len(),
        hierarchy.level(hierarchy.top()).name()
    );

    let references = match &options.trace {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("opening '{}'", path.display()))?;
            apply_trace(&mut hierarchy, BufReader::new(file))?
        }
        None => apply_trace(&mut hierarchy, io::stdin().lock())?,
    };

    // Drain dirty lines so the report covers the whole region.
    hierarchy.force_write_back();

    let report = HierarchyReport::capture(&hierarchy);
    if options.json {
        println!("{}", report.to_json()?);
    } else {
        print!("{}", report.render_table());
    }
    log::info!("processed {references} references");
    Ok(())
}

fn apply_trace<R: BufRead>(hierarchy: &mut Hierarchy, reader: R) -> Result<u64> {
    let mut references = 0u64;
    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("trace line {}", idx + 1))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split_whitespace();
        let (addr, length, kind) = match (fields.next(), fields.next(), fields.next()) {
            (Some(addr), Some(length), Some(kind)) => (addr, length, kind),
            _ => bail!("trace line {}: expected 'addr length kind'", idx + 1),
        };
        let addr: u64 = addr
            .parse()
            .with_context(|| format!("trace line {}: bad address '{addr}'", idx + 1))?;
        let length: u64 = length
            .parse()
            .with_context(|| format!("trace line {}: bad length '{length}'", idx + 1))?;
        if length == 0 {
            bail!("trace line {}: length must be at least 1", idx + 1);
        }
        match kind {
            "1" => hierarchy.load(addr, length),
            "0" => hierarchy.store(addr, length),
            other => bail!(
                "trace line {}: kind must be 1 (load) or 0 (store), got '{other}'",
                idx + 1
            ),
        }
        references += 1;
    }
    Ok(references)
}
