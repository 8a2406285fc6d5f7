//! airtrack command-line entry point
//!
//! Thin wrapper over `airtrack-core`: replays recorded sample streams
//! through a ring buffer and lists the built-in field catalogue.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use tracing::{debug, info, warn};

use airtrack_core::config::{LogFormat, TrackerConfig};
use airtrack_core::export::export_component;
use airtrack_core::logging::init_logging;
use airtrack_core::{
    AggregatorKind, ElementStore, FieldRegistry, SampleOutcome, TrackedMinuteRrd, TrackedRrd,
    register_builtin_fields,
};

#[derive(Parser)]
#[command(name = "airtrack", version, about = "Tracked-element and RRD tooling")]
struct Cli {
    /// Config file (TOML)
    #[arg(long, global = true, env = "AIRTRACK_CONFIG")]
    config: Option<PathBuf>,

    /// Log level filter, overrides the config file
    #[arg(long, global = true, env = "AIRTRACK_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (pretty or json), overrides the config file
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Feed JSON-lines samples through a fresh RRD and print the result
    Replay(ReplayArgs),
    /// List every built-in field
    Fields,
    /// Print the effective configuration as TOML
    Config,
}

#[derive(Args)]
struct ReplayArgs {
    /// Sample file, one `{"value": .., "timestamp": ..}` object per line.
    /// `-` reads stdin.
    #[arg(long, short)]
    input: PathBuf,

    /// Aggregation policy, overrides the config file
    #[arg(long)]
    aggregator: Option<AggregatorKind>,

    /// Keep only the trailing minute of per-second slots
    #[arg(long)]
    minute_only: bool,

    /// Export time in seconds since epoch (defaults to the newest sample)
    #[arg(long)]
    now: Option<u64>,

    /// Export the ring as-is instead of fast-forwarding it to `--now`
    #[arg(long)]
    no_update_before_serialize: bool,
}

#[derive(Debug, Deserialize)]
struct Sample {
    value: i64,
    timestamp: u64,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => TrackerConfig::load_from(path)?,
        None => TrackerConfig::default(),
    };
    if let Some(level) = &cli.log_level {
        config.logging.level.clone_from(level);
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    config.validate()?;
    init_logging(&config.logging).context("failed to initialize logging")?;

    match cli.command {
        Command::Replay(args) => replay(&config, &args),
        Command::Fields => list_fields(),
        Command::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

// =============================================================================
// replay
// =============================================================================

fn read_samples(path: &Path) -> Result<Vec<Sample>> {
    let reader: Box<dyn BufRead> = if path == Path::new("-") {
        Box::new(BufReader::new(io::stdin()))
    } else {
        let file =
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        Box::new(BufReader::new(file))
    };

    let mut samples = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read {}", path.display()))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let sample: Sample = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: malformed sample", path.display(), n + 1))?;
        samples.push(sample);
    }
    Ok(samples)
}

/// Counts of each sample outcome over a replay.
#[derive(Debug, Default)]
struct ReplayStats {
    accepted: usize,
    stale: usize,
    newest: u64,
}

impl ReplayStats {
    fn record(&mut self, sample: &Sample, outcome: SampleOutcome) {
        if outcome == SampleOutcome::Stale {
            self.stale += 1;
        } else {
            self.accepted += 1;
            self.newest = self.newest.max(sample.timestamp);
        }
    }
}

fn feed<F>(samples: &[Sample], mut add: F) -> Result<ReplayStats>
where
    F: FnMut(i64, u64) -> airtrack_core::Result<SampleOutcome>,
{
    let mut stats = ReplayStats::default();
    for sample in samples {
        let outcome = add(sample.value, sample.timestamp)?;
        stats.record(sample, outcome);
    }
    Ok(stats)
}

fn replay(config: &TrackerConfig, args: &ReplayArgs) -> Result<()> {
    let samples = read_samples(&args.input)?;
    if samples.is_empty() {
        bail!("{}: no samples", args.input.display());
    }

    let mut rrd_config = config.rrd.clone();
    if let Some(kind) = args.aggregator {
        rrd_config.aggregator = kind;
    }
    if args.no_update_before_serialize {
        rrd_config.update_before_serialize = false;
    }
    let update = rrd_config.update_before_serialize;
    let aggregator = rrd_config.build_aggregator();
    let mut registry = FieldRegistry::new();
    let mut store = ElementStore::new();
    debug!(
        aggregator = %rrd_config.aggregator,
        minute_only = args.minute_only,
        update,
        "replay"
    );

    let exported = if args.minute_only {
        let mut rrd =
            TrackedMinuteRrd::with_aggregator(&mut registry, &mut store, aggregator, None, None)?;
        rrd.set_update_before_serialize(update);
        let stats = feed(&samples, |v, ts| rrd.add_sample(&mut store, v, ts))?;
        report(&stats);
        let now = args.now.unwrap_or(stats.newest);
        export_component(&registry, &mut store, &mut rrd, now)?
    } else {
        let mut rrd =
            TrackedRrd::with_aggregator(&mut registry, &mut store, aggregator, None, None)?;
        rrd.set_update_before_serialize(update);
        let stats = feed(&samples, |v, ts| rrd.add_sample(&mut store, v, ts))?;
        report(&stats);
        let now = args.now.unwrap_or(stats.newest);
        export_component(&registry, &mut store, &mut rrd, now)?
    };

    let mut out = io::stdout().lock();
    serde_json::to_writer_pretty(&mut out, &exported)?;
    writeln!(out)?;
    Ok(())
}

fn report(stats: &ReplayStats) {
    if stats.stale > 0 {
        warn!(stale = stats.stale, "skipped samples older than the ring");
    }
    info!(accepted = stats.accepted, newest = stats.newest, "replayed samples");
}

// =============================================================================
// fields
// =============================================================================

fn list_fields() -> Result<()> {
    let mut registry = FieldRegistry::new();
    register_builtin_fields(&mut registry)?;

    let mut out = io::stdout().lock();
    for field in registry.iter() {
        writeln!(
            out,
            "{}\t{}\t{}\t{}",
            field.id(),
            field.kind(),
            field.name(),
            field.description()
        )?;
    }
    Ok(())
}
