//! Streamfold CLI
//!
//! Replays JSON-lines events through an aggregation engine.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::cell::Cell;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use streamfold::{
    config::Config,
    core::{
        AnyEngine, CrossSectionalConfig, CrossSectionalEngine, Engine, EngineKind, HoppingConfig,
        HoppingWindowEngine, JsonLinesSink, MetricSpec, OutputSink, SharedSink, SlidingBufferEngine,
        SlidingConfig,
    },
    shard::run_sharded,
    source::{ChannelFeed, Event, JsonLinesReader, DEFAULT_QUEUE_DEPTH},
    stats::create_shared_stats,
    VERSION,
};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "streamfold")]
#[command(version = VERSION)]
#[command(about = "Keyed streaming aggregation over JSON-lines events", long_about = None)]
struct Cli {
    /// Log filter directive (overridden by RUST_LOG)
    #[arg(long, global = true, default_value = "streamfold=info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Feed events through an engine and print output records
    Run {
        /// Engine to run (hopping, sliding or cross-sectional)
        #[arg(long)]
        engine: Option<EngineKind>,

        /// Input file of JSON-lines events (stdin if omitted)
        #[arg(long, short)]
        input: Option<PathBuf>,

        /// Configuration file (default location if omitted)
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Number of key shards to run in parallel
        #[arg(long)]
        shards: Option<usize>,

        /// Report events older than their key's latest time
        #[arg(long)]
        strict: bool,

        /// Dump engine state to stderr when the run ends
        #[arg(long)]
        inspect: bool,
    },

    /// Show configuration
    Config {
        /// Write the default configuration to the config file
        #[arg(long)]
        init: bool,

        /// Configuration file (default location if omitted)
        #[arg(long, short)]
        config: Option<PathBuf>,
    },

    /// Run the three engines over small built-in streams
    Demo,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&cli.log_level)
            .with_context(|| format!("invalid log level: {}", cli.log_level))?,
    };
    fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            engine,
            input,
            config,
            shards,
            strict,
            inspect,
        } => cmd_run(engine, input, config, shards, strict, inspect),
        Commands::Config { init, config } => cmd_config(init, config),
        Commands::Demo => cmd_demo(),
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => {
            Config::load_from(path).with_context(|| format!("failed to load config {path:?}"))
        }
        None => Config::load().context("failed to load config"),
    }
}

fn open_input(input: Option<&PathBuf>) -> Result<Box<dyn BufRead + Send>> {
    Ok(match input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("failed to open {path:?}"))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    })
}

fn cmd_run(
    engine: Option<EngineKind>,
    input: Option<PathBuf>,
    config_path: Option<PathBuf>,
    shards: Option<usize>,
    strict: bool,
    inspect: bool,
) -> Result<()> {
    let mut config = load_config(config_path.as_ref())?;
    if let Some(engine) = engine {
        config.engine = engine;
    }
    if let Some(shards) = shards {
        config.shards = shards;
    }
    if strict {
        config = config.with_strict_ordering();
    }
    config.validate().context("invalid configuration")?;

    tracing::info!(engine = %config.engine, shards = config.shards, "starting run");

    // Set up Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    let source = open_input(input.as_ref())?;
    if config.shards > 1 {
        run_parallel(&config, source, &running, inspect)
    } else {
        run_single(&config, source, &running, inspect)
    }
}

fn run_single(
    config: &Config,
    source: Box<dyn BufRead + Send>,
    running: &AtomicBool,
    inspect: bool,
) -> Result<()> {
    let mut engine = AnyEngine::from_config(config)?;
    let mut sink = JsonLinesSink::new(io::stdout().lock());
    let feed = ChannelFeed::spawn(source, DEFAULT_QUEUE_DEPTH);
    let mut invalid = 0usize;

    while running.load(Ordering::SeqCst) {
        match feed.receiver().recv_timeout(Duration::from_millis(100)) {
            Ok(Ok(event)) => {
                sink.append_all(engine.feed(&event))
                    .context("failed to write output")?;
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "skipping invalid input line");
                invalid += 1;
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
    }
    if running.load(Ordering::SeqCst) {
        feed.join();
    } else {
        // The decoder may be blocked on input; leave it behind.
        tracing::info!("interrupted, stopping");
        feed.stop();
    }
    sink.flush()?;

    let warnings = engine.take_warnings();
    if inspect {
        eprintln!("{}", serde_json::to_string_pretty(&engine.inspect())?);
    }
    report(engine.stats().summary(), sink.written(), invalid, warnings.len());
    Ok(())
}

fn run_parallel(
    config: &Config,
    source: Box<dyn BufRead + Send>,
    running: &AtomicBool,
    inspect: bool,
) -> Result<()> {
    let invalid = Cell::new(0usize);
    let stats = create_shared_stats();
    let shared = SharedSink::new();
    let engines = run_sharded(
        live_events(source, running, &invalid),
        config.shards,
        |_| AnyEngine::from_config(config).map(|e| e.with_stats(stats.clone())),
        &shared,
    )?;
    let invalid = invalid.get();

    let mut sink = JsonLinesSink::new(io::stdout().lock());
    sink.append_all(shared.snapshot())
        .context("failed to write output")?;
    sink.flush()?;

    let mut warnings = 0;
    let mut snapshots = Vec::with_capacity(engines.len());
    for mut engine in engines {
        warnings += engine.take_warnings().len();
        snapshots.push(engine.inspect());
    }
    if inspect {
        eprintln!("{}", serde_json::to_string_pretty(&snapshots)?);
    }
    report(stats.summary(), sink.written(), invalid, warnings);
    Ok(())
}

/// Decode events lazily until input ends or `running` is cleared.
///
/// Invalid lines are logged, counted in `invalid` and skipped.
fn live_events<'a, R: BufRead + 'a>(
    source: R,
    running: &'a AtomicBool,
    invalid: &'a Cell<usize>,
) -> impl Iterator<Item = Event> + 'a {
    JsonLinesReader::new(source)
        .take_while(move |_| {
            let keep_going = running.load(Ordering::SeqCst);
            if !keep_going {
                tracing::info!("interrupted, stopping");
            }
            keep_going
        })
        .filter_map(move |item| match item {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::warn!(error = %e, "skipping invalid input line");
                invalid.set(invalid.get() + 1);
                None
            }
        })
}

fn report(summary: String, written: usize, invalid: usize, warnings: usize) {
    eprintln!();
    eprintln!("{summary}");
    eprintln!("- Records written: {written}");
    if invalid > 0 {
        eprintln!("- Invalid input lines: {invalid}");
    }
    if warnings > 0 {
        eprintln!("- Ordering warnings: {warnings}");
    }
}

fn cmd_config(init: bool, path: Option<PathBuf>) -> Result<()> {
    let path = path.unwrap_or_else(Config::config_path);

    let config = if init {
        let config = Config::default();
        config
            .save_to(&path)
            .with_context(|| format!("failed to write {path:?}"))?;
        println!("Wrote default configuration to {path:?}");
        config
    } else {
        if path.exists() {
            load_config(Some(&path))?
        } else {
            Config::default()
        }
    };

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {path:?}");
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn cmd_demo() -> Result<()> {
    let mut sink = JsonLinesSink::new(io::stdout().lock());

    println!("# hopping: one minute windows, sum of value");
    let mut hopping = HoppingWindowEngine::new(HoppingConfig::default())?;
    let hopping_events = [
        Event::new(3_661_785, "A").with_field("value", 10.0),
        Event::new(3_672_457, "A").with_field("value", 28.0),
        Event::new(3_730_789, "A").with_field("value", 15.0),
    ];
    sink.append_all(hopping.feed_all(&hopping_events))?;

    println!("# sliding: average of the last 3 values");
    let mut sliding = SlidingBufferEngine::new(SlidingConfig::default())?;
    let sliding_events: Vec<Event> = [10.5, 10.8, 11.0, 10.9]
        .into_iter()
        .enumerate()
        .map(|(i, v)| Event::new(i as i64, "A").with_field("value", v))
        .collect();
    sink.append_all(sliding.feed_all(&sliding_events))?;

    println!("# cross-sectional: average latest price across keys");
    let mut snapshot = CrossSectionalEngine::new(CrossSectionalConfig {
        metrics: vec![MetricSpec::avg("avg_price", "price")],
        ..CrossSectionalConfig::default()
    })?;
    let snapshot_events = [
        Event::new(0, "A").with_field("price", 10.0),
        Event::new(1, "B").with_field("price", 20.0),
        Event::new(2, "A").with_field("price", 10.1),
    ];
    sink.append_all(snapshot.feed_all(&snapshot_events))?;

    sink.flush()?;
    Ok(())
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .context("Error setting Ctrl+C handler")
}
