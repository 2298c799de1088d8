//! flowsweep — main entry point
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  SimulatedRig        LogEventSink   JsonFileConfig             │
//! │  (Sensor+Pump+Valve) (EventSink)    (ConfigPort)               │
//! │  InstrumentSweeper   JsonResultSink / LogResultSink            │
//! │  (SweepRunner)       (ResultSink)                              │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │  ExperimentRunner → ProcessSequencer → FlowControlLoop │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! └────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{info, warn};

use flowsweep::adapters::config_file::JsonFileConfig;
use flowsweep::adapters::log_sink::{LogEventSink, LogResultSink};
use flowsweep::adapters::result_file::JsonResultSink;
use flowsweep::adapters::sim::{SimParams, simulated_rig};
use flowsweep::app::events::ExperimentLabel;
use flowsweep::app::ports::{ConfigPort, ResultSink};
use flowsweep::app::service::ExperimentRunner;
use flowsweep::vna::sweep::InstrumentSweeper;

/// Run flow-controlled dielectric-spectroscopy experiments.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// JSON configuration file (defaults are used if it does not exist).
    #[arg(short, long, default_value = "flowsweep.json")]
    config: PathBuf,

    /// Number of experiments to run back to back.
    #[arg(short = 'n', long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    experiments: u32,

    /// Chemical under test (used to label results).
    #[arg(long, default_value = "sample")]
    chemical: String,

    /// Concentration of the chemical under test.
    #[arg(long, default_value_t = 0.0)]
    concentration: f64,

    /// Write one JSON file per experiment here instead of only logging.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Override the instrument host.
    #[arg(long)]
    host: Option<String>,

    /// Override the instrument port.
    #[arg(long)]
    port: Option<u16>,

    /// Write the effective configuration back to `--config` before running.
    #[arg(long)]
    save_config: bool,

    /// Default log filter; `RUST_LOG` takes precedence.
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // ── 1. Logging ────────────────────────────────────────────
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level)).init();
    info!("flowsweep v{}", env!("CARGO_PKG_VERSION"));

    // ── 2. Configuration ──────────────────────────────────────
    let store = JsonFileConfig::new(&args.config);
    let mut config = store
        .load()
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(host) = args.host {
        config.instrument.host = host;
    }
    if let Some(port) = args.port {
        config.instrument.port = port;
    }
    config.validate().context("invalid configuration")?;
    if args.save_config {
        store
            .save(&config)
            .with_context(|| format!("saving {}", args.config.display()))?;
    }

    // ── 3. Instrument (unreachable = hard startup error) ──────
    let sweeper = InstrumentSweeper::from_config(&config.instrument);
    sweeper.probe().with_context(|| {
        format!(
            "instrument control not reachable at {}:{}",
            config.instrument.host, config.instrument.port
        )
    })?;

    // ── 4. Adapters and runner ────────────────────────────────
    let mut results: Box<dyn ResultSink> = match &args.output {
        Some(dir) => Box::new(JsonResultSink::new(dir).context("preparing output directory")?),
        None => Box::new(LogResultSink::new()),
    };
    let (rig, _probe) = simulated_rig(SimParams::default());
    warn!("No hardware backend configured, driving the simulated rig");

    let mut runner = ExperimentRunner::new(config, Arc::new(LogEventSink::new()), sweeper)?;

    // ── 5. Batch ──────────────────────────────────────────────
    let template = ExperimentLabel::new(args.chemical, args.concentration, 1);
    let outcome = runner.run_batch(rig, &template, args.experiments, results.as_mut());

    if outcome.hardware.is_none() {
        bail!("control loop did not shut down cleanly; pump state unknown");
    }
    if !outcome.failures.is_empty() {
        for (number, e) in &outcome.failures {
            warn!("Experiment {} failed: {}", number, e);
        }
        bail!(
            "{} of {} experiments failed",
            outcome.failures.len(),
            args.experiments
        );
    }
    info!("All {} experiments completed", outcome.completed.len());
    Ok(())
}
