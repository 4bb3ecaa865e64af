use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::Parser;
use rusty_harness::config::HarnessConfig;
use rusty_harness::engine::replay::ReplayEngine;
use rusty_harness::trace::IcedDecoder;
use rusty_harness::{Driver, EventDispatcher, HarnessError, SimulationEngine, SymbolMap, TraceSink};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "rusty_harness",
    about = "Boot a guest under the simulator with SFI tables, legacy port emulation and event tracing"
)]
struct Args {
    /// Number of simulated processors
    cpus: Option<usize>,
    /// Trace output file (stdout when omitted)
    trace_file: Option<PathBuf>,
    /// Saved engine state to resume from
    saved_state: Option<PathBuf>,

    /// JSON harness configuration
    #[arg(long)]
    config: Option<PathBuf>,
    /// Kernel symbol map (System.map format)
    #[arg(long)]
    symbols: Option<PathBuf>,
    /// Replay scenario driving the engine
    #[arg(long)]
    scenario: Option<PathBuf>,
    /// Stop after this many timer ticks
    #[arg(long)]
    max_ticks: Option<u64>,
    /// Render every decoded instruction into the trace
    #[arg(long)]
    instruction_trace: bool,
    /// Write the engine state here when the run ends
    #[arg(long)]
    save_state: Option<PathBuf>,
}

impl Args {
    /// Merges the command line over the config file, then validates the result once.
    fn into_config(self) -> Result<(HarnessConfig, Option<PathBuf>), HarnessError> {
        let mut config = match &self.config {
            Some(path) => HarnessConfig::from_json_file(path)?,
            None => HarnessConfig::default(),
        };

        if let Some(cpus) = self.cpus {
            config.cpu_count = cpus;
        }
        if self.trace_file.is_some() {
            config.trace_path = self.trace_file;
        }
        if self.saved_state.is_some() {
            config.snapshot_path = self.saved_state;
        }
        if self.symbols.is_some() {
            config.symbol_map_path = self.symbols;
        }
        if self.scenario.is_some() {
            config.scenario_path = self.scenario;
        }
        if self.max_ticks.is_some() {
            config.schedule.max_ticks = self.max_ticks;
        }
        config.instruction_trace |= self.instruction_trace;

        config.validate()?;
        Ok((config, self.save_state))
    }
}

fn init_tracing() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .try_init()
        .map_err(|e| anyhow!(e).context("failed to enable tracing"))
}

fn open_engine(config: &HarnessConfig) -> anyhow::Result<(ReplayEngine, bool)> {
    if let Some(path) = &config.snapshot_path {
        let engine = ReplayEngine::restore(path).context("failed to restore saved state")?;
        return Ok((engine, true));
    }

    let engine = match &config.scenario_path {
        Some(path) => ReplayEngine::from_scenario_file(path).context("failed to load scenario")?,
        None => {
            if config.schedule.max_ticks.is_none() {
                tracing::warn!("no scenario and no tick limit: the guest will never finish");
            }
            ReplayEngine::idle(config.cpu_count)?
        }
    };
    if engine.cpu_count() != config.cpu_count {
        tracing::warn!(
            configured = config.cpu_count,
            scenario = engine.cpu_count(),
            "scenario processor count overrides configuration"
        );
    }
    Ok((engine, false))
}

fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let (config, save_state) = Args::parse().into_config()?;

    let symbols = Arc::new(
        config
            .symbol_map_path
            .as_ref()
            .map(SymbolMap::load)
            .unwrap_or_default(),
    );

    let (mut engine, resumed) = open_engine(&config)?;

    let trace = match &config.trace_path {
        Some(path) => TraceSink::create(path)
            .with_context(|| format!("failed to create trace file {}", path.display()))?,
        None => TraceSink::stdout(),
    };
    let dispatcher = EventDispatcher::new(trace, symbols)
        .with_decoder(Box::new(IcedDecoder::new(config.decoder.bitness)))
        .with_instruction_trace(config.instruction_trace);

    engine.connect_console(Box::new(io::stdout()));

    let mut driver = Driver::boot(engine, dispatcher, &config.firmware, config.schedule, resumed)?;
    driver.run()?;

    let (engine, dispatcher) = driver.into_parts();
    if let Some(path) = save_state {
        engine.save_snapshot(&path)?;
    }

    let stats = dispatcher.finish().map_err(HarnessError::Trace)?;
    tracing::info!(?stats, "dispatcher statistics");

    Ok(())
}
