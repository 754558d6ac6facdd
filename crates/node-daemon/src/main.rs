//! Node daemon entry point.
//!
//! Runs the node executive against the hosted simulation: the sequencer
//! drives the foreground, interrupt lines run as threads, and signals map
//! onto the node's reset requests.

mod diagnostics;
mod signals;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use node_common::config::NodeConfig;
use node_common::node::{BusController, ResetRequest};
use node_common::state::SequencerState;
use node_runtime::collaborators::{NoApplication, NoPersistence, Persistence};
use node_runtime::context::{NodeContext, NodeShared};
use node_runtime::sequencer::Sequencer;
use node_runtime::watchdog::SoftwareWatchdog;
use node_sim::{run_traffic, FilePersistence, InterruptLines, SimBoard, SimStack};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::diagnostics::{
    format_prometheus_metrics, DiagnosticsCollector, NodeReport, ReportInputs, TaskReport,
};
use crate::signals::SignalHandler;

/// Ticks between two SYNC objects on the simulated bus.
const SYNC_INTERVAL_TICKS: u32 = 10;

/// Node daemon command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "node-daemon",
    about = "Fieldbus node executive running on a simulated board",
    version,
    long_about = None
)]
struct Args {
    /// Path to a node configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Node identity stored in the dictionary (overrides config file).
    #[arg(long, value_name = "ID")]
    node_id: Option<u8>,

    /// Stop after this long, e.g. "30s" (default: run until signalled).
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    run_for: Option<Duration>,

    /// Inject one frame per interval on every controller, e.g. "5ms".
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    traffic: Option<Duration>,

    /// Exit instead of restarting after an application reset.
    #[arg(long)]
    no_restart: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,
}

/// How a node run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    /// Application reset completed.
    Teardown,
    /// Fail-stop; left on request.
    Halted,
    /// The watchdog expired.
    WatchdogExpired,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting fieldnode daemon");

    let mut config = load_config(&args)?;
    if let Some(node_id) = args.node_id {
        config.bus.node_id = node_id;
    }
    config.validate().context("Invalid configuration")?;

    info!(
        tick_period = ?config.tick_period,
        controllers = config.bus.controllers,
        node_id = config.bus.node_id,
        "Configuration loaded"
    );

    let signal_handler = SignalHandler::new().context("Failed to set up signal handlers")?;

    let outcome = run_node(&config, &args, &signal_handler)?;
    match outcome {
        Outcome::Halted => Err(anyhow!("node halted")),
        _ if signal_handler.shutdown_requested() || args.no_restart => {
            info!(?outcome, "Daemon exiting");
            Ok(())
        }
        _ => restart(),
    }
}

/// Initialize logging with the specified log level.
fn init_logging(level: &str) {
    let filter = format!(
        "node_daemon={level},node_runtime={level},node_sim={level},node_common={level}"
    );

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `NODE_CONFIG_PATH` environment variable
/// 3. `/etc/fieldnode/config.toml` (system path)
/// 4. `config/default.toml` (local development)
/// 5. Built-in defaults
fn load_config(args: &Args) -> Result<NodeConfig> {
    if let Some(config_path) = &args.config {
        info!(?config_path, "Loading config from command-line argument");
        return NodeConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()));
    }

    if let Ok(env_path) = std::env::var("NODE_CONFIG_PATH") {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from NODE_CONFIG_PATH");
            return NodeConfig::from_file(&config_path)
                .with_context(|| format!("Failed to load config from NODE_CONFIG_PATH={env_path}"));
        }
        warn!(
            path = %env_path,
            "NODE_CONFIG_PATH set but file does not exist, checking other locations"
        );
    }

    for (config_path, origin) in [
        (PathBuf::from("/etc/fieldnode/config.toml"), "system path"),
        (PathBuf::from("config/default.toml"), "local path"),
    ] {
        if config_path.exists() {
            info!(?config_path, "Loading config from {origin}");
            return NodeConfig::from_file(&config_path)
                .with_context(|| format!("Failed to load config from {}", config_path.display()));
        }
    }

    info!("No config file found, using built-in defaults");
    Ok(NodeConfig::default())
}

/// Build the simulated node, run it until it ends, and report.
fn run_node(config: &NodeConfig, args: &Args, signals: &SignalHandler) -> Result<Outcome> {
    let shared = NodeShared::from_config(config);
    let stack = SimStack::from_config(&config.bus).with_sync_interval(SYNC_INTERVAL_TICKS);
    let app = NoApplication;

    let watchdog = if config.watchdog.enabled {
        let mut watchdog = SoftwareWatchdog::new(config.watchdog.timeout);
        watchdog.start(|| {}).context("Failed to start watchdog")?;
        Some(Arc::new(watchdog))
    } else {
        None
    };
    let mut board = SimBoard::realtime(config.tick_period);
    if let Some(watchdog) = &watchdog {
        board = board.with_watchdog(Arc::clone(watchdog));
    }

    let persistence: Box<dyn Persistence> = match &config.persistence.path {
        Some(path) => Box::new(FilePersistence::new(path)),
        None => Box::new(NoPersistence),
    };

    let ctx = NodeContext::new(&stack, persistence.as_ref(), &app, &board, &shared);
    let mut sequencer = Sequencer::new(ctx, config).context("Failed to build sequencer")?;
    let controllers: Vec<BusController> = sequencer.tasks().controllers().collect();
    for task in sequencer.tasks().tasks() {
        info!(
            context = %task.context,
            priority = task.priority,
            budget = ?task.budget,
            "Task declared"
        );
    }
    let mut diagnostics = DiagnosticsCollector::new(config.diagnostics.status_interval);
    let stop = AtomicBool::new(false);

    let node = SimNode {
        stack: &stack,
        board: &board,
        shared: &shared,
        watchdog: watchdog.as_deref(),
    };

    let outcome = thread::scope(|scope| {
        let lines = match InterruptLines::spawn(scope, ctx, &board, &controllers, &stop) {
            Ok(lines) => lines,
            Err(e) => {
                stop.store(true, Ordering::Release);
                return Err(e).context("Failed to spawn interrupt lines");
            }
        };
        if let Some(interval) = args.traffic {
            for &controller in &controllers {
                let (board, stack, stop) = (&board, &stack, &stop);
                let spawned = thread::Builder::new()
                    .name(format!("node-traffic-{controller}"))
                    .spawn_scoped(scope, move || run_traffic(board, stack, controller, interval, stop));
                if let Err(e) = spawned {
                    warn!(%controller, error = %e, "Failed to start traffic source");
                }
            }
        }

        let outcome = drive(&mut sequencer, node, signals, &mut diagnostics, args.run_for);
        stop.store(true, Ordering::Release);
        lines.join();
        outcome
    })?;

    let report = node.report(&diagnostics, &sequencer);
    if config.diagnostics.prometheus {
        println!("{}", format_prometheus_metrics(&report, config.tick_period));
    }
    if let Some(reason) = sequencer.halt_reason() {
        error!(%reason, "Node halted");
    }
    info!(
        snapshot = %serde_json::to_string(&report).unwrap_or_default(),
        signals = signals.state().signal_count(),
        final_state = %report.state,
        "Node run complete"
    );

    Ok(outcome)
}

/// Simulation parts the foreground loop reads from.
#[derive(Debug, Clone, Copy)]
struct SimNode<'a> {
    stack: &'a SimStack,
    board: &'a SimBoard,
    shared: &'a NodeShared,
    watchdog: Option<&'a SoftwareWatchdog>,
}

impl SimNode<'_> {
    fn report(&self, diagnostics: &DiagnosticsCollector, sequencer: &Sequencer<'_>) -> NodeReport {
        let inputs = ReportInputs {
            state: sequencer.state(),
            node_id: sequencer.node_id().get(),
            reset_cycles: sequencer.reset_cycles(),
            iterations: sequencer.iterations(),
            ticks: self.shared.ticks.now(),
            watchdog_services: self.board.watchdog_services(),
        };
        diagnostics.report(
            inputs,
            self.shared.counters.snapshot(),
            self.stack.stats(),
            TaskReport::from_table(sequencer.tasks()),
        )
    }
}

/// Step the sequencer until the node tears down, halts on request, or the
/// watchdog expires.
fn drive(
    sequencer: &mut Sequencer<'_>,
    node: SimNode<'_>,
    signals: &SignalHandler,
    diagnostics: &mut DiagnosticsCollector,
    run_for: Option<Duration>,
) -> Result<Outcome> {
    let started = Instant::now();
    let mut shutdown_sent = false;

    loop {
        signals.poll();
        if run_for.is_some_and(|limit| started.elapsed() >= limit) && !signals.shutdown_requested() {
            info!("Run time elapsed");
            signals.request_shutdown();
        }
        if signals.shutdown_requested() && !shutdown_sent {
            node.stack.request_reset(ResetRequest::Application);
            shutdown_sent = true;
        }
        if signals.take_reset_request() {
            node.stack.request_reset(ResetRequest::Communication);
        }

        let state = sequencer.step().context("Sequencer step failed")?;

        if node.watchdog.is_some_and(SoftwareWatchdog::has_triggered) {
            return Ok(Outcome::WatchdogExpired);
        }
        if diagnostics.status_due() {
            let report = node.report(diagnostics, sequencer);
            info!(
                state = %report.state,
                health = %report.health,
                reset_cycles = report.reset_cycles,
                main_cycle_max = report.counters.main_cycle_max,
                timer_cycle_max = report.counters.timer_cycle_max,
                overruns = report.counters.timer_overruns,
                "Periodic status"
            );
        }

        match state {
            SequencerState::Teardown => return Ok(Outcome::Teardown),
            SequencerState::Halted if signals.shutdown_requested() => return Ok(Outcome::Halted),
            SequencerState::Halted => thread::sleep(node.board.until_next_tick().max(Duration::from_millis(1))),
            _ => thread::yield_now(),
        }
    }
}

/// Replace the process with a fresh instance, as a software reset would.
fn restart() -> Result<()> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let exe = std::env::current_exe().context("Cannot locate own executable")?;
    let path = CString::new(exe.as_os_str().as_bytes()).context("Executable path contains NUL")?;
    let argv = std::env::args_os()
        .map(|arg| CString::new(arg.as_bytes()))
        .collect::<Result<Vec<_>, _>>()
        .context("Argument contains NUL")?;

    info!(exe = %exe.display(), "Restarting node");
    match nix::unistd::execv(&path, &argv) {
        Ok(never) => match never {},
        Err(e) => Err(anyhow!(e)).context("Failed to restart"),
    }
}
