//! Health and status reporting for the node daemon.
//!
//! Turns the sequencer state and the shared counters into a serializable
//! [`NodeReport`], logged periodically and optionally rendered in the
//! Prometheus text format on shutdown.

use node_common::metrics::DiagnosticsSnapshot;
use node_common::state::SequencerState;
use node_runtime::tasks::TaskTable;
use node_sim::StackStats;
use serde::Serialize;
use std::fmt::Write as _;
use std::time::{Duration, Instant};

/// Seconds per cycle-time unit (1/100 of a millisecond).
const CYCLE_UNIT_SECS: f64 = 1e-5;

/// Overrun share of timer ticks above which the node counts as degraded.
const DEGRADED_OVERRUN_RATE: f64 = 0.01;

/// Health of the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Normal operation without notable overruns.
    Healthy,
    /// Normal operation, but the timer interrupt misses deadlines.
    Degraded,
    /// Halted after a fatal initialization error.
    Unhealthy,
    /// Communication (re)initialization in progress.
    Starting,
    /// Application reset in progress.
    ShuttingDown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Starting => write!(f, "starting"),
            HealthStatus::ShuttingDown => write!(f, "shutting_down"),
        }
    }
}

/// Point-in-time view of the node.
#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    /// Derived health.
    pub health: HealthStatus,
    /// Sequencer state.
    pub state: SequencerState,
    /// Active node identity.
    pub node_id: u8,
    /// Daemon uptime in seconds.
    pub uptime_secs: f64,
    /// Communication resets completed.
    pub reset_cycles: u64,
    /// Foreground iterations since the last reinitialization.
    pub iterations: u64,
    /// Current value of the millisecond tick counter.
    pub ticks: u16,
    /// Watchdog services issued.
    pub watchdog_services: u64,
    /// Executive counters.
    pub counters: DiagnosticsSnapshot,
    /// Protocol stack counters.
    pub stack: StackStats,
    /// Declared execution contexts.
    pub tasks: Vec<TaskReport>,
}

/// One entry of the task table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskReport {
    /// Execution context name.
    pub context: String,
    /// Interrupt priority level.
    pub priority: u8,
    /// Declared execution budget in microseconds.
    pub budget_us: u64,
}

impl TaskReport {
    /// One entry per context of `table`, foreground first.
    #[must_use]
    pub fn from_table(table: &TaskTable) -> Vec<Self> {
        table
            .tasks()
            .iter()
            .map(|task| Self {
                context: task.context.to_string(),
                priority: task.priority,
                budget_us: u64::try_from(task.budget.as_micros()).unwrap_or(u64::MAX),
            })
            .collect()
    }
}

/// Inputs to a report that the collector cannot read itself.
#[derive(Debug, Clone, Copy)]
pub struct ReportInputs {
    /// Sequencer state.
    pub state: SequencerState,
    /// Active node identity.
    pub node_id: u8,
    /// Communication resets completed.
    pub reset_cycles: u64,
    /// Foreground iterations since the last reinitialization.
    pub iterations: u64,
    /// Current tick count.
    pub ticks: u16,
    /// Watchdog services issued.
    pub watchdog_services: u64,
}

/// Builds reports and paces the periodic status line.
#[derive(Debug)]
pub struct DiagnosticsCollector {
    started: Instant,
    status_interval: Duration,
    last_status: Instant,
}

impl DiagnosticsCollector {
    /// Collector logging status every `status_interval`.
    #[must_use]
    pub fn new(status_interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            started: now,
            status_interval,
            last_status: now,
        }
    }

    /// Health for `state` given the counters.
    #[must_use]
    pub fn health(state: SequencerState, counters: &DiagnosticsSnapshot, stack: &StackStats) -> HealthStatus {
        match state {
            SequencerState::Startup
            | SequencerState::ApplyConfig
            | SequencerState::StackInit
            | SequencerState::ArmTimers => HealthStatus::Starting,
            SequencerState::NormalOperation => {
                #[allow(clippy::cast_precision_loss)]
                let overrun_rate = if stack.tpdo_passes > 0 {
                    f64::from(counters.timer_overruns) / stack.tpdo_passes as f64
                } else {
                    0.0
                };
                if overrun_rate > DEGRADED_OVERRUN_RATE {
                    HealthStatus::Degraded
                } else {
                    HealthStatus::Healthy
                }
            }
            SequencerState::Teardown => HealthStatus::ShuttingDown,
            SequencerState::Halted => HealthStatus::Unhealthy,
        }
    }

    /// Assemble a report.
    #[must_use]
    pub fn report(
        &self,
        inputs: ReportInputs,
        counters: DiagnosticsSnapshot,
        stack: StackStats,
        tasks: Vec<TaskReport>,
    ) -> NodeReport {
        NodeReport {
            health: Self::health(inputs.state, &counters, &stack),
            state: inputs.state,
            node_id: inputs.node_id,
            uptime_secs: self.started.elapsed().as_secs_f64(),
            reset_cycles: inputs.reset_cycles,
            iterations: inputs.iterations,
            ticks: inputs.ticks,
            watchdog_services: inputs.watchdog_services,
            counters,
            stack,
            tasks,
        }
    }

    /// Whether the next status line is due; restarts the interval if so.
    pub fn status_due(&mut self) -> bool {
        if self.status_interval.is_zero() || self.last_status.elapsed() < self.status_interval {
            return false;
        }
        self.last_status = Instant::now();
        true
    }
}

fn metric(out: &mut String, name: &str, kind: &str, help: &str) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {kind}");
}

fn cycle_secs(units: u16) -> f64 {
    f64::from(units) * CYCLE_UNIT_SECS
}

/// Render `report` in the Prometheus text exposition format.
#[must_use]
pub fn format_prometheus_metrics(report: &NodeReport, tick_period: Duration) -> String {
    let mut out = String::new();

    metric(&mut out, "fieldnode_health", "gauge", "Node health (1=healthy, 0=not healthy)");
    let healthy = u8::from(report.health == HealthStatus::Healthy);
    let _ = writeln!(out, "fieldnode_health{{status=\"{}\"}} {healthy}", report.health);

    metric(&mut out, "fieldnode_state", "gauge", "Current sequencer state");
    let _ = writeln!(out, "fieldnode_state{{state=\"{}\"}} 1", report.state);

    metric(&mut out, "fieldnode_node_id", "gauge", "Active node identity");
    let _ = writeln!(out, "fieldnode_node_id {}", report.node_id);

    metric(&mut out, "fieldnode_uptime_seconds", "gauge", "Daemon uptime in seconds");
    let _ = writeln!(out, "fieldnode_uptime_seconds {:.3}", report.uptime_secs);

    metric(&mut out, "fieldnode_reset_cycles_total", "counter", "Communication resets completed");
    let _ = writeln!(out, "fieldnode_reset_cycles_total {}", report.reset_cycles);

    metric(
        &mut out,
        "fieldnode_foreground_iterations_total",
        "counter",
        "Foreground iterations since the last reinitialization",
    );
    let _ = writeln!(out, "fieldnode_foreground_iterations_total {}", report.iterations);

    metric(&mut out, "fieldnode_power_on_total", "counter", "Boots recorded in persistent storage");
    let _ = writeln!(out, "fieldnode_power_on_total {}", report.counters.power_on_count);

    metric(&mut out, "fieldnode_timer_overruns_total", "counter", "Cycle timer deadline misses");
    let _ = writeln!(out, "fieldnode_timer_overruns_total {}", report.counters.timer_overruns);

    metric(&mut out, "fieldnode_watchdog_services_total", "counter", "Watchdog services issued");
    let _ = writeln!(out, "fieldnode_watchdog_services_total {}", report.watchdog_services);

    let cycles = [
        ("fieldnode_main_cycle_seconds", "Last foreground cycle time", report.counters.main_cycle_time),
        ("fieldnode_main_cycle_max_seconds", "Maximum foreground cycle time", report.counters.main_cycle_max),
        ("fieldnode_timer_cycle_seconds", "Last timer interrupt time", report.counters.timer_cycle_time),
        ("fieldnode_timer_cycle_max_seconds", "Maximum timer interrupt time", report.counters.timer_cycle_max),
    ];
    for (name, help, units) in cycles {
        metric(&mut out, name, "gauge", help);
        let _ = writeln!(out, "{name} {:.6}", cycle_secs(units));
    }

    metric(&mut out, "fieldnode_tick_period_seconds", "gauge", "Nominal cycle timer period");
    let _ = writeln!(out, "fieldnode_tick_period_seconds {:.6}", tick_period.as_secs_f64());

    metric(&mut out, "fieldnode_sync_total", "counter", "SYNC objects processed");
    let _ = writeln!(out, "fieldnode_sync_total {}", report.stack.syncs);

    metric(&mut out, "fieldnode_frames_received_total", "counter", "Frames received per controller");
    for (index, frames) in report.stack.frames_received.iter().enumerate() {
        let _ = writeln!(
            out,
            "fieldnode_frames_received_total{{controller=\"CAN{}\"}} {frames}",
            index + 1
        );
    }

    metric(&mut out, "fieldnode_frames_dropped_total", "counter", "Frames dropped on receive");
    let _ = writeln!(out, "fieldnode_frames_dropped_total {}", report.stack.frames_dropped);

    metric(&mut out, "fieldnode_task_budget_seconds", "gauge", "Declared execution budget per context");
    for task in &report.tasks {
        #[allow(clippy::cast_precision_loss)]
        let budget = task.budget_us as f64 * 1e-6;
        let _ = writeln!(
            out,
            "fieldnode_task_budget_seconds{{context=\"{}\",priority=\"{}\"}} {budget:.6}",
            task.context, task.priority
        );
    }

    out
}
