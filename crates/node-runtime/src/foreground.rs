//! Foreground cycle.
//!
//! One iteration measures the time since the previous iteration, runs the
//! application's asynchronous hook, lets the stack do its general processing
//! and gives persistence a chance to write. The watchdog is serviced between
//! every phase, so no single collaborator call has to fit into the whole
//! watchdog period together with the others.

use crate::context::NodeContext;
use crate::instrumentation::{CycleSample, PeriodMeter};
use node_common::node::ResetRequest;
use tracing::trace;

/// Outcome of one foreground iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationReport {
    /// Measured period since the previous iteration.
    pub sample: CycleSample,
    /// Reset request returned by the stack.
    pub reset: ResetRequest,
}

/// Foreground loop state, rebuilt on every communication reset.
#[derive(Debug, Clone)]
pub struct ForegroundCycle {
    meter: PeriodMeter,
    iterations: u64,
}

impl ForegroundCycle {
    /// Start a new foreground cycle with its reference at tick `baseline`.
    #[must_use]
    pub fn new(baseline: u16) -> Self {
        Self {
            meter: PeriodMeter::new(baseline),
            iterations: 0,
        }
    }

    /// Iterations run since the last reset.
    #[must_use]
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Run one iteration.
    pub fn iterate(&mut self, ctx: &NodeContext<'_>) -> IterationReport {
        let shared = ctx.shared;

        ctx.board.service();
        let sample = self
            .meter
            .sample(&shared.clock, shared.ticks.now(), ctx.board.counter());
        shared.counters.main_cycle.record(sample.cycle_time);

        ctx.app.program_async(sample.elapsed_ms);
        ctx.board.service();

        let reset = ctx.stack.process(sample.elapsed_ms);
        ctx.board.service();

        ctx.persistence.process(&shared.counters);
        self.iterations += 1;

        trace!(
            elapsed_ms = sample.elapsed_ms,
            cycle_time = sample.cycle_time,
            reset = %reset,
            "Foreground iteration"
        );

        IterationReport { sample, reset }
    }
}
