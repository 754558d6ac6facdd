//! Cycle timer interrupt handler.
//!
//! Runs every tick at a priority below the bus receive interrupts. Within one
//! invocation SYNC/RPDO processing strictly precedes the application's fast
//! hook, which strictly precedes TPDO processing: inputs are sampled before
//! outputs are computed for the same tick.

use crate::context::NodeContext;
use crate::hal::InterruptSource;
use node_common::node::{EmergencyCode, ErrorClass};
use tracing::warn;

/// Info code attached to timer overflow reports.
pub const TIMER_OVERFLOW_INFO: u32 = 0;

impl NodeContext<'_> {
    /// Cycle timer interrupt entry point.
    ///
    /// If the timer's pending flag is already set again when the work is
    /// done, the handler took longer than one tick. That deadline miss is
    /// reported through the stack's error sink and counted, and execution
    /// continues.
    pub fn on_timer_interrupt(&self) {
        let board = self.board;
        let shared = self.shared;

        board.clear_pending(InterruptSource::Timer);
        shared.ticks.increment();

        let period_us = shared.nominal_period_us;
        let sync_was = self.stack.process_sync_rpdo(period_us);
        self.app.program_1ms();
        self.stack.process_tpdo(sync_was, period_us);

        if board.is_pending(InterruptSource::Timer) {
            self.stack.report_error(
                EmergencyCode::IsrTimerOverflow,
                ErrorClass::SoftwareInternal,
                TIMER_OVERFLOW_INFO,
            );
            board.clear_pending(InterruptSource::Timer);
            shared.counters.count_timer_overrun();
            warn!(
                tick = shared.ticks.now(),
                overruns = shared.counters.timer_overruns(),
                "Timer interrupt overran its period"
            );
        }

        let cycle_time = shared.clock.percent_of_tick(board.counter());
        shared.counters.timer_cycle.record(cycle_time);
    }
}
