//! State shared by the three execution contexts.
//!
//! [`NodeShared`] owns the tick counter and the diagnostic counters; each
//! field has a single writer context. [`NodeContext`] bundles it with
//! references to the collaborators and is handed by value to every entry
//! point: the foreground sequencer, the cycle timer handler and the bus
//! receive handlers.

use crate::collaborators::{Application, Persistence, ProtocolStack};
use crate::hal::Board;
use crate::instrumentation::{CycleClock, TickCounter};
use crossbeam_utils::CachePadded;
use node_common::config::NodeConfig;
use node_common::metrics::DiagnosticCounters;
use static_assertions::assert_impl_all;

/// Shared executive state.
#[derive(Debug)]
pub struct NodeShared {
    /// Millisecond time base. Written by the timer interrupt only.
    pub ticks: CachePadded<TickCounter>,
    /// Diagnostic counters; each field documents its writer.
    pub counters: DiagnosticCounters,
    /// Hardware counter scaling, fixed at construction.
    pub clock: CycleClock,
    /// Nominal tick period handed to the stack, in microseconds.
    pub nominal_period_us: u32,
}

impl NodeShared {
    /// Create shared state for the given timer scaling and period.
    #[must_use]
    pub fn new(clock: CycleClock, nominal_period_us: u32) -> Self {
        Self {
            ticks: CachePadded::new(TickCounter::new()),
            counters: DiagnosticCounters::new(),
            clock,
            nominal_period_us,
        }
    }

    /// Create shared state from the node configuration.
    #[must_use]
    pub fn from_config(config: &NodeConfig) -> Self {
        let period_us = u32::try_from(config.tick_period.as_micros()).unwrap_or(u32::MAX);
        Self::new(CycleClock::new(config.timer.counts_per_tick), period_us)
    }
}

assert_impl_all!(NodeShared: Send, Sync);

/// References to everything an execution context may touch.
#[derive(Clone, Copy)]
pub struct NodeContext<'a> {
    /// Protocol engine.
    pub stack: &'a dyn ProtocolStack,
    /// Non-volatile storage.
    pub persistence: &'a dyn Persistence,
    /// User application hooks.
    pub app: &'a dyn Application,
    /// Board support.
    pub board: &'a dyn Board,
    /// Shared executive state.
    pub shared: &'a NodeShared,
}

impl<'a> NodeContext<'a> {
    /// Bundle collaborators and shared state.
    #[must_use]
    pub fn new(
        stack: &'a dyn ProtocolStack,
        persistence: &'a dyn Persistence,
        app: &'a dyn Application,
        board: &'a dyn Board,
        shared: &'a NodeShared,
    ) -> Self {
        Self {
            stack,
            persistence,
            app,
            board,
            shared,
        }
    }
}

assert_impl_all!(NodeContext<'static>: Send, Sync, Copy);

impl std::fmt::Debug for NodeContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeContext")
            .field("shared", self.shared)
            .finish_non_exhaustive()
    }
}
