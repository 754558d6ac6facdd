//! Board-support seam.
//!
//! The executive touches only a handful of hardware facilities: the periodic
//! timer and its free-running counter, the interrupt controller (enable,
//! pending flag, priority) for the timer and each bus controller, the
//! watchdog, and a software reset. Everything else belongs to the board
//! support package that implements these traits.

use node_common::node::BusController;
use std::fmt;

/// Interrupt sources the executive arms, clears and prioritizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterruptSource {
    /// Periodic cycle timer.
    Timer,
    /// Combined receive interrupt of one bus controller.
    Bus(BusController),
}

impl InterruptSource {
    /// Every source, including the second controller even when unused.
    pub const ALL: [InterruptSource; 3] = [
        InterruptSource::Timer,
        InterruptSource::Bus(BusController::Can1),
        InterruptSource::Bus(BusController::Can2),
    ];

    /// Dense index usable for per-source register arrays.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Timer => 0,
            Self::Bus(ctrl) => 1 + ctrl.index(),
        }
    }
}

impl fmt::Display for InterruptSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timer => write!(f, "TIMER"),
            Self::Bus(ctrl) => write!(f, "{ctrl}"),
        }
    }
}

/// Periodic hardware timer with a free-running counter.
pub trait CycleTimer: Sync {
    /// Stop the timer, zero its counter, load `period` into the period
    /// register with a 1:1 prescaler and start it again.
    ///
    /// The counter resets to zero every `period + 1` counts, which is when
    /// the timer interrupt becomes pending.
    fn configure(&self, period: u16);

    /// Read the free-running counter.
    fn counter(&self) -> u16;
}

/// Interrupt controller access for the executive's interrupt sources.
pub trait InterruptController: Sync {
    /// Allow `source` to interrupt.
    fn enable(&self, source: InterruptSource);

    /// Mask `source`.
    fn disable(&self, source: InterruptSource);

    /// Whether the pending flag of `source` is set.
    fn is_pending(&self, source: InterruptSource) -> bool;

    /// Clear the pending flag of `source`.
    fn clear_pending(&self, source: InterruptSource);

    /// Program the priority level of `source`. Higher preempts lower.
    fn set_priority(&self, source: InterruptSource, level: u8);

    /// Read back the programmed priority level of `source`.
    fn priority(&self, source: InterruptSource) -> u8;
}

/// Watchdog servicing.
pub trait WatchdogService: Sync {
    /// Restart the watchdog period.
    fn service(&self);
}

/// Everything the executive needs from the board.
pub trait Board: CycleTimer + InterruptController + WatchdogService {
    /// Restart the whole node (or hosting process).
    fn software_reset(&self);
}
