//! Bus receive interrupt handlers.
//!
//! One handler per controller, each at a priority strictly above the cycle
//! timer so that receive processing is never delayed behind timer-driven
//! transmit processing. The handlers share no mutable state with each other.

use crate::context::NodeContext;
use crate::hal::InterruptSource;
use node_common::node::BusController;

impl NodeContext<'_> {
    /// Receive interrupt entry point of `controller`.
    ///
    /// Forwards to the stack's controller routine, then clears only this
    /// controller's pending flag.
    pub fn on_bus_interrupt(&self, controller: BusController) {
        self.stack.can_interrupt(controller);
        self.board.clear_pending(InterruptSource::Bus(controller));
    }
}
