#![doc = "Real-time executive of a fieldbus node: tick and bus-receive interrupt handlers, cycle-time instrumentation and the communication reset sequencer."]

pub mod bus_rx;
pub mod collaborators;
pub mod context;
pub mod cycle_timer;
pub mod foreground;
pub mod hal;
pub mod instrumentation;
pub mod sequencer;
pub mod tasks;
pub mod watchdog;

#[cfg(test)]
pub(crate) mod mock;

pub use collaborators::*;
pub use context::*;
pub use foreground::*;
pub use hal::*;
pub use instrumentation::*;
pub use sequencer::*;
pub use tasks::*;
pub use watchdog::*;
