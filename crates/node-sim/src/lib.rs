//! Hosted simulation of a fieldbus node's environment.
//!
//! This crate provides:
//! - [`board`]: timer, interrupt controller, watchdog and reset of a board
//! - [`stack`]: an in-memory protocol stack with receive queues and SYNC
//! - [`persistence`]: JSON file storage of the persistent dictionary entries
//! - [`irq`]: threads delivering the timer and bus receive interrupts

pub mod board;
pub mod irq;
pub mod persistence;
pub mod stack;

pub use board::*;
pub use irq::*;
pub use persistence::*;
pub use stack::*;
