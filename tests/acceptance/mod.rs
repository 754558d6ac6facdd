//! Integration tests for fieldnode acceptance testing.
//!
//! The sequencer tests use a manually clocked board and are deterministic;
//! the timing tests clock the board from the host and run the interrupt
//! lines as threads.

mod common;
mod sequencer_test;
mod timing_test;
