//! Shared fixtures for the acceptance tests.
//!
//! Provides helpers for:
//! - Building node configurations for one or two controllers
//! - Counting application hook invocations
//! - Stepping the sequencer and running the interrupt lines

#![allow(dead_code)] // Not every test module uses every fixture

use node_common::config::NodeConfig;
use node_common::node::BusController;
use node_common::state::SequencerState;
use node_runtime::collaborators::Application;
use node_runtime::context::NodeContext;
use node_runtime::sequencer::Sequencer;
use node_sim::{InterruptLines, SimBoard};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

/// Upper bound on steps a test waits for a state.
pub const MAX_STEPS: usize = 64;

/// Default configuration with `controllers` bus controllers.
pub fn node_config(controllers: u8) -> NodeConfig {
    let mut config = NodeConfig::default();
    config.bus.controllers = controllers;
    config.watchdog.enabled = false;
    config
}

/// Application counting every hook, with an optional busy fast hook.
#[derive(Debug, Default)]
pub struct HookCounter {
    pub starts: AtomicU64,
    pub resets: AtomicU64,
    pub fast: AtomicU64,
    pub asyncs: AtomicU64,
    pub ends: AtomicU64,
    fast_delay: Duration,
}

impl HookCounter {
    /// Application whose fast hook takes `delay`.
    pub fn with_fast_delay(delay: Duration) -> Self {
        Self {
            fast_delay: delay,
            ..Self::default()
        }
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

impl Application for HookCounter {
    fn program_start(&self) {
        self.starts.fetch_add(1, Ordering::Relaxed);
    }

    fn communication_reset(&self) {
        self.resets.fetch_add(1, Ordering::Relaxed);
    }

    fn program_1ms(&self) {
        self.fast.fetch_add(1, Ordering::Relaxed);
        if !self.fast_delay.is_zero() {
            thread::sleep(self.fast_delay);
        }
    }

    fn program_async(&self, _elapsed_ms: u16) {
        self.asyncs.fetch_add(1, Ordering::Relaxed);
    }

    fn program_end(&self) {
        self.ends.fetch_add(1, Ordering::Relaxed);
    }
}

/// Step until `target` is reached. Returns false if it never is.
pub fn step_until(sequencer: &mut Sequencer<'_>, target: SequencerState) -> bool {
    for _ in 0..MAX_STEPS {
        if sequencer.step().unwrap() == target {
            return true;
        }
    }
    false
}

/// Run `body` while the interrupt lines of `ctx` are live.
pub fn with_interrupt_lines<R>(
    ctx: NodeContext<'_>,
    board: &SimBoard,
    controllers: &[BusController],
    body: impl FnOnce() -> R,
) -> R {
    let stop = AtomicBool::new(false);
    thread::scope(|scope| {
        let lines = InterruptLines::spawn(scope, ctx, board, controllers, &stop).unwrap();
        let result = body();
        stop.store(true, Ordering::Release);
        lines.join();
        result
    })
}
