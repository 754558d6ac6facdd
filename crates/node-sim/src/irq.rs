//! Hosted interrupt delivery.
//!
//! Each interrupt line is a thread that waits for its source's pending flag
//! and calls the matching entry point while the source is enabled. Threads
//! cannot preempt one another, so priorities only hold in the sense that
//! each line runs independently of the foreground; the ordering guarantees
//! inside each handler are unaffected. A handler runs inside
//! [`SimBoard::enter`], so disabling its source waits for it to finish.

use crate::board::SimBoard;
use crate::stack::{CanFrame, SimStack};
use node_common::node::BusController;
use node_runtime::context::NodeContext;
use node_runtime::hal::InterruptSource;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, Scope, ScopedJoinHandle};
use std::time::Duration;
use tracing::debug;

/// Poll interval of lines with nothing to do.
pub const IDLE_POLL: Duration = Duration::from_micros(250);

/// Queue `frame` on `controller` and raise its receive interrupt.
pub fn deliver_frame(
    board: &SimBoard,
    stack: &SimStack,
    controller: BusController,
    frame: CanFrame,
) -> bool {
    let accepted = stack.push_frame(controller, frame);
    if accepted {
        board.raise(InterruptSource::Bus(controller));
    }
    accepted
}

/// Cycle timer line. Returns the number of handler runs once `stop` is set.
pub fn run_timer_line(ctx: NodeContext<'_>, board: &SimBoard, stop: &AtomicBool) -> u64 {
    let mut runs = 0;
    while !stop.load(Ordering::Acquire) {
        if let Some(_in_service) = board.enter(InterruptSource::Timer) {
            ctx.on_timer_interrupt();
            runs += 1;
            continue;
        }
        let wait = board.until_next_tick();
        thread::sleep(if wait.is_zero() { IDLE_POLL } else { wait });
    }
    runs
}

/// Receive line for `controllers`. Returns the number of handler runs.
pub fn run_bus_line(
    ctx: NodeContext<'_>,
    board: &SimBoard,
    controllers: &[BusController],
    stop: &AtomicBool,
) -> u64 {
    let mut runs = 0;
    while !stop.load(Ordering::Acquire) {
        let mut served = false;
        for &ctrl in controllers {
            if let Some(_in_service) = board.enter(InterruptSource::Bus(ctrl)) {
                ctx.on_bus_interrupt(ctrl);
                runs += 1;
                served = true;
            }
        }
        if !served {
            thread::sleep(IDLE_POLL);
        }
    }
    runs
}

/// Periodic traffic source: one frame per `interval` on `controller`.
pub fn run_traffic(
    board: &SimBoard,
    stack: &SimStack,
    controller: BusController,
    interval: Duration,
    stop: &AtomicBool,
) -> u64 {
    let mut sent = 0u64;
    while !stop.load(Ordering::Acquire) {
        thread::sleep(interval);
        let counter = sent.to_le_bytes();
        if deliver_frame(board, stack, controller, CanFrame::new(0x181, &counter[..4])) {
            sent += 1;
        }
    }
    sent
}

/// Interrupt line threads of one node.
#[derive(Debug)]
pub struct InterruptLines<'scope> {
    timer: ScopedJoinHandle<'scope, u64>,
    bus: ScopedJoinHandle<'scope, u64>,
}

impl<'scope> InterruptLines<'scope> {
    /// Spawn the timer line and one receive line covering `controllers`.
    ///
    /// # Errors
    ///
    /// Fails if a thread cannot be spawned.
    pub fn spawn<'env>(
        scope: &'scope Scope<'scope, 'env>,
        ctx: NodeContext<'env>,
        board: &'env SimBoard,
        controllers: &'env [BusController],
        stop: &'env AtomicBool,
    ) -> io::Result<Self> {
        let timer = thread::Builder::new()
            .name("node-timer-irq".into())
            .spawn_scoped(scope, move || run_timer_line(ctx, board, stop))?;
        let bus = thread::Builder::new()
            .name("node-bus-irq".into())
            .spawn_scoped(scope, move || run_bus_line(ctx, board, controllers, stop))?;
        Ok(Self { timer, bus })
    }

    /// Wait for both lines to stop. Set the stop flag first.
    pub fn join(self) -> (u64, u64) {
        let timer = self.timer.join().unwrap_or_default();
        let bus = self.bus.join().unwrap_or_default();
        debug!(timer_runs = timer, bus_runs = bus, "Interrupt lines stopped");
        (timer, bus)
    }
}
