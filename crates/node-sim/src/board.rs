//! Simulated board peripherals.
//!
//! [`SimBoard`] stands in for the timer, interrupt controller, watchdog and
//! reset logic of a microcontroller. Its timer either follows the host's
//! monotonic clock, restarting every tick period like the real counter, or
//! is driven by hand for deterministic tests.
//!
//! In real-time mode the timer's pending flag behaves like hardware: it is
//! set at every period boundary whether or not the interrupt is enabled, and
//! stays set until cleared. A handler that runs past the next boundary
//! therefore finds its own flag set again.
//!
//! Handlers enter through [`SimBoard::enter`], which marks the source in
//! service. Disabling a source waits for its running handler to leave, so
//! code that runs after `disable` never overlaps that handler, as on a
//! single-core part.

use node_runtime::hal::{Board, CycleTimer, InterruptController, InterruptSource, WatchdogService};
use node_runtime::watchdog::SoftwareWatchdog;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::hint;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const SOURCES: usize = InterruptSource::ALL.len();

/// How the timer counter advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterMode {
    /// Follows the host clock.
    Realtime,
    /// Only changes through [`SimBoard::set_counter`].
    Manual,
}

/// Simulated board.
#[derive(Debug)]
pub struct SimBoard {
    mode: CounterMode,
    tick_ns: u64,
    origin: Instant,
    /// Start of the current timer run, in nanoseconds since `origin`.
    epoch_ns: AtomicU64,
    running: AtomicBool,
    period: AtomicU16,
    manual_counter: AtomicU16,
    /// Timer period index acknowledged by the last clear.
    acked_period: AtomicU64,
    pending: [AtomicBool; SOURCES],
    enabled: [AtomicBool; SOURCES],
    in_service: [AtomicBool; SOURCES],
    priority: [AtomicU8; SOURCES],
    watchdog: Option<Arc<SoftwareWatchdog>>,
    watchdog_services: AtomicU64,
    software_resets: AtomicU32,
}

impl SimBoard {
    /// Board whose timer follows the host clock with the given tick period.
    #[must_use]
    pub fn realtime(tick_period: Duration) -> Self {
        Self::with_mode(CounterMode::Realtime, tick_period)
    }

    /// Board whose timer counter is set by hand.
    #[must_use]
    pub fn manual() -> Self {
        Self::with_mode(CounterMode::Manual, Duration::from_millis(1))
    }

    fn with_mode(mode: CounterMode, tick_period: Duration) -> Self {
        Self {
            mode,
            tick_ns: u64::try_from(tick_period.as_nanos()).unwrap_or(u64::MAX).max(1),
            origin: Instant::now(),
            epoch_ns: AtomicU64::new(0),
            running: AtomicBool::new(false),
            period: AtomicU16::new(u16::MAX),
            manual_counter: AtomicU16::new(0),
            acked_period: AtomicU64::new(0),
            pending: Default::default(),
            enabled: Default::default(),
            in_service: Default::default(),
            priority: Default::default(),
            watchdog: None,
            watchdog_services: AtomicU64::new(0),
            software_resets: AtomicU32::new(0),
        }
    }

    /// Forward watchdog services to a running software watchdog.
    #[must_use]
    pub fn with_watchdog(mut self, watchdog: Arc<SoftwareWatchdog>) -> Self {
        self.watchdog = Some(watchdog);
        self
    }

    /// Counter mode.
    #[must_use]
    pub fn mode(&self) -> CounterMode {
        self.mode
    }

    /// Set the pending flag of `source`, as the peripheral would.
    pub fn raise(&self, source: InterruptSource) {
        self.pending[source.index()].store(true, Ordering::Release);
    }

    /// Whether `source` is enabled.
    #[must_use]
    pub fn is_enabled(&self, source: InterruptSource) -> bool {
        self.enabled[source.index()].load(Ordering::Acquire)
    }

    /// Whether a handler for `source` is running.
    #[must_use]
    pub fn in_service(&self, source: InterruptSource) -> bool {
        self.in_service[source.index()].load(Ordering::SeqCst)
    }

    /// Enter the handler of `source` if it is enabled and pending.
    ///
    /// The source stays in service until the returned guard is dropped.
    #[must_use]
    pub fn enter(&self, source: InterruptSource) -> Option<InService<'_>> {
        let flag = &self.in_service[source.index()];
        flag.store(true, Ordering::SeqCst);
        if self.enabled[source.index()].load(Ordering::SeqCst) && self.is_pending(source) {
            Some(InService { flag })
        } else {
            flag.store(false, Ordering::SeqCst);
            None
        }
    }

    /// Set the counter in manual mode. Ignored in real-time mode.
    pub fn set_counter(&self, raw: u16) {
        self.manual_counter.store(raw, Ordering::Relaxed);
    }

    /// Whether the timer has been configured and started.
    #[must_use]
    pub fn timer_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Time until the next timer period boundary; zero when not running.
    #[must_use]
    pub fn until_next_tick(&self) -> Duration {
        if self.mode == CounterMode::Manual || !self.timer_running() {
            return Duration::ZERO;
        }
        let into = self.run_ns() % self.tick_ns;
        Duration::from_nanos(self.tick_ns - into)
    }

    /// Watchdog services so far.
    #[must_use]
    pub fn watchdog_services(&self) -> u64 {
        self.watchdog_services.load(Ordering::Relaxed)
    }

    /// Software resets requested so far.
    #[must_use]
    pub fn software_resets(&self) -> u32 {
        self.software_resets.load(Ordering::Relaxed)
    }

    fn now_ns(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    fn run_ns(&self) -> u64 {
        self.now_ns()
            .saturating_sub(self.epoch_ns.load(Ordering::Acquire))
    }

    fn period_index(&self) -> u64 {
        self.run_ns() / self.tick_ns
    }
}

/// A handler in service; leaves service on drop.
#[derive(Debug)]
pub struct InService<'a> {
    flag: &'a AtomicBool,
}

impl Drop for InService<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

impl CycleTimer for SimBoard {
    fn configure(&self, period: u16) {
        self.period.store(period, Ordering::Relaxed);
        self.manual_counter.store(0, Ordering::Relaxed);
        self.epoch_ns.store(self.now_ns(), Ordering::Release);
        self.acked_period.store(0, Ordering::Release);
        self.running.store(true, Ordering::Release);
        debug!(period, "Timer configured");
    }

    fn counter(&self) -> u16 {
        match self.mode {
            CounterMode::Manual => self.manual_counter.load(Ordering::Relaxed),
            CounterMode::Realtime => {
                if !self.timer_running() {
                    return 0;
                }
                let counts = u64::from(self.period.load(Ordering::Relaxed)) + 1;
                let into = self.run_ns() % self.tick_ns;
                u16::try_from(into * counts / self.tick_ns).unwrap_or(u16::MAX)
            }
        }
    }
}

impl InterruptController for SimBoard {
    fn enable(&self, source: InterruptSource) {
        self.enabled[source.index()].store(true, Ordering::Release);
    }

    fn disable(&self, source: InterruptSource) {
        self.enabled[source.index()].store(false, Ordering::SeqCst);
        while self.in_service[source.index()].load(Ordering::SeqCst) {
            hint::spin_loop();
        }
    }

    fn is_pending(&self, source: InterruptSource) -> bool {
        if self.pending[source.index()].load(Ordering::Acquire) {
            return true;
        }
        source == InterruptSource::Timer
            && self.mode == CounterMode::Realtime
            && self.timer_running()
            && self.period_index() > self.acked_period.load(Ordering::Acquire)
    }

    fn clear_pending(&self, source: InterruptSource) {
        if source == InterruptSource::Timer {
            self.acked_period.store(self.period_index(), Ordering::Release);
        }
        self.pending[source.index()].store(false, Ordering::Release);
    }

    fn set_priority(&self, source: InterruptSource, level: u8) {
        self.priority[source.index()].store(level, Ordering::Relaxed);
    }

    fn priority(&self, source: InterruptSource) -> u8 {
        self.priority[source.index()].load(Ordering::Relaxed)
    }
}

impl WatchdogService for SimBoard {
    fn service(&self) {
        self.watchdog_services.fetch_add(1, Ordering::Relaxed);
        if let Some(watchdog) = &self.watchdog {
            watchdog.service();
        }
    }
}

impl Board for SimBoard {
    fn software_reset(&self) {
        self.software_resets.fetch_add(1, Ordering::Relaxed);
        info!("Software reset requested");
    }
}
