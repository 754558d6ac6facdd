//! Cycle-time instrumentation.
//!
//! Two time bases are combined: the millisecond [`TickCounter`] and the
//! hardware timer's free-running counter, which restarts from zero every
//! tick. Cycle times are expressed in hundredths of a tick.
//!
//! # Wraparound
//!
//! Tick differences use wrapping subtraction, so they stay correct across a
//! counter wrap as long as fewer than 65536 ticks pass between samples.
//!
//! The hardware counter comparison tolerates at most one counter restart
//! between two samples. A context delayed by more than that reports a wrong
//! (too small) cycle time.

use std::sync::atomic::{AtomicU16, Ordering};

/// Monotonic millisecond counter, written only by the timer interrupt.
#[derive(Debug, Default)]
pub struct TickCounter(AtomicU16);

impl TickCounter {
    /// Create a counter starting at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU16::new(0))
    }

    /// Advance by one tick. Timer interrupt only.
    #[inline]
    pub fn increment(&self) {
        // Single writer: a plain load/store pair is enough, no RMW needed.
        let next = self.0.load(Ordering::Relaxed).wrapping_add(1);
        self.0.store(next, Ordering::Release);
    }

    /// Current raw value. Only meaningful as input to [`elapsed_ticks`].
    #[inline]
    #[must_use]
    pub fn now(&self) -> u16 {
        self.0.load(Ordering::Acquire)
    }
}

/// Ticks elapsed from `previous` to `current`, across at most one wrap.
#[inline]
#[must_use]
pub const fn elapsed_ticks(previous: u16, current: u16) -> u16 {
    current.wrapping_sub(previous)
}

/// Converts hardware timer counts into hundredths of a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleClock {
    counts_per_tick: u16,
    counts_per_percent: u16,
}

impl CycleClock {
    /// Create a clock for a timer that counts `counts_per_tick` per tick.
    #[must_use]
    pub fn new(counts_per_tick: u16) -> Self {
        Self {
            counts_per_tick,
            counts_per_percent: (counts_per_tick / 100).max(1),
        }
    }

    /// Counts per tick.
    #[must_use]
    pub fn counts_per_tick(&self) -> u16 {
        self.counts_per_tick
    }

    /// Value for the timer period register.
    #[must_use]
    pub fn period_register(&self) -> u16 {
        self.counts_per_tick.saturating_sub(1)
    }

    /// Position inside the current tick, in hundredths of a tick.
    #[inline]
    #[must_use]
    pub fn percent_of_tick(&self, raw: u16) -> u16 {
        raw / self.counts_per_percent
    }

    /// Elapsed time between two samples, in hundredths of a tick.
    ///
    /// If the new reading is not below the previous one the counter moved
    /// forward within a tick and the partial tick is added. Otherwise the
    /// counter restarted once and the shortfall is subtracted from the
    /// elapsed ticks. A backward reading without any elapsed tick yields 0.
    #[must_use]
    pub fn elapsed(&self, ticks: u16, previous_raw: u16, raw: u16) -> u16 {
        let whole = u32::from(ticks) * 100;
        let total = if raw >= previous_raw {
            whole + u32::from(self.percent_of_tick(raw - previous_raw))
        } else if ticks != 0 {
            whole.saturating_sub(u32::from(self.percent_of_tick(previous_raw - raw)))
        } else {
            0
        };
        u16::try_from(total).unwrap_or(u16::MAX)
    }
}

/// One foreground period measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleSample {
    /// Whole ticks since the previous sample.
    pub elapsed_ms: u16,
    /// Period in hundredths of a tick.
    pub cycle_time: u16,
}

/// Sampling state owned by the foreground loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodMeter {
    previous_tick: u16,
    previous_raw: u16,
}

impl PeriodMeter {
    /// Start measuring from tick `baseline`, with the counter reading zero.
    #[must_use]
    pub const fn new(baseline: u16) -> Self {
        Self {
            previous_tick: baseline,
            previous_raw: 0,
        }
    }

    /// Take a sample and make it the new reference.
    pub fn sample(&mut self, clock: &CycleClock, tick: u16, raw: u16) -> CycleSample {
        let elapsed_ms = elapsed_ticks(self.previous_tick, tick);
        let cycle_time = clock.elapsed(elapsed_ms, self.previous_raw, raw);
        self.previous_tick = tick;
        self.previous_raw = raw;
        CycleSample {
            elapsed_ms,
            cycle_time,
        }
    }
}
