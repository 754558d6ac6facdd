//! Diagnostic counters exposed to the application and diagnostic layer.
//!
//! Every field has exactly one writer context. Foreground cycle times are
//! written by the foreground loop, timer cycle times and the overrun count by
//! the timer interrupt. Readers only ever perform single atomic loads, so no
//! lock is taken on either side.
//!
//! Cycle times are expressed in hundredths of a tick (10 µs at a 1 ms tick).

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};

/// Current and maximum cycle time for one execution context.
#[derive(Debug, Default)]
pub struct CycleTime {
    current: AtomicU16,
    max: AtomicU16,
}

impl CycleTime {
    /// Create zeroed counters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            current: AtomicU16::new(0),
            max: AtomicU16::new(0),
        }
    }

    /// Record a new measurement and raise the maximum if exceeded.
    ///
    /// Must only be called from the context that owns these counters.
    #[inline]
    pub fn record(&self, value: u16) {
        self.current.store(value, Ordering::Relaxed);
        if value > self.max.load(Ordering::Relaxed) {
            self.max.store(value, Ordering::Relaxed);
        }
    }

    /// Last recorded value.
    #[inline]
    #[must_use]
    pub fn current(&self) -> u16 {
        self.current.load(Ordering::Relaxed)
    }

    /// Largest value since the last reset.
    #[inline]
    #[must_use]
    pub fn max(&self) -> u16 {
        self.max.load(Ordering::Relaxed)
    }

    fn reset_max(&self) {
        self.max.store(0, Ordering::Relaxed);
    }
}

/// Named diagnostic counters of the node.
#[derive(Debug, Default)]
pub struct DiagnosticCounters {
    /// Foreground loop period.
    pub main_cycle: CycleTime,
    /// Timer interrupt execution time.
    pub timer_cycle: CycleTime,
    power_on_count: AtomicU32,
    timer_overruns: AtomicU32,
}

impl DiagnosticCounters {
    /// Create zeroed counters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            main_cycle: CycleTime::new(),
            timer_cycle: CycleTime::new(),
            power_on_count: AtomicU32::new(0),
            timer_overruns: AtomicU32::new(0),
        }
    }

    /// Zero both maxima.
    ///
    /// Only called by the sequencer while the timer interrupt is disabled.
    pub fn reset_maxima(&self) {
        self.main_cycle.reset_max();
        self.timer_cycle.reset_max();
    }

    /// Seed the power-on counter from persistent storage.
    pub fn restore_power_on_count(&self, count: u32) {
        self.power_on_count.store(count, Ordering::Relaxed);
    }

    /// Count one boot and return the new value.
    pub fn count_power_on(&self) -> u32 {
        self.power_on_count
            .fetch_add(1, Ordering::Relaxed)
            .wrapping_add(1)
    }

    /// Number of boots recorded.
    #[must_use]
    pub fn power_on_count(&self) -> u32 {
        self.power_on_count.load(Ordering::Relaxed)
    }

    /// Count one timer deadline miss (timer interrupt only).
    pub fn count_timer_overrun(&self) {
        self.timer_overruns.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of timer deadline misses since power-on.
    #[must_use]
    pub fn timer_overruns(&self) -> u32 {
        self.timer_overruns.load(Ordering::Relaxed)
    }

    /// Get a snapshot of current counters.
    #[must_use]
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            main_cycle_time: self.main_cycle.current(),
            main_cycle_max: self.main_cycle.max(),
            timer_cycle_time: self.timer_cycle.current(),
            timer_cycle_max: self.timer_cycle.max(),
            power_on_count: self.power_on_count(),
            timer_overruns: self.timer_overruns(),
        }
    }
}

/// Immutable snapshot of the diagnostic counters for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DiagnosticsSnapshot {
    /// Last foreground cycle time.
    pub main_cycle_time: u16,
    /// Maximum foreground cycle time.
    pub main_cycle_max: u16,
    /// Last timer interrupt cycle time.
    pub timer_cycle_time: u16,
    /// Maximum timer interrupt cycle time.
    pub timer_cycle_max: u16,
    /// Boots recorded.
    pub power_on_count: u32,
    /// Timer deadline misses.
    pub timer_overruns: u32,
}
