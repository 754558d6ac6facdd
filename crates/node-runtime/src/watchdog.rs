//! Software watchdog for hosted nodes.
//!
//! On a real board the watchdog is a hardware peripheral serviced through
//! [`WatchdogService`]. A hosted node has none, so a monitor thread plays
//! that role: the foreground must service it within the timeout, otherwise
//! the trigger callback runs once.

use crate::hal::WatchdogService;
use node_common::error::{NodeError, NodeResult};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Watchdog supervised by a monitor thread.
#[derive(Debug)]
pub struct SoftwareWatchdog {
    state: Arc<WatchdogState>,
    monitor_handle: Option<JoinHandle<()>>,
    timeout: Duration,
    running: Arc<AtomicBool>,
}

#[derive(Debug)]
struct WatchdogState {
    /// Last service, in nanoseconds since `start_time`.
    last_service_ns: AtomicU64,
    start_time: Instant,
    triggered: AtomicBool,
    stop_requested: AtomicBool,
}

impl WatchdogState {
    fn new() -> Self {
        Self {
            last_service_ns: AtomicU64::new(0),
            start_time: Instant::now(),
            triggered: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
        }
    }

    fn elapsed_ns(&self) -> u64 {
        u64::try_from(self.start_time.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    fn service(&self) {
        self.last_service_ns.store(self.elapsed_ns(), Ordering::Release);
    }

    fn is_timed_out(&self, timeout_ns: u64) -> bool {
        let last = self.last_service_ns.load(Ordering::Acquire);
        self.elapsed_ns().saturating_sub(last) > timeout_ns
    }
}

impl SoftwareWatchdog {
    /// Create a stopped watchdog. Call [`SoftwareWatchdog::start`] to arm it.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: Arc::new(WatchdogState::new()),
            monitor_handle: None,
            timeout,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Configured timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Arm the watchdog; `on_trigger` runs once when it expires.
    ///
    /// # Errors
    ///
    /// Fails if the watchdog is already running or the monitor thread cannot
    /// be spawned.
    pub fn start<F>(&mut self, on_trigger: F) -> NodeResult<()>
    where
        F: Fn() + Send + 'static,
    {
        if self.running.load(Ordering::Acquire) {
            return Err(NodeError::Config("watchdog already running".into()));
        }

        info!(timeout_ms = self.timeout.as_millis(), "Starting watchdog");

        self.state.stop_requested.store(false, Ordering::Release);
        self.state.triggered.store(false, Ordering::Release);
        self.state.service();

        let state = Arc::clone(&self.state);
        let running = Arc::clone(&self.running);
        let timeout_ns = u64::try_from(self.timeout.as_nanos()).unwrap_or(u64::MAX);
        let check_interval = (self.timeout / 4).max(Duration::from_millis(1));

        // Set before spawning so is_running() is true immediately
        self.running.store(true, Ordering::Release);

        let spawned = thread::Builder::new()
            .name("node-watchdog".into())
            .spawn(move || {
                debug!("Watchdog monitor thread started");

                while !state.stop_requested.load(Ordering::Acquire) {
                    thread::sleep(check_interval);

                    if state.stop_requested.load(Ordering::Acquire) {
                        break;
                    }

                    if state.is_timed_out(timeout_ns)
                        && !state.triggered.swap(true, Ordering::AcqRel)
                    {
                        error!("Watchdog expired: foreground stopped servicing");
                        on_trigger();
                    }
                }

                running.store(false, Ordering::Release);
                debug!("Watchdog monitor thread stopped");
            });

        match spawned {
            Ok(handle) => {
                self.monitor_handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                Err(NodeError::Config(format!(
                    "failed to spawn watchdog thread: {e}"
                )))
            }
        }
    }

    /// Whether the watchdog has expired since it was armed.
    #[inline]
    #[must_use]
    pub fn has_triggered(&self) -> bool {
        self.state.triggered.load(Ordering::Acquire)
    }

    /// Stop the monitor thread.
    pub fn stop(&mut self) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }

        info!("Stopping watchdog");
        self.state.stop_requested.store(true, Ordering::Release);

        if let Some(handle) = self.monitor_handle.take() {
            if let Err(e) = handle.join() {
                warn!("Watchdog thread panicked: {:?}", e);
            }
        }
    }

    /// Whether the monitor thread is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Time since the last service.
    #[must_use]
    pub fn time_since_service(&self) -> Duration {
        let last = self.state.last_service_ns.load(Ordering::Acquire);
        Duration::from_nanos(self.state.elapsed_ns().saturating_sub(last))
    }
}

impl WatchdogService for SoftwareWatchdog {
    #[inline]
    fn service(&self) {
        self.state.service();
    }
}

impl Drop for SoftwareWatchdog {
    fn drop(&mut self) {
        self.stop();
    }
}
