//! Signal handling for the node daemon.
//!
//! SIGTERM and SIGINT ask the node for an application reset followed by
//! exit; SIGHUP asks for a communication reset. The handlers only store into
//! static atomics; the foreground loop moves them into [`SignalState`] with
//! [`SignalHandler::poll`] once per step.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

static SHUTDOWN_RAISED: AtomicBool = AtomicBool::new(false);
static RESET_RAISED: AtomicBool = AtomicBool::new(false);
static LAST_RAISED: AtomicI32 = AtomicI32::new(0);

/// Signals the daemon reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// SIGTERM, shut down.
    Terminate,
    /// SIGINT, shut down.
    Interrupt,
    /// SIGHUP, reinitialize communication.
    Hangup,
}

impl SignalKind {
    fn from_raw(signo: i32) -> Option<Self> {
        match signo {
            libc::SIGTERM => Some(Self::Terminate),
            libc::SIGINT => Some(Self::Interrupt),
            libc::SIGHUP => Some(Self::Hangup),
            _ => None,
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Terminate => write!(f, "SIGTERM"),
            SignalKind::Interrupt => write!(f, "SIGINT"),
            SignalKind::Hangup => write!(f, "SIGHUP"),
        }
    }
}

/// Requests collected from signals, or made by hand.
#[derive(Debug, Default)]
pub struct SignalState {
    shutdown_requested: AtomicBool,
    reset_requested: AtomicBool,
    signal_count: AtomicU32,
}

impl SignalState {
    /// Create an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether shutdown has been requested.
    #[inline]
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Relaxed)
    }

    /// Whether a communication reset was requested; clears the request.
    #[inline]
    pub fn take_reset_request(&self) -> bool {
        self.reset_requested.swap(false, Ordering::Relaxed)
    }

    /// Request shutdown.
    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::Relaxed);
    }

    /// Request a communication reset.
    pub fn request_reset(&self) {
        self.reset_requested.store(true, Ordering::Relaxed);
    }

    /// Signals received so far.
    pub fn signal_count(&self) -> u32 {
        self.signal_count.load(Ordering::Relaxed)
    }

    fn record_signal(&self) {
        self.signal_count.fetch_add(1, Ordering::Relaxed);
    }
}

extern "C" fn on_signal(signo: libc::c_int) {
    match signo {
        libc::SIGHUP => RESET_RAISED.store(true, Ordering::Relaxed),
        _ => SHUTDOWN_RAISED.store(true, Ordering::Relaxed),
    }
    LAST_RAISED.store(signo, Ordering::Relaxed);
}

/// Installs the process signal handlers and exposes their requests.
#[derive(Debug, Clone)]
pub struct SignalHandler {
    state: Arc<SignalState>,
}

impl SignalHandler {
    /// Register handlers for SIGTERM, SIGINT and SIGHUP.
    ///
    /// # Errors
    ///
    /// Fails if a handler cannot be installed.
    pub fn new() -> nix::Result<Self> {
        Self::install()?;
        debug!("Signal handlers registered");
        Ok(Self::detached())
    }

    /// Handler that only sees manual requests.
    #[must_use]
    pub fn detached() -> Self {
        Self {
            state: Arc::new(SignalState::new()),
        }
    }

    #[allow(unsafe_code)]
    fn install() -> nix::Result<()> {
        use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

        let action = SigAction::new(
            SigHandler::Handler(on_signal),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );
        for signal in [Signal::SIGTERM, Signal::SIGINT, Signal::SIGHUP] {
            // SAFETY: the handler only stores to static atomics.
            unsafe { sigaction(signal, &action) }?;
        }
        Ok(())
    }

    /// Move signals raised since the last poll into the shared state.
    pub fn poll(&self) {
        let shutdown = SHUTDOWN_RAISED.swap(false, Ordering::Relaxed);
        let reset = RESET_RAISED.swap(false, Ordering::Relaxed);
        if !shutdown && !reset {
            return;
        }

        let kind = SignalKind::from_raw(LAST_RAISED.load(Ordering::Relaxed));
        if shutdown {
            info!(signal = ?kind, "Shutdown signal received");
            self.state.request_shutdown();
            self.state.record_signal();
        }
        if reset {
            info!("Communication reset signal received");
            self.state.request_reset();
            self.state.record_signal();
        }
    }

    /// Whether shutdown has been requested.
    #[inline]
    pub fn shutdown_requested(&self) -> bool {
        self.state.shutdown_requested()
    }

    /// Whether a communication reset was requested; clears the request.
    #[inline]
    pub fn take_reset_request(&self) -> bool {
        self.state.take_reset_request()
    }

    /// Request shutdown by hand.
    pub fn request_shutdown(&self) {
        if !self.state.shutdown_requested() {
            info!("Shutdown requested");
        }
        self.state.request_shutdown();
    }

    /// Signal state for inspection.
    pub fn state(&self) -> &SignalState {
        &self.state
    }
}
