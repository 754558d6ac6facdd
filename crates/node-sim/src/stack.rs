//! Simulated protocol stack.
//!
//! Models just enough of a CANopen-style stack to exercise the executive:
//! an object dictionary holding node id and bit-rate, per-controller receive
//! queues drained by the bus interrupt, a SYNC producer with a fixed period,
//! an error-report log and an externally settable reset request.

use node_common::config::BusConfig;
use node_common::error::StackError;
use node_common::node::{BitRate, BusController, EmergencyCode, ErrorClass, NodeId, ResetRequest};
use node_runtime::collaborators::ProtocolStack;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;
use tracing::{debug, info, trace, warn};

/// Frames a receive queue holds before dropping new ones.
pub const RX_QUEUE_DEPTH: usize = 64;

/// A classic bus frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CanFrame {
    /// 11-bit identifier.
    pub id: u16,
    /// Data length code.
    pub len: u8,
    /// Payload; bytes past `len` are zero.
    pub data: [u8; 8],
}

impl CanFrame {
    /// Build a frame, truncating `payload` to eight bytes.
    #[must_use]
    pub fn new(id: u16, payload: &[u8]) -> Self {
        let mut data = [0u8; 8];
        let len = payload.len().min(8);
        data[..len].copy_from_slice(&payload[..len]);
        Self {
            id: id & 0x7FF,
            len: u8::try_from(len).unwrap_or(8),
            data,
        }
    }
}

/// One entry of the error-report log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    /// Emergency error kind.
    pub code: EmergencyCode,
    /// Error class.
    pub class: ErrorClass,
    /// Additional diagnostic code.
    pub info: u32,
}

/// Counters of the simulated stack.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StackStats {
    /// Successful initializations.
    pub inits: u32,
    /// SYNC objects seen by the timer interrupt.
    pub syncs: u64,
    /// TPDO processing passes.
    pub tpdo_passes: u64,
    /// Frames drained per controller.
    pub frames_received: [u64; 2],
    /// Frames dropped on a full or offline controller.
    pub frames_dropped: u64,
    /// Milliseconds accumulated by `process`.
    pub uptime_ms: u64,
}

/// In-memory protocol stack.
#[derive(Debug)]
pub struct SimStack {
    stored_node_id: AtomicU8,
    stored_bit_rate: AtomicU16,
    consistent: AtomicBool,
    /// Ticks between two SYNC objects; 0 disables SYNC.
    sync_interval: u32,
    ticks_since_sync: AtomicU32,
    initialized: AtomicBool,
    normal: [AtomicBool; 2],
    rx: [Mutex<VecDeque<CanFrame>>; 2],
    reset: AtomicU8,
    inits: AtomicU32,
    syncs: AtomicU64,
    tpdo_passes: AtomicU64,
    frames_received: [AtomicU64; 2],
    frames_dropped: AtomicU64,
    uptime_ms: AtomicU64,
    errors: Mutex<Vec<ErrorReport>>,
}

impl SimStack {
    /// Create a stack whose dictionary holds `node_id` and `bit_rate`.
    ///
    /// `node_id` is stored unvalidated, like a value read from storage.
    #[must_use]
    pub fn new(node_id: u8, bit_rate: BitRate) -> Self {
        Self {
            stored_node_id: AtomicU8::new(node_id),
            stored_bit_rate: AtomicU16::new(bit_rate.kbps()),
            consistent: AtomicBool::new(true),
            sync_interval: 0,
            ticks_since_sync: AtomicU32::new(0),
            initialized: AtomicBool::new(false),
            normal: Default::default(),
            rx: Default::default(),
            reset: AtomicU8::new(encode(ResetRequest::NotRequested)),
            inits: AtomicU32::new(0),
            syncs: AtomicU64::new(0),
            tpdo_passes: AtomicU64::new(0),
            frames_received: Default::default(),
            frames_dropped: AtomicU64::new(0),
            uptime_ms: AtomicU64::new(0),
            errors: Mutex::new(Vec::new()),
        }
    }

    /// Create a stack from the bus section of the node configuration.
    #[must_use]
    pub fn from_config(config: &BusConfig) -> Self {
        Self::new(config.node_id, config.bit_rate)
    }

    /// Produce a SYNC every `ticks` timer ticks.
    #[must_use]
    pub fn with_sync_interval(mut self, ticks: u32) -> Self {
        self.sync_interval = ticks;
        self
    }

    /// Overwrite the stored node id, as an SDO write would.
    pub fn write_node_id(&self, raw: u8) {
        self.stored_node_id.store(raw, Ordering::Relaxed);
    }

    /// Overwrite the stored bit-rate.
    pub fn write_bit_rate(&self, bit_rate: BitRate) {
        self.stored_bit_rate.store(bit_rate.kbps(), Ordering::Relaxed);
    }

    /// Mark the dictionary as corrupt for the next boot check.
    pub fn corrupt_dictionary(&self) {
        self.consistent.store(false, Ordering::Relaxed);
    }

    /// Request a reset, returned by the next `process` call.
    ///
    /// An application reset is never downgraded by a later communication
    /// reset request.
    pub fn request_reset(&self, request: ResetRequest) {
        let new = encode(request);
        let _ = self
            .reset
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |old| {
                (new > old).then_some(new)
            });
    }

    /// Queue a received frame on `controller`.
    ///
    /// Returns false, and counts a drop, when the controller is not in
    /// normal mode or its queue is full.
    pub fn push_frame(&self, controller: BusController, frame: CanFrame) -> bool {
        if !self.is_normal(controller) {
            self.frames_dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        let Ok(mut queue) = self.rx[controller.index()].lock() else {
            return false;
        };
        if queue.len() >= RX_QUEUE_DEPTH {
            self.frames_dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        queue.push_back(frame);
        true
    }

    /// Frames waiting on `controller`.
    #[must_use]
    pub fn pending_frames(&self, controller: BusController) -> usize {
        self.rx[controller.index()].lock().map_or(0, |q| q.len())
    }

    /// Whether `init` has succeeded since the last teardown.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Whether `controller` is in normal mode.
    #[must_use]
    pub fn is_normal(&self, controller: BusController) -> bool {
        self.normal[controller.index()].load(Ordering::Acquire)
    }

    /// Copy of the error-report log.
    #[must_use]
    pub fn errors(&self) -> Vec<ErrorReport> {
        self.errors.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> StackStats {
        StackStats {
            inits: self.inits.load(Ordering::Relaxed),
            syncs: self.syncs.load(Ordering::Relaxed),
            tpdo_passes: self.tpdo_passes.load(Ordering::Relaxed),
            frames_received: [
                self.frames_received[0].load(Ordering::Relaxed),
                self.frames_received[1].load(Ordering::Relaxed),
            ],
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            uptime_ms: self.uptime_ms.load(Ordering::Relaxed),
        }
    }
}

fn encode(request: ResetRequest) -> u8 {
    match request {
        ResetRequest::NotRequested => 0,
        ResetRequest::Communication => 1,
        ResetRequest::Application => 2,
    }
}

fn decode(raw: u8) -> ResetRequest {
    match raw {
        1 => ResetRequest::Communication,
        2 => ResetRequest::Application,
        _ => ResetRequest::NotRequested,
    }
}

impl ProtocolStack for SimStack {
    fn dictionary_consistent(&self) -> bool {
        self.consistent.load(Ordering::Relaxed)
    }

    fn stored_node_id(&self) -> u8 {
        self.stored_node_id.load(Ordering::Relaxed)
    }

    fn stored_bit_rate(&self) -> BitRate {
        BitRate(self.stored_bit_rate.load(Ordering::Relaxed))
    }

    fn init(
        &self,
        node_id: NodeId,
        bit_rate: BitRate,
        controller: BusController,
    ) -> Result<(), StackError> {
        if !bit_rate.is_standard() {
            return Err(StackError::IllegalBitRate(bit_rate.kbps()));
        }

        for ctrl in BusController::ALL {
            self.normal[ctrl.index()].store(false, Ordering::Release);
            if let Ok(mut queue) = self.rx[ctrl.index()].lock() {
                queue.clear();
            }
        }
        self.ticks_since_sync.store(0, Ordering::Relaxed);
        self.initialized.store(true, Ordering::Release);
        self.inits.fetch_add(1, Ordering::Relaxed);

        info!(%node_id, %bit_rate, %controller, "Stack initialized");
        Ok(())
    }

    fn process_sync_rpdo(&self, _period_us: u32) -> bool {
        if self.sync_interval == 0 || !self.is_initialized() {
            return false;
        }
        let ticks = self.ticks_since_sync.load(Ordering::Relaxed) + 1;
        if ticks >= self.sync_interval {
            self.ticks_since_sync.store(0, Ordering::Relaxed);
            self.syncs.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            self.ticks_since_sync.store(ticks, Ordering::Relaxed);
            false
        }
    }

    fn process_tpdo(&self, sync_was: bool, _period_us: u32) {
        if self.is_initialized() {
            self.tpdo_passes.fetch_add(1, Ordering::Relaxed);
            if sync_was {
                trace!("Synchronous TPDOs sent");
            }
        }
    }

    fn process(&self, elapsed_ms: u16) -> ResetRequest {
        self.uptime_ms
            .fetch_add(u64::from(elapsed_ms), Ordering::Relaxed);
        decode(self.reset.swap(encode(ResetRequest::NotRequested), Ordering::AcqRel))
    }

    fn report_error(&self, code: EmergencyCode, class: ErrorClass, info: u32) {
        warn!(code = ?code, class = ?class, info, "Emergency reported");
        if let Ok(mut errors) = self.errors.lock() {
            errors.push(ErrorReport { code, class, info });
        }
    }

    fn can_interrupt(&self, controller: BusController) {
        let Ok(mut queue) = self.rx[controller.index()].lock() else {
            return;
        };
        let drained = u64::try_from(queue.len()).unwrap_or(u64::MAX);
        for frame in queue.drain(..) {
            trace!(%controller, id = frame.id, len = frame.len, "Frame received");
        }
        self.frames_received[controller.index()].fetch_add(drained, Ordering::Relaxed);
    }

    fn set_normal_mode(&self, controller: BusController) {
        self.normal[controller.index()].store(true, Ordering::Release);
        debug!(%controller, "Controller in normal mode");
    }

    fn teardown(&self) {
        self.initialized.store(false, Ordering::Release);
        for ctrl in BusController::ALL {
            self.normal[ctrl.index()].store(false, Ordering::Release);
        }
        info!("Stack released");
    }
}
