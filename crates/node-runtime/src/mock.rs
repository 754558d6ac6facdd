//! Recording collaborators for unit tests.

use crate::collaborators::{Application, Persistence, ProtocolStack};
use crate::hal::{Board, CycleTimer, InterruptController, InterruptSource, WatchdogService};
use node_common::error::{PersistenceError, StackError};
use node_common::metrics::DiagnosticCounters;
use node_common::node::{BitRate, BusController, EmergencyCode, ErrorClass, NodeId, ResetRequest};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU8, Ordering};
use std::sync::Mutex;

/// One observed collaborator call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    ProgramStart,
    CommunicationReset,
    Program1ms,
    ProgramAsync(u16),
    ProgramEnd,
    Init(NodeId, BitRate, BusController),
    SyncRpdo(u32),
    Tpdo(bool, u32),
    Process(u16),
    CanInterrupt(BusController),
    SetNormalMode(BusController),
    Teardown,
    PersistPre,
    PersistPost(bool),
    PersistProcess,
    Enable(InterruptSource),
    Disable(InterruptSource),
    ClearPending(InterruptSource),
    SetPriority(InterruptSource, u8),
    Configure(u16),
    ServiceWatchdog,
    SoftwareReset,
}

/// Shared call log; doubles as the application.
#[derive(Debug, Default)]
pub struct Recorder {
    calls: Mutex<Vec<Call>>,
}

impl Recorder {
    pub fn push(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn matching(&self, pred: impl Fn(&Call) -> bool) -> Vec<Call> {
        self.calls().into_iter().filter(|c| pred(c)).collect()
    }

    pub fn count(&self, call: Call) -> usize {
        self.calls().iter().filter(|c| **c == call).count()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }
}

impl Application for Recorder {
    fn program_start(&self) {
        self.push(Call::ProgramStart);
    }

    fn communication_reset(&self) {
        self.push(Call::CommunicationReset);
    }

    fn program_1ms(&self) {
        self.push(Call::Program1ms);
    }

    fn program_async(&self, elapsed_ms: u16) {
        self.push(Call::ProgramAsync(elapsed_ms));
    }

    fn program_end(&self) {
        self.push(Call::ProgramEnd);
    }
}

type Hook<'a> = Box<dyn Fn() + Send + 'a>;

/// Scripted protocol stack.
pub struct MockStack<'a> {
    recorder: &'a Recorder,
    node_id: AtomicU8,
    bit_rate: AtomicU16,
    consistent: AtomicBool,
    sync: AtomicBool,
    init_result: Mutex<Result<(), StackError>>,
    script: Mutex<VecDeque<ResetRequest>>,
    reported: Mutex<Vec<(EmergencyCode, ErrorClass, u32)>>,
    tpdo_hook: Mutex<Option<Hook<'a>>>,
}

impl<'a> MockStack<'a> {
    pub fn new(recorder: &'a Recorder) -> Self {
        Self {
            recorder,
            node_id: AtomicU8::new(0x22),
            bit_rate: AtomicU16::new(125),
            consistent: AtomicBool::new(true),
            sync: AtomicBool::new(false),
            init_result: Mutex::new(Ok(())),
            script: Mutex::new(VecDeque::new()),
            reported: Mutex::new(Vec::new()),
            tpdo_hook: Mutex::new(None),
        }
    }

    pub fn set_node_id(&self, raw: u8) {
        self.node_id.store(raw, Ordering::Relaxed);
    }

    pub fn set_consistent(&self, consistent: bool) {
        self.consistent.store(consistent, Ordering::Relaxed);
    }

    pub fn set_sync(&self, sync: bool) {
        self.sync.store(sync, Ordering::Relaxed);
    }

    pub fn fail_init(&self, err: StackError) {
        *self.init_result.lock().unwrap() = Err(err);
    }

    /// Queue responses for `process`; an empty script answers `NotRequested`.
    pub fn script(&self, responses: &[ResetRequest]) {
        self.script.lock().unwrap().extend(responses.iter().copied());
    }

    pub fn on_tpdo(&self, hook: impl Fn() + Send + 'a) {
        *self.tpdo_hook.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn reported(&self) -> Vec<(EmergencyCode, ErrorClass, u32)> {
        self.reported.lock().unwrap().clone()
    }
}

impl ProtocolStack for MockStack<'_> {
    fn dictionary_consistent(&self) -> bool {
        self.consistent.load(Ordering::Relaxed)
    }

    fn stored_node_id(&self) -> u8 {
        self.node_id.load(Ordering::Relaxed)
    }

    fn stored_bit_rate(&self) -> BitRate {
        BitRate(self.bit_rate.load(Ordering::Relaxed))
    }

    fn init(
        &self,
        node_id: NodeId,
        bit_rate: BitRate,
        controller: BusController,
    ) -> Result<(), StackError> {
        self.recorder.push(Call::Init(node_id, bit_rate, controller));
        *self.init_result.lock().unwrap()
    }

    fn process_sync_rpdo(&self, period_us: u32) -> bool {
        self.recorder.push(Call::SyncRpdo(period_us));
        self.sync.load(Ordering::Relaxed)
    }

    fn process_tpdo(&self, sync_was: bool, period_us: u32) {
        self.recorder.push(Call::Tpdo(sync_was, period_us));
        if let Some(hook) = self.tpdo_hook.lock().unwrap().as_ref() {
            hook();
        }
    }

    fn process(&self, elapsed_ms: u16) -> ResetRequest {
        self.recorder.push(Call::Process(elapsed_ms));
        self.script.lock().unwrap().pop_front().unwrap_or_default()
    }

    fn report_error(&self, code: EmergencyCode, class: ErrorClass, info: u32) {
        self.reported.lock().unwrap().push((code, class, info));
    }

    fn can_interrupt(&self, controller: BusController) {
        self.recorder.push(Call::CanInterrupt(controller));
    }

    fn set_normal_mode(&self, controller: BusController) {
        self.recorder.push(Call::SetNormalMode(controller));
    }

    fn teardown(&self) {
        self.recorder.push(Call::Teardown);
    }
}

/// Register-level board model.
pub struct MockBoard<'a> {
    recorder: &'a Recorder,
    counter: AtomicU16,
    pending: [AtomicBool; 3],
    enabled: [AtomicBool; 3],
    priority: [AtomicU8; 3],
}

impl<'a> MockBoard<'a> {
    pub fn new(recorder: &'a Recorder) -> Self {
        Self {
            recorder,
            counter: AtomicU16::new(0),
            pending: Default::default(),
            enabled: Default::default(),
            priority: Default::default(),
        }
    }

    pub fn raise(&self, source: InterruptSource) {
        self.pending[source.index()].store(true, Ordering::Relaxed);
    }

    pub fn pending(&self, source: InterruptSource) -> bool {
        self.pending[source.index()].load(Ordering::Relaxed)
    }

    pub fn enabled(&self, source: InterruptSource) -> bool {
        self.enabled[source.index()].load(Ordering::Relaxed)
    }

    pub fn set_counter(&self, raw: u16) {
        self.counter.store(raw, Ordering::Relaxed);
    }
}

impl CycleTimer for MockBoard<'_> {
    fn configure(&self, period: u16) {
        self.recorder.push(Call::Configure(period));
        self.counter.store(0, Ordering::Relaxed);
    }

    fn counter(&self) -> u16 {
        self.counter.load(Ordering::Relaxed)
    }
}

impl InterruptController for MockBoard<'_> {
    fn enable(&self, source: InterruptSource) {
        self.recorder.push(Call::Enable(source));
        self.enabled[source.index()].store(true, Ordering::Relaxed);
    }

    fn disable(&self, source: InterruptSource) {
        self.recorder.push(Call::Disable(source));
        self.enabled[source.index()].store(false, Ordering::Relaxed);
    }

    fn is_pending(&self, source: InterruptSource) -> bool {
        self.pending(source)
    }

    fn clear_pending(&self, source: InterruptSource) {
        self.recorder.push(Call::ClearPending(source));
        self.pending[source.index()].store(false, Ordering::Relaxed);
    }

    fn set_priority(&self, source: InterruptSource, level: u8) {
        self.recorder.push(Call::SetPriority(source, level));
        self.priority[source.index()].store(level, Ordering::Relaxed);
    }

    fn priority(&self, source: InterruptSource) -> u8 {
        self.priority[source.index()].load(Ordering::Relaxed)
    }
}

impl WatchdogService for MockBoard<'_> {
    fn service(&self) {
        self.recorder.push(Call::ServiceWatchdog);
    }
}

impl Board for MockBoard<'_> {
    fn software_reset(&self) {
        self.recorder.push(Call::SoftwareReset);
    }
}

/// Persistence that only records its calls.
pub struct MockPersistence<'a> {
    recorder: &'a Recorder,
    pre_result: Result<(), PersistenceError>,
}

impl<'a> MockPersistence<'a> {
    pub fn new(recorder: &'a Recorder) -> Self {
        Self {
            recorder,
            pre_result: Ok(()),
        }
    }

    pub fn failing(recorder: &'a Recorder, err: PersistenceError) -> Self {
        Self {
            recorder,
            pre_result: Err(err),
        }
    }
}

impl Persistence for MockPersistence<'_> {
    fn init_pre(&self, _counters: &DiagnosticCounters) -> Result<(), PersistenceError> {
        self.recorder.push(Call::PersistPre);
        self.pre_result.clone()
    }

    fn init_post(&self, pre_status: &Result<(), PersistenceError>, _stack: &dyn ProtocolStack) {
        self.recorder.push(Call::PersistPost(pre_status.is_ok()));
    }

    fn process(&self, _counters: &DiagnosticCounters) {
        self.recorder.push(Call::PersistProcess);
    }
}
