//! Protocol stack, persistence and application seams.
//!
//! All methods take `&self`: during normal operation the same collaborator is
//! reached from the foreground loop, the timer interrupt and the bus receive
//! interrupts at once. Each context touches a disjoint part of the
//! collaborator, and implementations are responsible for keeping it that way.
//!
//! | method                                   | called from              |
//! |------------------------------------------|--------------------------|
//! | `process_sync_rpdo`, `process_tpdo`      | cycle timer interrupt    |
//! | `can_interrupt`                          | bus receive interrupt    |
//! | `process`, `report_error` (persistence)  | foreground               |
//! | `init`, `set_normal_mode`, `teardown`    | sequencer, irqs disabled |

use node_common::error::{PersistenceError, StackError};
use node_common::metrics::DiagnosticCounters;
use node_common::node::{BitRate, BusController, EmergencyCode, ErrorClass, NodeId, ResetRequest};

/// The protocol engine driven by the executive.
pub trait ProtocolStack: Sync {
    /// Boot-time integrity check of the object dictionary.
    fn dictionary_consistent(&self) -> bool {
        true
    }

    /// Node identity as stored in the object dictionary, unvalidated.
    fn stored_node_id(&self) -> u8;

    /// Bit-rate as stored in the object dictionary.
    fn stored_bit_rate(&self) -> BitRate;

    /// (Re)initialize the stack on `controller`.
    ///
    /// # Errors
    ///
    /// Any error is fatal for the node.
    fn init(
        &self,
        node_id: NodeId,
        bit_rate: BitRate,
        controller: BusController,
    ) -> Result<(), StackError>;

    /// Process SYNC and receive PDOs; returns whether a SYNC was seen.
    fn process_sync_rpdo(&self, period_us: u32) -> bool;

    /// Process transmit PDOs.
    fn process_tpdo(&self, sync_was: bool, period_us: u32);

    /// One general processing step; yields the next reset request.
    fn process(&self, elapsed_ms: u16) -> ResetRequest;

    /// Error-management sink.
    fn report_error(&self, code: EmergencyCode, class: ErrorClass, info: u32);

    /// Low-level receive interrupt routine of `controller`.
    fn can_interrupt(&self, controller: BusController);

    /// Leave configuration mode and join bus traffic.
    fn set_normal_mode(&self, controller: BusController);

    /// Release all stack resources.
    fn teardown(&self);
}

/// Non-volatile storage of selected dictionary entries.
pub trait Persistence: Sync {
    /// Phase one, before the stack exists. Restores persisted counters.
    ///
    /// # Errors
    ///
    /// The error is not fatal; it is handed to [`Persistence::init_post`].
    fn init_pre(&self, counters: &DiagnosticCounters) -> Result<(), PersistenceError>;

    /// Phase two, after stack initialization, with the phase one outcome.
    fn init_post(&self, pre_status: &Result<(), PersistenceError>, stack: &dyn ProtocolStack);

    /// Periodic maintenance from the foreground loop.
    fn process(&self, counters: &DiagnosticCounters);
}

/// Stand-in for nodes without non-volatile storage.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPersistence;

impl Persistence for NoPersistence {
    fn init_pre(&self, _counters: &DiagnosticCounters) -> Result<(), PersistenceError> {
        Ok(())
    }

    fn init_post(&self, _pre_status: &Result<(), PersistenceError>, _stack: &dyn ProtocolStack) {}

    fn process(&self, _counters: &DiagnosticCounters) {}
}

/// User application hooks.
pub trait Application: Sync {
    /// Once per boot, before the first communication reset.
    fn program_start(&self) {}

    /// Once per communication reset, before the controllers go on-bus.
    fn communication_reset(&self) {}

    /// Fast synchronous hook, from the timer interrupt between SYNC/RPDO
    /// and TPDO processing.
    fn program_1ms(&self) {}

    /// Asynchronous hook, from every foreground iteration.
    fn program_async(&self, _elapsed_ms: u16) {}

    /// Once, before the application reset.
    fn program_end(&self) {}
}

/// Application without any hooks.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoApplication;

impl Application for NoApplication {}
