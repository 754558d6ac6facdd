//! Communication (re)initialization sequencer.
//!
//! Owns the foreground context. Each call to [`Sequencer::step`] performs one
//! state's worth of work: a boot action, one initialization phase, or one
//! foreground iteration. The daemon loops over `step` so that shutdown
//! signals and run-time limits are checked between iterations.
//!
//! ```text
//! STARTUP -> APPLY_CONFIG -> STACK_INIT -> ARM_TIMERS -> NORMAL_OPERATION
//!                 ^                                            |
//!                 +------------ communication reset -----------+
//!                                                              |
//!                                   application reset -> TEARDOWN
//! ```
//!
//! A stack initialization failure ends in HALTED: the sequencer keeps
//! servicing the watchdog and never re-enables an interrupt, so an external
//! supervisor still sees a live but stopped node.

use crate::context::NodeContext;
use crate::foreground::ForegroundCycle;
use crate::hal::InterruptSource;
use crate::tasks::{ExecutionContext, TaskTable};
use node_common::config::NodeConfig;
use node_common::error::{NodeError, NodeResult, PersistenceError};
use node_common::node::{BitRate, BusController, NodeId, ResetRequest, FALLBACK_NODE_ID};
use node_common::state::{SequencerState, StateMachine};
use tracing::{debug, error, info, warn};

/// Drives the node through its reset lifecycle.
pub struct Sequencer<'a> {
    ctx: NodeContext<'a>,
    tasks: TaskTable,
    machine: StateMachine,
    node_id: NodeId,
    bit_rate: BitRate,
    persistence_status: Result<(), PersistenceError>,
    foreground: Option<ForegroundCycle>,
    halt_reason: Option<NodeError>,
}

impl<'a> Sequencer<'a> {
    /// Create a sequencer in STARTUP.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured priorities cannot form a valid
    /// task table.
    pub fn new(ctx: NodeContext<'a>, config: &NodeConfig) -> NodeResult<Self> {
        let tasks = TaskTable::from_config(config)?;
        Ok(Self {
            ctx,
            tasks,
            machine: StateMachine::new(),
            node_id: FALLBACK_NODE_ID,
            bit_rate: BitRate::default(),
            persistence_status: Ok(()),
            foreground: None,
            halt_reason: None,
        })
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SequencerState {
        self.machine.state()
    }

    /// Task table in force.
    #[must_use]
    pub fn tasks(&self) -> &TaskTable {
        &self.tasks
    }

    /// Node identity used by the last stack initialization.
    #[must_use]
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Bit-rate used by the last stack initialization.
    #[must_use]
    pub fn bit_rate(&self) -> BitRate {
        self.bit_rate
    }

    /// Times APPLY_CONFIG was entered: the boot plus every communication reset.
    #[must_use]
    pub fn reset_cycles(&self) -> u64 {
        self.machine.reset_cycles()
    }

    /// Foreground iterations since the last communication reset.
    #[must_use]
    pub fn iterations(&self) -> u64 {
        self.foreground.as_ref().map_or(0, ForegroundCycle::iterations)
    }

    /// Why the node halted, once HALTED.
    #[must_use]
    pub fn halt_reason(&self) -> Option<&NodeError> {
        self.halt_reason.as_ref()
    }

    /// Perform the work of the current state and return the new state.
    ///
    /// # Errors
    ///
    /// Only an internal sequencing bug produces an error; fatal node
    /// conditions end in [`SequencerState::Halted`] instead.
    pub fn step(&mut self) -> NodeResult<SequencerState> {
        match self.machine.state() {
            SequencerState::Startup => self.boot()?,
            SequencerState::ApplyConfig => self.apply_config()?,
            SequencerState::StackInit => self.init_stack()?,
            SequencerState::ArmTimers => self.arm_timers()?,
            SequencerState::NormalOperation => self.run_iteration()?,
            SequencerState::Halted => self.ctx.board.service(),
            SequencerState::Teardown => {}
        }
        Ok(self.machine.state())
    }

    /// Step until TEARDOWN or HALTED.
    ///
    /// # Errors
    ///
    /// See [`Sequencer::step`].
    pub fn run(&mut self) -> NodeResult<SequencerState> {
        loop {
            let state = self.step()?;
            if state.is_terminal() {
                return Ok(state);
            }
        }
    }

    fn boot(&mut self) -> NodeResult<()> {
        let ctx = self.ctx;

        if !ctx.stack.dictionary_consistent() {
            self.halt(NodeError::DictionaryInconsistent);
            return Ok(());
        }

        self.persistence_status = ctx.persistence.init_pre(&ctx.shared.counters);
        if let Err(e) = &self.persistence_status {
            warn!(error = %e, "Persistent image unavailable, running with defaults");
        }

        ctx.app.program_start();
        let power_on = ctx.shared.counters.count_power_on();
        info!(power_on_count = power_on, "Node booted");

        self.machine.transition(SequencerState::ApplyConfig)
    }

    fn apply_config(&mut self) -> NodeResult<()> {
        let ctx = self.ctx;

        for source in InterruptSource::ALL {
            ctx.board.disable(source);
        }

        let raw = ctx.stack.stored_node_id();
        self.node_id = NodeId::from_stored(raw);
        if self.node_id.get() != raw {
            debug!(stored = raw, using = %self.node_id, "Stored node id out of range");
        }
        self.bit_rate = ctx.stack.stored_bit_rate();

        info!(
            node_id = %self.node_id,
            bit_rate = %self.bit_rate,
            cycle = self.machine.reset_cycles(),
            "Communication reset"
        );

        self.machine.transition(SequencerState::StackInit)
    }

    fn init_stack(&mut self) -> NodeResult<()> {
        let ctx = self.ctx;

        if let Err(e) = ctx.stack.init(self.node_id, self.bit_rate, BusController::Can1) {
            self.halt(NodeError::StackInit(e));
            return Ok(());
        }

        ctx.persistence.init_post(&self.persistence_status, ctx.stack);
        self.machine.transition(SequencerState::ArmTimers)
    }

    fn arm_timers(&mut self) -> NodeResult<()> {
        let ctx = self.ctx;
        let board = ctx.board;
        let shared = ctx.shared;

        self.foreground = Some(ForegroundCycle::new(shared.ticks.now()));
        shared.counters.reset_maxima();

        board.configure(shared.clock.period_register());
        board.clear_pending(InterruptSource::Timer);
        let timer_priority = self.tasks.level(ExecutionContext::CycleTimer)?;
        board.set_priority(InterruptSource::Timer, timer_priority);

        let controllers: Vec<BusController> = self.tasks.controllers().collect();
        for &ctrl in &controllers {
            let source = InterruptSource::Bus(ctrl);
            board.clear_pending(source);
            let priority = self.tasks.level(ExecutionContext::BusReceive(ctrl))?;
            board.set_priority(source, priority);
        }

        let timer_level = board.priority(InterruptSource::Timer);
        for &ctrl in &controllers {
            let bus_level = board.priority(InterruptSource::Bus(ctrl));
            if bus_level <= timer_level {
                error!(%ctrl, bus_level, timer_level, "Bus interrupt does not preempt the timer");
                self.halt(NodeError::PriorityOrder {
                    bus: bus_level,
                    timer: timer_level,
                });
                return Ok(());
            }
        }

        ctx.app.communication_reset();

        for &ctrl in &controllers {
            ctx.stack.set_normal_mode(ctrl);
        }
        board.enable(InterruptSource::Timer);
        for &ctrl in &controllers {
            board.enable(InterruptSource::Bus(ctrl));
        }

        info!(
            controllers = controllers.len(),
            timer_priority = timer_level,
            "Interrupts armed, entering normal operation"
        );
        self.machine.transition(SequencerState::NormalOperation)
    }

    fn run_iteration(&mut self) -> NodeResult<()> {
        let ctx = self.ctx;
        let Some(foreground) = self.foreground.as_mut() else {
            return Err(NodeError::InvalidStateTransition {
                from: SequencerState::ArmTimers.to_string(),
                to: SequencerState::NormalOperation.to_string(),
            });
        };

        match foreground.iterate(&ctx).reset {
            ResetRequest::NotRequested => Ok(()),
            ResetRequest::Communication => {
                info!(
                    iterations = foreground.iterations(),
                    "Communication reset requested"
                );
                self.machine.transition(SequencerState::ApplyConfig)
            }
            ResetRequest::Application => {
                info!("Application reset requested, tearing down");
                for source in InterruptSource::ALL {
                    ctx.board.disable(source);
                }
                ctx.app.program_end();
                ctx.stack.teardown();
                self.machine.transition(SequencerState::Teardown)?;
                ctx.board.software_reset();
                Ok(())
            }
        }
    }

    fn halt(&mut self, reason: NodeError) {
        error!(error = %reason, state = %self.machine.state(), "Node halted");
        self.machine.halt();
        self.halt_reason = Some(reason);
        self.ctx.board.service();
    }
}

impl std::fmt::Debug for Sequencer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequencer")
            .field("state", &self.machine.state())
            .field("node_id", &self.node_id)
            .field("bit_rate", &self.bit_rate)
            .field("halt_reason", &self.halt_reason)
            .finish_non_exhaustive()
    }
}
