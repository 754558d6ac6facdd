//! Communication (re)initialization state machine.
//!
//! State transitions follow the node's reset lifecycle:
//! STARTUP → APPLY_CONFIG → STACK_INIT → ARM_TIMERS → NORMAL_OPERATION
//!
//! A communication reset loops back to APPLY_CONFIG, an application
//! reset ends in TEARDOWN. Fatal initialization errors end in HALTED.

use crate::error::{NodeError, NodeResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sequencer states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SequencerState {
    /// Power-on; boot-only initialization.
    #[default]
    Startup,
    /// Interrupts disabled, node identity and bit-rate being read.
    ApplyConfig,
    /// Protocol stack and persistence being initialized.
    StackInit,
    /// Timer and bus interrupts being reprogrammed and re-armed.
    ArmTimers,
    /// Foreground cycle running.
    NormalOperation,
    /// Application resources released, restart issued.
    Teardown,
    /// Fail-stop after a fatal initialization error.
    Halted,
}

impl fmt::Display for SequencerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Startup => write!(f, "STARTUP"),
            Self::ApplyConfig => write!(f, "APPLY_CONFIG"),
            Self::StackInit => write!(f, "STACK_INIT"),
            Self::ArmTimers => write!(f, "ARM_TIMERS"),
            Self::NormalOperation => write!(f, "NORMAL_OPERATION"),
            Self::Teardown => write!(f, "TEARDOWN"),
            Self::Halted => write!(f, "HALTED"),
        }
    }
}

impl SequencerState {
    /// Check if a transition to `target` is valid from the current state.
    #[must_use]
    pub fn can_transition_to(&self, target: SequencerState) -> bool {
        use SequencerState::{
            ApplyConfig, ArmTimers, Halted, NormalOperation, StackInit, Startup, Teardown,
        };

        matches!(
            (self, target),
            (Startup, ApplyConfig)
                | (ApplyConfig, StackInit)
                | (StackInit, ArmTimers)
                | (ArmTimers, NormalOperation)
                // Communication reset
                | (NormalOperation, ApplyConfig)
                // Application reset
                | (NormalOperation, Teardown)
                // Dictionary check at boot, stack init failure
                | (Startup, Halted)
                | (StackInit, Halted)
                | (ArmTimers, Halted)
        )
    }

    /// Returns true once the sequencer can make no further progress.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Teardown | Self::Halted)
    }
}

/// State machine wrapper with transition history tracking.
#[derive(Debug, Clone)]
pub struct StateMachine {
    current: SequencerState,
    previous: Option<SequencerState>,
    transition_count: u64,
    reset_cycles: u64,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// Create a new state machine starting in STARTUP.
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: SequencerState::Startup,
            previous: None,
            transition_count: 0,
            reset_cycles: 0,
        }
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> SequencerState {
        self.current
    }

    /// Get the previous state (if any transition occurred).
    #[must_use]
    pub fn previous_state(&self) -> Option<SequencerState> {
        self.previous
    }

    /// Get total number of transitions.
    #[must_use]
    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Number of times APPLY_CONFIG has been entered (boot plus communication resets).
    #[must_use]
    pub fn reset_cycles(&self) -> u64 {
        self.reset_cycles
    }

    /// Attempt a state transition.
    pub fn transition(&mut self, target: SequencerState) -> NodeResult<()> {
        if self.current.can_transition_to(target) {
            self.previous = Some(self.current);
            self.current = target;
            self.transition_count += 1;
            if target == SequencerState::ApplyConfig {
                self.reset_cycles += 1;
            }
            Ok(())
        } else {
            Err(NodeError::InvalidStateTransition {
                from: self.current.to_string(),
                to: target.to_string(),
            })
        }
    }

    /// Force the fail-stop state (no-op once terminal or during normal operation).
    pub fn halt(&mut self) {
        if self.current.can_transition_to(SequencerState::Halted) {
            self.previous = Some(self.current);
            self.current = SequencerState::Halted;
            self.transition_count += 1;
        }
    }
}
