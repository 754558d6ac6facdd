use thiserror::Error;

/// Node executive errors covering configuration, sequencing and collaborator failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum NodeError {
    /// Configuration or initialization error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Protocol stack initialization failed; the node must fail-stop.
    #[error("stack initialization failed: {0}")]
    StackInit(#[from] StackError),

    /// Object dictionary failed its boot-time integrity check.
    #[error("object dictionary is inconsistent")]
    DictionaryInconsistent,

    /// Interrupt priorities do not preserve the required ordering.
    #[error("interrupt priority ordering violated: bus {bus} must be above timer {timer}")]
    PriorityOrder {
        /// Configured bus receive priority.
        bus: u8,
        /// Configured cycle timer priority.
        timer: u8,
    },

    /// Invalid state transition attempted.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Source state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

/// Error codes returned by the protocol stack's initialization entry point.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StackError {
    /// The stack could not allocate its objects.
    #[error("out of memory")]
    OutOfMemory,

    /// The requested bit-rate is not supported by the controller.
    #[error("unsupported bit-rate {0} kbit/s")]
    IllegalBitRate(u16),
}

/// Errors raised by the persistence collaborator.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PersistenceError {
    /// Backing store could not be read or written.
    #[error("storage I/O error: {0}")]
    Io(String),

    /// Stored image failed validation and defaults were used.
    #[error("stored image is corrupt: {0}")]
    Corrupt(String),
}

/// Convenience type alias for node executive operations.
pub type NodeResult<T> = Result<T, NodeError>;
