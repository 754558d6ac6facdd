//! Bus-level identifiers and control values exchanged with the protocol stack.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Node identity substituted when the stored value is outside `1..=127`.
pub const FALLBACK_NODE_ID: NodeId = NodeId(0x10);

/// Address of this device on the shared bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct NodeId(u8);

impl NodeId {
    /// Lowest addressable node identity.
    pub const MIN: u8 = 1;
    /// Highest addressable node identity.
    pub const MAX: u8 = 127;

    /// Create a node identity, returning `None` outside the addressable range.
    #[must_use]
    pub const fn new(raw: u8) -> Option<Self> {
        if raw >= Self::MIN && raw <= Self::MAX {
            Some(Self(raw))
        } else {
            None
        }
    }

    /// Validate a stored value, substituting [`FALLBACK_NODE_ID`] when invalid.
    #[must_use]
    pub const fn from_stored(raw: u8) -> Self {
        match Self::new(raw) {
            Some(id) => id,
            None => FALLBACK_NODE_ID,
        }
    }

    /// Raw node identity.
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for NodeId {
    type Error = String;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        Self::new(raw).ok_or_else(|| format!("node id {raw} outside 1..=127"))
    }
}

impl From<NodeId> for u8 {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

/// Bus bit-rate in kbit/s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BitRate(pub u16);

impl BitRate {
    /// Bit-rates every controller timing table provides.
    pub const STANDARD: [u16; 8] = [10, 20, 50, 125, 250, 500, 800, 1000];

    /// Bit-rate in kbit/s.
    #[must_use]
    pub const fn kbps(self) -> u16 {
        self.0
    }

    /// Whether this rate appears in the standard timing table.
    #[must_use]
    pub fn is_standard(self) -> bool {
        Self::STANDARD.contains(&self.0)
    }
}

impl Default for BitRate {
    fn default() -> Self {
        Self(125)
    }
}

impl fmt::Display for BitRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} kbit/s", self.0)
    }
}

/// One of the node's bus controllers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BusController {
    /// First controller; the stack is always initialized on this one.
    Can1,
    /// Optional second controller.
    Can2,
}

impl BusController {
    /// All controllers in index order.
    pub const ALL: [BusController; 2] = [BusController::Can1, BusController::Can2];

    /// Zero-based controller index.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Can1 => 0,
            Self::Can2 => 1,
        }
    }

    /// The first `count` controllers (clamped to the number that exist).
    #[must_use]
    pub fn first(count: u8) -> &'static [BusController] {
        let n = usize::from(count).min(Self::ALL.len());
        &Self::ALL[..n]
    }
}

impl fmt::Display for BusController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Can1 => write!(f, "CAN1"),
            Self::Can2 => write!(f, "CAN2"),
        }
    }
}

/// Outcome of one stack processing step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResetRequest {
    /// Keep running normal operation.
    #[default]
    NotRequested,
    /// Re-initialize the communication stack.
    Communication,
    /// Tear down the application and restart the node.
    Application,
}

impl fmt::Display for ResetRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotRequested => write!(f, "none"),
            Self::Communication => write!(f, "communication"),
            Self::Application => write!(f, "application"),
        }
    }
}

/// Error kinds the executive reports through the stack's error sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EmergencyCode {
    /// Non-volatile storage could not be read or written.
    NonVolatileMemory = 0x27,
    /// Timer interrupt was re-triggered before its handler finished.
    IsrTimerOverflow = 0x29,
}

/// Error class attached to an emergency report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum ErrorClass {
    /// Hardware fault.
    Hardware = 0x5000,
    /// Internal software error.
    SoftwareInternal = 0x6100,
}
