//! Configuration structures for the node executive.
//!
//! Supports TOML deserialization with defaults matching a 1 ms tick on a
//! 32 MHz peripheral clock with a single bus controller.

use crate::node::BitRate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Highest interrupt priority level the interrupt controller accepts.
pub const MAX_PRIORITY: u8 = 7;

/// Top-level node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Nominal tick period of the cycle timer.
    #[serde(with = "humantime_serde")]
    pub tick_period: Duration,

    /// Cycle timer configuration.
    pub timer: TimerConfig,

    /// Bus controller configuration.
    pub bus: BusConfig,

    /// Watchdog configuration.
    pub watchdog: WatchdogConfig,

    /// Persistence configuration.
    pub persistence: PersistenceConfig,

    /// Diagnostics reporting configuration.
    pub diagnostics: DiagnosticsConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            tick_period: Duration::from_millis(1),
            timer: TimerConfig::default(),
            bus: BusConfig::default(),
            watchdog: WatchdogConfig::default(),
            persistence: PersistenceConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
        }
    }
}

/// Periodic timer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    /// Hardware counts per tick (peripheral clock in kHz for a 1 ms tick).
    pub counts_per_tick: u16,

    /// Interrupt priority, must stay below the bus priority.
    pub priority: u8,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            counts_per_tick: 32_000,
            priority: 3,
        }
    }
}

/// Bus controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Number of bus controllers in use (1 or 2).
    pub controllers: u8,

    /// Receive interrupt priority, must stay above the timer priority.
    pub priority: u8,

    /// Worst-case execution budget of one receive interrupt.
    #[serde(with = "humantime_serde")]
    pub rx_budget: Duration,

    /// Node identity stored in the simulated object dictionary.
    ///
    /// Kept as a raw value: out-of-range identities are legal here and are
    /// replaced by the fallback identity at initialization.
    pub node_id: u8,

    /// Bit-rate stored in the simulated object dictionary.
    pub bit_rate: BitRate,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            controllers: 1,
            priority: 5,
            rx_budget: Duration::from_micros(200),
            node_id: 0x10,
            bit_rate: BitRate::default(),
        }
    }
}

/// Watchdog configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Enable the supervising watchdog.
    pub enabled: bool,

    /// Time allowed between two services.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: Duration::from_millis(1024),
        }
    }
}

/// Persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PersistenceConfig {
    /// File backing the persistent image. `None` disables persistence.
    pub path: Option<PathBuf>,
}

/// Diagnostics reporting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Interval between periodic status log lines.
    #[serde(with = "humantime_serde")]
    pub status_interval: Duration,

    /// Render Prometheus text on shutdown.
    pub prometheus: bool,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            status_interval: Duration::from_secs(10),
            prometheus: false,
        }
    }
}

impl NodeConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Check the invariants the executive relies on.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=2).contains(&self.bus.controllers) {
            return Err(ConfigError::Invalid(format!(
                "bus.controllers must be 1 or 2, got {}",
                self.bus.controllers
            )));
        }
        if self.timer.priority == 0 || self.bus.priority > MAX_PRIORITY {
            return Err(ConfigError::Invalid(format!(
                "interrupt priorities must lie in 1..={MAX_PRIORITY}"
            )));
        }
        if self.bus.priority <= self.timer.priority {
            return Err(ConfigError::Invalid(format!(
                "bus.priority ({}) must be above timer.priority ({})",
                self.bus.priority, self.timer.priority
            )));
        }
        if self.timer.counts_per_tick < 100 || self.timer.counts_per_tick % 100 != 0 {
            return Err(ConfigError::Invalid(format!(
                "timer.counts_per_tick must be a non-zero multiple of 100, got {}",
                self.timer.counts_per_tick
            )));
        }
        if self.tick_period.is_zero() {
            return Err(ConfigError::Invalid("tick_period must be non-zero".into()));
        }
        Ok(())
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Semantically invalid configuration.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
