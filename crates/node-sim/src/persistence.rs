//! File-backed persistence.
//!
//! Stores the persistent part of the object dictionary as a small JSON image.
//! Phase one runs before the stack exists and only restores values; any
//! failure is reported through the stack in phase two, once there is an
//! error sink to report to.

use node_common::error::PersistenceError;
use node_common::metrics::DiagnosticCounters;
use node_common::node::{EmergencyCode, ErrorClass};
use node_runtime::collaborators::{Persistence, ProtocolStack};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use tracing::{debug, error, info};

/// Persistent dictionary entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistentImage {
    /// Boots since the store was created.
    pub power_on_count: u32,
}

/// Persistence backed by a JSON file.
#[derive(Debug)]
pub struct FilePersistence {
    path: PathBuf,
    last_written: AtomicU32,
    writes: AtomicU64,
    write_failed: AtomicBool,
}

impl FilePersistence {
    /// Use the image at `path`. Nothing is read until phase one.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_written: AtomicU32::new(0),
            writes: AtomicU64::new(0),
            write_failed: AtomicBool::new(false),
        }
    }

    /// Backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Images written so far.
    #[must_use]
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Read the stored image. A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Io`] if the file cannot be read and
    /// [`PersistenceError::Corrupt`] if it does not parse.
    pub fn load(&self) -> Result<PersistentImage, PersistenceError> {
        match fs::read_to_string(&self.path) {
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| PersistenceError::Corrupt(e.to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(PersistentImage::default()),
            Err(e) => Err(PersistenceError::Io(format!(
                "{}: {e}",
                self.path.display()
            ))),
        }
    }

    /// Write `image` atomically through a temporary file.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Io`] on any file system failure.
    pub fn store(&self, image: &PersistentImage) -> Result<(), PersistenceError> {
        let io = |e: std::io::Error| PersistenceError::Io(format!("{}: {e}", self.path.display()));
        let text = serde_json::to_string_pretty(image)
            .map_err(|e| PersistenceError::Io(e.to_string()))?;

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(io)?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, text).map_err(io)?;
        fs::rename(&tmp, &self.path).map_err(io)?;

        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

fn info_code(err: &PersistenceError) -> u32 {
    match err {
        PersistenceError::Io(_) => 1,
        PersistenceError::Corrupt(_) => 2,
    }
}

impl Persistence for FilePersistence {
    fn init_pre(&self, counters: &DiagnosticCounters) -> Result<(), PersistenceError> {
        let image = self.load()?;
        counters.restore_power_on_count(image.power_on_count);
        self.last_written.store(image.power_on_count, Ordering::Relaxed);
        info!(
            path = %self.path.display(),
            power_on_count = image.power_on_count,
            "Persistent image loaded"
        );
        Ok(())
    }

    fn init_post(&self, pre_status: &Result<(), PersistenceError>, stack: &dyn ProtocolStack) {
        if let Err(e) = pre_status {
            stack.report_error(EmergencyCode::NonVolatileMemory, ErrorClass::Hardware, info_code(e));
        }
    }

    fn process(&self, counters: &DiagnosticCounters) {
        let count = counters.power_on_count();
        if count == self.last_written.load(Ordering::Relaxed) {
            return;
        }

        let image = PersistentImage {
            power_on_count: count,
        };
        match self.store(&image) {
            Ok(()) => {
                self.last_written.store(count, Ordering::Relaxed);
                self.write_failed.store(false, Ordering::Relaxed);
                debug!(power_on_count = count, "Persistent image written");
            }
            Err(e) => {
                // Log the first failure of a run, retry silently
                if !self.write_failed.swap(true, Ordering::Relaxed) {
                    error!(error = %e, "Persistent image write failed");
                }
            }
        }
    }
}
