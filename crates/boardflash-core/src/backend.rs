//! Backend capability trait
//!
//! A backend wraps one vendor flashing mechanism: copying the image to a
//! mass-storage volume, or driving a debug-probe tool. The orchestrator only
//! talks to vendor tooling through this trait.
//!
//! ## Implementing a backend
//!
//! ```ignore
//! impl Backend for MyProbe {
//!     fn name(&self) -> &str {
//!         "myprobe"
//!     }
//!
//!     fn supported_platforms(&self) -> &BTreeSet<String> {
//!         &self.platforms
//!     }
//!
//!     fn list_devices(&self) -> Vec<Device> {
//!         // enumerate, bounded by a discovery timeout, empty when the tool is missing
//!     }
//!
//!     fn flash(&self, attempt: &FlashAttempt<'_>, cancel: &CancelToken) -> Result<FlashSignal, BackendError> {
//!         let output = run_tool(&mut cmd, attempt.timeout, cancel)?;
//!         Ok(FlashSignal::ReturnCode(output.code))
//!     }
//! }
//! ```

use crate::cancel::CancelToken;
use crate::device::{Build, Device};
use crate::outcome::InterruptKind;
use std::collections::BTreeSet;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Flashing method requested by the user, e.g. `simple` or `pyocd`
///
/// Method names are compared case-insensitively and stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlashMethod(String);

impl FlashMethod {
    /// Copy the image onto the board's mass-storage volume
    pub const SIMPLE: &'static str = "simple";

    /// Create a method from its name
    pub fn new(name: &str) -> Self {
        Self(name.to_ascii_lowercase())
    }

    /// Method name
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this method has the given name
    pub fn is(&self, name: &str) -> bool {
        self.0.eq_ignore_ascii_case(name)
    }
}

impl Default for FlashMethod {
    fn default() -> Self {
        Self::new(Self::SIMPLE)
    }
}

impl From<&str> for FlashMethod {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for FlashMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One unit of work: flash `build` onto `device`
#[derive(Debug, Clone, Copy)]
pub struct FlashAttempt<'a> {
    /// Image to flash
    pub build: &'a Build,
    /// Target board
    pub device: &'a Device,
    /// Flashing method
    pub method: &'a FlashMethod,
    /// Leave the target halted/unreset after programming
    pub no_reset: bool,
    /// Upper bound for the vendor tool run
    pub timeout: Duration,
}

/// Raw signal produced by a completed attempt, interpreted by the classifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlashSignal {
    /// The vendor tool's exit code is the whole story
    ReturnCode(i32),
    /// Success is signalled by the absence of a failure marker file on the volume
    Marker {
        /// Volume to inspect
        mount_point: PathBuf,
        /// Candidate marker file names, e.g. `FAIL.TXT`
        marker_files: Vec<String>,
    },
}

/// Errors a backend can report instead of a signal
#[derive(Debug, Error)]
pub enum BackendError {
    /// The vendor tool executable is not available
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// The vendor tool could not be started
    #[error("failed to start {tool}: {source}")]
    Spawn {
        /// Tool that failed to start
        tool: String,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// I/O error while flashing
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The device record lacks a field this backend needs
    #[error("device {target_id} has no {field}")]
    MissingField {
        /// Target id of the device
        target_id: String,
        /// Name of the missing field
        field: &'static str,
    },

    /// Serial port error (reset line, break signal)
    #[error("serial port {port}: {message}")]
    Serial {
        /// Port path
        port: String,
        /// What went wrong
        message: String,
    },

    /// The backend does not implement the requested method
    #[error("method '{0}' is not supported by this backend")]
    UnsupportedMethod(String),

    /// The attempt was interrupted
    #[error("interrupted ({0:?})")]
    Interrupted(InterruptKind),

    /// The vendor tool did not finish in time
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    /// Backend specific error
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl BackendError {
    /// Whether the attempt could not even be started
    ///
    /// Hard faults abort the request instead of being classified as a
    /// failed attempt.
    pub fn is_hard_fault(&self) -> bool {
        matches!(
            self,
            Self::ToolNotFound(_) | Self::Spawn { .. } | Self::UnsupportedMethod(_)
        )
    }
}

/// Contract every vendor backend satisfies
///
/// Backends are stateless across calls apart from configuration resolved at
/// construction time, so one instance can serve concurrent attempts.
pub trait Backend: Send + Sync {
    /// Unique name, matched case-insensitively
    fn name(&self) -> &str;

    /// Platforms this backend can flash
    fn supported_platforms(&self) -> &BTreeSet<String>;

    /// Methods this backend implements
    fn methods(&self) -> &[&str] {
        &[FlashMethod::SIMPLE]
    }

    /// Devices currently reachable through this backend
    ///
    /// Bounded by the backend's discovery timeout. Returns an empty list when
    /// the tool or driver is not present.
    fn list_devices(&self) -> Vec<Device>;

    /// Perform one flash attempt
    ///
    /// Ordinary tool failures are reported through the returned signal. An
    /// `Err` is reserved for interruptions and hard faults such as a missing
    /// executable.
    fn flash(
        &self,
        attempt: &FlashAttempt<'_>,
        cancel: &CancelToken,
    ) -> Result<FlashSignal, BackendError>;
}

impl<T: Backend + ?Sized> Backend for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn supported_platforms(&self) -> &BTreeSet<String> {
        (**self).supported_platforms()
    }

    fn methods(&self) -> &[&str] {
        (**self).methods()
    }

    fn list_devices(&self) -> Vec<Device> {
        (**self).list_devices()
    }

    fn flash(
        &self,
        attempt: &FlashAttempt<'_>,
        cancel: &CancelToken,
    ) -> Result<FlashSignal, BackendError> {
        (**self).flash(attempt, cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_case_insensitive() {
        let method = FlashMethod::new("PyOCD");
        assert_eq!(method.as_str(), "pyocd");
        assert!(method.is("PYOCD"));
        assert_eq!(FlashMethod::default().as_str(), "simple");
    }

    #[test]
    fn test_hard_faults() {
        assert!(BackendError::ToolNotFound("pyocd".into()).is_hard_fault());
        assert!(BackendError::UnsupportedMethod("edbg".into()).is_hard_fault());
        assert!(!BackendError::TimedOut(Duration::from_secs(1)).is_hard_fault());
        assert!(!BackendError::Interrupted(InterruptKind::User).is_hard_fault());
    }
}
