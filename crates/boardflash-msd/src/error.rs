//! Error types for mass-storage flashing

use boardflash_core::BackendError;
use std::path::PathBuf;
use thiserror::Error;

/// Mass-storage specific errors
#[derive(Debug, Error)]
pub enum MsdError {
    /// The device record has no mount point
    #[error("device {0} has no mount point")]
    NoMountPoint(String),

    /// The build has no file name to copy under
    #[error("build path {0} has no file name")]
    NoFileName(PathBuf),

    /// Copying the image failed
    #[error("failed to copy image to {path}: {source}")]
    Copy {
        /// Destination on the volume
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Serial port error while resetting the board
    #[error("serial port {port}: {source}")]
    Serial {
        /// Port path
        port: String,
        /// Underlying serial error
        #[source]
        source: serialport::Error,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for mass-storage operations
pub type Result<T> = std::result::Result<T, MsdError>;

impl From<MsdError> for BackendError {
    fn from(e: MsdError) -> Self {
        match e {
            MsdError::NoMountPoint(target_id) => BackendError::MissingField {
                target_id,
                field: "mount_point",
            },
            MsdError::Serial { port, source } => BackendError::Serial {
                port,
                message: source.to_string(),
            },
            MsdError::Io(e) => BackendError::Io(e),
            other => BackendError::Other(Box::new(other)),
        }
    }
}
