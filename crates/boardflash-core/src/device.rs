//! Device and build records

use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// One attached development board
///
/// Devices are produced fresh by every discovery call and are never mutated.
/// `target_id` is unique within one inventory snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Unique identifier reported by the board's interface firmware
    pub target_id: String,
    /// Board type, e.g. `K64F`
    pub platform_name: String,
    /// Mount point of the board's mass-storage volume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_point: Option<PathBuf>,
    /// Serial port of the board's virtual COM port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_port: Option<String>,
    /// Vendor-specific USB serial used by debug-probe tools
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id_usb_id: Option<String>,
}

impl Device {
    /// Create a device with only the mandatory fields set
    pub fn new(target_id: impl Into<String>, platform_name: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            platform_name: platform_name.into(),
            mount_point: None,
            serial_port: None,
            target_id_usb_id: None,
        }
    }

    /// Set the mount point
    pub fn with_mount_point(mut self, mount_point: impl Into<PathBuf>) -> Self {
        self.mount_point = Some(mount_point.into());
        self
    }

    /// Set the serial port
    pub fn with_serial_port(mut self, serial_port: impl Into<String>) -> Self {
        self.serial_port = Some(serial_port.into());
        self
    }

    /// Set the debug-probe USB serial
    pub fn with_usb_id(mut self, usb_id: impl Into<String>) -> Self {
        self.target_id_usb_id = Some(usb_id.into());
        self
    }
}

/// Reasons a build file cannot be used
#[derive(Debug, Error)]
pub enum BuildError {
    /// No regular file at the path
    #[error("build file does not exist: {}", .0.display())]
    NotFound(PathBuf),

    /// The file exists but is empty
    #[error("build file is empty: {}", .0.display())]
    Empty(PathBuf),

    /// The file exists but cannot be opened
    #[error("build file is not readable: {}: {source}", path.display())]
    Unreadable {
        /// Path of the build
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },
}

/// A firmware image that exists, is readable and is not empty
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Build {
    path: PathBuf,
    size: u64,
}

impl Build {
    /// Validate a build path
    pub fn open(path: impl AsRef<Path>) -> std::result::Result<Self, BuildError> {
        let path = path.as_ref();
        let metadata = match path.metadata() {
            Ok(metadata) if metadata.is_file() => metadata,
            _ => return Err(BuildError::NotFound(path.to_path_buf())),
        };

        File::open(path).map_err(|source| BuildError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;

        if metadata.len() == 0 {
            return Err(BuildError::Empty(path.to_path_buf()));
        }

        Ok(Self {
            path: path.to_path_buf(),
            size: metadata.len(),
        })
    }

    /// Path of the image
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name of the image
    pub fn file_name(&self) -> Option<&OsStr> {
        self.path.file_name()
    }

    /// Size in bytes
    pub fn size(&self) -> u64 {
        self.size
    }
}
