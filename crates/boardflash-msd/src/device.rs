//! Mass-storage backend
//!
//! Flashing is a file copy onto the board's interface volume. The interface
//! firmware programs the target, re-enumerates the volume and leaves a
//! `FAIL.TXT` behind when programming failed.

use crate::discovery;
use crate::error::{MsdError, Result};
use boardflash_core::backend::{Backend, BackendError, FlashAttempt, FlashMethod, FlashSignal};
use boardflash_core::config::MsdConfig;
use boardflash_core::{Build, CancelToken, Device};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

/// Backend name
pub const NAME: &str = "mbed";

/// Supported flashing methods
pub const METHODS: &[&str] = &[FlashMethod::SIMPLE];

const BREAK_DURATION: Duration = Duration::from_millis(250);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Drag-and-drop flashing through the interface volume
pub struct MassStorage {
    config: MsdConfig,
    platforms: BTreeSet<String>,
}

impl MassStorage {
    /// Create the backend; supported platforms come from the board code table
    pub fn new(config: &MsdConfig) -> Self {
        Self {
            platforms: config.platforms.values().cloned().collect(),
            config: config.clone(),
        }
    }

    fn run(&self, attempt: &FlashAttempt<'_>, cancel: &CancelToken) -> Result<FlashSignal> {
        let device = attempt.device;
        let mount_point = device
            .mount_point
            .as_deref()
            .ok_or_else(|| MsdError::NoMountPoint(device.target_id.clone()))?;

        remove_stale_markers(mount_point, &self.config.marker_files)?;
        let dest = copy_image(attempt.build, mount_point)?;
        log::info!("Copied {} to {}", attempt.build.path().display(), dest.display());

        if attempt.no_reset {
            log::debug!("{}: reset skipped", device.target_id);
        } else {
            self.reset(device)?;
        }

        self.wait_for_volume(mount_point, cancel);

        Ok(FlashSignal::Marker {
            mount_point: mount_point.to_path_buf(),
            marker_files: self.config.marker_files.clone(),
        })
    }

    /// Reset the target by sending a break on its serial port
    fn reset(&self, device: &Device) -> Result<()> {
        let Some(port) = device.serial_port.as_deref() else {
            log::warn!("{}: no serial port known, cannot reset", device.target_id);
            return Ok(());
        };
        send_break(port)
    }

    /// Give the interface firmware time to program and remount the volume
    ///
    /// Waits up to the settle time for the volume to drop, then up to the
    /// remount timeout for it to come back. A volume that does not come back
    /// is left for the classifier to report.
    fn wait_for_volume(&self, mount_point: &Path, cancel: &CancelToken) {
        let settle_deadline = Instant::now() + self.config.settle();
        loop {
            if !mount_point.is_dir() {
                log::debug!("{} dropped", mount_point.display());
                break;
            }
            let now = Instant::now();
            if cancel.is_cancelled() || now >= settle_deadline {
                log::debug!("{} stayed mounted", mount_point.display());
                break;
            }
            thread::sleep(POLL_INTERVAL.min(settle_deadline - now));
        }

        let deadline = Instant::now() + self.config.remount_timeout();
        while !mount_point.is_dir() {
            if cancel.is_cancelled() || Instant::now() >= deadline {
                log::warn!("{} did not reappear", mount_point.display());
                return;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

/// Delete failure markers left on the volume by an earlier attempt
fn remove_stale_markers(mount_point: &Path, marker_files: &[String]) -> Result<()> {
    for name in marker_files {
        if let Some(path) = discovery::find_file(mount_point, name) {
            log::debug!("Removing stale {}", path.display());
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// Copy the image onto the volume and flush it to the device
fn copy_image(build: &Build, mount_point: &Path) -> Result<PathBuf> {
    let name = build
        .file_name()
        .ok_or_else(|| MsdError::NoFileName(build.path().to_path_buf()))?;
    let dest = mount_point.join(name);

    let copy = || -> io::Result<()> {
        let mut src = File::open(build.path())?;
        let mut dst = File::create(&dest)?;
        io::copy(&mut src, &mut dst)?;
        dst.sync_all()
    };
    copy().map_err(|source| MsdError::Copy {
        path: dest.clone(),
        source,
    })?;
    Ok(dest)
}

fn send_break(port_name: &str) -> Result<()> {
    let serial_err = |source| MsdError::Serial {
        port: port_name.to_string(),
        source,
    };

    let port = serialport::new(port_name, 9600)
        .timeout(Duration::from_secs(1))
        .open()
        .map_err(serial_err)?;
    log::debug!("Sending break on {}", port_name);

    port.set_break().map_err(serial_err)?;
    thread::sleep(BREAK_DURATION);
    port.clear_break().map_err(serial_err)?;
    Ok(())
}

impl Backend for MassStorage {
    fn name(&self) -> &str {
        NAME
    }

    fn supported_platforms(&self) -> &BTreeSet<String> {
        &self.platforms
    }

    fn methods(&self) -> &[&str] {
        METHODS
    }

    fn list_devices(&self) -> Vec<Device> {
        discovery::scan(&self.config)
    }

    fn flash(
        &self,
        attempt: &FlashAttempt<'_>,
        cancel: &CancelToken,
    ) -> std::result::Result<FlashSignal, BackendError> {
        if !METHODS.iter().any(|m| attempt.method.is(m)) {
            return Err(BackendError::UnsupportedMethod(attempt.method.to_string()));
        }
        if let Some(kind) = cancel.interrupted() {
            return Err(BackendError::Interrupted(kind));
        }

        // The volume may have been unmounted since discovery
        if let Some(mount_point) = &attempt.device.mount_point {
            if !mount_point.is_dir() {
                return Err(BackendError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{} is not mounted", mount_point.display()),
                )));
            }
        }

        Ok(self.run(attempt, cancel)?)
    }
}
