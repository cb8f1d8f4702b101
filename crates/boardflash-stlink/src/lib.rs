//! boardflash-stlink - ST-LINK_CLI backend
//!
//! Drives ST's `ST-LINK_CLI` utility. Probes are addressed by their serial
//! number, which the utility prints for `-List`:
//!
//! ```text
//! ===== ST-LINK Probe 0 =====
//! SN: 066DFF495150897267113034
//! FW: V2J28M18
//! ```
//!
//! The probe serial says nothing about the board behind it, so the platform
//! comes from the `[stlink.boards]` table or `default_platform`.

use boardflash_core::backend::{Backend, BackendError, FlashAttempt, FlashSignal};
use boardflash_core::config::StlinkConfig;
use boardflash_core::tool::{find_executable, run_tool};
use boardflash_core::{CancelToken, Device};
use std::collections::BTreeSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

/// Backend name
pub const NAME: &str = "stm";

/// Supported flashing methods
pub const METHODS: &[&str] = &["stlink"];

const EXE_NAMES: &[&str] = &["ST-LINK_CLI.exe", "ST-LINK_CLI"];
const INSTALL_DIR_HINT: &str = "STM32 ST-LINK Utility";

/// ST-LINK_CLI backend
pub struct StLink {
    exe: Option<PathBuf>,
    platforms: BTreeSet<String>,
    config: StlinkConfig,
    discovery_timeout: Duration,
}

impl StLink {
    /// Create the backend, locating the executable once
    pub fn new(config: &StlinkConfig, discovery_timeout: Duration) -> Self {
        let exe = find_executable(config.exe.as_deref(), EXE_NAMES, Some(INSTALL_DIR_HINT));
        match &exe {
            Some(path) => log::debug!("ST-LINK_CLI location: {}", path.display()),
            None => log::debug!("ST-LINK_CLI not found"),
        }
        Self {
            exe,
            platforms: config.platforms.iter().cloned().collect(),
            config: config.clone(),
            discovery_timeout,
        }
    }

    /// Resolved executable, if any
    pub fn exe(&self) -> Option<&Path> {
        self.exe.as_deref()
    }

    fn platform_for(&self, serial: &str) -> Option<String> {
        self.config
            .boards
            .get(serial)
            .or(self.config.default_platform.as_ref())
            .cloned()
    }
}

/// Probe serial numbers from `ST-LINK_CLI -List` output
pub fn parse_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| line.split_once("SN:"))
        .map(|(_, serial)| serial.trim().to_string())
        .filter(|serial| !serial.is_empty())
        .collect()
}

/// Arguments for programming and verifying `build` at `address`
pub fn flash_args(serial: &str, build: &Path, address: &str, no_reset: bool) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-c".into(),
        format!("SN={}", serial).into(),
        "-P".into(),
        build.as_os_str().to_owned(),
        address.into(),
        "-V".into(),
    ];
    if !no_reset {
        args.push("-Rst".into());
    }
    args
}

impl Backend for StLink {
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
        let Some(exe) = &self.exe else {
            return Vec::new();
        };

        let mut cmd = Command::new(exe);
        cmd.arg("-List");
        let output = match run_tool(&mut cmd, self.discovery_timeout, &CancelToken::new()) {
            Ok(output) if output.code == 0 => output,
            Ok(output) => {
                log::debug!("ST-LINK_CLI -List exited with {}", output.code);
                return Vec::new();
            }
            Err(e) => {
                log::debug!("ST-LINK_CLI -List failed: {}", e);
                return Vec::new();
            }
        };

        let serials = parse_list(&output.stdout);
        log::debug!("Connected ST-LINK probes: {:?}", serials);
        serials
            .into_iter()
            .filter_map(|serial| match self.platform_for(&serial) {
                Some(platform) => {
                    Some(Device::new(serial.clone(), platform).with_usb_id(serial))
                }
                None => {
                    log::debug!("ST-LINK probe {} has no platform configured", serial);
                    None
                }
            })
            .collect()
    }

    fn flash(
        &self,
        attempt: &FlashAttempt<'_>,
        cancel: &CancelToken,
    ) -> Result<FlashSignal, BackendError> {
        if !METHODS.iter().any(|m| attempt.method.is(m)) {
            return Err(BackendError::UnsupportedMethod(attempt.method.to_string()));
        }
        let exe = self
            .exe
            .as_ref()
            .ok_or_else(|| BackendError::ToolNotFound(EXE_NAMES[0].to_string()))?;
        let serial = attempt.device.target_id_usb_id.as_deref().ok_or_else(|| {
            BackendError::MissingField {
                target_id: attempt.device.target_id.clone(),
                field: "target_id_usb_id",
            }
        })?;

        let mut cmd = Command::new(exe);
        cmd.args(flash_args(
            serial,
            attempt.build.path(),
            &self.config.address,
            attempt.no_reset,
        ));
        let output = run_tool(&mut cmd, attempt.timeout, cancel)?;
        Ok(FlashSignal::ReturnCode(output.code))
    }
}
