//! boardflash-pyocd - pyOCD backend
//!
//! Flashes boards through CMSIS-DAP probes with the `pyocd` command line
//! tool. Probes are enumerated with `pyocd json --probes`; the probe unique
//! id of a DAPLink board is its target id.
//!
//! pyOCD does not cope with several instances driving probes at once on
//! Linux and macOS, which is why `pyocd` is in the default
//! `sequential_methods` list.

pub mod error;

pub use error::{PyocdError, Result};

use boardflash_core::backend::{Backend, BackendError, FlashAttempt, FlashSignal};
use boardflash_core::config::PyocdConfig;
use boardflash_core::tool::{find_executable, run_tool};
use boardflash_core::{CancelToken, Device};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

/// Backend name
pub const NAME: &str = "pyocd";

/// Supported flashing methods
pub const METHODS: &[&str] = &["pyocd"];

const EXE_NAMES: &[&str] = &["pyocd", "pyocd.exe"];

/// One probe from `pyocd json --probes`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Probe {
    /// Probe unique id
    pub unique_id: String,
    /// pyOCD target type of the attached board, if known
    #[serde(default)]
    pub target: String,
    /// Board name, if known
    #[serde(default)]
    pub board_name: String,
}

#[derive(Deserialize)]
struct ProbeList {
    #[serde(default)]
    status: i32,
    #[serde(default)]
    boards: Vec<Probe>,
}

/// Parse the output of `pyocd json --probes`
pub fn parse_probes(stdout: &str) -> Result<Vec<Probe>> {
    let list: ProbeList = serde_json::from_str(stdout)?;
    if list.status != 0 {
        return Err(PyocdError::Status(list.status));
    }
    Ok(list.boards)
}

/// Arguments for flashing `build` through the probe `unique_id`
pub fn flash_args(
    unique_id: &str,
    target: Option<&str>,
    build: &Path,
    no_reset: bool,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["flash".into(), "-u".into(), unique_id.into()];
    if let Some(target) = target {
        args.push("-t".into());
        args.push(target.into());
    }
    if no_reset {
        args.push("--no-reset".into());
    }
    args.push(build.as_os_str().to_owned());
    args
}

/// pyOCD backend
pub struct PyOcd {
    exe: Option<PathBuf>,
    platforms: BTreeSet<String>,
    config: PyocdConfig,
    discovery_timeout: Duration,
}

impl PyOcd {
    /// Create the backend, locating the executable once
    pub fn new(config: &PyocdConfig, discovery_timeout: Duration) -> Self {
        let exe = find_executable(config.exe.as_deref(), EXE_NAMES, None);
        match &exe {
            Some(path) => log::debug!("pyocd location: {}", path.display()),
            None => log::debug!("pyocd not found"),
        }
        Self {
            exe,
            platforms: config.targets.values().cloned().collect(),
            config: config.clone(),
            discovery_timeout,
        }
    }

    /// Resolved executable, if any
    pub fn exe(&self) -> Option<&Path> {
        self.exe.as_deref()
    }

    fn platform_for(&self, target: &str) -> Option<&String> {
        self.config
            .targets
            .iter()
            .find(|(t, _)| t.eq_ignore_ascii_case(target))
            .map(|(_, platform)| platform)
    }

    fn target_for(&self, platform: &str) -> Option<&str> {
        self.config
            .targets
            .iter()
            .find(|(_, p)| p.as_str() == platform)
            .map(|(target, _)| target.as_str())
    }

    fn to_device(&self, probe: Probe) -> Option<Device> {
        let Some(platform) = self.platform_for(&probe.target) else {
            log::debug!(
                "pyocd probe {} ({}) has an unknown target '{}'",
                probe.unique_id,
                probe.board_name,
                probe.target
            );
            return None;
        };
        Some(Device::new(probe.unique_id.clone(), platform.clone()).with_usb_id(probe.unique_id))
    }
}

impl Backend for PyOcd {
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
        cmd.args(["json", "--probes"]);
        let output = match run_tool(&mut cmd, self.discovery_timeout, &CancelToken::new()) {
            Ok(output) => output,
            Err(e) => {
                log::debug!("pyocd json failed: {}", e);
                return Vec::new();
            }
        };

        match parse_probes(&output.stdout) {
            Ok(probes) => probes.into_iter().filter_map(|p| self.to_device(p)).collect(),
            Err(e) => {
                log::warn!("pyocd: {}", e);
                Vec::new()
            }
        }
    }

    fn flash(
        &self,
        attempt: &FlashAttempt<'_>,
        cancel: &CancelToken,
    ) -> std::result::Result<FlashSignal, BackendError> {
        if !METHODS.iter().any(|m| attempt.method.is(m)) {
            return Err(BackendError::UnsupportedMethod(attempt.method.to_string()));
        }
        let exe = self
            .exe
            .as_ref()
            .ok_or_else(|| BackendError::ToolNotFound(EXE_NAMES[0].to_string()))?;
        let device = attempt.device;
        let unique_id = device
            .target_id_usb_id
            .as_deref()
            .unwrap_or(&device.target_id);

        let mut cmd = Command::new(exe);
        cmd.args(flash_args(
            unique_id,
            self.target_for(&device.platform_name),
            attempt.build.path(),
            attempt.no_reset,
        ));
        let output = run_tool(&mut cmd, attempt.timeout, cancel)?;
        Ok(FlashSignal::ReturnCode(output.code))
    }
}
