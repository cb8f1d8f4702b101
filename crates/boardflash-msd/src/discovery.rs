//! Mass-storage volume discovery
//!
//! DAPLink and older MBED interface firmware expose the board as a USB
//! mass-storage volume carrying `MBED.HTM` and/or `DETAILS.TXT`. The unique
//! id is read from those files; its first four characters identify the
//! board type.

use boardflash_core::config::MsdConfig;
use boardflash_core::Device;
use std::fs;
use std::path::{Path, PathBuf};

/// Interface firmware information file
pub const DETAILS_FILE: &str = "DETAILS.TXT";

/// Interface firmware redirect page
pub const MBED_HTM_FILE: &str = "MBED.HTM";

/// Devices on all mounted interface volumes under the configured roots
///
/// Volumes whose board code is not in the platform table are skipped.
pub fn scan(config: &MsdConfig) -> Vec<Device> {
    let mut devices = Vec::new();
    for volume in config.mount_roots.iter().flat_map(|root| volumes(root)) {
        let Some(target_id) = read_target_id(&volume) else {
            log::debug!("{}: no target id found", volume.display());
            continue;
        };
        let Some(platform) = platform_for(&config.platforms, &target_id) else {
            log::debug!("{}: unknown board code in {}", volume.display(), target_id);
            continue;
        };
        if devices.iter().any(|d: &Device| d.target_id == target_id) {
            continue;
        }

        let mut device = Device::new(target_id, platform).with_mount_point(&volume);
        if let Some(port) = serial_port_for(&config.serial_by_id_dir, &device.target_id) {
            device = device.with_serial_port(port);
        }
        log::debug!(
            "Found {} ({}) at {}",
            device.target_id,
            device.platform_name,
            volume.display()
        );
        devices.push(device);
    }
    devices
}

/// Interface volumes directly under `root`, or one level deeper
///
/// Desktop automounters put volumes under a per-user directory
/// (`/media/<user>/DAPLINK`).
fn volumes(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for dir in subdirs(root) {
        if is_interface_volume(&dir) {
            found.push(dir);
        } else {
            found.extend(subdirs(&dir).into_iter().filter(|d| is_interface_volume(d)));
        }
    }
    found
}

fn subdirs(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    dirs
}

fn is_interface_volume(dir: &Path) -> bool {
    find_file(dir, MBED_HTM_FILE).is_some() || find_file(dir, DETAILS_FILE).is_some()
}

/// Find a file by name, ignoring case
pub fn find_file(dir: &Path, name: &str) -> Option<PathBuf> {
    let direct = dir.join(name);
    if direct.is_file() {
        return Some(direct);
    }
    fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .find(|e| e.file_name().to_string_lossy().eq_ignore_ascii_case(name))
        .map(|e| e.path())
        .filter(|p| p.is_file())
}

/// Target id of an interface volume
///
/// `DETAILS.TXT` wins over `MBED.HTM`.
pub fn read_target_id(volume: &Path) -> Option<String> {
    let from_details = find_file(volume, DETAILS_FILE)
        .and_then(|p| fs::read(p).ok())
        .and_then(|bytes| parse_details(&String::from_utf8_lossy(&bytes)));
    from_details.or_else(|| {
        find_file(volume, MBED_HTM_FILE)
            .and_then(|p| fs::read(p).ok())
            .and_then(|bytes| parse_mbed_htm(&String::from_utf8_lossy(&bytes)))
    })
}

/// Extract the `Unique ID:` value from `DETAILS.TXT`
pub fn parse_details(text: &str) -> Option<String> {
    text.lines()
        .filter_map(|line| line.trim().strip_prefix("Unique ID:"))
        .map(str::trim)
        .find(|id| !id.is_empty())
        .map(str::to_string)
}

/// Extract the `code=` URL parameter from `MBED.HTM`
pub fn parse_mbed_htm(text: &str) -> Option<String> {
    let start = text.find("code=")? + "code=".len();
    let id: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect();
    (!id.is_empty()).then_some(id)
}

/// Platform for a target id, from its four-character board code
pub fn platform_for(
    platforms: &std::collections::BTreeMap<String, String>,
    target_id: &str,
) -> Option<String> {
    let code = target_id.get(..4)?;
    platforms
        .iter()
        .find(|(prefix, _)| prefix.eq_ignore_ascii_case(code))
        .map(|(_, platform)| platform.clone())
}

/// Serial port of a board, from the udev by-id links
///
/// The link name embeds the interface serial number, which is the target id.
pub fn serial_port_for(by_id_dir: &Path, target_id: &str) -> Option<String> {
    let mut links: Vec<PathBuf> = fs::read_dir(by_id_dir)
        .ok()?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains(target_id))
        .map(|e| e.path())
        .collect();
    links.sort();
    let link = links.into_iter().next()?;
    let port = fs::canonicalize(&link).unwrap_or(link);
    Some(port.to_string_lossy().into_owned())
}
