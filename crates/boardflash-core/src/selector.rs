//! Device selection
//!
//! Narrows a device inventory down to the boards a request targets.
//!
//! Rules, in precedence order:
//!
//! 1. A platform filter alone keeps devices of that platform.
//! 2. An explicit target id list keeps devices whose id is listed, within the
//!    platform filter if one is given.
//! 3. A non-empty target id prefix keeps devices whose id starts with it,
//!    within the platform filter if one is given.
//! 4. With no narrowing filter the platform-filtered set (or the whole
//!    inventory) is kept.
//!
//! When neither a platform nor a target filter is given and boards of more
//! than one platform are attached, selection is refused instead of guessing.

use crate::device::Device;
use std::collections::BTreeSet;
use thiserror::Error;

/// Sentinel target id meaning "every attached device"
pub const ALL_TARGETS: &str = "all";

/// Target-id part of a selection
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TargetFilter {
    /// No target-id narrowing
    #[default]
    All,
    /// Exactly these target ids
    Ids(Vec<String>),
    /// Target ids starting with this string
    Prefix(String),
}

impl TargetFilter {
    /// Filter for a single user-supplied string: `all` or a prefix
    pub fn from_id_or_prefix(value: &str) -> Self {
        if value.eq_ignore_ascii_case(ALL_TARGETS) {
            Self::All
        } else {
            Self::Prefix(value.to_string())
        }
    }

    /// Whether this filter narrows anything
    pub fn narrows(&self) -> bool {
        match self {
            Self::All => false,
            Self::Ids(ids) => !ids.is_empty(),
            Self::Prefix(prefix) => !prefix.is_empty(),
        }
    }

    fn matches(&self, device: &Device) -> bool {
        match self {
            Self::Ids(ids) if !ids.is_empty() => ids.iter().any(|id| *id == device.target_id),
            Self::Prefix(prefix) if !prefix.is_empty() => {
                device.target_id.starts_with(prefix.as_str())
            }
            _ => true,
        }
    }
}

/// Selection failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectError {
    /// Several platforms attached and nothing chosen
    #[error(
        "multiple devices and platforms found ({}), please specify preferred platform",
        join_names(.0)
    )]
    AmbiguousPlatform(BTreeSet<String>),

    /// The filters matched no device
    #[error("no devices to flash")]
    NoMatchingDevices,

    /// Exact lookup found nothing
    #[error("{field}: {value} not found")]
    NotFound {
        /// Field that was searched
        field: &'static str,
        /// Value that was searched for
        value: String,
    },
}

fn join_names(names: &BTreeSet<String>) -> String {
    names.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

/// Distinct platforms in an inventory
pub fn platforms(inventory: &[Device]) -> BTreeSet<String> {
    inventory.iter().map(|d| d.platform_name.clone()).collect()
}

/// Select the devices matching `platform` and `targets`, in inventory order
pub fn select(
    inventory: &[Device],
    platform: Option<&str>,
    targets: &TargetFilter,
) -> Result<Vec<Device>, SelectError> {
    if platform.is_none() && !targets.narrows() {
        let found = platforms(inventory);
        if found.len() > 1 {
            return Err(SelectError::AmbiguousPlatform(found));
        }
    }

    let selected: Vec<Device> = inventory
        .iter()
        .filter(|d| platform.map_or(true, |p| d.platform_name == p))
        .filter(|d| targets.matches(d))
        .cloned()
        .collect();

    if selected.is_empty() {
        return Err(SelectError::NoMatchingDevices);
    }
    Ok(selected)
}

/// Find the device with exactly this target id
pub fn find_by_target_id<'a>(
    inventory: &'a [Device],
    target_id: &str,
) -> Result<&'a Device, SelectError> {
    inventory
        .iter()
        .find(|d| d.target_id == target_id)
        .ok_or_else(|| SelectError::NotFound {
            field: "target_id",
            value: target_id.to_string(),
        })
}

/// Find the first device of this platform
pub fn find_by_platform_name<'a>(
    inventory: &'a [Device],
    platform_name: &str,
) -> Result<&'a Device, SelectError> {
    inventory
        .iter()
        .find(|d| d.platform_name == platform_name)
        .ok_or_else(|| SelectError::NotFound {
            field: "platform_name",
            value: platform_name.to_string(),
        })
}
