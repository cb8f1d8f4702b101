//! TOML configuration
//!
//! Every field has a default, so an empty file (or no file at all) is a valid
//! configuration:
//!
//! ```toml
//! target_id_length = 48
//! dispatch = "parallel"
//! sequential_methods = ["pyocd"]
//! attempt_timeout_secs = 300
//!
//! [msd]
//! mount_roots = ["/media/ci"]
//!
//! [msd.platforms]
//! "0240" = "K64F"
//!
//! [stlink]
//! exe = "/opt/st/ST-LINK_CLI.exe"
//!
//! [[failure_phrase]]
//! category = 4
//! text = "Target voltage too low"
//! ```

use crate::classifier::Classifier;
use crate::device::Device;
use crate::outcome::FailureCategory;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        /// Config file path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// The file is not valid TOML for this schema
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A failure phrase names a category outside 1..=5
    #[error("invalid failure category {0} (expected 1-5)")]
    InvalidCategory(u8),
}

/// How a batch dispatches its per-device attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// One device after the other
    #[default]
    Sequential,
    /// All devices at once, one thread each
    Parallel,
}

/// Top-level configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FlashConfig {
    /// Target ids shorter than this are treated as prefixes
    pub target_id_length: usize,
    /// Batch dispatch mode
    pub dispatch: DispatchMode,
    /// Methods whose tools misbehave when run concurrently on non-Windows hosts
    pub sequential_methods: Vec<String>,
    /// Upper bound for one flash attempt
    pub attempt_timeout_secs: u64,
    /// Upper bound for one discovery run of a tool
    pub discovery_timeout_secs: u64,
    /// Mass-storage backend
    pub msd: MsdConfig,
    /// ST-LINK backend
    pub stlink: StlinkConfig,
    /// pyOCD backend
    pub pyocd: PyocdConfig,
    /// In-memory backend
    pub dummy: DummyConfig,
    /// Extra failure marker phrases
    pub failure_phrase: Vec<FailurePhrase>,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            target_id_length: 48,
            dispatch: DispatchMode::Sequential,
            sequential_methods: vec!["pyocd".to_string()],
            attempt_timeout_secs: 300,
            discovery_timeout_secs: 10,
            msd: MsdConfig::default(),
            stlink: StlinkConfig::default(),
            pyocd: PyocdConfig::default(),
            dummy: DummyConfig::default(),
            failure_phrase: Vec::new(),
        }
    }
}

impl FlashConfig {
    /// Load a configuration file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse a configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: FlashConfig = toml::from_str(content)?;
        for phrase in &config.failure_phrase {
            if FailureCategory::from_code(phrase.category).is_none() {
                return Err(ConfigError::InvalidCategory(phrase.category));
            }
        }
        Ok(config)
    }

    /// Attempt timeout as a duration
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    /// Discovery timeout as a duration
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }

    /// Classifier with the built-in phrase table plus the configured phrases
    pub fn classifier(&self) -> Result<Classifier, ConfigError> {
        let mut classifier = Classifier::default();
        for phrase in &self.failure_phrase {
            let category = FailureCategory::from_code(phrase.category)
                .ok_or(ConfigError::InvalidCategory(phrase.category))?;
            classifier.add_phrase(category, phrase.text.clone());
        }
        Ok(classifier)
    }
}

/// A failure marker phrase added by configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FailurePhrase {
    /// Category code, 1-5
    pub category: u8,
    /// Phrase to look for
    pub text: String,
}

/// Mass-storage backend configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MsdConfig {
    /// Directories whose children are scanned for board volumes
    pub mount_roots: Vec<PathBuf>,
    /// Failure marker file names
    pub marker_files: Vec<String>,
    /// Directory of stable serial port names
    pub serial_by_id_dir: PathBuf,
    /// Pause after copying before waiting for the volume to come back
    pub settle_millis: u64,
    /// How long to wait for the volume to come back after a copy
    pub remount_timeout_secs: u64,
    /// First four characters of a target id mapped to platform names
    pub platforms: BTreeMap<String, String>,
}

impl Default for MsdConfig {
    fn default() -> Self {
        Self {
            mount_roots: ["/media", "/run/media", "/mnt", "/Volumes"]
                .into_iter()
                .map(PathBuf::from)
                .collect(),
            marker_files: vec!["FAIL.TXT".to_string()],
            serial_by_id_dir: PathBuf::from("/dev/serial/by-id"),
            settle_millis: 1500,
            remount_timeout_secs: 10,
            platforms: default_msd_platforms(),
        }
    }
}

impl MsdConfig {
    /// Remount timeout as a duration
    pub fn remount_timeout(&self) -> Duration {
        Duration::from_secs(self.remount_timeout_secs)
    }

    /// Settle delay as a duration
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_millis)
    }
}

fn default_msd_platforms() -> BTreeMap<String, String> {
    [
        ("0240", "K64F"),
        ("0311", "K66F"),
        ("0700", "NUCLEO_F103RB"),
        ("0720", "NUCLEO_F401RE"),
        ("0740", "NUCLEO_F411RE"),
        ("0765", "NUCLEO_L476RG"),
        ("0796", "NUCLEO_F429ZI"),
        ("0818", "NUCLEO_F767ZI"),
        ("1100", "NRF51_DK"),
        ("1101", "NRF52_DK"),
        ("1236", "UBLOX_EVK_ODIN_W2"),
    ]
    .into_iter()
    .map(|(code, name)| (code.to_string(), name.to_string()))
    .collect()
}

/// ST-LINK backend configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StlinkConfig {
    /// ST-LINK_CLI executable; searched on `PATH` when unset
    pub exe: Option<PathBuf>,
    /// Platforms flashed through ST-LINK
    pub platforms: Vec<String>,
    /// Probe serial numbers mapped to platform names
    pub boards: BTreeMap<String, String>,
    /// Platform assumed for probes missing from `boards`
    pub default_platform: Option<String>,
    /// Flash base address
    pub address: String,
}

impl Default for StlinkConfig {
    fn default() -> Self {
        Self {
            exe: None,
            platforms: [
                "NUCLEO_F401RE",
                "NUCLEO_F411RE",
                "NUCLEO_F429ZI",
                "NUCLEO_L476RG",
                "NUCLEO_F767ZI",
                "UBLOX_EVK_ODIN_W2",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            boards: BTreeMap::new(),
            default_platform: None,
            address: "0x08000000".to_string(),
        }
    }
}

/// pyOCD backend configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PyocdConfig {
    /// pyocd executable; searched on `PATH` when unset
    pub exe: Option<PathBuf>,
    /// pyOCD target names mapped to platform names
    pub targets: BTreeMap<String, String>,
}

impl Default for PyocdConfig {
    fn default() -> Self {
        Self {
            exe: None,
            targets: [
                ("k64f", "K64F"),
                ("k66f", "K66F"),
                ("nrf51", "NRF51_DK"),
                ("nrf52", "NRF52_DK"),
                ("stm32f401xe", "NUCLEO_F401RE"),
                ("stm32f411re", "NUCLEO_F411RE"),
                ("stm32f429xi", "NUCLEO_F429ZI"),
                ("stm32l475xg", "NUCLEO_L476RG"),
            ]
            .into_iter()
            .map(|(target, name)| (target.to_string(), name.to_string()))
            .collect(),
        }
    }
}

/// In-memory backend configuration, used for dry runs
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DummyConfig {
    /// Devices the backend pretends are attached
    pub device: Vec<Device>,
    /// Extra platforms to claim support for
    pub platforms: Vec<String>,
}
