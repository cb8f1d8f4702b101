//! Backend registry
//!
//! Owns the backends for the lifetime of the process and answers "who can
//! flash platform P". Lookups walk the backends in registration order so a
//! platform always resolves to the same backend.

use boardflash_core::config::FlashConfig;
use boardflash_core::{Backend, Device, Error, FlashMethod, Result};
use std::collections::{BTreeSet, HashSet};

/// Ordered set of backends
#[derive(Default)]
pub struct BackendRegistry {
    backends: Vec<Box<dyn Backend>>,
}

impl BackendRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with every backend enabled at compile time
    ///
    /// Registration order is mass-storage, ST-LINK, pyOCD, dummy.
    #[allow(unused_mut, unused_variables)]
    pub fn from_config(config: &FlashConfig) -> Self {
        let mut registry = Self::new();

        #[cfg(feature = "msd")]
        registry.register(boardflash_msd::MassStorage::new(&config.msd));

        #[cfg(feature = "stlink")]
        registry.register(boardflash_stlink::StLink::new(
            &config.stlink,
            config.discovery_timeout(),
        ));

        #[cfg(feature = "pyocd")]
        registry.register(boardflash_pyocd::PyOcd::new(
            &config.pyocd,
            config.discovery_timeout(),
        ));

        #[cfg(feature = "dummy")]
        registry.register(boardflash_dummy::DummyBackend::from_config(&config.dummy));

        registry
    }

    /// Append a backend
    pub fn register(&mut self, backend: impl Backend + 'static) {
        self.backends.push(Box::new(backend));
    }

    /// Append a backend, builder style
    pub fn with(mut self, backend: impl Backend + 'static) -> Self {
        self.register(backend);
        self
    }

    /// Backends in registration order
    pub fn backends(&self) -> impl Iterator<Item = &dyn Backend> + '_ {
        self.backends.iter().map(|b| b.as_ref())
    }

    /// Union of all supported platforms
    pub fn supported_platforms(&self) -> BTreeSet<String> {
        self.backends()
            .flat_map(|b| b.supported_platforms().iter().cloned())
            .collect()
    }

    /// Whether any backend supports the platform
    pub fn supports(&self, platform: &str) -> bool {
        self.backends()
            .any(|b| b.supported_platforms().contains(platform))
    }

    /// Look up a backend by name, ignoring case
    pub fn resolve_name(&self, name: &str) -> Result<&dyn Backend> {
        self.backends()
            .find(|b| b.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::UnknownBackend(name.to_string()))
    }

    /// First backend supporting the platform
    pub fn resolve_platform(&self, platform: &str) -> Result<&dyn Backend> {
        self.backends()
            .find(|b| b.supported_platforms().contains(platform))
            .ok_or_else(|| Error::UnsupportedPlatform(platform.to_string()))
    }

    /// First backend supporting both the platform and the method
    ///
    /// Falls back to [`resolve_platform`](Self::resolve_platform) when no
    /// backend implements the method, leaving the rejection to the backend.
    pub fn resolve(&self, platform: &str, method: &FlashMethod) -> Result<&dyn Backend> {
        let by_method = self.backends().find(|b| {
            b.supported_platforms().contains(platform) && b.methods().iter().any(|m| method.is(m))
        });
        match by_method {
            Some(backend) => Ok(backend),
            None => self.resolve_platform(platform),
        }
    }

    /// Devices reachable through all backends
    ///
    /// A board seen by several backends is reported once, by the first
    /// backend that lists it.
    pub fn list_devices(&self) -> Vec<Device> {
        let mut seen = HashSet::new();
        let mut devices = Vec::new();
        for backend in self.backends() {
            let found = backend.list_devices();
            log::debug!("{}: {} device(s)", backend.name(), found.len());
            for device in found {
                if seen.insert(device.target_id.clone()) {
                    devices.push(device);
                } else {
                    log::debug!(
                        "{}: {} already listed by another backend",
                        backend.name(),
                        device.target_id
                    );
                }
            }
        }
        devices
    }
}

/// Information about a backend
pub struct BackendInfo {
    /// Name used for matching
    pub name: &'static str,
    /// Flashing methods it implements
    pub methods: &'static [&'static str],
    /// Short description
    pub description: &'static str,
}

/// Get information about all available backends (enabled at compile time)
#[allow(unused_mut, clippy::vec_init_then_push)]
pub fn available_backends() -> Vec<BackendInfo> {
    let mut backends = Vec::new();

    #[cfg(feature = "msd")]
    backends.push(BackendInfo {
        name: boardflash_msd::NAME,
        methods: boardflash_msd::METHODS,
        description: "Copy to the board's mass-storage volume (DAPLink/MBED interface firmware)",
    });

    #[cfg(feature = "stlink")]
    backends.push(BackendInfo {
        name: boardflash_stlink::NAME,
        methods: boardflash_stlink::METHODS,
        description: "ST-LINK_CLI utility for ST-LINK debug probes (exe=<path>)",
    });

    #[cfg(feature = "pyocd")]
    backends.push(BackendInfo {
        name: boardflash_pyocd::NAME,
        methods: boardflash_pyocd::METHODS,
        description: "pyOCD for CMSIS-DAP debug probes",
    });

    #[cfg(feature = "dummy")]
    backends.push(BackendInfo {
        name: "dummy",
        methods: &[FlashMethod::SIMPLE],
        description: "In-memory backend for testing and dry runs",
    });

    backends
}

/// Generate a short list of backend names for CLI help
pub fn backend_names_short() -> String {
    let backends = available_backends();
    if backends.is_empty() {
        return "none (recompile with features)".to_string();
    }
    let names: Vec<&str> = backends.iter().map(|b| b.name).collect();
    names.join(", ")
}
