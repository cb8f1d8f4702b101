//! boardflash-dummy - In-memory flashing backend
//!
//! This crate provides a backend that pretends a set of boards is attached.
//! Images "flashed" to them are kept in memory. Responses can be scripted per
//! device, and every call is recorded with entry and exit timestamps so tests
//! can check dispatch behaviour.

use boardflash_core::backend::{Backend, BackendError, FlashAttempt, FlashMethod, FlashSignal};
use boardflash_core::config::DummyConfig;
use boardflash_core::{CancelToken, Device, InterruptKind};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

/// Scripted reaction to a flash attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DummyResponse {
    /// Report this return code
    ReturnCode(i32),
    /// Write a failure marker with this text to the device's mount point and
    /// report a marker signal. An empty string only reports the signal.
    FailMarker(String),
    /// Behave as if the attempt was interrupted
    Interrupt(InterruptKind),
    /// Behave as if the vendor tool is not installed
    ToolMissing,
    /// Behave as if the vendor tool outlived the attempt timeout
    TimedOut,
}

/// One recorded flash call
#[derive(Debug, Clone)]
pub struct CallRecord {
    /// Target id of the flashed device
    pub target_id: String,
    /// Requested method
    pub method: String,
    /// Requested reset policy
    pub no_reset: bool,
    /// When the call started
    pub started: Instant,
    /// When the call returned
    pub finished: Instant,
}

/// In-memory backend
pub struct DummyBackend {
    name: String,
    platforms: BTreeSet<String>,
    methods: &'static [&'static str],
    devices: Vec<Device>,
    responses: HashMap<String, DummyResponse>,
    delay: Duration,
    calls: Mutex<Vec<CallRecord>>,
    images: Mutex<HashMap<String, Vec<u8>>>,
}

impl DummyBackend {
    /// Create a backend named `name` with no devices
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            platforms: BTreeSet::new(),
            methods: &[FlashMethod::SIMPLE],
            devices: Vec::new(),
            responses: HashMap::new(),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            images: Mutex::new(HashMap::new()),
        }
    }

    /// Create the `dummy` backend from configuration
    pub fn from_config(config: &DummyConfig) -> Self {
        let mut backend = Self::new("dummy");
        for platform in &config.platforms {
            backend = backend.with_platform(platform.clone());
        }
        for device in &config.device {
            backend = backend.with_device(device.clone());
        }
        backend
    }

    /// Claim support for a platform
    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platforms.insert(platform.into());
        self
    }

    /// Attach a device; its platform becomes supported
    pub fn with_device(mut self, device: Device) -> Self {
        self.platforms.insert(device.platform_name.clone());
        self.devices.push(device);
        self
    }

    /// Set the methods this backend accepts
    pub fn with_methods(mut self, methods: &'static [&'static str]) -> Self {
        self.methods = methods;
        self
    }

    /// Script the response for one device
    pub fn with_response(mut self, target_id: impl Into<String>, response: DummyResponse) -> Self {
        self.responses.insert(target_id.into(), response);
        self
    }

    /// Make every attempt take this long
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Calls recorded so far, in completion order
    pub fn calls(&self) -> Vec<CallRecord> {
        lock(&self.calls).clone()
    }

    /// Image last flashed to a device
    pub fn flashed(&self, target_id: &str) -> Option<Vec<u8>> {
        lock(&self.images).get(target_id).cloned()
    }

    fn wait(&self, cancel: &CancelToken) -> Result<(), BackendError> {
        let started = Instant::now();
        while started.elapsed() < self.delay {
            if let Some(kind) = cancel.interrupted() {
                return Err(BackendError::Interrupted(kind));
            }
            thread::sleep(Duration::from_millis(1).min(self.delay));
        }
        Ok(())
    }

    fn respond(
        &self,
        attempt: &FlashAttempt<'_>,
        cancel: &CancelToken,
    ) -> Result<FlashSignal, BackendError> {
        let device = attempt.device;
        if !self.methods.iter().any(|m| attempt.method.is(m)) {
            return Err(BackendError::UnsupportedMethod(attempt.method.to_string()));
        }

        self.wait(cancel)?;

        let response = self
            .responses
            .get(&device.target_id)
            .cloned()
            .unwrap_or(DummyResponse::ReturnCode(0));

        match response {
            DummyResponse::ReturnCode(code) => {
                if code == 0 {
                    let image = fs::read(attempt.build.path())?;
                    lock(&self.images).insert(device.target_id.clone(), image);
                }
                Ok(FlashSignal::ReturnCode(code))
            }
            DummyResponse::FailMarker(text) => {
                let mount_point =
                    device
                        .mount_point
                        .clone()
                        .ok_or_else(|| BackendError::MissingField {
                            target_id: device.target_id.clone(),
                            field: "mount_point",
                        })?;
                if !text.is_empty() {
                    fs::write(mount_point.join("FAIL.TXT"), text)?;
                }
                Ok(FlashSignal::Marker {
                    mount_point,
                    marker_files: vec!["FAIL.TXT".to_string()],
                })
            }
            DummyResponse::Interrupt(kind) => Err(BackendError::Interrupted(kind)),
            DummyResponse::ToolMissing => Err(BackendError::ToolNotFound("dummy-tool".to_string())),
            DummyResponse::TimedOut => Err(BackendError::TimedOut(attempt.timeout)),
        }
    }
}

impl Backend for DummyBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_platforms(&self) -> &BTreeSet<String> {
        &self.platforms
    }

    fn methods(&self) -> &[&str] {
        self.methods
    }

    fn list_devices(&self) -> Vec<Device> {
        self.devices.clone()
    }

    fn flash(
        &self,
        attempt: &FlashAttempt<'_>,
        cancel: &CancelToken,
    ) -> Result<FlashSignal, BackendError> {
        let started = Instant::now();
        log::debug!(
            "{}: flashing {} ({} bytes) to {}",
            self.name,
            attempt.build.path().display(),
            attempt.build.size(),
            attempt.device.target_id
        );

        let result = self.respond(attempt, cancel);

        lock(&self.calls).push(CallRecord {
            target_id: attempt.device.target_id.clone(),
            method: attempt.method.to_string(),
            no_reset: attempt.no_reset,
            started,
            finished: Instant::now(),
        });
        result
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
