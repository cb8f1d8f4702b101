//! Flash orchestration
//!
//! [`Flasher::flash`] is the entry point. A request naming one full target id
//! (or only a platform) flashes a single device; a list of ids, the `all`
//! sentinel or a target id shorter than a full unique id flashes every
//! matching device and reports a batch.
//!
//! Every attempt produces exactly one [`Outcome`]. One device failing never
//! aborts a batch. A selected device whose platform no backend supports
//! refuses the whole batch before any device is flashed.

use crate::registry::BackendRegistry;
use boardflash_core::backend::{Backend, BackendError, FlashAttempt, FlashMethod};
use boardflash_core::classifier::Classifier;
use boardflash_core::config::{DispatchMode, FlashConfig};
use boardflash_core::selector::{self, SelectError, TargetFilter, ALL_TARGETS};
use boardflash_core::{Build, CancelToken, Device, Error, InterruptKind, Outcome, Result};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

/// Dispatch policy knobs
#[derive(Debug, Clone)]
pub struct FlashOptions {
    /// A target id shorter than this is a prefix
    pub target_id_length: usize,
    /// Requested dispatch mode for batches
    pub dispatch: DispatchMode,
    /// Methods that must not run concurrently on non-Windows hosts
    pub sequential_methods: Vec<String>,
    /// Upper bound for one attempt
    pub attempt_timeout: Duration,
    /// Host operating system, as in `std::env::consts::OS`
    pub host_os: String,
}

impl Default for FlashOptions {
    fn default() -> Self {
        Self::from(&FlashConfig::default())
    }
}

impl From<&FlashConfig> for FlashOptions {
    fn from(config: &FlashConfig) -> Self {
        Self {
            target_id_length: config.target_id_length,
            dispatch: config.dispatch,
            sequential_methods: config.sequential_methods.clone(),
            attempt_timeout: config.attempt_timeout(),
            host_os: std::env::consts::OS.to_string(),
        }
    }
}

/// Per-attempt parameters shared by every device of a request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlashParams {
    /// Flashing method
    pub method: FlashMethod,
    /// Skip the reset after flashing
    pub no_reset: bool,
    /// Use this backend instead of resolving one by platform
    pub backend: Option<String>,
}

/// Which devices a request targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSpec {
    /// A full target id, a prefix, or `all`
    Id(String),
    /// Exactly these target ids
    Ids(Vec<String>),
}

impl TargetSpec {
    fn is_empty(&self) -> bool {
        match self {
            Self::Id(id) => id.is_empty(),
            Self::Ids(ids) => ids.is_empty(),
        }
    }
}

/// A flash request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashRequest {
    /// Firmware image path
    pub build: PathBuf,
    /// Target id selection
    pub target: Option<TargetSpec>,
    /// Platform filter
    pub platform: Option<String>,
    /// Attempt parameters
    pub params: FlashParams,
}

impl FlashRequest {
    /// Request for a build with no selector yet
    pub fn new(build: impl Into<PathBuf>) -> Self {
        Self {
            build: build.into(),
            target: None,
            platform: None,
            params: FlashParams::default(),
        }
    }

    /// Target one id, a prefix, or `all`
    pub fn target_id(mut self, target_id: impl Into<String>) -> Self {
        self.target = Some(TargetSpec::Id(target_id.into()));
        self
    }

    /// Target exactly these ids
    pub fn target_ids(mut self, target_ids: Vec<String>) -> Self {
        self.target = Some(TargetSpec::Ids(target_ids));
        self
    }

    /// Restrict to a platform
    pub fn platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    /// Set the flashing method
    pub fn method(mut self, method: &str) -> Self {
        self.params.method = FlashMethod::new(method);
        self
    }

    /// Skip the reset after flashing
    pub fn no_reset(mut self, no_reset: bool) -> Self {
        self.params.no_reset = no_reset;
        self
    }

    /// Force a backend by name
    pub fn backend(mut self, backend: impl Into<String>) -> Self {
        self.params.backend = Some(backend.into());
        self
    }
}

/// Outcome of one device in a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceResult {
    /// Target id of the device
    pub target_id: String,
    /// What happened
    pub outcome: Outcome,
}

/// Result of a multi-device request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    refused: Option<Outcome>,
    results: Vec<DeviceResult>,
}

impl BatchReport {
    fn refused(outcome: Outcome) -> Self {
        Self {
            refused: Some(outcome),
            results: Vec::new(),
        }
    }

    /// Why the batch was refused before touching any device
    pub fn refusal(&self) -> Option<Outcome> {
        self.refused
    }

    /// Per-device results in inventory order
    pub fn results(&self) -> &[DeviceResult] {
        &self.results
    }

    /// Number of devices that flashed successfully
    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_success()).count()
    }

    /// Aggregate status
    ///
    /// The sum of the per-device codes. Any non-zero value means at least one
    /// device failed; the number itself carries no further meaning. Negative
    /// tool exit codes count by magnitude so failures never cancel out.
    pub fn status(&self) -> i32 {
        match self.refused {
            Some(outcome) => outcome.code(),
            None => self.results.iter().fold(0i32, |sum, r| {
                sum.saturating_add(r.outcome.code().saturating_abs())
            }),
        }
    }

    /// Whether the batch ran and every device flashed successfully
    pub fn is_success(&self) -> bool {
        self.refused.is_none() && self.results.iter().all(|r| r.outcome.is_success())
    }
}

/// Result of [`Flasher::flash`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlashStatus {
    /// One device was targeted
    Single(Outcome),
    /// Several devices were targeted
    Batch(BatchReport),
}

impl FlashStatus {
    /// Integer status: the outcome code or the batch sum
    pub fn code(&self) -> i32 {
        match self {
            Self::Single(outcome) => outcome.code(),
            Self::Batch(report) => report.status(),
        }
    }

    /// Status as a process exit code
    ///
    /// Values that do not fit are reported as 255 so a failure never wraps
    /// around to success.
    pub fn exit_code(&self) -> i32 {
        match self.code() {
            code @ 0..=255 => code,
            _ => 255,
        }
    }

    /// Whether every targeted device flashed successfully
    pub fn is_success(&self) -> bool {
        match self {
            Self::Single(outcome) => outcome.is_success(),
            Self::Batch(report) => report.is_success(),
        }
    }
}

/// The flash orchestrator
pub struct Flasher {
    registry: BackendRegistry,
    classifier: Classifier,
    options: FlashOptions,
    cancel: CancelToken,
}

impl Flasher {
    /// Orchestrator with default options and phrase table
    pub fn new(registry: BackendRegistry) -> Self {
        Self {
            registry,
            classifier: Classifier::default(),
            options: FlashOptions::default(),
            cancel: CancelToken::new(),
        }
    }

    /// Orchestrator configured from a [`FlashConfig`]
    ///
    /// # Errors
    ///
    /// [`Error::Config`] when the phrase table names an unknown category.
    pub fn from_config(registry: BackendRegistry, config: &FlashConfig) -> Result<Self> {
        Ok(Self {
            registry,
            classifier: config.classifier()?,
            options: FlashOptions::from(config),
            cancel: CancelToken::new(),
        })
    }

    /// Replace the dispatch options
    pub fn with_options(mut self, options: FlashOptions) -> Self {
        self.options = options;
        self
    }

    /// Token that interrupts running and pending attempts when cancelled
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Flash the devices a request targets
    ///
    /// # Errors
    ///
    /// [`Error::MissingSelector`] when neither a target nor a platform is
    /// given, [`Error::UnsupportedPlatform`] when no backend can flash the
    /// resolved platform, and [`Error::Backend`] when a vendor tool cannot be
    /// run at all. Everything else is reported as an [`Outcome`].
    pub fn flash(&self, request: &FlashRequest) -> Result<FlashStatus> {
        let target = request.target.as_ref().filter(|t| !t.is_empty());
        let platform = request.platform.as_deref().filter(|p| !p.is_empty());
        if target.is_none() && platform.is_none() {
            return Err(Error::MissingSelector);
        }

        let build = match Build::open(&request.build) {
            Ok(build) => build,
            Err(e) => {
                log::error!("{}", e);
                return Ok(FlashStatus::Single(Outcome::BuildNotFound));
            }
        };

        if let Some(outcome) = self.check_backend_name(&request.params) {
            return Ok(FlashStatus::Single(outcome));
        }

        let params = &request.params;
        match target {
            Some(TargetSpec::Ids(ids)) => {
                let filter = TargetFilter::Ids(ids.clone());
                self.flash_many(&build, platform, &filter, params)
                    .map(FlashStatus::Batch)
            }
            Some(TargetSpec::Id(id)) if self.selects_many(id) => {
                let filter = TargetFilter::from_id_or_prefix(id);
                if let TargetFilter::Prefix(prefix) = &filter {
                    log::debug!("'{}' is not a full target id, using it as a prefix", prefix);
                }
                self.flash_many(&build, platform, &filter, params)
                    .map(FlashStatus::Batch)
            }
            Some(TargetSpec::Id(id)) => self
                .flash_one(&build, Some(id.as_str()), platform, None, params)
                .map(FlashStatus::Single),
            None => self
                .flash_one(&build, None, platform, None, params)
                .map(FlashStatus::Single),
        }
    }

    /// Flash one device, found by exact target id or else by platform
    ///
    /// `inventory` pins the device set; without it the backends are asked
    /// for their devices.
    pub fn flash_one(
        &self,
        build: &Build,
        target_id: Option<&str>,
        platform: Option<&str>,
        inventory: Option<&[Device]>,
        params: &FlashParams,
    ) -> Result<Outcome> {
        let discovered;
        let inventory = match inventory {
            Some(inventory) => inventory,
            None => {
                discovered = self.registry.list_devices();
                &discovered
            }
        };

        let found = match (target_id, platform) {
            (Some(id), _) => selector::find_by_target_id(inventory, id),
            (None, Some(platform)) => selector::find_by_platform_name(inventory, platform),
            (None, None) => return Err(Error::MissingSelector),
        };
        let device = match found {
            Ok(device) => device,
            Err(e) => {
                log::error!("Could not map device: {}", e);
                return Ok(Outcome::TargetNotMapped);
            }
        };

        let platform = platform.unwrap_or(&device.platform_name);
        if !self.registry.supports(platform) {
            return Err(Error::UnsupportedPlatform(platform.to_string()));
        }

        let backend = match &params.backend {
            Some(name) => match self.registry.resolve_name(name) {
                Ok(backend) => backend,
                Err(e) => {
                    log::error!("{}", e);
                    return Ok(Outcome::UnknownBackend);
                }
            },
            None => self.registry.resolve(platform, &params.method)?,
        };

        if let Some(kind) = self.cancel.interrupted() {
            log_abort(kind);
            return Ok(Outcome::interrupted(kind));
        }

        log::debug!("Flashing: {}", device.target_id);
        let attempt = FlashAttempt {
            build,
            device,
            method: &params.method,
            no_reset: params.no_reset,
            timeout: self.options.attempt_timeout,
        };
        let outcome = self.attempt(backend, &attempt)?;

        if outcome.is_success() {
            log::info!("flash ready");
        } else {
            log::info!("flash fails");
        }
        Ok(outcome)
    }

    /// Flash every device matching `platform` and `targets`
    ///
    /// The inventory is taken once at the start of the batch and not
    /// refreshed while it runs.
    pub fn flash_many(
        &self,
        build: &Build,
        platform: Option<&str>,
        targets: &TargetFilter,
        params: &FlashParams,
    ) -> Result<BatchReport> {
        if let Some(outcome) = self.check_backend_name(params) {
            return Ok(BatchReport::refused(outcome));
        }

        let inventory = self.registry.list_devices();
        let devices = match selector::select(&inventory, platform, targets) {
            Ok(devices) => devices,
            Err(e @ SelectError::AmbiguousPlatform(_)) => {
                log::error!("{}", e);
                return Ok(BatchReport::refused(Outcome::NoPlatformGiven));
            }
            Err(e) => {
                log::error!("{}", e);
                return Ok(BatchReport::refused(Outcome::CouldNotMapTargetToDevice));
            }
        };

        log::info!("Going to flash following devices:");
        for device in &devices {
            log::info!("  {} ({})", device.target_id, device.platform_name);
        }

        if let Some(device) = devices
            .iter()
            .find(|d| !self.registry.supports(platform.unwrap_or(&d.platform_name)))
        {
            let platform = platform.unwrap_or(&device.platform_name);
            log::error!("{}: no backend supports {}", device.target_id, platform);
            return Err(Error::UnsupportedPlatform(platform.to_string()));
        }

        let mode = self.dispatch_mode(&params.method);
        if mode != self.options.dispatch {
            log::warn!(
                "'{}' is not reliable in parallel on {}, flashing sequentially",
                params.method,
                self.options.host_os
            );
        }

        let outcomes = match mode {
            DispatchMode::Sequential => devices
                .iter()
                .map(|device| self.attempt_in_batch(build, device, platform, &devices, params))
                .collect::<Vec<_>>(),
            DispatchMode::Parallel => self.dispatch_parallel(build, platform, &devices, params),
        };

        let mut report = BatchReport::default();
        for (index, (device, outcome)) in devices.iter().zip(outcomes).enumerate() {
            if outcome.is_success() {
                log::debug!("dev#{} -> SUCCESS ({})", index + 1, device.target_id);
            } else {
                log::warn!("dev#{} -> FAIL ({}: {})", index + 1, device.target_id, outcome);
            }
            report.results.push(DeviceResult {
                target_id: device.target_id.clone(),
                outcome,
            });
        }
        log::info!("{}/{} devices flashed", report.passed(), report.results.len());
        Ok(report)
    }

    /// Whether a single target id stands for several devices
    fn selects_many(&self, id: &str) -> bool {
        id.eq_ignore_ascii_case(ALL_TARGETS) || id.len() < self.options.target_id_length
    }

    /// Dispatch mode actually used for a method on this host
    pub fn dispatch_mode(&self, method: &FlashMethod) -> DispatchMode {
        let forced = self
            .options
            .sequential_methods
            .iter()
            .any(|m| method.is(m))
            && self.options.host_os != "windows";
        if forced {
            DispatchMode::Sequential
        } else {
            self.options.dispatch
        }
    }

    fn dispatch_parallel(
        &self,
        build: &Build,
        platform: Option<&str>,
        devices: &[Device],
        params: &FlashParams,
    ) -> Vec<Outcome> {
        thread::scope(|scope| {
            let handles: Vec<_> = devices
                .iter()
                .map(|device| {
                    scope.spawn(move || {
                        self.attempt_in_batch(build, device, platform, devices, params)
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        log::error!("Flashing thread panicked");
                        Outcome::UnknownFailure
                    })
                })
                .collect()
        })
    }

    /// Flash one device of a batch, isolating its failure from the others
    ///
    /// Platform support is checked for the whole batch before dispatch, so
    /// every error left here is specific to this device.
    fn attempt_in_batch(
        &self,
        build: &Build,
        device: &Device,
        platform: Option<&str>,
        inventory: &[Device],
        params: &FlashParams,
    ) -> Outcome {
        let target_id = Some(device.target_id.as_str());
        self.flash_one(build, target_id, platform, Some(inventory), params)
            .unwrap_or_else(|e| {
                log::error!("{}: {}", device.target_id, e);
                Outcome::UnknownFailure
            })
    }

    /// Run one attempt and classify it
    fn attempt(&self, backend: &dyn Backend, attempt: &FlashAttempt<'_>) -> Result<Outcome> {
        match backend.flash(attempt, &self.cancel) {
            Ok(signal) => Ok(self.classifier.classify(&signal)),
            Err(BackendError::Interrupted(kind)) => {
                log_abort(kind);
                Ok(Outcome::interrupted(kind))
            }
            Err(BackendError::TimedOut(timeout)) => {
                log::error!(
                    "{}: no result after {:?}, giving up",
                    attempt.device.target_id,
                    timeout
                );
                log_abort(InterruptKind::System);
                Ok(Outcome::InterruptedBySystem)
            }
            Err(source) if source.is_hard_fault() => Err(Error::Backend {
                backend: backend.name().to_string(),
                source,
            }),
            Err(e) => {
                log::error!("{}: {}: {}", backend.name(), attempt.device.target_id, e);
                Ok(Outcome::UnknownFailure)
            }
        }
    }

    fn check_backend_name(&self, params: &FlashParams) -> Option<Outcome> {
        let name = params.backend.as_deref()?;
        match self.registry.resolve_name(name) {
            Ok(_) => None,
            Err(e) => {
                log::error!("{}", e);
                Some(Outcome::UnknownBackend)
            }
        }
    }
}

fn log_abort(kind: InterruptKind) {
    match kind {
        InterruptKind::User => log::error!("Aborted by user"),
        InterruptKind::System => log::error!("Aborted by system"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boardflash_core::outcome::FailureCategory;
    use boardflash_dummy::{DummyBackend, DummyResponse};
    use std::fs;
    use std::sync::Arc;

    const K64F_1: &str = "0240000032044e4500257009997b00386781000097969900";
    const K64F_2: &str = "0240000032044e4500257009997b00386781000097969901";
    const K64F_3: &str = "0240000032044e4500257009997b00386781000097969902";
    const NUCLEO: &str = "0720000032044e4500257009997b00386781000097969903";

    struct Fixture {
        _dir: tempfile::TempDir,
        build: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let build = dir.path().join("app.bin");
        fs::write(&build, [0x00, 0x20, 0x00, 0x20]).unwrap();
        Fixture { _dir: dir, build }
    }

    fn k64f_boards() -> DummyBackend {
        DummyBackend::new("mbed")
            .with_device(Device::new(K64F_1, "K64F"))
            .with_device(Device::new(K64F_2, "K64F"))
            .with_device(Device::new(K64F_3, "K64F"))
    }

    /// Lists devices but claims no platforms
    struct Orphan(Vec<Device>);

    impl Backend for Orphan {
        fn name(&self) -> &str {
            "orphan"
        }

        fn supported_platforms(&self) -> &std::collections::BTreeSet<String> {
            static NONE: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
            &NONE
        }

        fn list_devices(&self) -> Vec<Device> {
            self.0.clone()
        }

        fn flash(
            &self,
            _attempt: &FlashAttempt<'_>,
            _cancel: &CancelToken,
        ) -> std::result::Result<boardflash_core::backend::FlashSignal, BackendError> {
            panic!("orphan devices are never flashed");
        }
    }

    fn flasher(backend: impl Backend + 'static) -> Flasher {
        Flasher::new(BackendRegistry::new().with(backend))
    }

    #[test]
    fn test_single_device_success() {
        let fx = fixture();
        let dummy = Arc::new(k64f_boards());
        let flasher = flasher(dummy.clone());

        let status = flasher
            .flash(&FlashRequest::new(&fx.build).target_id(K64F_2))
            .unwrap();
        assert_eq!(status, FlashStatus::Single(Outcome::Success));
        assert_eq!(dummy.flashed(K64F_2), Some(vec![0x00, 0x20, 0x00, 0x20]));
        assert_eq!(dummy.flashed(K64F_1), None);
    }

    #[test]
    fn test_platform_only_flashes_first_of_platform() {
        let fx = fixture();
        let dummy = Arc::new(k64f_boards());
        let flasher = flasher(dummy.clone());

        let status = flasher
            .flash(&FlashRequest::new(&fx.build).platform("K64F"))
            .unwrap();
        assert_eq!(status.code(), 0);
        let calls = dummy.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].target_id, K64F_1);
    }

    #[test]
    fn test_missing_selector() {
        let fx = fixture();
        let flasher = flasher(k64f_boards());
        assert!(matches!(
            flasher.flash(&FlashRequest::new(&fx.build)),
            Err(Error::MissingSelector)
        ));
        // Empty selectors count as absent
        assert!(matches!(
            flasher.flash(&FlashRequest::new(&fx.build).target_id("").platform("")),
            Err(Error::MissingSelector)
        ));
    }

    #[test]
    fn test_build_not_found() {
        let fx = fixture();
        let dummy = Arc::new(k64f_boards());
        let flasher = flasher(dummy.clone());

        let missing = fx.build.with_file_name("missing.bin");
        let status = flasher
            .flash(&FlashRequest::new(missing).target_id("all").platform("K64F"))
            .unwrap();
        assert_eq!(status, FlashStatus::Single(Outcome::BuildNotFound));
        assert_eq!(status.code(), 45);
        assert!(dummy.calls().is_empty());

        let empty = fx.build.with_file_name("empty.bin");
        fs::write(&empty, b"").unwrap();
        let status = flasher
            .flash(&FlashRequest::new(empty).target_id(K64F_1))
            .unwrap();
        assert_eq!(status.code(), 45);
    }

    #[test]
    fn test_target_not_mapped() {
        let fx = fixture();
        let flasher = flasher(k64f_boards());
        let unknown = "0240000032044e4500257009997b00386781000097969999";
        let status = flasher
            .flash(&FlashRequest::new(&fx.build).target_id(unknown))
            .unwrap();
        assert_eq!(status, FlashStatus::Single(Outcome::TargetNotMapped));
        assert_eq!(status.code(), 55);

        let status = flasher
            .flash(&FlashRequest::new(&fx.build).platform("NRF51_DK"))
            .unwrap();
        assert_eq!(status.code(), 55);
    }

    #[test]
    fn test_unsupported_platform() {
        let fx = fixture();
        let flasher = flasher(k64f_boards());
        let build = Build::open(&fx.build).unwrap();
        let inventory = vec![Device::new(NUCLEO, "NUCLEO_F401RE")];
        let result = flasher.flash_one(
            &build,
            Some(NUCLEO),
            None,
            Some(&inventory),
            &FlashParams::default(),
        );
        assert!(matches!(
            result,
            Err(Error::UnsupportedPlatform(p)) if p == "NUCLEO_F401RE"
        ));
    }

    #[test]
    fn test_unknown_backend() {
        let fx = fixture();
        let dummy = Arc::new(k64f_boards());
        let flasher = flasher(dummy.clone());

        let status = flasher
            .flash(&FlashRequest::new(&fx.build).target_id(K64F_1).backend("edbg"))
            .unwrap();
        assert_eq!(status, FlashStatus::Single(Outcome::UnknownBackend));
        assert_eq!(status.code(), 65);
        assert!(dummy.calls().is_empty());
    }

    #[test]
    fn test_explicit_backend_overrides_platform() {
        let fx = fixture();
        let mbed = Arc::new(k64f_boards());
        let spare = Arc::new(DummyBackend::new("spare").with_platform("K64F"));
        let flasher = Flasher::new(
            BackendRegistry::new()
                .with(mbed.clone())
                .with(spare.clone()),
        );

        let build = Build::open(&fx.build).unwrap();
        let inventory = mbed.list_devices();
        let params = FlashParams {
            backend: Some("SPARE".into()),
            ..FlashParams::default()
        };
        let outcome = flasher
            .flash_one(&build, Some(K64F_1), None, Some(&inventory), &params)
            .unwrap();
        assert_eq!(outcome, Outcome::Success);
        assert!(mbed.calls().is_empty());
        assert_eq!(spare.calls().len(), 1);
    }

    #[test]
    fn test_all_flashes_every_device() {
        let fx = fixture();
        let dummy = Arc::new(k64f_boards());
        let flasher = flasher(dummy.clone());

        let status = flasher
            .flash(&FlashRequest::new(&fx.build).target_id("all").platform("K64F"))
            .unwrap();
        let FlashStatus::Batch(report) = status else {
            panic!("expected a batch");
        };
        assert_eq!(report.status(), 0);
        assert_eq!(report.passed(), 3);
        let ids: Vec<&str> = report.results().iter().map(|r| r.target_id.as_str()).collect();
        assert_eq!(ids, [K64F_1, K64F_2, K64F_3]);
    }

    #[test]
    fn test_short_id_is_a_prefix() {
        let fx = fixture();
        let dummy = Arc::new(
            k64f_boards().with_device(Device::new(NUCLEO, "NUCLEO_F401RE")),
        );
        let flasher = flasher(dummy.clone());

        let status = flasher
            .flash(&FlashRequest::new(&fx.build).target_id("0720"))
            .unwrap();
        let FlashStatus::Batch(report) = status else {
            panic!("expected a batch");
        };
        assert_eq!(report.results().len(), 1);
        assert_eq!(report.results()[0].target_id, NUCLEO);
    }

    #[test]
    fn test_prefix_length_is_configurable() {
        let fx = fixture();
        let dummy = Arc::new(DummyBackend::new("mbed").with_device(Device::new("0240", "K64F")));
        let flasher = flasher(dummy.clone()).with_options(FlashOptions {
            target_id_length: 4,
            ..FlashOptions::default()
        });
        let status = flasher
            .flash(&FlashRequest::new(&fx.build).target_id("0240"))
            .unwrap();
        assert_eq!(status, FlashStatus::Single(Outcome::Success));
    }

    #[test]
    fn test_explicit_id_list() {
        let fx = fixture();
        let dummy = Arc::new(k64f_boards());
        let flasher = flasher(dummy.clone());

        let status = flasher
            .flash(
                &FlashRequest::new(&fx.build)
                    .target_ids(vec![K64F_3.to_string(), K64F_1.to_string()]),
            )
            .unwrap();
        let FlashStatus::Batch(report) = status else {
            panic!("expected a batch");
        };
        // Inventory order, not request order
        let ids: Vec<&str> = report.results().iter().map(|r| r.target_id.as_str()).collect();
        assert_eq!(ids, [K64F_1, K64F_3]);
        assert_eq!(dummy.flashed(K64F_2), None);
    }

    #[test]
    fn test_ambiguous_platform_refused() {
        let fx = fixture();
        let dummy = Arc::new(
            k64f_boards().with_device(Device::new(NUCLEO, "NUCLEO_F401RE")),
        );
        let flasher = flasher(dummy.clone());

        let status = flasher
            .flash(&FlashRequest::new(&fx.build).target_id("all"))
            .unwrap();
        assert_eq!(status.code(), 35);
        assert!(dummy.calls().is_empty());
    }

    #[test]
    fn test_no_matching_devices() {
        let fx = fixture();
        let dummy = Arc::new(
            k64f_boards().with_device(Device::new(NUCLEO, "NUCLEO_F401RE")),
        );
        let flasher = flasher(dummy.clone());

        // Platform filter first, then the prefix narrows within it
        let status = flasher
            .flash(&FlashRequest::new(&fx.build).target_id("0720").platform("K64F"))
            .unwrap();
        let FlashStatus::Batch(report) = status else {
            panic!("expected a batch");
        };
        assert_eq!(report.refusal(), Some(Outcome::CouldNotMapTargetToDevice));
        assert_eq!(report.status(), 40);
        assert!(dummy.calls().is_empty());
    }

    #[test]
    fn test_batch_continues_after_failures() {
        let fx = fixture();
        let mount = tempfile::tempdir().unwrap();
        let dummy = Arc::new(
            DummyBackend::new("mbed")
                .with_device(Device::new(K64F_1, "K64F").with_mount_point(mount.path()))
                .with_device(Device::new(K64F_2, "K64F"))
                .with_device(Device::new(K64F_3, "K64F"))
                .with_response(
                    K64F_1,
                    DummyResponse::FailMarker("The transfer timed out.".into()),
                )
                .with_response(K64F_2, DummyResponse::Interrupt(InterruptKind::User)),
        );
        let flasher = flasher(dummy.clone());

        let status = flasher
            .flash(&FlashRequest::new(&fx.build).target_id("all").platform("K64F"))
            .unwrap();
        let FlashStatus::Batch(report) = status else {
            panic!("expected a batch");
        };
        let outcomes: Vec<Outcome> = report.results().iter().map(|r| r.outcome).collect();
        assert_eq!(
            outcomes,
            [
                Outcome::Failure(FailureCategory::Image),
                Outcome::InterruptedByUser,
                Outcome::Success,
            ]
        );
        assert_eq!(report.status(), 3 + 50);
        assert_eq!(report.passed(), 1);
        assert_eq!(dummy.calls().len(), 3);
    }

    #[test]
    fn test_tool_exit_code_summed() {
        let fx = fixture();
        let dummy = k64f_boards()
            .with_response(K64F_1, DummyResponse::ReturnCode(2))
            .with_response(K64F_3, DummyResponse::ReturnCode(7));
        let flasher = flasher(dummy);

        let status = flasher
            .flash(&FlashRequest::new(&fx.build).target_id("all"))
            .unwrap();
        assert_eq!(status.code(), 9);
        assert!(!status.is_success());
    }

    #[test]
    fn test_negative_exit_codes_do_not_cancel_out() {
        let fx = fixture();
        let dummy = DummyBackend::new("mbed")
            .with_device(Device::new(K64F_1, "K64F"))
            .with_device(Device::new(K64F_2, "K64F"))
            .with_response(K64F_1, DummyResponse::ReturnCode(-1))
            .with_response(K64F_2, DummyResponse::ReturnCode(1));
        let flasher = flasher(dummy);

        let status = flasher
            .flash(&FlashRequest::new(&fx.build).target_id("all"))
            .unwrap();
        let FlashStatus::Batch(report) = &status else {
            panic!("expected a batch");
        };
        assert_eq!(report.passed(), 0);
        assert!(!report.is_success());
        assert_eq!(status.code(), 2);
        assert_eq!(status.exit_code(), 2);
        assert!(!status.is_success());
    }

    #[test]
    fn test_unsupported_platform_refuses_batch_before_flashing() {
        let fx = fixture();
        let orphan = Arc::new(Orphan(vec![Device::new(NUCLEO, "UNKNOWN_BOARD")]));
        let dummy = Arc::new(DummyBackend::new("mbed").with_device(Device::new(K64F_1, "K64F")));
        let flasher = Flasher::new(
            BackendRegistry::new()
                .with(orphan.clone())
                .with(dummy.clone()),
        );

        let result = flasher.flash(
            &FlashRequest::new(&fx.build)
                .target_ids(vec![NUCLEO.to_string(), K64F_1.to_string()]),
        );
        assert!(matches!(
            result,
            Err(Error::UnsupportedPlatform(p)) if p == "UNKNOWN_BOARD"
        ));
        assert!(dummy.calls().is_empty());
    }

    #[test]
    fn test_timeout_reported_as_system_interrupt() {
        let fx = fixture();
        let dummy = k64f_boards().with_response(K64F_2, DummyResponse::TimedOut);
        let flasher = flasher(dummy);

        let status = flasher
            .flash(&FlashRequest::new(&fx.build).target_id(K64F_2))
            .unwrap();
        assert_eq!(status, FlashStatus::Single(Outcome::InterruptedBySystem));
        assert_eq!(status.exit_code(), 60);

        let status = flasher
            .flash(&FlashRequest::new(&fx.build).target_id("all"))
            .unwrap();
        let FlashStatus::Batch(report) = status else {
            panic!("expected a batch");
        };
        let outcomes: Vec<Outcome> = report.results().iter().map(|r| r.outcome).collect();
        assert_eq!(
            outcomes,
            [Outcome::Success, Outcome::InterruptedBySystem, Outcome::Success]
        );
        // The token is left alone; only the timed out attempt is affected
        assert_eq!(flasher.cancel_token().interrupted(), None);
    }

    #[test]
    fn test_hard_fault_isolated_in_batch() {
        let fx = fixture();
        let dummy = k64f_boards().with_response(K64F_2, DummyResponse::ToolMissing);
        let flasher = flasher(dummy);

        let status = flasher
            .flash(&FlashRequest::new(&fx.build).target_id("all"))
            .unwrap();
        let FlashStatus::Batch(report) = status else {
            panic!("expected a batch");
        };
        assert_eq!(report.results()[1].outcome, Outcome::UnknownFailure);
        assert_eq!(report.passed(), 2);
    }

    #[test]
    fn test_hard_fault_propagates_for_single_device() {
        let fx = fixture();
        let dummy = k64f_boards().with_response(K64F_2, DummyResponse::ToolMissing);
        let flasher = flasher(dummy);
        assert!(matches!(
            flasher.flash(&FlashRequest::new(&fx.build).target_id(K64F_2)),
            Err(Error::Backend { backend, .. }) if backend == "mbed"
        ));
    }

    #[test]
    fn test_cancelled_batch_reports_interrupts() {
        let fx = fixture();
        let dummy = Arc::new(k64f_boards());
        let flasher = flasher(dummy.clone());
        flasher.cancel_token().cancel(InterruptKind::System);

        let status = flasher
            .flash(&FlashRequest::new(&fx.build).target_id("all"))
            .unwrap();
        let FlashStatus::Batch(report) = status else {
            panic!("expected a batch");
        };
        assert_eq!(report.results().len(), 3);
        assert!(report
            .results()
            .iter()
            .all(|r| r.outcome == Outcome::InterruptedBySystem));
        assert!(dummy.calls().is_empty());
    }

    #[test]
    fn test_idempotent_outcome() {
        let fx = fixture();
        let mount = tempfile::tempdir().unwrap();
        fs::write(
            mount.path().join("FAIL.TXT"),
            "The interface firmware FAILED to unlock the target",
        )
        .unwrap();
        let dummy = DummyBackend::new("mbed")
            .with_device(Device::new(K64F_1, "K64F").with_mount_point(mount.path()))
            .with_response(K64F_1, DummyResponse::FailMarker(String::new()));
        let flasher = flasher(dummy);
        let request = FlashRequest::new(&fx.build).target_id(K64F_1);

        let first = flasher.flash(&request).unwrap();
        let second = flasher.flash(&request).unwrap();
        assert_eq!(
            first,
            FlashStatus::Single(Outcome::Failure(FailureCategory::Interface))
        );
        assert_eq!(first, second);
    }

    #[test]
    fn test_method_forces_sequential_dispatch() {
        let fx = fixture();
        let dummy = Arc::new(
            k64f_boards()
                .with_methods(&["pyocd"])
                .with_delay(Duration::from_millis(30)),
        );
        let flasher = flasher(dummy.clone()).with_options(FlashOptions {
            dispatch: DispatchMode::Parallel,
            host_os: "linux".into(),
            ..FlashOptions::default()
        });
        assert_eq!(
            flasher.dispatch_mode(&FlashMethod::new("pyocd")),
            DispatchMode::Sequential
        );

        let status = flasher
            .flash(&FlashRequest::new(&fx.build).target_id("all").method("pyocd"))
            .unwrap();
        assert_eq!(status.code(), 0);

        let mut calls = dummy.calls();
        assert_eq!(calls.len(), 3);
        calls.sort_by_key(|c| c.started);
        for pair in calls.windows(2) {
            assert!(
                pair[0].finished <= pair[1].started,
                "{} overlaps {}",
                pair[0].target_id,
                pair[1].target_id
            );
        }
    }

    #[test]
    fn test_dispatch_mode_per_host() {
        let flasher = flasher(k64f_boards());
        let pyocd = FlashMethod::new("pyocd");

        let windows = flasher.with_options(FlashOptions {
            dispatch: DispatchMode::Parallel,
            host_os: "windows".into(),
            ..FlashOptions::default()
        });
        assert_eq!(windows.dispatch_mode(&pyocd), DispatchMode::Parallel);
        assert_eq!(
            windows.dispatch_mode(&FlashMethod::default()),
            DispatchMode::Parallel
        );

        let linux = windows.with_options(FlashOptions {
            dispatch: DispatchMode::Parallel,
            host_os: "linux".into(),
            ..FlashOptions::default()
        });
        assert_eq!(linux.dispatch_mode(&pyocd), DispatchMode::Sequential);
        assert_eq!(
            linux.dispatch_mode(&FlashMethod::default()),
            DispatchMode::Parallel
        );
    }

    #[test]
    fn test_parallel_results_in_inventory_order() {
        let fx = fixture();
        let dummy = Arc::new(
            k64f_boards()
                .with_delay(Duration::from_millis(10))
                .with_response(K64F_2, DummyResponse::ReturnCode(4)),
        );
        let flasher = flasher(dummy.clone()).with_options(FlashOptions {
            dispatch: DispatchMode::Parallel,
            ..FlashOptions::default()
        });

        let status = flasher
            .flash(&FlashRequest::new(&fx.build).target_id("all"))
            .unwrap();
        let FlashStatus::Batch(report) = status else {
            panic!("expected a batch");
        };
        let ids: Vec<&str> = report.results().iter().map(|r| r.target_id.as_str()).collect();
        assert_eq!(ids, [K64F_1, K64F_2, K64F_3]);
        assert_eq!(report.results()[1].outcome, Outcome::ToolExit(4));
        assert_eq!(dummy.calls().len(), 3);
    }

    #[test]
    fn test_exit_code_clamped() {
        let report = BatchReport {
            refused: None,
            results: (0..6)
                .map(|i| DeviceResult {
                    target_id: i.to_string(),
                    outcome: Outcome::InterruptedByUser,
                })
                .collect(),
        };
        let status = FlashStatus::Batch(report);
        assert_eq!(status.code(), 300);
        assert_eq!(status.exit_code(), 255);
        assert_eq!(FlashStatus::Single(Outcome::ToolExit(-1)).exit_code(), 255);
        assert_eq!(FlashStatus::Single(Outcome::Success).exit_code(), 0);
    }
}
