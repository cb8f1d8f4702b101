//! High-level board flashing
//!
//! This crate ties the vendor backends together. The CLI only needs the
//! types exported here plus the core records.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CLI (bin/boardflash)                     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  boardflash-flash (this crate)               │
//! │  - Flasher: single/multi-device dispatch, interrupts        │
//! │  - BackendRegistry: backends by name and by platform        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!              ┌───────────────┴───────────────┐
//!              ▼                               ▼
//! ┌──────────────────────────┐   ┌──────────────────────────┐
//! │    boardflash-core       │   │  Backend crates          │
//! │  - Backend trait         │   │  - msd, stlink, pyocd,   │
//! │  - Selector, Classifier  │   │    dummy                 │
//! │  - Config                │   │  - Implement Backend     │
//! └──────────────────────────┘   └──────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use boardflash_flash::{BackendRegistry, FlashRequest, Flasher};
//!
//! let config = FlashConfig::default();
//! let flasher = Flasher::from_config(BackendRegistry::from_config(&config), &config)?;
//! let status = flasher.flash(&FlashRequest::new("app.bin").platform("K64F").target_id("all"))?;
//! std::process::exit(status.exit_code());
//! ```

mod flasher;
mod registry;

pub use flasher::{
    BatchReport, DeviceResult, FlashOptions, FlashParams, FlashRequest, FlashStatus, Flasher,
    TargetSpec,
};
pub use registry::{available_backends, backend_names_short, BackendInfo, BackendRegistry};

// Re-export core types that CLI needs
pub use boardflash_core::config::{DispatchMode, FlashConfig};
pub use boardflash_core::selector::TargetFilter;
pub use boardflash_core::{Build, CancelToken, Device, FlashMethod, InterruptKind, Outcome};
