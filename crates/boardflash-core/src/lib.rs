//! boardflash-core - Core library for flashing development boards
//!
//! This crate holds everything that is independent of a particular vendor
//! flashing tool:
//!
//! - [`Device`] and [`Build`] records
//! - the [`Backend`](backend::Backend) capability trait every vendor backend implements
//! - the device [`selector`] that narrows an inventory to the boards a request targets
//! - the outcome [`classifier`] that turns return codes and failure marker
//!   files into a closed set of [`Outcome`] codes
//! - configuration loading and a small subprocess runner shared by the
//!   tool-driven backends
//!
//! # Example
//!
//! ```ignore
//! use boardflash_core::classifier::Classifier;
//! use boardflash_core::{FailureCategory, Outcome};
//!
//! let classifier = Classifier::default();
//! assert_eq!(
//!     classifier.classify_text("The transfer timed out."),
//!     Outcome::Failure(FailureCategory::Image),
//! );
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod backend;
pub mod cancel;
pub mod classifier;
pub mod config;
pub mod device;
pub mod error;
pub mod outcome;
pub mod selector;
pub mod tool;

pub use backend::{Backend, BackendError, FlashAttempt, FlashMethod, FlashSignal};
pub use cancel::CancelToken;
pub use device::{Build, BuildError, Device};
pub use error::{Error, Result};
pub use outcome::{FailureCategory, InterruptKind, Outcome};
