//! boardflash-msd - Mass-storage flashing backend
//!
//! Boards running DAPLink (or the older MBED interface firmware) show up as
//! a USB drive. Copying a binary onto that drive programs the target.
//!
//! # Discovery
//!
//! Every directory under the configured mount roots (and one level below,
//! for per-user automount directories) holding `MBED.HTM` or `DETAILS.TXT`
//! is an interface volume. The target id comes from `DETAILS.TXT`
//! (`Unique ID:`) or from the `code=` parameter in `MBED.HTM`.
//!
//! # Verification
//!
//! The backend does not interpret the result itself. It reports a marker
//! signal and the classifier looks for `FAIL.TXT` on the remounted volume.

pub mod discovery;
pub mod error;

mod device;

pub use device::{MassStorage, METHODS, NAME};
pub use error::{MsdError, Result};
