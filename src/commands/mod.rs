//! CLI command implementations
//!
//! ## Flash command
//!
//! `flash` builds a request from the command line, hands it to the
//! orchestrator and turns the result into the process exit code.
//!
//! ## List commands
//!
//! The list commands print what the registry knows: attached boards,
//! compiled-in backends and supported platforms.

pub mod flash;
mod list;

pub use list::{list_backends, list_devices, list_platforms};
