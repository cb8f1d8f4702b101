//! Error types for boardflash-core

use crate::backend::BackendError;
use crate::config::ConfigError;
use thiserror::Error;

/// Errors that abort a flash request instead of producing an [`Outcome`](crate::Outcome)
#[derive(Debug, Error)]
pub enum Error {
    /// Neither a target id nor a platform name was given
    #[error("target_id or platform_name is required")]
    MissingSelector,

    /// No registered backend supports the platform
    #[error("platform '{0}' is not supported by any registered backend")]
    UnsupportedPlatform(String),

    /// A backend was requested by name but none is registered under it
    #[error("requested flasher '{0}' does not exist")]
    UnknownBackend(String),

    /// The backend hit a hard fault (for example the vendor tool is missing)
    #[error("backend '{backend}' failed: {source}")]
    Backend {
        /// Name of the failing backend
        backend: String,
        /// What went wrong
        #[source]
        source: BackendError,
    },

    /// Configuration is invalid
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type alias using the core Error type
pub type Result<T> = std::result::Result<T, Error>;
