//! Error types for pyOCD output handling

use thiserror::Error;

/// pyOCD specific errors
#[derive(Debug, Error)]
pub enum PyocdError {
    /// `pyocd json` printed something that is not the expected document
    #[error("invalid probe list: {0}")]
    Json(#[from] serde_json::Error),

    /// `pyocd json` reported a failure in its status field
    #[error("pyocd reported status {0}")]
    Status(i32),
}

/// Result type for pyOCD operations
pub type Result<T> = std::result::Result<T, PyocdError>;
