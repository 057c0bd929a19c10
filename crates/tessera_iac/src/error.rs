//! Error types for the IaC module.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for IaC operations.
pub type IacResult<T> = Result<T, IacError>;

/// Errors that can occur while preparing or running deployments.
#[derive(Error, Debug)]
pub enum IacError {
    #[error("Provider tool not available: {0}")]
    ToolNotAvailable(String),

    #[error("Unknown resource kind: {0}")]
    UnknownKind(String),

    #[error("Module for kind '{kind}' not found at {path}")]
    ModuleNotFound { kind: String, path: PathBuf },

    #[error("No resource group configured for '{0}'")]
    MissingResourceGroup(String),

    #[error("Unexpected provider output: {0}")]
    InvalidResponse(String),

    #[error("Runner error: {0}")]
    Runner(#[from] tessera_runner::RunnerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
