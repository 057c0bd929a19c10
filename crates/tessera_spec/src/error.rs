//! Error types for the spec module.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for spec operations.
pub type SpecResult<T> = Result<T, SpecError>;

/// Errors that can occur while loading documents and parameters.
#[derive(Error, Debug)]
pub enum SpecError {
    #[error("Template not found at path: {0}")]
    NotFound(PathBuf),

    #[error("Invalid document format in file {path}: {message}")]
    InvalidFormat { path: PathBuf, message: String },

    #[error("Missing value for parameter '{0}' (no default declared)")]
    MissingParameter(String),

    #[error("Invalid value for parameter '{name}': {message}")]
    InvalidParameter { name: String, message: String },

    #[error("Invalid parameter override '{0}': expected key=value")]
    InvalidOverride(String),

    #[error("Conflicting declarations for '{0}' across template files")]
    Conflict(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}
