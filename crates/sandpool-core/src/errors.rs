//! Error types for the sandbox subsystem
//!
//! Two layers are distinguished. `RuntimeError` describes a failed call across
//! the container engine boundary; the pool catches every one of these at its
//! own API and turns it into a boolean or an empty handle. `SandboxError` is
//! what the execution coordinator and configuration loader hand back to their
//! callers, where a rejected submission or an exhausted pool is something the
//! caller has to act on.

use thiserror::Error;

use crate::security::SecurityFinding;

// Errors raised by a container runtime adapter
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Bollard (Docker client) error: {0}")]
    BollardError(#[from] bollard::errors::Error),
    #[error("Runtime call '{operation}' timed out after {seconds}s")]
    Timeout { operation: &'static str, seconds: u64 },
    #[error("Container not found: {0}")]
    NotFound(String),
    #[error("Command in container {container} failed with exit code {exit_code:?}: {stderr}")]
    CommandFailed {
        container: String,
        exit_code: Option<i64>,
        stderr: String,
    },
    #[error("Could not read seccomp profile {path}: {source}")]
    SeccompProfile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error during runtime operation: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Runtime error: {0}")]
    Other(String),
}

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Container runtime error: {0}")]
    Runtime(#[from] RuntimeError),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),
    #[error("Code rejected by security analysis ({} finding(s))", .0.len())]
    UnsafeCode(Vec<SecurityFinding>),
    #[error("No {language} container became available within {seconds}s")]
    CapacityExhausted { language: String, seconds: u64 },
    #[error("All {language} containers are busy")]
    OverCapacity { language: String },
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl SandboxError {
    /// Worth retrying later with the same request
    pub fn is_capacity(&self) -> bool {
        matches!(
            self,
            SandboxError::CapacityExhausted { .. } | SandboxError::OverCapacity { .. }
        )
    }
}
