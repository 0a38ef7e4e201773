//! Configuration loader for YAML files and environment overrides
//!
//! The environment always wins over the file, so a deployment can ship one
//! YAML file and tune images or limits per host.

use crate::config::types::*;
use crate::errors::SandboxError;
use std::env;
use std::path::{Path, PathBuf};
use tokio::fs;

pub const ENV_PYTHON_IMAGE: &str = "SANDBOX_BASE_PYTHON_IMAGE";
pub const ENV_NODEJS_IMAGE: &str = "SANDBOX_BASE_NODEJS_IMAGE";
pub const ENV_CONTAINER_RUNTIME: &str = "SANDBOX_CONTAINER_RUNTIME";
pub const ENV_MAX_MEMORY: &str = "SANDBOX_MAX_MEMORY";
pub const ENV_ENABLE_SECCOMP: &str = "SANDBOX_ENABLE_SECCOMP";
pub const ENV_SECCOMP_PROFILE: &str = "SANDBOX_SECCOMP_PROFILE";
pub const ENV_POOL_SIZE: &str = "SANDBOX_EXECUTOR_MANAGER_POOL_SIZE";
pub const ENV_RUNTIME_CALL_TIMEOUT: &str = "SANDBOX_RUNTIME_CALL_TIMEOUT";
pub const ENV_ALLOCATE_TIMEOUT: &str = "SANDBOX_ALLOCATE_TIMEOUT";
pub const ENV_EXEC_TIMEOUT: &str = "SANDBOX_EXEC_TIMEOUT";

/// Configuration loader with environment resolution
pub struct ConfigLoader;

impl ConfigLoader {
    /// Defaults overlaid with the process environment
    pub fn from_env() -> Result<SandboxConfig, SandboxError> {
        let mut config = SandboxConfig::default();
        Self::apply_env_overrides(&mut config)?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a YAML file, then apply environment overrides
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<SandboxConfig, SandboxError> {
        let path = path.as_ref();

        let content = fs::read_to_string(path).await.map_err(|e| {
            SandboxError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        Self::from_str(&content)
    }

    /// Load configuration from a YAML string, then apply environment overrides
    pub fn from_str(content: &str) -> Result<SandboxConfig, SandboxError> {
        let mut config: SandboxConfig = serde_yaml::from_str(content)
            .map_err(|e| SandboxError::ConfigError(format!("Failed to parse YAML config: {}", e)))?;

        Self::apply_env_overrides(&mut config)?;
        Self::validate(&config)?;
        Ok(config)
    }

    pub fn apply_env_overrides(config: &mut SandboxConfig) -> Result<(), SandboxError> {
        if let Some(image) = read_var(ENV_PYTHON_IMAGE) {
            config.images.python = image;
        }
        if let Some(image) = read_var(ENV_NODEJS_IMAGE) {
            config.images.nodejs = image;
        }
        // An explicitly empty value selects the engine's default runtime
        if let Ok(runtime) = env::var(ENV_CONTAINER_RUNTIME) {
            config.container_runtime = runtime.trim().to_string();
        }
        if let Some(memory) = read_var(ENV_MAX_MEMORY) {
            config.max_memory = memory;
        }
        if let Some(flag) = read_var(ENV_ENABLE_SECCOMP) {
            config.enable_seccomp = parse_bool(ENV_ENABLE_SECCOMP, &flag)?;
        }
        if let Some(profile) = read_var(ENV_SECCOMP_PROFILE) {
            config.seccomp_profile = PathBuf::from(profile);
        }
        if let Some(size) = read_var(ENV_POOL_SIZE) {
            config.pool_size = parse_number(ENV_POOL_SIZE, &size)? as usize;
        }
        if let Some(secs) = read_var(ENV_RUNTIME_CALL_TIMEOUT) {
            config.timeouts.runtime_call = parse_number(ENV_RUNTIME_CALL_TIMEOUT, &secs)?;
        }
        if let Some(secs) = read_var(ENV_ALLOCATE_TIMEOUT) {
            config.timeouts.allocate = parse_number(ENV_ALLOCATE_TIMEOUT, &secs)?;
        }
        if let Some(secs) = read_var(ENV_EXEC_TIMEOUT) {
            config.timeouts.exec = parse_number(ENV_EXEC_TIMEOUT, &secs)?;
        }
        Ok(())
    }

    /// Reject values that would leave the pool unusable
    pub fn validate(config: &SandboxConfig) -> Result<(), SandboxError> {
        if config.images.python.trim().is_empty() || config.images.nodejs.trim().is_empty() {
            return Err(SandboxError::ConfigError(
                "Base image names must not be empty".to_string(),
            ));
        }
        if config.timeouts.runtime_call == 0 {
            return Err(SandboxError::ConfigError(
                "Runtime call timeout must be at least one second".to_string(),
            ));
        }
        Ok(())
    }
}

fn read_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_bool(name: &str, value: &str) -> Result<bool, SandboxError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(SandboxError::ConfigError(format!(
            "{} must be a boolean, got '{}'",
            name, other
        ))),
    }
}

fn parse_number(name: &str, value: &str) -> Result<u64, SandboxError> {
    value.parse::<u64>().map_err(|_| {
        SandboxError::ConfigError(format!(
            "{} must be a non-negative integer, got '{}'",
            name, value
        ))
    })
}
