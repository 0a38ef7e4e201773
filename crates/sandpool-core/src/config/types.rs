//! Configuration types for the sandbox pool
//!
//! Every field carries a default so that a partial YAML file, or no file at
//! all, still produces a usable configuration. Environment overrides are
//! applied on top by the loader.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use crate::language::Language;

pub const DEFAULT_PYTHON_IMAGE: &str = "sandbox-base-python:latest";
pub const DEFAULT_NODEJS_IMAGE: &str = "sandbox-base-nodejs:latest";
pub const DEFAULT_CONTAINER_RUNTIME: &str = "runsc";
pub const DEFAULT_MAX_MEMORY: &str = "256m";
pub const DEFAULT_SECCOMP_PROFILE: &str = "/app/seccomp-profile-default.json";

/// Top-level sandbox configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SandboxConfig {
    #[serde(default)]
    pub images: ImageConfig,

    /// OCI runtime handed to the engine; empty means the engine default
    #[serde(default = "default_container_runtime")]
    pub container_runtime: String,

    /// Memory ceiling with an optional unit suffix (b, k, m, g)
    #[serde(default = "default_max_memory")]
    pub max_memory: String,

    #[serde(default)]
    pub enable_seccomp: bool,

    #[serde(default = "default_seccomp_profile")]
    pub seccomp_profile: PathBuf,

    /// Containers provisioned per language
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

/// Base image per language
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageConfig {
    #[serde(default = "default_python_image")]
    pub python: String,
    #[serde(default = "default_nodejs_image")]
    pub nodejs: String,
}

/// Timeouts, in seconds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeoutConfig {
    /// Bound on every single call to the container engine
    #[serde(default = "default_runtime_call_timeout")]
    pub runtime_call: u64,
    /// How long a request waits for a free container
    #[serde(default = "default_allocate_timeout")]
    pub allocate: u64,
    /// Wall-clock limit for one program run
    #[serde(default = "default_exec_timeout")]
    pub exec: u64,
}

/// A validated memory ceiling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryLimit {
    pub raw: String,
    pub bytes: i64,
}

fn default_python_image() -> String {
    DEFAULT_PYTHON_IMAGE.to_string()
}

fn default_nodejs_image() -> String {
    DEFAULT_NODEJS_IMAGE.to_string()
}

fn default_container_runtime() -> String {
    DEFAULT_CONTAINER_RUNTIME.to_string()
}

fn default_max_memory() -> String {
    DEFAULT_MAX_MEMORY.to_string()
}

fn default_seccomp_profile() -> PathBuf {
    PathBuf::from(DEFAULT_SECCOMP_PROFILE)
}

fn default_pool_size() -> usize {
    1
}

fn default_runtime_call_timeout() -> u64 {
    10
}

fn default_allocate_timeout() -> u64 {
    10
}

fn default_exec_timeout() -> u64 {
    10
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            images: ImageConfig::default(),
            container_runtime: default_container_runtime(),
            max_memory: default_max_memory(),
            enable_seccomp: false,
            seccomp_profile: default_seccomp_profile(),
            pool_size: default_pool_size(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            python: default_python_image(),
            nodejs: default_nodejs_image(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            runtime_call: default_runtime_call_timeout(),
            allocate: default_allocate_timeout(),
            exec: default_exec_timeout(),
        }
    }
}

impl SandboxConfig {
    pub fn image_for(&self, language: Language) -> &str {
        match language {
            Language::Python => &self.images.python,
            Language::Nodejs => &self.images.nodejs,
        }
    }

    /// The configured OCI runtime, or `None` to let the engine pick
    pub fn oci_runtime(&self) -> Option<&str> {
        let runtime = self.container_runtime.trim();
        if runtime.is_empty() {
            None
        } else {
            Some(runtime)
        }
    }

    /// Resolve the memory ceiling, falling back to the safe default when the
    /// configured value is not a recognized size.
    pub fn memory_limit(&self) -> MemoryLimit {
        match parse_memory_size(&self.max_memory) {
            Some(bytes) => MemoryLimit {
                raw: self.max_memory.trim().to_lowercase(),
                bytes,
            },
            None => {
                log::info!(
                    "Invalid SANDBOX_MAX_MEMORY value '{}', falling back to {}",
                    self.max_memory,
                    DEFAULT_MAX_MEMORY
                );
                MemoryLimit {
                    raw: DEFAULT_MAX_MEMORY.to_string(),
                    bytes: 256 * 1024 * 1024,
                }
            }
        }
    }

    pub fn runtime_call_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.runtime_call)
    }

    pub fn allocate_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.allocate)
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.exec)
    }
}

fn memory_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)^(\d+)([bkmg]?)$").expect("valid memory pattern"))
}

/// Parse sizes such as `512m` or `1G` into bytes. A bare number is bytes.
pub fn parse_memory_size(value: &str) -> Option<i64> {
    let captures = memory_pattern().captures(value.trim())?;
    let amount: i64 = captures[1].parse().ok()?;
    let multiplier: i64 = match captures[2].to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" => 1024,
        "m" => 1024 * 1024,
        "g" => 1024 * 1024 * 1024,
        _ => return None,
    };
    amount.checked_mul(multiplier).filter(|bytes| *bytes > 0)
}
