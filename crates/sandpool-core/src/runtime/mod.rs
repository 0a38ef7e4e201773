//! Container runtime adapters.
//!
//! The pool talks to the container engine only through [`ContainerRuntime`].
//! [`docker::DockerRuntime`] drives a real engine over its API with a bounded
//! timeout on every call; [`memory::InMemoryRuntime`] keeps containers in a
//! map and is used for dry runs and deterministic tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::RuntimeError;

pub mod docker;
pub mod memory;

pub use docker::DockerRuntime;
pub use memory::InMemoryRuntime;

/// Everything the engine needs to start one hardened container
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// OCI runtime such as `runsc`; `None` uses the engine default
    pub oci_runtime: Option<String>,
    pub read_only_root: bool,
    /// Mount point to tmpfs options
    pub tmpfs: HashMap<String, String>,
    pub user: String,
    pub working_dir: String,
    pub security_opts: Vec<String>,
    pub cap_drop: Vec<String>,
    pub memory_bytes: i64,
    /// Syscall filter profile, read by the adapter when present
    pub seccomp_profile: Option<PathBuf>,
    pub labels: HashMap<String, String>,
    pub command: Vec<String>,
}

/// Captured result of a command run inside a container
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecOutput {
    pub exit_code: Option<i64>,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create and start a container from `spec`
    async fn create(&self, spec: &ContainerSpec) -> Result<(), RuntimeError>;

    /// Whether the engine reports the container as running
    async fn is_running(&self, name: &str) -> Result<bool, RuntimeError>;

    /// Force-remove the container, killing it if needed
    async fn remove(&self, name: &str) -> Result<(), RuntimeError>;

    /// Run `command` inside the container and wait for it up to `timeout`
    async fn exec(
        &self,
        name: &str,
        command: &[String],
        timeout: Duration,
    ) -> Result<ExecOutput, RuntimeError>;

    /// Write a text file inside the container, creating parent directories
    async fn write_file(&self, name: &str, path: &str, contents: &str) -> Result<(), RuntimeError>;
}
