//! Configuration module for the sandbox pool
//!
//! Settings come from an optional YAML file and the `SANDBOX_*` environment
//! variables. Per-language images, the memory ceiling, the seccomp switch and
//! the pool size are the knobs a deployment normally touches.

pub mod loader;
pub mod types;

pub use loader::*;
pub use types::*;


use crate::errors::SandboxError;
use std::path::Path;

/// Load a configuration from a YAML file
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<SandboxConfig, SandboxError> {
    ConfigLoader::from_file(path).await
}
