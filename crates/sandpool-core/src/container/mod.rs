//! Container lifecycle: hardened specs, creation, recreation, liveness.
//!
//! Nothing here holds pool state. The pool decides *when* a container is
//! created or replaced; this module decides *how*.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{MemoryLimit, SandboxConfig};
use crate::errors::RuntimeError;
use crate::language::Language;
use crate::runtime::{ContainerRuntime, ContainerSpec};


pub const WORKSPACE_DIR: &str = "/workspace";
/// nobody:nogroup
pub const SANDBOX_USER: &str = "65534:65534";
pub const LANGUAGE_LABEL: &str = "sandpool.language";
const DEPENDENCY_CACHE_DIR: &str = "/app/node_modules";

/// Stable container name for slot `index` of a language pool
pub fn container_name(language: Language, index: usize) -> String {
    format!("sandbox_{}_{}", language, index)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    Provisioning,
    Idle,
    Allocated,
    Crashed,
    Destroyed,
}

/// Bookkeeping for one pooled container
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainerRecord {
    pub name: String,
    pub language: Language,
    pub state: ContainerState,
    pub memory_bytes: i64,
    pub seccomp: bool,
}

/// Builds and replaces hardened containers through a runtime adapter
#[derive(Clone)]
pub struct ContainerFactory {
    runtime: Arc<dyn ContainerRuntime>,
    config: SandboxConfig,
    memory: MemoryLimit,
}

impl ContainerFactory {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: SandboxConfig) -> Self {
        let memory = config.memory_limit();
        Self {
            runtime,
            config,
            memory,
        }
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Memory ceiling applied to every container, resolved once
    pub fn memory_limit(&self) -> &MemoryLimit {
        &self.memory
    }

    pub fn build_spec(&self, name: &str, language: Language) -> ContainerSpec {
        let mut tmpfs = HashMap::new();
        tmpfs.insert(
            WORKSPACE_DIR.to_string(),
            "rw,exec,size=100M,uid=65534,gid=65534,mode=0755".to_string(),
        );
        tmpfs.insert("/tmp".to_string(), "rw,exec,size=50M,mode=1777".to_string());

        let mut labels = HashMap::new();
        labels.insert(LANGUAGE_LABEL.to_string(), language.to_string());

        ContainerSpec {
            name: name.to_string(),
            image: self.config.image_for(language).to_string(),
            oci_runtime: self.config.oci_runtime().map(str::to_string),
            read_only_root: true,
            tmpfs,
            user: SANDBOX_USER.to_string(),
            working_dir: WORKSPACE_DIR.to_string(),
            security_opts: vec!["no-new-privileges".to_string()],
            cap_drop: vec!["ALL".to_string()],
            memory_bytes: self.memory.bytes,
            seccomp_profile: self
                .config
                .enable_seccomp
                .then(|| self.config.seccomp_profile.clone()),
            labels,
            command: vec!["sleep".to_string(), "infinity".to_string()],
        }
    }

    pub fn record_for(&self, name: &str, language: Language, state: ContainerState) -> ContainerRecord {
        ContainerRecord {
            name: name.to_string(),
            language,
            state,
            memory_bytes: self.memory.bytes,
            seccomp: self.config.enable_seccomp,
        }
    }

    /// Start a fresh hardened container. Failures are logged, never raised.
    pub async fn create_container(&self, name: &str, language: Language) -> bool {
        log::info!("Creating container {} for {}", name, language);
        self.remove_quietly(name).await;

        let spec = self.build_spec(name, language);
        if let Err(e) = self.runtime.create(&spec).await {
            log::error!("Failed to create container {}: {}", name, e);
            return false;
        }

        if language.has_dependency_cache() {
            if let Err(e) = self.install_dependency_cache(name).await {
                log::error!("Failed to prepare dependency cache in {}: {}", name, e);
                return false;
            }
        }

        let running = self.is_running(name).await;
        if !running {
            log::error!("Container {} was created but is not running", name);
        }
        running
    }

    pub async fn recreate_container(&self, name: &str, language: Language) -> bool {
        log::info!("Recreating container {} for {}", name, language);
        self.remove_quietly(name).await;
        self.create_container(name, language).await
    }

    /// Any inspection failure, including an unknown name, counts as not running
    pub async fn is_running(&self, name: &str) -> bool {
        match self.runtime.is_running(name).await {
            Ok(running) => running,
            Err(e) => {
                log::debug!("Liveness check for {} failed: {}", name, e);
                false
            }
        }
    }

    pub async fn remove_quietly(&self, name: &str) {
        if let Err(e) = self.runtime.remove(name).await {
            log::debug!("Ignoring removal error for {}: {}", name, e);
        }
    }

    async fn install_dependency_cache(&self, name: &str) -> Result<(), RuntimeError> {
        let command = vec![
            "sh".to_string(),
            "-c".to_string(),
            format!(
                "[ -d {workspace}/node_modules ] || cp -a {cache} {workspace}/",
                workspace = WORKSPACE_DIR,
                cache = DEPENDENCY_CACHE_DIR
            ),
        ];
        let output = self
            .runtime
            .exec(name, &command, self.config.runtime_call_timeout())
            .await?;
        if !output.success() {
            return Err(RuntimeError::CommandFailed {
                container: name.to_string(),
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }
        Ok(())
    }
}
