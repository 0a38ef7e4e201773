//! In-memory container runtime.
//!
//! Containers are entries in a map. Crashes, failed creations and exec
//! results can be scripted, which makes pool behaviour reproducible without
//! a container engine.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{ContainerRuntime, ContainerSpec, ExecOutput};
use crate::errors::RuntimeError;

type ExecHandler = Box<dyn Fn(&str, &[String]) -> ExecOutput + Send + Sync>;

#[derive(Debug, Clone)]
struct MemoryContainer {
    spec: ContainerSpec,
    running: bool,
    files: HashMap<String, String>,
}

#[derive(Default)]
pub struct InMemoryRuntime {
    containers: Mutex<HashMap<String, MemoryContainer>>,
    failing_names: Mutex<HashSet<String>>,
    fail_all_creates: Mutex<bool>,
    exec_handler: Mutex<Option<ExecHandler>>,
    exec_delay: Mutex<Option<Duration>>,
    create_calls: AtomicUsize,
    exec_log: Mutex<Vec<(String, Vec<String>)>>,
}

impl InMemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every later `create` fails while `fail` is set
    pub fn fail_creates(&self, fail: bool) {
        *self.fail_all_flag() = fail;
    }

    /// `create` fails for this container name only
    pub fn fail_create_for(&self, name: &str) {
        lock(&self.failing_names).insert(name.to_string());
    }

    /// Mark a container as exited without removing it
    pub fn crash(&self, name: &str) {
        if let Some(container) = lock(&self.containers).get_mut(name) {
            container.running = false;
        }
    }

    /// Replace the default exec behaviour (exit 0, no output)
    pub fn on_exec<F>(&self, handler: F)
    where
        F: Fn(&str, &[String]) -> ExecOutput + Send + Sync + 'static,
    {
        *lock(&self.exec_handler) = Some(Box::new(handler));
    }

    /// Make every exec take `delay` before answering
    pub fn set_exec_delay(&self, delay: Duration) {
        *lock(&self.exec_delay) = Some(delay);
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn container_names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.containers).keys().cloned().collect();
        names.sort();
        names
    }

    pub fn spec_of(&self, name: &str) -> Option<ContainerSpec> {
        lock(&self.containers).get(name).map(|c| c.spec.clone())
    }

    pub fn file_contents(&self, name: &str, path: &str) -> Option<String> {
        lock(&self.containers)
            .get(name)
            .and_then(|c| c.files.get(path).cloned())
    }

    /// Commands executed so far, with the container they ran in
    pub fn exec_log(&self) -> Vec<(String, Vec<String>)> {
        lock(&self.exec_log).clone()
    }

    fn fail_all_flag(&self) -> std::sync::MutexGuard<'_, bool> {
        lock(&self.fail_all_creates)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl ContainerRuntime for InMemoryRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<(), RuntimeError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_all_flag() || lock(&self.failing_names).contains(&spec.name) {
            return Err(RuntimeError::Other(format!(
                "scripted create failure for {}",
                spec.name
            )));
        }

        let mut containers = lock(&self.containers);
        if containers.contains_key(&spec.name) {
            return Err(RuntimeError::Other(format!(
                "container name {} is already in use",
                spec.name
            )));
        }
        containers.insert(
            spec.name.clone(),
            MemoryContainer {
                spec: spec.clone(),
                running: true,
                files: HashMap::new(),
            },
        );
        Ok(())
    }

    async fn is_running(&self, name: &str) -> Result<bool, RuntimeError> {
        lock(&self.containers)
            .get(name)
            .map(|c| c.running)
            .ok_or_else(|| RuntimeError::NotFound(name.to_string()))
    }

    async fn remove(&self, name: &str) -> Result<(), RuntimeError> {
        lock(&self.containers)
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::NotFound(name.to_string()))
    }

    async fn exec(
        &self,
        name: &str,
        command: &[String],
        timeout: Duration,
    ) -> Result<ExecOutput, RuntimeError> {
        match lock(&self.containers).get(name) {
            Some(container) if container.running => {}
            Some(_) => {
                return Err(RuntimeError::CommandFailed {
                    container: name.to_string(),
                    exit_code: None,
                    stderr: "container is not running".to_string(),
                })
            }
            None => return Err(RuntimeError::NotFound(name.to_string())),
        }
        lock(&self.exec_log).push((name.to_string(), command.to_vec()));

        let delay = *lock(&self.exec_delay);
        if let Some(delay) = delay {
            if delay > timeout {
                tokio::time::sleep(timeout).await;
                return Err(RuntimeError::Timeout {
                    operation: "exec",
                    seconds: timeout.as_secs(),
                });
            }
            tokio::time::sleep(delay).await;
        }

        let output = match lock(&self.exec_handler).as_ref() {
            Some(handler) => handler(name, command),
            None => ExecOutput {
                exit_code: Some(0),
                ..Default::default()
            },
        };
        Ok(output)
    }

    async fn write_file(&self, name: &str, path: &str, contents: &str) -> Result<(), RuntimeError> {
        let mut containers = lock(&self.containers);
        let container = containers
            .get_mut(name)
            .ok_or_else(|| RuntimeError::NotFound(name.to_string()))?;
        container
            .files
            .insert(path.to_string(), contents.to_string());
        Ok(())
    }
}
