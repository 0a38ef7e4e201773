//! Per-language container pools.
//!
//! A [`ContainerPool`] owns one idle queue, one wake-up notifier and one
//! concurrency budget per [`Language`]. A single async lock guards every
//! queue and record, so a container name is handed out to at most one
//! caller at a time. Liveness is rechecked both on the way out (allocate)
//! and on the way back in (release).

use futures_util::future::join_all;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use crate::config::SandboxConfig;
use crate::container::{container_name, ContainerFactory, ContainerRecord, ContainerState};
use crate::errors::SandboxError;
use crate::language::Language;
use crate::runtime::{ContainerRuntime, DockerRuntime};

#[cfg(test)]
mod tests;

/// Upper bound on one wait for a release notification
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Outcome of [`ContainerPool::init_pools`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InitReport {
    pub succeeded: usize,
    pub attempted: usize,
}

impl InitReport {
    pub fn is_complete(&self) -> bool {
        self.succeeded == self.attempted
    }
}

/// Point-in-time view of one language pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub language: Language,
    pub pool_size: usize,
    pub idle: usize,
    pub allocated: usize,
    pub available_permits: usize,
}

#[derive(Default)]
struct PoolState {
    idle: HashMap<Language, VecDeque<String>>,
    records: HashMap<String, ContainerRecord>,
    /// Allocated containers whose slot no longer exists; removed on release
    retired: HashSet<String>,
}

impl PoolState {
    fn queue(&mut self, language: Language) -> &mut VecDeque<String> {
        self.idle.entry(language).or_default()
    }

    fn mark(&mut self, factory: &ContainerFactory, name: &str, language: Language, state: ContainerState) {
        self.records
            .entry(name.to_string())
            .or_insert_with(|| factory.record_for(name, language, state))
            .state = state;
    }

    fn count(&self, language: Language, state: ContainerState) -> usize {
        self.records
            .values()
            .filter(|r| r.language == language && r.state == state)
            .count()
    }
}

struct Budget {
    size: usize,
    permits: Arc<Semaphore>,
}

impl Budget {
    fn new(size: usize) -> Self {
        Self {
            size,
            permits: Arc::new(Semaphore::new(size)),
        }
    }
}

pub struct ContainerPool {
    factory: ContainerFactory,
    state: Mutex<PoolState>,
    budgets: std::sync::Mutex<HashMap<Language, Budget>>,
    notifiers: HashMap<Language, Arc<Notify>>,
}

impl ContainerPool {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: SandboxConfig) -> Self {
        let size = config.pool_size;
        Self {
            factory: ContainerFactory::new(runtime, config),
            state: Mutex::new(PoolState::default()),
            budgets: std::sync::Mutex::new(
                Language::ALL.iter().map(|l| (*l, Budget::new(size))).collect(),
            ),
            notifiers: Language::ALL
                .iter()
                .map(|l| (*l, Arc::new(Notify::new())))
                .collect(),
        }
    }

    /// Pool backed by the local Docker engine
    pub fn with_docker(config: SandboxConfig) -> Result<Self, SandboxError> {
        let runtime = DockerRuntime::connect(config.runtime_call_timeout())?;
        Ok(Self::new(Arc::new(runtime), config))
    }

    pub fn config(&self) -> &SandboxConfig {
        self.factory.config()
    }

    pub fn factory(&self) -> &ContainerFactory {
        &self.factory
    }

    /// Reset every pool and provision `size` containers per language
    /// concurrently. Partial pools are kept.
    pub async fn init_pools(&self, size: usize) -> InitReport {
        {
            let mut budgets = self.lock_budgets();
            for language in Language::ALL {
                budgets.insert(language, Budget::new(size));
            }
        }

        let slots: Vec<(String, Language)> = Language::ALL
            .iter()
            .flat_map(|language| (0..size).map(move |i| (container_name(*language, i), *language)))
            .collect();

        {
            let mut state = self.state.lock().await;
            let kept: HashSet<&str> = slots.iter().map(|(name, _)| name.as_str()).collect();
            let previous: Vec<ContainerRecord> = state.records.drain().map(|(_, r)| r).collect();
            state.idle.clear();
            state.retired.retain(|name| !kept.contains(name.as_str()));

            // Slots that survive are force-replaced by create_container below
            for record in previous {
                if kept.contains(record.name.as_str()) {
                    continue;
                }
                match record.state {
                    ContainerState::Allocated => {
                        state.retired.insert(record.name.clone());
                        state.records.insert(record.name.clone(), record);
                    }
                    ContainerState::Destroyed => {}
                    _ => self.remove_container(&record.name).await,
                }
            }

            for (name, language) in &slots {
                state.mark(&self.factory, name, *language, ContainerState::Provisioning);
            }
        }

        let outcomes = join_all(slots.iter().map(|(name, language)| async move {
            (self.factory.create_container(name, *language).await, name, *language)
        }))
        .await;

        let mut succeeded = 0;
        let mut state = self.state.lock().await;
        for (created, name, language) in outcomes {
            if created {
                succeeded += 1;
                state.queue(language).push_back(name.clone());
                state.mark(&self.factory, name, language, ContainerState::Idle);
            } else {
                state.mark(&self.factory, name, language, ContainerState::Destroyed);
            }
        }
        for language in Language::ALL {
            let ready = state.queue(language).len();
            if ready < size {
                log::error!("Initialized {} pool with {}/{} containers", language, ready, size);
            } else {
                log::info!("Initialized {} pool with {} containers", language, ready);
            }
            if ready > 0 {
                self.notifier(language).notify_waiters();
            }
        }

        InitReport {
            succeeded,
            attempted: slots.len(),
        }
    }

    pub async fn create_container(&self, name: &str, language: Language) -> bool {
        self.factory.create_container(name, language).await
    }

    pub async fn recreate_container(&self, name: &str, language: Language) -> bool {
        self.factory.recreate_container(name, language).await
    }

    pub async fn is_running(&self, name: &str) -> bool {
        self.factory.is_running(name).await
    }

    /// Wait up to `timeout` for a running container of `language`.
    ///
    /// Returns `None` when the deadline passes. A container that fails its
    /// liveness check gets one inline recreation; if that fails the name is
    /// dropped from the pool.
    pub async fn allocate_blocking(&self, language: Language, timeout: Duration) -> Option<String> {
        let deadline = Instant::now() + timeout;
        let notify = self.notifier(language);

        loop {
            {
                let mut state = self.state.lock().await;
                if let Some(name) = state.queue(language).pop_front() {
                    if self.factory.is_running(&name).await {
                        state.mark(&self.factory, &name, language, ContainerState::Allocated);
                        log::debug!("Allocated container {}", name);
                        return Some(name);
                    }

                    log::warn!("Idle container {} is not running, recreating", name);
                    state.mark(&self.factory, &name, language, ContainerState::Crashed);
                    if self.factory.recreate_container(&name, language).await {
                        state.mark(&self.factory, &name, language, ContainerState::Allocated);
                        return Some(name);
                    }
                    log::error!("Could not recreate container {}, removing it from the pool", name);
                    state.mark(&self.factory, &name, language, ContainerState::Destroyed);
                    if Instant::now() >= deadline {
                        log::debug!("No {} container available within {:?}", language, timeout);
                        return None;
                    }
                    continue;
                }
            }

            let now = Instant::now();
            if now >= deadline {
                log::debug!(
                    "No {} container available within {:?}",
                    language,
                    timeout
                );
                return None;
            }
            let wait = POLL_INTERVAL.min(deadline - now);
            let _ = tokio::time::timeout(wait, notify.notified()).await;
        }
    }

    /// Return an allocated container to its pool. Anything else is a no-op,
    /// including a second release of the same container.
    pub async fn release(&self, name: &str, language: Language) {
        let mut state = self.state.lock().await;
        let owner = match state.records.get(name) {
            Some(record) if record.state == ContainerState::Allocated => record.language,
            Some(record) => {
                log::debug!("Ignoring release of {} in state {:?}", name, record.state);
                return;
            }
            None => {
                log::warn!("Ignoring release of unknown container {}", name);
                return;
            }
        };
        if owner != language {
            log::warn!(
                "Container {} belongs to the {} pool, not {}",
                name,
                owner,
                language
            );
        }
        let language = owner;

        if state.retired.remove(name) {
            self.remove_container(name).await;
            state.mark(&self.factory, name, language, ContainerState::Destroyed);
            return;
        }

        if self.factory.is_running(name).await {
            state.queue(language).push_back(name.to_string());
            state.mark(&self.factory, name, language, ContainerState::Idle);
            self.notifier(language).notify_one();
            return;
        }

        log::warn!("Released container {} is not running, recreating", name);
        state.mark(&self.factory, name, language, ContainerState::Crashed);
        if self.factory.recreate_container(name, language).await {
            state.queue(language).push_back(name.to_string());
            state.mark(&self.factory, name, language, ContainerState::Idle);
            self.notifier(language).notify_one();
        } else {
            log::error!("Could not recreate container {}, {} pool shrinks", name, language);
            state.mark(&self.factory, name, language, ContainerState::Destroyed);
        }
    }

    /// Remove every idle container. Allocated containers are left alone.
    pub async fn teardown(&self) {
        let mut state = self.state.lock().await;
        for language in Language::ALL {
            let drained: Vec<String> = state.queue(language).drain(..).collect();
            for name in drained {
                self.remove_container(&name).await;
                state.mark(&self.factory, &name, language, ContainerState::Destroyed);
            }
        }
        log::info!("Container pools torn down");
    }

    /// Wait for a slot in the language budget
    pub async fn acquire_budget(&self, language: Language) -> Option<OwnedSemaphorePermit> {
        self.semaphore(language).acquire_owned().await.ok()
    }

    pub fn try_acquire_budget(&self, language: Language) -> Option<OwnedSemaphorePermit> {
        self.semaphore(language).try_acquire_owned().ok()
    }

    pub async fn status(&self) -> Vec<PoolStatus> {
        let state = self.state.lock().await;
        let budgets = self.lock_budgets();
        Language::ALL
            .iter()
            .map(|language| {
                let (pool_size, available_permits) = budgets
                    .get(language)
                    .map(|b| (b.size, b.permits.available_permits()))
                    .unwrap_or_default();
                PoolStatus {
                    language: *language,
                    pool_size,
                    idle: state.idle.get(language).map_or(0, VecDeque::len),
                    allocated: state.count(*language, ContainerState::Allocated),
                    available_permits,
                }
            })
            .collect()
    }

    async fn remove_container(&self, name: &str) {
        if let Err(e) = self.factory.runtime().remove(name).await {
            log::warn!("Failed to remove container {}: {}", name, e);
        }
    }

    fn semaphore(&self, language: Language) -> Arc<Semaphore> {
        let size = self.config().pool_size;
        self.lock_budgets()
            .entry(language)
            .or_insert_with(|| Budget::new(size))
            .permits
            .clone()
    }

    fn notifier(&self, language: Language) -> Arc<Notify> {
        self.notifiers
            .get(&language)
            .cloned()
            .unwrap_or_else(|| Arc::new(Notify::new()))
    }

    fn lock_budgets(&self) -> std::sync::MutexGuard<'_, HashMap<Language, Budget>> {
        self.budgets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
