use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::outcome;
use super::{CodeExecutor, ExecutionRequest, ExecutionResult};
use crate::container::WORKSPACE_DIR;
use crate::errors::{RuntimeError, SandboxError};
use crate::language::Language;
use crate::pool::ContainerPool;
use crate::security::SecurityGate;

const PYTHON_RUNNER: &str = r#"import json
import os
import sys

here = os.path.dirname(os.path.abspath(__file__))
sys.path.insert(0, here)
os.chdir(here)

import main as program

args = json.loads(sys.argv[1]) if len(sys.argv) > 1 else {}
entry = getattr(program, "main", None)
if callable(entry):
    result = entry(**args)
    if result is not None:
        print(json.dumps(result, default=str))
"#;

const NODEJS_RUNNER: &str = r#"const path = require('path');

process.chdir(__dirname);
const program = require(path.join(__dirname, 'main.js'));
const entry = typeof program === 'function' ? program : program.main;
const args = process.argv.length > 2 ? JSON.parse(process.argv[2]) : {};

if (typeof entry === 'function') {
  Promise.resolve(entry(args))
    .then((result) => {
      if (result !== undefined) {
        console.log(JSON.stringify(result));
      }
    })
    .catch((err) => {
      console.error(err && err.stack ? err.stack : String(err));
      process.exit(1);
    });
}
"#;

fn runner_for(language: Language) -> (&'static str, &'static str) {
    match language {
        Language::Python => ("python3", PYTHON_RUNNER),
        Language::Nodejs => ("node", NODEJS_RUNNER),
    }
}

/// Runs submissions inside containers borrowed from a [`ContainerPool`]
pub struct PooledCodeExecutor {
    pool: Arc<ContainerPool>,
    gate: SecurityGate,
    reject_when_busy: bool,
}

impl PooledCodeExecutor {
    pub fn new(pool: Arc<ContainerPool>) -> Self {
        Self::with_gate(pool, SecurityGate::default())
    }

    pub fn with_gate(pool: Arc<ContainerPool>, gate: SecurityGate) -> Self {
        Self {
            pool,
            gate,
            reject_when_busy: false,
        }
    }

    /// Fail with [`SandboxError::OverCapacity`] instead of queueing when no
    /// container is free right now
    pub fn reject_when_busy(mut self, reject: bool) -> Self {
        self.reject_when_busy = reject;
        self
    }

    pub fn pool(&self) -> &Arc<ContainerPool> {
        &self.pool
    }

    pub async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult, SandboxError> {
        let language = request.language;
        let verdict = self.gate.analyze(&request.code, language);
        if !verdict.is_safe {
            log::warn!(
                "Rejected {} submission with {} finding(s)",
                language,
                verdict.findings.len()
            );
            return Err(SandboxError::UnsafeCode(verdict.findings));
        }

        let allocate_timeout = self.pool.config().allocate_timeout();
        let exhausted = || {
            if self.reject_when_busy {
                SandboxError::OverCapacity {
                    language: language.to_string(),
                }
            } else {
                SandboxError::CapacityExhausted {
                    language: language.to_string(),
                    seconds: allocate_timeout.as_secs(),
                }
            }
        };

        let waiting_since = Instant::now();
        let permit = if self.reject_when_busy {
            self.pool.try_acquire_budget(language)
        } else {
            let admission = self.pool.acquire_budget(language);
            tokio::time::timeout(allocate_timeout, admission)
                .await
                .ok()
                .flatten()
        };
        let permit = match permit {
            Some(permit) => permit,
            None => return Err(exhausted()),
        };
        let remaining = if self.reject_when_busy {
            Duration::ZERO
        } else {
            allocate_timeout.saturating_sub(waiting_since.elapsed())
        };
        let container = match self.pool.allocate_blocking(language, remaining).await {
            Some(container) => container,
            None => return Err(exhausted()),
        };

        let outcome = self.run_in(&container, &request).await;

        self.pool.release(&container, language).await;
        drop(permit);
        outcome
    }

    async fn run_in(
        &self,
        container: &str,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResult, SandboxError> {
        let run_dir = format!("{}/{}", WORKSPACE_DIR, Uuid::new_v4());
        let outcome = self.run_program(container, request, &run_dir).await;

        match &outcome {
            Ok(result) if result.timed_out() => {
                // The program may still be running; start over with a clean container
                if !self
                    .pool
                    .recreate_container(container, request.language)
                    .await
                {
                    log::error!("Could not recreate container {} after timeout", container);
                }
            }
            _ => self.remove_run_dir(container, &run_dir).await,
        }
        outcome
    }

    async fn run_program(
        &self,
        container: &str,
        request: &ExecutionRequest,
        run_dir: &str,
    ) -> Result<ExecutionResult, SandboxError> {
        let runtime = self.pool.factory().runtime();
        let extension = request.language.source_extension();
        let (interpreter, runner) = runner_for(request.language);
        let runner_path = format!("{}/runner.{}", run_dir, extension);

        runtime
            .write_file(container, &format!("{}/main.{}", run_dir, extension), &request.code)
            .await?;
        runtime.write_file(container, &runner_path, runner).await?;

        let command = vec![
            interpreter.to_string(),
            runner_path,
            serde_json::to_string(&request.arguments)?,
        ];
        let exec_timeout = self.pool.config().exec_timeout();
        let started = Instant::now();
        let output = runtime.exec(container, &command, exec_timeout).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match output {
            Ok(output) => {
                log::debug!(
                    "Run in {} finished with {:?} after {}ms",
                    container,
                    output.exit_code,
                    duration_ms
                );
                Ok(outcome::classify(output, duration_ms))
            }
            Err(RuntimeError::Timeout { .. }) => {
                log::warn!(
                    "Execution in {} timed out after {}s",
                    container,
                    exec_timeout.as_secs()
                );
                Ok(outcome::timed_out(exec_timeout.as_secs(), duration_ms))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_run_dir(&self, container: &str, run_dir: &str) {
        let command = vec!["rm".to_string(), "-rf".to_string(), run_dir.to_string()];
        let result = self
            .pool
            .factory()
            .runtime()
            .exec(container, &command, self.pool.config().runtime_call_timeout())
            .await;
        match result {
            Ok(output) if output.success() => {}
            Ok(output) => log::warn!(
                "Cleanup of {} in {} exited with {:?}",
                run_dir,
                container,
                output.exit_code
            ),
            Err(e) => log::warn!("Cleanup of {} in {} failed: {}", run_dir, container, e),
        }
    }
}

#[async_trait]
impl CodeExecutor for PooledCodeExecutor {
    async fn execute_code(
        &self,
        language: &str,
        code: &str,
    ) -> Result<ExecutionResult, SandboxError> {
        let language: Language = language.parse()?;
        self.execute(ExecutionRequest::new(language, code)).await
    }
}
