//! Code execution on top of the container pool.
//!
//! A request is analyzed, admitted against its language budget, given an
//! exclusive container, run with a wall-clock limit and cleaned up. The
//! container always goes back to the pool, whatever happened in between.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::SandboxError;
use crate::language::Language;

pub mod outcome;
pub mod pooled;

pub use pooled::PooledCodeExecutor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    /// The program raised or exited with code 1
    ProgramError,
    ResourceLimitExceeded,
    UnauthorizedAccess,
    /// Killed by a signal or exited with an unusual code
    RuntimeError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceLimitType {
    Time,
    Memory,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnauthorizedAccessType {
    DisallowedSyscall,
    FileAccess,
    NetworkAccess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeErrorType {
    Signalled,
    NonzeroExit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_limit_type: Option<ResourceLimitType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unauthorized_access_type: Option<UnauthorizedAccessType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_error_type: Option<RuntimeErrorType>,
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    pub fn timed_out(&self) -> bool {
        self.resource_limit_type == Some(ResourceLimitType::Time)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub language: Language,
    pub code: String,
    /// Keyword arguments handed to the program's `main`, if it defines one
    #[serde(default = "empty_arguments")]
    pub arguments: serde_json::Value,
}

fn empty_arguments() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl ExecutionRequest {
    pub fn new(language: Language, code: impl Into<String>) -> Self {
        Self {
            language,
            code: code.into(),
            arguments: empty_arguments(),
        }
    }

    pub fn with_arguments(mut self, arguments: serde_json::Value) -> Self {
        self.arguments = arguments;
        self
    }
}

#[async_trait]
pub trait CodeExecutor: Send + Sync {
    async fn execute_code(
        &self,
        language: &str,
        code: &str,
    ) -> Result<ExecutionResult, SandboxError>;
}
