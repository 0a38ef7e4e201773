//! Sandboxed execution of untrusted code.
//!
//! Submitted code first passes a static security gate, then runs inside a
//! hardened container borrowed from a per-language pool of warm containers.
//!
//! # Architecture Overview
//!
//! - **Security gate**: AST-based screening of Python submissions
//! - **Container runtime**: a narrow trait over the container engine, with a
//!   Docker implementation and an in-memory one
//! - **Lifecycle**: hardened container specs, creation and replacement
//! - **Pool**: idle queues, blocking allocation, release with liveness recheck
//! - **Executors**: the request path tying the pieces together
//! - **Configuration**: YAML file plus `SANDBOX_*` environment overrides

pub mod config;
pub mod container;
pub mod errors;
pub mod executors;
pub mod language;
pub mod pool;
pub mod runtime;
pub mod security;

pub use config::*;
pub use errors::{RuntimeError, SandboxError};
pub use executors::{
    CodeExecutor, ExecutionRequest, ExecutionResult, ExecutionStatus, PooledCodeExecutor,
    ResourceLimitType, RuntimeErrorType, UnauthorizedAccessType,
};
pub use language::Language;
pub use pool::{ContainerPool, InitReport, PoolStatus};
pub use runtime::{ContainerRuntime, DockerRuntime, InMemoryRuntime};
pub use security::{analyze_code_safety, CodeSafetyVerdict, SecurityFinding, SecurityGate, SecurityPolicy};
