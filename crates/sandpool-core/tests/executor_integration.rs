use sandpool_core::config::{SandboxConfig, TimeoutConfig};
use sandpool_core::errors::SandboxError;
use sandpool_core::executors::{
    CodeExecutor, ExecutionRequest, ExecutionStatus, PooledCodeExecutor, ResourceLimitType,
    RuntimeErrorType, UnauthorizedAccessType,
};
use sandpool_core::language::Language;
use sandpool_core::pool::ContainerPool;
use sandpool_core::runtime::{ExecOutput, InMemoryRuntime};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn executor_with(timeouts: TimeoutConfig) -> (Arc<InMemoryRuntime>, Arc<ContainerPool>, PooledCodeExecutor) {
    let runtime = Arc::new(InMemoryRuntime::new());
    let config = SandboxConfig {
        pool_size: 1,
        timeouts,
        ..Default::default()
    };
    let pool = Arc::new(ContainerPool::new(runtime.clone(), config));
    let executor = PooledCodeExecutor::new(pool.clone());
    (runtime, pool, executor)
}

fn short_timeouts() -> TimeoutConfig {
    TimeoutConfig {
        runtime_call: 5,
        allocate: 1,
        exec: 1,
    }
}

fn runner_command(log: &[(String, Vec<String>)], interpreter: &str) -> Vec<String> {
    log.iter()
        .map(|(_, command)| command.clone())
        .find(|command| command[0] == interpreter)
        .expect("runner should have been executed")
}

/// Make the python runner exit with `exit_code` and `stderr`; every other
/// command succeeds
fn python_exits_with(runtime: &InMemoryRuntime, exit_code: i64, stderr: &'static str) {
    runtime.on_exec(move |_, command| {
        if command[0] == "python3" {
            ExecOutput {
                exit_code: Some(exit_code),
                stdout: String::new(),
                stderr: stderr.to_string(),
            }
        } else {
            ExecOutput {
                exit_code: Some(0),
                ..Default::default()
            }
        }
    });
}

#[tokio::test]
async fn python_program_runs_and_is_cleaned_up() {
    let (runtime, pool, executor) = executor_with(short_timeouts());
    pool.init_pools(1).await;
    runtime.on_exec(|_, command| {
        if command[0] == "python3" {
            ExecOutput {
                exit_code: Some(0),
                stdout: "3\n".to_string(),
                stderr: String::new(),
            }
        } else {
            ExecOutput {
                exit_code: Some(0),
                ..Default::default()
            }
        }
    });

    let code = "def main(a, b):\n    return a + b\n";
    let request = ExecutionRequest::new(Language::Python, code).with_arguments(json!({"a": 1, "b": 2}));
    let result = executor.execute(request).await.unwrap();

    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(result.exit_code, Some(0));
    assert_eq!(result.stdout, "3\n");

    let log = runtime.exec_log();
    let command = runner_command(&log, "python3");
    assert!(command[1].starts_with("/workspace/"));
    assert!(command[1].ends_with("/runner.py"));
    assert_eq!(command[2], r#"{"a":1,"b":2}"#);

    let run_dir = command[1].trim_end_matches("/runner.py").to_string();
    assert_eq!(
        runtime
            .file_contents("sandbox_python_0", &format!("{}/main.py", run_dir))
            .as_deref(),
        Some(code)
    );
    let (_, cleanup) = log.last().unwrap();
    assert_eq!(cleanup, &vec!["rm".to_string(), "-rf".to_string(), run_dir]);

    let status = pool.status().await;
    let python = status.iter().find(|s| s.language == Language::Python).unwrap();
    assert_eq!(python.idle, 1);
    assert_eq!(python.available_permits, 1);
}

#[tokio::test]
async fn unsafe_code_is_rejected_before_allocation() {
    let (runtime, pool, executor) = executor_with(short_timeouts());
    pool.init_pools(1).await;

    let err = executor
        .execute(ExecutionRequest::new(
            Language::Python,
            "import os\nos.system(\"rm -rf /\")",
        ))
        .await
        .unwrap_err();

    match err {
        SandboxError::UnsafeCode(findings) => {
            assert!(findings.iter().any(|f| f.description == "Import: os" && f.line == 1));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(runtime
        .exec_log()
        .iter()
        .all(|(container, _)| container != "sandbox_python_0"));
}

#[tokio::test]
async fn nonzero_exit_is_a_program_error() {
    let (runtime, pool, executor) = executor_with(short_timeouts());
    pool.init_pools(1).await;
    runtime.on_exec(|_, command| {
        if command[0] == "node" {
            ExecOutput {
                exit_code: Some(1),
                stdout: String::new(),
                stderr: "ReferenceError: x is not defined".to_string(),
            }
        } else {
            ExecOutput {
                exit_code: Some(0),
                ..Default::default()
            }
        }
    });

    let result = executor
        .execute_code("javascript", "module.exports = () => x;")
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::ProgramError);
    assert_eq!(result.exit_code, Some(1));
    assert!(result.stderr.contains("ReferenceError"));
}

#[tokio::test]
async fn killed_runs_are_classified_by_signal() {
    let (runtime, pool, executor) = executor_with(short_timeouts());
    pool.init_pools(1).await;
    let request = || ExecutionRequest::new(Language::Python, "print(1)");

    python_exits_with(&runtime, 137, "");
    let oom = executor.execute(request()).await.unwrap();
    assert_eq!(oom.status, ExecutionStatus::ResourceLimitExceeded);
    assert_eq!(oom.resource_limit_type, Some(ResourceLimitType::Memory));
    assert_eq!(oom.exit_code, Some(137));

    python_exits_with(&runtime, 159, "");
    let seccomp = executor.execute(request()).await.unwrap();
    assert_eq!(seccomp.status, ExecutionStatus::UnauthorizedAccess);
    assert_eq!(
        seccomp.unauthorized_access_type,
        Some(UnauthorizedAccessType::DisallowedSyscall)
    );

    python_exits_with(&runtime, 134, "");
    let aborted = executor.execute(request()).await.unwrap();
    assert_eq!(aborted.status, ExecutionStatus::RuntimeError);
    assert_eq!(aborted.runtime_error_type, Some(RuntimeErrorType::Signalled));
    assert_eq!(aborted.detail.as_deref(), Some("terminated by signal 6"));
}

#[tokio::test]
async fn failed_runs_are_classified_by_exit_code_and_stderr() {
    let (runtime, pool, executor) = executor_with(short_timeouts());
    pool.init_pools(1).await;
    let request = || ExecutionRequest::new(Language::Python, "print(1)");

    python_exits_with(&runtime, 2, "usage: error");
    let nonzero = executor.execute(request()).await.unwrap();
    assert_eq!(nonzero.status, ExecutionStatus::RuntimeError);
    assert_eq!(nonzero.runtime_error_type, Some(RuntimeErrorType::NonzeroExit));

    python_exits_with(&runtime, 1, "OSError: [Errno 30] Read-only file system: '/etc/x'");
    let file = executor.execute(request()).await.unwrap();
    assert_eq!(file.status, ExecutionStatus::UnauthorizedAccess);
    assert_eq!(file.unauthorized_access_type, Some(UnauthorizedAccessType::FileAccess));

    python_exits_with(&runtime, 1, "socket.gaierror: [Errno -3] Temporary failure in name resolution");
    let network = executor.execute(request()).await.unwrap();
    assert_eq!(network.unauthorized_access_type, Some(UnauthorizedAccessType::NetworkAccess));

    let serialized = serde_json::to_value(&network).unwrap();
    assert_eq!(serialized["status"], "unauthorized_access");
    assert_eq!(serialized["unauthorized_access_type"], "network_access");
    assert!(serialized.get("resource_limit_type").is_none());
}

#[tokio::test]
async fn flooding_output_is_truncated() {
    let (runtime, pool, executor) = executor_with(short_timeouts());
    pool.init_pools(1).await;
    runtime.on_exec(|_, command| ExecOutput {
        exit_code: Some(0),
        stdout: if command[0] == "python3" {
            "y\n".repeat(1024 * 1024)
        } else {
            String::new()
        },
        stderr: String::new(),
    });

    let result = executor
        .execute(ExecutionRequest::new(Language::Python, "while True:\n    print('y')\n"))
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::ResourceLimitExceeded);
    assert_eq!(result.resource_limit_type, Some(ResourceLimitType::Output));
    assert_eq!(result.stdout.len(), 1024 * 1024);
}

#[tokio::test]
async fn large_program_is_written_intact() {
    let (runtime, pool, executor) = executor_with(short_timeouts());
    pool.init_pools(1).await;
    let code = format!("data = '{}'\nprint(len(data))\n", "x".repeat(512 * 1024));

    let result = executor
        .execute(ExecutionRequest::new(Language::Python, code.clone()))
        .await
        .unwrap();
    assert_eq!(result.status, ExecutionStatus::Success);

    let command = runner_command(&runtime.exec_log(), "python3");
    let run_dir = command[1].trim_end_matches("/runner.py");
    assert_eq!(
        runtime.file_contents("sandbox_python_0", &format!("{}/main.py", run_dir)),
        Some(code)
    );
}

#[tokio::test]
async fn timed_out_run_replaces_the_container() {
    let (runtime, pool, executor) = executor_with(short_timeouts());
    pool.init_pools(1).await;
    let creates_before = runtime.create_calls();
    runtime.set_exec_delay(Duration::from_secs(5));

    let result = executor
        .execute(ExecutionRequest::new(Language::Python, "while True:\n    pass\n"))
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::ResourceLimitExceeded);
    assert_eq!(result.resource_limit_type, Some(ResourceLimitType::Time));
    assert_eq!(result.detail.as_deref(), Some("Execution timed out after 1s"));
    assert_eq!(result.exit_code, None);
    assert_eq!(runtime.create_calls(), creates_before + 1);
    assert!(pool.is_running("sandbox_python_0").await);

    let again = pool
        .allocate_blocking(Language::Python, Duration::from_millis(200))
        .await;
    assert_eq!(again.as_deref(), Some("sandbox_python_0"));
}

#[tokio::test]
async fn busy_pool_reports_capacity_exhausted() {
    let (_, pool, executor) = executor_with(short_timeouts());
    pool.init_pools(1).await;
    let held = pool
        .allocate_blocking(Language::Python, Duration::from_millis(200))
        .await
        .unwrap();

    let err = executor
        .execute(ExecutionRequest::new(Language::Python, "print(1)"))
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxError::CapacityExhausted { ref language, .. } if language == "python"));

    pool.release(&held, Language::Python).await;
    let result = executor
        .execute(ExecutionRequest::new(Language::Python, "print(1)"))
        .await
        .unwrap();
    assert_eq!(result.status, ExecutionStatus::Success);
}

#[tokio::test]
async fn busy_pool_rejects_at_once_when_asked_not_to_wait() {
    let (_, pool, executor) = executor_with(TimeoutConfig {
        runtime_call: 5,
        allocate: 10,
        exec: 1,
    });
    let executor = executor.reject_when_busy(true);
    pool.init_pools(1).await;
    let permit = pool.try_acquire_budget(Language::Python).unwrap();

    let started = std::time::Instant::now();
    let err = executor
        .execute(ExecutionRequest::new(Language::Python, "print(1)"))
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxError::OverCapacity { ref language } if language == "python"));
    assert!(err.is_capacity());
    assert!(started.elapsed() < Duration::from_secs(1));

    drop(permit);
    let held = pool
        .allocate_blocking(Language::Python, Duration::from_millis(200))
        .await
        .unwrap();
    let err = executor
        .execute(ExecutionRequest::new(Language::Python, "print(1)"))
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxError::OverCapacity { .. }));
    assert!(pool.try_acquire_budget(Language::Python).is_some());

    pool.release(&held, Language::Python).await;
    let result = executor
        .execute(ExecutionRequest::new(Language::Python, "print(1)"))
        .await
        .unwrap();
    assert!(result.is_success());
}

#[tokio::test]
async fn unknown_language_is_refused() {
    let (_, _, executor) = executor_with(short_timeouts());
    let err = executor.execute_code("ruby", "puts 1").await.unwrap_err();
    assert!(matches!(err, SandboxError::UnsupportedLanguage(_)));
}
