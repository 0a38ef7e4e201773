//! Mapping raw exec output onto result classes.
//!
//! Exit codes above 128 mean the process died from signal `code - 128`.
//! SIGKILL is what the kernel OOM killer sends inside a memory-capped
//! container, and SIGSYS is what a seccomp filter sends for a denied syscall.

use super::{
    ExecutionResult, ExecutionStatus, ResourceLimitType, RuntimeErrorType, UnauthorizedAccessType,
};
use crate::runtime::ExecOutput;

/// Per-stream cap on captured output
pub const MAX_OUTPUT_BYTES: usize = 1024 * 1024;

const SIGKILL: i64 = 9;
const SIGSYS: i64 = 31;

const FILE_ACCESS_MARKERS: &[&str] = &[
    "PermissionError",
    "EACCES",
    "EPERM",
    "Read-only file system",
    "EROFS",
];
const NETWORK_ACCESS_MARKERS: &[&str] = &[
    "Network is unreachable",
    "ENETUNREACH",
    "Temporary failure in name resolution",
    "EAI_AGAIN",
    "ENOTFOUND",
];
const MEMORY_MARKERS: &[&str] = &["MemoryError", "heap out of memory"];

struct Class {
    status: ExecutionStatus,
    detail: Option<String>,
    resource_limit_type: Option<ResourceLimitType>,
    unauthorized_access_type: Option<UnauthorizedAccessType>,
    runtime_error_type: Option<RuntimeErrorType>,
}

impl Class {
    fn new(status: ExecutionStatus, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: Some(detail.into()),
            resource_limit_type: None,
            unauthorized_access_type: None,
            runtime_error_type: None,
        }
    }

    fn success() -> Self {
        Self {
            detail: None,
            ..Self::new(ExecutionStatus::Success, "")
        }
    }

    fn limit(kind: ResourceLimitType, detail: impl Into<String>) -> Self {
        Self {
            resource_limit_type: Some(kind),
            ..Self::new(ExecutionStatus::ResourceLimitExceeded, detail)
        }
    }

    fn unauthorized(kind: UnauthorizedAccessType, detail: impl Into<String>) -> Self {
        Self {
            unauthorized_access_type: Some(kind),
            ..Self::new(ExecutionStatus::UnauthorizedAccess, detail)
        }
    }

    fn runtime(kind: RuntimeErrorType, detail: impl Into<String>) -> Self {
        Self {
            runtime_error_type: Some(kind),
            ..Self::new(ExecutionStatus::RuntimeError, detail)
        }
    }

    fn into_result(
        self,
        stdout: String,
        stderr: String,
        exit_code: Option<i64>,
        duration_ms: u64,
    ) -> ExecutionResult {
        ExecutionResult {
            status: self.status,
            stdout,
            stderr,
            exit_code,
            detail: self.detail,
            resource_limit_type: self.resource_limit_type,
            unauthorized_access_type: self.unauthorized_access_type,
            runtime_error_type: self.runtime_error_type,
            duration_ms,
        }
    }
}

/// Classify a finished run
pub fn classify(output: ExecOutput, duration_ms: u64) -> ExecutionResult {
    let (stdout, stdout_cut) = cap_output(output.stdout);
    let (stderr, stderr_cut) = cap_output(output.stderr);

    let class = match output.exit_code {
        None => Class::new(ExecutionStatus::RuntimeError, "exit status was not reported"),
        Some(code) if code > 128 && code < 256 => match code - 128 {
            SIGKILL => Class::limit(
                ResourceLimitType::Memory,
                "killed by SIGKILL, most likely out of memory",
            ),
            SIGSYS => Class::unauthorized(
                UnauthorizedAccessType::DisallowedSyscall,
                "killed by SIGSYS on a disallowed system call",
            ),
            signal => Class::runtime(
                RuntimeErrorType::Signalled,
                format!("terminated by signal {}", signal),
            ),
        },
        _ if stdout_cut || stderr_cut => Class::limit(
            ResourceLimitType::Output,
            format!("output exceeded {} bytes and was truncated", MAX_OUTPUT_BYTES),
        ),
        Some(0) => Class::success(),
        Some(code) => classify_failure(code, &stderr),
    };

    class.into_result(stdout, stderr, output.exit_code, duration_ms)
}

/// Result for a run stopped at the wall-clock limit
pub fn timed_out(seconds: u64, duration_ms: u64) -> ExecutionResult {
    let detail = format!("Execution timed out after {}s", seconds);
    Class::limit(ResourceLimitType::Time, detail.clone()).into_result(
        String::new(),
        detail,
        None,
        duration_ms,
    )
}

fn classify_failure(code: i64, stderr: &str) -> Class {
    let mentions = |markers: &[&str]| markers.iter().any(|m| stderr.contains(m));

    if mentions(MEMORY_MARKERS) {
        Class::limit(ResourceLimitType::Memory, "the program ran out of memory")
    } else if mentions(NETWORK_ACCESS_MARKERS) {
        Class::unauthorized(UnauthorizedAccessType::NetworkAccess, "network access is not available")
    } else if mentions(FILE_ACCESS_MARKERS) {
        Class::unauthorized(UnauthorizedAccessType::FileAccess, "file access was denied")
    } else if code == 1 {
        Class::new(ExecutionStatus::ProgramError, "exited with code 1")
    } else {
        Class::runtime(RuntimeErrorType::NonzeroExit, format!("exited with code {}", code))
    }
}

fn cap_output(mut text: String) -> (String, bool) {
    if text.len() <= MAX_OUTPUT_BYTES {
        return (text, false);
    }
    let mut end = MAX_OUTPUT_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
    (text, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exited(code: i64, stderr: &str) -> ExecOutput {
        ExecOutput {
            exit_code: Some(code),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn test_clean_exit_is_success() {
        let result = classify(exited(0, ""), 12);
        assert!(result.is_success());
        assert_eq!(result.detail, None);
        assert_eq!(result.duration_ms, 12);
    }

    #[test]
    fn test_uncaught_exception_is_program_error() {
        let result = classify(exited(1, "Traceback ...\nZeroDivisionError: division by zero"), 0);
        assert_eq!(result.status, ExecutionStatus::ProgramError);
        assert_eq!(result.runtime_error_type, None);
    }

    #[test]
    fn test_other_exit_codes_are_runtime_errors() {
        let result = classify(exited(3, ""), 0);
        assert_eq!(result.status, ExecutionStatus::RuntimeError);
        assert_eq!(result.runtime_error_type, Some(RuntimeErrorType::NonzeroExit));
        assert_eq!(result.detail.as_deref(), Some("exited with code 3"));
    }

    #[test]
    fn test_signals() {
        let oom = classify(exited(137, ""), 0);
        assert_eq!(oom.status, ExecutionStatus::ResourceLimitExceeded);
        assert_eq!(oom.resource_limit_type, Some(ResourceLimitType::Memory));

        let seccomp = classify(exited(159, ""), 0);
        assert_eq!(seccomp.status, ExecutionStatus::UnauthorizedAccess);
        assert_eq!(
            seccomp.unauthorized_access_type,
            Some(UnauthorizedAccessType::DisallowedSyscall)
        );

        let segfault = classify(exited(139, ""), 0);
        assert_eq!(segfault.status, ExecutionStatus::RuntimeError);
        assert_eq!(segfault.runtime_error_type, Some(RuntimeErrorType::Signalled));
        assert_eq!(segfault.detail.as_deref(), Some("terminated by signal 11"));
    }

    #[test]
    fn test_access_denials_from_stderr() {
        let file = classify(exited(1, "PermissionError: [Errno 13] Permission denied: '/etc/shadow'"), 0);
        assert_eq!(file.unauthorized_access_type, Some(UnauthorizedAccessType::FileAccess));

        let network = classify(exited(1, "OSError: [Errno 101] Network is unreachable"), 0);
        assert_eq!(network.unauthorized_access_type, Some(UnauthorizedAccessType::NetworkAccess));

        let memory = classify(exited(1, "MemoryError"), 0);
        assert_eq!(memory.resource_limit_type, Some(ResourceLimitType::Memory));
    }

    #[test]
    fn test_oversized_output_is_truncated() {
        let output = ExecOutput {
            exit_code: Some(0),
            stdout: "é".repeat(MAX_OUTPUT_BYTES),
            stderr: String::new(),
        };
        let result = classify(output, 0);
        assert_eq!(result.resource_limit_type, Some(ResourceLimitType::Output));
        assert!(result.stdout.len() <= MAX_OUTPUT_BYTES);
    }

    #[test]
    fn test_timeout_result() {
        let result = timed_out(10, 10_004);
        assert!(result.timed_out());
        assert_eq!(result.status, ExecutionStatus::ResourceLimitExceeded);
        assert_eq!(result.exit_code, None);
        assert_eq!(result.detail.as_deref(), Some("Execution timed out after 10s"));
    }
}
