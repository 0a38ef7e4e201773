// src/runtime/docker.rs
use async_trait::async_trait;
use bollard::container::LogOutput; // For LogOutput::StdOut, LogOutput::StdErr
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::models::{ContainerCreateBody, HostConfig};
use bollard::query_parameters::{
    CreateContainerOptions as BollardCreateContainerOptionsQuery,
    InspectContainerOptions as BollardInspectContainerOptionsQuery,
    RemoveContainerOptionsBuilder,
    StartContainerOptions as BollardStartContainerOptionsQuery,
};
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::future::Future;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use super::{ContainerRuntime, ContainerSpec, ExecOutput};
use crate::errors::RuntimeError;

pub struct DockerRuntime {
    docker: Docker,
    call_timeout: Duration,
}

impl DockerRuntime {
    /// Connect to the local engine; every call is bounded by `call_timeout`
    pub fn connect(call_timeout: Duration) -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self {
            docker,
            call_timeout,
        })
    }

    /// Run one engine call under the per-call timeout, mapping 404s to `NotFound`
    async fn bounded<T, F>(
        &self,
        operation: &'static str,
        container: &str,
        call: F,
    ) -> Result<T, RuntimeError>
    where
        F: Future<Output = Result<T, BollardError>>,
    {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) if is_not_found_error(&e) => Err(RuntimeError::NotFound(container.to_string())),
            Ok(Err(e)) => Err(RuntimeError::BollardError(e)),
            Err(_) => Err(RuntimeError::Timeout {
                operation,
                seconds: self.call_timeout.as_secs(),
            }),
        }
    }

    async fn host_config(spec: &ContainerSpec) -> Result<HostConfig, RuntimeError> {
        let mut security_opt = spec.security_opts.clone();
        if let Some(profile) = &spec.seccomp_profile {
            // The engine API takes the profile body, not a path
            let body = tokio::fs::read_to_string(profile).await.map_err(|source| {
                RuntimeError::SeccompProfile {
                    path: profile.display().to_string(),
                    source,
                }
            })?;
            security_opt.push(format!("seccomp={}", body));
        }

        Ok(HostConfig {
            runtime: spec.oci_runtime.clone(),
            readonly_rootfs: Some(spec.read_only_root),
            tmpfs: Some(spec.tmpfs.clone()),
            memory: Some(spec.memory_bytes),
            security_opt: Some(security_opt),
            cap_drop: Some(spec.cap_drop.clone()),
            ..Default::default()
        })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<(), RuntimeError> {
        let options = Some(BollardCreateContainerOptionsQuery {
            name: Some(spec.name.clone()),
            ..Default::default()
        });

        let config = ContainerCreateBody {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            user: Some(spec.user.clone()),
            working_dir: Some(spec.working_dir.clone()),
            labels: Some(spec.labels.clone()),
            host_config: Some(Self::host_config(spec).await?),
            ..Default::default()
        };

        self.bounded(
            "create_container",
            &spec.name,
            self.docker.create_container(options, config),
        )
        .await?;
        self.bounded(
            "start_container",
            &spec.name,
            self.docker
                .start_container(&spec.name, None::<BollardStartContainerOptionsQuery>),
        )
        .await?;
        Ok(())
    }

    async fn is_running(&self, name: &str) -> Result<bool, RuntimeError> {
        let details = self
            .bounded(
                "inspect_container",
                name,
                self.docker
                    .inspect_container(name, None::<BollardInspectContainerOptionsQuery>),
            )
            .await?;
        Ok(details
            .state
            .and_then(|state| state.running)
            .unwrap_or(false))
    }

    async fn remove(&self, name: &str) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptionsBuilder::new().force(true).v(true).build();
        self.bounded(
            "remove_container",
            name,
            self.docker.remove_container(name, Some(options)),
        )
        .await
    }

    async fn exec(
        &self,
        name: &str,
        command: &[String],
        timeout: Duration,
    ) -> Result<ExecOutput, RuntimeError> {
        self.run_exec(name, command, None, timeout).await
    }

    async fn write_file(&self, name: &str, path: &str, contents: &str) -> Result<(), RuntimeError> {
        let output = self
            .run_exec(
                name,
                &write_file_command(path),
                Some(contents.as_bytes()),
                self.call_timeout,
            )
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

impl DockerRuntime {
    /// Exec `command`, optionally feeding `stdin` and closing it afterwards
    async fn run_exec(
        &self,
        name: &str,
        command: &[String],
        stdin: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<ExecOutput, RuntimeError> {
        let exec = self
            .bounded(
                "create_exec",
                name,
                self.docker.create_exec(
                    name,
                    CreateExecOptions {
                        cmd: Some(command.to_vec()),
                        attach_stdin: Some(stdin.is_some()),
                        attach_stdout: Some(true),
                        attach_stderr: Some(true),
                        ..Default::default()
                    },
                ),
            )
            .await?;

        let run = async {
            let mut stdout = String::new();
            let mut stderr = String::new();
            if let StartExecResults::Attached { mut output, mut input } = self
                .docker
                .start_exec(&exec.id, None::<StartExecOptions>)
                .await?
            {
                if let Some(bytes) = stdin {
                    input.write_all(bytes).await?;
                    input.shutdown().await?;
                }
                while let Some(chunk) = output.next().await {
                    match chunk? {
                        LogOutput::StdOut { message } => {
                            stdout.push_str(&String::from_utf8_lossy(&message))
                        }
                        LogOutput::StdErr { message } => {
                            stderr.push_str(&String::from_utf8_lossy(&message))
                        }
                        _ => {}
                    }
                }
            }
            let inspected = self.docker.inspect_exec(&exec.id).await?;
            Ok::<_, RuntimeError>(ExecOutput {
                exit_code: inspected.exit_code,
                stdout,
                stderr,
            })
        };

        match tokio::time::timeout(timeout, run).await {
            Ok(result) => result,
            Err(_) => {
                log::warn!("Execution timed out in container {}", name);
                Err(RuntimeError::Timeout {
                    operation: "exec",
                    seconds: timeout.as_secs(),
                })
            }
        }
    }
}

/// Shell command that copies its stdin to `path`. The file body never
/// travels in argv, which the kernel caps per argument.
fn write_file_command(path: &str) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        "mkdir -p \"$(dirname \"$1\")\" && cat > \"$1\"".to_string(),
        "sh".to_string(),
        path.to_string(),
    ]
}

fn is_not_found_error(error: &BollardError) -> bool {
    match error {
        BollardError::DockerResponseServerError { status_code, .. } => *status_code == 404,
        _ => false,
    }
}
