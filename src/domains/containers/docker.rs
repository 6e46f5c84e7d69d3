use async_trait::async_trait;
use log::{debug, info, warn};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use super::{ContainerRuntime, ContainerSpec, ContainerState};
use crate::domains::settings::ContainerSettings;
use crate::errors::{DevtoolError, DevtoolResult};

/// Container runtime driven through a docker-compatible CLI (`docker`, `podman`).
#[derive(Debug, Clone)]
pub struct DockerCli {
    engine: String,
    binary: PathBuf,
    op_timeout: Duration,
    stop_grace_secs: u64,
}

struct CliOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

impl DockerCli {
    pub fn new(settings: &ContainerSettings, op_timeout: Duration) -> Self {
        let binary = which::which(&settings.engine).unwrap_or_else(|err| {
            debug!(
                "Container engine '{}' not resolved on PATH ({err}); using it verbatim",
                settings.engine
            );
            PathBuf::from(&settings.engine)
        });
        Self {
            engine: settings.engine.clone(),
            binary,
            op_timeout,
            stop_grace_secs: settings.stop_grace_secs,
        }
    }

    pub fn create_args(spec: &ContainerSpec) -> Vec<String> {
        let mut args = vec!["create".to_string(), "--name".to_string(), spec.name.clone()];
        for (key, value) in &spec.labels {
            args.push("--label".to_string());
            args.push(format!("{key}={value}"));
        }
        for volume in &spec.volumes {
            args.push("-v".to_string());
            args.push(format!("{}:{}:rw", volume.source, volume.target));
        }
        if !spec.workdir.is_empty() {
            args.push("-w".to_string());
            args.push(spec.workdir.clone());
        }
        for (key, value) in &spec.env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push(spec.image.clone());
        args.extend(spec.command.iter().cloned());
        args
    }

    async fn run(&self, operation: &str, target: &str, args: &[String]) -> DevtoolResult<CliOutput> {
        debug!("{} {}", self.engine, args.join(" "));

        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match timeout(self.op_timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                return Err(DevtoolError::container(
                    target,
                    operation,
                    format!("failed to run '{}': {err}", self.engine),
                ));
            }
            Err(_) => {
                warn!(
                    "{} {operation} for '{target}' exceeded {:?}",
                    self.engine, self.op_timeout
                );
                return Err(DevtoolError::timeout(
                    &format!("container {operation}"),
                    self.op_timeout.as_secs(),
                ));
            }
        };

        Ok(CliOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    async fn run_checked(&self, operation: &str, target: &str, args: &[String]) -> DevtoolResult<String> {
        let output = self.run(operation, target, args).await?;
        if output.success {
            Ok(output.stdout)
        } else {
            Err(DevtoolError::container(target, operation, output.stderr))
        }
    }
}

fn parse_state(status: &str) -> ContainerState {
    match status.trim() {
        "running" | "restarting" | "paused" => ContainerState::Running,
        _ => ContainerState::Stopped,
    }
}

fn is_missing_error(stderr: &str) -> bool {
    stderr.to_lowercase().contains("no such")
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    fn engine_name(&self) -> &str {
        &self.engine
    }

    async fn create(&self, spec: &ContainerSpec) -> DevtoolResult<String> {
        let args = Self::create_args(spec);
        let output = self.run("create", &spec.name, &args).await?;
        if !output.success {
            return Err(DevtoolError::ContainerCreate {
                session_id: spec.session_id.clone(),
                message: output.stderr,
            });
        }

        let id = output.stdout.lines().last().unwrap_or_default().trim().to_string();
        if id.is_empty() {
            return Err(DevtoolError::ContainerCreate {
                session_id: spec.session_id.clone(),
                message: format!("{} create returned no container id", self.engine),
            });
        }
        info!("Created container {} ({id}) from {}", spec.name, spec.image);
        Ok(id)
    }

    async fn start(&self, container_id: &str) -> DevtoolResult<()> {
        match self.state(container_id).await? {
            ContainerState::Running => {
                debug!("Container {container_id} already running");
                Ok(())
            }
            ContainerState::Missing => Err(DevtoolError::container(
                container_id,
                "start",
                "container does not exist",
            )),
            ContainerState::Stopped => {
                self.run_checked("start", container_id, &["start".to_string(), container_id.to_string()])
                    .await?;
                Ok(())
            }
        }
    }

    async fn stop(&self, container_id: &str) -> DevtoolResult<()> {
        match self.state(container_id).await? {
            ContainerState::Running => {
                let args = vec![
                    "stop".to_string(),
                    "-t".to_string(),
                    self.stop_grace_secs.to_string(),
                    container_id.to_string(),
                ];
                self.run_checked("stop", container_id, &args).await?;
                Ok(())
            }
            ContainerState::Stopped => {
                debug!("Container {container_id} already stopped");
                Ok(())
            }
            ContainerState::Missing => Err(DevtoolError::container(
                container_id,
                "stop",
                "container does not exist",
            )),
        }
    }

    async fn remove(&self, container_id: &str) -> DevtoolResult<()> {
        match self.state(container_id).await? {
            ContainerState::Running => Err(DevtoolError::container(
                container_id,
                "remove",
                "container is running; stop it first",
            )),
            ContainerState::Missing => {
                debug!("Container {container_id} already removed");
                Ok(())
            }
            ContainerState::Stopped => {
                self.run_checked("remove", container_id, &["rm".to_string(), container_id.to_string()])
                    .await?;
                Ok(())
            }
        }
    }

    async fn state(&self, container: &str) -> DevtoolResult<ContainerState> {
        let args = vec![
            "inspect".to_string(),
            "--type".to_string(),
            "container".to_string(),
            "--format".to_string(),
            "{{.State.Status}}".to_string(),
            container.to_string(),
        ];
        let output = self.run("inspect", container, &args).await?;
        if output.success {
            Ok(parse_state(&output.stdout))
        } else if is_missing_error(&output.stderr) {
            Ok(ContainerState::Missing)
        } else {
            Err(DevtoolError::container(container, "inspect", output.stderr))
        }
    }

    async fn info(&self) -> DevtoolResult<String> {
        self.run_checked("info", &self.engine, &["info".to_string()]).await?;
        let version = self
            .run_checked("version", &self.engine, &["--version".to_string()])
            .await?;
        Ok(version.lines().next().unwrap_or_default().to_string())
    }
}
