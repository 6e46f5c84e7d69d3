pub mod docker;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::domains::sessions::entity::Session;
use crate::domains::settings::ContainerSettings;
use crate::errors::DevtoolResult;

pub use docker::DockerCli;
pub use memory::InMemoryRuntime;

pub const CONTAINER_PREFIX: &str = "devtool-";
pub const SESSION_LABEL: &str = "devtool.session";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Running,
    Stopped,
    Missing,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ContainerState::Running => "running",
            ContainerState::Stopped => "stopped",
            ContainerState::Missing => "missing",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeBinding {
    pub source: String,
    pub target: String,
}

/// Everything an engine needs to instantiate one session container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub session_id: String,
    pub name: String,
    pub image: String,
    pub workdir: String,
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub volumes: Vec<VolumeBinding>,
}

impl ContainerSpec {
    pub fn new(session_id: &str, image: &str) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(SESSION_LABEL.to_string(), session_id.to_string());
        Self {
            session_id: session_id.to_string(),
            name: container_name(session_id),
            image: image.to_string(),
            workdir: String::new(),
            command: Vec::new(),
            env: BTreeMap::new(),
            labels,
            volumes: Vec::new(),
        }
    }

    pub fn workdir(mut self, workdir: impl Into<String>) -> Self {
        self.workdir = workdir.into();
        self
    }

    pub fn command(mut self, command: Vec<String>) -> Self {
        self.command = command;
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn volume(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.volumes.push(VolumeBinding {
            source: source.into(),
            target: target.into(),
        });
        self
    }

    /// The worktree is bind-mounted read-write at the configured workdir, next
    /// to every shared named volume.
    pub fn for_session(session: &Session, settings: &ContainerSettings) -> Self {
        let mut spec = ContainerSpec::new(&session.id, &settings.image)
            .workdir(settings.workdir.clone())
            .command(settings.command.clone())
            .volume(
                session.worktree_path.to_string_lossy().to_string(),
                settings.workdir.clone(),
            )
            .env("DEVTOOL_SESSION", session.id.clone())
            .env("DEVTOOL_BRANCH", session.branch_name.clone());

        for mount in &settings.volumes {
            spec = spec.volume(mount.name.clone(), mount.target.clone());
        }
        for (key, value) in &settings.env {
            spec = spec.env(key.clone(), value.clone());
        }
        spec
    }
}

pub fn container_name(session_id: &str) -> String {
    format!("{CONTAINER_PREFIX}{session_id}")
}

/// Engine boundary for session sandboxes. `start` and `stop` are idempotent;
/// `remove` is only legal on a stopped container.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    fn engine_name(&self) -> &str;

    async fn create(&self, spec: &ContainerSpec) -> DevtoolResult<String>;
    async fn start(&self, container_id: &str) -> DevtoolResult<()>;
    async fn stop(&self, container_id: &str) -> DevtoolResult<()>;
    async fn remove(&self, container_id: &str) -> DevtoolResult<()>;
    /// Accepts an id or a container name.
    async fn state(&self, container: &str) -> DevtoolResult<ContainerState>;

    async fn is_alive(&self, container_id: &str) -> DevtoolResult<bool> {
        Ok(self.state(container_id).await? != ContainerState::Missing)
    }

    /// Engine reachability for `doctor`; returns a short version string.
    async fn info(&self) -> DevtoolResult<String>;
}
