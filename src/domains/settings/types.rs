use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::domains::hooks::HookStage;

pub const DEFAULT_ENGINE: &str = "docker";
pub const DEFAULT_IMAGE: &str = "devtool/base:latest";
pub const DEFAULT_WORKDIR: &str = "/workspace";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DevtoolConfig {
    /// Directory holding the session store.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Root under which session worktrees are materialized.
    #[serde(default)]
    pub worktree_root: Option<PathBuf>,
    /// Branch that sessions fork from and squash into; detected when unset.
    #[serde(default)]
    pub integration_branch: Option<String>,
    #[serde(default = "default_true")]
    pub cleanup_worktree_on_merge: bool,
    #[serde(default)]
    pub container: ContainerSettings,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    #[serde(default)]
    pub hooks: Vec<CommandHookConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ContainerSettings {
    #[serde(default = "default_engine")]
    pub engine: String,
    #[serde(default = "default_image")]
    pub image: String,
    #[serde(default = "default_workdir")]
    pub workdir: String,
    #[serde(default = "default_command")]
    pub command: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub volumes: Vec<VolumeMount>,
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,
}

/// Named volume mounted read-write into every session container
/// (editor settings, extension caches, package caches).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub name: String,
    pub target: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TimeoutSettings {
    #[serde(default = "default_git_secs")]
    pub git_secs: u64,
    #[serde(default = "default_container_secs")]
    pub container_secs: u64,
    #[serde(default = "default_hook_secs")]
    pub hook_secs: u64,
    #[serde(default = "default_lock_wait_ms")]
    pub lock_wait_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CommandHookConfig {
    pub stage: HookStage,
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub order: i32,
    #[serde(default)]
    pub required: bool,
    /// Append the command's stdout to the session's commit message draft.
    #[serde(default)]
    pub append_output: bool,
}

fn default_true() -> bool {
    true
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("devtool")
}

fn default_engine() -> String {
    DEFAULT_ENGINE.to_string()
}

fn default_image() -> String {
    DEFAULT_IMAGE.to_string()
}

fn default_workdir() -> String {
    DEFAULT_WORKDIR.to_string()
}

fn default_command() -> Vec<String> {
    vec!["sleep".to_string(), "infinity".to_string()]
}

fn default_stop_grace_secs() -> u64 {
    10
}

fn default_git_secs() -> u64 {
    120
}

fn default_container_secs() -> u64 {
    60
}

fn default_hook_secs() -> u64 {
    300
}

fn default_lock_wait_ms() -> u64 {
    5_000
}

impl Default for DevtoolConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            worktree_root: None,
            integration_branch: None,
            cleanup_worktree_on_merge: true,
            container: ContainerSettings::default(),
            timeouts: TimeoutSettings::default(),
            hooks: Vec::new(),
        }
    }
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            image: default_image(),
            workdir: default_workdir(),
            command: default_command(),
            env: BTreeMap::new(),
            volumes: Vec::new(),
            stop_grace_secs: default_stop_grace_secs(),
        }
    }
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            git_secs: default_git_secs(),
            container_secs: default_container_secs(),
            hook_secs: default_hook_secs(),
            lock_wait_ms: default_lock_wait_ms(),
        }
    }
}

impl DevtoolConfig {
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("sessions.db")
    }

    pub fn worktree_root(&self) -> PathBuf {
        self.worktree_root
            .clone()
            .unwrap_or_else(|| self.data_dir.join("worktrees"))
    }
}

impl TimeoutSettings {
    pub fn git(&self) -> Duration {
        Duration::from_secs(self.git_secs)
    }

    pub fn container(&self) -> Duration {
        Duration::from_secs(self.container_secs)
    }

    pub fn hook(&self) -> Duration {
        Duration::from_secs(self.hook_secs)
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_ms)
    }
}
