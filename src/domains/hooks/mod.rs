pub mod builtin;
pub mod dispatcher;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domains::sessions::entity::Session;

pub use builtin::{COMMIT_LOG_HOOK, CommitLogDraftHook, ShellCommandHook};
pub use dispatcher::{HookDispatcher, HookReport};

/// Named extension points around each lifecycle transition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum HookStage {
    PreStart,
    PostStart,
    PreResume,
    PostResume,
    PrePause,
    PostPause,
    PreFinish,
    PostFinish,
    PreAbandon,
    PostAbandon,
}

impl HookStage {
    pub const ALL: [HookStage; 10] = [
        HookStage::PreStart,
        HookStage::PostStart,
        HookStage::PreResume,
        HookStage::PostResume,
        HookStage::PrePause,
        HookStage::PostPause,
        HookStage::PreFinish,
        HookStage::PostFinish,
        HookStage::PreAbandon,
        HookStage::PostAbandon,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HookStage::PreStart => "pre-start",
            HookStage::PostStart => "post-start",
            HookStage::PreResume => "pre-resume",
            HookStage::PostResume => "post-resume",
            HookStage::PrePause => "pre-pause",
            HookStage::PostPause => "post-pause",
            HookStage::PreFinish => "pre-finish",
            HookStage::PostFinish => "post-finish",
            HookStage::PreAbandon => "pre-abandon",
            HookStage::PostAbandon => "post-abandon",
        }
    }
}

impl fmt::Display for HookStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HookStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HookStage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| format!("unknown hook stage '{s}'"))
    }
}

/// What a handler sees: the stage, a snapshot of the session, and a buffer
/// for text to append to the commit message draft.
#[derive(Debug)]
pub struct HookContext<'a> {
    pub stage: HookStage,
    pub session: &'a Session,
    draft_additions: Vec<String>,
}

impl<'a> HookContext<'a> {
    pub fn new(stage: HookStage, session: &'a Session) -> Self {
        Self {
            stage,
            session,
            draft_additions: Vec::new(),
        }
    }

    pub fn append_to_draft(&mut self, text: impl Into<String>) {
        self.draft_additions.push(text.into());
    }

    pub fn into_draft_additions(self) -> Vec<String> {
        self.draft_additions
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "lowercase")]
pub enum HookOutcome {
    Ok,
    Skipped(String),
    Failed(String),
}

impl HookOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, HookOutcome::Failed(_))
    }
}

impl fmt::Display for HookOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookOutcome::Ok => f.write_str("ok"),
            HookOutcome::Skipped(reason) => write!(f, "skipped: {reason}"),
            HookOutcome::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

#[async_trait]
pub trait HookHandler: Send + Sync {
    async fn run(&self, ctx: &mut HookContext<'_>) -> anyhow::Result<HookOutcome>;
}
