use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Everything needed to squash one feature branch onto its integration branch.
#[derive(Debug, Clone)]
pub struct SquashRequest {
    pub session_id: String,
    pub repo_path: PathBuf,
    pub worktree_path: PathBuf,
    pub branch: String,
    pub integration_branch: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SquashOutcome {
    pub commit_id: String,
    pub integration_branch: String,
    pub squashed_commits: usize,
    /// False when the integration branch is checked out with local edits and
    /// only the ref was moved.
    pub working_tree_updated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MergeState {
    pub has_conflicts: bool,
    pub conflicting_paths: Vec<String>,
    pub is_up_to_date: bool,
}
