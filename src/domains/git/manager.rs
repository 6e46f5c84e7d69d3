use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use log::{debug, info, warn};
use tokio::task;
use tokio::time::timeout;

use super::{branches, naming, operations, repository, worktrees};
use crate::domains::merge::{self, SquashOutcome, SquashRequest};
use crate::errors::{DevtoolError, DevtoolResult};

const UNCOMMITTED_SAMPLE_LIMIT: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatedBranch {
    pub branch_name: String,
    pub worktree_path: PathBuf,
    pub integration_branch: String,
}

/// Version-control side of a session: feature branches, their worktrees and
/// the final squash. Every call runs on the blocking pool under `git_timeout`.
#[derive(Debug, Clone)]
pub struct WorktreeManager {
    worktree_root: PathBuf,
    integration_override: Option<String>,
    git_timeout: Duration,
}

impl WorktreeManager {
    pub fn new(
        worktree_root: PathBuf,
        integration_override: Option<String>,
        git_timeout: Duration,
    ) -> Self {
        Self {
            worktree_root,
            integration_override,
            git_timeout,
        }
    }

    pub fn worktree_root(&self) -> &Path {
        &self.worktree_root
    }

    pub fn worktree_path_for(&self, repo_path: &Path, branch: &str) -> PathBuf {
        naming::worktree_path_for(&self.worktree_root, repo_path, branch)
    }

    pub fn repo_worktree_dir(&self, repo_path: &Path) -> PathBuf {
        naming::repo_worktree_dir(&self.worktree_root, repo_path)
    }

    pub async fn discover_repository(&self, path: &Path) -> DevtoolResult<PathBuf> {
        let path = path.to_path_buf();
        self.run_blocking("discover repository", move || {
            repository::discover_repository(&path).map_err(|e| DevtoolError::git("discover", e))
        })
        .await
    }

    pub async fn integration_branch(&self, repo_path: &Path) -> DevtoolResult<String> {
        if let Some(branch) = &self.integration_override {
            return Ok(branch.clone());
        }
        let repo_path = repo_path.to_path_buf();
        self.run_blocking("detect integration branch", move || {
            repository::detect_integration_branch(&repo_path)
                .map_err(|e| DevtoolError::git("detect integration branch", e))?
                .ok_or_else(|| DevtoolError::ConfigError {
                    key: "integration_branch".to_string(),
                    message: format!(
                        "{} has no origin/HEAD, main or master branch; set the branch to squash into",
                        repo_path.display()
                    ),
                })
        })
        .await
    }

    /// Allocate `YYMMDD-slug` (or the first free `-N` variant) and check it out
    /// into its own worktree, branching from the integration tip.
    ///
    /// `reserved` holds names already claimed by session records. Callers must
    /// hold the allocation lock so two starts cannot race for the same name.
    pub async fn create_branch(
        &self,
        repo_path: &Path,
        slug: &str,
        date: NaiveDate,
        reserved: HashSet<String>,
    ) -> DevtoolResult<AllocatedBranch> {
        let normalized = naming::normalize_slug(slug).ok_or_else(|| {
            DevtoolError::invalid_input(
                "feature-name",
                format!("'{slug}' contains no usable characters"),
            )
        })?;
        let base = naming::dated_branch_name(date, &normalized);
        let integration_branch = self.integration_branch(repo_path).await?;

        let repo_path = repo_path.to_path_buf();
        let worktree_root = self.worktree_root.clone();
        let integration = integration_branch.clone();

        let (branch_name, worktree_path) = self
            .run_blocking("create branch", move || {
                allocate_branch(&repo_path, &worktree_root, &base, &integration, &reserved)
            })
            .await?;

        info!(
            "Allocated branch '{branch_name}' from '{integration_branch}' at {}",
            worktree_path.display()
        );

        Ok(AllocatedBranch {
            branch_name,
            worktree_path,
            integration_branch,
        })
    }

    /// Re-materialise the worktree of an existing branch if its directory is gone.
    /// Returns `true` when a worktree had to be created.
    pub async fn ensure_worktree(
        &self,
        repo_path: &Path,
        branch: &str,
        worktree_path: &Path,
    ) -> DevtoolResult<bool> {
        if worktree_path.exists() {
            return Ok(false);
        }
        let repo_path = repo_path.to_path_buf();
        let branch = branch.to_string();
        let worktree_path = worktree_path.to_path_buf();
        self.run_blocking("restore worktree", move || {
            worktrees::add_worktree_for_branch(&repo_path, &branch, &worktree_path)
                .map_err(|e| DevtoolError::git("restore worktree", e))?;
            Ok(true)
        })
        .await
    }

    /// Delete a session worktree. Without `force`, pending changes abort the removal.
    pub async fn remove_worktree(
        &self,
        repo_path: &Path,
        worktree_path: &Path,
        force: bool,
    ) -> DevtoolResult<()> {
        let repo_path = repo_path.to_path_buf();
        let worktree_path = worktree_path.to_path_buf();
        self.run_blocking("remove worktree", move || {
            if !worktree_path.exists() {
                debug!(
                    "Worktree {} already gone; pruning registration",
                    worktree_path.display()
                );
                return worktrees::prune_worktrees(&repo_path)
                    .map_err(|e| DevtoolError::git("prune worktrees", e));
            }

            if !force {
                let dirty = operations::has_uncommitted_changes(&worktree_path)
                    .map_err(|e| DevtoolError::git("inspect worktree", e))?;
                if dirty {
                    let sample = operations::uncommitted_sample_paths(
                        &worktree_path,
                        UNCOMMITTED_SAMPLE_LIMIT,
                    )
                    .unwrap_or_default();
                    return Err(DevtoolError::UncommittedChanges {
                        path: worktree_path.display().to_string(),
                        sample,
                    });
                }
            }

            worktrees::remove_worktree(&repo_path, &worktree_path)
                .map_err(|e| DevtoolError::git("remove worktree", e))
        })
        .await
    }

    pub async fn squash_merge(&self, request: SquashRequest) -> DevtoolResult<SquashOutcome> {
        self.run_blocking("squash merge", move || merge::squash_merge(&request))
            .await
    }

    /// Squash of `request.branch` already on the integration branch but never recorded.
    pub async fn find_landed_squash(
        &self,
        request: SquashRequest,
    ) -> DevtoolResult<Option<SquashOutcome>> {
        self.run_blocking("find landed squash", move || merge::find_landed_squash(&request))
            .await
    }

    pub async fn delete_branch(&self, repo_path: &Path, branch: &str) -> DevtoolResult<()> {
        let repo_path = repo_path.to_path_buf();
        let branch = branch.to_string();
        self.run_blocking("delete branch", move || {
            branches::delete_branch(&repo_path, &branch)
                .map_err(|e| DevtoolError::git("delete branch", e))
        })
        .await
    }

    /// Whether git still knows `worktree_path` as a worktree of `repo_path`.
    pub async fn is_registered_worktree(
        &self,
        repo_path: &Path,
        worktree_path: &Path,
    ) -> DevtoolResult<bool> {
        let repo_path = repo_path.to_path_buf();
        let worktree_path = worktree_path.to_path_buf();
        self.run_blocking("list worktrees", move || {
            worktrees::is_worktree_registered(&repo_path, &worktree_path)
                .map_err(|e| DevtoolError::git("list worktrees", e))
        })
        .await
    }

    async fn run_blocking<T, F>(&self, operation: &str, f: F) -> DevtoolResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> DevtoolResult<T> + Send + 'static,
    {
        match timeout(self.git_timeout, task::spawn_blocking(f)).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(DevtoolError::git(
                operation,
                format!("task panicked: {join_err}"),
            )),
            Err(_) => {
                warn!(
                    "Git operation '{operation}' exceeded {:?}",
                    self.git_timeout
                );
                Err(DevtoolError::timeout(operation, self.git_timeout.as_secs()))
            }
        }
    }
}

fn allocate_branch(
    repo_path: &Path,
    worktree_root: &Path,
    base: &str,
    integration: &str,
    reserved: &HashSet<String>,
) -> DevtoolResult<(String, PathBuf)> {
    for candidate in naming::branch_candidates(base) {
        if reserved.contains(&candidate) {
            continue;
        }

        let worktree_path = naming::worktree_path_for(worktree_root, repo_path, &candidate);
        if worktree_path.exists() {
            debug!(
                "Skipping '{candidate}': worktree directory {} exists",
                worktree_path.display()
            );
            continue;
        }

        let created = branches::create_branch_from(repo_path, &candidate, integration)
            .map_err(|e| DevtoolError::git("create branch", e))?;
        if created.is_none() {
            debug!("Skipping '{candidate}': branch already exists");
            continue;
        }

        if let Err(err) = worktrees::add_worktree_for_branch(repo_path, &candidate, &worktree_path)
        {
            // The branch was created a moment ago and holds no work yet.
            if let Err(cleanup) = branches::delete_branch(repo_path, &candidate) {
                warn!("Failed to drop branch '{candidate}' after worktree failure: {cleanup}");
            }
            return Err(DevtoolError::git("add worktree", err));
        }

        return Ok((candidate, worktree_path));
    }

    Err(DevtoolError::NameCollision {
        candidate: base.to_string(),
        attempts: naming::MAX_COLLISION_SUFFIX,
    })
}
