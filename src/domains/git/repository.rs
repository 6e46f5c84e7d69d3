use anyhow::{Context, Result, anyhow};
use git2::{BranchType, Oid, Repository};
use log::debug;
use std::path::{Path, PathBuf};

const FALLBACK_INTEGRATION_BRANCHES: [&str; 2] = ["main", "master"];

/// Resolve the working directory of the repository containing `path`.
pub fn discover_repository(path: &Path) -> Result<PathBuf> {
    let repo = Repository::discover(path)
        .with_context(|| format!("No git repository found at {}", path.display()))?;
    let workdir = repo
        .workdir()
        .ok_or_else(|| anyhow!("Repository at {} is bare", path.display()))?;
    Ok(workdir
        .canonicalize()
        .unwrap_or_else(|_| workdir.to_path_buf()))
}

/// Pick the branch sessions fork from and squash into: `origin/HEAD` when it
/// names a local branch, then `main`/`master`. The checked-out branch is never
/// used, since it changes under a session's feet; `None` means the repository
/// needs an explicit `integration_branch`.
pub fn detect_integration_branch(repo_path: &Path) -> Result<Option<String>> {
    let repo = Repository::open(repo_path)?;

    if let Ok(reference) = repo.find_reference("refs/remotes/origin/HEAD")
        && let Some(target) = reference.symbolic_target()
        && let Some(name) = target.strip_prefix("refs/remotes/origin/")
        && repo.find_branch(name, BranchType::Local).is_ok()
    {
        debug!("Integration branch '{name}' detected from origin/HEAD");
        return Ok(Some(name.to_string()));
    }

    Ok(FALLBACK_INTEGRATION_BRANCHES
        .into_iter()
        .find(|candidate| repo.find_branch(candidate, BranchType::Local).is_ok())
        .map(str::to_string))
}

pub fn normalize_branch_ref(branch: &str) -> String {
    if branch.starts_with("refs/") {
        branch.to_string()
    } else {
        format!("refs/heads/{branch}")
    }
}

pub fn resolve_branch_oid(repo: &Repository, branch: &str) -> Result<Oid> {
    let reference_name = normalize_branch_ref(branch);
    let reference = repo
        .find_reference(&reference_name)
        .with_context(|| format!("Failed to resolve reference '{reference_name}'"))?;

    reference
        .target()
        .ok_or_else(|| anyhow!("Reference '{reference_name}' has no target"))
}
