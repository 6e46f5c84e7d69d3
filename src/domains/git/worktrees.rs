use anyhow::{Result, anyhow};
use git2::{BranchType, Repository, WorktreeAddOptions, WorktreePruneOptions};
use std::path::{Path, PathBuf};

/// Check out the existing local branch `branch_name` into a new worktree.
pub fn add_worktree_for_branch(
    repo_path: &Path,
    branch_name: &str,
    worktree_path: &Path,
) -> Result<()> {
    validate_branch_name(branch_name)?;

    if worktree_path.exists() {
        return Err(anyhow!(
            "Worktree path already exists: {}",
            worktree_path.display()
        ));
    }

    if let Some(parent) = worktree_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let repo = Repository::open(repo_path)?;

    // A registration whose directory vanished would block re-adding the same name.
    prune_worktrees(repo_path)?;

    let branch = repo
        .find_branch(branch_name, BranchType::Local)
        .map_err(|e| anyhow!("Branch '{branch_name}' not found: {e}"))?;
    let branch_ref = branch.into_reference();

    let mut opts = WorktreeAddOptions::new();
    opts.reference(Some(&branch_ref));

    repo.worktree(
        &worktree_name(branch_name),
        worktree_path,
        Some(&opts),
    )?;

    log::info!(
        "Successfully created worktree at: {}",
        worktree_path.display()
    );
    Ok(())
}

/// Remove the worktree directory, then prune its registration.
pub fn remove_worktree(repo_path: &Path, worktree_path: &Path) -> Result<()> {
    let repo = Repository::open(repo_path)?;

    // Find the worktree by path (handle path canonicalization for macOS)
    let canonical_target_path = worktree_path
        .canonicalize()
        .unwrap_or_else(|_| worktree_path.to_path_buf());

    let worktrees = repo.worktrees()?;
    for wt_name in worktrees.iter().flatten() {
        if let Ok(wt) = repo.find_worktree(wt_name) {
            let wt_path = wt.path();
            let canonical_wt_path = wt_path
                .canonicalize()
                .unwrap_or_else(|_| wt_path.to_path_buf());
            if canonical_wt_path == canonical_target_path || wt_path == worktree_path {
                if worktree_path.exists()
                    && let Err(e) = std::fs::remove_dir_all(worktree_path)
                {
                    return Err(anyhow!("Failed to remove worktree directory: {e}"));
                }

                if let Err(e) = wt.prune(Some(&mut WorktreePruneOptions::new())) {
                    log::warn!("Failed to prune worktree from git registry: {e}");
                }
                return Ok(());
            }
        }
    }

    if worktree_path.exists() {
        std::fs::remove_dir_all(worktree_path)?;
        Ok(())
    } else {
        Err(anyhow!("Worktree not found: {worktree_path:?}"))
    }
}

pub fn list_worktrees(repo_path: &Path) -> Result<Vec<PathBuf>> {
    let repo = Repository::open(repo_path)?;
    let mut worktree_paths = Vec::new();

    let worktrees = repo.worktrees()?;
    for wt_name in worktrees.iter().flatten() {
        if let Ok(wt) = repo.find_worktree(wt_name) {
            worktree_paths.push(wt.path().to_path_buf());
        }
    }

    Ok(worktree_paths)
}

pub fn prune_worktrees(repo_path: &Path) -> Result<()> {
    let repo = Repository::open(repo_path)?;
    let worktrees = repo.worktrees()?;

    for wt_name in worktrees.iter().flatten() {
        if let Ok(wt) = repo.find_worktree(wt_name)
            && wt.validate().is_err()
        {
            wt.prune(Some(&mut WorktreePruneOptions::new()))?;
        }
    }

    Ok(())
}

pub fn is_worktree_registered(repo_path: &Path, worktree_path: &Path) -> Result<bool> {
    let canonical_worktree_path = worktree_path
        .canonicalize()
        .unwrap_or_else(|_| worktree_path.to_path_buf());

    for wt_path in list_worktrees(repo_path)? {
        let canonical_wt_path = wt_path
            .canonicalize()
            .unwrap_or_else(|_| wt_path.to_path_buf());
        if canonical_wt_path == canonical_worktree_path {
            return Ok(true);
        }
    }

    Ok(false)
}

/// Worktree registrations live under `.git/worktrees/<name>`; slashes are not allowed there.
fn worktree_name(branch_name: &str) -> String {
    branch_name.replace('/', "-")
}

pub fn validate_branch_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(anyhow!("Branch name cannot be empty"));
    }
    if name.contains("..") || name.contains('\0') || name.contains('\\') {
        return Err(anyhow!("Invalid branch name"));
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '_' | '.');
    if !name.chars().all(allowed) {
        return Err(anyhow!("Branch name contains invalid characters"));
    }
    Ok(())
}
