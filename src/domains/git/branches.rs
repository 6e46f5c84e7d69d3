use super::repository::resolve_branch_oid;
use anyhow::{Result, anyhow};
use git2::{BranchType, Oid, Repository, Sort};
use std::path::Path;

pub fn branch_exists(repo_path: &Path, branch_name: &str) -> Result<bool> {
    let repo = Repository::open(repo_path)?;

    let result = match repo.find_branch(branch_name, BranchType::Local) {
        Ok(_) => Ok(true),
        Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(false),
        // Treat corrupted branches as non-existent
        Err(e)
            if e.code() == git2::ErrorCode::InvalidSpec
                || e.code() == git2::ErrorCode::GenericError =>
        {
            Ok(false)
        }
        Err(e) => Err(anyhow!("Error checking branch existence: {e}")),
    };
    result
}

/// Create `branch_name` at the tip of `base_branch`. Never moves an existing
/// branch: a name that is already taken yields `Ok(None)` so the caller can try
/// the next candidate.
pub fn create_branch_from(
    repo_path: &Path,
    branch_name: &str,
    base_branch: &str,
) -> Result<Option<Oid>> {
    let repo = Repository::open(repo_path)?;
    let base_oid = resolve_branch_oid(&repo, base_branch)
        .map_err(|e| anyhow!("Base branch '{base_branch}' is unavailable: {e}"))?;
    let base_commit = repo.find_commit(base_oid)?;

    match repo.branch(branch_name, &base_commit, false) {
        Ok(_) => {
            log::info!("Created branch '{branch_name}' from '{base_branch}' at {base_oid}");
            Ok(Some(base_oid))
        }
        Err(e) if e.code() == git2::ErrorCode::Exists => Ok(None),
        Err(e) => Err(anyhow!("Failed to create branch '{branch_name}': {e}")),
    }
}

pub fn delete_branch(repo_path: &Path, branch_name: &str) -> Result<()> {
    let repo = Repository::open(repo_path)?;

    let mut branch = repo
        .find_branch(branch_name, BranchType::Local)
        .map_err(|e| anyhow!("Failed to delete branch {branch_name}: {e}"))?;

    branch
        .delete()
        .map_err(|e| anyhow!("Failed to delete branch {branch_name}: {e}"))?;

    Ok(())
}

/// Subjects of commits reachable from `tip` but not from `base`, oldest first.
pub fn commit_subjects_between(repo: &Repository, base: Oid, tip: Oid) -> Result<Vec<String>> {
    let mut revwalk = repo.revwalk()?;
    revwalk.set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)?;
    revwalk.push(tip)?;
    revwalk.hide(base)?;

    let mut subjects = Vec::new();
    for oid in revwalk {
        let commit = repo.find_commit(oid?)?;
        if let Some(summary) = commit.summary() {
            subjects.push(summary.to_string());
        }
    }
    Ok(subjects)
}
