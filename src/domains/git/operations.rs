use anyhow::Result;
use git2::{Repository, Status, StatusOptions};
use std::path::Path;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UncommittedChangesStatus {
    pub has_tracked_changes: bool,
    pub has_untracked_changes: bool,
}

impl UncommittedChangesStatus {
    pub fn is_dirty(&self) -> bool {
        self.has_tracked_changes || self.has_untracked_changes
    }
}

fn status_options() -> StatusOptions {
    let mut opts = StatusOptions::new();
    opts.include_untracked(true)
        .recurse_untracked_dirs(true)
        .include_ignored(false)
        .exclude_submodules(true);
    opts
}

pub fn get_uncommitted_changes_status(path: &Path) -> Result<UncommittedChangesStatus> {
    let repo = Repository::open(path)?;
    let statuses = repo.statuses(Some(&mut status_options()))?;

    let mut status = UncommittedChangesStatus::default();
    for entry in statuses.iter() {
        let flags = entry.status();
        if flags.contains(Status::WT_NEW) && !flags.intersects(index_flags()) {
            status.has_untracked_changes = true;
        } else if !flags.is_empty() && !flags.contains(Status::IGNORED) {
            status.has_tracked_changes = true;
        }
        if status.has_tracked_changes && status.has_untracked_changes {
            break;
        }
    }

    Ok(status)
}

pub fn has_uncommitted_changes(path: &Path) -> Result<bool> {
    Ok(get_uncommitted_changes_status(path)?.is_dirty())
}

/// Up to `limit` repository-relative paths with pending changes, for error hints.
pub fn uncommitted_sample_paths(path: &Path, limit: usize) -> Result<Vec<String>> {
    let repo = Repository::open(path)?;
    let statuses = repo.statuses(Some(&mut status_options()))?;

    Ok(statuses
        .iter()
        .filter(|entry| !entry.status().contains(Status::IGNORED))
        .filter_map(|entry| entry.path().map(str::to_string))
        .take(limit)
        .collect())
}

fn index_flags() -> Status {
    Status::INDEX_NEW
        | Status::INDEX_MODIFIED
        | Status::INDEX_DELETED
        | Status::INDEX_RENAMED
        | Status::INDEX_TYPECHANGE
}
