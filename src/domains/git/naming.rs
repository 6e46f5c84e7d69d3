use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

pub const MAX_SLUG_LEN: usize = 40;
/// Highest numeric suffix tried before giving up on a date+slug pair.
pub const MAX_COLLISION_SUFFIX: u32 = 100;

/// Lowercase, map anything outside `[a-z0-9]` to `-`, collapse runs and trim.
/// Returns `None` when nothing usable remains.
pub fn normalize_slug(input: &str) -> Option<String> {
    let mut collapsed = String::with_capacity(input.len());
    let mut prev_hyphen = false;
    for ch in input.to_lowercase().chars() {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            collapsed.push(ch);
            prev_hyphen = false;
        } else {
            if !prev_hyphen {
                collapsed.push('-');
            }
            prev_hyphen = true;
        }
    }

    let truncated: String = collapsed.trim_matches('-').chars().take(MAX_SLUG_LEN).collect();
    let slug = truncated.trim_end_matches('-').to_string();
    if slug.is_empty() { None } else { Some(slug) }
}

pub fn dated_branch_name(date: NaiveDate, slug: &str) -> String {
    format!("{}-{slug}", date.format("%y%m%d"))
}

/// `base`, `base-2`, `base-3`, ... up to the collision limit.
pub fn branch_candidates(base: &str) -> impl Iterator<Item = String> + '_ {
    std::iter::once(base.to_string())
        .chain((2..=MAX_COLLISION_SUFFIX).map(move |n| format!("{base}-{n}")))
}

/// Per-repository directory under the worktree root, stable for a given repo path.
pub fn repo_worktree_dir(worktree_root: &Path, repo_path: &Path) -> PathBuf {
    let repo_name = repo_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .and_then(|n| normalize_slug(&n))
        .unwrap_or_else(|| "repo".to_string());

    let digest = Sha256::digest(repo_path.to_string_lossy().as_bytes());
    let short: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();

    worktree_root.join(format!("{repo_name}-{short}"))
}

pub fn worktree_path_for(worktree_root: &Path, repo_path: &Path, branch: &str) -> PathBuf {
    repo_worktree_dir(worktree_root, repo_path).join(branch)
}
