use std::collections::BTreeSet;

use anyhow::{Context, Result};
use git2::{MergeOptions, Oid, Repository, Signature, Status, StatusOptions, build::CheckoutBuilder};
use log::{debug, info, warn};

use crate::domains::git::branches::commit_subjects_between;
use crate::domains::git::operations::{
    get_uncommitted_changes_status, has_uncommitted_changes, uncommitted_sample_paths,
};
use crate::domains::git::repository::{normalize_branch_ref, resolve_branch_oid};
use crate::domains::merge::types::{MergeState, SquashOutcome, SquashRequest};
use crate::errors::{DevtoolError, DevtoolResult};

const OPERATION_LABEL: &str = "squash_merge";
const CONFLICT_SAMPLE_LIMIT: usize = 5;
const UNCOMMITTED_SAMPLE_LIMIT: usize = 3;
const COLLISION_SAMPLE_LIMIT: usize = 3;
const LANDED_SEARCH_LIMIT: usize = 500;

/// Land the feature branch as exactly one commit on the integration branch.
///
/// The new commit's tree is the feature tip's tree and its only parent is the
/// integration tip. The feature branch ref is left where it is. The integration
/// ref moves through libgit2's compare-and-swap on the first parent, so a
/// concurrent writer makes this fail instead of being overwritten.
pub fn squash_merge(request: &SquashRequest) -> DevtoolResult<SquashOutcome> {
    info!(
        "{OPERATION_LABEL}: squashing '{branch}' into '{integration}'",
        branch = request.branch,
        integration = request.integration_branch
    );

    ensure_worktree_clean(request)?;

    let repo = Repository::open(&request.repo_path)
        .map_err(|e| DevtoolError::git("open repository", e))?;
    let integration_oid = resolve_branch_oid(&repo, &request.integration_branch)
        .map_err(|e| DevtoolError::git("resolve integration branch", e))?;
    let feature_oid = resolve_branch_oid(&repo, &request.branch)
        .map_err(|e| DevtoolError::git("resolve feature branch", e))?;

    let merge_base = repo
        .merge_base(feature_oid, integration_oid)
        .map_err(|e| DevtoolError::git("merge-base", e))?;

    if merge_base != integration_oid {
        if let Some(landed) = landed_squash(&repo, request, feature_oid, integration_oid, merge_base)
            .map_err(|e| DevtoolError::git("look for landed squash", format!("{e:#}")))?
        {
            info!(
                "{OPERATION_LABEL}: '{}' already carries {} for '{}'; adopting it",
                request.integration_branch, landed.commit_id, request.branch
            );
            return Ok(landed);
        }

        let state = compute_merge_state(
            &repo,
            feature_oid,
            integration_oid,
            &request.branch,
            &request.integration_branch,
        )
        .map_err(|e| DevtoolError::git("simulate merge", e))?;

        let hint = if state.conflicting_paths.is_empty() {
            String::new()
        } else {
            format!(
                " Conflicting paths: {}",
                state.conflicting_paths.join(", ")
            )
        };
        return Err(DevtoolError::MergeConflict {
            session_id: request.session_id.clone(),
            branch: request.branch.clone(),
            integration_branch: request.integration_branch.clone(),
            message: format!(
                "'{}' advanced since the branch was created; rebase the branch onto it and retry.{hint}",
                request.integration_branch
            ),
        });
    }

    let subjects = commit_subjects_between(&repo, integration_oid, feature_oid)
        .map_err(|e| DevtoolError::git("list squashed commits", e))?;
    if subjects.is_empty() {
        warn!(
            "{OPERATION_LABEL}: branch '{}' has no commits beyond '{}'; recording an empty squash commit",
            request.branch, request.integration_branch
        );
    }

    let message = build_squash_message(&request.message, &request.branch, &subjects);

    let updates_checked_out_tree = integration_is_checked_out(&repo, &request.integration_branch);
    let checkout_allowed = updates_checked_out_tree
        && match checkout_blocker(&repo, feature_oid) {
            Ok(None) => true,
            Ok(Some(reason)) => {
                info!(
                    "{OPERATION_LABEL}: '{}' is checked out with {reason}; moving the ref only",
                    request.integration_branch
                );
                false
            }
            Err(err) => {
                warn!("{OPERATION_LABEL}: unable to inspect working tree: {err:#}");
                false
            }
        };

    let commit_id = create_squash_commit(&repo, request, feature_oid, integration_oid, &message)
        .map_err(|e| DevtoolError::git("create squash commit", format!("{e:#}")))?;

    let mut working_tree_updated = !updates_checked_out_tree;
    if checkout_allowed {
        debug!(
            "{OPERATION_LABEL}: updating working tree for '{}'",
            request.integration_branch
        );
        let mut checkout = CheckoutBuilder::new();
        checkout.force();
        match repo.checkout_head(Some(&mut checkout)) {
            Ok(()) => working_tree_updated = true,
            Err(err) => warn!(
                "{OPERATION_LABEL}: squash commit {commit_id} landed but checkout failed: {err}"
            ),
        }
    }

    info!(
        "{OPERATION_LABEL}: '{}' now at {commit_id} ({} commit(s) squashed from '{}')",
        request.integration_branch,
        subjects.len(),
        request.branch
    );

    Ok(SquashOutcome {
        commit_id: commit_id.to_string(),
        integration_branch: request.integration_branch.clone(),
        squashed_commits: subjects.len(),
        working_tree_updated,
    })
}

/// Confirmed message, a blank line, the originating branch, then the squashed
/// subjects the message does not already list as `- <subject>`.
pub fn build_squash_message(message: &str, branch: &str, subjects: &[String]) -> String {
    let message = message.trim();
    let mut out = message.to_string();
    out.push_str("\n\n");
    out.push_str(&branch_trailer(branch));

    let unlisted: Vec<&String> = subjects
        .iter()
        .filter(|subject| {
            let line = format!("- {subject}");
            !message.lines().any(|l| l.trim() == line)
        })
        .collect();
    if !unlisted.is_empty() {
        out.push_str("\n\nSquashed commits:");
        for subject in unlisted {
            out.push_str("\n- ");
            out.push_str(subject);
        }
    }
    out.push('\n');
    out
}

fn branch_trailer(branch: &str) -> String {
    format!("Squashed from branch {branch}")
}

/// Find a squash of `branch` that is already on the integration branch but was
/// never recorded, for example because the process died right after the ref
/// moved. It is the first-parent commit whose only parent is the fork point,
/// whose tree is the feature tip's tree and whose message names the branch.
pub fn find_landed_squash(request: &SquashRequest) -> DevtoolResult<Option<SquashOutcome>> {
    let repo = Repository::open(&request.repo_path)
        .map_err(|e| DevtoolError::git("open repository", e))?;
    let integration_oid = resolve_branch_oid(&repo, &request.integration_branch)
        .map_err(|e| DevtoolError::git("resolve integration branch", e))?;
    let feature_oid = resolve_branch_oid(&repo, &request.branch)
        .map_err(|e| DevtoolError::git("resolve feature branch", e))?;
    let merge_base = repo
        .merge_base(feature_oid, integration_oid)
        .map_err(|e| DevtoolError::git("merge-base", e))?;
    if merge_base == integration_oid {
        return Ok(None);
    }
    landed_squash(&repo, request, feature_oid, integration_oid, merge_base)
        .map_err(|e| DevtoolError::git("look for landed squash", format!("{e:#}")))
}

fn landed_squash(
    repo: &Repository,
    request: &SquashRequest,
    feature_oid: Oid,
    integration_oid: Oid,
    merge_base: Oid,
) -> Result<Option<SquashOutcome>> {
    let feature_tree = repo.find_commit(feature_oid)?.tree_id();
    let trailer = branch_trailer(&request.branch);

    let mut commit = repo.find_commit(integration_oid)?;
    for _ in 0..LANDED_SEARCH_LIMIT {
        if commit.id() == merge_base {
            break;
        }
        let is_squash = commit.parent_count() == 1
            && commit.parent_id(0)? == merge_base
            && commit.tree_id() == feature_tree
            && commit
                .message()
                .is_some_and(|m| m.lines().any(|l| l.trim() == trailer));
        if is_squash {
            let squashed_commits = commit_subjects_between(repo, merge_base, feature_oid)?.len();
            let working_tree_updated = !integration_is_checked_out(repo, &request.integration_branch)
                || repo
                    .workdir()
                    .map(get_uncommitted_changes_status)
                    .is_some_and(|status| status.is_ok_and(|s| !s.has_tracked_changes));
            return Ok(Some(SquashOutcome {
                commit_id: commit.id().to_string(),
                integration_branch: request.integration_branch.clone(),
                squashed_commits,
                working_tree_updated,
            }));
        }
        if commit.parent_count() == 0 {
            break;
        }
        commit = commit.parent(0)?;
    }
    Ok(None)
}

/// Why the integration checkout must not be rewritten: tracked edits, or
/// untracked/ignored files sitting where the squashed tree has a file.
fn checkout_blocker(repo: &Repository, feature_oid: Oid) -> Result<Option<String>> {
    let Some(workdir) = repo.workdir() else {
        return Ok(Some("no working tree".to_string()));
    };
    if get_uncommitted_changes_status(workdir)?.has_tracked_changes {
        return Ok(Some("tracked changes".to_string()));
    }

    let tree = repo.find_commit(feature_oid)?.tree()?;
    let mut opts = StatusOptions::new();
    opts.include_untracked(true)
        .recurse_untracked_dirs(true)
        .include_ignored(true)
        .recurse_ignored_dirs(true)
        .exclude_submodules(true);
    let statuses = repo.statuses(Some(&mut opts))?;

    let collisions: Vec<String> = statuses
        .iter()
        .filter(|entry| entry.status().intersects(Status::WT_NEW | Status::IGNORED))
        .filter_map(|entry| entry.path().map(str::to_string))
        .filter(|path| tree.get_path(std::path::Path::new(path)).is_ok())
        .collect();
    if collisions.is_empty() {
        return Ok(None);
    }

    let sample: Vec<&str> = collisions
        .iter()
        .take(COLLISION_SAMPLE_LIMIT)
        .map(String::as_str)
        .collect();
    Ok(Some(format!(
        "untracked files the squash would overwrite ({})",
        sample.join(", ")
    )))
}

fn ensure_worktree_clean(request: &SquashRequest) -> DevtoolResult<()> {
    if !request.worktree_path.exists() {
        return Ok(());
    }

    let dirty = has_uncommitted_changes(&request.worktree_path)
        .map_err(|e| DevtoolError::git("inspect worktree", e))?;
    if dirty {
        let sample = uncommitted_sample_paths(&request.worktree_path, UNCOMMITTED_SAMPLE_LIMIT)
            .unwrap_or_default();
        return Err(DevtoolError::UncommittedChanges {
            path: request.worktree_path.display().to_string(),
            sample,
        });
    }
    Ok(())
}

fn integration_is_checked_out(repo: &Repository, branch: &str) -> bool {
    matches!(
        repo.head(),
        Ok(head) if head.is_branch() && head.shorthand() == Some(branch)
    )
}

fn create_squash_commit(
    repo: &Repository,
    request: &SquashRequest,
    feature_oid: Oid,
    integration_oid: Oid,
    message: &str,
) -> Result<Oid> {
    let feature_commit = repo.find_commit(feature_oid)?;
    let parent_commit = repo.find_commit(integration_oid).with_context(|| {
        format!(
            "Failed to locate integration commit '{}'",
            request.integration_branch
        )
    })?;
    let tree = feature_commit.tree()?;

    let signature = match repo.signature() {
        Ok(sig) => sig,
        Err(err) => {
            debug!("{OPERATION_LABEL}: no git identity configured ({err}); using fallback");
            Signature::now("devtool", "devtool@localhost")?
        }
    };

    let reference_name = normalize_branch_ref(&request.integration_branch);
    let oid = repo
        .commit(
            Some(&reference_name),
            &signature,
            &signature,
            message,
            &tree,
            &[&parent_commit],
        )
        .with_context(|| {
            format!(
                "Failed to create squash commit for '{}' on '{}'",
                request.branch, request.integration_branch
            )
        })?;
    Ok(oid)
}

pub fn compute_merge_state(
    repo: &Repository,
    feature_oid: Oid,
    integration_oid: Oid,
    feature_branch: &str,
    integration_branch: &str,
) -> Result<MergeState> {
    if !commits_ahead(repo, feature_oid, integration_oid)? {
        return Ok(MergeState {
            has_conflicts: false,
            conflicting_paths: Vec::new(),
            is_up_to_date: true,
        });
    }

    let feature_commit = repo.find_commit(feature_oid).with_context(|| {
        format!("Failed to find commit {feature_oid} for branch '{feature_branch}'")
    })?;
    let integration_commit = repo.find_commit(integration_oid).with_context(|| {
        format!("Failed to find commit {integration_oid} for branch '{integration_branch}'")
    })?;

    let mut merge_opts = MergeOptions::new();
    merge_opts.fail_on_conflict(false);

    let index = repo
        .merge_commits(&feature_commit, &integration_commit, Some(&merge_opts))
        .with_context(|| {
            format!("Failed to simulate merge between '{feature_branch}' and '{integration_branch}'")
        })?;

    let conflicting_paths = if index.has_conflicts() {
        collect_conflicting_paths(&index)?
    } else {
        Vec::new()
    };

    Ok(MergeState {
        has_conflicts: !conflicting_paths.is_empty(),
        conflicting_paths,
        is_up_to_date: false,
    })
}

fn commits_ahead(repo: &Repository, feature_oid: Oid, integration_oid: Oid) -> Result<bool> {
    if feature_oid == integration_oid {
        return Ok(false);
    }

    let mut revwalk = repo.revwalk()?;
    revwalk.push(feature_oid)?;
    revwalk.hide(integration_oid).ok();

    Ok(revwalk.next().is_some())
}

fn collect_conflicting_paths(index: &git2::Index) -> Result<Vec<String>> {
    let mut seen = BTreeSet::new();
    let conflicts = index
        .conflicts()
        .with_context(|| "Failed to read merge conflicts")?;

    for conflict in conflicts {
        let conflict = conflict?;
        let path = conflict
            .our
            .as_ref()
            .and_then(index_entry_path)
            .or_else(|| conflict.their.as_ref().and_then(index_entry_path))
            .or_else(|| conflict.ancestor.as_ref().and_then(index_entry_path));

        if let Some(path) = path {
            seen.insert(path);
            if seen.len() == CONFLICT_SAMPLE_LIMIT {
                break;
            }
        }
    }

    Ok(seen.into_iter().collect())
}

fn index_entry_path(entry: &git2::IndexEntry) -> Option<String> {
    std::str::from_utf8(entry.path.as_ref())
        .ok()
        .map(|s| s.trim_end_matches(char::from(0)).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::process::Command;
    use tempfile::TempDir;

    fn git(path: &Path, args: &[&str]) -> String {
        let output = Command::new("git").args(args).current_dir(path).output().unwrap();
        assert!(
            output.status.success(),
            "git {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    fn init_repo(path: &Path) {
        std::fs::create_dir_all(path).unwrap();
        git(path, &["init"]);
        git(path, &["config", "user.email", "test@example.com"]);
        git(path, &["config", "user.name", "Test User"]);
        std::fs::write(path.join("README.md"), "initial").unwrap();
        git(path, &["add", "."]);
        git(path, &["commit", "-m", "Initial commit"]);
        git(path, &["branch", "-M", "main"]);
    }

    fn commit_file(path: &Path, name: &str, contents: &str, message: &str) {
        let file_path = path.join(name);
        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(file_path, contents).unwrap();
        git(path, &["add", "."]);
        git(path, &["commit", "-m", message]);
    }

    struct Fixture {
        _temp: TempDir,
        repo: std::path::PathBuf,
        worktree: std::path::PathBuf,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let repo = temp.path().join("repo");
        init_repo(&repo);
        let worktree = temp.path().join("wt");
        git(
            &repo,
            &["worktree", "add", "-b", "250906-add-retry-logic", worktree.to_str().unwrap()],
        );
        Fixture {
            _temp: temp,
            repo,
            worktree,
        }
    }

    fn request(f: &Fixture, message: &str) -> SquashRequest {
        SquashRequest {
            session_id: "250906-add-retry-logic".into(),
            repo_path: f.repo.clone(),
            worktree_path: f.worktree.clone(),
            branch: "250906-add-retry-logic".into(),
            integration_branch: "main".into(),
            message: message.into(),
        }
    }

    #[test]
    fn squash_is_a_single_commit_with_feature_tree() {
        let f = fixture();
        commit_file(&f.worktree, "src/net.rs", "retry\n", "add retry loop");
        commit_file(&f.worktree, "src/net.rs", "retry with backoff\n", "add backoff");

        let main_before = git(&f.repo, &["rev-parse", "main"]);
        let feature_before = git(&f.repo, &["rev-parse", "250906-add-retry-logic"]);

        let outcome = squash_merge(&request(&f, "Add retry logic to network client")).unwrap();
        assert_eq!(outcome.squashed_commits, 2);
        assert!(outcome.working_tree_updated);

        let main_after = git(&f.repo, &["rev-parse", "main"]);
        assert_eq!(main_after, outcome.commit_id);
        assert_eq!(git(&f.repo, &["rev-parse", "main^"]), main_before);
        assert_eq!(
            git(&f.repo, &["rev-list", "--count", &format!("{main_before}..main")]),
            "1"
        );
        assert_eq!(
            git(&f.repo, &["rev-parse", "main^{tree}"]),
            git(&f.repo, &["rev-parse", "250906-add-retry-logic^{tree}"])
        );
        assert_eq!(
            git(&f.repo, &["rev-parse", "250906-add-retry-logic"]),
            feature_before
        );

        let body = git(&f.repo, &["log", "-1", "--format=%B", "main"]);
        assert!(body.starts_with("Add retry logic to network client"));
        assert!(body.contains("250906-add-retry-logic"));
        assert!(body.contains("- add backoff"));

        assert_eq!(
            std::fs::read_to_string(f.repo.join("src/net.rs")).unwrap(),
            "retry with backoff\n"
        );
    }

    #[test]
    fn rejects_when_integration_advanced() {
        let f = fixture();
        commit_file(&f.worktree, "feature.txt", "f", "feature work");
        commit_file(&f.repo, "other.txt", "o", "mainline work");
        let main_before = git(&f.repo, &["rev-parse", "main"]);

        let err = squash_merge(&request(&f, "msg")).unwrap_err();
        assert!(matches!(err, DevtoolError::MergeConflict { .. }));
        assert_eq!(git(&f.repo, &["rev-parse", "main"]), main_before);
    }

    #[test]
    fn reports_conflicting_paths_when_advanced() {
        let f = fixture();
        commit_file(&f.worktree, "README.md", "feature", "feature edit");
        commit_file(&f.repo, "README.md", "mainline", "mainline edit");

        let err = squash_merge(&request(&f, "msg")).unwrap_err();
        match err {
            DevtoolError::MergeConflict { message, .. } => assert!(message.contains("README.md")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_uncommitted_changes_in_worktree() {
        let f = fixture();
        commit_file(&f.worktree, "a.txt", "a", "work");
        std::fs::write(f.worktree.join("dirty.txt"), "wip").unwrap();

        let err = squash_merge(&request(&f, "msg")).unwrap_err();
        match err {
            DevtoolError::UncommittedChanges { sample, .. } => {
                assert_eq!(sample, vec!["dirty.txt".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn leaves_dirty_checkout_untouched() {
        let f = fixture();
        commit_file(&f.worktree, "a.txt", "a", "work");
        std::fs::write(f.repo.join("README.md"), "local edit").unwrap();

        let outcome = squash_merge(&request(&f, "msg")).unwrap();
        assert!(!outcome.working_tree_updated);
        assert_eq!(
            std::fs::read_to_string(f.repo.join("README.md")).unwrap(),
            "local edit"
        );
    }

    #[test]
    fn untracked_file_in_the_way_keeps_checkout_untouched() {
        let f = fixture();
        commit_file(&f.worktree, "notes.txt", "from the branch\n", "add notes");
        std::fs::write(f.repo.join("notes.txt"), "operator scratch\n").unwrap();

        let outcome = squash_merge(&request(&f, "Add notes")).unwrap();

        assert!(!outcome.working_tree_updated);
        assert_eq!(git(&f.repo, &["rev-parse", "main"]), outcome.commit_id);
        assert_eq!(
            std::fs::read_to_string(f.repo.join("notes.txt")).unwrap(),
            "operator scratch\n"
        );
    }

    #[test]
    fn unrelated_untracked_file_does_not_block_checkout() {
        let f = fixture();
        commit_file(&f.worktree, "src/net.rs", "retry\n", "add retry loop");
        std::fs::write(f.repo.join("scratch.txt"), "keep me\n").unwrap();

        let outcome = squash_merge(&request(&f, "Add retry")).unwrap();

        assert!(outcome.working_tree_updated);
        assert_eq!(
            std::fs::read_to_string(f.repo.join("src/net.rs")).unwrap(),
            "retry\n"
        );
        assert_eq!(
            std::fs::read_to_string(f.repo.join("scratch.txt")).unwrap(),
            "keep me\n"
        );
    }

    #[test]
    fn integration_not_checked_out_reports_no_pending_update() {
        let f = fixture();
        commit_file(&f.worktree, "a.txt", "a", "work");
        git(&f.repo, &["checkout", "-b", "elsewhere"]);

        let outcome = squash_merge(&request(&f, "msg")).unwrap();
        assert!(outcome.working_tree_updated);
        assert_eq!(git(&f.repo, &["rev-parse", "main"]), outcome.commit_id);
    }

    #[test]
    fn finds_squash_that_already_landed() {
        let f = fixture();
        commit_file(&f.worktree, "a.txt", "a", "first");
        commit_file(&f.worktree, "b.txt", "b", "second");
        let req = request(&f, "Two changes");
        assert!(find_landed_squash(&req).unwrap().is_none());

        let landed = squash_merge(&req).unwrap();
        let found = find_landed_squash(&req).unwrap().unwrap();
        assert_eq!(found.commit_id, landed.commit_id);
        assert_eq!(found.squashed_commits, 2);

        let again = squash_merge(&req).unwrap();
        assert_eq!(again.commit_id, landed.commit_id);
        assert_eq!(git(&f.repo, &["rev-parse", "main"]), landed.commit_id);
    }

    #[test]
    fn unrelated_mainline_commit_is_not_a_landed_squash() {
        let f = fixture();
        commit_file(&f.worktree, "a.txt", "a", "feature work");
        commit_file(&f.repo, "a.txt", "a", "same change, different message");

        assert!(find_landed_squash(&request(&f, "msg")).unwrap().is_none());
    }

    #[test]
    fn message_skips_subjects_already_listed() {
        let msg = build_squash_message(
            "Summary\n\n- one\n- two",
            "250906-x",
            &["one".to_string(), "two".to_string(), "three".to_string()],
        );
        assert_eq!(
            msg,
            "Summary\n\n- one\n- two\n\nSquashed from branch 250906-x\n\nSquashed commits:\n- three\n"
        );
        assert_eq!(
            build_squash_message("Summary\n\n- one", "b", &["one".to_string()]),
            "Summary\n\n- one\n\nSquashed from branch b\n"
        );
    }

    #[test]
    fn message_records_branch_and_subjects() {
        let msg = build_squash_message(
            "  Summary line  ",
            "250906-x",
            &["one".to_string(), "two".to_string()],
        );
        assert_eq!(
            msg,
            "Summary line\n\nSquashed from branch 250906-x\n\nSquashed commits:\n- one\n- two\n"
        );
        assert_eq!(
            build_squash_message("s", "b", &[]),
            "s\n\nSquashed from branch b\n"
        );
    }
}
