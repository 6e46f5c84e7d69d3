use chrono::NaiveDate;
use devtool::domains::git::WorktreeManager;
use devtool::domains::merge::SquashRequest;
use std::collections::HashSet;
use std::path::Path;
use std::process::Command;
use std::time::Duration;
use tempfile::TempDir;

fn git(path: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(path)
        .output()
        .unwrap();
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
    std::fs::write(path.join("README.md"), "initial\n").unwrap();
    git(path, &["add", "."]);
    git(path, &["commit", "-m", "Initial commit"]);
    git(path, &["branch", "-M", "main"]);
}

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 9, 6).unwrap()
}

#[tokio::test]
async fn squash_is_a_pure_append_on_the_integration_branch() {
    let temp = TempDir::new().unwrap();
    let repo = temp.path().join("app");
    init_repo(&repo);
    let manager = WorktreeManager::new(temp.path().join("wt"), None, Duration::from_secs(30));

    let allocated = manager
        .create_branch(&repo, "add-retry-logic", date(), HashSet::new())
        .await
        .unwrap();
    let wt = &allocated.worktree_path;
    for (file, message) in [("a.rs", "Add a"), ("b.rs", "Add b"), ("c.rs", "Add c")] {
        std::fs::write(wt.join(file), message).unwrap();
        git(wt, &["add", "."]);
        git(wt, &["commit", "-m", message]);
    }
    let main_before = git(&repo, &["rev-parse", "main"]);
    let feature_tip = git(&repo, &["rev-parse", &allocated.branch_name]);

    let outcome = manager
        .squash_merge(SquashRequest {
            session_id: allocated.branch_name.clone(),
            repo_path: repo.clone(),
            worktree_path: wt.clone(),
            branch: allocated.branch_name.clone(),
            integration_branch: allocated.integration_branch.clone(),
            message: "Add retry logic to network client".into(),
        })
        .await
        .unwrap();

    assert_eq!(outcome.squashed_commits, 3);
    assert_eq!(git(&repo, &["rev-parse", "main"]), outcome.commit_id);
    assert_eq!(git(&repo, &["rev-list", "--count", &format!("{main_before}..main")]), "1");
    assert_eq!(
        git(&repo, &["rev-parse", "main^{tree}"]),
        git(&repo, &["rev-parse", &format!("{feature_tip}^{{tree}}")])
    );
    assert_eq!(git(&repo, &["rev-parse", &allocated.branch_name]), feature_tip);

    let body = git(&repo, &["log", "-1", "--format=%B", "main"]);
    assert!(body.contains("Add retry logic to network client"));
    assert!(body.contains("250906-add-retry-logic"));
}

#[tokio::test]
async fn worktree_roots_are_distinct_per_repository() {
    let temp = TempDir::new().unwrap();
    let first = temp.path().join("one").join("app");
    let second = temp.path().join("two").join("app");
    init_repo(&first);
    init_repo(&second);
    let manager = WorktreeManager::new(temp.path().join("wt"), None, Duration::from_secs(30));

    let a = manager
        .create_branch(&first, "same-name", date(), HashSet::new())
        .await
        .unwrap();
    let b = manager
        .create_branch(&second, "same-name", date(), HashSet::new())
        .await
        .unwrap();

    assert_eq!(a.branch_name, b.branch_name);
    assert_ne!(a.worktree_path, b.worktree_path);
    assert!(a.worktree_path.starts_with(manager.repo_worktree_dir(&first)));
}

#[tokio::test]
async fn reserved_names_are_skipped_even_without_a_branch() {
    let temp = TempDir::new().unwrap();
    let repo = temp.path().join("app");
    init_repo(&repo);
    let manager = WorktreeManager::new(temp.path().join("wt"), None, Duration::from_secs(30));

    let reserved: HashSet<String> = ["250906-taken".to_string()].into_iter().collect();
    let allocated = manager
        .create_branch(&repo, "taken", date(), reserved)
        .await
        .unwrap();
    assert_eq!(allocated.branch_name, "250906-taken-2");
}

#[tokio::test]
async fn dirty_worktree_is_kept_unless_forced() {
    let temp = TempDir::new().unwrap();
    let repo = temp.path().join("app");
    init_repo(&repo);
    let manager = WorktreeManager::new(temp.path().join("wt"), None, Duration::from_secs(30));

    let allocated = manager
        .create_branch(&repo, "dirty", date(), HashSet::new())
        .await
        .unwrap();
    std::fs::write(allocated.worktree_path.join("scratch.txt"), "wip").unwrap();

    let err = manager
        .remove_worktree(&repo, &allocated.worktree_path, false)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "uncommitted-changes");
    assert!(allocated.worktree_path.exists());

    manager
        .remove_worktree(&repo, &allocated.worktree_path, true)
        .await
        .unwrap();
    assert!(!allocated.worktree_path.exists());
    git(&repo, &["rev-parse", "--verify", &allocated.branch_name]);
}

#[tokio::test]
async fn missing_worktree_is_restored_from_its_branch() {
    let temp = TempDir::new().unwrap();
    let repo = temp.path().join("app");
    init_repo(&repo);
    let manager = WorktreeManager::new(temp.path().join("wt"), None, Duration::from_secs(30));

    let allocated = manager
        .create_branch(&repo, "restore-me", date(), HashSet::new())
        .await
        .unwrap();
    assert!(
        !manager
            .ensure_worktree(&repo, &allocated.branch_name, &allocated.worktree_path)
            .await
            .unwrap()
    );

    manager
        .remove_worktree(&repo, &allocated.worktree_path, true)
        .await
        .unwrap();
    assert!(
        manager
            .ensure_worktree(&repo, &allocated.branch_name, &allocated.worktree_path)
            .await
            .unwrap()
    );
    assert!(allocated.worktree_path.join("README.md").exists());
    assert_eq!(
        git(&allocated.worktree_path, &["rev-parse", "--abbrev-ref", "HEAD"]),
        allocated.branch_name
    );
}

#[tokio::test]
async fn unknown_integration_branch_is_a_config_error() {
    let temp = TempDir::new().unwrap();
    let repo = temp.path().join("app");
    init_repo(&repo);
    git(&repo, &["branch", "-M", "trunk"]);
    let manager = WorktreeManager::new(temp.path().join("wt"), None, Duration::from_secs(30));

    let err = manager
        .create_branch(&repo, "anything", date(), HashSet::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "config");

    let pinned = WorktreeManager::new(
        temp.path().join("wt"),
        Some("trunk".into()),
        Duration::from_secs(30),
    );
    let allocated = pinned
        .create_branch(&repo, "anything", date(), HashSet::new())
        .await
        .unwrap();
    assert_eq!(allocated.integration_branch, "trunk");
}
