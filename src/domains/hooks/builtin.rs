use anyhow::{Context, anyhow};
use async_trait::async_trait;
use git2::Repository;
use log::debug;
use std::process::Stdio;
use tokio::process::Command;

use super::{HookContext, HookHandler, HookOutcome};
use crate::domains::git::branches::commit_subjects_between;
use crate::domains::git::repository::{detect_integration_branch, resolve_branch_oid};
use crate::domains::settings::CommandHookConfig;

pub const COMMIT_LOG_HOOK: &str = "commit-log-draft";
const STDERR_TAIL_LINES: usize = 5;

/// Appends the subjects of the session's commits to the draft so the final
/// message starts from what was actually done.
#[derive(Debug, Clone, Default)]
pub struct CommitLogDraftHook {
    integration_branch: Option<String>,
}

impl CommitLogDraftHook {
    pub fn new(integration_branch: Option<String>) -> Self {
        Self { integration_branch }
    }
}

#[async_trait]
impl HookHandler for CommitLogDraftHook {
    async fn run(&self, ctx: &mut HookContext<'_>) -> anyhow::Result<HookOutcome> {
        let repo_path = ctx.session.repo_path.clone();
        let branch = ctx.session.branch_name.clone();
        let configured = self.integration_branch.clone();

        let subjects = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<String>> {
            let integration = match configured {
                Some(b) => b,
                None => detect_integration_branch(&repo_path)?
                    .ok_or_else(|| anyhow!("no integration branch could be detected"))?,
            };
            let repo = Repository::open(&repo_path)?;
            let base = resolve_branch_oid(&repo, &integration)?;
            let tip = resolve_branch_oid(&repo, &branch)?;
            commit_subjects_between(&repo, base, tip)
        })
        .await
        .context("commit log task panicked")??;

        let existing = &ctx.session.commit_message_draft;
        let fresh: Vec<String> = subjects
            .into_iter()
            .map(|s| format!("- {s}"))
            .filter(|line| !existing.lines().any(|l| l.trim() == line))
            .collect();

        if fresh.is_empty() {
            return Ok(HookOutcome::Skipped("no new commits".to_string()));
        }

        debug!(
            "{COMMIT_LOG_HOOK}: adding {} commit subject(s) for '{}'",
            fresh.len(),
            ctx.session.id
        );
        ctx.append_to_draft(fresh.join("\n"));
        Ok(HookOutcome::Ok)
    }
}

/// A configured shell command run inside the session worktree.
#[derive(Debug, Clone)]
pub struct ShellCommandHook {
    argv: Vec<String>,
    append_output: bool,
}

impl ShellCommandHook {
    pub fn from_config(config: &CommandHookConfig) -> anyhow::Result<Self> {
        let argv = shell_words::split(&config.command)
            .with_context(|| format!("hook '{}': unparsable command", config.name))?;
        if argv.is_empty() {
            return Err(anyhow!("hook '{}': empty command", config.name));
        }
        Ok(Self {
            argv,
            append_output: config.append_output,
        })
    }
}

#[async_trait]
impl HookHandler for ShellCommandHook {
    async fn run(&self, ctx: &mut HookContext<'_>) -> anyhow::Result<HookOutcome> {
        let session = ctx.session;
        if !session.worktree_path.exists() {
            return Ok(HookOutcome::Skipped(format!(
                "worktree {} is missing",
                session.worktree_path.display()
            )));
        }

        let output = Command::new(&self.argv[0])
            .args(&self.argv[1..])
            .current_dir(&session.worktree_path)
            .env("DEVTOOL_SESSION", &session.id)
            .env("DEVTOOL_BRANCH", &session.branch_name)
            .env("DEVTOOL_STAGE", ctx.stage.as_str())
            .env("DEVTOOL_REPO", &session.repo_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to spawn '{}'", self.argv[0]))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let lines: Vec<&str> = stderr.lines().collect();
            let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
            return Err(anyhow!(
                "'{}' exited with {}{}",
                self.argv.join(" "),
                output.status,
                if tail.is_empty() {
                    String::new()
                } else {
                    format!(": {tail}")
                }
            ));
        }

        if self.append_output {
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !stdout.is_empty() {
                ctx.append_to_draft(stdout);
            }
        }

        Ok(HookOutcome::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::hooks::HookStage;
    use crate::domains::sessions::entity::Session;
    use chrono::Utc;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn git(path: &Path, args: &[&str]) {
        let output = std::process::Command::new("git")
            .args(args)
            .current_dir(path)
            .output()
            .unwrap();
        assert!(output.status.success(), "git {args:?} failed");
    }

    fn hook_config(command: &str, append_output: bool) -> CommandHookConfig {
        CommandHookConfig {
            stage: HookStage::PreFinish,
            name: "test".into(),
            command: command.into(),
            order: 0,
            required: false,
            append_output,
        }
    }

    fn session_at(worktree: PathBuf, repo: PathBuf, branch: &str) -> Session {
        Session::new_created(branch, repo, worktree, Utc::now())
    }

    #[tokio::test]
    async fn shell_hook_runs_in_worktree_and_appends_output() {
        let temp = TempDir::new().unwrap();
        let hook = ShellCommandHook::from_config(&hook_config(
            "sh -c 'echo \"ran in $(basename $PWD) for $DEVTOOL_SESSION\"'",
            true,
        ))
        .unwrap();
        let session = session_at(temp.path().to_path_buf(), temp.path().to_path_buf(), "250906-x");
        let mut ctx = HookContext::new(HookStage::PreFinish, &session);

        let outcome = hook.run(&mut ctx).await.unwrap();
        assert_eq!(outcome, HookOutcome::Ok);
        let additions = ctx.into_draft_additions();
        let dir = temp.path().file_name().unwrap().to_string_lossy().to_string();
        assert_eq!(additions, vec![format!("ran in {dir} for 250906-x")]);
    }

    #[tokio::test]
    async fn shell_hook_failure_carries_stderr() {
        let temp = TempDir::new().unwrap();
        let hook =
            ShellCommandHook::from_config(&hook_config("sh -c 'echo broken >&2; exit 3'", false))
                .unwrap();
        let session = session_at(temp.path().to_path_buf(), temp.path().to_path_buf(), "250906-x");
        let mut ctx = HookContext::new(HookStage::PreFinish, &session);

        let err = hook.run(&mut ctx).await.unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn rejects_unparsable_command() {
        assert!(ShellCommandHook::from_config(&hook_config("echo 'unterminated", false)).is_err());
        assert!(ShellCommandHook::from_config(&hook_config("   ", false)).is_err());
    }

    #[tokio::test]
    async fn commit_log_hook_lists_new_subjects_once() {
        let temp = TempDir::new().unwrap();
        let repo = temp.path().join("repo");
        std::fs::create_dir_all(&repo).unwrap();
        git(&repo, &["init"]);
        git(&repo, &["config", "user.email", "test@example.com"]);
        git(&repo, &["config", "user.name", "Test User"]);
        std::fs::write(repo.join("README.md"), "x").unwrap();
        git(&repo, &["add", "."]);
        git(&repo, &["commit", "-m", "init"]);
        git(&repo, &["branch", "-M", "main"]);
        git(&repo, &["checkout", "-b", "250906-x"]);
        std::fs::write(repo.join("a.txt"), "a").unwrap();
        git(&repo, &["add", "."]);
        git(&repo, &["commit", "-m", "add a"]);

        let hook = CommitLogDraftHook::new(Some("main".into()));
        let mut session = session_at(repo.clone(), repo.clone(), "250906-x");

        let mut ctx = HookContext::new(HookStage::PreFinish, &session);
        assert_eq!(hook.run(&mut ctx).await.unwrap(), HookOutcome::Ok);
        let additions = ctx.into_draft_additions();
        assert_eq!(additions, vec!["- add a".to_string()]);

        session.append_to_draft(&additions[0]);
        let mut ctx = HookContext::new(HookStage::PreFinish, &session);
        assert!(matches!(
            hook.run(&mut ctx).await.unwrap(),
            HookOutcome::Skipped(_)
        ));
    }
}
