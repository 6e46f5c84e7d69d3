pub mod doctor;
pub mod render;

use log::{debug, error};
use std::sync::Arc;

use crate::cli::{Cli, Command};
use crate::domains::containers::{ContainerRuntime, DockerCli};
use crate::domains::sessions::{AutoConfirm, Confirmer, SessionOrchestrator, StdinConfirmer};
use crate::domains::settings::{DevtoolConfig, load_config};
use crate::errors::{DevtoolError, DevtoolResult};
use crate::infrastructure::database::Database;

/// Rendered result of one command. `healthy` is false when the command ran
/// but found problems (doctor issues, reconcile drift).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub text: String,
    pub healthy: bool,
}

impl CommandOutput {
    fn ok(text: String) -> Self {
        Self {
            text,
            healthy: true,
        }
    }
}

pub struct App {
    config: DevtoolConfig,
    runtime: Arc<dyn ContainerRuntime>,
    orchestrator: SessionOrchestrator,
}

impl App {
    pub fn from_config(config: DevtoolConfig) -> DevtoolResult<Self> {
        let runtime: Arc<dyn ContainerRuntime> = Arc::new(DockerCli::new(
            &config.container,
            config.timeouts.container(),
        ));
        Self::with_runtime(config, runtime)
    }

    pub fn with_runtime(
        config: DevtoolConfig,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> DevtoolResult<Self> {
        let db = Database::new(Some(config.database_path()))
            .map_err(|e| DevtoolError::database(format!("{e:#}")))?;
        let orchestrator = SessionOrchestrator::from_config(&config, db, runtime.clone())?;
        Ok(Self {
            config,
            runtime,
            orchestrator,
        })
    }

    pub fn orchestrator(&self) -> &SessionOrchestrator {
        &self.orchestrator
    }

    /// Map one parsed command onto its orchestrator operation.
    pub async fn execute(&self, command: &Command, json: bool) -> DevtoolResult<CommandOutput> {
        let orchestrator = &self.orchestrator;
        let output = match command {
            Command::Start { repo, feature_name } => {
                let outcome = orchestrator.start(repo, feature_name).await?;
                text_or_json(json, &outcome, render::transition)?
            }
            Command::Retry { session_id } => {
                let outcome = orchestrator.retry(session_id).await?;
                text_or_json(json, &outcome, render::transition)?
            }
            Command::Resume { session_id } => {
                let outcome = orchestrator.resume(session_id).await?;
                text_or_json(json, &outcome, render::transition)?
            }
            Command::Pause { session_id } => {
                let outcome = orchestrator.pause(session_id).await?;
                text_or_json(json, &outcome, render::transition)?
            }
            Command::Finish {
                session_id,
                message,
                yes,
            } => {
                let confirmer: &dyn Confirmer = if *yes { &AutoConfirm } else { &StdinConfirmer };
                let outcome = orchestrator
                    .finish(session_id, message.as_deref(), confirmer)
                    .await?;
                text_or_json(json, &outcome, render::finish)?
            }
            Command::Abandon {
                session_id,
                delete_worktree,
            } => {
                let outcome = orchestrator.abandon(session_id, *delete_worktree).await?;
                text_or_json(json, &outcome, render::transition)?
            }
            Command::List { all } => {
                let sessions = orchestrator.list(*all)?;
                text_or_json(json, &sessions, |s| render::session_table(s))?
            }
            Command::Status { session_id } => {
                let report = orchestrator.status(session_id).await?;
                CommandOutput {
                    healthy: report.is_consistent(),
                    ..text_or_json(json, &report, render::session_report)?
                }
            }
            Command::Draft { session_id, text } => {
                let session = orchestrator.draft(session_id, text).await?;
                text_or_json(json, &session, |s| {
                    format!("Draft of '{}':\n{}", s.id, s.commit_message_draft)
                })?
            }
            Command::DeleteBranch { session_id } => {
                let session = orchestrator.delete_branch(session_id).await?;
                text_or_json(json, &session, |s| {
                    format!("Deleted branch '{}'", s.branch_name)
                })?
            }
            Command::Reconcile => {
                let report = orchestrator.reconcile().await?;
                CommandOutput {
                    healthy: report.is_clean(),
                    ..text_or_json(json, &report, render::reconcile)?
                }
            }
            Command::Doctor => {
                let report = doctor::run_doctor(&self.config, self.runtime.as_ref()).await;
                CommandOutput {
                    healthy: report.is_ready(),
                    ..text_or_json(json, &report, doctor::DoctorReport::render)?
                }
            }
        };
        Ok(output)
    }

    /// Error text including the session's last persisted state, when the
    /// failing command targeted one.
    pub fn describe_error(&self, command: &Command, err: &DevtoolError, json: bool) -> String {
        let last_known = err
            .session_id()
            .or_else(|| command.session_id())
            .and_then(|id| self.orchestrator.store().get(id).ok());
        if json {
            render::error_json(err, last_known.as_ref())
        } else {
            render::error(err, last_known.as_ref())
        }
    }
}

fn text_or_json<T: serde::Serialize>(
    json: bool,
    value: &T,
    text: impl FnOnce(&T) -> String,
) -> DevtoolResult<CommandOutput> {
    let text = if json {
        render::to_json(value)?
    } else {
        text(value)
    };
    Ok(CommandOutput::ok(text))
}

/// Run the parsed command line and return the process exit code.
pub async fn run(cli: Cli) -> i32 {
    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", report_plain(&err, cli.json));
            return err.exit_code();
        }
    };
    debug!("Using data dir {}", config.data_dir.display());

    let app = match App::from_config(config) {
        Ok(app) => app,
        Err(err) => {
            eprintln!("{}", report_plain(&err, cli.json));
            return err.exit_code();
        }
    };

    match app.execute(&cli.command, cli.json).await {
        Ok(output) => {
            println!("{}", output.text);
            if output.healthy { 0 } else { 1 }
        }
        Err(err) => {
            error!("{} failed: {err}", command_name(&cli.command));
            eprintln!("{}", app.describe_error(&cli.command, &err, cli.json));
            err.exit_code()
        }
    }
}

fn report_plain(err: &DevtoolError, json: bool) -> String {
    if json {
        render::error_json(err, None)
    } else {
        render::error(err, None)
    }
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Start { .. } => "start",
        Command::Retry { .. } => "retry",
        Command::Resume { .. } => "resume",
        Command::Pause { .. } => "pause",
        Command::Finish { .. } => "finish",
        Command::Abandon { .. } => "abandon",
        Command::List { .. } => "list",
        Command::Status { .. } => "status",
        Command::Draft { .. } => "draft",
        Command::DeleteBranch { .. } => "delete-branch",
        Command::Reconcile => "reconcile",
        Command::Doctor => "doctor",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::containers::InMemoryRuntime;
    use crate::domains::sessions::SessionStatus;
    use std::path::Path;
    use std::process::Command as Process;
    use tempfile::TempDir;

    fn git(path: &Path, args: &[&str]) {
        let output = Process::new("git")
            .args(args)
            .current_dir(path)
            .output()
            .unwrap();
        assert!(output.status.success(), "git {args:?} failed");
    }

    fn app() -> (TempDir, std::path::PathBuf, App) {
        let temp = TempDir::new().unwrap();
        let repo = temp.path().join("app");
        std::fs::create_dir_all(&repo).unwrap();
        git(&repo, &["init"]);
        git(&repo, &["config", "user.email", "test@example.com"]);
        git(&repo, &["config", "user.name", "Test User"]);
        std::fs::write(repo.join("README.md"), "x").unwrap();
        git(&repo, &["add", "."]);
        git(&repo, &["commit", "-m", "init"]);
        git(&repo, &["branch", "-M", "main"]);

        let config = DevtoolConfig {
            data_dir: temp.path().join("data"),
            integration_branch: Some("main".into()),
            ..DevtoolConfig::default()
        };
        let app = App::with_runtime(config, Arc::new(InMemoryRuntime::new())).unwrap();
        (temp, repo, app)
    }

    #[tokio::test]
    async fn start_list_and_status_through_command_table() {
        let (_temp, repo, app) = app();
        let started = app
            .execute(
                &Command::Start {
                    repo: repo.clone(),
                    feature_name: "Add Retry Logic".into(),
                },
                false,
            )
            .await
            .unwrap();
        assert!(started.text.contains("is running"));

        let sessions = app.orchestrator().list(false).unwrap();
        assert_eq!(sessions.len(), 1);
        let id = sessions[0].id.clone();
        assert!(id.ends_with("-add-retry-logic"));

        let listed = app
            .execute(&Command::List { all: false }, true)
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&listed.text).unwrap();
        assert_eq!(parsed[0]["status"], "running");

        let status = app
            .execute(&Command::Status { session_id: id }, false)
            .await
            .unwrap();
        assert!(status.healthy);
        assert!(status.text.contains("status:    running"));
    }

    #[tokio::test]
    async fn errors_report_last_persisted_state() {
        let (_temp, repo, app) = app();
        let outcome = app
            .orchestrator()
            .start(&repo, "pause-twice")
            .await
            .unwrap();
        let id = outcome.session.id;
        app.orchestrator().pause(&id).await.unwrap();

        let command = Command::Pause {
            session_id: id.clone(),
        };
        let err = app.execute(&command, false).await.unwrap_err();
        assert_eq!(err.kind(), "invalid-state");
        let text = app.describe_error(&command, &err, false);
        assert!(text.starts_with("error[invalid-state]"));
        assert!(text.contains(&format!(
            "session '{id}' last persisted as {}",
            SessionStatus::Paused
        )));
    }

    #[tokio::test]
    async fn unknown_session_has_no_last_state() {
        let (_temp, _repo, app) = app();
        let command = Command::Resume {
            session_id: "nope".into(),
        };
        let err = app.execute(&command, false).await.unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert_eq!(
            app.describe_error(&command, &err, false),
            "error[not-found]: Session 'nope' not found"
        );
    }
}
