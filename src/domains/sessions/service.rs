use chrono::{Local, NaiveDate};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::domains::containers::{ContainerRuntime, ContainerSpec, ContainerState, container_name};
use crate::domains::git::WorktreeManager;
use crate::domains::hooks::{
    COMMIT_LOG_HOOK, CommitLogDraftHook, HookDispatcher, HookStage, ShellCommandHook,
};
use crate::domains::sessions::confirm::Confirmer;
use crate::domains::sessions::entity::{Session, SessionStatus};
use crate::domains::sessions::lifecycle::bootstrapper::SessionBootstrapper;
use crate::domains::sessions::lifecycle::cancellation::{
    CancellationConfig, CancellationCoordinator,
};
use crate::domains::sessions::lifecycle::finalizer::{FinishOutcome, SessionFinalizer};
use crate::domains::sessions::lifecycle::{LifecycleDeps, hook_warnings, remove_stale_container};
use crate::domains::sessions::lock::{ALLOCATION_LOCK_KEY, SessionLock, session_lock_key};
use crate::domains::sessions::repository::SessionStore;
use crate::domains::settings::DevtoolConfig;
use crate::errors::{DevtoolError, DevtoolResult};
use crate::infrastructure::database::Database;

#[derive(Debug, Clone, Serialize)]
pub struct TransitionOutcome {
    pub session: Session,
    /// Non-fatal problems: optional hook failures, resources found already gone.
    pub warnings: Vec<String>,
}

/// A session record checked against what actually exists on the host.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session: Session,
    pub container_state: Option<ContainerState>,
    pub worktree_present: bool,
    pub drift: Vec<String>,
}

impl SessionReport {
    pub fn is_consistent(&self) -> bool {
        self.drift.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub sessions: Vec<SessionReport>,
    /// Directories under a managed repository's worktree dir with no session record.
    pub orphan_worktrees: Vec<PathBuf>,
}

impl ReconcileReport {
    pub fn drifted(&self) -> impl Iterator<Item = &SessionReport> {
        self.sessions.iter().filter(|r| !r.is_consistent())
    }

    pub fn is_clean(&self) -> bool {
        self.drifted().next().is_none() && self.orphan_worktrees.is_empty()
    }
}

/// Drives sessions through `created -> running <-> paused -> finishing ->
/// merged`, with `abandoned` reachable from any live state. Every transition
/// runs under the session's cross-process lock and persists only fully
/// completed steps.
pub struct SessionOrchestrator {
    deps: LifecycleDeps,
    lock_wait: Duration,
}

impl SessionOrchestrator {
    pub fn new(
        store: SessionStore,
        worktrees: WorktreeManager,
        runtime: Arc<dyn ContainerRuntime>,
        hooks: HookDispatcher,
        config: &DevtoolConfig,
    ) -> Self {
        Self {
            deps: LifecycleDeps {
                store,
                worktrees,
                runtime,
                hooks,
                container: config.container.clone(),
                cleanup_worktree_on_merge: config.cleanup_worktree_on_merge,
            },
            lock_wait: config.timeouts.lock_wait(),
        }
    }

    /// Wire the orchestrator from configuration: built-in hooks plus every
    /// configured command hook.
    pub fn from_config(
        config: &DevtoolConfig,
        db: Database,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> DevtoolResult<Self> {
        let worktrees = WorktreeManager::new(
            config.worktree_root(),
            config.integration_branch.clone(),
            config.timeouts.git(),
        );
        let hooks = build_hook_dispatcher(config)?;
        Ok(Self::new(
            SessionStore::new(db),
            worktrees,
            runtime,
            hooks,
            config,
        ))
    }

    pub fn store(&self) -> &SessionStore {
        &self.deps.store
    }

    pub fn worktrees(&self) -> &WorktreeManager {
        &self.deps.worktrees
    }

    pub fn runtime(&self) -> &dyn ContainerRuntime {
        self.deps.runtime.as_ref()
    }

    pub fn hooks_mut(&mut self) -> &mut HookDispatcher {
        &mut self.deps.hooks
    }

    async fn lock(&self, session_id: &str) -> DevtoolResult<SessionLock> {
        SessionLock::acquire(
            self.deps.store.db(),
            &session_lock_key(session_id),
            session_id,
            self.lock_wait,
        )
        .await
    }

    pub async fn start(&self, repo_path: &Path, slug: &str) -> DevtoolResult<TransitionOutcome> {
        self.start_dated(repo_path, slug, Local::now().date_naive())
            .await
    }

    /// `start` with an explicit date for the `YYMMDD` branch prefix.
    pub async fn start_dated(
        &self,
        repo_path: &Path,
        slug: &str,
        date: NaiveDate,
    ) -> DevtoolResult<TransitionOutcome> {
        let repo_path = self.deps.worktrees.discover_repository(repo_path).await?;
        let bootstrapper = SessionBootstrapper::new(&self.deps);

        let session = {
            let _allocation = SessionLock::acquire(
                self.deps.store.db(),
                ALLOCATION_LOCK_KEY,
                slug,
                self.lock_wait,
            )
            .await?;
            bootstrapper.allocate(&repo_path, slug, date).await?
        };

        let _guard = self.lock(&session.id).await?;
        let result = bootstrapper.launch(session).await?;
        Ok(TransitionOutcome {
            session: result.session,
            warnings: result.warnings,
        })
    }

    /// Re-run the container half of `start` for a session left in `created`.
    /// The existing worktree is reused, never re-created alongside.
    pub async fn retry(&self, session_id: &str) -> DevtoolResult<TransitionOutcome> {
        let _guard = self.lock(session_id).await?;
        let session = self.deps.store.get(session_id)?;
        let result = SessionBootstrapper::new(&self.deps).launch(session).await?;
        Ok(TransitionOutcome {
            session: result.session,
            warnings: result.warnings,
        })
    }

    pub async fn resume(&self, session_id: &str) -> DevtoolResult<TransitionOutcome> {
        let _guard = self.lock(session_id).await?;
        let mut session = self.deps.store.get(session_id)?;
        if !matches!(
            session.status,
            SessionStatus::Running | SessionStatus::Paused
        ) {
            return Err(DevtoolError::invalid_state(
                session_id,
                session.status,
                "running or paused",
            ));
        }
        if !session.worktree_path.exists() {
            return Err(DevtoolError::consistency(
                session_id,
                format!(
                    "worktree {} is missing; restore it or abandon the session",
                    session.worktree_path.display()
                ),
            ));
        }
        let container_id = recorded_container(&session)?;

        let runtime = self.deps.runtime.as_ref();
        let state = runtime.state(&container_id).await?;
        if session.status == SessionStatus::Running && state == ContainerState::Running {
            debug!("Session '{session_id}' already running in {container_id}");
            return Ok(TransitionOutcome {
                session,
                warnings: Vec::new(),
            });
        }

        let prior = session.clone();
        let mut warnings =
            hook_warnings(&self.deps.hooks.dispatch(HookStage::PreResume, &mut session).await?);

        match state {
            ContainerState::Missing => {
                warn!(
                    "Container {container_id} of session '{session_id}' was removed externally; recreating"
                );
                remove_stale_container(runtime, session_id).await?;
                let spec = ContainerSpec::for_session(&session, &self.deps.container);
                let replacement = runtime.create(&spec).await?;
                if let Err(err) = runtime.start(&replacement).await {
                    if let Err(cleanup) = runtime.remove(&replacement).await {
                        warn!("Failed to remove unstarted container {replacement}: {cleanup}");
                    }
                    return Err(err);
                }
                warnings.push(format!(
                    "container {container_id} was missing; recreated as {replacement}"
                ));
                session.container_id = Some(replacement);
            }
            ContainerState::Stopped => runtime.start(&container_id).await?,
            ContainerState::Running => {}
        }

        session.status = SessionStatus::Running;
        session.touch();

        match self.deps.hooks.dispatch(HookStage::PostResume, &mut session).await {
            Ok(reports) => warnings.extend(hook_warnings(&reports)),
            Err(err) => {
                let mut restored = prior;
                restored.container_id = session.container_id.clone();
                if restored.status == SessionStatus::Paused
                    && let Some(id) = &restored.container_id
                    && let Err(stop_err) = runtime.stop(id).await
                {
                    warn!("Failed to stop {id} after aborted resume: {stop_err}");
                }
                self.deps.store.put(&restored)?;
                return Err(err);
            }
        }

        self.deps.store.put(&session)?;
        info!("Resumed session '{session_id}'");
        Ok(TransitionOutcome { session, warnings })
    }

    pub async fn pause(&self, session_id: &str) -> DevtoolResult<TransitionOutcome> {
        let _guard = self.lock(session_id).await?;
        let mut session = self.deps.store.get(session_id)?;
        if session.status != SessionStatus::Running {
            return Err(DevtoolError::invalid_state(
                session_id,
                session.status,
                "running",
            ));
        }
        let container_id = recorded_container(&session)?;
        let runtime = self.deps.runtime.as_ref();
        if runtime.state(&container_id).await? == ContainerState::Missing {
            return Err(missing_container(session_id, &container_id));
        }

        let mut warnings =
            hook_warnings(&self.deps.hooks.dispatch(HookStage::PrePause, &mut session).await?);

        runtime.stop(&container_id).await?;
        session.status = SessionStatus::Paused;
        session.touch();

        match self.deps.hooks.dispatch(HookStage::PostPause, &mut session).await {
            Ok(reports) => warnings.extend(hook_warnings(&reports)),
            Err(err) => {
                if let Err(start_err) = runtime.start(&container_id).await {
                    warn!("Failed to restart {container_id} after aborted pause: {start_err}");
                }
                return Err(err);
            }
        }

        self.deps.store.put(&session)?;
        info!("Paused session '{session_id}'");
        Ok(TransitionOutcome { session, warnings })
    }

    /// Squash the session onto its integration branch after `confirmer`
    /// accepts the accumulated message. Re-running `finish` on a session
    /// whose merge already landed completes the interrupted teardown.
    pub async fn finish(
        &self,
        session_id: &str,
        message: Option<&str>,
        confirmer: &dyn Confirmer,
    ) -> DevtoolResult<FinishOutcome> {
        let _guard = self.lock(session_id).await?;
        let session = self.deps.store.get(session_id)?;
        SessionFinalizer::new(&self.deps)
            .finish(session, message, confirmer)
            .await
    }

    pub async fn abandon(
        &self,
        session_id: &str,
        delete_worktree: bool,
    ) -> DevtoolResult<TransitionOutcome> {
        let _guard = self.lock(session_id).await?;
        let session = self.deps.store.get(session_id)?;
        let result = CancellationCoordinator::new(&self.deps)
            .abandon(session, CancellationConfig { delete_worktree })
            .await?;
        Ok(TransitionOutcome {
            session: result.session,
            warnings: result.warnings,
        })
    }

    /// Append operator text to the session's commit message draft.
    pub async fn draft(&self, session_id: &str, text: &str) -> DevtoolResult<Session> {
        if text.trim().is_empty() {
            return Err(DevtoolError::invalid_input("text", "draft text is empty"));
        }
        let _guard = self.lock(session_id).await?;
        let mut session = self.deps.store.get(session_id)?;
        if session.status.is_terminal() {
            return Err(DevtoolError::invalid_state(
                session_id,
                session.status,
                "a live session",
            ));
        }
        session.append_to_draft(text);
        session.touch();
        self.deps.store.put(&session)?;
        Ok(session)
    }

    /// Delete the feature branch of a merged or abandoned session. A retained
    /// worktree is removed first and must be clean.
    pub async fn delete_branch(&self, session_id: &str) -> DevtoolResult<Session> {
        let _guard = self.lock(session_id).await?;
        let session = self.deps.store.get(session_id)?;
        if !session.status.is_terminal() {
            return Err(DevtoolError::invalid_state(
                session_id,
                session.status,
                "merged or abandoned",
            ));
        }
        if session.worktree_path.exists() {
            self.deps
                .worktrees
                .remove_worktree(&session.repo_path, &session.worktree_path, false)
                .await?;
        }
        self.deps
            .worktrees
            .delete_branch(&session.repo_path, &session.branch_name)
            .await?;
        info!("Deleted branch '{}' of session '{session_id}'", session.branch_name);
        Ok(session)
    }

    pub fn list(&self, include_terminal: bool) -> DevtoolResult<Vec<Session>> {
        let sessions = self.deps.store.list()?;
        Ok(sessions
            .into_iter()
            .filter(|s| include_terminal || !s.status.is_terminal())
            .collect())
    }

    pub async fn status(&self, session_id: &str) -> DevtoolResult<SessionReport> {
        let session = self.deps.store.get(session_id)?;
        self.inspect(session).await
    }

    /// Report drift for every live session and orphaned worktrees under each
    /// managed repository. Nothing is repaired.
    pub async fn reconcile(&self) -> DevtoolResult<ReconcileReport> {
        let sessions = self.deps.store.list()?;
        let mut report = ReconcileReport::default();

        for session in sessions.iter().filter(|s| !s.status.is_terminal()) {
            report.sessions.push(self.inspect(session.clone()).await?);
        }

        let known: HashSet<&Path> = sessions.iter().map(|s| s.worktree_path.as_path()).collect();
        let repos: BTreeSet<&Path> = sessions.iter().map(|s| s.repo_path.as_path()).collect();
        for repo in repos {
            let dir = self.deps.worktrees.repo_worktree_dir(repo);
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => {
                    return Err(DevtoolError::io("scan worktrees", dir.display(), err));
                }
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() && !known.contains(path.as_path()) {
                    warn!("Orphaned worktree without session record: {}", path.display());
                    report.orphan_worktrees.push(path);
                }
            }
        }
        report.orphan_worktrees.sort();

        Ok(report)
    }

    async fn inspect(&self, session: Session) -> DevtoolResult<SessionReport> {
        let runtime = self.deps.runtime.as_ref();
        let worktree_present = session.worktree_path.exists();
        let mut drift = Vec::new();

        let container_state = match session.status {
            SessionStatus::Created => {
                let state = runtime.state(&container_name(&session.id)).await?;
                if state != ContainerState::Missing {
                    drift.push(format!(
                        "{state} container '{}' left by an interrupted start; retry removes it",
                        container_name(&session.id)
                    ));
                }
                Some(state)
            }
            SessionStatus::Running | SessionStatus::Paused | SessionStatus::Finishing => {
                match &session.container_id {
                    Some(id) => Some(runtime.state(id).await?),
                    None => None,
                }
            }
            SessionStatus::Merged | SessionStatus::Abandoned => None,
        };

        match (session.status, container_state) {
            (SessionStatus::Running | SessionStatus::Paused, Some(ContainerState::Missing)) => {
                drift.push("container is missing; resume recreates it".to_string());
            }
            (SessionStatus::Running, Some(ContainerState::Stopped)) => {
                drift.push("container stopped while the session is running".to_string());
            }
            (SessionStatus::Paused, Some(ContainerState::Running)) => {
                drift.push("container running while the session is paused".to_string());
            }
            _ => {}
        }

        if session.status == SessionStatus::Finishing {
            drift.push(if session.merge_commit_id.is_some() {
                "merge landed but teardown was interrupted; re-run finish".to_string()
            } else {
                "finish was interrupted before merging; re-run finish".to_string()
            });
        }

        if !session.status.is_terminal() {
            if !worktree_present {
                drift.push(format!(
                    "worktree {} is missing",
                    session.worktree_path.display()
                ));
            } else if !self
                .deps
                .worktrees
                .is_registered_worktree(&session.repo_path, &session.worktree_path)
                .await?
            {
                drift.push(format!(
                    "{} exists but is not a registered git worktree",
                    session.worktree_path.display()
                ));
            }
        }

        Ok(SessionReport {
            session,
            container_state,
            worktree_present,
            drift,
        })
    }
}

pub(crate) fn recorded_container(session: &Session) -> DevtoolResult<String> {
    session.container_id.clone().ok_or_else(|| {
        DevtoolError::consistency(
            &session.id,
            format!("status '{}' without a recorded container", session.status),
        )
    })
}

pub(crate) fn missing_container(session_id: &str, container_id: &str) -> DevtoolError {
    DevtoolError::consistency(
        session_id,
        format!("container {container_id} no longer exists; resume to recreate it or abandon"),
    )
}

pub fn build_hook_dispatcher(config: &DevtoolConfig) -> DevtoolResult<HookDispatcher> {
    let mut hooks = HookDispatcher::new(config.timeouts.hook());
    hooks.register(
        HookStage::PreFinish,
        COMMIT_LOG_HOOK,
        Arc::new(CommitLogDraftHook::new(config.integration_branch.clone())),
        0,
        false,
    );
    for hook in &config.hooks {
        let handler = ShellCommandHook::from_config(hook).map_err(|e| DevtoolError::ConfigError {
            key: format!("hooks.{}", hook.name),
            message: format!("{e:#}"),
        })?;
        hooks.register(hook.stage, &hook.name, Arc::new(handler), hook.order, hook.required);
    }
    Ok(hooks)
}
