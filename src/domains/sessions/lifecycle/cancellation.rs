use log::{info, warn};

use super::{
    LifecycleDeps, hook_warnings, landed_squash, remove_stale_container, teardown_container,
};
use crate::domains::hooks::HookStage;
use crate::domains::sessions::entity::{Session, SessionStatus};
use crate::errors::{DevtoolError, DevtoolResult};

pub struct CancellationCoordinator<'a> {
    deps: &'a LifecycleDeps,
}

#[derive(Debug, Clone, Default)]
pub struct CancellationConfig {
    /// Also force-remove the worktree. The branch is always kept.
    pub delete_worktree: bool,
}

#[derive(Debug, Clone)]
pub struct CancellationResult {
    pub session: Session,
    pub warnings: Vec<String>,
}

impl<'a> CancellationCoordinator<'a> {
    pub fn new(deps: &'a LifecycleDeps) -> Self {
        Self { deps }
    }

    pub async fn abandon(
        &self,
        mut session: Session,
        config: CancellationConfig,
    ) -> DevtoolResult<CancellationResult> {
        if session.status.is_terminal() {
            return Err(DevtoolError::invalid_state(
                &session.id,
                session.status,
                "a live session",
            ));
        }
        if session.status == SessionStatus::Finishing && session.merge_commit_id.is_some() {
            return Err(DevtoolError::invalid_state(
                &session.id,
                "finishing (merge already landed)",
                "finish to complete teardown",
            ));
        }
        if session.status == SessionStatus::Finishing {
            match landed_squash(self.deps, &session).await {
                Ok(Some(squash)) => {
                    session.merge_commit_id = Some(squash.commit_id.clone());
                    session.touch();
                    self.deps.store.put(&session)?;
                    return Err(DevtoolError::invalid_state(
                        &session.id,
                        "finishing (merge already landed)",
                        "finish to complete teardown",
                    ));
                }
                Ok(None) => {}
                Err(err) => warn!(
                    "Could not check whether '{}' already landed: {err}",
                    session.id
                ),
            }
        }

        info!("Abandoning session '{}' from {}", session.id, session.status);
        let mut warnings = hook_warnings(
            &self
                .deps
                .hooks
                .dispatch(HookStage::PreAbandon, &mut session)
                .await?,
        );

        let runtime = self.deps.runtime.as_ref();
        match session.container_id.clone() {
            Some(container_id) => {
                teardown_container(runtime, &session.id, &container_id, &mut warnings).await?
            }
            None => {
                if remove_stale_container(runtime, &session.id).await? {
                    warnings.push("removed a stale container from an interrupted start".into());
                }
            }
        }

        let hook_error = match self
            .deps
            .hooks
            .dispatch(HookStage::PostAbandon, &mut session)
            .await
        {
            Ok(reports) => {
                warnings.extend(hook_warnings(&reports));
                None
            }
            Err(err) => Some(err),
        };

        session.status = SessionStatus::Abandoned;
        session.container_id = None;
        session.touch();
        self.deps.store.put(&session)?;

        if config.delete_worktree
            && let Err(err) = self
                .deps
                .worktrees
                .remove_worktree(&session.repo_path, &session.worktree_path, true)
                .await
        {
            warn!("Failed to remove worktree of '{}': {err}", session.id);
            warnings.push(format!("worktree was not removed: {err}"));
        }

        if let Some(err) = hook_error {
            return Err(err);
        }

        info!(
            "Session '{}' abandoned; branch '{}' kept",
            session.id, session.branch_name
        );
        Ok(CancellationResult {
            session,
            warnings,
        })
    }
}
