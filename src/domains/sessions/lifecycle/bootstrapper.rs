use chrono::{NaiveDate, Utc};
use log::{info, warn};
use std::path::Path;

use super::{LifecycleDeps, hook_warnings, remove_stale_container};
use crate::domains::containers::ContainerSpec;
use crate::domains::hooks::HookStage;
use crate::domains::sessions::entity::{Session, SessionStatus};
use crate::errors::{DevtoolError, DevtoolResult};

pub struct SessionBootstrapper<'a> {
    deps: &'a LifecycleDeps,
}

#[derive(Debug, Clone)]
pub struct BootstrapResult {
    pub session: Session,
    pub warnings: Vec<String>,
}

impl<'a> SessionBootstrapper<'a> {
    pub fn new(deps: &'a LifecycleDeps) -> Self {
        Self { deps }
    }

    /// Allocate the branch and worktree and record the session as `created`.
    /// Callers hold the allocation lock.
    pub async fn allocate(
        &self,
        repo_path: &Path,
        slug: &str,
        date: NaiveDate,
    ) -> DevtoolResult<Session> {
        let reserved = self.deps.store.reserved_ids()?;
        let allocated = self
            .deps
            .worktrees
            .create_branch(repo_path, slug, date, reserved)
            .await?;

        let session = Session::new_created(
            &allocated.branch_name,
            repo_path.to_path_buf(),
            allocated.worktree_path,
            Utc::now(),
        );
        if let Err(err) = self.deps.store.insert_new(&session) {
            warn!(
                "Branch '{}' and worktree {} exist but no session record could be written: {err}",
                session.branch_name,
                session.worktree_path.display()
            );
            return Err(err);
        }
        info!(
            "Created session '{}' in {}",
            session.id,
            session.worktree_path.display()
        );
        Ok(session)
    }

    /// Bring a `created` session up to `running`. Anything that fails after
    /// the worktree exists leaves the session `created` with its worktree
    /// intact; only an unstarted or rolled-back container is removed.
    pub async fn launch(&self, mut session: Session) -> DevtoolResult<BootstrapResult> {
        if session.status != SessionStatus::Created {
            return Err(DevtoolError::invalid_state(
                &session.id,
                session.status,
                "created",
            ));
        }

        let mut warnings = Vec::new();
        let restored = self
            .deps
            .worktrees
            .ensure_worktree(
                &session.repo_path,
                &session.branch_name,
                &session.worktree_path,
            )
            .await?;
        if restored {
            warn!(
                "Worktree for '{}' was missing and has been re-created",
                session.id
            );
            warnings.push(format!(
                "worktree {} was missing and has been re-created",
                session.worktree_path.display()
            ));
        }

        let draft_before = session.commit_message_draft.clone();
        warnings.extend(hook_warnings(
            &self
                .deps
                .hooks
                .dispatch(HookStage::PreStart, &mut session)
                .await?,
        ));
        if session.commit_message_draft != draft_before {
            self.deps.store.put(&session)?;
        }

        let runtime = self.deps.runtime.as_ref();
        if remove_stale_container(runtime, &session.id).await? {
            warnings.push("removed a stale container from an interrupted start".to_string());
        }

        let spec = ContainerSpec::for_session(&session, &self.deps.container);
        let container_id = runtime.create(&spec).await?;
        if let Err(err) = runtime.start(&container_id).await {
            warn!("Container {container_id} failed to start; removing it");
            if let Err(cleanup) = runtime.remove(&container_id).await {
                warn!("Failed to remove unstarted container {container_id}: {cleanup}");
            }
            return Err(err);
        }

        let mut running = session.clone();
        running.status = SessionStatus::Running;
        running.container_id = Some(container_id.clone());
        running.touch();

        let persisted = match self
            .deps
            .hooks
            .dispatch(HookStage::PostStart, &mut running)
            .await
        {
            Ok(reports) => {
                warnings.extend(hook_warnings(&reports));
                self.deps.store.put(&running)
            }
            Err(err) => Err(err),
        };

        if let Err(err) = persisted {
            self.roll_back_container(&session.id, &container_id).await;
            return Err(err);
        }

        info!("Session '{}' running in container {container_id}", running.id);
        Ok(BootstrapResult {
            session: running,
            warnings,
        })
    }

    async fn roll_back_container(&self, session_id: &str, container_id: &str) {
        let runtime = self.deps.runtime.as_ref();
        if let Err(err) = runtime.stop(container_id).await {
            warn!("Rollback: failed to stop {container_id} for '{session_id}': {err}");
            return;
        }
        if let Err(err) = runtime.remove(container_id).await {
            warn!("Rollback: failed to remove {container_id} for '{session_id}': {err}");
        }
    }
}
