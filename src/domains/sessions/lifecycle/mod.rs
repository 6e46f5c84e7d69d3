pub mod bootstrapper;
pub mod cancellation;
pub mod finalizer;

use log::{info, warn};
use std::sync::Arc;

use crate::domains::containers::{ContainerRuntime, ContainerState, container_name};
use crate::domains::git::WorktreeManager;
use crate::domains::hooks::{HookDispatcher, HookReport};
use crate::domains::merge::{SquashOutcome, SquashRequest};
use crate::domains::sessions::entity::Session;
use crate::domains::sessions::repository::SessionStore;
use crate::domains::settings::ContainerSettings;
use crate::errors::DevtoolResult;

/// Collaborators every lifecycle coordinator borrows from the orchestrator.
pub struct LifecycleDeps {
    pub store: SessionStore,
    pub worktrees: WorktreeManager,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub hooks: HookDispatcher,
    pub container: ContainerSettings,
    pub cleanup_worktree_on_merge: bool,
}

/// Stop (if needed) and remove a session container. A container that is
/// already gone is reported through `warnings` instead of failing.
pub async fn teardown_container(
    runtime: &dyn ContainerRuntime,
    session_id: &str,
    container_id: &str,
    warnings: &mut Vec<String>,
) -> DevtoolResult<()> {
    match runtime.state(container_id).await? {
        ContainerState::Missing => {
            warn!("Container {container_id} of session '{session_id}' was already removed");
            warnings.push(format!("container {container_id} was already removed"));
            return Ok(());
        }
        ContainerState::Running => runtime.stop(container_id).await?,
        ContainerState::Stopped => {}
    }
    runtime.remove(container_id).await?;
    info!("Removed container {container_id} of session '{session_id}'");
    Ok(())
}

/// Remove a container left behind under the session's deterministic name by an
/// interrupted start. Returns true when something was removed.
pub async fn remove_stale_container(
    runtime: &dyn ContainerRuntime,
    session_id: &str,
) -> DevtoolResult<bool> {
    let name = container_name(session_id);
    match runtime.state(&name).await? {
        ContainerState::Missing => Ok(false),
        state => {
            warn!("Removing stale {state} container '{name}' left by an interrupted start");
            if state == ContainerState::Running {
                runtime.stop(&name).await?;
            }
            runtime.remove(&name).await?;
            Ok(true)
        }
    }
}

/// Squash request for `session` against the repository's integration branch.
pub async fn squash_request(
    deps: &LifecycleDeps,
    session: &Session,
    message: String,
) -> DevtoolResult<SquashRequest> {
    let integration_branch = deps.worktrees.integration_branch(&session.repo_path).await?;
    Ok(SquashRequest {
        session_id: session.id.clone(),
        repo_path: session.repo_path.clone(),
        worktree_path: session.worktree_path.clone(),
        branch: session.branch_name.clone(),
        integration_branch,
        message,
    })
}

/// A squash of the session's branch that reached the integration branch
/// without its commit id being recorded on the session.
pub async fn landed_squash(
    deps: &LifecycleDeps,
    session: &Session,
) -> DevtoolResult<Option<SquashOutcome>> {
    let request = squash_request(deps, session, String::new()).await?;
    deps.worktrees.find_landed_squash(request).await
}

pub fn hook_warnings(reports: &[HookReport]) -> Vec<String> {
    reports
        .iter()
        .filter(|r| r.is_warning())
        .map(|r| format!("hook '{}' at {}: {}", r.name, r.stage, r.outcome))
        .collect()
}
