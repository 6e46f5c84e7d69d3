use log::{info, warn};
use serde::Serialize;

use super::{LifecycleDeps, hook_warnings, landed_squash, squash_request, teardown_container};
use crate::domains::containers::ContainerState;
use crate::domains::hooks::HookStage;
use crate::domains::merge::SquashOutcome;
use crate::domains::sessions::confirm::{Confirmation, Confirmer};
use crate::domains::sessions::entity::{Session, SessionStatus};
use crate::domains::sessions::service::{missing_container, recorded_container};
use crate::errors::{DevtoolError, DevtoolResult};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum FinishOutcome {
    Merged {
        session: Session,
        /// Absent when an earlier, interrupted `finish` already landed the merge.
        squash: Option<SquashOutcome>,
        warnings: Vec<String>,
    },
    Declined {
        session: Session,
    },
    Cancelled {
        session: Session,
    },
}

impl FinishOutcome {
    pub fn session(&self) -> &Session {
        match self {
            FinishOutcome::Merged { session, .. }
            | FinishOutcome::Declined { session }
            | FinishOutcome::Cancelled { session } => session,
        }
    }
}

pub struct SessionFinalizer<'a> {
    deps: &'a LifecycleDeps,
}

impl<'a> SessionFinalizer<'a> {
    pub fn new(deps: &'a LifecycleDeps) -> Self {
        Self { deps }
    }

    pub async fn finish(
        &self,
        mut session: Session,
        message: Option<&str>,
        confirmer: &dyn Confirmer,
    ) -> DevtoolResult<FinishOutcome> {
        if session.status == SessionStatus::Finishing {
            if session.merge_commit_id.is_some() {
                info!(
                    "Merge for '{}' already landed; completing teardown",
                    session.id
                );
                return self.complete(session, None, Vec::new()).await;
            }
            if let Some(squash) = landed_squash(self.deps, &session).await? {
                return self.adopt(session, squash).await;
            }
            session = self.recover_interrupted(session).await?;
        }

        if !matches!(
            session.status,
            SessionStatus::Running | SessionStatus::Paused
        ) {
            return Err(DevtoolError::invalid_state(
                &session.id,
                session.status,
                "running or paused",
            ));
        }
        if let Some(squash) = landed_squash(self.deps, &session).await? {
            return self.adopt(session, squash).await;
        }
        let container_id = recorded_container(&session)?;
        if self.deps.runtime.state(&container_id).await? == ContainerState::Missing {
            return Err(missing_container(&session.id, &container_id));
        }

        let prior = session.clone();
        session.status = SessionStatus::Finishing;
        session.touch();
        self.deps.store.put(&session)?;

        let warnings = match self
            .deps
            .hooks
            .dispatch(HookStage::PreFinish, &mut session)
            .await
        {
            Ok(reports) => hook_warnings(&reports),
            Err(err) => return self.abort(&prior, err),
        };
        if let Err(err) = self.deps.store.put(&session) {
            return self.abort(&prior, err);
        }

        let proposed = compose_message(message, &session.commit_message_draft);
        if proposed.is_empty() {
            return self.abort(
                &prior,
                DevtoolError::invalid_input(
                    "message",
                    "no commit message given and the session draft is empty",
                ),
            );
        }

        let confirmation = match confirmer.confirm(&session, &proposed).await {
            Ok(confirmation) => confirmation,
            Err(err) => {
                return self.abort(
                    &prior,
                    DevtoolError::io("confirm merge", &session.id, format!("{err:#}")),
                );
            }
        };

        let accepted = match confirmation {
            Confirmation::Accept { message } if !message.trim().is_empty() => message,
            Confirmation::Accept { .. } => {
                return self.abort(
                    &prior,
                    DevtoolError::invalid_input("message", "confirmed message is empty"),
                );
            }
            Confirmation::Decline => {
                self.deps.store.put(&prior)?;
                info!("Merge of '{}' declined; back to {}", prior.id, prior.status);
                return Ok(FinishOutcome::Declined { session: prior });
            }
            Confirmation::Cancelled => {
                self.deps.store.put(&prior)?;
                info!("Merge of '{}' cancelled; back to {}", prior.id, prior.status);
                return Ok(FinishOutcome::Cancelled { session: prior });
            }
        };

        let request = match squash_request(self.deps, &session, accepted).await {
            Ok(request) => request,
            Err(err) => return self.abort(&prior, err),
        };
        let squash = match self.deps.worktrees.squash_merge(request).await {
            Ok(outcome) => outcome,
            Err(err @ DevtoolError::Timeout { .. }) => {
                // The blocking merge may still land; the next finish adopts it
                // or recovers the record.
                warn!(
                    "Squash merge of '{}' timed out; leaving it finishing",
                    session.id
                );
                return Err(err);
            }
            Err(err) => return self.abort(&prior, err),
        };

        // Durable marker that the merge landed; teardown resumes from here.
        session.merge_commit_id = Some(squash.commit_id.clone());
        self.deps.store.put(&session)?;

        self.complete(session, Some(squash), warnings).await
    }

    /// Tear down a session whose squash commit exists: container, post-finish
    /// hooks, `merged` record, then the worktree when configured.
    async fn complete(
        &self,
        mut session: Session,
        squash: Option<SquashOutcome>,
        mut warnings: Vec<String>,
    ) -> DevtoolResult<FinishOutcome> {
        if let Some(container_id) = session.container_id.clone() {
            teardown_container(
                self.deps.runtime.as_ref(),
                &session.id,
                &container_id,
                &mut warnings,
            )
            .await?;
        }

        let hook_error = match self
            .deps
            .hooks
            .dispatch(HookStage::PostFinish, &mut session)
            .await
        {
            Ok(reports) => {
                warnings.extend(hook_warnings(&reports));
                None
            }
            Err(err) => Some(err),
        };

        session.status = SessionStatus::Merged;
        session.container_id = None;
        session.touch();
        self.deps.store.put(&session)?;

        if self.deps.cleanup_worktree_on_merge
            && let Err(err) = self
                .deps
                .worktrees
                .remove_worktree(&session.repo_path, &session.worktree_path, true)
                .await
        {
            warn!("Failed to remove worktree of merged session '{}': {err}", session.id);
            warnings.push(format!("worktree was not removed: {err}"));
        }

        if let Some(err) = hook_error {
            return Err(err);
        }

        info!(
            "Session '{}' merged as {}",
            session.id,
            session.merge_commit_id.as_deref().unwrap_or_default()
        );
        Ok(FinishOutcome::Merged {
            session,
            squash,
            warnings,
        })
    }

    /// Record a squash found on the integration branch and finish the teardown.
    async fn adopt(
        &self,
        mut session: Session,
        squash: SquashOutcome,
    ) -> DevtoolResult<FinishOutcome> {
        info!(
            "Adopting squash commit {} already on '{}' for '{}'",
            squash.commit_id, squash.integration_branch, session.id
        );
        session.status = SessionStatus::Finishing;
        session.merge_commit_id = Some(squash.commit_id.clone());
        session.touch();
        self.deps.store.put(&session)?;
        self.complete(session, Some(squash), Vec::new()).await
    }

    /// A `finishing` record without a merge id means an earlier finish died
    /// before merging. Put it back to whatever its container says it was.
    async fn recover_interrupted(&self, mut session: Session) -> DevtoolResult<Session> {
        let running = match &session.container_id {
            Some(id) => self.deps.runtime.state(id).await? == ContainerState::Running,
            None => false,
        };
        session.status = if running {
            SessionStatus::Running
        } else {
            SessionStatus::Paused
        };
        warn!(
            "Recovering '{}' from an interrupted finish as {}",
            session.id, session.status
        );
        self.deps.store.put(&session)?;
        Ok(session)
    }

    fn abort<T>(&self, prior: &Session, err: DevtoolError) -> DevtoolResult<T> {
        if let Err(restore_err) = self.deps.store.put(prior) {
            warn!(
                "Failed to restore '{}' to {} after aborted finish: {restore_err}",
                prior.id, prior.status
            );
        }
        Err(err)
    }
}

/// Operator message first, accumulated draft after a blank line.
pub fn compose_message(message: Option<&str>, draft: &str) -> String {
    [message.unwrap_or_default(), draft]
        .into_iter()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composes_message_and_draft() {
        assert_eq!(compose_message(Some(" Summary "), ""), "Summary");
        assert_eq!(
            compose_message(Some("Summary"), "- one\n- two\n"),
            "Summary\n\n- one\n- two"
        );
        assert_eq!(compose_message(None, "- only draft"), "- only draft");
        assert_eq!(compose_message(Some("  "), "  "), "");
    }
}
