use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub branch_name: String,
    pub repo_path: PathBuf,
    pub worktree_path: PathBuf,
    pub container_id: Option<String>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub commit_message_draft: String,
    pub merge_commit_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Created,
    Running,
    Paused,
    Finishing,
    Merged,
    Abandoned,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Created => "created",
            SessionStatus::Running => "running",
            SessionStatus::Paused => "paused",
            SessionStatus::Finishing => "finishing",
            SessionStatus::Merged => "merged",
            SessionStatus::Abandoned => "abandoned",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Merged | SessionStatus::Abandoned)
    }

    /// Statuses in which the session owns a container.
    pub fn holds_container(&self) -> bool {
        matches!(
            self,
            SessionStatus::Running | SessionStatus::Paused | SessionStatus::Finishing
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(SessionStatus::Created),
            "running" => Ok(SessionStatus::Running),
            "paused" => Ok(SessionStatus::Paused),
            "finishing" => Ok(SessionStatus::Finishing),
            "merged" => Ok(SessionStatus::Merged),
            "abandoned" => Ok(SessionStatus::Abandoned),
            other => Err(format!("unknown session status '{other}'")),
        }
    }
}

impl Session {
    pub fn new_created(
        branch_name: &str,
        repo_path: PathBuf,
        worktree_path: PathBuf,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: branch_name.to_string(),
            branch_name: branch_name.to_string(),
            repo_path,
            worktree_path,
            container_id: None,
            status: SessionStatus::Created,
            created_at: now,
            last_active_at: now,
            commit_message_draft: String::new(),
            merge_commit_id: None,
        }
    }

    /// Checks the container/status pairing every persisted record must satisfy.
    pub fn check_invariants(&self) -> Result<(), String> {
        let has_container = self
            .container_id
            .as_deref()
            .is_some_and(|id| !id.trim().is_empty());

        if has_container != self.status.holds_container() {
            return Err(format!(
                "container id {} while status is '{}'",
                if has_container { "present" } else { "absent" },
                self.status
            ));
        }

        if self.status == SessionStatus::Merged && self.merge_commit_id.is_none() {
            return Err("merged session without a merge commit id".to_string());
        }

        Ok(())
    }

    pub fn append_to_draft(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if !self.commit_message_draft.is_empty() {
            self.commit_message_draft.push('\n');
        }
        self.commit_message_draft.push_str(text);
    }

    pub fn touch(&mut self) {
        self.last_active_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Session {
        Session::new_created(
            "250906-add-retry-logic",
            PathBuf::from("/repos/app"),
            PathBuf::from("/wt/app/250906-add-retry-logic"),
            Utc::now(),
        )
    }

    #[test]
    fn new_session_uses_branch_as_id() {
        let session = sample();
        assert_eq!(session.id, "250906-add-retry-logic");
        assert_eq!(session.status, SessionStatus::Created);
        assert!(session.check_invariants().is_ok());
    }

    #[test]
    fn running_without_container_violates_invariant() {
        let mut session = sample();
        session.status = SessionStatus::Running;
        assert!(session.check_invariants().is_err());

        session.container_id = Some("abc".into());
        assert!(session.check_invariants().is_ok());

        session.status = SessionStatus::Abandoned;
        assert!(session.check_invariants().is_err());
    }

    #[test]
    fn blank_container_id_counts_as_absent() {
        let mut session = sample();
        session.container_id = Some("  ".into());
        assert!(session.check_invariants().is_ok());
    }

    #[test]
    fn merged_requires_commit_id() {
        let mut session = sample();
        session.status = SessionStatus::Merged;
        assert!(session.check_invariants().is_err());
        session.merge_commit_id = Some("deadbeef".into());
        assert!(session.check_invariants().is_ok());
    }

    #[test]
    fn draft_appends_on_new_lines() {
        let mut session = sample();
        session.append_to_draft("first");
        session.append_to_draft("   ");
        session.append_to_draft("second\n");
        assert_eq!(session.commit_message_draft, "first\nsecond");
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            SessionStatus::Created,
            SessionStatus::Running,
            SessionStatus::Paused,
            SessionStatus::Finishing,
            SessionStatus::Merged,
            SessionStatus::Abandoned,
        ] {
            assert_eq!(status.as_str().parse::<SessionStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<SessionStatus>().is_err());
    }
}
