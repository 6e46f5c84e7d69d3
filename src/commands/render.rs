use serde::Serialize;
use serde_json::json;
use std::fmt::Write;

use crate::domains::sessions::{
    FinishOutcome, ReconcileReport, Session, SessionReport, TransitionOutcome,
};
use crate::errors::{DevtoolError, DevtoolResult};

pub fn to_json<T: Serialize>(value: &T) -> DevtoolResult<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| DevtoolError::invalid_input("output", format!("cannot encode JSON: {e}")))
}

pub fn session_table(sessions: &[Session]) -> String {
    if sessions.is_empty() {
        return "No sessions.".to_string();
    }

    let id_width = sessions
        .iter()
        .map(|s| s.id.len())
        .max()
        .unwrap_or(0)
        .max("SESSION".len());

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<id_width$}  {:<10}  {:<16}  CONTAINER",
        "SESSION", "STATUS", "LAST ACTIVE"
    );
    for session in sessions {
        let _ = writeln!(
            out,
            "{:<id_width$}  {:<10}  {:<16}  {}",
            session.id,
            session.status.as_str(),
            session.last_active_at.format("%Y-%m-%d %H:%M").to_string(),
            session.container_id.as_deref().unwrap_or("-")
        );
    }
    out.trim_end().to_string()
}

pub fn session_report(report: &SessionReport) -> String {
    let session = &report.session;
    let mut out = String::new();
    let _ = writeln!(out, "session:   {}", session.id);
    let _ = writeln!(out, "status:    {}", session.status);
    let _ = writeln!(out, "repo:      {}", session.repo_path.display());
    let _ = writeln!(
        out,
        "worktree:  {}{}",
        session.worktree_path.display(),
        if report.worktree_present { "" } else { " (missing)" }
    );
    let _ = writeln!(
        out,
        "container: {}{}",
        session.container_id.as_deref().unwrap_or("-"),
        report
            .container_state
            .map(|state| format!(" ({state})"))
            .unwrap_or_default()
    );
    if let Some(commit) = &session.merge_commit_id {
        let _ = writeln!(out, "merged as: {commit}");
    }
    let _ = writeln!(
        out,
        "created:   {}",
        session.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if !session.commit_message_draft.is_empty() {
        let _ = writeln!(out, "draft:");
        for line in session.commit_message_draft.lines() {
            let _ = writeln!(out, "  {line}");
        }
    }
    for drift in &report.drift {
        let _ = writeln!(out, "drift:     {drift}");
    }
    out.trim_end().to_string()
}

pub fn transition(outcome: &TransitionOutcome) -> String {
    let mut out = format!(
        "Session '{}' is {}",
        outcome.session.id, outcome.session.status
    );
    if outcome.session.status.holds_container() {
        let _ = write!(out, " (worktree {})", outcome.session.worktree_path.display());
    }
    append_warnings(&mut out, &outcome.warnings);
    out
}

pub fn finish(outcome: &FinishOutcome) -> String {
    match outcome {
        FinishOutcome::Merged {
            session,
            squash,
            warnings,
        } => {
            let mut out = match squash {
                Some(squash) => format!(
                    "Squashed {} commit(s) of '{}' onto '{}' as {}",
                    squash.squashed_commits,
                    session.branch_name,
                    squash.integration_branch,
                    squash.commit_id
                ),
                None => format!(
                    "Completed teardown of '{}' (merged as {})",
                    session.id,
                    session.merge_commit_id.as_deref().unwrap_or("-")
                ),
            };
            if let Some(squash) = squash
                && !squash.working_tree_updated
            {
                let _ = write!(
                    out,
                    "\nnote: '{}' has local edits in the main checkout; only the branch ref moved",
                    squash.integration_branch
                );
            }
            append_warnings(&mut out, warnings);
            out
        }
        FinishOutcome::Declined { session } => format!(
            "Merge declined; session '{}' is {} again",
            session.id, session.status
        ),
        FinishOutcome::Cancelled { session } => format!(
            "Merge cancelled; session '{}' is {} again",
            session.id, session.status
        ),
    }
}

pub fn reconcile(report: &ReconcileReport) -> String {
    if report.is_clean() {
        return format!(
            "All {} live session(s) match the host.",
            report.sessions.len()
        );
    }

    let mut out = String::new();
    for session in report.drifted() {
        for drift in &session.drift {
            let _ = writeln!(out, "{}: {drift}", session.session.id);
        }
    }
    for orphan in &report.orphan_worktrees {
        let _ = writeln!(out, "orphan worktree: {}", orphan.display());
    }
    out.trim_end().to_string()
}

pub fn error(err: &DevtoolError, last_known: Option<&Session>) -> String {
    let mut out = format!("error[{}]: {err}", err.kind());
    if let Some(session) = last_known {
        let _ = write!(
            out,
            "\nsession '{}' last persisted as {}",
            session.id, session.status
        );
    }
    out
}

pub fn error_json(err: &DevtoolError, last_known: Option<&Session>) -> String {
    let value = json!({
        "kind": err.kind(),
        "message": err.to_string(),
        "error": err,
        "session_id": err.session_id(),
        "last_status": last_known.map(|s| s.status),
    });
    serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
}

fn append_warnings(out: &mut String, warnings: &[String]) {
    for warning in warnings {
        let _ = write!(out, "\nwarning: {warning}");
    }
}
