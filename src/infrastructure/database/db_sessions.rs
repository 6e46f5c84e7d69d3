use super::connection::Database;
use super::timestamps::utc_from_epoch_seconds_lossy;
use crate::domains::sessions::entity::{Session, SessionStatus};
use anyhow::{Result, anyhow};
use rusqlite::{OptionalExtension, Row, params};
use std::path::PathBuf;

pub trait SessionMethods {
    /// Insert or fully replace a session row in a single transaction. A clash
    /// on the live-branch index is an error, never a silent replacement.
    fn put_session(&self, session: &Session) -> Result<()>;
    fn get_session(&self, id: &str) -> Result<Option<Session>>;
    fn list_sessions(&self) -> Result<Vec<Session>>;
    fn session_id_exists(&self, id: &str) -> Result<bool>;
    fn delete_session(&self, id: &str) -> Result<bool>;
}

const SESSION_COLUMNS: &str = "id, branch_name, repo_path, worktree_path, container_id, status,
    created_at, last_active_at, commit_message_draft, merge_commit_id";

impl SessionMethods for Database {
    fn put_session(&self, session: &Session) -> Result<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO sessions (
                id, branch_name, repo_path, worktree_path, container_id, status,
                created_at, last_active_at, commit_message_draft, merge_commit_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(id) DO UPDATE SET
                branch_name = excluded.branch_name,
                repo_path = excluded.repo_path,
                worktree_path = excluded.worktree_path,
                container_id = excluded.container_id,
                status = excluded.status,
                created_at = excluded.created_at,
                last_active_at = excluded.last_active_at,
                commit_message_draft = excluded.commit_message_draft,
                merge_commit_id = excluded.merge_commit_id",
            params![
                session.id,
                session.branch_name,
                session.repo_path.to_string_lossy(),
                session.worktree_path.to_string_lossy(),
                session.container_id,
                session.status.as_str(),
                session.created_at.timestamp(),
                session.last_active_at.timestamp(),
                session.commit_message_draft,
                session.merge_commit_id,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"
        ))?;
        let row = stmt.query_row(params![id], row_to_raw).optional()?;
        row.map(RawSession::into_session).transpose()
    }

    fn list_sessions(&self) -> Result<Vec<Session>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY created_at, id"
        ))?;
        let rows = stmt.query_map([], row_to_raw)?;
        rows.map(|row| row.map_err(Into::into).and_then(RawSession::into_session))
            .collect()
    }

    fn session_id_exists(&self, id: &str) -> Result<bool> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sessions WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn delete_session(&self, id: &str) -> Result<bool> {
        let conn = self.get_conn()?;
        let affected = conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }
}

struct RawSession {
    id: String,
    branch_name: String,
    repo_path: String,
    worktree_path: String,
    container_id: Option<String>,
    status: String,
    created_at: i64,
    last_active_at: i64,
    commit_message_draft: String,
    merge_commit_id: Option<String>,
}

fn row_to_raw(row: &Row<'_>) -> rusqlite::Result<RawSession> {
    Ok(RawSession {
        id: row.get(0)?,
        branch_name: row.get(1)?,
        repo_path: row.get(2)?,
        worktree_path: row.get(3)?,
        container_id: row.get(4)?,
        status: row.get(5)?,
        created_at: row.get(6)?,
        last_active_at: row.get(7)?,
        commit_message_draft: row.get(8)?,
        merge_commit_id: row.get(9)?,
    })
}

impl RawSession {
    fn into_session(self) -> Result<Session> {
        let status: SessionStatus = self
            .status
            .parse()
            .map_err(|e: String| anyhow!("session '{}': {e}", self.id))?;
        Ok(Session {
            id: self.id,
            branch_name: self.branch_name,
            repo_path: PathBuf::from(self.repo_path),
            worktree_path: PathBuf::from(self.worktree_path),
            container_id: self.container_id,
            status,
            created_at: utc_from_epoch_seconds_lossy(self.created_at),
            last_active_at: utc_from_epoch_seconds_lossy(self.last_active_at),
            commit_message_draft: self.commit_message_draft,
            merge_commit_id: self.merge_commit_id,
        })
    }
}
