use super::connection::Database;

pub fn initialize_schema(db: &Database) -> anyhow::Result<()> {
    let conn = db.get_conn()?;

    // One row per session; columns mirror the session record exactly.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            branch_name TEXT NOT NULL,
            repo_path TEXT NOT NULL,
            worktree_path TEXT NOT NULL,
            container_id TEXT,
            status TEXT NOT NULL,  -- created, running, paused, finishing, merged, abandoned
            created_at INTEGER NOT NULL,
            last_active_at INTEGER NOT NULL,
            commit_message_draft TEXT NOT NULL DEFAULT '',
            merge_commit_id TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_repo ON sessions(repo_path)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status)",
        [],
    )?;

    // A branch may back at most one live session per repository.
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_live_branch
            ON sessions(repo_path, branch_name)
            WHERE status NOT IN ('merged', 'abandoned')",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS session_locks (
            lock_key TEXT PRIMARY KEY,
            owner TEXT NOT NULL,
            pid INTEGER NOT NULL,
            acquired_at INTEGER NOT NULL
        )",
        [],
    )?;

    Ok(())
}
