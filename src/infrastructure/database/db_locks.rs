use super::connection::Database;
use super::timestamps::utc_from_epoch_seconds_lossy;
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHolder {
    pub owner: String,
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

/// Row-level advisory locks shared by every process using the same store.
pub trait LockMethods {
    /// Returns `true` when the row was inserted, i.e. the lock is now ours.
    fn try_insert_lock(&self, key: &str, owner: &str, pid: u32) -> Result<bool>;
    fn get_lock_holder(&self, key: &str) -> Result<Option<LockHolder>>;
    fn release_lock(&self, key: &str, owner: &str) -> Result<bool>;
    /// Compare-and-delete: only removes the row if `owner` still holds it.
    fn delete_stale_lock(&self, key: &str, owner: &str) -> Result<bool>;
}

impl LockMethods for Database {
    fn try_insert_lock(&self, key: &str, owner: &str, pid: u32) -> Result<bool> {
        let conn = self.get_conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO session_locks (lock_key, owner, pid, acquired_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![key, owner, pid, Utc::now().timestamp()],
        )?;
        Ok(inserted == 1)
    }

    fn get_lock_holder(&self, key: &str) -> Result<Option<LockHolder>> {
        let conn = self.get_conn()?;
        let holder = conn
            .query_row(
                "SELECT owner, pid, acquired_at FROM session_locks WHERE lock_key = ?1",
                params![key],
                |row| {
                    Ok(LockHolder {
                        owner: row.get(0)?,
                        pid: row.get(1)?,
                        acquired_at: utc_from_epoch_seconds_lossy(row.get(2)?),
                    })
                },
            )
            .optional()?;
        Ok(holder)
    }

    fn release_lock(&self, key: &str, owner: &str) -> Result<bool> {
        self.delete_stale_lock(key, owner)
    }

    fn delete_stale_lock(&self, key: &str, owner: &str) -> Result<bool> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            "DELETE FROM session_locks WHERE lock_key = ?1 AND owner = ?2",
            params![key, owner],
        )?;
        Ok(affected > 0)
    }
}
