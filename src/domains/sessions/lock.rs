use log::{debug, info, warn};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::time::{Duration, Instant};

use crate::errors::{DevtoolError, DevtoolResult};
use crate::infrastructure::database::{Database, LockMethods};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Lock key serialising branch-name allocation across every `start`.
pub const ALLOCATION_LOCK_KEY: &str = "allocation";

pub fn session_lock_key(session_id: &str) -> String {
    format!("session:{session_id}")
}

/// Cross-process advisory lock backed by a row in the session store.
/// Released when dropped.
pub struct SessionLock {
    db: Database,
    key: String,
    owner: String,
}

impl SessionLock {
    /// Wait up to `wait` for `key`, then give up with `SessionBusy` naming `subject`.
    pub async fn acquire(
        db: &Database,
        key: &str,
        subject: &str,
        wait: Duration,
    ) -> DevtoolResult<SessionLock> {
        let owner = uuid::Uuid::new_v4().to_string();
        let pid = std::process::id();
        let started = Instant::now();

        loop {
            let inserted = db
                .try_insert_lock(key, &owner, pid)
                .map_err(|e| DevtoolError::database(format!("{e:#}")))?;
            if inserted {
                debug!("Acquired lock '{key}' ({owner})");
                return Ok(SessionLock {
                    db: db.clone(),
                    key: key.to_string(),
                    owner,
                });
            }

            if reclaim_if_stale(db, key)? {
                continue;
            }

            let waited = started.elapsed();
            if waited >= wait {
                warn!("Lock '{key}' still held after {waited:?}; giving up");
                return Err(DevtoolError::SessionBusy {
                    session_id: subject.to_string(),
                    waited_ms: u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
                });
            }

            tokio::time::sleep(POLL_INTERVAL.min(wait - waited)).await;
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        match self.db.release_lock(&self.key, &self.owner) {
            Ok(true) => debug!("Released lock '{}'", self.key),
            Ok(false) => warn!("Lock '{}' was no longer held by {}", self.key, self.owner),
            Err(err) => warn!("Failed to release lock '{}': {err:#}", self.key),
        }
    }
}

/// Drop the lock row if its holder process is gone. Only the exact owner row
/// observed is deleted, so a lock re-acquired in between is left alone.
fn reclaim_if_stale(db: &Database, key: &str) -> DevtoolResult<bool> {
    let Some(holder) = db
        .get_lock_holder(key)
        .map_err(|e| DevtoolError::database(format!("{e:#}")))?
    else {
        // Released between our insert attempt and this read.
        return Ok(true);
    };

    if process_alive(holder.pid) {
        return Ok(false);
    }

    let reclaimed = db
        .delete_stale_lock(key, &holder.owner)
        .map_err(|e| DevtoolError::database(format!("{e:#}")))?;
    if reclaimed {
        info!(
            "Reclaimed lock '{key}' from exited process {} (held since {})",
            holder.pid, holder.acquired_at
        );
    }
    Ok(true)
}

fn process_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        // EPERM: exists but belongs to someone else.
        Err(_) => true,
    }
}
