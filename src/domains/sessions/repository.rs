use log::{debug, warn};
use std::collections::HashSet;

use crate::domains::sessions::entity::Session;
use crate::errors::{DevtoolError, DevtoolResult};
use crate::infrastructure::database::{Database, SessionMethods};

/// Durable id -> session mapping. Every write replaces the whole record and
/// refuses records whose status and container pairing is inconsistent.
#[derive(Clone)]
pub struct SessionStore {
    db: Database,
}

impl SessionStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn put(&self, session: &Session) -> DevtoolResult<()> {
        session
            .check_invariants()
            .map_err(|msg| DevtoolError::consistency(&session.id, msg))?;
        self.db
            .put_session(session)
            .map_err(|e| store_error(&session.id, e))?;
        debug!("Persisted session '{}' as {}", session.id, session.status);
        Ok(())
    }

    /// First write of a freshly allocated session; fails if the id is taken.
    pub fn insert_new(&self, session: &Session) -> DevtoolResult<()> {
        if self.exists(&session.id)? {
            return Err(DevtoolError::NameCollision {
                candidate: session.id.clone(),
                attempts: 1,
            });
        }
        self.put(session)
    }

    pub fn get(&self, id: &str) -> DevtoolResult<Session> {
        self.db
            .get_session(id)
            .map_err(|e| store_error(id, e))?
            .ok_or_else(|| DevtoolError::SessionNotFound {
                session_id: id.to_string(),
            })
    }

    pub fn exists(&self, id: &str) -> DevtoolResult<bool> {
        self.db
            .session_id_exists(id)
            .map_err(|e| store_error(id, e))
    }

    pub fn list(&self) -> DevtoolResult<Vec<Session>> {
        self.db
            .list_sessions()
            .map_err(|e| DevtoolError::database(format!("{e:#}")))
    }

    /// Ids already claimed by any record, live or historical.
    pub fn reserved_ids(&self) -> DevtoolResult<HashSet<String>> {
        Ok(self.list()?.into_iter().map(|s| s.id).collect())
    }

    /// Only terminal sessions may be forgotten.
    pub fn delete(&self, id: &str) -> DevtoolResult<()> {
        let session = self.get(id)?;
        if !session.status.is_terminal() {
            return Err(DevtoolError::invalid_state(
                id,
                session.status,
                "merged or abandoned",
            ));
        }
        let removed = self.db.delete_session(id).map_err(|e| store_error(id, e))?;
        if !removed {
            warn!("Session '{id}' vanished before it could be deleted");
        }
        Ok(())
    }
}

fn store_error(id: &str, err: anyhow::Error) -> DevtoolError {
    let message = format!("{err:#}");
    if message.contains("UNIQUE constraint failed: sessions.repo_path, sessions.branch_name") {
        return DevtoolError::NameCollision {
            candidate: id.to_string(),
            attempts: 1,
        };
    }
    DevtoolError::database(message)
}
