use super::db_schema::initialize_schema;
use anyhow::{Context, Result};
use log::debug;
use r2d2::{ManageConnection, Pool, PooledConnection};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;

const POOL_SIZE: u32 = 4;
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// r2d2 manager for file-backed SQLite connections.
#[derive(Debug, Clone)]
pub struct SqliteManager {
    path: PathBuf,
}

impl ManageConnection for SqliteManager {
    type Connection = Connection;
    type Error = rusqlite::Error;

    fn connect(&self) -> Result<Connection, rusqlite::Error> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        conn.execute_batch("PRAGMA synchronous=NORMAL;")?;
        Ok(conn)
    }

    fn is_valid(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        conn.execute_batch("SELECT 1")
    }

    fn has_broken(&self, _conn: &mut Connection) -> bool {
        false
    }
}

#[derive(Clone)]
pub struct Database {
    pool: Pool<SqliteManager>,
    path: PathBuf,
}

impl Database {
    /// Open (creating if needed) the store at `db_path`, or at the default
    /// per-user location when no path is given.
    pub fn new(db_path: Option<PathBuf>) -> Result<Self> {
        let path = match db_path {
            Some(path) => path,
            None => dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("devtool")
                .join("sessions.db"),
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory {}", parent.display())
            })?;
        }

        debug!("Opening session store at {}", path.display());

        let manager = SqliteManager { path: path.clone() };
        let pool = Pool::builder()
            .max_size(POOL_SIZE)
            .build(manager)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;

        let db = Self { pool, path };
        initialize_schema(&db)?;
        Ok(db)
    }

    pub fn get_conn(&self) -> Result<PooledConnection<SqliteManager>> {
        self.pool
            .get()
            .context("Failed to get database connection from pool")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
