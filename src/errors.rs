use serde::Serialize;
use std::fmt;

pub type DevtoolResult<T> = Result<T, DevtoolError>;

#[derive(Debug, Serialize, Clone)]
#[serde(tag = "type", content = "data")]
pub enum DevtoolError {
    SessionNotFound {
        session_id: String,
    },
    InvalidSessionState {
        session_id: String,
        current_state: String,
        expected_state: String,
    },
    NameCollision {
        candidate: String,
        attempts: u32,
    },
    MergeConflict {
        session_id: String,
        branch: String,
        integration_branch: String,
        message: String,
    },
    ContainerCreate {
        session_id: String,
        message: String,
    },
    ContainerRuntime {
        container_id: String,
        operation: String,
        message: String,
    },
    HookFailed {
        session_id: String,
        stage: String,
        hook: String,
        message: String,
    },
    SessionBusy {
        session_id: String,
        waited_ms: u64,
    },
    Timeout {
        operation: String,
        seconds: u64,
    },
    Consistency {
        session_id: String,
        message: String,
    },
    UncommittedChanges {
        path: String,
        sample: Vec<String>,
    },
    GitOperationFailed {
        operation: String,
        message: String,
    },
    DatabaseError {
        message: String,
    },
    IoError {
        operation: String,
        path: String,
        message: String,
    },
    InvalidInput {
        field: String,
        message: String,
    },
    ConfigError {
        key: String,
        message: String,
    },
}

impl DevtoolError {
    pub fn git(operation: &str, error: impl ToString) -> Self {
        DevtoolError::GitOperationFailed {
            operation: operation.to_string(),
            message: error.to_string(),
        }
    }

    pub fn io(operation: &str, path: impl ToString, error: impl ToString) -> Self {
        DevtoolError::IoError {
            operation: operation.to_string(),
            path: path.to_string(),
            message: error.to_string(),
        }
    }

    pub fn database(error: impl ToString) -> Self {
        DevtoolError::DatabaseError {
            message: error.to_string(),
        }
    }

    pub fn invalid_input(field: &str, message: impl ToString) -> Self {
        DevtoolError::InvalidInput {
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    pub fn invalid_state(
        session_id: &str,
        current_state: impl ToString,
        expected_state: impl ToString,
    ) -> Self {
        DevtoolError::InvalidSessionState {
            session_id: session_id.to_string(),
            current_state: current_state.to_string(),
            expected_state: expected_state.to_string(),
        }
    }

    pub fn consistency(session_id: &str, message: impl ToString) -> Self {
        DevtoolError::Consistency {
            session_id: session_id.to_string(),
            message: message.to_string(),
        }
    }

    pub fn container(container_id: &str, operation: &str, error: impl ToString) -> Self {
        DevtoolError::ContainerRuntime {
            container_id: container_id.to_string(),
            operation: operation.to_string(),
            message: error.to_string(),
        }
    }

    pub fn timeout(operation: &str, seconds: u64) -> Self {
        DevtoolError::Timeout {
            operation: operation.to_string(),
            seconds,
        }
    }

    /// Stable label used in CLI output and JSON error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionNotFound { .. } => "not-found",
            Self::InvalidSessionState { .. } => "invalid-state",
            Self::NameCollision { .. } => "name-collision",
            Self::MergeConflict { .. } => "merge-conflict",
            Self::ContainerCreate { .. } => "container-create",
            Self::ContainerRuntime { .. } => "container-runtime",
            Self::HookFailed { .. } => "hook-failed",
            Self::SessionBusy { .. } => "session-busy",
            Self::Timeout { .. } => "timeout",
            Self::Consistency { .. } => "consistency",
            Self::UncommittedChanges { .. } => "uncommitted-changes",
            Self::GitOperationFailed { .. } => "git",
            Self::DatabaseError { .. } => "database",
            Self::IoError { .. } => "io",
            Self::InvalidInput { .. } => "invalid-input",
            Self::ConfigError { .. } => "config",
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::SessionNotFound { .. } => 2,
            Self::InvalidSessionState { .. } => 3,
            Self::NameCollision { .. } => 4,
            Self::MergeConflict { .. } => 5,
            Self::ContainerCreate { .. } | Self::ContainerRuntime { .. } => 6,
            Self::HookFailed { .. } => 7,
            Self::SessionBusy { .. } => 8,
            Self::Timeout { .. } => 9,
            Self::Consistency { .. } => 10,
            _ => 1,
        }
    }

    /// The session this error refers to, when it carries one.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::SessionNotFound { session_id }
            | Self::InvalidSessionState { session_id, .. }
            | Self::MergeConflict { session_id, .. }
            | Self::ContainerCreate { session_id, .. }
            | Self::HookFailed { session_id, .. }
            | Self::SessionBusy { session_id, .. }
            | Self::Consistency { session_id, .. } => Some(session_id),
            _ => None,
        }
    }
}

impl fmt::Display for DevtoolError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::SessionNotFound { session_id } => {
                write!(f, "Session '{session_id}' not found")
            }
            Self::InvalidSessionState {
                session_id,
                current_state,
                expected_state,
            } => {
                write!(
                    f,
                    "Session '{session_id}' is in state '{current_state}', expected '{expected_state}'"
                )
            }
            Self::NameCollision {
                candidate,
                attempts,
            } => {
                write!(
                    f,
                    "Could not allocate a unique branch for '{candidate}' after {attempts} attempts"
                )
            }
            Self::MergeConflict {
                session_id,
                branch,
                integration_branch,
                message,
            } => {
                write!(
                    f,
                    "Cannot squash '{branch}' into '{integration_branch}' for session '{session_id}': {message}"
                )
            }
            Self::ContainerCreate {
                session_id,
                message,
            } => {
                write!(
                    f,
                    "Failed to create container for session '{session_id}': {message}"
                )
            }
            Self::ContainerRuntime {
                container_id,
                operation,
                message,
            } => {
                write!(
                    f,
                    "Container operation '{operation}' failed for '{container_id}': {message}"
                )
            }
            Self::HookFailed {
                session_id,
                stage,
                hook,
                message,
            } => {
                write!(
                    f,
                    "Required hook '{hook}' failed at stage '{stage}' for session '{session_id}': {message}"
                )
            }
            Self::SessionBusy {
                session_id,
                waited_ms,
            } => {
                write!(
                    f,
                    "Session '{session_id}' is busy with another transition (waited {waited_ms} ms)"
                )
            }
            Self::Timeout { operation, seconds } => {
                write!(f, "Operation '{operation}' timed out after {seconds}s")
            }
            Self::Consistency {
                session_id,
                message,
            } => {
                write!(
                    f,
                    "Session '{session_id}' is inconsistent with the host: {message}"
                )
            }
            Self::UncommittedChanges { path, sample } => {
                if sample.is_empty() {
                    write!(f, "Worktree '{path}' has uncommitted changes")
                } else {
                    write!(
                        f,
                        "Worktree '{path}' has uncommitted changes: {}",
                        sample.join(", ")
                    )
                }
            }
            Self::GitOperationFailed { operation, message } => {
                write!(f, "Git operation '{operation}' failed: {message}")
            }
            Self::DatabaseError { message } => {
                write!(f, "Database error: {message}")
            }
            Self::IoError {
                operation,
                path,
                message,
            } => {
                write!(f, "I/O error during '{operation}' on '{path}': {message}")
            }
            Self::InvalidInput { field, message } => {
                write!(f, "Invalid input for field '{field}': {message}")
            }
            Self::ConfigError { key, message } => {
                write!(f, "Configuration error for key '{key}': {message}")
            }
        }
    }
}

impl std::error::Error for DevtoolError {}

impl From<rusqlite::Error> for DevtoolError {
    fn from(error: rusqlite::Error) -> Self {
        DevtoolError::database(error)
    }
}

impl From<r2d2::Error> for DevtoolError {
    fn from(error: r2d2::Error) -> Self {
        DevtoolError::database(format!("connection pool: {error}"))
    }
}

impl From<DevtoolError> for String {
    fn from(error: DevtoolError) -> Self {
        error.to_string()
    }
}
