//! Isolated, resumable development sessions. Each session pairs a dated
//! feature branch, its own git worktree and a container sandbox, and ends as
//! a single squash commit on the integration branch.

pub mod cli;
pub mod commands;
pub mod domains;
pub mod errors;
pub mod infrastructure;
pub mod utils;

pub use domains::sessions::{Session, SessionOrchestrator, SessionStatus};
pub use errors::{DevtoolError, DevtoolResult};
