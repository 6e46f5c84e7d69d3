use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Isolated development sessions: a dated branch, its own worktree and a
/// container, squash-merged when done.
#[derive(Debug, Parser)]
#[command(name = "devtool", version, about)]
pub struct Cli {
    /// Configuration file (defaults to $DEVTOOL_CONFIG, then the user config dir)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Raise log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Create a session for a new feature and start its container
    Start {
        /// Repository (or any directory inside it)
        repo: PathBuf,
        /// Feature name, turned into the branch slug
        feature_name: String,
    },
    /// Retry bringing up a session left in `created`
    Retry { session_id: String },
    /// Reattach to a paused or running session
    Resume { session_id: String },
    /// Stop the session's container, keeping worktree and branch
    Pause { session_id: String },
    /// Squash-merge the session onto the integration branch
    Finish {
        session_id: String,
        /// Summary line(s) placed before the accumulated draft
        #[arg(short, long)]
        message: Option<String>,
        /// Accept the proposed message without prompting
        #[arg(short, long)]
        yes: bool,
    },
    /// Give up on a session; the branch is kept
    Abandon {
        session_id: String,
        /// Also delete the worktree directory
        #[arg(long)]
        delete_worktree: bool,
    },
    /// List sessions
    List {
        /// Include merged and abandoned sessions
        #[arg(short, long)]
        all: bool,
    },
    /// Show one session and check it against the host
    Status { session_id: String },
    /// Append text to the session's commit message draft
    Draft { session_id: String, text: String },
    /// Delete the feature branch of a merged or abandoned session
    DeleteBranch { session_id: String },
    /// Report drift between session records and containers/worktrees
    Reconcile,
    /// Check that the container engine, git and the store are usable
    Doctor,
}

impl Command {
    /// Session the command targets, used to report its last persisted state on failure.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Command::Retry { session_id }
            | Command::Resume { session_id }
            | Command::Pause { session_id }
            | Command::Finish { session_id, .. }
            | Command::Abandon { session_id, .. }
            | Command::Status { session_id }
            | Command::Draft { session_id, .. }
            | Command::DeleteBranch { session_id } => Some(session_id),
            Command::Start { .. } | Command::List { .. } | Command::Reconcile | Command::Doctor => {
                None
            }
        }
    }
}

pub fn log_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}
