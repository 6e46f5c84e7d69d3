pub mod branches;
pub mod manager;
pub mod naming;
pub mod operations;
pub mod repository;
pub mod worktrees;

pub use manager::{AllocatedBranch, WorktreeManager};
