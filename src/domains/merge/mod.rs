pub mod service;
pub mod types;

pub use service::{build_squash_message, compute_merge_state, find_landed_squash, squash_merge};
pub use types::{MergeState, SquashOutcome, SquashRequest};
