pub mod containers;
pub mod git;
pub mod hooks;
pub mod merge;
pub mod sessions;
pub mod settings;
