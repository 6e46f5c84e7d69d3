pub mod loader;
pub mod types;

pub use loader::{load_config, parse_config, resolve_config_path};
pub use types::*;
