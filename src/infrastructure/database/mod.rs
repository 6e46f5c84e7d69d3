pub mod connection;
pub mod db_locks;
pub mod db_schema;
pub mod db_sessions;
pub mod timestamps;

pub use connection::Database;
pub use db_locks::{LockHolder, LockMethods};
pub use db_schema::initialize_schema;
pub use db_sessions::SessionMethods;
