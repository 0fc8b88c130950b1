//! libSQL-backed storage for accounts and forwarding rules.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{Database, RuleSource};
