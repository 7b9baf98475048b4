//! Persistence layer: libSQL-backed storage for campaigns, recipients,
//! generated content and replies.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::Database;
