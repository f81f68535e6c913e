//! Persistence layer: the durable work queue.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{QueueRecord, QueueStatus, WorkQueue};
