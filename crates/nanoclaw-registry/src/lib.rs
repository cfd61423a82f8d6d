//! Relational state for the orchestrator: the background run registry plus
//! the scheduled-task and chat-message tables the cooperative loops consume.
//!
//! One SQLite database (WAL, busy timeout) behind an async mutex; each
//! store holds a clone of the shared connection but owns its rows alone.

mod abort;
mod db;
mod messages;
mod runs;
mod tasks;

pub use abort::AbortRegistry;
pub use db::{Database, RegistryError, RegistryResult};
pub use messages::{MessageStore, SqliteMessageStore};
pub use runs::RunRegistry;
pub use tasks::TaskStore;

/// Hard cap applied to run listing regardless of the requested limit.
pub const LIST_LIMIT_CAP: usize = 100;
