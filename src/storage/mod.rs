//! Durable storage for workflows, runs and the step log.

mod models;
mod sqlite;

pub use models::{Run, RunStatus, StoredWorkflow};
pub use sqlite::SqliteStorage;
