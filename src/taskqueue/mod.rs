//! Durable task queue keyed by source content hash.

pub mod store;
pub mod task;

pub use store::{init_schema, TaskStore};
pub use task::{Task, TaskStatus};
