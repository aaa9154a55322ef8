//! Configuration loading for the conductor.

pub mod loader;
pub mod model;

pub use model::{AdminConfig, AppConfig, LibraryConfig, RedisConfig, StorageConfig, Timings};
