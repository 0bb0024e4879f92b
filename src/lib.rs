//! Route Cache - HTTP response caching for axum services
//!
//! Caches origin responses per route with fixed or adaptive TTLs, in memory
//! or in a remote store with automatic fallback to memory.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod policy;
pub mod store;
pub mod tasks;

pub use api::{create_router, with_cache, AppState};
pub use cache::{Cache, CacheStatus, Served};
pub use config::{CacheOptions, Config};
pub use error::{CacheError, Result};
pub use store::{DriverKind, Store};
pub use tasks::spawn_cleanup_task;
