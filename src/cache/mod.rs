//! Cache Module
//!
//! The request-interception flow and the serialized form of cached entries.

mod entry;
mod interceptor;
mod stats;


// Re-export public types
pub use entry::{decode, encode, EntryMetadata};
pub use interceptor::{Cache, CacheStatus, Served};
pub use stats::CacheStats;
