//! Request and Response models
//!
//! The request/response views exchanged with the hosting pipeline, plus the
//! bodies returned by the admin endpoints.

pub mod requests;
pub mod responses;

// Re-export commonly used types
pub use requests::CacheRequest;
pub use responses::{CacheResponse, ClearResponse, HealthResponse, StatsResponse};
