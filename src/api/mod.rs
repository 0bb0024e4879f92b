//! API Module
//!
//! axum adapter for the response cache, admin endpoints and a small demo
//! origin.
//!
//! # Endpoints
//! - `GET /health` - Health check endpoint
//! - `GET /cache/stats` - Get cache statistics
//! - `DELETE /cache` - Clear cached entries
//! - `GET /hello`, `GET|POST /items/:id`, `GET /logo.png` - Cached demo routes

pub mod handlers;
pub mod middleware;
pub mod routes;

pub use handlers::*;
pub use middleware::{cache_middleware, with_cache};
pub use routes::create_router;
