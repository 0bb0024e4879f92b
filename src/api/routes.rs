//! API Routes
//!
//! Configures the Axum router: admin endpoints plus the demo origin routes
//! served through the cache middleware.

use axum::{
    routing::{delete, get},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    clear_handler, get_item_handler, health_handler, hello_handler, logo_handler, stats_handler,
    update_item_handler, AppState,
};
use super::middleware::with_cache;

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `GET /health` - Health check with the active store type
/// - `GET /cache/stats` - Cache outcome counters
/// - `DELETE /cache` - Clear everything, or `?key=` and its derived keys
/// - `GET /hello`, `GET|POST /items/:id`, `GET /logo.png` - Cached demo origin
///
/// # Middleware
/// - Cache: only on the demo origin routes
/// - CORS: Allows any origin (configurable for production)
/// - Tracing: Logs all requests for debugging
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let origin = Router::new()
        .route("/hello", get(hello_handler))
        .route("/items/:id", get(get_item_handler).post(update_item_handler))
        .route("/logo.png", get(logo_handler));

    Router::new()
        .route("/health", get(health_handler))
        .route("/cache/stats", get(stats_handler))
        .route("/cache", delete(clear_handler))
        .merge(with_cache(origin, state.cache.clone()))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
