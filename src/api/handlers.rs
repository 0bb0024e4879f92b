//! API Handlers
//!
//! Admin endpoints for the cache plus the demo origin routes it fronts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::cache::Cache;
use crate::error::Result;
use crate::models::{ClearResponse, HealthResponse, StatsResponse};

/// 1x1 transparent PNG served by the demo image route.
const LOGO_PNG: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f,
    0x15, 0xc4, 0x89, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9c, 0x63, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0d, 0x0a, 0x2d, 0xb4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4e, 0x44, 0xae, 0x42, 0x60, 0x82,
];

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<Cache>,
    /// Times a demo origin handler actually ran
    pub origin_calls: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(cache: Arc<Cache>) -> Self {
        Self {
            cache,
            origin_calls: Arc::new(AtomicU64::new(0)),
        }
    }

    fn count_origin_call(&self) -> u64 {
        self.origin_calls.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Query of DELETE /cache
#[derive(Debug, Deserialize)]
pub struct ClearParams {
    pub key: Option<String>,
}

// == Admin Handlers ==

/// Handler for GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::healthy(state.cache.current_cache_type()))
}

/// Handler for GET /cache/stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let stats = state.cache.stats();
    Json(StatsResponse::new(&stats, state.cache.current_cache_type()))
}

/// Handler for DELETE /cache
///
/// Clears everything, or a single key and its derived keys when a non-empty
/// `?key=` is given.
pub async fn clear_handler(
    State(state): State<AppState>,
    Query(params): Query<ClearParams>,
) -> Result<Json<ClearResponse>> {
    let key = params.key.filter(|key| !key.is_empty());
    state.cache.clear(key.as_deref()).await?;
    Ok(Json(ClearResponse::new(key)))
}

// == Demo Origin Handlers ==

/// Handler for GET /hello
pub async fn hello_handler(State(state): State<AppState>) -> impl IntoResponse {
    let call = state.count_origin_call();
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        format!("hello #{}", call),
    )
}

/// Handler for GET /items/:id
pub async fn get_item_handler(State(state): State<AppState>, Path(id): Path<String>) -> Json<Value> {
    let call = state.count_origin_call();
    Json(json!({ "id": id, "version": call }))
}

/// Handler for POST /items/:id
pub async fn update_item_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<Value> {
    state.count_origin_call();
    Json(json!({ "id": id, "updated": true }))
}

/// Handler for GET /logo.png
pub async fn logo_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.count_origin_call();
    ([(header::CONTENT_TYPE, "image/png")], LOGO_PNG)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheOptions;
    use crate::store::{DriverKind, Store};

    fn state() -> AppState {
        let cache = Cache::with_store(&CacheOptions::default(), Store::memory(5000));
        AppState::new(Arc::new(cache))
    }

    #[tokio::test]
    async fn test_health_handler() {
        let response = health_handler(State(state())).await;
        assert_eq!(response.status, "healthy");
        assert_eq!(response.store, DriverKind::Memory);
    }

    #[tokio::test]
    async fn test_stats_handler() {
        let response = stats_handler(State(state())).await;
        assert_eq!(response.hits, 0);
        assert_eq!(response.misses, 0);
        assert_eq!(response.hit_rate, 0.0);
    }

    #[tokio::test]
    async fn test_clear_handler() {
        let state = state();
        state.cache.store().set("/x:body%", b"v".to_vec(), None).await.unwrap();

        let response = clear_handler(
            State(state.clone()),
            Query(ClearParams {
                key: Some("/x".to_string()),
            }),
        )
        .await
        .unwrap();

        assert_eq!(response.key.as_deref(), Some("/x"));
        assert!(!state.cache.exists("/x:body%").await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_handler_empty_key_clears_all() {
        let state = state();
        state.cache.store().set("/x:body%", b"v".to_vec(), None).await.unwrap();
        state.cache.store().set("/y:body%", b"v".to_vec(), None).await.unwrap();

        let response = clear_handler(
            State(state.clone()),
            Query(ClearParams {
                key: Some(String::new()),
            }),
        )
        .await
        .unwrap();

        assert_eq!(response.key, None);
        assert!(!state.cache.exists("/x:body%").await.unwrap());
        assert!(!state.cache.exists("/y:body%").await.unwrap());
    }

    #[tokio::test]
    async fn test_origin_handlers_count_calls() {
        let state = state();
        get_item_handler(State(state.clone()), Path("1".to_string())).await;
        update_item_handler(State(state.clone()), Path("1".to_string())).await;
        assert_eq!(state.origin_calls.load(Ordering::SeqCst), 2);
    }
}
