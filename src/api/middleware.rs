//! Cache Middleware
//!
//! Adapts axum requests and responses to the cache's request flow. Origin
//! bodies are buffered in full so they can be stored and replayed.

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{HeaderName, HeaderValue, StatusCode},
    middleware::{from_fn_with_state, Next},
    response::Response,
    Router,
};
use tracing::warn;

use crate::cache::{Cache, Served};
use crate::error::{CacheError, Result};
use crate::models::{CacheRequest, CacheResponse};

/// Header reporting how the response was served.
pub const X_CACHE: &str = "x-cache";

/// Headers recomputed for every response and never replayed.
const HOP_HEADERS: &[&str] = &["connection", "content-length", "transfer-encoding"];

/// Middleware that serves matching routes through `cache`.
pub async fn cache_middleware(
    State(cache): State<Arc<Cache>>,
    request: Request,
    next: Next,
) -> Result<Response> {
    let view = request_view(&request);
    let served = cache
        .handle(&view, move || async move {
            capture(next.run(request).await).await
        })
        .await?;
    into_response(served)
}

/// Applies [`cache_middleware`] to every route of `router`.
pub fn with_cache<S>(router: Router<S>, cache: Arc<Cache>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.route_layer(from_fn_with_state(cache, cache_middleware))
}

fn request_view(request: &Request) -> CacheRequest {
    let url = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let mut view = CacheRequest::new(request.method().as_str(), url);
    for (name, value) in request.headers() {
        match value.to_str() {
            Ok(value) => view.headers.push((name.as_str().to_string(), value.to_string())),
            Err(_) => warn!(header = %name, "ignoring non-text request header"),
        }
    }
    view
}

async fn capture(response: Response) -> Result<CacheResponse> {
    let (parts, body) = response.into_parts();
    let body = to_bytes(body, usize::MAX)
        .await
        .map_err(|e| CacheError::Origin(format!("failed to read origin body: {}", e)))?;

    let mut captured = CacheResponse::new(parts.status.as_u16(), body.to_vec());
    if let Some(reason) = parts.status.canonical_reason() {
        captured.message = reason.to_string();
    }
    for (name, value) in &parts.headers {
        if HOP_HEADERS.contains(&name.as_str()) {
            continue;
        }
        captured.headers.push((
            name.as_str().to_string(),
            String::from_utf8_lossy(value.as_bytes()).into_owned(),
        ));
    }
    Ok(captured)
}

fn into_response(served: Served) -> Result<Response> {
    let Served { response, status } = served;
    let code = StatusCode::from_u16(response.status)
        .map_err(|e| CacheError::Encoding(format!("invalid stored status: {}", e)))?;

    let mut out = Response::new(Body::from(response.body));
    *out.status_mut() = code;

    let headers = out.headers_mut();
    for (name, value) in &response.headers {
        if HOP_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
            continue;
        }
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => warn!(header = %name, "dropping invalid response header"),
        }
    }
    headers.insert(X_CACHE, HeaderValue::from_static(status.as_str()));
    Ok(out)
}
