//! Response models
//!
//! [`CacheResponse`] is the buffered origin response the cache captures and
//! replays; the remaining types are admin endpoint bodies.

use serde::Serialize;

use crate::cache::CacheStats;
use crate::store::DriverKind;

// == Cache Response ==
/// A fully buffered response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheResponse {
    pub status: u16,
    /// Reason phrase
    pub message: String,
    /// Header name/value pairs in insertion order
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl CacheResponse {
    /// Creates a response with the canonical reason phrase for `status`.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            message: reason_phrase(status).to_string(),
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Appends a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Replaces every occurrence of `name` with a single value.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.into()));
    }

    /// Adds header names to `Vary` without duplicating existing ones.
    pub fn append_vary(&mut self, names: &[String]) {
        let mut vary: Vec<String> = self
            .header("vary")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        for name in names {
            if !vary.iter().any(|v| v.eq_ignore_ascii_case(name)) {
                vary.push(name.clone());
            }
        }

        if !vary.is_empty() {
            self.set_header("Vary", vary.join(", "));
        }
    }

    /// Media type without parameters, lower-cased.
    pub fn content_type(&self) -> String {
        self.header("content-type")
            .and_then(|v| v.split(';').next())
            .map(|v| v.trim().to_ascii_lowercase())
            .unwrap_or_default()
    }

    /// True when the body must be stored as raw bytes rather than text.
    pub fn is_binary(&self) -> bool {
        let content_type = self.content_type();
        content_type == "application/octet-stream"
            || content_type.starts_with("image/")
            || self.header("content-encoding").is_some_and(|e| !e.eq_ignore_ascii_case("identity"))
    }
}

/// Reason phrases for the status codes origins commonly return.
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "",
    }
}

// == Admin Bodies ==
/// Response body for the stats endpoint (GET /cache/stats)
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub hits: u64,
    pub misses: u64,
    pub bypassed: u64,
    pub writes: u64,
    pub invalidations: u64,
    /// hits / (hits + misses)
    pub hit_rate: f64,
    /// Driver currently serving requests
    pub store: DriverKind,
}

impl StatsResponse {
    pub fn new(stats: &CacheStats, store: DriverKind) -> Self {
        Self {
            hits: stats.hits,
            misses: stats.misses,
            bypassed: stats.bypassed,
            writes: stats.writes,
            invalidations: stats.invalidations,
            hit_rate: stats.hit_rate(),
            store,
        }
    }
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    pub store: DriverKind,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy(store: DriverKind) -> Self {
        Self {
            status: "healthy".to_string(),
            store,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Response body for DELETE /cache
#[derive(Debug, Clone, Serialize)]
pub struct ClearResponse {
    pub message: String,
    pub key: Option<String>,
}

impl ClearResponse {
    pub fn new(key: Option<String>) -> Self {
        let message = match &key {
            Some(key) => format!("Entries for '{}' cleared", key),
            None => "Cache cleared".to_string(),
        };
        Self { message, key }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_headers() {
        let mut resp = CacheResponse::new(200, "hi")
            .with_header("Content-Type", "text/html; charset=utf-8")
            .with_header("X-A", "1");

        assert_eq!(resp.message, "OK");
        assert_eq!(resp.content_type(), "text/html");
        assert_eq!(resp.header("x-a"), Some("1"));

        resp.set_header("x-a", "2");
        assert_eq!(resp.header("X-A"), Some("2"));
        assert_eq!(resp.headers.len(), 2);
    }

    #[test]
    fn test_append_vary_deduplicates() {
        let mut resp = CacheResponse::new(200, "").with_header("Vary", "accept-encoding");
        resp.append_vary(&["Accept-Encoding".to_string(), "X-Tenant".to_string()]);
        assert_eq!(resp.header("vary"), Some("accept-encoding, X-Tenant"));
    }

    #[test]
    fn test_binary_detection() {
        let png = CacheResponse::new(200, vec![0x89, 0x50]).with_header("content-type", "image/png");
        assert!(png.is_binary());

        let gz = CacheResponse::new(200, vec![0x1f, 0x8b])
            .with_header("content-type", "text/plain")
            .with_header("content-encoding", "gzip");
        assert!(gz.is_binary());

        let text = CacheResponse::new(200, "x").with_header("content-type", "application/json");
        assert!(!text.is_binary());
    }

    #[test]
    fn test_stats_response_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..CacheStats::default()
        };
        let resp = StatsResponse::new(&stats, DriverKind::Memory);
        assert!((resp.hit_rate - 0.8).abs() < 0.001);
    }

    #[test]
    fn test_health_response_serialize() {
        let resp = HealthResponse::healthy(DriverKind::Remote);
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("healthy"));
        assert!(json.contains("remote"));
        assert!(json.contains("timestamp"));
    }

    #[test]
    fn test_clear_response_message() {
        assert!(ClearResponse::new(Some("/a".into())).message.contains("/a"));
        assert_eq!(ClearResponse::new(None).message, "Cache cleared");
    }
}
